use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tf_core::TelemetryPoint;

use crate::metrics::RuntimeMetrics;

/// TCP receiver for the line protocol: one JSON [`TelemetryPoint`] per line,
/// e.g. `{"device_id":"d1","ts_ms":1700000000000,"values":{"t":21.5}}`.
///
/// Decoded points are sent to the ingest channel. A malformed line is logged
/// and skipped; the connection stays open.
pub struct Receiver {
    listener: TcpListener,
    point_tx: mpsc::Sender<TelemetryPoint>,
    cancel: CancellationToken,
    metrics: Option<Arc<RuntimeMetrics>>,
}

impl Receiver {
    /// Bind to `"tcp://host:port"` (the scheme is optional).
    pub async fn bind(listen: &str, point_tx: mpsc::Sender<TelemetryPoint>) -> anyhow::Result<Self> {
        let addr = listen.strip_prefix("tcp://").unwrap_or(listen);
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            point_tx,
            cancel: CancellationToken::new(),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<RuntimeMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept connections until cancelled. Connection handlers hold clones of
    /// the ingest sender and stop with the same token.
    #[tracing::instrument(name = "receiver", skip_all)]
    pub async fn run(self) -> anyhow::Result<()> {
        let mut handlers = tokio::task::JoinSet::new();
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer) = result?;
                    tf_debug!(conn, peer = %peer, "accepted connection");
                    if let Some(m) = &self.metrics {
                        m.inc_receiver_connection();
                    }
                    handlers.spawn(handle_connection(
                        stream,
                        peer,
                        self.point_tx.clone(),
                        self.cancel.child_token(),
                        self.metrics.clone(),
                    ));
                }
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
                _ = self.cancel.cancelled() => break,
            }
        }
        // Every queued line is in the channel once the handlers are joined.
        while handlers.join_next().await.is_some() {}
        Ok(())
    }
}

#[tracing::instrument(skip_all, fields(peer = %peer))]
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    point_tx: mpsc::Sender<TelemetryPoint>,
    cancel: CancellationToken,
    metrics: Option<Arc<RuntimeMetrics>>,
) {
    let (reader, _writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            result = lines.next_line() => {
                let line = match result {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tf_warn!(conn, error = %e, "connection read error");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                if let Some(m) = &metrics {
                    m.inc_receiver_line();
                }
                let point = match decode_line(&line) {
                    Ok(point) => point,
                    Err(e) => {
                        if let Some(m) = &metrics {
                            m.inc_receiver_decode_error();
                        }
                        tf_warn!(conn, error = %e, "line decode error");
                        continue;
                    }
                };
                tf_trace!(pipe, device = %point.device_id, ts_ms = point.ts_ms, "point decoded");
                if point_tx.send(point).await.is_err() {
                    tf_warn!(conn, "ingest channel closed, dropping connection");
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    tf_debug!(conn, peer = %peer, "connection closed");
}

/// Decode one protocol line.
pub fn decode_line(line: &str) -> anyhow::Result<TelemetryPoint> {
    let point: TelemetryPoint = serde_json::from_str(line.trim())?;
    if point.device_id.is_empty() {
        anyhow::bail!("empty device_id");
    }
    Ok(point)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn line(device: &str, ts: i64, t: f64) -> String {
        format!("{{\"device_id\":\"{device}\",\"ts_ms\":{ts},\"values\":{{\"t\":{t}}}}}\n")
    }

    async fn start() -> (
        SocketAddr,
        CancellationToken,
        mpsc::Receiver<TelemetryPoint>,
        tokio::task::JoinHandle<anyhow::Result<()>>,
    ) {
        let (tx, rx) = mpsc::channel(64);
        let receiver = Receiver::bind("tcp://127.0.0.1:0", tx).await.unwrap();
        let addr = receiver.local_addr().unwrap();
        let cancel = receiver.cancel_token();
        let server = tokio::spawn(receiver.run());
        (addr, cancel, rx, server)
    }

    async fn recv(rx: &mut mpsc::Receiver<TelemetryPoint>) -> TelemetryPoint {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn decode_accepts_protocol_line() {
        let p = decode_line(r#"{"device_id":"d1","ts_ms":1700000000000,"values":{"t":21.5}}"#)
            .unwrap();
        assert_eq!(p.device_id, "d1");
        assert_eq!(p.ts_ms, 1_700_000_000_000);
        assert_eq!(p.value("t"), Some(21.5));

        let bare = decode_line(r#"{"device_id":"d2","ts_ms":5}"#).unwrap();
        assert!(bare.values.is_empty());
    }

    #[test]
    fn decode_rejects_bad_lines() {
        for bad in [
            "not json",
            r#"{"ts_ms":1}"#,
            r#"{"device_id":"","ts_ms":1}"#,
            r#"{"device_id":"d","ts_ms":1,"values":{"t":"hot"}}"#,
        ] {
            assert!(decode_line(bad).is_err(), "{bad}");
        }
    }

    // -- 1. several connections at once ---------------------------------------

    #[tokio::test]
    async fn multi_connection_concurrent() {
        let (addr, cancel, mut rx, server) = start().await;

        let mut clients = Vec::new();
        for i in 0..3i64 {
            clients.push(tokio::spawn(async move {
                let mut conn = TcpStream::connect(addr).await.unwrap();
                conn.write_all(line(&format!("d{i}"), 1_000 * (i + 1), i as f64).as_bytes())
                    .await
                    .unwrap();
                conn.flush().await.unwrap();
            }));
        }
        for c in clients {
            c.await.unwrap();
        }

        let mut devices = Vec::new();
        for _ in 0..3 {
            devices.push(recv(&mut rx).await.device_id);
        }
        devices.sort();
        assert_eq!(devices, vec!["d0", "d1", "d2"]);

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    // -- 2. stream of lines on one connection keeps order ---------------------

    #[tokio::test]
    async fn continuous_reception_in_order() {
        let (addr, cancel, mut rx, server) = start().await;

        let mut conn = TcpStream::connect(addr).await.unwrap();
        let mut payload = String::new();
        for i in 0..10 {
            payload.push_str(&line("d1", i, i as f64));
        }
        conn.write_all(payload.as_bytes()).await.unwrap();

        for i in 0..10 {
            assert_eq!(recv(&mut rx).await.ts_ms, i);
        }

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    // -- 3. malformed lines are skipped, not fatal -----------------------------

    #[tokio::test]
    async fn malformed_line_skipped() {
        let (tx, mut rx) = mpsc::channel(8);
        let metrics = Arc::new(RuntimeMetrics::new(&[]));
        let receiver = Receiver::bind("127.0.0.1:0", tx)
            .await
            .unwrap()
            .with_metrics(Some(Arc::clone(&metrics)));
        let addr = receiver.local_addr().unwrap();
        let cancel = receiver.cancel_token();
        let server = tokio::spawn(receiver.run());

        let mut conn = TcpStream::connect(addr).await.unwrap();
        let payload = format!("garbage\n\n{}", line("d1", 7, 1.0));
        conn.write_all(payload.as_bytes()).await.unwrap();

        assert_eq!(recv(&mut rx).await.ts_ms, 7);
        let text = metrics.render_prometheus();
        assert!(text.contains("tf_receiver_decode_errors_total 1"));
        assert!(text.contains("tf_receiver_lines_total 2"));

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    // -- 4. a dropped connection does not affect later ones --------------------

    #[tokio::test]
    async fn connection_drop_no_impact() {
        let (addr, cancel, mut rx, server) = start().await;

        {
            let mut a = TcpStream::connect(addr).await.unwrap();
            a.write_all(line("a", 1, 1.0).as_bytes()).await.unwrap();
            assert_eq!(recv(&mut rx).await.device_id, "a");
        }

        let mut b = TcpStream::connect(addr).await.unwrap();
        b.write_all(line("b", 2, 2.0).as_bytes()).await.unwrap();
        assert_eq!(recv(&mut rx).await.device_id, "b");

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    // -- 5. cancellation closes open connections -------------------------------

    #[tokio::test]
    async fn cancel_stops_open_connections() {
        let (addr, cancel, mut rx, server) = start().await;
        let _idle = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        // All senders are gone once the receiver has stopped.
        assert!(rx.recv().await.is_none());
    }
}
