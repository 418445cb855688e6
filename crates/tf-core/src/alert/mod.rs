mod sink;
mod types;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use sink::{AlertSink, DerivedSink, FanOutSink, JsonlFileSink};
pub use types::{GlobalAlert, Severity, alert_id, format_millis};

/// Hand-off point for fired alerts. An alert counts as fired only once
/// `dispatch` returned `Ok`.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, alert: GlobalAlert) -> anyhow::Result<()>;
}

#[async_trait]
impl AlertDispatcher for mpsc::Sender<GlobalAlert> {
    async fn dispatch(&self, alert: GlobalAlert) -> anyhow::Result<()> {
        self.send(alert)
            .await
            .map_err(|_| anyhow::anyhow!("alert channel closed"))
    }
}
