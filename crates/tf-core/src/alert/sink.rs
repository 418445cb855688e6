use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use serde::Serialize;

use super::GlobalAlert;
use crate::telemetry::DerivedValue;

/// Destination for fired alerts.
pub trait AlertSink: Send + Sync {
    fn send(&self, alert: &GlobalAlert) -> Result<()>;
}

/// Destination for derived synthetic-variable values.
pub trait DerivedSink: Send + Sync {
    fn publish(&self, value: &DerivedValue) -> Result<()>;
}

/// Appends records as JSON Lines to a file.
pub struct JsonlFileSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlFileSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn write_line<T: Serialize>(&self, record: &T) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut w = self.writer.lock().expect("jsonl sink lock poisoned");
        w.write_all(json.as_bytes())?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }
}

impl AlertSink for JsonlFileSink {
    fn send(&self, alert: &GlobalAlert) -> Result<()> {
        self.write_line(alert)
    }
}

impl DerivedSink for JsonlFileSink {
    fn publish(&self, value: &DerivedValue) -> Result<()> {
        self.write_line(value)
    }
}

/// Broadcasts to several sinks.
///
/// Keeps delivering to the remaining sinks when one fails and returns the
/// first error encountered, if any.
pub struct FanOutSink<S: ?Sized> {
    sinks: Vec<Box<S>>,
}

impl<S: ?Sized> FanOutSink<S> {
    pub fn new(sinks: Vec<Box<S>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn each(&self, mut f: impl FnMut(&S) -> Result<()>) -> Result<()> {
        let mut first_err: Option<anyhow::Error> = None;
        for sink in &self.sinks {
            if let Err(e) = f(&**sink) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl AlertSink for FanOutSink<dyn AlertSink> {
    fn send(&self, alert: &GlobalAlert) -> Result<()> {
        self.each(|s| s.send(alert))
    }
}

impl DerivedSink for FanOutSink<dyn DerivedSink> {
    fn publish(&self, value: &DerivedValue) -> Result<()> {
        self.each(|s| s.publish(value))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
