use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Reports progress through the tracing subscriber (stderr).
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        let elapsed_ms = event
            .elapsed
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        info!(elapsed_ms, "{}", event.message);
    }
}

impl OutputMode {
    pub fn sink(self) -> &'static dyn ProgressSink {
        match self {
            OutputMode::Interactive => &LogProgress,
            OutputMode::NonInteractive => &JsonOutput,
        }
    }
}
