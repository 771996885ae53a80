//! Signal feeds: where the daemon's per-cycle batches come from.
//!
//! OS process collection is a separate concern; the daemon consumes
//! whatever a [`SignalSource`] hands it. The shipped source replays
//! JSONL captures, one signal per line with a blank line ending each
//! cycle's batch, from a file or stdin.

use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::warn;
use warden_core::types::ProcessSignal;

/// Per-cycle batch supplier. `Ok(None)` means the feed is exhausted
/// and stays exhausted.
#[async_trait]
pub trait SignalSource: Send {
    async fn next_batch(&mut self) -> anyhow::Result<Option<Vec<ProcessSignal>>>;
}

/// JSONL replay feed.
///
/// Each line is one serialized [`ProcessSignal`]; a blank line closes
/// the current batch. Malformed lines are logged and skipped so one
/// bad record cannot poison a capture.
pub struct JsonlSource {
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    exhausted: bool,
}

impl std::fmt::Debug for JsonlSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlSource")
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl JsonlSource {
    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("cannot open signal feed {}", path.display()))?;
        Ok(Self::from_reader(Box::new(BufReader::new(file))))
    }

    pub fn from_stdin() -> Self {
        Self::from_reader(Box::new(BufReader::new(tokio::io::stdin())))
    }

    fn from_reader(reader: Box<dyn AsyncBufRead + Unpin + Send>) -> Self {
        Self {
            reader,
            exhausted: false,
        }
    }
}

#[async_trait]
impl SignalSource for JsonlSource {
    async fn next_batch(&mut self) -> anyhow::Result<Option<Vec<ProcessSignal>>> {
        if self.exhausted {
            return Ok(None);
        }
        let mut batch = Vec::new();
        let mut saw_line = false;
        let mut line = String::new();
        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .context("signal feed read failed")?;
            if n == 0 {
                self.exhausted = true;
                if !saw_line {
                    return Ok(None);
                }
                return Ok(Some(batch));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                // Blank lines before any record are separators left by
                // the previous batch; after a record they close this one.
                if saw_line {
                    return Ok(Some(batch));
                }
                continue;
            }
            saw_line = true;
            match serde_json::from_str::<ProcessSignal>(trimmed) {
                Ok(signal) => batch.push(signal),
                Err(e) => warn!(error = %e, "Skipping malformed feed line"),
            }
        }
    }
}
