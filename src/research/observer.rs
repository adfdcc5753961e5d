//! Per-iteration progress reporting.
//!
//! Observers see one event per completed iteration. They never influence
//! control flow: an observer error is logged and the run continues.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::types::{EvaluationStatus, QuestionOrigin};

#[derive(Debug, Clone, Serialize)]
pub struct IterationEvent {
    pub run_id: Uuid,
    pub iteration: usize,
    pub question: String,
    pub origin: QuestionOrigin,
    pub expanded_query: String,
    pub hits: usize,
    /// `None` when the iteration was not evaluated.
    pub status: Option<EvaluationStatus>,
    pub suggested_followup: Option<String>,
    pub followup_queued: bool,
    pub tokens_used: usize,
    pub queue_len: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("progress channel closed")]
    Closed,
    #[error("progress worker failed: {0}")]
    Join(String),
}

#[async_trait]
pub trait ResearchObserver: Send + Sync {
    async fn on_iteration(&self, event: &IterationEvent) -> Result<(), ObserverError>;
}

/// Wraps a plain closure as an observer.
pub struct ProgressCallback<F>(pub F);

#[async_trait]
impl<F> ResearchObserver for ProgressCallback<F>
where
    F: Fn(&IterationEvent) + Send + Sync,
{
    async fn on_iteration(&self, event: &IterationEvent) -> Result<(), ObserverError> {
        (self.0)(event);
        Ok(())
    }
}

// =============================================================================
// JSONL sink
// =============================================================================

/// Streams iteration events as JSON lines through a background writer thread.
#[derive(Clone)]
pub struct JsonlProgressSink {
    sender: mpsc::Sender<IterationEvent>,
}

pub struct ProgressWorker {
    handle: Option<std::thread::JoinHandle<Result<(), ObserverError>>>,
}

impl ProgressWorker {
    /// Wait for the writer to drain and flush. Every sink clone must be
    /// dropped first or this blocks.
    pub fn join(mut self) -> Result<(), ObserverError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(ObserverError::Join("progress worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlProgressSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, ProgressWorker), ObserverError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<IterationEvent>();
        let handle = std::thread::spawn(move || write_progress_loop(file, receiver));
        Ok((
            Self { sender },
            ProgressWorker {
                handle: Some(handle),
            },
        ))
    }
}

#[async_trait]
impl ResearchObserver for JsonlProgressSink {
    async fn on_iteration(&self, event: &IterationEvent) -> Result<(), ObserverError> {
        self.sender
            .send(event.clone())
            .map_err(|_| ObserverError::Closed)
    }
}

fn write_progress_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<IterationEvent>,
) -> Result<(), ObserverError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line =
            serde_json::to_string(&event).map_err(|e| ObserverError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}
