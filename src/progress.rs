//! Progress reporting for long tool calls

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Receives progress updates
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: u32, total: u32, message: Option<&str>);
}

/// Cheap handle passed into long-running operations
#[derive(Clone, Default)]
pub struct Progress {
    sink: Option<Arc<dyn ProgressSink>>,
}

impl Progress {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn report(&self, progress: u32, total: u32) {
        tracing::debug!("progress {}/{}", progress, total);
        if let Some(sink) = &self.sink {
            sink.report(progress, total, None);
        }
    }

    pub fn message(&self, progress: u32, total: u32, message: &str) {
        tracing::info!("{}", message);
        if let Some(sink) = &self.sink {
            sink.report(progress, total, Some(message));
        }
    }
}

/// Advance a soft progress bar every `tick` until `cancel` fires.
///
/// Goes up by 5 until 50, then by 2, and stops short of 95 so the caller
/// reports completion itself.
pub async fn report_until_cancelled(progress: Progress, cancel: CancellationToken, tick: Duration) {
    let mut current = 5u32;
    while current < 95 {
        progress.report(current, 100);
        current += if current < 50 { 5 } else { 2 };
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(tick) => {}
        }
    }
    cancel.cancelled().await;
}
