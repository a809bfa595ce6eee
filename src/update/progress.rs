use std::fmt;
use std::sync::mpsc::{self, Receiver, SyncSender};

use tracing::debug;

/// Default buffer size for [`progress_channel`].
pub const DEFAULT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Verify,
    Backup,
    Replace,
    Complete,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Verify => "verify",
            Self::Backup => "backup",
            Self::Replace => "replace",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// 0-100, only meaningful for `Stage::Download`.
    pub percent: f64,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub message: String,
}

impl ProgressEvent {
    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            percent: 0.0,
            bytes_downloaded: 0,
            total_bytes: 0,
            message: message.into(),
        }
    }

    pub fn download(bytes_downloaded: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            0.0
        } else {
            (bytes_downloaded as f64 / total_bytes as f64 * 100.0).min(100.0)
        };
        Self {
            stage: Stage::Download,
            percent,
            bytes_downloaded,
            total_bytes,
            message: String::new(),
        }
    }
}

/// Create a bounded progress stream.
pub fn progress_channel(capacity: usize) -> (SyncSender<ProgressEvent>, Receiver<ProgressEvent>) {
    mpsc::sync_channel(capacity)
}

/// Producer side used inside the updater.
pub(crate) struct ProgressSink {
    tx: SyncSender<ProgressEvent>,
    detached: bool,
}

impl ProgressSink {
    pub(crate) fn new(tx: SyncSender<ProgressEvent>) -> Self {
        Self { tx, detached: false }
    }

    /// Blocks while the buffer is full. A dropped receiver only stops the
    /// reporting; the update itself carries on.
    pub(crate) fn emit(&mut self, event: ProgressEvent) {
        if self.detached {
            return;
        }
        if self.tx.send(event).is_err() {
            debug!("Progress receiver dropped, discarding further events");
            self.detached = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_percent() {
        let event = ProgressEvent::download(512, 1024);
        assert_eq!(event.stage, Stage::Download);
        assert!((event.percent - 50.0).abs() < f64::EPSILON);

        let unknown = ProgressEvent::download(512, 0);
        assert_eq!(unknown.percent, 0.0);
    }

    #[test]
    fn test_stream_closes_when_sink_dropped() {
        let (tx, rx) = progress_channel(4);
        {
            let mut sink = ProgressSink::new(tx);
            sink.emit(ProgressEvent::stage(Stage::Backup, "Creating backup..."));
        }
        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, Stage::Backup);
    }

    #[test]
    fn test_dropped_receiver_does_not_block() {
        let (tx, rx) = progress_channel(1);
        drop(rx);
        let mut sink = ProgressSink::new(tx);
        sink.emit(ProgressEvent::stage(Stage::Download, "Starting download..."));
        sink.emit(ProgressEvent::stage(Stage::Verify, "Verifying download..."));
        assert!(sink.detached);
    }
}
