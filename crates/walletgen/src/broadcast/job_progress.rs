//! Job progress broadcaster for in-process subscribers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::SinkError;
use crate::jobs::ProgressSink;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum JobEventKind {
    /// New status line.
    Update { text: String },
    /// A finished archive is ready at `path`.
    File { path: PathBuf, caption: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    pub fn update(job_id: &str, text: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind: JobEventKind::Update {
                text: text.to_string(),
            },
            timestamp: Utc::now(),
        }
    }

    pub fn file(job_id: &str, path: &Path, caption: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind: JobEventKind::File {
                path: path.to_path_buf(),
                caption: caption.to_string(),
            },
            timestamp: Utc::now(),
        }
    }
}

/// A [`ProgressSink`] that republishes everything on a broadcast channel.
///
/// Subscribers that fall behind lose the oldest events.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ProgressSink for JobProgressBroadcaster {
    fn update(&self, job_id: &str, text: &str) -> Result<(), SinkError> {
        self.send(JobProgressEvent::update(job_id, text));
        Ok(())
    }

    fn deliver_file(&self, job_id: &str, path: &Path, caption: &str) -> Result<(), SinkError> {
        self.send(JobProgressEvent::file(job_id, path, caption));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subscribers_is_ok() {
        let broadcaster = JobProgressBroadcaster::new(4);
        assert_eq!(broadcaster.receiver_count(), 0);
        assert!(broadcaster.update("job", "line").is_ok());
        assert!(broadcaster
            .deliver_file("job", Path::new("/tmp/backup_ETH_001.zip"), "Backup: backup_ETH_001.zip")
            .is_ok());
    }

    #[test]
    fn test_fan_out_to_every_subscriber() {
        let broadcaster = JobProgressBroadcaster::new(8);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        broadcaster.update("ab12cd34", "Job ab12cd34 [running] Processed: 1/2 (50%).").unwrap();
        broadcaster
            .deliver_file("ab12cd34", Path::new("backup_BTC_001.zip"), "Backup: backup_BTC_001.zip")
            .unwrap();

        for rx in [&mut a, &mut b] {
            let first = rx.try_recv().unwrap();
            assert_eq!(first.job_id, "ab12cd34");
            assert!(matches!(first.kind, JobEventKind::Update { ref text } if text.ends_with("(50%).")));
            let second = rx.try_recv().unwrap();
            assert_eq!(
                second.kind,
                JobEventKind::File {
                    path: PathBuf::from("backup_BTC_001.zip"),
                    caption: "Backup: backup_BTC_001.zip".to_string(),
                }
            );
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = JobProgressEvent::update("j1", "hello");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["jobId"], "j1");
        assert_eq!(json["kind"], "update");
        assert_eq!(json["text"], "hello");
    }
}
