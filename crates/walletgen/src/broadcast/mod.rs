//! In-process fan-out of job events.

pub mod job_progress;

pub use job_progress::{JobEventKind, JobProgressBroadcaster, JobProgressEvent};
