pub mod jobs;
pub mod store;
pub mod summarize;
pub mod sync;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

#[cfg(test)]
mod sync_tests;

pub use jobs::{spawn_sync_job, AckPlan, JobError, JobManager, JobState, JobStatus};
pub use store::{LocalStore, SyncStore};
pub use summarize::{AudioFetcher, NoopSummarizer, Summarizer, Transcriber};
pub use sync::{NoteSource, ProgressSink, SyncEngine, HEAD_SCAN_PAGES};
