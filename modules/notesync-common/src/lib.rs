pub mod config;
pub mod error;
pub mod types;

pub use config::{DetailFetch, DriverKind, RequestSpec, SourceMode, SyncConfig, WebSourceConfig};
pub use error::{Result, SyncError};
pub use types::{
    Cooldown, FieldInference, ItemSummary, Note, PageBatch, PendingCount, SyncReport,
};
