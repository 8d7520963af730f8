//! Synchronization engine
//!
//! This crate provides:
//! - Remote state resolution (which snapshots the container already holds)
//! - The preparation pipeline (send stream, optional encryption, rate limited staging)
//! - The upload transport (dry-run aware)
//! - The sync orchestrator driving a plan item by item

pub mod artifact;
pub mod orchestrator;
pub mod prepare;
pub mod resolver;
pub mod throttle;
pub mod transport;

// Re-exports
pub use artifact::StagedArtifact;
pub use orchestrator::{ItemOutcome, ItemReport, Stage, SyncOptions, SyncOrchestrator, SyncReport, SyncState};
pub use prepare::Preparer;
pub use resolver::list_archived;
pub use throttle::RateLimit;
pub use transport::{UploadOutcome, UploadTransport};
