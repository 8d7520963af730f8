//! Core types and pure logic for snapvault
//!
//! This crate provides:
//! - Snapshot data model (subvolumes, local snapshots, planned transfers)
//! - Naming codec between snapshot identity and remote object names
//! - Snapshot enumeration over a filesystem-introspection capability
//! - Incremental chain planning
//! - Capability traits for the external tools the engine drives

pub mod capability;
pub mod enumerate;
pub mod error;
pub mod model;
pub mod naming;
pub mod planner;

// Re-exports
pub use capability::{ByteStream, Encryptor, SnapshotSender, SnapshotSource};
pub use error::{Error, Result};
pub use model::{LocalSnapshot, PlannedTransfer, Subvolume, SyncPlan, TransferKind};
pub use naming::{InvalidName, SnapshotName, SEPARATOR_ESCAPE};
