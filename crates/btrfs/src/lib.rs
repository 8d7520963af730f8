//! btrfs and age integration for snapvault
//!
//! This crate provides:
//! - [`BtrfsCli`]: subvolume introspection and `btrfs send`, via the `btrfs` tool
//! - [`AgeCli`]: stream encryption via the `age` tool
//! - Parsers for the text output of `btrfs subvolume` / `btrfs filesystem`

pub mod age;
pub mod cli;
pub mod parse;
pub mod tool;

// Re-exports
pub use age::AgeCli;
pub use cli::BtrfsCli;
pub use tool::locate;
