//! Naming codec between snapshot identity and flat remote object names
//!
//! A snapshot is identified by the UUID of its btrfs filesystem and its path
//! relative to that filesystem's root. The remote name is:
//!
//! ```text
//! <uuid><ESC><relative path with every '/' replaced by ESC>
//! ```
//!
//! `ESC` has no proper prefix equal to a proper suffix, so two occurrences
//! can never overlap. Together with the rejection of paths that already
//! contain it, splitting an encoded name on `ESC` recovers the path exactly.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Reserved token standing in for `/` inside remote object names
pub const SEPARATOR_ESCAPE: &str = "_2F~";

/// Length of a hyphenated UUID
const UUID_LEN: usize = 36;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidName {
    #[error("relative path {path:?} contains the reserved sequence {esc:?}", esc = SEPARATOR_ESCAPE)]
    ReservedSequence { path: String },

    #[error("relative path is empty")]
    EmptyPath,

    #[error("{name:?} is not a snapshot name: {reason}")]
    Malformed { name: String, reason: &'static str },
}

/// Remote object name of an archived snapshot
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotName(String);

impl SnapshotName {
    /// Validate an object name read back from the remote container
    pub fn parse(name: impl Into<String>) -> Result<Self, InvalidName> {
        let name = name.into();
        decode(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover `(filesystem uuid, relative path)`
    pub fn decode(&self) -> Result<(Uuid, String), InvalidName> {
        decode(&self.0)
    }

    /// Prefix shared by every snapshot name of one filesystem
    pub fn filesystem_prefix(uuid: Uuid) -> String {
        format!("{}{}", uuid.hyphenated(), SEPARATOR_ESCAPE)
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SnapshotName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Encode a snapshot identity into its remote object name
pub fn encode(uuid: Uuid, relative_path: &str) -> Result<SnapshotName, InvalidName> {
    if relative_path.is_empty() {
        return Err(InvalidName::EmptyPath);
    }
    if relative_path.contains(SEPARATOR_ESCAPE) {
        return Err(InvalidName::ReservedSequence {
            path: relative_path.to_string(),
        });
    }

    let mut name = SnapshotName::filesystem_prefix(uuid);
    name.push_str(&relative_path.replace('/', SEPARATOR_ESCAPE));
    Ok(SnapshotName(name))
}

/// Decode a remote object name back into `(filesystem uuid, relative path)`
pub fn decode(name: &str) -> Result<(Uuid, String), InvalidName> {
    let malformed = |reason| InvalidName::Malformed {
        name: name.to_string(),
        reason,
    };

    if name.len() <= UUID_LEN || !name.is_char_boundary(UUID_LEN) {
        return Err(malformed("too short to carry a filesystem uuid"));
    }
    let (uuid_part, rest) = name.split_at(UUID_LEN);

    let uuid = Uuid::parse_str(uuid_part).map_err(|_| malformed("invalid filesystem uuid"))?;
    // Only the canonical lowercase hyphenated form is ever produced by `encode`
    if uuid.hyphenated().to_string() != uuid_part {
        return Err(malformed("non-canonical filesystem uuid"));
    }

    let escaped = rest
        .strip_prefix(SEPARATOR_ESCAPE)
        .ok_or_else(|| malformed("missing separator after filesystem uuid"))?;
    if escaped.is_empty() {
        return Err(malformed("empty relative path"));
    }

    let relative_path = escaped.split(SEPARATOR_ESCAPE).collect::<Vec<_>>().join("/");
    Ok((uuid, relative_path))
}
