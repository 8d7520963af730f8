//! Error taxonomy shared by every snapvault crate

use crate::naming::InvalidName;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A required tool or capability is missing, or the environment is unsupported
    #[error("Environment precondition failed: {0}")]
    EnvironmentPrecondition(String),

    #[error("Cannot inspect {}: {reason}", path.display())]
    FilesystemAccess { path: PathBuf, reason: String },

    #[error("Invalid snapshot name: {0}")]
    InvalidName(#[from] InvalidName),

    #[error("Remote container unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Preparing {snapshot} failed: {reason}")]
    Preparation { snapshot: String, reason: String },

    #[error("Uploading {name} failed: {reason}")]
    Upload { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn filesystem_access(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::FilesystemAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn preparation(snapshot: impl ToString, reason: impl ToString) -> Self {
        Self::Preparation {
            snapshot: snapshot.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn upload(name: impl ToString, reason: impl ToString) -> Self {
        Self::Upload {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
