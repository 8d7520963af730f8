//! Configuration for the Swift client
//!
//! Credentials are passed in explicitly. [`SwiftConfig::from_env`] reads the
//! conventional `OS_*` variables for callers that want the usual OpenStack
//! behaviour; nothing else in the workspace touches the environment.

use crate::error::{Result, StoreError};
use std::fmt;

/// Swift refuses single objects above 5 GiB
pub const MAX_SINGLE_OBJECT_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Default `min_segment_size` of the static large object middleware
pub const MIN_SEGMENT_BYTES: u64 = 1024 * 1024;

/// How the client obtains a token and a storage URL
#[derive(Clone, PartialEq, Eq)]
pub enum SwiftAuth {
    /// Keystone v3 password authentication
    Keystone {
        auth_url: String,
        username: String,
        password: String,
        project_name: String,
        user_domain_name: String,
        project_domain_name: String,
    },
    /// Token and storage URL obtained out of band
    Preauthenticated { storage_url: String, token: String },
}

impl SwiftAuth {
    /// Whether a rejected token can be replaced by logging in again
    pub fn can_renew(&self) -> bool {
        matches!(self, SwiftAuth::Keystone { .. })
    }
}

impl fmt::Debug for SwiftAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwiftAuth::Keystone {
                auth_url,
                username,
                project_name,
                user_domain_name,
                project_domain_name,
                ..
            } => f
                .debug_struct("Keystone")
                .field("auth_url", auth_url)
                .field("username", username)
                .field("password", &"<redacted>")
                .field("project_name", project_name)
                .field("user_domain_name", user_domain_name)
                .field("project_domain_name", project_domain_name)
                .finish(),
            SwiftAuth::Preauthenticated { storage_url, .. } => f
                .debug_struct("Preauthenticated")
                .field("storage_url", storage_url)
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Configuration for [`crate::SwiftStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwiftConfig {
    pub auth: SwiftAuth,

    /// Catalog region to pick the object-store endpoint from
    pub region: Option<String>,

    /// Catalog endpoint interface (default: "public")
    pub interface: String,

    /// Objects larger than this are uploaded as static large objects
    pub segment_size_bytes: u64,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

fn default_segment_size() -> u64 {
    1024 * 1024 * 1024 // 1GB
}

fn default_timeout() -> u64 {
    3600
}

impl SwiftConfig {
    pub fn new(auth: SwiftAuth) -> Self {
        Self {
            auth,
            region: None,
            interface: "public".to_string(),
            segment_size_bytes: default_segment_size(),
            timeout_secs: default_timeout(),
        }
    }

    /// Read the standard OpenStack `OS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok().filter(|value| !value.is_empty()))
    }

    /// Build from an arbitrary variable lookup
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let auth = match (var("OS_STORAGE_URL"), var("OS_AUTH_TOKEN")) {
            (Some(storage_url), Some(token)) => SwiftAuth::Preauthenticated { storage_url, token },
            _ => {
                let required = |key: &str| {
                    var(key).ok_or_else(|| StoreError::Config(format!("{} is not set", key)))
                };
                SwiftAuth::Keystone {
                    auth_url: required("OS_AUTH_URL")?,
                    username: required("OS_USERNAME")?,
                    password: required("OS_PASSWORD")?,
                    project_name: var("OS_PROJECT_NAME")
                        .or_else(|| var("OS_TENANT_NAME"))
                        .ok_or_else(|| StoreError::Config("OS_PROJECT_NAME is not set".to_string()))?,
                    user_domain_name: var("OS_USER_DOMAIN_NAME").unwrap_or_else(|| "Default".to_string()),
                    project_domain_name: var("OS_PROJECT_DOMAIN_NAME")
                        .unwrap_or_else(|| "Default".to_string()),
                }
            }
        };

        let mut config = Self::new(auth);
        config.region = var("OS_REGION_NAME");
        if let Some(interface) = var("OS_INTERFACE") {
            config.interface = interface;
        }
        Ok(config)
    }

    /// Set the catalog region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the segment size for large objects
    pub fn with_segment_size(mut self, bytes: u64) -> Self {
        self.segment_size_bytes = bytes;
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_SEGMENT_BYTES..=MAX_SINGLE_OBJECT_BYTES).contains(&self.segment_size_bytes) {
            return Err(StoreError::Config(format!(
                "segment size must be between {} and {} bytes",
                MIN_SEGMENT_BYTES, MAX_SINGLE_OBJECT_BYTES
            )));
        }
        if self.timeout_secs == 0 {
            return Err(StoreError::Config("timeout must be at least one second".to_string()));
        }
        Ok(())
    }
}
