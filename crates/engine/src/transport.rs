//! Upload transport

use crate::artifact::StagedArtifact;
use serde::Serialize;
use std::sync::Arc;
use store::{ObjectBody, ObjectStore};
use sv_core::{Error, Result};
use tracing::{info, instrument};

/// What happened to a staged artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    Uploaded { bytes: u64 },
    /// Dry run: everything checked, nothing sent
    WouldUpload { bytes: u64 },
}

/// Sends staged artifacts to one container
pub struct UploadTransport {
    store: Arc<dyn ObjectStore>,
    container: String,
    dry_run: bool,
}

impl UploadTransport {
    pub fn new(store: Arc<dyn ObjectStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Upload `artifact` under its snapshot name
    ///
    /// The artifact is consumed, so its file is gone once this returns.
    #[instrument(skip_all, fields(name = %artifact.name(), dry_run = self.dry_run))]
    pub async fn upload(&self, artifact: StagedArtifact) -> Result<UploadOutcome> {
        let name = artifact.name().clone();
        name.decode().map_err(|e| Error::upload(&name, e))?;
        let body = ObjectBody::from_file(artifact.path())
            .await
            .map_err(|e| Error::upload(&name, format!("staged artifact unusable: {}", e)))?;

        if self.dry_run {
            info!(
                "Would upload {} ({} bytes) to container {}",
                name,
                body.len(),
                self.container
            );
            return Ok(UploadOutcome::WouldUpload { bytes: body.len() });
        }

        info!("Uploading {} ({} bytes) to container {}", name, body.len(), self.container);
        let bytes = body.len();
        self.store
            .put_object(&self.container, name.as_str(), body)
            .await
            .map_err(|e| Error::upload(&name, e))?;
        info!("Uploaded {}", name);

        Ok(UploadOutcome::Uploaded { bytes })
    }
}
