//! `age` tool backed stream encryption

use crate::tool;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use sv_core::{ByteStream, Encryptor, Error, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Encrypts streams by piping them through `age -r <recipient>`
#[derive(Debug, Clone)]
pub struct AgeCli {
    program: PathBuf,
}

impl AgeCli {
    /// Locate `age` on `PATH`
    pub fn new() -> Result<Self> {
        Ok(Self::with_program(tool::locate("age")?))
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Encryptor for AgeCli {
    async fn encrypt(&self, input: ByteStream, recipient: &str) -> Result<ByteStream> {
        debug!("Encrypting stream for recipient {}", recipient);

        let mut child = Command::new(&self.program)
            .arg("--encrypt")
            .arg("--recipient")
            .arg(recipient)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::EnvironmentPrecondition(format!("Failed to execute {}: {}", self.program.display(), e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::EnvironmentPrecondition("age has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::EnvironmentPrecondition("age has no stdout".to_string()))?;
        let stderr = tool::drain_stderr(child.stderr.take());

        // Feed the plaintext in the background; closing stdin lets age finish
        let feeder = tokio::spawn(async move {
            let fed = input.copy_into(&mut stdin).await;
            let closed = stdin.shutdown().await;
            drop(stdin);
            let fed = fed?;
            closed?;
            Ok::<u64, Error>(fed)
        });

        let completion = async move {
            let fed = feeder
                .await
                .map_err(|e| Error::EnvironmentPrecondition(format!("age feeder task failed: {}", e)))
                .and_then(|fed| fed);
            let status = child.wait().await?;
            let stderr = stderr.await.unwrap_or_default();

            // A failed age breaks the pipe feeding it, so its exit status comes
            // first; a clean exit on truncated input leaves the upstream error
            match (fed, status.success()) {
                (_, false) => Err(Error::EnvironmentPrecondition(format!(
                    "age exited with {}: {}",
                    status,
                    stderr.trim()
                ))),
                (Err(e), true) => Err(e),
                (Ok(fed), true) => {
                    debug!("Encrypted {} bytes", fed);
                    Ok(())
                }
            }
        };

        Ok(ByteStream::new(stdout, completion))
    }
}
