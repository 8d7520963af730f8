//! Capability seams for the external tools the engine drives
//!
//! Filesystem introspection, the snapshot-diff producer and the encryption
//! tool are all consumed through these traits, so the engine can be tested
//! against fakes and the real implementations live in the `btrfs` crate.

use crate::error::Result;
use crate::model::{LocalSnapshot, Subvolume};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Lists subvolumes and their read-only snapshots
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Resolve the subvolume at `path`
    async fn subvolume(&self, path: &Path) -> Result<Subvolume>;

    /// Read-only snapshots taken of `subvolume`, in any order
    async fn list_read_only_snapshots(&self, subvolume: &Subvolume) -> Result<Vec<LocalSnapshot>>;
}

/// Produces the transfer stream of a snapshot
#[async_trait]
pub trait SnapshotSender: Send + Sync {
    /// Full dump when `parent` is `None`, otherwise the delta against `parent`
    async fn send(&self, snapshot: &LocalSnapshot, parent: Option<&LocalSnapshot>)
        -> Result<ByteStream>;
}

/// Encrypts a byte stream for a recipient key
#[async_trait]
pub trait Encryptor: Send + Sync {
    async fn encrypt(&self, input: ByteStream, recipient: &str) -> Result<ByteStream>;
}

/// A readable byte stream plus the outcome of whatever produces it
///
/// Read to EOF, then call [`ByteStream::finish`]: a producer that exited
/// with an error must fail the transfer even if its output looked complete.
pub struct ByteStream {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    completion: BoxFuture<'static, Result<()>>,
}

impl ByteStream {
    pub fn new<R, F>(reader: R, completion: F) -> Self
    where
        R: AsyncRead + Send + 'static,
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            reader: Box::pin(reader),
            completion: completion.boxed(),
        }
    }

    /// In-memory stream whose producer always succeeds
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(std::io::Cursor::new(bytes.into()), async { Ok(()) })
    }

    /// Wait for the producer to finish and report its outcome
    pub async fn finish(self) -> Result<()> {
        self.completion.await
    }

    /// Copy the whole stream into `writer`, then wait for the producer
    ///
    /// The read end is closed before waiting, so a producer blocked on a full
    /// pipe sees a broken pipe and exits instead of stalling the wait.
    pub async fn copy_into<W>(self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let Self { mut reader, completion } = self;
        let copied = tokio::io::copy(&mut reader, writer).await;
        drop(reader);
        let finished = completion.await;

        match copied {
            // A failed copy broke the producer's pipe, so its own error is only an echo
            Err(e) => Err(e.into()),
            // Reading to EOF proves nothing: the producer may still have failed
            Ok(copied) => {
                finished?;
                Ok(copied)
            }
        }
    }
}

impl AsyncRead for ByteStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.reader.as_mut().poll_read(cx, buf)
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}
