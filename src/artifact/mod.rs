//! Per-request scratch files
//!
//! A `TempArtifact` owns exactly one file in the scratch directory. The
//! encoder writes into it through an `ArtifactSink`; after a successful run
//! it is rewound and stat'd for delivery, then streamed out by `ArtifactBody`.
//! Whatever happens, the file is closed and unlinked once, at the latest when
//! the artifact is dropped.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::metrics::Metrics;

/// File name prefix of every artifact, used by [`sweep_stale`].
pub const ARTIFACT_PREFIX: &str = "transcode-";

/// Scratch file owned by a single request
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    file: Option<File>,
    released: bool,
}

/// Write side of an artifact handed to the encoder
#[derive(Debug)]
pub struct ArtifactSink {
    file: File,
}

impl TempArtifact {
    /// Create a new uniquely named scratch file in `dir`.
    ///
    /// Fails if the directory does not exist; never reuses an existing name.
    pub fn acquire(dir: &Path) -> io::Result<(Self, ArtifactSink)> {
        let path = dir.join(format!("{}{}", ARTIFACT_PREFIX, Uuid::new_v4()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        let sink = ArtifactSink {
            file: file.try_clone()?,
        };

        tracing::debug!(path = %path.display(), "artifact acquired");

        Ok((
            Self {
                path,
                file: Some(file),
                released: false,
            },
            sink,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewind the finished artifact and report its size.
    ///
    /// Hands the read handle over to the caller; the artifact keeps
    /// ownership of the path and still unlinks it on release.
    pub fn finalize(&mut self) -> io::Result<(File, u64)> {
        let mut file = self.file.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "artifact already finalized")
        })?;
        file.flush()?;
        file.seek(SeekFrom::Start(0))?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    /// Close and unlink the file. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Close our handle before unlinking.
        drop(self.file.take());

        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "artifact released"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "artifact unlink failed")
            }
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        self.release();
    }
}

impl Write for ArtifactSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for ArtifactSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Response body streaming a finalized artifact.
///
/// Field order matters: the reader is dropped (and its handle closed) before
/// the artifact unlinks the file. Bytes are counted as delivered only once
/// the last chunk has been handed out.
pub struct ArtifactBody {
    reader: ReaderStream<tokio::fs::File>,
    artifact: TempArtifact,
    metrics: Arc<Metrics>,
    sent: u64,
}

impl ArtifactBody {
    pub fn new(file: File, artifact: TempArtifact, metrics: Arc<Metrics>) -> Self {
        Self {
            reader: ReaderStream::new(tokio::fs::File::from_std(file)),
            artifact,
            metrics,
            sent: 0,
        }
    }
}

impl Stream for ArtifactBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.reader).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                if !this.artifact.released {
                    this.metrics.record_delivered(this.sent);
                }
                this.artifact.release();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Remove artifacts left behind by a previous process.
///
/// Returns the number of files removed. Failures on individual files are
/// logged and skipped.
pub fn sweep_stale(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let is_artifact = name
            .to_str()
            .map(|n| n.starts_with(ARTIFACT_PREFIX))
            .unwrap_or(false);
        if !is_artifact || !entry.file_type()?.is_file() {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(
                path = %entry.path().display(),
                error = %e,
                "failed to remove stale artifact"
            ),
        }
    }
    if removed > 0 {
        tracing::info!(removed, dir = %dir.display(), "removed stale artifacts");
    }
    Ok(removed)
}

/// Number of artifacts currently present in `dir`
pub fn count_artifacts(dir: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        if name
            .to_str()
            .map(|n| n.starts_with(ARTIFACT_PREFIX))
            .unwrap_or(false)
        {
            count += 1;
        }
    }
    Ok(count)
}
