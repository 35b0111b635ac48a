//! src/services/staging_service.rs
//!
//! Staging: holds uploaded assets between receipt and the media-host upload.
//! In `memory` mode bodies are buffered; in `disk` mode they are streamed to
//! `staging_dir/.tmp-{uuid}`, fsynced and renamed to `staging_dir/{uuid}-{name}`.
//! Size and MD5 are computed while the body streams in.

use crate::{config::StorageMode, sanitize::sanitize_file_name};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use reqwest::multipart::Part;
use std::{
    io::{self, Cursor, Read, Seek},
    path::PathBuf,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("failed to read request body: {0}")]
    Body(io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StagingResult<T> = Result<T, StagingError>;

/// Blanket trait for the synchronous readers handed to archive inspection.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// A file in the staging directory that is removed when dropped unless disarmed.
#[derive(Debug)]
struct StagedFile {
    path: PathBuf,
    armed: bool,
}

impl StagedFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn disarm(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed abandoned staging file {}", self.path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => debug!(
                "failed to remove staging file {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

#[derive(Debug)]
enum StagedBody {
    Memory(Bytes),
    Disk(StagedFile),
}

/// An uploaded blob waiting to be forwarded.
#[derive(Debug)]
pub struct StagedAsset {
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: u64,
    pub md5: String,
    body: StagedBody,
}

impl StagedAsset {
    /// Up to `n` leading bytes, for signature checks.
    pub async fn head(&self, n: usize) -> io::Result<Vec<u8>> {
        match &self.body {
            StagedBody::Memory(bytes) => Ok(bytes[..n.min(bytes.len())].to_vec()),
            StagedBody::Disk(staged) => {
                let file = File::open(staged.path()).await?;
                let mut buf = Vec::with_capacity(n);
                file.take(n as u64).read_to_end(&mut buf).await?;
                Ok(buf)
            }
        }
    }

    /// Synchronous reader over the whole asset. Call from a blocking context.
    pub fn open_reader(&self) -> io::Result<Box<dyn ReadSeek>> {
        match &self.body {
            StagedBody::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            StagedBody::Disk(staged) => Ok(Box::new(std::fs::File::open(staged.path())?)),
        }
    }

    /// Build a multipart part for the media host. Disk assets are streamed, not buffered.
    pub async fn to_part(&self) -> io::Result<Part> {
        let part = match &self.body {
            StagedBody::Memory(bytes) => {
                Part::stream_with_length(reqwest::Body::from(bytes.clone()), self.size_bytes)
            }
            StagedBody::Disk(staged) => {
                let file = File::open(staged.path()).await?;
                let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
                Part::stream_with_length(body, self.size_bytes)
            }
        }
        .file_name(self.file_name.clone());

        let mime = self
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        match part.mime_str(mime) {
            Ok(part) => Ok(part),
            Err(_) => {
                debug!("ignoring unparsable content type {:?}", mime);
                self.plain_part().await
            }
        }
    }

    async fn plain_part(&self) -> io::Result<Part> {
        let body = match &self.body {
            StagedBody::Memory(bytes) => reqwest::Body::from(bytes.clone()),
            StagedBody::Disk(staged) => {
                reqwest::Body::wrap_stream(ReaderStream::new(File::open(staged.path()).await?))
            }
        };
        Ok(Part::stream_with_length(body, self.size_bytes).file_name(self.file_name.clone()))
    }

    /// Drop the staged payload. Removes the staging file in disk mode.
    ///
    /// Dropping the asset also removes the file, but blocks the runtime thread to do it.
    pub async fn discard(self) {
        if let StagedBody::Disk(staged) = self.body {
            let path = staged.disarm();
            match fs::remove_file(&path).await {
                Ok(_) => debug!("removed staged file {}", path.display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => debug!("failed to remove staged file {}: {}", path.display(), err),
            }
        }
    }

    #[cfg(test)]
    pub fn staged_path(&self) -> Option<&std::path::Path> {
        match &self.body {
            StagedBody::Disk(staged) => Some(staged.path()),
            StagedBody::Memory(_) => None,
        }
    }
}

/// Staging area shared by all requests.
#[derive(Clone, Debug)]
pub struct Staging {
    pub mode: StorageMode,
    pub dir: PathBuf,
}

impl Staging {
    pub fn new(mode: StorageMode, dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            dir: dir.into(),
        }
    }

    /// Create the staging directory when disk mode is active.
    pub async fn ensure_ready(&self) -> io::Result<()> {
        if self.mode == StorageMode::Disk {
            fs::create_dir_all(&self.dir).await?;
        }
        Ok(())
    }

    /// Best-effort write/read/delete round trip in the staging directory.
    pub async fn probe(&self) -> Result<(), String> {
        if self.mode == StorageMode::Memory {
            return Ok(());
        }
        let tmp_path = self.dir.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz")
            .await
            .map_err(|e| format!("could not write tmp file: {}", e))?;
        let read = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        match read {
            Ok(bytes) if bytes == b"readyz" => Ok(()),
            Ok(_) => Err("file content mismatch".into()),
            Err(e) => Err(format!("could not read tmp file: {}", e)),
        }
    }

    /// Consume a body stream into a staged asset, enforcing `limit` bytes.
    pub async fn stage_stream<S>(
        &self,
        file_name: &str,
        content_type: Option<String>,
        stream: S,
        limit: u64,
    ) -> StagingResult<StagedAsset>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let file_name = sanitize_file_name(file_name);
        match self.mode {
            StorageMode::Memory => {
                let mut buf = BytesMut::new();
                let mut digest = Context::new();
                pin_mut!(stream);
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(StagingError::Body)?;
                    if (buf.len() + chunk.len()) as u64 > limit {
                        return Err(StagingError::TooLarge { limit });
                    }
                    digest.consume(&chunk);
                    buf.extend_from_slice(&chunk);
                }
                Ok(StagedAsset {
                    file_name,
                    content_type,
                    size_bytes: buf.len() as u64,
                    md5: format!("{:x}", digest.compute()),
                    body: StagedBody::Memory(buf.freeze()),
                })
            }
            StorageMode::Disk => self.spool_to_disk(file_name, content_type, stream, limit).await,
        }
    }

    /// Stage an in-memory buffer (e.g. an assembled archive).
    pub async fn stage_bytes(
        &self,
        file_name: &str,
        content_type: Option<String>,
        bytes: Bytes,
        limit: u64,
    ) -> StagingResult<StagedAsset> {
        let stream = futures::stream::once(async move { Ok::<_, io::Error>(bytes) });
        self.stage_stream(file_name, content_type, stream, limit)
            .await
    }

    async fn spool_to_disk<S>(
        &self,
        file_name: String,
        content_type: Option<String>,
        stream: S,
        limit: u64,
    ) -> StagingResult<StagedAsset>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        fs::create_dir_all(&self.dir).await?;
        let id = Uuid::new_v4();
        let tmp = StagedFile::new(self.dir.join(format!(".tmp-{}", id)));
        let final_path = self.dir.join(format!("{}-{}", id, file_name));
        // The temp file goes away with `tmp` on any early return, including a dropped future.
        let mut file = File::create(tmp.path()).await?;

        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(StagingError::Body)?;
            size_bytes += chunk.len() as u64;
            if size_bytes > limit {
                return Err(StagingError::TooLarge { limit });
            }
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(tmp.path(), &final_path).await?;
        let staged = StagedFile::new(final_path);
        tmp.disarm();
        debug!(
            "staged {} bytes at {}",
            size_bytes,
            staged.path().display()
        );

        Ok(StagedAsset {
            file_name,
            content_type,
            size_bytes,
            md5: format!("{:x}", digest.compute()),
            body: StagedBody::Disk(staged),
        })
    }
}
