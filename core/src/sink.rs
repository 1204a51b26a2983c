//! Response body sinks.
//!
//! The transport writes body chunks into a sink as they arrive. On failure
//! the sink is aborted: the memory sink keeps what it received, the file
//! sink removes its partial file.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::ActionError;
use crate::http::ResponseBody;

#[async_trait]
pub trait Sink: Send {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), ActionError>;

    /// Flush and hand over what was captured.
    async fn finalize(&mut self) -> Result<ResponseBody, ActionError>;

    /// Give up after a failed exchange, returning whatever is still usable.
    async fn abort(&mut self) -> ResponseBody;
}

/// Accumulates the body in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: BytesMut,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn take(&mut self) -> Bytes {
        std::mem::take(&mut self.buffer).freeze()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), ActionError> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn finalize(&mut self) -> Result<ResponseBody, ActionError> {
        Ok(ResponseBody::Bytes(self.take()))
    }

    async fn abort(&mut self) -> ResponseBody {
        ResponseBody::Bytes(self.take())
    }
}

/// Streams the body to a file, creating parent directories first.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    /// # Errors
    /// `ActionError::Io` when the directory or the file cannot be created.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self, ActionError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ActionError::io(parent, e))?;
        }
        let file = File::create(&path)
            .await
            .map_err(|e| ActionError::io(&path, e))?;
        tracing::debug!(path = %path.display(), "streaming response body to file");
        Ok(Self {
            path,
            file: Some(file),
        })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), ActionError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ActionError::io(&self.path, closed()))?;
        file.write_all(chunk)
            .await
            .map_err(|e| ActionError::io(&self.path, e))
    }

    async fn finalize(&mut self) -> Result<ResponseBody, ActionError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| ActionError::io(&self.path, closed()))?;
        file.flush()
            .await
            .map_err(|e| ActionError::io(&self.path, e))?;
        Ok(ResponseBody::Saved(self.path.clone()))
    }

    async fn abort(&mut self) -> ResponseBody {
        drop(self.file.take());
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::warn!(path = %self.path.display(), "removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "unable to remove partial download");
            }
        }
        ResponseBody::NotCaptured
    }
}

fn closed() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "sink already closed")
}
