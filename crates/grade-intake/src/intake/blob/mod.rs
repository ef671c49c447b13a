//! Binary document storage keyed by generated file ids.
//!
//! Payloads are split into fixed-size chunks on write and streamed back chunk by chunk.
//! A read either yields every byte that was written or fails; a stream that ends early
//! is reported as a read error rather than a short payload.

mod local;
mod memory;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use super::domain::FileId;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;

/// Chunk size used by the bundled backends.
pub const CHUNK_SIZE: usize = 255 * 1024;

const MAX_PREALLOCATION: usize = CHUNK_SIZE * 4;

/// Caller supplied description of a payload being stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobPutMetadata {
    pub filename: String,
    pub content_type: String,
    pub owner_email: String,
}

/// Stored description of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub id: FileId,
    pub filename: String,
    pub content_type: String,
    pub owner_email: String,
    pub length: u64,
    pub chunk_size: usize,
    pub chunk_count: u32,
    pub uploaded_at: DateTime<Utc>,
}

pub type BlobResult<T> = Result<T, BlobError>;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob {0} not found")]
    NotFound(FileId),
    #[error("blob write failed: {0}")]
    Write(String),
    #[error("blob read failed: {0}")]
    Read(String),
    #[error("blob operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Ordered stream of the chunks making up one stored payload.
pub struct BlobChunks {
    expected_length: u64,
    chunks: BoxStream<'static, BlobResult<Bytes>>,
}

impl BlobChunks {
    pub fn new(expected_length: u64, chunks: BoxStream<'static, BlobResult<Bytes>>) -> Self {
        Self {
            expected_length,
            chunks,
        }
    }

    pub fn expected_length(&self) -> u64 {
        self.expected_length
    }

    pub async fn next_chunk(&mut self) -> Option<BlobResult<Bytes>> {
        self.chunks.next().await
    }

    /// Drain the stream into a single buffer, failing on any chunk error or short read.
    pub async fn collect_bytes(mut self) -> BlobResult<Vec<u8>> {
        // The length comes from stored metadata, so the up-front reservation is bounded.
        let reserve = self.expected_length.min(MAX_PREALLOCATION as u64) as usize;
        let mut buffer = Vec::with_capacity(reserve);
        while let Some(chunk) = self.next_chunk().await {
            buffer.extend_from_slice(&chunk?);
        }

        if buffer.len() as u64 != self.expected_length {
            return Err(BlobError::Read(format!(
                "stream ended after {} of {} bytes",
                buffer.len(),
                self.expected_length
            )));
        }
        Ok(buffer)
    }
}

impl fmt::Debug for BlobChunks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobChunks")
            .field("expected_length", &self.expected_length)
            .finish_non_exhaustive()
    }
}

/// Storage medium for uploaded documents.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under a freshly allocated id. Only returns once the payload is observable.
    async fn put(&self, data: Bytes, metadata: BlobPutMetadata) -> BlobResult<FileId>;

    async fn open(&self, id: &FileId) -> BlobResult<BlobChunks>;

    async fn metadata(&self, id: &FileId) -> BlobResult<BlobMetadata>;

    async fn get(&self, id: &FileId) -> BlobResult<Vec<u8>> {
        self.open(id).await?.collect_bytes().await
    }
}

pub(crate) fn split_chunks(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(data.len().div_ceil(chunk_size));
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        chunks.push(data.slice(offset..end));
        offset = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn split_chunks_preserves_order_and_remainder() {
        let data = Bytes::from_static(b"abcdefghij");
        let chunks = split_chunks(&data, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(&chunks[0][..], b"abcd");
        assert_eq!(&chunks[2][..], b"ij");
    }

    #[tokio::test]
    async fn collect_reports_truncated_streams() {
        let chunks = stream::iter(vec![Ok(Bytes::from_static(b"abc"))]).boxed();
        let result = BlobChunks::new(6, chunks).collect_bytes().await;
        assert!(matches!(result, Err(BlobError::Read(_))));
    }

    #[tokio::test]
    async fn collect_surfaces_mid_stream_errors() {
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(BlobError::Read("chunk 1 missing".to_string())),
            Ok(Bytes::from_static(b"ghi")),
        ])
        .boxed();
        let result = BlobChunks::new(9, chunks).collect_bytes().await;
        match result {
            Err(BlobError::Read(message)) => assert!(message.contains("chunk 1")),
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn implausible_declared_length_is_a_read_error() {
        let chunks = stream::iter(vec![Ok(Bytes::from_static(b"%PDF"))]).boxed();
        let result = BlobChunks::new(u64::MAX, chunks).collect_bytes().await;
        assert!(matches!(result, Err(BlobError::Read(_))));
    }
}
