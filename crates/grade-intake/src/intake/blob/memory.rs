use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt};

use super::{
    split_chunks, BlobChunks, BlobError, BlobMetadata, BlobPutMetadata, BlobResult, BlobStore,
    CHUNK_SIZE,
};
use crate::intake::domain::FileId;

/// Volatile chunked blob store.
#[derive(Debug)]
pub struct MemoryBlobStore {
    chunk_size: usize,
    blobs: Mutex<HashMap<FileId, StoredBlob>>,
}

#[derive(Debug, Clone)]
struct StoredBlob {
    metadata: BlobMetadata,
    chunks: Vec<Option<Bytes>>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard one stored chunk, leaving the rest of the payload in place.
    #[cfg(test)]
    pub(crate) fn lose_chunk(&self, id: &FileId, index: usize) -> bool {
        let mut guard = self.blobs.lock().expect("blob mutex poisoned");
        match guard.get_mut(id).and_then(|blob| blob.chunks.get_mut(index)) {
            Some(slot) => slot.take().is_some(),
            None => false,
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes, metadata: BlobPutMetadata) -> BlobResult<FileId> {
        if data.is_empty() {
            return Err(BlobError::Write(format!(
                "refusing to store empty payload '{}'",
                metadata.filename
            )));
        }

        let id = FileId::generate();
        let chunks = split_chunks(&data, self.chunk_size);
        let stored = StoredBlob {
            metadata: BlobMetadata {
                id,
                filename: metadata.filename,
                content_type: metadata.content_type,
                owner_email: metadata.owner_email,
                length: data.len() as u64,
                chunk_size: self.chunk_size,
                chunk_count: chunks.len() as u32,
                uploaded_at: Utc::now(),
            },
            chunks: chunks.into_iter().map(Some).collect(),
        };

        let mut guard = self.blobs.lock().expect("blob mutex poisoned");
        guard.insert(id, stored);
        match guard.get(&id).and_then(|blob| blob.chunks.first()) {
            Some(Some(_)) => Ok(id),
            _ => Err(BlobError::Write(format!("first chunk of {id} not observable"))),
        }
    }

    async fn open(&self, id: &FileId) -> BlobResult<BlobChunks> {
        let blob = self
            .blobs
            .lock()
            .expect("blob mutex poisoned")
            .get(id)
            .cloned()
            .ok_or(BlobError::NotFound(*id))?;

        let id = *id;
        let chunks = blob.chunks.into_iter().enumerate().map(move |(n, chunk)| {
            chunk.ok_or_else(|| BlobError::Read(format!("chunk {n} of {id} is missing")))
        });
        Ok(BlobChunks::new(
            blob.metadata.length,
            stream::iter(chunks).boxed(),
        ))
    }

    async fn metadata(&self, id: &FileId) -> BlobResult<BlobMetadata> {
        self.blobs
            .lock()
            .expect("blob mutex poisoned")
            .get(id)
            .map(|blob| blob.metadata.clone())
            .ok_or(BlobError::NotFound(*id))
    }
}
