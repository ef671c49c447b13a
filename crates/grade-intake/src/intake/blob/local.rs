use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{
    split_chunks, BlobChunks, BlobError, BlobMetadata, BlobPutMetadata, BlobResult, BlobStore,
    CHUNK_SIZE,
};
use crate::intake::domain::FileId;

const METADATA_FILE: &str = "meta.json";

/// Filesystem blob store laid out as `<root>/<id>/meta.json` plus numbered chunk files.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    chunk_size: usize,
}

impl LocalBlobStore {
    pub async fn new(root: impl AsRef<Path>) -> BlobResult<Self> {
        Self::with_chunk_size(root, CHUNK_SIZE).await
    }

    pub async fn with_chunk_size(root: impl AsRef<Path>, chunk_size: usize) -> BlobResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|err| {
            BlobError::Write(format!("failed to create blob root {}: {err}", root.display()))
        })?;

        info!(root = %root.display(), "local blob store ready");
        Ok(Self {
            root,
            chunk_size: chunk_size.max(1),
        })
    }

    fn blob_dir(&self, id: &FileId) -> PathBuf {
        self.root.join(id.to_string())
    }

    async fn write_file(path: &Path, contents: &[u8]) -> BlobResult<()> {
        let write_error =
            |err: std::io::Error| BlobError::Write(format!("{}: {err}", path.display()));

        let mut file = fs::File::create(path).await.map_err(write_error)?;
        file.write_all(contents).await.map_err(write_error)?;
        file.sync_all().await.map_err(write_error)
    }

    async fn load_metadata(&self, id: &FileId) -> BlobResult<BlobMetadata> {
        let path = self.blob_dir(id).join(METADATA_FILE);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(BlobError::NotFound(*id)),
            Err(err) => return Err(BlobError::Read(format!("{}: {err}", path.display()))),
        };

        serde_json::from_slice(&raw)
            .map_err(|err| BlobError::Read(format!("corrupt metadata for {id}: {err}")))
    }
}

fn chunk_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("{index}.chunk"))
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, data: Bytes, metadata: BlobPutMetadata) -> BlobResult<FileId> {
        if data.is_empty() {
            return Err(BlobError::Write(format!(
                "refusing to store empty payload '{}'",
                metadata.filename
            )));
        }

        let id = FileId::generate();
        let dir = self.blob_dir(&id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| BlobError::Write(format!("{}: {err}", dir.display())))?;

        let chunks = split_chunks(&data, self.chunk_size);
        for (index, chunk) in chunks.iter().enumerate() {
            Self::write_file(&chunk_path(&dir, index as u32), chunk).await?;
        }

        let stored = BlobMetadata {
            id,
            filename: metadata.filename,
            content_type: metadata.content_type,
            owner_email: metadata.owner_email,
            length: data.len() as u64,
            chunk_size: self.chunk_size,
            chunk_count: chunks.len() as u32,
            uploaded_at: Utc::now(),
        };
        let encoded = serde_json::to_vec_pretty(&stored)
            .map_err(|err| BlobError::Write(format!("failed to encode metadata: {err}")))?;
        Self::write_file(&dir.join(METADATA_FILE), &encoded).await?;

        // The upload only counts once the first chunk can be observed independently.
        let first = fs::metadata(chunk_path(&dir, 0))
            .await
            .map_err(|err| BlobError::Write(format!("upload of {id} left no chunks: {err}")))?;
        if first.len() != chunks[0].len() as u64 {
            return Err(BlobError::Write(format!(
                "first chunk of {id} has {} bytes, expected {}",
                first.len(),
                chunks[0].len()
            )));
        }

        debug!(file_id = %id, bytes = data.len(), chunks = chunks.len(), "blob stored");
        Ok(id)
    }

    async fn open(&self, id: &FileId) -> BlobResult<BlobChunks> {
        let metadata = self.load_metadata(id).await?;
        let dir = self.blob_dir(id);
        let id = *id;

        let chunks = stream::iter(0..metadata.chunk_count).then(move |index| {
            let path = chunk_path(&dir, index);
            async move {
                fs::read(&path)
                    .await
                    .map(Bytes::from)
                    .map_err(|err| BlobError::Read(format!("chunk {index} of {id}: {err}")))
            }
        });

        Ok(BlobChunks::new(metadata.length, chunks.boxed()))
    }

    async fn metadata(&self, id: &FileId) -> BlobResult<BlobMetadata> {
        self.load_metadata(id).await
    }
}
