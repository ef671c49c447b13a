use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;

use crate::intake::blob::{BlobChunks, BlobError, BlobMetadata, BlobPutMetadata, BlobStore};
use crate::intake::domain::{
    Comment, FileId, FileReviewStatus, GradeConfig, RoomKey, Submission, SubmissionId,
};
use crate::intake::notify::{Notification, NotificationError, Notifier};
use crate::intake::repository::{
    GradeConfigRepository, RepositoryError, SubmissionField, SubmissionFields,
    SubmissionRepository,
};
use crate::intake::validation::{SubmissionRequest, UploadedDocument};
use crate::intake::{
    intake_router, IntakeOptions, IntakeService, MemoryBlobStore, SubmissionStore,
};

pub(super) type TestService = IntakeService<SubmissionStore, MemoryBlobStore, RecordingNotifier>;

pub(super) struct Harness {
    pub(super) service: Arc<TestService>,
    pub(super) store: Arc<SubmissionStore>,
    pub(super) blobs: Arc<MemoryBlobStore>,
    pub(super) notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub(super) fn router(&self) -> axum::Router {
        intake_router(Arc::clone(&self.service))
    }

    pub(super) async fn submission_id(&self, grade: u32, email: &str) -> SubmissionId {
        self.store
            .get_by_grade_and_email(grade, email)
            .await
            .expect("store readable")
            .expect("submission exists")
            .id
    }
}

pub(super) fn options() -> IntakeOptions {
    IntakeOptions {
        blob_timeout: Duration::from_secs(2),
    }
}

pub(super) fn harness() -> Harness {
    let store = Arc::new(SubmissionStore::in_memory());
    let blobs = Arc::new(MemoryBlobStore::with_chunk_size(4));
    let notifier = Arc::new(RecordingNotifier::default());
    let service = Arc::new(IntakeService::new(
        Arc::clone(&store),
        Arc::clone(&blobs),
        Arc::clone(&notifier),
        options(),
    ));
    Harness {
        service,
        store,
        blobs,
        notifier,
    }
}

pub(super) fn pdf(name: &str, contents: &'static [u8]) -> UploadedDocument {
    UploadedDocument {
        bytes: Bytes::from_static(contents),
        original_filename: name.to_string(),
        content_type: "application/pdf".to_string(),
    }
}

pub(super) fn request(
    grade: &str,
    email: &str,
    name: &str,
    room: &str,
    documents: Vec<UploadedDocument>,
) -> SubmissionRequest {
    SubmissionRequest {
        grade: Some(grade.to_string()),
        email: Some(email.to_string()),
        name: Some(name.to_string()),
        room: Some(room.to_string()),
        documents,
        document_types: Vec::new(),
    }
}

pub(super) fn ann_request() -> SubmissionRequest {
    request(
        "6",
        "a@x.com",
        "Ann",
        "1M2",
        vec![
            pdf("consent.pdf", b"%PDF-1.4 consent form"),
            pdf("medical.pdf", b"%PDF-1.4 medical form"),
        ],
    )
}

pub(super) fn grade_config(
    grade: u32,
    buses: &[u16],
    male: &[u16],
    female: &[u16],
) -> GradeConfig {
    GradeConfig {
        grade,
        buses: buses.iter().copied().collect(),
        male_room_numbers: male.iter().copied().collect(),
        female_room_numbers: female.iter().copied().collect::<BTreeSet<_>>(),
        expected_document_types: Vec::new(),
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }
}

/// Notifier whose transport is down for every delivery.
pub(super) struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn deliver(&self, _notification: Notification) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp relay refused connection".to_string()))
    }
}

/// Blob store that accepts a fixed number of writes, then fails every later one.
pub(super) struct FlakyBlobStore {
    inner: MemoryBlobStore,
    remaining_puts: AtomicUsize,
}

impl FlakyBlobStore {
    pub(super) fn failing_after(successful_puts: usize) -> Self {
        Self {
            inner: MemoryBlobStore::with_chunk_size(4),
            remaining_puts: AtomicUsize::new(successful_puts),
        }
    }

    pub(super) fn stored(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, data: Bytes, metadata: BlobPutMetadata) -> Result<FileId, BlobError> {
        let allowed = self
            .remaining_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(BlobError::Write("disk quota exceeded".to_string()));
        }
        self.inner.put(data, metadata).await
    }

    async fn open(&self, id: &FileId) -> Result<BlobChunks, BlobError> {
        self.inner.open(id).await
    }

    async fn metadata(&self, id: &FileId) -> Result<BlobMetadata, BlobError> {
        self.inner.metadata(id).await
    }
}

/// Blob store whose writes never complete.
pub(super) struct StalledBlobStore;

#[async_trait]
impl BlobStore for StalledBlobStore {
    async fn put(&self, _data: Bytes, _metadata: BlobPutMetadata) -> Result<FileId, BlobError> {
        futures::future::pending().await
    }

    async fn open(&self, id: &FileId) -> Result<BlobChunks, BlobError> {
        Err(BlobError::NotFound(*id))
    }

    async fn metadata(&self, id: &FileId) -> Result<BlobMetadata, BlobError> {
        Err(BlobError::NotFound(*id))
    }
}

/// Repository whose backing database is offline.
pub(super) struct UnavailableRepository;

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("database offline".to_string()))
}

#[async_trait]
impl SubmissionRepository for UnavailableRepository {
    async fn upsert_by_grade_and_email(
        &self,
        _grade: u32,
        _email: &str,
        _fields: SubmissionFields,
    ) -> Result<(), RepositoryError> {
        offline()
    }

    async fn get_by_grade_and_email(
        &self,
        _grade: u32,
        _email: &str,
    ) -> Result<Option<Submission>, RepositoryError> {
        offline()
    }

    async fn get_by_id(&self, _id: &SubmissionId) -> Result<Option<Submission>, RepositoryError> {
        offline()
    }

    async fn list_all(&self) -> Result<Vec<Submission>, RepositoryError> {
        offline()
    }

    async fn set_field(
        &self,
        _id: &SubmissionId,
        _field: SubmissionField,
    ) -> Result<(), RepositoryError> {
        offline()
    }

    async fn append_comment(
        &self,
        _id: &SubmissionId,
        _comment: Comment,
    ) -> Result<(), RepositoryError> {
        offline()
    }

    async fn set_file_review_status(
        &self,
        _id: &SubmissionId,
        _file_id: &FileId,
        _status: FileReviewStatus,
    ) -> Result<(), RepositoryError> {
        offline()
    }
}

#[async_trait]
impl GradeConfigRepository for UnavailableRepository {
    async fn upsert_grade_config(&self, _config: GradeConfig) -> Result<(), RepositoryError> {
        offline()
    }

    async fn grade_config(&self, _grade: u32) -> Result<Option<GradeConfig>, RepositoryError> {
        offline()
    }

    async fn grade_configs(&self) -> Result<Vec<GradeConfig>, RepositoryError> {
        offline()
    }
}

/// How a [`DriftingRepository`] distorts the record returned by identity lookups.
#[derive(Debug, Clone, Copy)]
pub(super) enum ReadBackDrift {
    Missing,
    Room(RoomKey),
    DropLastFile,
}

/// Repository that stores writes faithfully but reports a different record on read back.
pub(super) struct DriftingRepository {
    pub(super) inner: SubmissionStore,
    pub(super) drift: ReadBackDrift,
}

impl DriftingRepository {
    pub(super) fn new(drift: ReadBackDrift) -> Self {
        Self {
            inner: SubmissionStore::in_memory(),
            drift,
        }
    }
}

#[async_trait]
impl SubmissionRepository for DriftingRepository {
    async fn upsert_by_grade_and_email(
        &self,
        grade: u32,
        email: &str,
        fields: SubmissionFields,
    ) -> Result<(), RepositoryError> {
        self.inner
            .upsert_by_grade_and_email(grade, email, fields)
            .await
    }

    async fn get_by_grade_and_email(
        &self,
        grade: u32,
        email: &str,
    ) -> Result<Option<Submission>, RepositoryError> {
        let stored = self.inner.get_by_grade_and_email(grade, email).await?;
        Ok(match self.drift {
            ReadBackDrift::Missing => None,
            ReadBackDrift::Room(room) => stored.map(|mut submission| {
                submission.room = room;
                submission
            }),
            ReadBackDrift::DropLastFile => stored.map(|mut submission| {
                submission.files.pop();
                submission
            }),
        })
    }

    async fn get_by_id(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError> {
        self.inner.get_by_id(id).await
    }

    async fn list_all(&self) -> Result<Vec<Submission>, RepositoryError> {
        self.inner.list_all().await
    }

    async fn set_field(
        &self,
        id: &SubmissionId,
        field: SubmissionField,
    ) -> Result<(), RepositoryError> {
        self.inner.set_field(id, field).await
    }

    async fn append_comment(
        &self,
        id: &SubmissionId,
        comment: Comment,
    ) -> Result<(), RepositoryError> {
        self.inner.append_comment(id, comment).await
    }

    async fn set_file_review_status(
        &self,
        id: &SubmissionId,
        file_id: &FileId,
        status: FileReviewStatus,
    ) -> Result<(), RepositoryError> {
        self.inner.set_file_review_status(id, file_id, status).await
    }
}

#[async_trait]
impl GradeConfigRepository for DriftingRepository {
    async fn upsert_grade_config(&self, config: GradeConfig) -> Result<(), RepositoryError> {
        self.inner.upsert_grade_config(config).await
    }

    async fn grade_config(&self, grade: u32) -> Result<Option<GradeConfig>, RepositoryError> {
        self.inner.grade_config(grade).await
    }

    async fn grade_configs(&self) -> Result<Vec<GradeConfig>, RepositoryError> {
        self.inner.grade_configs().await
    }
}
