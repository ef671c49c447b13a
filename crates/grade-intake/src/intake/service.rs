use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::blob::{BlobError, BlobMetadata, BlobPutMetadata, BlobStore};
use super::domain::{
    AuthorRole, Comment, FileId, FileRef, FileReviewStatus, GradeConfig, RoomKey, Submission,
    SubmissionId, SubmissionStatus,
};
use super::encoding::{Attachment, EncodingError, SubmissionBundle};
use super::notify::{DeliveryReport, Notification, Notifier};
use super::repository::{
    GradeConfigRepository, RepositoryError, SubmissionField, SubmissionFields,
    SubmissionRepository,
};
use super::rooms::RoomDirectory;
use super::validation::{
    check_against_config, check_grade_config, normalize_email, SubmissionRequest,
    ValidatedSubmission, ValidationError,
};

/// Tunables for the intake workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeOptions {
    /// Upper bound for each individual blob store call.
    pub blob_timeout: Duration,
}

impl Default for IntakeOptions {
    fn default() -> Self {
        Self {
            blob_timeout: Duration::from_secs(10),
        }
    }
}

/// Service composing the record repository, blob store, and notification transport.
pub struct IntakeService<R, B, N> {
    repository: Arc<R>,
    blobs: Arc<B>,
    notifier: Arc<N>,
    rooms: RoomDirectory<R>,
    options: IntakeOptions,
}

/// Result of a stored and verified submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub submission_id: SubmissionId,
    pub grade: u32,
    pub email: String,
    pub name: String,
    pub room: RoomKey,
    pub file_ids: Vec<FileId>,
    pub notification: DeliveryReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub submission: Submission,
    pub notification: DeliveryReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentReceipt {
    pub comment: Comment,
    pub notification: DeliveryReport,
}

/// A submission with every attached document resolved (or marked as unreadable).
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionWithDocuments {
    #[serde(flatten)]
    pub submission: Submission,
    pub files_data: Vec<AttachedDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttachedDocument {
    Retrieved {
        file_id: FileId,
        display_name: String,
        filename: String,
        content_type: String,
        base64: String,
    },
    Failed {
        file_id: FileId,
        error: String,
    },
}

impl AttachedDocument {
    pub fn file_id(&self) -> FileId {
        match self {
            AttachedDocument::Retrieved { file_id, .. }
            | AttachedDocument::Failed { file_id, .. } => *file_id,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AttachedDocument::Failed { .. })
    }
}

impl<R, B, N> IntakeService<R, B, N>
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        repository: Arc<R>,
        blobs: Arc<B>,
        notifier: Arc<N>,
        options: IntakeOptions,
    ) -> Self {
        let rooms = RoomDirectory::new(Arc::clone(&repository));
        Self {
            repository,
            blobs,
            notifier,
            rooms,
            options,
        }
    }

    pub fn rooms(&self) -> &RoomDirectory<R> {
        &self.rooms
    }

    /// Store the documents, persist the record, read it back, then notify the student.
    ///
    /// No record is written unless every document was stored. Documents stored before a
    /// failing upload are left behind.
    pub async fn submit(&self, request: SubmissionRequest) -> Result<SubmitReceipt, IntakeError> {
        let submission = request.validate()?;
        if let Some(config) = self.repository.grade_config(submission.grade).await? {
            check_against_config(&submission, &config)?;
        }

        let files = self.store_documents(&submission).await?;
        let file_ids: Vec<FileId> = files.iter().map(|file| file.id).collect();

        self.repository
            .upsert_by_grade_and_email(
                submission.grade,
                &submission.email,
                SubmissionFields {
                    student_name: submission.name.clone(),
                    room: submission.room,
                    files,
                    status: SubmissionStatus::Pending,
                },
            )
            .await?;

        let stored = self
            .repository
            .get_by_grade_and_email(submission.grade, &submission.email)
            .await?;
        let stored = verify_round_trip(&submission, stored.as_ref(), file_ids.len())
            .inspect_err(|err| error!(error = %err, "submission read back did not match"))?;

        info!(
            submission_id = %stored.id,
            grade = submission.grade,
            room = %submission.room,
            files = file_ids.len(),
            "submission stored"
        );

        let notification = self
            .notify(Notification::submission_received(
                &submission.email,
                &submission.name,
                &submission.room,
            ))
            .await;

        Ok(SubmitReceipt {
            submission_id: stored.id,
            grade: submission.grade,
            email: submission.email,
            name: submission.name,
            room: submission.room,
            file_ids,
            notification,
        })
    }

    async fn store_documents(
        &self,
        submission: &ValidatedSubmission,
    ) -> Result<Vec<FileRef>, IntakeError> {
        let mut files = Vec::with_capacity(submission.documents.len());
        for (index, document) in submission.documents.iter().enumerate() {
            let metadata = BlobPutMetadata {
                filename: document.original_filename.clone(),
                content_type: document.content_type.clone(),
                owner_email: submission.email.clone(),
            };

            let id = self
                .put_blob(document.bytes.clone(), metadata)
                .await
                .map_err(|source| {
                    error!(
                        filename = %document.original_filename,
                        error = %source,
                        stored_before_failure = files.len(),
                        "document upload failed"
                    );
                    IntakeError::StorageWrite {
                        filename: document.original_filename.clone(),
                        source,
                    }
                })?;

            debug!(file_id = %id, filename = %document.original_filename, "document stored");
            files.push(FileRef {
                id,
                display_name: submission.display_name(index),
                review_status: FileReviewStatus::Pending,
            });
        }
        Ok(files)
    }

    pub async fn get(&self, id: &SubmissionId) -> Result<Submission, IntakeError> {
        self.repository
            .get_by_id(id)
            .await?
            .ok_or(IntakeError::NotFound(MissingRecord::Submission(*id)))
    }

    /// Persist a status transition, then tell the student. Delivery failures do not undo it.
    pub async fn set_status(
        &self,
        id: &SubmissionId,
        status: SubmissionStatus,
    ) -> Result<StatusChange, IntakeError> {
        let mut submission = self.get(id).await?;
        self.repository
            .set_field(id, SubmissionField::Status(status))
            .await?;
        submission.status = status;

        info!(submission_id = %id, status = status.label(), "submission status updated");
        let notification = self
            .notify(Notification::status_changed(&submission))
            .await;

        Ok(StatusChange {
            submission,
            notification,
        })
    }

    pub async fn set_file_review_status(
        &self,
        id: &SubmissionId,
        file_id: &FileId,
        status: FileReviewStatus,
    ) -> Result<Submission, IntakeError> {
        self.repository
            .set_file_review_status(id, file_id, status)
            .await?;
        self.get(id).await
    }

    /// Append an admin comment. The text is stored exactly as given; blank text is rejected.
    pub async fn comment(
        &self,
        id: &SubmissionId,
        text: &str,
    ) -> Result<CommentReceipt, IntakeError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyComment.into());
        }

        let submission = self.get(id).await?;
        let comment = Comment::new(text, AuthorRole::Admin);
        self.repository.append_comment(id, comment.clone()).await?;

        let notification = self
            .notify(Notification::comment_added(&submission, text))
            .await;
        Ok(CommentReceipt {
            comment,
            notification,
        })
    }

    pub async fn comments(&self, id: &SubmissionId) -> Result<Vec<Comment>, IntakeError> {
        Ok(self.get(id).await?.comments)
    }

    /// Every submission with its documents inlined as base64.
    ///
    /// A document that cannot be read is reported in place; the listing itself still
    /// succeeds and is only returned once every document was attempted.
    pub async fn list_with_attached_documents(
        &self,
    ) -> Result<Vec<SubmissionWithDocuments>, IntakeError> {
        let submissions = self.repository.list_all().await?;
        let mut listing = Vec::with_capacity(submissions.len());

        for submission in submissions {
            let mut files_data = Vec::with_capacity(submission.files.len());
            for file in &submission.files {
                let document = match self.fetch_document(&file.id).await {
                    Ok((metadata, bytes)) => AttachedDocument::Retrieved {
                        file_id: file.id,
                        display_name: file.display_name.clone(),
                        filename: metadata.filename,
                        content_type: metadata.content_type,
                        base64: BASE64.encode(bytes),
                    },
                    Err(err) => {
                        warn!(
                            submission_id = %submission.id,
                            file_id = %file.id,
                            error = %err,
                            "failed to retrieve document"
                        );
                        AttachedDocument::Failed {
                            file_id: file.id,
                            error: "Failed to retrieve file from storage".to_string(),
                        }
                    }
                };
                files_data.push(document);
            }
            listing.push(SubmissionWithDocuments {
                submission,
                files_data,
            });
        }

        Ok(listing)
    }

    /// The student's record (or `null`) and its documents, shaped for a multipart reply.
    pub async fn submission_bundle(
        &self,
        grade: u32,
        email: &str,
    ) -> Result<SubmissionBundle, IntakeError> {
        let Some(submission) = self
            .repository
            .get_by_grade_and_email(grade, &normalize_email(email))
            .await?
        else {
            return Ok(SubmissionBundle {
                metadata: json!({ "student": null }),
                attachments: Vec::new(),
            });
        };

        let mut attachments = Vec::with_capacity(submission.files.len());
        for (index, file) in submission.files.iter().enumerate() {
            let bytes = self
                .read_blob(&file.id)
                .await
                .map_err(|source| IntakeError::StorageRead {
                    file_id: file.id,
                    source,
                })?;
            attachments.push(Attachment {
                name: format!("pdf_{index}"),
                filename: format!("file_{index}.pdf"),
                bytes: Bytes::from(bytes),
                content_type: mime::APPLICATION_PDF.to_string(),
            });
        }

        Ok(SubmissionBundle {
            metadata: json!({ "student": submission }),
            attachments,
        })
    }

    pub async fn upsert_grade_config(
        &self,
        config: GradeConfig,
    ) -> Result<GradeConfig, IntakeError> {
        check_grade_config(&config)?;
        self.repository.upsert_grade_config(config.clone()).await?;
        info!(grade = config.grade, rooms = config.room_keys().len(), "grade config saved");
        Ok(config)
    }

    /// Stored configuration for `grade`, or an empty one when none was saved yet.
    pub async fn grade_config(&self, grade: u32) -> Result<GradeConfig, IntakeError> {
        Ok(self
            .repository
            .grade_config(grade)
            .await?
            .unwrap_or_else(|| GradeConfig::empty(grade)))
    }

    async fn fetch_document(&self, id: &FileId) -> Result<(BlobMetadata, Vec<u8>), BlobError> {
        let limit = self.options.blob_timeout;
        let metadata = timeout(limit, self.blobs.metadata(id))
            .await
            .unwrap_or(Err(BlobError::Timeout(limit)))?;
        let bytes = self.read_blob(id).await?;
        Ok((metadata, bytes))
    }

    async fn put_blob(&self, data: Bytes, metadata: BlobPutMetadata) -> Result<FileId, BlobError> {
        let limit = self.options.blob_timeout;
        timeout(limit, self.blobs.put(data, metadata))
            .await
            .unwrap_or(Err(BlobError::Timeout(limit)))
    }

    async fn read_blob(&self, id: &FileId) -> Result<Vec<u8>, BlobError> {
        let limit = self.options.blob_timeout;
        timeout(limit, self.blobs.get(id))
            .await
            .unwrap_or(Err(BlobError::Timeout(limit)))
    }

    async fn notify(&self, notification: Notification) -> DeliveryReport {
        let recipient = notification.recipient.clone();
        let subject = notification.subject.clone();
        let result = self.notifier.deliver(notification).await;
        if let Err(err) = &result {
            warn!(%recipient, %subject, error = %err, "notification delivery failed");
        }
        DeliveryReport::from_result(&result)
    }
}

fn verify_round_trip<'a>(
    submission: &ValidatedSubmission,
    stored: Option<&'a Submission>,
    uploaded: usize,
) -> Result<&'a Submission, VerificationError> {
    let mismatch = |detail: String| VerificationError {
        grade: submission.grade,
        email: submission.email.clone(),
        detail,
    };

    let stored = stored.ok_or_else(|| mismatch("record missing on read back".to_string()))?;
    if stored.room != submission.room {
        return Err(mismatch(format!(
            "stored room {} differs from submitted room {}",
            stored.room, submission.room
        )));
    }
    if stored.files.len() != uploaded {
        return Err(mismatch(format!(
            "stored {} files, uploaded {uploaded}",
            stored.files.len()
        )));
    }
    Ok(stored)
}

/// Post-write read back disagreed with what was written. The write itself happened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("submission for {email} in grade {grade} was stored but could not be confirmed: {detail}")]
pub struct VerificationError {
    pub grade: u32,
    pub email: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingRecord {
    Submission(SubmissionId),
    File {
        submission_id: SubmissionId,
        file_id: FileId,
    },
}

impl fmt::Display for MissingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingRecord::Submission(id) => write!(f, "submission {id} not found"),
            MissingRecord::File {
                submission_id,
                file_id,
            } => write!(f, "file {file_id} not found on submission {submission_id}"),
        }
    }
}

/// Coarse classification used by adapters to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeErrorKind {
    Validation,
    StorageWrite,
    StorageRead,
    NotFound,
    Verification,
    Encoding,
    Unavailable,
}

/// Error raised by the intake service.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to store document '{filename}': {source}")]
    StorageWrite {
        filename: String,
        #[source]
        source: BlobError,
    },
    #[error("failed to read document {file_id}: {source}")]
    StorageRead {
        file_id: FileId,
        #[source]
        source: BlobError,
    },
    #[error("{0}")]
    NotFound(MissingRecord),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl IntakeError {
    pub fn kind(&self) -> IntakeErrorKind {
        match self {
            IntakeError::Validation(_) => IntakeErrorKind::Validation,
            IntakeError::StorageWrite { .. } => IntakeErrorKind::StorageWrite,
            IntakeError::StorageRead { .. } => IntakeErrorKind::StorageRead,
            IntakeError::NotFound(_) => IntakeErrorKind::NotFound,
            IntakeError::Verification(_) => IntakeErrorKind::Verification,
            IntakeError::Encoding(_) => IntakeErrorKind::Encoding,
            IntakeError::Repository(_) => IntakeErrorKind::Unavailable,
        }
    }
}

impl From<RepositoryError> for IntakeError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::SubmissionNotFound(id) => {
                IntakeError::NotFound(MissingRecord::Submission(id))
            }
            RepositoryError::FileNotFound {
                submission_id,
                file_id,
            } => IntakeError::NotFound(MissingRecord::File {
                submission_id,
                file_id,
            }),
            other => IntakeError::Repository(other),
        }
    }
}
