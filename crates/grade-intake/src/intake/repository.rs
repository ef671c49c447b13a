use async_trait::async_trait;

use super::domain::{
    Comment, FileId, FileRef, FileReviewStatus, GradeConfig, RoomKey, Submission, SubmissionId,
    SubmissionStatus,
};

/// Fields written by a student-facing submit; everything else on the record is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionFields {
    pub student_name: String,
    pub room: RoomKey,
    pub files: Vec<FileRef>,
    pub status: SubmissionStatus,
}

/// Single-field administrative update applied by [`SubmissionRepository::set_field`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionField {
    Status(SubmissionStatus),
}

/// Persistence for submission records. Every mutation is atomic for a single record.
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Replace the record for `(grade, email)`, creating it when absent.
    async fn upsert_by_grade_and_email(
        &self,
        grade: u32,
        email: &str,
        fields: SubmissionFields,
    ) -> Result<(), RepositoryError>;

    async fn get_by_grade_and_email(
        &self,
        grade: u32,
        email: &str,
    ) -> Result<Option<Submission>, RepositoryError>;

    async fn get_by_id(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Submission>, RepositoryError>;

    async fn list_by_grade(&self, grade: u32) -> Result<Vec<Submission>, RepositoryError> {
        let mut submissions = self.list_all().await?;
        submissions.retain(|submission| submission.grade == grade);
        Ok(submissions)
    }

    async fn set_field(
        &self,
        id: &SubmissionId,
        field: SubmissionField,
    ) -> Result<(), RepositoryError>;

    async fn append_comment(
        &self,
        id: &SubmissionId,
        comment: Comment,
    ) -> Result<(), RepositoryError>;

    async fn set_file_review_status(
        &self,
        id: &SubmissionId,
        file_id: &FileId,
        status: FileReviewStatus,
    ) -> Result<(), RepositoryError>;
}

/// Persistence for per-grade configuration, keyed by grade.
#[async_trait]
pub trait GradeConfigRepository: Send + Sync {
    async fn upsert_grade_config(&self, config: GradeConfig) -> Result<(), RepositoryError>;

    async fn grade_config(&self, grade: u32) -> Result<Option<GradeConfig>, RepositoryError>;

    async fn grade_configs(&self) -> Result<Vec<GradeConfig>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("submission {0} not found")]
    SubmissionNotFound(SubmissionId),
    #[error("file {file_id} not found on submission {submission_id}")]
    FileNotFound {
        submission_id: SubmissionId,
        file_id: FileId,
    },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
