use std::collections::HashSet;

use bytes::Bytes;

use super::domain::{FileReviewStatus, GradeConfig, RoomKey, RoomKeyError, SubmissionStatus};

/// One uploaded document as handed over by the form decoder, in upload order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedDocument {
    pub bytes: Bytes,
    pub original_filename: String,
    pub content_type: String,
}

/// Raw student submission before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub grade: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub room: Option<String>,
    pub documents: Vec<UploadedDocument>,
    /// Optional labels pairing positionally with `documents`; empty when none were sent.
    pub document_types: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ValidatedSubmission {
    pub(crate) grade: u32,
    pub(crate) email: String,
    pub(crate) name: String,
    pub(crate) room: RoomKey,
    pub(crate) documents: Vec<UploadedDocument>,
    pub(crate) labels: Option<Vec<String>>,
}

impl ValidatedSubmission {
    /// Display name for the document at `index`: its label when supplied, else its filename.
    pub(crate) fn display_name(&self, index: usize) -> String {
        self.labels
            .as_ref()
            .and_then(|labels| labels.get(index))
            .cloned()
            .unwrap_or_else(|| self.documents[index].original_filename.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("grade must be a valid integer, got '{0}'")]
    InvalidGrade(String),
    #[error(transparent)]
    InvalidRoom(#[from] RoomKeyError),
    #[error("no documents uploaded")]
    NoDocuments,
    #[error("document '{0}' is empty")]
    EmptyDocument(String),
    #[error("{labels} document types supplied for {documents} documents")]
    LabelCountMismatch { labels: usize, documents: usize },
    #[error("grade {grade} does not expect a '{label}' document")]
    UnknownDocumentType { grade: u32, label: String },
    #[error("grade {grade} expects at most {expected} documents, got {actual}")]
    TooManyDocuments {
        grade: u32,
        expected: usize,
        actual: usize,
    },
    #[error("room {room} is not configured for grade {grade}")]
    RoomNotConfigured { grade: u32, room: RoomKey },
    #[error("invalid submission status '{0}', expected Pending, Approved or Denied")]
    InvalidStatus(String),
    #[error("invalid file review status '{0}', expected Pending, Correct or Incorrect")]
    InvalidReviewStatus(String),
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("comment text must not be empty")]
    EmptyComment,
    #[error("invalid grade configuration: {0}")]
    InvalidGradeConfig(String),
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub fn parse_grade(raw: &str) -> Result<u32, ValidationError> {
    raw.trim()
        .parse()
        .map_err(|_| ValidationError::InvalidGrade(raw.to_string()))
}

pub fn parse_status(raw: &str) -> Result<SubmissionStatus, ValidationError> {
    raw.parse().map_err(ValidationError::InvalidStatus)
}

pub fn parse_review_status(raw: &str) -> Result<FileReviewStatus, ValidationError> {
    raw.parse().map_err(ValidationError::InvalidReviewStatus)
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ValidationError::MissingField(field))
}

impl SubmissionRequest {
    pub(crate) fn validate(self) -> Result<ValidatedSubmission, ValidationError> {
        let grade = required(self.grade, "grade")?;
        let email = required(self.email, "email")?;
        let name = required(self.name, "name")?;
        let room = required(self.room, "room")?;

        let grade = parse_grade(&grade)?;
        let room = RoomKey::parse(&room)?;

        if self.documents.is_empty() {
            return Err(ValidationError::NoDocuments);
        }
        if let Some(empty) = self.documents.iter().find(|doc| doc.bytes.is_empty()) {
            return Err(ValidationError::EmptyDocument(empty.original_filename.clone()));
        }

        let labels = if self.document_types.is_empty() {
            None
        } else if self.document_types.len() != self.documents.len() {
            return Err(ValidationError::LabelCountMismatch {
                labels: self.document_types.len(),
                documents: self.documents.len(),
            });
        } else {
            Some(
                self.document_types
                    .into_iter()
                    .map(|label| label.trim().to_string())
                    .collect(),
            )
        };

        Ok(ValidatedSubmission {
            grade,
            email: normalize_email(&email),
            name,
            room,
            documents: self.documents,
            labels,
        })
    }
}

/// Check a validated submission against the grade's configured rooms and paperwork.
pub(crate) fn check_against_config(
    submission: &ValidatedSubmission,
    config: &GradeConfig,
) -> Result<(), ValidationError> {
    if config.defines_rooms() && !config.allows_room(&submission.room) {
        return Err(ValidationError::RoomNotConfigured {
            grade: config.grade,
            room: submission.room,
        });
    }

    let expected = &config.expected_document_types;
    if expected.is_empty() {
        return Ok(());
    }
    if submission.documents.len() > expected.len() {
        return Err(ValidationError::TooManyDocuments {
            grade: config.grade,
            expected: expected.len(),
            actual: submission.documents.len(),
        });
    }
    if let Some(labels) = &submission.labels {
        if let Some(unknown) = labels.iter().find(|label| !expected.contains(label)) {
            return Err(ValidationError::UnknownDocumentType {
                grade: config.grade,
                label: unknown.clone(),
            });
        }
    }
    Ok(())
}

pub(crate) fn check_grade_config(config: &GradeConfig) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for label in &config.expected_document_types {
        if label.trim().is_empty() {
            return Err(ValidationError::InvalidGradeConfig(
                "document types must not be blank".to_string(),
            ));
        }
        if !seen.insert(label.as_str()) {
            return Err(ValidationError::InvalidGradeConfig(format!(
                "document type '{label}' listed twice"
            )));
        }
    }
    Ok(())
}
