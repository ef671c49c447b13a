use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{RoomKey, Submission, SubmissionStatus};

/// Outbound message addressed to a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn submission_received(email: &str, name: &str, room: &RoomKey) -> Self {
        Self {
            recipient: email.to_string(),
            subject: "Signup Pending".to_string(),
            body: format!(
                "Hello {name},\n\nConfirming your submission, you have selected Bus {}, Room {} ({}).\n",
                room.bus,
                room.room_number,
                room.gender.label()
            ),
        }
    }

    pub fn status_changed(submission: &Submission) -> Self {
        let (subject, line) = match submission.status {
            SubmissionStatus::Approved => (
                "Signup Approved",
                "Your submission has been approved. Welcome aboard!",
            ),
            SubmissionStatus::Pending => (
                "Signup Pending",
                "Your submission is pending. We will notify you further for more updates.",
            ),
            SubmissionStatus::Denied => (
                "Signup Denied",
                "Your submission has been denied. We will notify you further for more updates.",
            ),
        };

        Self {
            recipient: submission.student_email.clone(),
            subject: subject.to_string(),
            body: format!("Hello {},\n\n{line}\n", submission.student_name),
        }
    }

    pub fn comment_added(submission: &Submission, comment: &str) -> Self {
        Self {
            recipient: submission.student_email.clone(),
            subject: "You have a new comment on your submission".to_string(),
            body: format!(
                "Hello {},\n\nA new comment has been left on your submission:\n\n{comment}\n",
                submission.student_name
            ),
        }
    }
}

/// Delivery transport for student notifications (e-mail or similar).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
    #[error("notification rejected for {recipient}: {reason}")]
    Rejected { recipient: String, reason: String },
}

/// Outcome of a best-effort delivery, returned alongside the operation it followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn from_result(result: &Result<(), NotificationError>) -> Self {
        match result {
            Ok(()) => Self {
                delivered: true,
                error: None,
            },
            Err(err) => Self {
                delivered: false,
                error: Some(err.to_string()),
            },
        }
    }
}
