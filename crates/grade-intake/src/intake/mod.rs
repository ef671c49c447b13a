//! Student submission intake: document storage, the submission record lifecycle, room
//! occupancy views, and the HTTP adapter that fronts them.

pub mod blob;
pub mod domain;
pub mod encoding;
pub mod notify;
pub mod repository;
pub mod rooms;
pub mod router;
pub mod service;
pub mod store;
pub mod validation;

#[cfg(test)]
mod tests;

pub use blob::{
    BlobChunks, BlobError, BlobMetadata, BlobPutMetadata, BlobStore, LocalBlobStore,
    MemoryBlobStore, CHUNK_SIZE,
};
pub use domain::{
    AuthorRole, Comment, CommentId, FileId, FileRef, FileReviewStatus, Gender, GradeConfig,
    RoomKey, RoomKeyError, Submission, SubmissionId, SubmissionStatus, ROOM_CAPACITY,
};
pub use encoding::{
    Attachment, EncodedBody, EncodingError, MultipartEncoder, ResponseEncoder, SubmissionBundle,
};
pub use notify::{DeliveryReport, Notification, NotificationError, Notifier};
pub use repository::{
    GradeConfigRepository, RepositoryError, SubmissionField, SubmissionFields,
    SubmissionRepository,
};
pub use rooms::{RoomDirectory, RoomMember, RoomOccupant};
pub use router::intake_router;
pub use service::{
    AttachedDocument, CommentReceipt, IntakeError, IntakeErrorKind, IntakeOptions,
    IntakeService, MissingRecord, StatusChange, SubmissionWithDocuments, SubmitReceipt,
    VerificationError,
};
pub use store::SubmissionStore;
pub use validation::{SubmissionRequest, UploadedDocument, ValidationError};
