use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::blob::BlobStore;
use super::domain::{FileId, GradeConfig, RoomKey, SubmissionId};
use super::encoding::{MultipartEncoder, ResponseEncoder};
use super::notify::Notifier;
use super::repository::{GradeConfigRepository, SubmissionRepository};
use super::service::{IntakeError, IntakeErrorKind, IntakeService};
use super::validation::{
    normalize_email, parse_grade, parse_review_status, parse_status, SubmissionRequest,
    UploadedDocument, ValidationError,
};

/// Upper bound for a whole multipart submission body.
pub const MAX_SUBMISSION_BYTES: usize = 25 * 1024 * 1024;

/// Router builder exposing the submission, room, and grade configuration endpoints.
pub fn intake_router<R, B, N>(service: Arc<IntakeService<R, B, N>>) -> Router
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    Router::new()
        .route(
            "/api/v1/submissions",
            get(list_handler::<R, B, N>)
                .post(submit_handler::<R, B, N>)
                .layer(DefaultBodyLimit::max(MAX_SUBMISSION_BYTES)),
        )
        .route(
            "/api/v1/submissions/lookup",
            get(lookup_handler::<R, B, N>),
        )
        .route(
            "/api/v1/submissions/:submission_id/status",
            patch(status_handler::<R, B, N>),
        )
        .route(
            "/api/v1/submissions/:submission_id/comments",
            get(comments_handler::<R, B, N>).post(comment_handler::<R, B, N>),
        )
        .route(
            "/api/v1/submissions/:submission_id/files/:file_id/review",
            patch(file_review_handler::<R, B, N>),
        )
        .route(
            "/api/v1/grades/:grade/rooms",
            get(rooms_for_grade_handler::<R, B, N>),
        )
        .route(
            "/api/v1/grades/:grade/rooms/:room",
            get(students_in_room_handler::<R, B, N>),
        )
        .route(
            "/api/v1/grades/:grade/config",
            get(grade_config_handler::<R, B, N>).put(upsert_grade_config_handler::<R, B, N>),
        )
        .route("/api/v1/rooms/open", get(open_rooms_handler::<R, B, N>))
        .with_state(service)
}

type SharedService<R, B, N> = State<Arc<IntakeService<R, B, N>>>;

#[derive(Debug, Deserialize)]
pub(crate) struct LookupQuery {
    grade: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenRoomsQuery {
    grade: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusPayload {
    status: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentPayload {
    text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GradeConfigPayload {
    #[serde(default)]
    buses: BTreeSet<u16>,
    #[serde(default)]
    male_room_numbers: BTreeSet<u16>,
    #[serde(default)]
    female_room_numbers: BTreeSet<u16>,
    #[serde(default)]
    expected_document_types: Vec<String>,
}

pub(crate) async fn submit_handler<R, B, N>(
    State(service): SharedService<R, B, N>,
    multipart: Multipart,
) -> Response
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    let request = match read_submission_form(multipart).await {
        Ok(request) => request,
        Err(err) => {
            let payload = json!({
                "error": err.body_text(),
                "kind": IntakeErrorKind::Validation,
            });
            return (err.status(), Json(payload)).into_response();
        }
    };

    match service.submit(request).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(err) => error_response(err),
    }
}

/// Collect text fields and file parts; every non-blank part with a filename is a document.
async fn read_submission_form(
    mut multipart: Multipart,
) -> Result<SubmissionRequest, MultipartError> {
    let mut request = SubmissionRequest::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if let Some(filename) = field.file_name().map(str::to_string) {
            let content_type = field
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| {
                    mime_guess::from_path(&filename)
                        .first_or_octet_stream()
                        .to_string()
                });
            let bytes = field.bytes().await?;
            // Browsers send an unnamed, empty part for every file input left blank.
            if filename.is_empty() && bytes.is_empty() {
                continue;
            }
            request.documents.push(UploadedDocument {
                bytes,
                original_filename: filename,
                content_type,
            });
            continue;
        }

        let value = field.text().await?;
        match name.as_str() {
            "grade" => request.grade = Some(value),
            "email" => request.email = Some(value),
            "name" => request.name = Some(value),
            "room" => request.room = Some(value),
            "document_type" => request.document_types.push(value),
            _ => {}
        }
    }
    Ok(request)
}

pub(crate) async fn list_handler<R, B, N>(State(service): SharedService<R, B, N>) -> Response
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    match service.list_with_attached_documents().await {
        Ok(listing) => (StatusCode::OK, Json(listing)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn lookup_handler<R, B, N>(
    State(service): SharedService<R, B, N>,
    Query(query): Query<LookupQuery>,
) -> Response
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    let grade = match query.grade.as_deref() {
        Some(raw) => match parse_grade(raw) {
            Ok(grade) => grade,
            Err(err) => return error_response(err.into()),
        },
        None => return error_response(ValidationError::MissingField("grade").into()),
    };
    let email = match query.email.as_deref().map(normalize_email) {
        Some(email) if !email.is_empty() => email,
        _ => return error_response(ValidationError::MissingField("email").into()),
    };

    let bundle = match service.submission_bundle(grade, &email).await {
        Ok(bundle) => bundle,
        Err(err) => return error_response(err),
    };

    match MultipartEncoder::new().encode(&bundle) {
        Ok(encoded) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoded.content_type)],
            encoded.body,
        )
            .into_response(),
        Err(err) => error_response(err.into()),
    }
}

pub(crate) async fn status_handler<R, B, N>(
    State(service): SharedService<R, B, N>,
    Path(submission_id): Path<String>,
    Json(payload): Json<StatusPayload>,
) -> Response
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    let outcome = async {
        let id = parse_submission_id(&submission_id)?;
        let status = parse_status(&payload.status)?;
        service.set_status(&id, status).await
    };

    match outcome.await {
        Ok(change) => (StatusCode::OK, Json(change)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn comment_handler<R, B, N>(
    State(service): SharedService<R, B, N>,
    Path(submission_id): Path<String>,
    Json(payload): Json<CommentPayload>,
) -> Response
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    let outcome = async {
        let id = parse_submission_id(&submission_id)?;
        service.comment(&id, &payload.text).await
    };

    match outcome.await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn comments_handler<R, B, N>(
    State(service): SharedService<R, B, N>,
    Path(submission_id): Path<String>,
) -> Response
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    let outcome = async {
        let id = parse_submission_id(&submission_id)?;
        service.comments(&id).await
    };

    match outcome.await {
        Ok(comments) => (StatusCode::OK, Json(comments)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn file_review_handler<R, B, N>(
    State(service): SharedService<R, B, N>,
    Path((submission_id, file_id)): Path<(String, String)>,
    Json(payload): Json<StatusPayload>,
) -> Response
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    let outcome = async {
        let id = parse_submission_id(&submission_id)?;
        let file_id: FileId = file_id
            .parse()
            .map_err(|_| ValidationError::InvalidIdentifier(file_id.clone()))?;
        let status = parse_review_status(&payload.status)?;
        service.set_file_review_status(&id, &file_id, status).await
    };

    match outcome.await {
        Ok(submission) => (StatusCode::OK, Json(submission)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn rooms_for_grade_handler<R, B, N>(
    State(service): SharedService<R, B, N>,
    Path(grade): Path<String>,
) -> Response
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    let outcome = async {
        let grade = parse_grade(&grade)?;
        Ok::<_, IntakeError>(service.rooms().rooms_for_grade(grade).await?)
    };

    match outcome.await {
        Ok(rooms) => (StatusCode::OK, Json(rooms)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn students_in_room_handler<R, B, N>(
    State(service): SharedService<R, B, N>,
    Path((grade, room)): Path<(String, String)>,
) -> Response
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    let outcome = async {
        let grade = parse_grade(&grade)?;
        let room = RoomKey::parse(&room).map_err(ValidationError::from)?;
        let occupants = service.rooms().students_in_room(grade, &room).await?;
        Ok::<_, IntakeError>(json!({ "room": room, "students": occupants }))
    };

    match outcome.await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn open_rooms_handler<R, B, N>(
    State(service): SharedService<R, B, N>,
    Query(query): Query<OpenRoomsQuery>,
) -> Response
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    let outcome = async {
        let grade = query.grade.as_deref().map(parse_grade).transpose()?;
        Ok::<_, IntakeError>(service.rooms().open_rooms(grade).await?)
    };

    match outcome.await {
        Ok(rooms) => (StatusCode::OK, Json(json!({ "open_rooms": rooms }))).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn grade_config_handler<R, B, N>(
    State(service): SharedService<R, B, N>,
    Path(grade): Path<String>,
) -> Response
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    let outcome = async {
        let grade = parse_grade(&grade)?;
        service.grade_config(grade).await
    };

    match outcome.await {
        Ok(config) => (StatusCode::OK, Json(config)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn upsert_grade_config_handler<R, B, N>(
    State(service): SharedService<R, B, N>,
    Path(grade): Path<String>,
    Json(payload): Json<GradeConfigPayload>,
) -> Response
where
    R: SubmissionRepository + GradeConfigRepository + 'static,
    B: BlobStore + 'static,
    N: Notifier + 'static,
{
    let outcome = async {
        let grade = parse_grade(&grade)?;
        service
            .upsert_grade_config(GradeConfig {
                grade,
                buses: payload.buses,
                male_room_numbers: payload.male_room_numbers,
                female_room_numbers: payload.female_room_numbers,
                expected_document_types: payload.expected_document_types,
            })
            .await
    };

    match outcome.await {
        Ok(config) => (StatusCode::OK, Json(config)).into_response(),
        Err(err) => error_response(err),
    }
}

fn parse_submission_id(raw: &str) -> Result<SubmissionId, ValidationError> {
    raw.parse()
        .map_err(|_| ValidationError::InvalidIdentifier(raw.to_string()))
}

pub(crate) fn status_for(kind: IntakeErrorKind) -> StatusCode {
    match kind {
        IntakeErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        IntakeErrorKind::NotFound => StatusCode::NOT_FOUND,
        IntakeErrorKind::StorageWrite
        | IntakeErrorKind::StorageRead
        | IntakeErrorKind::Verification
        | IntakeErrorKind::Encoding
        | IntakeErrorKind::Unavailable => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(err: IntakeError) -> Response {
    let kind = err.kind();
    let payload = json!({
        "error": err.to_string(),
        "kind": kind,
    });
    (status_for(kind), Json(payload)).into_response()
}
