use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use grade_intake::intake::{
    BlobStore, IntakeErrorKind, IntakeOptions, IntakeService, LocalBlobStore, Notification,
    NotificationError, Notifier, RoomKey, SubmissionRepository, SubmissionRequest,
    SubmissionStatus, SubmissionStore, UploadedDocument,
};

#[derive(Default)]
struct Outbox {
    messages: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for Outbox {
    async fn deliver(&self, notification: Notification) -> Result<(), NotificationError> {
        self.messages
            .lock()
            .expect("outbox mutex poisoned")
            .push(notification);
        Ok(())
    }
}

type DiskService = IntakeService<SubmissionStore, LocalBlobStore, Outbox>;

async fn open_service(root: &std::path::Path) -> (DiskService, Arc<SubmissionStore>) {
    let store = Arc::new(
        SubmissionStore::open(root.join("submissions.json"))
            .await
            .expect("store opens"),
    );
    let blobs = Arc::new(
        LocalBlobStore::with_chunk_size(root.join("blobs"), 8)
            .await
            .expect("blob root created"),
    );
    let service = IntakeService::new(
        Arc::clone(&store),
        blobs,
        Arc::new(Outbox::default()),
        IntakeOptions {
            blob_timeout: Duration::from_secs(5),
        },
    );
    (service, store)
}

fn document(name: &str, contents: &'static [u8]) -> UploadedDocument {
    UploadedDocument {
        bytes: Bytes::from_static(contents),
        original_filename: name.to_string(),
        content_type: "application/pdf".to_string(),
    }
}

#[tokio::test]
async fn submissions_survive_a_restart() {
    let root = tempfile::tempdir().expect("temp dir");

    let receipt = {
        let (service, _) = open_service(root.path()).await;
        let receipt = service
            .submit(SubmissionRequest {
                grade: Some("6".to_string()),
                email: Some("a@x.com".to_string()),
                name: Some("Ann".to_string()),
                room: Some("1M2".to_string()),
                documents: vec![
                    document("consent.pdf", b"%PDF-1.4 signed consent form"),
                    document("medical.pdf", b"%PDF-1.4 medical history"),
                ],
                document_types: vec!["Consent".to_string(), "Medical".to_string()],
            })
            .await
            .expect("submission stored");
        service
            .set_status(&receipt.submission_id, SubmissionStatus::Approved)
            .await
            .expect("approved");
        receipt
    };

    let (service, store) = open_service(root.path()).await;
    let record = store
        .get_by_grade_and_email(6, "a@x.com")
        .await
        .expect("store readable")
        .expect("record reloaded");
    assert_eq!(record.id, receipt.submission_id);
    assert_eq!(record.status, SubmissionStatus::Approved);
    assert_eq!(record.files[0].display_name, "Consent");
    assert_eq!(record.files[1].display_name, "Medical");

    let bundle = service
        .submission_bundle(6, "a@x.com")
        .await
        .expect("documents readable after restart");
    assert_eq!(&bundle.attachments[0].bytes[..], b"%PDF-1.4 signed consent form");
    assert_eq!(&bundle.attachments[1].bytes[..], b"%PDF-1.4 medical history");

    let open = service
        .rooms()
        .open_rooms(Some(6))
        .await
        .expect("open rooms");
    assert_eq!(open, vec![RoomKey::parse("1M2").expect("room key")]);
}

#[tokio::test]
async fn missing_chunk_on_disk_is_reported_not_truncated() {
    let root = tempfile::tempdir().expect("temp dir");
    let (service, _) = open_service(root.path()).await;

    let receipt = service
        .submit(SubmissionRequest {
            grade: Some("8".to_string()),
            email: Some("b@x.com".to_string()),
            name: Some("Bo".to_string()),
            room: Some("2F1".to_string()),
            documents: vec![document("long.pdf", b"%PDF-1.4 spans several chunks")],
            document_types: Vec::new(),
        })
        .await
        .expect("submission stored");

    let chunk = root
        .path()
        .join("blobs")
        .join(receipt.file_ids[0].to_string())
        .join("1.chunk");
    tokio::fs::remove_file(&chunk).await.expect("chunk removed");

    let blobs = LocalBlobStore::with_chunk_size(root.path().join("blobs"), 8)
        .await
        .expect("blob root");
    assert!(blobs.get(&receipt.file_ids[0]).await.is_err());

    let err = service
        .submission_bundle(8, "b@x.com")
        .await
        .expect_err("bundle read fails");
    assert_eq!(err.kind(), IntakeErrorKind::StorageRead);

    let listing = service
        .list_with_attached_documents()
        .await
        .expect("listing still succeeds");
    assert!(listing[0].files_data[0].is_failed());
}
