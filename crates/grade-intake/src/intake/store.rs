use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use super::domain::{Comment, FileId, FileReviewStatus, GradeConfig, Submission, SubmissionId};
use super::repository::{
    GradeConfigRepository, RepositoryError, SubmissionField, SubmissionFields,
    SubmissionRepository,
};

/// Submission and grade configuration records, optionally mirrored to a JSON snapshot.
///
/// Writers are serialized and work on a copy of the current state. The copy is only
/// published after the snapshot hit disk, so readers never see a half-applied change
/// and a failed write leaves the previous state in place.
#[derive(Debug)]
pub struct SubmissionStore {
    state: RwLock<Arc<State>>,
    writer: Mutex<()>,
    snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
struct State {
    submissions: BTreeMap<SubmissionId, Submission>,
    by_identity: HashMap<(u32, String), SubmissionId>,
    grade_configs: BTreeMap<u32, GradeConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    submissions: Vec<Submission>,
    #[serde(default)]
    grade_configs: Vec<GradeConfig>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    submissions: Vec<&'a Submission>,
    grade_configs: Vec<&'a GradeConfig>,
}

impl State {
    fn from_snapshot(snapshot: SnapshotFile) -> Self {
        let mut state = State::default();
        for submission in snapshot.submissions {
            state.by_identity.insert(
                (submission.grade, submission.student_email.clone()),
                submission.id,
            );
            state.submissions.insert(submission.id, submission);
        }
        for config in snapshot.grade_configs {
            state.grade_configs.insert(config.grade, config);
        }
        state
    }

    fn submission_mut(&mut self, id: &SubmissionId) -> Result<&mut Submission, RepositoryError> {
        self.submissions
            .get_mut(id)
            .ok_or(RepositoryError::SubmissionNotFound(*id))
    }
}

impl Default for SubmissionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SubmissionStore {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(Arc::new(State::default())),
            writer: Mutex::new(()),
            snapshot_path: None,
        }
    }

    /// Load the snapshot at `path` (if present) and persist every later change to it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|err| {
                RepositoryError::Unavailable(format!("{}: {err}", parent.display()))
            })?;
        }

        let state = match fs::read(&path).await {
            Ok(raw) => {
                let snapshot: SnapshotFile = serde_json::from_slice(&raw).map_err(|err| {
                    RepositoryError::Unavailable(format!(
                        "corrupt snapshot {}: {err}",
                        path.display()
                    ))
                })?;
                State::from_snapshot(snapshot)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => State::default(),
            Err(err) => {
                return Err(RepositoryError::Unavailable(format!(
                    "{}: {err}",
                    path.display()
                )))
            }
        };

        info!(
            path = %path.display(),
            submissions = state.submissions.len(),
            grade_configs = state.grade_configs.len(),
            "submission store opened"
        );

        Ok(Self {
            state: RwLock::new(Arc::new(state)),
            writer: Mutex::new(()),
            snapshot_path: Some(path),
        })
    }

    fn current(&self) -> Arc<State> {
        self.state.read().expect("store lock poisoned").clone()
    }

    async fn mutate<T, F>(&self, apply: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&mut State) -> Result<T, RepositoryError> + Send,
        T: Send,
    {
        let _writer = self.writer.lock().await;
        let mut next = State::clone(&self.current());
        let value = apply(&mut next)?;
        self.persist(&next).await?;
        *self.state.write().expect("store lock poisoned") = Arc::new(next);
        Ok(value)
    }

    async fn persist(&self, state: &State) -> Result<(), RepositoryError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let snapshot = SnapshotRef {
            submissions: state.submissions.values().collect(),
            grade_configs: state.grade_configs.values().collect(),
        };
        let encoded = serde_json::to_vec_pretty(&snapshot)
            .map_err(|err| RepositoryError::Unavailable(format!("encode snapshot: {err}")))?;

        let staging = path.with_extension("json.tmp");
        let unavailable = |err: std::io::Error| {
            RepositoryError::Unavailable(format!("{}: {err}", path.display()))
        };

        let mut file = fs::File::create(&staging).await.map_err(unavailable)?;
        file.write_all(&encoded).await.map_err(unavailable)?;
        file.sync_all().await.map_err(unavailable)?;
        fs::rename(&staging, path).await.map_err(unavailable)
    }
}

#[async_trait]
impl SubmissionRepository for SubmissionStore {
    async fn upsert_by_grade_and_email(
        &self,
        grade: u32,
        email: &str,
        fields: SubmissionFields,
    ) -> Result<(), RepositoryError> {
        self.mutate(move |state| {
            let key = (grade, email.to_string());
            let now = Utc::now();

            match state.by_identity.get(&key).copied() {
                Some(id) => {
                    let record = state.submission_mut(&id)?;
                    record.student_name = fields.student_name;
                    record.room = fields.room;
                    record.files = fields.files;
                    record.status = fields.status;
                    record.updated_at = now;
                }
                None => {
                    let id = SubmissionId::generate();
                    state.submissions.insert(
                        id,
                        Submission {
                            id,
                            grade,
                            student_email: key.1.clone(),
                            student_name: fields.student_name,
                            room: fields.room,
                            files: fields.files,
                            status: fields.status,
                            comments: Vec::new(),
                            updated_at: now,
                        },
                    );
                    state.by_identity.insert(key, id);
                }
            }
            Ok(())
        })
        .await
    }

    async fn get_by_grade_and_email(
        &self,
        grade: u32,
        email: &str,
    ) -> Result<Option<Submission>, RepositoryError> {
        let state = self.current();
        Ok(state
            .by_identity
            .get(&(grade, email.to_string()))
            .and_then(|id| state.submissions.get(id))
            .cloned())
    }

    async fn get_by_id(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError> {
        Ok(self.current().submissions.get(id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Submission>, RepositoryError> {
        Ok(self.current().submissions.values().cloned().collect())
    }

    async fn set_field(
        &self,
        id: &SubmissionId,
        field: SubmissionField,
    ) -> Result<(), RepositoryError> {
        self.mutate(move |state| {
            let record = state.submission_mut(id)?;
            match field {
                SubmissionField::Status(status) => record.status = status,
            }
            record.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn append_comment(
        &self,
        id: &SubmissionId,
        comment: Comment,
    ) -> Result<(), RepositoryError> {
        self.mutate(move |state| {
            let record = state.submission_mut(id)?;
            record.comments.push(comment);
            record.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn set_file_review_status(
        &self,
        id: &SubmissionId,
        file_id: &FileId,
        status: FileReviewStatus,
    ) -> Result<(), RepositoryError> {
        self.mutate(move |state| {
            let record = state.submission_mut(id)?;
            let file = record
                .files
                .iter_mut()
                .find(|file| &file.id == file_id)
                .ok_or(RepositoryError::FileNotFound {
                    submission_id: *id,
                    file_id: *file_id,
                })?;
            file.review_status = status;
            record.updated_at = Utc::now();
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl GradeConfigRepository for SubmissionStore {
    async fn upsert_grade_config(&self, config: GradeConfig) -> Result<(), RepositoryError> {
        self.mutate(move |state| {
            state.grade_configs.insert(config.grade, config);
            Ok(())
        })
        .await
    }

    async fn grade_config(&self, grade: u32) -> Result<Option<GradeConfig>, RepositoryError> {
        Ok(self.current().grade_configs.get(&grade).cloned())
    }

    async fn grade_configs(&self) -> Result<Vec<GradeConfig>, RepositoryError> {
        Ok(self.current().grade_configs.values().cloned().collect())
    }
}
