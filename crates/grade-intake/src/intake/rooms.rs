use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use super::domain::{GradeConfig, RoomKey, Submission, SubmissionStatus, ROOM_CAPACITY};
use super::repository::{GradeConfigRepository, RepositoryError, SubmissionRepository};

/// Student listed in a room, with the review state of their submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomOccupant {
    pub name: String,
    pub status: SubmissionStatus,
}

/// Student listed in a grade's room overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomMember {
    pub name: String,
    pub email: String,
}

/// Room membership views derived from stored submissions and grade configuration.
///
/// The room keys considered to exist are every key a grade config enumerates plus every
/// key some submission points at. Configured keys nobody picked show up with no members.
pub struct RoomDirectory<R> {
    repository: Arc<R>,
}

impl<R> Clone for RoomDirectory<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R> RoomDirectory<R>
where
    R: SubmissionRepository + GradeConfigRepository,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub async fn students_in_room(
        &self,
        grade: u32,
        room: &RoomKey,
    ) -> Result<Vec<RoomOccupant>, RepositoryError> {
        let mut occupants: Vec<RoomOccupant> = self
            .repository
            .list_by_grade(grade)
            .await?
            .into_iter()
            .filter(|submission| &submission.room == room)
            .map(|submission| RoomOccupant {
                name: submission.student_name,
                status: submission.status,
            })
            .collect();
        occupants.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(occupants)
    }

    pub async fn rooms_for_grade(
        &self,
        grade: u32,
    ) -> Result<BTreeMap<RoomKey, Vec<RoomMember>>, RepositoryError> {
        let mut rooms: BTreeMap<RoomKey, Vec<RoomMember>> = BTreeMap::new();
        if let Some(config) = self.repository.grade_config(grade).await? {
            for key in config.room_keys() {
                rooms.entry(key).or_default();
            }
        }

        for submission in self.repository.list_by_grade(grade).await? {
            rooms.entry(submission.room).or_default().push(RoomMember {
                name: submission.student_name,
                email: submission.student_email,
            });
        }

        for members in rooms.values_mut() {
            members.sort_by(|a, b| a.email.cmp(&b.email));
        }
        Ok(rooms)
    }

    /// Room keys holding fewer than [`ROOM_CAPACITY`] students, for one grade or across all.
    pub async fn open_rooms(&self, grade: Option<u32>) -> Result<Vec<RoomKey>, RepositoryError> {
        let (configs, submissions) = match grade {
            Some(grade) => (
                self.repository
                    .grade_config(grade)
                    .await?
                    .into_iter()
                    .collect::<Vec<_>>(),
                self.repository.list_by_grade(grade).await?,
            ),
            None => (
                self.repository.grade_configs().await?,
                self.repository.list_all().await?,
            ),
        };

        Ok(occupancy(&configs, &submissions)
            .into_iter()
            .filter(|(_, count)| *count < ROOM_CAPACITY)
            .map(|(key, _)| key)
            .collect())
    }
}

fn occupancy(configs: &[GradeConfig], submissions: &[Submission]) -> BTreeMap<RoomKey, usize> {
    let mut counts = BTreeMap::new();
    for key in configs.iter().flat_map(GradeConfig::room_keys) {
        counts.entry(key).or_insert(0);
    }
    for submission in submissions {
        *counts.entry(submission.room).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::domain::{Gender, SubmissionId};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn submission(grade: u32, email: &str, room: &str) -> Submission {
        Submission {
            id: SubmissionId::generate(),
            grade,
            student_email: email.to_string(),
            student_name: email.split('@').next().unwrap_or_default().to_string(),
            room: RoomKey::parse(room).expect("valid room"),
            files: Vec::new(),
            status: SubmissionStatus::Pending,
            comments: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn occupancy_counts_configured_and_occupied_keys() {
        let config = GradeConfig {
            grade: 6,
            buses: BTreeSet::from([1]),
            male_room_numbers: BTreeSet::from([1, 2]),
            female_room_numbers: BTreeSet::new(),
            expected_document_types: Vec::new(),
        };
        let submissions = vec![
            submission(6, "a@x.com", "1M1"),
            submission(6, "b@x.com", "1M1"),
            submission(6, "c@x.com", "3F1"),
        ];

        let counts = occupancy(&[config], &submissions);
        assert_eq!(counts[&RoomKey::new(1, Gender::Male, 1)], 2);
        assert_eq!(counts[&RoomKey::new(1, Gender::Male, 2)], 0);
        assert_eq!(counts[&RoomKey::new(3, Gender::Female, 1)], 1);
        assert_eq!(counts.len(), 3);
    }
}
