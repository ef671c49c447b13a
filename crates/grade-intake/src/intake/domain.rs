use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Occupants a room slot holds before it stops being reported as open.
pub const ROOM_CAPACITY: usize = 2;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(raw.trim()).map(Self)
            }
        }
    };
}

identifier!(
    /// Identifier of a persisted submission, stable for the record's lifetime.
    SubmissionId
);
identifier!(
    /// Identifier of a stored document; doubles as the blob store key.
    FileId
);
identifier!(CommentId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub const fn code(self) -> char {
        match self {
            Gender::Male => 'M',
            Gender::Female => 'F',
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }
}

/// Composite room slot key, written as `<bus><M|F><room>` (e.g. `1M2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomKey {
    pub bus: u16,
    pub gender: Gender,
    pub room_number: u16,
}

impl RoomKey {
    pub const fn new(bus: u16, gender: Gender, room_number: u16) -> Self {
        Self {
            bus,
            gender,
            room_number,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, RoomKeyError> {
        raw.parse()
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.bus, self.gender.code(), self.room_number)
    }
}

impl FromStr for RoomKey {
    type Err = RoomKeyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let token = raw.trim();
        let split = token
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(|| RoomKeyError::MissingGender(token.to_string()))?;
        let (bus, rest) = token.split_at(split);

        let mut chars = rest.chars();
        let gender = match chars.next() {
            Some('M' | 'm') => Gender::Male,
            Some('F' | 'f') => Gender::Female,
            Some(found) => {
                return Err(RoomKeyError::UnknownGender {
                    value: token.to_string(),
                    found,
                })
            }
            None => return Err(RoomKeyError::MissingGender(token.to_string())),
        };

        Ok(Self {
            bus: parse_segment(token, bus, "bus")?,
            gender,
            room_number: parse_segment(token, chars.as_str(), "room number")?,
        })
    }
}

fn parse_segment(token: &str, segment: &str, name: &'static str) -> Result<u16, RoomKeyError> {
    let invalid = || RoomKeyError::InvalidSegment {
        value: token.to_string(),
        segment: name,
    };

    if segment.is_empty() || !segment.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    segment.parse().map_err(|_| invalid())
}

impl TryFrom<String> for RoomKey {
    type Error = RoomKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomKey> for String {
    fn from(value: RoomKey) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomKeyError {
    #[error("room '{0}' is missing the gender segment (M or F)")]
    MissingGender(String),
    #[error("room '{value}' has unknown gender segment '{found}'")]
    UnknownGender { value: String, found: char },
    #[error("room '{value}' has an invalid {segment} segment")]
    InvalidSegment {
        value: String,
        segment: &'static str,
    },
}

/// Administrative review state of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Denied,
}

impl SubmissionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "Pending",
            SubmissionStatus::Approved => "Approved",
            SubmissionStatus::Denied => "Denied",
        }
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            _ => Err(raw.to_string()),
        }
    }
}

/// Review state of a single attached document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileReviewStatus {
    #[default]
    Pending,
    Correct,
    Incorrect,
}

impl FromStr for FileReviewStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "correct" => Ok(Self::Correct),
            "incorrect" => Ok(Self::Incorrect),
            _ => Err(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: FileId,
    pub display_name: String,
    pub review_status: FileReviewStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorRole {
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub text: String,
    pub author_role: AuthorRole,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(text: impl Into<String>, author_role: AuthorRole) -> Self {
        Self {
            id: CommentId::generate(),
            text: text.into(),
            author_role,
            created_at: Utc::now(),
        }
    }
}

/// One student's registration for a grade cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub grade: u32,
    pub student_email: String,
    pub student_name: String,
    pub room: RoomKey,
    pub files: Vec<FileRef>,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub comments: Vec<Comment>,
    pub updated_at: DateTime<Utc>,
}

/// Per-grade room layout and expected paperwork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeConfig {
    pub grade: u32,
    #[serde(default)]
    pub buses: BTreeSet<u16>,
    #[serde(default)]
    pub male_room_numbers: BTreeSet<u16>,
    #[serde(default)]
    pub female_room_numbers: BTreeSet<u16>,
    #[serde(default)]
    pub expected_document_types: Vec<String>,
}

impl GradeConfig {
    pub fn empty(grade: u32) -> Self {
        Self {
            grade,
            buses: BTreeSet::new(),
            male_room_numbers: BTreeSet::new(),
            female_room_numbers: BTreeSet::new(),
            expected_document_types: Vec::new(),
        }
    }

    /// Every room slot the configuration defines, ordered by bus, gender, then room.
    pub fn room_keys(&self) -> Vec<RoomKey> {
        let mut keys = Vec::new();
        for &bus in &self.buses {
            for &room in &self.male_room_numbers {
                keys.push(RoomKey::new(bus, Gender::Male, room));
            }
            for &room in &self.female_room_numbers {
                keys.push(RoomKey::new(bus, Gender::Female, room));
            }
        }
        keys
    }

    pub fn defines_rooms(&self) -> bool {
        !self.buses.is_empty()
            && !(self.male_room_numbers.is_empty() && self.female_room_numbers.is_empty())
    }

    pub fn allows_room(&self, room: &RoomKey) -> bool {
        let rooms = match room.gender {
            Gender::Male => &self.male_room_numbers,
            Gender::Female => &self.female_room_numbers,
        };
        self.buses.contains(&room.bus) && rooms.contains(&room.room_number)
    }
}
