//! Student domain model.
//!
//! # Responsibility
//! - Define the canonical student record replicated across every store.
//! - Own field-level validation so invalid rows never reach a write path.
//!
//! # Invariants
//! - `id` is assigned at most once and never changes afterwards.
//! - `year` stays within `1..=7`.
//! - `first_name`/`last_name` are non-blank; `patronus` is non-blank when set.
//! - `house` is one of the four fixed partition keys.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Sequential ids look like `GRY00006`; legacy random ids look like `GRY-a4f3b2c1`.
static STUDENT_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<prefix>[A-Z]{3})(?:(?P<seq>\d{5,})|-(?P<hex>[a-f0-9]{8}))$")
        .expect("valid student id regex")
});

pub const MIN_YEAR: u8 = 1;
pub const MAX_YEAR: u8 = 7;
/// Width of the zero-padded numeric suffix of sequential ids.
pub const ID_SUFFIX_WIDTH: usize = 5;

/// Field-level validation failure for student data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudentValidationError {
    EmptyFirstName,
    EmptyLastName,
    YearOutOfRange(i64),
    UnknownHouse(String),
    EmptyPatronus,
    MalformedId(String),
    IdAlreadyAssigned(StudentId),
    MissingId,
    IdMismatch { expected: StudentId, found: StudentId },
    /// The id prefix names a different house than the record.
    IdHouseMismatch { id: StudentId, house: House },
}

impl Display for StudentValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyFirstName => write!(f, "first name cannot be empty"),
            Self::EmptyLastName => write!(f, "last name cannot be empty"),
            Self::YearOutOfRange(year) => {
                write!(f, "year {year} is outside {MIN_YEAR}..={MAX_YEAR}")
            }
            Self::UnknownHouse(value) => write!(
                f,
                "unknown house `{value}`; expected Gryffindor|Slytherin|Ravenclaw|Hufflepuff"
            ),
            Self::EmptyPatronus => write!(f, "patronus cannot be blank when provided"),
            Self::MalformedId(value) => write!(f, "malformed student id `{value}`"),
            Self::IdAlreadyAssigned(id) => write!(f, "student id already assigned: {id}"),
            Self::MissingId => write!(f, "student id is required for this operation"),
            Self::IdMismatch { expected, found } => {
                write!(f, "student id mismatch: expected {expected}, found {found}")
            }
            Self::IdHouseMismatch { id, house } => write!(
                f,
                "student id {id} does not belong to {house} (expected prefix {})",
                house.id_prefix()
            ),
        }
    }
}

impl Error for StudentValidationError {}

/// Partition key. Every house owns exactly one partition store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum House {
    Gryffindor,
    Slytherin,
    Ravenclaw,
    Hufflepuff,
}

impl House {
    pub const ALL: [House; 4] = [
        House::Gryffindor,
        House::Slytherin,
        House::Ravenclaw,
        House::Hufflepuff,
    ];

    /// Canonical display/storage name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Gryffindor => "Gryffindor",
            Self::Slytherin => "Slytherin",
            Self::Ravenclaw => "Ravenclaw",
            Self::Hufflepuff => "Hufflepuff",
        }
    }

    /// Three-letter uppercase prefix used by student ids.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Gryffindor => "GRY",
            Self::Slytherin => "SLY",
            Self::Ravenclaw => "RAV",
            Self::Hufflepuff => "HUF",
        }
    }

    /// Case-insensitive, whitespace-tolerant lookup.
    pub fn parse(value: &str) -> Option<House> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|house| house.name().eq_ignore_ascii_case(trimmed))
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Gryffindor => 0,
            Self::Slytherin => 1,
            Self::Ravenclaw => 2,
            Self::Hufflepuff => 3,
        }
    }
}

impl Display for House {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for House {
    type Err = StudentValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        House::parse(value).ok_or_else(|| StudentValidationError::UnknownHouse(value.to_string()))
    }
}

/// Stable student identifier, `<house prefix><suffix>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudentId(String);

impl StudentId {
    /// Parses either a sequential (`GRY00006`) or legacy random (`GRY-a4f3b2c1`) id.
    pub fn parse(value: &str) -> Result<Self, StudentValidationError> {
        let trimmed = value.trim();
        let captures = STUDENT_ID_RE
            .captures(trimmed)
            .ok_or_else(|| StudentValidationError::MalformedId(value.to_string()))?;
        let prefix = &captures["prefix"];
        if !House::ALL.iter().any(|house| house.id_prefix() == prefix) {
            return Err(StudentValidationError::MalformedId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Formats a sequential id for `house` with the given counter value.
    pub fn sequential(house: House, counter: u64) -> Self {
        Self(format!(
            "{}{:0width$}",
            house.id_prefix(),
            counter,
            width = ID_SUFFIX_WIDTH
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// House encoded in the id prefix.
    pub fn house(&self) -> Option<House> {
        House::ALL
            .into_iter()
            .find(|house| self.0.starts_with(house.id_prefix()))
    }

    /// Numeric suffix for sequential ids; `None` for legacy random ids.
    pub fn sequence(&self) -> Option<u64> {
        let captures = STUDENT_ID_RE.captures(&self.0)?;
        captures.name("seq")?.as_str().parse().ok()
    }
}

impl Display for StudentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StudentId {
    type Error = StudentValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StudentId> for String {
    fn from(value: StudentId) -> Self {
        value.0
    }
}

/// One student row, identical in shape across all six stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    id: Option<StudentId>,
    pub first_name: String,
    pub last_name: String,
    pub year: u8,
    pub house: House,
    pub patronus: Option<String>,
}

impl StudentRecord {
    /// Builds a validated record without an id; the id is minted on create.
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        year: i64,
        house: &str,
        patronus: Option<String>,
    ) -> Result<Self, StudentValidationError> {
        let year = check_year(year)?;
        let record = Self {
            id: None,
            first_name: first_name.into(),
            last_name: last_name.into(),
            year,
            house: house.parse()?,
            patronus,
        };
        record.validate()?;
        Ok(record)
    }

    /// Rebuilds a record that already carries an id (read paths, imports).
    pub fn with_id(
        id: StudentId,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        year: u8,
        house: House,
        patronus: Option<String>,
    ) -> Self {
        Self {
            id: Some(id),
            first_name: first_name.into(),
            last_name: last_name.into(),
            year,
            house,
            patronus,
        }
    }

    pub fn id(&self) -> Option<&StudentId> {
        self.id.as_ref()
    }

    /// Returns the id or `MissingId` for paths that need one.
    pub fn require_id(&self) -> Result<&StudentId, StudentValidationError> {
        self.id.as_ref().ok_or(StudentValidationError::MissingId)
    }

    /// Sets the id exactly once.
    pub fn assign_id(&mut self, id: StudentId) -> Result<(), StudentValidationError> {
        if let Some(existing) = &self.id {
            return Err(StudentValidationError::IdAlreadyAssigned(existing.clone()));
        }
        self.id = Some(id);
        Ok(())
    }

    /// Checks every field-level invariant.
    pub fn validate(&self) -> Result<(), StudentValidationError> {
        if self.first_name.trim().is_empty() {
            return Err(StudentValidationError::EmptyFirstName);
        }
        if self.last_name.trim().is_empty() {
            return Err(StudentValidationError::EmptyLastName);
        }
        check_year(i64::from(self.year))?;
        if let Some(id) = &self.id {
            if id.house() != Some(self.house) {
                return Err(StudentValidationError::IdHouseMismatch {
                    id: id.clone(),
                    house: self.house,
                });
            }
        }
        if matches!(&self.patronus, Some(value) if value.trim().is_empty()) {
            return Err(StudentValidationError::EmptyPatronus);
        }
        Ok(())
    }
}

fn check_year(year: i64) -> Result<u8, StudentValidationError> {
    if !(i64::from(MIN_YEAR)..=i64::from(MAX_YEAR)).contains(&year) {
        return Err(StudentValidationError::YearOutOfRange(year));
    }
    Ok(year as u8)
}
