use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricsError {
    #[error("Threshold must be between 1% and 99%, got {0}")]
    InvalidThreshold(String),

    #[error("Display precision must be 1 or 2 decimals, got {0}")]
    InvalidPrecision(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("Subject name must not be empty")]
    EmptyName,

    #[error("{field} must not be negative, got {value}")]
    NegativeCount { field: &'static str, value: i64 },

    #[error("Attended ({attended}) plus canceled ({canceled}) exceeds total classes ({total})")]
    CountsExceedTotal {
        total: i64,
        attended: i64,
        canceled: i64,
    },

    #[error("Username must not be empty")]
    EmptyUsername,

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Roll number must be at least 1, got {0}")]
    InvalidRollNumber(i64),

    #[error("Malformed grade {0:?}, expected SEMESTER=SGPA or SEMESTER=SGPA:CREDITS")]
    MalformedGrade(String),

    #[error("SGPA for {semester} must be between 0 and 10, got {value}")]
    SgpaOutOfRange { semester: String, value: f64 },

    #[error("Credits for {semester} must be positive, got {value}")]
    InvalidCredits { semester: String, value: f64 },

    #[error("No standard credits for {0}; pass them explicitly")]
    UnknownSemester(String),

    #[error("Semester {0} appears more than once")]
    DuplicateSemester(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("Subject {0} not found")]
    SubjectNotFound(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),
}
