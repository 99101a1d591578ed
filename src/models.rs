use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub roll_number: Option<i32>,
    pub section: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SubjectRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub total_classes: i32,
    pub attended_classes: i32,
    pub canceled_classes: i32,
}

impl SubjectRecord {
    pub fn counts(&self) -> AttendanceCounts {
        AttendanceCounts::new(
            i64::from(self.total_classes),
            i64::from(self.attended_classes),
            i64::from(self.canceled_classes),
        )
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AcademicRecord {
    pub semester: String,
    pub credits: f64,
    pub sgpa: f64,
    pub updated_at: DateTime<Utc>,
}

impl AcademicRecord {
    pub fn grade(&self) -> GradeEntry {
        GradeEntry {
            credits: self.credits,
            sgpa: Some(self.sgpa),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAcademicRecord {
    pub semester: String,
    pub credits: f64,
    pub sgpa: f64,
}

#[derive(Debug, Clone)]
pub struct SectionStudent {
    pub id: Uuid,
    pub username: String,
    pub roll_number: Option<i32>,
    pub subjects: Vec<SubjectRecord>,
}

/// Raw class counts as stored. Values are not trusted to be non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttendanceCounts {
    pub total: i64,
    pub attended: i64,
    pub canceled: i64,
}

impl AttendanceCounts {
    pub fn new(total: i64, attended: i64, canceled: i64) -> Self {
        Self {
            total,
            attended,
            canceled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeEntry {
    pub credits: f64,
    /// `None` when the stored or typed value was not a number.
    pub sgpa: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectRow {
    pub id: Uuid,
    pub name: String,
    pub attended: i32,
    pub total: i32,
    pub canceled: i32,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStatus {
    #[serde(flatten)]
    pub row: SubjectRow,
    pub effective_total: i64,
    pub classes_needed: u64,
    pub safe_misses: u64,
    pub below_threshold: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub id: Uuid,
    pub username: String,
    pub roll_number: Option<i32>,
    pub total_attended: i64,
    pub total_effective: i64,
    pub percentage: f64,
    pub subjects: Vec<SubjectRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CgpaSummary {
    #[serde(serialize_with = "serialize_two_decimals")]
    pub cgpa: Option<f64>,
    pub active_semesters: usize,
}

fn serialize_two_decimals<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(v) => serializer.serialize_str(&format!("{v:.2}")),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone)]
pub struct SectionSummary {
    pub section: i32,
    pub student_count: usize,
    pub average_percentage: f64,
    pub below_threshold: usize,
}
