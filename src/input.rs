use std::{collections::HashSet, str::FromStr};

use clap::ValueEnum;

use crate::error::InputError;
use crate::metrics::{parse_grade_value, standard_credits};
use crate::models::NewAcademicRecord;

pub const ROLLS_PER_SECTION: i32 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectInput {
    pub name: String,
    pub total: i32,
    pub attended: i32,
    pub canceled: i32,
}

impl SubjectInput {
    pub fn validate(self) -> Result<Self, InputError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(InputError::EmptyName);
        }

        for (field, value) in [
            ("total classes", self.total),
            ("attended classes", self.attended),
            ("canceled classes", self.canceled),
        ] {
            if value < 0 {
                return Err(InputError::NegativeCount {
                    field,
                    value: i64::from(value),
                });
            }
        }

        let (total, attended, canceled) = (
            i64::from(self.total),
            i64::from(self.attended),
            i64::from(self.canceled),
        );
        if attended + canceled > total {
            return Err(InputError::CountsExceedTotal {
                total,
                attended,
                canceled,
            });
        }

        Ok(Self { name, ..self })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AttendanceMark {
    Attended,
    Absent,
    Canceled,
}

impl AttendanceMark {
    // Attended and canceled also bump total_classes, unlike a bare per-column
    // counter, so attended + canceled <= total survives repeated marks.
    pub fn increments(self) -> &'static str {
        match self {
            AttendanceMark::Attended => {
                "total_classes = total_classes + 1, attended_classes = attended_classes + 1"
            }
            AttendanceMark::Absent => "total_classes = total_classes + 1",
            AttendanceMark::Canceled => {
                "total_classes = total_classes + 1, canceled_classes = canceled_classes + 1"
            }
        }
    }
}

/// A semester grade as typed on the command line: `S1=8.2` or `S1=8.2:19.5`.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeInput {
    pub semester: String,
    pub sgpa: f64,
    pub credits: Option<f64>,
}

impl FromStr for GradeInput {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || InputError::MalformedGrade(s.to_string());

        let (semester, value) = s.split_once('=').ok_or_else(malformed)?;
        let semester = semester.trim();
        if semester.is_empty() {
            return Err(malformed());
        }

        let (sgpa, credits) = match value.split_once(':') {
            Some((sgpa, credits)) => {
                let credits = parse_grade_value(credits).ok_or_else(malformed)?;
                (sgpa, Some(credits))
            }
            None => (value, None),
        };
        let sgpa = parse_grade_value(sgpa).ok_or_else(malformed)?;

        Ok(Self {
            semester: semester.to_uppercase(),
            sgpa,
            credits,
        })
    }
}

impl GradeInput {
    pub fn resolve(self) -> Result<NewAcademicRecord, InputError> {
        if !(0.0..=10.0).contains(&self.sgpa) {
            return Err(InputError::SgpaOutOfRange {
                semester: self.semester,
                value: self.sgpa,
            });
        }

        let credits = match self.credits {
            Some(credits) => credits,
            None => standard_credits(&self.semester)
                .ok_or_else(|| InputError::UnknownSemester(self.semester.clone()))?,
        };
        if credits <= 0.0 {
            return Err(InputError::InvalidCredits {
                semester: self.semester,
                value: credits,
            });
        }

        Ok(NewAcademicRecord {
            semester: self.semester,
            credits,
            sgpa: self.sgpa,
        })
    }
}

pub fn resolve_grades(grades: Vec<GradeInput>) -> Result<Vec<NewAcademicRecord>, InputError> {
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(grades.len());

    for grade in grades {
        if !seen.insert(grade.semester.clone()) {
            return Err(InputError::DuplicateSemester(grade.semester));
        }
        records.push(grade.resolve()?);
    }

    Ok(records)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub roll_number: i32,
}

impl Registration {
    pub fn validate(self) -> Result<Self, InputError> {
        let username = self.username.trim().to_string();
        if username.is_empty() {
            return Err(InputError::EmptyUsername);
        }

        let email = self.email.trim().to_lowercase();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => return Err(InputError::InvalidEmail(self.email)),
        }

        if self.roll_number < 1 {
            return Err(InputError::InvalidRollNumber(i64::from(self.roll_number)));
        }

        Ok(Self {
            username,
            email,
            roll_number: self.roll_number,
        })
    }

    pub fn section(&self) -> i32 {
        section_for_roll(self.roll_number)
    }
}

pub fn section_for_roll(roll_number: i32) -> i32 {
    (roll_number + ROLLS_PER_SECTION - 1) / ROLLS_PER_SECTION
}
