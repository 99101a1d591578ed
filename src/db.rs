use std::collections::HashMap;

use anyhow::Context;
use serde::Deserialize;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::input::{section_for_roll, AttendanceMark, Registration, SubjectInput};
use crate::metrics::semester_index;
use crate::models::{AcademicRecord, NewAcademicRecord, SectionStudent, SubjectRecord, User};

pub const DEFAULT_SUBJECTS: [&str; 5] = [
    "Mathematics",
    "Physics",
    "Chemistry",
    "Programming",
    "English",
];

const SUBJECT_COLUMNS: &str =
    "id, user_id, name, total_classes, attended_classes, canceled_classes";

const USER_COLUMNS: &str = "id, username, email, roll_number, section";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "avery",
            "avery.lee@example.com",
            4,
            vec![("Mathematics", 40, 28, 0), ("Physics", 36, 33, 2)],
            vec![("S1", 19.5, 8.0), ("S2", 19.5, 9.0)],
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "jules",
            "jules.moreno@example.com",
            17,
            vec![("Mathematics", 50, 45, 5), ("Chemistry", 30, 19, 0)],
            vec![("S1", 19.5, 7.4), ("S2", 19.5, 7.9), ("S3", 21.5, 8.1)],
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "kiara",
            "kiara.patel@example.com",
            63,
            vec![("Programming", 24, 23, 1), ("English", 20, 12, 0)],
            vec![("S1", 19.5, 9.2)],
        ),
    ];

    for (id, username, email, roll_number, subjects, grades) in students {
        let user_id: Uuid = sqlx::query(
            r#"
            INSERT INTO attendance_tracker.users (id, username, email, roll_number, section, role)
            VALUES ($1, $2, $3, $4, $5, 'STUDENT')
            ON CONFLICT (username) DO UPDATE
            SET email = EXCLUDED.email
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(email)
        .bind(roll_number)
        .bind(section_for_roll(roll_number))
        .fetch_one(pool)
        .await?
        .get("id");

        for (name, total, attended, canceled) in subjects {
            sqlx::query(
                r#"
                INSERT INTO attendance_tracker.subjects
                (id, user_id, name, total_classes, attended_classes, canceled_classes)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (user_id, name) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(name)
            .bind(total)
            .bind(attended)
            .bind(canceled)
            .execute(pool)
            .await?;
        }

        for (semester, credits, sgpa) in grades {
            sqlx::query(
                r#"
                INSERT INTO attendance_tracker.academic_records
                (id, user_id, semester, credits, sgpa)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (user_id, semester) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(semester)
            .bind(credits)
            .bind(sgpa)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

/// Creates a student and their default subjects atomically.
pub async fn register_student(pool: &PgPool, registration: &Registration) -> anyhow::Result<User> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        r#"
        SELECT username, email, roll_number
        FROM attendance_tracker.users
        WHERE username = $1 OR email = $2 OR roll_number = $3
        LIMIT 1
        "#,
    )
    .bind(&registration.username)
    .bind(&registration.email)
    .bind(registration.roll_number)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = existing {
        return Err(identity_conflict(registration, row.get("roll_number")).into());
    }

    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO attendance_tracker.users (id, username, email, roll_number, section, role)
        VALUES ($1, $2, $3, $4, $5, 'STUDENT')
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(&registration.username)
    .bind(&registration.email)
    .bind(registration.roll_number)
    .bind(registration.section())
    .fetch_one(&mut *tx)
    .await?;

    for name in DEFAULT_SUBJECTS {
        sqlx::query(
            r#"
            INSERT INTO attendance_tracker.subjects (id, user_id, name)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(name)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!(
        "Registered {} in section {:?} with {} subjects",
        user.username,
        user.section,
        DEFAULT_SUBJECTS.len()
    );

    Ok(user)
}

fn identity_conflict(registration: &Registration, taken_roll: Option<i32>) -> StoreError {
    if taken_roll == Some(registration.roll_number) {
        StoreError::Conflict(format!(
            "roll number {} already registered",
            registration.roll_number
        ))
    } else {
        StoreError::Conflict(format!(
            "username {} or email {} already exists",
            registration.username, registration.email
        ))
    }
}

pub async fn find_user(pool: &PgPool, username: &str) -> anyhow::Result<User> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM attendance_tracker.users WHERE username = $1"
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;

    user.ok_or_else(|| StoreError::UserNotFound(username.to_string()).into())
}

pub async fn list_sections(pool: &PgPool) -> anyhow::Result<Vec<i32>> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT section
        FROM attendance_tracker.users
        WHERE role = 'STUDENT' AND section IS NOT NULL
        ORDER BY section ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|row| row.get("section")).collect())
}

pub async fn list_subjects(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<SubjectRecord>> {
    let subjects = sqlx::query_as::<_, SubjectRecord>(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM attendance_tracker.subjects WHERE user_id = $1 ORDER BY name"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    debug!("Fetched {} subjects for {user_id}", subjects.len());
    Ok(subjects)
}

pub async fn create_subject(
    pool: &PgPool,
    user_id: Uuid,
    input: &SubjectInput,
) -> anyhow::Result<SubjectRecord> {
    let subject = sqlx::query_as::<_, SubjectRecord>(&format!(
        r#"
        INSERT INTO attendance_tracker.subjects
        (id, user_id, name, total_classes, attended_classes, canceled_classes)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (user_id, name) DO NOTHING
        RETURNING {SUBJECT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(&input.name)
    .bind(input.total)
    .bind(input.attended)
    .bind(input.canceled)
    .fetch_optional(pool)
    .await?;

    subject.ok_or_else(|| {
        StoreError::Conflict(format!("subject {} already exists", input.name)).into()
    })
}

pub async fn update_subject(
    pool: &PgPool,
    user_id: Uuid,
    subject_id: Uuid,
    input: &SubjectInput,
) -> anyhow::Result<SubjectRecord> {
    let subject = sqlx::query_as::<_, SubjectRecord>(&format!(
        r#"
        UPDATE attendance_tracker.subjects
        SET name = $3, total_classes = $4, attended_classes = $5, canceled_classes = $6
        WHERE id = $1 AND user_id = $2
        RETURNING {SUBJECT_COLUMNS}
        "#
    ))
    .bind(subject_id)
    .bind(user_id)
    .bind(&input.name)
    .bind(input.total)
    .bind(input.attended)
    .bind(input.canceled)
    .fetch_optional(pool)
    .await?;

    subject.ok_or_else(|| StoreError::SubjectNotFound(subject_id).into())
}

/// Applies one attendance mark as a single statement so concurrent marks
/// are never lost.
pub async fn increment_subject(
    pool: &PgPool,
    user_id: Uuid,
    subject_id: Uuid,
    mark: AttendanceMark,
) -> anyhow::Result<SubjectRecord> {
    let subject = sqlx::query_as::<_, SubjectRecord>(&format!(
        r#"
        UPDATE attendance_tracker.subjects
        SET {}
        WHERE id = $1 AND user_id = $2
        RETURNING {SUBJECT_COLUMNS}
        "#,
        mark.increments()
    ))
    .bind(subject_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    subject.ok_or_else(|| StoreError::SubjectNotFound(subject_id).into())
}

pub async fn delete_subject(pool: &PgPool, user_id: Uuid, subject_id: Uuid) -> anyhow::Result<()> {
    let result =
        sqlx::query("DELETE FROM attendance_tracker.subjects WHERE id = $1 AND user_id = $2")
            .bind(subject_id)
            .bind(user_id)
            .execute(pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::SubjectNotFound(subject_id).into());
    }

    Ok(())
}

/// Replaces every academic record of a user. Readers never observe the empty
/// state between the delete and the inserts.
pub async fn replace_academic_records(
    pool: &PgPool,
    user_id: Uuid,
    records: &[NewAcademicRecord],
) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;

    let removed = sqlx::query("DELETE FROM attendance_tracker.academic_records WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    for record in records {
        sqlx::query(
            r#"
            INSERT INTO attendance_tracker.academic_records
            (id, user_id, semester, credits, sgpa)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&record.semester)
        .bind(record.credits)
        .bind(record.sgpa)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    debug!(
        "Replaced {removed} academic records with {} for {user_id}",
        records.len()
    );

    Ok(records.len())
}

pub async fn list_academic_records(
    pool: &PgPool,
    user_id: Uuid,
) -> anyhow::Result<Vec<AcademicRecord>> {
    let mut records = sqlx::query_as::<_, AcademicRecord>(
        r#"
        SELECT semester, credits, sgpa, updated_at
        FROM attendance_tracker.academic_records
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    sort_by_semester(&mut records);
    Ok(records)
}

fn sort_by_semester(records: &mut [AcademicRecord]) {
    records.sort_by(|a, b| {
        let key_a = semester_index(&a.semester).unwrap_or(usize::MAX);
        let key_b = semester_index(&b.semester).unwrap_or(usize::MAX);
        key_a.cmp(&key_b).then_with(|| a.semester.cmp(&b.semester))
    });
}

pub async fn fetch_section_students(
    pool: &PgPool,
    section: i32,
) -> anyhow::Result<Vec<SectionStudent>> {
    let students = sqlx::query(
        r#"
        SELECT id, username, roll_number
        FROM attendance_tracker.users
        WHERE role = 'STUDENT' AND section = $1
        ORDER BY roll_number ASC
        "#,
    )
    .bind(section)
    .fetch_all(pool)
    .await?;

    let ids: Vec<Uuid> = students.iter().map(|row| row.get("id")).collect();
    let subjects = sqlx::query_as::<_, SubjectRecord>(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM attendance_tracker.subjects WHERE user_id = ANY($1) ORDER BY name"
    ))
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut by_owner: HashMap<Uuid, Vec<SubjectRecord>> = HashMap::new();
    for subject in subjects {
        by_owner.entry(subject.user_id).or_default().push(subject);
    }

    let mut result = Vec::with_capacity(students.len());
    for row in students {
        let id: Uuid = row.get("id");
        result.push(SectionStudent {
            id,
            username: row.get("username"),
            roll_number: row.get("roll_number"),
            subjects: by_owner.remove(&id).unwrap_or_default(),
        });
    }

    Ok(result)
}

#[derive(Debug, Deserialize)]
pub struct ImportRow {
    pub username: String,
    pub email: String,
    pub roll_number: i32,
    pub subject: String,
    pub total_classes: i32,
    pub attended_classes: i32,
    pub canceled_classes: i32,
}

pub fn read_import_rows<R: std::io::Read>(
    reader: R,
) -> anyhow::Result<Vec<(Registration, SubjectInput)>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    let mut owners = ImportOwners::default();

    for (index, result) in reader.deserialize::<ImportRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("malformed CSV row on line {line}"))?;

        let registration = Registration {
            username: row.username,
            email: row.email,
            roll_number: row.roll_number,
        }
        .validate()
        .with_context(|| format!("invalid student on line {line}"))?;

        let subject = SubjectInput {
            name: row.subject,
            total: row.total_classes,
            attended: row.attended_classes,
            canceled: row.canceled_classes,
        }
        .validate()
        .with_context(|| format!("invalid subject on line {line}"))?;

        if let Some(first) = owners.check(&registration, line) {
            anyhow::bail!(
                "line {line}: {} conflicts with {} on line {first}",
                registration.username,
                owners.names[&first]
            );
        }

        rows.push((registration, subject));
    }

    Ok(rows)
}

// One identity per username, email and roll number within an import file.
#[derive(Default)]
struct ImportOwners {
    names: HashMap<usize, String>,
    by_username: HashMap<String, (usize, String, i32)>,
    by_email: HashMap<String, usize>,
    by_roll: HashMap<i32, usize>,
}

impl ImportOwners {
    fn check(&mut self, registration: &Registration, line: usize) -> Option<usize> {
        if let Some((first, email, roll)) = self.by_username.get(&registration.username) {
            if *email != registration.email || *roll != registration.roll_number {
                return Some(*first);
            }
            return None;
        }

        if let Some(first) = self
            .by_email
            .get(&registration.email)
            .or_else(|| self.by_roll.get(&registration.roll_number))
        {
            return Some(*first);
        }

        self.names.insert(line, registration.username.clone());
        self.by_username.insert(
            registration.username.clone(),
            (line, registration.email.clone(), registration.roll_number),
        );
        self.by_email.insert(registration.email.clone(), line);
        self.by_roll.insert(registration.roll_number, line);
        None
    }
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = read_import_rows(file)?;
    let mut written = 0usize;
    let mut tx = pool.begin().await?;

    for (student, subject) in rows {
        let taken = sqlx::query(
            r#"
            SELECT roll_number
            FROM attendance_tracker.users
            WHERE username <> $1 AND (email = $2 OR roll_number = $3)
            LIMIT 1
            "#,
        )
        .bind(&student.username)
        .bind(&student.email)
        .bind(student.roll_number)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = taken {
            return Err(identity_conflict(&student, row.get("roll_number")).into());
        }

        let user_id: Uuid = sqlx::query(
            r#"
            INSERT INTO attendance_tracker.users
            (id, username, email, roll_number, section, role)
            VALUES ($1, $2, $3, $4, $5, 'STUDENT')
            ON CONFLICT (username) DO UPDATE
            SET email = EXCLUDED.email,
                roll_number = EXCLUDED.roll_number,
                section = EXCLUDED.section
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&student.username)
        .bind(&student.email)
        .bind(student.roll_number)
        .bind(student.section())
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to upsert student {}", student.username))?
        .get("id");

        let result = sqlx::query(
            r#"
            INSERT INTO attendance_tracker.subjects AS s
            (id, user_id, name, total_classes, attended_classes, canceled_classes)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, name) DO UPDATE
            SET total_classes = EXCLUDED.total_classes,
                attended_classes = EXCLUDED.attended_classes,
                canceled_classes = EXCLUDED.canceled_classes
            WHERE (s.total_classes, s.attended_classes, s.canceled_classes)
                IS DISTINCT FROM
                (EXCLUDED.total_classes, EXCLUDED.attended_classes, EXCLUDED.canceled_classes)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&subject.name)
        .bind(subject.total)
        .bind(subject.attended)
        .bind(subject.canceled)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            written += 1;
        } else {
            debug!("No change for {} / {}", student.username, subject.name);
        }
    }

    tx.commit().await?;
    info!("Imported {written} changed subjects from {}", csv_path.display());
    Ok(written)
}
