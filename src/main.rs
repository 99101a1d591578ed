use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

mod config;
mod db;
mod error;
mod input;
mod metrics;
mod models;
mod report;

use config::Config;
use input::{AttendanceMark, GradeInput, Registration, SubjectInput};
use metrics::{DisplayPrecision, SectionPrecision, Threshold};

#[derive(Parser)]
#[command(name = "attendance-tracker")]
#[command(about = "Student attendance and CGPA tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import students and subject counts from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Register a student with the default subjects
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        roll_number: i32,
    },
    /// Manage a student's subjects
    #[command(subcommand)]
    Subjects(SubjectCommands),
    /// Show or save semester grades
    #[command(subcommand)]
    Cgpa(CgpaCommands),
    /// List sections that have students
    Sections,
    /// Attendance of every student in a section
    Section {
        #[arg(long)]
        id: i32,
        /// Decimals for the per-subject percentages (1 or 2)
        #[arg(long, default_value = "1")]
        subject_precision: DisplayPrecision,
        /// Decimals for the per-student percentage (1 or 2)
        #[arg(long, default_value = "2")]
        cohort_precision: DisplayPrecision,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report for a section
    Report {
        #[arg(long)]
        section: i32,
        /// Required attendance percentage, overrides ATTENDANCE_THRESHOLD
        #[arg(long)]
        threshold: Option<Threshold>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum SubjectCommands {
    /// List subjects with their attendance metrics
    List {
        #[arg(long)]
        user: String,
        /// Required attendance percentage, overrides ATTENDANCE_THRESHOLD
        #[arg(long)]
        threshold: Option<Threshold>,
        #[arg(long)]
        json: bool,
    },
    /// Add a subject
    Add {
        #[arg(long)]
        user: String,
        #[command(flatten)]
        counts: SubjectArgs,
    },
    /// Replace a subject's name and counts
    Edit {
        #[arg(long)]
        user: String,
        #[arg(long)]
        id: Uuid,
        #[command(flatten)]
        counts: SubjectArgs,
    },
    /// Record one attended, absent or canceled class
    Mark {
        #[arg(long)]
        user: String,
        #[arg(long)]
        id: Uuid,
        #[arg(long, value_enum)]
        kind: AttendanceMark,
    },
    /// Delete a subject
    Delete {
        #[arg(long)]
        user: String,
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Args)]
struct SubjectArgs {
    #[arg(long)]
    name: String,
    #[arg(long, default_value_t = 0)]
    total: i32,
    #[arg(long, default_value_t = 0)]
    attended: i32,
    #[arg(long, default_value_t = 0)]
    canceled: i32,
}

impl From<SubjectArgs> for SubjectInput {
    fn from(args: SubjectArgs) -> Self {
        SubjectInput {
            name: args.name,
            total: args.total,
            attended: args.attended,
            canceled: args.canceled,
        }
    }
}

#[derive(Subcommand)]
enum CgpaCommands {
    /// Show the CGPA computed from the saved semesters
    Show {
        #[arg(long)]
        user: String,
        #[arg(long)]
        json: bool,
    },
    /// Replace all saved semesters, e.g. --grade S1=8.2 --grade S9=7.5:20
    Save {
        #[arg(long)]
        user: String,
        #[arg(long = "grade", required = true)]
        grades: Vec<GradeInput>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    info!("Connected to Postgres");

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let written = db::import_csv(&pool, &csv).await?;
            println!("Imported {written} subjects from {}.", csv.display());
        }
        Commands::Register {
            username,
            email,
            roll_number,
        } => {
            let registration = Registration {
                username,
                email,
                roll_number,
            }
            .validate()?;
            let user = db::register_student(&pool, &registration).await?;
            println!(
                "Registered {} <{}> (roll {}) in section {}.",
                user.username,
                user.email,
                user.roll_number.unwrap_or(registration.roll_number),
                user.section.unwrap_or_else(|| registration.section())
            );
        }
        Commands::Subjects(command) => run_subject_command(&pool, &config, command).await?,
        Commands::Cgpa(command) => run_cgpa_command(&pool, command).await?,
        Commands::Sections => {
            let sections = db::list_sections(&pool).await?;
            if sections.is_empty() {
                println!("No sections found.");
            }
            for section in sections {
                println!("Section {section}");
            }
        }
        Commands::Section {
            id,
            subject_precision,
            cohort_precision,
            json,
        } => {
            let students = db::fetch_section_students(&pool, id).await?;
            let precision = SectionPrecision {
                cohort: cohort_precision,
                subject: subject_precision,
            };
            let stats = metrics::aggregate_section_stats(&students, precision);

            if json {
                print_json(&stats)?;
            } else if stats.is_empty() {
                println!("No students in section {id}.");
            } else {
                for student in &stats {
                    let roll = student
                        .roll_number
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "- {} (roll {}) {}% across {} subjects",
                        student.username,
                        roll,
                        student.percentage,
                        student.subjects.len()
                    );
                }
            }
        }
        Commands::Report {
            section,
            threshold,
            out,
        } => {
            let threshold = threshold.unwrap_or(config.threshold);
            let students = db::fetch_section_students(&pool, section).await?;
            let report = report::build_report(
                section,
                threshold,
                chrono::Utc::now().date_naive(),
                &students,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn run_subject_command(
    pool: &sqlx::PgPool,
    config: &Config,
    command: SubjectCommands,
) -> anyhow::Result<()> {
    match command {
        SubjectCommands::List {
            user,
            threshold,
            json,
        } => {
            let threshold = threshold.unwrap_or(config.threshold);
            let user = db::find_user(pool, &user).await?;
            let subjects = db::list_subjects(pool, user.id).await?;
            let statuses: Vec<_> = subjects
                .iter()
                .map(|subject| metrics::subject_status(subject, threshold))
                .collect();

            if json {
                return print_json(&statuses);
            }
            if statuses.is_empty() {
                println!("No subjects added yet for {}.", user.username);
                return Ok(());
            }

            println!("Subjects for {} (threshold {}):", user.username, threshold);
            for status in &statuses {
                let outlook = if status.below_threshold {
                    format!("attend {} more to reach the threshold", status.classes_needed)
                } else {
                    format!("can miss {}", status.safe_misses)
                };
                println!(
                    "- {} [{}] {}/{} attended ({} canceled) {:.2}%, {}",
                    status.row.name,
                    status.row.id,
                    status.row.attended,
                    status.effective_total,
                    status.row.canceled,
                    status.row.percentage,
                    outlook
                );
            }
        }
        SubjectCommands::Add { user, counts } => {
            let input = SubjectInput::from(counts).validate()?;
            let user = db::find_user(pool, &user).await?;
            let subject = db::create_subject(pool, user.id, &input).await?;
            println!("Added {} [{}].", subject.name, subject.id);
        }
        SubjectCommands::Edit { user, id, counts } => {
            let input = SubjectInput::from(counts).validate()?;
            let user = db::find_user(pool, &user).await?;
            let subject = db::update_subject(pool, user.id, id, &input).await?;
            println!(
                "Updated {}: {}% attendance.",
                subject.name,
                metrics::attendance_percentage(&subject.counts())
            );
        }
        SubjectCommands::Mark { user, id, kind } => {
            let user = db::find_user(pool, &user).await?;
            let subject = db::increment_subject(pool, user.id, id, kind).await?;
            println!(
                "{}: {}/{} attended, {}% attendance.",
                subject.name,
                subject.attended_classes,
                metrics::effective_total(&subject.counts()),
                metrics::attendance_percentage(&subject.counts())
            );
        }
        SubjectCommands::Delete { user, id } => {
            let user = db::find_user(pool, &user).await?;
            db::delete_subject(pool, user.id, id).await?;
            println!("Subject removed.");
        }
    }

    Ok(())
}

async fn run_cgpa_command(pool: &sqlx::PgPool, command: CgpaCommands) -> anyhow::Result<()> {
    match command {
        CgpaCommands::Show { user, json } => {
            let user = db::find_user(pool, &user).await?;
            let records = db::list_academic_records(pool, user.id).await?;
            let grades: Vec<_> = records.iter().map(|record| record.grade()).collect();
            let summary = metrics::cgpa_summary(&grades);

            if json {
                return print_json(&summary);
            }

            for record in &records {
                println!(
                    "- {}: SGPA {:.2} over {} credits (saved {})",
                    record.semester,
                    record.sgpa,
                    record.credits,
                    record.updated_at.format("%Y-%m-%d")
                );
            }
            match summary.cgpa {
                Some(cgpa) => println!(
                    "CGPA {:.2} across {} active semesters.",
                    cgpa, summary.active_semesters
                ),
                None => println!("No graded semesters yet."),
            }
        }
        CgpaCommands::Save { user, grades } => {
            let records = input::resolve_grades(grades)?;
            let user = db::find_user(pool, &user).await?;
            let saved = db::replace_academic_records(pool, user.id, &records).await?;
            let grades: Vec<_> = records
                .iter()
                .map(|record| models::GradeEntry {
                    credits: record.credits,
                    sgpa: Some(record.sgpa),
                })
                .collect();

            match metrics::cgpa(&grades) {
                Some(cgpa) => println!("Saved {saved} semesters, CGPA {cgpa:.2}."),
                None => println!("Saved {saved} semesters, no graded semesters yet."),
            }
        }
    }

    Ok(())
}
