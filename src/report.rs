use std::fmt::Write;

use chrono::NaiveDate;

use crate::metrics::{self, SectionPrecision, Threshold};
use crate::models::{SectionStudent, SectionSummary, StudentStats};

pub fn summarize_section(
    section: i32,
    stats: &[StudentStats],
    threshold: Threshold,
) -> SectionSummary {
    let student_count = stats.len();
    let average_percentage = if student_count == 0 {
        0.0
    } else {
        stats.iter().map(|s| s.percentage).sum::<f64>() / student_count as f64
    };
    let below_threshold = stats
        .iter()
        .filter(|s| !threshold.is_met(s.total_attended, s.total_effective))
        .count();

    SectionSummary {
        section,
        student_count,
        average_percentage: metrics::round_to(average_percentage, 2),
        below_threshold,
    }
}

pub fn build_report(
    section: i32,
    threshold: Threshold,
    generated_on: NaiveDate,
    students: &[SectionStudent],
) -> String {
    let mut stats = metrics::aggregate_section_stats(students, SectionPrecision::default());
    let summary = summarize_section(section, &stats, threshold);
    stats.sort_by(|a, b| {
        a.percentage
            .partial_cmp(&b.percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.roll_number.cmp(&b.roll_number))
    });

    let mut output = String::new();

    let _ = writeln!(output, "# Section Attendance Report");
    let _ = writeln!(
        output,
        "Generated for section {} on {} (threshold {})",
        summary.section, generated_on, threshold
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Students: {}", summary.student_count);
    let _ = writeln!(
        output,
        "- Average attendance: {:.2}%",
        summary.average_percentage
    );
    let _ = writeln!(output, "- Below threshold: {}", summary.below_threshold);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students");

    if stats.is_empty() {
        let _ = writeln!(output, "No students registered in this section.");
    } else {
        let _ = writeln!(output, "| Roll | Student | Attended | Held | Attendance |");
        let _ = writeln!(output, "|---|---|---|---|---|");
        for student in &stats {
            let roll = student
                .roll_number
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {:.2}% |",
                roll,
                student.username,
                student.total_attended,
                student.total_effective,
                student.percentage
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## At Risk");

    let at_risk: Vec<&StudentStats> = stats
        .iter()
        .filter(|s| !threshold.is_met(s.total_attended, s.total_effective))
        .collect();

    if at_risk.is_empty() {
        let _ = writeln!(output, "No students below threshold.");
    } else {
        for student in at_risk {
            let shortfalls = shortfall_notes(students, student, threshold);
            let _ = writeln!(
                output,
                "- {} at {:.2}%: {}",
                student.username,
                student.percentage,
                if shortfalls.is_empty() {
                    "no subject-level shortfall".to_string()
                } else {
                    shortfalls.join(", ")
                }
            );
        }
    }

    output
}

fn shortfall_notes(
    students: &[SectionStudent],
    stats: &StudentStats,
    threshold: Threshold,
) -> Vec<String> {
    let Some(student) = students.iter().find(|s| s.id == stats.id) else {
        return Vec::new();
    };

    student
        .subjects
        .iter()
        .map(|subject| metrics::subject_status(subject, threshold))
        .filter(|status| status.classes_needed > 0)
        .map(|status| {
            let plural = if status.classes_needed == 1 { "" } else { "es" };
            format!(
                "{} needs {} class{}",
                status.row.name, status.classes_needed, plural
            )
        })
        .collect()
}
