use std::{fmt, str::FromStr};

use crate::error::MetricsError;
use crate::models::{
    AttendanceCounts, CgpaSummary, GradeEntry, SectionStudent, StudentStats, SubjectRecord,
    SubjectRow, SubjectStatus,
};

pub const DEFAULT_THRESHOLD: f64 = 0.75;

/// Credits of the eight standard semesters, `S1` first.
pub const STANDARD_CREDITS: [f64; 8] = [19.5, 19.5, 21.5, 21.5, 21.5, 21.5, 23.0, 12.0];

// Thresholds are held in parts per million so ratio checks stay in integers.
const PPM: i64 = 1_000_000;
const MIN_THRESHOLD_PPM: i64 = 10_000;
const MAX_THRESHOLD_PPM: i64 = 990_000;

/// Minimum attendance ratio, between 1% and 99%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold(i64);

impl Threshold {
    pub fn new(ratio: f64) -> Result<Self, MetricsError> {
        let invalid = || MetricsError::InvalidThreshold(format!("{}%", ratio * 100.0));
        if !ratio.is_finite() {
            return Err(invalid());
        }

        let ppm = (ratio * PPM as f64).round();
        if ppm < MIN_THRESHOLD_PPM as f64 || ppm > MAX_THRESHOLD_PPM as f64 {
            return Err(invalid());
        }
        Ok(Self(ppm as i64))
    }

    pub fn from_percent(percent: f64) -> Result<Self, MetricsError> {
        Self::new(percent / 100.0)
    }

    pub fn ratio(self) -> f64 {
        self.0 as f64 / PPM as f64
    }

    pub fn percent(self) -> f64 {
        round_to(self.0 as f64 / 10_000.0, 2)
    }

    pub fn is_met(self, attended: i64, effective: i64) -> bool {
        effective > 0 && i128::from(attended) * i128::from(PPM) >= self.scaled(effective)
    }

    fn scaled(self, classes: i64) -> i128 {
        i128::from(self.0) * i128::from(classes)
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self((DEFAULT_THRESHOLD * PPM as f64) as i64)
    }
}

/// Parses a percentage such as `75` or `72.5%`.
impl FromStr for Threshold {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('%').trim();
        let percent: f64 = trimmed
            .parse()
            .map_err(|_| MetricsError::InvalidThreshold(s.to_string()))?;
        Self::from_percent(percent)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayPrecision {
    One,
    Two,
}

impl DisplayPrecision {
    pub fn decimals(self) -> i32 {
        match self {
            DisplayPrecision::One => 1,
            DisplayPrecision::Two => 2,
        }
    }

    pub fn round(self, value: f64) -> f64 {
        round_to(value, self.decimals())
    }
}

impl FromStr for DisplayPrecision {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(DisplayPrecision::One),
            "2" => Ok(DisplayPrecision::Two),
            other => Err(MetricsError::InvalidPrecision(other.to_string())),
        }
    }
}

/// Rounding rules of the section view. The cohort figure and the per-subject
/// rows have always used different precisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionPrecision {
    pub cohort: DisplayPrecision,
    pub subject: DisplayPrecision,
}

impl Default for SectionPrecision {
    fn default() -> Self {
        Self {
            cohort: DisplayPrecision::Two,
            subject: DisplayPrecision::One,
        }
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn clamped(counts: &AttendanceCounts) -> AttendanceCounts {
    AttendanceCounts {
        total: counts.total.max(0),
        attended: counts.attended.max(0),
        canceled: counts.canceled.max(0),
    }
}

pub fn effective_total(counts: &AttendanceCounts) -> i64 {
    let counts = clamped(counts);
    (counts.total - counts.canceled).max(0)
}

fn ratio_percent(attended: i64, effective: i64) -> f64 {
    if effective <= 0 {
        return 0.0;
    }
    attended as f64 / effective as f64 * 100.0
}

pub fn attendance_percentage(counts: &AttendanceCounts) -> f64 {
    let attended = clamped(counts).attended;
    round_to(ratio_percent(attended, effective_total(counts)), 2)
}

/// Smallest number of consecutive attended classes that lifts the ratio to
/// `threshold`. Zero when nothing has been held yet or the ratio already
/// meets it.
pub fn classes_needed_for_threshold(counts: &AttendanceCounts, threshold: Threshold) -> u64 {
    let attended = clamped(counts).attended;
    let effective = effective_total(counts);
    if effective == 0 {
        return 0;
    }

    // (A + X) * PPM >= t * (E + X)  <=>  X * (PPM - t) >= t * E - A * PPM
    let shortfall = threshold.scaled(effective) - i128::from(attended) * i128::from(PPM);
    if shortfall <= 0 {
        return 0;
    }
    let step = i128::from(PPM - threshold.0);
    saturate((shortfall + step - 1) / step)
}

pub fn safe_miss_buffer(counts: &AttendanceCounts, threshold: Threshold) -> u64 {
    let attended = clamped(counts).attended;
    let effective = effective_total(counts);

    // A * PPM >= t * (E + Y)  <=>  Y <= (A * PPM - t * E) / t
    let surplus = i128::from(attended) * i128::from(PPM) - threshold.scaled(effective);
    if surplus <= 0 {
        return 0;
    }
    saturate(surplus / i128::from(threshold.0))
}

fn saturate(value: i128) -> u64 {
    u64::try_from(value.max(0)).unwrap_or(u64::MAX)
}

/// Whether the stored counts fall short of `threshold`, judged on the exact
/// ratio rather than the rounded percentage.
pub fn below_threshold(counts: &AttendanceCounts, threshold: Threshold) -> bool {
    !threshold.is_met(clamped(counts).attended, effective_total(counts))
}

/// Credit-weighted mean SGPA over entries with `0 < sgpa <= 10` and positive
/// credits. `None` when no entry qualifies.
pub fn cgpa(grades: &[GradeEntry]) -> Option<f64> {
    let (points, credits, _) = weighted_totals(grades);
    (credits > 0.0).then(|| points / credits)
}

pub fn cgpa_summary(grades: &[GradeEntry]) -> CgpaSummary {
    let (points, credits, count) = weighted_totals(grades);
    if credits > 0.0 {
        CgpaSummary {
            cgpa: Some(points / credits),
            active_semesters: count,
        }
    } else {
        CgpaSummary {
            cgpa: None,
            active_semesters: 0,
        }
    }
}

fn weighted_totals(grades: &[GradeEntry]) -> (f64, f64, usize) {
    grades
        .iter()
        .filter_map(|grade| {
            let sgpa = grade.sgpa?;
            let valid = sgpa.is_finite()
                && sgpa > 0.0
                && sgpa <= 10.0
                && grade.credits.is_finite()
                && grade.credits > 0.0;
            valid.then_some((sgpa, grade.credits))
        })
        .fold((0.0, 0.0, 0), |(points, credits, count), (sgpa, weight)| {
            (points + sgpa * weight, credits + weight, count + 1)
        })
}

pub fn parse_grade_value(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn semester_index(label: &str) -> Option<usize> {
    let digits = label.trim().strip_prefix(|c| c == 'S' || c == 's')?;
    let number: usize = digits.parse().ok()?;
    number.checked_sub(1)
}

pub fn standard_credits(label: &str) -> Option<f64> {
    semester_index(label).and_then(|index| STANDARD_CREDITS.get(index).copied())
}

pub fn subject_row(subject: &SubjectRecord, precision: DisplayPrecision) -> SubjectRow {
    let counts = subject.counts();
    let attended = clamped(&counts).attended;
    SubjectRow {
        id: subject.id,
        name: subject.name.clone(),
        attended: subject.attended_classes,
        total: subject.total_classes,
        canceled: subject.canceled_classes,
        percentage: precision.round(ratio_percent(attended, effective_total(&counts))),
    }
}

pub fn subject_status(subject: &SubjectRecord, threshold: Threshold) -> SubjectStatus {
    let counts = subject.counts();
    let row = subject_row(subject, DisplayPrecision::Two);
    let below = below_threshold(&counts, threshold);

    SubjectStatus {
        effective_total: effective_total(&counts),
        classes_needed: classes_needed_for_threshold(&counts, threshold),
        safe_misses: safe_miss_buffer(&counts, threshold),
        below_threshold: below,
        row,
    }
}

pub fn aggregate_section_stats(
    students: &[SectionStudent],
    precision: SectionPrecision,
) -> Vec<StudentStats> {
    students
        .iter()
        .map(|student| {
            let (total_attended, total_effective) =
                student
                    .subjects
                    .iter()
                    .fold((0i64, 0i64), |(attended, effective), subject| {
                        let counts = subject.counts();
                        (
                            attended + clamped(&counts).attended,
                            effective + effective_total(&counts),
                        )
                    });

            StudentStats {
                id: student.id,
                username: student.username.clone(),
                roll_number: student.roll_number,
                total_attended,
                total_effective,
                percentage: precision
                    .cohort
                    .round(ratio_percent(total_attended, total_effective)),
                subjects: student
                    .subjects
                    .iter()
                    .map(|subject| subject_row(subject, precision.subject))
                    .collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn counts(total: i64, attended: i64, canceled: i64) -> AttendanceCounts {
        AttendanceCounts::new(total, attended, canceled)
    }

    fn subject(name: &str, total: i32, attended: i32, canceled: i32) -> SubjectRecord {
        SubjectRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: name.to_string(),
            total_classes: total,
            attended_classes: attended,
            canceled_classes: canceled,
        }
    }

    fn grade(credits: f64, sgpa: f64) -> GradeEntry {
        GradeEntry {
            credits,
            sgpa: Some(sgpa),
        }
    }

    #[test]
    fn zero_effective_total_yields_zero_percentage() {
        assert_eq!(attendance_percentage(&counts(0, 0, 0)), 0.0);
        assert_eq!(attendance_percentage(&counts(5, 3, 5)), 0.0);
        assert_eq!(attendance_percentage(&counts(5, 3, 9)), 0.0);
        assert_eq!(effective_total(&counts(5, 3, 9)), 0);
    }

    #[test]
    fn negative_counts_are_clamped() {
        assert_eq!(effective_total(&counts(-4, -1, -2)), 0);
        assert_eq!(attendance_percentage(&counts(10, -3, 0)), 0.0);
        assert_eq!(effective_total(&counts(10, 2, -3)), 10);
        assert_eq!(classes_needed_for_threshold(&counts(-1, -1, -1), Threshold::default()), 0);
        assert_eq!(safe_miss_buffer(&counts(-1, -1, -1), Threshold::default()), 0);
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(attendance_percentage(&counts(3, 2, 0)), 66.67);
        assert_eq!(attendance_percentage(&counts(40, 28, 0)), 70.0);
    }

    #[test]
    fn forty_classes_twenty_eight_attended() {
        let c = counts(40, 28, 0);
        let threshold = Threshold::default();
        assert_eq!(effective_total(&c), 40);
        assert_eq!(attendance_percentage(&c), 70.0);
        assert_eq!(classes_needed_for_threshold(&c, threshold), 8);
        assert_eq!(safe_miss_buffer(&c, threshold), 0);
    }

    #[test]
    fn canceled_classes_shrink_the_denominator() {
        let c = counts(50, 45, 5);
        let threshold = Threshold::default();
        assert_eq!(effective_total(&c), 45);
        assert_eq!(attendance_percentage(&c), 100.0);
        assert_eq!(classes_needed_for_threshold(&c, threshold), 0);
        assert_eq!(safe_miss_buffer(&c, threshold), 15);
    }

    #[test]
    fn classes_needed_is_minimal_at_default_threshold() {
        let threshold = Threshold::default();
        for total in 1..=40i64 {
            for canceled in 0..total {
                let effective = total - canceled;
                for attended in 0..=effective {
                    let c = counts(total, attended, canceled);
                    let needed = classes_needed_for_threshold(&c, threshold) as i64;
                    assert!(
                        4 * (attended + needed) >= 3 * (effective + needed),
                        "{c:?} needs {needed}"
                    );
                    if needed > 0 {
                        let fewer = needed - 1;
                        assert!(
                            4 * (attended + fewer) < 3 * (effective + fewer),
                            "{c:?} needs fewer than {needed}"
                        );
                    }
                    if 4 * attended >= 3 * effective {
                        assert_eq!(needed, 0);
                    }
                }
            }
        }
    }

    #[test]
    fn safe_miss_buffer_sits_on_the_boundary() {
        let threshold = Threshold::default();
        for effective in 1..=40i64 {
            for attended in 0..=effective {
                let c = counts(effective, attended, 0);
                let buffer = safe_miss_buffer(&c, threshold) as i64;
                if 4 * attended >= 3 * effective {
                    assert!(4 * attended >= 3 * (effective + buffer), "{c:?} buffer {buffer}");
                    assert!(
                        4 * attended < 3 * (effective + buffer + 1),
                        "{c:?} could miss more than {buffer}"
                    );
                } else {
                    assert_eq!(buffer, 0);
                }
            }
        }
    }

    #[test]
    fn non_default_thresholds_use_exact_boundaries() {
        let eighty = Threshold::from_percent(80.0).unwrap();
        let sixty = Threshold::from_percent(60.0).unwrap();
        for effective in 1..=30i64 {
            for attended in 0..=effective {
                let c = counts(effective, attended, 0);

                let needed = classes_needed_for_threshold(&c, eighty) as i64;
                assert!(5 * (attended + needed) >= 4 * (effective + needed));
                if needed > 0 {
                    assert!(5 * (attended + needed - 1) < 4 * (effective + needed - 1));
                }

                let buffer = safe_miss_buffer(&c, sixty) as i64;
                if 5 * attended >= 3 * effective {
                    assert!(5 * attended >= 3 * (effective + buffer));
                    assert!(5 * attended < 3 * (effective + buffer + 1));
                }
            }
        }
    }

    #[test]
    fn nothing_held_needs_no_classes() {
        assert_eq!(classes_needed_for_threshold(&counts(0, 0, 0), Threshold::default()), 0);
        assert_eq!(safe_miss_buffer(&counts(0, 0, 0), Threshold::default()), 0);
    }

    #[test]
    fn threshold_rejects_out_of_range_values() {
        assert!(Threshold::new(0.0).is_err());
        assert!(Threshold::new(1.0).is_err());
        assert!(Threshold::new(f64::NAN).is_err());
        assert!(Threshold::from_percent(120.0).is_err());
        assert_eq!(Threshold::from_percent(75.0).unwrap(), Threshold::default());
    }

    #[test]
    fn threshold_is_bounded_away_from_the_extremes() {
        assert!("99.99999999999999".parse::<Threshold>().is_err());
        assert!("0.5".parse::<Threshold>().is_err());
        assert!(Threshold::new(0.9999999999999999).is_err());
        assert!(Threshold::new(1e-12).is_err());
        assert_eq!("99".parse::<Threshold>().unwrap().percent(), 99.0);
        assert_eq!("1%".parse::<Threshold>().unwrap().percent(), 1.0);
    }

    #[test]
    fn extreme_thresholds_stay_finite_on_large_counts() {
        let high = Threshold::from_percent(99.0).unwrap();
        let low = Threshold::from_percent(1.0).unwrap();

        let c = counts(2_000_000_000, 1, 0);
        assert_eq!(classes_needed_for_threshold(&c, high), 197_999_999_900);
        assert_eq!(safe_miss_buffer(&c, high), 0);

        assert_eq!(classes_needed_for_threshold(&counts(100, 50, 0), high), 4_900);
        assert_eq!(safe_miss_buffer(&counts(100, 50, 0), low), 4_900);

        let huge = counts(i64::MAX, i64::MAX, 0);
        assert_eq!(classes_needed_for_threshold(&huge, high), 0);
        assert_eq!(safe_miss_buffer(&huge, low), u64::MAX);
    }

    #[test]
    fn threshold_parses_percentages() {
        assert_eq!("75".parse::<Threshold>().unwrap().ratio(), 0.75);
        assert_eq!(" 60% ".parse::<Threshold>().unwrap().ratio(), 0.6);
        assert!("abc".parse::<Threshold>().is_err());
        assert!("100".parse::<Threshold>().is_err());
        assert_eq!(Threshold::default().to_string(), "75%");
    }

    #[test]
    fn cgpa_weights_by_credits() {
        let grades = [grade(19.5, 8.0), grade(19.5, 9.0)];
        let value = cgpa(&grades).unwrap();
        assert!((value - 8.5).abs() < 1e-9);

        let summary = cgpa_summary(&grades);
        assert_eq!(summary.active_semesters, 2);
    }

    #[test]
    fn cgpa_without_valid_records_is_none() {
        assert_eq!(cgpa(&[]), None);
        assert_eq!(cgpa(&[grade(5.0, 0.0)]), None);
        assert_eq!(
            cgpa_summary(&[grade(5.0, 0.0)]),
            CgpaSummary {
                cgpa: None,
                active_semesters: 0
            }
        );
    }

    #[test]
    fn cgpa_skips_out_of_range_and_non_numeric_grades() {
        let grades = [
            grade(21.5, 7.0),
            grade(21.5, 10.5),
            grade(21.5, -1.0),
            grade(0.0, 9.0),
            GradeEntry {
                credits: 23.0,
                sgpa: parse_grade_value("n/a"),
            },
        ];
        let summary = cgpa_summary(&grades);
        assert_eq!(summary.active_semesters, 1);
        assert!((summary.cgpa.unwrap() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn cgpa_serializes_as_two_decimal_string() {
        let summary = cgpa_summary(&[grade(19.5, 8.0), grade(19.5, 9.0)]);
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["cgpa"], "8.50");
        assert_eq!(json["activeSemesters"], 2);

        let empty = serde_json::to_value(cgpa_summary(&[])).unwrap();
        assert!(empty["cgpa"].is_null());
    }

    #[test]
    fn parse_grade_value_handles_text() {
        assert_eq!(parse_grade_value(" 8.25 "), Some(8.25));
        assert_eq!(parse_grade_value(""), None);
        assert_eq!(parse_grade_value("NaN"), None);
        assert_eq!(parse_grade_value("eight"), None);
    }

    #[test]
    fn standard_credits_follow_semester_labels() {
        assert_eq!(standard_credits("S1"), Some(19.5));
        assert_eq!(standard_credits("s7"), Some(23.0));
        assert_eq!(standard_credits("S8"), Some(12.0));
        assert_eq!(standard_credits("S9"), None);
        assert_eq!(standard_credits("S0"), None);
        assert_eq!(standard_credits("Fall"), None);
        assert_eq!(semester_index("S10"), Some(9));
    }

    #[test]
    fn section_stats_use_two_precisions() {
        let student = SectionStudent {
            id: Uuid::new_v4(),
            username: "avery".to_string(),
            roll_number: Some(7),
            subjects: vec![subject("Physics", 30, 20, 2), subject("Chemistry", 10, 9, 0)],
        };

        let stats = aggregate_section_stats(&[student], SectionPrecision::default());
        assert_eq!(stats.len(), 1);
        let row = &stats[0];
        assert_eq!(row.total_attended, 29);
        assert_eq!(row.total_effective, 38);
        assert_eq!(row.percentage, 76.32);
        assert_eq!(row.subjects[0].percentage, 71.4);
        assert_eq!(row.subjects[1].percentage, 90.0);
    }

    #[test]
    fn section_precision_is_configurable() {
        let student = SectionStudent {
            id: Uuid::new_v4(),
            username: "jules".to_string(),
            roll_number: Some(8),
            subjects: vec![subject("Physics", 30, 20, 2)],
        };
        let precision = SectionPrecision {
            cohort: DisplayPrecision::One,
            subject: DisplayPrecision::Two,
        };

        let stats = aggregate_section_stats(&[student], precision);
        assert_eq!(stats[0].percentage, 71.4);
        assert_eq!(stats[0].subjects[0].percentage, 71.43);
        assert!("3".parse::<DisplayPrecision>().is_err());
    }

    #[test]
    fn student_without_subjects_scores_zero() {
        let student = SectionStudent {
            id: Uuid::new_v4(),
            username: "kiara".to_string(),
            roll_number: None,
            subjects: Vec::new(),
        };
        let stats = aggregate_section_stats(&[student], SectionPrecision::default());
        assert_eq!(stats[0].percentage, 0.0);
        assert!(stats[0].subjects.is_empty());
    }

    #[test]
    fn subject_status_flags_shortfall() {
        let status = subject_status(&subject("Maths", 40, 28, 0), Threshold::default());
        assert!(status.below_threshold);
        assert_eq!(status.classes_needed, 8);
        assert_eq!(status.safe_misses, 0);
        assert_eq!(status.row.percentage, 70.0);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["classesNeeded"], 8);
        assert_eq!(json["name"], "Maths");
    }

    #[test]
    fn shortfall_is_judged_on_the_exact_ratio() {
        // 29999 / 40000 rounds to 75.00% but is still short of 75%.
        let status = subject_status(&subject("Maths", 40_000, 29_999, 0), Threshold::default());
        assert_eq!(status.row.percentage, 75.0);
        assert!(status.below_threshold);
        assert_eq!(status.classes_needed, 4);
        assert_eq!(status.safe_misses, 0);

        let two_thirds: Threshold = "66.667".parse().unwrap();
        assert_eq!(two_thirds.percent(), 66.67);
        let status = subject_status(&subject("Physics", 3, 2, 0), two_thirds);
        assert_eq!(status.row.percentage, 66.67);
        assert!(status.below_threshold);
        assert_eq!(status.classes_needed, 1);

        let status = subject_status(&subject("English", 4, 3, 0), Threshold::default());
        assert!(!status.below_threshold);
        assert_eq!(status.classes_needed, 0);
    }
}
