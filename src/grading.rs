//! Grading-type validation and attendance status codes.
//!
//! Kept free of database concerns so the rules can be exercised directly by
//! tests and reused by every handler that records grades or attendance.

/// Attendance codes in cycle order: none indicated, present, absent, late,
/// expelled, incident.
pub const ATTENDANCE_CYCLE: [&str; 6] = ["N", "P", "A", "R", "E", "I"];

pub fn is_attendance_status(code: &str) -> bool {
    ATTENDANCE_CYCLE.contains(&code)
}

/// Advances one step along the attendance cycle, wrapping after the last
/// code. Anything unrecorded or unrecognized counts as "N", so the first
/// step always lands on "P".
pub fn next_attendance_status(current: &str) -> &'static str {
    let idx = ATTENDANCE_CYCLE
        .iter()
        .position(|c| *c == current)
        .unwrap_or(0);
    ATTENDANCE_CYCLE[(idx + 1) % ATTENDANCE_CYCLE.len()]
}

pub const BUILTIN_GRADING_TYPES: [&str; 4] = [
    "numeric_decimal",
    "numeric_integer",
    "pass_fail",
    "letter_scale",
];

/// How a grading type constrains entered values.
#[derive(Debug, Clone, PartialEq)]
pub enum GradingRule {
    NumericRange {
        min: f64,
        max: f64,
        allow_decimals: bool,
    },
    Values(Vec<String>),
}

pub fn builtin_rule(code: &str) -> Option<GradingRule> {
    match code {
        "numeric_decimal" => Some(GradingRule::NumericRange {
            min: 0.0,
            max: 10.0,
            allow_decimals: true,
        }),
        "numeric_integer" => Some(GradingRule::NumericRange {
            min: 0.0,
            max: 10.0,
            allow_decimals: false,
        }),
        "pass_fail" => Some(GradingRule::Values(vec![
            "pass".to_string(),
            "fail".to_string(),
        ])),
        "letter_scale" => Some(GradingRule::Values(
            ["A", "B", "C", "D", "E", "F"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )),
        _ => None,
    }
}

pub fn is_builtin_grading_type(code: &str) -> bool {
    BUILTIN_GRADING_TYPES.contains(&code)
}

/// Validates a raw grade value against a rule and returns the canonical
/// stored form (trimmed number, or the list's canonical casing).
pub fn validate_grade(rule: &GradingRule, raw: &str) -> Result<String, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("grade value must not be empty".to_string());
    }
    match rule {
        GradingRule::NumericRange {
            min,
            max,
            allow_decimals,
        } => {
            let n: f64 = value
                .parse()
                .map_err(|_| format!("grade must be a number between {} and {}", min, max))?;
            if !n.is_finite() || n < *min || n > *max {
                return Err(format!("grade must be between {} and {}", min, max));
            }
            if !allow_decimals && n.fract() != 0.0 {
                return Err("grade must be a whole number".to_string());
            }
            Ok(value.to_string())
        }
        GradingRule::Values(values) => values
            .iter()
            .find(|v| v.eq_ignore_ascii_case(value))
            .cloned()
            .ok_or_else(|| format!("grade must be one of: {}", values.join(", "))),
    }
}

/// Parses the value of a numeric grade entry for averaging. NP entries and
/// values recorded under non-numeric rules yield None.
pub fn numeric_grade(rule: &GradingRule, stored: &str) -> Option<f64> {
    match rule {
        GradingRule::NumericRange { .. } => stored.trim().parse::<f64>().ok(),
        GradingRule::Values(_) => None,
    }
}
