//! Schedule evaluation.
//!
//! A job's schedule is one of:
//! - a standard 5-field cron expression (`minute hour day month weekday`),
//!   or one of the shortcuts `@yearly`, `@monthly`, `@weekly`, `@daily`,
//!   `@hourly`
//! - an absolute timestamp `YYYY-MM-DD HH:MM:SS`, due only during that minute
//! - a predicate closure deciding for itself
//!
//! Expressions are kept as text and parsed when checked, so a malformed
//! expression surfaces as an error of the job that owns it.

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Format of absolute timestamp schedules.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

impl ScheduleError {
    fn invalid(expression: &str, reason: impl Into<String>) -> Self {
        ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// Custom due-ness check. Receives the reference instant of the pass.
pub type SchedulePredicate = Arc<dyn Fn(DateTime<Utc>) -> bool + Send + Sync>;

/// When a job should run.
#[derive(Clone, Deserialize)]
#[serde(from = "String")]
pub enum Schedule {
    /// Cron expression, shortcut, or absolute timestamp.
    Expression(String),
    /// Caller-supplied predicate.
    Predicate(SchedulePredicate),
}

impl Schedule {
    /// Create a schedule from an expression string.
    pub fn new(expression: impl Into<String>) -> Self {
        Schedule::Expression(expression.into())
    }

    /// Create a schedule from a predicate.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(DateTime<Utc>) -> bool + Send + Sync + 'static,
    {
        Schedule::Predicate(Arc::new(f))
    }

    /// The expression text, if this is not a predicate.
    pub fn expression(&self) -> Option<&str> {
        match self {
            Schedule::Expression(expr) => Some(expr),
            Schedule::Predicate(_) => None,
        }
    }

    /// Whether the schedule carries no expression at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Schedule::Expression(expr) => expr.trim().is_empty(),
            Schedule::Predicate(_) => false,
        }
    }

    /// Parse the expression without evaluating it.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            Schedule::Expression(expr) => ParsedExpression::parse(expr).map(|_| ()),
            Schedule::Predicate(_) => Ok(()),
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Expression(expr) => f.debug_tuple("Expression").field(expr).finish(),
            Schedule::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Expression(expr) => write!(f, "{}", expr),
            Schedule::Predicate(_) => write!(f, "<predicate>"),
        }
    }
}

impl From<String> for Schedule {
    fn from(expression: String) -> Self {
        Schedule::Expression(expression)
    }
}

impl From<&str> for Schedule {
    fn from(expression: &str) -> Self {
        Schedule::Expression(expression.to_string())
    }
}

/// Decides whether schedules are due at a reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleChecker {
    timezone: Tz,
}

impl ScheduleChecker {
    /// Checker evaluating wall-clock fields in the given timezone.
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    /// Checker for a timezone name such as `Europe/Berlin`.
    pub fn with_timezone_name(name: &str) -> Result<Self, ScheduleError> {
        let timezone = name
            .parse::<Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))?;
        Ok(Self::new(timezone))
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Whether `schedule` is due at `reference`.
    ///
    /// Expressions are compared against the reference truncated to the
    /// minute; predicates receive the reference unchanged.
    pub fn is_due(
        &self,
        schedule: &Schedule,
        reference: DateTime<Utc>,
    ) -> Result<bool, ScheduleError> {
        let expression = match schedule {
            Schedule::Predicate(predicate) => return Ok(predicate(reference)),
            Schedule::Expression(expression) => expression,
        };

        let local = reference.with_timezone(&self.timezone);
        match ParsedExpression::parse(expression)? {
            ParsedExpression::At(at) => {
                let format = "%Y-%m-%d %H:%M";
                Ok(at.format(format).to_string() == local.format(format).to_string())
            }
            ParsedExpression::Cron(cron) => {
                let Some(minute) = local.with_second(0).and_then(|t| t.with_nanosecond(0)) else {
                    return Ok(false);
                };
                Ok(cron.matches(minute))
            }
        }
    }
}

impl Default for ScheduleChecker {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

enum ParsedExpression {
    At(NaiveDateTime),
    Cron(CronExpression),
}

impl ParsedExpression {
    fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        if let Ok(at) = NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT) {
            return Ok(ParsedExpression::At(at));
        }
        CronExpression::parse(trimmed).map(ParsedExpression::Cron)
    }
}

/// A parsed 5-field cron expression.
///
/// Backed by one or two [`cron::Schedule`]s: when both day-of-month and
/// day-of-week are restricted a day matches if either field matches, which
/// is expressed as two schedules.
#[derive(Debug, Clone)]
pub struct CronExpression {
    expression: String,
    schedules: Vec<CronSchedule>,
}

impl CronExpression {
    /// Parse a 5-field expression or shortcut.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        let expanded = if trimmed.starts_with('@') {
            expand_shortcut(trimmed)?
        } else {
            trimmed
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = fields[..] else {
            return Err(ScheduleError::invalid(
                trimmed,
                format!("expected 5 fields, got {}", fields.len()),
            ));
        };

        // A field starting with '*' never restricts, as in Vixie cron.
        let day_restricted = !day.starts_with('*') && day != "?";
        let weekday_restricted = !weekday.starts_with('*') && weekday != "?";
        let weekday = normalize_day_of_week(trimmed, weekday)?;

        let variants = if day_restricted && weekday_restricted {
            vec![
                format!("0 {} {} {} {} *", minute, hour, day, month),
                format!("0 {} {} * {} {}", minute, hour, month, weekday),
            ]
        } else {
            vec![format!("0 {} {} {} {} {}", minute, hour, day, month, weekday)]
        };

        let schedules = variants
            .iter()
            .map(|variant| {
                CronSchedule::from_str(variant)
                    .map_err(|e| ScheduleError::invalid(trimmed, e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            expression: trimmed.to_string(),
            schedules,
        })
    }

    /// The expression as written.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the expression fires at `minute` (seconds must be zero).
    pub fn matches(&self, minute: DateTime<Tz>) -> bool {
        let probe = minute - Duration::seconds(1);
        self.schedules
            .iter()
            .any(|schedule| schedule.after(&probe).next() == Some(minute))
    }
}

fn expand_shortcut(expression: &str) -> Result<&'static str, ScheduleError> {
    match expression.to_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        _ => Err(ScheduleError::invalid(expression, "unknown shortcut")),
    }
}

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrite a standard day-of-week field (0-7, Sunday is 0 or 7) as a list
/// of day names, which the `cron` crate reads unambiguously.
fn normalize_day_of_week(expression: &str, field: &str) -> Result<String, ScheduleError> {
    if field == "*" || field == "?" {
        return Ok("*".to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .ok()
                    .filter(|s| (1..=7).contains(s))
                    .ok_or_else(|| ScheduleError::invalid(expression, format!("bad step '{}'", item)))?;
                (range, step)
            }
            None => (item, 1),
        };

        let (start, end) = if range == "*" || range == "?" {
            (0, 6)
        } else if let Some((start, end)) = range.split_once('-') {
            (parse_weekday(expression, start)?, parse_weekday(expression, end)?)
        } else {
            let day = parse_weekday(expression, range)?;
            // "a/n" means "from a through the end of the week, every n".
            if item.contains('/') { (day, day.max(6)) } else { (day, day) }
        };

        if start > end {
            return Err(ScheduleError::invalid(
                expression,
                format!("day-of-week range '{}' is backwards", range),
            ));
        }

        for day in (start..=end).step_by(step as usize) {
            days[(day % 7) as usize] = true;
        }
    }

    let names: Vec<&str> = days
        .iter()
        .zip(WEEKDAY_NAMES)
        .filter_map(|(set, name)| set.then_some(name))
        .collect();

    if names.is_empty() {
        return Err(ScheduleError::invalid(expression, "empty day-of-week field"));
    }
    Ok(names.join(","))
}

fn parse_weekday(expression: &str, value: &str) -> Result<u32, ScheduleError> {
    if let Ok(n) = value.parse::<u32>() {
        if n <= 7 {
            return Ok(n);
        }
        return Err(ScheduleError::invalid(
            expression,
            format!("day-of-week {} out of range", n),
        ));
    }

    WEEKDAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(value))
        .map(|i| i as u32)
        .ok_or_else(|| ScheduleError::invalid(expression, format!("unknown weekday '{}'", value)))
}
