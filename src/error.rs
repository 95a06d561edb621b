use std::path::PathBuf;

use thiserror::Error;

/// A `ToolPeriodStats` record that violates the aggregation contract.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },

    #[error("unscheduled_pm_count ({unscheduled}) exceeds total_pm_events ({total})")]
    UnscheduledExceedsTotal { unscheduled: i64, total: i64 },
}

/// Scorer configuration rejected at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("min_pm_events must be positive, got {0}")]
    MinPmEvents(i64),

    #[error("weight {name} must be a non-negative finite number, got {value}")]
    Weight { name: &'static str, value: f64 },

    #[error("threshold {name} must be a non-negative finite number, got {value}")]
    Threshold { name: &'static str, value: f64 },

    #[error("downtime_hours_reference must be positive, got {0}")]
    DowntimeReference(f64),

    #[error(
        "severity thresholds must ascend: low ({low}) < medium ({medium}) < high ({high}) < critical ({critical})"
    )]
    SeverityOrder {
        low: f64,
        medium: f64,
        high: f64,
        critical: f64,
    },

    #[error("pm timing thresholds out of order: {0}")]
    TimingOrder(String),
}

/// A work-week label that is not `YYYYWWnn`, or names a week the calendar does not have.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid work week label {0:?}, expected YYYYWWnn")]
    Format(String),

    #[error("work week {week} out of range in {label:?}")]
    WeekOutOfRange { label: String, week: u32 },

    #[error("fiscal year {year} has only {weeks} weeks")]
    WeekNotInYear { year: i32, weeks: u32 },
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("PM_Flex file not found for {work_week}: {path}")]
    NotFound { work_week: String, path: PathBuf },

    #[error("no PM_Flex file found within the last {max_weeks_back} weeks under {root}")]
    NoRecentFile { max_weeks_back: u32, root: PathBuf },

    #[error("cannot infer the work week of {0}: parent folder is not a YYYYWWnn label")]
    NoWeekInPath(PathBuf),

    #[error("path is not a file: {0}")]
    NotAFile(PathBuf),

    #[error("file is empty: {0}")]
    Empty(PathBuf),

    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid search pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}
