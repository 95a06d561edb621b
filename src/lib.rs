//! Weekly PM_Flex maintenance ETL: fiscal work-week calendar, tool-level
//! aggregation, and chronic tool scoring, with a Postgres staging layer.

pub mod aggregate;
pub mod calendar;
pub mod config;
pub mod db;
pub mod discovery;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod scoring;
pub mod timing;

pub use calendar::{
    fiscal_date, fiscal_quarter, fiscal_year, last_fiscal_boundary, parse_work_week, work_week_label,
    FiscalDate, WorkWeek,
};
pub use error::{ConfigurationError, DiscoveryError, ParseError, ValidationError};
pub use models::ToolPeriodStats;
pub use scoring::{ChronicConfig, ChronicScoreResult, ChronicSeverity, ChronicToolScorer};
