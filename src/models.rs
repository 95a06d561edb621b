use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::WorkWeek;
use crate::scoring::ChronicScoreResult;

/// One row of the weekly PM_Flex export.
///
/// Only the columns the pipeline consumes are mapped; the export carries
/// many more and the CSV reader ignores them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PmEvent {
    #[serde(rename = "ENTITY")]
    pub entity: String,
    #[serde(rename = "FACILITY")]
    pub facility: String,
    #[serde(rename = "CEID")]
    pub ceid: String,
    #[serde(rename = "TXN_DATE", deserialize_with = "de::txn_date")]
    pub txn_date: NaiveDate,
    #[serde(rename = "DOWNTIME_TYPE", default)]
    pub downtime_type: Option<String>,
    #[serde(rename = "CUSTOM_DELTA", default)]
    pub custom_delta: Option<f64>,
    #[serde(rename = "Median_Delta", default)]
    pub median_delta: Option<f64>,
    #[serde(rename = "DOWN_WINDOW_DURATION_HR", default)]
    pub down_window_duration_hr: Option<f64>,
    #[serde(rename = "Reclean_Label", default)]
    pub reclean_label: Option<String>,
    #[serde(rename = "Sympathy_PM", default)]
    pub sympathy_pm: Option<String>,
}

impl PmEvent {
    pub fn is_scheduled(&self) -> bool {
        self.downtime_type
            .as_deref()
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("scheduled"))
    }

    pub fn is_reclean(&self) -> bool {
        is_truthy(self.reclean_label.as_deref())
    }

    pub fn is_sympathy(&self) -> bool {
        is_truthy(self.sympathy_pm.as_deref())
    }

    pub fn tool_key(&self) -> ToolKey {
        ToolKey {
            entity: self.entity.clone(),
            facility: self.facility.clone(),
            ceid: self.ceid.clone(),
        }
    }
}

fn is_truthy(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        Some(v) => {
            matches!(v, "1" | "1.0")
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("y")
        }
        None => false,
    }
}

mod de {
    use chrono::{NaiveDate, NaiveDateTime};
    use serde::{Deserialize, Deserializer};

    /// Accepts a bare date or a date-time; the export has used both.
    pub fn txn_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let raw = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Ok(date);
        }
        for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Ok(ts.date());
            }
        }
        Err(serde::de::Error::custom(format!("invalid TXN_DATE {raw:?}")))
    }
}

/// Grouping key for tool-level statistics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ToolKey {
    pub entity: String,
    pub facility: String,
    pub ceid: String,
}

/// Per tool, per work week PM statistics handed to the scorer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolPeriodStats {
    pub total_pm_events: i64,
    pub unscheduled_pm_count: i64,
    pub pm_life_mean: f64,
    /// Absent when fewer than two PM life samples were seen.
    pub pm_life_stddev: Option<f64>,
    pub total_downtime_hours: f64,
    pub reclean_count: i64,
    pub sympathy_pm_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolPeriod {
    pub key: ToolKey,
    pub work_week: WorkWeek,
    pub stats: ToolPeriodStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTool {
    pub key: ToolKey,
    pub work_week: WorkWeek,
    pub stats: ToolPeriodStats,
    pub result: ChronicScoreResult,
}

/// Facility level KPIs for one work week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteWeekKpi {
    pub facility: String,
    pub work_week: WorkWeek,
    pub total_pm_events: i64,
    pub scheduled_count: i64,
    pub unscheduled_count: i64,
    pub early_count: i64,
    pub on_time_count: i64,
    pub late_count: i64,
    pub overdue_count: i64,
    pub total_downtime_hours: f64,
    pub avg_downtime_hours: f64,
    pub avg_pm_life: Option<f64>,
    pub median_pm_life: Option<f64>,
    pub total_tools: i64,
    pub chronic_tools: i64,
    pub chronic_tools_pct: f64,
    /// Filled in by `aggregate::apply_rolling_averages`.
    pub rolling: RollingWindow,
}

/// Trailing four work weeks of one facility, ending at the row's week.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RollingWindow {
    pub avg_pm_life: Option<f64>,
    pub pm_count: i64,
    pub downtime_hours: f64,
}

/// Tool-type (CEID) level KPIs within a facility for one work week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CeidWeekKpi {
    pub ceid: String,
    pub facility: String,
    pub work_week: WorkWeek,
    pub total_pm_events: i64,
    pub scheduled_count: i64,
    pub unscheduled_count: i64,
    pub unscheduled_pm_rate: f64,
    pub total_downtime_hours: f64,
    pub unscheduled_downtime_hours: f64,
    pub avg_pm_life: Option<f64>,
    pub median_pm_life: Option<f64>,
    pub pm_life_stddev: Option<f64>,
    pub total_chambers: i64,
    pub chronic_chambers: i64,
}
