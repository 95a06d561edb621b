use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Percent deviation cutoffs of actual PM life against target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingThresholds {
    pub early_threshold: f64,
    pub on_time_min: f64,
    pub on_time_max: f64,
    pub late_threshold: f64,
    pub overdue_threshold: f64,
}

impl Default for TimingThresholds {
    fn default() -> Self {
        Self {
            early_threshold: -15.0,
            on_time_min: -15.0,
            on_time_max: 15.0,
            late_threshold: 15.0,
            overdue_threshold: 30.0,
        }
    }
}

impl TimingThresholds {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let ordered = self.early_threshold <= self.on_time_min
            && self.on_time_min <= self.on_time_max
            && self.on_time_max <= self.late_threshold
            && self.late_threshold < self.overdue_threshold;
        if !ordered {
            return Err(ConfigurationError::TimingOrder(format!(
                "early ({}) <= on_time_min ({}) <= on_time_max ({}) <= late ({}) < overdue ({})",
                self.early_threshold,
                self.on_time_min,
                self.on_time_max,
                self.late_threshold,
                self.overdue_threshold
            )));
        }
        Ok(())
    }

    pub fn classify(&self, actual: Option<f64>, target: Option<f64>) -> PmTiming {
        match deviation_pct(actual, target) {
            Some(pct) => self.classify_pct(pct),
            None => PmTiming::Unknown,
        }
    }

    pub fn classify_pct(&self, pct: f64) -> PmTiming {
        if pct < self.early_threshold {
            PmTiming::Early
        } else if self.on_time_min <= pct && pct <= self.on_time_max {
            PmTiming::OnTime
        } else if self.late_threshold < pct && pct <= self.overdue_threshold {
            PmTiming::Late
        } else if pct > self.overdue_threshold {
            PmTiming::Overdue
        } else {
            PmTiming::OnTime
        }
    }
}

/// `(actual - target) / target * 100`, undefined for a non-positive target.
pub fn deviation_pct(actual: Option<f64>, target: Option<f64>) -> Option<f64> {
    match (actual, target) {
        (Some(actual), Some(target)) if target > 0.0 && actual.is_finite() => {
            Some((actual - target) / target * 100.0)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PmTiming {
    Early,
    #[serde(rename = "On-Time")]
    OnTime,
    Late,
    Overdue,
    Unknown,
}

impl fmt::Display for PmTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PmTiming::Early => "Early",
            PmTiming::OnTime => "On-Time",
            PmTiming::Late => "Late",
            PmTiming::Overdue => "Overdue",
            PmTiming::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}
