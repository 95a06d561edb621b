//! Chronic tool scoring.
//!
//! Two independent outputs come out of one `ToolPeriodStats` record: a
//! continuous 0-100 `chronic_score` built from five weighted sub-scores, and
//! a boolean `chronic_flag` driven only by the raw unscheduled rate and PM
//! life coefficient of variation. Severity is a banding of the score.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, ValidationError};
use crate::models::ToolPeriodStats;

/// Factor weights. They are applied as given: callers are expected to keep
/// them summing to 1.0, but nothing renormalizes them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub unscheduled_pm_rate: f64,
    pub pm_life_variance: f64,
    pub downtime_hours: f64,
    pub reclean_rate: f64,
    pub sympathy_pm_rate: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            unscheduled_pm_rate: 0.35,
            pm_life_variance: 0.25,
            downtime_hours: 0.20,
            reclean_rate: 0.10,
            sympathy_pm_rate: 0.10,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.unscheduled_pm_rate
            + self.pm_life_variance
            + self.downtime_hours
            + self.reclean_rate
            + self.sympathy_pm_rate
    }

    fn named(&self) -> [(&'static str, f64); 5] {
        [
            ("unscheduled_pm_rate", self.unscheduled_pm_rate),
            ("pm_life_variance", self.pm_life_variance),
            ("downtime_hours", self.downtime_hours),
            ("reclean_rate", self.reclean_rate),
            ("sympathy_pm_rate", self.sympathy_pm_rate),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low: 25.0,
            medium: 50.0,
            high: 75.0,
            critical: 90.0,
        }
    }
}

impl SeverityThresholds {
    pub fn classify(&self, score: f64) -> ChronicSeverity {
        if score >= self.critical {
            ChronicSeverity::Critical
        } else if score >= self.high {
            ChronicSeverity::High
        } else if score >= self.medium {
            ChronicSeverity::Medium
        } else if score >= self.low {
            ChronicSeverity::Low
        } else {
            ChronicSeverity::None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChronicConfig {
    /// Tool-weeks with fewer events are never flagged chronic.
    pub min_pm_events: i64,
    pub unscheduled_rate_threshold: f64,
    /// Compared against the PM life coefficient of variation.
    pub pm_life_variance_threshold: f64,
    /// Downtime hours per PM that maps to a full downtime sub-score.
    pub downtime_hours_reference: f64,
    pub score_weights: ScoreWeights,
    pub severity_thresholds: SeverityThresholds,
}

impl Default for ChronicConfig {
    fn default() -> Self {
        Self {
            min_pm_events: 5,
            unscheduled_rate_threshold: 0.30,
            pm_life_variance_threshold: 0.40,
            downtime_hours_reference: 10.0,
            score_weights: ScoreWeights::default(),
            severity_thresholds: SeverityThresholds::default(),
        }
    }
}

impl ChronicConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.min_pm_events <= 0 {
            return Err(ConfigurationError::MinPmEvents(self.min_pm_events));
        }

        for (name, value) in [
            ("unscheduled_rate_threshold", self.unscheduled_rate_threshold),
            ("pm_life_variance_threshold", self.pm_life_variance_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::Threshold { name, value });
            }
        }

        if !self.downtime_hours_reference.is_finite() || self.downtime_hours_reference <= 0.0 {
            return Err(ConfigurationError::DowntimeReference(
                self.downtime_hours_reference,
            ));
        }

        for (name, value) in self.score_weights.named() {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::Weight { name, value });
            }
        }

        let s = &self.severity_thresholds;
        let ascending = [s.low, s.medium, s.high, s.critical]
            .windows(2)
            .all(|pair| pair[0] < pair[1]);
        if !ascending || !s.low.is_finite() || !s.critical.is_finite() {
            return Err(ConfigurationError::SeverityOrder {
                low: s.low,
                medium: s.medium,
                high: s.high,
                critical: s.critical,
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChronicSeverity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ChronicSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChronicSeverity::None => "None",
            ChronicSeverity::Low => "Low",
            ChronicSeverity::Medium => "Medium",
            ChronicSeverity::High => "High",
            ChronicSeverity::Critical => "Critical",
        }
    }
}

impl fmt::Display for ChronicSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw factors behind a score, kept for persistence and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ChronicFactors {
    pub unscheduled_rate: f64,
    pub pm_life_cv: f64,
    pub downtime_hours_per_pm: f64,
    pub reclean_rate: f64,
    pub sympathy_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChronicScoreResult {
    pub chronic_score: f64,
    pub chronic_flag: bool,
    pub chronic_severity: ChronicSeverity,
    pub factors: ChronicFactors,
}

/// Stateless scorer over a validated configuration.
#[derive(Debug, Clone)]
pub struct ChronicToolScorer {
    config: ChronicConfig,
}

impl ChronicToolScorer {
    pub fn new(config: ChronicConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChronicConfig {
        &self.config
    }

    pub fn score(&self, stats: &ToolPeriodStats) -> Result<ChronicScoreResult, ValidationError> {
        validate_stats(stats)?;

        let factors = self.factors(stats);
        let w = &self.config.score_weights;

        let weighted = percent(factors.unscheduled_rate) * w.unscheduled_pm_rate
            + percent(factors.pm_life_cv) * w.pm_life_variance
            + percent(factors.downtime_hours_per_pm / self.config.downtime_hours_reference)
                * w.downtime_hours
            + percent(factors.reclean_rate) * w.reclean_rate
            + percent(factors.sympathy_rate) * w.sympathy_pm_rate;
        let chronic_score = round2(weighted.clamp(0.0, 100.0));

        let chronic_flag = stats.total_pm_events >= self.config.min_pm_events
            && (factors.unscheduled_rate > self.config.unscheduled_rate_threshold
                || factors.pm_life_cv > self.config.pm_life_variance_threshold);

        Ok(ChronicScoreResult {
            chronic_score,
            chronic_flag,
            chronic_severity: self.config.severity_thresholds.classify(chronic_score),
            factors,
        })
    }

    /// Scores each record independently; one bad record does not affect the others.
    pub fn score_batch(
        &self,
        stats: &[ToolPeriodStats],
    ) -> Vec<Result<ChronicScoreResult, ValidationError>> {
        stats.iter().map(|s| self.score(s)).collect()
    }

    fn factors(&self, stats: &ToolPeriodStats) -> ChronicFactors {
        let pm_life_cv = match stats.pm_life_stddev {
            Some(stddev) if stats.pm_life_mean > 0.0 => stddev / stats.pm_life_mean,
            _ => 0.0,
        };

        ChronicFactors {
            unscheduled_rate: ratio(stats.unscheduled_pm_count as f64, stats.total_pm_events),
            pm_life_cv,
            downtime_hours_per_pm: ratio(stats.total_downtime_hours, stats.total_pm_events),
            reclean_rate: ratio(stats.reclean_count as f64, stats.total_pm_events),
            sympathy_rate: ratio(stats.sympathy_pm_count as f64, stats.total_pm_events),
        }
    }
}

fn validate_stats(stats: &ToolPeriodStats) -> Result<(), ValidationError> {
    for (field, value) in [
        ("total_pm_events", stats.total_pm_events),
        ("unscheduled_pm_count", stats.unscheduled_pm_count),
        ("reclean_count", stats.reclean_count),
        ("sympathy_pm_count", stats.sympathy_pm_count),
    ] {
        if value < 0 {
            return Err(ValidationError::Negative {
                field,
                value: value as f64,
            });
        }
    }

    let mut floats = vec![
        ("pm_life_mean", stats.pm_life_mean),
        ("total_downtime_hours", stats.total_downtime_hours),
    ];
    if let Some(stddev) = stats.pm_life_stddev {
        floats.push(("pm_life_stddev", stddev));
    }
    for (field, value) in floats {
        if !value.is_finite() {
            return Err(ValidationError::NonFinite { field });
        }
        if value < 0.0 {
            return Err(ValidationError::Negative { field, value });
        }
    }

    if stats.unscheduled_pm_count > stats.total_pm_events {
        return Err(ValidationError::UnscheduledExceedsTotal {
            unscheduled: stats.unscheduled_pm_count,
            total: stats.total_pm_events,
        });
    }

    Ok(())
}

fn ratio(numerator: f64, events: i64) -> f64 {
    if events == 0 {
        0.0
    } else {
        numerator / events as f64
    }
}

/// Fraction to a 0-100 sub-score.
fn percent(fraction: f64) -> f64 {
    (fraction * 100.0).clamp(0.0, 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: i64, unscheduled: i64) -> ToolPeriodStats {
        ToolPeriodStats {
            total_pm_events: total,
            unscheduled_pm_count: unscheduled,
            pm_life_mean: 1000.0,
            pm_life_stddev: Some(100.0),
            total_downtime_hours: 0.0,
            reclean_count: 0,
            sympathy_pm_count: 0,
        }
    }

    fn scorer() -> ChronicToolScorer {
        ChronicToolScorer::new(ChronicConfig::default()).unwrap()
    }

    fn only_unscheduled_weight() -> ChronicConfig {
        ChronicConfig {
            score_weights: ScoreWeights {
                unscheduled_pm_rate: 1.0,
                pm_life_variance: 0.0,
                downtime_hours: 0.0,
                reclean_rate: 0.0,
                sympathy_pm_rate: 0.0,
            },
            ..ChronicConfig::default()
        }
    }

    #[test]
    fn zero_events_resolve_to_zero_rates() {
        let record = ToolPeriodStats {
            total_pm_events: 0,
            unscheduled_pm_count: 0,
            pm_life_mean: 0.0,
            pm_life_stddev: Some(5.0),
            total_downtime_hours: 12.0,
            reclean_count: 0,
            sympathy_pm_count: 0,
        };
        let result = scorer().score(&record).unwrap();
        assert!(!result.chronic_flag);
        assert_eq!(result.factors, ChronicFactors::default());
        assert_eq!(result.chronic_score, 0.0);
        assert_eq!(result.chronic_severity, ChronicSeverity::None);
    }

    #[test]
    fn small_sample_is_never_chronic() {
        let result = scorer().score(&stats(4, 4)).unwrap();
        assert_eq!(result.factors.unscheduled_rate, 1.0);
        assert!(!result.chronic_flag);
    }

    #[test]
    fn unscheduled_rate_over_threshold_flags_chronic() {
        let result = scorer().score(&stats(10, 4)).unwrap();
        assert!((result.factors.unscheduled_rate - 0.4).abs() < 1e-12);
        assert!(result.chronic_flag);

        let result = scorer().score(&stats(10, 3)).unwrap();
        assert!(!result.chronic_flag, "0.30 is not above the 0.30 threshold");
    }

    #[test]
    fn pm_life_variance_alone_flags_chronic() {
        let mut record = stats(10, 0);
        record.pm_life_stddev = Some(500.0);
        let result = scorer().score(&record).unwrap();
        assert!((result.factors.pm_life_cv - 0.5).abs() < 1e-12);
        assert!(result.chronic_flag);
    }

    #[test]
    fn missing_stddev_or_zero_mean_gives_zero_cv() {
        let mut record = stats(10, 0);
        record.pm_life_stddev = None;
        assert_eq!(scorer().score(&record).unwrap().factors.pm_life_cv, 0.0);

        let mut record = stats(10, 0);
        record.pm_life_mean = 0.0;
        assert_eq!(scorer().score(&record).unwrap().factors.pm_life_cv, 0.0);
    }

    #[test]
    fn flag_and_score_are_independent() {
        let config = ChronicConfig {
            score_weights: ScoreWeights {
                unscheduled_pm_rate: 0.0,
                pm_life_variance: 0.0,
                downtime_hours: 1.0,
                reclean_rate: 0.0,
                sympathy_pm_rate: 0.0,
            },
            ..ChronicConfig::default()
        };
        let scorer = ChronicToolScorer::new(config).unwrap();

        let mut record = stats(10, 0);
        record.total_downtime_hours = 200.0;
        let result = scorer.score(&record).unwrap();
        assert_eq!(result.chronic_score, 100.0);
        assert_eq!(result.chronic_severity, ChronicSeverity::Critical);
        assert!(!result.chronic_flag);

        let result = scorer.score(&stats(10, 8)).unwrap();
        assert_eq!(result.chronic_score, 0.0);
        assert!(result.chronic_flag);
    }

    #[test]
    fn default_weights_compose_expected_score() {
        let record = ToolPeriodStats {
            total_pm_events: 10,
            unscheduled_pm_count: 5,
            pm_life_mean: 1000.0,
            pm_life_stddev: Some(200.0),
            total_downtime_hours: 50.0,
            reclean_count: 1,
            sympathy_pm_count: 2,
        };
        let result = scorer().score(&record).unwrap();
        // 50*0.35 + 20*0.25 + 50*0.20 + 10*0.10 + 20*0.10
        assert!((result.chronic_score - 35.5).abs() < 1e-9);
        assert_eq!(result.chronic_severity, ChronicSeverity::Low);
        assert!((result.factors.downtime_hours_per_pm - 5.0).abs() < 1e-12);
    }

    #[test]
    fn score_is_clamped_for_unnormalized_weights() {
        let config = ChronicConfig {
            score_weights: ScoreWeights {
                unscheduled_pm_rate: 2.0,
                ..ScoreWeights::default()
            },
            ..ChronicConfig::default()
        };
        let scorer = ChronicToolScorer::new(config).unwrap();
        let result = scorer.score(&stats(10, 10)).unwrap();
        assert_eq!(result.chronic_score, 100.0);
    }

    #[test]
    fn score_non_decreasing_in_unscheduled_rate() {
        let scorer = scorer();
        let mut last = f64::MIN;
        for unscheduled in 0..=20 {
            let score = scorer.score(&stats(20, unscheduled)).unwrap().chronic_score;
            assert!(score >= last, "{unscheduled}: {score} < {last}");
            last = score;
        }
    }

    #[test]
    fn severity_boundaries_are_inclusive_lower_bounds() {
        let scorer = ChronicToolScorer::new(only_unscheduled_weight()).unwrap();
        let result = scorer.score(&stats(10, 5)).unwrap();
        assert_eq!(result.chronic_score, 50.0);
        assert_eq!(result.chronic_severity, ChronicSeverity::Medium);

        let t = SeverityThresholds::default();
        assert_eq!(t.classify(24.99), ChronicSeverity::None);
        assert_eq!(t.classify(25.0), ChronicSeverity::Low);
        assert_eq!(t.classify(49.99), ChronicSeverity::Low);
        assert_eq!(t.classify(75.0), ChronicSeverity::High);
        assert_eq!(t.classify(89.99), ChronicSeverity::High);
        assert_eq!(t.classify(90.0), ChronicSeverity::Critical);
        assert_eq!(t.classify(100.0), ChronicSeverity::Critical);
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let scorer = scorer();
        let record = ToolPeriodStats {
            total_pm_events: 17,
            unscheduled_pm_count: 7,
            pm_life_mean: 913.3,
            pm_life_stddev: Some(211.7),
            total_downtime_hours: 61.25,
            reclean_count: 3,
            sympathy_pm_count: 1,
        };
        let a = scorer.score(&record).unwrap();
        let b = scorer.score(&record).unwrap();
        assert_eq!(a.chronic_score.to_bits(), b.chronic_score.to_bits());
        assert_eq!(a, b);
    }

    #[test]
    fn malformed_stats_are_rejected() {
        let scorer = scorer();
        assert_eq!(
            scorer.score(&stats(3, 4)),
            Err(ValidationError::UnscheduledExceedsTotal {
                unscheduled: 4,
                total: 3
            })
        );
        assert!(matches!(
            scorer.score(&stats(-1, 0)),
            Err(ValidationError::Negative {
                field: "total_pm_events",
                ..
            })
        ));

        let mut record = stats(10, 1);
        record.total_downtime_hours = -2.0;
        assert!(matches!(
            scorer.score(&record),
            Err(ValidationError::Negative {
                field: "total_downtime_hours",
                ..
            })
        ));

        let mut record = stats(10, 1);
        record.pm_life_mean = f64::NAN;
        assert!(matches!(
            scorer.score(&record),
            Err(ValidationError::NonFinite { field: "pm_life_mean" })
        ));
    }

    #[test]
    fn batch_keeps_going_past_bad_records() {
        let results = scorer().score_batch(&[stats(10, 4), stats(2, 3), stats(10, 0)]);
        assert_eq!(results.len(), 3);
        assert!(results[0].as_ref().unwrap().chronic_flag);
        assert!(results[1].is_err());
        assert!(!results[2].as_ref().unwrap().chronic_flag);
    }

    #[test]
    fn invalid_configuration_is_refused() {
        let config = ChronicConfig {
            min_pm_events: 0,
            ..ChronicConfig::default()
        };
        assert_eq!(
            ChronicToolScorer::new(config).unwrap_err(),
            ConfigurationError::MinPmEvents(0)
        );

        let config = ChronicConfig {
            score_weights: ScoreWeights {
                reclean_rate: -0.1,
                ..ScoreWeights::default()
            },
            ..ChronicConfig::default()
        };
        assert!(matches!(
            ChronicToolScorer::new(config),
            Err(ConfigurationError::Weight {
                name: "reclean_rate",
                ..
            })
        ));

        let config = ChronicConfig {
            severity_thresholds: SeverityThresholds {
                low: 25.0,
                medium: 75.0,
                high: 50.0,
                critical: 90.0,
            },
            ..ChronicConfig::default()
        };
        assert!(matches!(
            ChronicToolScorer::new(config),
            Err(ConfigurationError::SeverityOrder { .. })
        ));

        let config = ChronicConfig {
            downtime_hours_reference: 0.0,
            ..ChronicConfig::default()
        };
        assert!(ChronicToolScorer::new(config).is_err());
    }

    #[test]
    fn weights_are_not_renormalized() {
        let config = ChronicConfig {
            score_weights: ScoreWeights {
                unscheduled_pm_rate: 0.5,
                pm_life_variance: 0.0,
                downtime_hours: 0.0,
                reclean_rate: 0.0,
                sympathy_pm_rate: 0.0,
            },
            ..ChronicConfig::default()
        };
        let scorer = ChronicToolScorer::new(config).unwrap();
        let result = scorer.score(&stats(10, 10)).unwrap();
        assert_eq!(result.chronic_score, 50.0);
    }
}
