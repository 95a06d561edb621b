use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context};
use tracing::{info, warn};

use crate::aggregate;
use crate::calendar::{self, WorkWeek};
use crate::discovery;
use crate::error::ValidationError;
use crate::models::{PmEvent, ScoredTool, ToolKey, ToolPeriod};
use crate::scoring::ChronicToolScorer;

#[derive(Debug, Default)]
pub struct EventBatch {
    pub events: Vec<PmEvent>,
    /// Rows dropped for a blank ENTITY, FACILITY or CEID.
    pub skipped: usize,
}

impl EventBatch {
    /// Fiscal work weeks of the rows' transaction dates.
    pub fn work_weeks(&self) -> BTreeSet<WorkWeek> {
        self.events
            .iter()
            .map(|e| calendar::work_week(e.txn_date))
            .collect()
    }
}

/// Validates and reads an export ahead of a bronze load. Rows dated outside
/// `load_week` are kept; they are stored under their own work week.
pub fn prepare_import(path: &Path, load_week: WorkWeek) -> anyhow::Result<EventBatch> {
    discovery::validate_file(path)?;
    let batch = read_events_csv(path)?;
    if batch.events.is_empty() {
        bail!("{} contains no usable PM_Flex rows", path.display());
    }

    let weeks = batch.work_weeks();
    if weeks.iter().any(|w| *w != load_week) {
        let weeks: Vec<String> = weeks.iter().map(ToString::to_string).collect();
        info!(%load_week, weeks = %weeks.join(","), "export spans several work weeks");
    }
    Ok(batch)
}

/// Reads a PM_Flex export, dropping rows that lack a grouping key.
pub fn read_events_csv(path: &Path) -> anyhow::Result<EventBatch> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed opening {}", path.display()))?;
    let mut batch = EventBatch::default();

    for (index, result) in reader.deserialize::<PmEvent>().enumerate() {
        // header is line 1
        let event = result.with_context(|| format!("{} line {}", path.display(), index + 2))?;
        if has_grouping_key(&event) {
            batch.events.push(event);
        } else {
            batch.skipped += 1;
        }
    }

    if batch.skipped > 0 {
        warn!(
            skipped = batch.skipped,
            path = %path.display(),
            "rows missing ENTITY, FACILITY or CEID were skipped"
        );
    }
    info!(rows = batch.events.len(), path = %path.display(), "read PM_Flex file");
    Ok(batch)
}

fn has_grouping_key(event: &PmEvent) -> bool {
    [&event.entity, &event.facility, &event.ceid]
        .iter()
        .all(|v| !v.trim().is_empty())
}

#[derive(Debug)]
pub struct ScoreFailure {
    pub key: ToolKey,
    pub work_week: WorkWeek,
    pub error: ValidationError,
}

#[derive(Debug, Default)]
pub struct ScoreOutcome {
    pub scored: Vec<ScoredTool>,
    pub failures: Vec<ScoreFailure>,
}

impl ScoreOutcome {
    pub fn chronic_count(&self) -> usize {
        self.scored.iter().filter(|t| t.result.chronic_flag).count()
    }
}

/// Scores every period; a record that fails validation is logged and
/// recorded, and the rest of the batch continues.
pub fn score_periods(scorer: &ChronicToolScorer, periods: Vec<ToolPeriod>) -> ScoreOutcome {
    let mut outcome = ScoreOutcome::default();

    for period in periods {
        match scorer.score(&period.stats) {
            Ok(result) => outcome.scored.push(ScoredTool {
                key: period.key,
                work_week: period.work_week,
                stats: period.stats,
                result,
            }),
            Err(error) => {
                warn!(
                    entity = %period.key.entity,
                    facility = %period.key.facility,
                    ceid = %period.key.ceid,
                    work_week = %period.work_week,
                    %error,
                    "skipping tool period"
                );
                outcome.failures.push(ScoreFailure {
                    key: period.key,
                    work_week: period.work_week,
                    error,
                });
            }
        }
    }

    info!(
        scored = outcome.scored.len(),
        chronic = outcome.chronic_count(),
        failed = outcome.failures.len(),
        "chronic scoring complete"
    );
    outcome
}

/// Aggregates and scores the events that fall in `work_week`.
pub fn score_week(
    scorer: &ChronicToolScorer,
    events: &[PmEvent],
    work_week: WorkWeek,
) -> ScoreOutcome {
    let periods: Vec<ToolPeriod> = aggregate::aggregate_by_tool(events)
        .into_iter()
        .filter(|p| p.work_week == work_week)
        .collect();
    score_periods(scorer, periods)
}

/// Highest scores first; ties broken by tool key for stable output.
pub fn rank(scored: &mut [ScoredTool]) {
    scored.sort_by(|a, b| {
        b.result
            .chronic_score
            .total_cmp(&a.result.chronic_score)
            .then_with(|| a.key.cmp(&b.key))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolPeriodStats;
    use crate::scoring::ChronicConfig;
    use std::fs;

    fn scorer() -> ChronicToolScorer {
        ChronicToolScorer::new(ChronicConfig::default()).unwrap()
    }

    fn period(entity: &str, total: i64, unscheduled: i64) -> ToolPeriod {
        ToolPeriod {
            key: ToolKey {
                entity: entity.to_string(),
                facility: "F32".to_string(),
                ceid: "ETX".to_string(),
            },
            work_week: "2025WW23".parse().unwrap(),
            stats: ToolPeriodStats {
                total_pm_events: total,
                unscheduled_pm_count: unscheduled,
                ..ToolPeriodStats::default()
            },
        }
    }

    #[test]
    fn invalid_record_does_not_abort_batch() {
        let outcome = score_periods(
            &scorer(),
            vec![period("A", 10, 6), period("B", 2, 5), period("C", 10, 1)],
        );
        assert_eq!(outcome.scored.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].key.entity, "B");
        assert_eq!(outcome.chronic_count(), 1);
    }

    #[test]
    fn rank_orders_by_score_then_key() {
        let mut outcome = score_periods(
            &scorer(),
            vec![period("B", 10, 1), period("A", 10, 1), period("C", 10, 9)],
        );
        rank(&mut outcome.scored);
        let order: Vec<&str> = outcome.scored.iter().map(|t| t.key.entity.as_str()).collect();
        assert_eq!(order, ["C", "A", "B"]);
    }

    #[test]
    fn reads_csv_and_skips_rows_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PM_Flex.csv");
        fs::write(
            &path,
            "ENTITY,FACILITY,CEID,TXN_DATE,DOWNTIME_TYPE\n\
             ETCH01,F32,ETX,2025-06-02,Scheduled\n\
             ,F32,ETX,2025-06-02,Scheduled\n\
             ETCH02,F32,ETX,2025-06-03,Unscheduled\n",
        )
        .unwrap();

        let batch = read_events_csv(&path).unwrap();
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn bad_date_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PM_Flex.csv");
        fs::write(
            &path,
            "ENTITY,FACILITY,CEID,TXN_DATE\nETCH01,F32,ETX,2025-06-02\nETCH01,F32,ETX,soon\n",
        )
        .unwrap();
        let err = read_events_csv(&path).unwrap_err();
        assert!(format!("{err:#}").contains("line 3"));
    }

    #[test]
    fn export_spanning_two_weeks_scores_each_week() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("2025WW24");
        fs::create_dir_all(&folder).unwrap();
        let path = folder.join("PM_Flex.csv");
        let mut csv = String::from("ENTITY,FACILITY,CEID,TXN_DATE,DOWNTIME_TYPE\n");
        // 2025-06-06 is the Friday of 2025WW23
        for _ in 0..6 {
            csv.push_str("ETCH01,F32,ETX,2025-06-06,Unscheduled\n");
        }
        csv.push_str("ETCH02,F32,ETX,2025-06-09,Scheduled\n");
        fs::write(&path, csv).unwrap();

        let load_week = crate::discovery::week_from_folder(&path).unwrap();
        let batch = prepare_import(&path, load_week).unwrap();
        let weeks: Vec<String> = batch.work_weeks().iter().map(ToString::to_string).collect();
        assert_eq!(weeks, ["2025WW23", "2025WW24"]);

        let earlier = score_week(&scorer(), &batch.events, "2025WW23".parse().unwrap());
        assert_eq!(earlier.scored.len(), 1);
        assert_eq!(earlier.scored[0].key.entity, "ETCH01");
        assert!(earlier.scored[0].result.chronic_flag);

        let current = score_week(&scorer(), &batch.events, load_week);
        assert_eq!(current.scored.len(), 1);
        assert_eq!(current.scored[0].key.entity, "ETCH02");
    }

    #[test]
    fn import_rejects_files_without_rows() {
        let dir = tempfile::tempdir().unwrap();
        let week: WorkWeek = "2025WW24".parse().unwrap();

        let header_only = dir.path().join("header.csv");
        fs::write(&header_only, "ENTITY,FACILITY,CEID,TXN_DATE\n").unwrap();
        let err = prepare_import(&header_only, week).unwrap_err();
        assert!(err.to_string().contains("no usable PM_Flex rows"));

        let empty = dir.path().join("empty.csv");
        fs::write(&empty, "").unwrap();
        assert!(prepare_import(&empty, week).is_err());

        let blank_keys = dir.path().join("blank.csv");
        fs::write(&blank_keys, "ENTITY,FACILITY,CEID,TXN_DATE\n,F32,ETX,2025-06-09\n").unwrap();
        assert!(prepare_import(&blank_keys, week).is_err());
    }

    #[test]
    fn score_week_keeps_only_target_week() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PM_Flex.csv");
        let mut csv = String::from("ENTITY,FACILITY,CEID,TXN_DATE,DOWNTIME_TYPE\n");
        for _ in 0..6 {
            csv.push_str("ETCH01,F32,ETX,2025-06-02,Unscheduled\n");
        }
        csv.push_str("ETCH01,F32,ETX,2025-06-09,Scheduled\n");
        fs::write(&path, csv).unwrap();

        let batch = read_events_csv(&path).unwrap();
        let outcome = score_week(&scorer(), &batch.events, "2025WW23".parse().unwrap());
        assert_eq!(outcome.scored.len(), 1);
        assert_eq!(outcome.scored[0].stats.total_pm_events, 6);
        assert!(outcome.scored[0].result.chronic_flag);
    }
}
