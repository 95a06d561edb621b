use std::collections::{BTreeMap, BTreeSet};

use crate::calendar::{self, WorkWeek};
use crate::models::{
    CeidWeekKpi, PmEvent, RollingWindow, ScoredTool, SiteWeekKpi, ToolKey, ToolPeriod,
    ToolPeriodStats,
};
use crate::timing::{PmTiming, TimingThresholds};

#[derive(Default)]
struct ToolAccumulator {
    total: i64,
    unscheduled: i64,
    pm_life: Vec<f64>,
    downtime: f64,
    reclean: i64,
    sympathy: i64,
}

impl ToolAccumulator {
    fn push(&mut self, event: &PmEvent) {
        self.total += 1;
        if !event.is_scheduled() {
            self.unscheduled += 1;
        }
        if let Some(delta) = event.custom_delta.filter(|v| v.is_finite()) {
            self.pm_life.push(delta);
        }
        if let Some(hours) = event.down_window_duration_hr.filter(|v| v.is_finite()) {
            self.downtime += hours;
        }
        if event.is_reclean() {
            self.reclean += 1;
        }
        if event.is_sympathy() {
            self.sympathy += 1;
        }
    }

    fn finish(self) -> ToolPeriodStats {
        ToolPeriodStats {
            total_pm_events: self.total,
            unscheduled_pm_count: self.unscheduled,
            pm_life_mean: mean(&self.pm_life).unwrap_or(0.0),
            pm_life_stddev: sample_stddev(&self.pm_life),
            total_downtime_hours: self.downtime,
            reclean_count: self.reclean,
            sympathy_pm_count: self.sympathy,
        }
    }
}

/// Groups events by tool and fiscal work week of their transaction date.
///
/// Output is sorted by tool key, then work week.
pub fn aggregate_by_tool(events: &[PmEvent]) -> Vec<ToolPeriod> {
    let mut groups: BTreeMap<(ToolKey, WorkWeek), ToolAccumulator> = BTreeMap::new();

    for event in events {
        let ww = calendar::work_week(event.txn_date);
        groups
            .entry((event.tool_key(), ww))
            .or_default()
            .push(event);
    }

    groups
        .into_iter()
        .map(|((key, work_week), acc)| ToolPeriod {
            key,
            work_week,
            stats: acc.finish(),
        })
        .collect()
}

#[derive(Default)]
struct SiteAccumulator {
    total: i64,
    scheduled: i64,
    timing: [i64; 4],
    downtime: Vec<f64>,
    pm_life: Vec<f64>,
    tools: BTreeSet<String>,
}

/// Facility KPIs per work week, sorted by facility then week.
///
/// Rolling windows are left empty; see `apply_rolling_averages`.
pub fn summarize_sites(
    events: &[PmEvent],
    scored: &[ScoredTool],
    timing: &TimingThresholds,
) -> Vec<SiteWeekKpi> {
    let mut groups: BTreeMap<(String, WorkWeek), SiteAccumulator> = BTreeMap::new();

    for event in events {
        let ww = calendar::work_week(event.txn_date);
        let acc = groups.entry((event.facility.clone(), ww)).or_default();
        acc.total += 1;
        if event.is_scheduled() {
            acc.scheduled += 1;
        }
        match timing.classify(event.custom_delta, event.median_delta) {
            PmTiming::Early => acc.timing[0] += 1,
            PmTiming::OnTime => acc.timing[1] += 1,
            PmTiming::Late => acc.timing[2] += 1,
            PmTiming::Overdue => acc.timing[3] += 1,
            PmTiming::Unknown => {}
        }
        if let Some(hours) = event.down_window_duration_hr.filter(|v| v.is_finite()) {
            acc.downtime.push(hours);
        }
        if let Some(delta) = event.custom_delta.filter(|v| v.is_finite()) {
            acc.pm_life.push(delta);
        }
        acc.tools.insert(event.entity.clone());
    }

    let chronic = chronic_entities(scored, |key| key.facility.clone());

    groups
        .into_iter()
        .map(|((facility, work_week), acc)| {
            let chronic_tools = count_of(&chronic, &(facility.clone(), work_week));
            let total_tools = acc.tools.len() as i64;
            SiteWeekKpi {
                work_week,
                total_pm_events: acc.total,
                scheduled_count: acc.scheduled,
                unscheduled_count: acc.total - acc.scheduled,
                early_count: acc.timing[0],
                on_time_count: acc.timing[1],
                late_count: acc.timing[2],
                overdue_count: acc.timing[3],
                total_downtime_hours: acc.downtime.iter().sum(),
                avg_downtime_hours: mean(&acc.downtime).unwrap_or(0.0),
                avg_pm_life: mean(&acc.pm_life),
                median_pm_life: median(&acc.pm_life),
                total_tools,
                chronic_tools,
                chronic_tools_pct: if total_tools == 0 {
                    0.0
                } else {
                    chronic_tools as f64 / total_tools as f64 * 100.0
                },
                rolling: RollingWindow::default(),
                facility,
            }
        })
        .collect()
}

#[derive(Default)]
struct CeidAccumulator {
    total: i64,
    scheduled: i64,
    downtime: f64,
    pm_life: Vec<f64>,
    chambers: BTreeSet<String>,
}

/// CEID KPIs per facility and work week, sorted by CEID, facility, week.
pub fn summarize_ceids(events: &[PmEvent], scored: &[ScoredTool]) -> Vec<CeidWeekKpi> {
    let mut groups: BTreeMap<(String, String, WorkWeek), CeidAccumulator> = BTreeMap::new();

    for event in events {
        let ww = calendar::work_week(event.txn_date);
        let acc = groups
            .entry((event.ceid.clone(), event.facility.clone(), ww))
            .or_default();
        acc.total += 1;
        if event.is_scheduled() {
            acc.scheduled += 1;
        }
        if let Some(hours) = event.down_window_duration_hr.filter(|v| v.is_finite()) {
            acc.downtime += hours;
        }
        if let Some(delta) = event.custom_delta.filter(|v| v.is_finite()) {
            acc.pm_life.push(delta);
        }
        acc.chambers.insert(event.entity.clone());
    }

    let chronic = chronic_entities(scored, |key| (key.ceid.clone(), key.facility.clone()));

    groups
        .into_iter()
        .map(|((ceid, facility, work_week), acc)| {
            let unscheduled = acc.total - acc.scheduled;
            let unscheduled_pm_rate = if acc.total == 0 {
                0.0
            } else {
                unscheduled as f64 / acc.total as f64
            };
            let chronic_chambers =
                count_of(&chronic, &((ceid.clone(), facility.clone()), work_week));
            CeidWeekKpi {
                work_week,
                total_pm_events: acc.total,
                scheduled_count: acc.scheduled,
                unscheduled_count: unscheduled,
                unscheduled_pm_rate,
                total_downtime_hours: acc.downtime,
                // downtime is not split by PM type in the export
                unscheduled_downtime_hours: acc.downtime * unscheduled_pm_rate,
                avg_pm_life: mean(&acc.pm_life),
                median_pm_life: median(&acc.pm_life),
                pm_life_stddev: sample_stddev(&acc.pm_life),
                total_chambers: acc.chambers.len() as i64,
                chronic_chambers,
                ceid,
                facility,
            }
        })
        .collect()
}

/// Chronic-flagged entities grouped by `group` of their tool key and work week.
fn chronic_entities<'a, G: Ord>(
    scored: &'a [ScoredTool],
    group: impl Fn(&ToolKey) -> G,
) -> BTreeMap<(G, WorkWeek), BTreeSet<&'a str>> {
    let mut chronic: BTreeMap<(G, WorkWeek), BTreeSet<&'a str>> = BTreeMap::new();
    for tool in scored.iter().filter(|t| t.result.chronic_flag) {
        chronic
            .entry((group(&tool.key), tool.work_week))
            .or_default()
            .insert(tool.key.entity.as_str());
    }
    chronic
}

fn count_of<K: Ord>(chronic: &BTreeMap<K, BTreeSet<&str>>, key: &K) -> i64 {
    chronic.get(key).map_or(0, |set| set.len() as i64)
}

/// Work weeks covered by a rolling window, the row's own week included.
pub const ROLLING_WEEKS: i64 = 4;

/// Fills the rolling window of every row in `current`.
///
/// The window covers the facility's KPIs for the row's work week and the
/// three work weeks before it, drawn from `current` and `history`. Weeks
/// without data are skipped. A row in `current` wins over a `history` row
/// for the same facility and week.
pub fn apply_rolling_averages(current: &mut [SiteWeekKpi], history: &[SiteWeekKpi]) {
    let mut weekly: BTreeMap<(String, WorkWeek), (Option<f64>, i64, f64)> = BTreeMap::new();
    for kpi in history.iter().chain(current.iter()) {
        weekly.insert(
            (kpi.facility.clone(), kpi.work_week),
            (kpi.avg_pm_life, kpi.total_pm_events, kpi.total_downtime_hours),
        );
    }

    for kpi in current.iter_mut() {
        let first = kpi
            .work_week
            .offset(1 - ROLLING_WEEKS)
            .unwrap_or(kpi.work_week);
        let from = (kpi.facility.clone(), first);
        let to = (kpi.facility.clone(), kpi.work_week);

        let mut pm_life = Vec::new();
        let mut window = RollingWindow::default();
        for (avg_pm_life, pm_count, downtime) in weekly.range(from..=to).map(|(_, v)| v) {
            pm_life.extend(*avg_pm_life);
            window.pm_count += pm_count;
            window.downtime_hours += downtime;
        }
        window.avg_pm_life = mean(&pm_life);
        kpi.rolling = window;
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation (n - 1); `None` below two values.
pub fn sample_stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
