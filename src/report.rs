use std::collections::BTreeMap;
use std::fmt::Write;

use crate::calendar::{self, WorkWeek};
use crate::models::{CeidWeekKpi, ScoredTool, SiteWeekKpi};
use crate::scoring::ChronicSeverity;

pub fn severity_mix(scored: &[ScoredTool]) -> BTreeMap<ChronicSeverity, usize> {
    let mut mix = BTreeMap::new();
    for tool in scored.iter().filter(|t| t.result.chronic_flag) {
        *mix.entry(tool.result.chronic_severity).or_insert(0) += 1;
    }
    mix
}

/// Markdown summary of one work week. `scored` is expected ranked.
pub fn build_report(
    work_week: WorkWeek,
    scored: &[ScoredTool],
    sites: &[SiteWeekKpi],
    ceids: &[CeidWeekKpi],
    limit: usize,
) -> String {
    let (start, end) = calendar::work_week_range(work_week);
    let mut output = String::new();

    let _ = writeln!(output, "# PM Flex Chronic Tool Report");
    let _ = writeln!(
        output,
        "Work week {} ({} to {}), fiscal Q{}",
        work_week,
        start,
        end,
        calendar::fiscal_quarter(start)
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Site KPIs");

    let sites: Vec<&SiteWeekKpi> = sites.iter().filter(|s| s.work_week == work_week).collect();
    if sites.is_empty() {
        let _ = writeln!(output, "No PM events recorded for this work week.");
    } else {
        for site in sites {
            let _ = writeln!(
                output,
                "- {}: {} PMs ({} unscheduled), {:.1} downtime hrs, timing E/O/L/X {}/{}/{}/{}, {} of {} tools chronic ({:.1}%)",
                site.facility,
                site.total_pm_events,
                site.unscheduled_count,
                site.total_downtime_hours,
                site.early_count,
                site.on_time_count,
                site.late_count,
                site.overdue_count,
                site.chronic_tools,
                site.total_tools,
                site.chronic_tools_pct
            );
            let _ = writeln!(
                output,
                "  - 4 weeks: {} PMs, {:.1} downtime hrs, avg PM life {}",
                site.rolling.pm_count,
                site.rolling.downtime_hours,
                site.rolling
                    .avg_pm_life
                    .map_or_else(|| "n/a".to_string(), |v| format!("{v:.0}"))
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## CEID KPIs");
    let ceids: Vec<&CeidWeekKpi> = ceids.iter().filter(|c| c.work_week == work_week).collect();
    if ceids.is_empty() {
        let _ = writeln!(output, "No CEID activity for this work week.");
    } else {
        for kpi in ceids {
            let _ = writeln!(
                output,
                "- {} @ {}: {} PMs, unscheduled {:.0}%, {:.1} unscheduled downtime hrs, {} of {} chambers chronic",
                kpi.ceid,
                kpi.facility,
                kpi.total_pm_events,
                kpi.unscheduled_pm_rate * 100.0,
                kpi.unscheduled_downtime_hours,
                kpi.chronic_chambers,
                kpi.total_chambers
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Severity Mix");
    let mix = severity_mix(scored);
    if mix.is_empty() {
        let _ = writeln!(output, "No chronic tools this work week.");
    } else {
        for (severity, count) in mix.iter().rev() {
            let _ = writeln!(output, "- {severity}: {count}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Chronic Scores");
    if scored.is_empty() {
        let _ = writeln!(output, "No tools scored for this work week.");
    } else {
        for tool in scored.iter().take(limit) {
            let _ = writeln!(
                output,
                "- {} ({}, {}) score {:.2} [{}]{} across {} PMs, unscheduled {:.0}%, PM life CV {:.2}",
                tool.key.entity,
                tool.key.facility,
                tool.key.ceid,
                tool.result.chronic_score,
                tool.result.chronic_severity,
                if tool.result.chronic_flag { " chronic" } else { "" },
                tool.stats.total_pm_events,
                tool.result.factors.unscheduled_rate * 100.0,
                tool.result.factors.pm_life_cv
            );
        }
    }

    output
}
