use anyhow::Context;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::calendar::{self, WorkWeek};
use crate::models::{CeidWeekKpi, PmEvent, RollingWindow, ScoredTool, SiteWeekKpi};

pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_FAILED: &str = "FAILED";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Replaces the bronze rows of the `load_week` export with `events` and
/// records the load. Re-running a load leaves exactly one copy of its rows.
///
/// Each row is stored under the work week of its TXN_DATE, so rows dated
/// outside the load week are scored with the week they belong to.
pub async fn load_events(
    pool: &PgPool,
    load_week: WorkWeek,
    source_file: &str,
    events: &[PmEvent],
    rows_skipped: usize,
) -> anyhow::Result<usize> {
    let label = load_week.to_string();
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM pm_flex.pm_events WHERE load_week = $1")
        .bind(&label)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted > 0 {
        debug!(load_week = %label, deleted, "replacing previously loaded rows");
    }

    for event in events {
        sqlx::query(
            r#"
            INSERT INTO pm_flex.pm_events
            (id, load_week, work_week, entity, facility, ceid, txn_date, downtime_type,
             custom_delta, median_delta, down_window_duration_hr,
             reclean_label, sympathy_pm, source_file)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&label)
        .bind(calendar::work_week(event.txn_date).to_string())
        .bind(&event.entity)
        .bind(&event.facility)
        .bind(&event.ceid)
        .bind(event.txn_date)
        .bind(&event.downtime_type)
        .bind(event.custom_delta)
        .bind(event.median_delta)
        .bind(event.down_window_duration_hr)
        .bind(&event.reclean_label)
        .bind(&event.sympathy_pm)
        .bind(source_file)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed inserting event for {}", event.entity))?;
    }

    insert_load_log(
        &mut tx,
        &label,
        source_file,
        events.len(),
        rows_skipped,
        STATUS_SUCCESS,
        None,
    )
    .await?;
    tx.commit().await?;

    info!(load_week = %label, rows = events.len(), "bronze load committed");
    Ok(events.len())
}

pub async fn log_failed_load(
    pool: &PgPool,
    work_week: WorkWeek,
    source_file: &str,
    message: &str,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    insert_load_log(
        &mut tx,
        &work_week.to_string(),
        source_file,
        0,
        0,
        STATUS_FAILED,
        Some(message),
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

async fn insert_load_log(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    work_week: &str,
    source_file: &str,
    rows_loaded: usize,
    rows_skipped: usize,
    status: &str,
    message: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pm_flex.load_log
        (id, work_week, source_file, rows_loaded, rows_skipped, load_status, message)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(work_week)
    .bind(source_file)
    .bind(i64::try_from(rows_loaded)?)
    .bind(i64::try_from(rows_skipped)?)
    .bind(status)
    .bind(message)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn is_week_loaded(pool: &PgPool, work_week: WorkWeek) -> anyhow::Result<bool> {
    let loaded: bool = sqlx::query(
        "SELECT EXISTS (SELECT 1 FROM pm_flex.load_log WHERE work_week = $1 AND load_status = $2) AS loaded",
    )
    .bind(work_week.to_string())
    .bind(STATUS_SUCCESS)
    .fetch_one(pool)
    .await?
    .get("loaded");
    Ok(loaded)
}

/// Bronze rows whose TXN_DATE falls in `work_week`, from every load.
pub async fn fetch_events(pool: &PgPool, work_week: WorkWeek) -> anyhow::Result<Vec<PmEvent>> {
    let rows = sqlx::query(
        "SELECT entity, facility, ceid, txn_date, downtime_type, custom_delta, median_delta, \
         down_window_duration_hr, reclean_label, sympathy_pm \
         FROM pm_flex.pm_events WHERE work_week = $1 \
         ORDER BY entity, txn_date",
    )
    .bind(work_week.to_string())
    .fetch_all(pool)
    .await?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        events.push(PmEvent {
            entity: row.get("entity"),
            facility: row.get("facility"),
            ceid: row.get("ceid"),
            txn_date: row.get("txn_date"),
            downtime_type: row.get("downtime_type"),
            custom_delta: row.get("custom_delta"),
            median_delta: row.get("median_delta"),
            down_window_duration_hr: row.get("down_window_duration_hr"),
            reclean_label: row.get("reclean_label"),
            sympathy_pm: row.get("sympathy_pm"),
        });
    }

    Ok(events)
}

/// Delete-then-insert of the scored tools for one work week.
pub async fn replace_chronic_results(
    pool: &PgPool,
    work_week: WorkWeek,
    scored: &[ScoredTool],
) -> anyhow::Result<usize> {
    let label = work_week.to_string();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM pm_flex.chronic_tools WHERE work_week = $1")
        .bind(&label)
        .execute(&mut *tx)
        .await?;

    let mut inserted = 0usize;
    for tool in scored.iter().filter(|t| t.work_week == work_week) {
        let stats = &tool.stats;
        let result = &tool.result;
        sqlx::query(
            r#"
            INSERT INTO pm_flex.chronic_tools
            (id, work_week, entity, facility, ceid,
             total_pm_events, unscheduled_pm_count, pm_life_mean, pm_life_stddev,
             total_downtime_hours, reclean_count, sympathy_pm_count,
             unscheduled_rate, pm_life_cv, downtime_hours_per_pm, reclean_rate, sympathy_rate,
             chronic_score, chronic_flag, chronic_severity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&label)
        .bind(&tool.key.entity)
        .bind(&tool.key.facility)
        .bind(&tool.key.ceid)
        .bind(stats.total_pm_events)
        .bind(stats.unscheduled_pm_count)
        .bind(stats.pm_life_mean)
        .bind(stats.pm_life_stddev)
        .bind(stats.total_downtime_hours)
        .bind(stats.reclean_count)
        .bind(stats.sympathy_pm_count)
        .bind(result.factors.unscheduled_rate)
        .bind(result.factors.pm_life_cv)
        .bind(result.factors.downtime_hours_per_pm)
        .bind(result.factors.reclean_rate)
        .bind(result.factors.sympathy_rate)
        .bind(result.chronic_score)
        .bind(result.chronic_flag)
        .bind(result.chronic_severity.as_str())
        .execute(&mut *tx)
        .await?;
        inserted += 1;
    }

    tx.commit().await?;
    info!(work_week = %label, inserted, "chronic tool results replaced");
    Ok(inserted)
}

#[derive(Debug, Clone)]
pub struct ChronicHistoryRow {
    pub work_week: String,
    pub entity: String,
    pub facility: String,
    pub ceid: String,
    pub chronic_score: f64,
    pub chronic_flag: bool,
    pub chronic_severity: String,
}

/// Stored results from `since` onward, optionally for one entity, oldest first.
pub async fn fetch_chronic_history(
    pool: &PgPool,
    since: WorkWeek,
    entity: Option<&str>,
) -> anyhow::Result<Vec<ChronicHistoryRow>> {
    let mut query = String::from(
        "SELECT work_week, entity, facility, ceid, chronic_score, chronic_flag, chronic_severity \
         FROM pm_flex.chronic_tools WHERE work_week >= $1",
    );
    if entity.is_some() {
        query.push_str(" AND entity = $2");
    }
    query.push_str(" ORDER BY work_week, entity, facility, ceid");

    let mut rows = sqlx::query(&query).bind(since.to_string());
    if let Some(value) = entity {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut history = Vec::with_capacity(records.len());
    for row in records {
        history.push(ChronicHistoryRow {
            work_week: row.get("work_week"),
            entity: row.get("entity"),
            facility: row.get("facility"),
            ceid: row.get("ceid"),
            chronic_score: row.get("chronic_score"),
            chronic_flag: row.get("chronic_flag"),
            chronic_severity: row.get("chronic_severity"),
        });
    }

    Ok(history)
}

/// Delete-then-insert of the facility KPIs for one work week.
pub async fn replace_site_kpis(
    pool: &PgPool,
    work_week: WorkWeek,
    sites: &[SiteWeekKpi],
) -> anyhow::Result<usize> {
    let label = work_week.to_string();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM pm_flex.site_kpis WHERE work_week = $1")
        .bind(&label)
        .execute(&mut *tx)
        .await?;

    let mut inserted = 0usize;
    for site in sites.iter().filter(|s| s.work_week == work_week) {
        sqlx::query(
            r#"
            INSERT INTO pm_flex.site_kpis
            (id, facility, work_week, total_pm_events, scheduled_count, unscheduled_count,
             early_count, on_time_count, late_count, overdue_count,
             total_downtime_hours, avg_downtime_hours, avg_pm_life, median_pm_life,
             total_tools, chronic_tools, chronic_tools_pct,
             rolling_4wk_avg_pm_life, rolling_4wk_pm_count, rolling_4wk_downtime_hours)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&site.facility)
        .bind(&label)
        .bind(site.total_pm_events)
        .bind(site.scheduled_count)
        .bind(site.unscheduled_count)
        .bind(site.early_count)
        .bind(site.on_time_count)
        .bind(site.late_count)
        .bind(site.overdue_count)
        .bind(site.total_downtime_hours)
        .bind(site.avg_downtime_hours)
        .bind(site.avg_pm_life)
        .bind(site.median_pm_life)
        .bind(site.total_tools)
        .bind(site.chronic_tools)
        .bind(site.chronic_tools_pct)
        .bind(site.rolling.avg_pm_life)
        .bind(site.rolling.pm_count)
        .bind(site.rolling.downtime_hours)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed inserting site KPIs for {}", site.facility))?;
        inserted += 1;
    }

    tx.commit().await?;
    info!(work_week = %label, inserted, "site KPIs replaced");
    Ok(inserted)
}

/// Stored facility KPIs for `from..=to`, the input to rolling windows.
pub async fn fetch_site_kpis(
    pool: &PgPool,
    from: WorkWeek,
    to: WorkWeek,
) -> anyhow::Result<Vec<SiteWeekKpi>> {
    let rows = sqlx::query(
        "SELECT facility, work_week, total_pm_events, scheduled_count, unscheduled_count, \
         early_count, on_time_count, late_count, overdue_count, total_downtime_hours, \
         avg_downtime_hours, avg_pm_life, median_pm_life, total_tools, chronic_tools, \
         chronic_tools_pct, rolling_4wk_avg_pm_life, rolling_4wk_pm_count, rolling_4wk_downtime_hours \
         FROM pm_flex.site_kpis WHERE work_week >= $1 AND work_week <= $2 \
         ORDER BY facility, work_week",
    )
    .bind(from.to_string())
    .bind(to.to_string())
    .fetch_all(pool)
    .await?;

    let mut sites = Vec::with_capacity(rows.len());
    for row in rows {
        let label: String = row.get("work_week");
        sites.push(SiteWeekKpi {
            facility: row.get("facility"),
            work_week: label
                .parse()
                .with_context(|| format!("stored site KPI has bad work week {label:?}"))?,
            total_pm_events: row.get("total_pm_events"),
            scheduled_count: row.get("scheduled_count"),
            unscheduled_count: row.get("unscheduled_count"),
            early_count: row.get("early_count"),
            on_time_count: row.get("on_time_count"),
            late_count: row.get("late_count"),
            overdue_count: row.get("overdue_count"),
            total_downtime_hours: row.get("total_downtime_hours"),
            avg_downtime_hours: row.get("avg_downtime_hours"),
            avg_pm_life: row.get("avg_pm_life"),
            median_pm_life: row.get("median_pm_life"),
            total_tools: row.get("total_tools"),
            chronic_tools: row.get("chronic_tools"),
            chronic_tools_pct: row.get("chronic_tools_pct"),
            rolling: RollingWindow {
                avg_pm_life: row.get("rolling_4wk_avg_pm_life"),
                pm_count: row.get("rolling_4wk_pm_count"),
                downtime_hours: row.get("rolling_4wk_downtime_hours"),
            },
        });
    }

    Ok(sites)
}

/// Delete-then-insert of the CEID KPIs for one work week.
pub async fn replace_ceid_kpis(
    pool: &PgPool,
    work_week: WorkWeek,
    ceids: &[CeidWeekKpi],
) -> anyhow::Result<usize> {
    let label = work_week.to_string();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM pm_flex.ceid_kpis WHERE work_week = $1")
        .bind(&label)
        .execute(&mut *tx)
        .await?;

    let mut inserted = 0usize;
    for kpi in ceids.iter().filter(|c| c.work_week == work_week) {
        sqlx::query(
            r#"
            INSERT INTO pm_flex.ceid_kpis
            (id, ceid, facility, work_week, total_pm_events, scheduled_count, unscheduled_count,
             unscheduled_pm_rate, total_downtime_hours, unscheduled_downtime_hours,
             avg_pm_life, median_pm_life, pm_life_stddev, total_chambers, chronic_chambers)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&kpi.ceid)
        .bind(&kpi.facility)
        .bind(&label)
        .bind(kpi.total_pm_events)
        .bind(kpi.scheduled_count)
        .bind(kpi.unscheduled_count)
        .bind(kpi.unscheduled_pm_rate)
        .bind(kpi.total_downtime_hours)
        .bind(kpi.unscheduled_downtime_hours)
        .bind(kpi.avg_pm_life)
        .bind(kpi.median_pm_life)
        .bind(kpi.pm_life_stddev)
        .bind(kpi.total_chambers)
        .bind(kpi.chronic_chambers)
        .execute(&mut *tx)
        .await?;
        inserted += 1;
    }

    tx.commit().await?;
    info!(work_week = %label, inserted, "CEID KPIs replaced");
    Ok(inserted)
}
