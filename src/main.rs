use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pm_flex_etl::aggregate::ROLLING_WEEKS;
use pm_flex_etl::calendar::{self, WorkWeek};
use pm_flex_etl::config::{self, Config};
use pm_flex_etl::discovery::{self, FileDiscovery};
use pm_flex_etl::models::{CeidWeekKpi, SiteWeekKpi};
use pm_flex_etl::pipeline::ScoreOutcome;
use pm_flex_etl::scoring::ChronicToolScorer;
use pm_flex_etl::{aggregate, db, pipeline, report};

#[derive(Parser)]
#[command(name = "pm-flex-etl")]
#[command(about = "Weekly PM_Flex maintenance ETL and chronic tool scoring", long_about = None)]
struct Cli {
    /// Path to a pm_flex.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Write a default configuration file
    InitConfig {
        #[arg(long, default_value = config::CONFIG_FILE_NAME)]
        path: PathBuf,
    },
    /// Check the configuration for errors and suspicious values
    ValidateConfig,
    /// Show fiscal year, quarter and work week for a date
    Calendar {
        /// Calendar date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Locate PM_Flex exports on the share
    Discover {
        #[arg(long)]
        week: Option<WorkWeek>,
        /// List every available work week instead
        #[arg(long)]
        list: bool,
    },
    /// Load a PM_Flex export into the bronze table
    Import {
        /// Explicit file; otherwise the share is searched
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        week: Option<WorkWeek>,
        /// Reload even if the week was already loaded
        #[arg(long)]
        force: bool,
    },
    /// Score tools for a work week and store results and KPIs
    Score {
        #[arg(long)]
        week: WorkWeek,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report for a work week
    Report {
        #[arg(long)]
        week: WorkWeek,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show stored chronic results since a work week
    History {
        #[arg(long)]
        since: WorkWeek,
        #[arg(long)]
        entity: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);
    dotenvy::dotenv().ok();

    let cwd = std::env::current_dir().context("failed to read working directory")?;
    let config = config::load_config(cli.config.as_deref(), &cwd)?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect_pool().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::InitConfig { path } => {
            config::write_default_config(&path)?;
            println!("Default configuration written to {}.", path.display());
        }
        Commands::ValidateConfig => {
            let result = config.validate();
            for warning in &result.warnings {
                println!("warning: {warning}");
            }
            for error in &result.errors {
                println!("error: {error}");
            }
            if !result.is_valid() {
                bail!("configuration has {} error(s)", result.errors.len());
            }
            println!("Configuration is valid ({} warning(s)).", result.warnings.len());
        }
        Commands::Calendar { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let fiscal = calendar::fiscal_date(date);
            let (start, end) = calendar::work_week_range(fiscal.work_week);
            println!(
                "{date}: fiscal year {} Q{}, {} ({start} to {end}), {} weeks in fiscal year",
                fiscal.fiscal_year,
                fiscal.fiscal_quarter,
                fiscal.work_week,
                calendar::weeks_in_fiscal_year(fiscal.work_week.year())
            );
        }
        Commands::Discover { week, list } => {
            let finder = FileDiscovery::from_config(&config.discovery);
            if list {
                let weeks = finder.list_available_weeks()?;
                if weeks.is_empty() {
                    println!("No PM_Flex files under {}.", finder.root().display());
                }
                for week in weeks {
                    println!("{week}  {}", finder.expected_path(week).display());
                }
            } else {
                let (path, week) = locate(&finder, &config, week)?;
                println!("{week}  {}", path.display());
            }
        }
        Commands::Import { csv, week, force } => {
            let (path, week) = match csv {
                Some(path) => {
                    let week = match week {
                        Some(week) => week,
                        None => discovery::week_from_folder(&path)
                            .context("pass --week for files outside the share layout")?,
                    };
                    (path, week)
                }
                None => {
                    let finder = FileDiscovery::from_config(&config.discovery);
                    locate(&finder, &config, week)?
                }
            };

            let pool = connect_pool().await?;
            if !force && db::is_week_loaded(&pool, week).await? {
                info!(%week, "work week already loaded, skipping (use --force to reload)");
                println!("{week} already loaded.");
                return Ok(());
            }

            match import_file(&pool, &path, week).await {
                Ok(weeks) => {
                    let labels: Vec<String> = weeks.iter().map(ToString::to_string).collect();
                    println!(
                        "Loaded {} from {}; score work weeks: {}.",
                        week,
                        path.display(),
                        labels.join(", ")
                    );
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    if let Err(log_err) =
                        db::log_failed_load(&pool, week, &path.to_string_lossy(), &message).await
                    {
                        warn!(error = %log_err, "failed to record load failure");
                    }
                    return Err(err);
                }
            }
        }
        Commands::Score { week, limit, json } => {
            let pool = connect_pool().await?;
            let Some(gold) = build_week(&pool, &config, week).await? else {
                println!("No events loaded for {week}.");
                return Ok(());
            };

            db::replace_chronic_results(&pool, week, &gold.outcome.scored).await?;
            db::replace_site_kpis(&pool, week, &gold.sites).await?;
            db::replace_ceid_kpis(&pool, week, &gold.ceids).await?;

            let outcome = &gold.outcome;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.scored)?);
            } else {
                println!(
                    "{} tools scored for {week}, {} chronic, {} skipped.",
                    outcome.scored.len(),
                    outcome.chronic_count(),
                    outcome.failures.len()
                );
                for tool in outcome.scored.iter().take(limit) {
                    println!(
                        "- {} ({}, {}) score {:.2} [{}]{}",
                        tool.key.entity,
                        tool.key.facility,
                        tool.key.ceid,
                        tool.result.chronic_score,
                        tool.result.chronic_severity,
                        if tool.result.chronic_flag { " chronic" } else { "" }
                    );
                }
            }
        }
        Commands::Report { week, out, limit } => {
            let pool = connect_pool().await?;
            let gold = build_week(&pool, &config, week).await?.unwrap_or_default();
            let report = report::build_report(
                week,
                &gold.outcome.scored,
                &gold.sites,
                &gold.ceids,
                limit,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed writing {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::History { since, entity } => {
            let pool = connect_pool().await?;
            let rows = db::fetch_chronic_history(&pool, since, entity.as_deref()).await?;
            if rows.is_empty() {
                println!("No stored results since {since}.");
            }
            for row in rows {
                println!(
                    "{} {} ({}, {}) score {:.2} [{}]{}",
                    row.work_week,
                    row.entity,
                    row.facility,
                    row.ceid,
                    row.chronic_score,
                    row.chronic_severity,
                    if row.chronic_flag { " chronic" } else { "" }
                );
            }
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect_pool() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the staging Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn locate(
    finder: &FileDiscovery,
    config: &Config,
    week: Option<WorkWeek>,
) -> anyhow::Result<(PathBuf, WorkWeek)> {
    match week {
        Some(week) => Ok((finder.find_for_week(week)?, week)),
        None => Ok(finder.find_latest(Utc::now().date_naive(), config.discovery.max_weeks_back)?),
    }
}

#[derive(Default)]
struct GoldWeek {
    outcome: ScoreOutcome,
    sites: Vec<SiteWeekKpi>,
    ceids: Vec<CeidWeekKpi>,
}

/// Scores `week` from the bronze rows dated in it and builds its KPIs, with
/// rolling windows drawn from previously stored weeks.
async fn build_week(
    pool: &PgPool,
    config: &Config,
    week: WorkWeek,
) -> anyhow::Result<Option<GoldWeek>> {
    let scorer = ChronicToolScorer::new(config.chronic_tools.clone())?;
    let events = db::fetch_events(pool, week).await?;
    if events.is_empty() {
        return Ok(None);
    }

    let mut outcome = pipeline::score_week(&scorer, &events, week);
    pipeline::rank(&mut outcome.scored);

    let mut sites = aggregate::summarize_sites(&events, &outcome.scored, &config.pm_timing);
    let history = match (week.offset(1 - ROLLING_WEEKS), week.previous()) {
        (Some(from), Some(to)) => db::fetch_site_kpis(pool, from, to).await?,
        _ => Vec::new(),
    };
    aggregate::apply_rolling_averages(&mut sites, &history);
    let ceids = aggregate::summarize_ceids(&events, &outcome.scored);

    Ok(Some(GoldWeek {
        outcome,
        sites,
        ceids,
    }))
}

/// Loads one export and returns the work weeks its rows were stored under.
async fn import_file(
    pool: &PgPool,
    path: &Path,
    week: WorkWeek,
) -> anyhow::Result<BTreeSet<WorkWeek>> {
    let batch = pipeline::prepare_import(path, week)?;
    db::load_events(pool, week, &path.to_string_lossy(), &batch.events, batch.skipped).await?;
    Ok(batch.work_weeks())
}
