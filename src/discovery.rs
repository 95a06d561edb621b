//! Locates weekly PM_Flex exports under a share laid out as
//! `<root>/<YYYYWWnn>/PM_Flex.csv`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::calendar::{self, WorkWeek};
use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;

#[derive(Debug, Clone)]
pub struct FileDiscovery {
    root: PathBuf,
    file_name: String,
}

impl FileDiscovery {
    pub fn new(root: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            file_name: file_name.into(),
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(&config.network_share_path, &config.file_name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn expected_path(&self, work_week: WorkWeek) -> PathBuf {
        self.root.join(work_week.to_string()).join(&self.file_name)
    }

    pub fn find_for_week(&self, work_week: WorkWeek) -> Result<PathBuf, DiscoveryError> {
        let path = self.expected_path(work_week);
        if !path.exists() {
            return Err(DiscoveryError::NotFound {
                work_week: work_week.to_string(),
                path,
            });
        }
        info!(%work_week, path = %path.display(), "found PM_Flex file");
        Ok(path)
    }

    /// Newest export at or before the work week of `from`, looking back at
    /// most `max_weeks_back` weeks.
    pub fn find_latest(
        &self,
        from: NaiveDate,
        max_weeks_back: u32,
    ) -> Result<(PathBuf, WorkWeek), DiscoveryError> {
        let current = calendar::work_week(from);
        info!(%current, max_weeks_back, "searching for latest PM_Flex file");

        for back in 0..=i64::from(max_weeks_back) {
            let Some(work_week) = current.offset(-back) else {
                break;
            };
            let path = self.expected_path(work_week);
            if path.is_file() {
                info!(%work_week, path = %path.display(), "found PM_Flex file");
                return Ok((path, work_week));
            }
            debug!(path = %path.display(), "not present");
        }

        Err(DiscoveryError::NoRecentFile {
            max_weeks_back,
            root: self.root.clone(),
        })
    }

    /// Work weeks that have an export, newest first. Directories whose
    /// name is not a valid work week label are ignored.
    pub fn list_available_weeks(&self) -> Result<Vec<WorkWeek>, DiscoveryError> {
        if !self.root.exists() {
            warn!(root = %self.root.display(), "share not accessible");
            return Ok(Vec::new());
        }

        let pattern = format!(
            "{}/*/{}",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            glob::Pattern::escape(&self.file_name)
        );
        let mut weeks = Vec::new();

        for entry in glob::glob(&pattern)? {
            let Ok(path) = entry else {
                continue;
            };
            if let Ok(week) = week_from_folder(&path) {
                weeks.push(week);
            }
        }

        weeks.sort_unstable_by(|a, b| b.cmp(a));
        weeks.dedup();
        info!(count = weeks.len(), "available work weeks");
        Ok(weeks)
    }
}

/// Work week named by the file's parent folder, e.g. `.../2025WW22/PM_Flex.csv`.
pub fn week_from_folder(path: &Path) -> Result<WorkWeek, DiscoveryError> {
    path.parent()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .and_then(|name| name.parse().ok())
        .ok_or_else(|| DiscoveryError::NoWeekInPath(path.to_path_buf()))
}

/// Checks that `path` is a readable, non-empty regular file.
pub fn validate_file(path: &Path) -> Result<u64, DiscoveryError> {
    let meta = fs::metadata(path).map_err(|source| DiscoveryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if !meta.is_file() {
        return Err(DiscoveryError::NotAFile(path.to_path_buf()));
    }
    if meta.len() == 0 {
        return Err(DiscoveryError::Empty(path.to_path_buf()));
    }
    info!(
        path = %path.display(),
        size_mb = meta.len() as f64 / (1024.0 * 1024.0),
        "file validation passed"
    );
    Ok(meta.len())
}
