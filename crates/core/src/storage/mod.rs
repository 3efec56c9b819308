pub mod lock;
pub mod log;

use crate::config::Settings;
use crate::domain::stage::Stage;
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Where every input, planner, log and dataset file lives.
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub data_dir: PathBuf,
    pub daily: PathBuf,
    pub weekly: PathBuf,
    pub monthly: PathBuf,
    pub news: PathBuf,
    pub planner: PathBuf,
    pub logs_dir: PathBuf,
    pub fine_tuning_dir: PathBuf,
}

impl DataLayout {
    pub fn from_settings(settings: &Settings) -> Self {
        let root = &settings.data_dir;
        let or = |v: &Option<PathBuf>, default: PathBuf| v.clone().unwrap_or(default);

        Self {
            data_dir: root.clone(),
            daily: or(&settings.daily_path, root.join("stock/daily_SPY.json")),
            weekly: or(&settings.weekly_path, root.join("stock/weekly_SPY.json")),
            monthly: or(&settings.monthly_path, root.join("stock/monthly_SPY.json")),
            news: or(&settings.news_path, root.join("news/news.json")),
            planner: or(&settings.planner_path, root.join("planner/planner.json")),
            logs_dir: or(&settings.logs_dir, root.join("logs")),
            fine_tuning_dir: or(&settings.fine_tuning_dir, root.join("fine_tuning_data")),
        }
    }

    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        Self::from_settings(&Settings::with_data_dir(data_dir))
    }

    pub fn stage_log(&self, stage: Stage) -> PathBuf {
        self.logs_dir.join(format!("{}.logs.json", stage.id()))
    }

    pub fn eval_log(&self, stage: Stage) -> PathBuf {
        self.logs_dir.join(format!("eval-{}.logs.json", stage.id()))
    }

    pub fn scoreboard_log(&self) -> PathBuf {
        self.logs_dir.join("eval.logs.json")
    }

    /// `metric_{kind}_{stage}.json` next to the logs, `kind` being `overall`, `monthly` or `daily`.
    pub fn metric_report(&self, kind: &str, stage: &str) -> PathBuf {
        self.logs_dir.join(format!("metric_{kind}_{stage}.json"))
    }

    pub fn dataset(&self, stage: Stage) -> PathBuf {
        self.fine_tuning_dir
            .join(format!("{}_fine_tuning_data.jsonl", stage.id()))
    }
}

/// Writes `bytes` next to `path` and renames it into place.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to move {} into place", path.display()))?;
    Ok(())
}

/// Pretty JSON, committed with [`write_atomic`].
pub async fn write_json_pretty<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(value).context("failed to serialize JSON")?;
    write_atomic(path, &json).await
}
