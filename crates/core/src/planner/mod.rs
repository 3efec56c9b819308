//! The planner: one entry per trading day, correlating the daily, weekly, monthly and news keys
//! that every stage resolves by position.

use crate::error::NotFound;
use crate::ingest::series::{
    read_json, NewsFeed, PriceSeries, DAILY_SERIES_KEY, MONTHLY_SERIES_KEY, WEEKLY_SERIES_KEY,
};
use crate::ingest::types::SeriesKey;
use crate::storage::{write_json_pretty, DataLayout};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const NEWS_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerEntry {
    pub position: i64,
    pub daily: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly: Option<String>,
    #[serde(default)]
    pub news: String,
}

impl PlannerEntry {
    pub fn news_keys(&self) -> Vec<&str> {
        self.news
            .split(NEWS_SEPARATOR)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect()
    }
}

/// Builds the planner from parsed series keys, one entry per daily key in daily order.
///
/// News items are partitioned across entries by a date watermark: an entry takes every news
/// key dated after the watermark and on or before its own date, then the watermark moves to the
/// latest date taken. Dates are calendar dates, so the daily keys must be in non-decreasing date
/// order for the partition to hold.
pub fn build_planner(
    daily: &[SeriesKey],
    weekly: &[SeriesKey],
    monthly: &[SeriesKey],
    news: &[SeriesKey],
) -> Vec<PlannerEntry> {
    for pair in daily.windows(2) {
        if pair[1].date < pair[0].date {
            tracing::warn!(
                previous = %pair[0],
                next = %pair[1],
                "daily series is not in date order; news partition may skip items"
            );
        }
    }

    let (entries, _watermark) = daily.iter().fold(
        (Vec::with_capacity(daily.len()), None),
        |(mut entries, watermark), day| {
            let (entry, watermark) = plan_day(day, weekly, monthly, news, watermark);
            entries.push(entry);
            (entries, watermark)
        },
    );
    entries
}

/// One planner step: the entry for `day`, and the watermark to carry into the next day.
pub fn plan_day(
    day: &SeriesKey,
    weekly: &[SeriesKey],
    monthly: &[SeriesKey],
    news: &[SeriesKey],
    watermark: Option<NaiveDate>,
) -> (PlannerEntry, Option<NaiveDate>) {
    let same_day = |series: &[SeriesKey]| {
        series
            .iter()
            .find(|k| k.date == day.date)
            .map(|k| k.raw.clone())
    };

    let taken: Vec<&SeriesKey> = news
        .iter()
        .filter(|k| watermark.map_or(true, |w| k.date > w) && k.date <= day.date)
        .collect();

    // Advance to the latest date taken, never backwards, so an unordered feed cannot hand the
    // same item to two days.
    let next_watermark = taken.iter().map(|k| k.date).max().max(watermark);

    let entry = PlannerEntry {
        position: day.index,
        daily: day.raw.clone(),
        weekly: same_day(weekly),
        monthly: same_day(monthly),
        news: taken
            .iter()
            .map(|k| k.raw.as_str())
            .collect::<Vec<_>>()
            .join(NEWS_SEPARATOR),
    };
    tracing::debug!(
        position = entry.position,
        daily = %entry.daily,
        weekly = ?entry.weekly,
        monthly = ?entry.monthly,
        news = taken.len(),
        "planned day"
    );
    (entry, next_watermark)
}

#[derive(Debug, Clone, Default)]
pub struct Planner {
    entries: Vec<PlannerEntry>,
}

impl Planner {
    pub fn new(entries: Vec<PlannerEntry>) -> Self {
        Self { entries }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let doc = read_json(path).await?;
        let entries = serde_json::from_value::<Vec<PlannerEntry>>(doc)
            .with_context(|| format!("planner {} is not a list of entries", path.display()))?;
        Ok(Self { entries })
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        write_json_pretty(path, &self.entries)
            .await
            .with_context(|| format!("failed to write planner {}", path.display()))
    }

    pub fn entries(&self) -> &[PlannerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, position: i64) -> Result<&PlannerEntry> {
        self.entries
            .iter()
            .find(|e| e.position == position)
            .ok_or_else(|| NotFound::new("planner entry", format!("position {position}")).into())
    }

    /// Entries sorted by position; ties keep file order.
    pub fn in_position_order(&self) -> Vec<&PlannerEntry> {
        let mut out: Vec<&PlannerEntry> = self.entries.iter().collect();
        out.sort_by_key(|e| e.position);
        out
    }
}

/// Loads the four sources named by `layout`, builds the planner and writes it.
///
/// Any unreadable or malformed source aborts before anything is written.
pub async fn build_from_sources(layout: &DataLayout) -> Result<Planner> {
    tracing::info!(
        daily = %layout.daily.display(),
        weekly = %layout.weekly.display(),
        monthly = %layout.monthly.display(),
        news = %layout.news.display(),
        "building planner"
    );
    let daily = PriceSeries::load(&layout.daily, DAILY_SERIES_KEY).await?;
    let weekly = PriceSeries::load(&layout.weekly, WEEKLY_SERIES_KEY).await?;
    let monthly = PriceSeries::load(&layout.monthly, MONTHLY_SERIES_KEY).await?;
    let news = NewsFeed::load(&layout.news).await?;

    let planner = Planner::new(build_planner(
        daily.keys(),
        weekly.keys(),
        monthly.keys(),
        news.keys(),
    ));
    planner.save(&layout.planner).await?;
    tracing::info!(
        entries = planner.len(),
        path = %layout.planner.display(),
        "planner written"
    );
    Ok(planner)
}
