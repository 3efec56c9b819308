use crate::error::NotFound;
use crate::ingest::types::{Article, PriceBar, SeriesKey};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

pub const DAILY_SERIES_KEY: &str = "Time Series (Daily)";
pub const WEEKLY_SERIES_KEY: &str = "Weekly Time Series";
pub const MONTHLY_SERIES_KEY: &str = "Monthly Time Series";

/// Lookback used by the price-trend stage.
pub const TREND_LOOKBACK_DAYS: i64 = 60;
pub const SHORT_LOOKBACK_DAYS: i64 = 30;

/// A price series in source order, keyed by `"{index}_{date}"`.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    keys: Vec<SeriesKey>,
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub async fn load(path: &Path, series_key: &str) -> Result<Self> {
        let doc = read_json(path).await?;
        Self::from_document(doc, series_key)
            .with_context(|| format!("invalid price series in {}", path.display()))
    }

    /// Extracts the series nested under `series_key` (e.g. `"Time Series (Daily)"`).
    pub fn from_document(doc: Value, series_key: &str) -> Result<Self> {
        let Value::Object(mut root) = doc else {
            anyhow::bail!("price document must be a JSON object");
        };
        let series = root
            .remove(series_key)
            .with_context(|| format!("missing top-level key {series_key:?}"))?;
        let Value::Object(series) = series else {
            anyhow::bail!("{series_key:?} must be a JSON object");
        };

        let mut out = Self::default();
        for (raw, bar) in series {
            let key = SeriesKey::parse(&raw)?;
            let Value::Object(bar) = bar else {
                anyhow::bail!("bar {raw:?} must be a JSON object");
            };
            out.keys.push(key);
            out.bars.push(bar);
        }
        Ok(out)
    }

    pub fn keys(&self) -> &[SeriesKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, raw_key: &str) -> Option<&PriceBar> {
        self.keys
            .iter()
            .position(|k| k.raw == raw_key)
            .map(|i| &self.bars[i])
    }

    pub fn require(&self, raw_key: &str) -> Result<&PriceBar> {
        self.get(raw_key)
            .ok_or_else(|| NotFound::new("price bar", raw_key).into())
    }

    pub fn find_by_index(&self, index: i64) -> Option<(&SeriesKey, &PriceBar)> {
        self.keys
            .iter()
            .position(|k| k.index == index)
            .map(|i| (&self.keys[i], &self.bars[i]))
    }

    /// Bars for indices `position - window + 1 ..= position`, oldest first.
    ///
    /// Indices with no bar (non-trading days, gaps in the numbering) are skipped. Fails with
    /// [`NotFound`] only when nothing in the window resolves.
    pub fn lookback(&self, position: i64, window: i64) -> Result<Vec<(&SeriesKey, &PriceBar)>> {
        anyhow::ensure!(window >= 1, "lookback window must be >= 1 (got {window})");

        let start = position.saturating_sub(window - 1);
        let not_found = || NotFound::new("price data", format!("lookback {start}..={position}"));
        // Indices below the series' lowest one cannot resolve.
        let Some(lowest) = self.keys.iter().map(|k| k.index).min() else {
            return Err(not_found().into());
        };
        let first = start.max(lowest);
        let mut out = Vec::new();
        let mut missing = 0usize;
        for index in first..=position {
            match self.find_by_index(index) {
                Some(hit) => out.push(hit),
                None => missing += 1,
            }
        }

        if out.is_empty() {
            return Err(not_found().into());
        }
        if missing > 0 {
            tracing::debug!(position, window, missing, "lookback window has gaps");
        }
        Ok(out)
    }
}

/// The news feed: `"{index}_{date}" -> [ {title, body} ]`, in source order.
#[derive(Debug, Clone, Default)]
pub struct NewsFeed {
    keys: Vec<SeriesKey>,
    articles: Vec<Vec<Article>>,
}

impl NewsFeed {
    pub async fn load(path: &Path) -> Result<Self> {
        let doc = read_json(path).await?;
        Self::from_document(doc).with_context(|| format!("invalid news feed in {}", path.display()))
    }

    pub fn from_document(doc: Value) -> Result<Self> {
        let Value::Object(root) = doc else {
            anyhow::bail!("news document must be a JSON object");
        };

        let mut out = Self::default();
        for (raw, items) in root {
            let key = SeriesKey::parse(&raw)?;
            let items: Vec<Article> = serde_json::from_value(items)
                .with_context(|| format!("news {raw:?} must be an array of articles"))?;
            out.keys.push(key);
            out.articles.push(items);
        }
        Ok(out)
    }

    pub fn keys(&self) -> &[SeriesKey] {
        &self.keys
    }

    pub fn articles(&self, raw_key: &str) -> Result<&[Article]> {
        self.keys
            .iter()
            .position(|k| k.raw == raw_key)
            .map(|i| self.articles[i].as_slice())
            .ok_or_else(|| NotFound::new("news", raw_key).into())
    }

    /// All articles under `raw_key` as one text block (`title\n\nbody`, blank-line separated).
    pub fn digest(&self, raw_key: &str) -> Result<String> {
        let articles = self.articles(raw_key)?;
        Ok(articles
            .iter()
            .map(|a| format!("{}\n\n{}", a.title, a.body))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

pub(crate) async fn read_json(path: &Path) -> Result<Value> {
    tracing::debug!(path = %path.display(), "reading JSON file");
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("malformed JSON in {}", path.display()))
}
