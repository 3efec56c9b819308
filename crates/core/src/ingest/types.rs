use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One bar of a price series: `"1. open" -> "472.16"`, etc. Field order follows the source file.
pub type PriceBar = serde_json::Map<String, serde_json::Value>;

/// A composite `"{index}_{date}"` key as used by every price series and the news feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub raw: String,
    pub index: i64,
    pub date: NaiveDate,
}

impl SeriesKey {
    /// Parses `"-27_2022-02-03"` into index `-27` and date `2022-02-03`.
    ///
    /// Everything after the first `_` is the date; further underscores are read as dashes, and a
    /// trailing time component (`"2024-01-02 16:00:00"`) is ignored.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let (index, rest) = raw
            .split_once('_')
            .with_context(|| format!("series key has no index prefix: {raw:?}"))?;
        let index = index
            .trim()
            .parse::<i64>()
            .with_context(|| format!("series key index is not an integer: {raw:?}"))?;

        let date_part = rest.replace('_', "-");
        let date_part = date_part.split_whitespace().next().unwrap_or_default();
        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            .with_context(|| format!("series key date is not YYYY-MM-DD: {raw:?}"))?;

        Ok(Self {
            raw: raw.to_string(),
            index,
            date,
        })
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}
