//! Position-keyed JSON log files.
//!
//! Every stage and evaluator owns one file holding a JSON array of records. A write always
//! reads the whole array, changes it in memory and writes it back; [`JsonLog::update`] is that
//! transaction boundary. It is serialized per store by a mutex, and committed with a
//! write-then-rename so a crash never leaves a half-written log behind.

use crate::error::NotFound;
use crate::storage::write_json_pretty;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod fields {
    pub const KEY_INFORMATION: &str = "key information";
    pub const SENTIMENT_ANALYSIS: &str = "sentiment analysis";
    pub const ANALYSIS: &str = "analysis";
    pub const PREDICTION: &str = "prediction";
    pub const PREDICT_EVALUATION: &str = "predict-evaluation";
    pub const EVALUATION: &str = "evaluation";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub position: i64,
    #[serde(rename = "current day")]
    pub current_day: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl LogRecord {
    pub fn new<'a>(
        position: i64,
        current_day: impl Into<String>,
        data: impl IntoIterator<Item = (&'a str, String)>,
    ) -> Self {
        Self {
            position,
            current_day: current_day.into(),
            data: data
                .into_iter()
                .map(|(k, v)| (k.to_string(), Value::String(v)))
                .collect(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }

    pub fn require_field(&self, name: &'static str) -> anyhow::Result<&str> {
        self.field(name).ok_or_else(|| {
            NotFound::new(
                name,
                format!("position {} ({})", self.position, self.current_day),
            )
            .into()
        })
    }
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Merged,
    Appended,
}

/// A JSON-array log file of `T` records.
#[derive(Debug)]
pub struct JsonLog<T> {
    path: PathBuf,
    lock: Arc<tokio::sync::Mutex<()>>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonLog<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            lock: Arc::clone(&self.lock),
            _record: PhantomData,
        }
    }
}

pub type RecordLog = JsonLog<LogRecord>;

impl<T> JsonLog<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(tokio::sync::Mutex::new(())),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents. A missing or blank file is empty; so is a malformed one, with a warning.
    pub async fn read(&self) -> anyhow::Result<Vec<T>> {
        let _guard = self.lock.lock().await;
        self.read_unlocked().await
    }

    /// Runs `f` against the full record list and persists the result as one transaction.
    pub async fn update<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> anyhow::Result<R> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_unlocked().await?;
        let out = f(&mut records);
        write_json_pretty(&self.path, &records)
            .await
            .with_context(|| format!("failed to persist log {}", self.path.display()))?;
        Ok(out)
    }

    pub async fn append(&self, record: T) -> anyhow::Result<()> {
        self.update(|records| records.push(record)).await
    }

    async fn read_unlocked(&self) -> anyhow::Result<Vec<T>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "log file not found; starting empty");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };

        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Vec<T>>(&text) {
            Ok(records) => Ok(records),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "log file is malformed; treating as empty"
                );
                Ok(Vec::new())
            }
        }
    }
}

impl JsonLog<LogRecord> {
    /// Merges `data` into the record keyed by `(position, current_day)`, or appends a new one.
    pub async fn upsert(
        &self,
        position: i64,
        current_day: &str,
        data: Map<String, Value>,
    ) -> anyhow::Result<Upsert> {
        self.update(|records| {
            match records
                .iter_mut()
                .find(|r| r.position == position && r.current_day == current_day)
            {
                Some(existing) => {
                    existing.data.extend(data);
                    Upsert::Merged
                }
                None => {
                    records.push(LogRecord {
                        position,
                        current_day: current_day.to_string(),
                        data,
                    });
                    Upsert::Appended
                }
            }
        })
        .await
    }

    pub async fn upsert_field(
        &self,
        position: i64,
        current_day: &str,
        name: &str,
        value: String,
    ) -> anyhow::Result<Upsert> {
        let mut data = Map::new();
        data.insert(name.to_string(), Value::String(value));
        self.upsert(position, current_day, data).await
    }

    /// Every record at `position`, in file order.
    pub async fn at_position(&self, position: i64) -> anyhow::Result<Vec<LogRecord>> {
        Ok(self
            .read()
            .await?
            .into_iter()
            .filter(|r| r.position == position)
            .collect())
    }

    /// The first record at `position` that carries `field`.
    pub async fn require_with_field(
        &self,
        position: i64,
        field: &'static str,
    ) -> anyhow::Result<LogRecord> {
        self.read()
            .await?
            .into_iter()
            .find(|r| r.position == position && r.field(field).is_some())
            .ok_or_else(|| {
                NotFound::new(
                    field,
                    format!("position {position} in {}", self.path.display()),
                )
                .into()
            })
    }
}
