//! Accuracy of the scored stages over the scoreboard: overall, per 30-position window and per day.

use crate::domain::outcome::{Direction, DirectionCall, OutcomeRecord};
use crate::storage::{write_json_pretty, DataLayout};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// First number in the amount text, negated for a `fall`.
///
/// Free-text amounts such as `"from 1.0% to 1.5%"` or `"approximately 0.8% decline"` take their
/// first number. Text with no number at all yields `None`.
pub fn parse_amount(call: &DirectionCall) -> Option<f64> {
    let text = call.amount.as_str();
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let negative = text[..start].ends_with('-');
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value = digits.trim_end_matches('.').parse::<f64>().ok()?;
    let value = if negative { -value } else { value };
    Some(match call.direction {
        Direction::Fall => -value.abs(),
        Direction::Rise => value,
    })
}

/// Positions per rolling window in the monthly breakdown.
pub const WINDOW_POSITIONS: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageMetrics {
    pub stage: String,
    pub samples: usize,
    pub hits: usize,
    pub accuracy: f64,
    /// Mean absolute error of the amount, in percentage points.
    pub mae: f64,
    pub rmse: f64,
    /// Coefficient of determination; absent with fewer than two samples.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r2: Option<f64>,
    pub start_position: i64,
    pub end_position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyError {
    pub position: i64,
    pub rmse: f64,
}

/// Everything reported for one stage: the whole run, each full window and each day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub overall: StageMetrics,
    pub monthly: Vec<StageMetrics>,
    pub daily: Vec<DailyError>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    position: i64,
    predicted: f64,
    actual: f64,
    hit: bool,
}

/// Scored samples per stage, in position order.
fn samples(rows: &[OutcomeRecord]) -> BTreeMap<&str, Vec<Sample>> {
    let mut per_stage: BTreeMap<&str, Vec<Sample>> = BTreeMap::new();
    for row in rows {
        let Some(outcome) = &row.outcome else {
            continue;
        };
        let Some(actual) = parse_amount(outcome) else {
            tracing::warn!(position = row.position, amount = %outcome.amount, "unparsable outcome amount");
            continue;
        };
        for (stage, call) in &row.calls {
            per_stage.entry(stage.as_str()).or_default().push(Sample {
                position: row.position,
                predicted: parse_amount(call).unwrap_or(0.0),
                actual,
                hit: call.direction == outcome.direction,
            });
        }
    }
    for list in per_stage.values_mut() {
        list.sort_by_key(|s| s.position);
    }
    per_stage
}

fn r2(samples: &[Sample]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let mean = samples.iter().map(|s| s.actual).sum::<f64>() / samples.len() as f64;
    let ss_res: f64 = samples.iter().map(|s| (s.actual - s.predicted).powi(2)).sum();
    let ss_tot: f64 = samples.iter().map(|s| (s.actual - mean).powi(2)).sum();
    // Constant outcomes: perfect predictions score 1, anything else 0.
    if ss_tot == 0.0 {
        return Some(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Some(1.0 - ss_res / ss_tot)
}

/// Metrics over a non-empty, position-ordered run of samples.
fn summarize(stage: &str, samples: &[Sample]) -> StageMetrics {
    let n = samples.len() as f64;
    let hits = samples.iter().filter(|s| s.hit).count();
    let errors = samples.iter().map(|s| s.predicted - s.actual);
    StageMetrics {
        stage: stage.to_string(),
        samples: samples.len(),
        hits,
        accuracy: hits as f64 / n,
        mae: errors.clone().map(f64::abs).sum::<f64>() / n,
        rmse: (errors.map(|e| e * e).sum::<f64>() / n).sqrt(),
        r2: r2(samples),
        start_position: samples.first().map(|s| s.position).unwrap_or_default(),
        end_position: samples.last().map(|s| s.position).unwrap_or_default(),
    }
}

/// Per-stage metrics over every row that has both the stage's call and an outcome.
pub fn score(rows: &[OutcomeRecord]) -> Vec<StageMetrics> {
    samples(rows)
        .into_iter()
        .map(|(stage, list)| summarize(stage, &list))
        .collect()
}

/// Overall, per-window and per-day breakdown for each stage found in the scoreboard.
///
/// Windows are consecutive runs of [`WINDOW_POSITIONS`] samples; a trailing partial window is
/// left out.
pub fn report(rows: &[OutcomeRecord]) -> Vec<StageReport> {
    samples(rows)
        .into_iter()
        .map(|(stage, list)| StageReport {
            stage: stage.to_string(),
            overall: summarize(stage, &list),
            monthly: list
                .chunks_exact(WINDOW_POSITIONS)
                .map(|window| summarize(stage, window))
                .collect(),
            daily: list
                .iter()
                .map(|s| DailyError {
                    position: s.position,
                    rmse: (s.predicted - s.actual).abs(),
                })
                .collect(),
        })
        .collect()
}

/// Writes `metric_{overall|monthly|daily}_{stage}.json` for every report; the monthly file only
/// when at least one window is complete. Returns the files written.
pub async fn save_reports(
    layout: &DataLayout,
    reports: &[StageReport],
) -> anyhow::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for report in reports {
        let overall = layout.metric_report("overall", &report.stage);
        write_json_pretty(&overall, std::slice::from_ref(&report.overall)).await?;
        written.push(overall);

        if !report.monthly.is_empty() {
            let monthly = layout.metric_report("monthly", &report.stage);
            write_json_pretty(&monthly, &report.monthly).await?;
            written.push(monthly);
        }

        let daily = layout.metric_report("daily", &report.stage);
        write_json_pretty(&daily, &report.daily).await?;
        written.push(daily);
    }
    tracing::info!(files = written.len(), "metric reports written");
    Ok(written)
}
