use crate::domain::stage::Stage;
use crate::llm::ChatMessage;
use crate::stages::ChainLogs;
use crate::storage::log::{fields, LogRecord};
use crate::storage::write_atomic;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One chat transcript of a fine-tuning file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub messages: Vec<ChatMessage>,
}

impl TrainingExample {
    fn new(system: &str, user: String, evaluation: &str) -> Self {
        Self {
            messages: vec![
                ChatMessage::system(system),
                ChatMessage::user(user),
                ChatMessage::assistant(format!("Evaluation: {evaluation}")),
            ],
        }
    }
}

fn system_prompt(stage: Stage) -> &'static str {
    match stage {
        Stage::News => "You are an expert in stock market sentiment analysis.",
        Stage::Impact => "You are an expert in how news sentiment moves stock prices.",
        Stage::Trend => "You are an expert in technical analysis of stock price trends.",
        Stage::Integration => "You are an expert in combining market forecasts into one call.",
    }
}

/// Pairs each stage record with the evaluations it received.
///
/// Stage A concatenates every record at a position and pairs it with the stage A evaluations at
/// that same position. Predicting stages pair a record at `p` with the evaluations logged at
/// `p + 1`, the day the prediction was checked against.
pub fn build_examples(
    stage: Stage,
    records: &[LogRecord],
    evals: &[LogRecord],
) -> Vec<TrainingExample> {
    let mut by_position: BTreeMap<i64, Vec<&LogRecord>> = BTreeMap::new();
    for eval in evals {
        by_position.entry(eval.position).or_default().push(eval);
    }
    let system = system_prompt(stage);

    if stage == Stage::News {
        let mut merged: BTreeMap<i64, (String, String)> = BTreeMap::new();
        for r in records {
            let (info, sentiment) = merged.entry(r.position).or_default();
            info.push_str(r.field(fields::KEY_INFORMATION).unwrap_or_default());
            info.push_str("\n\n");
            sentiment.push_str(r.field(fields::SENTIMENT_ANALYSIS).unwrap_or_default());
            sentiment.push_str("\n\n");
        }

        return merged
            .into_iter()
            .flat_map(|(position, (info, sentiment))| {
                let evals = by_position.get(&position).cloned().unwrap_or_default();
                evals.into_iter().filter_map(move |eval| {
                    let evaluation = eval.field(fields::EVALUATION)?;
                    Some(TrainingExample::new(
                        system,
                        format!(
                            "Key information and sentiment analysis for position {position}:\n{info}\nSentiment: {sentiment}"
                        ),
                        evaluation,
                    ))
                })
            })
            .collect();
    }

    records
        .iter()
        .filter_map(|r| Some((r, r.field(fields::PREDICTION)?)))
        .flat_map(|(r, prediction)| {
            let user = match stage {
                Stage::Trend => format!("Price history up to {}: {prediction}", r.current_day),
                _ => format!(
                    "Analysis and prediction for position {} (current day: {}):\n{}\nPrediction: {prediction}",
                    r.position,
                    r.current_day,
                    r.field(fields::ANALYSIS).unwrap_or_default(),
                ),
            };
            let evals = by_position.get(&(r.position + 1)).cloned().unwrap_or_default();
            evals
                .into_iter()
                .filter_map(|eval| eval.field(fields::PREDICT_EVALUATION))
                .map(move |evaluation| TrainingExample::new(system, user.clone(), evaluation))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Builds the stage's examples from its logs and writes them to `out` as JSONL.
pub async fn prepare(logs: &ChainLogs, stage: Stage, out: &Path) -> anyhow::Result<usize> {
    let records = logs.stage(stage).read().await?;
    let evals = logs.eval(stage).read().await?;
    let examples = build_examples(stage, &records, &evals);

    write_jsonl(out, &examples).await?;
    tracing::info!(
        stage = stage.id(),
        examples = examples.len(),
        path = %out.display(),
        "prepared fine-tuning data"
    );
    Ok(examples.len())
}

pub async fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    let mut buf = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut buf, row).context("failed to serialize JSONL row")?;
        buf.push(b'\n');
    }
    write_atomic(path, &buf).await
}
