use crate::domain::outcome::{DirectionCall, OutcomeRecord};
use crate::domain::stage::Stage;
use crate::ingest::transform::realized_call;
use crate::llm::json::parse_direction_call;
use crate::prompts;
use crate::stages::StageContext;
use crate::storage::log::fields;

/// Stages whose predictions are scored, in the order they are extracted.
pub const SCORED_STAGES: [Stage; 3] = [Stage::Impact, Stage::Trend, Stage::Integration];

/// Extracts each scored stage's call at `position` and files it, with what actually happened,
/// under `position + 1` in the scoreboard.
pub async fn record_outcome(
    ctx: &StageContext,
    position: i64,
    model: &str,
) -> anyhow::Result<OutcomeRecord> {
    let next = ctx.planner.entry(position + 1)?;
    let outcome = realized_call(&next.daily, ctx.daily.require(&next.daily)?)?;

    let mut predictions = Vec::with_capacity(SCORED_STAGES.len());
    for stage in SCORED_STAGES {
        let record = ctx
            .logs
            .stage(stage)
            .require_with_field(position, fields::PREDICTION)
            .await?;
        predictions.push((stage, record));
    }

    let mut calls = Vec::with_capacity(predictions.len());
    for (stage, record) in &predictions {
        let text = ctx
            .complete(
                "extract direction",
                position,
                model,
                prompts::extract_direction(record.require_field(fields::PREDICTION)?),
            )
            .await?;
        let call = parse_direction_call(&text, stage.id())?;
        tracing::debug!(
            stage = stage.id(),
            position,
            direction = %call.direction,
            amount = %call.amount,
            "extracted direction"
        );
        calls.push((*stage, call));
    }

    let target = position + 1;
    let date = next.daily.clone();
    let row = ctx
        .logs
        .scoreboard
        .update(move |rows| merge_row(rows, target, &date, calls, outcome))
        .await?;
    Ok(row)
}

fn merge_row(
    rows: &mut Vec<OutcomeRecord>,
    position: i64,
    date: &str,
    calls: Vec<(Stage, DirectionCall)>,
    outcome: DirectionCall,
) -> OutcomeRecord {
    let idx = match rows.iter().position(|r| r.position == position) {
        Some(i) => i,
        None => {
            rows.push(OutcomeRecord::new(position, date));
            rows.len() - 1
        }
    };
    let row = &mut rows[idx];
    row.date = date.to_string();
    row.calls
        .extend(calls.into_iter().map(|(s, c)| (s.id().to_string(), c)));
    row.outcome = Some(outcome);
    row.clone()
}
