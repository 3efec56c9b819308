//! Evaluators: each one looks back at a stage's output once the next day's prices are known.

pub mod metrics;
pub mod prediction;
pub mod scoreboard;
pub mod sentiment;
pub mod simulation;

use crate::domain::stage::{Stage, StageModels};
use crate::stages::StageContext;
use anyhow::Context;

/// Order in which evaluators run after a position's stages. Stage A is judged through the stage
/// B evaluation, so B comes first.
pub const EVAL_ORDER: [Stage; 4] = [Stage::Impact, Stage::News, Stage::Trend, Stage::Integration];

/// Runs the evaluator for `stage` at `position` with the evaluation model.
pub async fn run_eval(
    ctx: &StageContext,
    stage: Stage,
    position: i64,
    models: &StageModels,
) -> anyhow::Result<()> {
    let model = models.eval.as_str();
    match stage {
        Stage::News => sentiment::run(ctx, position, model).await.map(|_| ()),
        _ => prediction::run(ctx, stage, position, model).await,
    }
    .with_context(|| format!("eval-{} failed at position {position}", stage.id()))?;

    tracing::info!(stage = stage.id(), position, "evaluation complete");
    Ok(())
}
