use crate::domain::stage::Stage;
use crate::prompts;
use crate::stages::StageContext;
use crate::storage::log::fields;

/// Stage D: reconciles the B and C predictions, then makes the final call.
pub async fn run(ctx: &StageContext, position: i64, model: &str) -> anyhow::Result<()> {
    let entry = ctx.planner.entry(position)?;
    let day = entry.daily.as_str();
    let impact = ctx
        .logs
        .stage(Stage::Impact)
        .require_with_field(position, fields::PREDICTION)
        .await?;
    let trend = ctx
        .logs
        .stage(Stage::Trend)
        .require_with_field(position, fields::PREDICTION)
        .await?;

    let log = ctx.logs.stage(Stage::Integration);
    let analysis = ctx
        .complete(
            "integration",
            position,
            model,
            prompts::integration(
                impact.require_field(fields::PREDICTION)?,
                trend.require_field(fields::PREDICTION)?,
            ),
        )
        .await?;
    log.upsert_field(position, day, fields::ANALYSIS, analysis.clone())
        .await?;

    let prediction = ctx
        .complete(
            "final prediction",
            position,
            model,
            prompts::final_prediction(&analysis),
        )
        .await?;
    log.upsert_field(position, day, fields::PREDICTION, prediction)
        .await?;
    Ok(())
}
