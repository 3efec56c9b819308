use crate::domain::stage::Stage;
use crate::error::NotFound;
use crate::prompts::{self, SentimentInput};
use crate::stages::StageContext;
use crate::storage::log::fields;

/// Stage B: how the day's news sentiment relates to its prices, then a next-day prediction.
///
/// Both results land in the same `(position, daily key)` record.
pub async fn run(ctx: &StageContext, position: i64, model: &str) -> anyhow::Result<()> {
    let entry = ctx.planner.entry(position)?;
    let day = entry.daily.as_str();
    let bar = ctx.daily.require(day)?;

    let upstream = ctx.logs.stage(Stage::News).at_position(position).await?;
    if upstream.is_empty() {
        return Err(NotFound::new("stage A records", format!("position {position}")).into());
    }
    let sentiments = upstream
        .iter()
        .map(|r| {
            Ok(SentimentInput {
                current_day: &r.current_day,
                sentiment_analysis: r.require_field(fields::SENTIMENT_ANALYSIS)?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let log = ctx.logs.stage(Stage::Impact);
    let analysis = ctx
        .complete(
            "impact analysis",
            position,
            model,
            prompts::impact_analysis(day, &sentiments, bar),
        )
        .await?;
    log.upsert_field(position, day, fields::ANALYSIS, analysis.clone())
        .await?;

    let prediction = ctx
        .complete(
            "impact prediction",
            position,
            model,
            prompts::impact_prediction(&analysis),
        )
        .await?;
    log.upsert_field(position, day, fields::PREDICTION, prediction)
        .await?;
    Ok(())
}
