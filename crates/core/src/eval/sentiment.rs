use crate::domain::stage::Stage;
use crate::error::NotFound;
use crate::prompts;
use crate::stages::StageContext;
use crate::storage::log::{fields, LogRecord};

/// Judges each stage A sentiment at `position` by how the stage B prediction it fed turned out.
///
/// Needs the stage B evaluation for `position + 1`, so it runs after the stage B evaluator.
pub async fn run(ctx: &StageContext, position: i64, model: &str) -> anyhow::Result<usize> {
    let records = ctx.logs.stage(Stage::News).at_position(position).await?;
    if records.is_empty() {
        return Err(NotFound::new("stage A records", format!("position {position}")).into());
    }
    let impact = ctx
        .logs
        .stage(Stage::Impact)
        .require_with_field(position, fields::PREDICTION)
        .await?;
    let impact_eval = ctx
        .logs
        .eval(Stage::Impact)
        .require_with_field(position + 1, fields::PREDICT_EVALUATION)
        .await?;
    let prediction = impact.require_field(fields::PREDICTION)?;
    let evaluation = impact_eval.require_field(fields::PREDICT_EVALUATION)?;

    let inputs = records
        .iter()
        .map(|r| {
            Ok((
                r.current_day.as_str(),
                r.require_field(fields::KEY_INFORMATION)?,
                r.require_field(fields::SENTIMENT_ANALYSIS)?,
            ))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let log = ctx.logs.eval(Stage::News);
    for (day, info, sentiment) in &inputs {
        let verdict = ctx
            .complete(
                "evaluate sentiment",
                position,
                model,
                prompts::evaluate_sentiment(info, sentiment, prediction, evaluation),
            )
            .await?;
        log.append(LogRecord::new(
            position,
            *day,
            [(fields::EVALUATION, verdict)],
        ))
        .await?;
    }
    Ok(inputs.len())
}
