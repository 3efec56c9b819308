use crate::domain::stage::Stage;
use crate::prompts;
use crate::stages::StageContext;
use crate::storage::log::{fields, LogRecord};

/// Checks a stage's prediction at `position` against the bar of `position + 1`.
///
/// The evaluation is logged under the next day's position and daily key.
pub async fn run(ctx: &StageContext, stage: Stage, position: i64, model: &str) -> anyhow::Result<()> {
    anyhow::ensure!(stage.predicts(), "stage {stage} makes no prediction to evaluate");

    let next = ctx.planner.entry(position + 1)?;
    let actual = ctx.daily.require(&next.daily)?;
    let record = ctx
        .logs
        .stage(stage)
        .require_with_field(position, fields::PREDICTION)
        .await?;
    let prediction = record.require_field(fields::PREDICTION)?;

    let evaluation = ctx
        .complete(
            "evaluate prediction",
            position,
            model,
            prompts::evaluate_prediction(prediction, &next.daily, actual),
        )
        .await?;

    ctx.logs
        .eval(stage)
        .append(LogRecord::new(
            position + 1,
            next.daily.as_str(),
            [(fields::PREDICT_EVALUATION, evaluation)],
        ))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_not_found;
    use crate::testing::{fixture, FakeChat};

    #[tokio::test]
    async fn logs_under_the_next_position() {
        let dir = tempfile::tempdir().unwrap();
        let chat = FakeChat::new();
        let ctx = fixture::context(dir.path(), chat.clone());
        ctx.logs
            .stage(Stage::Trend)
            .append(LogRecord::new(1, "1_2024-01-02", [(fields::PREDICTION, "rise 0.3%".to_string())]))
            .await
            .unwrap();

        run(&ctx, Stage::Trend, 1, "eval").await.unwrap();

        let evals = ctx.logs.eval(Stage::Trend).read().await.unwrap();
        assert_eq!(evals.len(), 1);
        assert_eq!(evals[0].position, 2);
        assert_eq!(evals[0].current_day, "2_2024-01-03");
        assert_eq!(evals[0].field(fields::PREDICT_EVALUATION), Some("reply 1 from eval"));
        assert!(chat.requests()[0][1].content.contains("468.79"));
    }

    #[tokio::test]
    async fn last_planned_day_has_nothing_to_compare_with() {
        let dir = tempfile::tempdir().unwrap();
        let chat = FakeChat::new();
        let ctx = fixture::context(dir.path(), chat.clone());
        ctx.logs
            .stage(Stage::Impact)
            .append(LogRecord::new(3, "3_2024-01-04", [(fields::PREDICTION, "fall".to_string())]))
            .await
            .unwrap();

        let err = run(&ctx, Stage::Impact, 3, "eval").await.unwrap_err();
        assert!(is_not_found(&err));
        assert_eq!(chat.calls(), 0);
    }

    #[tokio::test]
    async fn news_stage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture::context(dir.path(), FakeChat::new());
        assert!(run(&ctx, Stage::News, 1, "eval").await.is_err());
    }
}
