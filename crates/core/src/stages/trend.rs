use crate::domain::stage::Stage;
use crate::ingest::series::TREND_LOOKBACK_DAYS;
use crate::prompts;
use crate::stages::StageContext;
use crate::storage::log::{fields, LogRecord};

/// Stage C: next-day prediction from the trailing price window alone.
pub async fn run(ctx: &StageContext, position: i64, model: &str) -> anyhow::Result<()> {
    let entry = ctx.planner.entry(position)?;
    let window = ctx.daily.lookback(position, TREND_LOOKBACK_DAYS)?;

    let prediction = ctx
        .complete(
            "trend prediction",
            position,
            model,
            prompts::trend_prediction(&entry.daily, &window),
        )
        .await?;

    ctx.logs
        .stage(Stage::Trend)
        .append(LogRecord::new(
            position,
            entry.daily.as_str(),
            [(fields::PREDICTION, prediction)],
        ))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, FakeChat};

    #[tokio::test]
    async fn sends_every_bar_up_to_the_position() {
        let dir = tempfile::tempdir().unwrap();
        let chat = FakeChat::new();
        let ctx = fixture::context(dir.path(), chat.clone());

        run(&ctx, 2, "c").await.unwrap();

        let history = &chat.requests()[0][1].content;
        assert!(history.contains("1_2024-01-02"));
        assert!(history.contains("2_2024-01-03"));
        assert!(!history.contains("3_2024-01-04"));

        let records = ctx.logs.stage(Stage::Trend).at_position(2).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].current_day, "2_2024-01-03");
        assert_eq!(records[0].field(fields::PREDICTION), Some("reply 1 from c"));
    }
}
