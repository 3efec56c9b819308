use crate::domain::stage::Stage;
use crate::error::NotFound;
use crate::prompts;
use crate::stages::StageContext;
use crate::storage::log::{fields, LogRecord};

/// Stage A: key information and sentiment for every news item planned at `position`.
///
/// Appends one record per news key. Returns the number of items processed.
pub async fn run(ctx: &StageContext, position: i64, model: &str) -> anyhow::Result<usize> {
    let entry = ctx.planner.entry(position)?;
    let keys = entry.news_keys();
    if keys.is_empty() {
        return Err(NotFound::new("news", format!("planner position {position}")).into());
    }

    let digests = keys
        .iter()
        .map(|key| Ok((*key, ctx.news.digest(key)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let log = ctx.logs.stage(Stage::News);
    for (key, digest) in &digests {
        let info = ctx
            .complete("key information", position, model, prompts::key_information(key, digest))
            .await?;
        let sentiment = ctx
            .complete("sentiment analysis", position, model, prompts::sentiment_analysis(&info))
            .await?;

        log.append(LogRecord::new(
            position,
            *key,
            [
                (fields::KEY_INFORMATION, info),
                (fields::SENTIMENT_ANALYSIS, sentiment),
            ],
        ))
        .await?;
        tracing::debug!(position, news = key, "logged news item");
    }
    Ok(digests.len())
}
