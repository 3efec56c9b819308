//! The four chained stages.
//!
//! A stage resolves everything it reads (planner entry, bars, upstream log records) before its
//! first model call, then writes its own log keyed by `(position, current day)`.

pub mod impact;
pub mod integration;
pub mod news;
pub mod trend;

use crate::domain::outcome::OutcomeRecord;
use crate::domain::stage::{Stage, StageModels};
use crate::ingest::series::{NewsFeed, PriceSeries, DAILY_SERIES_KEY};
use crate::llm::{ChatClient, ChatMessage};
use crate::planner::Planner;
use crate::storage::log::{JsonLog, RecordLog};
use crate::storage::DataLayout;
use anyhow::Context;
use std::sync::Arc;
use tracing::Instrument;

/// Every log the chain reads or writes.
#[derive(Debug, Clone)]
pub struct ChainLogs {
    stages: [RecordLog; 4],
    evals: [RecordLog; 4],
    pub scoreboard: JsonLog<OutcomeRecord>,
}

impl ChainLogs {
    pub fn open(layout: &DataLayout) -> Self {
        Self {
            stages: Stage::ALL.map(|s| RecordLog::new(layout.stage_log(s))),
            evals: Stage::ALL.map(|s| RecordLog::new(layout.eval_log(s))),
            scoreboard: JsonLog::new(layout.scoreboard_log()),
        }
    }

    pub fn stage(&self, stage: Stage) -> &RecordLog {
        &self.stages[slot(stage)]
    }

    pub fn eval(&self, stage: Stage) -> &RecordLog {
        &self.evals[slot(stage)]
    }
}

fn slot(stage: Stage) -> usize {
    match stage {
        Stage::News => 0,
        Stage::Impact => 1,
        Stage::Trend => 2,
        Stage::Integration => 3,
    }
}

/// Inputs shared by every stage and evaluator of a run.
pub struct StageContext {
    pub layout: DataLayout,
    pub planner: Planner,
    pub daily: PriceSeries,
    pub news: NewsFeed,
    pub logs: ChainLogs,
    pub client: Arc<dyn ChatClient>,
}

impl StageContext {
    /// Loads the planner, the daily series and the news feed named by `layout`.
    pub async fn load(layout: DataLayout, client: Arc<dyn ChatClient>) -> anyhow::Result<Self> {
        let planner = Planner::load(&layout.planner)
            .await
            .context("planner must be built before running stages")?;
        let daily = PriceSeries::load(&layout.daily, DAILY_SERIES_KEY).await?;
        let news = NewsFeed::load(&layout.news).await?;
        Ok(Self::new(layout, planner, daily, news, client))
    }

    pub fn new(
        layout: DataLayout,
        planner: Planner,
        daily: PriceSeries,
        news: NewsFeed,
        client: Arc<dyn ChatClient>,
    ) -> Self {
        let logs = ChainLogs::open(&layout);
        Self {
            layout,
            planner,
            daily,
            news,
            logs,
            client,
        }
    }

    /// One model call. An empty reply is an error.
    pub(crate) async fn complete(
        &self,
        call: &'static str,
        position: i64,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> anyhow::Result<String> {
        tracing::info!(call, position, model, "requesting completion");
        let text = self
            .client
            .complete(model, messages)
            .await
            .with_context(|| format!("{call} call failed at position {position}"))?;
        anyhow::ensure!(
            !text.trim().is_empty(),
            "{call} call returned no text at position {position}"
        );
        Ok(text.trim().to_string())
    }
}

/// Runs one stage for `position` with the stage's current model.
pub async fn run_stage(
    ctx: &StageContext,
    stage: Stage,
    position: i64,
    models: &StageModels,
) -> anyhow::Result<()> {
    let model = models.get(stage);
    let span = tracing::info_span!("stage", stage = stage.id(), position, model);

    async {
        match stage {
            Stage::News => news::run(ctx, position, model).await.map(|_| ()),
            Stage::Impact => impact::run(ctx, position, model).await,
            Stage::Trend => trend::run(ctx, position, model).await,
            Stage::Integration => integration::run(ctx, position, model).await,
        }
    }
    .instrument(span)
    .await
    .with_context(|| format!("stage {} ({}) failed at position {position}", stage.id(), stage.label()))?;

    tracing::info!(stage = stage.id(), position, "stage complete");
    Ok(())
}
