//! The sequential driver: every planned position through the four stages, the evaluators and,
//! every so often, a fine-tuning round that swaps in new models.

use crate::domain::stage::{Stage, StageModels};
use crate::eval::{self, scoreboard, EVAL_ORDER};
use crate::finetune::monitor::PollPolicy;
use crate::finetune::{self, dataset, FineTuneClient};
use crate::stages::{self, StageContext};
use anyhow::Context;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub from: Option<i64>,
    pub to: Option<i64>,
    /// Also run the final planned day. Its evaluators are skipped, having no next day.
    pub include_last: bool,
    pub evaluate: bool,
    pub fine_tune_every: Option<i64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            include_last: false,
            evaluate: true,
            fine_tune_every: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub positions: Vec<i64>,
    pub fine_tune_rounds: u32,
}

struct FineTuning {
    client: Arc<dyn FineTuneClient>,
    policy: PollPolicy,
    batch: u32,
}

pub struct Pipeline {
    ctx: StageContext,
    models: StageModels,
    fine_tuning: Option<FineTuning>,
}

impl Pipeline {
    pub fn new(ctx: StageContext, models: StageModels) -> Self {
        Self {
            ctx,
            models,
            fine_tuning: None,
        }
    }

    /// Enables fine-tuning rounds; rotated files are numbered from `first_batch`.
    pub fn with_fine_tuning(
        mut self,
        client: Arc<dyn FineTuneClient>,
        policy: PollPolicy,
        first_batch: u32,
    ) -> Self {
        self.fine_tuning = Some(FineTuning {
            client,
            policy,
            batch: first_batch,
        });
        self
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    pub fn models(&self) -> &StageModels {
        &self.models
    }

    /// Positions a run visits, in order.
    pub fn positions(&self, opts: &RunOptions) -> Vec<i64> {
        let mut entries = self.ctx.planner.in_position_order();
        if !opts.include_last {
            entries.pop();
        }
        entries
            .into_iter()
            .map(|e| e.position)
            .filter(|p| opts.from.map_or(true, |from| *p >= from))
            .filter(|p| opts.to.map_or(true, |to| *p <= to))
            .collect()
    }

    /// Stages A to D for one position, then (when `evaluate`) the evaluators and the scoreboard.
    pub async fn run_position(&self, position: i64, evaluate: bool) -> anyhow::Result<()> {
        for stage in Stage::ALL {
            stages::run_stage(&self.ctx, stage, position, &self.models).await?;
        }

        if !evaluate {
            return Ok(());
        }
        if self.ctx.planner.entry(position + 1).is_err() {
            tracing::info!(position, "no next planned day; skipping evaluation");
            return Ok(());
        }
        for stage in EVAL_ORDER {
            eval::run_eval(&self.ctx, stage, position, &self.models).await?;
        }
        scoreboard::record_outcome(&self.ctx, position, &self.models.eval)
            .await
            .with_context(|| format!("scoreboard failed at position {position}"))?;
        Ok(())
    }

    /// Runs every selected position in order, stopping at the first failure.
    pub async fn run(&mut self, opts: &RunOptions) -> anyhow::Result<RunSummary> {
        if let Some(every) = opts.fine_tune_every {
            anyhow::ensure!(every > 0, "fine_tune_every must be positive (got {every})");
            anyhow::ensure!(
                self.fine_tuning.is_some(),
                "fine_tune_every is set but no fine-tuning client is configured"
            );
        }

        let positions = self.positions(opts);
        tracing::info!(
            positions = positions.len(),
            first = ?positions.first(),
            last = ?positions.last(),
            "starting run"
        );

        let mut summary = RunSummary::default();
        for position in positions {
            self.run_position(position, opts.evaluate)
                .await
                .with_context(|| format!("run aborted at position {position}"))?;
            summary.positions.push(position);

            if opts.fine_tune_every.is_some_and(|n| position % n == 0) {
                self.fine_tune_round().await?;
                summary.fine_tune_rounds += 1;
            }
        }

        tracing::info!(
            completed = summary.positions.len(),
            fine_tune_rounds = summary.fine_tune_rounds,
            "run finished"
        );
        Ok(summary)
    }

    /// Prepares every stage's dataset, fine-tunes the stages that have examples, swaps their
    /// models in, and rotates the batch's files away.
    pub async fn fine_tune_round(&mut self) -> anyhow::Result<Vec<(Stage, String)>> {
        let ft = self
            .fine_tuning
            .as_mut()
            .context("no fine-tuning client is configured")?;

        let mut swapped = Vec::new();
        for stage in Stage::ALL {
            let path = self.ctx.layout.dataset(stage);
            let examples = dataset::prepare(&self.ctx.logs, stage, &path).await?;
            if examples == 0 {
                tracing::info!(stage = stage.id(), "no training examples; keeping current model");
                continue;
            }

            let base = self.models.get(stage).to_string();
            let model = finetune::fine_tune(ft.client.as_ref(), &path, &base, &ft.policy)
                .await
                .with_context(|| format!("fine-tuning {} failed", stage.id()))?;
            tracing::info!(stage = stage.id(), from = %base, to = %model, "swapped in fine-tuned model");
            self.models.set(stage, model.clone());
            swapped.push((stage, model));
        }

        finetune::rotate_batch(&self.ctx.layout, ft.batch).await?;
        ft.batch += 1;
        Ok(swapped)
    }
}
