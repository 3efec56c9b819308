use anyhow::Context;
use clap::{Parser, Subcommand};
use forecast_core::config::Settings;
use forecast_core::domain::outcome::OutcomeRecord;
use forecast_core::domain::stage::{Stage, StageModels};
use forecast_core::finetune::monitor::PollPolicy;
use forecast_core::ingest::series::DAILY_SERIES_KEY;
use forecast_core::llm::openai::OpenAiClient;
use forecast_core::pipeline::{Pipeline, RunOptions};
use forecast_core::stages::{ChainLogs, StageContext};
use forecast_core::storage::lock::{try_acquire_run_lock, RunLock};
use forecast_core::storage::log::JsonLog;
use forecast_core::storage::DataLayout;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod series;

#[derive(Debug, Parser)]
#[command(name = "forecast_worker")]
struct Args {
    /// Root of the data directory. Overrides DATA_DIR.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the planner from the daily, weekly, monthly and news sources.
    Plan,

    /// Run one stage for one position.
    Stage {
        stage: Stage,
        #[arg(long)]
        position: i64,
    },

    /// Run one evaluator for one position (needs the next day's bar).
    Eval {
        stage: Stage,
        #[arg(long)]
        position: i64,
    },

    /// Record the scored stages' calls for a position in the scoreboard.
    Score {
        #[arg(long)]
        position: i64,
    },

    /// Drive every planned position through the chain.
    Run {
        #[arg(long)]
        from: Option<i64>,
        #[arg(long)]
        to: Option<i64>,
        /// Also run the final planned day (its evaluators are skipped).
        #[arg(long)]
        include_last: bool,
        /// Fine-tune after every position divisible by N.
        #[arg(long)]
        fine_tune_every: Option<i64>,
        /// Number used for the first batch of rotated files.
        #[arg(long, default_value_t = 1)]
        first_batch: u32,
        #[arg(long)]
        no_eval: bool,
    },

    /// Write a stage's fine-tuning dataset from its logs.
    PrepareData { stage: Stage },

    /// Prepare, upload and train a stage's dataset; prints the new model id.
    FineTune {
        stage: Stage,
        /// Defaults to the stage's configured model.
        #[arg(long)]
        base_model: Option<String>,
    },

    /// Accuracy, MAE, RMSE and R² per stage over the scoreboard; also writes the overall,
    /// 30-position window and daily reports next to the logs.
    Metrics {
        #[arg(long)]
        no_save: bool,
    },

    /// Paper-trade each scored stage's calls over the scoreboard.
    Simulate {
        #[arg(long, default_value_t = forecast_core::eval::simulation::INITIAL_CAPITAL)]
        initial: f64,
    },

    #[command(subcommand)]
    Series(SeriesCommand),
}

#[derive(Debug, Subcommand)]
enum SeriesCommand {
    /// Add realized `6. direction` / `7. amount` fields to every bar, in place.
    Annotate {
        path: PathBuf,
        #[arg(long, default_value = DAILY_SERIES_KEY)]
        key: String,
    },
    /// Re-key a date-keyed series as `{index}_{date}`, oldest first.
    Index {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value = DAILY_SERIES_KEY)]
        key: String,
        #[arg(long, default_value_t = 1)]
        start: i64,
    },
    /// Convert a tab-separated price table into an indexed series.
    ImportTsv {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value = DAILY_SERIES_KEY)]
        key: String,
        #[arg(long, default_value_t = 1)]
        start: i64,
        #[arg(long)]
        annotate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }

    let result = until_interrupted(run(args.command, &settings), tokio::signal::ctrl_c()).await;
    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "command failed");
    }
    result
}

async fn run(command: Command, settings: &Settings) -> anyhow::Result<()> {
    let layout = DataLayout::from_settings(settings);

    match command {
        Command::Plan => {
            let _lock = acquire_lock(&layout)?;
            let planner = forecast_core::planner::build_from_sources(&layout).await?;
            tracing::info!(entries = planner.len(), "planner built");
        }
        Command::Stage { stage, position } => {
            let _lock = acquire_lock(&layout)?;
            let ctx = load_context(settings, layout).await?;
            forecast_core::stages::run_stage(&ctx, stage, position, &StageModels::from_env())
                .await?;
        }
        Command::Eval { stage, position } => {
            let _lock = acquire_lock(&layout)?;
            let ctx = load_context(settings, layout).await?;
            forecast_core::eval::run_eval(&ctx, stage, position, &StageModels::from_env()).await?;
        }
        Command::Score { position } => {
            let _lock = acquire_lock(&layout)?;
            let ctx = load_context(settings, layout).await?;
            let models = StageModels::from_env();
            let row =
                forecast_core::eval::scoreboard::record_outcome(&ctx, position, &models.eval)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&row)?);
        }
        Command::Run {
            from,
            to,
            include_last,
            fine_tune_every,
            first_batch,
            no_eval,
        } => {
            let _lock = acquire_lock(&layout)?;
            let client = Arc::new(OpenAiClient::from_settings(settings)?);
            let ctx = StageContext::load(layout, client.clone()).await?;
            let mut pipeline = Pipeline::new(ctx, StageModels::from_env());
            if fine_tune_every.is_some() {
                pipeline = pipeline.with_fine_tuning(client, PollPolicy::from_env(), first_batch);
            }

            let opts = RunOptions {
                from,
                to,
                include_last,
                evaluate: !no_eval,
                fine_tune_every,
            };
            let summary = pipeline.run(&opts).await?;
            tracing::info!(
                positions = summary.positions.len(),
                fine_tune_rounds = summary.fine_tune_rounds,
                models = ?pipeline.models(),
                "run complete"
            );
        }
        Command::PrepareData { stage } => {
            let _lock = acquire_lock(&layout)?;
            let logs = ChainLogs::open(&layout);
            let n = forecast_core::finetune::dataset::prepare(&logs, stage, &layout.dataset(stage))
                .await?;
            println!("{n}");
        }
        Command::FineTune { stage, base_model } => {
            let _lock = acquire_lock(&layout)?;
            let client = OpenAiClient::from_settings(settings)?;
            let logs = ChainLogs::open(&layout);
            let path = layout.dataset(stage);
            let n = forecast_core::finetune::dataset::prepare(&logs, stage, &path).await?;
            anyhow::ensure!(n > 0, "no training examples for {stage}");

            let base = base_model.unwrap_or_else(|| StageModels::from_env().get(stage).to_string());
            let model =
                forecast_core::finetune::fine_tune(&client, &path, &base, &PollPolicy::from_env())
                    .await?;
            tracing::info!(stage = stage.id(), base_model = %base, model = %model, "fine-tuned");
            println!("{model}");
        }
        Command::Metrics { no_save } => {
            let rows = JsonLog::<OutcomeRecord>::new(layout.scoreboard_log())
                .read()
                .await?;
            let reports = forecast_core::eval::metrics::report(&rows);
            if !no_save {
                forecast_core::eval::metrics::save_reports(&layout, &reports).await?;
            }
            let overall: Vec<_> = reports.iter().map(|r| &r.overall).collect();
            println!("{}", serde_json::to_string_pretty(&overall)?);
        }
        Command::Simulate { initial } => {
            anyhow::ensure!(initial > 0.0, "initial capital must be positive (got {initial})");
            let rows = JsonLog::<OutcomeRecord>::new(layout.scoreboard_log())
                .read()
                .await?;
            let results = forecast_core::eval::simulation::simulate_all(&rows, initial);
            for r in &results {
                tracing::info!(stage = %r.stage, final_value = r.final_value, trades = r.trades, "simulated");
            }
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Series(cmd) => match cmd {
            SeriesCommand::Annotate { path, key } => {
                series::annotate(&path, &key).await?;
            }
            SeriesCommand::Index {
                input,
                output,
                key,
                start,
            } => {
                series::index(&input, &output, &key, start).await?;
            }
            SeriesCommand::ImportTsv {
                input,
                output,
                key,
                start,
                annotate,
            } => {
                series::import_tsv(&input, &output, &key, start, annotate).await?;
            }
        },
    }
    Ok(())
}

async fn load_context(settings: &Settings, layout: DataLayout) -> anyhow::Result<StageContext> {
    let client = OpenAiClient::from_settings(settings)?;
    StageContext::load(layout, Arc::new(client)).await
}

/// Runs `work` unless `interrupt` resolves first, in which case `work` is dropped (releasing
/// whatever it holds, the run lock included) and the run reports the interruption.
async fn until_interrupted<W, I>(work: W, interrupt: I) -> anyhow::Result<()>
where
    W: Future<Output = anyhow::Result<()>>,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = work => result,
        Ok(()) = interrupt => {
            tracing::warn!("interrupted; stopping");
            anyhow::bail!("interrupted")
        }
    }
}

fn acquire_lock(layout: &DataLayout) -> anyhow::Result<RunLock> {
    try_acquire_run_lock(&layout.data_dir)?.with_context(|| {
        format!(
            "another run holds the lock on {}",
            layout.data_dir.display()
        )
    })
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interrupt_drops_the_command_and_frees_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::rooted_at(dir.path());

        let work = async {
            let _lock = acquire_lock(&layout)?;
            std::future::pending::<anyhow::Result<()>>().await
        };
        let err = until_interrupted(work, async { Ok::<(), std::io::Error>(()) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("interrupted"));

        assert!(acquire_lock(&layout).is_ok());
    }

    #[tokio::test]
    async fn failed_signal_setup_lets_the_command_finish() {
        let work = async { Ok::<(), anyhow::Error>(()) };
        let broken = async { Err::<(), _>(std::io::Error::other("no signal handler")) };
        assert!(until_interrupted(work, broken).await.is_ok());
    }

    #[test]
    fn parses_metrics_and_simulate_flags() {
        let args = Args::try_parse_from(["forecast_worker", "metrics", "--no-save"]).unwrap();
        assert!(matches!(args.command, Command::Metrics { no_save: true }));

        let args =
            Args::try_parse_from(["forecast_worker", "simulate", "--initial", "2500"]).unwrap();
        assert!(matches!(args.command, Command::Simulate { initial } if initial == 2500.0));
    }
}
