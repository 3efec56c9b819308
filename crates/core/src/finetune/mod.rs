pub mod dataset;
pub mod monitor;

use crate::domain::stage::Stage;
use crate::storage::DataLayout;
use anyhow::Context;
use monitor::PollPolicy;
use std::path::{Path, PathBuf};

pub const N_EPOCHS: u32 = 4;
pub const CREATE_JOB_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Succeeded,
    Failed,
}

/// A fine-tuning job as last reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub status: String,
    pub state: JobState,
    pub fine_tuned_model: Option<String>,
}

impl JobStatus {
    pub fn from_api(status: &str, fine_tuned_model: Option<String>) -> Self {
        let state = match status {
            "succeeded" => JobState::Succeeded,
            "failed" | "cancelled" => JobState::Failed,
            _ => JobState::Running,
        };
        Self {
            status: status.to_string(),
            state,
            fine_tuned_model,
        }
    }
}

#[async_trait::async_trait]
pub trait FineTuneClient: Send + Sync {
    /// Uploads a JSONL training file and returns its file id.
    async fn upload_training_file(&self, path: &Path) -> anyhow::Result<String>;

    /// Starts a job and returns its id.
    async fn create_job(
        &self,
        training_file_id: &str,
        base_model: &str,
        n_epochs: u32,
    ) -> anyhow::Result<String>;

    async fn job_status(&self, job_id: &str) -> anyhow::Result<JobStatus>;

    async fn model_exists(&self, model: &str) -> anyhow::Result<bool>;
}

/// Uploads `dataset`, trains `base_model` on it and waits until the new model is usable.
pub async fn fine_tune(
    client: &dyn FineTuneClient,
    dataset: &Path,
    base_model: &str,
    policy: &PollPolicy,
) -> anyhow::Result<String> {
    let file_id = client
        .upload_training_file(dataset)
        .await
        .with_context(|| format!("failed to upload {}", dataset.display()))?;
    tracing::info!(file_id, path = %dataset.display(), "uploaded training file");

    let job_id = create_job_with_retry(client, &file_id, base_model, policy).await?;
    tracing::info!(job_id, base_model, "fine-tuning job created");

    let model = monitor::await_job(client, &job_id, policy).await?;
    monitor::await_model(client, &model, policy).await?;
    Ok(model)
}

async fn create_job_with_retry(
    client: &dyn FineTuneClient,
    file_id: &str,
    base_model: &str,
    policy: &PollPolicy,
) -> anyhow::Result<String> {
    let mut last_err = None;
    for attempt in 1..=CREATE_JOB_ATTEMPTS {
        match client.create_job(file_id, base_model, N_EPOCHS).await {
            Ok(job_id) => return Ok(job_id),
            Err(err) => {
                tracing::warn!(
                    attempt,
                    max_attempts = CREATE_JOB_ATTEMPTS,
                    error = %format!("{err:#}"),
                    "fine-tuning job creation failed"
                );
                last_err = Some(err);
                if attempt < CREATE_JOB_ATTEMPTS {
                    tokio::time::sleep(policy.delay(attempt)).await;
                }
            }
        }
    }

    let err = last_err.unwrap_or_else(|| anyhow::anyhow!("no attempt made"));
    Err(err.context(format!(
        "failed to create fine-tuning job after {CREATE_JOB_ATTEMPTS} attempts"
    )))
}

/// Moves the batch's logs and datasets to `fine_tuning_data/{batch}-{name}`.
///
/// Missing files are skipped. The scoreboard stays in place across batches.
pub async fn rotate_batch(layout: &DataLayout, batch: u32) -> anyhow::Result<Vec<PathBuf>> {
    let candidates = Stage::ALL
        .iter()
        .flat_map(|&s| [layout.eval_log(s), layout.stage_log(s), layout.dataset(s)]);

    tokio::fs::create_dir_all(&layout.fine_tuning_dir)
        .await
        .with_context(|| format!("failed to create {}", layout.fine_tuning_dir.display()))?;

    let mut moved = Vec::new();
    for from in candidates {
        if !tokio::fs::try_exists(&from).await.unwrap_or(false) {
            continue;
        }
        let Some(name) = from.file_name() else {
            continue;
        };
        let to = layout
            .fine_tuning_dir
            .join(format!("{batch}-{}", name.to_string_lossy()));
        tokio::fs::rename(&from, &to)
            .await
            .with_context(|| format!("failed to move {} to {}", from.display(), to.display()))?;
        tracing::info!(from = %from.display(), to = %to.display(), batch, "rotated batch file");
        moved.push(to);
    }
    Ok(moved)
}
