//! Polling a fine-tuning job until it settles, as an explicit state machine.

use crate::finetune::{FineTuneClient, JobState, JobStatus};
use std::time::Duration;

const DEFAULT_POLL_SECS: u64 = 60;
const DEFAULT_MAX_POLLS: u32 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles from `initial` after every attempt, never above `cap`.
    Exponential { initial: Duration, cap: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_POLLS,
            backoff: Backoff::Fixed(Duration::from_secs(DEFAULT_POLL_SECS)),
        }
    }
}

impl PollPolicy {
    /// `FINE_TUNE_POLL_SECS` / `FINE_TUNE_MAX_POLLS`, falling back to one poll a minute for
    /// three hours.
    pub fn from_env() -> Self {
        let secs = std::env::var("FINE_TUNE_POLL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_SECS);
        let max_attempts = std::env::var("FINE_TUNE_MAX_POLLS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_POLLS);
        Self {
            max_attempts,
            backoff: Backoff::Fixed(Duration::from_secs(secs)),
        }
    }

    /// Delay after the `attempt`-th poll (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(d) => d,
            Backoff::Exponential { initial, cap } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(cap)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorState {
    Pending,
    Polling { attempt: u32 },
    Succeeded { model: String },
    Failed { status: String },
    TimedOut { attempts: u32 },
}

impl MonitorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MonitorState::Succeeded { .. } | MonitorState::Failed { .. } | MonitorState::TimedOut { .. }
        )
    }
}

/// What one poll returned. A transport error still uses up an attempt.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Status(JobStatus),
    Error(String),
}

/// Advances the monitor by one poll.
pub fn step(state: MonitorState, outcome: PollOutcome, policy: &PollPolicy) -> MonitorState {
    let attempt = match state {
        MonitorState::Pending => 1,
        MonitorState::Polling { attempt } => attempt + 1,
        terminal => return terminal,
    };

    if let PollOutcome::Status(status) = &outcome {
        match (&status.state, &status.fine_tuned_model) {
            (JobState::Succeeded, Some(model)) => {
                return MonitorState::Succeeded {
                    model: model.clone(),
                }
            }
            (JobState::Succeeded, None) => {
                return MonitorState::Failed {
                    status: "succeeded without a fine-tuned model".to_string(),
                }
            }
            (JobState::Failed, _) => {
                return MonitorState::Failed {
                    status: status.status.clone(),
                }
            }
            (JobState::Running, _) => {}
        }
    }

    if attempt >= policy.max_attempts {
        MonitorState::TimedOut { attempts: attempt }
    } else {
        MonitorState::Polling { attempt }
    }
}

/// Polls `job_id` until it succeeds, fails or runs out of attempts. Returns the new model id.
pub async fn await_job(
    client: &dyn FineTuneClient,
    job_id: &str,
    policy: &PollPolicy,
) -> anyhow::Result<String> {
    let mut state = MonitorState::Pending;
    loop {
        let outcome = match client.job_status(job_id).await {
            Ok(status) => {
                tracing::info!(job_id, status = %status.status, "fine-tuning job status");
                PollOutcome::Status(status)
            }
            Err(err) => {
                tracing::warn!(job_id, error = %format!("{err:#}"), "fine-tuning status check failed");
                PollOutcome::Error(format!("{err:#}"))
            }
        };

        state = step(state, outcome, policy);
        match &state {
            MonitorState::Succeeded { model } => return Ok(model.clone()),
            MonitorState::Failed { status } => {
                anyhow::bail!("fine-tuning job {job_id} ended with status {status}")
            }
            MonitorState::TimedOut { attempts } => {
                anyhow::bail!("fine-tuning job {job_id} still running after {attempts} polls")
            }
            MonitorState::Polling { attempt } => tokio::time::sleep(policy.delay(*attempt)).await,
            MonitorState::Pending => {}
        }
    }
}

/// Waits until `model` can be retrieved from the service.
pub async fn await_model(
    client: &dyn FineTuneClient,
    model: &str,
    policy: &PollPolicy,
) -> anyhow::Result<()> {
    for attempt in 1..=policy.max_attempts {
        match client.model_exists(model).await {
            Ok(true) => {
                tracing::info!(model, attempt, "fine-tuned model is available");
                return Ok(());
            }
            Ok(false) => tracing::info!(model, attempt, "fine-tuned model not available yet"),
            Err(err) => {
                tracing::warn!(model, attempt, error = %format!("{err:#}"), "model lookup failed")
            }
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay(attempt)).await;
        }
    }
    anyhow::bail!(
        "fine-tuned model {model} not available after {} checks",
        policy.max_attempts
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFineTune;

    fn running() -> PollOutcome {
        PollOutcome::Status(JobStatus::from_api("running", None))
    }

    fn instant(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            max_attempts,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = PollPolicy {
            max_attempts: 10,
            backoff: Backoff::Exponential {
                initial: Duration::from_secs(1),
                cap: Duration::from_secs(5),
            },
        };
        let delays: Vec<u64> = (1..=5).map(|a| policy.delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn polls_until_success() {
        let policy = instant(5);
        let mut state = step(MonitorState::Pending, running(), &policy);
        assert_eq!(state, MonitorState::Polling { attempt: 1 });
        state = step(state, PollOutcome::Error("500".into()), &policy);
        assert_eq!(state, MonitorState::Polling { attempt: 2 });
        state = step(
            state,
            PollOutcome::Status(JobStatus::from_api("succeeded", Some("ft:model".into()))),
            &policy,
        );
        assert_eq!(
            state,
            MonitorState::Succeeded {
                model: "ft:model".into()
            }
        );
        assert!(state.is_terminal());
    }

    #[test]
    fn cancelled_jobs_fail() {
        let state = step(
            MonitorState::Polling { attempt: 3 },
            PollOutcome::Status(JobStatus::from_api("cancelled", None)),
            &instant(5),
        );
        assert_eq!(
            state,
            MonitorState::Failed {
                status: "cancelled".into()
            }
        );
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = instant(2);
        let state = step(MonitorState::Pending, running(), &policy);
        let state = step(state, running(), &policy);
        assert_eq!(state, MonitorState::TimedOut { attempts: 2 });
        assert_eq!(step(state.clone(), running(), &policy), state);
    }

    #[tokio::test]
    async fn await_job_returns_the_model() {
        let client = FakeFineTune::new(["queued", "running", "succeeded"], 1);
        let model = await_job(&client, "ftjob-1", &instant(10)).await.unwrap();
        assert_eq!(model, FakeFineTune::MODEL);
        assert_eq!(client.status_checks(), 3);
    }

    #[tokio::test]
    async fn await_job_times_out() {
        let client = FakeFineTune::new(["running", "running", "running"], 1);
        let err = await_job(&client, "ftjob-1", &instant(2)).await.unwrap_err();
        assert!(err.to_string().contains("after 2 polls"));
    }

    #[tokio::test]
    async fn await_model_retries_until_visible() {
        let client = FakeFineTune::new(["succeeded"], 3);
        await_model(&client, FakeFineTune::MODEL, &instant(5))
            .await
            .unwrap();
        assert!(await_model(&FakeFineTune::new(["succeeded"], 9), "m", &instant(2))
            .await
            .is_err());
    }
}
