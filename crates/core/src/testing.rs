//! In-memory fakes for the model service and small on-disk fixtures.

use crate::finetune::{FineTuneClient, JobStatus};
use crate::llm::{ChatClient, ChatMessage, Provider};
use crate::prompts;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const DIRECTION_REPLY: &str = "```json\n{\"direction\": \"rise\", \"amount\": \"0.5%\"}\n```";

#[derive(Debug, Default)]
struct ChatState {
    calls: Vec<(String, Vec<ChatMessage>)>,
    fail_at: Option<usize>,
}

/// Answers every call with a canned reply and remembers what it was asked.
#[derive(Debug, Clone, Default)]
pub struct FakeChat {
    state: Arc<Mutex<ChatState>>,
}

impl FakeChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the `call`-th request (1-based) and every one after it.
    pub fn failing_at(call: usize) -> Self {
        let chat = Self::new();
        chat.state.lock().unwrap().fail_at = Some(call);
        chat
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn models(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.calls.iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        let state = self.state.lock().unwrap();
        state.calls.iter().map(|(_, msgs)| msgs.clone()).collect()
    }
}

#[async_trait::async_trait]
impl ChatClient for FakeChat {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    async fn complete(&self, model: &str, messages: Vec<ChatMessage>) -> anyhow::Result<String> {
        let mut state = self.state.lock().unwrap();
        let extraction = messages.first().map(|m| &m.content)
            == prompts::extract_direction("").first().map(|m| &m.content);
        state.calls.push((model.to_string(), messages));
        let n = state.calls.len();

        if state.fail_at.is_some_and(|at| n >= at) {
            anyhow::bail!("fake model failure on call {n}");
        }
        if extraction {
            return Ok(DIRECTION_REPLY.to_string());
        }
        Ok(format!("reply {n} from {model}"))
    }
}

#[derive(Debug, Default)]
struct FineTuneState {
    statuses: Vec<String>,
    status_checks: usize,
    visible_after: usize,
    model_checks: usize,
    create_failures: u32,
    create_attempts: u32,
    uploads: Vec<PathBuf>,
}

/// A fine-tuning service that walks through a scripted list of job statuses.
#[derive(Debug, Clone, Default)]
pub struct FakeFineTune {
    state: Arc<Mutex<FineTuneState>>,
}

impl FakeFineTune {
    pub const MODEL: &'static str = "ft:gpt-4o-mini-2024-07-18:org::abc123";

    /// `statuses` are returned in order, the last one repeating; the model becomes visible on
    /// the `visible_after`-th lookup.
    pub fn new<const N: usize>(statuses: [&str; N], visible_after: usize) -> Self {
        let state = FineTuneState {
            statuses: statuses.iter().map(|s| s.to_string()).collect(),
            visible_after,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_create_failures(self, n: u32) -> Self {
        self.state.lock().unwrap().create_failures = n;
        self
    }

    pub fn status_checks(&self) -> usize {
        self.state.lock().unwrap().status_checks
    }

    pub fn create_attempts(&self) -> u32 {
        self.state.lock().unwrap().create_attempts
    }

    pub fn uploads(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().uploads.clone()
    }
}

#[async_trait::async_trait]
impl FineTuneClient for FakeFineTune {
    async fn upload_training_file(&self, path: &Path) -> anyhow::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.uploads.push(path.to_path_buf());
        Ok(format!("file-{}", state.uploads.len()))
    }

    async fn create_job(
        &self,
        _training_file_id: &str,
        _base_model: &str,
        _n_epochs: u32,
    ) -> anyhow::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.create_attempts += 1;
        if state.create_attempts <= state.create_failures {
            anyhow::bail!("fake job creation failure {}", state.create_attempts);
        }
        Ok(format!("ftjob-{}", state.create_attempts))
    }

    async fn job_status(&self, _job_id: &str) -> anyhow::Result<JobStatus> {
        let mut state = self.state.lock().unwrap();
        let i = state.status_checks.min(state.statuses.len().saturating_sub(1));
        state.status_checks += 1;
        let status = state.statuses.get(i).cloned().unwrap_or_else(|| "running".into());
        let model = (status == "succeeded").then(|| Self::MODEL.to_string());
        Ok(JobStatus::from_api(&status, model))
    }

    async fn model_exists(&self, model: &str) -> anyhow::Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.model_checks += 1;
        Ok(model == Self::MODEL && state.model_checks >= state.visible_after)
    }
}

pub mod fixture {
    use super::FakeChat;
    use crate::ingest::series::{NewsFeed, PriceSeries, DAILY_SERIES_KEY};
    use crate::ingest::types::SeriesKey;
    use crate::planner::{build_planner, Planner};
    use crate::stages::StageContext;
    use crate::storage::DataLayout;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;

    pub fn daily() -> PriceSeries {
        let doc = json!({
            DAILY_SERIES_KEY: {
                "1_2024-01-02": {"1. open": "472.16", "4. close": "472.65", "6. direction": "rise", "7. amount": "0.1%"},
                "2_2024-01-03": {"1. open": "470.43", "4. close": "468.79", "6. direction": "fall", "7. amount": "-0.35%"},
                "3_2024-01-04": {"1. open": "468.30", "4. close": "467.28", "6. direction": "fall", "7. amount": "-0.22%"}
            }
        });
        PriceSeries::from_document(doc, DAILY_SERIES_KEY).unwrap()
    }

    pub fn news() -> NewsFeed {
        NewsFeed::from_document(json!({
            "1_2024-01-01": [{"title": "Markets open the year", "body": "Futures flat."}],
            "2_2024-01-02": [{"title": "Tech slides", "body": "Chipmakers fall."}, {"title": "Yields rise", "body": "10y at 3.9%."}],
            "3_2024-01-03": [{"title": "Fed minutes", "body": "No cuts soon."}],
            "4_2024-01-04": [{"title": "Jobs data", "body": "Payrolls beat."}]
        }))
        .unwrap()
    }

    pub fn planner(daily: &PriceSeries, news: &NewsFeed) -> Planner {
        let none: [SeriesKey; 0] = [];
        Planner::new(build_planner(daily.keys(), &none, &none, news.keys()))
    }

    /// Three planned days with news, rooted at `dir`.
    pub fn context(dir: &Path, chat: FakeChat) -> StageContext {
        let daily = daily();
        let news = news();
        let planner = planner(&daily, &news);
        StageContext::new(DataLayout::rooted_at(dir), planner, daily, news, Arc::new(chat))
    }
}
