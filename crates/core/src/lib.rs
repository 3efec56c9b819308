pub mod domain;
pub mod error;
pub mod eval;
pub mod finetune;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod stages;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;

    const DEFAULT_DATA_DIR: &str = "data";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub openai_api_key: Option<String>,
        pub openai_base_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub data_dir: PathBuf,
        pub daily_path: Option<PathBuf>,
        pub weekly_path: Option<PathBuf>,
        pub monthly_path: Option<PathBuf>,
        pub news_path: Option<PathBuf>,
        pub planner_path: Option<PathBuf>,
        pub logs_dir: Option<PathBuf>,
        pub fine_tuning_dir: Option<PathBuf>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let path = |key: &str| {
                std::env::var(key)
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from)
            };

            Ok(Self {
                openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
                openai_base_url: std::env::var("OPENAI_BASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                data_dir: path("DATA_DIR").unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
                daily_path: path("DAILY_PATH"),
                weekly_path: path("WEEKLY_PATH"),
                monthly_path: path("MONTHLY_PATH"),
                news_path: path("NEWS_PATH"),
                planner_path: path("PLANNER_PATH"),
                logs_dir: path("LOGS_DIR"),
                fine_tuning_dir: path("FINE_TUNING_DIR"),
            })
        }

        /// Settings rooted at `data_dir` with no environment overrides.
        pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
            Self {
                openai_api_key: None,
                openai_base_url: None,
                sentry_dsn: None,
                data_dir: data_dir.into(),
                daily_path: None,
                weekly_path: None,
                monthly_path: None,
                news_path: None,
                planner_path: None,
                logs_dir: None,
                fine_tuning_dir: None,
            }
        }

        pub fn require_openai_api_key(&self) -> anyhow::Result<&str> {
            self.openai_api_key
                .as_deref()
                .context("OPENAI_API_KEY is required")
        }
    }
}
