use crate::config::Settings;
use crate::finetune::{FineTuneClient, JobStatus};
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::{ChatClient, ChatMessage, Provider};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const FINE_TUNE_PURPOSE: &str = "fine-tune";

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_openai_api_key()?.to_string();
        let base_url = settings
            .openai_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("OPENAI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Sends `req`, returning the body of a 2xx response or a diagnostics error otherwise.
    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        stage: &'static str,
        model: &str,
    ) -> anyhow::Result<serde_json::Value> {
        let res = req
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("OpenAI {stage} request failed"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read OpenAI {stage} response body"))?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::OpenAI,
                stage,
                model: model.to_string(),
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse OpenAI {stage} response JSON: {text}"))
    }

    async fn create_chat_completion(
        &self,
        req: ChatCompletionRequest<'_>,
    ) -> anyhow::Result<(serde_json::Value, ChatCompletionResponse)> {
        let model = req.model;
        let raw_json = self
            .send(
                self.http.post(self.url("/v1/chat/completions")).json(&req),
                "chat",
                model,
            )
            .await?;
        let parsed = serde_json::from_value::<ChatCompletionResponse>(raw_json.clone())
            .context("failed to decode OpenAI response into ChatCompletionResponse")?;
        Ok((raw_json, parsed))
    }

    fn response_text(
        res: &ChatCompletionResponse,
        model: &str,
        raw_json: &serde_json::Value,
    ) -> anyhow::Result<String> {
        let Some(choice) = res.choices.first() else {
            return Err(LlmDiagnosticsError {
                provider: Provider::OpenAI,
                stage: "empty_choices",
                model: model.to_string(),
                detail: "response has no completion choices".to_string(),
                raw_output: None,
                raw_response_json: Some(raw_json.clone()),
            }
            .into());
        };

        let text = choice
            .message
            .content
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(LlmDiagnosticsError {
                provider: Provider::OpenAI,
                stage: "empty_content",
                model: model.to_string(),
                detail: format!(
                    "first choice has no text (finish_reason={:?})",
                    choice.finish_reason
                ),
                raw_output: None,
                raw_response_json: Some(raw_json.clone()),
            }
            .into());
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl ChatClient for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    async fn complete(&self, model: &str, messages: Vec<ChatMessage>) -> anyhow::Result<String> {
        let req = ChatCompletionRequest {
            model,
            messages: &messages,
        };
        let (raw_json, res) = self.create_chat_completion(req).await?;
        Self::response_text(&res, model, &raw_json)
    }
}

#[async_trait::async_trait]
impl FineTuneClient for OpenAiClient {
    async fn upload_training_file(&self, path: &Path) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read training file {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "training.jsonl".to_string());

        let form = reqwest::multipart::Form::new()
            .text("purpose", FINE_TUNE_PURPOSE)
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let raw = self
            .send(
                self.http.post(self.url("/v1/files")).multipart(form),
                "file_upload",
                "",
            )
            .await?;
        let file = serde_json::from_value::<IdResponse>(raw)
            .context("failed to decode OpenAI file upload response")?;
        Ok(file.id)
    }

    async fn create_job(
        &self,
        training_file_id: &str,
        base_model: &str,
        n_epochs: u32,
    ) -> anyhow::Result<String> {
        let req = CreateJobRequest {
            training_file: training_file_id,
            model: base_model,
            hyperparameters: Hyperparameters { n_epochs },
        };
        let raw = self
            .send(
                self.http.post(self.url("/v1/fine_tuning/jobs")).json(&req),
                "create_job",
                base_model,
            )
            .await?;
        let job = serde_json::from_value::<IdResponse>(raw)
            .context("failed to decode OpenAI fine-tuning job response")?;
        Ok(job.id)
    }

    async fn job_status(&self, job_id: &str) -> anyhow::Result<JobStatus> {
        let raw = self
            .send(
                self.http
                    .get(self.url(&format!("/v1/fine_tuning/jobs/{job_id}"))),
                "job_status",
                "",
            )
            .await?;
        let job = serde_json::from_value::<JobResponse>(raw)
            .context("failed to decode OpenAI fine-tuning job status")?;
        Ok(JobStatus::from_api(&job.status, job.fine_tuned_model))
    }

    async fn model_exists(&self, model: &str) -> anyhow::Result<bool> {
        let res = self
            .send(
                self.http.get(self.url(&format!("/v1/models/{model}"))),
                "model_lookup",
                model,
            )
            .await;
        match res {
            Ok(raw) => Ok(raw.get("id").and_then(|v| v.as_str()) == Some(model)),
            Err(err) => match err.downcast_ref::<LlmDiagnosticsError>() {
                Some(diag) if diag.status() == Some(404) => Ok(false),
                _ => Err(err),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct CreateJobRequest<'a> {
    training_file: &'a str,
    model: &'a str,
    hyperparameters: Hyperparameters,
}

#[derive(Debug, Clone, Serialize)]
struct Hyperparameters {
    n_epochs: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JobResponse {
    status: String,
    #[serde(default)]
    fine_tuned_model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use serde_json::json;

    #[test]
    fn serializes_role_tagged_messages() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let req = ChatCompletionRequest {
            model: "gpt-4o",
            messages: &messages,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "model": "gpt-4o",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hi"}
                ]
            })
        );
        assert_eq!(messages[1].role, Role::User);
    }

    #[test]
    fn takes_trimmed_first_choice() {
        let raw = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "  Direction: Rise \n"}, "finish_reason": "stop"},
                {"message": {"role": "assistant", "content": "ignored"}}
            ]
        });
        let res: ChatCompletionResponse = serde_json::from_value(raw.clone()).unwrap();
        let text = OpenAiClient::response_text(&res, "gpt-4o", &raw).unwrap();
        assert_eq!(text, "Direction: Rise");
    }

    #[test]
    fn empty_choices_is_a_diagnostics_error() {
        let raw = json!({"choices": []});
        let res: ChatCompletionResponse = serde_json::from_value(raw.clone()).unwrap();
        let err = OpenAiClient::response_text(&res, "gpt-4o", &raw).unwrap_err();
        let diag = err.downcast_ref::<LlmDiagnosticsError>().unwrap();
        assert_eq!(diag.stage, "empty_choices");
        assert_eq!(diag.model, "gpt-4o");
    }

    #[test]
    fn create_job_request_carries_epochs() {
        let req = CreateJobRequest {
            training_file: "file-abc",
            model: "gpt-4o-mini-2024-07-18",
            hyperparameters: Hyperparameters { n_epochs: 4 },
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "training_file": "file-abc",
                "model": "gpt-4o-mini-2024-07-18",
                "hyperparameters": {"n_epochs": 4}
            })
        );
    }

    #[test]
    fn from_settings_requires_api_key() {
        let settings = Settings::with_data_dir("data");
        assert!(OpenAiClient::from_settings(&settings).is_err());
    }
}
