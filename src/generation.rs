//! Generation client: sends an assembled [`Prompt`] to a hosted language
//! model and returns its free-text answer.
//!
//! Failures are reported as [`GenerationError`] so the chat loop can tell a
//! refused or empty answer apart from an unreachable service.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::http::{self, ApiError};
use crate::prompt::Prompt;
use crate::secrets::{Secrets, GOOGLE_API_KEY};

const SERVICE: &str = "gemini-generation";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("generation blocked: {0}")]
    Blocked(String),

    #[error("model returned empty content")]
    EmptyContent,

    #[error("generation provider is disabled")]
    Disabled,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError>;
}

pub struct DisabledGenerator;

#[async_trait]
impl GenerationProvider for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

// ============ Wire types ============

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    fn into_text(self) -> Result<String, GenerationError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(GenerationError::Blocked(reason));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or(GenerationError::EmptyContent)?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return match candidate.finish_reason.as_deref() {
                Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") => Err(
                    GenerationError::Blocked(candidate.finish_reason.unwrap_or_default()),
                ),
                _ => Err(GenerationError::EmptyContent),
            };
        }

        Ok(text)
    }
}

// ============ Gemini ============

/// Calls `POST /v1beta/models/{model}:generateContent` with a system
/// instruction and a single user turn.
pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    max_retries: u32,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config
                .model
                .strip_prefix("models/")
                .unwrap_or(&config.model)
                .to_string(),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl GenerationProvider for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &prompt.system,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &prompt.user }],
            }],
        };

        let response = http::send_with_retry(SERVICE, self.max_retries, || {
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
        })
        .await?;

        let body = response
            .text()
            .await
            .map_err(|source| ApiError::Http {
                service: SERVICE,
                source,
            })?;
        let parsed: GenerateResponse = serde_json::from_str(&body)?;
        let text = parsed.into_text()?;

        debug!(model = %self.model, chars = text.chars().count(), "generation complete");
        Ok(text)
    }
}

pub fn create_generator(
    config: &GenerationConfig,
    secrets: &Secrets,
) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "gemini" => {
            let key = secrets.require(GOOGLE_API_KEY)?;
            Ok(Arc::new(GeminiGenerator::new(config, key)?))
        }
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<String, GenerationError> {
        serde_json::from_str::<GenerateResponse>(json)?.into_text()
    }

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: "sys" }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: "hi" }],
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["system_instruction"]["parts"][0]["text"], "sys");
        assert!(json["system_instruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
    }

    #[test]
    fn test_text_from_first_candidate() {
        let text = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"Drink "},{"text":"ginger tea."}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(text, "Drink ginger tea.");
    }

    #[test]
    fn test_blocked_prompt() {
        let err = parse(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Blocked(ref r) if r == "SAFETY"));
    }

    #[test]
    fn test_safety_finish_without_text() {
        let err = parse(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Blocked(_)));
    }

    #[test]
    fn test_no_candidates_is_empty() {
        assert!(matches!(
            parse(r#"{"candidates":[]}"#).unwrap_err(),
            GenerationError::EmptyContent
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(parse("not json").unwrap_err(), GenerationError::Parse(_)));
    }
}
