//! OpenAI-compatible chat-completions backend.
//!
//! A single [`ChatBackend`] implements [`Generator`], [`Judge`] and
//! [`Critiquer`]; screenshots are sent inline as base64 PNG data URLs.

pub mod parse;

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as Base64Engine;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capture::Screenshot;
use crate::collaborators::{CritiqueContext, Critiquer, Generator, Judge, JudgeOutcome};
use crate::critique::Critique;
use crate::{Error, Result};

const GENERATE_PROMPT: &str = "You convert website screenshots into a single self-contained HTML document with inline CSS. Reply with the HTML only, inside one ```html code block.";

const JUDGE_PROMPT: &str = "You compare a reference screenshot (first image) with a recreation (second image). Reply with JSON only: {\"score\": <0-100 visual similarity>, \"notes\": \"<short justification>\"}.";

const CRITIQUE_PROMPT: &str = "You review a recreation (second image) of a reference screenshot (first image) and list concrete visual discrepancies, most important first. Reply with JSON only: {\"summary\": \"...\", \"items\": [{\"priority\": \"critical|high|medium|low\", \"category\": \"...\", \"element\": \"...\", \"issue\": \"...\", \"expected\": \"...\", \"actual\": \"...\"}]}.";

/// Connection settings for the chat backend
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API root, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Bearer token; local servers often need none
    pub api_key: Option<String>,
    pub model: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    pub max_tokens: u32,
    /// Score at which the judge reports `pass`
    pub judge_threshold: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            timeout_ms: 120_000,
            max_tokens: 8192,
            judge_threshold: 85.0,
        }
    }
}

impl LlmConfig {
    /// Defaults overridden by `RFRECREATE_LLM_BASE_URL`, `RFRECREATE_LLM_API_KEY`,
    /// `RFRECREATE_LLM_MODEL` and `RFRECREATE_LLM_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("RFRECREATE_LLM_BASE_URL") {
            cfg.base_url = v;
        }
        if let Ok(v) = std::env::var("RFRECREATE_LLM_API_KEY") {
            cfg.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("RFRECREATE_LLM_MODEL") {
            cfg.model = v;
        }
        if let Ok(v) = std::env::var("RFRECREATE_LLM_TIMEOUT_MS") {
            cfg.timeout_ms = v.parse().map_err(|_| {
                Error::ConfigError(format!("RFRECREATE_LLM_TIMEOUT_MS is not a number: {}", v))
            })?;
        }
        Ok(cfg)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Chat-completions client shared by all three model-backed capabilities
pub struct ChatBackend {
    client: reqwest::Client,
    config: LlmConfig,
}

impl ChatBackend {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// One chat round-trip: a system prompt, then user text followed by images.
    async fn chat(
        &self,
        system: &str,
        text: &str,
        images: &[&Screenshot],
    ) -> std::result::Result<String, String> {
        let mut content = vec![json!({ "type": "text", "text": text })];
        for img in images {
            let b64 = base64::engine::general_purpose::STANDARD.encode(&img.png_data);
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/png;base64,{}", b64) }
            }));
        }
        let body = ChatRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages: vec![
                json!({ "role": "system", "content": system }),
                json!({ "role": "user", "content": content }),
            ],
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let res = req
            .send()
            .await
            .map_err(|e| format!("request to {} failed: {}", url, e))?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, text.trim()));
        }
        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| format!("unreadable response: {}", e))?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| "response contained no message".to_string())?;
        debug!("chat reply: {} chars", reply.len());
        Ok(reply)
    }
}

#[async_trait]
impl Generator for ChatBackend {
    async fn generate(
        &self,
        reference: &Screenshot,
        revision_context: Option<&str>,
    ) -> Result<String> {
        let mut text = format!(
            "Recreate this {}x{} screenshot as HTML.",
            reference.width, reference.height
        );
        if let Some(ctx) = revision_context {
            text.push_str("\n\nYour previous attempt was reviewed. Address the following:\n");
            text.push_str(ctx);
        }
        let reply = self
            .chat(GENERATE_PROMPT, &text, &[reference])
            .await
            .map_err(Error::GenerationFailure)?;
        parse::extract_markup(&reply)
            .ok_or_else(|| Error::GenerationFailure("reply contained no HTML".into()))
    }
}

#[async_trait]
impl Judge for ChatBackend {
    async fn compare(
        &self,
        goal: &str,
        target: &Screenshot,
        candidate: &Screenshot,
    ) -> Result<JudgeOutcome> {
        let text = format!("Goal: {}", goal);
        let reply = self
            .chat(JUDGE_PROMPT, &text, &[target, candidate])
            .await
            .map_err(Error::JudgeFailure)?;
        parse::parse_judge(&reply, self.config.judge_threshold).map_err(Error::JudgeFailure)
    }
}

#[async_trait]
impl Critiquer for ChatBackend {
    async fn critique(
        &self,
        target: &Screenshot,
        candidate: &Screenshot,
        context: &CritiqueContext,
    ) -> Result<Critique> {
        let mut text = format!(
            "Goal: {}\nAttempt {} scored {:.2}/100 on a pixel diff. {}",
            context.goal, context.iteration, context.pixel_score, context.pixel_notes
        );
        if let Some(notes) = &context.judge_notes {
            text.push_str("\nReviewer notes: ");
            text.push_str(notes);
        }
        let reply = self
            .chat(CRITIQUE_PROMPT, &text, &[target, candidate])
            .await
            .map_err(Error::CritiqueFailure)?;
        parse::parse_critique(&reply).map_err(Error::CritiqueFailure)
    }
}
