use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::{Oracle, OracleRequest};
use crate::config::OracleConfig;
use crate::error::{Error, Result};

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

/// Client for OpenAI-compatible chat completion endpoints.
pub struct ChatCompletionsOracle {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl ChatCompletionsOracle {
    pub fn new(cfg: &OracleConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            api_key: api_key.into(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            timeout: cfg.timeout(),
        })
    }
}

impl fmt::Debug for ChatCompletionsOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionsOracle")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

fn build_request<'a>(model: &'a str, request: &'a OracleRequest) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(2);
    if !request.system_prompt.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: &request.system_prompt,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &request.user_prompt,
    });
    ChatRequest {
        model,
        messages,
        temperature: request.temperature,
        response_format: request.json_mode.then_some(ResponseFormat {
            kind: "json_object",
        }),
    }
}

#[async_trait]
impl Oracle for ChatCompletionsOracle {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn complete(&self, request: &OracleRequest) -> Result<String> {
        let t0 = Instant::now();
        let body = build_request(&self.model, request);
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Chat completion rejected");
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: format!("{}/chat/completions", self.base_url),
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::Oracle("empty completion".into()))?;

        debug!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            bytes = content.len(),
            "Chat completion received"
        );
        Ok(content)
    }
}
