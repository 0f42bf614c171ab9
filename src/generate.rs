//! Answer generation collaborator.
//!
//! The orchestrator hands a system instruction and a grounded context block
//! to a [`Generator`] and gets free text back. No retry here: retry is
//! confined to the embedding gateway, and generation failures surface
//! directly as [`EngineError::Generation`].

use std::time::Duration;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::EngineError;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, EngineError>;
}

/// Generator speaking the OpenAI-compatible `/v1/chat/completions` shape,
/// non-streaming. The bearer token is read from `OPENAI_API_KEY`; keyless
/// local endpoints work without it.
pub struct HttpGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Generation(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn complete(&self, system: &str, user: &str) -> Result<String, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "stream": false,
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Generation(format!("generation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EngineError::Generation(format!(
                "generation API error {status}: {body_text}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Generation(format!("invalid generation response: {e}")))?;

        parse_completion_response(&json)
    }
}

fn parse_completion_response(json: &serde_json::Value) -> Result<String, EngineError> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| {
            EngineError::Generation("response is missing choices[0].message.content".to_string())
        })
}
