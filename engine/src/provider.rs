//! HTTP model provider against an OpenAI-compatible chat completions endpoint.
//!
//! The orchestration core never hardcodes a provider (spec §1 non-goal:
//! "Model providers... are external collaborators"); this is the one
//! concrete `ModelProvider` the CLI wires up so `submit` has something to
//! actually call.

use std::time::Duration;

use async_trait::async_trait;
use orc_activities::{ActivityError, LlmRequest, LlmResponse, ModelProvider, ModelTierRequest};
use orc_types::error::OrchestraError;
use reqwest::Client;
use serde_json::json;

pub struct HttpModelProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    small_model: String,
    medium_model: String,
    large_model: String,
    client: Client,
}

impl HttpModelProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        small_model: impl Into<String>,
        medium_model: impl Into<String>,
        large_model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            api_key,
            small_model: small_model.into(),
            medium_model: medium_model.into(),
            large_model: large_model.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("reqwest client builds with static config"),
        }
    }

    fn model_for(&self, tier: ModelTierRequest) -> &str {
        match tier {
            ModelTierRequest::Small => &self.small_model,
            ModelTierRequest::Medium => &self.medium_model,
            ModelTierRequest::Large => &self.large_model,
        }
    }
}

#[async_trait]
impl ModelProvider for HttpModelProvider {
    async fn call(&self, request: &LlmRequest) -> Result<LlmResponse, ActivityError> {
        let model = self.model_for(request.tier);
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system_prompt) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system_prompt}));
        }
        for (role, content) in &request.messages {
            messages.push(json!({"role": role, "content": content}));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(url).json(&json!({
            "model": model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "stream": false,
        }));
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = req
            .send()
            .await
            .map_err(|err| ActivityError::Orchestra(OrchestraError::TransientUpstream(err.to_string())))?;
        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ActivityError::Orchestra(OrchestraError::Provider(err.to_string())))?;

        if !status.is_success() {
            let detail = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("upstream request failed")
                .to_string();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(ActivityError::Orchestra(OrchestraError::TransientUpstream(detail)));
            }
            return Err(ActivityError::Orchestra(OrchestraError::Provider(detail)));
        }

        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ActivityError::Orchestra(OrchestraError::Provider("response had no choices".to_string())))?;
        let text = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .unwrap_or("stop")
            .to_string();
        let usage = body.get("usage");
        let input_tokens = usage.and_then(|u| u.get("prompt_tokens")).and_then(|v| v.as_u64()).unwrap_or(0);
        let output_tokens = usage.and_then(|u| u.get("completion_tokens")).and_then(|v| v.as_u64()).unwrap_or(0);

        Ok(LlmResponse {
            text,
            input_tokens,
            output_tokens,
            model: model.to_string(),
            provider: self.id.clone(),
            finish_reason,
            cost: 0.0,
        })
    }
}
