// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::AnalyzeError;

/// One completion request. The prompt is the fully interpolated template.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Object-safe seam to the completion vendor.
///
/// The vendor identity is a deployment concern; the analyzer only needs
/// text in, text out, and token counts for the analysis log.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, AnalyzeError>;
}

/// Messages-API-shaped HTTP client.
pub struct HttpCompletionClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, AnalyzeError> {
        let body = json!({
            "model": req.model,
            "max_tokens": req.max_tokens,
            "messages": [{ "role": "user", "content": req.prompt }],
        });

        debug!(model = %req.model, "sending completion request");
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalyzeError::Api(e.to_string()))?;

        let status = resp.status();
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| AnalyzeError::Api(e.to_string()))?;

        if !status.is_success() {
            let msg = payload["error"]["message"]
                .as_str()
                .unwrap_or("unknown error");
            return Err(AnalyzeError::Api(format!("HTTP {status}: {msg}")));
        }

        let text = payload["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b["type"] == "text")
                    .and_then(|b| b["text"].as_str())
            })
            .ok_or_else(|| AnalyzeError::Api("response carries no text block".into()))?
            .to_string();

        Ok(CompletionResponse {
            text,
            prompt_tokens: payload["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: payload["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        })
    }
}

/// Pre-scripted client for tests. Each `complete` call pops the next
/// response from the front of the queue; the last request is kept so
/// tests can inspect the interpolated prompt that was sent.
pub struct ScriptedCompletionClient {
    scripts: Mutex<Vec<Result<CompletionResponse, AnalyzeError>>>,
    pub last_request: Mutex<Option<CompletionRequest>>,
}

impl ScriptedCompletionClient {
    pub fn new(scripts: Vec<Result<CompletionResponse, AnalyzeError>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            last_request: Mutex::new(None),
        }
    }

    /// Convenience: a client that always answers with `text`.
    pub fn replying(text: &str) -> Self {
        Self::new(vec![Ok(CompletionResponse {
            text: text.to_string(),
            prompt_tokens: 120,
            completion_tokens: 80,
        })])
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, AnalyzeError> {
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(req);
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        if scripts.is_empty() {
            return Err(AnalyzeError::Api("scripted client exhausted".into()));
        }
        scripts.remove(0)
    }
}
