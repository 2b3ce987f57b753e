//! HTTP client for an OpenAI-compatible API.
//!
//! [`OpenAIClient`] implements both [`EmbeddingService`] (`POST /embeddings`)
//! and [`GenerationService`] (`POST /chat/completions`). It performs a
//! single attempt per call and classifies failures into
//! [`ServiceError`]s; retrying is left to the
//! [`ResilientInvoker`](crate::retry::ResilientInvoker).

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{ModelsConfig, ServiceConfig};
use crate::embedding::EmbeddingService;
use crate::error::{classify_status, classify_transport, ServiceError};
use crate::generation::{GenerationRequest, GenerationService};

pub struct OpenAIClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAIClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key variable named in
    /// `service.api_key_env` is not set.
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &ServiceConfig, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        service: &str,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value, ServiceError> {
        let url = format!("{}/{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::new(classify_transport(&e), service, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ServiceError::new(
                classify_status(status.as_u16(), &body_text),
                service,
                format!("API error {}: {}", status, body_text),
            ));
        }

        // Headers arrived, so a failed body read is a dropped connection.
        let bytes = resp.bytes().await.map_err(|e| {
            ServiceError::transient(service, format!("Failed to read response body: {}", e))
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ServiceError::other(service, format!("Invalid JSON response: {}", e)))
    }
}

// ============ Embeddings ============

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingService for OpenAIClient {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let json = self
            .post_json(
                "embed",
                "embeddings",
                &EmbeddingRequest {
                    model,
                    input: texts,
                },
            )
            .await?;
        parse_embedding_response(json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_embedding_response(json: serde_json::Value) -> Result<Vec<Vec<f32>>, ServiceError> {
    let mut resp: EmbeddingResponse = serde_json::from_value(json).map_err(|e| {
        ServiceError::other("embed", format!("Invalid embeddings response: {}", e))
    })?;
    resp.data.sort_by_key(|d| d.index);
    Ok(resp.data.into_iter().map(|d| d.embedding).collect())
}

// ============ Chat completions ============

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

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

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl GenerationService for OpenAIClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        let body = ChatRequest {
            model: &request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.instruction,
                },
                ChatMessage {
                    role: "user",
                    content: &request.input,
                },
            ],
            temperature: request.temperature,
            response_format: request.json_output.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let json = self.post_json("generate", "chat/completions", &body).await?;
        parse_chat_response(json)
    }
}

fn parse_chat_response(json: serde_json::Value) -> Result<String, ServiceError> {
    let resp: ChatResponse = serde_json::from_value(json).map_err(|e| {
        ServiceError::other("generate", format!("Invalid chat response: {}", e))
    })?;
    Ok(resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default())
}

/// Model ids in use, for display.
pub fn describe(models: &ModelsConfig, service: &ServiceConfig) -> String {
    format!(
        "{} (embedding: {}, generation: {})",
        service.base_url, models.embedding, models.generation
    )
}
