//! OpenAI-compatible embeddings client.
//!
//! POSTs `{"input": [text], "model": id}` to `{base_url}/embeddings` and
//! reads `data[0].embedding` from the response.

use crate::error::{EmbeddingError, Result};
use crate::provider::EmbeddingProvider;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default embedding model
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Environment variable holding the API key
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Environment variable overriding the base URL
pub const BASE_URL_VAR: &str = "OPENAI_BASE_URL";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body kept in a status error
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: [&'a str; 1],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f64>,
}

/// Embeddings client for OpenAI-compatible endpoints
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiEmbeddings {
    /// Create a client for the default endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    /// Create a client from `OPENAI_API_KEY` and optional `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key =
            std::env::var(API_KEY_VAR).map_err(|_| EmbeddingError::MissingApiKey { var: API_KEY_VAR })?;
        let base_url = std::env::var(BASE_URL_VAR).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_config(api_key, base_url, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom base URL and request timeout.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| EmbeddingError::Config("invalid API key format".to_string()))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f64>> {
        let request = EmbeddingRequest { input: [text], model };
        let response = self.client.post(self.embeddings_url()).json(&request).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let mut message = body;
            if message.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !message.is_char_boundary(end) {
                    end -= 1;
                }
                message.truncate(end);
            }
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| EmbeddingError::Malformed(format!("invalid JSON: {e}")))?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Malformed("response has no data".to_string()))?;

        if embedding.is_empty() {
            return Err(EmbeddingError::Malformed("embedding is empty".to_string()));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::Malformed(
                "embedding contains non-finite values".to_string(),
            ));
        }

        tracing::debug!(model, dimension = embedding.len(), "fetched embedding");
        Ok(embedding)
    }
}
