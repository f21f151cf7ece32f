use super::{parse_json_object, LanguageOracle, OracleError, OracleRequest};
use crate::config::{EmbeddingConfig, LlmConfig};
use crate::index::{Embedder, IndexError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Client for interacting with Ollama API
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    seed: u64,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    /// JSON schema the response must follow (structured output)
    format: &'a Value,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    seed: u64,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature: 0.0,
            seed: 0,
            timeout: Duration::from_secs(120),
        }
    }

    /// Client for the generate endpoint, as configured.
    pub fn for_generation(config: &LlmConfig) -> Self {
        Self::new(&config.url, &config.model)
            .with_sampling(config.temperature, config.seed)
            .with_timeout(Duration::from_secs(config.timeout_seconds))
    }

    /// Client for the embedding endpoint, as configured.
    pub fn for_embedding(config: &EmbeddingConfig) -> Self {
        Self::new(&config.url, &config.model)
            .with_timeout(Duration::from_secs(config.timeout_seconds))
    }

    pub fn with_sampling(mut self, temperature: f32, seed: u64) -> Self {
        self.temperature = temperature;
        self.seed = seed;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a response constrained to `schema` and parse it as a JSON object.
    pub async fn generate_structured(&self, prompt: &str, schema: &Value) -> Result<Value, OracleError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: schema,
            options: GenerateOptions {
                temperature: self.temperature,
                seed: self.seed,
            },
        };

        let exchange = async {
            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(OracleError::Unavailable(format!(
                    "Ollama API error: {} - {}",
                    status, body
                )));
            }

            response
                .json::<GenerateResponse>()
                .await
                .map_err(|e| OracleError::InvalidResponse(format!("Failed to parse Ollama response: {}", e)))
        };

        let result = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| OracleError::Timeout(self.timeout))??;

        parse_json_object(&result.response)
    }

    /// Embed a batch of texts.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let exchange = async {
            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| IndexError::Unavailable(format!("Failed to reach Ollama: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(IndexError::Unavailable(format!(
                    "Ollama embed error: {} - {}",
                    status, body
                )));
            }

            response
                .json::<EmbedResponse>()
                .await
                .map_err(|e| IndexError::Unavailable(format!("Failed to parse embeddings: {}", e)))
        };

        let result = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| IndexError::Unavailable(format!("embedding timed out after {:?}", self.timeout)))??;

        if result.embeddings.len() != texts.len() {
            return Err(IndexError::Unavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                result.embeddings.len()
            )));
        }
        Ok(result.embeddings)
    }

    /// Check if Ollama is available
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.client.get(&url).send()).await,
            Ok(Ok(response)) if response.status().is_success()
        )
    }

    fn transport_error(&self, e: reqwest::Error) -> OracleError {
        if e.is_timeout() {
            OracleError::Timeout(self.timeout)
        } else {
            OracleError::Unavailable(format!("Failed to send request to Ollama: {}", e))
        }
    }
}

#[async_trait]
impl LanguageOracle for OllamaClient {
    async fn complete(&self, request: &OracleRequest) -> Result<Value, OracleError> {
        tracing::debug!("Oracle request: {} ({} chars)", request.kind, request.prompt.len());
        self.generate_structured(&request.prompt, &request.schema).await
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        self.embed_texts(texts).await
    }
}
