//! Completion providers.
//!
//! Concrete implementations of [`roundtable_core::generate::Generator`]:
//! - **[`OpenAIGenerator`]**: `POST {url}/chat/completions` on the OpenAI API
//!   or any compatible endpoint.
//! - **[`OllamaGenerator`]**: `POST {url}/api/chat` on a local Ollama instance.
//!
//! Both bound each request by `generation.timeout_secs` and retry transient
//! failures up to `generation.max_retries` times (see [`crate::http`]).
//! Every failure is returned as a classified
//! [`GenerationError`](roundtable_core::error::GenerationError).

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use roundtable_core::error::{FailureKind, GenerationError};
use roundtable_core::generate::{CompletionRequest, Generator};

use crate::config::GenerationConfig;
use crate::http;

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Model parameters shared by both providers.
#[derive(Debug, Clone)]
struct Sampling {
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    max_retries: u32,
}

impl Sampling {
    fn from_config(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_retries: config.max_retries,
        }
    }
}

fn chat_messages(request: &CompletionRequest) -> serde_json::Value {
    serde_json::json!([
        {"role": "system", "content": request.system},
        {"role": "user", "content": request.user},
    ])
}

// ============ OpenAI-compatible chat ============

pub struct OpenAIGenerator {
    sampling: Sampling,
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    /// The API key is read from `OPENAI_API_KEY`; a missing key is reported
    /// by [`Generator::ready`], not here.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            sampling: Sampling::from_config(config),
            url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            client: http::client(config.timeout_secs)?,
        })
    }

    async fn chat(&self, request: &CompletionRequest) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY not set"))?;
        let body = serde_json::json!({
            "model": self.sampling.model,
            "messages": chat_messages(request),
            "temperature": self.sampling.temperature,
            "max_tokens": self.sampling.max_output_tokens,
        });
        let json = http::post_json(
            &self.client,
            "OpenAI",
            &format!("{}/chat/completions", self.url.trim_end_matches('/')),
            Some(api_key),
            &body,
            self.sampling.max_retries,
        )
        .await?;
        parse_openai_chat(&json)
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.sampling.model
    }

    async fn ready(&self) -> Result<(), GenerationError> {
        if self.api_key.is_none() {
            return Err(GenerationError::new(
                FailureKind::AuthFailed,
                "OPENAI_API_KEY environment variable not set",
            ));
        }
        Ok(())
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        Ok(self.chat(request).await?)
    }
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))?;
    if content.trim().is_empty() {
        bail!("OpenAI returned an empty completion");
    }
    Ok(content.to_string())
}

// ============ Ollama chat ============

pub struct OllamaGenerator {
    sampling: Sampling,
    url: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            sampling: Sampling::from_config(config),
            url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
            client: http::client(config.timeout_secs)?,
        })
    }

    fn base(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    async fn chat(&self, request: &CompletionRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.sampling.model,
            "messages": chat_messages(request),
            "stream": false,
            "options": {
                "temperature": self.sampling.temperature,
                "num_predict": self.sampling.max_output_tokens,
            },
        });
        let json = http::post_json(
            &self.client,
            "Ollama",
            &format!("{}/api/chat", self.base()),
            None,
            &body,
            self.sampling.max_retries,
        )
        .await?;
        parse_ollama_chat(&json)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.sampling.model
    }

    /// Checks that the Ollama server answers.
    async fn ready(&self) -> Result<(), GenerationError> {
        let url = format!("{}/api/tags", self.base());
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(GenerationError::classified(format!(
                "Ollama API error {} at {}",
                resp.status(),
                url
            ))),
            Err(e) => Err(GenerationError::classified(format!(
                "Ollama connection error (is Ollama running at {}?): {}",
                self.base(),
                e
            ))),
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        Ok(self.chat(request).await?)
    }
}

fn parse_ollama_chat(json: &serde_json::Value) -> Result<String> {
    let content = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))?;
    if content.trim().is_empty() {
        bail!("Ollama returned an empty completion");
    }
    Ok(content.to_string())
}

/// Create the generator for `config.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
