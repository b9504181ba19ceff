//! # Generation Backend
//!
//! OpenAI-compatible completions client. Works against any server exposing
//! the `/completions` endpoint (OpenAI, vLLM, llama.cpp, TGI in
//! OpenAI-compatibility mode).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::domain::config::ModelConfig;
use crate::domain::traits::TextGenerator;

/// HTTP client reused across requests
fn http_client() -> &'static Client {
    use std::sync::OnceLock;
    static CLIENT: OnceLock<Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client")
    })
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

pub struct HttpGenerator {
    base_url: String,
    model_name: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    /// Build a generator from model configuration. The API key is read from
    /// the environment variable named in `api_key_env`; a missing variable
    /// just means unauthenticated requests (local servers).
    pub fn new(config: &ModelConfig) -> Self {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        if api_key.is_none() {
            if let Some(var) = &config.api_key_env {
                tracing::warn!("API key env var {var} not set, sending unauthenticated requests");
            }
        }
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or("http://localhost:8000/v1");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model_name: config
                .model_name
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            api_key,
        }
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    async fn generate(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
        top_p: f64,
    ) -> Result<String, String> {
        let url = format!("{}/completions", self.base_url);
        let request = CompletionRequest {
            model: &self.model_name,
            prompt,
            temperature,
            max_tokens,
            top_p,
        };

        let mut builder = http_client().post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(&error_text) {
                if let Some(message) = error_json
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                {
                    return Err(message.to_string());
                }
            }
            return Err(format!("HTTP {status}: {error_text}"));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse response: {e}"))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .ok_or_else(|| "No choices in response".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let config = ModelConfig {
            base_url: Some("http://localhost:8080/v1/".to_string()),
            ..ModelConfig::default()
        };
        let generator = HttpGenerator::new(&config);
        assert_eq!(generator.base_url, "http://localhost:8080/v1");
        assert_eq!(generator.model_name, "default");
    }

    #[test]
    fn test_request_serialization() {
        let request = CompletionRequest {
            model: "test-model",
            prompt: "<|user|>\nhi\n<|assistant|>\n",
            temperature: 0.7,
            max_tokens: 256,
            top_p: 0.9,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["max_tokens"], 256);
        assert!(json["prompt"].as_str().unwrap().ends_with("<|assistant|>\n"));
    }
}
