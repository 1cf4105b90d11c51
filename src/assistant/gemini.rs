//! Google Gemini `generateContent` client

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::assistant::TextGenerator;
use crate::error::{RelayError, Result};

pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, endpoint: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }

    fn request_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

// reqwest errors embed the request URL, which carries the API key
fn unavailable(e: reqwest::Error) -> RelayError {
    RelayError::CollaboratorUnavailable(e.without_url().to_string())
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });

        let response = self
            .http
            .post(self.request_url())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::CollaboratorUnavailable(format!(
                "{} returned HTTP {}",
                self.model, status
            )));
        }

        let payload: GenerateContentResponse = response.json().await.map_err(unavailable)?;
        debug!("{} answered with {} candidate(s)", self.model, payload.candidates.len());

        payload.into_text().ok_or_else(|| {
            RelayError::CollaboratorUnavailable("Response contained no text".to_string())
        })
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
