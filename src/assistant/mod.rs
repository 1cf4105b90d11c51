//! Generative-text collaborator
//!
//! Cosmetic helpers (aliases, room names) and link-safety opinions backed by
//! an external text model. Every helper always produces an answer: when the
//! model is missing, slow or returns garbage the caller gets a local fallback.

pub mod extract;
pub mod gemini;

use async_trait::async_trait;
use log::{debug, warn};
use rand::Rng;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::core::message_types::{AliasPayload, ScanPayload, ScanStatus};
use crate::error::{RelayError, Result};

pub use extract::extract_json;
pub use gemini::GeminiClient;

const ALIAS_PROMPT: &str = "Generate a cool, cryptic hacker username (max 15 chars, no spaces) \
and a short 1-sentence sci-fi backstory. Return ONLY JSON: { \"username\": \"...\", \"backstory\": \"...\" }";

const ROOM_NAME_PROMPT: &str = "Generate a single cool, secure-sounding chat room name \
(max 20 chars, no spaces, use underscores). Examples: 'Shadow_Ops', 'Neon_Grid', 'Sector_4'. \
Return ONLY the name as a raw string.";

fn scan_prompt(url: &str) -> String {
    format!(
        "Analyze this URL: \"{}\". Is it safe? Return ONLY JSON: \
         {{ \"status\": \"SAFE\" or \"UNSAFE\", \"reason\": \"Short reason\" }}",
        url
    )
}

/// Text-in, text-out model backend
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Backend name for logging
    fn name(&self) -> &'static str {
        "generator"
    }
}

/// Why a structured completion produced nothing usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionFailure {
    /// No backend configured
    Unavailable,
    /// The backend call failed
    Collaborator(String),
    TimedOut,
    /// The backend answered but no JSON object could be found
    NoStructuredData,
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "no text generator configured"),
            Self::Collaborator(msg) => write!(f, "{}", msg),
            Self::TimedOut => write!(f, "timed out"),
            Self::NoStructuredData => write!(f, "no JSON object in response"),
        }
    }
}

impl std::error::Error for ExtractionFailure {}

impl From<ExtractionFailure> for RelayError {
    fn from(failure: ExtractionFailure) -> Self {
        RelayError::CollaboratorUnavailable(failure.to_string())
    }
}

pub struct Assistant {
    generator: Option<Arc<dyn TextGenerator>>,
    timeout: Duration,
}

impl Assistant {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self {
            generator: Some(generator),
            timeout,
        }
    }

    /// Assistant that always answers with the offline fallbacks
    pub fn disabled() -> Self {
        Self {
            generator: None,
            timeout: Duration::ZERO,
        }
    }

    /// Gemini-backed assistant when an API key is configured, disabled otherwise
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        match &config.gemini_api_key {
            Some(api_key) => {
                let client = GeminiClient::new(
                    api_key.clone(),
                    config.gemini_model.clone(),
                    config.gemini_endpoint.clone(),
                    config.collaborator_timeout,
                )?;
                Ok(Self::new(Arc::new(client), config.collaborator_timeout))
            }
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    async fn complete(&self, prompt: &str) -> std::result::Result<String, ExtractionFailure> {
        let generator = self
            .generator
            .as_ref()
            .ok_or(ExtractionFailure::Unavailable)?;

        match tokio::time::timeout(self.timeout, generator.generate(prompt)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(ExtractionFailure::Collaborator(e.to_string())),
            Err(_) => {
                warn!(
                    "{} did not answer within {}s",
                    generator.name(),
                    self.timeout.as_secs()
                );
                Err(ExtractionFailure::TimedOut)
            }
        }
    }

    /// Ask for a JSON object and pull it out of whatever the model returns
    pub async fn structured_completion(
        &self,
        prompt: &str,
    ) -> std::result::Result<Value, ExtractionFailure> {
        let text = self.complete(prompt).await?;
        extract_json(&text).ok_or(ExtractionFailure::NoStructuredData)
    }

    pub async fn generate_alias(&self) -> AliasPayload {
        let failure = match self.structured_completion(ALIAS_PROMPT).await {
            Ok(value) => match (non_blank(&value, "username"), non_blank(&value, "backstory")) {
                (Some(username), Some(backstory)) => {
                    return AliasPayload {
                        username,
                        backstory,
                    }
                }
                _ => ExtractionFailure::NoStructuredData,
            },
            Err(failure) => failure,
        };

        if failure == ExtractionFailure::Unavailable {
            debug!("Alias requested with no text generator configured");
            return AliasPayload {
                username: "Offline_User".to_string(),
                backstory: "AI module disconnected.".to_string(),
            };
        }

        let username = format!("Ghost_{}", rand::thread_rng().gen_range(0..100));
        warn!("Alias generation failed ({}), using {}", failure, username);
        AliasPayload {
            username,
            backstory: "Encrypted signal found.".to_string(),
        }
    }

    pub async fn generate_room_name(&self) -> String {
        let failure = match self.complete(ROOM_NAME_PROMPT).await {
            Ok(text) => {
                let name = clean_room_name(&text);
                if !name.is_empty() {
                    return name;
                }
                ExtractionFailure::NoStructuredData
            }
            Err(failure) => failure,
        };

        if failure == ExtractionFailure::Unavailable {
            return format!("Node_{}", rand::thread_rng().gen_range(0..1000));
        }

        let name = format!("Uplink_{}", rand::thread_rng().gen_range(0..999));
        warn!("Room name generation failed ({}), using {}", failure, name);
        name
    }

    pub async fn scan_url(&self, url: &str) -> ScanPayload {
        let verdict = |status, reason: &str| ScanPayload {
            url: url.to_string(),
            status,
            reason: reason.to_string(),
        };

        if let Err(e) = url::Url::parse(url) {
            debug!("Refusing to scan malformed URL: {}", e);
            return verdict(ScanStatus::Error, "Invalid URL");
        }

        match self.structured_completion(&scan_prompt(url)).await {
            Ok(value) => {
                let status = value
                    .get("status")
                    .and_then(Value::as_str)
                    .and_then(ScanStatus::parse);
                match status {
                    Some(status) => {
                        let reason = value
                            .get("reason")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        verdict(status, reason)
                    }
                    None => {
                        warn!("URL scan answer had no usable status");
                        verdict(ScanStatus::Error, "AI Analysis Failed")
                    }
                }
            }
            Err(ExtractionFailure::Unavailable) => verdict(ScanStatus::Unknown, "AI unavailable"),
            Err(failure) => {
                warn!("URL scan failed: {}", failure);
                verdict(ScanStatus::Error, "AI Analysis Failed")
            }
        }
    }
}

fn non_blank(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Strip quotes, backticks and newlines the model tends to add
fn clean_room_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '"' | '`' | '\n'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays canned answers in order; the last one repeats
    struct ScriptedGenerator {
        answers: Mutex<Vec<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(answers: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn ok(text: &str) -> Arc<Self> {
            Self::new(vec![Ok(text.to_string())])
        }

        fn prompt_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers[0].clone()
            }
        }
    }

    struct StalledGenerator;

    #[async_trait]
    impl TextGenerator for StalledGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("{\"username\": \"late\", \"backstory\": \"too late\"}".to_string())
        }
    }

    fn assistant(generator: Arc<dyn TextGenerator>) -> Assistant {
        Assistant::new(generator, Duration::from_secs(10))
    }

    fn failing() -> Arc<ScriptedGenerator> {
        ScriptedGenerator::new(vec![Err(RelayError::CollaboratorUnavailable(
            "HTTP 500".to_string(),
        ))])
    }

    #[tokio::test]
    async fn test_alias_from_model() {
        let assistant = assistant(ScriptedGenerator::ok(
            "```json\n{\"username\": \"Zer0_Day\", \"backstory\": \"Born in a dead network.\"}\n```",
        ));
        let alias = assistant.generate_alias().await;
        assert_eq!(alias.username, "Zer0_Day");
        assert_eq!(alias.backstory, "Born in a dead network.");
    }

    #[tokio::test]
    async fn test_alias_fallbacks() {
        let alias = Assistant::disabled().generate_alias().await;
        assert_eq!(alias.username, "Offline_User");
        assert_eq!(alias.backstory, "AI module disconnected.");

        for generator in [
            failing(),
            ScriptedGenerator::ok("I'd rather not."),
            ScriptedGenerator::ok("{\"username\": \"  \", \"backstory\": \"x\"}"),
        ] {
            let alias = assistant(generator).generate_alias().await;
            assert!(alias.username.starts_with("Ghost_"));
            let suffix: u32 = alias.username["Ghost_".len()..].parse().unwrap();
            assert!(suffix < 100);
            assert_eq!(alias.backstory, "Encrypted signal found.");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_model_times_out_into_fallback() {
        let assistant = Assistant::new(Arc::new(StalledGenerator), Duration::from_secs(10));
        let started = tokio::time::Instant::now();

        let alias = assistant.generate_alias().await;

        assert!(alias.username.starts_with("Ghost_"));
        assert!(started.elapsed() < Duration::from_secs(11));
        assert_eq!(
            assistant.structured_completion("anything").await,
            Err(ExtractionFailure::TimedOut)
        );
    }

    #[tokio::test]
    async fn test_room_name_is_cleaned() {
        let assistant = assistant(ScriptedGenerator::ok("`\"Neon_Grid\"`\n"));
        assert_eq!(assistant.generate_room_name().await, "Neon_Grid");
    }

    #[tokio::test]
    async fn test_room_name_fallbacks() {
        let name = Assistant::disabled().generate_room_name().await;
        assert!(name.starts_with("Node_"));

        let name = assistant(failing()).generate_room_name().await;
        assert!(name.starts_with("Uplink_"));

        let name = assistant(ScriptedGenerator::ok("\"\"\n")).generate_room_name().await;
        assert!(name.starts_with("Uplink_"));
    }

    #[tokio::test]
    async fn test_scan_url_verdicts() {
        let generator = ScriptedGenerator::ok("{\"status\": \"unsafe\", \"reason\": \"Typosquatted domain\"}");
        let payload = assistant(generator.clone())
            .scan_url("https://paypa1.example/login")
            .await;
        assert_eq!(payload.status, ScanStatus::Unsafe);
        assert_eq!(payload.reason, "Typosquatted domain");
        assert_eq!(payload.url, "https://paypa1.example/login");
        assert!(generator.prompts.lock().unwrap()[0].contains("paypa1.example"));

        let payload = assistant(ScriptedGenerator::ok("{\"status\": \"maybe\"}"))
            .scan_url("https://example.com")
            .await;
        assert_eq!(payload.status, ScanStatus::Error);
        assert_eq!(payload.reason, "AI Analysis Failed");

        let payload = Assistant::disabled().scan_url("https://example.com").await;
        assert_eq!(payload.status, ScanStatus::Unknown);
        assert_eq!(payload.reason, "AI unavailable");
    }

    #[tokio::test]
    async fn test_invalid_url_skips_model() {
        let generator = ScriptedGenerator::ok("{\"status\": \"SAFE\", \"reason\": \"fine\"}");
        let payload = assistant(generator.clone()).scan_url("not a url").await;

        assert_eq!(payload.status, ScanStatus::Error);
        assert_eq!(payload.reason, "Invalid URL");
        assert_eq!(generator.prompt_count(), 0);
    }

    #[test]
    fn test_from_config_without_key_is_disabled() {
        let assistant = Assistant::from_config(&ServerConfig::default()).unwrap();
        assert!(!assistant.is_enabled());
    }
}
