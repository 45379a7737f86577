//! Generation adapter.
//!
//! Turns a learning request into a structured payload using an external
//! generative model. The rest of the crate only sees [`Generator`], which
//! normalizes every structured response into the canonical payload types of
//! [`autodidact_core::payload`] before returning it.
//!
//! # Backends
//!
//! The backend is a strategy chosen once, from configuration, by
//! [`create_backend`]:
//!
//! | `generation.provider` | Backend |
//! |-----------------------|---------|
//! | `mock` | [`MockBackend`], deterministic offline payloads |
//! | `gemini` | [`GeminiBackend`], fails at startup without an API key |
//! | `auto` | Gemini when the key variable is set, mock otherwise |
//!
//! # Retry Strategy
//!
//! [`GeminiBackend`] retries transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//!
//! Retries never happen above this module; the synchronizer receives either
//! a payload or the final error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use autodidact_core::payload::{
    self, ActivityDraft, ConceptDraft, Elaboration, PayloadError, TreeNode,
};

use crate::config::GenerationConfig;
use crate::prompts;

const DEFAULT_INSTRUCTION: &str = "Explain this topic in depth.";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request to generation backend failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("generation response contained no text")]
    EmptyResponse,

    #[error("generation backend not configured: {0}")]
    Unconfigured(String),
}

/// A model the backend can serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub display_name: String,
}

/// One request to the generative backend.
#[derive(Debug, Clone, Copy)]
pub enum GenerationRequest<'a> {
    Syllabus {
        topic: &'a str,
    },
    Elaboration {
        title: &'a str,
        description: &'a str,
        instruction: &'a str,
    },
    Concepts {
        title: &'a str,
        description: &'a str,
    },
    Activities {
        concept_title: &'a str,
        context: &'a str,
    },
    Summary {
        text: &'a str,
    },
    Answer {
        title: &'a str,
        context: &'a str,
        question: &'a str,
    },
}

impl GenerationRequest<'_> {
    pub fn prompt(&self) -> String {
        match *self {
            GenerationRequest::Syllabus { topic } => prompts::syllabus(topic),
            GenerationRequest::Elaboration {
                title,
                description,
                instruction,
            } => prompts::elaboration(title, description, instruction),
            GenerationRequest::Concepts { title, description } => {
                prompts::concepts(title, description)
            }
            GenerationRequest::Activities {
                concept_title,
                context,
            } => prompts::activities(concept_title, context),
            GenerationRequest::Summary { text } => prompts::summary(text),
            GenerationRequest::Answer {
                title,
                context,
                question,
            } => prompts::answer(title, context, question),
        }
    }

    /// Whether the response must be a JSON document.
    pub fn expects_json(&self) -> bool {
        !matches!(
            self,
            GenerationRequest::Summary { .. } | GenerationRequest::Answer { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GenerationRequest::Syllabus { .. } => "syllabus",
            GenerationRequest::Elaboration { .. } => "elaboration",
            GenerationRequest::Concepts { .. } => "concepts",
            GenerationRequest::Activities { .. } => "activities",
            GenerationRequest::Summary { .. } => "summary",
            GenerationRequest::Answer { .. } => "answer",
        }
    }
}

/// A generative model service.
///
/// `complete` returns the raw response text; parsing and normalization
/// happen in [`Generator`].
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, GenerationError>;

    async fn complete(
        &self,
        request: &GenerationRequest<'_>,
        model: Option<&str>,
    ) -> Result<String, GenerationError>;
}

/// Selects the backend named by `generation.provider`.
pub fn create_backend(
    config: &GenerationConfig,
) -> Result<Arc<dyn GenerationBackend>, GenerationError> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockBackend)),
        "gemini" => {
            let key = config.api_key().ok_or_else(|| {
                GenerationError::Unconfigured(format!(
                    "{} environment variable not set",
                    config.api_key_env
                ))
            })?;
            Ok(Arc::new(GeminiBackend::new(config, key)?))
        }
        "auto" => match config.api_key() {
            Some(key) => Ok(Arc::new(GeminiBackend::new(config, key)?)),
            None => {
                tracing::info!(
                    env = %config.api_key_env,
                    "no API key found, using mock generation backend"
                );
                Ok(Arc::new(MockBackend))
            }
        },
        other => Err(GenerationError::Unconfigured(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

// ============ Mock ============

/// Deterministic backend used when no API key is configured.
///
/// Every payload is structurally valid. The syllabus uses the legacy
/// `modules` key so the normalizer's alternate shapes stay exercised.
pub struct MockBackend;

pub const MOCK_SUMMARY: &str = "Mock summary: Key concepts include X, Y, and Z. (No API Key)";

#[async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, GenerationError> {
        Ok(vec![ModelInfo {
            name: "mock-model".to_string(),
            display_name: "Mock Model (No API Key)".to_string(),
        }])
    }

    async fn complete(
        &self,
        request: &GenerationRequest<'_>,
        _model: Option<&str>,
    ) -> Result<String, GenerationError> {
        let text = match *request {
            GenerationRequest::Syllabus { topic } => json!({
                "title": topic,
                "description": format!("Mock syllabus for {} (No API Key found)", topic),
                "modules": [
                    {
                        "title": "Fundamentals",
                        "description": "Basic concepts.",
                        "subtopics": [
                            {"title": "History", "description": "Origins."},
                            {"title": "Core Theory", "description": "How it works."}
                        ]
                    },
                    {
                        "title": "Advanced Application",
                        "description": "Moving forward.",
                        "subtopics": [
                            {"title": "Case Studies", "description": "Real world examples."}
                        ]
                    }
                ]
            })
            .to_string(),
            GenerationRequest::Elaboration { title, .. } => json!({
                "description": format!("Mock explanation of {}. (No API Key)", title),
                "subtopics": [
                    {"title": format!("{} in Practice", title), "description": "Applying the basics."}
                ],
                "resources": [
                    {"title": format!("{} overview", title), "url": "https://example.com/overview"}
                ],
                "concepts": [
                    {
                        "title": format!("Core Idea of {}", title),
                        "description": "The one thing to remember.",
                        "activities": [
                            {
                                "type": "quiz",
                                "instructions": "Test your recall.",
                                "content": {"question": "What is the core idea?", "options": ["A", "B", "C"], "correct": "A"}
                            },
                            {"type": "read", "instructions": "Read the summary.", "content": "Mock reading."}
                        ]
                    }
                ]
            })
            .to_string(),
            GenerationRequest::Concepts { title, .. } => json!([
                {"title": format!("Introduction to {}", title), "description": "Where it starts.", "order_index": 1},
                {"title": format!("Core Principles of {}", title), "description": "How it works.", "order_index": 2},
                {"title": format!("Applying {}", title), "description": "Using it.", "order_index": 3}
            ])
            .to_string(),
            GenerationRequest::Activities { concept_title, .. } => json!([
                {
                    "type": "flashcard",
                    "instructions": format!("Recall the definition of {}.", concept_title),
                    "content": {"front": concept_title, "back": "Mock definition."}
                },
                {"type": "read", "instructions": "Explain it in your own words.", "content": "Mock explanation."},
                {"type": "project", "instructions": "Apply it to a small problem.", "content": "Mock scenario."}
            ])
            .to_string(),
            GenerationRequest::Summary { .. } => MOCK_SUMMARY.to_string(),
            GenerationRequest::Answer { title, .. } => format!(
                "Mock answer about {}: what do you already know that could help here? (No API Key)",
                title
            ),
        };
        Ok(text)
    }
}

// ============ Gemini ============

/// Header carrying the API key. The key must never appear in a URL, since
/// request errors render the URL.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Backend for the Google Generative Language REST API.
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
    max_retries: u32,
}

impl GeminiBackend {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    /// Sends a request, retrying rate limits, server errors, and network
    /// failures with exponential backoff.
    async fn send_with_retry<F>(&self, build: F) -> Result<Value, GenerationError>
    where
        F: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // 1s, 2s, 4s, ... capped at 32s
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match build().header(API_KEY_HEADER, &self.api_key).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| GenerationError::Http(e.without_url()));
                    }

                    let body = response.text().await.unwrap_or_default();
                    let err = GenerationError::Api {
                        status: status.as_u16(),
                        body,
                    };
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(attempt, %status, "generation request failed, retrying");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    let e = e.without_url();
                    tracing::warn!(attempt, error = %e, "generation request failed, retrying");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or(GenerationError::EmptyResponse))
    }
}

fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

/// Concatenates the text parts of the first candidate.
fn candidate_text(response: &Value) -> Result<String, GenerationError> {
    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or(GenerationError::EmptyResponse)?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(text)
}

fn parse_model_list(response: &Value) -> Vec<ModelInfo> {
    response
        .get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter(|m| {
                    m.get("supportedGenerationMethods")
                        .and_then(Value::as_array)
                        .is_some_and(|methods| {
                            methods.iter().any(|x| x.as_str() == Some("generateContent"))
                        })
                })
                .filter_map(|m| {
                    let name = m.get("name")?.as_str()?.to_string();
                    let display_name = m
                        .get("displayName")
                        .and_then(Value::as_str)
                        .unwrap_or(&name)
                        .to_string();
                    Some(ModelInfo { name, display_name })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, GenerationError> {
        let url = format!("{}/models", self.base_url);
        let response = self.send_with_retry(|| self.client.get(&url)).await?;
        Ok(parse_model_list(&response))
    }

    async fn complete(
        &self,
        request: &GenerationRequest<'_>,
        model: Option<&str>,
    ) -> Result<String, GenerationError> {
        let model = model.unwrap_or(&self.default_model);
        let url = format!("{}/{}:generateContent", self.base_url, model_path(model));

        let mut body = json!({
            "contents": [{"parts": [{"text": request.prompt()}]}],
        });
        if request.expects_json() {
            body["generationConfig"] = json!({"responseMimeType": "application/json"});
        }

        let response = self
            .send_with_retry(|| self.client.post(&url).json(&body))
            .await?;
        candidate_text(&response)
    }
}

// ============ Facade ============

/// Entry point for all generation. Cheap to clone.
#[derive(Clone)]
pub struct Generator {
    backend: Arc<dyn GenerationBackend>,
    max_input_chars: usize,
}

impl Generator {
    pub fn new(backend: Arc<dyn GenerationBackend>, config: &GenerationConfig) -> Self {
        Self {
            backend,
            max_input_chars: config.max_input_chars,
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        Ok(Self::new(create_backend(config)?, config))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    async fn complete(
        &self,
        request: GenerationRequest<'_>,
        model: Option<&str>,
    ) -> Result<String, GenerationError> {
        tracing::debug!(
            kind = request.kind(),
            backend = self.backend.name(),
            model = model.unwrap_or("default"),
            "generation request"
        );
        self.backend.complete(&request, model).await
    }

    async fn complete_json(
        &self,
        request: GenerationRequest<'_>,
        model: Option<&str>,
    ) -> Result<Value, GenerationError> {
        let text = self.complete(request, model).await?;
        Ok(payload::parse_json_response(&text)?)
    }

    pub async fn generate_tree(
        &self,
        topic: &str,
        model: Option<&str>,
    ) -> Result<TreeNode, GenerationError> {
        let value = self
            .complete_json(GenerationRequest::Syllabus { topic }, model)
            .await?;
        Ok(TreeNode::from_value(&value)?)
    }

    /// An empty `instruction` asks for a general deep dive.
    pub async fn generate_elaboration(
        &self,
        title: &str,
        description: &str,
        instruction: &str,
        model: Option<&str>,
    ) -> Result<Elaboration, GenerationError> {
        let instruction = if instruction.trim().is_empty() {
            DEFAULT_INSTRUCTION
        } else {
            instruction
        };
        let value = self
            .complete_json(
                GenerationRequest::Elaboration {
                    title,
                    description,
                    instruction,
                },
                model,
            )
            .await?;
        Ok(Elaboration::from_value(&value)?)
    }

    pub async fn generate_concept_list(
        &self,
        title: &str,
        description: &str,
        model: Option<&str>,
    ) -> Result<Vec<ConceptDraft>, GenerationError> {
        let value = self
            .complete_json(GenerationRequest::Concepts { title, description }, model)
            .await?;
        Ok(payload::parse_concept_list(&value)?)
    }

    pub async fn generate_activity_list(
        &self,
        concept_title: &str,
        context: &str,
        model: Option<&str>,
    ) -> Result<Vec<ActivityDraft>, GenerationError> {
        let value = self
            .complete_json(
                GenerationRequest::Activities {
                    concept_title,
                    context,
                },
                model,
            )
            .await?;
        Ok(payload::parse_activity_list(&value)?)
    }

    /// Summarizes at most `max_input_chars` characters of `text`.
    pub async fn generate_summary(
        &self,
        text: &str,
        model: Option<&str>,
    ) -> Result<String, GenerationError> {
        let text = truncate_chars(text, self.max_input_chars);
        let summary = self
            .complete(GenerationRequest::Summary { text }, model)
            .await?;
        Ok(summary.trim().to_string())
    }

    pub async fn answer_question(
        &self,
        title: &str,
        context: &str,
        question: &str,
        model: Option<&str>,
    ) -> Result<String, GenerationError> {
        let answer = self
            .complete(
                GenerationRequest::Answer {
                    title,
                    context,
                    question,
                },
                model,
            )
            .await?;
        Ok(answer.trim().to_string())
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, GenerationError> {
        self.backend.list_models().await
    }
}

/// The first `max` characters of `text`, cut on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
