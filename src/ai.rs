use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;
use crate::message::{PromptMessage, Role};
use crate::settings::{API_MODELS_FETCHED_AT_KEY, API_MODELS_KEY, Credentials};
use crate::storage::SettingsStore;

/// Shown instead of model output when the response carried no text.
pub const EMPTY_RESULT: &str = "[未生成内容]";
pub const MAX_TOKENS: u32 = 20000;
pub const PING_MAX_TOKENS: u32 = 100;

/// One chat-completion endpoint. No retries, no streaming.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        credentials: &Credentials,
        messages: &[PromptMessage],
    ) -> Result<String, PipelineError>;

    async fn list_models(
        &self,
        base_url: &str,
        api_key: &str,
    ) -> Result<Vec<String>, PipelineError>;

    /// Send a one-word request and return whatever the model answered.
    async fn ping(&self, credentials: &Credentials) -> Result<String, PipelineError>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatCompletionRequestMessage>,
    max_tokens: u32,
}

// Lenient on purpose: compatible endpoints disagree on everything but `choices`.
#[derive(Debug, Default, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl CompletionResponse {
    fn into_text(self) -> String {
        let text = self
            .choices
            .into_iter()
            .map(|c| c.message.and_then(|m| m.content).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() {
            EMPTY_RESULT.to_string()
        } else {
            text
        }
    }
}

pub fn to_wire(message: &PromptMessage) -> Result<ChatCompletionRequestMessage, PipelineError> {
    let content = message.content.clone();
    Ok(match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()?
            .into(),
    })
}

pub fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/v1/{}", base_url.trim().trim_end_matches('/'), path)
}

#[derive(Clone, Default)]
pub struct OpenAiClient {
    client: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn chat(
        &self,
        credentials: &Credentials,
        messages: &[PromptMessage],
        max_tokens: u32,
    ) -> Result<CompletionResponse, PipelineError> {
        let body = CompletionRequest {
            model: &credentials.model,
            messages: messages
                .iter()
                .map(to_wire)
                .collect::<Result<Vec<_>, _>>()?,
            max_tokens,
        };
        debug!("Completion request: {}", serde_json::to_string(&body)?);

        let response = self
            .client
            .post(endpoint(&credentials.base_url, "chat/completions"))
            .bearer_auth(&credentials.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Completion endpoint answered {}", status);
            return Err(PipelineError::HttpStatus(status.as_u16()));
        }

        let raw = response.text().await?;
        serde_json::from_str(&raw)
            .map_err(|e| PipelineError::EmptyResponse(format!("unreadable completion body: {e}")))
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        credentials: &Credentials,
        messages: &[PromptMessage],
    ) -> Result<String, PipelineError> {
        let text = self.chat(credentials, messages, MAX_TOKENS).await?.into_text();
        debug!("Completion result: {}", text);
        Ok(text)
    }

    async fn list_models(
        &self,
        base_url: &str,
        api_key: &str,
    ) -> Result<Vec<String>, PipelineError> {
        let response = self
            .client
            .get(endpoint(base_url, "models"))
            .bearer_auth(api_key.trim())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::HttpStatus(status.as_u16()));
        }

        let raw = response.text().await?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::EmptyResponse(format!("unreadable model list: {e}")))?;
        let listing = ModelListing::parse(&value);
        debug!("Model list shape: {}", listing.shape());

        let ids = listing.into_ids();
        if ids.is_empty() {
            return Err(PipelineError::EmptyResponse("no models parsed".to_string()));
        }
        Ok(ids)
    }

    async fn ping(&self, credentials: &Credentials) -> Result<String, PipelineError> {
        let response = self
            .chat(credentials, &[PromptMessage::user("ping")], PING_MAX_TOKENS)
            .await?;
        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        info!("Model {} answered ping", credentials.model);
        Ok(reply)
    }
}

/// The response shapes seen in the wild for a model listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelListing {
    /// `{"data": [...]}`, the OpenAI shape.
    Data(Vec<String>),
    /// `{"models": [...]}`
    Models(Vec<String>),
    /// A bare top-level array.
    Bare(Vec<String>),
    /// `{"model": "..."}`
    SingleModel(String),
    /// `{"id": "..."}`
    SingleId(String),
    Unrecognized,
}

fn entry_id(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(fields) => ["id", "model", "name"]
            .iter()
            .filter_map(|k| fields.get(*k).and_then(Value::as_str))
            .find(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn entry_ids(entries: &[Value]) -> Vec<String> {
    entries.iter().filter_map(entry_id).collect()
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl ModelListing {
    pub fn parse(value: &Value) -> Self {
        if let Some(entries) = value.get("data").and_then(Value::as_array) {
            return ModelListing::Data(entry_ids(entries));
        }
        if let Some(entries) = value.get("models").and_then(Value::as_array) {
            return ModelListing::Models(entry_ids(entries));
        }
        if let Some(entries) = value.as_array() {
            return ModelListing::Bare(entry_ids(entries));
        }
        if let Some(model) = non_empty_str(value.get("model")) {
            return ModelListing::SingleModel(model);
        }
        if let Some(id) = non_empty_str(value.get("id")) {
            return ModelListing::SingleId(id);
        }
        ModelListing::Unrecognized
    }

    pub fn shape(&self) -> &'static str {
        match self {
            ModelListing::Data(_) => "data",
            ModelListing::Models(_) => "models",
            ModelListing::Bare(_) => "bare list",
            ModelListing::SingleModel(_) => "single model",
            ModelListing::SingleId(_) => "single id",
            ModelListing::Unrecognized => "unrecognized",
        }
    }

    /// Model ids, first occurrence wins.
    pub fn into_ids(self) -> Vec<String> {
        let ids = match self {
            ModelListing::Data(ids) | ModelListing::Models(ids) | ModelListing::Bare(ids) => ids,
            ModelListing::SingleModel(id) | ModelListing::SingleId(id) => vec![id],
            ModelListing::Unrecognized => Vec::new(),
        };
        let mut unique: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        unique
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedModels {
    pub ids: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelFetch {
    Cached(CachedModels),
    Fetched(CachedModels),
}

impl ModelFetch {
    pub fn models(&self) -> &CachedModels {
        match self {
            ModelFetch::Cached(models) | ModelFetch::Fetched(models) => models,
        }
    }
}

/// Persisted model ids plus the time they were fetched.
#[derive(Clone)]
pub struct ModelCatalog {
    store: SettingsStore,
}

impl ModelCatalog {
    pub fn new(store: SettingsStore) -> Self {
        Self { store }
    }

    pub fn cached(&self) -> Option<CachedModels> {
        let millis: i64 = self.store.get(API_MODELS_FETCHED_AT_KEY)?;
        let fetched_at = DateTime::from_timestamp_millis(millis)?;
        Some(CachedModels {
            ids: self.store.get_or_default(API_MODELS_KEY),
            fetched_at,
        })
    }

    pub fn record(&self, ids: Vec<String>) -> CachedModels {
        let fetched_at = Utc::now();
        self.store.set(API_MODELS_KEY, &ids);
        self.store
            .set(API_MODELS_FETCHED_AT_KEY, &fetched_at.timestamp_millis());
        CachedModels { ids, fetched_at }
    }

    /// Answer from the cache unless `force` is set or nothing was fetched yet.
    pub async fn fetch(
        &self,
        client: &dyn CompletionClient,
        base_url: &str,
        api_key: &str,
        force: bool,
    ) -> Result<ModelFetch, PipelineError> {
        if base_url.trim().is_empty() {
            return Err(PipelineError::ConfigMissing("API URL"));
        }
        if api_key.trim().is_empty() {
            return Err(PipelineError::ConfigMissing("API key"));
        }
        if !force {
            if let Some(cached) = self.cached() {
                debug!("Using model list fetched at {}", cached.fetched_at);
                return Ok(ModelFetch::Cached(cached));
            }
        }
        let ids = client.list_models(base_url, api_key).await?;
        info!("Fetched {} models", ids.len());
        Ok(ModelFetch::Fetched(self.record(ids)))
    }
}
