use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cleanup::CleanupPattern;
use crate::error::PipelineError;
use crate::storage::SettingsStore;

pub const API_URL_KEY: &str = "independentApiUrl";
pub const API_KEY_KEY: &str = "independentApiKey";
pub const API_MODEL_KEY: &str = "independentApiModel";
pub const API_MODELS_KEY: &str = "independentApiModels";
pub const API_MODELS_FETCHED_AT_KEY: &str = "independentApiModelsFetchedAt";

pub const DEFAULT_NAMESPACE: &str = "friendCircle";
pub const DEFAULT_SAMPLE_COUNT: u32 = 10;
pub const SCHEMA_VERSION: u32 = 1;

/// Storage keys of one pipeline instance.
///
/// Credentials are shared between instances; everything else lives under the
/// instance namespace so two plugins never read each other's prompt lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    namespace: String,
}

impl Default for Keys {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl Keys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn scoped(&self, suffix: &str) -> String {
        format!("{}{}", self.namespace, suffix)
    }

    pub fn chat_count(&self) -> String {
        self.scoped("ChatCount")
    }

    pub fn regex_list(&self) -> String {
        self.scoped("RegexList")
    }

    pub fn user_prompts(&self) -> String {
        self.scoped("UserPrompts")
    }

    pub fn static_config(&self) -> String {
        self.scoped("StaticConfig")
    }

    pub fn dynamic_config(&self) -> String {
        self.scoped("DynamicConfig")
    }

    pub fn auto_mode(&self) -> String {
        self.scoped("AutoMode")
    }

    pub fn hosted_mode(&self) -> String {
        self.scoped("TuoguanMode")
    }

    pub fn auto_last_count(&self) -> String {
        self.scoped("AutoLastCount")
    }

    pub fn hosted_last_count(&self) -> String {
        self.scoped("TuoguanLastCount")
    }

    pub fn schema_version(&self) -> String {
        self.scoped("SchemaVersion")
    }
}

// Everything one generation needs from the store, read fresh per invocation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub api_key: String,
    pub api_model: String,
    pub sample_count: u32,
    pub cleanup_patterns: Vec<CleanupPattern>,
    pub auto_mode: bool,
    pub hosted_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            api_url: String::new(),
            api_key: String::new(),
            api_model: String::new(),
            sample_count: DEFAULT_SAMPLE_COUNT,
            cleanup_patterns: Vec::new(),
            auto_mode: false,
            hosted_mode: false,
        }
    }
}

/// Endpoint credentials, validated as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Settings {
    pub fn load(store: &SettingsStore, keys: &Keys) -> Self {
        let defaults = Settings::default();
        Settings {
            api_url: store.get_or_default(API_URL_KEY),
            api_key: store.get_or_default(API_KEY_KEY),
            api_model: store.get_or_default(API_MODEL_KEY),
            sample_count: store.get_or(&keys.chat_count(), defaults.sample_count),
            cleanup_patterns: store.get_or_default(&keys.regex_list()),
            auto_mode: store.get_or_default(&keys.auto_mode()),
            hosted_mode: store.get_or_default(&keys.hosted_mode()),
        }
    }

    pub fn save(&self, store: &SettingsStore, keys: &Keys) {
        store.set(API_URL_KEY, &self.api_url);
        store.set(API_KEY_KEY, &self.api_key);
        store.set(API_MODEL_KEY, &self.api_model);
        store.set(&keys.chat_count(), &self.sample_count);
        store.set(&keys.regex_list(), &self.cleanup_patterns);
        store.set(&keys.auto_mode(), &self.auto_mode);
        store.set(&keys.hosted_mode(), &self.hosted_mode);
    }

    /// Save the endpoint configuration. All three fields are required.
    pub fn save_api(
        store: &SettingsStore,
        url: &str,
        key: &str,
        model: &str,
    ) -> Result<(), PipelineError> {
        let credentials = check_credentials(url, key, model)?;
        store.set(API_URL_KEY, &credentials.base_url);
        store.set(API_KEY_KEY, &credentials.api_key);
        store.set(API_MODEL_KEY, &credentials.model);
        info!("Saved API configuration for model {}", credentials.model);
        Ok(())
    }

    pub fn set_sample_count(store: &SettingsStore, keys: &Keys, count: u32) {
        store.set(&keys.chat_count(), &count);
    }

    pub fn credentials(&self) -> Result<Credentials, PipelineError> {
        check_credentials(&self.api_url, &self.api_key, &self.api_model)
    }
}

fn check_credentials(url: &str, key: &str, model: &str) -> Result<Credentials, PipelineError> {
    let url = url.trim();
    let key = key.trim();
    let model = model.trim();
    if url.is_empty() {
        return Err(PipelineError::ConfigMissing("API URL"));
    }
    if key.is_empty() {
        return Err(PipelineError::ConfigMissing("API key"));
    }
    if model.is_empty() {
        return Err(PipelineError::ConfigMissing("model"));
    }
    Ok(Credentials {
        base_url: url.trim_end_matches('/').to_string(),
        api_key: key.to_string(),
        model: model.to_string(),
    })
}

/// Bring a store written by an older layout up to [`SCHEMA_VERSION`].
///
/// Version 0 is the plugin's original layout: credentials were raw strings,
/// mode flags were `'1'`/`'0'` and prompts could lack a `tags` array.
/// Returns the version found before migrating.
pub fn migrate(store: &SettingsStore, keys: &Keys) -> u32 {
    let found: u32 = store.get_or(&keys.schema_version(), 0);
    if found >= SCHEMA_VERSION {
        return found;
    }

    for key in [API_URL_KEY, API_KEY_KEY, API_MODEL_KEY] {
        if let Some(raw) = store.get_raw(key) {
            if serde_json::from_str::<String>(&raw).is_err() {
                store.set(key, &raw);
            }
        }
    }

    for key in [keys.auto_mode(), keys.hosted_mode()] {
        if let Some(raw) = store.get_raw(&key) {
            let enabled = matches!(raw.trim(), "1" | "true" | "\"1\"" | "\"true\"");
            store.set(&key, &enabled);
        }
    }

    if let Some(raw) = store.get_raw(&keys.chat_count()) {
        let count = raw
            .trim()
            .trim_matches('"')
            .parse::<u32>()
            .unwrap_or(DEFAULT_SAMPLE_COUNT);
        store.set(&keys.chat_count(), &count);
    }

    if let Some(Value::Array(mut prompts)) = store.get::<Value>(&keys.user_prompts()) {
        for prompt in prompts.iter_mut() {
            if let Value::Object(fields) = prompt {
                if !fields.get("tags").is_some_and(Value::is_array) {
                    fields.insert("tags".to_string(), Value::Array(Vec::new()));
                }
                if !fields.get("enabled").is_some_and(Value::is_boolean) {
                    fields.insert("enabled".to_string(), Value::Bool(false));
                }
            }
        }
        store.set(&keys.user_prompts(), &prompts);
    }

    store.set(&keys.schema_version(), &SCHEMA_VERSION);
    info!(
        "Migrated settings for {} from schema {found} to {SCHEMA_VERSION}",
        keys.namespace()
    );
    found
}
