//! TOML configuration and process-wide credentials.
//!
//! The configuration file carries everything that is safe to commit (bind
//! address, model names, timeouts, store backend). Credentials are read from
//! the environment exactly once, by [`Credentials::from_env`], when the
//! process starts, and then travel inside [`Config`] to every component that
//! needs them.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:3000"
//!
//! [store]
//! provider = "supabase"   # or "sqlite"
//!
//! [openai]
//! embedding_model = "text-embedding-ada-002"
//! timeout_secs = 30
//!
//! [generation]
//! model = "gpt-3.5-turbo-1106"
//! context_char_budget = 40000
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;

pub const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";
pub const STORE_URL_VAR: &str = "SUPABASE_URL";
pub const STORE_KEY_VAR: &str = "SUPABASE_SERVICE_ROLE_KEY";

/// Older names still honoured when the primary variable is unset.
pub const OPENAI_KEY_FALLBACK_VAR: &str = "OPENAI_KEY";
pub const STORE_URL_FALLBACK_VAR: &str = "NEXT_PUBLIC_SUPABASE_URL";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    /// Filled from the environment, never from the file.
    #[serde(skip)]
    pub credentials: Credentials,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_provider")]
    pub provider: String,
    /// SQLite database path, used when `provider = "sqlite"`.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Table name for the PostgREST backend.
    #[serde(default = "default_table")]
    pub table: String,
    /// Name of the similarity-search RPC.
    #[serde(default = "default_match_function")]
    pub match_function: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            path: default_db_path(),
            table: default_table(),
            match_function: default_match_function(),
        }
    }
}

fn default_store_provider() -> String {
    "supabase".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/songs.sqlite")
}
fn default_table() -> String {
    "song".to_string()
}
fn default_match_function() -> String {
    "match_songs".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Applies to moderation, embedding and vector-store calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            embedding_model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Ceiling on the assembled candidate list, in characters.
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,
    /// Time allowed until the completion response headers arrive.
    #[serde(default = "default_first_byte_timeout_secs")]
    pub first_byte_timeout_secs: u64,
    /// Longest silence tolerated between two streamed fragments.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            context_char_budget: default_context_char_budget(),
            first_byte_timeout_secs: default_first_byte_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-3.5-turbo-1106".to_string()
}
fn default_max_tokens() -> u32 {
    512
}
fn default_temperature() -> f32 {
    0.5
}
fn default_context_char_budget() -> usize {
    40_000
}
fn default_first_byte_timeout_secs() -> u64 {
    30
}
fn default_idle_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default = "default_loader_base_url")]
    pub base_url: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: default_loader_base_url(),
        }
    }
}

fn default_loader_base_url() -> String {
    "https://cantari-crestine.com/json-data".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackfillConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

/// Secrets resolved from the environment at start-up.
#[derive(Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub store_url: Option<String>,
    pub store_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .field("store_url", &self.store_url)
            .field("store_key", &self.store_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves every credential through `lookup`, primary name first.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |names: &[&str]| {
            names.iter().find_map(|name| {
                lookup(name)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
        };
        Self {
            openai_api_key: var(&[OPENAI_KEY_VAR, OPENAI_KEY_FALLBACK_VAR]),
            store_url: var(&[STORE_URL_VAR, STORE_URL_FALLBACK_VAR]),
            store_key: var(&[STORE_KEY_VAR]),
        }
    }
}

/// Credentials after [`Config::require_credentials`] has succeeded.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedCredentials<'a> {
    pub openai_api_key: &'a str,
    pub store_url: Option<&'a str>,
    pub store_key: Option<&'a str>,
}

impl Config {
    pub fn uses_remote_store(&self) -> bool {
        self.store.provider == "supabase"
    }

    /// Checks that every credential needed for a query is present.
    ///
    /// Missing values are application errors: they are logged server-side
    /// and the caller only ever sees the generic failure message.
    pub fn require_credentials(&self) -> Result<ResolvedCredentials<'_>, PipelineError> {
        let openai_api_key = self
            .credentials
            .openai_api_key
            .as_deref()
            .ok_or_else(|| missing_var(OPENAI_KEY_VAR))?;

        if !self.uses_remote_store() {
            return Ok(ResolvedCredentials {
                openai_api_key,
                store_url: None,
                store_key: None,
            });
        }

        let store_url = self
            .credentials
            .store_url
            .as_deref()
            .ok_or_else(|| missing_var(STORE_URL_VAR))?;
        let store_key = self
            .credentials
            .store_key
            .as_deref()
            .ok_or_else(|| missing_var(STORE_KEY_VAR))?;

        Ok(ResolvedCredentials {
            openai_api_key,
            store_url: Some(store_url),
            store_key: Some(store_key),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.openai.timeout_secs)
    }
}

fn missing_var(name: &str) -> PipelineError {
    PipelineError::application(format!("Missing environment variable {}", name))
}

/// Reads and validates the configuration file, then attaches credentials
/// from the environment.
///
/// A missing file is not an error: every section has defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    validate(&config)?;
    config.credentials = Credentials::from_env();
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.store.provider.as_str() {
        "supabase" | "sqlite" => {}
        other => bail!(
            "Unknown store provider: '{}'. Must be supabase or sqlite.",
            other
        ),
    }

    if config.openai.timeout_secs == 0 {
        bail!("openai.timeout_secs must be > 0");
    }
    if config.generation.first_byte_timeout_secs == 0 || config.generation.idle_timeout_secs == 0
    {
        bail!("generation timeouts must be > 0");
    }
    if config.generation.context_char_budget == 0 {
        bail!("generation.context_char_budget must be > 0");
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if config.backfill.batch_size == 0 {
        bail!("backfill.batch_size must be > 0");
    }

    Ok(())
}
