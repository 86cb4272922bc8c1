//! TOML configuration for the `herb` binary and library.
//!
//! Every section has defaults, so an empty file (or [`Config::minimal`]) is a
//! valid configuration that talks to the hosted Gemini and Pinecone APIs and
//! keeps records in a local SQLite database.
//!
//! ```toml
//! [embedding]
//! provider = "gemini"
//! model = "text-embedding-004"
//!
//! [index]
//! provider = "pinecone"
//! name = "herb-knowledge"
//!
//! [generation]
//! model = "gemini-2.0-flash-exp"
//!
//! [records]
//! backend = "sheets"
//! spreadsheet_name = "AI_Pharmacy_DB"
//!
//! [chat]
//! top_k = 8
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub records: RecordsConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

impl Config {
    /// Configuration used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_gemini")]
    pub provider: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_gemini_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_gemini(),
            model: default_embed_model(),
            base_url: default_gemini_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_provider")]
    pub provider: String,
    #[serde(default = "default_index_name")]
    pub name: String,
    /// Data-plane host. Resolved through the control plane when unset.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_control_url")]
    pub control_url: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// JSON file with herbs and precomputed vectors (`provider = "memory"`).
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            name: default_index_name(),
            host: None,
            control_url: default_control_url(),
            namespace: None,
            path: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_gemini")]
    pub provider: String,
    #[serde(default = "default_gen_model")]
    pub model: String,
    #[serde(default = "default_gemini_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_gemini(),
            model: default_gen_model(),
            base_url: default_gemini_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecordsConfig {
    #[serde(default = "default_records_backend")]
    pub backend: String,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default)]
    pub spreadsheet_name: Option<String>,
    #[serde(default = "default_users_sheet")]
    pub users_sheet: String,
    #[serde(default = "default_diagnoses_sheet")]
    pub diagnoses_sheet: String,
    #[serde(default = "default_sheets_url")]
    pub sheets_url: String,
    #[serde(default = "default_drive_url")]
    pub drive_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            backend: default_records_backend(),
            db_path: default_db_path(),
            spreadsheet_id: None,
            spreadsheet_name: None,
            users_sheet: default_users_sheet(),
            diagnoses_sheet: default_diagnoses_sheet(),
            sheets_url: default_sheets_url(),
            drive_url: default_drive_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Characters of the reply kept in the diagnosis log.
    #[serde(default = "default_summary_chars")]
    pub summary_chars: usize,
    /// Prior diagnoses fed back into the prompt.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_diagnosis_label")]
    pub diagnosis_label: String,
    #[serde(default = "default_category")]
    pub default_category: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            summary_chars: default_summary_chars(),
            history_turns: default_history_turns(),
            diagnosis_label: default_diagnosis_label(),
            default_category: default_category(),
            greeting: default_greeting(),
            fallback_reply: default_fallback_reply(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Sessions idle for longer than this are dropped.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecretsConfig {
    #[serde(default = "default_secrets_path")]
    pub path: PathBuf,
    #[serde(default = "default_dotenv")]
    pub dotenv: bool,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            path: default_secrets_path(),
            dotenv: default_dotenv(),
        }
    }
}

fn default_gemini() -> String {
    "gemini".to_string()
}
fn default_embed_model() -> String {
    "text-embedding-004".to_string()
}
fn default_gen_model() -> String {
    "gemini-2.0-flash-exp".to_string()
}
fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_index_provider() -> String {
    "pinecone".to_string()
}
fn default_index_name() -> String {
    "herb-knowledge".to_string()
}
fn default_control_url() -> String {
    "https://api.pinecone.io".to_string()
}
fn default_records_backend() -> String {
    "sqlite".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/herb.sqlite")
}
fn default_users_sheet() -> String {
    "users".to_string()
}
fn default_diagnoses_sheet() -> String {
    "diagnoses".to_string()
}
fn default_sheets_url() -> String {
    "https://sheets.googleapis.com".to_string()
}
fn default_drive_url() -> String {
    "https://www.googleapis.com".to_string()
}
fn default_top_k() -> usize {
    8
}
fn default_summary_chars() -> usize {
    100
}
fn default_history_turns() -> usize {
    3
}
fn default_diagnosis_label() -> String {
    "AI diagnosis complete".to_string()
}
fn default_category() -> String {
    "general".to_string()
}
fn default_greeting() -> String {
    "Tell me how you are feeling. (e.g. My digestion is poor and I have a headache)".to_string()
}
fn default_fallback_reply() -> String {
    "Sorry, something went wrong while preparing your prescription. Please try again."
        .to_string()
}
fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}
fn default_session_ttl_secs() -> u64 {
    3600
}
fn default_secrets_path() -> PathBuf {
    PathBuf::from("./.secrets/secrets.toml")
}
fn default_dotenv() -> bool {
    true
}

/// Spreadsheet name used when neither an id nor a name is configured.
pub const DEFAULT_SPREADSHEET_NAME: &str = "AI_Pharmacy_DB";

/// Load and validate a config file.
///
/// A missing file is an error here; callers that want to run without one use
/// [`Config::minimal`].
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load the config file if it exists, otherwise fall back to defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chat.top_k == 0 {
        bail!("chat.top_k must be >= 1");
    }
    if config.chat.summary_chars == 0 {
        bail!("chat.summary_chars must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "gemini" | "disabled" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be gemini or disabled.",
            other
        ),
    }

    match config.index.provider.as_str() {
        "pinecone" => {}
        "memory" => {
            if config.index.path.is_none() {
                bail!("index.path must be set when index.provider is 'memory'");
            }
        }
        other => bail!(
            "Unknown index provider: '{}'. Must be pinecone or memory.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "gemini" | "disabled" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be gemini or disabled.",
            other
        ),
    }

    match config.records.backend.as_str() {
        "sqlite" | "memory" | "sheets" => {}
        other => bail!(
            "Unknown records backend: '{}'. Must be sqlite, sheets, or memory.",
            other
        ),
    }

    if config.server.session_ttl_secs == 0 {
        bail!("server.session_ttl_secs must be >= 1");
    }

    Ok(())
}
