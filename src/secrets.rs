//! Credential loading.
//!
//! Keys are looked up in the secrets file first, then in the process
//! environment (after `.env` has been loaded). There is no caching beyond the
//! lifetime of a [`Secrets`] value and no rotation.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use crate::config::SecretsConfig;

pub const GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
pub const PINECONE_API_KEY: &str = "PINECONE_API_KEY";
pub const GOOGLE_SERVICE_ACCOUNT_FILE: &str = "GOOGLE_SERVICE_ACCOUNT_FILE";

/// Service-account key file used when no path is configured.
pub const DEFAULT_SERVICE_ACCOUNT_FILE: &str = "service_account.json";

#[derive(Debug, Clone, Default)]
pub struct Secrets {
    file: HashMap<String, String>,
}

impl Secrets {
    /// Load `.env` (if enabled) and the secrets file (if readable).
    pub fn load(config: &SecretsConfig) -> Self {
        if config.dotenv {
            // A missing .env is the common case.
            let _ = dotenvy::dotenv();
        }
        Self::from_file(&config.path)
    }

    /// Read a flat `KEY = "value"` TOML table. A missing, unreadable, or
    /// malformed file yields an empty store, so lookups fall back to the
    /// environment.
    pub fn from_file(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match read_table(path) {
            Ok(file) => Self { file },
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{:#}", e), "ignoring secrets file");
                Self::default()
            }
        }
    }

    pub fn from_map(file: HashMap<String, String>) -> Self {
        Self { file }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.file
            .get(key)
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .or_else(|| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    pub fn require(&self, key: &str) -> Result<String> {
        self.get(key).with_context(|| {
            format!(
                "Required secret '{}' is not set (checked secrets file and environment)",
                key
            )
        })
    }
}

fn read_table(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read secrets file: {}", path.display()))?;
    let table: toml::Table = toml::from_str(&content)
        .with_context(|| format!("Failed to parse secrets file: {}", path.display()))?;

    Ok(table
        .into_iter()
        .filter_map(|(k, v)| match v {
            toml::Value::String(s) => Some((k, s)),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let secrets = Secrets::from_file(Path::new("/nonexistent/secrets.toml"));
        assert!(secrets.get("HERB_TEST_SURELY_UNSET_KEY").is_none());
    }

    #[test]
    fn test_file_takes_precedence_over_env() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("secrets.toml");
        std::fs::write(&path, "PATH = \"from-file\"\nport = 3\n").unwrap();
        assert!(std::env::var("PATH").is_ok_and(|p| p != "from-file"));

        let secrets = Secrets::from_file(&path);
        assert_eq!(secrets.get("PATH").as_deref(), Some("from-file"));
        // Non-string values are ignored.
        assert!(secrets.file.get("port").is_none());
    }

    #[test]
    fn test_falls_back_to_environment() {
        let secrets = Secrets::default();
        let path = std::env::var("PATH").ok();
        assert_eq!(secrets.get("PATH"), path.filter(|p| !p.trim().is_empty()));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut map = HashMap::new();
        map.insert("HERB_TEST_BLANK".to_string(), "  ".to_string());
        let secrets = Secrets::from_map(map);
        let err = secrets.require("HERB_TEST_BLANK").unwrap_err();
        assert!(err.to_string().contains("HERB_TEST_BLANK"));
    }

    #[test]
    fn test_malformed_file_falls_back_to_environment() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("secrets.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let secrets = Secrets::from_file(&path);
        assert!(secrets.file.is_empty());
        assert_eq!(
            secrets.get("PATH"),
            std::env::var("PATH").ok().filter(|p| !p.trim().is_empty())
        );
    }

    #[test]
    fn test_unreadable_file_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        // A directory cannot be read as a file.
        let secrets = Secrets::from_file(tmp.path());
        assert!(secrets.file.is_empty());
    }
}
