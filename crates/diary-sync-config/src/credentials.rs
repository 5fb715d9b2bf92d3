use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use toml;

/// Environment variable that overrides the stored TMDB API key
pub const TMDB_API_KEY_ENV: &str = "REELBOOK_TMDB_API_KEY";

#[derive(Debug, Serialize, Deserialize, Default)]
struct CredentialsData {
    #[serde(flatten)]
    data: HashMap<String, String>,
}

pub struct CredentialStore {
    path: PathBuf,
    credentials: HashMap<String, String>,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            credentials: HashMap::new(),
        }
    }

    pub fn load(&mut self) -> Result<()> {
        if self.path.exists() {
            let content = std::fs::read_to_string(&self.path)?;
            let creds_data: CredentialsData = toml::from_str(&content)?;
            self.credentials = creds_data.data;
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let creds_data = CredentialsData {
            data: self.credentials.clone(),
        };
        let content = toml::to_string_pretty(&creds_data)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.credentials.get(key)
    }

    pub fn set(&mut self, key: String, value: String) {
        self.credentials.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.credentials.remove(key);
    }

    /// TMDB v3 API key; the environment variable wins over the stored value
    pub fn get_tmdb_api_key(&self) -> Option<String> {
        std::env::var(TMDB_API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.get("tmdb_api_key").cloned())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn set_tmdb_api_key(&mut self, key: String) {
        self.set("tmdb_api_key".to_string(), key);
    }

    /// Session id from a previously completed provider handshake (passed through only)
    pub fn get_tmdb_session_id(&self) -> Option<&String> {
        self.get("tmdb_session_id")
    }

    pub fn set_tmdb_session_id(&mut self, session_id: String) {
        self.set("tmdb_session_id".to_string(), session_id);
    }

    pub fn get_all_keys(&self) -> Vec<String> {
        self.credentials.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_credential_store_load_and_save() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();

        let mut store = CredentialStore::new(path.clone());
        store.set_tmdb_api_key("abc123".to_string());
        store.set_tmdb_session_id("session".to_string());
        store.save().unwrap();

        let mut loaded_store = CredentialStore::new(path);
        loaded_store.load().unwrap();
        assert_eq!(loaded_store.get("tmdb_api_key"), Some(&"abc123".to_string()));
        assert_eq!(loaded_store.get_tmdb_session_id(), Some(&"session".to_string()));
    }

    #[test]
    fn test_blank_api_key_is_treated_as_missing() {
        let mut store = CredentialStore::new(PathBuf::from("/tmp/reelbook-test-credentials"));
        store.set_tmdb_api_key("   ".to_string());
        if std::env::var(TMDB_API_KEY_ENV).is_err() {
            assert_eq!(store.get_tmdb_api_key(), None);
        }
    }

    #[test]
    fn test_credential_store_remove() {
        let mut store = CredentialStore::new(PathBuf::from("/tmp/test"));
        store.set("key1".to_string(), "value1".to_string());
        store.set("key2".to_string(), "value2".to_string());

        assert_eq!(store.get("key1"), Some(&"value1".to_string()));
        store.remove("key1");
        assert_eq!(store.get("key1"), None);
        assert_eq!(store.get("key2"), Some(&"value2".to_string()));
    }
}
