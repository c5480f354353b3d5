//! JSON credentials file, keyed by provider credentials key.

use super::{Credentials, CredentialsError, CredentialsStore};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Reads `credentials.json` on every lookup so edits apply to the next run
/// without restarting.
#[derive(Debug, Clone)]
pub struct FileCredentialsStore {
    path: PathBuf,
}

impl FileCredentialsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys whose entries parse and are not template placeholders.
    pub fn configured_keys(&self) -> Result<Vec<String>, CredentialsError> {
        let file = self.read_file()?;
        Ok(file
            .into_iter()
            .filter_map(|(key, value)| {
                let creds = serde_json::from_value::<Credentials>(value).ok()?;
                (!creds.is_placeholder()).then_some(key)
            })
            .collect())
    }

    fn read_file(&self) -> Result<Map<String, Value>, CredentialsError> {
        let content = fs::read_to_string(&self.path).map_err(|source| CredentialsError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| CredentialsError::InvalidFile {
            path: self.path.clone(),
            source,
        })
    }
}

impl CredentialsStore for FileCredentialsStore {
    fn load(&self, key: &str) -> Result<Credentials, CredentialsError> {
        let mut file = self.read_file()?;
        let entry = file
            .remove(key)
            .ok_or_else(|| CredentialsError::NotFound(key.to_string()))?;

        let credentials: Credentials =
            serde_json::from_value(entry).map_err(|e| CredentialsError::Malformed {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        if credentials.is_placeholder() {
            return Err(CredentialsError::Placeholder(key.to_string()));
        }
        Ok(credentials)
    }
}
