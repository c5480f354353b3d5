//! Per-provider login credentials.

mod storage;

pub use storage::FileCredentialsStore;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};

/// Digits in a generated one-time code.
pub const TOTP_DIGITS: usize = 6;
/// Seconds each generated code stays valid.
pub const TOTP_STEP_SECS: u64 = 30;

/// Username left in an unedited credentials template.
pub const PLACEHOLDER_USERNAME: &str = "your_username";

/// Login material for one provider.
///
/// Owned by exactly one session; adapters only ever see a shared borrow.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "user_name")]
    pub username: String,
    #[serde(rename = "user_password")]
    pub password: String,
    /// Base32 TOTP seed for providers that generate their own codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totp_secret: Option<String>,
    #[serde(
        default,
        rename = "PIN",
        alias = "pin",
        skip_serializing_if = "Option::is_none"
    )]
    pub pin: Option<String>,
    /// Provider-specific extras (e.g. a display name to pick on a chooser page).
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            totp_secret: None,
            pin: None,
            extra: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    #[must_use]
    pub fn with_totp_secret(mut self, secret: impl Into<String>) -> Self {
        self.totp_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }

    /// Current one-time code derived from the TOTP seed.
    pub fn totp_code(&self) -> Result<String, CredentialsError> {
        let totp = self.totp()?;
        totp.generate_current()
            .map_err(|e| CredentialsError::InvalidTotpSecret(e.to_string()))
    }

    /// Code for the step containing `unix_secs`.
    pub fn totp_code_at(&self, unix_secs: u64) -> Result<String, CredentialsError> {
        Ok(self.totp()?.generate(unix_secs))
    }

    fn totp(&self) -> Result<TOTP, CredentialsError> {
        let seed = self
            .totp_secret
            .as_deref()
            .ok_or(CredentialsError::MissingTotpSecret)?;
        // Seeds are often pasted grouped, lowercased or padded.
        let normalized: String = seed
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '=')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let bytes = Secret::Encoded(normalized)
            .to_bytes()
            .map_err(|e| CredentialsError::InvalidTotpSecret(format!("{e:?}")))?;
        if bytes.is_empty() {
            return Err(CredentialsError::InvalidTotpSecret("empty seed".into()));
        }
        Ok(TOTP::new_unchecked(
            Algorithm::SHA1,
            TOTP_DIGITS,
            1,
            TOTP_STEP_SECS,
            bytes,
        ))
    }

    /// True when the username is still the template placeholder.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.username.trim().is_empty() || self.username == PLACEHOLDER_USERNAME
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "<redacted>"))
            .field("pin", &self.pin.as_ref().map(|_| "<redacted>"))
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("No credentials configured for '{0}'")]
    NotFound(String),

    #[error("Credentials for '{0}' still use the template placeholder")]
    Placeholder(String),

    #[error("Malformed credentials for '{key}': {message}")]
    Malformed { key: String, message: String },

    #[error("No TOTP seed configured")]
    MissingTotpSecret,

    #[error("Invalid TOTP seed: {0}")]
    InvalidTotpSecret(String),

    #[error("Failed to parse credentials file {}: {source}", path.display())]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read credentials file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Keyed lookup from a provider's credentials key to its credentials.
pub trait CredentialsStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Credentials, CredentialsError>;
}

/// In-memory store, for embedding callers and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialsStore {
    entries: HashMap<String, Credentials>,
}

impl MemoryCredentialsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, credentials: Credentials) -> Self {
        self.insert(key, credentials);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, credentials: Credentials) {
        self.entries.insert(key.into(), credentials);
    }
}

impl CredentialsStore for MemoryCredentialsStore {
    fn load(&self, key: &str) -> Result<Credentials, CredentialsError> {
        let credentials = self
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| CredentialsError::NotFound(key.to_string()))?;
        if credentials.is_placeholder() {
            return Err(CredentialsError::Placeholder(key.to_string()));
        }
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::new("alice", "hunter2")
            .with_pin("1234")
            .with_totp_secret("JBSWY3DPEHPK3PXP");
        let debug = format!("{creds:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("1234"));
        assert!(!debug.contains("JBSWY3DPEHPK3PXP"));
    }

    #[test]
    fn test_deserialize_with_extras() {
        let json = r#"{
            "user_name": "dr_who",
            "user_password": "tardis",
            "PIN": "4321",
            "PRODA_full_name": "Dr Who",
            "postcode": "4000"
        }"#;
        let creds: Credentials = serde_json::from_str(json).unwrap();
        assert_eq!(creds.username, "dr_who");
        assert_eq!(creds.pin.as_deref(), Some("4321"));
        assert_eq!(creds.extra("PRODA_full_name"), Some("Dr Who"));
        assert_eq!(creds.extra("postcode"), Some("4000"));
        assert!(creds.totp_secret.is_none());
    }

    #[test]
    fn test_totp_code_matches_reference_vectors() {
        // Base32 of the ASCII seed "12345678901234567890".
        let creds = Credentials::new("user", "pass")
            .with_totp_secret("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ");
        assert_eq!(creds.totp_code_at(59).unwrap(), "287082");
        assert_eq!(creds.totp_code_at(1_111_111_109).unwrap(), "081804");
        assert_eq!(creds.totp_code_at(1_234_567_890).unwrap(), "005924");

        let current = creds.totp_code().unwrap();
        assert_eq!(current.len(), TOTP_DIGITS);
        assert!(current.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_totp_seed_is_normalized() {
        let grouped = Credentials::new("user", "pass")
            .with_totp_secret("gezd gnbv gy3t qojq gezd gnbv gy3t qojq");
        assert_eq!(grouped.totp_code_at(59).unwrap(), "287082");

        let padded = Credentials::new("user", "pass").with_totp_secret("JBSWY3DPEHPK3PXP====");
        let plain = Credentials::new("user", "pass").with_totp_secret("JBSWY3DPEHPK3PXP");
        assert_eq!(
            padded.totp_code_at(1_700_000_000).unwrap(),
            plain.totp_code_at(1_700_000_000).unwrap()
        );
    }

    #[test]
    fn test_totp_code_errors() {
        assert!(matches!(
            Credentials::new("user", "pass").totp_code(),
            Err(CredentialsError::MissingTotpSecret)
        ));
        assert!(matches!(
            Credentials::new("user", "pass")
                .with_totp_secret("not base32!")
                .totp_code(),
            Err(CredentialsError::InvalidTotpSecret(_))
        ));
    }

    #[test]
    fn test_memory_store_lookup() {
        let store = MemoryCredentialsStore::new()
            .with("QScript", Credentials::new("user", "pass"))
            .with("Medway", Credentials::new(PLACEHOLDER_USERNAME, "pass"));

        assert_eq!(store.load("QScript").unwrap().username, "user");
        assert!(matches!(
            store.load("Medway"),
            Err(CredentialsError::Placeholder(_))
        ));
        assert!(matches!(
            store.load("SNP"),
            Err(CredentialsError::NotFound(_))
        ));
    }
}
