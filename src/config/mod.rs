use crate::error::{Error, Result};
use crate::input::Field;
use crate::provider::{DriverAdapter, ProviderAdapter, ProviderRegistry, ProviderSpec};
use crate::router::{DEFAULT_CODE_LENGTH, DEFAULT_QUIT_COMMAND, RouteTable};
use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Driver command used when a provider does not configure its own.
pub const DEFAULT_DRIVER: &str = "portico-driver";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON credentials file, relative to the working directory unless absolute.
    pub credentials_file: PathBuf,

    /// Interval of the post-task exit poll in each session.
    pub exit_poll_interval_ms: u64,
    pub router_poll_interval_ms: u64,
    /// How often a code wait reminds the operator it is still waiting.
    pub reminder_interval_secs: u64,
    pub clipboard_poll_interval_ms: u64,
    /// How long sessions get to clean up after exit before they are aborted.
    pub shutdown_grace_secs: u64,

    pub code_length: usize,
    pub quit_command: String,
    /// Watch the clipboard for pasted messages containing codes.
    pub clipboard: bool,

    /// Fallback driver command for providers without one.
    pub driver: String,

    /// Provider table. Entries override the built-in providers field by field.
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials_file: PathBuf::from("credentials.json"),
            exit_poll_interval_ms: 100,
            router_poll_interval_ms: 100,
            reminder_interval_secs: 30,
            clipboard_poll_interval_ms: 250,
            shutdown_grace_secs: 10,
            code_length: DEFAULT_CODE_LENGTH,
            quit_command: DEFAULT_QUIT_COMMAND.to_string(),
            clipboard: true,
            driver: DEFAULT_DRIVER.to_string(),
            providers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub group: Option<String>,
    pub credentials_key: Option<String>,
    pub required_fields: Option<Vec<Field>>,
    pub menu_digit: Option<u8>,
    /// Regex with one capture group around the code.
    pub otp_pattern: Option<String>,
    /// Shell command that automates this provider.
    pub driver: Option<String>,
}

impl ProviderConfig {
    /// Overlay the fields `other` sets onto `self`.
    fn merge(mut self, other: Self) -> Self {
        self.group = other.group.or(self.group);
        self.credentials_key = other.credentials_key.or(self.credentials_key);
        self.required_fields = other.required_fields.or(self.required_fields);
        self.menu_digit = other.menu_digit.or(self.menu_digit);
        self.otp_pattern = other.otp_pattern.or(self.otp_pattern);
        self.driver = other.driver.or(self.driver);
        self
    }
}

/// Providers whose codes arrive by SMS and are routed to the session.
fn builtin_providers() -> BTreeMap<String, ProviderConfig> {
    BTreeMap::from([
        (
            "PRODA".to_string(),
            ProviderConfig {
                group: Some("General".into()),
                required_fields: Some(vec![
                    Field::FamilyName,
                    Field::Dob,
                    Field::MedicareNumber,
                    Field::Sex,
                ]),
                menu_digit: Some(1),
                otp_pattern: Some(
                    r"Your verification code is (\d{6}) for Provider Digital Access".into(),
                ),
                ..ProviderConfig::default()
            },
        ),
        (
            "QScript".to_string(),
            ProviderConfig {
                group: Some("General".into()),
                required_fields: Some(vec![Field::FamilyName, Field::GivenName, Field::Dob]),
                menu_digit: Some(2),
                otp_pattern: Some(r"Use verification code (\d{6}) for QScript authentication".into()),
                ..ProviderConfig::default()
            },
        ),
    ])
}

impl Config {
    fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("portico").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".portico/config.toml"))
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load `path`, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config in {}", path.display()))?;
            config
                .validate()
                .with_context(|| format!("Invalid config in {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Reject settings no run can work with.
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("exit_poll_interval_ms", self.exit_poll_interval_ms),
            ("router_poll_interval_ms", self.router_poll_interval_ms),
            ("reminder_interval_secs", self.reminder_interval_secs),
            ("clipboard_poll_interval_ms", self.clipboard_poll_interval_ms),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{name} must be greater than zero")));
        }
        if self.code_length == 0 {
            return Err(Error::Config("code_length must be greater than zero".into()));
        }
        if self.quit_command.trim().is_empty() {
            return Err(Error::Config("quit_command must not be empty".into()));
        }
        Ok(())
    }

    /// Built-in providers with configured entries layered on top.
    #[must_use]
    pub fn provider_table(&self) -> BTreeMap<String, ProviderConfig> {
        let mut table = builtin_providers();
        for (name, entry) in &self.providers {
            let merged = table
                .remove(name)
                .unwrap_or_default()
                .merge(entry.clone());
            table.insert(name.clone(), merged);
        }
        table
    }

    /// Build provider specs from the provider table.
    pub fn provider_specs(&self) -> Result<Vec<(ProviderSpec, String)>> {
        self.provider_table()
            .into_iter()
            .map(|(name, entry)| {
                let mut spec = ProviderSpec::new(&name);
                if let Some(group) = entry.group {
                    spec = spec.with_group(group);
                }
                if let Some(key) = entry.credentials_key {
                    spec = spec.with_credentials_key(key);
                }
                if let Some(fields) = entry.required_fields {
                    spec = spec.with_required_fields(fields);
                }
                if let Some(digit) = entry.menu_digit {
                    spec = spec.with_menu_digit(digit);
                }
                if let Some(pattern) = entry.otp_pattern {
                    let regex = Regex::new(&pattern).map_err(|e| {
                        Error::Config(format!("Invalid code pattern for '{name}': {e}"))
                    })?;
                    spec = spec.with_otp_pattern(regex);
                }
                let driver = entry.driver.unwrap_or_else(|| self.driver.clone());
                Ok((spec, driver))
            })
            .collect()
    }

    /// Registry with a driver-process adapter for every configured provider.
    pub fn build_registry(&self) -> Result<ProviderRegistry> {
        self.validate()?;
        let mut registry = ProviderRegistry::new();
        for (spec, driver) in self.provider_specs()? {
            registry.register(spec, move |_spec| -> Box<dyn ProviderAdapter> {
                Box::new(DriverAdapter::new(driver.clone()))
            })?;
        }
        Ok(registry)
    }

    #[must_use]
    pub fn route_table(registry: &ProviderRegistry) -> RouteTable {
        RouteTable::from_specs(registry.specs())
    }

    #[must_use]
    pub fn exit_poll_interval(&self) -> Duration {
        Duration::from_millis(self.exit_poll_interval_ms)
    }

    #[must_use]
    pub fn router_poll_interval(&self) -> Duration {
        Duration::from_millis(self.router_poll_interval_ms)
    }

    #[must_use]
    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(self.reminder_interval_secs)
    }

    #[must_use]
    pub fn clipboard_poll_interval(&self) -> Duration {
        Duration::from_millis(self.clipboard_poll_interval_ms)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
