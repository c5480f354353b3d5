//! Static provider registration table: provider name to adapter constructor.

use super::{DEFAULT_GROUP, ProviderAdapter, ProviderSpec};
use crate::input::Field;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

/// Builds a fresh adapter for one session of a provider.
pub type AdapterFactory = Arc<dyn Fn(&ProviderSpec) -> Box<dyn ProviderAdapter> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Provider '{0}' is already registered")]
    Duplicate(String),

    #[error("Menu digit {digit} for '{provider}' must be between 1 and 9")]
    InvalidDigit { provider: String, digit: u8 },

    #[error("Menu digit {digit} is used by both '{existing}' and '{provider}'")]
    DigitInUse {
        digit: u8,
        existing: String,
        provider: String,
    },

    #[error("Code pattern for '{0}' must contain a capture group")]
    PatternWithoutCapture(String),
}

pub struct ProviderEntry {
    pub spec: ProviderSpec,
    factory: AdapterFactory,
}

impl ProviderEntry {
    #[must_use]
    pub fn create_adapter(&self) -> Box<dyn ProviderAdapter> {
        (self.factory)(&self.spec)
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, spec: ProviderSpec, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&ProviderSpec) -> Box<dyn ProviderAdapter> + Send + Sync + 'static,
    {
        if self.entries.contains_key(&spec.name) {
            return Err(RegistryError::Duplicate(spec.name));
        }

        if let Some(digit) = spec.menu_digit {
            if !(1..=9).contains(&digit) {
                return Err(RegistryError::InvalidDigit {
                    provider: spec.name,
                    digit,
                });
            }
            if let Some(existing) = self
                .entries
                .values()
                .find(|e| e.spec.menu_digit == Some(digit))
            {
                return Err(RegistryError::DigitInUse {
                    digit,
                    existing: existing.spec.name.clone(),
                    provider: spec.name,
                });
            }
        }

        if spec
            .otp_pattern
            .as_ref()
            .is_some_and(|p| p.captures_len() < 2)
        {
            return Err(RegistryError::PatternWithoutCapture(spec.name));
        }

        self.entries.insert(
            spec.name.clone(),
            ProviderEntry {
                spec,
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProviderEntry> {
        self.entries.get(name)
    }

    pub fn specs(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.entries.values().map(|e| &e.spec)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union of the patient fields the selected providers need.
    #[must_use]
    pub fn required_fields(&self, selection: &[String]) -> BTreeSet<Field> {
        selection
            .iter()
            .filter_map(|name| self.entries.get(name))
            .flat_map(|e| e.spec.required_fields.iter().copied())
            .collect()
    }

    /// Providers numbered from 1 for menu display.
    ///
    /// Groups are sorted by name with the default group last; providers are
    /// sorted by name within a group.
    #[must_use]
    pub fn numbered(&self) -> Vec<(usize, &ProviderSpec)> {
        let mut grouped: BTreeMap<&str, Vec<&ProviderSpec>> = BTreeMap::new();
        for spec in self.specs() {
            grouped.entry(spec.group.as_str()).or_default().push(spec);
        }

        let mut groups: Vec<&str> = grouped
            .keys()
            .copied()
            .filter(|g| *g != DEFAULT_GROUP)
            .collect();
        if grouped.contains_key(DEFAULT_GROUP) {
            groups.push(DEFAULT_GROUP);
        }

        groups
            .into_iter()
            .flat_map(|g| grouped.get(g).cloned().unwrap_or_default())
            .enumerate()
            .map(|(i, spec)| (i + 1, spec))
            .collect()
    }

    /// Resolve a comma-separated selection of menu numbers or
    /// case-insensitive name prefixes. Unknown items are ignored.
    #[must_use]
    pub fn resolve_selection(&self, selection: &str) -> Vec<String> {
        let numbered = self.numbered();
        let mut resolved: Vec<String> = Vec::new();

        for item in selection.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let matches: Vec<String> = if let Ok(n) = item.parse::<usize>() {
                numbered
                    .iter()
                    .filter(|(i, _)| *i == n)
                    .map(|(_, spec)| spec.name.clone())
                    .collect()
            } else {
                let prefix = item.to_lowercase();
                self.entries
                    .keys()
                    .filter(|name| name.to_lowercase().starts_with(&prefix))
                    .cloned()
                    .collect()
            };

            for name in matches {
                if !resolved.contains(&name) {
                    resolved.push(name);
                }
            }
        }

        resolved
    }
}
