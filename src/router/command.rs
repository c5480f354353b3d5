//! Operator command parsing and the provider routing table.

use crate::provider::ProviderSpec;
use regex::Regex;
use std::collections::BTreeMap;

/// Default number of digits in a one-time code.
pub const DEFAULT_CODE_LENGTH: usize = 6;

/// Default quit sentinel (matched case-insensitively).
pub const DEFAULT_QUIT_COMMAND: &str = "x";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    /// `<selector digit><code>`, e.g. `2123456`.
    Code { selector: u8, code: String },
    /// Anything else the operator typed.
    Unrecognized(String),
}

/// Parse one operator line. Blank lines yield `None`.
#[must_use]
pub fn parse_command(line: &str, quit_command: &str, code_length: usize) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.eq_ignore_ascii_case(quit_command) {
        return Some(Command::Quit);
    }

    let mut chars = line.chars();
    let selector = chars.next().and_then(|c| c.to_digit(10));
    let code = chars.as_str();
    match selector {
        Some(selector)
            if selector > 0
                && code.len() == code_length
                && code.bytes().all(|b| b.is_ascii_digit()) =>
        {
            Some(Command::Code {
                selector: selector as u8,
                code: code.to_string(),
            })
        }
        _ => Some(Command::Unrecognized(line.to_string())),
    }
}

/// Which provider a manual selector digit or a passive message belongs to.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    selectors: BTreeMap<u8, String>,
    patterns: BTreeMap<String, Regex>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs<'a>(specs: impl IntoIterator<Item = &'a ProviderSpec>) -> Self {
        let mut table = Self::new();
        for spec in specs {
            if let Some(digit) = spec.menu_digit {
                table.selectors.insert(digit, spec.name.clone());
            }
            if let Some(pattern) = &spec.otp_pattern {
                table.patterns.insert(spec.name.clone(), pattern.clone());
            }
        }
        table
    }

    #[must_use]
    pub fn with_selector(mut self, digit: u8, provider: impl Into<String>) -> Self {
        self.selectors.insert(digit, provider.into());
        self
    }

    #[must_use]
    pub fn with_pattern(mut self, provider: impl Into<String>, pattern: Regex) -> Self {
        self.patterns.insert(provider.into(), pattern);
        self
    }

    #[must_use]
    pub fn provider_for(&self, selector: u8) -> Option<&str> {
        self.selectors.get(&selector).map(String::as_str)
    }

    #[must_use]
    pub fn has_pattern(&self, provider: &str) -> bool {
        self.patterns.contains_key(provider)
    }

    /// Extract `provider`'s code from `text` using the first capture group.
    #[must_use]
    pub fn extract(&self, provider: &str, text: &str) -> Option<String> {
        self.patterns
            .get(provider)?
            .captures(text)?
            .get(1)
            .map(|m| m.as_str().to_string())
    }

    /// Operator hint such as `1=PRODA, 2=QScript`.
    #[must_use]
    pub fn selector_hint(&self) -> String {
        self.selectors
            .iter()
            .map(|(digit, provider)| format!("{digit}={provider}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
