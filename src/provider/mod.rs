//! Provider adapters and the static provider registration table.
//!
//! A provider is one external portal a session logs into. The crate never
//! automates a portal itself: each provider supplies a [`ProviderAdapter`]
//! that performs the site-specific steps, while the session state machine
//! decides when each step runs and what a failure means.
//!
//! # Example
//!
//! ```ignore
//! use portico::provider::{ProviderRegistry, ProviderSpec};
//!
//! let mut registry = ProviderRegistry::new();
//! registry.register(
//!     ProviderSpec::new("QScript").with_menu_digit(2),
//!     |_spec| Box::new(MyQScriptAdapter::default()),
//! )?;
//! ```

pub mod driver;
mod error;
mod registry;

pub use driver::DriverAdapter;
pub use error::ProviderError;
pub use registry::{AdapterFactory, ProviderEntry, ProviderRegistry, RegistryError};

use crate::input::Field;
use crate::session::SessionContext;
use async_trait::async_trait;
use regex::Regex;

/// Group used when a provider does not declare one. Always listed last.
pub const DEFAULT_GROUP: &str = "Other";

/// Site-specific automation for one provider.
///
/// Every operation may suspend (page loads, code waits) and may fail. The
/// session guarantees `cleanup` runs exactly once, whichever operation
/// failed or was cancelled.
#[async_trait]
pub trait ProviderAdapter: Send {
    /// Acquire the automation resource and open the provider's entry point.
    async fn initialize(&mut self, ctx: &SessionContext) -> Result<(), ProviderError>;

    /// Log in. Providers that need a one-time code call
    /// [`SessionContext::one_time_code`], or [`SessionContext::obtain_code`]
    /// when the code must always be routed.
    async fn authenticate(&mut self, ctx: &SessionContext) -> Result<(), ProviderError>;

    /// Run the provider's task, e.g. a patient search.
    async fn perform_task(&mut self, ctx: &SessionContext) -> Result<(), ProviderError>;

    /// Release every resource the adapter owns.
    async fn cleanup(&mut self);
}

/// Static metadata describing a provider.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub name: String,
    /// Listing group, e.g. "Pathology" or "Radiology".
    pub group: String,
    /// Key looked up in the credentials store.
    pub credentials_key: String,
    /// Patient fields the provider's task needs.
    pub required_fields: Vec<Field>,
    /// Digit selecting this provider in manual code entry.
    pub menu_digit: Option<u8>,
    /// Pattern with one capture group extracting the code from an SMS-style message.
    pub otp_pattern: Option<Regex>,
}

impl ProviderSpec {
    /// A spec whose credentials key equals its name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            credentials_key: name.clone(),
            name,
            group: DEFAULT_GROUP.to_string(),
            required_fields: Vec::new(),
            menu_digit: None,
            otp_pattern: None,
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    #[must_use]
    pub fn with_credentials_key(mut self, key: impl Into<String>) -> Self {
        self.credentials_key = key.into();
        self
    }

    #[must_use]
    pub fn with_required_fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.required_fields = fields.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_menu_digit(mut self, digit: u8) -> Self {
        self.menu_digit = Some(digit);
        self
    }

    #[must_use]
    pub fn with_otp_pattern(mut self, pattern: Regex) -> Self {
        self.otp_pattern = Some(pattern);
        self
    }
}
