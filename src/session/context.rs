use crate::coordination::{CodeWaitError, CoordinationState};
use crate::credentials::Credentials;
use crate::input::TaskInput;
use crate::provider::ProviderError;
use std::sync::Arc;
use tracing::debug;

/// Everything an adapter may read while a session runs.
///
/// Credentials are owned here and only lent out; patient details and the
/// coordination state are shared with the other sessions of the run.
pub struct SessionContext {
    provider: String,
    credentials: Credentials,
    input: Arc<TaskInput>,
    coordination: Arc<CoordinationState>,
}

impl SessionContext {
    pub fn new(
        provider: impl Into<String>,
        credentials: Credentials,
        input: Arc<TaskInput>,
        coordination: Arc<CoordinationState>,
    ) -> Self {
        Self {
            provider: provider.into(),
            credentials,
            input,
            coordination,
        }
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    #[must_use]
    pub fn input(&self) -> &TaskInput {
        &self.input
    }

    #[must_use]
    pub fn coordination(&self) -> &CoordinationState {
        &self.coordination
    }

    /// Register this provider as waiting and block until the router delivers
    /// its code or shutdown begins.
    ///
    /// Registration and waiting are one call so the provider is in the active
    /// set exactly while it is blocked here.
    pub async fn obtain_code(&self) -> Result<String, CodeWaitError> {
        self.coordination.request_code(&self.provider);
        self.coordination.await_code(&self.provider).await
    }

    /// Code for the current login: generated from the TOTP seed when the
    /// credentials carry one, otherwise routed.
    pub async fn one_time_code(&self) -> Result<String, ProviderError> {
        if self.credentials.totp_secret.is_some() {
            debug!(provider = %self.provider, "Generating one-time code from TOTP seed");
            return Ok(self.credentials.totp_code()?);
        }
        Ok(self.obtain_code().await?)
    }

    pub(crate) fn withdraw_code_request(&self) {
        self.coordination.withdraw_request(&self.provider);
    }

    #[must_use]
    pub fn is_exiting(&self) -> bool {
        self.coordination.is_exiting()
    }
}
