//! Runs one session per selected provider plus the code router, and shuts
//! the group down once every session has closed.

use crate::config::Config;
use crate::coordination::{CoordinationState, DEFAULT_REMINDER_INTERVAL};
use crate::credentials::CredentialsStore;
use crate::input::TaskInput;
use crate::provider::ProviderRegistry;
use crate::router::OtpRouter;
use crate::session::{
    DEFAULT_EXIT_POLL_INTERVAL, Session, SessionContext, SessionOutcome, SessionReport,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default time sessions get to finish cleanup after exit is signalled.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub exit_poll_interval: Duration,
    pub reminder_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            exit_poll_interval: DEFAULT_EXIT_POLL_INTERVAL,
            reminder_interval: DEFAULT_REMINDER_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            exit_poll_interval: config.exit_poll_interval(),
            reminder_interval: config.reminder_interval(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// A provider that never got a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProvider {
    pub provider: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub skipped: Vec<SkippedProvider>,
    /// One report per spawned session, in completion order.
    pub reports: Vec<SessionReport>,
}

impl RunSummary {
    #[must_use]
    pub fn failures(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome != SessionOutcome::Completed)
            .count()
    }
}

/// One orchestrated run. The coordination state lives exactly as long as
/// the orchestrator, so each run gets a fresh one.
pub struct Orchestrator {
    registry: ProviderRegistry,
    credentials: Box<dyn CredentialsStore>,
    settings: OrchestratorSettings,
    coordination: Arc<CoordinationState>,
}

impl Orchestrator {
    pub fn new(
        registry: ProviderRegistry,
        credentials: Box<dyn CredentialsStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            credentials,
            coordination: Arc::new(CoordinationState::new(settings.reminder_interval)),
            settings,
        }
    }

    /// Shared state for this run. Build the router and any event
    /// subscribers from it before calling [`Self::run`].
    #[must_use]
    pub fn coordination(&self) -> Arc<CoordinationState> {
        Arc::clone(&self.coordination)
    }

    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Run `providers` against `input` until every session has closed.
    ///
    /// `router` must share this orchestrator's coordination state. No task
    /// spawned here outlives the call.
    pub async fn run(self, providers: &[String], input: TaskInput, router: OtpRouter) -> RunSummary {
        let input = Arc::new(input);
        let mut summary = RunSummary::default();
        let mut sessions: JoinSet<SessionReport> = JoinSet::new();
        let mut names: HashMap<Id, String> = HashMap::new();

        for provider in providers {
            match self.prepare(provider, &input) {
                Ok(session) => {
                    let handle = sessions.spawn(session.run());
                    names.insert(handle.id(), provider.clone());
                }
                Err(reason) => {
                    warn!(provider = %provider, %reason, "Skipping provider");
                    summary.skipped.push(SkippedProvider {
                        provider: provider.clone(),
                        reason,
                    });
                }
            }
        }

        if sessions.is_empty() {
            info!("No sessions to run");
            return summary;
        }
        info!(sessions = sessions.len(), "Sessions started");

        let stop = CancellationToken::new();
        let router = tokio::spawn(router.run(stop.clone()));

        let timed_out = {
            let drain = drain(&mut sessions, &names, &mut summary.reports);
            let grace = self.settings.shutdown_grace;
            let deadline = async {
                self.coordination.exited().await;
                tokio::time::sleep(grace).await;
            };
            tokio::select! {
                () = drain => false,
                () = deadline => true,
            }
        };

        if timed_out {
            warn!(
                remaining = sessions.len(),
                "Sessions did not close within the shutdown grace period; aborting"
            );
            sessions.abort_all();
            drain(&mut sessions, &names, &mut summary.reports).await;
        }

        stop.cancel();
        if let Err(e) = router.await {
            error!(error = %e, "Router task failed");
        }

        info!(
            completed = summary.reports.len() - summary.failures(),
            failed = summary.failures(),
            skipped = summary.skipped.len(),
            "Run finished"
        );
        summary
    }

    fn prepare(&self, provider: &str, input: &Arc<TaskInput>) -> Result<Session, String> {
        let entry = self
            .registry
            .get(provider)
            .ok_or_else(|| "unknown provider".to_string())?;

        let credentials = self
            .credentials
            .load(&entry.spec.credentials_key)
            .map_err(|e| e.to_string())?;

        input
            .require(&entry.spec.required_fields)
            .map_err(|e| e.to_string())?;

        let ctx = SessionContext::new(
            provider,
            credentials,
            Arc::clone(input),
            Arc::clone(&self.coordination),
        );
        Ok(Session::new(ctx, entry.create_adapter())
            .with_exit_poll_interval(self.settings.exit_poll_interval))
    }
}

async fn drain(
    sessions: &mut JoinSet<SessionReport>,
    names: &HashMap<Id, String>,
    reports: &mut Vec<SessionReport>,
) {
    while let Some(joined) = sessions.join_next_with_id().await {
        match joined {
            Ok((_, report)) => reports.push(report),
            Err(e) => {
                let provider = names.get(&e.id()).cloned().unwrap_or_default();
                if e.is_panic() {
                    error!(provider = %provider, "Session task panicked");
                } else {
                    warn!(provider = %provider, "Session aborted");
                }
                reports.push(SessionReport {
                    provider,
                    outcome: SessionOutcome::Aborted,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests;
