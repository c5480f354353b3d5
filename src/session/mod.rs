//! Session lifecycle: one provider adapter driven from creation to close.
//!
//! ```text
//! Created -> Initialized -> Authenticated -> TaskRunning -> AwaitingExit -> Closed
//!     \____________\_______________\______________> Errored ----------> Closed
//! ```
//!
//! Initialization and authentication failures (including a one-time-code
//! wait cancelled by shutdown) are fatal to the session. Task failures are
//! logged and tolerated: the session still parks in `AwaitingExit` so the
//! operator can take over in the already-open portal. Cleanup runs exactly
//! once on every path.

mod context;
#[cfg(test)]
pub(crate) mod testing;

pub use context::SessionContext;

use crate::coordination::MIN_TIMER_PERIOD;
use crate::provider::{ProviderAdapter, ProviderError};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Default interval for the `AwaitingExit` poll.
pub const DEFAULT_EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initialized,
    Authenticated,
    TaskRunning,
    AwaitingExit,
    Errored,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Authenticated => "authenticated",
            Self::TaskRunning => "task running",
            Self::AwaitingExit => "awaiting exit",
            Self::Errored => "errored",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Adapter operation a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialize,
    Authenticate,
    PerformTask,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialize => "initialize",
            Self::Authenticate => "authenticate",
            Self::PerformTask => "perform task",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// All phases succeeded (or the task was interrupted by shutdown).
    Completed,
    /// The task phase failed; the session still waited for exit.
    TaskFailed(String),
    /// Initialization or authentication failed.
    Errored { phase: Phase, message: String },
    /// Still running when the shutdown grace period ran out.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub provider: String,
    pub outcome: SessionOutcome,
}

pub struct Session {
    ctx: SessionContext,
    adapter: Box<dyn ProviderAdapter>,
    state: watch::Sender<SessionState>,
    exit_poll_interval: Duration,
}

impl Session {
    pub fn new(ctx: SessionContext, adapter: Box<dyn ProviderAdapter>) -> Self {
        let (state, _) = watch::channel(SessionState::Created);
        Self {
            ctx,
            adapter,
            state,
            exit_poll_interval: DEFAULT_EXIT_POLL_INTERVAL,
        }
    }

    /// Zero is raised to one millisecond.
    #[must_use]
    pub fn with_exit_poll_interval(mut self, interval: Duration) -> Self {
        self.exit_poll_interval = interval.max(MIN_TIMER_PERIOD);
        self
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        self.ctx.provider()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follow state transitions from another task.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Drive the adapter through every phase and release it.
    pub async fn run(mut self) -> SessionReport {
        let provider = self.ctx.provider().to_string();
        info!(provider = %provider, "Starting session");

        let outcome = match self.drive().await {
            Ok(outcome) => {
                self.transition(SessionState::AwaitingExit);
                info!(provider = %provider, "Paused for interaction until exit");
                self.await_exit().await;
                outcome
            }
            Err((phase, err)) => {
                self.transition(SessionState::Errored);
                if err.is_cancelled() {
                    info!(provider = %provider, %phase, "Session cancelled by shutdown");
                } else {
                    error!(provider = %provider, %phase, error = %err, "Session failed");
                }
                SessionOutcome::Errored {
                    phase,
                    message: err.to_string(),
                }
            }
        };

        self.cleanup().await;
        self.transition(SessionState::Closed);
        info!(provider = %provider, "Session closed");

        SessionReport { provider, outcome }
    }

    async fn drive(&mut self) -> Result<SessionOutcome, (Phase, ProviderError)> {
        self.step(Phase::Initialize)
            .await
            .map_err(|e| (Phase::Initialize, e))?;
        self.transition(SessionState::Initialized);

        if let Err(e) = self.step(Phase::Authenticate).await {
            self.ctx.withdraw_code_request();
            return Err((Phase::Authenticate, e));
        }
        self.transition(SessionState::Authenticated);

        self.transition(SessionState::TaskRunning);
        match self.step(Phase::PerformTask).await {
            Ok(()) => Ok(SessionOutcome::Completed),
            Err(ProviderError::Cancelled) => Ok(SessionOutcome::Completed),
            Err(e) => {
                warn!(
                    provider = %self.ctx.provider(),
                    error = %e,
                    "Task failed; leaving session open for manual interaction"
                );
                Ok(SessionOutcome::TaskFailed(e.to_string()))
            }
        }
    }

    /// Run one adapter operation, abandoning it if shutdown begins and
    /// converting a panic into an error.
    async fn step(&mut self, phase: Phase) -> Result<(), ProviderError> {
        let ctx = &self.ctx;
        let adapter = &mut self.adapter;

        let op = async move {
            match phase {
                Phase::Initialize => adapter.initialize(ctx).await,
                Phase::Authenticate => adapter.authenticate(ctx).await,
                Phase::PerformTask => adapter.perform_task(ctx).await,
            }
        };

        tokio::select! {
            biased;
            () = ctx.coordination().exited() => Err(ProviderError::Cancelled),
            result = AssertUnwindSafe(op).catch_unwind() => {
                result.unwrap_or_else(|panic| Err(ProviderError::Panicked(panic_message(&*panic))))
            }
        }
    }

    async fn await_exit(&mut self) {
        let mut poll = tokio::time::interval(self.exit_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !self.ctx.coordination().is_exiting() {
            poll.tick().await;
        }
    }

    async fn cleanup(&mut self) {
        debug!(provider = %self.ctx.provider(), "Releasing session resources");
        if let Err(panic) = AssertUnwindSafe(self.adapter.cleanup()).catch_unwind().await {
            error!(
                provider = %self.ctx.provider(),
                panic = %panic_message(&*panic),
                "Adapter cleanup panicked"
            );
        }
    }

    fn transition(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        debug!(provider = %self.ctx.provider(), from = %prev, to = %next, "Session state");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests;
