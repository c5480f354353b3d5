//! One-time code router.
//!
//! Each poll cycle the router:
//! 1. drains newly registered requests from the coordination mailbox and
//!    starts watching providers that have a message pattern,
//! 2. handles queued operator lines (quit sentinel or manual code entry),
//! 3. matches the passive text against watched providers, but only when the
//!    text changed since the previous cycle.
//!
//! The router changes shared state only through [`CoordinationState`].

mod command;
mod sources;

pub use command::{
    Command, DEFAULT_CODE_LENGTH, DEFAULT_QUIT_COMMAND, RouteTable, parse_command,
};
pub use sources::{lend_lines, spawn_clipboard_poller, spawn_line_reader, spawn_stdin_reader};

use crate::coordination::{CoordinationState, MIN_TIMER_PERIOD};
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default router poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Something the operator should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteNotice {
    /// Watching the passive source for this provider's message.
    Watching { provider: String },
    /// Code found in the passive text and delivered.
    Detected { provider: String },
    /// Manually entered code delivered.
    Entered { provider: String },
    /// Manual code for a provider that is not waiting.
    NotWaiting { provider: String },
    UnknownSelector { selector: u8 },
    Unrecognized { line: String },
    Quit,
}

pub struct OtpRouter {
    coordination: Arc<CoordinationState>,
    table: RouteTable,
    operator: Option<mpsc::UnboundedReceiver<String>>,
    passive: Option<watch::Receiver<String>>,
    notices: Option<mpsc::UnboundedSender<RouteNotice>>,
    poll_interval: Duration,
    code_length: usize,
    quit_command: String,
    last_text: Option<String>,
    watched: BTreeSet<String>,
}

impl OtpRouter {
    pub fn new(coordination: Arc<CoordinationState>, table: RouteTable) -> Self {
        Self {
            coordination,
            table,
            operator: None,
            passive: None,
            notices: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            code_length: DEFAULT_CODE_LENGTH,
            quit_command: DEFAULT_QUIT_COMMAND.to_string(),
            last_text: None,
            watched: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_operator(mut self, lines: mpsc::UnboundedReceiver<String>) -> Self {
        self.operator = Some(lines);
        self
    }

    #[must_use]
    pub fn with_passive(mut self, text: watch::Receiver<String>) -> Self {
        self.passive = Some(text);
        self
    }

    #[must_use]
    pub fn with_notices(mut self, notices: mpsc::UnboundedSender<RouteNotice>) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Zero is raised to one millisecond.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_TIMER_PERIOD);
        self
    }

    #[must_use]
    pub fn with_code_length(mut self, length: usize) -> Self {
        self.code_length = length;
        self
    }

    #[must_use]
    pub fn with_quit_command(mut self, quit_command: impl Into<String>) -> Self {
        self.quit_command = quit_command.into();
        self
    }

    /// Providers currently watched on the passive source.
    pub fn watched(&self) -> impl Iterator<Item = &str> {
        self.watched.iter().map(String::as_str)
    }

    /// Poll until the quit sentinel, global exit, or `stop`.
    pub async fn run(mut self, stop: CancellationToken) {
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval_ms = self.poll_interval.as_millis(), "Router started");

        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                () = self.coordination.exited() => break,
                _ = tick.tick() => {}
            }
            if self.poll_once().is_break() {
                break;
            }
        }

        debug!("Router stopped");
    }

    /// Run one poll cycle. Breaks after the quit sentinel.
    pub fn poll_once(&mut self) -> ControlFlow<()> {
        self.drain_requests();
        self.drain_operator()?;
        self.check_passive();
        ControlFlow::Continue(())
    }

    fn drain_requests(&mut self) {
        for provider in self.coordination.take_new_requests() {
            if self.table.has_pattern(&provider) && self.watched.insert(provider.clone()) {
                info!(provider = %provider, "Watching for one-time code");
                self.notify(RouteNotice::Watching { provider });
            }
        }
        let coordination = &self.coordination;
        self.watched.retain(|p| coordination.is_active(p));
    }

    fn drain_operator(&mut self) -> ControlFlow<()> {
        loop {
            let Some(operator) = self.operator.as_mut() else {
                return ControlFlow::Continue(());
            };
            match operator.try_recv() {
                Ok(line) => self.handle_line(&line)?,
                Err(TryRecvError::Empty) => return ControlFlow::Continue(()),
                Err(TryRecvError::Disconnected) => {
                    debug!("Operator input ended");
                    self.operator = None;
                    return ControlFlow::Continue(());
                }
            }
        }
    }

    /// Handle one operator line. Breaks after the quit sentinel.
    pub fn handle_line(&mut self, line: &str) -> ControlFlow<()> {
        let Some(command) = parse_command(line, &self.quit_command, self.code_length) else {
            return ControlFlow::Continue(());
        };

        match command {
            Command::Quit => {
                info!("Quit requested by operator");
                self.coordination.signal_exit();
                self.notify(RouteNotice::Quit);
                return ControlFlow::Break(());
            }
            Command::Code { selector, code } => {
                let notice = self.route_manual(selector, code);
                self.notify(notice);
            }
            Command::Unrecognized(line) => {
                debug!(%line, "Ignoring unrecognized operator input");
                self.notify(RouteNotice::Unrecognized { line });
            }
        }
        ControlFlow::Continue(())
    }

    fn route_manual(&mut self, selector: u8, code: String) -> RouteNotice {
        let Some(provider) = self.table.provider_for(selector).map(str::to_string) else {
            warn!(selector, "No provider uses this selector");
            return RouteNotice::UnknownSelector { selector };
        };

        if !self.coordination.is_active(&provider) {
            warn!(provider = %provider, "Manual code rejected; provider is not waiting");
            return RouteNotice::NotWaiting { provider };
        }

        if self.coordination.deliver_code(&provider, code).is_delivered() {
            info!(provider = %provider, "Manual code delivered");
            self.watched.remove(&provider);
            RouteNotice::Entered { provider }
        } else {
            RouteNotice::NotWaiting { provider }
        }
    }

    fn check_passive(&mut self) {
        let Some(passive) = self.passive.as_mut() else {
            return;
        };
        let text = passive.borrow_and_update().clone();
        if self.last_text.as_deref() == Some(text.as_str()) {
            return;
        }
        self.observe(&text);
        self.last_text = Some(text);
    }

    /// Match changed passive text against every watched, still-active provider.
    fn observe(&mut self, text: &str) {
        let candidates: Vec<String> = self.watched.iter().cloned().collect();
        for provider in candidates {
            if !self.coordination.is_active(&provider) {
                continue;
            }
            let Some(code) = self.table.extract(&provider, text) else {
                continue;
            };
            if self.coordination.deliver_code(&provider, code).is_delivered() {
                info!(provider = %provider, "Code detected in passive text");
                self.watched.remove(&provider);
                self.notify(RouteNotice::Detected { provider });
            }
        }
    }

    fn notify(&self, notice: RouteNotice) {
        if let Some(notices) = &self.notices {
            // The presenter may already be gone during shutdown.
            let _ = notices.send(notice);
        }
    }
}
