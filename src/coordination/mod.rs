//! Shared state synchronizing one-time-code requests, deliveries, and shutdown.
//!
//! One [`CoordinationState`] exists per orchestrator run and is shared by
//! `Arc` between every session task and the router. All mutations of the
//! pending-code slots, the active-request set, and the new-request mailbox
//! happen inside a single short critical section, so no task ever observes a
//! slot holding a code for a provider that is not in the active set.

mod events;

pub use events::{CoordinationEvent, Delivery};

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, broadcast};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

/// Default interval between "still waiting" reminders.
pub const DEFAULT_REMINDER_INTERVAL: Duration = Duration::from_secs(30);

/// Floor for every timer period; `tokio::time::interval` rejects zero.
pub(crate) const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodeWaitError {
    #[error("Shutdown requested while waiting for a one-time code")]
    Cancelled,
}

#[derive(Default)]
struct ProviderSlot {
    code: Option<String>,
    signal: Arc<Notify>,
}

#[derive(Default)]
struct Inner {
    exiting: bool,
    slots: HashMap<String, ProviderSlot>,
    active: BTreeSet<String>,
    mailbox: Vec<String>,
}

pub struct CoordinationState {
    inner: Mutex<Inner>,
    exit: CancellationToken,
    events: broadcast::Sender<CoordinationEvent>,
    reminder_interval: Duration,
}

impl Default for CoordinationState {
    fn default() -> Self {
        Self::new(DEFAULT_REMINDER_INTERVAL)
    }
}

impl CoordinationState {
    /// A zero `reminder_interval` is raised to one millisecond.
    #[must_use]
    pub fn new(reminder_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            exit: CancellationToken::new(),
            events,
            reminder_interval: reminder_interval.max(MIN_TIMER_PERIOD),
        }
    }

    /// Subscribe to coordination events. Only events sent after this call are seen.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.events.subscribe()
    }

    /// Register `provider` as waiting for a code.
    ///
    /// Returns `false` if it was already registered; the mailbox then keeps
    /// its single entry.
    pub fn request_code(&self, provider: &str) -> bool {
        let newly_active = {
            let mut inner = self.lock();
            if inner.active.insert(provider.to_string()) {
                inner.slots.entry(provider.to_string()).or_default();
                inner.mailbox.push(provider.to_string());
                true
            } else {
                false
            }
        };

        if newly_active {
            debug!(provider, "One-time code requested");
            self.emit(CoordinationEvent::CodeRequested {
                provider: provider.to_string(),
            });
        }
        newly_active
    }

    /// Wait until a code is delivered for `provider` or shutdown begins.
    ///
    /// Never times out; a [`CoordinationEvent::StillWaiting`] reminder is
    /// emitted every reminder interval instead. Consuming the code removes
    /// the provider from the active set in the same critical section.
    pub async fn await_code(&self, provider: &str) -> Result<String, CodeWaitError> {
        let signal = self.signal_for(provider);
        let started = Instant::now();
        let mut reminder =
            tokio::time::interval_at(started + self.reminder_interval, self.reminder_interval);
        reminder.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if let Some(code) = self.try_take(provider)? {
                debug!(provider, "One-time code consumed");
                return Ok(code);
            }

            tokio::select! {
                biased;
                () = self.exit.cancelled() => return Err(CodeWaitError::Cancelled),
                () = signal.notified() => {}
                _ = reminder.tick() => {
                    let waited = started.elapsed();
                    info!(provider, waited_secs = waited.as_secs(), "Still waiting for one-time code");
                    self.emit(CoordinationEvent::StillWaiting {
                        provider: provider.to_string(),
                        waited,
                    });
                }
            }
        }
    }

    /// Hand `code` to the session waiting on `provider`.
    ///
    /// Codes for providers with no active request are dropped, so a stale
    /// code can never satisfy a later request.
    pub fn deliver_code(&self, provider: &str, code: impl Into<String>) -> Delivery {
        let (signal, delivery) = {
            let mut inner = self.lock();
            if inner.exiting {
                return Delivery::Exiting;
            }
            if !inner.active.contains(provider) {
                debug!(provider, "Dropping code for provider with no active request");
                return Delivery::NotRequested;
            }
            let slot = inner.slots.entry(provider.to_string()).or_default();
            let delivery = if slot.code.replace(code.into()).is_some() {
                Delivery::Replaced
            } else {
                Delivery::Delivered
            };
            (slot.signal.clone(), delivery)
        };

        signal.notify_one();
        self.emit(CoordinationEvent::CodeDelivered {
            provider: provider.to_string(),
        });
        delivery
    }

    /// Drop a registration whose session stopped waiting without a code.
    pub fn withdraw_request(&self, provider: &str) -> bool {
        let removed = {
            let mut inner = self.lock();
            let removed = inner.active.remove(provider);
            if let Some(slot) = inner.slots.get_mut(provider) {
                slot.code = None;
            }
            inner.mailbox.retain(|p| p != provider);
            removed
        };

        if removed {
            debug!(provider, "One-time code request withdrawn");
            self.emit(CoordinationEvent::RequestWithdrawn {
                provider: provider.to_string(),
            });
        }
        removed
    }

    /// Begin global shutdown. Returns `true` only for the call that set the flag.
    pub fn signal_exit(&self) -> bool {
        {
            let mut inner = self.lock();
            if inner.exiting {
                return false;
            }
            inner.exiting = true;
        }
        self.exit.cancel();
        info!("Exit signalled");
        self.emit(CoordinationEvent::ExitSignalled);
        true
    }

    #[must_use]
    pub fn is_exiting(&self) -> bool {
        self.exit.is_cancelled()
    }

    /// Resolves once [`Self::signal_exit`] has been called.
    pub fn exited(&self) -> WaitForCancellationFuture<'_> {
        self.exit.cancelled()
    }

    #[must_use]
    pub fn is_active(&self, provider: &str) -> bool {
        self.lock().active.contains(provider)
    }

    /// Providers currently waiting, in name order.
    #[must_use]
    pub fn active_requests(&self) -> Vec<String> {
        self.lock().active.iter().cloned().collect()
    }

    #[must_use]
    pub fn has_pending_code(&self, provider: &str) -> bool {
        self.lock()
            .slots
            .get(provider)
            .is_some_and(|s| s.code.is_some())
    }

    /// Drain providers registered since the last call, in registration order.
    pub fn take_new_requests(&self) -> Vec<String> {
        std::mem::take(&mut self.lock().mailbox)
    }

    fn try_take(&self, provider: &str) -> Result<Option<String>, CodeWaitError> {
        let mut inner = self.lock();
        if inner.exiting {
            return Err(CodeWaitError::Cancelled);
        }
        let code = inner.slots.get_mut(provider).and_then(|s| s.code.take());
        if code.is_some() {
            inner.active.remove(provider);
        }
        Ok(code)
    }

    fn signal_for(&self, provider: &str) -> Arc<Notify> {
        self.lock()
            .slots
            .entry(provider.to_string())
            .or_default()
            .signal
            .clone()
    }

    fn emit(&self, event: CoordinationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("Coordination state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
