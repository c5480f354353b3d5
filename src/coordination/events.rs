use std::time::Duration;

/// Notifications published by [`super::CoordinationState`] for presenters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationEvent {
    /// A session started waiting for a one-time code.
    CodeRequested { provider: String },
    /// Liveness reminder while a session is still blocked on its code.
    StillWaiting { provider: String, waited: Duration },
    /// A code was handed to the provider's waiting session.
    CodeDelivered { provider: String },
    /// A session stopped waiting without consuming a code.
    RequestWithdrawn { provider: String },
    ExitSignalled,
}

/// Result of [`super::CoordinationState::deliver_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// An undelivered code was already pending and has been superseded.
    Replaced,
    /// No session is waiting for this provider; the code was dropped.
    NotRequested,
    /// Shutdown is in progress; the code was dropped.
    Exiting,
}

impl Delivery {
    #[must_use]
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered | Self::Replaced)
    }
}
