//! Subscriber sinks.
//!
//! A subscriber is the write half of a bounded frame queue. The read half is
//! owned by the task streaming frames to the client.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

/// A subscriber identifier, unique for the lifetime of the process.
pub type SubscriberId = u64;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique subscriber ID.
#[must_use]
pub fn next_subscriber_id() -> SubscriberId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Errors when writing a frame to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The receiving stream has gone away.
    #[error("Subscriber closed")]
    Closed,

    /// The subscriber's queue is full.
    #[error("Subscriber queue full")]
    Full,
}

impl DeliveryError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Full => "full",
        }
    }
}

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberHandle(SubscriberId);

impl SubscriberHandle {
    /// The subscriber ID behind this handle.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.0
    }
}

impl fmt::Display for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Write-only sink for one connected subscriber.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    sender: mpsc::Sender<Bytes>,
}

impl Subscriber {
    /// Create a subscriber and the receiver for its frames.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let subscriber = Self {
            id: next_subscriber_id(),
            sender,
        };
        (subscriber, receiver)
    }

    /// Get the subscriber ID.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Get the handle for this subscriber.
    #[must_use]
    pub fn handle(&self) -> SubscriberHandle {
        SubscriberHandle(self.id)
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the receiver is gone or its queue is full.
    pub fn send(&self, frame: Bytes) -> Result<(), DeliveryError> {
        self.sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
