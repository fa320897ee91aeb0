//! Shared fixtures for the Relay benchmarks.

use bytes::Bytes;
use relay_protocol::{codec, Message};
use std::sync::Arc;
use tenvis_relay_core::{Registry, RegistryConfig, Subscription};

/// A message whose `data` payload is roughly `payload_size` bytes.
#[must_use]
pub fn sample_message(payload_size: usize) -> Message {
    Message::new("info", "benchmark message")
        .with_data(serde_json::json!({ "blob": "x".repeat(payload_size) }))
        .stamped()
}

/// A pre-encoded event frame for [`sample_message`].
#[must_use]
pub fn sample_frame(payload_size: usize) -> Bytes {
    codec::encode(&sample_message(payload_size)).expect("sample message encodes")
}

/// A registry with `count` live subscriptions.
///
/// The buffer is large enough that benchmarks draining after every
/// broadcast never drop frames.
#[must_use]
pub fn populated_registry(count: usize) -> (Arc<Registry>, Vec<Subscription>) {
    let registry = Arc::new(Registry::with_config(RegistryConfig {
        subscriber_buffer: 1024,
    }));
    let subscriptions = (0..count).map(|_| registry.subscribe()).collect();
    (registry, subscriptions)
}

/// Read and discard every queued frame.
pub fn drain(subscriptions: &mut [Subscription]) -> usize {
    subscriptions
        .iter_mut()
        .map(|s| std::iter::from_fn(|| s.try_recv()).count())
        .sum()
}
