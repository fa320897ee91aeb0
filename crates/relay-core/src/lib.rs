//! # relay-core
//!
//! Subscriber registry and broadcast fan-out for the Relay server.
//!
//! This crate provides the shared state of the relay:
//!
//! - **Subscriber** - Write-only sink for one open event stream
//! - **Registry** - Concurrent set of live subscribers with snapshot broadcast
//! - **Subscription** - Scoped registration that removes itself on drop
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  register   ┌─────────────┐  snapshot   ┌─────────────┐
//! │ Subscription│────────────▶│  Registry   │────────────▶│  Broadcast  │
//! └─────────────┘◀── drop ────└─────────────┘             └─────────────┘
//!        ▲                                                       │
//!        └────────────────── frames (mpsc) ──────────────────────┘
//! ```

pub mod registry;
pub mod subscriber;

pub use registry::{BroadcastReport, Registry, RegistryConfig, Subscription};
pub use subscriber::{DeliveryError, Subscriber, SubscriberHandle, SubscriberId};
