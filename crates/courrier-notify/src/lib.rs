//! # courrier-notify
//!
//! Notification delivery: the device's push registration and the router
//! that turns message events into exactly one perceivable notification per
//! device — a local in-app presentation when the viewer is already looking
//! at the conversation, a push dispatch otherwise, and never the same
//! event twice.
//!
//! The platform push service and the local notification surface are
//! reached through the [`PushGateway`] and [`LocalNotifier`] traits, so a
//! second transport backend is a new trait impl, not a parallel service.

pub mod gateway;
pub mod registry;
pub mod router;

mod error;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::NotifyError;
pub use gateway::{LocalNotifier, NotificationPayload, PushGateway, PushToken, TokenDirectory};
pub use registry::{DeviceRegistry, RegistryConfig, RegistrySnapshot};
pub use router::{NotificationRouter, RouterConfig, RouterOutcome};
