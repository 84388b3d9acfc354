//! # courrier-store
//!
//! Local SQLite cache for the Courrier sync core.
//!
//! The remote ordered store owns the data; this crate keeps a local mirror
//! of recently synced messages and conversation previews so the UI can show
//! stale-but-present data while a subscription reconnects, plus the single
//! row describing this device's push registration.  The crate exposes a
//! synchronous `Database` handle that wraps a `rusqlite::Connection` and
//! provides typed CRUD helpers.

pub mod conversations;
pub mod database;
pub mod device;
pub mod messages;
pub mod migrations;

mod error;

pub use database::Database;
pub use device::DeviceRecord;
pub use error::StoreError;
