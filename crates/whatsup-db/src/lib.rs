//! # Whatsup DB
//! SQLite-backed repository for users, watches and match patterns.
//!
//! Every mutation is a single statement (or a single transaction for
//! cascades), so a watch's `status` and `last_update` never land half-written.

pub mod migrations;
pub mod store;

pub use store::WatchDb;
