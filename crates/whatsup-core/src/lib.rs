//! # Whatsup Core
//! Shared building blocks for the Whatsup URL-watch bot: domain types,
//! the transport and search traits, configuration, and the error type.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::WhatsupConfig;
pub use error::{Result, WhatsupError};
