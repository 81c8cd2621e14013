//! # Whatsup Channels
//! Chat transport implementations.
//!
//! - `console`: stdin/stdout, one local contact, for running the bot by hand.
//! - `memory`: scripted in-process transport that records everything sent.

pub mod console;
pub mod memory;

use whatsup_core::config::TransportConfig;
use whatsup_core::error::{Result, WhatsupError};
use whatsup_core::traits::Transport;

/// Build the transport named in the configuration.
pub fn create_transport(config: &TransportConfig) -> Result<Box<dyn Transport>> {
    match config.kind.as_str() {
        "console" => Ok(Box::new(console::ConsoleTransport::new(console::ConsoleConfig::default()))),
        "memory" => Ok(Box::new(memory::MemoryTransport::new())),
        other => Err(WhatsupError::Config(format!("Unknown transport kind: {other}"))),
    }
}
