//! # Whatsup Agent
//! The conversational side of the bot.
//!
//! - `registry`: command names, help text and handler tags
//! - `commands`: the dispatcher and its handlers
//! - `event_loop`: per-tick orchestration and the reconnecting supervisor

pub mod commands;
pub mod event_loop;
pub mod registry;

pub use commands::Dispatcher;
pub use event_loop::{Bot, FaultAction, TickReport, classify};
pub use registry::{CommandKind, CommandRegistry};
