//! Chat transport trait — the duplex channel to the messaging network.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::TransportEvent;

/// A connection to the messaging network.
///
/// Implementations buffer inbound notifications internally; the event loop
/// drains them once per tick with [`Transport::poll_events`], which must not
/// block waiting for new traffic. A dead session is reported as
/// [`crate::WhatsupError::ConnectionLost`] so the supervisor can reconnect.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name (e.g., "console", "memory").
    fn name(&self) -> &str;

    /// Open (or reopen) the session.
    async fn connect(&mut self) -> Result<()>;

    /// Close the session.
    async fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Take every event received since the last call.
    async fn poll_events(&mut self) -> Result<Vec<TransportEvent>>;

    /// Send a plain chat message.
    async fn deliver(&self, to: &str, text: &str) -> Result<()>;

    /// Send a "composing" hint before a reply.
    async fn send_composing(&self, _to: &str) -> Result<()> {
        Ok(())
    }

    /// Publish the bot's own presence line.
    async fn send_presence(&self, status: &str, priority: i8) -> Result<()>;
}
