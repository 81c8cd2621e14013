//! In-memory transport — scripted inbound events, recorded outbound traffic.
//!
//! Clones share state, so a test keeps one handle while the bot owns another.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use whatsup_core::error::{Result, WhatsupError};
use whatsup_core::traits::Transport;
use whatsup_core::types::TransportEvent;

#[derive(Debug, Default)]
struct MemoryState {
    connected: bool,
    connects: usize,
    drop_pending: bool,
    refused: Vec<String>,
    drop_on_deliver_to: Option<String>,
    inbound: VecDeque<TransportEvent>,
    delivered: Vec<(String, String)>,
    presences: Vec<(String, i8)>,
    composing: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, event: TransportEvent) {
        self.state().inbound.push_back(event);
    }

    pub fn push_message(&self, from: &str, body: &str) {
        self.push(TransportEvent::Message {
            from: from.into(),
            body: body.into(),
        });
    }

    pub fn push_presence(&self, from: &str, status: &str) {
        self.push(TransportEvent::Presence {
            from: from.into(),
            status: status.into(),
        });
    }

    /// Make the next poll fail as if the session died.
    pub fn drop_connection(&self) {
        self.state().drop_pending = true;
    }

    /// Fail every delivery to `address` without touching the session.
    pub fn refuse_deliveries_to(&self, address: &str) {
        self.state().refused.push(address.to_string());
    }

    /// Drop the session on the next delivery to `address`.
    pub fn drop_on_delivery_to(&self, address: &str) {
        self.state().drop_on_deliver_to = Some(address.to_string());
    }

    /// Every (address, text) delivered so far.
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.state().delivered.clone()
    }

    /// Drain the delivery log.
    pub fn take_delivered(&self) -> Vec<(String, String)> {
        std::mem::take(&mut self.state().delivered)
    }

    /// Texts delivered to one address.
    pub fn delivered_to(&self, address: &str) -> Vec<String> {
        self.state()
            .delivered
            .iter()
            .filter(|(to, _)| to == address)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn presences(&self) -> Vec<(String, i8)> {
        self.state().presences.clone()
    }

    pub fn composing(&self) -> Vec<String> {
        self.state().composing.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state().connected {
            Ok(())
        } else {
            Err(WhatsupError::ConnectionLost("memory transport is not connected".into()))
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state();
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn poll_events(&mut self) -> Result<Vec<TransportEvent>> {
        let mut state = self.state();
        if state.drop_pending {
            state.drop_pending = false;
            state.connected = false;
            return Err(WhatsupError::ConnectionLost("stream closed by peer".into()));
        }
        if !state.connected {
            return Err(WhatsupError::ConnectionLost("memory transport is not connected".into()));
        }
        Ok(state.inbound.drain(..).collect())
    }

    async fn deliver(&self, to: &str, text: &str) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.state();
        if state.drop_on_deliver_to.as_deref() == Some(to) {
            state.drop_on_deliver_to = None;
            state.connected = false;
            return Err(WhatsupError::ConnectionLost("stream closed by peer".into()));
        }
        if state.refused.iter().any(|a| a == to) {
            return Err(WhatsupError::Transport(format!("{to} refused the message")));
        }
        state.delivered.push((to.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_composing(&self, to: &str) -> Result<()> {
        self.ensure_connected()?;
        self.state().composing.push(to.to_string());
        Ok(())
    }

    async fn send_presence(&self, status: &str, priority: i8) -> Result<()> {
        self.ensure_connected()?;
        self.state().presences.push((status.to_string(), priority));
        Ok(())
    }
}
