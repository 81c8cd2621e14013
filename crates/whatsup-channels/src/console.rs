//! Console transport — talk to the bot from a terminal.
//!
//! Every stdin line is a chat message from one local contact. A few slash
//! lines simulate network events:
//!
//! ```text
//! /presence dnd           presence change for the local contact
//! /from bob@host watch …  message from another contact
//! /subscribe              local contact accepted our subscription
//! ```

use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use whatsup_core::error::Result;
use whatsup_core::traits::Transport;
use whatsup_core::types::TransportEvent;

/// Console transport configuration.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Address the terminal user chats as.
    pub local_address: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            local_address: "you@console".into(),
        }
    }
}

pub struct ConsoleTransport {
    config: ConsoleConfig,
    rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    connected: bool,
}

impl ConsoleTransport {
    pub fn new(config: ConsoleConfig) -> Self {
        Self {
            config,
            rx: None,
            connected: false,
        }
    }
}

/// Turn one input line into an event from `local`.
pub fn parse_line(local: &str, line: &str) -> Option<TransportEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    if let Some(status) = line.strip_prefix("/presence ") {
        return Some(TransportEvent::Presence {
            from: local.to_string(),
            status: status.trim().to_string(),
        });
    }
    if line.trim() == "/subscribe" {
        return Some(TransportEvent::Subscribed {
            from: local.to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("/from ") {
        let (from, body) = rest.split_once(' ')?;
        if body.trim().is_empty() {
            return None;
        }
        return Some(TransportEvent::Message {
            from: from.to_string(),
            body: body.to_string(),
        });
    }
    Some(TransportEvent::Message {
        from: local.to_string(),
        body: line.to_string(),
    })
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn connect(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let local = self.config.local_address.clone();

        // The contact is online as soon as the terminal is.
        tx.send(TransportEvent::Presence {
            from: local.clone(),
            status: "available".into(),
        })
        .ok();

        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_line(&local, &line)
                            && tx.send(event).is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("⌨️ stdin closed, console input stopped");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("⚠️ stdin read error: {e}");
                        return;
                    }
                }
            }
        });

        self.rx = Some(rx);
        self.connected = true;
        tracing::info!("⌨️ Console transport ready as {}", self.config.local_address);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.rx = None;
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn poll_events(&mut self) -> Result<Vec<TransportEvent>> {
        let mut events = Vec::new();
        if let Some(rx) = self.rx.as_mut() {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        Ok(events)
    }

    async fn deliver(&self, to: &str, text: &str) -> Result<()> {
        println!("→ {to}: {text}");
        Ok(())
    }

    async fn send_presence(&self, status: &str, priority: i8) -> Result<()> {
        println!("* presence: {status} (priority {priority})");
        Ok(())
    }
}
