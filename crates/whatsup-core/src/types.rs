//! Domain types shared across Whatsup crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status persisted when a successful fetch failed one of the watch's content rules.
/// Any later 200 differs from it, so the next good check is reported as a change.
pub const STATUS_PATTERN_FAILED: i32 = -1;

/// Status reported by a probe that never got an HTTP response.
pub const STATUS_FETCH_FAILED: i32 = -1;

/// Presence states during which a user's watches are not probed.
pub const AWAY_STATUSES: &[&str] = &["dnd", "offline", "unavailable"];

/// A chat contact known to the bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Bare address on the messaging network.
    pub jid: String,
    /// Monitoring on/off (`on` / `off` commands).
    pub active: bool,
    /// Last presence status seen for this contact.
    pub status: Option<String>,
    pub quiet_until: Option<DateTime<Utc>>,
}

impl User {
    /// Whether alerts to this user are muted at `now`.
    pub fn is_quiet(&self, now: DateTime<Utc>) -> bool {
        self.quiet_until.is_some_and(|until| now < until)
    }

    /// Whether the user's presence allows probing their watches.
    pub fn is_reachable(&self) -> bool {
        match self.status.as_deref() {
            Some(status) => !AWAY_STATUSES.contains(&status),
            None => false,
        }
    }
}

/// A monitored URL owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watch {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub active: bool,
    /// Last observed result code; [`STATUS_PATTERN_FAILED`] after a content-rule failure.
    pub status: Option<i32>,
    pub last_update: Option<DateTime<Utc>>,
    pub quiet_until: Option<DateTime<Utc>>,
}

impl Watch {
    pub fn is_quiet(&self, now: DateTime<Utc>) -> bool {
        self.quiet_until.is_some_and(|until| now < until)
    }
}

/// A content rule attached to a watch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: i64,
    pub watch_id: i64,
    pub regex: String,
    /// true: body must match. false: body must not match.
    pub positive: bool,
}

impl Pattern {
    pub fn polarity(&self) -> &'static str {
        if self.positive { "positive" } else { "negative" }
    }

    pub fn sign(&self) -> char {
        if self.positive { '+' } else { '-' }
    }
}

/// Result of one URL fetch. Failures are carried as data, never as errors.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: i32,
    pub message: String,
    pub elapsed: Duration,
    pub body: String,
}

impl Response {
    /// Synthetic response for a fetch that could not complete.
    pub fn failed(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: STATUS_FETCH_FAILED,
            message: message.into(),
            elapsed,
            body: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Inbound notification from the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A contact's presence changed ("available", "away", "dnd", "unavailable", ...).
    Presence { from: String, status: String },
    /// A chat message with a non-empty body.
    Message { from: String, body: String },
    /// A contact accepted our subscription.
    Subscribed { from: String },
    /// A contact asked to subscribe to our presence.
    SubscriptionRequest { from: String },
    /// A contact removed us.
    Unsubscribed { from: String },
}

impl TransportEvent {
    pub fn from(&self) -> &str {
        match self {
            TransportEvent::Presence { from, .. }
            | TransportEvent::Message { from, .. }
            | TransportEvent::Subscribed { from }
            | TransportEvent::SubscriptionRequest { from }
            | TransportEvent::Unsubscribed { from } => from,
        }
    }
}

/// One web search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Aggregate counts published as the bot's presence line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresenceCounts {
    pub active_watches: u64,
    pub users: u64,
    pub watchers: u64,
}

/// Strip the resource part of an address: `user@host/phone` → `user@host`.
pub fn bare_address(address: &str) -> &str {
    address.split('/').next().unwrap_or(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(status: Option<&str>) -> User {
        User {
            id: 1,
            jid: "a@b".into(),
            active: true,
            status: status.map(String::from),
            quiet_until: None,
        }
    }

    #[test]
    fn test_reachable_statuses() {
        assert!(user(Some("available")).is_reachable());
        assert!(user(Some("away")).is_reachable());
        assert!(!user(Some("dnd")).is_reachable());
        assert!(!user(Some("offline")).is_reachable());
        assert!(!user(Some("unavailable")).is_reachable());
        assert!(!user(None).is_reachable());
    }

    #[test]
    fn test_quiet_window() {
        let now = Utc::now();
        let mut u = user(Some("available"));
        assert!(!u.is_quiet(now));
        u.quiet_until = Some(now + chrono::Duration::minutes(5));
        assert!(u.is_quiet(now));
        assert!(!u.is_quiet(now + chrono::Duration::minutes(6)));
    }

    #[test]
    fn test_failed_response() {
        let res = Response::failed("connection refused", Duration::from_millis(12));
        assert_eq!(res.status, -1);
        assert!(res.body.is_empty());
        assert!(!res.is_ok());
    }

    #[test]
    fn test_bare_address() {
        assert_eq!(bare_address("dustin@spy.net/laptop"), "dustin@spy.net");
        assert_eq!(bare_address("dustin@spy.net"), "dustin@spy.net");
    }
}
