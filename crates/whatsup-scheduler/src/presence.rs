//! Presence aggregator — republish the bot's status line only when the counts move.

use whatsup_core::types::PresenceCounts;

/// Remembers the last published counts. Owned by the event loop.
#[derive(Debug, Default)]
pub struct PresenceAggregator {
    published: Option<PresenceCounts>,
}

impl PresenceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new status line when `counts` differ from the last published set.
    pub fn refresh(&mut self, counts: PresenceCounts) -> Option<String> {
        if self.published == Some(counts) {
            return None;
        }
        tracing::info!(
            "📡 Updating presence: {} active watches, {} users, {} watching",
            counts.active_watches,
            counts.users,
            counts.watchers
        );
        self.published = Some(counts);
        Some(status_line(&counts))
    }

    /// Forget what was published (new session: the network saw nothing yet).
    pub fn reset(&mut self) {
        self.published = None;
    }
}

pub fn status_line(counts: &PresenceCounts) -> String {
    format!(
        "Watching {} URLs for {} of {} users",
        counts.active_watches, counts.watchers, counts.users
    )
}
