//! Watch scheduler — picks the due set, hands probes to the pool, and applies
//! probe results through the notification decision.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use whatsup_core::config::GeneralConfig;
use whatsup_core::error::Result;
use whatsup_core::types::Response;
use whatsup_db::WatchDb;

use crate::decision::decide;
use crate::jobs::{Job, ProbeFollowup};
use crate::pool::WorkerPool;

/// An alert ready for delivery to a watch owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub to: String,
    pub body: String,
    pub watch_id: i64,
}

pub struct WatchScheduler {
    db: Arc<WatchDb>,
    pool: WorkerPool,
    staleness: chrono::Duration,
    limit: usize,
    cycles: u64,
}

impl WatchScheduler {
    pub fn new(db: Arc<WatchDb>, pool: WorkerPool, staleness: chrono::Duration, limit: usize) -> Self {
        Self {
            db,
            pool,
            staleness,
            limit,
            cycles: 0,
        }
    }

    pub fn from_config(db: Arc<WatchDb>, pool: WorkerPool, config: &GeneralConfig) -> Self {
        Self::new(db, pool, config.staleness(), config.due_limit)
    }

    /// One selection cycle: claim due watches (stamping `last_update = now`)
    /// and queue a probe for each. Returns how many were queued.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<usize> {
        self.cycles += 1;
        let due = self.db.claim_due_watches(now, self.staleness, self.limit)?;
        for watch in &due {
            tracing::info!("🌐 Fetching {} at {}", watch.url, now.to_rfc3339());
            self.pool.submit(Job::Probe {
                url: watch.url.clone(),
                followup: ProbeFollowup::Watch { watch_id: watch.id },
            })?;
        }
        if !due.is_empty() {
            tracing::debug!("Cycle {}: queued {} probes", self.cycles, due.len());
        }
        Ok(due.len())
    }

    /// Apply a finished probe. The new status is always persisted; the alert
    /// is withheld while the owner or the watch is quiet.
    pub fn apply_probe(&self, watch_id: i64, response: &Response, now: DateTime<Utc>) -> Result<Option<Alert>> {
        let Some(watch) = self.db.get_watch(watch_id)? else {
            tracing::debug!("Watch {watch_id} was removed while its probe was in flight");
            return Ok(None);
        };
        let Some(owner) = self.db.get_user(watch.user_id)? else {
            tracing::warn!("⚠️ Watch {} has no owner", watch.id);
            return Ok(None);
        };
        let patterns = self.db.patterns_for_watch(watch.id)?;

        let decision = decide(&watch.url, watch.status, response, &patterns);
        self.db.record_status(watch.id, decision.status)?;

        let Some(body) = decision.message else {
            return Ok(None);
        };
        if owner.is_quiet(now) || watch.is_quiet(now) {
            tracing::info!("🔕 Quiet: not telling {} about {}", owner.jid, watch.url);
            return Ok(None);
        }
        Ok(Some(Alert {
            to: owner.jid,
            body,
            watch_id: watch.id,
        }))
    }
}
