//! Event loop & supervisor.
//!
//! One task owns the transport, the repository writes and the dispatcher.
//! Each tick drains transport events, applies finished jobs, then runs the
//! presence aggregator and the watch scheduler when their gates open. A tick
//! that fails is classified: a lost connection triggers a reconnect, anything
//! else is logged and followed by a backoff sleep.

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use whatsup_core::config::WhatsupConfig;
use whatsup_core::error::{Result, WhatsupError};
use whatsup_core::traits::{Searcher, Transport};
use whatsup_core::types::{TransportEvent, bare_address};
use whatsup_db::WatchDb;
use whatsup_scheduler::{
    Completion, IntervalGate, PresenceAggregator, ProbeFollowup, Prober, WatchScheduler, WorkerPool,
};

use crate::commands::{Dispatcher, format_get_reply, format_search_reply, split_command};

const WELCOME: &str = "Welcome to whatsup.\n\n\
I'll look at web pages so you don't have to. The most basic thing you can do to add a monitor is the following:\n\n  \
watch http://www.mywebsite.com/\n\n\
But I can do more. Type \"help\" for more info.";

/// What to do after a failed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Log, sleep, keep the session.
    Backoff,
    /// Tear the session down and connect again.
    Reconnect,
}

pub fn classify(err: &WhatsupError) -> FaultAction {
    if err.is_connection_fault() {
        FaultAction::Reconnect
    } else {
        FaultAction::Backoff
    }
}

/// Counters for one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub events: usize,
    pub completions: usize,
    pub probes_queued: usize,
    pub presence_published: bool,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
struct LoopSettings {
    loop_sleep: Duration,
    fault_backoff: Duration,
    priority: i8,
    admins: Vec<String>,
}

pub struct Bot {
    transport: Box<dyn Transport>,
    db: Arc<WatchDb>,
    pool: WorkerPool,
    dispatcher: Dispatcher,
    scheduler: WatchScheduler,
    presence: PresenceAggregator,
    presence_gate: IntervalGate,
    scheduler_gate: IntervalGate,
    completions: mpsc::UnboundedReceiver<Completion>,
    /// Events polled but not yet handled; survives a reconnect.
    backlog: VecDeque<TransportEvent>,
    settings: LoopSettings,
}

impl Bot {
    /// Wire the bot together and start the fetch workers. Needs a running tokio runtime.
    pub fn new(
        config: &WhatsupConfig,
        db: Arc<WatchDb>,
        transport: Box<dyn Transport>,
        prober: Arc<dyn Prober>,
        searcher: Option<Arc<dyn Searcher>>,
    ) -> Self {
        let (tx, completions) = mpsc::unbounded_channel();
        let pool = WorkerPool::start(config.general.nthreads, prober, searcher, tx);
        let dispatcher = Dispatcher::new(db.clone(), pool.clone(), &config.search);
        let scheduler = WatchScheduler::from_config(db.clone(), pool.clone(), &config.general);

        Self {
            transport,
            db,
            pool,
            dispatcher,
            scheduler,
            presence: PresenceAggregator::new(),
            presence_gate: IntervalGate::new(config.general.presence_interval()),
            scheduler_gate: IntervalGate::new(config.general.scheduler_interval()),
            completions,
            backlog: VecDeque::new(),
            settings: LoopSettings {
                loop_sleep: config.general.loop_sleep(),
                fault_backoff: config.general.fault_backoff(),
                priority: config.transport.priority,
                admins: config.transport.admins.clone(),
            },
        }
    }

    /// Connect and publish presence once, regardless of the presence gate.
    pub async fn start_session(&mut self) -> Result<()> {
        tracing::info!("🔌 Connecting via {} transport...", self.transport.name());
        self.transport.connect().await?;
        self.presence.reset();
        self.publish_presence().await?;
        self.presence_gate.mark(Instant::now());
        tracing::info!("✅ Connected");
        Ok(())
    }

    /// Supervisor: connect, tick forever, recover from faults.
    pub async fn run(&mut self) {
        self.connect_until_up().await;
        loop {
            match self.tick().await {
                Ok(report) => {
                    if !report.is_idle() {
                        tracing::debug!("Tick: {report:?}");
                    }
                    tokio::time::sleep(self.settings.loop_sleep).await;
                }
                Err(e) => self.recover(e).await,
            }
        }
    }

    /// Apply the fault table to a failed tick.
    pub async fn recover(&mut self, err: WhatsupError) {
        match classify(&err) {
            FaultAction::Reconnect => {
                tracing::warn!("🔌 Connection lost ({err}), reconnecting");
                if let Err(e) = self.transport.disconnect().await {
                    tracing::debug!("Disconnect after fault failed: {e}");
                }
                self.connect_until_up().await;
            }
            FaultAction::Backoff => {
                tracing::error!("❌ Tick failed: {err}");
                tokio::time::sleep(self.settings.fault_backoff).await;
            }
        }
    }

    async fn connect_until_up(&mut self) {
        while let Err(e) = self.start_session().await {
            tracing::error!("❌ Connect failed: {e}");
            tokio::time::sleep(self.settings.fault_backoff).await;
        }
    }

    /// One pass of the loop.
    ///
    /// A failing event or completion is logged and skipped. Only a lost
    /// connection ends the tick early; unhandled events wait in the backlog
    /// and unapplied completions stay queued.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let mut report = TickReport::default();

        let fresh = self.transport.poll_events().await?;
        self.backlog.extend(fresh);
        while let Some(event) = self.backlog.pop_front() {
            report.events += 1;
            let from = event.from().to_string();
            if let Err(e) = self.handle_event(event).await {
                if e.is_connection_fault() {
                    return Err(e);
                }
                tracing::error!("❌ Event from {from} failed: {e}");
            }
        }

        while let Ok(completion) = self.completions.try_recv() {
            report.completions += 1;
            if let Err(e) = self.apply_completion(completion).await {
                if e.is_connection_fault() {
                    return Err(e);
                }
                tracing::error!("❌ Completion failed: {e}");
            }
        }

        if self.presence_gate.ready(Instant::now()) {
            report.presence_published = self.publish_presence().await?;
        }

        if self.scheduler_gate.ready(Instant::now()) {
            report.probes_queued = self.scheduler.run_cycle(Utc::now())?;
        }

        Ok(report)
    }

    async fn handle_event(&mut self, event: TransportEvent) -> Result<()> {
        let jid = bare_address(event.from()).to_string();
        match event {
            TransportEvent::Presence { status, .. } => {
                tracing::debug!("Presence from {jid}: {status}");
                self.db.update_user_status(&jid, &status)?;
            }
            TransportEvent::Message { body, .. } => {
                let Some((cmd, args)) = split_command(&body) else {
                    return Ok(());
                };
                let user = self.db.ensure_user(&jid)?;
                tracing::info!("💬 {jid}: {cmd}");
                self.dispatcher
                    .dispatch(&*self.transport, &user, cmd, args)
                    .await?;
            }
            TransportEvent::Subscribed { .. } => {
                tracing::info!("🤝 Subscribed by {jid}");
                self.db.ensure_user(&jid)?;
                self.transport.deliver(&jid, WELCOME).await?;
                let note = format!("New subscriber: {jid} ( {} )", self.db.user_count()?);
                for admin in &self.settings.admins {
                    self.transport.deliver(admin, &note).await?;
                }
            }
            TransportEvent::SubscriptionRequest { .. } => {
                tracing::info!("📨 Subscription request from {jid}");
            }
            TransportEvent::Unsubscribed { .. } => {
                tracing::info!("👋 Unsubscribed by {jid}");
                self.db.update_user_status(&jid, "unsubscribed")?;
            }
        }
        Ok(())
    }

    async fn apply_completion(&mut self, completion: Completion) -> Result<()> {
        match completion {
            Completion::Probe {
                followup: ProbeFollowup::Watch { watch_id },
                response,
                ..
            } => {
                if let Some(alert) = self.scheduler.apply_probe(watch_id, &response, Utc::now())? {
                    tracing::info!("📣 {} ← {}", alert.to, alert.body);
                    self.transport.deliver(&alert.to, &alert.body).await?;
                }
            }
            Completion::Probe {
                url,
                followup: ProbeFollowup::Get { jid },
                response,
            } => {
                self.transport.deliver(&jid, &format_get_reply(&url, &response)).await?;
            }
            Completion::Search { jid, query, outcome } => {
                if let Err(e) = &outcome {
                    tracing::warn!("⚠️ Search '{query}' for {jid} failed: {e}");
                }
                self.transport
                    .deliver(&jid, &format_search_reply(&query, &outcome))
                    .await?;
            }
        }
        Ok(())
    }

    /// Returns true when a new presence line went out.
    async fn publish_presence(&mut self) -> Result<bool> {
        let counts = self.db.presence_counts()?;
        match self.presence.refresh(counts) {
            Some(line) => {
                self.transport.send_presence(&line, self.settings.priority).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whatsup_channels::memory::MemoryTransport;
    use whatsup_scheduler::probe::StaticProber;

    const ME: &str = "dustin@spy.net";
    const ADMIN: &str = "admin@spy.net";

    fn config() -> WhatsupConfig {
        let mut config = WhatsupConfig::default();
        config.general.fault_backoff_secs = 0;
        config.general.loop_sleep_ms = 0;
        config.transport.admins = vec![ADMIN.to_string()];
        config
    }

    struct Harness {
        bot: Bot,
        transport: MemoryTransport,
        db: Arc<WatchDb>,
        prober: Arc<StaticProber>,
    }

    async fn harness_with(config: WhatsupConfig, prober: StaticProber) -> Harness {
        let db = Arc::new(WatchDb::open_in_memory().unwrap());
        let transport = MemoryTransport::new();
        let prober = Arc::new(prober);
        let mut bot = Bot::new(&config, db.clone(), Box::new(transport.clone()), prober.clone(), None);
        bot.start_session().await.unwrap();
        Harness {
            bot,
            transport,
            db,
            prober,
        }
    }

    async fn harness() -> Harness {
        harness_with(config(), StaticProber::new().with("http://x/", 200, "system OK")).await
    }

    impl Harness {
        /// Tick until `ME` has been sent something containing `needle`.
        async fn tick_until_told(&mut self, needle: &str) -> String {
            for _ in 0..200 {
                self.bot.tick().await.unwrap();
                if let Some(text) = self.transport.delivered_to(ME).into_iter().find(|t| t.contains(needle)) {
                    return text;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("never told {needle:?}; got {:?}", self.transport.delivered());
        }

        /// Tick until every queued job has come back.
        async fn settle(&mut self) {
            for _ in 0..200 {
                self.bot.tick().await.unwrap();
                let stats = self.bot.pool().stats();
                if stats.completed + stats.panicked == stats.submitted {
                    self.bot.tick().await.unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("jobs never settled");
        }
    }

    #[test]
    fn test_fault_table() {
        assert_eq!(
            classify(&WhatsupError::ConnectionLost("eof".into())),
            FaultAction::Reconnect
        );
        assert_eq!(classify(&WhatsupError::Database("locked".into())), FaultAction::Backoff);
        assert_eq!(classify(&WhatsupError::Transport("busy".into())), FaultAction::Backoff);
        assert_eq!(classify(&WhatsupError::Other("?".into())), FaultAction::Backoff);
    }

    #[tokio::test]
    async fn test_presence_published_at_startup() {
        let h = harness().await;
        assert_eq!(
            h.transport.presences(),
            vec![("Watching 0 URLs for 0 of 0 users".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_watch_then_first_check_alerts() {
        let mut h = harness().await;
        h.transport.push_presence(&format!("{ME}/laptop"), "available");
        h.transport.push_message(&format!("{ME}/laptop"), "watch http://x/");

        let reply = h.tick_until_told("Scheduled").await;
        assert_eq!(reply, "Scheduled a watch for http://x/.");

        let alert = h.tick_until_told("Started watching").await;
        assert_eq!(alert, "Started watching http://x/ — status is 200 (OK)");

        let user = h.db.find_user(ME).unwrap().unwrap();
        let watch = h.db.find_watch(user.id, "http://x/").unwrap().unwrap();
        assert_eq!(watch.status, Some(200));
        assert!(watch.last_update.is_some());
        assert_eq!(h.prober.fetched(), vec!["http://x/".to_string()]);
    }

    #[tokio::test]
    async fn test_quiet_watch_records_without_alert() {
        let mut h = harness().await;
        h.transport.push_presence(ME, "available");
        h.transport.push_message(ME, "watch http://x/");
        h.transport.push_message(ME, "quiet 2h http://x/");
        h.settle().await;

        let told = h.transport.delivered_to(ME);
        assert_eq!(told.len(), 2);
        assert!(told[1].starts_with("http://x/ will be quiet until "));

        let user = h.db.find_user(ME).unwrap().unwrap();
        let watch = h.db.find_watch(user.id, "http://x/").unwrap().unwrap();
        assert_eq!(watch.status, Some(200));
    }

    #[tokio::test]
    async fn test_match_missing_watch_creates_nothing() {
        let mut h = harness().await;
        h.transport.push_message(ME, "match http://missing/ foo");
        let reply = h.tick_until_told("Cannot find").await;
        assert_eq!(reply, "Cannot find watch for http://missing/");
        // First message creates the user with no presence yet.
        let user = h.db.find_user(ME).unwrap().unwrap();
        assert!(user.status.is_none());
        assert!(h.db.watches_for_user(user.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_away_owner_not_probed() {
        let mut h = harness().await;
        h.transport.push_presence(ME, "available");
        h.transport.push_message(ME, "watch http://x/");
        h.transport.push_presence(ME, "unavailable");
        h.settle().await;

        assert!(h.prober.fetched().is_empty());
        let user = h.db.find_user(ME).unwrap().unwrap();
        assert_eq!(user.status.as_deref(), Some("unavailable"));
    }

    #[tokio::test]
    async fn test_get_reply() {
        let mut h = harness().await;
        h.transport.push_message(ME, "get http://x/");
        let reply = h.tick_until_told("Got a").await;
        assert!(reply.starts_with(":) Got a 200 from http://x/ in "));
        assert!(reply.ends_with("(9 bytes)"));
        // A one-off get never creates a watch.
        let user = h.db.find_user(ME).unwrap().unwrap();
        assert!(h.db.watches_for_user(user.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_without_backend_replies() {
        let mut config = config();
        config.search.enabled = true;
        let mut h = harness_with(config, StaticProber::new()).await;
        h.transport.push_message(ME, "search rust");
        let reply = h.tick_until_told("Search").await;
        assert_eq!(reply, "Search failed: search is not configured");
    }

    #[tokio::test]
    async fn test_subscription_events() {
        let mut h = harness().await;
        h.transport.push(TransportEvent::SubscriptionRequest { from: ME.into() });
        h.transport.push(TransportEvent::Subscribed {
            from: format!("{ME}/phone"),
        });
        h.bot.tick().await.unwrap();

        assert!(h.transport.delivered_to(ME)[0].starts_with("Welcome to whatsup."));
        assert_eq!(
            h.transport.delivered_to(ADMIN),
            vec![format!("New subscriber: {ME} ( 1 )")]
        );

        h.transport.push(TransportEvent::Unsubscribed { from: ME.into() });
        h.bot.tick().await.unwrap();
        let user = h.db.find_user(ME).unwrap().unwrap();
        assert_eq!(user.status.as_deref(), Some("unsubscribed"));
    }

    #[tokio::test]
    async fn test_presence_republished_only_on_change() {
        let mut config = config();
        config.general.presence_interval_secs = 0;
        let mut h = harness_with(config, StaticProber::new()).await;

        h.transport.push_presence(ME, "dnd");
        h.transport.push_message(ME, "watch http://x/");
        let report = h.bot.tick().await.unwrap();
        assert!(report.presence_published);
        let report = h.bot.tick().await.unwrap();
        assert!(!report.presence_published);

        let presences = h.transport.presences();
        assert_eq!(presences.len(), 2);
        assert_eq!(presences[1].0, "Watching 1 URLs for 1 of 1 users");
    }

    #[tokio::test]
    async fn test_connection_loss_reconnects() {
        let mut h = harness().await;
        h.transport.drop_connection();

        let err = h.bot.tick().await.unwrap_err();
        assert_eq!(classify(&err), FaultAction::Reconnect);
        h.bot.recover(err).await;

        assert_eq!(h.transport.connect_count(), 2);
        // Presence goes out again on the new session.
        assert_eq!(h.transport.presences().len(), 2);
        assert!(h.bot.tick().await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_reply_does_not_drop_other_commands() {
        let mut h = harness().await;
        h.transport.refuse_deliveries_to("bad@x");
        h.transport.push_message("bad@x", "off");
        h.transport.push_message(ME, "off");

        let report = h.bot.tick().await.unwrap();
        assert_eq!(report.events, 2);
        assert_eq!(h.transport.delivered_to(ME), vec!["Marked you inactive.".to_string()]);
        assert!(!h.db.find_user(ME).unwrap().unwrap().active);
        // The refused contact's command still ran.
        assert!(!h.db.find_user("bad@x").unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_events_after_connection_loss_survive_reconnect() {
        let mut h = harness().await;
        h.transport.drop_on_delivery_to("bad@x");
        h.transport.push_message("bad@x", "on");
        h.transport.push_message(ME, "off");

        let err = h.bot.tick().await.unwrap_err();
        assert_eq!(classify(&err), FaultAction::Reconnect);
        assert!(h.db.find_user(ME).unwrap().is_none());
        h.bot.recover(err).await;

        let report = h.bot.tick().await.unwrap();
        assert_eq!(report.events, 1);
        assert_eq!(h.transport.delivered_to(ME), vec!["Marked you inactive.".to_string()]);
        assert!(!h.db.find_user(ME).unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_other_faults_keep_session() {
        let mut h = harness().await;
        h.bot.recover(WhatsupError::Database("locked".into())).await;
        assert_eq!(h.transport.connect_count(), 1);
        assert!(h.bot.tick().await.is_ok());
    }
}
