//! # Whatsup Scheduler
//!
//! Decides which watches to fetch, fetches them off the event loop, and turns
//! each result into at most one alert.
//!
//! ## Architecture
//! ```text
//! event loop (single task)
//!   ├── IntervalGate ── WatchScheduler::run_cycle ── claim due set (stamp last_update)
//!   │                                                └── Job::Probe → WorkerPool
//!   ├── IntervalGate ── PresenceAggregator::refresh
//!   └── drain completions ── WatchScheduler::apply_probe
//!                              └── decision::decide → record status, maybe alert
//!
//! WorkerPool (N tasks, one unbounded queue)
//!   └── Prober::fetch / Searcher::search → Completion → event loop
//! ```

pub mod decision;
pub mod engine;
pub mod jobs;
pub mod matcher;
pub mod pool;
pub mod presence;
pub mod probe;
pub mod timer;

pub use decision::{Decision, decide};
pub use engine::{Alert, WatchScheduler};
pub use jobs::{Completion, Job, ProbeFollowup};
pub use pool::{PoolStats, WorkerPool};
pub use presence::PresenceAggregator;
pub use probe::{HttpProber, Prober};
pub use timer::IntervalGate;
