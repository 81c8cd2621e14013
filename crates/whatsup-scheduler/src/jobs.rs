//! Work items for the fetch pool and the results handed back to the event loop.

use whatsup_core::types::{Response, SearchHit};

/// A unit of blocking network work. Each kind names its own continuation.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Fetch a URL once.
    Probe { url: String, followup: ProbeFollowup },
    /// Run a web search for a contact.
    Search {
        jid: String,
        query: String,
        max_results: usize,
    },
}

/// What the event loop does with a probe result.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeFollowup {
    /// Feed the notification decision for this watch.
    Watch { watch_id: i64 },
    /// Reply to a one-off `get` request.
    Get { jid: String },
}

/// A finished job, applied on the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Probe {
        url: String,
        followup: ProbeFollowup,
        response: Response,
    },
    Search {
        jid: String,
        query: String,
        outcome: Result<Vec<SearchHit>, String>,
    },
}

impl Job {
    /// Short description for logs.
    pub fn label(&self) -> String {
        match self {
            Job::Probe { url, .. } => format!("probe {url}"),
            Job::Search { query, .. } => format!("search '{query}'"),
        }
    }
}
