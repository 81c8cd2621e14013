//! URL probe — one GET, timed, with every failure folded into the response.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use whatsup_core::error::{Result, WhatsupError};
use whatsup_core::types::Response;

/// Fetches a URL. Never fails: errors come back as a status -1 [`Response`].
#[async_trait]
pub trait Prober: Send + Sync {
    async fn fetch(&self, url: &str) -> Response;
}

/// reqwest-backed prober. One connection per request, redirects not followed.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("Whatsup/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| WhatsupError::Http(format!("Client error: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn fetch(&self, url: &str) -> Response {
        let start = Instant::now();
        let result = async {
            let response = self
                .client
                .get(url)
                .header(reqwest::header::CONNECTION, "close")
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        }
        .await;

        match result {
            Ok((status, body)) => Response {
                status: i32::from(status.as_u16()),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
                elapsed: start.elapsed(),
                body,
            },
            Err(e) => {
                tracing::debug!("Fetch of {url} failed: {e}");
                Response::failed(e.to_string(), start.elapsed())
            }
        }
    }
}

/// Canned prober for tests and dry runs. Unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct StaticProber {
    responses: HashMap<String, Response>,
    panics: Vec<String>,
    fetched: Mutex<Vec<String>>,
}

impl StaticProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with a given status and body.
    pub fn with(mut self, url: &str, status: i32, body: &str) -> Self {
        self.responses.insert(
            url.to_string(),
            Response {
                status,
                message: reason(status).to_string(),
                elapsed: Duration::from_millis(5),
                body: body.to_string(),
            },
        );
        self
    }

    /// Panic when asked for `url`.
    pub fn panicking_on(mut self, url: &str) -> Self {
        self.panics.push(url.to_string());
        self
    }

    /// URLs fetched so far, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Prober for StaticProber {
    async fn fetch(&self, url: &str) -> Response {
        self.fetched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        if self.panics.iter().any(|p| p == url) {
            panic!("static prober told to panic on {url}");
        }
        self.responses
            .get(url)
            .cloned()
            .unwrap_or_else(|| Response::failed("no route to host", Duration::from_millis(1)))
    }
}

fn reason(status: i32) -> &'static str {
    u16::try_from(status)
        .ok()
        .and_then(|s| reqwest::StatusCode::from_u16(s).ok())
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}
