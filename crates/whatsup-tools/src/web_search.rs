//! Web search — DuckDuckGo's HTML endpoint, no API key required.

use async_trait::async_trait;
use std::time::Duration;
use whatsup_core::error::{Result, WhatsupError};
use whatsup_core::traits::Searcher;
use whatsup_core::types::SearchHit;

const ENDPOINT: &str = "https://html.duckduckgo.com/html/";

pub struct DuckDuckGoSearch {
    client: reqwest::Client,
}

impl DuckDuckGoSearch {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("Whatsup/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| WhatsupError::Search(format!("HTTP client error: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Searcher for DuckDuckGoSearch {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{ENDPOINT}?q={}", urlencoding::encode(query));
        tracing::debug!("🔎 Searching for {query:?}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WhatsupError::Search(format!("Search failed: {e}")))?;
        if !response.status().is_success() {
            return Err(WhatsupError::Search(format!(
                "Search returned {}",
                response.status()
            )));
        }
        let html = response
            .text()
            .await
            .map_err(|e| WhatsupError::Search(format!("Read failed: {e}")))?;

        Ok(parse_results(&html, max_results))
    }
}

/// Pull up to `max` hits out of a result page.
pub fn parse_results(html: &str, max: usize) -> Vec<SearchHit> {
    html.split("class=\"result__a\"")
        .skip(1)
        .filter_map(parse_block)
        .take(max)
        .collect()
}

fn parse_block(block: &str) -> Option<SearchHit> {
    let href = between(block, "href=\"", "\"")?;
    let title = clean(between(block, ">", "</a>")?);
    if title.is_empty() {
        return None;
    }
    let snippet = block
        .split_once("class=\"result__snippet\"")
        .and_then(|(_, rest)| between(rest, ">", "</a>"))
        .map(clean)
        .unwrap_or_default();
    Some(SearchHit {
        title,
        url: target_url(href),
        snippet,
    })
}

/// Result links go through a redirector carrying the real target in `uddg`.
fn target_url(href: &str) -> String {
    let href = unescape(href);
    if let Some((_, query)) = href.split_once("uddg=") {
        let encoded = query.split('&').next().unwrap_or_default();
        if let Ok(decoded) = urlencoding::decode(encoded) {
            return decoded.into_owned();
        }
    }
    if let Some(rest) = href.strip_prefix("//") {
        return format!("https://{rest}");
    }
    href
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let (_, rest) = text.split_once(start)?;
    let (inner, _) = rest.split_once(end)?;
    Some(inner)
}

/// Strip inline tags and decode the handful of entities DuckDuckGo emits.
fn clean(fragment: &str) -> String {
    let mut text = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for c in fragment.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    unescape(text.trim())
}

fn unescape(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<div class="result">
  <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=abc">The <b>Rust</b> Programming Language</a>
  <a class="result__snippet" href="x">A language empowering everyone to build <b>reliable</b> software.</a>
</div>
<div class="result">
  <a rel="nofollow" class="result__a" href="https://doc.rust-lang.org/book/">The Book &amp; more</a>
</div>
<div class="result">
  <a rel="nofollow" class="result__a" href="https://example.com/"></a>
</div>
<div class="result">
  <a rel="nofollow" class="result__a" href="https://crates.io/">crates.io</a>
</div>
"#;

    #[test]
    fn test_parse_results() {
        let hits = parse_results(PAGE, 10);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "The Rust Programming Language");
        assert_eq!(hits[0].url, "https://www.rust-lang.org/");
        assert_eq!(
            hits[0].snippet,
            "A language empowering everyone to build reliable software."
        );
        assert_eq!(hits[1].title, "The Book & more");
        assert_eq!(hits[1].url, "https://doc.rust-lang.org/book/");
        assert!(hits[1].snippet.is_empty());
        // The untitled result is skipped.
        assert_eq!(hits[2].url, "https://crates.io/");
    }

    #[test]
    fn test_parse_respects_limit() {
        assert_eq!(parse_results(PAGE, 1).len(), 1);
        assert!(parse_results(PAGE, 0).is_empty());
    }

    #[test]
    fn test_no_results() {
        assert!(parse_results("<html><body>No results.</body></html>", 5).is_empty());
    }

    #[test]
    fn test_protocol_relative_link() {
        assert_eq!(target_url("//example.org/a"), "https://example.org/a");
    }
}
