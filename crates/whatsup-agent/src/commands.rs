//! Command dispatcher — turns one chat line into a repository change and a reply.
//!
//! Handlers run synchronously against the repository and return the reply
//! text. `get` and `search` only queue a job; their reply is sent when the
//! worker's completion comes back through the event loop.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use whatsup_core::config::SearchConfig;
use whatsup_core::error::{Result, WhatsupError};
use whatsup_core::traits::Transport;
use whatsup_core::types::{Response, SearchHit, User, Watch};
use whatsup_db::WatchDb;
use whatsup_scheduler::{Job, ProbeFollowup, WorkerPool, matcher};

use crate::registry::{ArgPolicy, CommandKind, CommandRegistry, CommandSpec};

enum Reply {
    Now(String),
    /// A worker will answer.
    Later,
}

pub struct Dispatcher {
    registry: CommandRegistry,
    db: Arc<WatchDb>,
    pool: WorkerPool,
    search_results: Option<usize>,
}

impl Dispatcher {
    pub fn new(db: Arc<WatchDb>, pool: WorkerPool, search: &SearchConfig) -> Self {
        Self {
            registry: CommandRegistry::with_defaults(),
            db,
            pool,
            search_results: search.enabled.then_some(search.max_results),
        }
    }

    /// Run `cmd` for `user` and reply over `transport`.
    ///
    /// Only transport failures are returned; everything else becomes a reply.
    pub async fn dispatch(&self, transport: &dyn Transport, user: &User, cmd: &str, args: Option<&str>) -> Result<()> {
        transport.send_composing(&user.jid).await?;

        let Some(spec) = self.registry.get(cmd) else {
            let text = format!("I don't understand {cmd}. Send `help' for what I do know.");
            return transport.deliver(&user.jid, &text).await;
        };

        let text = match self.run(spec, user, args, Utc::now()) {
            Ok(Reply::Now(text)) => text,
            Ok(Reply::Later) => return Ok(()),
            Err(e) if e.is_user_facing() => e.to_string(),
            Err(e @ (WhatsupError::Transport(_) | WhatsupError::ConnectionLost(_))) => return Err(e),
            Err(e) => {
                tracing::error!("❌ {} for {} failed: {e}", spec.name, user.jid);
                unable(spec.kind, &e)
            }
        };
        transport.deliver(&user.jid, &text).await
    }

    fn run(&self, spec: &CommandSpec, user: &User, args: Option<&str>, now: DateTime<Utc>) -> Result<Reply> {
        let arg = args.map(str::trim).filter(|a| !a.is_empty());
        let arg = match (spec.args, arg) {
            (ArgPolicy::Required, None) => {
                return Err(WhatsupError::Validation(format!(
                    "Arguments required for {}:\n{}",
                    spec.name, spec.full
                )));
            }
            (ArgPolicy::WatchUrl, None) => {
                return Err(WhatsupError::Validation("URL argument required.".into()));
            }
            (_, arg) => arg.unwrap_or_default(),
        };

        let text = match spec.kind {
            CommandKind::Help => self.help(arg)?,
            CommandKind::Get => return self.get(user, arg),
            CommandKind::Search => return self.search(spec, user, arg),
            CommandKind::Watch => self.watch(user, arg)?,
            CommandKind::On => {
                self.db.set_user_active(user.id, true)?;
                "Marked you active.".to_string()
            }
            CommandKind::Off => {
                self.db.set_user_active(user.id, false)?;
                "Marked you inactive.".to_string()
            }
            CommandKind::Quiet => self.quiet(user, arg, now)?,
            CommandKind::Watching => self.watching(user)?,
            CommandKind::Status => self.status(user, now)?,
            CommandKind::Enable | CommandKind::Disable => {
                let watch = self.my_watch(user, arg)?;
                let enable = spec.kind == CommandKind::Enable;
                self.db.set_watch_active(watch.id, enable)?;
                if enable {
                    format!("Enabled watching of {}", watch.url)
                } else {
                    format!("Disabled watching of {}", watch.url)
                }
            }
            CommandKind::Unwatch => {
                let watch = self.my_watch(user, arg)?;
                self.db.delete_watch(watch.id)?;
                format!("Stopped watching {}", watch.url)
            }
            CommandKind::Match | CommandKind::NegMatch => {
                self.add_pattern(spec, user, arg, spec.kind == CommandKind::Match)?
            }
            CommandKind::Inspect => {
                let watch = self.my_watch(user, arg)?;
                self.inspect(&watch, now)?
            }
            CommandKind::ClearMatches => {
                let watch = self.my_watch(user, arg)?;
                let removed = self.db.clear_patterns(watch.id)?;
                tracing::debug!("Cleared {removed} patterns from {}", watch.url);
                format!("Removed all patterns for {}", watch.url)
            }
        };
        Ok(Reply::Now(text))
    }

    fn help(&self, topic: &str) -> Result<String> {
        if topic.is_empty() {
            return Ok(self.registry.summary());
        }
        match self.registry.get(topic) {
            Some(spec) => Ok(format!("Help for {}:\n{}", spec.name, spec.full)),
            None => Err(WhatsupError::NotFound(format!("Unknown command {topic}."))),
        }
    }

    fn get(&self, user: &User, url: &str) -> Result<Reply> {
        validate_url(url)?;
        tracing::info!("🌐 Fetching {url} for {}", user.jid);
        self.pool.submit(Job::Probe {
            url: url.to_string(),
            followup: ProbeFollowup::Get { jid: user.jid.clone() },
        })?;
        Ok(Reply::Later)
    }

    fn search(&self, spec: &CommandSpec, user: &User, query: &str) -> Result<Reply> {
        let Some(max_results) = self.search_results else {
            return Ok(Reply::Now(format!("Sorry, {} is not configured here.", spec.name)));
        };
        self.pool.submit(Job::Search {
            jid: user.jid.clone(),
            query: query.to_string(),
            max_results,
        })?;
        Ok(Reply::Later)
    }

    fn watch(&self, user: &User, url: &str) -> Result<String> {
        validate_url(url)?;
        if self.db.find_watch(user.id, url)?.is_some() {
            return Err(WhatsupError::Validation(format!("You are already watching {url}.")));
        }
        let watch = self.db.create_watch(user.id, url)?;
        tracing::info!("👀 {} is now watching {}", user.jid, watch.url);
        Ok(format!("Scheduled a watch for {}.", watch.url))
    }

    fn quiet(&self, user: &User, arg: &str, now: DateTime<Utc>) -> Result<String> {
        let (duration, url) = split_first(arg);
        let until = parse_quiet_duration(duration)
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| {
                WhatsupError::Validation("I don't understand how long you want me to be quiet. Try 5m".into())
            })?;

        match url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => {
                let watch = self.my_watch(user, url)?;
                self.db.set_watch_quiet(watch.id, Some(until))?;
                Ok(format!("{} will be quiet until {}", watch.url, display_time(until)))
            }
            None => {
                self.db.set_user_quiet(user.id, Some(until))?;
                Ok(format!("You won't hear from me again until {}", display_time(until)))
            }
        }
    }

    fn watching(&self, user: &User) -> Result<String> {
        let watches = self.db.watches_for_user(user.id)?;
        let mut lines = vec![format!("Watching {} URLs", watches.len())];
        for watch in &watches {
            let patterns = self.db.pattern_count(watch.id)?;
            lines.push(format!(
                "{} ({} -- {} patterns, last={})",
                watch.url,
                enabled_label(watch.active),
                patterns,
                last_status(watch.status)
            ));
        }
        Ok(lines.join("\n"))
    }

    fn status(&self, user: &User, now: DateTime<Utc>) -> Result<String> {
        let watches = self.db.watches_for_user(user.id)?;
        let mut lines = vec![
            format!("Address:  {}", user.jid),
            format!("Presence:  {}", user.status.as_deref().unwrap_or("unknown")),
            format!("Monitoring:  {}", if user.active { "Active" } else { "Inactive" }),
            format!("You are currently watching {} URLs.", watches.len()),
        ];
        if let Some(until) = user.quiet_until
            && user.is_quiet(now)
        {
            lines.push(format!("All alerts are quieted until {}", display_time(until)));
        }
        Ok(lines.join("\n"))
    }

    fn add_pattern(&self, spec: &CommandSpec, user: &User, arg: &str, positive: bool) -> Result<String> {
        let (url, regex) = split_first(arg);
        let watch = self.my_watch(user, url)?;
        let Some(regex) = regex.filter(|r| !r.trim().is_empty()) else {
            return Err(WhatsupError::Validation(format!(
                "Arguments required for {}:\n{}",
                spec.name, spec.full
            )));
        };
        matcher::validate(regex).map_err(|e| WhatsupError::Validation(format!("Your regex seems broken: {e}")))?;

        let pattern = self.db.add_pattern(watch.id, regex, positive)?;
        Ok(format!(
            "Configured a {} match pattern for {}",
            pattern.polarity(),
            watch.url
        ))
    }

    fn inspect(&self, watch: &Watch, now: DateTime<Utc>) -> Result<String> {
        let mut lines = vec![
            format!("Status for {} ({})", watch.url, enabled_label(watch.active)),
            format!(
                "Last status: {} (as of {})",
                last_status(watch.status),
                watch.last_update.map(display_time).unwrap_or_else(|| "never".into())
            ),
        ];
        if let Some(until) = watch.quiet_until
            && watch.is_quiet(now)
        {
            lines.push(format!("Alerts are quiet until {}", display_time(until)));
        }
        let patterns = self.db.patterns_for_watch(watch.id)?;
        if patterns.is_empty() {
            lines.push("No match patterns configured.".into());
        } else {
            lines.push("Patterns:".into());
            lines.extend(patterns.iter().map(|p| format!("\t{} /{}/", p.sign(), p.regex)));
        }
        Ok(lines.join("\n"))
    }

    /// The caller's watch with exactly this URL.
    fn my_watch(&self, user: &User, url: &str) -> Result<Watch> {
        let url = url.trim();
        if url.is_empty() {
            return Err(WhatsupError::Validation("URL argument required.".into()));
        }
        self.db
            .find_watch(user.id, url)?
            .ok_or_else(|| WhatsupError::NotFound(format!("Cannot find watch for {url}")))
    }
}

/// Split a chat line into the command word and its raw argument string.
pub fn split_command(body: &str) -> Option<(&str, Option<&str>)> {
    let body = body.trim_start();
    if body.trim().is_empty() {
        return None;
    }
    Some(match body.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, Some(rest)),
        None => (body.trim_end(), None),
    })
}

/// Accept only absolute `http` URLs with a host and a path.
pub fn validate_url(raw: &str) -> Result<()> {
    // The parser percent-encodes inner spaces; a stored URL must stay one token.
    if raw.contains(char::is_whitespace) {
        return Err(WhatsupError::Validation(format!(
            "That doesn't look like a URL ({raw:?} contains spaces)."
        )));
    }
    let parsed =
        url::Url::parse(raw).map_err(|e| WhatsupError::Validation(format!("That doesn't look like a URL ({e}).")))?;
    if parsed.scheme() != "http" {
        return Err(WhatsupError::Validation("Only http URLs are supported at this time.".into()));
    }

    // The parser infers a host from `http:///p` and fills in "/" for a bare
    // host, so check what was typed.
    let after_scheme = raw.split_once("//").map(|(_, rest)| rest).unwrap_or_default();
    let (authority, rest) = after_scheme.split_at(after_scheme.find(['/', '?', '#']).unwrap_or(after_scheme.len()));
    if authority.is_empty() || parsed.host_str().is_none_or(str::is_empty) {
        return Err(WhatsupError::Validation("The URL must include host.".into()));
    }
    if !rest.starts_with('/') {
        return Err(WhatsupError::Validation("The URL must include a path.".into()));
    }
    Ok(())
}

/// `<n>m`, `<n>h` or `<n>d`.
pub fn parse_quiet_duration(text: &str) -> Option<chrono::Duration> {
    let minutes_per_unit = match text.chars().last()? {
        'm' => 1,
        'h' => 60,
        'd' => 1440,
        _ => return None,
    };
    let digits = &text[..text.len() - 1];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: i64 = digits.parse().ok()?;
    chrono::Duration::try_minutes(n.checked_mul(minutes_per_unit)?)
}

/// Reply for a finished `get`.
pub fn format_get_reply(url: &str, response: &Response) -> String {
    let face = if response.is_ok() { ":)" } else { ":(" };
    format!(
        "{face} Got a {} from {url} in {:.2}s ({} bytes)",
        response.status,
        response.elapsed.as_secs_f64(),
        response.body.len()
    )
}

/// Reply for a finished `search`.
pub fn format_search_reply(query: &str, outcome: &std::result::Result<Vec<SearchHit>, String>) -> String {
    match outcome {
        Ok(hits) if hits.is_empty() => format!("No results found for: {query}"),
        Ok(hits) => {
            let mut out = format!("Search results for \"{query}\":");
            for (i, hit) in hits.iter().enumerate() {
                out.push_str(&format!("\n{}. {} — {}", i + 1, hit.title, hit.url));
            }
            out
        }
        Err(e) => format!("Search failed: {e}"),
    }
}

/// First whitespace-separated token and the rest, with the gap between them collapsed.
fn split_first(arg: &str) -> (&str, Option<&str>) {
    let arg = arg.trim();
    match arg.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, Some(rest.trim_start())),
        None => (arg, None),
    }
}

fn unable(kind: CommandKind, err: &WhatsupError) -> String {
    let detail = match err {
        WhatsupError::Database(msg) => msg.clone(),
        other => other.to_string(),
    };
    match kind {
        CommandKind::Watch => format!("Unable to set up this watch for you ({detail})."),
        _ => format!("Unable to do that ({detail})."),
    }
}

fn display_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn enabled_label(active: bool) -> &'static str {
    if active { "enabled" } else { "disabled" }
}

fn last_status(status: Option<i32>) -> String {
    status.map_or_else(|| "unknown".into(), |s| s.to_string())
}
