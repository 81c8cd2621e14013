//! Command registry — name to help text and handler tag, built once at startup.

use std::collections::BTreeMap;

/// Which handler a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Help,
    Get,
    Watch,
    On,
    Off,
    Quiet,
    Watching,
    Enable,
    Disable,
    Unwatch,
    Match,
    NegMatch,
    Inspect,
    ClearMatches,
    Status,
    Search,
}

/// How a command treats its argument string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPolicy {
    /// Optional; commands that take nothing ignore it.
    Optional,
    /// Some argument required.
    Required,
    /// Names one of the caller's watches; `quiet` and the match commands take it as the first word.
    WatchUrl,
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub short: &'static str,
    pub full: &'static str,
    pub kind: CommandKind,
    pub args: ArgPolicy,
}

impl CommandSpec {
    fn new(name: &'static str, kind: CommandKind, args: ArgPolicy, short: &'static str) -> Self {
        Self {
            name,
            short,
            full: short,
            kind,
            args,
        }
    }

    fn with_full(mut self, full: &'static str) -> Self {
        self.full = full;
        self
    }
}

/// Registry of every command the bot answers to.
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, CommandSpec>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CommandRegistry {
    pub fn empty() -> Self {
        Self {
            commands: BTreeMap::new(),
        }
    }

    /// Registry with all built-in commands.
    pub fn with_defaults() -> Self {
        let mut reg = Self::empty();
        for spec in builtin_commands() {
            reg.register(spec);
        }
        tracing::debug!("Loaded {} commands", reg.count());
        reg
    }

    pub fn register(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.name, spec);
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    /// All commands, sorted by name.
    pub fn list(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values()
    }

    pub fn count(&self) -> usize {
        self.commands.len()
    }

    /// One "name\tshort help" line per command.
    pub fn summary(&self) -> String {
        self.list()
            .map(|c| format!("{}\t{}", c.name, c.short))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn builtin_commands() -> Vec<CommandSpec> {
    use ArgPolicy as A;
    use CommandKind as K;
    vec![
        CommandSpec::new("help", K::Help, A::Optional, "Get help for commands.").with_full(
            "Get help for commands.\n\nUsage:  help [command]",
        ),
        CommandSpec::new("get", K::Get, A::Required, "Get a URL.").with_full(
            "Fetch a URL once and report the status, timing and size.\n\nUsage:  get http://www.example.com/",
        ),
        CommandSpec::new("watch", K::Watch, A::Required, "Watch a URL.").with_full(
            "Start watching a URL. Only http URLs with a path are supported.\n\nUsage:  watch http://www.example.com/",
        ),
        CommandSpec::new("on", K::On, A::Optional, "Activate monitoring."),
        CommandSpec::new("off", K::Off, A::Optional, "Deactivate monitoring."),
        CommandSpec::new("quiet", K::Quiet, A::Required, "Temporarily quiet alerts.").with_full(
            "Quiet alerts for a period of time.\n\n\
             Available time units:  m, h, d\n\n\
             You can either quiet an individual URL like this:\n\n  \
             quiet 5m http://broken.example.com/\n\n\
             or from everything:\n\n  \
             quiet 1h",
        ),
        CommandSpec::new("watching", K::Watching, A::Optional, "List all current watches."),
        CommandSpec::new(
            "enable",
            K::Enable,
            A::WatchUrl,
            "Enable a watch that was specifically disabled.",
        ),
        CommandSpec::new("disable", K::Disable, A::WatchUrl, "Disable a watch for a specific URL."),
        CommandSpec::new("unwatch", K::Unwatch, A::WatchUrl, "Stop watching a URL."),
        CommandSpec::new("match", K::Match, A::WatchUrl, "Ensure a pattern matches for a URL.").with_full(
            "Add a positive regex match for a URL.\n\nUsage:  match http://www.example.com/ working",
        ),
        CommandSpec::new(
            "negmatch",
            K::NegMatch,
            A::WatchUrl,
            "Ensure a pattern does not match for a URL.",
        )
        .with_full("Add a negative regex match for a URL.\n\nUsage:  negmatch http://www.example.com/ hac?[kx]ed.by"),
        CommandSpec::new("inspect", K::Inspect, A::WatchUrl, "Inspect matches for a given URL."),
        CommandSpec::new("clear_matches", K::ClearMatches, A::WatchUrl, "Clear all matches for a URL."),
        CommandSpec::new("status", K::Status, A::Optional, "Check your status."),
        CommandSpec::new("search", K::Search, A::Required, "Search the web.").with_full(
            "Search the web and reply with the top results.\n\nUsage:  search rust async runtime",
        ),
    ]
}
