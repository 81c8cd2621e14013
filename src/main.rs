//! # Whatsup — URL watch bot
//!
//! Usage:
//!   whatsup                          # Run with ~/.whatsup/config.toml
//!   whatsup --config ./bot.toml      # Custom config
//!   whatsup --db /tmp/w.db -t 4      # Override database and worker count

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use whatsup_agent::Bot;
use whatsup_core::WhatsupConfig;
use whatsup_core::traits::Searcher;
use whatsup_db::WatchDb;
use whatsup_scheduler::HttpProber;
use whatsup_tools::DuckDuckGoSearch;

#[derive(Parser)]
#[command(
    name = "whatsup",
    version,
    about = "👀 Whatsup — watches web pages so you don't have to"
)]
struct Cli {
    /// Config file (default: ~/.whatsup/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (overrides general.db)
    #[arg(long)]
    db: Option<String>,

    /// Fetch worker count (overrides general.nthreads)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "whatsup=debug,whatsup_core=debug,whatsup_tools=debug,whatsup_agent=debug,whatsup_scheduler=debug,whatsup_db=debug,whatsup_channels=debug"
    } else {
        "whatsup=info,whatsup_core=info,whatsup_agent=info,whatsup_scheduler=info,whatsup_db=info,whatsup_channels=info,whatsup_tools=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => WhatsupConfig::load_from(path)?,
        None => WhatsupConfig::load()?,
    };
    if let Some(db) = cli.db {
        config.general.db = db;
    }
    if let Some(threads) = cli.threads {
        config.general.nthreads = threads;
    }
    config.validate()?;

    let db_path = config.general.db_path();
    let db = Arc::new(WatchDb::open(&db_path)?);
    let transport = whatsup_channels::create_transport(&config.transport)?;
    let prober = Arc::new(HttpProber::new(config.general.probe_timeout())?);
    let searcher: Option<Arc<dyn Searcher>> = if config.search.enabled {
        Some(Arc::new(DuckDuckGoSearch::new(config.general.probe_timeout())?))
    } else {
        None
    };

    println!("👀 Whatsup v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database:   {}", db_path.display());
    println!("   🔌 Transport:  {} as {}", config.transport.kind, config.transport.jid);
    println!("   🧵 Workers:    {}", config.general.nthreads);
    println!(
        "   ⏰ Checks:     every {}s, stale after {}m",
        config.general.scheduler_interval_secs, config.general.watch_freq
    );
    println!(
        "   🔎 Search:     {}",
        if searcher.is_some() { "enabled" } else { "disabled" }
    );
    println!();

    let mut bot = Bot::new(&config, db, transport, prober, searcher);

    tokio::select! {
        _ = bot.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("🛑 Shutting down");
        }
    }

    let stats = bot.pool().stats();
    tracing::info!("📊 Fetch pool: {}", serde_json::to_string(&stats)?);
    Ok(())
}
