//! debrief: list, mark and replay recorded training sessions.
//!
//! ## Usage
//!
//! ```bash
//! # Refresh the archive index and list sessions, ana's favorites first
//! debrief sessions --user ana
//!
//! # Mark a session as a favorite (log key + session start time)
//! debrief favorite domainSession12_uId1/domainSession12_uId1.log 1700000000123 --user ana
//!
//! # Replay a session from 90 s in, one JSON message per line
//! debrief replay domainSession12_uId1/domainSession12_uId1.log 1700000000123 --seek 90000
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the default `info` filter.

mod config;
mod replay;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use debrief_index::IndexCache;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, load_config};

#[derive(Parser, Debug)]
#[command(name = "debrief")]
#[command(about = "After-action review of recorded training sessions")]
struct Args {
    /// Config file (default: ~/.config/debrief/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Archive root, overriding the config file
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh the index and list every playable session
    Sessions {
        /// List this user's favorites first
        #[arg(long)]
        user: Option<String>,

        /// Print full session metadata as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Mark or unmark a session as a user's favorite
    Favorite {
        /// Log key, `folder/file` below the archive root
        log: String,

        /// Session start time (epoch ms)
        start: i64,

        #[arg(long)]
        user: String,

        #[arg(long)]
        remove: bool,
    },

    /// Replay one session, printing emitted messages as JSON lines
    Replay {
        /// Log key, `folder/file` below the archive root
        log: String,

        /// Session start time (epoch ms)
        start: i64,

        /// Start this many ms into the session
        #[arg(long)]
        seek: Option<i64>,

        /// Username stamped on replayed messages
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if let Some(root) = args.root {
        config.index.root = root;
    }

    match args.command {
        Command::Sessions { user, json } => list_sessions(&config, user.as_deref(), json),
        Command::Favorite {
            log,
            start,
            user,
            remove,
        } => set_favorite(&config, &log, start, &user, !remove),
        Command::Replay { log, start, seek, user } => {
            if user.is_some() {
                config.playback.username = user;
            }
            let cache = IndexCache::new(config.index.clone());
            let metadata = replay::find_indexed(&cache, &log, start)?;
            replay::replay(&config, &metadata, seek).await
        }
    }
}

fn list_sessions(config: &Config, user: Option<&str>, json: bool) -> Result<()> {
    let cache = IndexCache::new(config.index.clone());
    let sessions = cache.all_sessions_sorted(user)?;
    for meta in &sessions {
        if json {
            println!("{}", serde_json::to_string(meta)?);
            continue;
        }
        let favorite = if user.is_some_and(|u| meta.is_favorite_of(u)) { "*" } else { " " };
        let patched = if meta.log_patch_file().is_some() { "patched" } else { "" };
        println!(
            "{favorite} {:>15} {:>15}  {:<32} {} {patched}",
            meta.start_time(),
            meta.end_time(),
            meta.session().name_of_session,
            meta.log_file(),
        );
    }
    tracing::info!(count = sessions.len(), "listed sessions");
    Ok(())
}

fn set_favorite(config: &Config, log: &str, start: i64, user: &str, favorite: bool) -> Result<()> {
    let cache = IndexCache::new(config.index.clone());
    let mut metadata = replay::find_indexed(&cache, log, start)?;
    if !metadata.set_favorite(user, favorite) {
        tracing::info!("favorite unchanged");
        return Ok(());
    }
    if !cache.update_one(metadata)? {
        anyhow::bail!("session {log} @ {start} disappeared from the index");
    }
    tracing::info!(log, start, user, favorite, "updated favorite");
    Ok(())
}
