//! Dolt - token-budgeted conversation memory CLI
//!
//! The `dolt` command stores conversation records and drives the context
//! engine against a local or remote store.
//!
//! ## Commands
//!
//! - `put`: Store a bindle, leaf or turn record
//! - `rollup`: Summarize existing records into a bindle
//! - `show` / `list`: Inspect stored records and sessions
//! - `hydrate`: Select the newest records that fit the token budget
//! - `evict`: Deactivate the oldest active records down to a target
//! - `assemble`: Render the active context of a session
//! - `snapshot`: Show active-lane counts and token totals

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dolt_core::logging::parse_level;
use dolt_core::{BindleRollup, ContextEngine, DoltConfig, HydrateRequest};
use dolt_state::{DoltStore, Level, MemoryDoltStore, NewRecord, Pointer, SurrealDoltStore};
use serde::Serialize;
use tracing::{info, Level as LogLevel};

#[derive(Parser)]
#[command(name = "dolt")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Token-budgeted hierarchical conversation memory", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store URL (`memory`, `mem://`, `surrealkv://path`, `ws://host`)
    #[arg(long, global = true, env = "DOLT_DB_URL")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a record
    Put {
        #[arg(short, long)]
        session: String,

        /// bindle, leaf or turn
        #[arg(short, long, default_value = "turn")]
        level: Level,

        /// Record text (read from stdin when omitted)
        #[arg(short, long)]
        text: Option<String>,

        /// Read the record text from a file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Event time in epoch milliseconds (default: now)
        #[arg(long)]
        ts: Option<i64>,

        /// Explicit pointer (default: derived from content)
        #[arg(long)]
        pointer: Option<String>,

        /// Token count (default: estimated from the text)
        #[arg(long)]
        tokens: Option<u64>,

        /// Session key, e.g. `agent:main`
        #[arg(long)]
        key: Option<String>,
    },

    /// Roll existing records up into a bindle
    Rollup {
        #[arg(short, long)]
        session: String,

        /// Child pointers (repeat for each child)
        #[arg(long = "child", required = true)]
        children: Vec<String>,

        /// Summary body
        #[arg(short, long)]
        body: String,

        /// Mark the bindle as written at a session reset
        #[arg(long)]
        finalized: bool,

        #[arg(long)]
        pointer: Option<String>,

        #[arg(long)]
        key: Option<String>,
    },

    /// Show one record
    Show {
        pointer: String,
    },

    /// List sessions, or the records of one session
    List {
        #[arg(short, long)]
        session: Option<String>,

        /// Restrict to one level
        #[arg(short, long, requires = "session")]
        level: Option<Level>,
    },

    /// Hydrate the active lanes of a session
    Hydrate {
        #[arg(short, long)]
        session: String,

        #[arg(long)]
        key: Option<String>,

        /// Total token budget (default: from config)
        #[arg(long)]
        budget: Option<f64>,

        /// Tokens reserved for the runtime (default: from config)
        #[arg(long)]
        reserve: Option<f64>,
    },

    /// Evict the oldest active records of one lane
    Evict {
        #[arg(short, long)]
        session: String,

        #[arg(short, long, default_value = "bindle")]
        level: Level,

        /// Token total the lane must fit into
        #[arg(short, long)]
        target: u64,
    },

    /// Render the active context of a session
    Assemble {
        #[arg(short, long)]
        session: String,

        /// Print the structured assembly instead of rendered text
        #[arg(long)]
        structured: bool,
    },

    /// Show active-lane counts and token totals
    Snapshot {
        #[arg(short, long)]
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DoltConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(db) = cli.db {
        config.store.url = Some(db);
    }

    // Setup logging
    let level = if cli.verbose {
        LogLevel::DEBUG
    } else {
        parse_level(&config.logging.level)
    };
    dolt_core::init_tracing(cli.json || config.logging.json, level);

    let store = open_store(config.store.url.as_deref()).await?;
    let engine = ContextEngine::with_tracing_sink(store).with_config(config);

    match cli.command {
        Commands::Put {
            session,
            level,
            text,
            file,
            ts,
            pointer,
            tokens,
            key,
        } => {
            let payload = read_payload(text, file.as_deref())?;
            let mut record = NewRecord::new(
                session,
                level,
                ts.unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
                payload,
            );
            record.pointer = pointer.map(Pointer::from);
            record.token_count = tokens;
            record.session_key = key;
            cmd_put(&engine, record).await
        }
        Commands::Rollup {
            session,
            children,
            body,
            finalized,
            pointer,
            key,
        } => {
            let rollup = BindleRollup {
                session_id: session,
                session_key: key,
                children: children.into_iter().map(Pointer::from).collect(),
                body,
                finalized_at_reset: finalized,
                pointer: pointer.map(Pointer::from),
                token_count: None,
            };
            cmd_rollup(&engine, &rollup).await
        }
        Commands::Show { pointer } => cmd_show(&engine, &pointer).await,
        Commands::List { session, level } => cmd_list(&engine, session.as_deref(), level).await,
        Commands::Hydrate {
            session,
            key,
            budget,
            reserve,
        } => {
            let request = HydrateRequest {
                session_id: session,
                session_key: key,
                token_budget: budget,
                runtime_reserve_tokens: reserve,
                lane_policies: None,
            };
            cmd_hydrate(&engine, request).await
        }
        Commands::Evict {
            session,
            level,
            target,
        } => cmd_evict(&engine, &session, level, target).await,
        Commands::Assemble {
            session,
            structured,
        } => cmd_assemble(&engine, &session, structured).await,
        Commands::Snapshot { session } => cmd_snapshot(&engine, &session).await,
    }
}

/// Open the store named by `url`, or resolve one from the SurrealDB environment.
async fn open_store(url: Option<&str>) -> Result<Arc<dyn DoltStore>> {
    let store: Arc<dyn DoltStore> = match url {
        Some("memory") => Arc::new(MemoryDoltStore::new()),
        Some(url) => Arc::new(
            SurrealDoltStore::connect(url)
                .await
                .with_context(|| format!("Failed to connect to Dolt store at {url}"))?,
        ),
        None => Arc::new(
            SurrealDoltStore::from_env()
                .await
                .context("Failed to connect to Dolt store")?,
        ),
    };
    Ok(store)
}

fn read_payload(text: Option<String>, file: Option<&Path>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read record text from stdin")?;
    Ok(buf)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Store a record and print its pointer
async fn cmd_put(engine: &ContextEngine, record: NewRecord) -> Result<()> {
    let stored = engine
        .put_record(record)
        .await
        .context("Failed to store record")?;
    info!(pointer = %stored.pointer, level = %stored.level, "record stored");

    println!("{}", stored.pointer);
    Ok(())
}

/// Roll records up into a bindle and print its pointer
async fn cmd_rollup(engine: &ContextEngine, rollup: &BindleRollup) -> Result<()> {
    let bindle = engine
        .rollup_bindle(rollup)
        .await
        .context("Failed to roll up bindle")?;

    println!("{}", bindle.pointer);
    Ok(())
}

async fn cmd_show(engine: &ContextEngine, pointer: &str) -> Result<()> {
    let Some(record) = engine.store().get_record(&Pointer::from(pointer)).await? else {
        bail!("Record '{}' not found", pointer);
    };
    print_json(&record)
}

async fn cmd_list(
    engine: &ContextEngine,
    session: Option<&str>,
    level: Option<Level>,
) -> Result<()> {
    let Some(session) = session else {
        let sessions = engine.list_sessions().await?;
        if sessions.is_empty() {
            println!("No sessions found.");
        }
        for session in sessions {
            println!("{}", session);
        }
        return Ok(());
    };

    let levels = match level {
        Some(level) => vec![level],
        None => Level::ALL.to_vec(),
    };
    for level in levels {
        let records = engine
            .store()
            .list_records_by_session(session, level, false)
            .await?;
        for record in records {
            println!(
                "{:<6} {} {:>13} {:>6} tok",
                record.level, record.pointer, record.event_ts_ms, record.token_count
            );
        }
    }
    Ok(())
}

async fn cmd_hydrate(engine: &ContextEngine, request: HydrateRequest) -> Result<()> {
    let result = engine.hydrate(request).await.context("Hydration failed")?;
    print_json(&serde_json::json!({
        "hydrated": result.hydrated,
        "availableTokens": result.available_tokens,
        "budgets": result.budgets,
        "activatedPointers": result.activated_pointers,
        "assembledTokens": result.assembly.total_tokens,
    }))
}

async fn cmd_evict(
    engine: &ContextEngine,
    session: &str,
    level: Level,
    target: u64,
) -> Result<()> {
    let outcome = engine
        .evict(session, level, target)
        .await
        .context("Eviction failed")?;
    print_json(&outcome)
}

async fn cmd_assemble(engine: &ContextEngine, session: &str, structured: bool) -> Result<()> {
    let assembled = engine.assemble(session).await?;
    if structured {
        return print_json(&assembled);
    }
    println!("{}", assembled.render());
    Ok(())
}

async fn cmd_snapshot(engine: &ContextEngine, session: &str) -> Result<()> {
    let snapshot = engine.snapshot(session).await?;
    print_json(&snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    async fn memory_engine() -> ContextEngine {
        ContextEngine::with_tracing_sink(open_store(Some("memory")).await.unwrap())
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_level_and_global_flags() {
        let cli = Cli::try_parse_from([
            "dolt", "evict", "--session", "s1", "--level", "leaf", "--target", "40", "--json",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Commands::Evict { level, target, .. } => {
                assert_eq!(level, Level::Leaf);
                assert_eq!(target, 40);
            }
            _ => panic!("expected evict"),
        }
    }

    #[test]
    fn payload_comes_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("turn.txt");
        std::fs::write(&path, "hello from a file").unwrap();

        assert_eq!(read_payload(None, Some(&path)).unwrap(), "hello from a file");
        assert_eq!(read_payload(Some("inline".into()), None).unwrap(), "inline");
    }

    #[tokio::test]
    async fn put_rollup_hydrate_round() {
        let engine = memory_engine().await;
        for i in 1..=2 {
            let record = NewRecord::new("s1", Level::Turn, i, format!("turn {i}"))
                .with_pointer(format!("turn-{i}"));
            cmd_put(&engine, record).await.unwrap();
        }
        let rollup = BindleRollup {
            session_id: "s1".into(),
            children: vec![Pointer::from("turn-1"), Pointer::from("turn-2")],
            body: "two turns".into(),
            pointer: Some(Pointer::from("bindle-1")),
            ..Default::default()
        };
        cmd_rollup(&engine, &rollup).await.unwrap();

        cmd_hydrate(&engine, HydrateRequest::new("s1")).await.unwrap();
        cmd_snapshot(&engine, "s1").await.unwrap();

        let snapshot = engine.snapshot("s1").await.unwrap();
        assert_eq!(snapshot.bindle.record_count, 1);
        assert_eq!(snapshot.turn.record_count, 2);
    }

    #[tokio::test]
    async fn show_missing_record_fails() {
        let engine = memory_engine().await;
        let err = cmd_show(&engine, "nope").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
