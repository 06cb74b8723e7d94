//! Replay harness: feeds event files through a graph store and reports on
//! the result. Accepts single-event JSON, JSON arrays and NDJSON, from files
//! or directory trees.

use std::{
    collections::HashSet,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::{seq::SliceRandom, thread_rng};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use notegraph::verify::SchnorrVerifier;
use notegraph::{Event, GraphStore, Settings};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "notegraph",
    author,
    version,
    about = "Replay Nostr events through an in-memory graph"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Consume every event found under the given paths.
    Ingest {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Print the thread containing an event, in rendering order.
    Thread {
        id: String,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Ingest, run every eviction sweep and print what is left.
    Prune {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Check signatures on a random sample of events.
    Verify {
        #[arg(long, default_value_t = 1000)]
        sample: usize,
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Replay {
    consumed: usize,
    skipped: usize,
}

/// Execute the selected CLI subcommand, writing the report to `out`.
async fn run(cli: Cli, out: &mut impl Write) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    match cli.command {
        Commands::Ingest { paths } => {
            let store = GraphStore::new(cfg.store_config());
            let replay = replay(&store, &paths)?;
            let stats = store.stats();
            writeln!(
                out,
                "consumed={} skipped={} notes={} users={}",
                replay.consumed,
                replay.skipped,
                stats.notes + stats.addressables,
                stats.users
            )?;
        }
        Commands::Thread { id, paths } => {
            let store = GraphStore::new(cfg.store_config());
            replay(&store, &paths)?;
            let me = cfg.logged_in_accounts.iter().min().cloned();
            let follows = me
                .as_deref()
                .and_then(|me| store.get_user_if_exists(me))
                .map(|u| u.follows())
                .unwrap_or_default();
            for note in store.thread_in_order(&id, me.as_deref(), &follows, unix_now()) {
                writeln!(out, "{}", note.id_hex())?;
            }
        }
        Commands::Prune { paths } => {
            let store = GraphStore::new(cfg.store_config());
            replay(&store, &paths)?;
            let now = unix_now();
            let mut hidden: HashSet<String> = cfg.hidden_authors.clone();
            hidden.extend(store.spam().hidden_authors());
            let removed = store.prune_old_messages(now)
                + store.prune_hidden_events(&hidden)
                + store.prune_expired_events(now)
                + store.prune_replies_and_reactions(&cfg.logged_in_accounts)
                + store.prune_old_addressable_versions();
            store.release_idle();
            let stats = store.stats();
            writeln!(
                out,
                "removed={} notes={} addressables={} users={}",
                removed, stats.notes, stats.addressables, stats.users
            )?;
        }
        Commands::Verify { sample, paths } => {
            let (mut events, _) = load_events(&paths)?;
            events.shuffle(&mut thread_rng());
            let take = sample.min(events.len());
            for ev in events.iter().take(take) {
                SchnorrVerifier
                    .check(ev)
                    .with_context(|| format!("event {}", ev.id))?;
            }
            writeln!(out, "verified={take}")?;
        }
    }
    Ok(())
}

/// Consume everything under `paths`; malformed and rejected events count as
/// skipped.
fn replay(store: &GraphStore, paths: &[String]) -> anyhow::Result<Replay> {
    let (events, malformed) = load_events(paths)?;
    let mut replay = Replay {
        skipped: malformed,
        ..Replay::default()
    };
    for ev in events {
        if store.consume(ev, None, false) {
            replay.consumed += 1;
        } else {
            replay.skipped += 1;
        }
    }
    store.live().flush();
    info!(consumed = replay.consumed, skipped = replay.skipped, "replay finished");
    Ok(replay)
}

/// Parse every event file under `paths`, in path order. Returns the events
/// and the number of entries that did not parse.
fn load_events(paths: &[String]) -> anyhow::Result<(Vec<Event>, usize)> {
    let mut files: Vec<PathBuf> = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walking {path}"))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
    }
    let mut events = Vec::new();
    let mut malformed = 0;
    for file in files {
        let data = fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        malformed += parse_events(&file, &data, &mut events);
    }
    Ok((events, malformed))
}

fn parse_events(file: &Path, data: &str, events: &mut Vec<Event>) -> usize {
    let body = data.trim();
    if body.is_empty() {
        return 0;
    }
    if body.starts_with('[') {
        return match serde_json::from_str::<Vec<Event>>(body) {
            Ok(batch) => {
                events.extend(batch);
                0
            }
            Err(err) => {
                warn!(file = %file.display(), error = %err, "malformed event array");
                1
            }
        };
    }
    if let Ok(ev) = serde_json::from_str::<Event>(body) {
        events.push(ev);
        return 0;
    }
    let mut malformed = 0;
    for (n, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(line) {
            Ok(ev) => events.push(ev),
            Err(err) => {
                warn!(file = %file.display(), line = n + 1, error = %err, "malformed event");
                malformed += 1;
            }
        }
    }
    malformed
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut content = String::new();
    content.push_str("VERIFY_SIG=1\n");
    content.push_str("CHANNEL_MESSAGE_CAP=500\n");
    content.push_str("DM_ROOM_CAP=100\n");
    content.push_str("DM_ROOM_RECENT_DAYS=7\n");
    content.push_str("SPAM_RECENT_CAPACITY=2000\n");
    content.push_str("SPAM_OFFENDER_CAPACITY=1000\n");
    content.push_str("BUNDLE_DELAY_MS=500\n");
    content.push_str("LOGGED_IN_ACCOUNTS=\n");
    content.push_str("HIDDEN_AUTHORS=\n");
    fs::write(env_path, content)?;
    Ok(())
}

#[cfg(not(test))]
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("notegraph=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli, &mut io::stdout().lock()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 9] = [
        "VERIFY_SIG",
        "CHANNEL_MESSAGE_CAP",
        "DM_ROOM_CAP",
        "DM_ROOM_RECENT_DAYS",
        "SPAM_RECENT_CAPACITY",
        "SPAM_OFFENDER_CAPACITY",
        "BUNDLE_DELAY_MS",
        "LOGGED_IN_ACCOUNTS",
        "HIDDEN_AUTHORS",
    ];

    fn clear_vars() {
        for v in VARS {
            std::env::remove_var(v);
        }
    }

    fn write_env(dir: &TempDir, extra: &str) -> String {
        let env_path = dir.path().join(".env");
        fs::write(&env_path, format!("VERIFY_SIG=0\n{extra}")).unwrap();
        env_path.to_str().unwrap().into()
    }

    fn hex(n: u64) -> String {
        format!("{n:064x}")
    }

    fn line(id: u64, author: char, created_at: u64, tags: &str) -> String {
        format!(
            r#"{{"id":"{}","pubkey":"{}","kind":1,"created_at":{},"tags":{},"content":"post {}"}}"#,
            hex(id),
            author.to_string().repeat(64),
            created_at,
            tags,
            id
        )
    }

    fn write_thread(dir: &TempDir) -> String {
        let root = hex(1);
        let ndjson = [
            line(1, 'a', 10, "[]"),
            line(2, 'b', 11, &format!(r#"[["e","{root}","","root"]]"#)),
            line(3, 'c', 12, &format!(r#"[["e","{root}","","root"],["e","{}","","reply"]]"#, hex(2))),
            "not json".to_string(),
        ]
        .join("\n");
        let events = dir.path().join("events");
        fs::create_dir_all(&events).unwrap();
        fs::write(events.join("thread.ndjson"), ndjson).unwrap();
        events.to_str().unwrap().into()
    }

    async fn output(cli: Cli) -> String {
        let mut out = Vec::new();
        run(cli, &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn ingest_reports_counts() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_vars();
        let dir = TempDir::new().unwrap();
        let env = write_env(&dir, "");
        let events = write_thread(&dir);
        let report = output(Cli {
            env,
            command: Commands::Ingest {
                paths: vec![events],
            },
        })
        .await;
        assert_eq!(report.trim(), "consumed=3 skipped=1 notes=3 users=3");
    }

    #[tokio::test]
    async fn thread_prints_rendering_order() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_vars();
        let dir = TempDir::new().unwrap();
        let env = write_env(&dir, "");
        let events = write_thread(&dir);
        let report = output(Cli {
            env,
            command: Commands::Thread {
                id: hex(3),
                paths: vec![events],
            },
        })
        .await;
        let ids: Vec<&str> = report.lines().collect();
        assert_eq!(ids, vec![hex(1), hex(2), hex(3)]);
    }

    #[tokio::test]
    async fn prune_drops_hidden_authors() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_vars();
        let dir = TempDir::new().unwrap();
        let env = write_env(&dir, &format!("HIDDEN_AUTHORS={}\n", "b".repeat(64)));
        let events = write_thread(&dir);
        let report = output(Cli {
            env,
            command: Commands::Prune {
                paths: vec![events],
            },
        })
        .await;
        assert!(report.starts_with("removed=2 notes=1 "), "{report}");
    }

    #[tokio::test]
    async fn verify_rejects_unsigned_events() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_vars();
        let dir = TempDir::new().unwrap();
        let env = write_env(&dir, "");
        let events = write_thread(&dir);
        let result = run(
            Cli {
                env,
                command: Commands::Verify {
                    sample: 1,
                    paths: vec![events],
                },
            },
            &mut Vec::new(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn creates_default_env() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_vars();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join("conf").join(".env");
        let events = write_thread(&dir);
        let mut out = Vec::new();
        run(
            Cli {
                env: env_path.to_string_lossy().into_owned(),
                command: Commands::Ingest {
                    paths: vec![events],
                },
            },
            &mut out,
        )
        .await
        .unwrap();
        let data = fs::read_to_string(&env_path).unwrap();
        assert!(data.contains("VERIFY_SIG=1"));
        assert!(data.contains("CHANNEL_MESSAGE_CAP=500"));
        // signatures are checked by default, so the unsigned fixtures are skipped
        assert!(String::from_utf8(out).unwrap().starts_with("consumed=0 skipped=4"));
    }
}
