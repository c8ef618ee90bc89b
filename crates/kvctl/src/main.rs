mod entries;
mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use common::ReplicaConfig;
use render::{TableStyleKind, cell, render_table};
use serde::Serialize;
use statemachine::{Bootstrap, Command, KvStateMachine, Outcome, Role, Status};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::{FileStorage, KvStorage};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    // RUST_LOG overrides the default, e.g. RUST_LOG=statemachine=debug
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or(EnvFilter::from("kvctl=info,statemachine=info"));
    tracing_subscriber::FmtSubscriber::builder()
        .with_target(false)
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(name = "kvctl")]
#[command(about = "Inspect and drive a replica's local key-value state", long_about = None)]
struct Args {
    /// Replica data directory (overrides the config file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
    /// JSON replica config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Output format (table or json)
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
    /// Style used for table rendering
    #[arg(long, value_enum, default_value_t = CliTableStyle::Modern)]
    style: CliTableStyle,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Apply committed entries from a JSON-lines file, in order
    Apply {
        /// Path to the entries file
        file: PathBuf,
        /// Apply as the leader, emitting activity records
        #[arg(long)]
        leader: bool,
        /// Take a snapshot once every entry is applied
        #[arg(long)]
        snapshot: bool,
    },
    /// Read the value under a key
    Get { key: String },
    /// List keys in order
    Scan {
        /// First key to include
        #[arg(long, default_value = "")]
        start: String,
    },
    /// Count stored keys
    Size,
    /// Pin the last applied position in a new snapshot marker
    Snapshot,
    /// List snapshot markers, newest first
    Snapshots,
    /// Summarise the replica's data directory
    Status,
    /// Rewrite the storage log with one record per live key
    Compact,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CliTableStyle {
    Modern,
    Ascii,
    Plain,
}

impl From<CliTableStyle> for TableStyleKind {
    fn from(value: CliTableStyle) -> Self {
        match value {
            CliTableStyle::Modern => TableStyleKind::Modern,
            CliTableStyle::Ascii => TableStyleKind::Ascii,
            CliTableStyle::Plain => TableStyleKind::Plain,
        }
    }
}

/// An opened replica: the durable storage and the machine driving it.
struct Replica {
    config: ReplicaConfig,
    storage: Arc<FileStorage>,
    machine: KvStateMachine,
}

impl Replica {
    fn open(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => ReplicaConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ReplicaConfig::default(),
        };
        if let Some(dir) = &args.data_dir {
            config.data_dir = dir.clone();
        }

        let storage = Arc::new(
            FileStorage::open(config.storage_path())
                .with_context(|| format!("failed to open storage in {}", config.data_dir.display()))?,
        );
        let machine = Bootstrap::new(&config)?.initialize(storage.clone())?;
        Ok(Self {
            config,
            storage,
            machine,
        })
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let replica = Replica::open(&args)?;
    let out = Printer {
        format: args.format,
        style: args.style.into(),
    };

    match &args.command {
        Cmd::Apply {
            file,
            leader,
            snapshot,
        } => apply(&replica, &out, file, *leader, *snapshot),
        Cmd::Get { key } => {
            let outcome = replica.machine.query(&Command::read(key.as_str()).encode());
            out.outcomes(&[(None, outcome)])
        }
        Cmd::Scan { start } => scan(&replica, &out, start),
        Cmd::Size => {
            let outcome = replica.machine.query(&Command::Size.encode());
            out.outcomes(&[(None, outcome)])
        }
        Cmd::Snapshot => {
            let marker = replica.machine.take_snapshot()?;
            out.pairs(&[
                ("position", marker.position.to_string()),
                ("path", marker.path.display().to_string()),
            ])
        }
        Cmd::Snapshots => snapshots(&replica, &out),
        Cmd::Status => status(&replica, &out),
        Cmd::Compact => {
            let before = fs::metadata(replica.storage.path())?.len();
            replica.storage.compact()?;
            let after = fs::metadata(replica.storage.path())?.len();
            out.pairs(&[
                ("bytes_before", before.to_string()),
                ("bytes_after", after.to_string()),
            ])
        }
    }
}

fn apply(
    replica: &Replica,
    out: &Printer,
    file: &Path,
    leader: bool,
    snapshot: bool,
) -> Result<()> {
    let entries = entries::read_entries(file)?;
    let role = if leader { Role::Leader } else { Role::Follower };

    let mut results = Vec::with_capacity(entries.len());
    let mut skipped = 0usize;
    for entry in &entries {
        // Entries already covered by the last snapshot would break the
        // applied-index ordering.
        if replica
            .machine
            .last_applied()
            .is_some_and(|applied| entry.index <= applied.index)
        {
            skipped += 1;
            continue;
        }
        let outcome = replica.machine.apply(entry, role);
        results.push((Some(entry.position()), outcome));
    }
    info!(applied = results.len(), skipped, "entries applied");

    if snapshot && !results.is_empty() {
        let marker = replica.machine.take_snapshot()?;
        info!(position = %marker.position, "snapshot taken");
    }
    out.outcomes(&results)
}

fn scan(replica: &Replica, out: &Printer, start: &str) -> Result<()> {
    let outcome = replica.machine.query(&Command::scan(start).encode());
    if outcome.status != Status::Ok {
        return out.outcomes(&[(None, outcome)]);
    }

    let keys: Vec<String> = serde_json::from_str(outcome.payload.as_deref().unwrap_or("[]"))
        .context("SCAN returned an unreadable key list")?;
    let mut rows = Vec::with_capacity(keys.len());
    for key in keys {
        let value = replica.storage.get(&key)?;
        rows.push(KeyValue { key, value });
    }
    out.key_values(&rows)
}

fn snapshots(replica: &Replica, out: &Printer) -> Result<()> {
    let manager = replica.machine.snapshots();
    let rows: Vec<SnapshotRow> = manager
        .list()?
        .into_iter()
        .map(|marker| {
            let (keys, state) = match manager.read_meta(&marker) {
                Ok(meta) => (Some(meta.keys), "ok".to_string()),
                Err(e) => (None, e.to_string()),
            };
            SnapshotRow {
                position: marker.position.to_string(),
                keys,
                state,
                path: marker.path.display().to_string(),
            }
        })
        .collect();
    out.snapshot_rows(&rows)
}

fn status(replica: &Replica, out: &Printer) -> Result<()> {
    let log_bytes = fs::metadata(replica.storage.path()).map(|m| m.len()).unwrap_or(0);
    let markers = replica.machine.snapshots().list()?;
    out.pairs(&[
        ("data_dir", replica.config.data_dir.display().to_string()),
        (
            "last_applied",
            replica
                .machine
                .last_applied()
                .map_or_else(|| "none".to_string(), |p| p.to_string()),
        ),
        ("keys", replica.storage.len()?.to_string()),
        ("log_bytes", log_bytes.to_string()),
        ("snapshots", markers.len().to_string()),
        ("scan_limit", replica.config.scan_limit.to_string()),
    ])
}

#[derive(Serialize)]
struct KeyValue {
    key: String,
    value: Option<String>,
}

#[derive(Serialize)]
struct SnapshotRow {
    position: String,
    keys: Option<usize>,
    state: String,
    path: String,
}

#[derive(Serialize)]
struct AppliedOutcome<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<String>,
    #[serde(flatten)]
    outcome: &'a Outcome,
}

struct Printer {
    format: OutputFormat,
    style: TableStyleKind,
}

impl Printer {
    fn outcomes(&self, outcomes: &[(Option<common::LogPosition>, Outcome)]) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let rows: Vec<_> = outcomes
                    .iter()
                    .map(|(position, outcome)| AppliedOutcome {
                        position: position.map(|p| p.to_string()),
                        outcome,
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
            OutputFormat::Table => {
                let rows = outcomes
                    .iter()
                    .map(|(position, outcome)| {
                        vec![
                            position.map_or_else(|| "-".to_string(), |p| p.to_string()),
                            outcome.status.to_string(),
                            cell(outcome.payload.as_deref()),
                            cell(outcome.message.as_deref()),
                        ]
                    })
                    .collect();
                println!(
                    "{}",
                    render_table(&["Position", "Status", "Payload", "Message"], rows, self.style)
                );
            }
        }
        Ok(())
    }

    fn key_values(&self, rows: &[KeyValue]) -> Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
            OutputFormat::Table => {
                let rows = rows
                    .iter()
                    .map(|kv| vec![kv.key.clone(), cell(kv.value.as_deref())])
                    .collect();
                println!("{}", render_table(&["Key", "Value"], rows, self.style));
            }
        }
        Ok(())
    }

    fn snapshot_rows(&self, rows: &[SnapshotRow]) -> Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
            OutputFormat::Table => {
                let rows = rows
                    .iter()
                    .map(|row| {
                        vec![
                            row.position.clone(),
                            row.keys.map_or_else(|| "-".to_string(), |k| k.to_string()),
                            row.state.clone(),
                            row.path.clone(),
                        ]
                    })
                    .collect();
                println!(
                    "{}",
                    render_table(&["Position", "Keys", "State", "Path"], rows, self.style)
                );
            }
        }
        Ok(())
    }

    fn pairs(&self, pairs: &[(&str, String)]) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            }
            OutputFormat::Table => {
                let rows = pairs
                    .iter()
                    .map(|(k, v)| vec![k.to_string(), v.clone()])
                    .collect();
                println!("{}", render_table(&["Field", "Value"], rows, self.style));
            }
        }
        Ok(())
    }
}
