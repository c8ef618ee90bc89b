//! Committed-entry files for `kvctl apply`.
//!
//! One JSON object per line. Each line carries `term` and `index` and either a
//! structured `command` envelope or a raw `payload` string:
//!
//! ```text
//! {"term": 1, "index": 1, "command": {"kind": "INSERT", "key": "a", "value": "1"}}
//! {"term": 1, "index": 2, "payload": "{\"kind\":\"DELETE\",\"key\":\"a\"}"}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use statemachine::CommittedEntry;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntryLine {
    term: u64,
    index: u64,
    #[serde(default)]
    command: Option<serde_json::Value>,
    #[serde(default)]
    payload: Option<String>,
}

pub fn read_entries(path: &Path) -> Result<Vec<CommittedEntry>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read entries from {}", path.display()))?;
    parse_entries(&text).with_context(|| format!("invalid entries file {}", path.display()))
}

pub fn parse_entries(text: &str) -> Result<Vec<CommittedEntry>> {
    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = parse_line(line).with_context(|| format!("line {}", number + 1))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_line(line: &str) -> Result<CommittedEntry> {
    let parsed: EntryLine = serde_json::from_str(line)?;
    let payload = match (parsed.command, parsed.payload) {
        (Some(command), None) => serde_json::to_vec(&command)?,
        (None, Some(payload)) => payload.into_bytes(),
        (Some(_), Some(_)) => bail!("give either `command` or `payload`, not both"),
        (None, None) => bail!("missing `command` or `payload`"),
    };
    Ok(CommittedEntry::new(parsed.term, parsed.index, payload))
}
