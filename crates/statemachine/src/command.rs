//! Command envelope carried in log entries and query requests.
//!
//! On the wire a command is a JSON object `{"kind": ..., "key": ..., "value": ...}`.
//! Decoding validates the envelope into the closed [`Command`] enum, so the
//! rest of the state machine never sees a half-formed request.

use bytes::Bytes;
use common::{KvError, KvResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation tag of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Read,
    #[serde(alias = "CREATE")]
    Insert,
    Update,
    Delete,
    #[serde(alias = "KEYSET")]
    Scan,
    Size,
}

impl CommandKind {
    /// Whether commands of this kind leave storage untouched.
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Read | Self::Scan | Self::Size)
    }

    fn addresses_key(self) -> bool {
        matches!(self, Self::Read | Self::Insert | Self::Update | Self::Delete)
    }

    fn carries_value(self) -> bool {
        matches!(self, Self::Insert | Self::Update)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "READ",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Scan => "SCAN",
            Self::Size => "SIZE",
        };
        f.write_str(name)
    }
}

/// A validated key-value command.
///
/// Every command is either applied through the replicated log (mutations) or
/// served locally as a query (reads). Both paths decode the same envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Fetch the value under `key`.
    Read { key: String },
    /// Store `value` under `key`, overwriting any previous value.
    Insert { key: String, value: String },
    /// Replace the value under an existing `key`.
    Update { key: String, value: String },
    /// Remove `key`; succeeds whether or not it exists.
    Delete { key: String },
    /// List keys in order, starting at `start` (inclusive, empty = first key).
    Scan { start: String },
    /// Count the stored keys.
    Size,
}

/// Wire form of a command.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

impl Command {
    pub fn read(key: impl Into<String>) -> Self {
        Self::Read { key: key.into() }
    }

    pub fn insert(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Insert {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn update(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Update {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn scan(start: impl Into<String>) -> Self {
        Self::Scan {
            start: start.into(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Read { .. } => CommandKind::Read,
            Self::Insert { .. } => CommandKind::Insert,
            Self::Update { .. } => CommandKind::Update,
            Self::Delete { .. } => CommandKind::Delete,
            Self::Scan { .. } => CommandKind::Scan,
            Self::Size => CommandKind::Size,
        }
    }

    /// The key this command addresses, if it addresses a single key.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Read { key }
            | Self::Insert { key, .. }
            | Self::Update { key, .. }
            | Self::Delete { key } => Some(key),
            Self::Scan { .. } | Self::Size => None,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.kind().is_read_only()
    }

    /// Parse and validate a command envelope.
    ///
    /// Fails with [`KvError::MalformedCommand`] when the bytes are not a JSON
    /// envelope, the kind is unknown, a required key or value is missing, or
    /// a value is present on a kind that takes none.
    pub fn decode(bytes: &[u8]) -> KvResult<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| KvError::MalformedCommand(e.to_string()))?;
        Self::from_envelope(envelope)
    }

    /// Serialize into the JSON envelope accepted by [`Command::decode`].
    pub fn encode(&self) -> Bytes {
        let envelope = Envelope::from(self);
        // An envelope of plain strings always serializes.
        let bytes = serde_json::to_vec(&envelope).unwrap_or_default();
        Bytes::from(bytes)
    }

    fn from_envelope(envelope: Envelope) -> KvResult<Self> {
        let Envelope { kind, key, value } = envelope;

        if kind.carries_value() && value.is_none() {
            return Err(KvError::MalformedCommand(format!("{kind} requires a value")));
        }
        if !kind.carries_value() && value.is_some() {
            return Err(KvError::MalformedCommand(format!(
                "{kind} does not take a value"
            )));
        }

        let key = key.unwrap_or_default();
        if kind.addresses_key() && key.is_empty() {
            return Err(KvError::MalformedCommand(format!("{kind} requires a key")));
        }
        if kind == CommandKind::Size && !key.is_empty() {
            return Err(KvError::MalformedCommand("SIZE does not take a key".into()));
        }

        let value = value.unwrap_or_default();
        Ok(match kind {
            CommandKind::Read => Self::Read { key },
            CommandKind::Insert => Self::Insert { key, value },
            CommandKind::Update => Self::Update { key, value },
            CommandKind::Delete => Self::Delete { key },
            CommandKind::Scan => Self::Scan { start: key },
            CommandKind::Size => Self::Size,
        })
    }
}

impl From<&Command> for Envelope {
    fn from(command: &Command) -> Self {
        let kind = command.kind();
        let (key, value) = match command {
            Command::Read { key } | Command::Delete { key } => (Some(key.clone()), None),
            Command::Insert { key, value } | Command::Update { key, value } => {
                (Some(key.clone()), Some(value.clone()))
            }
            Command::Scan { start } if start.is_empty() => (None, None),
            Command::Scan { start } => (Some(start.clone()), None),
            Command::Size => (None, None),
        };
        Self { kind, key, value }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { key } | Self::Delete { key } => write!(f, "{} {key}", self.kind()),
            Self::Insert { key, value } | Self::Update { key, value } => {
                write!(f, "{} {key}={value}", self.kind())
            }
            Self::Scan { start } if start.is_empty() => f.write_str("SCAN"),
            Self::Scan { start } => write!(f, "SCAN from {start}"),
            Self::Size => f.write_str("SIZE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn malformed(json: &str) -> String {
        match Command::decode(json.as_bytes()) {
            Err(KvError::MalformedCommand(msg)) => msg,
            other => panic!("expected MalformedCommand for {json}, got {other:?}"),
        }
    }

    #[test]
    fn decodes_every_kind() {
        let cases = [
            (r#"{"kind":"READ","key":"a"}"#, Command::read("a")),
            (
                r#"{"kind":"INSERT","key":"a","value":"1"}"#,
                Command::insert("a", "1"),
            ),
            (
                r#"{"kind":"UPDATE","key":"a","value":"2"}"#,
                Command::update("a", "2"),
            ),
            (r#"{"kind":"DELETE","key":"a"}"#, Command::delete("a")),
            (r#"{"kind":"SCAN"}"#, Command::scan("")),
            (r#"{"kind":"SCAN","key":"m"}"#, Command::scan("m")),
            (r#"{"kind":"SIZE"}"#, Command::Size),
        ];
        for (json, expected) in cases {
            assert_eq!(Command::decode(json.as_bytes()).unwrap(), expected, "{json}");
        }
    }

    #[test]
    fn aliases_decode_to_canonical_kinds() {
        assert_eq!(
            Command::decode(br#"{"kind":"KEYSET"}"#).unwrap(),
            Command::scan("")
        );
        assert_eq!(
            Command::decode(br#"{"kind":"CREATE","key":"k","value":"v"}"#).unwrap(),
            Command::insert("k", "v")
        );
    }

    #[test]
    fn rejects_unparsable_payloads() {
        malformed("");
        malformed("not json");
        malformed(r#"{"key":"a"}"#);
        malformed(r#""READ""#);
        malformed(r#"{"kind":"READ","key":7}"#);
    }

    #[test]
    fn rejects_unknown_fields() {
        let msg = malformed(r#"{"kind":"READ","key":"a","valu":"x"}"#);
        assert!(msg.contains("valu"), "{msg}");
        malformed(r#"{"kind":"SIZE","limit":3}"#);
    }

    #[test]
    fn rejects_unknown_kind() {
        let msg = malformed(r#"{"kind":"FROB","key":"a"}"#);
        assert!(msg.contains("FROB"), "{msg}");
    }

    #[test]
    fn rejects_missing_value() {
        let msg = malformed(r#"{"kind":"INSERT","key":"a"}"#);
        assert_eq!(msg, "INSERT requires a value");
        malformed(r#"{"kind":"UPDATE","key":"a"}"#);
    }

    #[test]
    fn rejects_value_on_kinds_without_one() {
        assert_eq!(
            malformed(r#"{"kind":"READ","key":"a","value":"x"}"#),
            "READ does not take a value"
        );
        malformed(r#"{"kind":"DELETE","key":"a","value":"x"}"#);
        malformed(r#"{"kind":"SIZE","value":"x"}"#);
    }

    #[test]
    fn rejects_missing_or_empty_key() {
        assert_eq!(malformed(r#"{"kind":"READ"}"#), "READ requires a key");
        malformed(r#"{"kind":"DELETE","key":""}"#);
        malformed(r#"{"kind":"INSERT","key":"","value":"1"}"#);
        malformed(r#"{"kind":"SIZE","key":"a"}"#);
    }

    #[test]
    fn empty_value_is_allowed() {
        assert_eq!(
            Command::decode(br#"{"kind":"INSERT","key":"a","value":""}"#).unwrap(),
            Command::insert("a", "")
        );
    }

    #[test]
    fn encode_is_accepted_by_decode() {
        for cmd in [
            Command::insert("user:1", "alice"),
            Command::scan(""),
            Command::scan("user:"),
            Command::Size,
        ] {
            assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd);
        }
    }

    #[test]
    fn encode_omits_absent_fields() {
        assert_eq!(&Command::Size.encode()[..], br#"{"kind":"SIZE"}"#);
        assert_eq!(
            &Command::delete("a").encode()[..],
            br#"{"kind":"DELETE","key":"a"}"#
        );
    }

    #[test]
    fn read_only_kinds() {
        assert!(Command::read("a").is_read_only());
        assert!(Command::scan("").is_read_only());
        assert!(Command::Size.is_read_only());
        assert!(!Command::insert("a", "1").is_read_only());
        assert!(!Command::update("a", "1").is_read_only());
        assert!(!Command::delete("a").is_read_only());
    }

    #[test]
    fn display_describes_the_command() {
        assert_eq!(Command::insert("a", "1").to_string(), "INSERT a=1");
        assert_eq!(Command::delete("a").to_string(), "DELETE a");
        assert_eq!(Command::scan("m").to_string(), "SCAN from m");
        assert_eq!(CommandKind::Size.to_string(), "SIZE");
    }
}
