//! Result envelope returned for every applied entry and every query.

use bytes::Bytes;
use common::{KvError, KvResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse result of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    NotFound,
    /// The request was not valid for the path it arrived on.
    Invalid,
    /// The request could not be carried out (bad payload or storage failure).
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::NotFound => "NOT_FOUND",
            Self::Invalid => "INVALID",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Outcome of applying or querying a command.
///
/// Encoded as `{"status": ..., "payload": ..., "message": ...}` with absent
/// fields omitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Outcome {
    /// Create a successful outcome without a payload.
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            payload: None,
            message: None,
        }
    }

    /// Create a successful outcome carrying a payload.
    pub fn ok_with(payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
            ..Self::ok()
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::failed(Status::NotFound, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::failed(Status::Invalid, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::failed(Status::Error, message)
    }

    fn failed(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            payload: None,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Serialize into the JSON envelope. Never fails.
    pub fn encode(&self) -> Bytes {
        match serde_json::to_vec(self) {
            Ok(bytes) => Bytes::from(bytes),
            // Unreachable for a struct of strings; keep the status readable anyway.
            Err(_) => Bytes::from(format!(r#"{{"status":"{}"}}"#, self.status)),
        }
    }

    pub fn decode(bytes: &[u8]) -> KvResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| KvError::MalformedOutcome(e.to_string()))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(payload) = &self.payload {
            write!(f, " {payload}")?;
        }
        if let Some(message) = &self.message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn wire_form_uses_upper_case_status_and_omits_absent_fields() {
        assert_eq!(&Outcome::ok().encode()[..], br#"{"status":"OK"}"#);
        assert_eq!(
            &Outcome::ok_with("1").encode()[..],
            br#"{"status":"OK","payload":"1"}"#
        );
        assert_eq!(
            &Outcome::not_found("no record for key: a").encode()[..],
            br#"{"status":"NOT_FOUND","message":"no record for key: a"}"#
        );
    }

    #[test]
    fn decode_rejects_unknown_status() {
        let err = Outcome::decode(br#"{"status":"MAYBE"}"#).unwrap_err();
        assert!(matches!(err, KvError::MalformedOutcome(_)));
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(Outcome::ok_with("v").to_string(), "OK v");
        assert_eq!(Outcome::error("boom").to_string(), "ERROR (boom)");
    }

    fn arb_status() -> impl Strategy<Value = Status> {
        prop_oneof![
            Just(Status::Ok),
            Just(Status::NotFound),
            Just(Status::Invalid),
            Just(Status::Error),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            status in arb_status(),
            payload in proptest::option::of(".*"),
            message in proptest::option::of(".*"),
        ) {
            let outcome = Outcome { status, payload, message };
            prop_assert_eq!(Outcome::decode(&outcome.encode()).unwrap(), outcome);
        }
    }
}
