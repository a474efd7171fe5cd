//! Request/reply envelope (spec.md §3) and the adapter result-parsing law of
//! §4.5: everything the dispatch state machine and call correlator need to
//! turn a raw MQTT payload into a pending call, and a raw adapter completion
//! string back into a reply payload.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope must be a JSON object")]
    NotAnObject,
}

/// A request or reply envelope, kept as a raw JSON object so that fields a
/// caller sets beyond the protocol's own (`a`, `s`, `i`) round-trip into the
/// reply untouched: the wire format is additive, never a fixed struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    pub fn parse(payload: &[u8]) -> Result<Self, EnvelopeError> {
        match serde_json::from_slice(payload)? {
            Value::Object(map) => Ok(Envelope(map)),
            _ => Err(EnvelopeError::NotAnObject),
        }
    }

    pub fn reply_topic(&self) -> Option<&str> {
        self.0.get("s").and_then(Value::as_str)
    }

    pub fn args(&self) -> Vec<Value> {
        self.0.get("a").and_then(Value::as_array).cloned().unwrap_or_default()
    }

    pub fn set_context(&mut self, context: impl Into<String>) {
        self.0.insert("c".to_string(), Value::String(context.into()));
    }

    pub fn set_function(&mut self, function: impl Into<String>) {
        self.0.insert("f".to_string(), Value::String(function.into()));
    }

    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.0.remove("e");
        self.0.insert("r".to_string(), result);
        self
    }

    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.0.remove("r");
        self.0.insert("e".to_string(), Value::String(message.into()));
        self
    }

    pub fn to_payload(&self) -> Vec<u8> {
        serde_json::to_vec(&Value::Object(self.0.clone()))
            .expect("an envelope built from parsed JSON always re-serializes")
    }
}

/// The outcome of an adapter completion string, per spec.md §4.5.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Success(Value),
    Failure(String),
}

const ERROR_PREFIX: &str = "__err__";

/// Implements the result-prefix law of spec.md §8 property 8: an `__err__`
/// prefix always means failure; otherwise try JSON, falling back to the raw
/// string so non-JSON textual results still round-trip.
pub fn parse_adapter_result(raw: &str) -> CallOutcome {
    match raw.strip_prefix(ERROR_PREFIX) {
        Some(message) => CallOutcome::Failure(message.to_string()),
        None => match serde_json::from_str::<Value>(raw) {
            Ok(value) => CallOutcome::Success(value),
            Err(_) => CallOutcome::Success(Value::String(raw.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_prefix_takes_precedence_over_json_parsing() {
        assert_eq!(
            parse_adapter_result("__err__divide by zero"),
            CallOutcome::Failure("divide by zero".to_string())
        );
    }

    #[test]
    fn numeric_json_result_is_decoded() {
        assert_eq!(parse_adapter_result("5"), CallOutcome::Success(Value::from(5)));
    }

    #[test]
    fn non_json_text_round_trips_verbatim() {
        assert_eq!(
            parse_adapter_result("not json at all"),
            CallOutcome::Success(Value::String("not json at all".to_string()))
        );
    }

    #[test]
    fn reply_carries_exactly_one_of_r_or_e() {
        let envelope = Envelope::parse(br#"{"a":[],"s":"rep/1","i":1}"#).unwrap();

        let success = envelope.clone().with_result(Value::Bool(true));
        let payload: Value = serde_json::from_slice(&success.to_payload()).unwrap();
        assert!(payload.get("r").is_some());
        assert!(payload.get("e").is_none());

        let failure = envelope.with_error("boom");
        let payload: Value = serde_json::from_slice(&failure.to_payload()).unwrap();
        assert!(payload.get("e").is_some());
        assert!(payload.get("r").is_none());
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(matches!(Envelope::parse(b"not json"), Err(EnvelopeError::Json(_))));
        assert!(matches!(Envelope::parse(b"[1,2,3]"), Err(EnvelopeError::NotAnObject)));
    }
}
