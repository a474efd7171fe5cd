//! Call correlation (spec.md §4.5 / §5 / §8 property 7): bridges the
//! non-blocking execution adapter back to the MQTT reply it owes. Only the
//! event-loop task touches this map (spec.md §5), so it needs no locking.

use std::collections::HashMap;

use crate::protocol::envelope::{CallOutcome, Envelope};

pub type CallId = u64;

#[derive(Debug)]
pub struct CallCorrelator {
    next_id: CallId,
    pending: HashMap<CallId, Envelope>,
}

impl Default for CallCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl CallCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Strictly increasing, unique for the lifetime of the process (spec.md
    /// §8 property 7); this is the only place `next_id` is touched.
    pub fn register(&mut self, envelope: Envelope) -> CallId {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, envelope);
        id
    }

    /// Resolution order is independent of registration order (spec.md §5);
    /// this is a plain map lookup, not a queue.
    pub fn resolve(&mut self, id: CallId, outcome: CallOutcome) -> Option<Envelope> {
        let envelope = self.pending.remove(&id)?;
        Some(match outcome {
            CallOutcome::Success(value) => envelope.with_result(value),
            CallOutcome::Failure(message) => envelope.with_error(message),
        })
    }

    /// Exposed for observability per spec.md §4.5 ("implementations SHOULD
    /// expose the map size").
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn envelope(reply_topic: &str) -> Envelope {
        Envelope::parse(format!(r#"{{"a":[],"s":"{reply_topic}","i":1}}"#).as_bytes()).unwrap()
    }

    #[test]
    fn call_ids_are_strictly_increasing() {
        let mut correlator = CallCorrelator::new();
        let a = correlator.register(envelope("rep/1"));
        let b = correlator.register(envelope("rep/2"));
        let c = correlator.register(envelope("rep/3"));
        assert!(a < b && b < c);
    }

    #[test]
    fn resolution_order_is_independent_of_registration_order() {
        let mut correlator = CallCorrelator::new();
        let first = correlator.register(envelope("rep/1"));
        let second = correlator.register(envelope("rep/2"));

        let resolved_second = correlator.resolve(second, CallOutcome::Success(Value::Bool(true)));
        assert!(resolved_second.is_some());
        assert_eq!(correlator.pending_count(), 1);

        let resolved_first = correlator.resolve(first, CallOutcome::Failure("oops".to_string()));
        assert!(resolved_first.is_some());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn resolving_an_unknown_id_is_a_no_op() {
        let mut correlator = CallCorrelator::new();
        assert!(correlator.resolve(999, CallOutcome::Success(Value::Null)).is_none());
    }
}
