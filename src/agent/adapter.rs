//! The execution-adapter boundary (spec.md §6): the core never calls into
//! the host interpreter directly, only through this narrow, non-blocking
//! interface. `EchoAdapter` is a minimal stand-in used by `main.rs` and the
//! tests so the crate is exercisable without wiring up a real interpreter.

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterCall {
    pub call_id: u64,
    pub function: String,
    pub args_json: String,
    pub instance: Option<String>,
}

/// Clonable sink the adapter uses to report completion, however many times
/// removed from the dispatching task it actually runs on (spec.md §5).
#[derive(Clone)]
pub struct CompletionSender(mpsc::UnboundedSender<(u64, String)>);

impl CompletionSender {
    pub fn new(sender: mpsc::UnboundedSender<(u64, String)>) -> Self {
        Self(sender)
    }

    /// Must be called exactly once per `AdapterCall` (spec.md §6). A closed
    /// receiver (agent already shut down) is not an error here: the result
    /// is simply abandoned, per spec.md §5's "any still-pending adapter
    /// calls are abandoned" shutdown note.
    pub fn complete(&self, call_id: u64, result: impl Into<String>) {
        let _ = self.0.send((call_id, result.into()));
    }
}

pub trait ExecutionAdapter: Send + Sync {
    fn invoke(&self, call: AdapterCall, completion: CompletionSender);
}

/// Demonstration adapter: every call succeeds immediately with its own
/// arguments echoed back. Stands in for a real host interpreter so the crate
/// has a runnable default.
pub struct EchoAdapter;

impl ExecutionAdapter for EchoAdapter {
    fn invoke(&self, call: AdapterCall, completion: CompletionSender) {
        tokio::spawn(async move {
            completion.complete(call.call_id, call.args_json);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_adapter_reports_its_own_arguments_back() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let adapter = EchoAdapter;
        adapter.invoke(
            AdapterCall {
                call_id: 7,
                function: "f".to_string(),
                args_json: "[1,2]".to_string(),
                instance: None,
            },
            CompletionSender::new(tx),
        );
        let (call_id, result) = rx.recv().await.unwrap();
        assert_eq!(call_id, 7);
        assert_eq!(result, "[1,2]");
    }
}
