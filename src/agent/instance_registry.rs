//! Instance lifecycle tracking (spec.md §4.4). Purely in-memory bookkeeping;
//! the corresponding MQTT subscribe/unsubscribe calls and `classInfo`
//! republish are driven by `agent::dispatch` and `agent::connection`, which
//! is what keeps the subscription set and this list in lockstep (spec.md §8
//! property 5).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: Vec<String>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instances(&self) -> &[String] {
        &self.instances
    }

    /// No-op success if `name` is already known (spec.md §4.4); the caller
    /// still gets `r: name`, it just shouldn't re-subscribe or republish
    /// `classInfo` since nothing changed.
    pub fn create(&mut self, name: &str) -> CreateOutcome {
        if self.instances.iter().any(|i| i == name) {
            CreateOutcome::AlreadyExists
        } else {
            self.instances.push(name.to_string());
            CreateOutcome::Created
        }
    }

    /// Returns whether `name` was known (and removed). A missing name
    /// returns `false` without touching subscriptions.
    pub fn delete(&mut self, name: &str) -> bool {
        let before = self.instances.len();
        self.instances.retain(|i| i != name);
        self.instances.len() != before
    }
}
