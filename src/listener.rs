//! Mutation listeners: callbacks notified synchronously after a successful
//! persisted mutation, used to drive reactive readers.

use indexmap::IndexMap;

/// The kind of mutation that just completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    Insert,
    Update,
    Merge,
}

/// A registered mutation callback. Implementations must not block and
/// should treat their own panics as a logging concern, not the caller's —
/// the registry catches panics so one broken listener can't stop others
/// from firing.
pub trait Listener: Send + Sync {
    fn notify(&self, kind: MutationKind, id: &str);
}

impl<F> Listener for F
where
    F: Fn(MutationKind, &str) + Send + Sync,
{
    fn notify(&self, kind: MutationKind, id: &str) {
        self(kind, id);
    }
}

/// Registry of listeners keyed by a caller-chosen string. Re-registering an
/// existing key overwrites the previous listener in place; notification
/// order otherwise follows registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: IndexMap<String, Box<dyn Listener>>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, listener: Box<dyn Listener>) {
        self.listeners.insert(key.into(), listener);
    }

    pub fn remove(&mut self, key: &str) {
        self.listeners.shift_remove(key);
    }

    /// Fires every registered listener, in registration order. A listener
    /// that panics is caught and logged; the rest still run.
    pub fn notify_all(&self, kind: MutationKind, id: &str) {
        for (key, listener) in &self.listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.notify(kind, id);
            }));
            if result.is_err() {
                tracing::warn!(listener = %key, %id, "mutation listener panicked");
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
