//! Lookout store – the shared cluster state container.
//!
//! Every mutation is a whole-value read-modify-write on an `ArcSwap`, so
//! readers load a consistent snapshot at any time without locking and never
//! observe a partially-applied snapshot or event.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use lookout_core::{object_name, ChangeRecord, ClusterState, EventKind, KindState};

/// Cloneable handle onto the cached cluster view. Writers are the per-kind
/// coordinators; readers are arbitrary observers (the external view binds
/// to `snapshot`/`get` plus `apply_event` for local speculative mutations,
/// which the next snapshot supersedes without error).
#[derive(Clone, Default)]
pub struct StateStore {
    state: Arc<ArcSwap<ClusterState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, atomically loaded. The returned snapshot is immutable
    /// and stays coherent however long the caller holds it.
    pub fn snapshot(&self) -> Arc<ClusterState> {
        self.state.load_full()
    }

    pub fn get(&self, kind: &str, name: &str) -> Option<serde_json::Value> {
        self.state.load().get(kind).and_then(|m| m.get(name)).cloned()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.state.load().get(kind).map(|m| m.len()).unwrap_or(0)
    }

    /// Replace the entire mapping for `kind` with a freshly listed item set,
    /// keyed by each item's declared name. Items without a name are skipped.
    pub fn apply_snapshot(&self, kind: &str, items: Vec<serde_json::Value>) -> usize {
        let mut fresh = KindState::default();
        for item in items {
            match object_name(&item) {
                Some(name) => {
                    fresh.insert(name.to_string(), item);
                }
                None => warn!(kind, "snapshot item without metadata.name; skipped"),
            }
        }
        let count = fresh.len();
        self.state.rcu(|cur| {
            let mut next: ClusterState = (**cur).clone();
            next.insert(kind.to_string(), fresh.clone());
            next
        });
        debug!(kind, count, "snapshot applied");
        count
    }

    /// Apply one decoded change record. Added/Modified upsert, Deleted
    /// removes (absent keys are a no-op), Unknown leaves state untouched.
    pub fn apply_event(&self, kind: &str, record: &ChangeRecord) {
        match record.kind {
            EventKind::Added | EventKind::Modified => {
                let Some(object) = record.object.clone() else {
                    warn!(kind, name = %record.name, "add/modify without payload; skipped");
                    return;
                };
                self.state.rcu(|cur| {
                    let mut next: ClusterState = (**cur).clone();
                    next.entry(kind.to_string())
                        .or_default()
                        .insert(record.name.clone(), object.clone());
                    next
                });
            }
            EventKind::Deleted => {
                self.state.rcu(|cur| {
                    let mut next: ClusterState = (**cur).clone();
                    if let Some(objects) = next.get_mut(kind) {
                        objects.remove(&record.name);
                    }
                    next
                });
            }
            EventKind::Unknown => {
                debug!(kind, name = %record.name, "unknown event type; state unchanged");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> serde_json::Value {
        serde_json::json!({ "metadata": { "name": name }, "spec": {} })
    }

    fn added(name: &str) -> ChangeRecord {
        ChangeRecord { kind: EventKind::Added, name: name.into(), object: Some(doc(name)) }
    }

    fn deleted(name: &str) -> ChangeRecord {
        ChangeRecord { kind: EventKind::Deleted, name: name.into(), object: None }
    }

    #[test]
    fn snapshot_then_delete() {
        let store = StateStore::new();
        store.apply_snapshot("pods", vec![doc("a"), doc("b"), doc("c")]);
        assert_eq!(store.count("pods"), 3);

        store.apply_event("pods", &deleted("b"));
        assert_eq!(store.count("pods"), 2);
        assert!(store.get("pods", "a").is_some());
        assert!(store.get("pods", "b").is_none());
        assert!(store.get("pods", "c").is_some());
    }

    #[test]
    fn add_then_delete_leaves_absent() {
        let store = StateStore::new();
        store.apply_event("pods", &added("x"));
        assert!(store.get("pods", "x").is_some());
        store.apply_event("pods", &deleted("x"));
        assert!(store.get("pods", "x").is_none());
    }

    #[test]
    fn delete_absent_is_noop() {
        let store = StateStore::new();
        store.apply_snapshot("pods", vec![doc("a")]);
        let before = store.snapshot();
        store.apply_event("pods", &deleted("ghost"));
        assert_eq!(*before, *store.snapshot());
    }

    #[test]
    fn unknown_event_leaves_state_unchanged() {
        let store = StateStore::new();
        store.apply_snapshot("pods", vec![doc("a")]);
        let before = store.snapshot();
        let rec = ChangeRecord { kind: EventKind::Unknown, name: "a".into(), object: Some(doc("a2")) };
        store.apply_event("pods", &rec);
        assert_eq!(*before, *store.snapshot());
    }

    #[test]
    fn add_without_payload_is_skipped() {
        let store = StateStore::new();
        let rec = ChangeRecord { kind: EventKind::Added, name: "x".into(), object: None };
        store.apply_event("pods", &rec);
        assert_eq!(store.count("pods"), 0);
    }

    #[test]
    fn kinds_do_not_interfere() {
        let store = StateStore::new();
        store.apply_snapshot("pods", vec![doc("a")]);
        store.apply_snapshot("services", vec![doc("svc")]);
        store.apply_event("pods", &deleted("a"));
        assert_eq!(store.count("pods"), 0);
        assert_eq!(store.count("services"), 1);
    }
}
