//! Lookout informer – keeps the local cluster cache synchronized with the
//! remote API via list-then-watch, one coordinator task per resource kind.
//!
//! All coordinators share one [`StateStore`] (atomic whole-value swaps, no
//! reader locks) and one [`Shutdown`] signal; a permanent failure on one
//! kind never blocks another.

#![forbid(unsafe_code)]

mod backoff;
mod coordinator;
mod decode;
mod shutdown;

pub use decode::{DecodeError, LineDecoder};
pub use shutdown::Shutdown;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use lookout_core::{ChangeRecord, ResourceKind};
use lookout_store::StateStore;
use lookout_transport::ApiTransport;

use coordinator::WatchCoordinator;

#[derive(Debug, thiserror::Error)]
pub enum InformerError {
    /// A requested kind name is not in the configured table.
    #[error("unknown resource kind: {0}")]
    UnknownKind(String),
}

/// Progress notifications observers can tap into at start time.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A kind finished (re)listing; its cache now holds `count` objects.
    Synced { kind: String, count: usize },
    /// One change record was applied to the store.
    Applied { kind: String, record: ChangeRecord },
    /// The kind spent its reconnect budget; its cache stays as last seen.
    GaveUp { kind: String },
}

/// Resolve requested kind names against the discovery-provided table.
/// Unknown names are a setup-time error; duplicates resolve once.
pub fn resolve_kinds(
    table: &[ResourceKind],
    requested: &[String],
) -> Result<Vec<ResourceKind>, InformerError> {
    let mut out: Vec<ResourceKind> = Vec::with_capacity(requested.len());
    for name in requested {
        let kind = table
            .iter()
            .find(|k| &k.name == name)
            .ok_or_else(|| InformerError::UnknownKind(name.clone()))?;
        if !out.iter().any(|k| k.name == kind.name) {
            out.push(kind.clone());
        }
    }
    Ok(out)
}

/// Handle over the running sync engine: the shared store, the shutdown
/// signal, and one task per kind.
pub struct Informer {
    store: StateStore,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl Informer {
    /// Spawn one watch coordinator per kind. `events` is an optional tap
    /// onto sync progress; pass `None` when only the store matters.
    pub fn start(
        transport: Arc<dyn ApiTransport>,
        kinds: Vec<ResourceKind>,
        events: Option<mpsc::Sender<SyncEvent>>,
    ) -> Self {
        let store = StateStore::new();
        let shutdown = Shutdown::new();
        let backoff_base = env_ms("LOOKOUT_BACKOFF_BASE_MS", 500);
        let backoff_max = env_ms("LOOKOUT_BACKOFF_MAX_MS", 8000);
        let mut tasks = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let coordinator = WatchCoordinator {
                kind,
                transport: Arc::clone(&transport),
                store: store.clone(),
                shutdown: shutdown.clone(),
                backoff_base,
                backoff_max,
                events: events.clone(),
            };
            tasks.push(tokio::spawn(coordinator.run()));
        }
        info!(kinds = tasks.len(), "informer started");
        Self { store, shutdown, tasks }
    }

    /// The shared state container; the view collaborator binds here.
    pub fn store(&self) -> StateStore {
        self.store.clone()
    }

    /// The shared shutdown signal.
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Close the signal and wait for every coordinator to unwind.
    pub async fn stop(mut self) {
        self.shutdown.trigger();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "coordinator task aborted");
            }
        }
        info!("informer stopped");
    }
}

fn env_ms(key: &str, default: u64) -> Duration {
    let ms = std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<ResourceKind> {
        vec![
            ResourceKind::new("pods", "/api/v1/namespaces/{namespace}/pods"),
            ResourceKind::new("services", "/api/v1/namespaces/{namespace}/services"),
        ]
    }

    #[test]
    fn resolve_rejects_unknown_kind() {
        let err = resolve_kinds(&table(), &["gizmos".to_string()]).unwrap_err();
        assert!(matches!(err, InformerError::UnknownKind(name) if name == "gizmos"));
    }

    #[test]
    fn resolve_dedups_requests() {
        let kinds =
            resolve_kinds(&table(), &["pods".to_string(), "pods".to_string()]).expect("resolves");
        assert_eq!(kinds.len(), 1);
        assert_eq!(kinds[0].name, "pods");
    }
}
