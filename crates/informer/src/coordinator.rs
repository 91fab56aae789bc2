//! Per-kind state machine: Listing → Watching → Reconnecting → Listing,
//! with Cancelled reachable from anywhere and GaveUp terminal after the
//! backoff budget is spent. One coordinator task per resource kind; kinds
//! never block each other.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use lookout_core::{ObjectList, ResourceKind};
use lookout_store::StateStore;
use lookout_transport::ApiTransport;

use crate::backoff::Backoff;
use crate::decode::LineDecoder;
use crate::shutdown::Shutdown;
use crate::SyncEvent;

pub(crate) struct WatchCoordinator {
    pub(crate) kind: ResourceKind,
    pub(crate) transport: Arc<dyn ApiTransport>,
    pub(crate) store: StateStore,
    pub(crate) shutdown: Shutdown,
    pub(crate) backoff_base: Duration,
    pub(crate) backoff_max: Duration,
    pub(crate) events: Option<mpsc::Sender<SyncEvent>>,
}

enum CycleEnd {
    Cancelled,
    /// List or watch failed, or the stream ended. `watch_established`
    /// records whether a watch connection was opened this cycle.
    Retry { watch_established: bool },
}

impl WatchCoordinator {
    pub(crate) async fn run(self) {
        let mut backoff = Backoff::new(self.backoff_base, self.backoff_max);
        let mut last_wait: Option<Duration> = None;
        info!(kind = %self.kind.name, "coordinator started");
        loop {
            match self.sync_cycle().await {
                CycleEnd::Cancelled => {
                    info!(kind = %self.kind.name, "coordinator cancelled");
                    return;
                }
                CycleEnd::Retry { watch_established } => {
                    if watch_established {
                        backoff.reset();
                        last_wait = None;
                    }
                    // The wait is judged only after the attempt it preceded;
                    // the attempt at the ceiling is still made.
                    if last_wait.is_some_and(|w| backoff.exhausted(w)) {
                        error!(kind = %self.kind.name, "backoff ceiling reached; giving up");
                        counter!("informer_gave_up_total", 1, "kind" => self.kind.name.clone());
                        self.emit(SyncEvent::GaveUp { kind: self.kind.name.clone() }).await;
                        return;
                    }
                    let wait = backoff.next_delay();
                    last_wait = Some(wait);
                    counter!("informer_reconnects_total", 1, "kind" => self.kind.name.clone());
                    debug!(kind = %self.kind.name, wait_ms = wait.as_millis() as u64, "reconnect backoff");
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => {
                            info!(kind = %self.kind.name, "coordinator cancelled");
                            return;
                        }
                        _ = sleep(wait) => {}
                    }
                }
            }
        }
    }

    /// One Listing + Watching pass.
    async fn sync_cycle(&self) -> CycleEnd {
        let listed = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return CycleEnd::Cancelled,
            r = self.transport.list(&self.kind) => r,
        };
        let (status, body) = match listed {
            Ok(v) => v,
            Err(e) => {
                warn!(kind = %self.kind.name, error = %e, "list failed");
                return CycleEnd::Retry { watch_established: false };
            }
        };
        if !status.is_success() {
            warn!(kind = %self.kind.name, status = %status, "list returned non-success");
            return CycleEnd::Retry { watch_established: false };
        }
        let list: ObjectList = match serde_json::from_str(&body) {
            Ok(l) => l,
            Err(e) => {
                warn!(kind = %self.kind.name, error = %e, "list body undecodable");
                return CycleEnd::Retry { watch_established: false };
            }
        };
        let resource_version = list.metadata.resource_version.unwrap_or_default();
        let count = self.store.apply_snapshot(&self.kind.name, list.items);
        counter!("informer_relists_total", 1, "kind" => self.kind.name.clone());
        self.emit(SyncEvent::Synced { kind: self.kind.name.clone(), count }).await;

        let opened = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return CycleEnd::Cancelled,
            r = self.transport.watch(&self.kind, &resource_version) => r,
        };
        let mut stream = match opened {
            Ok(s) => s,
            Err(e) => {
                warn!(kind = %self.kind.name, error = %e, "watch open failed");
                return CycleEnd::Retry { watch_established: false };
            }
        };
        info!(kind = %self.kind.name, rv = %resource_version, "watch established");

        let mut decoder = LineDecoder::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return CycleEnd::Cancelled,
                c = stream.next() => c,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    let records = match decoder.feed(&bytes) {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(kind = %self.kind.name, error = %e, "undecodable watch frame; restarting stream");
                            return CycleEnd::Retry { watch_established: true };
                        }
                    };
                    for record in records {
                        // A fired shutdown wins over records already decoded.
                        if self.shutdown.is_triggered() {
                            return CycleEnd::Cancelled;
                        }
                        self.store.apply_event(&self.kind.name, &record);
                        counter!("informer_events_applied_total", 1, "kind" => self.kind.name.clone());
                        self.emit(SyncEvent::Applied {
                            kind: self.kind.name.clone(),
                            record,
                        })
                        .await;
                    }
                }
                Some(Err(e)) => {
                    debug!(kind = %self.kind.name, error = %e, "watch stream error");
                    return CycleEnd::Retry { watch_established: true };
                }
                None => {
                    debug!(kind = %self.kind.name, "watch stream closed");
                    return CycleEnd::Retry { watch_established: true };
                }
            }
        }
    }

    /// Best-effort notification; never outlives a fired shutdown.
    async fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {}
                _ = tx.send(event) => {}
            }
        }
    }
}
