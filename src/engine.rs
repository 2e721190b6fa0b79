//! Reconciliation of Weave state against the key-value store.
//!
//! A full pass ([`Reconciler::sync_once`]) registers everything weave
//! currently reports. After that, [`Reconciler::run`] reacts to Docker
//! events: each accepted event becomes its own tokio task, so a slow
//! `start` correlation never holds up the event stream.
//!
//! Tasks for the same container are not serialized. A `die` handled
//! before a delayed `start` finishes can leave a stale record behind;
//! the next full sync is what cleans that up.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::probe::Prober;
use crate::resolve::NameResolver;
use crate::retry::RetryPolicy;
use crate::runtime::ContainerRuntime;
use crate::store::StoreGateway;
use crate::types::{short_id, AddressRecord, EventStatus, LifecycleEvent};

const EVENT_BUFFER: usize = 128;

/// Everything a unit of work needs, built once at startup.
pub struct Context {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub store: StoreGateway,
    pub prober: Prober,
    pub resolver: NameResolver,
    pub retry: RetryPolicy,
    pub self_image_marker: String,
}

/// How a single unit of work ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Registered { name: String },
    AlreadyRegistered { name: String },
    Removed { name: String },
    /// `die` for a container that had no record.
    NotRegistered,
    /// `start` whose container never showed up in weave within the budget.
    Abandoned,
    Failed(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub registered: usize,
    pub skipped: usize,
    /// Records dropped because their name could not be resolved.
    pub unresolved: usize,
}

#[derive(Clone)]
pub struct Reconciler {
    ctx: Arc<Context>,
}

impl Reconciler {
    pub fn new(ctx: Context) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Registers every address weave reports right now. With `reset`, the
    /// host's subtree is wiped first. A store write failure aborts the pass.
    pub async fn sync_once(&self, reset: bool) -> Result<SyncReport> {
        if reset {
            info!("Removing previous entries from KV");
            self.ctx.store.purge().await?;
        }

        info!("Scanning Weave");
        let mut report = SyncReport::default();
        for record in self.ctx.prober.probe().await {
            let record = match self.ctx.resolver.resolve(record).await {
                Ok(r) => r,
                Err(e) => {
                    error!("{}", e);
                    report.unresolved += 1;
                    continue;
                }
            };
            debug!(
                "Found Weave address for {}: ip={} cidr={} id={} mac={}",
                record.name, record.ip, record.cidr, record.id, record.mac
            );
            if self.ctx.store.exists(&record.name, &record.id).await {
                info!("Skipping {} because it is already in the KV store", record.name);
                report.skipped += 1;
                continue;
            }
            info!("Adding {} to KV store", record.name);
            self.ctx.store.upsert(&record).await?;
            report.registered += 1;
        }
        info!(
            "Finished scanning Weave: {} added, {} skipped, {} unresolved",
            report.registered, report.skipped, report.unresolved
        );
        Ok(report)
    }

    /// Whether an event should start a unit of work. Our own probe
    /// containers are ignored, as is anything but `start` and `die`.
    pub fn accepts(&self, event: &LifecycleEvent) -> bool {
        let marker = &self.ctx.self_image_marker;
        // An empty marker would match every image; treat it as unset.
        if !marker.is_empty() && event.from.contains(marker.as_str()) {
            return false;
        }
        matches!(event.status, EventStatus::Start | EventStatus::Die)
    }

    /// Spawns a task for an accepted event and returns its handle without
    /// waiting on it.
    pub fn dispatch(&self, event: LifecycleEvent) -> Option<JoinHandle<Outcome>> {
        if !self.accepts(&event) {
            return None;
        }
        debug!(
            "Received Docker event {:?} from {} ({})",
            event.status,
            event.from,
            event.short_id()
        );
        let this = self.clone();
        let LifecycleEvent { id, status, .. } = event;
        let task = match status {
            EventStatus::Start => tokio::spawn(async move { this.handle_start(&id).await }),
            EventStatus::Die => tokio::spawn(async move { this.handle_die(&id).await }),
            EventStatus::Other(_) => return None,
        };
        Some(task)
    }

    /// Polls weave until it reports `id`, then registers it.
    pub async fn handle_start(&self, id: &str) -> Outcome {
        let sid = short_id(id);
        let found = self
            .ctx
            .retry
            .poll(|_| self.find_in_weave(sid))
            .await;
        let Some(record) = found else {
            warn!("[{}] Never appeared in Weave, giving up", sid);
            return Outcome::Abandoned;
        };

        let record = match self.ctx.resolver.resolve(record).await {
            Ok(r) => r,
            Err(e) => {
                error!("[{}] {}", sid, e);
                return Outcome::Failed(e.to_string());
            }
        };

        if self.ctx.store.exists(&record.name, &record.id).await {
            info!(
                "[{}] Skipping {} because it is already in the KV store",
                sid, record.name
            );
            return Outcome::AlreadyRegistered { name: record.name };
        }

        info!("[{}] Adding to KV store as {}", sid, record.name);
        match self.ctx.store.upsert(&record).await {
            Ok(()) => Outcome::Registered { name: record.name },
            Err(e) => {
                error!("[{}] Failed to register {}: {}", sid, record.name, e);
                Outcome::Failed(e.to_string())
            }
        }
    }

    async fn find_in_weave(&self, sid: &str) -> Option<AddressRecord> {
        debug!("[{}] Scanning Weave", sid);
        let found = self
            .ctx
            .prober
            .probe()
            .await
            .into_iter()
            .find(|r| r.id == sid);
        if found.is_none() {
            debug!("[{}] No match found in Weave", sid);
        }
        found
    }

    /// Removes the record registered for `id`, if any. No retries: a dead
    /// container that was ever registered is already in the store.
    pub async fn handle_die(&self, id: &str) -> Outcome {
        let sid = short_id(id);
        info!("[{}] Removing from KV", sid);
        let name = match self.ctx.store.exists_by_id(sid).await {
            Ok(Some(name)) => name,
            Ok(None) => {
                info!("[{}] Not found in KV, nothing to remove", sid);
                return Outcome::NotRegistered;
            }
            Err(e) => {
                error!("[{}] Failed to look up record: {}", sid, e);
                return Outcome::Failed(e.to_string());
            }
        };
        match self.ctx.store.remove_by_name(&name).await {
            Ok(()) => {
                info!("[{}] Removed {} from KV", sid, name);
                Outcome::Removed { name }
            }
            Err(e) => {
                error!("[{}] Failed to remove {}: {}", sid, name, e);
                Outcome::Failed(e.to_string())
            }
        }
    }

    /// Consumes Docker events until the runtime's stream ends for good.
    pub async fn run(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let runtime = Arc::clone(&self.ctx.runtime);
        let watcher = tokio::spawn(async move { runtime.watch_events(tx).await });

        self.consume(rx).await;

        match watcher.await {
            Ok(result) => result,
            Err(e) => Err(Error::Task(e.to_string())),
        }
    }

    /// Dispatches every event from `rx`. Returns once the sender side is gone.
    pub async fn consume(&self, mut rx: mpsc::Receiver<LifecycleEvent>) {
        while let Some(event) = rx.recv().await {
            // Fire and forget: the task logs its own outcome.
            let _ = self.dispatch(event);
        }
        warn!("Docker event stream closed");
    }
}
