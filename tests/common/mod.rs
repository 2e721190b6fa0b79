//! Shared test doubles: a scripted container runtime and helpers to wire
//! a reconciler over an in-memory store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use loom::config::ProbeProfile;
use loom::probe::Prober;
use loom::resolve::NameResolver;
use loom::retry::RetryPolicy;
use loom::runtime::ContainerRuntime;
use loom::store::{MemoryBackend, StoreGateway};
use loom::types::{ContainerSummary, LifecycleEvent};
use loom::{Context, Error, Reconciler, Result};
use tokio::sync::mpsc;

pub const HOST_BASE: &str = "network/weave/node1/";

/// Runtime whose `weave ps` output follows a script. Once the script runs
/// out, the last entry repeats.
#[derive(Default)]
pub struct ScriptedRuntime {
    outputs: Mutex<Vec<Option<String>>>,
    names: Mutex<HashMap<String, String>>,
    events: Mutex<Vec<LifecycleEvent>>,
    probe_calls: AtomicUsize,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each probe returns the next output; `None` simulates a launch failure.
    pub fn with_outputs(self, outputs: Vec<Option<&str>>) -> Self {
        *self.outputs.lock().unwrap() = outputs
            .into_iter()
            .map(|o| o.map(str::to_string))
            .collect();
        self
    }

    pub fn with_output(self, output: &str) -> Self {
        self.with_outputs(vec![Some(output)])
    }

    pub fn with_container(self, id: &str, name: &str) -> Self {
        self.names
            .lock()
            .unwrap()
            .insert(id.to_string(), format!("/{}", name));
        self
    }

    pub fn with_events(self, events: Vec<LifecycleEvent>) -> Self {
        *self.events.lock().unwrap() = events;
        self
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .names
            .lock()
            .unwrap()
            .iter()
            .map(|(id, name)| ContainerSummary {
                id: id.clone(),
                names: vec![name.clone()],
            })
            .collect())
    }

    async fn inspect_name(&self, id: &str) -> Result<String> {
        self.names
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Resolve {
                id: id.to_string(),
                reason: "no such container".into(),
            })
    }

    async fn run_output(&self, _profile: &ProbeProfile) -> Result<Vec<u8>> {
        let n = self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let outputs = self.outputs.lock().unwrap();
        let out = match outputs.get(n).or_else(|| outputs.last()) {
            Some(o) => o.clone(),
            None => Some(String::new()),
        };
        out.map(String::into_bytes)
            .ok_or_else(|| Error::Task("probe container failed to start".into()))
    }

    async fn watch_events(&self, tx: mpsc::Sender<LifecycleEvent>) -> Result<()> {
        let events = std::mem::take(&mut *self.events.lock().unwrap());
        for event in events {
            if tx.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::fixed(20, Duration::from_millis(500))
}

/// Reconciler over `runtime` and a fresh in-memory store.
pub fn reconciler(runtime: ScriptedRuntime) -> (Reconciler, Arc<ScriptedRuntime>, MemoryBackend) {
    reconciler_with_marker(runtime, "weaveexec")
}

pub fn reconciler_with_marker(
    runtime: ScriptedRuntime,
    marker: &str,
) -> (Reconciler, Arc<ScriptedRuntime>, MemoryBackend) {
    let runtime = Arc::new(runtime);
    let mem = MemoryBackend::new();
    let dyn_runtime: Arc<dyn ContainerRuntime> = runtime.clone();
    let ctx = Context {
        runtime: dyn_runtime.clone(),
        store: StoreGateway::new(Arc::new(mem.clone()), HOST_BASE),
        prober: Prober::new(dyn_runtime.clone(), ProbeProfile::default()),
        resolver: NameResolver::new(dyn_runtime),
        retry: fast_retry(),
        self_image_marker: marker.to_string(),
    };
    (Reconciler::new(ctx), runtime, mem)
}

pub fn key(name: &str, leaf: &str) -> String {
    format!("{}{}/{}", HOST_BASE, name, leaf)
}
