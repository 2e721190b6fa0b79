use crate::config::ProbeProfile;
use crate::error::Result;
use crate::types::{ContainerSummary, LifecycleEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod docker;
pub use docker::DockerRuntime;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Running containers on this host.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    /// Declared name of a container, as the runtime reports it (may start with `/`).
    async fn inspect_name(&self, id: &str) -> Result<String>;

    /// Runs a throwaway container to completion and returns its combined
    /// stdout/stderr. The container is force-removed whatever the outcome.
    async fn run_output(&self, profile: &ProbeProfile) -> Result<Vec<u8>>;

    /// Streams container lifecycle events into `tx` until the receiver is dropped.
    async fn watch_events(&self, tx: mpsc::Sender<LifecycleEvent>) -> Result<()>;
}
