use std::sync::Arc;

use crate::error::{Error, Result};
use crate::runtime::ContainerRuntime;
use crate::types::AddressRecord;

/// Id weave reports for the host's own exposed address.
pub const EXPOSE_SENTINEL: &str = "weave:expose";
const SENTINEL_PREFIX: &str = "weave:";

/// Fills in [`AddressRecord::name`] from the owning container.
pub struct NameResolver {
    runtime: Arc<dyn ContainerRuntime>,
}

impl NameResolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn resolve(&self, mut record: AddressRecord) -> Result<AddressRecord> {
        if record.id == EXPOSE_SENTINEL {
            record.name = record.id[SENTINEL_PREFIX.len()..].to_string();
            return Ok(record);
        }
        let name = self
            .runtime
            .inspect_name(&record.id)
            .await
            .map_err(|e| match e {
                Error::Resolve { .. } => e,
                other => Error::Resolve {
                    id: record.id.clone(),
                    reason: other.to_string(),
                },
            })?;
        record.name = name.strip_prefix('/').unwrap_or(&name).to_string();
        Ok(record)
    }
}
