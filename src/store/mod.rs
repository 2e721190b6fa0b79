//! Key-value store access.
//!
//! [`KvBackend`] is the narrow surface every backend provides; keys are
//! plain `/`-separated paths without a leading slash. [`StoreGateway`]
//! lays address records out on top of it:
//!
//! ```text
//! <namespace>/<hostname>/<name>/ip
//! <namespace>/<hostname>/<name>/mac
//! <namespace>/<hostname>/<name>/id
//! <namespace>/<hostname>/<name>/cidr
//! ```
//!
//! The four leaves are not written atomically. `id` is always written
//! last and a record only counts as present when all four leaves exist,
//! so a partial set left by a crash is rewritten by the next full sync.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use crate::config::KvType;
use crate::error::Result;
use crate::types::{short_id, AddressRecord};

pub mod consul;
pub mod etcd;
pub mod memory;
pub mod zookeeper;

pub use consul::ConsulBackend;
pub use etcd::EtcdBackend;
pub use memory::MemoryBackend;
pub use zookeeper::ZookeeperBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
}

#[async_trait]
pub trait KvBackend: Send + Sync {
    /// `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    /// Every leaf below `prefix`, at any depth.
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>>;
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
    async fn delete_tree(&self, prefix: &str) -> Result<()>;
}

/// Opens the configured backend and makes one read to prove it is reachable.
pub async fn connect(kind: KvType, endpoints: &[String]) -> Result<Arc<dyn KvBackend>> {
    let backend: Arc<dyn KvBackend> = match kind {
        KvType::Etcd => Arc::new(EtcdBackend::connect(endpoints).await?),
        KvType::Consul => Arc::new(ConsulBackend::new(endpoints)?),
        KvType::Zk => Arc::new(ZookeeperBackend::connect(endpoints).await?),
    };
    backend.get("loom-healthcheck").await?;
    Ok(backend)
}

/// Write order. `id` goes last: its presence marks a complete record.
const LEAVES: [&str; 4] = ["ip", "mac", "cidr", "id"];

/// Record-level operations scoped to one host's subtree.
#[derive(Clone)]
pub struct StoreGateway {
    backend: Arc<dyn KvBackend>,
    base: String,
}

impl StoreGateway {
    /// `base` is the host prefix, e.g. `network/weave/node1/`.
    pub fn new(backend: Arc<dyn KvBackend>, base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self { backend, base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn key(&self, name: &str, leaf: &str) -> String {
        format!("{}{}/{}", self.base, name, leaf)
    }

    /// True when `<name>/id` holds exactly `id` and the other three leaves
    /// are present. Read errors count as absent so the caller falls through
    /// to a write, which reports the real error.
    pub async fn exists(&self, name: &str, id: &str) -> bool {
        for leaf in LEAVES.iter().rev() {
            let key = self.key(name, leaf);
            match self.backend.get(&key).await {
                Ok(Some(v)) if *leaf != "id" || v == id.as_bytes() => {}
                Ok(_) => return false,
                Err(e) => {
                    warn!("Failed to read {} from KV: {}", key, e);
                    return false;
                }
            }
        }
        true
    }

    /// Finds the record whose `id` leaf matches the short form of `id`
    /// and returns its name.
    pub async fn exists_by_id(&self, id: &str) -> Result<Option<String>> {
        let wanted = short_id(id);
        for pair in self.backend.list(&self.base).await? {
            let Some(rest) = pair.key.strip_prefix(&self.base) else {
                continue;
            };
            let Some(name) = rest.strip_suffix("/id") else {
                continue;
            };
            if name.is_empty() || name.contains('/') {
                continue;
            }
            let value = String::from_utf8_lossy(&pair.value);
            if short_id(&value) == wanted {
                return Ok(Some(name.to_string()));
            }
        }
        Ok(None)
    }

    /// Writes the four leaves, stopping at the first failure.
    pub async fn upsert(&self, record: &AddressRecord) -> Result<()> {
        let values = [&record.ip, &record.mac, &record.cidr, &record.id];
        for (leaf, value) in LEAVES.iter().zip(values) {
            let key = self.key(&record.name, leaf);
            debug!("PUT {} = {}", key, value);
            self.backend.put(&key, value.as_bytes()).await?;
        }
        Ok(())
    }

    pub async fn remove_by_name(&self, name: &str) -> Result<()> {
        for leaf in LEAVES {
            self.backend.delete(&self.key(name, leaf)).await?;
        }
        Ok(())
    }

    /// Deletes everything under this host's prefix.
    pub async fn purge(&self) -> Result<()> {
        self.backend.delete_tree(&self.base).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> (StoreGateway, MemoryBackend) {
        let mem = MemoryBackend::new();
        let gw = StoreGateway::new(Arc::new(mem.clone()), "network/weave/node1");
        (gw, mem)
    }

    fn web1() -> AddressRecord {
        AddressRecord::new("abc123456789", "aa:bb:cc:dd:ee:ff", "10.0.0.5", "24").with_name("web1")
    }

    #[tokio::test]
    async fn upsert_writes_four_leaves() {
        let (gw, mem) = gateway();
        gw.upsert(&web1()).await.unwrap();

        assert_eq!(mem.get_str("network/weave/node1/web1/ip").as_deref(), Some("10.0.0.5"));
        assert_eq!(mem.get_str("network/weave/node1/web1/cidr").as_deref(), Some("24"));
        assert_eq!(
            mem.get_str("network/weave/node1/web1/mac").as_deref(),
            Some("aa:bb:cc:dd:ee:ff")
        );
        assert_eq!(
            mem.get_str("network/weave/node1/web1/id").as_deref(),
            Some("abc123456789")
        );
        assert_eq!(mem.len(), 4);
    }

    #[tokio::test]
    async fn exists_requires_matching_id() {
        let (gw, _) = gateway();
        assert!(!gw.exists("web1", "abc123456789").await);
        gw.upsert(&web1()).await.unwrap();
        assert!(gw.exists("web1", "abc123456789").await);
        assert!(!gw.exists("web1", "ffffffffffff").await);
    }

    #[tokio::test]
    async fn record_missing_a_leaf_does_not_exist() {
        let (gw, mem) = gateway();
        gw.upsert(&web1()).await.unwrap();
        mem.delete("network/weave/node1/web1/cidr").await.unwrap();
        assert!(!gw.exists("web1", "abc123456789").await);
    }

    #[tokio::test]
    async fn failed_upsert_never_leaves_id_behind() {
        let (gw, mem) = gateway();
        mem.fail_writes_after(2);
        assert!(gw.upsert(&web1()).await.is_err());
        assert!(mem.get_str("network/weave/node1/web1/id").is_none());
        assert!(!gw.exists("web1", "abc123456789").await);
    }

    #[tokio::test]
    async fn exists_by_id_matches_short_form() {
        let (gw, _) = gateway();
        gw.upsert(&web1()).await.unwrap();
        let found = gw
            .exists_by_id("abc123456789aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("web1"));
        assert_eq!(gw.exists_by_id("000000000000").await.unwrap(), None);
    }

    #[tokio::test]
    async fn exists_by_id_ignores_other_leaves() {
        let (gw, mem) = gateway();
        // A mac leaf holding an id-looking value must not match.
        mem.put("network/weave/node1/db/mac", b"abc123456789")
            .await
            .unwrap();
        assert_eq!(gw.exists_by_id("abc123456789").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_by_name_clears_record_only() {
        let (gw, mem) = gateway();
        gw.upsert(&web1()).await.unwrap();
        let db = AddressRecord::new("def123456789", "aa:bb:cc:dd:ee:00", "10.0.0.6", "24")
            .with_name("db");
        gw.upsert(&db).await.unwrap();

        gw.remove_by_name("web1").await.unwrap();
        assert!(mem
            .list("network/weave/node1/web1/")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(mem.len(), 4);
    }

    #[tokio::test]
    async fn purge_is_scoped_to_host() {
        let (gw, mem) = gateway();
        gw.upsert(&web1()).await.unwrap();
        mem.put("network/weave/node2/web9/ip", b"10.0.1.9")
            .await
            .unwrap();

        gw.purge().await.unwrap();
        assert_eq!(mem.len(), 1);
        assert!(mem.get_str("network/weave/node2/web9/ip").is_some());
    }
}
