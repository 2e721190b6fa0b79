//! ZooKeeper backend. Store keys map to znode paths with a leading `/`;
//! intermediate znodes are created empty on demand.

use async_trait::async_trait;
use log::info;
use zookeeper_client::{Acls, Client, CreateMode, Error as ZkError};

use super::{KvBackend, KvPair};
use crate::error::Result;

pub struct ZookeeperBackend {
    client: Client,
}

impl ZookeeperBackend {
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let cluster = endpoints.join(",");
        info!("Connecting to zookeeper at {}", cluster);
        let client = Client::connect(&cluster).await?;
        Ok(Self { client })
    }

    async fn create_or_set(&self, path: &str, value: &[u8]) -> Result<()> {
        let options = CreateMode::Persistent.with_acls(Acls::anyone_all());
        match self.client.create(path, value, &options).await {
            Ok(_) => Ok(()),
            Err(ZkError::NodeExists) => {
                self.client.set_data(path, value, None).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_parents(&self, path: &str) -> Result<()> {
        let options = CreateMode::Persistent.with_acls(Acls::anyone_all());
        for parent in ancestors(path) {
            match self.client.create(&parent, &[], &options).await {
                Ok(_) | Err(ZkError::NodeExists) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// All znodes at or below `root`, parents before children.
    async fn walk(&self, root: &str) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut pending = vec![root.to_string()];
        while let Some(path) = pending.pop() {
            let children = match self.client.list_children(&path).await {
                Ok(c) => c,
                Err(ZkError::NoNode) => continue,
                Err(e) => return Err(e.into()),
            };
            for child in children {
                pending.push(format!("{}/{}", path, child));
            }
            found.push(path);
        }
        Ok(found)
    }
}

fn znode(key: &str) -> String {
    format!("/{}", key.trim_matches('/'))
}

/// `/a/b/c` -> `["/a", "/a/b"]`
fn ancestors(path: &str) -> Vec<String> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    (1..parts.len())
        .map(|n| format!("/{}", parts[..n].join("/")))
        .collect()
}

#[async_trait]
impl KvBackend for ZookeeperBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.client.get_data(&znode(key)).await {
            Ok((data, _)) => Ok(Some(data)),
            Err(ZkError::NoNode) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = znode(key);
        self.ensure_parents(&path).await?;
        self.create_or_set(&path, value).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let root = znode(prefix);
        let mut pairs = Vec::new();
        for path in self.walk(&root).await? {
            // Intermediate znodes carry no data of their own.
            if path == root {
                continue;
            }
            match self.client.get_data(&path).await {
                Ok((data, stat)) if stat.num_children == 0 => pairs.push(KvPair {
                    key: path.trim_start_matches('/').to_string(),
                    value: data,
                }),
                Ok(_) | Err(ZkError::NoNode) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(pairs)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.client.delete(&znode(key), None).await {
            Ok(()) | Err(ZkError::NoNode) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        let mut paths = self.walk(&znode(prefix)).await?;
        // Children first.
        paths.reverse();
        for path in paths {
            match self.client.delete(&path, None).await {
                Ok(()) | Err(ZkError::NoNode) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
