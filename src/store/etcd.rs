use async_trait::async_trait;
use etcd_client::{Client, DeleteOptions, GetOptions};
use log::info;

use super::{KvBackend, KvPair};
use crate::error::Result;

/// etcd v3 backend. The client is cheap to clone; each call works on its
/// own handle so the backend can be shared across tasks.
#[derive(Clone)]
pub struct EtcdBackend {
    client: Client,
}

impl EtcdBackend {
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        info!("Connecting to etcd at {:?}", endpoints);
        let client = Client::connect(endpoints, None).await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl KvBackend for EtcdBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut client = self.client.clone();
        client.put(key, value, None).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        let mut pairs = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            pairs.push(KvPair {
                key: kv.key_str()?.to_string(),
                value: kv.value().to_vec(),
            });
        }
        Ok(pairs)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client.clone();
        client.delete(key, None).await?;
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        let mut client = self.client.clone();
        client
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await?;
        Ok(())
    }
}
