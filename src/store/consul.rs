//! Consul KV backend over the HTTP API (`/v1/kv/...`).
//!
//! Only the first endpoint is used; Consul agents forward to the servers
//! themselves.

use async_trait::async_trait;
use base64::Engine as _;
use log::info;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::{KvBackend, KvPair};
use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One element of a `?recurse` listing. `Value` is base64 and absent on
/// folder entries.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulEntry {
    key: String,
    value: Option<String>,
}

fn pairs_from_listing(body: &[u8]) -> Result<Vec<KvPair>> {
    let entries: Vec<ConsulEntry> = serde_json::from_slice(body)?;
    entries
        .into_iter()
        .filter(|e| !e.key.ends_with('/'))
        .map(|e| {
            let value = match e.value {
                Some(v) => base64::engine::general_purpose::STANDARD
                    .decode(v)
                    .map_err(|err| Error::Consul(format!("bad value for {}: {}", e.key, err)))?,
                None => Vec::new(),
            };
            Ok(KvPair { key: e.key, value })
        })
        .collect()
}

pub struct ConsulBackend {
    base_url: String,
    client: Client,
}

impl ConsulBackend {
    pub fn new(endpoints: &[String]) -> Result<Self> {
        let endpoint = endpoints
            .first()
            .ok_or_else(|| Error::config("no consul endpoint given"))?;
        let base_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", endpoint.trim_end_matches('/'))
        };
        info!("Using consul at {}", base_url);
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { base_url, client })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base_url, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl KvBackend for ConsulBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = self
            .client
            .get(self.url(key))
            .query(&[("raw", "")])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = resp.error_for_status()?.bytes().await?;
        Ok(Some(body.to_vec()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let body = self
            .client
            .put(self.url(key))
            .body(value.to_vec())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let ok: bool = serde_json::from_slice(&body)?;
        if !ok {
            return Err(Error::Consul(format!("write of {} was rejected", key)));
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let resp = self
            .client
            .get(self.url(prefix))
            .query(&[("recurse", "")])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body = resp.error_for_status()?.bytes().await?;
        pairs_from_listing(&body)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete(self.url(key))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        self.client
            .delete(self.url(prefix))
            .query(&[("recurse", "")])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
