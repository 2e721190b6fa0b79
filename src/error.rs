//! Error types shared by the runtime, store and reconciliation layers.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Docker API failures (launch, inspect, event stream).
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("consul error: {0}")]
    Consul(String),

    #[error("malformed store response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zookeeper error: {0}")]
    Zookeeper(#[from] zookeeper_client::Error),

    /// A container could not be mapped to a name, usually because it
    /// vanished between the probe and the lookup.
    #[error("failed to resolve name for {id}: {reason}")]
    Resolve { id: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Consul(err.to_string())
    }
}
