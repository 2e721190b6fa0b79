use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Key-value store backends the bridge can write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KvType {
    Consul,
    Etcd,
    Zk,
}

/// How to launch the discovery tool. Mirrors the subset of a Docker
/// container spec that `weave ps` needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProbeProfile {
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub network_mode: String,
    pub privileged: bool,
}

impl Default for ProbeProfile {
    fn default() -> Self {
        Self {
            image: "weaveworks/weaveexec:1.0.2".into(),
            cmd: vec!["--local".into(), "ps".into()],
            env: vec!["PROCFS=/hostproc".into()],
            binds: vec![
                "/var/run/docker.sock:/var/run/docker.sock".into(),
                "/proc:/hostproc".into(),
            ],
            network_mode: "host".into(),
            privileged: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub kv_type: KvType,
    pub kv_urls: Vec<String>,
    /// Root of the key tree; records land under `<namespace>/<hostname>/`.
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Wipe this host's subtree before the first sync.
    pub reset: bool,
    pub verbose: bool,
    pub probe: ProbeProfile,
    /// Events from images containing this string are our own probes.
    pub self_image_marker: String,
    pub retry_attempts: u32,
    pub retry_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kv_type: KvType::Consul,
            kv_urls: vec!["127.0.0.1:8500".into()],
            namespace: "network/weave".into(),
            hostname: None,
            reset: false,
            verbose: false,
            probe: ProbeProfile::default(),
            self_image_marker: "weaveexec".into(),
            retry_attempts: 20,
            retry_interval_ms: 500,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::figment()
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("loom.toml"))
            .merge(Json::file("loom.json"))
            .merge(Env::prefixed("LOOM_"))
    }

    /// Hostname used in the key prefix: configured value, else `HOSTNAME`,
    /// else the kernel hostname.
    pub fn resolve_hostname(&self) -> anyhow::Result<String> {
        if let Some(h) = self.hostname.as_ref().filter(|h| !h.is_empty()) {
            return Ok(h.clone());
        }
        if let Ok(h) = std::env::var("HOSTNAME") {
            if !h.is_empty() {
                return Ok(h);
            }
        }
        let h = std::fs::read_to_string("/proc/sys/kernel/hostname")
            .map_err(|e| anyhow::anyhow!("Unable to determine hostname: {}", e))?;
        Ok(h.trim().to_string())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.retry_attempts,
            Duration::from_millis(self.retry_interval_ms),
        )
    }

    /// Base key for this host, always ending in `/`.
    pub fn base_key(&self, hostname: &str) -> String {
        format!("{}/{}/", self.namespace.trim_end_matches('/'), hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_weave_setup() {
        let cfg = Config::default();
        assert_eq!(cfg.kv_type, KvType::Consul);
        assert_eq!(cfg.kv_urls, vec!["127.0.0.1:8500".to_string()]);
        assert_eq!(cfg.retry_attempts, 20);
        assert_eq!(cfg.probe.image, "weaveworks/weaveexec:1.0.2");
        assert_eq!(cfg.probe.cmd, vec!["--local", "ps"]);
    }

    #[test]
    fn base_key_joins_namespace_and_host() {
        let mut cfg = Config::default();
        assert_eq!(cfg.base_key("node1"), "network/weave/node1/");
        cfg.namespace = "custom/".into();
        assert_eq!(cfg.base_key("node1"), "custom/node1/");
    }

    #[test]
    fn configured_hostname_wins() {
        let cfg = Config {
            hostname: Some("fixed".into()),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_hostname().unwrap(), "fixed");
    }

    #[test]
    fn file_and_env_layers_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "loom.toml",
                r#"
                    kv_type = "etcd"
                    kv_urls = ["http://10.0.0.1:2379"]
                "#,
            )?;
            jail.set_env("LOOM_NAMESPACE", "overlay");
            let cfg = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(cfg.kv_type, KvType::Etcd);
            assert_eq!(cfg.kv_urls, vec!["http://10.0.0.1:2379".to_string()]);
            assert_eq!(cfg.namespace, "overlay");
            assert_eq!(cfg.retry_interval_ms, 500);
            Ok(())
        });
    }
}
