//! Command-line interface. Flags override values from the config layers.

use clap::{Parser, Subcommand};

use crate::config::{Config, KvType};

/// Loom -- Weave KV bridge.
#[derive(Parser, Debug)]
#[command(name = "loom", version, about, long_about = None)]
pub struct Cli {
    /// KV backend type.
    #[arg(long = "kvtype", env = "KV_TYPE", global = true)]
    pub kv_type: Option<KvType>,

    /// KV store endpoints, comma separated.
    #[arg(long = "kvurl", env = "KV_URL_LIST", value_delimiter = ',', global = true)]
    pub kv_urls: Vec<String>,

    /// Remove previous values before updating.
    #[arg(long = "rm", global = true)]
    pub reset: bool,

    /// Enable verbose (debug) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Update KV backend and exit.
    Onetime,
    /// Continuously update KV backend.
    Daemon,
}

impl Cli {
    /// Folds flags that were actually given into `cfg`.
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(kind) = self.kv_type {
            cfg.kv_type = kind;
        }
        if !self.kv_urls.is_empty() {
            cfg.kv_urls = self.kv_urls.clone();
        }
        cfg.reset |= self.reset;
        cfg.verbose |= self.verbose;
    }
}
