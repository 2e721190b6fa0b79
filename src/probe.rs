//! Polls `weave ps` and turns its output into [`AddressRecord`]s.
//!
//! Each call launches a fresh probe container; nothing is cached between
//! polls. Output lines look like:
//!
//! ```text
//! 9a000157e68a c6:7a:e5:41:39:b8 10.2.0.2/16
//! ```

use std::sync::Arc;

use log::{debug, error, warn};

use crate::config::ProbeProfile;
use crate::runtime::ContainerRuntime;
use crate::types::AddressRecord;

pub struct Prober {
    runtime: Arc<dyn ContainerRuntime>,
    profile: ProbeProfile,
}

impl Prober {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, profile: ProbeProfile) -> Self {
        Self { runtime, profile }
    }

    /// Runs the discovery tool once. A failed launch yields no records;
    /// the next poll gets another chance.
    pub async fn probe(&self) -> Vec<AddressRecord> {
        match self.runtime.run_output(&self.profile).await {
            Ok(out) => parse_ps_output(&String::from_utf8_lossy(&out)),
            Err(e) => {
                error!("Weave probe failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Parses `weave ps` output. Lines with fewer than three columns are
/// headers or noise and are skipped, as are address tokens without a `/`.
pub fn parse_ps_output(out: &str) -> Vec<AddressRecord> {
    out.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<AddressRecord> {
    let mut cols = line.split_whitespace();
    let (id, mac, addr) = (cols.next()?, cols.next()?, cols.next()?);
    let Some((ip, cidr)) = addr.split_once('/') else {
        warn!("Skipping weave line with malformed address {:?}", addr);
        return None;
    };
    debug!("Parsed ID: {}, IP: {}, MAC: {}, CIDR: {}", id, ip, mac, cidr);
    Some(AddressRecord::new(id, mac, ip, cidr))
}
