//! Optional TOML file with pool tuning.
//!
//! Every key is optional; missing keys keep the library defaults, and
//! command-line flags win over the file. Durations are whole seconds.
//!
//! ```toml
//! [pool]
//! target_size = 4
//! idle_secs = 5400
//!
//! [disk]
//! size_gb = 100
//! ```

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use warmpool::{DiskConfig, PoolConfig};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub pool: PoolSection,
    pub disk: DiskSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSection {
    pub target_size: Option<usize>,
    pub machine_type: Option<String>,
    pub boot_image: Option<String>,
    /// Shared by pool VMs and the disk init VM.
    pub network: Option<String>,
    pub tags: Option<Vec<String>>,
    pub proxied_host: Option<String>,
    pub maintenance_interval_secs: Option<u64>,
    pub operation_poll_secs: Option<u64>,
    pub operation_deadline_secs: Option<u64>,
    pub claim_attempts: Option<u32>,
    pub claim_timeout_secs: Option<u64>,
    pub assign_attempts: Option<u32>,
    pub idle_secs: Option<u64>,
    pub assigned_secs: Option<u64>,
    pub partially_assigned_secs: Option<u64>,
    pub stale_secs: Option<u64>,
    pub channel_capacity: Option<usize>,
    pub seen_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiskSection {
    pub size_gb: Option<u64>,
    pub init_machine_type: Option<String>,
    pub init_image: Option<String>,
    pub init_poll_secs: Option<u64>,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn set_secs(target: &mut Duration, secs: Option<u64>) {
    set(target, secs.map(Duration::from_secs));
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Overlays the file's settings onto `pool` and `disk`.
    pub fn apply(self, pool: &mut PoolConfig, disk: &mut DiskConfig) {
        let p = self.pool;
        set(&mut pool.target_size, p.target_size);
        set(&mut pool.machine_type, p.machine_type);
        set(&mut pool.boot_image, p.boot_image);
        if let Some(network) = p.network {
            disk.network = network.clone();
            pool.network = network;
        }
        set(&mut pool.tags, p.tags);
        set(&mut pool.proxied_host, p.proxied_host);
        set_secs(&mut pool.maintenance_interval, p.maintenance_interval_secs);
        set_secs(&mut pool.operation_poll, p.operation_poll_secs);
        if let Some(secs) = p.operation_deadline_secs {
            pool.operation_deadline = Some(Duration::from_secs(secs));
        }
        set(&mut pool.claim_attempts, p.claim_attempts);
        set_secs(&mut pool.claim_timeout, p.claim_timeout_secs);
        set(&mut pool.assign_attempts, p.assign_attempts);
        set_secs(&mut pool.limits.idle, p.idle_secs);
        set_secs(&mut pool.limits.assigned, p.assigned_secs);
        set_secs(&mut pool.limits.partially_assigned, p.partially_assigned_secs);
        set_secs(&mut pool.limits.stale, p.stale_secs);
        set(&mut pool.channel_capacity, p.channel_capacity);
        set(&mut pool.seen_capacity, p.seen_capacity);

        // Disk operations share the pool's polling.
        disk.operation_poll = pool.operation_poll;
        disk.operation_deadline = pool.operation_deadline;

        let d = self.disk;
        set(&mut disk.size_gb, d.size_gb);
        set(&mut disk.init_machine_type, d.init_machine_type);
        set(&mut disk.init_image, d.init_image);
        set_secs(&mut disk.init_poll, d.init_poll_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_keeps_defaults() {
        let mut pool = PoolConfig::default();
        let mut disk = DiskConfig::default();

        FileConfig::parse("").unwrap().apply(&mut pool, &mut disk);

        assert_eq!(pool.target_size, 2);
        assert_eq!(pool.limits.idle, Duration::from_secs(90 * 60));
        assert_eq!(pool.operation_deadline, None);
        assert_eq!(disk.size_gb, 200);
    }

    #[test]
    fn overrides_timing_and_limits() {
        let text = r#"
            [pool]
            target_size = 5
            network = "pool-net"
            idle_secs = 600
            stale_secs = 3600
            operation_poll_secs = 2
            operation_deadline_secs = 300
            claim_attempts = 7

            [disk]
            size_gb = 50
            init_poll_secs = 10
        "#;
        let mut pool = PoolConfig::default();
        let mut disk = DiskConfig::default();

        FileConfig::parse(text).unwrap().apply(&mut pool, &mut disk);

        assert_eq!(pool.target_size, 5);
        assert_eq!(pool.network, "pool-net");
        assert_eq!(disk.network, "pool-net");
        assert_eq!(pool.limits.idle, Duration::from_secs(600));
        assert_eq!(pool.limits.stale, Duration::from_secs(3600));
        assert_eq!(pool.limits.assigned, Duration::from_secs(12 * 3600));
        assert_eq!(pool.claim_attempts, 7);
        assert_eq!(pool.operation_deadline, Some(Duration::from_secs(300)));
        assert_eq!(disk.operation_poll, Duration::from_secs(2));
        assert_eq!(disk.operation_deadline, Some(Duration::from_secs(300)));
        assert_eq!(disk.size_gb, 50);
        assert_eq!(disk.init_poll, Duration::from_secs(10));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(FileConfig::parse("[pool]\nidle_minutes = 5\n").is_err());
        assert!(FileConfig::parse("[network]\nname = \"x\"\n").is_err());
    }
}
