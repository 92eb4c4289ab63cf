//! Tuning for the pool and the disk manager.
//!
//! Both structs carry workable defaults; deployments override the
//! project-specific fields (images, network, proxy URL) through the `with_*`
//! methods or by assigning fields directly.

use std::time::Duration;
use warmpool_core::{Error, PollSettings, Result};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Image family used for pooled VMs; its cloud-init runs the containers.
pub const DEFAULT_POOL_IMAGE: &str = "projects/cos-cloud/global/images/family/cos-stable";
/// Image family used for the throwaway VM that formats the golden disk.
pub const DEFAULT_INIT_IMAGE: &str = "projects/debian-cloud/global/images/family/debian-12";
pub const DEFAULT_AGENT_IMAGE: &str = "gcr.io/inverting-proxy/agent";
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// When a VM stops being worth keeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimLimits {
    /// Backends the proxy reports unused for this long are reclaimed.
    pub idle: Duration,
    /// Hard cap on how long a VM stays assigned to one user.
    pub assigned: Duration,
    /// Cap for an assignment whose disk attach never completed.
    pub partially_assigned: Duration,
    /// Free VMs older than this may run an outdated image.
    pub stale: Duration,
}

impl Default for ReclaimLimits {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(90 * MINUTE),
            assigned: Duration::from_secs(12 * HOUR),
            partially_assigned: Duration::from_secs(10 * MINUTE),
            stale: Duration::from_secs(24 * HOUR),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of free VMs the pool keeps warm.
    pub target_size: usize,
    pub machine_type: String,
    pub boot_image: String,
    pub network: String,
    /// Image of the user-facing application container.
    pub app_image: String,
    /// Image of the proxy agent container.
    pub agent_image: String,
    /// Public URL of the reverse proxy the agent connects to.
    pub proxy_url: String,
    /// Address of the application inside the VM, as seen by the agent.
    pub proxied_host: String,
    pub scopes: Vec<String>,
    pub tags: Vec<String>,
    /// Interval of the background fill/reclaim loop.
    pub maintenance_interval: Duration,
    pub operation_poll: Duration,
    pub operation_deadline: Option<Duration>,
    pub claim_attempts: u32,
    pub claim_timeout: Duration,
    pub assign_attempts: u32,
    pub limits: ReclaimLimits,
    pub channel_capacity: usize,
    pub seen_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_size: 2,
            machine_type: "e2-standard-2".to_string(),
            boot_image: DEFAULT_POOL_IMAGE.to_string(),
            network: "default".to_string(),
            app_image: String::new(),
            agent_image: DEFAULT_AGENT_IMAGE.to_string(),
            proxy_url: String::new(),
            proxied_host: "localhost:8080".to_string(),
            scopes: vec![CLOUD_PLATFORM_SCOPE.to_string()],
            tags: Vec::new(),
            maintenance_interval: Duration::from_secs(30),
            operation_poll: Duration::from_secs(1),
            operation_deadline: None,
            claim_attempts: 5,
            claim_timeout: Duration::from_secs(60),
            assign_attempts: 3,
            limits: ReclaimLimits::default(),
            channel_capacity: 64,
            seen_capacity: 1024,
        }
    }
}

impl PoolConfig {
    pub fn with_target_size(mut self, size: usize) -> Self {
        self.target_size = size;
        self
    }

    pub fn with_app_image(mut self, image: impl Into<String>) -> Self {
        self.app_image = image.into();
        self
    }

    pub fn with_proxy_url(mut self, url: impl Into<String>) -> Self {
        self.proxy_url = url.into();
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn with_machine_type(mut self, machine_type: impl Into<String>) -> Self {
        self.machine_type = machine_type.into();
        self
    }

    pub fn with_limits(mut self, limits: ReclaimLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn operation_poll(&self) -> PollSettings {
        PollSettings::every(self.operation_poll).with_deadline(self.operation_deadline)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(Error::InvalidConfig(
                "pool size must be at least 1".into(),
            ));
        }
        if self.claim_attempts == 0 || self.assign_attempts == 0 {
            return Err(Error::InvalidConfig(
                "attempt limits must be at least 1".into(),
            ));
        }
        if self.channel_capacity == 0 || self.seen_capacity == 0 {
            return Err(Error::InvalidConfig(
                "channel and dedup capacities must be at least 1".into(),
            ));
        }
        if self.maintenance_interval.is_zero() || self.operation_poll.is_zero() {
            return Err(Error::InvalidConfig("poll intervals must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DiskConfig {
    /// Name of the golden snapshot new user disks are restored from.
    pub snapshot_name: String,
    /// Optional script run once from the root of the freshly formatted disk.
    pub init_script: Option<String>,
    pub size_gb: u64,
    pub network: String,
    pub init_machine_type: String,
    pub init_image: String,
    pub operation_poll: Duration,
    pub operation_deadline: Option<Duration>,
    /// How often the throwaway VM is checked for shutdown.
    pub init_poll: Duration,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            snapshot_name: "warmpool-user-disk".to_string(),
            init_script: None,
            size_gb: 200,
            network: "default".to_string(),
            init_machine_type: "e2-micro".to_string(),
            init_image: DEFAULT_INIT_IMAGE.to_string(),
            operation_poll: Duration::from_secs(1),
            operation_deadline: None,
            init_poll: Duration::from_secs(5),
        }
    }
}

impl DiskConfig {
    pub fn new(snapshot_name: impl Into<String>) -> Self {
        Self {
            snapshot_name: snapshot_name.into(),
            ..Default::default()
        }
    }

    pub fn with_init_script(mut self, script: impl Into<String>) -> Self {
        self.init_script = Some(script.into());
        self
    }

    pub fn with_size_gb(mut self, size_gb: u64) -> Self {
        self.size_gb = size_gb;
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn operation_poll(&self) -> PollSettings {
        PollSettings::every(self.operation_poll).with_deadline(self.operation_deadline)
    }

    pub fn init_poll(&self) -> PollSettings {
        PollSettings::every(self.init_poll).with_deadline(self.operation_deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_config_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_target_size_is_rejected() {
        let err = PoolConfig::default().with_target_size(0).validate().unwrap_err();
        assert!(err.to_string().contains("pool size"));
    }

    #[test]
    fn zero_claim_attempts_is_rejected() {
        let config = PoolConfig {
            claim_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn operation_poll_carries_deadline() {
        let config = PoolConfig {
            operation_deadline: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        let poll = config.operation_poll();
        assert_eq!(poll.interval, Duration::from_secs(1));
        assert_eq!(poll.deadline, Some(Duration::from_secs(600)));
    }

    #[test]
    fn default_limits_order() {
        let limits = ReclaimLimits::default();
        assert!(limits.partially_assigned < limits.assigned);
        assert_eq!(limits.idle, Duration::from_secs(90 * 60));
    }

    #[test]
    fn disk_config_builder() {
        let config = DiskConfig::new("golden")
            .with_init_script("echo hi")
            .with_size_gb(50);
        assert_eq!(config.snapshot_name, "golden");
        assert_eq!(config.init_script.as_deref(), Some("echo hi"));
        assert_eq!(config.size_gb, 50);
    }
}
