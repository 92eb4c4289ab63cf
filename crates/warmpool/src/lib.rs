//! Warm pool of per-user cloud VMs with persistent disks.
//!
//! Booting a VM takes minutes; users should not wait for that. Warmpool keeps
//! a few VMs booted and unassigned, and when a user shows up it claims one,
//! attaches the user's own persistent disk to it and tells a reverse proxy to
//! route the user there. User data lives on the disk, so VMs are disposable:
//! idle and long-running ones are deleted and replaced in the background.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warmpool::{
//!     Assigner, DiskConfig, DiskManager, GceClient, MetadataServerToken, PoolConfig,
//!     ProxyAdmin, VmPool,
//! };
//!
//! # async fn example() -> warmpool::Result<()> {
//! let tokens = Arc::new(MetadataServerToken::new());
//! let compute = Arc::new(GceClient::new("my-project", "us-central1-a", tokens.clone()));
//! let registry = Arc::new(
//!     ProxyAdmin::new("https://api-dot-my-proxy.appspot.com").with_token_source(tokens),
//! );
//!
//! let disks = DiskManager::new(compute.clone(), DiskConfig::new("user-disk-v1")).await?;
//! let pool = VmPool::new(
//!     compute,
//!     registry.clone(),
//!     PoolConfig::default()
//!         .with_app_image("gcr.io/my-project/app")
//!         .with_proxy_url("https://my-proxy.appspot.com"),
//! )
//! .await?;
//!
//! let assigner = Assigner::new(Arc::new(disks), pool, registry);
//! let vm = assigner.assign("alice@example.com").await?;
//! println!("alice is on {}", vm.name);
//! # Ok(())
//! # }
//! ```
//!
//! The pieces, leaf first: [`DiskManager`] owns user disks and the golden
//! snapshot they are restored from, [`VmPool`] keeps and hands out free VMs,
//! [`ProxyAdmin`] talks to the proxy, [`Assigner`] ties them together and
//! [`dispatch`] puts all of it behind HTTP.

mod assign;
pub mod cloud_init;
mod compensation;
mod config;
mod disk;
pub mod dispatch;
pub mod gce;
mod ops;
mod pool;
mod proxy;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use assign::Assigner;
pub use compensation::Compensation;
pub use config::{
    CLOUD_PLATFORM_SCOPE, DEFAULT_AGENT_IMAGE, DEFAULT_INIT_IMAGE, DEFAULT_POOL_IMAGE, DiskConfig,
    PoolConfig, ReclaimLimits,
};
pub use disk::{DiskManager, disk_name};
pub use gce::{GceClient, MetadataServerToken, StaticToken, TokenSource};
pub use pool::{ReclaimReason, VmPool, reclaim_reason, too_old_vms};
pub use proxy::{Backend, BackendRegistry, ProxyAdmin, idle_backend_ids};

pub use warmpool_core::{
    ComputeApi, Disk, DiskStatus, Error, Instance, InstanceStatus, OperationError, PollSettings,
    Result, Snapshot, VmState,
};
