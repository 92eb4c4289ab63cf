//! Fixed-interval polling of long-running cloud state.
//!
//! Every wait takes a [`PollSettings`]. The deadline is optional and unset by
//! default, so a provider operation that never finishes blocks the caller;
//! deployments that know their acceptable bound should set one.

use crate::compute::ComputeApi;
use crate::error::{Error, Result};
use crate::types::{Disk, Instance, InstanceStatus, Operation};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub deadline: Option<Duration>,
}

impl PollSettings {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::every(Duration::from_secs(1))
    }
}

/// Calls `fetch` until `done` accepts its result.
///
/// Errors from `fetch` end the wait immediately.
pub async fn poll_until<T, F, Fut, D>(
    what: &str,
    poll: PollSettings,
    mut fetch: F,
    mut done: D,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    D: FnMut(&T) -> bool,
{
    let started = Instant::now();
    loop {
        let value = fetch().await?;
        if done(&value) {
            return Ok(value);
        }
        if let Some(deadline) = poll.deadline {
            if started.elapsed() >= deadline {
                return Err(Error::Timeout(format!("{what} after {deadline:?}")));
            }
        }
        trace!(what, "still waiting");
        tokio::time::sleep(poll.interval).await;
    }
}

/// Polls a zonal operation until it is `DONE`, then surfaces its error list.
pub async fn wait_for_zone_operation(
    api: &dyn ComputeApi,
    op_name: &str,
    poll: PollSettings,
) -> Result<()> {
    let what = format!("operation {op_name}");
    let op = poll_until(
        &what,
        poll,
        move || api.get_zone_operation(op_name),
        Operation::is_done,
    )
    .await?;
    op.into_result()
}

/// Polls an instance until it reports `status`.
pub async fn wait_for_instance_status(
    api: &dyn ComputeApi,
    name: &str,
    status: InstanceStatus,
    poll: PollSettings,
) -> Result<Instance> {
    let what = format!("instance {name} to reach {status}");
    poll_until(
        &what,
        poll,
        move || api.get_instance(name),
        |vm: &Instance| vm.status == status,
    )
    .await
}

/// Polls a disk while it is being created or restored.
///
/// Fails if the disk settles in any state other than `READY`.
pub async fn wait_for_disk_ready(
    api: &dyn ComputeApi,
    name: &str,
    poll: PollSettings,
) -> Result<Disk> {
    let what = format!("disk {name} to become ready");
    let disk = poll_until(
        &what,
        poll,
        move || api.get_disk(name),
        |disk: &Disk| !disk.status.is_pending(),
    )
    .await?;

    if !disk.is_ready() {
        return Err(Error::UnexpectedStatus {
            kind: "disk",
            name: disk.name,
            status: disk.status.to_string(),
        });
    }
    Ok(disk)
}
