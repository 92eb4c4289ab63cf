//! Delete-and-wait helpers that own their arguments, so they can be queued
//! as compensation steps.

use std::sync::Arc;
use warmpool_core::{ComputeApi, Error, PollSettings, Result, wait_for_zone_operation};

pub(crate) async fn delete_instance(
    compute: Arc<dyn ComputeApi>,
    name: String,
    poll: PollSettings,
) -> Result<()> {
    let op = compute.delete_instance(&name).await?;
    wait_for_zone_operation(compute.as_ref(), &op.name, poll).await
}

pub(crate) async fn delete_disk(
    compute: Arc<dyn ComputeApi>,
    name: String,
    poll: PollSettings,
) -> Result<()> {
    let op = compute.delete_disk(&name).await?;
    wait_for_zone_operation(compute.as_ref(), &op.name, poll).await
}

pub(crate) async fn delete_service_account(
    compute: Arc<dyn ComputeApi>,
    email: String,
) -> Result<()> {
    compute.delete_service_account(&email).await
}

/// Wraps a step failure as a provisioning error naming the step.
pub(crate) fn provisioning(step: &'static str) -> impl FnOnce(Error) -> Error {
    move |e| Error::Provisioning(format!("{step}: {e}"))
}
