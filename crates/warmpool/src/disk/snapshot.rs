use crate::cloud_init::{INIT_SCRIPT_KEY, STARTUP_SCRIPT_KEY, USER_DISK_DEVICE, render_startup_script};
use crate::compensation::Compensation;
use crate::config::DiskConfig;
use crate::ops::{self, provisioning};
use std::sync::Arc;
use tracing::{info, warn};
use warmpool_core::{
    ComputeApi, DiskSpec, InstanceSpec, InstanceStatus, Metadata, Result, Snapshot,
    wait_for_instance_status, wait_for_zone_operation,
};

/// Returns the golden snapshot, building it first if it does not exist.
///
/// Building boots a throwaway VM that formats a blank disk and runs the
/// optional init script on it, then snapshots the disk. The throwaway VM and
/// disk are always deleted afterwards. Nothing is retried; a failed build
/// leaves no snapshot and the next call starts over.
pub(crate) async fn ensure_snapshot(
    compute: &Arc<dyn ComputeApi>,
    config: &DiskConfig,
) -> Result<Snapshot> {
    match compute.get_snapshot(&config.snapshot_name).await {
        Ok(snapshot) => {
            info!(snapshot = %snapshot.name, "using existing golden snapshot");
            return Ok(snapshot);
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    info!(snapshot = %config.snapshot_name, "golden snapshot missing, building it");
    let mut cleanup = Compensation::new();
    let result = build(compute, config, &mut cleanup).await;

    let failed = cleanup.rollback().await;
    if failed > 0 {
        warn!(
            snapshot = %config.snapshot_name,
            failed,
            "throwaway resources left behind after snapshot build"
        );
    }

    if let Ok(snapshot) = &result {
        info!(snapshot = %snapshot.name, "golden snapshot ready");
    }
    result
}

async fn build(
    compute: &Arc<dyn ComputeApi>,
    config: &DiskConfig,
    cleanup: &mut Compensation,
) -> Result<Snapshot> {
    let disk_name = format!("{}-init-disk", config.snapshot_name);
    let vm_name = format!("{}-init-vm", config.snapshot_name);
    let poll = config.operation_poll();

    let op = compute
        .insert_disk(&DiskSpec {
            name: disk_name.clone(),
            size_gb: Some(config.size_gb),
            source_snapshot: None,
        })
        .await
        .map_err(provisioning("insert blank disk"))?;
    cleanup.push(
        format!("delete disk {disk_name}"),
        ops::delete_disk(Arc::clone(compute), disk_name.clone(), poll),
    );
    wait_for_zone_operation(compute.as_ref(), &op.name, poll)
        .await
        .map_err(provisioning("insert blank disk"))?;

    let metadata = Metadata::new()
        .with(STARTUP_SCRIPT_KEY, render_startup_script()?)
        .with(
            INIT_SCRIPT_KEY,
            config.init_script.clone().unwrap_or_default(),
        );
    let spec = InstanceSpec {
        name: vm_name.clone(),
        machine_type: config.init_machine_type.clone(),
        boot_image: config.init_image.clone(),
        boot_disk_size_gb: None,
        network: config.network.clone(),
        metadata,
        service_account: None,
        scopes: Vec::new(),
        tags: Vec::new(),
    };
    let op = compute
        .insert_instance(&spec)
        .await
        .map_err(provisioning("create init VM"))?;
    cleanup.push(
        format!("delete instance {vm_name}"),
        ops::delete_instance(Arc::clone(compute), vm_name.clone(), poll),
    );
    wait_for_zone_operation(compute.as_ref(), &op.name, poll)
        .await
        .map_err(provisioning("create init VM"))?;

    let op = compute
        .attach_disk(&vm_name, &disk_name, USER_DISK_DEVICE)
        .await
        .map_err(provisioning("attach blank disk"))?;
    wait_for_zone_operation(compute.as_ref(), &op.name, poll)
        .await
        .map_err(provisioning("attach blank disk"))?;

    info!(instance = %vm_name, "waiting for init VM to format the disk and power off");
    wait_for_instance_status(
        compute.as_ref(),
        &vm_name,
        InstanceStatus::Terminated,
        config.init_poll(),
    )
    .await
    .map_err(provisioning("wait for init VM shutdown"))?;

    let op = compute
        .create_snapshot(&disk_name, &config.snapshot_name)
        .await
        .map_err(provisioning("create snapshot"))?;
    wait_for_zone_operation(compute.as_ref(), &op.name, poll)
        .await
        .map_err(provisioning("create snapshot"))?;

    compute.get_snapshot(&config.snapshot_name).await
}
