use super::VmPool;
use crate::cloud_init::{GuestParams, USER_DATA_KEY, render_cloud_config};
use crate::compensation::Compensation;
use crate::ops::{self, provisioning};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use warmpool_core::{
    BACKEND_ID_KEY, Error, FOR_USER_KEY, FOR_USER_TIMESTAMP_KEY, Instance, InstanceSpec, Metadata,
    Result, wait_for_zone_operation,
};

/// IAM account ids are limited to 30 characters.
const ACCOUNT_ID_HEX_CHARS: usize = 20;

pub(crate) fn instance_name(backend_id: &Uuid) -> String {
    format!("vm-{backend_id}")
}

pub(crate) fn service_account_id(backend_id: &Uuid) -> String {
    let hex = backend_id.simple().to_string();
    format!("vm-{}", &hex[..ACCOUNT_ID_HEX_CHARS])
}

impl VmPool {
    /// Provisions one free VM and registers it with the proxy.
    ///
    /// Each VM gets its own service account so the proxy can tell backends
    /// apart. If any step fails, everything created so far is removed.
    pub(super) async fn create_vm(&self) -> Result<Instance> {
        let backend_id = Uuid::new_v4();
        let name = instance_name(&backend_id);
        let mut undo = Compensation::new();

        match self.try_create_vm(&backend_id, &name, &mut undo).await {
            Ok(vm) => {
                undo.commit();
                info!(instance = %vm.name, backend = %backend_id, "created pool VM");
                Ok(vm)
            }
            Err(e) => {
                warn!(instance = %name, error = %e, "pool VM creation failed, cleaning up");
                undo.rollback().await;
                Err(e)
            }
        }
    }

    async fn try_create_vm(
        &self,
        backend_id: &Uuid,
        name: &str,
        undo: &mut Compensation,
    ) -> Result<Instance> {
        let compute = &self.inner.compute;
        let config = &self.inner.config;
        let poll = config.operation_poll();
        let account_id = service_account_id(backend_id);
        let backend_id = backend_id.to_string();

        let account = compute
            .create_service_account(&account_id, &format!("Pool VM {name}"))
            .await
            .map_err(provisioning("create service account"))?;
        undo.push(
            format!("delete service account {}", account.email),
            ops::delete_service_account(Arc::clone(compute), account.email.clone()),
        );

        let user_data = render_cloud_config(&GuestParams {
            backend_id: &backend_id,
            proxy_url: &config.proxy_url,
            agent_image: &config.agent_image,
            app_image: &config.app_image,
            proxied_host: &config.proxied_host,
        })?;
        let spec = InstanceSpec {
            name: name.to_string(),
            machine_type: config.machine_type.clone(),
            boot_image: config.boot_image.clone(),
            boot_disk_size_gb: None,
            network: config.network.clone(),
            metadata: Metadata::new()
                .with(BACKEND_ID_KEY, backend_id.as_str())
                .with(FOR_USER_KEY, "")
                .with(FOR_USER_TIMESTAMP_KEY, "")
                .with(USER_DATA_KEY, user_data),
            service_account: Some(account.email.clone()),
            scopes: config.scopes.clone(),
            tags: config.tags.clone(),
        };

        let op = compute
            .insert_instance(&spec)
            .await
            .map_err(provisioning("insert instance"))?;
        undo.push(
            format!("delete instance {name}"),
            ops::delete_instance(Arc::clone(compute), name.to_string(), poll),
        );
        wait_for_zone_operation(compute.as_ref(), &op.name, poll)
            .await
            .map_err(provisioning("insert instance"))?;

        let vm = compute.get_instance(name).await?;
        if !vm.status.is_booting_or_running() {
            return Err(Error::UnexpectedStatus {
                kind: "instance",
                name: vm.name,
                status: vm.status.to_string(),
            });
        }

        self.inner
            .registry
            .register_backend(&vm, "")
            .await
            .map_err(provisioning("register backend"))?;
        Ok(vm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_derive_from_backend_id() {
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(instance_name(&id), "vm-67e55044-10b1-426f-9247-bb680e5fe0c8");
        assert_eq!(service_account_id(&id), "vm-67e5504410b1426f9247");
    }

    #[test]
    fn account_id_fits_iam_limits() {
        let id = service_account_id(&Uuid::new_v4());
        assert!(id.len() >= 6 && id.len() <= 30);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }
}
