//! In-memory stand-ins for the cloud and the proxy.
//!
//! [`FakeCompute`] keeps instances, disks, snapshots and service accounts in
//! maps and mimics the provider behaviors the pool depends on: not-found
//! errors, fingerprint checks on metadata writes, exclusive read-write disk
//! attachment, and operations that finish on their first poll.

use crate::cloud_init::STARTUP_SCRIPT_KEY;
use crate::proxy::BackendRegistry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use warmpool_core::{
    AttachedDisk, BACKEND_ID_KEY, ComputeApi, Disk, DiskSpec, DiskStatus, Error, FOR_USER_KEY,
    FOR_USER_TIMESTAMP_KEY, Instance, InstanceSpec, InstanceStatus, Metadata, Operation,
    OperationError, OperationStatus, Result, ServiceAccount, ServiceAccountRef, Snapshot,
    resource_name,
};

#[derive(Default)]
struct State {
    instances: BTreeMap<String, Instance>,
    disks: BTreeMap<String, Disk>,
    snapshots: BTreeMap<String, Snapshot>,
    accounts: BTreeMap<String, ServiceAccount>,
    operations: HashMap<String, Operation>,
    next_id: u64,
    calls: HashMap<&'static str, usize>,
    failures: Vec<(&'static str, Error)>,
    operation_failures: Vec<(&'static str, OperationError)>,
    boot_status: Option<InstanceStatus>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn fingerprint(&mut self) -> String {
        format!("fp-{}", self.next_id())
    }

    /// Records the call and returns the injected failure for it, if any.
    fn enter(&mut self, method: &'static str) -> Result<()> {
        *self.calls.entry(method).or_default() += 1;
        match self.failures.iter().position(|(m, _)| *m == method) {
            Some(i) => Err(self.failures.remove(i).1),
            None => Ok(()),
        }
    }

    /// A pending operation; it reports done on its first poll.
    fn operation(&mut self, method: &'static str, target: &str) -> Operation {
        let errors = match self.operation_failures.iter().position(|(m, _)| *m == method) {
            Some(i) => vec![self.operation_failures.remove(i).1],
            None => Vec::new(),
        };
        let op = Operation {
            name: format!("operation-{}", self.next_id()),
            status: OperationStatus::Running,
            target_link: Some(target.to_string()),
            errors,
        };
        self.operations.insert(op.name.clone(), op.clone());
        op
    }
}

pub struct FakeCompute {
    project: String,
    zone: String,
    state: Mutex<State>,
}

impl Default for FakeCompute {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCompute {
    pub fn new() -> Self {
        Self {
            project: "test-project".to_string(),
            zone: "test-zone".to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn link(&self, collection: &str, name: &str) -> String {
        format!(
            "https://compute.googleapis.com/compute/v1/projects/{}/zones/{}/{collection}/{name}",
            self.project, self.zone
        )
    }

    /// Makes the next call to `method` fail with `error`.
    pub fn fail_next(&self, method: &'static str, error: Error) {
        self.state().failures.push((method, error));
    }

    /// Makes the operation returned by the next call to `method` finish
    /// with `error`.
    pub fn fail_next_operation(&self, method: &'static str, error: OperationError) {
        self.state().operation_failures.push((method, error));
    }

    /// How many times `method` was called.
    pub fn calls(&self, method: &str) -> usize {
        self.state().calls.get(method).copied().unwrap_or(0)
    }

    /// Status newly inserted instances report instead of `RUNNING`.
    pub fn boot_as(&self, status: InstanceStatus) {
        self.state().boot_status = Some(status);
    }

    pub fn instance(&self, name: &str) -> Option<Instance> {
        self.state().instances.get(name).cloned()
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.state().instances.values().cloned().collect()
    }

    pub fn disk(&self, name: &str) -> Option<Disk> {
        self.state().disks.get(name).cloned()
    }

    pub fn service_accounts(&self) -> Vec<ServiceAccount> {
        self.state().accounts.values().cloned().collect()
    }

    pub fn put_instance(&self, mut instance: Instance) {
        let mut state = self.state();
        if instance.metadata.fingerprint.is_none() {
            instance.metadata.fingerprint = Some(state.fingerprint());
        }
        state.instances.insert(instance.name.clone(), instance);
    }

    /// Registers an existing service account, as if created out of band.
    pub fn put_service_account(&self, email: &str) {
        let mut state = self.state();
        let account = ServiceAccount {
            email: email.to_string(),
            unique_id: state.next_id().to_string(),
            display_name: email.to_string(),
        };
        state.accounts.insert(email.to_string(), account);
    }

    pub fn put_disk(&self, disk: Disk) {
        self.state().disks.insert(disk.name.clone(), disk);
    }

    pub fn put_snapshot(&self, snapshot: Snapshot) {
        self.state()
            .snapshots
            .insert(snapshot.name.clone(), snapshot);
    }

    /// A snapshot as the provider would report it.
    pub fn snapshot(&self, name: &str) -> Snapshot {
        Snapshot {
            name: name.to_string(),
            self_link: format!(
                "https://compute.googleapis.com/compute/v1/projects/{}/global/snapshots/{name}",
                self.project
            ),
            status: "READY".to_string(),
            source_disk: None,
        }
    }

    /// An unassigned, running pool VM with its own service account.
    pub fn pool_vm(&self, name: &str, created: DateTime<Utc>) -> Instance {
        Instance {
            name: name.to_string(),
            self_link: self.link("instances", name),
            status: InstanceStatus::Running,
            creation_timestamp: created,
            disks: vec![AttachedDisk {
                device_name: "persistent-disk-0".to_string(),
                source: self.link("disks", name),
                boot: true,
            }],
            service_accounts: vec![ServiceAccountRef {
                email: format!("{name}@{}.iam.gserviceaccount.com", self.project),
                scopes: Vec::new(),
            }],
            metadata: Metadata::new()
                .with(BACKEND_ID_KEY, format!("{name}-backend"))
                .with(FOR_USER_KEY, "")
                .with(FOR_USER_TIMESTAMP_KEY, ""),
        }
    }
}

#[async_trait]
impl ComputeApi for FakeCompute {
    fn project(&self) -> &str {
        &self.project
    }

    fn zone(&self) -> &str {
        &self.zone
    }

    async fn get_instance(&self, name: &str) -> Result<Instance> {
        let mut state = self.state();
        state.enter("get_instance")?;
        let instance = state
            .instances
            .get_mut(name)
            .ok_or_else(|| Error::not_found("instance", name))?;

        // The snapshot init VM powers itself off once its disk is attached.
        if instance.metadata.get(STARTUP_SCRIPT_KEY).is_some() && instance.disks.len() > 1 {
            instance.status = InstanceStatus::Terminated;
        }
        Ok(instance.clone())
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let mut state = self.state();
        state.enter("list_instances")?;
        Ok(state.instances.values().cloned().collect())
    }

    async fn insert_instance(&self, spec: &InstanceSpec) -> Result<Operation> {
        let mut state = self.state();
        state.enter("insert_instance")?;
        if state.instances.contains_key(&spec.name) {
            return Err(Error::Api {
                status: 409,
                message: format!("instance {} already exists", spec.name),
            });
        }

        let mut metadata = spec.metadata.clone();
        metadata.fingerprint = Some(state.fingerprint());
        let status = state.boot_status.clone().unwrap_or(InstanceStatus::Running);
        let instance = Instance {
            name: spec.name.clone(),
            self_link: self.link("instances", &spec.name),
            status,
            creation_timestamp: Utc::now(),
            disks: vec![AttachedDisk {
                device_name: "persistent-disk-0".to_string(),
                source: self.link("disks", &spec.name),
                boot: true,
            }],
            service_accounts: spec
                .service_account
                .iter()
                .map(|email| ServiceAccountRef {
                    email: email.clone(),
                    scopes: spec.scopes.clone(),
                })
                .collect(),
            metadata,
        };
        let op = state.operation("insert_instance", &instance.self_link);
        state.instances.insert(spec.name.clone(), instance);
        Ok(op)
    }

    async fn delete_instance(&self, name: &str) -> Result<Operation> {
        let mut state = self.state();
        state.enter("delete_instance")?;
        let instance = state
            .instances
            .remove(name)
            .ok_or_else(|| Error::not_found("instance", name))?;
        for disk in state.disks.values_mut() {
            disk.users.retain(|user| *user != instance.self_link);
        }
        Ok(state.operation("delete_instance", &instance.self_link))
    }

    async fn set_metadata(&self, instance: &str, metadata: &Metadata) -> Result<Operation> {
        let mut state = self.state();
        state.enter("set_metadata")?;
        let fingerprint = state.fingerprint();
        let current = state
            .instances
            .get_mut(instance)
            .ok_or_else(|| Error::not_found("instance", instance))?;
        if current.metadata.fingerprint != metadata.fingerprint {
            return Err(Error::FingerprintMismatch(instance.to_string()));
        }

        current.metadata = metadata.clone();
        current.metadata.fingerprint = Some(fingerprint);
        let link = current.self_link.clone();
        Ok(state.operation("set_metadata", &link))
    }

    async fn attach_disk(
        &self,
        instance: &str,
        disk: &str,
        device_name: &str,
    ) -> Result<Operation> {
        let mut state = self.state();
        state.enter("attach_disk")?;
        let instance_link = state
            .instances
            .get(instance)
            .map(|i| i.self_link.clone())
            .ok_or_else(|| Error::not_found("instance", instance))?;
        let target = state
            .disks
            .get_mut(disk)
            .ok_or_else(|| Error::not_found("disk", disk))?;
        if !target.users.is_empty() {
            return Err(Error::Api {
                status: 400,
                message: format!("disk {disk} is already in use in read-write mode"),
            });
        }
        target.users.push(instance_link.clone());
        let source = target.self_link.clone();

        if let Some(vm) = state.instances.get_mut(instance) {
            vm.disks.push(AttachedDisk {
                device_name: device_name.to_string(),
                source,
                boot: false,
            });
        }
        Ok(state.operation("attach_disk", &instance_link))
    }

    async fn get_disk(&self, name: &str) -> Result<Disk> {
        let mut state = self.state();
        state.enter("get_disk")?;
        let disk = state
            .disks
            .get_mut(name)
            .ok_or_else(|| Error::not_found("disk", name))?;
        let seen = disk.clone();
        // Restores finish after being observed once.
        if disk.status.is_pending() {
            disk.status = DiskStatus::Ready;
        }
        Ok(seen)
    }

    async fn insert_disk(&self, spec: &DiskSpec) -> Result<Operation> {
        let mut state = self.state();
        state.enter("insert_disk")?;
        if state.disks.contains_key(&spec.name) {
            return Err(Error::Api {
                status: 409,
                message: format!("disk {} already exists", spec.name),
            });
        }

        let disk = Disk {
            name: spec.name.clone(),
            self_link: self.link("disks", &spec.name),
            status: if spec.source_snapshot.is_some() {
                DiskStatus::Restoring
            } else {
                DiskStatus::Creating
            },
            size_gb: spec.size_gb.unwrap_or(10),
            users: Vec::new(),
            source_snapshot: spec.source_snapshot.clone(),
        };
        let op = state.operation("insert_disk", &disk.self_link);
        state.disks.insert(spec.name.clone(), disk);
        Ok(op)
    }

    async fn delete_disk(&self, name: &str) -> Result<Operation> {
        let mut state = self.state();
        state.enter("delete_disk")?;
        let in_use = state
            .disks
            .get(name)
            .map(|d| !d.users.is_empty())
            .ok_or_else(|| Error::not_found("disk", name))?;
        if in_use {
            return Err(Error::Api {
                status: 400,
                message: format!("disk {name} is in use"),
            });
        }
        state.disks.remove(name);
        let link = self.link("disks", name);
        Ok(state.operation("delete_disk", &link))
    }

    async fn get_snapshot(&self, name: &str) -> Result<Snapshot> {
        let mut state = self.state();
        state.enter("get_snapshot")?;
        state
            .snapshots
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("snapshot", name))
    }

    async fn create_snapshot(&self, disk: &str, snapshot: &str) -> Result<Operation> {
        let mut state = self.state();
        state.enter("create_snapshot")?;
        let source = state
            .disks
            .get(disk)
            .map(|d| d.self_link.clone())
            .ok_or_else(|| Error::not_found("disk", disk))?;
        let mut created = self.snapshot(snapshot);
        created.source_disk = Some(source.clone());
        state.snapshots.insert(snapshot.to_string(), created);
        Ok(state.operation("create_snapshot", &source))
    }

    async fn get_zone_operation(&self, name: &str) -> Result<Operation> {
        let mut state = self.state();
        state.enter("get_zone_operation")?;
        let op = state
            .operations
            .get_mut(name)
            .ok_or_else(|| Error::not_found("operation", name))?;
        op.status = OperationStatus::Done;
        Ok(op.clone())
    }

    async fn create_service_account(
        &self,
        account_id: &str,
        display_name: &str,
    ) -> Result<ServiceAccount> {
        let mut state = self.state();
        state.enter("create_service_account")?;
        let email = format!("{account_id}@{}.iam.gserviceaccount.com", self.project);
        let account = ServiceAccount {
            email: email.clone(),
            unique_id: state.next_id().to_string(),
            display_name: display_name.to_string(),
        };
        state.accounts.insert(email, account.clone());
        Ok(account)
    }

    async fn delete_service_account(&self, email: &str) -> Result<()> {
        let mut state = self.state();
        state.enter("delete_service_account")?;
        state
            .accounts
            .remove(email)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("service account", email))
    }
}

/// A registration seen by [`RecordingRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub instance: String,
    pub backend_id: String,
    pub user: String,
}

/// A [`BackendRegistry`] that remembers what was registered and reports a
/// configurable set of idle backends.
#[derive(Default)]
pub struct RecordingRegistry {
    registrations: Mutex<Vec<Registration>>,
    idle: Mutex<Vec<String>>,
    failures_left: Mutex<usize>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.registrations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_idle(&self, ids: Vec<String>) {
        *self.idle.lock().unwrap_or_else(|e| e.into_inner()) = ids;
    }

    /// Makes the next `n` registrations fail.
    pub fn fail_registrations(&self, n: usize) {
        *self
            .failures_left
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = n;
    }
}

#[async_trait]
impl BackendRegistry for RecordingRegistry {
    async fn register_backend(&self, vm: &Instance, user: &str) -> Result<()> {
        {
            let mut failures = self
                .failures_left
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::Proxy("registration rejected".to_string()));
            }
        }

        let backend_id = vm.backend_id().ok_or_else(|| Error::InvalidInstance {
            name: vm.name.clone(),
            reason: "no backend-id metadata".to_string(),
        })?;
        self.registrations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Registration {
                instance: resource_name(&vm.self_link).to_string(),
                backend_id: backend_id.to_string(),
                user: user.to_string(),
            });
        Ok(())
    }

    async fn idle_backends(&self, _idle_for: Duration) -> Result<Vec<String>> {
        Ok(self.idle.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}
