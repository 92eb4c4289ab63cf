use super::auth::TokenSource;
use super::wire::{
    AccessConfig, AttachDisk, BootDisk, DiskInsert, DiskResource, ErrorBody, InitializeParams,
    InstanceInsert, InstanceList, InstanceResource, MetadataResource, NetworkInterface,
    OperationResource, ServiceAccountCreate, ServiceAccountDisplay, ServiceAccountRefResource,
    ServiceAccountResource, SnapshotInsert, SnapshotResource, Tags,
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;
use warmpool_core::{
    ComputeApi, Disk, DiskSpec, Error, Instance, InstanceSpec, Metadata, Operation, Result,
    ServiceAccount, Snapshot,
};

pub const COMPUTE_API_BASE: &str = "https://compute.googleapis.com/compute/v1";
pub const IAM_API_BASE: &str = "https://iam.googleapis.com/v1";

/// [`ComputeApi`] over the Compute Engine and IAM REST APIs, bound to one
/// project and zone.
pub struct GceClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    project: String,
    zone: String,
    compute_base: String,
    iam_base: String,
}

impl GceClient {
    pub fn new(
        project: impl Into<String>,
        zone: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
            project: project.into(),
            zone: zone.into(),
            compute_base: COMPUTE_API_BASE.to_string(),
            iam_base: IAM_API_BASE.to_string(),
        }
    }

    /// Points the client at other API roots, e.g. a local mock server.
    pub fn with_endpoints(
        mut self,
        compute_base: impl Into<String>,
        iam_base: impl Into<String>,
    ) -> Self {
        self.compute_base = compute_base.into().trim_end_matches('/').to_string();
        self.iam_base = iam_base.into().trim_end_matches('/').to_string();
        self
    }

    fn zone_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/{path}",
            self.compute_base, self.project, self.zone
        )
    }

    fn global_url(&self, path: &str) -> String {
        format!("{}/projects/{}/global/{path}", self.compute_base, self.project)
    }

    fn accounts_url(&self) -> String {
        format!("{}/projects/{}/serviceAccounts", self.iam_base, self.project)
    }

    /// Short form of a zonal resource, as accepted in request bodies.
    fn zonal_ref(&self, collection: &str, name: &str) -> String {
        format!(
            "projects/{}/zones/{}/{collection}/{name}",
            self.project, self.zone
        )
    }

    fn network_ref(&self, network: &str) -> String {
        if network.contains('/') {
            network.to_string()
        } else {
            format!("projects/{}/global/networks/{network}", self.project)
        }
    }

    async fn request(&self, method: Method, url: String) -> Result<RequestBuilder> {
        let token = self.tokens.token().await?;
        debug!(%method, %url, "compute request");
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send(&self, req: RequestBuilder, kind: &'static str, name: &str) -> Result<Response> {
        let resp = req.send().await.map_err(http_error)?;
        check(resp, kind, name).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        kind: &'static str,
        name: &str,
    ) -> Result<T> {
        let resp = self.send(req, kind, name).await?;
        resp.json().await.map_err(http_error)
    }

    async fn operation(&self, req: RequestBuilder, kind: &'static str, name: &str) -> Result<Operation> {
        let op: OperationResource = self.call(req, kind, name).await?;
        Ok(op.into())
    }
}

fn http_error(e: reqwest::Error) -> Error {
    Error::Http(e.to_string())
}

/// Maps a non-success response onto the error the callers branch on.
async fn check(resp: Response, kind: &'static str, name: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(Error::not_found(kind, name)),
        StatusCode::PRECONDITION_FAILED => Err(Error::FingerprintMismatch(name.to_string())),
        _ => {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            Err(Error::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl ComputeApi for GceClient {
    fn project(&self) -> &str {
        &self.project
    }

    fn zone(&self) -> &str {
        &self.zone
    }

    async fn get_instance(&self, name: &str) -> Result<Instance> {
        let req = self
            .request(Method::GET, self.zone_url(&format!("instances/{name}")))
            .await?;
        let instance: InstanceResource = self.call(req, "instance", name).await?;
        Ok(instance.into())
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self
                .request(Method::GET, self.zone_url("instances"))
                .await?;
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token)]);
            }
            let page: InstanceList = self.call(req, "zone", &self.zone).await?;
            instances.extend(page.items.into_iter().map(Instance::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(instances),
            }
        }
    }

    async fn insert_instance(&self, spec: &InstanceSpec) -> Result<Operation> {
        let body = InstanceInsert {
            name: spec.name.clone(),
            machine_type: format!("zones/{}/machineTypes/{}", self.zone, spec.machine_type),
            disks: vec![BootDisk {
                boot: true,
                auto_delete: true,
                initialize_params: InitializeParams {
                    source_image: spec.boot_image.clone(),
                    disk_size_gb: spec.boot_disk_size_gb.map(|gb| gb.to_string()),
                },
            }],
            network_interfaces: vec![NetworkInterface {
                network: self.network_ref(&spec.network),
                access_configs: vec![AccessConfig {
                    name: "External NAT".to_string(),
                    kind: "ONE_TO_ONE_NAT".to_string(),
                }],
            }],
            metadata: MetadataResource::from(&spec.metadata),
            service_accounts: spec
                .service_account
                .iter()
                .map(|email| ServiceAccountRefResource {
                    email: email.clone(),
                    scopes: spec.scopes.clone(),
                })
                .collect(),
            tags: (!spec.tags.is_empty()).then(|| Tags {
                items: spec.tags.clone(),
            }),
        };
        let req = self
            .request(Method::POST, self.zone_url("instances"))
            .await?
            .json(&body);
        self.operation(req, "instance", &spec.name).await
    }

    async fn delete_instance(&self, name: &str) -> Result<Operation> {
        let req = self
            .request(Method::DELETE, self.zone_url(&format!("instances/{name}")))
            .await?;
        self.operation(req, "instance", name).await
    }

    async fn set_metadata(&self, instance: &str, metadata: &Metadata) -> Result<Operation> {
        let req = self
            .request(
                Method::POST,
                self.zone_url(&format!("instances/{instance}/setMetadata")),
            )
            .await?
            .json(&MetadataResource::from(metadata));
        self.operation(req, "instance", instance).await
    }

    async fn attach_disk(
        &self,
        instance: &str,
        disk: &str,
        device_name: &str,
    ) -> Result<Operation> {
        let body = AttachDisk {
            source: self.zonal_ref("disks", disk),
            device_name: device_name.to_string(),
            mode: "READ_WRITE",
            auto_delete: false,
        };
        let req = self
            .request(
                Method::POST,
                self.zone_url(&format!("instances/{instance}/attachDisk")),
            )
            .await?
            .json(&body);
        self.operation(req, "instance", instance).await
    }

    async fn get_disk(&self, name: &str) -> Result<Disk> {
        let req = self
            .request(Method::GET, self.zone_url(&format!("disks/{name}")))
            .await?;
        let disk: DiskResource = self.call(req, "disk", name).await?;
        Ok(disk.into())
    }

    async fn insert_disk(&self, spec: &DiskSpec) -> Result<Operation> {
        let body = DiskInsert {
            name: spec.name.clone(),
            size_gb: spec.size_gb.map(|gb| gb.to_string()),
            source_snapshot: spec.source_snapshot.clone(),
        };
        let req = self
            .request(Method::POST, self.zone_url("disks"))
            .await?
            .json(&body);
        self.operation(req, "disk", &spec.name).await
    }

    async fn delete_disk(&self, name: &str) -> Result<Operation> {
        let req = self
            .request(Method::DELETE, self.zone_url(&format!("disks/{name}")))
            .await?;
        self.operation(req, "disk", name).await
    }

    async fn get_snapshot(&self, name: &str) -> Result<Snapshot> {
        let req = self
            .request(Method::GET, self.global_url(&format!("snapshots/{name}")))
            .await?;
        let snapshot: SnapshotResource = self.call(req, "snapshot", name).await?;
        Ok(snapshot.into())
    }

    async fn create_snapshot(&self, disk: &str, snapshot: &str) -> Result<Operation> {
        let req = self
            .request(
                Method::POST,
                self.zone_url(&format!("disks/{disk}/createSnapshot")),
            )
            .await?
            .json(&SnapshotInsert {
                name: snapshot.to_string(),
            });
        self.operation(req, "disk", disk).await
    }

    async fn get_zone_operation(&self, name: &str) -> Result<Operation> {
        let req = self
            .request(Method::GET, self.zone_url(&format!("operations/{name}")))
            .await?;
        self.operation(req, "operation", name).await
    }

    async fn create_service_account(
        &self,
        account_id: &str,
        display_name: &str,
    ) -> Result<ServiceAccount> {
        let body = ServiceAccountCreate {
            account_id: account_id.to_string(),
            service_account: ServiceAccountDisplay {
                display_name: display_name.to_string(),
            },
        };
        let req = self
            .request(Method::POST, self.accounts_url())
            .await?
            .json(&body);
        let account: ServiceAccountResource = self.call(req, "service account", account_id).await?;
        Ok(account.into())
    }

    async fn delete_service_account(&self, email: &str) -> Result<()> {
        let url = format!("{}/{email}", self.accounts_url());
        let req = self.request(Method::DELETE, url).await?;
        self.send(req, "service account", email).await?;
        Ok(())
    }
}
