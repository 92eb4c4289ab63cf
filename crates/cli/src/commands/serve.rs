//! The `serve` command - runs the pool and the request dispatcher.

use crate::config::FileConfig;
use anyhow::Context;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use warmpool::dispatch::{self, DEFAULT_IDENTITY_HEADER, DispatchState, IdentityPolicy};
use warmpool::{
    Assigner, DEFAULT_AGENT_IMAGE, DiskConfig, DiskManager, GceClient, MetadataServerToken,
    PoolConfig, ProxyAdmin, TokenSource, VmPool,
};

const MAX_POOL_SIZE: usize = 1000;
const MAX_DISK_SIZE_GB: u64 = 65536;

#[derive(Args)]
pub struct ServeArgs {
    /// Project that hosts the VMs and disks
    #[arg(long, env = "WARMPOOL_PROJECT")]
    project: String,

    /// Zone that hosts the VMs and disks
    #[arg(long, env = "WARMPOOL_ZONE")]
    zone: String,

    /// Project of the reverse proxy; derives the proxy URLs when they are not given
    #[arg(long, env = "WARMPOOL_PROXY_PROJECT")]
    proxy_project: Option<String>,

    /// Public URL of the reverse proxy the VM agents connect to
    #[arg(long, env = "WARMPOOL_PROXY_URL")]
    proxy_url: Option<String>,

    /// URL of the reverse proxy's admin API
    #[arg(long, env = "WARMPOOL_PROXY_ADMIN_URL")]
    proxy_admin_url: Option<String>,

    /// VPC network for pool VMs and the disk init VM [default: default]
    #[arg(long, env = "WARMPOOL_NETWORK")]
    network: Option<String>,

    /// Golden snapshot user disks are restored from
    #[arg(long, env = "WARMPOOL_SNAPSHOT", default_value = "warmpool-user-disk")]
    snapshot: String,

    /// Machine type of pool VMs [default: e2-standard-2]
    #[arg(long, env = "WARMPOOL_MACHINE_TYPE")]
    machine_type: Option<String>,

    /// Container image of the user-facing application
    #[arg(long, env = "WARMPOOL_APP_IMAGE")]
    app_image: String,

    /// Container image of the proxy agent
    #[arg(long, env = "WARMPOOL_AGENT_IMAGE", default_value = DEFAULT_AGENT_IMAGE)]
    agent_image: String,

    /// Only serve users whose address is in this domain
    #[arg(long, env = "WARMPOOL_ALLOWED_DOMAIN")]
    allowed_domain: Option<String>,

    /// Header carrying the authenticated user
    #[arg(long, env = "WARMPOOL_IDENTITY_HEADER", default_value = DEFAULT_IDENTITY_HEADER)]
    identity_header: String,

    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Script run once on a freshly formatted user disk before snapshotting
    #[arg(long, env = "WARMPOOL_DISK_INIT_SCRIPT", value_parser = parse_existing_file)]
    disk_init_script: Option<PathBuf>,

    /// Size of new user disks in GB (1-65536)
    #[arg(long, env = "WARMPOOL_DISK_SIZE_GB", value_parser = parse_disk_size)]
    disk_size_gb: Option<u64>,

    /// Number of free VMs kept warm (1-1000)
    #[arg(long, env = "WARMPOOL_POOL_SIZE", value_parser = parse_pool_size)]
    pool_size: Option<usize>,

    /// TOML file with pool tuning
    #[arg(long, short, env = "WARMPOOL_CONFIG", value_parser = parse_existing_file)]
    config: Option<PathBuf>,
}

fn parse_existing_file(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if !path.exists() {
        return Err(format!("file not found: {s}"));
    }
    if !path.is_file() {
        return Err(format!("not a file: {s}"));
    }
    Ok(path)
}

fn parse_pool_size(s: &str) -> Result<usize, String> {
    let size: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if size == 0 {
        return Err("pool size must be at least 1".to_string());
    }
    if size > MAX_POOL_SIZE {
        return Err(format!("pool size cannot exceed {MAX_POOL_SIZE}"));
    }
    Ok(size)
}

fn parse_disk_size(s: &str) -> Result<u64, String> {
    let size: u64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if size == 0 {
        return Err("disk size must be at least 1 GB".to_string());
    }
    if size > MAX_DISK_SIZE_GB {
        return Err(format!("disk size cannot exceed {MAX_DISK_SIZE_GB} GB"));
    }
    Ok(size)
}

/// Resolves the agent-facing and admin URLs of the proxy.
///
/// Explicit URLs win; otherwise both are derived from the proxy project,
/// with the admin API served from the `api` service.
fn proxy_urls(
    proxy_project: Option<&str>,
    proxy_url: Option<&str>,
    admin_url: Option<&str>,
) -> anyhow::Result<(String, String)> {
    let public = match (proxy_url, proxy_project) {
        (Some(url), _) => url.to_string(),
        (None, Some(project)) => format!("https://{project}.appspot.com"),
        (None, None) => anyhow::bail!("either --proxy-url or --proxy-project is required"),
    };
    let admin = match (admin_url, proxy_project) {
        (Some(url), _) => url.to_string(),
        (None, Some(project)) => format!("https://api-dot-{project}.appspot.com"),
        (None, None) => public.clone(),
    };
    Ok((public, admin))
}

impl ServeArgs {
    /// Builds the pool and disk settings.
    async fn configs(&self) -> anyhow::Result<(PoolConfig, DiskConfig, String)> {
        let (proxy_url, admin_url) = proxy_urls(
            self.proxy_project.as_deref(),
            self.proxy_url.as_deref(),
            self.proxy_admin_url.as_deref(),
        )?;
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let (pool, mut disk) = self.layered(file, proxy_url);
        if let Some(path) = &self.disk_init_script {
            let script = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            disk = disk.with_init_script(script);
        }
        Ok((pool, disk, admin_url))
    }

    /// Defaults, then the file, then flags.
    fn layered(&self, file: FileConfig, proxy_url: String) -> (PoolConfig, DiskConfig) {
        let mut pool = PoolConfig::default();
        let mut disk = DiskConfig::new(&self.snapshot);
        file.apply(&mut pool, &mut disk);

        pool = pool
            .with_app_image(&self.app_image)
            .with_proxy_url(proxy_url);
        pool.agent_image = self.agent_image.clone();
        if let Some(machine_type) = &self.machine_type {
            pool = pool.with_machine_type(machine_type);
        }
        if let Some(size) = self.pool_size {
            pool.target_size = size;
        }
        if let Some(network) = &self.network {
            pool = pool.with_network(network);
            disk = disk.with_network(network);
        }
        if let Some(size) = self.disk_size_gb {
            disk = disk.with_size_gb(size);
        }
        (pool, disk)
    }

    fn identity(&self) -> IdentityPolicy {
        let mut identity = IdentityPolicy {
            header: self.identity_header.clone(),
            ..Default::default()
        };
        if let Some(domain) = &self.allowed_domain {
            identity = identity.with_allowed_domain(domain);
        }
        identity
    }
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let (pool_config, disk_config, admin_url) = args.configs().await?;

    let tokens: Arc<dyn TokenSource> = Arc::new(MetadataServerToken::new());
    let compute = Arc::new(GceClient::new(&args.project, &args.zone, tokens.clone()));
    let registry = Arc::new(ProxyAdmin::new(admin_url).with_token_source(tokens));

    info!(project = %args.project, zone = %args.zone, "preparing golden disk");
    let disks = DiskManager::new(compute.clone(), disk_config)
        .await
        .context("preparing golden disk snapshot")?;

    let pool = VmPool::new(compute, registry.clone(), pool_config)
        .await
        .context("starting VM pool")?;
    let cancel = CancellationToken::new();
    let maintenance = pool.spawn_maintenance(cancel.clone());

    let assigner = Arc::new(Assigner::new(Arc::new(disks), pool, registry));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("binding port {}", args.port))?;
    info!(addr = %listener.local_addr()?, "dispatcher listening");

    let served = dispatch::serve(
        listener,
        DispatchState::new(assigner, args.identity()),
        async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        },
    )
    .await;

    cancel.cancel();
    maintenance.await.context("pool maintenance task panicked")?;
    served.context("dispatcher failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        serve: ServeArgs,
    }

    fn args(extra: &[&str]) -> ServeArgs {
        let base = [
            "warmpool",
            "--project",
            "proj",
            "--zone",
            "us-central1-a",
            "--app-image",
            "gcr.io/proj/app",
        ];
        TestCli::try_parse_from(base.iter().chain(extra).copied())
            .unwrap()
            .serve
    }

    fn file(text: &str) -> FileConfig {
        FileConfig::parse(text).unwrap()
    }

    const PROXY: &str = "https://proxy.example.com";

    #[test]
    fn file_machine_type_applies_without_flag() {
        let (pool, _) = args(&[]).layered(
            file("[pool]\nmachine_type = \"n1-highmem-8\"\n"),
            PROXY.to_string(),
        );
        assert_eq!(pool.machine_type, "n1-highmem-8");
    }

    #[test]
    fn flags_override_file() {
        let (pool, disk) = args(&["--machine-type", "e2-small", "--pool-size", "4"]).layered(
            file("[pool]\nmachine_type = \"n1-highmem-8\"\ntarget_size = 9\n"),
            PROXY.to_string(),
        );
        assert_eq!(pool.machine_type, "e2-small");
        assert_eq!(pool.target_size, 4);
        assert_eq!(disk.network, "default");
    }

    #[test]
    fn unset_flags_keep_library_defaults() {
        let (pool, disk) = args(&[]).layered(FileConfig::default(), PROXY.to_string());
        assert_eq!(pool.machine_type, "e2-standard-2");
        assert_eq!(pool.network, "default");
        assert_eq!(pool.proxy_url, PROXY);
        assert_eq!(disk.snapshot_name, "warmpool-user-disk");
    }

    #[test]
    fn network_flag_applies_to_pool_and_disk() {
        let (pool, disk) =
            args(&["--network", "pool-net"]).layered(FileConfig::default(), PROXY.to_string());
        assert_eq!(pool.network, "pool-net");
        assert_eq!(disk.network, "pool-net");
    }

    #[test]
    fn pool_size_bounds() {
        assert_eq!(parse_pool_size("3"), Ok(3));
        assert!(parse_pool_size("0").is_err());
        assert!(parse_pool_size("1001").is_err());
        assert!(parse_pool_size("many").is_err());
    }

    #[test]
    fn disk_size_bounds() {
        assert_eq!(parse_disk_size("200"), Ok(200));
        assert!(parse_disk_size("0").is_err());
        assert!(parse_disk_size("70000").is_err());
    }

    #[test]
    fn missing_file_is_rejected() {
        let err = parse_existing_file("/definitely/not/here.sh").unwrap_err();
        assert!(err.contains("file not found"));
        assert!(parse_existing_file("/").unwrap_err().contains("not a file"));
    }

    #[test]
    fn proxy_urls_derive_from_project() {
        let (public, admin) = proxy_urls(Some("my-proxy"), None, None).unwrap();
        assert_eq!(public, "https://my-proxy.appspot.com");
        assert_eq!(admin, "https://api-dot-my-proxy.appspot.com");
    }

    #[test]
    fn explicit_proxy_urls_win() {
        let (public, admin) = proxy_urls(
            Some("my-proxy"),
            Some("https://proxy.example.com"),
            Some("https://admin.example.com"),
        )
        .unwrap();
        assert_eq!(public, "https://proxy.example.com");
        assert_eq!(admin, "https://admin.example.com");
    }

    #[test]
    fn admin_url_falls_back_to_public() {
        let (public, admin) = proxy_urls(None, Some("https://proxy.example.com"), None).unwrap();
        assert_eq!(admin, public);
    }

    #[test]
    fn proxy_location_is_required() {
        assert!(proxy_urls(None, None, None).is_err());
    }
}
