//! Guest-side configuration for pooled and throwaway VMs.
//!
//! Pooled VMs boot a cloud-init config that starts the proxy agent at once,
//! then waits for the user disk to be attached, mounts it and starts the
//! application container on top of it. Both containers restart forever.
//!
//! The throwaway VM used to build the golden snapshot runs a startup script
//! that formats and initializes the blank disk and powers the VM off.

use handlebars::Handlebars;
use serde::Serialize;
use warmpool_core::{Error, Result};

/// Device name the user disk is attached under.
pub const USER_DISK_DEVICE: &str = "user-disk";
/// Where the user disk is mounted inside the guest.
pub const USER_DISK_MOUNT: &str = "/mnt/disks/user";
/// Metadata key the guest reads its cloud-init config from.
pub const USER_DATA_KEY: &str = "user-data";
/// Metadata key for the script the init VM runs at boot.
pub const STARTUP_SCRIPT_KEY: &str = "startup-script";
/// Metadata key carrying the optional disk initialization script.
pub const INIT_SCRIPT_KEY: &str = "init-script";

const CLOUD_CONFIG: &str = r#"#cloud-config

users:
- name: warmpool
  uid: 2000

write_files:
- path: /etc/systemd/system/user-disk.service
  permissions: '0644'
  owner: root
  content: |
    [Unit]
    Description=Mount the user disk once it is attached

    [Service]
    Type=oneshot
    RemainAfterExit=true
    ExecStart=/bin/bash -c 'while [ ! -e {{device}} ]; do sleep 1; done; mkdir -p {{mount}}; mount -o discard,defaults {{device}} {{mount}}; chmod a+w {{mount}}'

- path: /etc/systemd/system/proxy-agent.service
  permissions: '0644'
  owner: root
  content: |
    [Unit]
    Description=Reverse proxy agent for backend {{backend_id}}
    Wants=network-online.target
    After=network-online.target

    [Service]
    Environment="HOME=/home/warmpool"
    ExecStartPre=/usr/bin/docker-credential-gcr configure-docker
    ExecStart=/usr/bin/docker run --rm --name=proxy-agent --network=host {{agent_image}} /opt/bin/proxy-forwarding-agent --proxy={{proxy_url}}/ --proxy-timeout=60s --backend={{backend_id}} --host={{proxied_host}} --shim-websockets=true --shim-path=websocket-shim --health-check-path=/ --health-check-interval-seconds=30
    ExecStop=/usr/bin/docker stop proxy-agent
    Restart=always
    RestartSec=5

- path: /etc/systemd/system/app.service
  permissions: '0644'
  owner: root
  content: |
    [Unit]
    Description=User application
    Requires=user-disk.service
    After=user-disk.service proxy-agent.service

    [Service]
    Environment="HOME=/home/warmpool"
    ExecStartPre=/usr/bin/docker-credential-gcr configure-docker
    ExecStart=/usr/bin/docker run --rm --name=app --network=host -v {{mount}}:/home/user {{app_image}}
    ExecStop=/usr/bin/docker stop app
    Restart=always
    RestartSec=5

runcmd:
- systemctl daemon-reload
- systemctl start proxy-agent.service
- systemctl start --no-block user-disk.service app.service
"#;

const STARTUP_SCRIPT: &str = r#"#!/bin/bash
set -euo pipefail

DEVICE={{device}}
MOUNT={{mount}}

while [ ! -e "${DEVICE}" ]; do
  sleep 1
done

mkfs.ext4 -F -m 0 -E lazy_itable_init=0,lazy_journal_init=0,discard "${DEVICE}"
mkdir -p "${MOUNT}"
mount -o discard,defaults "${DEVICE}" "${MOUNT}"
chmod a+w "${MOUNT}"

curl -sf -H "Metadata-Flavor: Google" \
  "http://metadata.google.internal/computeMetadata/v1/instance/attributes/{{init_key}}" \
  > /tmp/disk-init.sh || true
if [ -s /tmp/disk-init.sh ]; then
  (cd "${MOUNT}" && bash /tmp/disk-init.sh)
fi

sync
umount "${MOUNT}"
shutdown -h now
"#;

/// Values substituted into the pooled VM's cloud-init config.
#[derive(Debug, Clone, Serialize)]
pub struct GuestParams<'a> {
    pub backend_id: &'a str,
    pub proxy_url: &'a str,
    pub agent_image: &'a str,
    pub app_image: &'a str,
    pub proxied_host: &'a str,
}

#[derive(Serialize)]
struct CloudConfigData<'a> {
    #[serde(flatten)]
    params: &'a GuestParams<'a>,
    device: String,
    mount: &'static str,
}

#[derive(Serialize)]
struct StartupData {
    device: String,
    mount: &'static str,
    init_key: &'static str,
}

fn engine() -> Handlebars<'static> {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(true);
    hb.register_escape_fn(handlebars::no_escape);
    hb
}

fn device_path() -> String {
    format!("/dev/disk/by-id/google-{USER_DISK_DEVICE}")
}

pub fn render_cloud_config(params: &GuestParams<'_>) -> Result<String> {
    let data = CloudConfigData {
        params,
        device: device_path(),
        mount: USER_DISK_MOUNT,
    };
    engine()
        .render_template(CLOUD_CONFIG, &data)
        .map_err(|e| Error::InvalidConfig(format!("cloud-init template: {e}")))
}

pub fn render_startup_script() -> Result<String> {
    let data = StartupData {
        device: device_path(),
        mount: USER_DISK_MOUNT,
        init_key: INIT_SCRIPT_KEY,
    };
    engine()
        .render_template(STARTUP_SCRIPT, &data)
        .map_err(|e| Error::InvalidConfig(format!("startup script template: {e}")))
}
