//! Which pooled VMs should be deleted.

use crate::config::ReclaimLimits;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use warmpool_core::{Instance, VmState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimReason {
    /// The proxy reports the VM's backend as unused for too long.
    Idle,
    /// Owned by a user, but the assignment time is missing or unreadable.
    MissingAssignmentTime,
    /// Assigned longer ago than the assignment limit.
    AssignmentExpired,
    /// Owner recorded but the user disk never got attached.
    AttachTimedOut,
    /// Free but created too long ago.
    Stale,
}

impl fmt::Display for ReclaimReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::MissingAssignmentTime => "missing assignment time",
            Self::AssignmentExpired => "assignment expired",
            Self::AttachTimedOut => "disk attach timed out",
            Self::Stale => "stale",
        };
        f.write_str(s)
    }
}

/// True if `t` lies strictly before `now - limit`.
fn older_than(t: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    TimeDelta::from_std(limit)
        .ok()
        .and_then(|limit| now.checked_sub_signed(limit))
        .is_some_and(|cutoff| t < cutoff)
}

/// Why `vm` should be reclaimed, or `None` if it should stay.
///
/// VMs without a backend id are not pool-managed and always stay.
pub fn reclaim_reason(
    vm: &Instance,
    idle_backends: &HashSet<&str>,
    now: DateTime<Utc>,
    limits: &ReclaimLimits,
) -> Option<ReclaimReason> {
    let backend_id = vm.backend_id()?;
    if idle_backends.contains(backend_id) {
        return Some(ReclaimReason::Idle);
    }

    match vm.state() {
        VmState::Free => {
            older_than(vm.creation_timestamp, now, limits.stale).then_some(ReclaimReason::Stale)
        }
        state => {
            let Some(assigned_at) = vm.assigned_at() else {
                return Some(ReclaimReason::MissingAssignmentTime);
            };
            if older_than(assigned_at, now, limits.assigned) {
                Some(ReclaimReason::AssignmentExpired)
            } else if state == VmState::PartiallyAssigned
                && older_than(assigned_at, now, limits.partially_assigned)
            {
                Some(ReclaimReason::AttachTimedOut)
            } else {
                None
            }
        }
    }
}

/// The VMs among `vms` that should be deleted at `now`.
pub fn too_old_vms(
    vms: &[Instance],
    idle_backends: &[String],
    now: DateTime<Utc>,
    limits: &ReclaimLimits,
) -> Vec<Instance> {
    let idle: HashSet<&str> = idle_backends.iter().map(String::as_str).collect();
    vms.iter()
        .filter(|vm| reclaim_reason(vm, &idle, now, limits).is_some())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use warmpool_core::{
        AttachedDisk, BACKEND_ID_KEY, FOR_USER_KEY, FOR_USER_TIMESTAMP_KEY, InstanceStatus,
        Metadata,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn limits() -> ReclaimLimits {
        ReclaimLimits {
            idle: Duration::from_secs(90 * 60),
            assigned: Duration::from_secs(12 * 3600),
            partially_assigned: Duration::from_secs(10 * 60),
            stale: Duration::from_secs(24 * 3600),
        }
    }

    fn boot_disk() -> AttachedDisk {
        AttachedDisk {
            device_name: "persistent-disk-0".to_string(),
            source: "zones/z/disks/vm".to_string(),
            boot: true,
        }
    }

    fn user_disk() -> AttachedDisk {
        AttachedDisk {
            device_name: "user-disk".to_string(),
            source: "zones/z/disks/user-x-disk".to_string(),
            boot: false,
        }
    }

    fn vm(name: &str, created: DateTime<Utc>) -> Instance {
        Instance {
            name: name.to_string(),
            self_link: format!("zones/z/instances/{name}"),
            status: InstanceStatus::Running,
            creation_timestamp: created,
            disks: vec![boot_disk()],
            service_accounts: Vec::new(),
            metadata: Metadata::new()
                .with(BACKEND_ID_KEY, format!("{name}-backend"))
                .with(FOR_USER_KEY, ""),
        }
    }

    fn assigned(mut vm: Instance, at: &str, attached: bool) -> Instance {
        vm.metadata.set(FOR_USER_KEY, "alice@example.com");
        vm.metadata.set(FOR_USER_TIMESTAMP_KEY, at);
        if attached {
            vm.disks.push(user_disk());
        }
        vm
    }

    fn names(vms: Vec<Instance>) -> Vec<String> {
        vms.into_iter().map(|vm| vm.name).collect()
    }

    fn reason(vm: &Instance) -> Option<ReclaimReason> {
        reclaim_reason(vm, &HashSet::new(), now(), &limits())
    }

    #[test]
    fn free_vm_at_stale_cutoff_is_kept() {
        let cutoff = now() - TimeDelta::hours(24);
        assert_eq!(reason(&vm("a", cutoff)), None);
        assert_eq!(
            reason(&vm("b", cutoff - TimeDelta::seconds(1))),
            Some(ReclaimReason::Stale)
        );
    }

    #[test]
    fn fresh_free_vm_is_kept() {
        assert_eq!(reason(&vm("a", now() - TimeDelta::minutes(5))), None);
    }

    #[test]
    fn unmanaged_vm_is_never_reclaimed() {
        let mut old = vm("legacy", now() - TimeDelta::days(30));
        old.metadata.remove(BACKEND_ID_KEY);
        let idle = HashSet::from(["legacy-backend"]);
        assert_eq!(reclaim_reason(&old, &idle, now(), &limits()), None);
    }

    #[test]
    fn idle_backend_is_reclaimed_regardless_of_age() {
        let fresh = vm("a", now());
        let idle = HashSet::from(["a-backend"]);
        assert_eq!(
            reclaim_reason(&fresh, &idle, now(), &limits()),
            Some(ReclaimReason::Idle)
        );
    }

    #[test]
    fn assignment_expires_after_limit() {
        let created = now() - TimeDelta::hours(13);
        let at_cutoff = assigned(vm("a", created), "2024-06-01T00:00:00Z", true);
        let past_cutoff = assigned(vm("b", created), "2024-05-31T23:59:59Z", true);

        assert_eq!(reason(&at_cutoff), None);
        assert_eq!(reason(&past_cutoff), Some(ReclaimReason::AssignmentExpired));
    }

    #[test]
    fn partially_assigned_vm_gets_a_short_deadline() {
        let created = now() - TimeDelta::hours(1);
        let waiting = assigned(vm("a", created), "2024-06-01T11:55:00Z", false);
        let stuck = assigned(vm("b", created), "2024-06-01T11:49:59Z", false);
        let attached = assigned(vm("c", created), "2024-06-01T11:49:59Z", true);

        assert_eq!(reason(&waiting), None);
        assert_eq!(reason(&stuck), Some(ReclaimReason::AttachTimedOut));
        assert_eq!(reason(&attached), None);
    }

    #[test]
    fn unreadable_assignment_time_is_reclaimed() {
        let created = now() - TimeDelta::minutes(1);
        let garbage = assigned(vm("a", created), "yesterday", true);
        let mut missing = assigned(vm("b", created), "", true);
        missing.metadata.remove(FOR_USER_TIMESTAMP_KEY);

        assert_eq!(reason(&garbage), Some(ReclaimReason::MissingAssignmentTime));
        assert_eq!(reason(&missing), Some(ReclaimReason::MissingAssignmentTime));
    }

    #[test]
    fn too_old_vms_selects_only_reclaimable() {
        let vms = vec![
            vm("fresh", now() - TimeDelta::hours(1)),
            vm("stale", now() - TimeDelta::hours(25)),
            vm("idle", now() - TimeDelta::hours(1)),
            assigned(vm("busy", now()), "2024-06-01T11:00:00Z", true),
        ];
        let idle = vec!["idle-backend".to_string(), "unknown-backend".to_string()];

        assert_eq!(
            names(too_old_vms(&vms, &idle, now(), &limits())),
            vec!["stale", "idle"]
        );
    }

    #[test]
    fn huge_limit_never_reclaims() {
        let mut limits = limits();
        limits.stale = Duration::MAX;
        let ancient = vm("a", Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(
            reclaim_reason(&ancient, &HashSet::new(), now(), &limits),
            None
        );
    }
}
