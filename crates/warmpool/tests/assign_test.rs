use std::sync::Arc;
use std::time::Duration;
use warmpool::test_utils::{FakeCompute, RecordingRegistry};
use warmpool::{Assigner, DiskConfig, DiskManager, Error, PoolConfig, VmPool, disk_name};

struct Stack {
    compute: Arc<FakeCompute>,
    registry: Arc<RecordingRegistry>,
    assigner: Assigner,
}

async fn stack(config: PoolConfig) -> Stack {
    let compute = Arc::new(FakeCompute::new());
    let registry = Arc::new(RecordingRegistry::new());
    compute.put_snapshot(compute.snapshot("golden"));

    let mut disk_config = DiskConfig::new("golden");
    disk_config.operation_poll = Duration::from_millis(1);
    let disks = DiskManager::new(compute.clone(), disk_config).await.unwrap();
    let pool = VmPool::new(compute.clone(), registry.clone(), config)
        .await
        .unwrap();

    Stack {
        assigner: Assigner::new(Arc::new(disks), pool, registry.clone()),
        compute,
        registry,
    }
}

fn config(target: usize) -> PoolConfig {
    let mut config = PoolConfig::default()
        .with_target_size(target)
        .with_proxy_url("https://proxy.example.com");
    config.operation_poll = Duration::from_millis(1);
    config.claim_timeout = Duration::from_millis(200);
    config
}

#[tokio::test]
async fn first_request_attaches_disk_and_registers_user() {
    let s = stack(config(1)).await;
    let user = "alice@example.com";

    let vm = s.assigner.assign(user).await.unwrap();

    assert_eq!(vm.for_user(), user);
    assert_eq!(vm.data_disk_names().collect::<Vec<_>>(), vec![disk_name(user)]);
    let disk = s.compute.disk(&disk_name(user)).unwrap();
    assert_eq!(disk.users, vec![vm.self_link.clone()]);

    let last = s.registry.registrations().pop().unwrap();
    assert_eq!(last.user, user);
    assert_eq!(last.instance, vm.name);
    assert_eq!(Some(last.backend_id.as_str()), vm.backend_id());
}

#[tokio::test]
async fn second_request_reuses_attached_vm() {
    let s = stack(config(1)).await;
    let user = "alice@example.com";

    let first = s.assigner.assign(user).await.unwrap();
    let second = s.assigner.assign(user).await.unwrap();

    assert_eq!(first.name, second.name);
    assert_eq!(s.compute.calls("set_metadata"), 1);
    assert_eq!(s.compute.calls("attach_disk"), 1);
    assert_eq!(s.compute.calls("insert_disk"), 1);

    let for_alice: Vec<_> = s
        .registry
        .registrations()
        .into_iter()
        .filter(|r| r.user == user)
        .collect();
    assert_eq!(for_alice.len(), 2);
    assert!(for_alice.iter().all(|r| r.instance == first.name));
}

#[tokio::test]
async fn users_get_separate_vms() {
    let s = stack(config(2)).await;

    let alice = s.assigner.assign("alice@example.com").await.unwrap();
    let bob = s.assigner.assign("bob@example.com").await.unwrap();

    assert_ne!(alice.name, bob.name);
    assert_ne!(
        alice.data_disk_names().next(),
        bob.data_disk_names().next()
    );
}

#[tokio::test]
async fn failed_attach_deletes_claimed_vm_and_retries() {
    let s = stack(config(2)).await;
    s.compute.fail_next(
        "attach_disk",
        Error::Api {
            status: 500,
            message: "internal".to_string(),
        },
    );

    let vm = s.assigner.assign("alice@example.com").await.unwrap();

    assert_eq!(s.compute.calls("attach_disk"), 2);
    let remaining = s.compute.instances();
    assert_eq!(remaining.len(), 1, "claimed VM was not deleted");
    assert_eq!(remaining[0].name, vm.name);
    assert_eq!(s.compute.service_accounts().len(), 1);
}

#[tokio::test]
async fn attach_gives_up_after_attempt_limit() {
    let mut config = config(3);
    config.assign_attempts = 2;
    let s = stack(config).await;
    for _ in 0..2 {
        s.compute.fail_next(
            "attach_disk",
            Error::Api {
                status: 500,
                message: "internal".to_string(),
            },
        );
    }

    let err = s.assigner.assign("alice@example.com").await.unwrap_err();

    assert!(matches!(err, Error::Provisioning(_)), "{err}");
    assert_eq!(s.compute.instances().len(), 1);
    assert!(
        s.registry
            .registrations()
            .iter()
            .all(|r| r.user.is_empty())
    );
}

#[tokio::test]
async fn registration_failure_is_returned() {
    let s = stack(config(1)).await;
    s.registry.fail_registrations(1);

    let err = s.assigner.assign("alice@example.com").await.unwrap_err();

    assert!(matches!(err, Error::Proxy(_)), "{err}");
}

#[tokio::test]
async fn disk_errors_stop_the_pipeline() {
    let s = stack(config(1)).await;
    s.compute.fail_next(
        "get_disk",
        Error::Api {
            status: 403,
            message: "forbidden".to_string(),
        },
    );

    let err = s.assigner.get_or_create_vm("alice@example.com").await.unwrap_err();

    assert!(matches!(err, Error::Api { status: 403, .. }));
    assert_eq!(s.compute.calls("set_metadata"), 0);
}
