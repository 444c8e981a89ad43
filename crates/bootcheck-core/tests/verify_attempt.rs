//! Single-artifact verification attempts against a scripted cluster.

mod common;

use bootcheck_core::artifact::{Artifact, DynArtifactTest};
use bootcheck_core::cluster::DynClusterClient;
use bootcheck_core::error::CoreError;
use bootcheck_core::ledger::ArtifactResult;
use bootcheck_core::verify::{Verifier, VerifyOptions, VmLease};
use bootcheck_core::vm::VolumeSource;
use common::{Behavior, FakeCluster, Outcome, ScriptedArtifact, ScriptedTest, Stage, tags};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn verifier(cluster: &Arc<FakeCluster>) -> Verifier {
    let client: DynClusterClient = cluster.clone();
    Verifier::new(
        client,
        VerifyOptions {
            registry: "quay.io/containerdisks".to_string(),
            ..VerifyOptions::default()
        },
    )
}

fn fedora() -> ArtifactResult {
    ArtifactResult::pending(tags(&["fedora:39", "fedora:latest"]))
}

fn checks(tests: &[&Arc<ScriptedTest>]) -> Vec<DynArtifactTest> {
    tests
        .iter()
        .map(|t| Arc::clone(*t) as DynArtifactTest)
        .collect()
}

#[tokio::test]
async fn test_verified_artifact() {
    let cluster = FakeCluster::ready();
    let ssh = ScriptedTest::new("ssh", Outcome::Pass);
    let release = ScriptedTest::new("os-release", Outcome::Pass);
    let artifact = ScriptedArtifact::new("fedora", checks(&[&ssh, &release]));

    let result = verifier(&cluster)
        .verify(&CancellationToken::new(), &artifact, &fedora())
        .await
        .unwrap();

    assert_eq!(result, Some(ArtifactResult::verified(tags(&["fedora:39", "fedora:latest"]))));
    assert_eq!(ssh.runs(), 1);
    assert_eq!(release.runs(), 1);
    assert_eq!(ssh.seen_username.lock().unwrap().as_deref(), Some("verify"));

    let created = cluster.created();
    assert_eq!(created.len(), 1);
    let vm = &created[0];
    assert!(vm.name().starts_with("fedora-"));
    assert_eq!(vm.name().len(), "fedora-".len() + 5);
    assert_eq!(vm.image(), Some("quay.io/containerdisks/fedora:39"));

    let rendered = artifact.rendered.lock().unwrap().clone().unwrap();
    assert_eq!(rendered.username, "verify");
    assert_eq!(rendered.authorized_keys.len(), 1);
    assert!(rendered.authorized_keys[0].starts_with("ssh-ed25519 "));
    assert!(vm.user_data().unwrap().contains(&rendered.authorized_keys[0]));

    assert_eq!(cluster.deleted(), vec![(vm.name().to_string(), Duration::ZERO)]);
    assert_eq!(cluster.live(), 0);
}

#[tokio::test]
async fn test_each_attempt_gets_fresh_credentials_and_name() {
    let cluster = FakeCluster::ready();
    let artifact = ScriptedArtifact::new("fedora", Vec::new());
    let verifier = verifier(&cluster);

    verifier.verify(&CancellationToken::new(), &artifact, &fedora()).await.unwrap();
    let first = artifact.rendered.lock().unwrap().clone().unwrap();
    verifier.verify(&CancellationToken::new(), &artifact, &fedora()).await.unwrap();
    let second = artifact.rendered.lock().unwrap().clone().unwrap();

    assert_ne!(first.authorized_keys, second.authorized_keys);
    let created = cluster.created();
    assert_ne!(created[0].name(), created[1].name());
}

#[tokio::test]
async fn test_no_tags_creates_nothing() {
    let cluster = FakeCluster::ready();
    let artifact = ScriptedArtifact::new("fedora", Vec::new());

    let result = verifier(&cluster)
        .verify(&CancellationToken::new(), &artifact, &ArtifactResult::pending(Vec::new()))
        .await
        .unwrap();

    assert_eq!(result, None);
    assert!(cluster.created().is_empty());
    assert!(artifact.rendered.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_render_failure_creates_nothing() {
    let cluster = FakeCluster::ready();
    let mut artifact = ScriptedArtifact::new("fedora", Vec::new());
    artifact.fail_user_data = true;

    let err = verifier(&cluster)
        .verify(&CancellationToken::new(), &artifact, &fedora())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::UserData(_)));
    assert!(cluster.created().is_empty());
    assert!(cluster.deleted().is_empty());
}

#[tokio::test]
async fn test_create_failure_deletes_nothing() {
    let cluster = FakeCluster::new(Behavior {
        fail_create_for: Some("fedora".to_string()),
        ..Behavior::default()
    });
    let artifact = ScriptedArtifact::new("fedora", Vec::new());

    let err = verifier(&cluster)
        .verify(&CancellationToken::new(), &artifact, &fedora())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Cluster(_)));
    assert!(cluster.deleted().is_empty());
}

#[tokio::test]
async fn test_unconfirmed_create_still_deletes_vm() {
    let cluster = FakeCluster::new(Behavior {
        unconfirmed_create_for: Some("fedora-".to_string()),
        ..Behavior::default()
    });
    let artifact = ScriptedArtifact::new("fedora", Vec::new());

    let err = verifier(&cluster)
        .verify(&CancellationToken::new(), &artifact, &fedora())
        .await
        .unwrap_err();

    let created = cluster.created();
    assert_eq!(created.len(), 1);
    assert_eq!(err.submitted_vm(), Some(created[0].name()));
    assert_eq!(cluster.deleted(), vec![(created[0].name().to_string(), Duration::ZERO)]);
    assert_eq!(cluster.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_release_deletes_again() {
    let cluster = FakeCluster::new(Behavior {
        delete_delay: Some(Duration::from_secs(1)),
        ..Behavior::default()
    });
    let client: DynClusterClient = cluster.clone();
    let lease = VmLease::new(client, "fedora-x2b4k".to_string());

    let interrupted = tokio::time::timeout(Duration::from_millis(100), lease.release()).await;
    assert!(interrupted.is_err());
    assert!(cluster.deleted().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(cluster.deleted(), vec![("fedora-x2b4k".to_string(), Duration::ZERO)]);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_deletes_vm() {
    let cluster = FakeCluster::new(Behavior {
        ready_after: None,
        ..Behavior::default()
    });
    let ssh = ScriptedTest::new("ssh", Outcome::Pass);
    let artifact = ScriptedArtifact::new("fedora", checks(&[&ssh]));
    let verifier = Verifier::new(
        cluster.clone(),
        VerifyOptions {
            registry: "quay.io/containerdisks".to_string(),
            ready_timeout: Duration::from_secs(30),
            ..VerifyOptions::default()
        },
    );

    let started = tokio::time::Instant::now();
    let err = verifier
        .verify(&CancellationToken::new(), &artifact, &fedora())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert!(cluster.total_polls() >= 30);
    assert_eq!(ssh.runs(), 0);
    assert_eq!(cluster.deleted().len(), 1);
    assert_eq!(cluster.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ready_after_several_polls() {
    let cluster = FakeCluster::new(Behavior {
        ready_after: Some(4),
        ..Behavior::default()
    });
    let artifact = ScriptedArtifact::new("fedora", Vec::new());

    let started = tokio::time::Instant::now();
    let result = verifier(&cluster)
        .verify(&CancellationToken::new(), &artifact, &fedora())
        .await
        .unwrap();

    assert!(result.is_some_and(|r| r.verified));
    assert_eq!(cluster.total_polls(), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test]
async fn test_readiness_fetch_error_deletes_vm() {
    let cluster = FakeCluster::new(Behavior {
        fail_get_vm: true,
        ..Behavior::default()
    });
    let artifact = ScriptedArtifact::new("fedora", Vec::new());

    let err = verifier(&cluster)
        .verify(&CancellationToken::new(), &artifact, &fedora())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Cluster(_)));
    assert_eq!(cluster.deleted().len(), 1);
}

#[tokio::test]
async fn test_instance_fetch_error_deletes_vm() {
    let cluster = FakeCluster::new(Behavior {
        fail_get_vmi: true,
        ..Behavior::default()
    });
    let ssh = ScriptedTest::new("ssh", Outcome::Pass);
    let artifact = ScriptedArtifact::new("fedora", checks(&[&ssh]));

    let err = verifier(&cluster)
        .verify(&CancellationToken::new(), &artifact, &fedora())
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(ssh.runs(), 0);
    assert_eq!(cluster.deleted().len(), 1);
}

#[tokio::test]
async fn test_failing_check_stops_later_checks() {
    let cluster = FakeCluster::ready();
    let first = ScriptedTest::new("ssh", Outcome::Pass);
    let second = ScriptedTest::new("os-release", Outcome::Fail);
    let third = ScriptedTest::new("cloud-init", Outcome::Pass);
    let artifact = ScriptedArtifact::new("fedora", checks(&[&first, &second, &third]));

    let err = verifier(&cluster)
        .verify(&CancellationToken::new(), &artifact, &fedora())
        .await
        .unwrap_err();

    assert!(err.is_test_failure());
    assert!(err.to_string().contains("os-release"));
    assert_eq!((first.runs(), second.runs(), third.runs()), (1, 1, 0));
    assert_eq!(cluster.deleted().len(), 1);
    assert_eq!(cluster.live(), 0);
}

#[tokio::test]
async fn test_delete_failure_does_not_change_outcome() {
    let cluster = FakeCluster::new(Behavior {
        fail_delete: true,
        ..Behavior::default()
    });
    let artifact = ScriptedArtifact::new("fedora", Vec::new());

    let result = verifier(&cluster)
        .verify(&CancellationToken::new(), &artifact, &fedora())
        .await
        .unwrap();

    assert!(result.is_some_and(|r| r.verified));
    assert_eq!(cluster.deleted().len(), 1);
}

#[tokio::test]
async fn test_cancelled_before_create() {
    let cluster = FakeCluster::ready();
    let artifact = ScriptedArtifact::new("fedora", Vec::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = verifier(&cluster).verify(&cancel, &artifact, &fedora()).await.unwrap();

    assert_eq!(result, None);
    assert!(cluster.created().is_empty());
}

async fn cancelled_at(stage: Stage) -> (Option<ArtifactResult>, Arc<FakeCluster>, Arc<ScriptedTest>) {
    let cancel = CancellationToken::new();
    let cluster = FakeCluster::new(Behavior {
        ready_after: Some(3),
        cancel_at: Some((stage, cancel.clone())),
        ..Behavior::default()
    });
    let ssh = ScriptedTest::new("ssh", Outcome::Pass);
    let artifact = ScriptedArtifact::new("fedora", checks(&[&ssh]));

    let result = verifier(&cluster)
        .verify(&cancel, &artifact, &fedora())
        .await
        .unwrap();
    (result, cluster, ssh)
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_after_create() {
    let (result, cluster, ssh) = cancelled_at(Stage::Create).await;

    assert_eq!(result, None);
    assert_eq!(cluster.total_polls(), 0);
    assert_eq!(ssh.runs(), 0);
    assert_eq!(cluster.deleted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_while_waiting_for_readiness() {
    let (result, cluster, ssh) = cancelled_at(Stage::Poll(2)).await;

    assert_eq!(result, None);
    assert_eq!(cluster.total_polls(), 2);
    assert_eq!(ssh.runs(), 0);
    assert_eq!(cluster.deleted().len(), 1);
    assert_eq!(cluster.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_while_fetching_instance() {
    let (result, cluster, ssh) = cancelled_at(Stage::GetVmi).await;

    assert_eq!(result, None);
    assert_eq!(ssh.runs(), 0);
    assert_eq!(cluster.deleted().len(), 1);
}

#[tokio::test]
async fn test_cancelled_during_check() {
    let cancel = CancellationToken::new();
    let cluster = FakeCluster::ready();
    let first = ScriptedTest::new("ssh", Outcome::Cancel(cancel.clone()));
    let second = ScriptedTest::new("os-release", Outcome::Pass);
    let artifact = ScriptedArtifact::new("fedora", checks(&[&first, &second]));

    let result = verifier(&cluster).verify(&cancel, &artifact, &fedora()).await.unwrap();

    assert_eq!(result, None);
    assert_eq!(second.runs(), 0);
    assert_eq!(cluster.deleted().len(), 1);
}

#[tokio::test]
async fn test_dropped_attempt_still_deletes_vm() {
    let cluster = FakeCluster::new(Behavior {
        ready_after: None,
        ..Behavior::default()
    });
    let artifact: Arc<dyn Artifact> = Arc::new(ScriptedArtifact::new("fedora", Vec::new()));
    let verifier = Arc::new(verifier(&cluster));

    let task = {
        let verifier = Arc::clone(&verifier);
        let artifact = Arc::clone(&artifact);
        tokio::spawn(async move {
            verifier
                .verify(&CancellationToken::new(), artifact.as_ref(), &fedora())
                .await
        })
    };

    while cluster.total_polls() == 0 {
        tokio::task::yield_now().await;
    }
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    for _ in 0..10 {
        if !cluster.deleted().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(cluster.deleted().len(), 1);
}

#[tokio::test]
async fn test_vm_shape_sent_to_cluster() {
    let cluster = FakeCluster::ready();
    let artifact = ScriptedArtifact::new("centos-stream", Vec::new()).with_description("centos-stream:9");

    verifier(&cluster)
        .verify(
            &CancellationToken::new(),
            &artifact,
            &ArtifactResult::pending(tags(&["centos-stream:9"])),
        )
        .await
        .unwrap();

    let vm = &cluster.created()[0];
    assert!(vm.spec.running);
    assert_eq!(vm.spec.template.spec.termination_grace_period_seconds, Some(0));
    assert!(vm.name().starts_with("centos-stream-"));
    assert!(matches!(
        &vm.spec.template.spec.volumes[0].source,
        VolumeSource::ContainerDisk { image } if image == "quay.io/containerdisks/centos-stream:9"
    ));
}
