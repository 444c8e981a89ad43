//! Scripted fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bootcheck_core::artifact::{
    Artifact, ArtifactMetadata, ArtifactTest, DynArtifact, DynArtifactTest, TestParams, UserData,
};
use bootcheck_core::cluster::ClusterClient;
use bootcheck_core::error::{CoreError, Result};
use bootcheck_core::ledger::{ArtifactResult, Ledger, LedgerStore};
use bootcheck_core::vm::{
    InstanceInterface, InstanceStatus, ObjectMeta, VirtualMachine, VirtualMachineInstance,
    VirtualMachineStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Point in the cluster interaction where a token gets cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Right after the VM is created.
    Create,
    /// On the n-th readiness poll (1-based).
    Poll(usize),
    /// When the instance is fetched.
    GetVmi,
}

/// Scripted cluster behavior.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// VMs report ready on this poll (1-based); never if `None`.
    pub ready_after: Option<usize>,
    /// Create fails for VMs whose name starts with this prefix.
    pub fail_create_for: Option<String>,
    /// Create stores the VM, then fails as if the reply were lost, for VMs
    /// whose name starts with this prefix.
    pub unconfirmed_create_for: Option<String>,
    /// Readiness never arrives for VMs whose name starts with this prefix.
    pub never_ready_for: Option<String>,
    pub fail_get_vm: bool,
    pub fail_get_vmi: bool,
    pub fail_delete: bool,
    /// Time a delete call takes before it is recorded.
    pub delete_delay: Option<Duration>,
    /// Cancels the token when the stage is reached.
    pub cancel_at: Option<(Stage, CancellationToken)>,
    /// Limits `cancel_at` to VMs whose name starts with this prefix.
    pub cancel_only_for: Option<String>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            ready_after: Some(1),
            fail_create_for: None,
            unconfirmed_create_for: None,
            never_ready_for: None,
            fail_get_vm: false,
            fail_get_vmi: false,
            fail_delete: false,
            delete_delay: None,
            cancel_at: None,
            cancel_only_for: None,
        }
    }
}

#[derive(Default)]
struct State {
    vms: HashMap<String, VirtualMachine>,
    polls: HashMap<String, usize>,
    created: Vec<VirtualMachine>,
    deleted: Vec<(String, Duration)>,
}

/// In-memory cluster.
pub struct FakeCluster {
    behavior: Behavior,
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            state: Mutex::new(State::default()),
        })
    }

    pub fn ready() -> Arc<Self> {
        Self::new(Behavior::default())
    }

    pub fn created(&self) -> Vec<VirtualMachine> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<(String, Duration)> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn total_polls(&self) -> usize {
        self.state.lock().unwrap().polls.values().sum()
    }

    /// VMs created and not deleted.
    pub fn live(&self) -> usize {
        self.state.lock().unwrap().vms.len()
    }

    fn cancel_if(&self, stage: Stage, name: &str) {
        if let Some((at, token)) = &self.behavior.cancel_at {
            let targeted = self
                .behavior
                .cancel_only_for
                .as_ref()
                .map_or(true, |p| name.starts_with(p.as_str()));
            if *at == stage && targeted {
                token.cancel();
            }
        }
    }
}

fn starts_with(name: &str, prefix: Option<&String>) -> bool {
    prefix.is_some_and(|p| name.starts_with(p.as_str()))
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create_vm(&self, vm: &VirtualMachine) -> Result<VirtualMachine> {
        tokio::task::yield_now().await;
        if starts_with(vm.name(), self.behavior.fail_create_for.as_ref()) {
            return Err(CoreError::cluster("admission webhook denied the request"));
        }

        let mut created = vm.clone();
        created.metadata.namespace = Some("kubevirt".to_string());
        {
            let mut state = self.state.lock().unwrap();
            state.vms.insert(created.name().to_string(), created.clone());
            state.created.push(created.clone());
        }
        self.cancel_if(Stage::Create, vm.name());
        if starts_with(vm.name(), self.behavior.unconfirmed_create_for.as_ref()) {
            return Err(CoreError::unconfirmed(vm.name(), "connection reset by peer"));
        }
        Ok(created)
    }

    async fn get_vm(&self, name: &str) -> Result<VirtualMachine> {
        if self.behavior.fail_get_vm {
            return Err(CoreError::cluster("connection refused"));
        }

        let (mut vm, poll) = {
            let mut state = self.state.lock().unwrap();
            let vm = state
                .vms
                .get(name)
                .cloned()
                .ok_or_else(|| CoreError::not_found(format!("virtualmachine/{name}")))?;
            let poll = state.polls.entry(name.to_string()).or_default();
            *poll += 1;
            (vm, *poll)
        };
        self.cancel_if(Stage::Poll(poll), name);

        let ready = !starts_with(name, self.behavior.never_ready_for.as_ref())
            && self.behavior.ready_after.is_some_and(|after| poll >= after);
        vm.status = Some(VirtualMachineStatus {
            ready,
            printable_status: Some(if ready { "Running" } else { "Starting" }.to_string()),
        });
        Ok(vm)
    }

    async fn delete_vm(&self, name: &str, grace_period: Duration) -> Result<()> {
        if let Some(delay) = self.behavior.delete_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.deleted.push((name.to_string(), grace_period));
        if self.behavior.fail_delete {
            return Err(CoreError::cluster("etcdserver: request timed out"));
        }
        state.vms.remove(name);
        Ok(())
    }

    async fn get_vmi(&self, name: &str) -> Result<VirtualMachineInstance> {
        self.cancel_if(Stage::GetVmi, name);
        if self.behavior.fail_get_vmi {
            return Err(CoreError::not_found(format!("virtualmachineinstance/{name}")));
        }
        Ok(VirtualMachineInstance {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: Some("kubevirt".to_string()),
                ..Default::default()
            },
            status: InstanceStatus {
                phase: Some("Running".to_string()),
                interfaces: vec![InstanceInterface {
                    name: Some("default".to_string()),
                    ip_address: Some("10.244.0.17".to_string()),
                }],
            },
        })
    }
}

/// What a scripted check does.
#[derive(Debug, Clone)]
pub enum Outcome {
    Pass,
    Fail,
    /// Cancels the token, then fails the way an interrupted command would.
    Cancel(CancellationToken),
}

/// Check with a fixed outcome that counts its runs.
pub struct ScriptedTest {
    name: String,
    outcome: Outcome,
    pub runs: AtomicUsize,
    pub seen_username: Mutex<Option<String>>,
}

impl ScriptedTest {
    pub fn new(name: &str, outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            outcome,
            runs: AtomicUsize::new(0),
            seen_username: Mutex::new(None),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactTest for ScriptedTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        _cancel: &CancellationToken,
        vmi: &VirtualMachineInstance,
        params: &TestParams<'_>,
    ) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        *self.seen_username.lock().unwrap() = Some(params.username.to_string());
        assert!(vmi.ip_address().is_some());

        match &self.outcome {
            Outcome::Pass => Ok(()),
            Outcome::Fail => Err(CoreError::test_failed(&self.name, "unexpected output")),
            Outcome::Cancel(token) => {
                token.cancel();
                Err(CoreError::guest("ssh: connection closed"))
            }
        }
    }
}

/// Artifact with scripted checks.
pub struct ScriptedArtifact {
    metadata: ArtifactMetadata,
    tests: Vec<DynArtifactTest>,
    pub fail_user_data: bool,
    pub rendered: Mutex<Option<UserData>>,
}

impl ScriptedArtifact {
    pub fn new(name: &str, tests: Vec<DynArtifactTest>) -> Self {
        Self {
            metadata: ArtifactMetadata::new(name),
            tests,
            fail_user_data: false,
            rendered: Mutex::new(None),
        }
    }

    pub fn passing(name: &str) -> DynArtifact {
        let check: DynArtifactTest = ScriptedTest::new("ssh", Outcome::Pass);
        Arc::new(Self::new(name, vec![check]))
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.metadata = self.metadata.with_description(description);
        self
    }
}

impl Artifact for ScriptedArtifact {
    fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    fn vm(&self, name: &str, image_ref: &str, user_data: &str) -> Result<VirtualMachine> {
        Ok(VirtualMachine::with_container_disk(name, image_ref, user_data))
    }

    fn user_data(&self, data: &UserData) -> Result<String> {
        if self.fail_user_data {
            return Err(CoreError::user_data("template error"));
        }
        *self.rendered.lock().unwrap() = Some(data.clone());
        Ok(format!(
            "#cloud-config\nuser: {}\nssh_authorized_keys:\n  - {}\n",
            data.username,
            data.authorized_keys.join("\n  - ")
        ))
    }

    fn tests(&self) -> Vec<DynArtifactTest> {
        self.tests.clone()
    }
}

/// Ledger kept in memory.
#[derive(Default)]
pub struct MemoryLedger {
    ledger: Mutex<Ledger>,
    saves: AtomicUsize,
}

impl MemoryLedger {
    pub fn with(entries: &[(&str, ArtifactResult)]) -> Arc<Self> {
        let ledger = entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect();
        Arc::new(Self {
            ledger: Mutex::new(ledger),
            saves: AtomicUsize::new(0),
        })
    }

    pub fn snapshot(&self) -> Ledger {
        self.ledger.lock().unwrap().clone()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl LedgerStore for MemoryLedger {
    fn load(&self) -> Result<Ledger> {
        Ok(self.snapshot())
    }

    fn save(&self, ledger: &Ledger) -> Result<()> {
        *self.ledger.lock().unwrap() = ledger.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn tags(tags: &[&str]) -> Vec<String> {
    tags.iter().map(|t| (*t).to_string()).collect()
}
