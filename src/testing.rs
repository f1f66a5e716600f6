// ABOUTME: In-memory compute and storage fakes for unit tests
// ABOUTME: Record every call so tests can assert what reached the remote services

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::auth::SharedKeySigner;
use crate::batch::client::ComputeService;
use crate::batch::models::{
    ExecutionInfo, ImageReference, JobSpec, PackageReference, PoolSpec, TaskSpec, TaskState,
    TaskStatus, VirtualMachineConfiguration,
};
use crate::error::{Result, RunnerError};
use crate::provision::Provisioned;
use crate::storage::client::ObjectStore;
use crate::storage::sas::{self, Capability, Permissions};

pub const TEST_KEY: &str = "c2VjcmV0LWtleS1ieXRlcw==";

pub fn package() -> PackageReference {
    PackageReference {
        application_id: "sqlpackagenetcore".to_string(),
        version: "15.0.4630.1".to_string(),
    }
}

pub fn pool_spec() -> PoolSpec {
    PoolSpec {
        id: "sqlpackage-pool".to_string(),
        vm_size: "STANDARD_D3_V2".to_string(),
        virtual_machine_configuration: VirtualMachineConfiguration {
            image_reference: ImageReference {
                publisher: "MicrosoftWindowsServer".to_string(),
                offer: "WindowsServer".to_string(),
                sku: "2016-datacenter-smalldisk".to_string(),
                version: "latest".to_string(),
            },
            node_agent_sku_id: "batch.node.windows amd64".to_string(),
        },
        target_dedicated_nodes: 1,
        application_package_references: vec![package()],
    }
}

struct ComputeState {
    pools: HashSet<String>,
    pool_creations: usize,
    lose_pool_race: bool,
    jobs: Vec<JobSpec>,
    tasks: Vec<(String, TaskSpec)>,
    script: VecDeque<TaskState>,
    exit_code: Option<i32>,
    fail_next: Option<RunnerError>,
    calls: Vec<String>,
}

impl Default for ComputeState {
    fn default() -> Self {
        Self {
            pools: HashSet::new(),
            pool_creations: 0,
            lose_pool_race: false,
            jobs: Vec::new(),
            tasks: Vec::new(),
            script: VecDeque::from([TaskState::Completed]),
            exit_code: Some(0),
            fail_next: None,
            calls: Vec::new(),
        }
    }
}

/// Compute control plane that honours create-if-absent semantics in memory.
#[derive(Default)]
pub struct FakeCompute {
    state: Mutex<ComputeState>,
}

impl FakeCompute {
    fn with_state<T>(&self, f: impl FnOnce(&mut ComputeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    fn enter(&self, call: &str) -> Result<()> {
        self.with_state(|s| {
            s.calls.push(call.to_string());
            match s.fail_next.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    pub fn add_existing_pool(&self, pool_id: &str) {
        self.with_state(|s| s.pools.insert(pool_id.to_string()));
    }

    /// The next `create_pool` finds that someone else created it first.
    pub fn lose_pool_race(&self) {
        self.with_state(|s| s.lose_pool_race = true);
    }

    pub fn fail_next_with(&self, err: RunnerError) {
        self.with_state(|s| s.fail_next = Some(err));
    }

    /// States returned by successive status polls; the last one repeats.
    pub fn script_task_states(&self, states: &[TaskState]) {
        self.with_state(|s| s.script = states.iter().copied().collect());
    }

    pub fn set_exit_code(&self, code: Option<i32>) {
        self.with_state(|s| s.exit_code = code);
    }

    pub fn pool_creations(&self) -> usize {
        self.with_state(|s| s.pool_creations)
    }

    pub fn jobs(&self) -> Vec<JobSpec> {
        self.with_state(|s| s.jobs.clone())
    }

    pub fn tasks(&self) -> Vec<(String, TaskSpec)> {
        self.with_state(|s| s.tasks.clone())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }
}

#[async_trait]
impl ComputeService for FakeCompute {
    async fn pool_exists(&self, pool_id: &str) -> Result<bool> {
        self.enter("pool_exists")?;
        Ok(self.with_state(|s| s.pools.contains(pool_id)))
    }

    async fn create_pool(&self, spec: &PoolSpec) -> Result<Provisioned> {
        self.enter("create_pool")?;
        Ok(self.with_state(|s| {
            if s.lose_pool_race {
                s.lose_pool_race = false;
                s.pools.insert(spec.id.clone());
                return Provisioned::AlreadyExists;
            }
            if s.pools.insert(spec.id.clone()) {
                s.pool_creations += 1;
                Provisioned::Created
            } else {
                Provisioned::AlreadyExists
            }
        }))
    }

    async fn create_job(&self, spec: &JobSpec) -> Result<Provisioned> {
        self.enter("create_job")?;
        Ok(self.with_state(|s| {
            if s.jobs.iter().any(|j| j.id == spec.id) {
                Provisioned::AlreadyExists
            } else {
                s.jobs.push(spec.clone());
                Provisioned::Created
            }
        }))
    }

    async fn add_task(&self, job_id: &str, task: &TaskSpec) -> Result<()> {
        self.enter("add_task")?;
        self.with_state(|s| s.tasks.push((job_id.to_string(), task.clone())));
        Ok(())
    }

    async fn task_status(&self, _job_id: &str, task_id: &str) -> Result<TaskStatus> {
        self.enter("task_status")?;
        Ok(self.with_state(|s| {
            let state = if s.script.len() > 1 {
                s.script.pop_front().unwrap_or(TaskState::Active)
            } else {
                s.script.front().copied().unwrap_or(TaskState::Active)
            };
            let execution_info = (state == TaskState::Completed).then(|| ExecutionInfo {
                exit_code: s.exit_code,
                ..Default::default()
            });
            TaskStatus {
                id: task_id.to_string(),
                state,
                execution_info,
            }
        }))
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.enter("delete_job")?;
        self.with_state(|s| s.jobs.retain(|j| j.id != job_id));
        Ok(())
    }

    async fn delete_pool(&self, pool_id: &str) -> Result<()> {
        self.enter("delete_pool")?;
        self.with_state(|s| s.pools.remove(pool_id));
        Ok(())
    }
}

/// Blob storage with a fixed account, signing capabilities with a real key.
pub struct FakeStore {
    signer: SharedKeySigner,
    containers: Mutex<HashSet<String>>,
    blobs: Mutex<HashSet<(String, String)>>,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self {
            signer: SharedKeySigner::new("store", TEST_KEY).unwrap(),
            containers: Mutex::new(HashSet::new()),
            blobs: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeStore {
    pub fn put_blob(&self, container: &str, blob: &str) {
        self.containers.lock().unwrap().insert(container.to_string());
        self.blobs
            .lock()
            .unwrap()
            .insert((container.to_string(), blob.to_string()));
    }

    pub fn has_container(&self, container: &str) -> bool {
        self.containers.lock().unwrap().contains(container)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn create_container_if_not_exists(&self, container: &str) -> Result<Provisioned> {
        self.calls.lock().unwrap().push("create_container".to_string());
        if self.containers.lock().unwrap().insert(container.to_string()) {
            Ok(Provisioned::Created)
        } else {
            Ok(Provisioned::AlreadyExists)
        }
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool> {
        self.calls.lock().unwrap().push("blob_exists".to_string());
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .contains(&(container.to_string(), blob.to_string())))
    }

    fn container_capability(
        &self,
        container: &str,
        permissions: Permissions,
        expiry: DateTime<Utc>,
    ) -> Result<Capability> {
        self.calls.lock().unwrap().push("container_capability".to_string());
        let url = Url::parse(&format!("https://store.blob.core.windows.net/{}", container))
            .map_err(|e| RunnerError::config(e.to_string()))?;
        Ok(sas::container_capability(
            &self.signer,
            url,
            container,
            permissions,
            expiry,
        ))
    }
}
