// ABOUTME: Sequences validation, provisioning, capability issuance, submission and monitoring
// ABOUTME: Export and import share one pipeline; any error stops the run at its stage

use chrono::Utc;
use std::fmt;
use tracing::{info, warn};

use crate::batch::client::ComputeService;
use crate::batch::models::{
    ImageReference, JobConstraints, PackageReference, PoolSpec, TaskState, TaskStatus,
    VirtualMachineConfiguration,
};
use crate::capability::CapabilityIssuer;
use crate::config::{CleanupPolicy, Config};
use crate::error::RunnerError;
use crate::monitor::{self, MonitorOutcome, MonitorSettings};
use crate::params::{self, Action, OperationParameters, RawParameters};
use crate::provision::{self, Provisioned};
use crate::storage::client::ObjectStore;
use crate::storage::sas::Capability;
use crate::task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    PreconditionChecking,
    PoolEnsuring,
    JobEnsuring,
    CapabilityIssuing,
    TaskSubmitting,
    Monitoring,
    CleaningUp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating parameters",
            Stage::PreconditionChecking => "checking storage preconditions",
            Stage::PoolEnsuring => "ensuring pool",
            Stage::JobEnsuring => "ensuring job",
            Stage::CapabilityIssuing => "issuing storage capability",
            Stage::TaskSubmitting => "submitting task",
            Stage::Monitoring => "monitoring tasks",
            Stage::CleaningUp => "cleaning up",
        };
        f.write_str(name)
    }
}

/// The run ended in `Failed` while in `stage`.
#[derive(Debug)]
pub struct PipelineFailure {
    pub stage: Stage,
    pub error: RunnerError,
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Run failed while {}: {}", self.stage, self.error)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Everything a run needs that does not come from the parameter file.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub pool: PoolSpec,
    pub job_id: String,
    pub package: PackageReference,
    pub monitor: MonitorSettings,
    pub capability_lifetime: chrono::Duration,
    pub cleanup: CleanupPolicy,
    pub fail_on_task_error: bool,
}

impl From<&Config> for RunSettings {
    fn from(config: &Config) -> Self {
        let package = PackageReference {
            application_id: config.package.id.clone(),
            version: config.package.version.clone(),
        };
        let image = &config.pool.image;
        Self {
            pool: PoolSpec {
                id: config.pool.id.clone(),
                vm_size: config.pool.vm_size.clone(),
                virtual_machine_configuration: VirtualMachineConfiguration {
                    image_reference: ImageReference {
                        publisher: image.publisher.clone(),
                        offer: image.offer.clone(),
                        sku: image.sku.clone(),
                        version: image.version.clone(),
                    },
                    node_agent_sku_id: config.pool.node_agent_sku.clone(),
                },
                target_dedicated_nodes: config.pool.node_count,
                application_package_references: vec![package.clone()],
            },
            job_id: config.job.id.clone(),
            package,
            monitor: MonitorSettings {
                timeout: config.monitor.timeout(),
                poll_interval: config.monitor.poll_interval(),
            },
            capability_lifetime: chrono::Duration::hours(i64::from(
                config.storage.capability_lifetime_hours,
            )),
            cleanup: config.cleanup,
            fail_on_task_error: config.fail_on_task_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    Retained,
    DeletedJob,
    DeletedJobAndPool,
}

#[derive(Debug)]
pub struct RunReport {
    pub action: Action,
    pub pool: Provisioned,
    pub job: Provisioned,
    pub task_id: String,
    pub tasks: Vec<TaskStatus>,
    pub cleanup: CleanupOutcome,
}

impl RunReport {
    /// Tasks that reached "completed" with a nonzero or missing exit code.
    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskStatus> {
        self.tasks.iter().filter(|t| t.exit_code() != Some(0))
    }
}

pub struct Orchestrator<'a> {
    compute: &'a dyn ComputeService,
    store: &'a dyn ObjectStore,
    settings: &'a RunSettings,
}

fn at<T>(stage: Stage, result: Result<T, RunnerError>) -> Result<T, PipelineFailure> {
    result.map_err(|error| PipelineFailure { stage, error })
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        compute: &'a dyn ComputeService,
        store: &'a dyn ObjectStore,
        settings: &'a RunSettings,
    ) -> Self {
        Self {
            compute,
            store,
            settings,
        }
    }

    /// Runs the pipeline for the action named in `raw`.
    pub async fn run(
        &self,
        raw: Option<&RawParameters>,
        constraints: &JobConstraints,
        on_poll: impl Fn(&[TaskStatus]),
    ) -> Result<RunReport, PipelineFailure> {
        info!(stage = %Stage::Validating, "Validating parameters");
        let action = at(Stage::Validating, params::requested_action(raw))?;
        let params = at(Stage::Validating, params::validate(raw, action))?;
        info!(
            "{} of database {} on {} via {}/{}",
            action,
            params.database_name,
            params.server_name,
            params.artifact.container,
            params.artifact.file_name
        );

        let issuer = CapabilityIssuer::with_lifetime(self.store, self.settings.capability_lifetime);

        info!(stage = %Stage::PreconditionChecking, "Checking storage");
        at(Stage::PreconditionChecking, self.check_preconditions(&issuer, &params).await)?;

        info!(stage = %Stage::PoolEnsuring, "Ensuring pool {}", self.settings.pool.id);
        let pool = at(
            Stage::PoolEnsuring,
            provision::ensure_pool(self.compute, &self.settings.pool).await,
        )?;

        info!(stage = %Stage::JobEnsuring, "Ensuring job {}", self.settings.job_id);
        let job = at(
            Stage::JobEnsuring,
            provision::ensure_job(
                self.compute,
                &self.settings.job_id,
                &self.settings.pool.id,
                constraints,
            )
            .await,
        )?;

        info!(stage = %Stage::CapabilityIssuing, "Issuing storage capability");
        let capability = at(Stage::CapabilityIssuing, self.issue_capability(&issuer, &params))?;
        info!(
            "Capability on {} ({}) expires {}",
            capability.resource_uri(),
            capability.permissions().as_sas(),
            capability.expiry()
        );

        let task_id = task::task_id(action, Utc::now());
        let spec = task::build_task(task_id.clone(), &params, &capability, &self.settings.package);
        info!(stage = %Stage::TaskSubmitting, "Submitting task {}", task_id);
        at(
            Stage::TaskSubmitting,
            self.compute.add_task(&self.settings.job_id, &spec).await,
        )?;

        info!(
            stage = %Stage::Monitoring,
            "Monitoring task {} for 'completed' state, timeout in {}s",
            task_id,
            self.settings.monitor.timeout.as_secs()
        );
        let outcome = at(
            Stage::Monitoring,
            monitor::wait_all(
                self.compute,
                &self.settings.job_id,
                std::slice::from_ref(&task_id),
                TaskState::Completed,
                self.settings.monitor,
                on_poll,
            )
            .await,
        )?;

        let tasks = match outcome {
            MonitorOutcome::AllCompleted(tasks) => tasks,
            MonitorOutcome::TimedOut { waited, pending } => {
                warn!(
                    "Task {} did not complete in time; pool {} and job {} are left running",
                    task_id, self.settings.pool.id, self.settings.job_id
                );
                return Err(PipelineFailure {
                    stage: Stage::Monitoring,
                    error: RunnerError::Timeout { waited, pending },
                });
            }
        };
        info!("All tasks reached state completed");
        at(Stage::Monitoring, self.check_exit_codes(&tasks))?;

        let cleanup = at(Stage::CleaningUp, self.clean_up().await)?;

        Ok(RunReport {
            action,
            pool,
            job,
            task_id,
            tasks,
            cleanup,
        })
    }

    async fn check_preconditions(
        &self,
        issuer: &CapabilityIssuer<'_>,
        params: &OperationParameters,
    ) -> Result<(), RunnerError> {
        let artifact = &params.artifact;
        match params.action {
            Action::Export => {
                issuer.ensure_container(&artifact.container).await?;
            }
            Action::Import => {
                if !issuer
                    .blob_exists(&artifact.container, &artifact.file_name)
                    .await?
                {
                    return Err(RunnerError::Precondition(format!(
                        "bacpac {} does not exist in container {}, so an import cannot be performed",
                        artifact.file_name, artifact.container
                    )));
                }
            }
        }
        Ok(())
    }

    fn issue_capability(
        &self,
        issuer: &CapabilityIssuer<'_>,
        params: &OperationParameters,
    ) -> Result<Capability, RunnerError> {
        let artifact = &params.artifact;
        match params.action {
            Action::Export => issuer.issue_write_capability(&artifact.container),
            Action::Import => issuer.issue_read_capability(&artifact.container, &artifact.file_name),
        }
    }

    fn check_exit_codes(&self, tasks: &[TaskStatus]) -> Result<(), RunnerError> {
        for status in tasks.iter().filter(|t| t.exit_code() != Some(0)) {
            warn!(
                "Task {} completed with exit code {:?}{}",
                status.id,
                status.exit_code(),
                status
                    .failure_message()
                    .map(|m| format!(": {}", m))
                    .unwrap_or_default()
            );
            if self.settings.fail_on_task_error {
                return Err(RunnerError::TaskFailed {
                    task_id: status.id.clone(),
                    exit_code: status.exit_code(),
                });
            }
        }
        Ok(())
    }

    async fn clean_up(&self) -> Result<CleanupOutcome, RunnerError> {
        match self.settings.cleanup {
            CleanupPolicy::Retain => Ok(CleanupOutcome::Retained),
            CleanupPolicy::DeleteJob => {
                info!("Deleting job {}", self.settings.job_id);
                self.compute.delete_job(&self.settings.job_id).await?;
                Ok(CleanupOutcome::DeletedJob)
            }
            CleanupPolicy::DeleteJobAndPool => {
                info!(
                    "Deleting job {} and pool {}",
                    self.settings.job_id, self.settings.pool.id
                );
                self.compute.delete_job(&self.settings.job_id).await?;
                self.compute.delete_pool(&self.settings.pool.id).await?;
                Ok(CleanupOutcome::DeletedJobAndPool)
            }
        }
    }
}
