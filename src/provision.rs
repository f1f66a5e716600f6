// ABOUTME: Idempotent provisioning of the shared pool and job
// ABOUTME: "Already exists" is a successful outcome, never an error

use std::fmt;
use tracing::info;

use crate::batch::client::ComputeService;
use crate::batch::models::{JobConstraints, JobSpec, PoolInformation, PoolSpec};
use crate::error::Result;

/// Outcome of a create-if-absent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

impl fmt::Display for Provisioned {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Provisioned::Created => write!(f, "created"),
            Provisioned::AlreadyExists => write!(f, "already exists"),
        }
    }
}

/// Makes sure the pool exists. An existing pool is left untouched, even if
/// its configuration differs from `spec`.
pub async fn ensure_pool(compute: &dyn ComputeService, spec: &PoolSpec) -> Result<Provisioned> {
    info!("Checking if pool {} already exists", spec.id);
    if compute.pool_exists(&spec.id).await? {
        info!("Pool {} already exists, skipping creation", spec.id);
        return Ok(Provisioned::AlreadyExists);
    }

    let outcome = compute.create_pool(spec).await?;
    match outcome {
        Provisioned::Created => info!(
            "Created pool {} ({} x {})",
            spec.id, spec.target_dedicated_nodes, spec.vm_size
        ),
        Provisioned::AlreadyExists => info!(
            "Pool {} already existed when we tried to create it",
            spec.id
        ),
    }
    Ok(outcome)
}

/// Makes sure the job exists on `pool_id`. Constraints only apply when the
/// job is created by this call.
pub async fn ensure_job(
    compute: &dyn ComputeService,
    job_id: &str,
    pool_id: &str,
    constraints: &JobConstraints,
) -> Result<Provisioned> {
    info!("Creating job {}", job_id);
    let spec = JobSpec {
        id: job_id.to_string(),
        pool_info: PoolInformation {
            pool_id: pool_id.to_string(),
        },
        constraints: constraints.clone(),
    };

    let outcome = compute.create_job(&spec).await?;
    if outcome == Provisioned::AlreadyExists {
        info!("Job {} already existed when we tried to create it", job_id);
    }
    Ok(outcome)
}
