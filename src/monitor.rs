// ABOUTME: Polls submitted tasks until they all reach the target state or a deadline passes
// ABOUTME: Timing out is a distinguishable outcome, never a silent success

use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::debug;

use crate::batch::client::ComputeService;
use crate::batch::models::{TaskState, TaskStatus};
use crate::error::Result;

/// Stand-in deadline for timeouts too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug)]
pub enum MonitorOutcome {
    /// Final status of every watched task. A "completed" task may still have
    /// failed internally; inspect the exit code.
    AllCompleted(Vec<TaskStatus>),
    TimedOut {
        waited: Duration,
        pending: Vec<String>,
    },
}

/// Waits for every task in `task_ids` to reach `target`.
///
/// Returns `AllCompleted` only if all tasks were observed in `target` strictly
/// before the deadline. A poll still in flight when the deadline passes is
/// abandoned. Remote tasks are left as they are on timeout.
pub async fn wait_all(
    compute: &dyn ComputeService,
    job_id: &str,
    task_ids: &[String],
    target: TaskState,
    settings: MonitorSettings,
    on_poll: impl Fn(&[TaskStatus]),
) -> Result<MonitorOutcome> {
    let started = Instant::now();
    let deadline = started
        .checked_add(settings.timeout)
        .unwrap_or_else(|| started + FAR_FUTURE);

    loop {
        let statuses = match timeout_at(deadline, poll(compute, job_id, task_ids)).await {
            Ok(statuses) => statuses?,
            Err(_) => {
                return Ok(MonitorOutcome::TimedOut {
                    waited: started.elapsed(),
                    pending: task_ids.to_vec(),
                })
            }
        };
        on_poll(&statuses);

        let observed_at = Instant::now();
        let pending: Vec<String> = statuses
            .iter()
            .filter(|s| s.state != target)
            .map(|s| s.id.clone())
            .collect();

        if observed_at >= deadline {
            return Ok(MonitorOutcome::TimedOut {
                waited: started.elapsed(),
                pending,
            });
        }
        if pending.is_empty() {
            return Ok(MonitorOutcome::AllCompleted(statuses));
        }

        debug!(pending = pending.len(), "tasks not yet {}", target);
        let remaining = deadline - observed_at;
        sleep(settings.poll_interval.min(remaining)).await;
    }
}

async fn poll(
    compute: &dyn ComputeService,
    job_id: &str,
    task_ids: &[String],
) -> Result<Vec<TaskStatus>> {
    let mut statuses = Vec::with_capacity(task_ids.len());
    for id in task_ids {
        statuses.push(compute.task_status(job_id, id).await?);
    }
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RunnerError, Service};
    use crate::testing::FakeCompute;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(timeout_secs: u64) -> MonitorSettings {
        MonitorSettings {
            timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_secs(5),
        }
    }

    fn ids() -> Vec<String> {
        vec!["export-1".to_string()]
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_task() {
        let compute = FakeCompute::default();

        let outcome = wait_all(&compute, "importexport", &ids(), TaskState::Completed, settings(300), |_| {})
            .await
            .unwrap();
        match outcome {
            MonitorOutcome::AllCompleted(statuses) => {
                assert_eq!(statuses.len(), 1);
                assert_eq!(statuses[0].exit_code(), Some(0));
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_after_several_polls() {
        let compute = FakeCompute::default();
        compute.script_task_states(&[
            TaskState::Active,
            TaskState::Running,
            TaskState::Running,
            TaskState::Completed,
        ]);
        let polls = AtomicUsize::new(0);

        let outcome = wait_all(&compute, "importexport", &ids(), TaskState::Completed, settings(300), |_| {
            polls.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        assert!(matches!(outcome, MonitorOutcome::AllCompleted(_)));
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_task_keeps_running() {
        let compute = FakeCompute::default();
        compute.script_task_states(&[TaskState::Running]);

        let outcome = wait_all(&compute, "importexport", &ids(), TaskState::Completed, settings(300), |_| {})
            .await
            .unwrap();
        match outcome {
            MonitorOutcome::TimedOut { waited, pending } => {
                assert_eq!(pending, ids());
                assert!(waited >= Duration::from_secs(300));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(!compute.calls().contains(&"delete_job".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_never_succeeds() {
        let compute = FakeCompute::default();

        let outcome = wait_all(&compute, "importexport", &ids(), TaskState::Completed, settings(0), |_| {})
            .await
            .unwrap();
        assert!(matches!(outcome, MonitorOutcome::TimedOut { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_does_not_overflow() {
        let compute = FakeCompute::default();
        let settings = MonitorSettings {
            timeout: Duration::MAX,
            poll_interval: Duration::from_secs(5),
        };

        let outcome = wait_all(&compute, "importexport", &ids(), TaskState::Completed, settings, |_| {})
            .await
            .unwrap();
        assert!(matches!(outcome, MonitorOutcome::AllCompleted(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_error_propagates() {
        let compute = FakeCompute::default();
        compute.fail_next_with(RunnerError::remote(Service::Batch, Some(500), None, "boom"));

        let err = wait_all(&compute, "importexport", &ids(), TaskState::Completed, settings(300), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Remote { status: Some(500), .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tasks() {
        let compute = FakeCompute::default();
        let outcome = wait_all(&compute, "importexport", &[], TaskState::Completed, settings(300), |_| {})
            .await
            .unwrap();
        assert!(matches!(outcome, MonitorOutcome::AllCompleted(ref s) if s.is_empty()));
    }
}
