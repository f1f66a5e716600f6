// ABOUTME: Error taxonomy for export/import runs
// ABOUTME: Keeps configuration, precondition, remote and timeout failures distinguishable

use std::fmt;
use std::time::Duration;

/// Which remote control plane produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Batch,
    Storage,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Service::Batch => write!(f, "batch"),
            Service::Storage => write!(f, "storage"),
        }
    }
}

#[derive(Debug)]
pub enum RunnerError {
    Configuration(String),
    Precondition(String),
    Remote {
        service: Service,
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },
    Timeout {
        waited: Duration,
        pending: Vec<String>,
    },
    TaskFailed {
        task_id: String,
        exit_code: Option<i32>,
    },
}

impl RunnerError {
    pub fn config(msg: impl Into<String>) -> Self {
        RunnerError::Configuration(msg.into())
    }

    pub fn remote(
        service: Service,
        status: Option<u16>,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        RunnerError::Remote {
            service,
            status,
            code,
            message: message.into(),
        }
    }

    /// Transport-level failure where no HTTP status was received.
    pub fn transport(service: Service, err: reqwest::Error) -> Self {
        RunnerError::Remote {
            service,
            status: err.status().map(|s| s.as_u16()),
            code: None,
            message: err.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RunnerError::Timeout { .. })
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RunnerError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            RunnerError::Precondition(msg) => write!(f, "Precondition failed: {}", msg),
            RunnerError::Remote {
                service,
                status,
                code,
                message,
            } => {
                write!(f, "Remote {} error", service)?;
                if let Some(status) = status {
                    write!(f, " (HTTP {})", status)?;
                }
                if let Some(code) = code {
                    write!(f, " [{}]", code)?;
                }
                write!(f, ": {}", message)
            }
            RunnerError::Timeout { waited, pending } => write!(
                f,
                "Timed out after {}s waiting for tasks to complete; still pending: {}",
                waited.as_secs(),
                if pending.is_empty() {
                    "none observed before the deadline".to_string()
                } else {
                    pending.join(", ")
                }
            ),
            RunnerError::TaskFailed { task_id, exit_code } => match exit_code {
                Some(code) => write!(f, "Task {} completed with exit code {}", task_id, code),
                None => write!(f, "Task {} completed without an exit code", task_id),
            },
        }
    }
}

impl std::error::Error for RunnerError {}

pub type Result<T> = std::result::Result<T, RunnerError>;
