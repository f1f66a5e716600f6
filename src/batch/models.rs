// ABOUTME: Data structures for pool, job and task specifications and task state
// ABOUTME: These are serialized to JSON for the compute control plane API

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageReference {
    pub application_id: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMachineConfiguration {
    #[serde(rename = "imageReference")]
    pub image_reference: ImageReference,
    #[serde(rename = "nodeAgentSKUId")]
    pub node_agent_sku_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    pub id: String,
    pub vm_size: String,
    pub virtual_machine_configuration: VirtualMachineConfiguration,
    pub target_dedicated_nodes: u32,
    pub application_package_references: Vec<PackageReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInformation {
    pub pool_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConstraints {
    pub max_wall_clock_time: Duration,
    /// -1 lets the service retry without limit.
    pub max_task_retry_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireJobConstraints {
    max_wall_clock_time: String,
    max_task_retry_count: i32,
}

/// ISO-8601 duration as the control plane expects it, e.g. `PT43200S`.
pub fn iso8601_duration(duration: Duration) -> String {
    format!("PT{}S", duration.as_secs())
}

impl Serialize for JobConstraints {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireJobConstraints {
            max_wall_clock_time: iso8601_duration(self.max_wall_clock_time),
            max_task_retry_count: self.max_task_retry_count,
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub id: String,
    pub pool_info: PoolInformation,
    pub constraints: JobConstraints,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFile {
    pub storage_container_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_prefix: Option<String>,
    pub file_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadCondition {
    TaskSuccess,
    TaskFailure,
    TaskCompletion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDestination {
    pub container_url: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDestination {
    pub container: ContainerDestination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    pub upload_condition: UploadCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFile {
    pub file_pattern: String,
    pub destination: OutputDestination,
    pub upload_options: UploadOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Active,
    Preparing,
    Running,
    Completed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TaskState::Active => "active",
            TaskState::Preparing => "preparing",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// A task ready for submission. Built fresh for every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub id: String,
    pub command_line: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_files: Vec<ResourceFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<OutputFile>,
    pub application_package_references: Vec<PackageReference>,
    /// Local lifecycle state; the service holds the authoritative copy once submitted.
    #[serde(skip)]
    pub state: TaskState,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInfo {
    pub exit_code: Option<i32>,
    pub result: Option<String>,
    pub retry_count: Option<u32>,
    pub failure_info: Option<FailureInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub id: String,
    pub state: TaskState,
    #[serde(default)]
    pub execution_info: Option<ExecutionInfo>,
}

impl TaskStatus {
    pub fn exit_code(&self) -> Option<i32> {
        self.execution_info.as_ref().and_then(|info| info.exit_code)
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.execution_info
            .as_ref()
            .and_then(|info| info.failure_info.as_ref())
            .and_then(|failure| failure.message.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    pub value: Option<String>,
}

/// Error body returned by the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub code: Option<String>,
    pub message: Option<ErrorMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_spec_wire_format() {
        let job = JobSpec {
            id: "importexport".to_string(),
            pool_info: PoolInformation {
                pool_id: "sqlpackage-pool".to_string(),
            },
            constraints: JobConstraints {
                max_wall_clock_time: Duration::from_secs(12 * 3600),
                max_task_retry_count: 3,
            },
        };
        assert_eq!(
            serde_json::to_value(&job).unwrap(),
            json!({
                "id": "importexport",
                "poolInfo": { "poolId": "sqlpackage-pool" },
                "constraints": { "maxWallClockTime": "PT43200S", "maxTaskRetryCount": 3 }
            })
        );
    }

    #[test]
    fn test_pool_spec_wire_format() {
        let pool = PoolSpec {
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
            application_package_references: vec![PackageReference {
                application_id: "sqlpackagenetcore".to_string(),
                version: "15.0.4630.1".to_string(),
            }],
        };
        let value = serde_json::to_value(&pool).unwrap();
        assert_eq!(value["vmSize"], "STANDARD_D3_V2");
        assert_eq!(value["targetDedicatedNodes"], 1);
        assert_eq!(
            value["virtualMachineConfiguration"]["nodeAgentSKUId"],
            "batch.node.windows amd64"
        );
        assert_eq!(
            value["applicationPackageReferences"][0]["applicationId"],
            "sqlpackagenetcore"
        );
    }

    #[test]
    fn test_task_status_parsing() {
        let status: TaskStatus = serde_json::from_value(json!({
            "id": "export-20261016T120000000Z",
            "state": "completed",
            "executionInfo": {
                "exitCode": 1,
                "result": "failure",
                "retryCount": 3,
                "failureInfo": { "code": "FailureExitCode", "message": "The task exited with an exit code representing a failure" }
            }
        }))
        .unwrap();
        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(status.exit_code(), Some(1));
        assert!(status.failure_message().unwrap().contains("exit code"));
    }

    #[test]
    fn test_running_task_without_execution_info() {
        let status: TaskStatus =
            serde_json::from_value(json!({ "id": "import-1", "state": "running" })).unwrap();
        assert_eq!(status.state, TaskState::Running);
        assert_eq!(status.exit_code(), None);
    }

    #[test]
    fn test_upload_condition_wire_name() {
        assert_eq!(
            serde_json::to_value(UploadCondition::TaskCompletion).unwrap(),
            "taskcompletion"
        );
    }
}
