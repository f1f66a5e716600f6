// ABOUTME: Builds the single SqlPackage task for an export or import run
// ABOUTME: One code path driven by a per-direction flag table

use chrono::{DateTime, Utc};

use crate::batch::models::{
    ContainerDestination, OutputDestination, OutputFile, PackageReference, ResourceFile,
    TaskSpec, TaskState, UploadCondition, UploadOptions,
};
use crate::params::{Action, OperationParameters};
use crate::storage::sas::Capability;

/// Directory, relative to the task working directory, that input blobs land in.
pub const INPUT_DIR: &str = "blobs";
const EXECUTABLE: &str = "sqlpackage.exe";

/// SqlPackage switch names for one direction of data flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagMap {
    pub action: &'static str,
    pub server: &'static str,
    pub database: &'static str,
    pub user: &'static str,
    pub password: &'static str,
    pub file: &'static str,
}

pub const EXPORT_FLAGS: FlagMap = FlagMap {
    action: "Export",
    server: "ssn",
    database: "sdn",
    user: "su",
    password: "sp",
    file: "tf",
};

pub const IMPORT_FLAGS: FlagMap = FlagMap {
    action: "Import",
    server: "tsn",
    database: "tdn",
    user: "tu",
    password: "tp",
    file: "sf",
};

pub fn flags_for(action: Action) -> &'static FlagMap {
    match action {
        Action::Export => &EXPORT_FLAGS,
        Action::Import => &IMPORT_FLAGS,
    }
}

/// Unique per invocation so repeated runs never collide inside the shared job.
pub fn task_id(action: Action, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}",
        action.as_str().to_lowercase(),
        now.format("%Y%m%dT%H%M%S%3fZ")
    )
}

/// Path the package is mounted at on the compute node.
pub fn executable_path(package: &PackageReference) -> String {
    format!(
        "%AZ_BATCH_APP_PACKAGE_{}#{}%\\{}",
        package.application_id.to_uppercase(),
        package.version,
        EXECUTABLE
    )
}

/// Characters `cmd /c` treats specially outside a quoted string.
const CMD_METACHARACTERS: &[char] = &['&', '|', '<', '>', '^', '(', ')', '"'];

/// Quotes a switch value for `cmd /c`. Inside quotes cmd leaves the
/// metacharacters alone; embedded quotes are doubled so cmd's quote state
/// stays balanced. `%NAME%` is still expanded by cmd even when quoted.
fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || CMD_METACHARACTERS.contains(&c));
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Path the task passes to the file switch: the output name for export, the
/// downloaded input for import.
pub fn file_argument(params: &OperationParameters) -> String {
    match params.action {
        Action::Export => params.artifact.file_name.clone(),
        Action::Import => format!("{}\\{}", INPUT_DIR, params.artifact.file_name),
    }
}

pub fn command_line(params: &OperationParameters, package: &PackageReference) -> String {
    let flags = flags_for(params.action);
    let file = file_argument(params);
    let switches = [
        (flags.server, params.server_name.as_str()),
        (flags.database, params.database_name.as_str()),
        (flags.user, params.admin_user.as_str()),
        (flags.password, params.admin_password.as_str()),
        (flags.file, file.as_str()),
    ];

    let mut cmd = format!("cmd /c {} /a:{}", executable_path(package), flags.action);
    for (flag, value) in switches {
        cmd.push_str(&format!(" /{}:{}", flag, quote(value)));
    }
    cmd
}

/// Assembles the task. Export gets an output binding uploading the bacpac on
/// completion; import gets the source bacpac as an input resource.
///
/// The import binding selects blobs by prefix, so any other blob whose name
/// starts with the source file name (`sales.bacpac.old`) is downloaded into
/// the input directory too. Only the exact file is passed to sqlpackage.
pub fn build_task(
    id: String,
    params: &OperationParameters,
    capability: &Capability,
    package: &PackageReference,
) -> TaskSpec {
    let (resource_files, output_files) = match params.action {
        Action::Export => (
            Vec::new(),
            vec![OutputFile {
                file_pattern: params.artifact.file_name.clone(),
                destination: OutputDestination {
                    container: ContainerDestination {
                        container_url: capability.url().to_string(),
                        path: params.artifact.file_name.clone(),
                    },
                },
                upload_options: UploadOptions {
                    upload_condition: UploadCondition::TaskCompletion,
                },
            }],
        ),
        Action::Import => (
            vec![ResourceFile {
                storage_container_url: capability.url().to_string(),
                blob_prefix: Some(params.artifact.file_name.clone()),
                file_path: INPUT_DIR.to_string(),
            }],
            Vec::new(),
        ),
    };

    TaskSpec {
        id,
        command_line: command_line(params, package),
        resource_files,
        output_files,
        application_package_references: vec![package.clone()],
        state: TaskState::Active,
    }
}
