// ABOUTME: Operation parameters read from the JSON parameter file
// ABOUTME: Validates the action-specific fields before any remote call is made

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, RunnerError};

/// Servers must be addressed by their fully qualified public name.
pub const PUBLIC_SERVER_DOMAIN: &str = ".database.windows.net";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Export,
    Import,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Export => "Export",
            Action::Import => "Import",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("export") {
            Ok(Action::Export)
        } else if s.eq_ignore_ascii_case("import") {
            Ok(Action::Import)
        } else {
            Err(RunnerError::config(
                "Only Import and Export are allowed as actions",
            ))
        }
    }
}

/// Parameter file exactly as written by the operator.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawParameters {
    pub action: Option<String>,
    pub server_name: Option<String>,
    pub database_name: Option<String>,
    pub sql_server_admin: Option<String>,
    pub sql_server_admin_password: Option<String>,
    pub target_container_name: Option<String>,
    pub target_file_name: Option<String>,
    pub source_container_name: Option<String>,
    pub source_file_name: Option<String>,
}

impl fmt::Debug for RawParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawParameters")
            .field("action", &self.action)
            .field("server_name", &self.server_name)
            .field("database_name", &self.database_name)
            .field("sql_server_admin", &self.sql_server_admin)
            .field("sql_server_admin_password", &"<redacted>")
            .field("target_container_name", &self.target_container_name)
            .field("target_file_name", &self.target_file_name)
            .field("source_container_name", &self.source_container_name)
            .field("source_file_name", &self.source_file_name)
            .finish()
    }
}

/// Container and blob holding the bacpac: the export target or the import source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub container: String,
    pub file_name: String,
}

/// Parameters that passed validation. Only the fields relevant to `action` exist.
#[derive(Clone, PartialEq, Eq)]
pub struct OperationParameters {
    pub action: Action,
    pub server_name: String,
    pub database_name: String,
    pub admin_user: String,
    pub admin_password: String,
    pub artifact: ArtifactLocation,
}

impl fmt::Debug for OperationParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationParameters")
            .field("action", &self.action)
            .field("server_name", &self.server_name)
            .field("database_name", &self.database_name)
            .field("admin_user", &self.admin_user)
            .field("admin_password", &"<redacted>")
            .field("artifact", &self.artifact)
            .finish()
    }
}

/// Reads the parameter file. A literal `null` document yields `None`.
pub fn load(path: &Path) -> Result<Option<RawParameters>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        RunnerError::config(format!(
            "Failed to read parameter file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse(&contents)
}

pub fn parse(contents: &str) -> Result<Option<RawParameters>> {
    serde_json::from_str(contents).map_err(|e| {
        RunnerError::config(format!(
            "sqlpackage parameters were not parsable from the json: {}",
            e
        ))
    })
}

/// Determines which pipeline the parameter file asks for.
pub fn requested_action(raw: Option<&RawParameters>) -> Result<Action> {
    let raw = raw.ok_or_else(|| {
        RunnerError::config("sqlpackage parameters were not parsable from the json")
    })?;
    match non_empty(&raw.action) {
        Some(action) => action.parse(),
        None => Err(RunnerError::config(
            "Action was not specified. Accepted values are: [Export/Import]",
        )),
    }
}

/// Checks the fields required by `action`, failing on the first violation.
pub fn validate(raw: Option<&RawParameters>, action: Action) -> Result<OperationParameters> {
    let raw = raw.ok_or_else(|| {
        RunnerError::config("sqlpackage parameters were not parsable from the json")
    })?;

    let declared = require(
        &raw.action,
        "Action was not specified. Accepted values are: [Export/Import]",
    )?;
    if declared.parse::<Action>()? != action {
        return Err(RunnerError::config(format!(
            "Action {} does not match the requested {} operation",
            declared, action
        )));
    }

    let server_name = require(
        &raw.server_name,
        "The server was either not specified or it's missing the domain name",
    )?;
    if !server_name.ends_with(PUBLIC_SERVER_DOMAIN) {
        return Err(RunnerError::config(format!(
            "The server was either not specified or it's missing the domain name ({})",
            PUBLIC_SERVER_DOMAIN
        )));
    }

    let database_name = require(&raw.database_name, "The database name was not specified")?;
    let admin_user = require(
        &raw.sql_server_admin,
        "The SQL server admin user was not specified",
    )?;
    let admin_password = require(
        &raw.sql_server_admin_password,
        "The SQL server admin password was not specified",
    )?;

    let artifact = match action {
        Action::Export => {
            let container = require(
                &raw.target_container_name,
                "The target container name to save the bacpac to was not specified",
            )?;
            let file_name = require(
                &raw.target_file_name,
                "The target bacpac file name was not specified",
            )?;
            reject_foreign(&raw.source_container_name, "SourceContainerName", action)?;
            reject_foreign(&raw.source_file_name, "SourceFileName", action)?;
            ArtifactLocation {
                container,
                file_name,
            }
        }
        Action::Import => {
            let container = require(
                &raw.source_container_name,
                "The source container name containing the bacpac file was not specified",
            )?;
            let file_name = require(
                &raw.source_file_name,
                "The source bacpac file name was not specified",
            )?;
            reject_foreign(&raw.target_container_name, "TargetContainerName", action)?;
            reject_foreign(&raw.target_file_name, "TargetFileName", action)?;
            ArtifactLocation {
                container,
                file_name,
            }
        }
    };

    Ok(OperationParameters {
        action,
        server_name,
        database_name,
        admin_user,
        admin_password,
        artifact,
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn require(value: &Option<String>, message: &str) -> Result<String> {
    non_empty(value)
        .map(str::to_string)
        .ok_or_else(|| RunnerError::config(message))
}

fn reject_foreign(value: &Option<String>, field: &str, action: Action) -> Result<()> {
    match non_empty(value) {
        Some(_) => Err(RunnerError::config(format!(
            "{} is not used by the {} action; remove it from the parameter file",
            field, action
        ))),
        None => Ok(()),
    }
}
