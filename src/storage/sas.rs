// ABOUTME: Scoped, time-bounded storage access tokens (service SAS)
// ABOUTME: Permissions are a minimal set and expiry is always explicit

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Url;
use std::collections::BTreeSet;
use std::fmt;

use crate::auth::SharedKeySigner;

pub const SAS_VERSION: &str = "2020-12-06";

/// Ordered as the service expects permission letters: read, write, list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    Read,
    Write,
    List,
}

impl Permission {
    fn letter(self) -> char {
        match self {
            Permission::Read => 'r',
            Permission::Write => 'w',
            Permission::List => 'l',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permissions(BTreeSet<Permission>);

impl Permissions {
    pub fn new(permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self(permissions.into_iter().collect())
    }

    /// Export destinations: the task may only upload.
    pub fn write_only() -> Self {
        Self::new([Permission::Write])
    }

    /// Import sources: the task may read and enumerate the container.
    pub fn read_list() -> Self {
        Self::new([Permission::Read, Permission::List])
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_sas(&self) -> String {
        self.0.iter().map(|p| p.letter()).collect()
    }
}

/// A signed, expiring URL granting `permissions` on one container.
#[derive(Clone)]
pub struct Capability {
    resource_uri: String,
    permissions: Permissions,
    expiry: DateTime<Utc>,
    url: Url,
}

impl Capability {
    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("resource_uri", &self.resource_uri)
            .field("permissions", &self.permissions.as_sas())
            .field("expiry", &self.expiry)
            .field("signature", &"<redacted>")
            .finish()
    }
}

fn format_expiry(expiry: DateTime<Utc>) -> String {
    expiry.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn string_to_sign(
    account: &str,
    container: &str,
    permissions: &Permissions,
    expiry: DateTime<Utc>,
) -> String {
    let canonical = format!("/blob/{}/{}", account, container);
    // permissions, start, expiry, resource, identifier, ip, protocol, version,
    // resource type, snapshot time, encryption scope, rscc, rscd, rsce, rscl, rsct
    [
        permissions.as_sas().as_str(),
        "",
        format_expiry(expiry).as_str(),
        canonical.as_str(),
        "",
        "",
        "https",
        SAS_VERSION,
        "c",
        "",
        "",
        "",
        "",
        "",
        "",
        "",
    ]
    .join("\n")
}

/// Signs a container-scoped SAS for `container_uri` and returns the capability.
pub fn container_capability(
    signer: &SharedKeySigner,
    container_uri: Url,
    container: &str,
    permissions: Permissions,
    expiry: DateTime<Utc>,
) -> Capability {
    let signature = signer.sign(&string_to_sign(
        signer.account(),
        container,
        &permissions,
        expiry,
    ));

    let resource_uri = container_uri.to_string();
    let mut url = container_uri;
    url.query_pairs_mut()
        .append_pair("sv", SAS_VERSION)
        .append_pair("spr", "https")
        .append_pair("se", &format_expiry(expiry))
        .append_pair("sr", "c")
        .append_pair("sp", &permissions.as_sas())
        .append_pair("sig", &signature);

    Capability {
        resource_uri,
        permissions,
        expiry,
        url,
    }
}
