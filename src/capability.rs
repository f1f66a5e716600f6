// ABOUTME: Issues direction-scoped storage capabilities for a single run
// ABOUTME: Write-only for export destinations, read+list for import sources

use chrono::{Duration, Utc};
use tracing::info;

use crate::error::Result;
use crate::provision::Provisioned;
use crate::storage::client::ObjectStore;
use crate::storage::sas::{Capability, Permissions};

pub const DEFAULT_LIFETIME_HOURS: i64 = 24;

pub struct CapabilityIssuer<'a> {
    store: &'a dyn ObjectStore,
    lifetime: Duration,
}

impl<'a> CapabilityIssuer<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self::with_lifetime(store, Duration::hours(DEFAULT_LIFETIME_HOURS))
    }

    /// Non-positive lifetimes fall back to the default horizon so a capability
    /// is never issued already expired.
    pub fn with_lifetime(store: &'a dyn ObjectStore, lifetime: Duration) -> Self {
        let lifetime = if lifetime > Duration::zero() {
            lifetime
        } else {
            Duration::hours(DEFAULT_LIFETIME_HOURS)
        };
        Self { store, lifetime }
    }

    pub async fn ensure_container(&self, container: &str) -> Result<Provisioned> {
        let outcome = self.store.create_container_if_not_exists(container).await?;
        info!("Output container {} {}", container, outcome);
        Ok(outcome)
    }

    pub async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool> {
        self.store.blob_exists(container, blob).await
    }

    /// Upload-only access to the export destination container.
    pub fn issue_write_capability(&self, container: &str) -> Result<Capability> {
        self.issue(container, Permissions::write_only())
    }

    /// Read and list access to the container holding `blob`. The blob itself is
    /// selected by the task's resource prefix.
    pub fn issue_read_capability(&self, container: &str, blob: &str) -> Result<Capability> {
        let capability = self.issue(container, Permissions::read_list())?;
        info!("Issued read capability on {} for {}", container, blob);
        Ok(capability)
    }

    fn issue(&self, container: &str, permissions: Permissions) -> Result<Capability> {
        let expiry = Utc::now() + self.lifetime;
        self.store.container_capability(container, permissions, expiry)
    }
}
