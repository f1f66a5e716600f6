// ABOUTME: Blob storage access for bacpac artifacts
// ABOUTME: Container/blob probes and SAS-style capability signing

pub mod client;
pub mod sas;

pub use client::{ObjectStore, StorageClient};
pub use sas::{Capability, Permission, Permissions};
