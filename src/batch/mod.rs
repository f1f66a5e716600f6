// ABOUTME: Compute control plane access: pools, jobs and tasks
// ABOUTME: The trait is what the pipeline talks to; the client speaks REST

pub mod client;
pub mod models;

pub use client::{BatchClient, ComputeService};
