// ABOUTME: Library root for running SqlPackage export/import tasks on Azure Batch
// ABOUTME: Exposes the pipeline, its remote clients and supporting types

pub mod auth;
pub mod batch;
pub mod capability;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
pub mod params;
pub mod provision;
pub mod storage;
pub mod task;

#[cfg(test)]
mod testing;

pub use error::{Result, RunnerError};
pub use orchestrator::{Orchestrator, PipelineFailure, RunReport, RunSettings, Stage};
