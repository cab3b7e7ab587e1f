//! Container Executor (spec §4.7): per-bundle build → network acquire →
//! sidecars up → app up → poc push → app ready → exec payloads → logs →
//! teardown lifecycle, behind a [`runtime::ContainerRuntime`] capability so
//! any compatible container CLI can back it.

pub mod error;
pub mod executor;
pub mod network_pool;
pub mod process;
pub mod runtime;
pub mod sbom;

pub use error::ContainerError;
pub use executor::{BundleRunOutcome, Executor};
pub use network_pool::NetworkPool;
pub use process::{CommandOutput, ProcessRunner, TokioProcessRunner};
pub use runtime::{CliContainerRuntime, ContainerRuntime, ContainerSpec};
pub use sbom::generate_sbom;
