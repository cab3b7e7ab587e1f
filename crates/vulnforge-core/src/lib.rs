//! VulnForge Core — domain model, Loop Controller, Dependency Guard,
//! Synthesis Engine, Verifier Chain, and Pack.
//!
//! This crate owns everything in spec §3/§4 that is pure domain logic:
//! content-hashed identity (SID), the normalised `Plan`/`Requirement`
//! projection, the LLM-manifest validation pipeline, the multi-strategy
//! verifier chain, and the final packaging step. It has no knowledge of
//! container runtimes or the LLM wire protocol — those live in
//! `vulnforge-containers` and `vulnforge-llm-bridge` respectively.

pub mod dependency_guard;
pub mod domain;
pub mod loop_controller;
pub mod pack;
pub mod synthesis;
pub mod telemetry;
pub mod verifier;

pub use dependency_guard::{DependencyGuard, DependencyViolation, GuardReport};
pub use domain::{Result, VulnforgeError};
pub use loop_controller::LoopController;
pub use pack::{Pack, PackManifest};
pub use synthesis::{SynthesisEngine, SynthesisOutcome};
pub use telemetry::init_tracing;
pub use verifier::{Assertion, Verdict, VerdictStatus, Verifier, VerifierChain};

/// VulnForge core crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
