//! Domain models for VulnForge.
//!
//! Canonical definitions for the core entities that flow through the
//! PLAN→DRAFT→BUILD→RUN→VERIFY→REVIEW→PACK state machine:
//! - `Requirement` / `Plan` / `VulnBundle` / `VariationKey`
//! - `Manifest`, the Synthesis Engine's validated output shape
//! - `LoopState`, the Loop Controller's persisted per-SID state
//! - `Rule`, the per-CWE verifier spec
//! - SID derivation and canonical-JSON digesting

pub mod digest;
pub mod error;
pub mod loop_state;
pub mod manifest;
pub mod plan;
pub mod requirement;
pub mod rule;
pub mod sid;

pub use error::{Result, VulnforgeError};
pub use loop_state::{LastResult, LoopHistoryEntry, LoopState};
pub use manifest::{
    deterministic_fallback_manifest, BuildSpec, ContentEncoding, FileEntry, Manifest, PocSpec,
    RunSpec,
};
pub use plan::{
    DecodingMode, ExecutorPolicy, Plan, ReadyProbe, RunMatrix, SidecarSpec, VariationKey, VulnBundle,
};
pub use requirement::{GeneratorMode, LoopPolicy, Requirement, RuntimeConfig, SynthesisLimits, VerifierPolicy};
pub use rule::{JsonOutputSpec, OutputFormat, OutputSpec, PatternType, Rule, RulePattern};
pub use sid::{derive_sid, SidComponents, SENTINEL};
