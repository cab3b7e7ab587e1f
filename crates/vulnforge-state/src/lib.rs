//! vulnforge-state: filesystem persistence for VulnForge (Layer 0)
//!
//! This crate provides the persistence layer described in spec §6: a
//! content-addressed blob store, a per-bundle container-run ledger, and the
//! global append-only Reflexion log, plus the generic JSON metadata store
//! backing `metadata/<sid>/*.json`.
//!
//! ## Layer 0 — Data/Persistence
//!
//! Focus: reproducible, content-addressed storage and crash-safe append-only
//! logs, without a database dependency.
//!
//! ## Key components
//!
//! - [`CasStore`] / [`FsCasStore`]: content-addressed blob storage.
//! - [`BundleRunLedger`] / [`FsBundleRunLedger`]: per-bundle container run
//!   events and summaries.
//! - [`ReflexionLedger`] / [`FsReflexionLedger`]: the global Reflexion store.
//! - [`MetadataStore`]: the fixed `metadata/<sid>/*.json` file family.
//! - [`WorkspaceLayout`]: canonical path layout shared by all of the above.

mod error;
mod fs_bundle_ledger;
mod fs_cas;
mod fs_reflexion;
mod metadata_store;
mod paths;

pub mod fakes;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_bundle_ledger::FsBundleRunLedger;
pub use fs_cas::FsCasStore;
pub use fs_reflexion::FsReflexionLedger;
pub use metadata_store::MetadataStore;
pub use paths::WorkspaceLayout;
pub use storage_traits::{
    BundleRunLedger, CasStore, ContentDigest, ReflexionLedger, ReflexionRecord, RunEvent, RunId,
    RunMetadata, RunRecord, RunStatus, RunSummary, StorageResult,
};

/// Result type for vulnforge-state operations.
pub type Result<T> = std::result::Result<T, StorageError>;
