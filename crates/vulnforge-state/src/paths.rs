//! Canonical on-disk path layout (spec §6).
//!
//! All filesystem-backed stores route through these helpers so the layout
//! stays centralised in one place instead of being re-derived ad hoc at
//! each call site.

use std::path::{Path, PathBuf};

/// Root-relative path helpers, rooted at a workspace directory (typically
/// the current working directory of the running process).
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    /// Build a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        WorkspaceLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `metadata/<sid>/`
    pub fn metadata_dir(&self, sid: &str) -> PathBuf {
        self.root.join("metadata").join(sid)
    }

    /// `metadata/<sid>/<name>.json`
    pub fn metadata_file(&self, sid: &str, name: &str) -> PathBuf {
        self.metadata_dir(sid).join(format!("{name}.json"))
    }

    /// `metadata/<sid>/generator_failures.jsonl`
    pub fn generator_failures_log(&self, sid: &str) -> PathBuf {
        self.metadata_dir(sid).join("generator_failures.jsonl")
    }

    /// `metadata/<sid>/bundles/<slug>/`
    pub fn bundle_metadata_dir(&self, sid: &str, slug: &str) -> PathBuf {
        self.metadata_dir(sid).join("bundles").join(slug)
    }

    /// `metadata/<sid>/runtime_rules/`
    pub fn runtime_rules_dir(&self, sid: &str) -> PathBuf {
        self.metadata_dir(sid).join("runtime_rules")
    }

    /// `metadata/<sid>/runtime_templates/`
    pub fn runtime_templates_dir(&self, sid: &str) -> PathBuf {
        self.metadata_dir(sid).join("runtime_templates")
    }

    /// `workspaces/<sid>/<workspace_subdir>/` (`app` or `app/<slug>`).
    pub fn workspace_dir(&self, sid: &str, workspace_subdir: &str) -> PathBuf {
        self.root.join("workspaces").join(sid).join(workspace_subdir)
    }

    /// `artifacts/<sid>/build[/<slug>]/`
    pub fn build_dir(&self, sid: &str, slug: Option<&str>) -> PathBuf {
        let mut p = self.root.join("artifacts").join(sid).join("build");
        if let Some(slug) = slug {
            p = p.join(slug);
        }
        p
    }

    /// `artifacts/<sid>/run[/<slug>]/`
    pub fn run_dir(&self, sid: &str, slug: Option<&str>) -> PathBuf {
        let mut p = self.root.join("artifacts").join(sid).join("run");
        if let Some(slug) = slug {
            p = p.join(slug);
        }
        p
    }

    /// `artifacts/<sid>/reports/`
    pub fn reports_dir(&self, sid: &str) -> PathBuf {
        self.root.join("artifacts").join(sid).join("reports")
    }

    /// `artifacts/<sid>/reports/evals.json`
    pub fn evals_report(&self, sid: &str) -> PathBuf {
        self.reports_dir(sid).join("evals.json")
    }

    /// `artifacts/<sid>/reports/diversity.json`
    pub fn diversity_report(&self, sid: &str) -> PathBuf {
        self.reports_dir(sid).join("diversity.json")
    }

    /// `rag/memories/reflexion_store.jsonl`
    pub fn reflexion_log(&self) -> PathBuf {
        self.root.join("rag").join("memories").join("reflexion_store.jsonl")
    }

    /// `cas/` — root for content-addressed blobs, sharded two levels deep
    /// by the first four hex chars of the digest (`cas/ab/cd/<digest>`).
    pub fn cas_object_path(&self, digest_hex: &str) -> PathBuf {
        let (a, rest) = digest_hex.split_at(2.min(digest_hex.len()));
        let (b, _) = rest.split_at(2.min(rest.len()));
        self.root.join("cas").join(a).join(b).join(digest_hex)
    }
}
