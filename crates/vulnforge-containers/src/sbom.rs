//! SBOM generation (spec §4.7 step 1: "a best-effort SBOM is attached to the
//! build artifact"). `syft`'s CLI has changed its subcommand shape across
//! releases, so this tries a chain of invocation styles and gives up
//! quietly rather than failing the build over a diagnostic artifact.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::process::ProcessRunner;

const SBOM_TOOL: &str = "syft";

/// One invocation style to attempt, most-specific first.
fn invocation_styles(context_dir: &Path) -> Vec<Vec<String>> {
    let dir_arg = format!("dir:{}", context_dir.display());
    vec![
        vec!["packages".to_string(), dir_arg.clone(), "-o".to_string(), "spdx-json".to_string()],
        vec!["scan".to_string(), dir_arg, "-o".to_string(), "spdx-json".to_string()],
        vec![context_dir.display().to_string()],
    ]
}

/// Attempts each `syft` invocation style in turn, writing the first
/// non-empty stdout to `out_path`. Returns `None` (never `Err`) if every
/// style fails or the tool isn't installed — the build must not fail over
/// a missing SBOM.
pub async fn generate_sbom(
    runner: &dyn ProcessRunner,
    context_dir: &Path,
    out_path: &Path,
) -> Option<PathBuf> {
    for args in invocation_styles(context_dir) {
        match runner.run(SBOM_TOOL, &args, None).await {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
                if let Some(parent) = out_path.parent() {
                    if tokio::fs::create_dir_all(parent).await.is_err() {
                        continue;
                    }
                }
                if tokio::fs::write(out_path, &output.stdout).await.is_ok() {
                    return Some(out_path.to_path_buf());
                }
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(tool = SBOM_TOOL, error = %err, "sbom invocation failed, trying next style");
                continue;
            }
        }
    }
    warn!(context = %context_dir.display(), "sbom generation exhausted all invocation styles, continuing without one");
    None
}
