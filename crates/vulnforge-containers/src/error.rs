//! Container-layer error taxonomy (spec §4.7, §7 `ExecutorError`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container build failed: {reason}")]
    BuildFailed { reason: String, exit_code: Option<i32> },

    #[error("network '{network}' could not be created or inspected: {reason}")]
    NetworkError { network: String, reason: String },

    #[error("sidecar '{sidecar}' never became ready: {reason}")]
    SidecarNotReady { sidecar: String, reason: String },

    #[error("app container never became ready on port {port}: {reason}")]
    AppNotReady { port: u16, reason: String },

    #[error("exec into container '{container}' failed: {reason}")]
    ExecFailed { container: String, reason: String, exit_code: Option<i32> },

    #[error("container runtime CLI '{binary}' is not available: {reason}")]
    RuntimeUnavailable { binary: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] vulnforge_state::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ContainerError>;

/// Projects a [`ContainerError`] onto the domain-level `ExecutorError`
/// variant the rest of the pipeline (Loop Controller, Pack) understands.
impl From<ContainerError> for vulnforge_core::VulnforgeError {
    fn from(err: ContainerError) -> Self {
        let exit_code = match &err {
            ContainerError::BuildFailed { exit_code, .. } => *exit_code,
            ContainerError::ExecFailed { exit_code, .. } => *exit_code,
            _ => None,
        };
        vulnforge_core::VulnforgeError::ExecutorError { reason: err.to_string(), exit_code }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_failed_projects_exit_code_into_executor_error() {
        let err = ContainerError::BuildFailed { reason: "boom".to_string(), exit_code: Some(1) };
        let projected: vulnforge_core::VulnforgeError = err.into();
        match projected {
            vulnforge_core::VulnforgeError::ExecutorError { exit_code, .. } => {
                assert_eq!(exit_code, Some(1))
            }
            _ => panic!("wrong variant"),
        }
    }
}
