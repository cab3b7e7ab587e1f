//! Container runtime capability set (spec §6, §9 "container CLI
//! diversity"): build, run detached, exec, copy-in via stdin, inspect, logs,
//! create/inspect/remove networks — behind one trait so no concrete
//! runtime's flag set leaks into the Executor. Grounded on the shape of a
//! sandbox-lifecycle trait (create/start/stop/destroy/execute_command/
//! upload_files/get_logs) from the broader example pack, since the teacher
//! repo itself has nothing relevant here (its "containers" concern is a Nix
//! binary cache, not an OCI runtime).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ContainerError, Result};
use crate::process::{CommandOutput, ProcessRunner};

/// Declarative shape of one container to start (app or sidecar).
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: Option<String>,
    pub aliases: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub published_port: Option<u16>,
    pub read_only: bool,
    pub tmpfs: Vec<String>,
    pub no_new_privileges: bool,
    pub cap_drop_all: bool,
}

/// The capability set the Executor drives. Implementations own the concrete
/// CLI's flag vocabulary.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Builds an image from `context_dir`'s Dockerfile, returning the image id.
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<String>;

    /// Creates a named network, idempotently (spec §4.7 step 2).
    async fn create_network(&self, name: &str) -> Result<()>;

    /// Removes a named network. Tolerates the network already being gone.
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// Starts `spec` detached, returning the container id.
    async fn run_detached(&self, spec: &ContainerSpec) -> Result<String>;

    /// Execs `command` inside a running container.
    async fn exec(&self, container_id: &str, command: &[String]) -> Result<CommandOutput>;

    /// Writes `contents` to `dest_path` inside the container via stdin,
    /// without baking the file into the image (spec §4.7 step 5).
    async fn copy_in(&self, container_id: &str, dest_path: &str, contents: &[u8]) -> Result<()>;

    /// Fetches the container's captured logs.
    async fn logs(&self, container_id: &str) -> Result<String>;

    /// Stops and removes a container. Tolerates it already being gone.
    async fn stop(&self, container_id: &str) -> Result<()>;

    /// Probes whether `container_id` accepts a TCP connection on `port`
    /// (spec §4.7 step 5, "connect-probe loop").
    async fn tcp_ready(&self, container_id: &str, port: u16) -> Result<bool>;
}

/// Drives an opaque container CLI (`docker`, `podman`, ...) via subprocess.
pub struct CliContainerRuntime {
    binary: String,
    runner: Arc<dyn ProcessRunner>,
}

impl CliContainerRuntime {
    pub fn new(binary: impl Into<String>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { binary: binary.into(), runner }
    }

    pub fn docker(runner: Arc<dyn ProcessRunner>) -> Self {
        Self::new("docker", runner)
    }

    async fn run(&self, args: Vec<String>) -> std::io::Result<CommandOutput> {
        self.runner.run(&self.binary, &args, None).await
    }

    fn container_spec_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string(), "--name".to_string(), spec.name.clone()];
        if let Some(network) = &spec.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for alias in &spec.aliases {
            args.push("--network-alias".to_string());
            args.push(alias.clone());
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        if let Some(port) = spec.published_port {
            args.push("-p".to_string());
            args.push(format!("{port}:{port}"));
        }
        if spec.read_only {
            args.push("--read-only".to_string());
        }
        for mount in &spec.tmpfs {
            args.push("--tmpfs".to_string());
            args.push(mount.clone());
        }
        if spec.no_new_privileges {
            args.push("--security-opt".to_string());
            args.push("no-new-privileges".to_string());
        }
        if spec.cap_drop_all {
            args.push("--cap-drop".to_string());
            args.push("ALL".to_string());
        }
        args.push(spec.image.clone());
        args
    }
}

#[async_trait]
impl ContainerRuntime for CliContainerRuntime {
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<String> {
        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            tag.to_string(),
            context_dir.display().to_string(),
        ];
        let output = self.run(args).await?;
        if !output.success() {
            return Err(ContainerError::BuildFailed {
                reason: output.stderr,
                exit_code: Some(output.exit_code),
            });
        }

        let inspect = self
            .run(vec!["inspect".to_string(), "--format".to_string(), "{{.Id}}".to_string(), tag.to_string()])
            .await?;
        Ok(inspect.stdout.trim().to_string())
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let inspect = self.run(vec!["network".to_string(), "inspect".to_string(), name.to_string()]).await?;
        if inspect.success() {
            return Ok(());
        }
        let create = self.run(vec!["network".to_string(), "create".to_string(), name.to_string()]).await?;
        if !create.success() {
            return Err(ContainerError::NetworkError { network: name.to_string(), reason: create.stderr });
        }
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        let _ = self.run(vec!["network".to_string(), "rm".to_string(), name.to_string()]).await?;
        Ok(())
    }

    async fn run_detached(&self, spec: &ContainerSpec) -> Result<String> {
        let output = self.run(Self::container_spec_args(spec)).await?;
        if !output.success() {
            return Err(ContainerError::ExecFailed {
                container: spec.name.clone(),
                reason: output.stderr,
                exit_code: Some(output.exit_code),
            });
        }
        Ok(output.stdout.trim().to_string())
    }

    async fn exec(&self, container_id: &str, command: &[String]) -> Result<CommandOutput> {
        let mut args = vec!["exec".to_string(), container_id.to_string()];
        args.extend(command.iter().cloned());
        Ok(self.run(args).await?)
    }

    async fn copy_in(&self, container_id: &str, dest_path: &str, contents: &[u8]) -> Result<()> {
        let args = vec!["exec".to_string(), "-i".to_string(), container_id.to_string(), "sh".to_string(), "-c".to_string(), format!("cat > {dest_path}")];
        let output = self.runner.run(&self.binary, &args, Some(contents)).await?;
        if !output.success() {
            return Err(ContainerError::ExecFailed {
                container: container_id.to_string(),
                reason: output.stderr,
                exit_code: Some(output.exit_code),
            });
        }
        Ok(())
    }

    async fn logs(&self, container_id: &str) -> Result<String> {
        let output = self.run(vec!["logs".to_string(), container_id.to_string()]).await?;
        Ok(format!("{}{}", output.stdout, output.stderr))
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        let _ = self.run(vec!["stop".to_string(), container_id.to_string()]).await?;
        let _ = self.run(vec!["rm".to_string(), "-f".to_string(), container_id.to_string()]).await?;
        Ok(())
    }

    async fn tcp_ready(&self, container_id: &str, port: u16) -> Result<bool> {
        let check = format!("nc -z localhost {port} || exit 1");
        let output = self.exec(container_id, &["sh".to_string(), "-c".to_string(), check]).await?;
        Ok(output.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fakes::FakeProcessRunner;
    use crate::process::CommandOutput;

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput { stdout: stdout.to_string(), exit_code: 0, ..Default::default() }
    }

    #[tokio::test]
    async fn build_image_returns_trimmed_inspect_output() {
        let runner = Arc::new(FakeProcessRunner::new(vec![ok(""), ok("sha256:deadbeef\n")]));
        let runtime = CliContainerRuntime::docker(runner);
        let id = runtime.build_image(Path::new("."), "app:sid").await.unwrap();
        assert_eq!(id, "sha256:deadbeef");
    }

    #[tokio::test]
    async fn create_network_is_idempotent_when_already_present() {
        let runner = Arc::new(FakeProcessRunner::always_ok());
        let runtime = CliContainerRuntime::docker(runner.clone());
        runtime.create_network("sid-net").await.unwrap();
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_detached_builds_security_flags() {
        let runner = Arc::new(FakeProcessRunner::new(vec![ok("container-id\n")]));
        let runtime = CliContainerRuntime::docker(runner.clone());
        let spec = ContainerSpec {
            name: "app".to_string(),
            image: "app:sid".to_string(),
            read_only: true,
            no_new_privileges: true,
            cap_drop_all: true,
            tmpfs: vec!["/tmp".to_string()],
            ..Default::default()
        };
        let id = runtime.run_detached(&spec).await.unwrap();
        assert_eq!(id, "container-id");
        let calls = runner.calls.lock().unwrap();
        let (_, args) = &calls[0];
        assert!(args.contains(&"--read-only".to_string()));
        assert!(args.contains(&"ALL".to_string()));
    }
}
