//! The Executor (spec §4.7): drives one vuln bundle through
//! `build -> network acquire -> sidecars up -> app up -> poc push ->
//! app ready -> exec payloads -> logs -> teardown`, with teardown
//! guaranteed on every exit path (spec §5, "Container instances are owned
//! by the Executor for the duration of one bundle run, guaranteed released
//! on every exit path").

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use vulnforge_core::domain::{ExecutorPolicy, Plan, ReadyProbe, SidecarSpec, VulnBundle};
use vulnforge_core::domain::manifest::Manifest;
use vulnforge_state::{BundleRunLedger, RunEvent, RunId, RunMetadata, RunSummary};

use crate::error::{ContainerError, Result};
use crate::network_pool::NetworkPool;
use crate::process::ProcessRunner;
use crate::runtime::{ContainerRuntime, ContainerSpec};
use crate::sbom;

/// Everything one bundle run produced, for the Verifier and Pack stages.
#[derive(Debug, Clone)]
pub struct BundleRunOutcome {
    pub run_id: RunId,
    pub image_id: String,
    pub sbom_path: Option<PathBuf>,
    pub build_log_path: PathBuf,
    pub run_log_path: PathBuf,
    pub combined_log: String,
    pub summary: RunSummary,
}

/// Runs a single vuln bundle's container lifecycle inside an already
/// materialised workspace.
pub struct Executor {
    runtime: Arc<dyn ContainerRuntime>,
    network_pool: Arc<NetworkPool>,
    process_runner: Arc<dyn ProcessRunner>,
    ledger: Arc<dyn BundleRunLedger>,
}

/// A started auxiliary (sidecar or app) container, tracked so teardown can
/// stop every one of them regardless of where the happy path stopped.
struct StartedContainer {
    name: String,
    id: String,
}

impl Executor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        network_pool: Arc<NetworkPool>,
        process_runner: Arc<dyn ProcessRunner>,
        ledger: Arc<dyn BundleRunLedger>,
    ) -> Self {
        Self { runtime, network_pool, process_runner, ledger }
    }

    /// Runs the full lifecycle for `bundle`, whose files live at
    /// `workspace_dir` and whose validated shape is `manifest`. `build_dir`
    /// and `run_dir` are the artifact directories this run writes into
    /// (spec §6: `artifacts/<sid>/build[/<slug>]/`, `.../run[/<slug>]/`).
    pub async fn run_bundle(
        &self,
        plan: &Plan,
        bundle: &VulnBundle,
        manifest: &Manifest,
        workspace_dir: &Path,
        build_dir: &Path,
        run_dir: &Path,
    ) -> Result<BundleRunOutcome> {
        let policy = &plan.executor_policy;
        let network_name = policy.network.clone().unwrap_or_else(|| format!("{}-net", plan.sid));

        let run_id = self
            .ledger
            .create_run(RunMetadata {
                sid: plan.sid.clone(),
                slug: bundle.slug.clone(),
                tags: serde_json::json!({ "vuln_id": bundle.vuln_id }),
            })
            .await?;

        let mut seq = 0u64;
        let mut started: Vec<StartedContainer> = Vec::new();
        let mut summary = RunSummary::default();

        let outcome = self
            .drive(
                plan,
                bundle,
                manifest,
                workspace_dir,
                build_dir,
                run_dir,
                &network_name,
                &run_id,
                &mut seq,
                &mut started,
                &mut summary,
            )
            .await;

        self.teardown(&network_name, &started).await;

        match &outcome {
            Ok(_) => {
                self.ledger.complete_run(&run_id, summary.clone()).await?;
            }
            Err(_) => {
                self.ledger.fail_run(&run_id, summary.clone()).await?;
            }
        }

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        plan: &Plan,
        bundle: &VulnBundle,
        manifest: &Manifest,
        workspace_dir: &Path,
        build_dir: &Path,
        run_dir: &Path,
        network_name: &str,
        run_id: &RunId,
        seq: &mut u64,
        started: &mut Vec<StartedContainer>,
        summary: &mut RunSummary,
    ) -> Result<BundleRunOutcome> {
        let policy = &plan.executor_policy;
        let tag = format!("vulnforge/{}-{}", plan.sid, bundle.slug);

        // 1. Build stage.
        self.event(run_id, seq, "build_started", serde_json::json!({})).await?;
        let image_id = self.runtime.build_image(workspace_dir, &tag).await?;
        tokio::fs::create_dir_all(build_dir).await.map_err(ContainerError::Io)?;
        tokio::fs::write(build_dir.join("image_id.txt"), &image_id)
            .await
            .map_err(ContainerError::Io)?;
        let sbom_path = sbom::generate_sbom(
            self.process_runner.as_ref(),
            workspace_dir,
            &build_dir.join("sbom.spdx.json"),
        )
        .await;
        summary.build_passed = true;
        self.event(run_id, seq, "build_completed", serde_json::json!({ "image_id": image_id })).await?;

        // 2. Network acquire.
        self.network_pool.acquire(network_name).await?;
        self.event(run_id, seq, "network_acquired", serde_json::json!({ "network": network_name })).await?;

        // 3. Sidecars up.
        if policy.sidecars_enabled {
            for sidecar in &policy.sidecars {
                let container_id = self
                    .start_sidecar(sidecar, network_name)
                    .await?;
                started.push(StartedContainer { name: sidecar.name.clone(), id: container_id.clone() });
                self.wait_ready(&container_id, &sidecar.ready_probe, &sidecar.name).await?;
                self.event(
                    run_id,
                    seq,
                    "sidecar_ready",
                    serde_json::json!({ "name": sidecar.name, "container_id": container_id }),
                )
                .await?;
            }
        }

        // 4. App up.
        let app_name = format!("{}-{}-app", plan.sid, bundle.slug);
        let app_spec = ContainerSpec {
            name: app_name.clone(),
            image: tag.clone(),
            network: Some(network_name.to_string()),
            published_port: Some(manifest.run.port),
            read_only: true,
            tmpfs: vec!["/tmp".to_string()],
            no_new_privileges: true,
            cap_drop_all: true,
            ..Default::default()
        };
        let app_id = self.runtime.run_detached(&app_spec).await?;
        started.push(StartedContainer { name: app_name.clone(), id: app_id.clone() });
        self.event(run_id, seq, "app_started", serde_json::json!({ "container_id": app_id })).await?;

        // 5. PoC injection + app readiness.
        let poc_file = manifest.find_file("poc.py").ok_or_else(|| ContainerError::ExecFailed {
            container: app_id.clone(),
            reason: "manifest has no poc.py to inject".to_string(),
            exit_code: None,
        })?;
        self.runtime.copy_in(&app_id, "/tmp/poc.py", poc_file.content.as_bytes()).await?;

        let mut ready = false;
        for _ in 0..20 {
            if self.runtime.tcp_ready(&app_id, manifest.run.port).await.unwrap_or(false) {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        if !ready {
            return Err(ContainerError::AppNotReady {
                port: manifest.run.port,
                reason: "app did not accept connections within the retry budget".to_string(),
            }
            .into());
        }
        summary.run_passed = true;
        self.event(run_id, seq, "app_ready", serde_json::json!({ "port": manifest.run.port })).await?;

        // 6. Exec payloads.
        let mut last_exit_code = 0;
        for payload in &plan.requirement.poc_payloads {
            let mut command = vec!["python".to_string(), "/tmp/poc.py".to_string()];
            if let Some(value) = payload {
                command.push("--payload".to_string());
                command.push(value.clone());
            }
            let output = self.runtime.exec(&app_id, &command).await?;
            last_exit_code = output.exit_code;
            self.event(
                run_id,
                seq,
                "poc_exec",
                serde_json::json!({ "payload": payload, "exit_code": output.exit_code, "stdout": output.stdout }),
            )
            .await?;
        }
        summary.exit_code = Some(last_exit_code);

        // 7. Logs.
        let app_logs = self.runtime.logs(&app_id).await.unwrap_or_default();
        let mut combined_log = format!("=== app ({app_id}) ===\n{app_logs}\n");
        for container in started.iter().filter(|c| c.id != app_id) {
            let sidecar_logs = self.runtime.logs(&container.id).await.unwrap_or_default();
            combined_log.push_str(&format!("=== sidecar {} ({}) ===\n{sidecar_logs}\n", container.name, container.id));
        }

        tokio::fs::create_dir_all(run_dir).await.map_err(ContainerError::Io)?;
        let run_log_path = run_dir.join("run.log");
        tokio::fs::write(&run_log_path, &combined_log).await.map_err(ContainerError::Io)?;
        let build_log_path = build_dir.join("build.log");
        tokio::fs::write(&build_log_path, format!("built {tag} as {image_id}\n"))
            .await
            .map_err(ContainerError::Io)?;

        summary.total_events = *seq;
        summary.duration_ms = 0;

        Ok(BundleRunOutcome {
            run_id: run_id.clone(),
            image_id,
            sbom_path,
            build_log_path,
            run_log_path,
            combined_log,
            summary: summary.clone(),
        })
    }

    async fn start_sidecar(&self, sidecar: &SidecarSpec, network_name: &str) -> Result<String> {
        let env = sidecar
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
            .collect();
        let spec = ContainerSpec {
            name: sidecar.name.clone(),
            image: sidecar.image.clone(),
            network: Some(network_name.to_string()),
            aliases: sidecar.aliases.clone(),
            env,
            ..Default::default()
        };
        self.runtime.run_detached(&spec).await
    }

    async fn wait_ready(&self, container_id: &str, probe: &ReadyProbe, name: &str) -> Result<()> {
        match probe {
            ReadyProbe::Mysql { retries, interval_secs } => {
                for attempt in 0..*retries {
                    let output = self
                        .runtime
                        .exec(container_id, &["mysqladmin".to_string(), "ping".to_string()])
                        .await;
                    if matches!(output, Ok(ref o) if o.success()) {
                        return Ok(());
                    }
                    info!(sidecar = name, attempt, "waiting for mysql readiness");
                    tokio::time::sleep(Duration::from_secs(*interval_secs)).await;
                }
                Err(ContainerError::SidecarNotReady {
                    sidecar: name.to_string(),
                    reason: format!("mysqladmin ping did not succeed within {retries} retries"),
                }
                .into())
            }
            ReadyProbe::WaitSeconds { seconds } => {
                tokio::time::sleep(Duration::from_secs(*seconds)).await;
                Ok(())
            }
        }
    }

    async fn teardown(&self, network_name: &str, started: &[StartedContainer]) {
        for container in started {
            if let Err(err) = self.runtime.stop(&container.id).await {
                warn!(container = %container.name, error = %err, "teardown: failed to stop container");
            }
        }
        if let Err(err) = self.network_pool.release(network_name).await {
            warn!(network = network_name, error = %err, "teardown: failed to release network");
        }
    }

    async fn event(
        &self,
        run_id: &RunId,
        seq: &mut u64,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        *seq += 1;
        self.ledger
            .append_event(run_id, RunEvent { seq: *seq, kind: kind.to_string(), payload, timestamp: Utc::now() })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fakes::FakeProcessRunner;
    use crate::process::CommandOutput;
    use crate::runtime::CliContainerRuntime;
    use vulnforge_core::domain::manifest::{BuildSpec, FileEntry, PocSpec, RunSpec};
    use vulnforge_core::domain::requirement::{GeneratorMode, LoopPolicy, Requirement, RuntimeConfig, SynthesisLimits, VerifierPolicy};
    use vulnforge_core::domain::{DecodingMode, RunMatrix, VariationKey};
    use vulnforge_state::fakes::MemoryBundleRunLedger;

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput { stdout: stdout.to_string(), exit_code: 0, ..Default::default() }
    }

    fn manifest() -> Manifest {
        Manifest {
            intent: "test".to_string(),
            pattern_tags: vec![],
            files: vec![FileEntry {
                path: "poc.py".to_string(),
                content: "print('ok')".to_string(),
                encoding: vulnforge_core::domain::manifest::ContentEncoding::Plain,
            }],
            deps: vec![],
            build: BuildSpec { command: "pip install -r requirements.txt".to_string() },
            run: RunSpec { command: "python app.py".to_string(), port: 8080 },
            poc: PocSpec::default(),
            notes: None,
            metadata: serde_json::Map::new(),
        }
    }

    fn plan() -> Plan {
        let requirement = Requirement {
            vuln_ids: vec!["CWE-89".to_string()],
            language: "python".to_string(),
            framework: "flask".to_string(),
            runtime: RuntimeConfig { database: None, allow_external_db: false },
            model_version: None,
            prompt_hash: None,
            seed: None,
            retriever_commit: None,
            corpus_snapshot: None,
            pattern_id: None,
            deps_digest: None,
            base_image_digest: None,
            generator_mode: GeneratorMode::Synthesis,
            multi_vuln: true,
            user_deps: vec![],
            synthesis_limits: SynthesisLimits::default(),
            verifier_policy: VerifierPolicy::default(),
            loop_policy: LoopPolicy::default(),
            poc_payloads: vec![None],
        };
        Plan::new(
            "sid-testtesttest".to_string(),
            requirement,
            VariationKey::from_mode(DecodingMode::Deterministic, 0),
            LoopPolicy::default(),
            ExecutorPolicy { sidecars_enabled: false, ..Default::default() },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn happy_path_produces_passing_summary_and_tears_down_network() {
        let runner = Arc::new(FakeProcessRunner::new(vec![
            ok(""),                  // build
            ok("sha256:abc\n"),      // inspect
            ok("{}"),                // sbom attempt 1 (styled as empty json, accepted)
            ok(""),                  // network inspect (missing)
            ok(""),                  // network create
            ok("app-container-id\n"),// run detached (app)
            ok(""),                  // copy_in (exec -i)
            ok(""),                  // tcp_ready exec check
            ok("exploit output"),    // poc exec payload
            ok("app logs"),          // logs
            ok(""),                  // stop
            ok(""),                  // rm -f
            ok(""),                  // network rm
        ]));
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(CliContainerRuntime::docker(runner.clone()));
        let network_pool = Arc::new(NetworkPool::new(runtime.clone()));
        let ledger: Arc<dyn BundleRunLedger> = Arc::new(MemoryBundleRunLedger::new());
        let executor = Executor::new(runtime, network_pool, runner, ledger);

        let plan = plan();
        let bundle = &plan.run_matrix.vuln_bundles[0];
        let tmp = tempfile::tempdir().unwrap();
        let workspace = tmp.path().join("workspace");
        tokio::fs::create_dir_all(&workspace).await.unwrap();
        let build_dir = tmp.path().join("build");
        let run_dir = tmp.path().join("run");

        let outcome = executor
            .run_bundle(&plan, bundle, &manifest(), &workspace, &build_dir, &run_dir)
            .await
            .unwrap();

        assert!(outcome.summary.build_passed);
        assert!(outcome.summary.run_passed);
        assert!(build_dir.join("image_id.txt").is_file());
        assert!(run_dir.join("run.log").is_file());
    }
}
