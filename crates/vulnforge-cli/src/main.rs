//! `vulnforge` — drives one SID through the PLAN->DRAFT->BUILD->RUN->VERIFY
//! ->REVIEW->PACK pipeline.
//!
//! Builds a `Requirement`/`VariationKey`/`LoopPolicy`/`ExecutorPolicy` in
//! code from the parsed flags and hands them to
//! [`vulnforge_pipeline::Orchestrator::run`] — there is intentionally no
//! config-file format; the CLI surface *is* the requirement schema.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use vulnforge_agents::AgentContext;
use vulnforge_containers::{CliContainerRuntime, Executor, NetworkPool, TokioProcessRunner};
use vulnforge_core::domain::{
    DecodingMode, ExecutorPolicy, GeneratorMode, LoopPolicy, Requirement, RuntimeConfig,
    SynthesisLimits, VariationKey, VerifierPolicy,
};
use vulnforge_core::verifier::{RuleLoader, VerifierChain};
use vulnforge_llm_bridge::{HttpLlmClient, LlmClient, StubLlmClient};
use vulnforge_pipeline::Orchestrator;
use vulnforge_state::{FsBundleRunLedger, FsReflexionLedger, MetadataStore, WorkspaceLayout};

#[derive(Parser)]
#[command(name = "vulnforge")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Autonomous generator of intentionally vulnerable software bundles", long_about = None)]
struct Cli {
    /// Emit newline-delimited JSON log lines instead of human-readable text.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Default log verbosity when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Root directory the workspace/artifacts/metadata/cas/rag layout is
    /// rooted at. Created if it does not already exist.
    #[arg(long, global = true, default_value = ".vulnforge")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a requirement to completion: PLAN once, then loop DRAFT through
    /// REVIEW until PACK or the retry budget is exhausted.
    Run(Box<RunArgs>),
}

#[derive(Clone, Copy, ValueEnum)]
enum GeneratorModeArg {
    Template,
    Synthesis,
    Hybrid,
}

impl From<GeneratorModeArg> for GeneratorMode {
    fn from(value: GeneratorModeArg) -> Self {
        match value {
            GeneratorModeArg::Template => GeneratorMode::Template,
            GeneratorModeArg::Synthesis => GeneratorMode::Synthesis,
            GeneratorModeArg::Hybrid => GeneratorMode::Hybrid,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DecodingModeArg {
    Deterministic,
    Diverse,
}

impl From<DecodingModeArg> for DecodingMode {
    fn from(value: DecodingModeArg) -> Self {
        match value {
            DecodingModeArg::Deterministic => DecodingMode::Deterministic,
            DecodingModeArg::Diverse => DecodingMode::Diverse,
        }
    }
}

#[derive(clap::Args)]
struct RunArgs {
    /// Target vuln id(s), e.g. `CWE-89`. Repeat the flag for a multi-vuln run.
    #[arg(long = "vuln-id", required = true)]
    vuln_ids: Vec<String>,

    #[arg(long, default_value = "python")]
    language: String,

    #[arg(long, default_value = "flask")]
    framework: String,

    /// Database the runtime sidecar should provide (e.g. `mysql`). Absent
    /// means no database sidecar is required.
    #[arg(long)]
    database: Option<String>,

    #[arg(long)]
    allow_external_db: bool,

    #[arg(long = "generator-mode", value_enum, default_value_t = GeneratorModeArg::Synthesis)]
    generator_mode: GeneratorModeArg,

    /// Keep only the first `--vuln-id` instead of fanning several out into a
    /// multi-vuln run matrix (spec default is multi-vuln when more than one
    /// is given).
    #[arg(long)]
    single_vuln: bool,

    /// Extra dependency the generated bundle is allowed to declare beyond
    /// what the Dependency Guard infers from the vuln id.
    #[arg(long = "user-dep")]
    user_deps: Vec<String>,

    #[arg(long, default_value_t = 1)]
    self_consistency_k: u32,

    #[arg(long)]
    auto_patch: bool,

    /// Prefer the LLM-assisted verifier over the rule-based one even when a
    /// rule exists for the vuln id (spec default prefers the rule).
    #[arg(long)]
    prefer_llm_over_rule: bool,

    #[arg(long)]
    allow_llm_assist: bool,

    #[arg(long, default_value_t = 4000)]
    log_excerpt_chars: usize,

    #[arg(long, default_value_t = 3)]
    max_loops: u32,

    #[arg(long = "mode", value_enum, default_value_t = DecodingModeArg::Deterministic)]
    decoding_mode: DecodingModeArg,

    /// Seed for the deterministic sampling pattern pool (spec §3).
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// PoC payload(s) to exec in order. Repeat the flag for several. Absent
    /// means a single no-flag PoC invocation.
    #[arg(long = "poc-payload")]
    poc_payloads: Vec<String>,

    /// Shared network name for the bundle's containers. Defaults to
    /// `<sid>-net`, derived once the SID is known, when left unset.
    #[arg(long)]
    network: Option<String>,

    #[arg(long)]
    stop_on_first_failure: bool,

    /// Packs a bundle even though it is intentionally vulnerable and the
    /// last loop result is an unresolved failure (spec §4.9, Pack refusal).
    #[arg(long)]
    allow_intentional_vuln: bool,

    /// `docker`, `podman`, or any other OCI CLI on `PATH`.
    #[arg(long, default_value = "docker")]
    container_binary: String,

    /// Model name passed to the LLM endpoint. Falls back to a deterministic
    /// stub client when no endpoint is configured (see `HttpLlmClient::from_env`).
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    /// Extra directory consulted for runtime-supplied verifier rules, beyond
    /// the built-in `rules/` directory and `VULD_RUNTIME_RULE_DIRS`.
    #[arg(long)]
    rule_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli.log_level.parse::<Level>().unwrap_or(Level::INFO);
    vulnforge_core::init_tracing(cli.json_logs, level);

    match cli.command {
        Commands::Run(args) => run(*args, cli.root).await,
    }
}

async fn run(args: RunArgs, root: PathBuf) -> Result<()> {
    tokio::fs::create_dir_all(&root)
        .await
        .with_context(|| format!("creating workspace root {}", root.display()))?;
    let layout = WorkspaceLayout::new(root);

    let llm: Arc<dyn LlmClient> = match HttpLlmClient::from_env(args.model.clone()) {
        Some(client) => {
            tracing::info!(model = %args.model, "using HTTP-backed LLM client");
            Arc::new(client)
        }
        None => {
            tracing::warn!("no LLM endpoint configured, falling back to the deterministic stub client");
            Arc::new(StubLlmClient::new())
        }
    };
    let reflexion = Arc::new(FsReflexionLedger::new(layout.clone()));
    let metadata = Arc::new(MetadataStore::new(layout.clone()));

    let mut rule_loader = RuleLoader::new(builtin_rules_dir()).with_env_dirs();
    if let Some(extra) = &args.rule_dir {
        rule_loader = rule_loader.with_extra_dir(extra.clone());
    }

    let agent_ctx = AgentContext::new(llm.clone(), reflexion.clone(), metadata, rule_loader.clone());

    let process_runner = Arc::new(TokioProcessRunner);
    let container_runtime = Arc::new(CliContainerRuntime::new(args.container_binary.clone(), process_runner.clone()));
    let network_pool = Arc::new(NetworkPool::new(container_runtime.clone()));
    let run_ledger = Arc::new(FsBundleRunLedger::new(layout.clone()));
    let executor = Executor::new(container_runtime, network_pool, process_runner, run_ledger);

    let verifier = VerifierChain::new(rule_loader).with_llm_client(llm);

    let orchestrator = Orchestrator::new(agent_ctx, layout, executor, verifier);

    let requirement = Requirement {
        vuln_ids: args.vuln_ids,
        language: args.language,
        framework: args.framework,
        runtime: RuntimeConfig {
            database: args.database,
            allow_external_db: args.allow_external_db,
        },
        model_version: Some(args.model),
        prompt_hash: None,
        seed: Some(args.seed.to_string()),
        retriever_commit: None,
        corpus_snapshot: None,
        pattern_id: None,
        deps_digest: None,
        base_image_digest: None,
        generator_mode: args.generator_mode.into(),
        multi_vuln: !args.single_vuln,
        user_deps: args.user_deps,
        synthesis_limits: SynthesisLimits {
            self_consistency_k: args.self_consistency_k,
            auto_patch: args.auto_patch,
        },
        verifier_policy: VerifierPolicy {
            prefer_rule: !args.prefer_llm_over_rule,
            allow_llm_assist: args.allow_llm_assist,
            log_excerpt_chars: args.log_excerpt_chars,
        },
        loop_policy: LoopPolicy { max_loops: args.max_loops },
        poc_payloads: if args.poc_payloads.is_empty() {
            vec![None]
        } else {
            args.poc_payloads.into_iter().map(Some).collect()
        },
    };
    requirement.validate().map_err(anyhow::Error::new)?;

    let variation_key = VariationKey::from_mode(args.decoding_mode.into(), args.seed);
    variation_key.validate().map_err(anyhow::Error::new)?;

    let executor_policy = ExecutorPolicy {
        network: args.network,
        stop_on_first_failure: args.stop_on_first_failure,
        allow_intentional_vuln: args.allow_intentional_vuln,
        ..ExecutorPolicy::default()
    };
    let loop_policy = LoopPolicy { max_loops: args.max_loops };

    let pack = orchestrator
        .run(requirement, variation_key, loop_policy, executor_policy)
        .await
        .context("pipeline run failed")?;

    println!("{}", serde_json::to_string_pretty(&pack)?);
    if !pack.overall_pass {
        std::process::exit(1);
    }
    Ok(())
}

/// `<CARGO_MANIFEST_DIR>/../../rules`, the workspace-level built-in rule set
/// shipped alongside the binary.
fn builtin_rules_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("rules")
}
