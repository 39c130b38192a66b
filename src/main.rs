mod action;
mod actions;
mod config;
mod context;
mod controller;
mod demo;
mod emission;
mod error;
mod fact;
mod phase;
mod policy;
mod spec;
mod state;
mod store;
mod validation;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use config::BootstrapConfig;
use controller::{AgentController, StopReason};
use store::FileSystemStateStore;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "slater",
    version,
    about = "Declarative, iteration-driven agent controller"
)]
enum Cli {
    /// Run an agent to completion, failure, or the next pause point
    Run {
        /// Identifier under which this agent's state is stored
        agent_id: String,

        /// Overrides the bootstrap config's `goal`, if any
        #[arg(long)]
        goal: Option<String>,

        /// Overrides the bootstrap config's `repo.root`, if any
        #[arg(long)]
        repo_root: Option<PathBuf>,

        /// Bootstrap config file path
        #[arg(long, default_value = "slater.yaml")]
        config: PathBuf,

        /// Directory holding per-agent state snapshots and audit logs
        #[arg(long, default_value = ".slater-state")]
        state_dir: PathBuf,

        /// Hard iteration ceiling before the run is treated as a fatal guard violation
        #[arg(long, default_value_t = 50)]
        max_iterations: u64,

        /// Consecutive same-phase iterations before a cycle is declared
        #[arg(long, default_value_t = 3)]
        max_same_phase: usize,
    },

    /// Print the demonstration agent's phases and procedures without running them
    Plan,

    /// Show the demonstration spec and the resolved bootstrap configuration
    Info {
        /// Bootstrap config file path
        #[arg(long, default_value = "slater.yaml")]
        config: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("slater=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli {
        Cli::Run {
            agent_id,
            goal,
            repo_root,
            config,
            state_dir,
            max_iterations,
            max_same_phase,
        } => run(agent_id, goal, repo_root, config, state_dir, max_iterations, max_same_phase).await?,
        Cli::Plan => plan()?,
        Cli::Info { config } => info(config)?,
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run(
    agent_id: String,
    goal: Option<String>,
    repo_root: Option<PathBuf>,
    config_path: PathBuf,
    state_dir: PathBuf,
    max_iterations: u64,
    max_same_phase: usize,
) -> Result<()> {
    let mut bootstrap_config = BootstrapConfig::from_yaml_or_default(&config_path)
        .context("loading bootstrap configuration")?;
    bootstrap_config.apply_cli_overrides(goal, repo_root);

    let llm_client = demo::llm_client_for(&bootstrap_config.llm);

    let spec = demo::build_demo_spec(true).context("building demonstration agent spec")?;
    let store = FileSystemStateStore::new(&state_dir)
        .with_context(|| format!("initializing state store at {}", state_dir.display()))?;

    let mut controller = AgentController::new(spec, agent_id.clone(), bootstrap_config, store, llm_client)
        .context("bootstrapping agent controller")?;

    let outcome = controller
        .run(max_iterations, max_same_phase)
        .await
        .with_context(|| {
            format!(
                "agent '{agent_id}' failed during iteration {} (phase '{}')",
                controller.iteration(),
                controller.last_phase()
            )
        })?;

    println!(
        "Agent '{agent_id}' stopped after {} iteration(s) in phase '{}': {outcome:?}",
        controller.iteration(),
        controller.last_phase()
    );

    if outcome == StopReason::Failed {
        std::process::exit(1);
    }

    Ok(())
}

fn plan() -> Result<()> {
    let spec = demo::build_demo_spec(false).context("building demonstration agent spec")?;

    println!("Slater - Plan");
    println!("  Spec: {} (v{})", spec.name, spec.version);
    println!("  Default phase: {}", spec.transition_policy.default);
    println!();
    println!("  Phases and procedures:");
    for phase in spec.phases.iter() {
        let procedure = spec
            .procedures
            .get(phase)
            .expect("validated: every declared phase has a procedure");
        let materialized = procedure.materialize();
        let action_names: Vec<&str> = materialized.iter().map(|a| a.name()).collect();
        println!("    {phase} -> [{}]", action_names.join(", "));
    }

    println!();
    println!("  Transition rules:");
    for rule in &spec.transition_policy.rules {
        println!(
            "    enter={} when_all={:?} when_any={:?} when_none={:?}",
            rule.enter, rule.when_all, rule.when_any, rule.when_none
        );
    }

    Ok(())
}

fn info(config_path: PathBuf) -> Result<()> {
    let bootstrap_config =
        BootstrapConfig::from_yaml_or_default(&config_path).context("loading bootstrap configuration")?;
    let spec = demo::build_demo_spec(true).context("building demonstration agent spec")?;

    println!("{}", spec.describe());
    println!();
    match &bootstrap_config.llm {
        Some(llm) => println!(
            "LLM: provider={} model={} temperature={}",
            llm.provider, llm.model, llm.temperature
        ),
        None => println!("LLM: not configured (demonstration client will be used)"),
    }
    if let Some(goal) = &bootstrap_config.goal {
        println!("Goal: {goal}");
    }
    if let Some(repo) = &bootstrap_config.repo {
        println!("Repo root: {}", repo.root.display());
    }

    Ok(())
}
