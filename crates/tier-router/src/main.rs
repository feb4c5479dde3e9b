use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

use tier_coordination::{ComplexityBucket, EntrySelector, Request, RouterConfig};
use tier_router::classification::RequestRouter;
use tier_router::config::{check_endpoint, ClassifierEndpoint};
use tier_router::http_classifier::HttpClassifier;
use tier_router::orchestrator::RoutingOrchestrator;
use tier_router::scripted::ScenarioScript;
use tier_router::telemetry::{init_tracing, recording_sink};

#[derive(Parser, Debug)]
#[command(author, version, about = "Tiered escalation router", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a router config and print the resolved hierarchy
    Check {
        /// Path to router TOML (defaults plus environment when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Pick the entry level for a task without running it
    Classify {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Task text to classify
        #[arg(long)]
        text: String,

        /// Ask the classifier endpoint from ROUTER_CLASSIFIER_URL first
        #[arg(long, default_value_t = false)]
        remote: bool,
    },

    /// Replay a JSON scenario script through the orchestrator
    Simulate {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Scenario script (per-level steps)
        #[arg(long)]
        script: PathBuf,

        /// Task text for the simulated request
        #[arg(long)]
        task: String,

        /// Force the entry level instead of classifying
        #[arg(long)]
        level: Option<String>,
    },
}

fn load_config(path: Option<&Path>) -> Result<RouterConfig> {
    match path {
        Some(path) => RouterConfig::load(path)
            .with_context(|| format!("Failed to load router config {}", path.display())),
        None => RouterConfig::from_env().context("Invalid router config from environment"),
    }
}

async fn check(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let hierarchy = config.hierarchy()?;
    let table = config.complexity_table_for(&hierarchy)?;

    let levels: Vec<_> = hierarchy
        .levels()
        .iter()
        .enumerate()
        .map(|(i, l)| {
            json!({
                "index": i,
                "name": l.name,
                "cost_weight": l.cost_weight,
                "confidence_threshold": l.confidence_threshold,
                "max_attempts": l.max_attempts,
                "terminal": hierarchy.is_terminal(i),
            })
        })
        .collect();
    let buckets: serde_json::Map<_, _> = ComplexityBucket::ALL
        .iter()
        .map(|b| (b.to_string(), json!(hierarchy.levels()[table.level_for(*b)].name)))
        .collect();

    let classifier = match ClassifierEndpoint::from_env() {
        Some(endpoint) => {
            let reachable = check_endpoint(&endpoint.url).await;
            if !reachable {
                warn!(url = %endpoint.url, "Classifier endpoint not reachable");
            }
            json!({"url": endpoint.url, "model": endpoint.model, "reachable": reachable})
        }
        None => json!(null),
    };

    let report = json!({
        "levels": levels,
        "complexity_table": buckets,
        "session_timeout_secs": config.session_timeout_secs,
        "attempt_timeout_secs": config.attempt_timeout_secs,
        "max_total_attempts": config.max_total_attempts,
        "error_repeat_window": config.error_repeat_window,
        "detection_scope": config.detection_scope,
        "cost_budget": config.cost_budget,
        "classifier": classifier,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn classify(config_path: Option<&Path>, text: &str, remote: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let hierarchy = config.hierarchy()?;
    let table = config.complexity_table_for(&hierarchy)?;
    let mut router = RequestRouter::new(
        EntrySelector::new(&hierarchy, table),
        config.classifier_timeout(),
    );
    if remote {
        let endpoint = ClassifierEndpoint::require_from_env()?;
        let backend = HttpClassifier::new(endpoint, config.classifier_timeout())
            .context("Failed to build classifier client")?;
        router = router.with_backend(Arc::new(backend));
    }

    let selection = router.classify(text).await;
    let report = json!({
        "decision": selection.decision,
        "fallback_cause": selection.fallback_cause.map(|e| e.to_string()),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn simulate(
    config_path: Option<&Path>,
    script_path: &Path,
    task: &str,
    level: Option<&str>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = ScenarioScript::load(script_path)?.into_registry();
    let (sink, memory) = recording_sink();
    let orchestrator = RoutingOrchestrator::new(config, registry)
        .context("Failed to build orchestrator")?
        .with_sink(sink);

    let disposition = orchestrator.route(Request::new(task), level).await;
    info!(
        events = memory.len(),
        success = disposition.is_success(),
        "Simulation finished"
    );

    let report = json!({
        "disposition": disposition,
        "metrics": orchestrator.metrics().snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();

    match args.command {
        Command::Check { config } => check(config.as_deref()).await,
        Command::Classify {
            config,
            text,
            remote,
        } => classify(config.as_deref(), &text, remote).await,
        Command::Simulate {
            config,
            script,
            task,
            level,
        } => simulate(config.as_deref(), &script, &task, level.as_deref()).await,
    }
}
