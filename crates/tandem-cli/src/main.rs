//! CLI binary for running the Tandem dual-platform monitoring workflow.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use tandem_adapters::{
    Classifier, JsonReportRenderer, LlmClassifier, MonitorConfig, PlatformConfig, RuleClassifier,
    SnapshotPlatform,
};
use tandem_engine::{BackoffPolicy, BranchConfig, WorkflowRunner};
use tandem_types::{Platform, RunState};

#[derive(Parser)]
#[command(name = "tandem", version, about = "Dual-platform monitoring workflow runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full monitoring cycle over captured platform extracts
    Run {
        /// JSON dump of today's console task rows
        #[arg(long)]
        console_tasks: PathBuf,

        /// JSON dump of today's publisher task rows
        #[arg(long)]
        publisher_tasks: PathBuf,

        /// Classify with the built-in rule table instead of the hosted model
        #[arg(long)]
        offline: bool,

        /// Artifact output directory (default: ARTIFACT_DIR or ./reports)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Also write the full run snapshot (state + journal) to this path
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Validate the environment configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            console_tasks,
            publisher_tasks,
            offline,
            out,
            snapshot,
        } => {
            cmd_run(
                &console_tasks,
                &publisher_tasks,
                offline,
                out.as_deref(),
                snapshot.as_deref(),
            )
            .await?;
        }
        Commands::CheckConfig => {
            cmd_check_config();
        }
    }

    Ok(())
}

fn branch_for(
    platform: Platform,
    platform_config: &PlatformConfig,
    tasks_path: &std::path::Path,
    classifier: Arc<dyn Classifier>,
) -> BranchConfig {
    let snapshot = Arc::new(SnapshotPlatform::new(platform, tasks_path));
    BranchConfig {
        platform,
        grouping: platform_config.grouping,
        monitored: platform_config.monitored.clone(),
        auth: snapshot.clone(),
        extract: snapshot,
        classifier,
        backoff: BackoffPolicy::default(),
    }
}

async fn cmd_run(
    console_tasks: &std::path::Path,
    publisher_tasks: &std::path::Path,
    offline: bool,
    out: Option<&std::path::Path>,
    snapshot_path: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let config = MonitorConfig::from_env();
    tracing::info!(
        console = %console_tasks.display(),
        publisher = %publisher_tasks.display(),
        offline,
        "starting monitoring run"
    );

    let classifier: Arc<dyn Classifier> = if offline {
        Arc::new(RuleClassifier)
    } else {
        if config.classifier.api_key.is_empty() {
            anyhow::bail!("CLASSIFIER_API_KEY is not set (use --offline to skip the hosted model)");
        }
        Arc::new(LlmClassifier::new(&config.classifier)?)
    };

    if config.console.monitored.is_empty() && config.publisher.monitored.is_empty() {
        anyhow::bail!("no monitored groups configured (set CONSOLE_MONITORED / PUBLISHER_MONITORED)");
    }

    let out_dir = out.unwrap_or(config.artifact_dir.as_path());
    let runner = WorkflowRunner::new(
        branch_for(
            Platform::Console,
            &config.console,
            console_tasks,
            classifier.clone(),
        ),
        branch_for(
            Platform::Publisher,
            &config.publisher,
            publisher_tasks,
            classifier,
        ),
        Arc::new(JsonReportRenderer::new(out_dir)),
    );

    let state = Arc::new(RunState::new(config.max_retries));
    let outcome = runner.run(state).await;

    if let Some(path) = snapshot_path {
        outcome.snapshot.save(path)?;
        println!("Run snapshot written to {}", path.display());
    }

    print_summary(&outcome);

    if outcome.failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(outcome: &tandem_engine::RunOutcome) {
    let report = &outcome.report;

    println!("\n=== STATUS REPORT ===");
    println!(
        "Overall: {} | {}",
        report.overall_status, report.combined_summary
    );
    if report.partial {
        println!("(partial: one platform contributed no data)");
    }

    for (platform, section) in &report.platforms {
        println!(
            "\n[{platform}] branch {:?}, {} monitored group(s)",
            section.branch_status, section.total_groups
        );
        for (alias, group_report) in &section.reports {
            println!(
                "  {}: [{}] {}",
                alias, group_report.status, group_report.summary
            );
            if !group_report.failed_task_names.is_empty() {
                let names: Vec<&str> = group_report
                    .failed_task_names
                    .iter()
                    .map(String::as_str)
                    .collect();
                println!("    failed tasks: {}", names.join(", "));
            }
        }
    }

    match &outcome.artifact {
        Some(path) => println!("\nArtifact: {}", path.display()),
        None => println!("\nNo artifact published"),
    }
}

fn cmd_check_config() {
    let config = MonitorConfig::from_env();
    let missing = config.validate();

    println!(
        "Console: {} monitored group(s), grouping {:?}",
        config.console.monitored.len(),
        config.console.grouping
    );
    println!(
        "Publisher: {} monitored group(s), grouping {:?}",
        config.publisher.monitored.len(),
        config.publisher.grouping
    );
    println!(
        "Classifier: {} (model {})",
        config.classifier.endpoint, config.classifier.model
    );
    println!(
        "Max retries: {}, timeout: {}ms",
        config.max_retries, config.timeout_ms
    );

    if missing.is_empty() {
        println!("Configuration OK");
        return;
    }
    for var in &missing {
        println!("MISSING: {var}");
    }
    std::process::exit(1);
}
