//! Spectra CLI - recon workflow DAG runner

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use spectra::error::{FixSuggestion, SpectraError};
use spectra::events::{self, ToolEventKind};
use spectra::graph::{render, snapshot, Dag};
use spectra::{Engine, EngineConfig, ToolCatalog};

#[derive(Parser)]
#[command(name = "spectra")]
#[command(about = "Spectra - recon workflow DAG runner")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow against a target domain
    Run {
        /// Path to workflow snapshot (.json)
        file: String,

        /// Target domain seeding the run
        #[arg(short, long)]
        domain: String,

        /// Directory holding run workspaces
        #[arg(short, long, default_value = "./spectra-runs")]
        workdir: PathBuf,

        /// Max tools running at once within a stage
        #[arg(short, long, default_value_t = 3)]
        concurrency: usize,

        /// Extra tool catalog entries (.yaml)
        #[arg(long)]
        catalog: Option<String>,
    },

    /// Validate a workflow file (structure and matrix consistency)
    Validate {
        /// Path to workflow snapshot (.json)
        file: String,
    },

    /// Print the execution plan without running anything
    Plan {
        /// Path to workflow snapshot (.json)
        file: String,
    },

    /// Render a workflow to another representation
    Export {
        /// Path to workflow snapshot (.json)
        file: String,

        #[arg(short, long, value_enum, default_value_t = ExportFormat::Mermaid)]
        format: ExportFormat,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Mermaid,
    Compact,
    Json,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { file, domain, workdir, concurrency, catalog } => {
            run_workflow(&file, &domain, workdir, concurrency, catalog.as_deref()).await
        }
        Commands::Validate { file } => validate_workflow(&file),
        Commands::Plan { file } => plan_workflow(&file),
        Commands::Export { file, format, output } => export_workflow(&file, format, output),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn load_workflow(file: &str) -> Result<Dag, SpectraError> {
    let dag = snapshot::load_file(file)?;
    dag.validate()?;
    Ok(dag)
}

async fn run_workflow(
    file: &str,
    domain: &str,
    workdir: PathBuf,
    concurrency: usize,
    catalog_file: Option<&str>,
) -> Result<(), SpectraError> {
    let dag = load_workflow(file)?;
    let stages = spectra::stage::stages_from_graph(&dag);
    if stages.is_empty() {
        println!("{} workflow has no tools to run", "→".cyan());
        return Ok(());
    }

    let mut catalog = ToolCatalog::builtin();
    if let Some(path) = catalog_file {
        let yaml = std::fs::read_to_string(path)?;
        let added = catalog.load_yaml(&yaml)?;
        println!("{} loaded {added} catalog entries from {path}", "→".cyan());
    }

    println!(
        "{} Running {} stage(s) against {} (concurrency {})",
        "→".cyan(),
        stages.len(),
        domain.cyan().bold(),
        concurrency
    );

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} interrupt received, stopping run", "!".yellow().bold());
            ctrl_c_cancel.cancel();
        }
    });

    let (tx, mut rx) = events::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.kind {
                ToolEventKind::Start => {
                    println!("  {} {} [{}]", "→".cyan(), event.tool, event.stage);
                }
                ToolEventKind::Finish => {
                    println!("  {} {}", "✓".green(), event.tool);
                }
                ToolEventKind::Error => {
                    println!(
                        "  {} {}: {}",
                        "✗".red(),
                        event.tool,
                        event.error.as_deref().unwrap_or("failed")
                    );
                }
            }
        }
    });

    let engine = Engine::new(
        EngineConfig::new(workdir).with_concurrency(concurrency),
        catalog,
    );
    let summary = engine.run(domain, &stages, tx, cancel).await?;
    let _ = printer.await;

    let stats = &summary.statistics;
    println!(
        "\n{} {} completed, {} failed, {} unique results in {}ms",
        "Done:".green().bold(),
        stats.completed_nodes,
        stats.failed_nodes,
        stats.unique_results,
        stats.execution_time_ms
    );
    if let Some(report) = &summary.report {
        println!("  Report: {}", report.display());
    }
    Ok(())
}

fn validate_workflow(file: &str) -> Result<(), SpectraError> {
    let dag = load_workflow(file)?;
    let stages = spectra::stage::stages_from_graph(&dag);
    println!(
        "{} {} is valid: {} node(s), {} layer(s), {} subgraph(s), {} stage(s)",
        "✓".green().bold(),
        file,
        dag.node_count(),
        dag.max_x(),
        dag.subgraphs().len(),
        stages.len()
    );
    Ok(())
}

fn plan_workflow(file: &str) -> Result<(), SpectraError> {
    let dag = load_workflow(file)?;
    print!("{}", render::to_execution_plan(&dag));
    Ok(())
}

fn export_workflow(
    file: &str,
    format: ExportFormat,
    output: Option<PathBuf>,
) -> Result<(), SpectraError> {
    let dag = load_workflow(file)?;
    let rendered = match format {
        ExportFormat::Mermaid => render::to_mermaid(&dag),
        ExportFormat::Compact => render::to_compact_mermaid(&dag),
        ExportFormat::Json => snapshot::export(&dag)?,
    };
    match output {
        Some(path) => std::fs::write(path, rendered)?,
        None => print!("{rendered}"),
    }
    Ok(())
}
