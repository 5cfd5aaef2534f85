//! rivulet CLI: run, validate and describe record graphs.

mod graph;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use rivulet_core::config::EngineConfig;
use rivulet_exec::{NodeStatus, Pipeline};
use tracing_subscriber::EnvFilter;

use crate::graph::GraphDoc;

#[derive(Parser)]
#[command(name = "rivulet")]
#[command(about = "Bounded-memory streaming joins, grouping and sorting over record graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph from a YAML file
    Run {
        /// Path to the graph YAML file
        #[arg(short, long)]
        graph: PathBuf,

        #[command(flatten)]
        overrides: Overrides,

        /// Write the run report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Check a graph: wiring, schemas and every node's configuration
    Validate {
        /// Path to the graph YAML file
        #[arg(short, long)]
        graph: PathBuf,
    },

    /// Show a graph's nodes and edges, or the known component types
    Describe {
        /// Path to the graph YAML file
        #[arg(short, long)]
        graph: Option<PathBuf>,
    },
}

/// Engine settings from the command line; they win over the graph file,
/// which wins over `RIVULET_*` environment variables.
#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// Memory cap in bytes
    #[arg(long)]
    memory_cap: Option<usize>,

    /// Spill directory (repeat for several)
    #[arg(long = "temp-dir")]
    temp_dirs: Vec<String>,

    /// Records buffered per port
    #[arg(long)]
    port_capacity: Option<usize>,

    /// Spill segment codec: none, zstd or lz4
    #[arg(long)]
    spill_codec: Option<String>,
}

impl Overrides {
    fn apply(&self, cfg: &mut EngineConfig) {
        if let Some(cap) = self.memory_cap {
            cfg.mem_cap_bytes = cap;
        }
        if !self.temp_dirs.is_empty() {
            cfg.temp_dirs = self.temp_dirs.clone();
        }
        if let Some(cap) = self.port_capacity {
            cfg.port_capacity = cap;
        }
        if let Some(codec) = &self.spill_codec {
            cfg.spill_codec = codec.to_ascii_lowercase();
        }
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            graph,
            overrides,
            report,
        } => run_graph(&graph, &overrides, report.as_deref()),
        Commands::Validate { graph } => validate_graph(&graph),
        Commands::Describe { graph } => describe(graph.as_deref()),
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_config(doc: &GraphDoc, overrides: &Overrides) -> EngineConfig {
    let mut cfg = EngineConfig::from_env();
    doc.config.apply(&mut cfg);
    overrides.apply(&mut cfg);
    cfg
}

fn run_graph(
    path: &Path,
    overrides: &Overrides,
    report_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let doc = GraphDoc::load(path)?;
    let config = resolve_config(&doc, overrides);
    tracing::debug!(?config, "engine config resolved");

    let report = doc.build(config)?.run_to_report()?;
    if let Some(out) = report_path {
        fs::write(out, serde_json::to_string_pretty(&report)?)?;
    }

    for node in &report.nodes {
        println!(
            "  {:<20} {:<20} {:?} in={:?} out={:?} spilled={}B {}ms",
            node.name,
            node.component_type,
            node.status,
            node.records_in,
            node.records_out,
            node.spilled_bytes,
            node.elapsed_ms
        );
    }
    match report.status() {
        NodeStatus::Finished => {
            println!("✓ Graph executed successfully");
            println!("  Duration: {}ms", report.finished_ms.saturating_sub(report.started_ms));
            println!("  Peak memory: {} bytes", report.peak_mem_bytes);
            println!("  Config hash: {}", report.config_hash);
            Ok(())
        }
        status => {
            let detail = report
                .nodes
                .iter()
                .find_map(|n| n.error.as_ref().map(|e| format!("node '{}': {e}", n.name)))
                .unwrap_or_else(|| "run was cancelled".into());
            Err(format!("graph {status:?}: {detail}").into())
        }
    }
}

fn validate_graph(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let doc = GraphDoc::load(path)?;
    let config = resolve_config(&doc, &Overrides::default());
    doc.build(config)?.check()?;
    println!("✓ Graph is valid");
    Ok(())
}

fn describe(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = path else {
        println!("Component types:");
        for ty in Pipeline::new(EngineConfig::default()).registry().component_types() {
            println!("  {ty}");
        }
        return Ok(());
    };

    let doc = GraphDoc::load(path)?;
    let config = resolve_config(&doc, &Overrides::default());
    let pipeline = doc.build(config.clone())?;

    println!("Graph {}", path.display());
    println!("==========");
    println!(
        "Memory Cap: {} bytes ({:.2} MB)",
        config.mem_cap_bytes,
        config.mem_cap_bytes as f64 / 1_048_576.0
    );
    println!("Temp dirs: {}", config.temp_dirs.join(", "));
    println!("Config hash: {}", pipeline.config_hash()?);
    println!();
    println!("Nodes:");
    for node in &doc.nodes {
        println!(
            "  {} ({}) inputs={:?} outputs={:?}",
            node.name, node.component_type, node.inputs, node.outputs
        );
    }
    println!();
    println!("Edges:");
    for edge in &doc.edges {
        println!("  {} -> {}", edge.from, edge.to);
    }
    Ok(())
}
