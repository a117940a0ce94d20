use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};
use serde::{Deserialize, Serialize};

use timvx_core::{ParamBag, TensorDesc};
use timvx_kernel::{
    ConstantTable, DispatchConfig, Graph, KernelRegistry, KernelType, TensorId, WorkPartition,
};

/// timvx — plan and run TIM-VX kernel nodes
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Job file (JSON) describing one operator call
    #[arg(required_unless_present = "list")]
    job: Option<PathBuf>,

    /// List registered operators and their backends
    #[arg(long)]
    list: bool,

    /// Dispatch configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Plan the node without executing it
    #[arg(long)]
    dry_run: bool,

    /// Log dispatch decisions to stderr
    #[arg(short, long)]
    verbose: bool,
}

/// One operator call.
#[derive(Debug, Deserialize)]
struct Job {
    operator: String,
    #[serde(default)]
    params: ParamBag,
    inputs: Vec<JobInput>,
    outputs: Vec<TensorDesc>,
}

#[derive(Debug, Deserialize)]
struct JobInput {
    #[serde(flatten)]
    desc: TensorDesc,
    /// Real values; omitted inputs are zero-filled.
    #[serde(default)]
    data: Option<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct NodeReport<'a> {
    kernel_type: KernelType,
    kernel: &'a str,
    partition: &'a WorkPartition,
    constants: &'a ConstantTable,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    operator: &'a str,
    nodes: Vec<NodeReport<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outputs: Option<Vec<Vec<f32>>>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match &cli.config {
        Some(path) => DispatchConfig::load(path)
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err("invalid dispatch configuration")?,
        None => DispatchConfig::default(),
    };
    log::info!("dispatch config: {config}");

    let mut registry = KernelRegistry::with_config(config);
    timvx_cpu::register_all(&mut registry).map_err(|e| miette::miette!("{e}"))?;
    timvx_gpu::register_all(&mut registry).map_err(|e| miette::miette!("{e}"))?;

    if cli.list {
        print_registry(&registry);
        return Ok(());
    }
    let Some(path) = &cli.job else {
        return Err(miette::miette!("no job file given"));
    };
    let job = read_job(path)?;

    let mut graph = Graph::new();
    let inputs = job
        .inputs
        .into_iter()
        .enumerate()
        .map(|(i, input)| {
            match &input.data {
                Some(values) => graph.add_tensor_from_f32(input.desc, values),
                None => graph.add_tensor(input.desc),
            }
            .map(Some)
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err_with(|| format!("input {i}"))
        })
        .collect::<miette::Result<Vec<Option<TensorId>>>>()?;
    let outputs = job
        .outputs
        .into_iter()
        .enumerate()
        .map(|(i, desc)| {
            graph
                .add_tensor(desc)
                .map(Some)
                .map_err(|e| miette::miette!("{e}"))
                .wrap_err_with(|| format!("output {i}"))
        })
        .collect::<miette::Result<Vec<Option<TensorId>>>>()?;

    let Some(node) = registry.create_node(&mut graph, &job.operator, &inputs, &outputs, &job.params)
    else {
        return Err(miette::miette!(
            "no kernel accepts {} for these tensors",
            job.operator
        ));
    };
    log::info!(
        "{} planned as {} node(s), last {node:?}",
        job.operator,
        graph.node_count()
    );

    let executable = graph.nodes().all(|(_, n)| n.kernel.is_executable());
    let results = if cli.dry_run {
        None
    } else if !executable {
        log::info!("{} has no host executor; skipping execution", job.operator);
        None
    } else {
        graph
            .run()
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err("execution failed")?;
        Some(
            outputs
                .iter()
                .flatten()
                .map(|&id| graph.read_f32(id))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| miette::miette!("{e}"))?,
        )
    };

    let report = Report {
        operator: &job.operator,
        nodes: graph
            .nodes()
            .map(|(_, n)| NodeReport {
                kernel_type: n.kernel_type,
                kernel: &n.kernel.name,
                partition: &n.partition,
                constants: &n.constants,
            })
            .collect(),
        outputs: results,
    };
    let text = serde_json::to_string_pretty(&report).into_diagnostic()?;
    println!("{text}");
    Ok(())
}

fn read_job(path: &Path) -> miette::Result<Job> {
    let text = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    parse_job(&text).wrap_err_with(|| format!("invalid job file {}", path.display()))
}

fn parse_job(text: &str) -> miette::Result<Job> {
    serde_json::from_str(text).into_diagnostic()
}

fn print_registry(registry: &KernelRegistry) {
    for op in registry.operators() {
        let backends: Vec<String> = registry
            .backends_for(op)
            .iter()
            .map(|(kernel_type, variants)| format!("{kernel_type}({variants})"))
            .collect();
        println!("{op:<24} {}", backends.join(" "));
    }
}
