mod store;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::JsonFileStateRepository;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use wfcore::{FlowRecord, NodeRecord, ProcessDefinition, ResumeSignal};
use wfruntime::{
    ContextBuilder, FlowRuntime, InMemoryTriggerRegistrar, RuntimeConfig, StartOptions,
    TurnReport,
};

#[derive(Parser)]
#[command(name = "wf")]
#[command(about = "Workflow engine CLI", long_about = None)]
struct Cli {
    /// Directory holding definitions and instance state
    #[arg(long, global = true, default_value = ".wf")]
    state_dir: PathBuf,

    /// Runtime configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a definition file
    Validate {
        /// Path to definition JSON file
        file: PathBuf,
    },

    /// List available node and flow types
    Nodes,

    /// Write an example definition
    Init {
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },

    /// Start an instance of a definition
    Start {
        /// Path to definition JSON file
        file: PathBuf,

        /// Input data as JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Business key usable instead of the workflow id
        #[arg(short, long)]
        correlation: Option<String>,
    },

    /// Resume a halted node
    Resume {
        /// Workflow id or correlation id
        key: String,

        /// Node to resume
        node: String,

        /// Outcome reported by the completed work (repeatable)
        #[arg(short, long)]
        outcome: Vec<String>,

        /// Output values as JSON object
        #[arg(long)]
        output: Option<String>,

        #[arg(short, long)]
        user: Option<String>,

        /// Report the work as failed with this message
        #[arg(long)]
        fault: Option<String>,
    },

    /// Run the steps an interrupted turn left pending
    Continue {
        /// Workflow id or correlation id
        key: String,
    },

    /// Print the stored state of an instance
    Show {
        /// Workflow id or correlation id
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Validate { file } => validate(file)?,
        Commands::Nodes => list_nodes(),
        Commands::Init { output } => create_example(output)?,
        Commands::Start {
            file,
            input,
            correlation,
        } => {
            let definition = read_definition(&file)?;
            let mut options = StartOptions::new();
            options.input = parse_object(input.as_deref())?;
            options.correlation_id = correlation;

            let (runtime, repository, triggers) = open_runtime(&cli.state_dir, config).await?;
            runtime.register_definition(definition.clone()).await?;
            repository.store_definition(&definition).await?;

            let report = runtime.start_workflow(&definition.id, options).await?;
            print_report(&report, &triggers).await;
        }
        Commands::Resume {
            key,
            node,
            outcome,
            output,
            user,
            fault,
        } => {
            let signal = ResumeSignal {
                outcomes: outcome,
                output: parse_object(output.as_deref())?,
                user,
                fault,
            };
            let (runtime, _, triggers) = open_runtime(&cli.state_dir, config).await?;
            let report = runtime.resume(&key, &node, signal).await?;
            print_report(&report, &triggers).await;
        }
        Commands::Continue { key } => {
            let (runtime, _, triggers) = open_runtime(&cli.state_dir, config).await?;
            let report = runtime
                .continue_workflow(&key, &CancellationToken::new())
                .await?;
            print_report(&report, &triggers).await;
        }
        Commands::Show { key } => {
            let (runtime, _, _) = open_runtime(&cli.state_dir, config).await?;
            let state = runtime
                .state(&key)
                .await?
                .ok_or_else(|| anyhow!("no workflow found for '{}'", key))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Ok(serde_json::from_str(&json)?)
        }
        None => Ok(RuntimeConfig::default()),
    }
}

async fn open_runtime(
    state_dir: &Path,
    config: RuntimeConfig,
) -> Result<(FlowRuntime, Arc<JsonFileStateRepository>, Arc<InMemoryTriggerRegistrar>)> {
    let repository = Arc::new(JsonFileStateRepository::new(state_dir));
    let triggers = Arc::new(InMemoryTriggerRegistrar::new());
    let runtime = FlowRuntime::new(
        Arc::new(wfnodes::standard_registry()),
        repository.clone(),
        triggers.clone(),
        config,
    );
    for definition in repository.load_definitions().await? {
        runtime.register_definition(definition).await?;
    }
    Ok((runtime, repository, triggers))
}

fn read_definition(file: &PathBuf) -> Result<ProcessDefinition> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading definition {}", file.display()))?;
    Ok(serde_json::from_str(&json)?)
}

fn parse_object(input: Option<&str>) -> Result<HashMap<String, serde_json::Value>> {
    let Some(input) = input else {
        return Ok(HashMap::new());
    };
    match serde_json::from_str::<serde_json::Value>(input)? {
        serde_json::Value::Object(obj) => Ok(obj.into_iter().collect()),
        _ => Err(anyhow!("Input must be a JSON object")),
    }
}

async fn print_report(report: &TurnReport, triggers: &InMemoryTriggerRegistrar) {
    if let Some(reason) = &report.skipped {
        println!("Nothing to do: {}", reason);
        return;
    }
    println!("Workflow: {}", report.workflow_id);
    println!("Status:   {}", report.status);
    if let Some(message) = &report.state.workflow.fault_message {
        println!("Fault:    {}", message);
    }
    if report.interrupted {
        println!("Turn was interrupted");
    }
    if !report.pending.is_empty() {
        println!("Pending:  {} (run `wf continue`)", report.pending.join(", "));
    }
    if !report.blocking_nodes.is_empty() {
        println!("Waiting:  {}", report.blocking_nodes.join(", "));
    }
    for request in triggers.requests().await {
        println!("Armed {:?} wait on {}", request.kind, request.node_id);
    }
    for event in &report.events {
        println!("  {}", event.event_type());
    }
    if !report.state.output.is_empty() {
        println!("Output:");
        for (key, value) in &report.state.output {
            println!("  {}: {}", key, value);
        }
    }
}

fn validate(file: PathBuf) -> Result<()> {
    let definition = read_definition(&file)?;
    let builder = ContextBuilder::new(Arc::new(wfnodes::standard_registry()));
    let graph = builder.build(&definition)?;

    println!("Definition is valid:");
    println!("   Id:    {}", graph.definition_id());
    println!("   Nodes: {}", graph.nodes().len());
    println!("   Flows: {}", graph.flows().len());
    Ok(())
}

fn list_nodes() {
    let registry = wfnodes::standard_registry();

    println!("Node types:");
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  {}", node_type);
        }
    }
    println!("Flow types:");
    for flow_type in registry.list_flow_types() {
        println!("  {}", flow_type);
    }
}

fn create_example(output: PathBuf) -> Result<()> {
    let mut definition = ProcessDefinition::new("order-approval").with_name("Order approval");
    definition.add_node(NodeRecord::new("start", "startEvent"));
    definition.add_node(NodeRecord::new("review", "userTask").with_name("Review order"));
    definition.add_node(NodeRecord::new("decide", "exclusiveGateway"));
    definition.add_node(NodeRecord::new("ship", "serviceTask").with_name("Ship order"));
    definition.add_node(NodeRecord::new("approved", "endEvent"));
    definition.add_node(NodeRecord::new("rejected", "endEvent"));

    definition.connect("f1", "start", "review");
    definition.connect("f2", "review", "decide");
    definition.add_flow(FlowRecord::new("f3", "decide", "ship").with_condition("Approve"));
    definition.add_flow(FlowRecord::new("f4", "decide", "rejected").as_default());
    definition.connect("f5", "ship", "approved");

    std::fs::write(&output, serde_json::to_string_pretty(&definition)?)?;

    println!("Created example definition: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  wf start {} --correlation order-1", output.display());
    println!("  wf resume order-1 review --outcome Approve");
    Ok(())
}
