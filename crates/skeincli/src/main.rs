use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use skeincore::{
    Config, ExecutionEvent, ExecutionStatus, InputData, Node, NodeData, OutputData, Provider,
    SkeinError, TransformData, Value, Workflow,
};
use skeinllm::ModelGateway;
use skeinruntime::{generate_workflow, validate, Engine};
use skeinstore::{SqliteStore, Template, WorkflowPatch};
use std::path::PathBuf;
use std::sync::Arc;

const EXIT_USER_ERROR: i32 = 1;
const EXIT_EXECUTION_FAILURE: i32 = 2;

#[derive(Parser)]
#[command(name = "skein")]
#[command(about = "Skein workflow engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        workflow_file: PathBuf,

        /// Input data as a JSON value
        #[arg(long, conflicts_with = "input_file")]
        input: Option<String>,

        /// Read input data from a JSON file
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Write the terminal output to this path
        #[arg(long)]
        output: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate a workflow from a natural-language prompt
    Generate {
        /// What the workflow should do
        prompt: String,

        /// Provider to generate with (openai | anthropic | groq | ollama)
        #[arg(long)]
        provider: Option<Provider>,

        /// Write the workflow document to this path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List available tools
    Tools,

    /// Inspect or edit the configuration
    Config {
        /// Set a configuration key (k=v)
        #[arg(long)]
        set: Option<String>,

        /// Print a configuration key
        #[arg(long)]
        get: Option<String>,

        /// Store a provider API key (provider=key)
        #[arg(long)]
        api_key: Option<String>,

        /// Print the whole configuration
        #[arg(long)]
        show: bool,
    },

    /// Create the data directory and a starter workflow
    Init {
        /// Output file path for the starter workflow
        #[arg(long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            classify_exit(&e)
        }
    };
    std::process::exit(exit_code);
}

/// User mistakes exit 1; runtime failures exit 2.
fn classify_exit(error: &anyhow::Error) -> i32 {
    if let Some(skein) = error.downcast_ref::<SkeinError>() {
        return match skein {
            SkeinError::Validation(_)
            | SkeinError::UnknownWorkflow(_)
            | SkeinError::UnknownExecution(_)
            | SkeinError::Io(_)
            | SkeinError::Serialization(_) => EXIT_USER_ERROR,
            _ => EXIT_EXECUTION_FAILURE,
        };
    }
    if error.downcast_ref::<std::io::Error>().is_some()
        || error.downcast_ref::<serde_json::Error>().is_some()
    {
        return EXIT_USER_ERROR;
    }
    EXIT_EXECUTION_FAILURE
}

async fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            workflow_file,
            input,
            input_file,
            output,
            verbose,
        } => run(workflow_file, input, input_file, output, verbose).await,
        Commands::Generate {
            prompt,
            provider,
            output,
        } => generate(prompt, provider, output).await,
        Commands::Tools => {
            list_tools();
            Ok(0)
        }
        Commands::Config {
            set,
            get,
            api_key,
            show,
        } => config_command(set, get, api_key, show),
        Commands::Init { output } => init(output).await,
    }
}

fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".skein")
}

fn init_tracing(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .try_init();
}

async fn build_engine(config: Config) -> Result<Engine> {
    let dir = data_dir();
    std::fs::create_dir_all(&dir).context("creating data directory")?;
    let store = Arc::new(SqliteStore::new(dir.join("skein.db")).map_err(SkeinError::from)?);
    let config = Arc::new(config);
    let tools = Arc::new(skeintools::builtin_registry(
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    ));
    let gateway = Arc::new(ModelGateway::new(config.clone()));
    Ok(Engine::new(store, tools, gateway, config).await?)
}

async fn run(
    workflow_file: PathBuf,
    input: Option<String>,
    input_file: Option<PathBuf>,
    output: Option<PathBuf>,
    verbose: bool,
) -> Result<i32> {
    let config = Config::discover().context("loading configuration")?;
    init_tracing(&config, verbose);

    let document = std::fs::read_to_string(&workflow_file)
        .with_context(|| format!("reading {}", workflow_file.display()))?;
    let workflow: Workflow =
        serde_json::from_str(&document).context("parsing workflow document")?;
    validate(&workflow).map_err(SkeinError::from)?;

    let input_value = match (input, input_file) {
        (Some(text), _) => parse_input(&text)?,
        (None, Some(path)) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            parse_input(&text)?
        }
        (None, None) => Value::Null,
    };

    println!("🚀 Workflow: {} ({} nodes, {} edges)", workflow.name, workflow.nodes.len(), workflow.edges.len());

    let engine = build_engine(config).await?;
    upsert_workflow(engine.store(), &workflow).await?;

    // Stream events while the execution runs.
    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
            if event.is_terminal() {
                break;
            }
        }
    });

    let started = engine.execute_workflow(&workflow.id, input_value).await?;
    let terminal = engine.wait_for_terminal(&started.id).await?;
    let _ = printer.await;

    println!();
    println!("📊 Execution {}", terminal.id);
    println!("   Status: {}", terminal.status);

    if let Some(value) = &terminal.output {
        if let Some(path) = output {
            std::fs::write(&path, serde_json::to_string_pretty(&value.to_json())?)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("   Output written to {}", path.display());
        } else {
            println!("   Output: {}", value);
        }
    }
    if let Some(error) = &terminal.error {
        println!("   Error: {}", error);
    }

    Ok(match terminal.status {
        ExecutionStatus::Completed => 0,
        _ => EXIT_EXECUTION_FAILURE,
    })
}

fn parse_input(text: &str) -> Result<Value> {
    let json: serde_json::Value =
        serde_json::from_str(text).context("input is not valid JSON")?;
    Ok(Value::from_json(json))
}

async fn upsert_workflow(store: &Arc<SqliteStore>, workflow: &Workflow) -> Result<()> {
    if store
        .get_workflow(&workflow.id)
        .await
        .map_err(SkeinError::from)?
        .is_some()
    {
        store
            .update_workflow(
                &workflow.id,
                WorkflowPatch {
                    name: Some(workflow.name.clone()),
                    description: Some(workflow.description.clone()),
                    nodes: Some(workflow.nodes.clone()),
                    edges: Some(workflow.edges.clone()),
                    variables: Some(workflow.variables.clone()),
                    metadata: Some(workflow.metadata.clone()),
                },
            )
            .await
            .map_err(SkeinError::from)?;
    } else {
        store
            .create_workflow(workflow)
            .await
            .map_err(SkeinError::from)?;
    }
    Ok(())
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::NodeStart { node_id, kind, .. } => {
            println!("  ⚡ {} ({})", node_id, kind);
        }
        ExecutionEvent::NodeComplete { node_id, .. } => {
            println!("  ✅ {}", node_id);
        }
        ExecutionEvent::NodeError { node_id, error, .. } => {
            println!("  ❌ {}: {}", node_id, error);
        }
        ExecutionEvent::ExecutionComplete { .. } => {
            println!("✨ Execution completed");
        }
        ExecutionEvent::ExecutionError { error, .. } => {
            println!("💥 Execution failed: {}", error);
        }
        ExecutionEvent::Log {
            level,
            node_id,
            message,
            ..
        } => match node_id {
            Some(node_id) => println!("     [{level}] [{node_id}] {message}"),
            None => println!("     [{level}] {message}"),
        },
    }
}

async fn generate(
    prompt: String,
    provider: Option<Provider>,
    output: Option<PathBuf>,
) -> Result<i32> {
    let config = Config::discover().context("loading configuration")?;
    init_tracing(&config, false);

    println!("🧠 Generating workflow…");
    let gateway = ModelGateway::new(Arc::new(config.clone()));
    let workflow = generate_workflow(&gateway, &config, &prompt, provider).await?;

    let document = serde_json::to_string_pretty(&workflow)?;
    match output {
        Some(path) => {
            std::fs::write(&path, document)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("✨ Wrote {} ({} nodes)", path.display(), workflow.nodes.len());
        }
        None => println!("{document}"),
    }
    Ok(0)
}

fn list_tools() {
    let registry = skeintools::builtin_registry(".");
    println!("📦 Available tools:");
    println!();
    for id in registry.list_ids() {
        if let Some(tool) = registry.get(&id) {
            println!("  • {} ({})", id, tool.category());
            println!("    {}", tool.description());
        }
    }
}

fn config_command(
    set: Option<String>,
    get: Option<String>,
    api_key: Option<String>,
    show: bool,
) -> Result<i32> {
    let path = Config::default_path();
    let mut config = Config::discover().context("loading configuration")?;
    let mut dirty = false;

    if let Some(assignment) = set {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("--set expects key=value"))?;
        apply_setting(&mut config, key, value)?;
        dirty = true;
    }

    if let Some(assignment) = api_key {
        let (provider, key) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("--api-key expects provider=key"))?;
        provider
            .parse::<Provider>()
            .map_err(|e| anyhow!(e))?;
        config.set_api_key(provider, key);
        dirty = true;
    }

    if dirty {
        config.save(&path).context("saving configuration")?;
        println!("✅ Saved {}", path.display());
    }

    if let Some(key) = get {
        println!("{}", read_setting(&config, &key)?);
    }

    if show {
        // Keys are printed, credentials are not.
        let mut redacted = config.clone();
        for provider in redacted.providers.values_mut() {
            if provider.api_key.is_some() {
                provider.api_key = Some("•••".to_string());
            }
        }
        println!("{}", serde_json::to_string_pretty(&redacted)?);
    }

    Ok(0)
}

fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "defaultProvider" => config.default_provider = value.to_string(),
        "defaultModel" => config.default_model = value.to_string(),
        "ollamaHost" => config.ollama_host = value.to_string(),
        "maxConcurrentExecutions" => {
            config.max_concurrent_executions = value.parse().context("expected a number")?
        }
        "maxRetries" => config.max_retries = value.parse().context("expected a number")?,
        "retryDelay" => config.retry_delay = value.parse().context("expected a number")?,
        "logLevel" => config.log_level = value.to_string(),
        other => return Err(anyhow!("unknown configuration key: {other}")),
    }
    Ok(())
}

fn read_setting(config: &Config, key: &str) -> Result<String> {
    Ok(match key {
        "defaultProvider" => config.default_provider.clone(),
        "defaultModel" => config.default_model.clone(),
        "ollamaHost" => config.ollama_host.clone(),
        "maxConcurrentExecutions" => config.max_concurrent_executions.to_string(),
        "maxRetries" => config.max_retries.to_string(),
        "retryDelay" => config.retry_delay.to_string(),
        "logLevel" => config.log_level.clone(),
        other => return Err(anyhow!("unknown configuration key: {other}")),
    })
}

fn starter_workflow() -> Workflow {
    let mut workflow = Workflow::new(uuid::Uuid::new_v4().to_string(), "Starter: double a number");
    workflow.description = Some("Reads a number, doubles it, and returns it.".to_string());
    workflow.add_node(
        Node::new("in", "Input", NodeData::Input(InputData::default())).with_position(80.0, 120.0),
    );
    workflow.add_node(
        Node::new(
            "double",
            "Double",
            NodeData::Transform(TransformData {
                transform: Some("input * 2".to_string()),
                extra: Default::default(),
            }),
        )
        .with_position(300.0, 120.0),
    );
    workflow.add_node(
        Node::new("out", "Output", NodeData::Output(OutputData::default()))
            .with_position(520.0, 120.0),
    );
    workflow.connect("in", "double");
    workflow.connect("double", "out");
    workflow
}

async fn init(output: PathBuf) -> Result<i32> {
    let dir = data_dir();
    std::fs::create_dir_all(&dir).context("creating data directory")?;

    let config_path = Config::default_path();
    if !config_path.exists() {
        Config::default()
            .save(&config_path)
            .context("writing default configuration")?;
        println!("✅ Wrote {}", config_path.display());
    }

    let workflow = starter_workflow();
    std::fs::write(&output, serde_json::to_string_pretty(&workflow)?)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("✨ Created starter workflow: {}", output.display());

    // Keep the starter in the template gallery too.
    let store = SqliteStore::new(dir.join("skein.db")).map_err(SkeinError::from)?;
    store
        .save_template(&Template {
            id: "starter-double".to_string(),
            name: "Double a number".to_string(),
            description: workflow.description.clone(),
            category: "starter".to_string(),
            workflow: workflow.clone(),
            created_at: chrono::Utc::now(),
        })
        .await
        .map_err(SkeinError::from)?;

    println!();
    println!("Run it with:");
    println!("  skein run {} --input 3", output.display());
    Ok(0)
}
