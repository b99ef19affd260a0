use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use oneclick::config::{ControllerConfig, FileConfig, HttpConfig, ResourceIdentity};
use oneclick::job::JobRegistry;
use oneclick::shutdown::install_shutdown_handler;
use oneclick::transport::HttpTransport;
use oneclick::ResourceController;

#[derive(Parser, Debug)]
#[command(name = "oneclick")]
#[command(version)]
#[command(about = "Volunteer compute resource for a grid server")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the resource and process jobs from the server
    Run(RunArgs),

    /// List the job commands this resource can execute
    Jobs {
        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Base URL of the grid server
    #[arg(long)]
    server: String,

    /// Sandbox key identifying this resource
    #[arg(long, required_unless_present = "sandbox_key_file")]
    sandbox_key: Option<String>,

    /// Read the sandbox key from a file instead
    #[arg(long, conflicts_with = "sandbox_key")]
    sandbox_key_file: Option<PathBuf>,

    /// Unique resource name registered with the server
    #[arg(long, default_value = "")]
    resource_name: String,

    /// CPU time (seconds) offered per job
    #[arg(long, default_value = "3600")]
    cputime: u64,

    /// Execution environment tag sent with job requests
    #[arg(long, default_value = "oneclick")]
    exe: String,

    /// Process a single job and exit
    #[arg(long)]
    oneshot: bool,

    /// Interval between liveness checks of a running job (ms)
    #[arg(long, default_value = "60000")]
    liveness_interval_ms: u64,

    /// Interval at which a running directive is checked for withdrawal (ms)
    #[arg(long, default_value = "15000")]
    finish_check_interval_ms: u64,

    /// Timeout for a single HTTP request (ms); unbounded if omitted
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Initial block size of remote file transfers (bytes)
    #[arg(long, default_value = "2048")]
    initial_block_size: usize,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct JobListOutput {
    jobs: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => run_resource(run_args).await?,
        Commands::Jobs { output } => list_jobs(&output)?,
    }

    Ok(())
}

async fn run_resource(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let sandbox_key = match (args.sandbox_key, args.sandbox_key_file) {
        (Some(key), _) => key,
        (None, Some(path)) => tokio::fs::read_to_string(&path).await?.trim().to_string(),
        (None, None) => return Err("--sandbox-key or --sandbox-key-file is required".into()),
    };

    let identity = ResourceIdentity::new(args.server, sandbox_key)
        .with_resource_name(args.resource_name)
        .with_cputime(args.cputime);

    let config = ControllerConfig {
        oneshot: args.oneshot,
        exe: args.exe,
        liveness_interval_ms: args.liveness_interval_ms,
        finish_check_interval_ms: args.finish_check_interval_ms,
        ..ControllerConfig::default()
    };
    let file_config = FileConfig {
        initial_block_size: args.initial_block_size,
        ..FileConfig::default()
    };
    let http_config = HttpConfig {
        request_timeout_ms: args.request_timeout_ms,
        ..HttpConfig::default()
    };

    let transport = Arc::new(HttpTransport::new(&http_config)?);
    let registry = Arc::new(JobRegistry::with_builtins());
    let mut controller =
        ResourceController::new(identity, config, file_config, transport, registry)?;

    let alive = install_shutdown_handler()?;
    controller.run(alive).await;

    let status = controller.status();
    tracing::info!(
        jobs_done = status.jobs_done,
        jobs_failed = status.jobs_failed,
        message = %status.message,
        "Resource exited"
    );
    Ok(())
}

fn list_jobs(output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let registry = JobRegistry::with_builtins();
    let jobs: Vec<String> = registry.names().map(str::to_string).collect();

    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&JobListOutput { jobs })?);
        }
        OutputFormat::Table => {
            println!("{:<16} NOTES", "JOB");
            println!("{}", "-".repeat(40));
            println!("{:<16} handled by the executor", "sleep");
            for name in jobs {
                println!("{:<16}", name);
            }
        }
    }
    Ok(())
}
