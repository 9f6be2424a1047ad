use clap::{Args, Parser, Subcommand};
use std::{env, fs, path::PathBuf, process};
use tracing::{error, info};
use anyhow::bail;
use workbench::{
    apps::{cmd_init, App},
    chain_commands::{dispatch_chain_file, validate_chain_file},
    config::{ConfigManager, EnvConfigManager},
    logger::init_tracing,
    schema::write_schema,
};

#[derive(Parser, Debug)]
#[command(
    name = "workbench",
    about = "A plugin-composed application shell",
    version = "0.2.0"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the shell
    Run(RunArgs),

    /// Emit JSON-Schema
    Schema(SchemaArgs),

    /// Initialize a fresh layout
    Init,

    /// Manage intent chains
    Chain(ChainArgs),
}

#[derive(Args, Debug)]
struct ChainArgs {
    #[command(subcommand)]
    command: ChainCommands,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

/// Emit JSON-Schema for chains, reports and plugins into `<root>/schemas`
#[derive(Args, Debug)]
struct SchemaArgs {
    /// Write somewhere other than `<root>/schemas`
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum ChainCommands {
    Validate { file: PathBuf },
    Dispatch { file: PathBuf },
}

/// Resolve the workbench root directory from the environment or use default.
pub fn resolve_root_dir() -> PathBuf {
    if let Ok(path) = env::var("WORKBENCH_ROOT") {
        PathBuf::from(path)
    } else {
        PathBuf::from("./workbench")
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run(RunArgs { log_level: None })) {
        Commands::Run(args) => {
            let root = resolve_root_dir();
            run(root, args.log_level).await?;
            Ok(())
        }
        Commands::Schema(args) => {
            let root = resolve_root_dir();
            let out_dir = args.out.unwrap_or_else(|| root.join("schemas"));

            fs::create_dir_all(&out_dir)?;
            write_schema(out_dir.clone()).await?;
            println!("Schemas written to {}", out_dir.display());
            process::exit(0);
        }
        Commands::Init => {
            let root = resolve_root_dir();
            cmd_init(root.clone())?;
            println!("Initialized workbench layout at {}", root.display());
            process::exit(0);
        }
        Commands::Chain(chain_args) => match chain_args.command {
            ChainCommands::Validate { file } => {
                validate_chain_file(file)?;
                Ok(())
            }
            ChainCommands::Dispatch { file } => {
                let root = resolve_root_dir();
                let env_file = root.join("config").join(".env");
                let config_mgr = ConfigManager(EnvConfigManager::new(env_file));
                dispatch_chain_file(file, config_mgr).await?;
                Ok(())
            }
        },
    }
}

async fn run(root: PathBuf, log_level: Option<String>) -> anyhow::Result<()> {
    if !root.exists() {
        bail!(
            "Root directory `{}` does not exist. \
                Please run `workbench init` first.",
            root.display()
        );
    }

    let config_dir = root.join("config");
    let log_file = "logs/workbench_logs.log".to_string();
    let event_file = "logs/workbench_events.log".to_string();
    fs::create_dir_all(root.join("logs"))?;

    // config first so the .env can supply the log level
    let env_file = config_dir.join(".env");
    let config_mgr = ConfigManager(EnvConfigManager::new(env_file));
    let log_level = match log_level {
        Some(level) => level,
        None => config_mgr.log_level().await,
    };

    init_tracing(root.clone(), log_file, event_file, log_level)?;

    info!("Workbench shell starting up…");
    println!("Workbench shell starting up…");

    // bootstrap
    let mut app = App::new(config_mgr);
    let result = app.bootstrap(Vec::new()).await;
    if let Err(err) = result {
        error!("Failed to bootstrap the workbench shell: {err:#}");
        process::exit(1);
    }

    info!("Workbench shell running; press Ctrl-C to exit");
    println!("Workbench shell running; press Ctrl-C to exit");

    // wait for CTRL-C
    tokio::signal::ctrl_c().await?;

    println!("\nShutting down…");
    info!("Workbench shell shutting down");

    app.shutdown().await;

    println!("Goodbye!");

    process::exit(0);
}
