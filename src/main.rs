use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use lathe::config;
use lathe::error::Result;
use lathe::module::ModuleType;
use lathe::plugin::{HookStageDispatcher, PluginRegistry};
use lathe::state::AppState;
use lathe::virtualmod::{self, VirtualModuleRegistry};
use lathe::web;

#[derive(Parser, Debug)]
#[command(name = "lathe")]
#[command(about = "Plugin pipeline host and MCP dev-server bridge for the Lathe bundler", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (TOML/JSON/YAML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the dev-server bridge (default)
    Run,
    /// Load and validate the configuration, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("lathe={log_level}").parse().expect("static directive")),
        )
        .init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            config::load_from_path(path)?
        }
        None => config::load_from_env_or_file()?,
    };

    if matches!(args.command, Some(Command::Check)) {
        info!("Configuration OK");
        println!("configuration OK");
        return Ok(());
    }

    // Config-time virtual modules.
    let virtuals = Arc::new(VirtualModuleRegistry::new());
    for def in &config.virtual_modules {
        let id = virtualmod::encode(&def.namespace, &def.name);
        let module_type: ModuleType = def
            .module_type
            .parse()
            .map_err(lathe::error::PipelineError::Filter)?;
        virtuals.define(id, def.content.clone(), module_type);
    }

    // The binary hosts an empty plugin set; embedding builds register
    // their own plugins through the library API.
    let registry = Arc::new(PluginRegistry::new(Vec::new())?);
    let dispatcher = Arc::new(HookStageDispatcher::new(registry, virtuals));

    let (state, _shutdown_rx) = AppState::new(config, dispatcher);

    let server_state = state.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = web::start_server(server_state).await {
            error!("bridge server error: {e}");
        }
    });

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    state.shutdown().await;
    let _ = server.await;

    Ok(())
}
