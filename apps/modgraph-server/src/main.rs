use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use modgraph::{
    AppOptions, Application, ConfigProvider, ExportItem, ModuleDef, ModuleRef, RunOptions, ShutdownOptions,
    TimeoutInterceptor, HTTP_INTERCEPTORS,
};
use modgraph_bootstrap::{AppConfig, AppConfigProvider, CliArgs};

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod health;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// modgraph server - modular HTTP application runtime
#[derive(Parser)]
#[command(name = "modgraph-server")]
#[command(about = "modgraph server - modular HTTP application runtime")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and the module graph, then exit
    Check,
    /// Print the compiled route table and exit
    Routes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);
    config.validate()?;

    let logging_config = config.logging.as_ref().cloned().unwrap_or_default();
    modgraph_bootstrap::init_logging(&logging_config, Path::new(&config.server.home_dir));

    tracing::info!("modgraph server starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config).await,
        Commands::Routes => print_routes(config).await,
    }
}

/// The application root: built-in modules plus the request timeout, which
/// the root exports so every module picks it up.
fn app_module(config: &AppConfig) -> ModuleRef {
    let mut root = ModuleDef::root("app").import(health::module());
    if config.server.timeout_sec > 0 {
        root = root
            .providers_per_req([TimeoutInterceptor::provider(Duration::from_secs(config.server.timeout_sec))])
            .export(ExportItem::from(HTTP_INTERCEPTORS.token()));
    }
    root.build()
}

fn app_options(config: &AppConfig) -> AppOptions {
    let provider: Arc<dyn ConfigProvider> = Arc::new(AppConfigProvider::new(config.clone()));
    AppOptions::from_app_config(config, provider)
}

fn bind_addr(config: &AppConfig) -> Result<SocketAddr> {
    let raw = format!("{}:{}", config.server.host, config.server.port);
    raw.parse()
        .with_context(|| format!("invalid bind address '{raw}'"))
}

async fn run_server(config: AppConfig) -> Result<()> {
    tracing::info!("Initializing modules…");

    let run_options = RunOptions {
        root: app_module(&config),
        app: app_options(&config),
        addr: bind_addr(&config)?,
        shutdown: ShutdownOptions::Signals,
    };

    modgraph::run(run_options).await
}

async fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    bind_addr(&config)?;
    let app = Application::bootstrap(&app_module(&config), app_options(&config)).await?;
    println!("Configuration is valid ({} routes)", app.routes().len());
    println!("{}", config.to_yaml()?);
    Ok(())
}

async fn print_routes(config: AppConfig) -> Result<()> {
    let app = Application::bootstrap(&app_module(&config), app_options(&config)).await?;
    for route in app.routes() {
        println!("{:<7} {:<40} {} ({})", route.method, route.path, route.handler, route.module);
    }
    Ok(())
}
