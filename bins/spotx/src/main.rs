//! SpotX CLI and Server Binary
//!
//! Entry point for initializing, validating and starting the exchange.
//! `start` builds the worker runtime from the configuration, then runs the
//! matching engine, the order API and the distribution server until Ctrl+C
//! or SIGTERM.

use anyhow::{Context, Result};
use cli::{Cli, Commands, LogFormatArg};
use common::UserId;
use config::{generate_default_config, load_config, save_config, validate_config, MasterConfig};
use matching_engine::{EngineConfig, Exchange};
use observability::{init_logging, init_metrics, LogFormat};
use server::{validate_config_ports, CombinedServer, DistributionHub, Server, ServerConfig, ShutdownController};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Start { config, host, http, ws } => start_command(config, cli.log_format, host, http, ws),
        Commands::Validate { config } => {
            init_cli_logging(cli.log_format)?;
            validate_command(&config)
        }
        Commands::Init { output } => {
            init_cli_logging(cli.log_format)?;
            init_command(&output)
        }
        Commands::IssueToken { user, ttl_secs, config } => {
            init_cli_logging(cli.log_format)?;
            issue_token_command(&config, &user, ttl_secs)
        }
    }
}

fn log_format(configured: &str, flag: Option<LogFormatArg>) -> LogFormat {
    let name = flag.map(|f| f.as_str()).unwrap_or(configured);
    LogFormat::parse(name).unwrap_or_default()
}

fn init_cli_logging(flag: Option<LogFormatArg>) -> Result<()> {
    init_logging("spotx", "warn", log_format("compact", flag))
}

// ============================================================================
// start
// ============================================================================

fn start_command(
    config_path: PathBuf,
    log_format_flag: Option<LogFormatArg>,
    host: Option<String>,
    http: Option<u16>,
    ws: Option<u16>,
) -> Result<()> {
    let mut config = load_config(&config_path)?;
    init_logging(
        "spotx",
        &config.logging.level,
        log_format(&config.logging.format, log_format_flag),
    )?;

    let report = validate_config(&config);
    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }
    if !report.is_valid() {
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!("Cannot start exchange due to configuration errors");
    }

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = http {
        debug!(port, "HTTP port overridden");
        config.server.http_port = port;
    }
    if let Some(port) = ws {
        debug!(port, "WebSocket port overridden");
        config.server.ws_port = port;
    }

    // Worker threads come from the configuration, so the runtime is built by hand
    let threads = config.workers.thread_count();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name("spotx-worker")
        .enable_all()
        .build()
        .context("Failed to build the tokio runtime")?;

    info!(threads, "Runtime started");
    runtime.block_on(run_exchange(config))
}

async fn run_exchange(config: MasterConfig) -> Result<()> {
    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    let server_config = ServerConfig::from_listen(&config.server);
    validate_config_ports(&server_config)?;

    let exchange = Exchange::start(EngineConfig::from(&config))
        .await
        .context("Failed to start the matching engine")?;
    let hub = Arc::new(DistributionHub::new(
        Arc::clone(&exchange),
        config.distribution.clone(),
    ));
    let router = matching_engine::api::create_router(Arc::clone(&exchange));
    let server = CombinedServer::new(server_config, router, hub).with_name(config.exchange.name.clone());

    if let Err(e) = server.validate_ports().await {
        exchange.shutdown().await;
        return Err(e.into());
    }

    info!(
        exchange = %config.exchange.name,
        host = %config.server.host,
        http_port = config.server.http_port,
        ws_port = config.server.ws_port,
        pairs = config.pairs.len(),
        "Starting exchange"
    );

    let shutdown = ShutdownController::with_signals();
    let result = server.run(shutdown.token()).await;

    // Listeners are down; drain the engine so queued batches are committed
    exchange.shutdown().await;
    info!("Exchange stopped");
    result.map_err(Into::into)
}

// ============================================================================
// validate / init / issue-token
// ============================================================================

fn validate_command(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Exchange: {} {}", config.exchange.name, config.exchange.version);
    println!("Store: {}", config.store.store_type);
    println!(
        "Listeners: http {}:{}, ws {}:{}",
        config.server.host, config.server.http_port, config.server.host, config.server.ws_port
    );
    println!("Pairs:");
    for pair in &config.pairs {
        println!(
            "  {} (price {} dp, amount {} dp, min {}){}",
            pair.symbol,
            pair.price_decimals,
            pair.amount_decimals,
            pair.min_amount,
            if pair.enabled { "" } else { " [disabled]" }
        );
    }

    Ok(())
}

fn init_command(output_path: &Path) -> Result<()> {
    let config = generate_default_config();

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!("Pairs: {}", config.pairs.len());
    println!();
    println!("Next steps:");
    println!("  1. Set SPOTX_JWT_SECRET (and Redis settings if store.type is redis)");
    println!("  2. Run 'spotx validate --config {:?}' to check configuration", output_path);
    println!("  3. Run 'spotx start --config {:?}' to start the exchange", output_path);

    Ok(())
}

fn issue_token_command(config_path: &Path, user: &str, ttl_secs: u64) -> Result<()> {
    let config = load_config(config_path)?;
    let auth = &config.distribution.auth;
    if auth.jwt_secret.is_empty() {
        anyhow::bail!("distribution.auth.jwt_secret is not set");
    }

    let user_id = UserId::new(user)?;
    let token = server::distribution::issue_token(
        &auth.jwt_secret,
        &user_id,
        auth.issuer.as_deref(),
        Duration::from_secs(ttl_secs),
    )?;
    println!("{}", token);
    Ok(())
}
