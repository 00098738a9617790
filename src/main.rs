use anyhow::{Context, Result};
use clap::Parser;
use mcp_gateway::config::{Config, EnvironmentOverrides};
use mcp_gateway::routing::{ExecuteOptions, McpRequestContext};
use mcp_gateway::startup::{self, GatewayRuntime, StartupLogger};
use mcp_gateway::{DEFAULT_CONFIG_FILE, VERSION};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
#[command(version)]
struct Cli {
    /// Configuration file path (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Serve newline-delimited gateway requests on stdin/stdout
    #[arg(long)]
    stdio: bool,

    /// Execute a single method through the gateway and exit
    #[arg(long)]
    call: Option<String>,

    /// JSON parameters for --call
    #[arg(long, default_value = "{}")]
    params: String,

    /// Print gateway statistics after startup
    #[arg(long)]
    stats: bool,
}

/// One line of stdio input
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StdioRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    context: Option<McpRequestContext>,
    #[serde(default)]
    options: ExecuteOptions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = EnvironmentOverrides::load()?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| overrides.get_config_path(Path::new(DEFAULT_CONFIG_FILE)));
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }

    startup::init_logging(&config.logging.level, &config.logging.format)?;
    startup::display_startup_banner(VERSION);
    StartupLogger::display_startup_info(&config, &config_path, VERSION);

    let runtime = Arc::new(GatewayRuntime::from_config(config));
    runtime.start().await?;

    if let Some(ref method) = cli.call {
        let result = run_single_call(&runtime, method, &cli.params, cli.stats).await;
        runtime.shutdown().await?;
        return result;
    }

    if cli.stats {
        print_stats(&runtime).await?;
    }

    if cli.stdio {
        info!("Serving gateway requests on stdio");
        tokio::select! {
            result = run_stdio_mode(runtime.clone()) => {
                if let Err(e) = result {
                    error!("stdio loop failed: {}", e);
                }
            }
            _ = shutdown_signal() => {}
        }
    } else {
        info!("Gateway running; press Ctrl+C to stop");
        shutdown_signal().await;
    }

    runtime.shutdown().await?;
    info!("MCP Gateway stopped");
    Ok(())
}

async fn run_single_call(runtime: &GatewayRuntime, method: &str, params: &str, stats: bool) -> Result<()> {
    let params: Value = serde_json::from_str(params).context("--params must be valid JSON")?;
    let response = runtime
        .gateway
        .execute(method, params, &McpRequestContext::trusted(), ExecuteOptions::default())
        .await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if stats {
        print_stats(runtime).await?;
    }
    if !response.success {
        warn!("Call to {} failed", method);
    }
    Ok(())
}

async fn print_stats(runtime: &GatewayRuntime) -> Result<()> {
    let stats = runtime.gateway.get_stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn run_stdio_mode(runtime: Arc<GatewayRuntime>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let runtime = runtime.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let reply = handle_stdio_line(&runtime, &line).await;
            let _ = tx.send(reply.to_string());
        });
    }

    drop(tx);
    let _ = writer.await;
    Ok(())
}

async fn handle_stdio_line(runtime: &GatewayRuntime, line: &str) -> Value {
    let request: StdioRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return json!({
                "id": null,
                "success": false,
                "error": { "code": "PARSE_ERROR", "message": format!("Invalid JSON: {}", e) }
            })
        }
    };

    let body = match request.method.as_str() {
        "gateway/stats" => json!({ "success": true, "data": runtime.gateway.get_stats().await }),
        "gateway/services" => json!({ "success": true, "data": runtime.gateway.get_available_services().await }),
        "gateway/dashboard" => match runtime.monitoring {
            Some(ref monitoring) => json!({ "success": true, "data": monitoring.get_dashboard().await }),
            None => json!({
                "success": false,
                "error": { "code": "MONITORING_DISABLED", "message": "Monitoring is disabled" }
            }),
        },
        method => {
            let context = request.context.unwrap_or_else(McpRequestContext::trusted);
            let response = runtime
                .gateway
                .execute(method, request.params, &context, request.options)
                .await;
            serde_json::to_value(&response).unwrap_or_else(|e| {
                json!({ "success": false, "error": { "code": "INTERNAL_ERROR", "message": e.to_string() } })
            })
        }
    };

    let mut reply = body;
    if let Some(object) = reply.as_object_mut() {
        object.insert("requestId".to_string(), request.id.unwrap_or(Value::Null));
    }
    reply
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
