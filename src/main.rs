//! MQTT Tools - Main Entry Point
//!
//! `serve` speaks JSON lines on stdin/stdout for a tool-invocation front-end;
//! `call` runs a single tool and prints its result.

use clap::{Parser, Subcommand};
use mqtt_tools::cache::TopicCache;
use mqtt_tools::config::ToolsConfig;
use mqtt_tools::observability::LogSettings;
use mqtt_tools::tools::{ToolContext, ToolSystem};
use mqtt_tools::transport::mqtt::MqttClient;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Level};

/// Topic discovery, value reads, publishing and recording for MQTT brokers
#[derive(Parser)]
#[command(name = "mqtt-tools")]
#[command(about = "Topic discovery, value reads, publishing and recording for MQTT brokers")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_TOOLS_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tool requests as JSON lines on stdin, answering on stdout
    Serve,
    /// Run one tool and print its result
    Call {
        /// Tool name: topics, value, publish or record
        tool: String,
        /// Tool parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Print the tool descriptions and parameter schemas
    Tools,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

/// One line of `serve` input
#[derive(Debug, Deserialize)]
struct ToolRequest {
    #[serde(default)]
    id: Value,
    tool: String,
    #[serde(default = "empty_params")]
    params: Value,
}

fn empty_params() -> Value {
    json!({})
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = LogSettings::from_env();
    match cli.verbose {
        0 => settings.install(),
        1 => settings.with_level(Level::DEBUG).install(),
        _ => settings.with_level(Level::TRACE).install(),
    }

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => run_server(config).await,
        Commands::Call { tool, params } => run_call(config, &tool, &params).await,
        Commands::Tools => print_tools(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ToolsConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ToolsConfig::load_from_file(path)?);
    }

    for path_str in ["mqtt-tools.toml", "config/mqtt-tools.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ToolsConfig::load_from_file(&path)?);
        }
    }

    debug!("No configuration file found, using defaults and environment");
    Ok(ToolsConfig::from_env()?)
}

/// Open the cache and connect; a broker that is down does not stop startup
async fn start(
    config: &ToolsConfig,
) -> Result<(Arc<MqttClient>, Arc<TopicCache>), Box<dyn std::error::Error>> {
    let cache = Arc::new(TopicCache::load(config.cache.path.clone()).await);
    info!(
        "Topic cache loaded with {} topics from {}",
        cache.len().await,
        config.cache.path.display()
    );

    let mut client = MqttClient::new(config.broker.clone()).await?;
    if let Err(e) = client.connect().await {
        warn!(
            "Broker {} not reachable yet, retrying in the background: {}",
            config.broker.endpoint(),
            e
        );
    }

    Ok((Arc::new(client), cache))
}

/// Persist the cache and close the connection once no tool holds the client
async fn stop(client: Arc<MqttClient>, cache: Arc<TopicCache>) {
    if let Err(e) = cache.flush().await {
        warn!("Topic cache not saved on shutdown: {}", e);
    }

    match Arc::try_unwrap(client) {
        Ok(mut client) => {
            if let Err(e) = client.disconnect().await {
                warn!("Error during disconnect: {}", e);
            }
        }
        Err(_) => warn!("MQTT client still in use at shutdown, dropping connection"),
    }
}

async fn run_server(config: ToolsConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (client, cache) = start(&config).await?;
    let tools = Arc::new(ToolSystem::with_builtin_tools(ToolContext::new(
        client.clone(),
        cache.clone(),
        config,
    )));

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut interrupted = false;

    info!("Serving tool requests on stdin");

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    let tools = tools.clone();
                    let out_tx = out_tx.clone();
                    tasks.spawn(async move {
                        let response = handle_request(&tools, &line).await;
                        let _ = out_tx.send(response.to_string());
                    });
                }
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read request: {}", e);
                    break;
                }
            },
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                interrupted = true;
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                interrupted = true;
                break;
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    if !interrupted && !tasks.is_empty() {
        info!("Waiting for {} in-flight requests", tasks.len());
        loop {
            tokio::select! {
                next = tasks.join_next() => if next.is_none() { break },
                _ = sigint.recv() => break,
                _ = sigterm.recv() => break,
            }
        }
    }
    tasks.shutdown().await;

    drop(out_tx);
    let _ = writer.await;
    drop(tools);

    stop(client, cache).await;
    info!("Shutdown complete");
    Ok(())
}

/// Answer one request line; malformed lines get an error response, never a crash
async fn handle_request(tools: &ToolSystem, line: &str) -> Value {
    let request: ToolRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return json!({
                "id": Value::Null,
                "error": {"code": "validation_error", "message": format!("Invalid request: {e}")}
            });
        }
    };

    match tools.execute_tool(&request.tool, &request.params).await {
        Ok(result) => json!({"id": request.id, "result": result}),
        Err(e) => {
            debug!(tool = %request.tool, "Tool call failed: {}", e);
            json!({"id": request.id, "error": e.to_error_result()})
        }
    }
}

async fn run_call(
    config: ToolsConfig,
    tool: &str,
    params: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let params: Value = serde_json::from_str(params)?;
    let (client, cache) = start(&config).await?;
    let tools = ToolSystem::with_builtin_tools(ToolContext::new(
        client.clone(),
        cache.clone(),
        config,
    ));

    let outcome = tools.execute_tool(tool, &params).await;
    drop(tools);
    stop(client, cache).await;

    let output = match outcome {
        Ok(result) => result,
        Err(e) => json!({"error": e.to_error_result()}),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn print_tools(config: ToolsConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Descriptions need no connection
    let client = MqttClient::new(config.broker.clone()).await?;
    let tools = ToolSystem::with_builtin_tools(ToolContext::new(
        Arc::new(client),
        Arc::new(TopicCache::in_memory()),
        config,
    ));
    println!("{}", serde_json::to_string_pretty(&tools.describe_all())?);
    Ok(())
}

fn handle_config_command(config: &ToolsConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}
