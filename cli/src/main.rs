// nearpay — payment requests to nearby devices
//
// Drives the messaging engine over the in-memory loopback radio so the whole
// advertise/discover/deliver/notify flow can be exercised from a terminal.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use nearpay_core::{
    BroadcastRequest, DeliveryEvent, LoopbackMedium, NotificationSink, PaymentNotice,
    PeerMessagingEngine,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "nearpay")]
#[command(about = "NearPay — payment requests over short-range radio", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter (overrides the configured one; RUST_LOG wins over both)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a broadcast between simulated nodes
    Demo {
        /// Amount to request (e.g. 12.50)
        #[arg(short, long)]
        amount: String,
        /// Description shown to payers
        #[arg(short, long, default_value = "")]
        description: String,
        /// Number of nodes including the requester
        #[arg(short, long)]
        nodes: Option<usize>,
        /// Discovery window override in milliseconds
        #[arg(short, long)]
        window_ms: Option<u64>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    #[command(alias = "show")]
    List,
    Reset,
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::Config::load()?;
    let filter = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.log_filter.clone());
    init_logging(&filter, cli.log_json);
    debug!("Log filter: {}", filter);

    match cli.command {
        Commands::Demo {
            amount,
            description,
            nodes,
            window_ms,
        } => cmd_demo(settings, amount, description, nodes, window_ms).await,
        Commands::Config { action } => cmd_config(settings, action),
    }
}

fn init_logging(default_filter: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Prints payment notices as they arrive on a simulated node.
struct ConsoleNotifier {
    node: String,
}

impl NotificationSink for ConsoleNotifier {
    fn notify(&self, notice: PaymentNotice) {
        println!(
            "  {} [{}] {}",
            "🔔".yellow(),
            self.node.bright_cyan(),
            notice.title.bold()
        );
        if !notice.body.is_empty() {
            println!("       {}", notice.body.dimmed());
        }
    }
}

async fn cmd_demo(
    settings: config::Config,
    amount: String,
    description: String,
    nodes: Option<usize>,
    window_ms: Option<u64>,
) -> Result<()> {
    let nodes = nodes.unwrap_or(settings.demo_nodes);
    anyhow::ensure!(nodes >= 2, "The demo needs at least two nodes");

    println!("{}", "Starting loopback nodes...".bold());
    let medium = LoopbackMedium::new();
    let mut engines = Vec::with_capacity(nodes);

    for index in 0..nodes {
        let name = if index == 0 {
            settings.engine.device_name.clone()
        } else {
            format!("payer-{}", index)
        };
        let address = format!("02:00:00:00:00:{:02X}", index + 1);

        let mut engine_config = settings.engine.clone().with_device_name(name.clone());
        if let Some(ms) = window_ms {
            engine_config.discovery_window_ms = ms;
        }

        let radio = medium.radio(address.as_str(), name.clone());
        let engine = PeerMessagingEngine::new(engine_config, radio)
            .context("Invalid engine configuration")?
            .with_notifier(Arc::new(ConsoleNotifier { node: name.clone() }));
        engine
            .init()
            .await
            .with_context(|| format!("Failed to start {}", name))?;

        info!("Node {} started at {}", name, address);
        println!("  {} {} ({})", "✓".green(), name, address.dimmed());
        engines.push(Arc::new(engine));
    }

    let requester = engines[0].clone();
    let mut progress = requester.subscribe_deliveries();
    let printer = tokio::spawn(async move {
        while let Ok(event) = progress.recv().await {
            match event {
                DeliveryEvent::Started { peers } => {
                    println!("  Discovered {} peer(s)", peers.to_string().bold())
                }
                DeliveryEvent::Delivered(delivery) => println!(
                    "  {} {} ({} bytes, unit {})",
                    "✓".green(),
                    delivery.peer,
                    delivery.bytes,
                    delivery.transfer_unit
                ),
                DeliveryEvent::Failed { peer, error } => {
                    println!("  {} {}: {}", "✗".red(), peer, error)
                }
                DeliveryEvent::Finished { .. } => break,
            }
        }
    });

    println!();
    println!(
        "{} {} {} from {}",
        "Requesting".bold(),
        amount.bright_green(),
        settings.engine.currency,
        settings.engine.device_name.bright_cyan()
    );
    info!("Broadcasting from {} to nearby nodes", settings.engine.device_name);
    let report = requester
        .broadcast(&BroadcastRequest::new(amount, description))
        .await
        .context("Broadcast failed")?;
    let _ = printer.await;

    // let notifier tasks drain before tearing the nodes down
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!();
    println!(
        "{} {} delivered, {} failed",
        "Done:".bold(),
        report.delivered().to_string().green(),
        report.failed().to_string().red()
    );

    for engine in &engines {
        engine.shutdown().await;
    }
    info!("Stopped {} nodes", engines.len());
    Ok(())
}

fn cmd_config(mut settings: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            settings.set(&key, &value)?;
            info!("Config updated: {} = {}", key, value);
            println!("{} {} = {}", "✓".green(), key, value);
        }
        ConfigAction::Get { key } => match settings.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration:".bold());
            for (key, value) in settings.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }
        }
        ConfigAction::Reset => {
            config::Config::reset()?;
            info!("Config reset to defaults");
            println!("{} Configuration reset to defaults", "✓".green());
        }
        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }
    Ok(())
}
