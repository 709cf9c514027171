//! CLI for rabbit-client
//!
//! Subcommands:
//! - `connect [exchange]`: dial the broker, optionally declare the topology, then exit
//! - `listen <exchange> [queue]`: consume and print every message as a JSON line

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rabbit_client::config::{Settings, load_config_from};
use rabbit_client::consumer::{new_consumer, topology};
use rabbit_client::transport::amqp;
use rabbit_client::utils::{TracingSink, logging};
use serde_json::json;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rabbit-client", about = "Consume commands from a fanout exchange")]
struct Cli {
    /// Configuration file, without extension (default: config/default)
    #[arg(long, global = true, default_value = "config/default")]
    config: PathBuf,

    /// Which server to connect to
    #[arg(long, global = true)]
    url: Option<String>,

    /// What public cert file to use
    #[arg(short = 'c', long, global = true)]
    cert: Option<PathBuf>,

    /// What private key file to use
    #[arg(short = 'k', long, global = true)]
    key: Option<PathBuf>,

    /// What CA public cert file to use
    #[arg(long = "cacert", visible_alias = "ca", global = true)]
    cacert: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dial the broker; with an exchange, also declare and bind a queue
    Connect { exchange: Option<String> },
    /// Consume from an exchange and dump every message to stdout
    Listen {
        exchange: String,
        /// Queue to consume from; the broker names one when omitted
        queue: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match load_config_from(&cli.config) {
        Ok(settings) => apply_flags(settings, &cli),
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&settings.log_level);

    let outcome = match cli.command {
        Command::Connect { exchange } => run_connect(settings, exchange).await,
        Command::Listen { exchange, queue } => run_listen(settings, exchange, queue).await,
    };

    if let Err(e) = outcome {
        error!("rabbit-client failed: {}", e);
        std::process::exit(1);
    }
}

fn apply_flags(mut settings: Settings, cli: &Cli) -> Settings {
    if let Some(url) = &cli.url {
        settings.amqp.url = url.clone();
    }
    if let Some(cert) = &cli.cert {
        settings.amqp.tls.cert = cert.clone();
    }
    if let Some(key) = &cli.key {
        settings.amqp.tls.key = key.clone();
    }
    if let Some(ca) = &cli.cacert {
        settings.amqp.tls.ca_cert = Some(vec![ca.clone()]);
    }
    settings
}

async fn run_connect(
    settings: Settings,
    exchange: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let tls = serde_json::to_string(&settings.amqp.tls)?;
    println!("connecting to {}: {}", settings.amqp.url, tls);

    let conn = amqp::dial(&settings.amqp.url, &settings.amqp.tls, &TracingSink).await?;
    info!("Connection to broker successful");

    if let Some(exchange) = exchange {
        let (_channel, queue) =
            topology::declare(&conn, &exchange, &settings.amqp.queue, &TracingSink).await?;
        println!("queue {queue} bound to exchange {exchange}");
    }

    conn.close().await?;
    Ok(())
}

async fn run_listen(
    mut settings: Settings,
    exchange: String,
    queue: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    settings.amqp.exchange = exchange;
    if let Some(queue) = queue {
        settings.amqp.queue = queue;
    }

    let mut messages = new_consumer(&settings).await?;
    info!("Consumer connected, listening on queue {}", messages.queue());

    loop {
        tokio::select! {
            next = messages.recv() => {
                let Some(message) = next else {
                    info!("Message stream closed");
                    break;
                };
                let line = json!({
                    "delivery_tag": message.delivery_tag(),
                    "command": message.command,
                    "payload": message.payload,
                });
                println!("{line}");
                if let Err(e) = message.ack(true).await {
                    error!("{}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                break;
            }
        }
    }

    Ok(())
}
