//! JT/T808 to publish/subscribe converter.
//!
//! Accepts device connections, answers them, and publishes every session
//! event as a JSON document. Documents are logged until a broker transport
//! is plugged in behind `Publisher`.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracklink_cli::{ConverterConfig, init_logging, load_config, shutdown_on_ctrl_c};
use tracklink_network::ProtocolServer;
use tracklink_translator::{LogPublisher, Translator};

#[derive(Parser, Debug)]
#[command(version, about = "JT/T 808-2013 to publish/subscribe converter")]
struct Cli {
    /// JSON config file (defaults to ./config.json when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on for devices
    #[arg(long)]
    jt808_host: Option<String>,

    /// Port to listen on for devices
    #[arg(long)]
    jt808_port: Option<u16>,

    /// Topic prefix for published documents
    #[arg(long = "mqtt-topic")]
    topic_prefix: Option<String>,

    /// Maximum simultaneous device connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut ConverterConfig) {
        if let Some(host) = &self.jt808_host {
            config.jt808_host = host.clone();
        }
        if let Some(port) = self.jt808_port {
            config.jt808_port = port;
        }
        if let Some(prefix) = &self.topic_prefix {
            config.mqtt_topic_prefix = prefix.clone();
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config: ConverterConfig = load_config(cli.config.as_deref())?;
    cli.apply(&mut config);
    let server_config = config.server_config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        topic_prefix = %config.mqtt_topic_prefix,
        "Starting converter"
    );

    let translator = Arc::new(Translator::new(
        config.mqtt_topic_prefix.clone(),
        Arc::new(LogPublisher),
    ));
    let server = ProtocolServer::bind(server_config, translator.clone())
        .await
        .context("failed to start device listener")?;

    let shutdown = shutdown_on_ctrl_c();
    server.run(shutdown).await?;

    info!(
        published = translator.published(),
        failures = translator.failures(),
        "Converter stopped"
    );
    Ok(())
}
