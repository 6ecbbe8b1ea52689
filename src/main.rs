//! CLI for PopMQTT
//!
//! Subcommands:
//! - `subscribe`: connect, subscribe to topics and print every message
//! - `publish`: connect, publish one message and wait for its acknowledgment
//!
//! The broker comes from `--uri`, or else from `config/default.*` /
//! `POPMQTT_URI`. A `.env` file is honoured.

use clap::Parser;
use futures::StreamExt;
use popmqtt::config::{ClientSettings, Settings, load_config};
use popmqtt::utils::logging;
use popmqtt::{Client, QoS};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "popmqtt")]
enum Command {
    /// Subscribe to topics and print incoming messages until Ctrl-C
    Subscribe {
        /// Connection string, e.g. mqtt://127.0.0.1:1883?clientId=me
        #[arg(long)]
        uri: Option<String>,
        /// QoS requested for every topic
        #[arg(long, default_value_t = 0)]
        qos: u8,
        #[arg(required = true)]
        topics: Vec<String>,
    },
    /// Publish a single message
    Publish {
        #[arg(long)]
        uri: Option<String>,
        #[arg(long, default_value_t = 0)]
        qos: u8,
        #[arg(long)]
        retain: bool,
        topic: String,
        message: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return;
        }
    };
    logging::init(&config.log.level);

    let cmd = Command::parse();

    let result = match cmd {
        Command::Subscribe { uri, qos, topics } => match client_settings(&config, uri) {
            Ok(settings) => run_subscribe(settings, qos, topics).await,
            Err(e) => Err(e),
        },
        Command::Publish {
            uri,
            qos,
            retain,
            topic,
            message,
        } => match client_settings(&config, uri) {
            Ok(settings) => run_publish(settings, qos, retain, &topic, message).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        error!("Client failed: {}", e);
    }
}

/// Parses `--uri` or else the configured connection string, falling back to a
/// random client id with a clean session when none is given.
fn client_settings(
    config: &Settings,
    uri: Option<String>,
) -> Result<ClientSettings, Box<dyn std::error::Error>> {
    let mut settings = match uri {
        Some(uri) => ClientSettings::from_uri(&uri)?,
        None => config.client()?,
    };
    if settings.client_id.is_empty() {
        settings.client_id = format!("popmqtt-{}", Uuid::new_v4().simple());
        settings.clean_session = true;
    }
    Ok(settings)
}

async fn run_subscribe(
    settings: ClientSettings,
    qos: u8,
    topics: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = QoS::try_from(qos)?;
    let client = Client::new(settings);
    let mut messages = Box::pin(client.messages());

    client.connect().await?;
    info!("Connected to {}", client.settings().address());
    for topic in &topics {
        client.subscribe_with_qos(topic, qos).await?;
        info!("Subscribed to {}", topic);
    }

    loop {
        tokio::select! {
            message = messages.next() => {
                let Some(message) = message else {
                    break;
                };
                println!("{}: {}", message.topic, String::from_utf8_lossy(&message.payload));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                break;
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}

async fn run_publish(
    settings: ClientSettings,
    qos: u8,
    retain: bool,
    topic: &str,
    message: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = QoS::try_from(qos)?;
    let client = Client::new(settings);

    client.connect().await?;
    let ack = if retain {
        client.publish_retain(message, topic, qos).await?
    } else {
        client.publish(message, topic, qos).await?
    };
    match ack {
        Some(ack) => info!("Published to {} ({})", topic, ack),
        None => info!("Published to {}", topic),
    }

    client.disconnect().await?;
    Ok(())
}
