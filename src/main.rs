//! CLI entry point for the direct messenger.
//!
//! This binary provides a command-line interface for the messenger library,
//! supporting identity inspection, directory lookups, configuration
//! management and an interactive line-based chat.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use clap::{Parser, Subcommand};
use direct_messenger::{
    directory::{Directory, HttpDirectory, StaticDirectory},
    identity::{resolve, Credential, Participant, UserId},
    room_key,
    transport::{InboundEvent, MemoryConnector, MessageEvent, WebSocketConnector},
    utils::{MessengerConfig, DEFAULT_CONFIG_FILE},
    ChatClient, ClientEvent, ClientUpdate,
};
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Direct Messenger - real-time one-to-one conversations
#[derive(Parser)]
#[command(name = "messenger")]
#[command(about = "Real-time direct messaging over a WebSocket chat backend")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    quiet: bool,

    /// Bearer credential of the local user
    #[arg(long, env = "MESSENGER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the user id carried by the credential
    Whoami,
    /// Print the conversation key for two user ids
    RoomKey {
        /// First user id
        a: String,
        /// Second user id
        b: String,
    },
    /// Resolve a participant by id
    Lookup {
        /// User id to resolve
        id: String,
    },
    /// Search participants
    Search {
        /// Free-text query
        query: String,
    },
    /// Chat with a peer; stdin lines are sent as messages
    Chat {
        /// User id of the peer
        peer_id: String,
    },
    /// Scripted conversation against the in-memory transport
    Demo,
    /// Generate and validate configuration files
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Generate a default configuration file
    Generate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        file: Option<PathBuf>,
    },
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MessengerConfig::load(cli.config.as_deref())?;
    setup_logging(cli.verbose, cli.quiet, &config.logging.level)?;

    match cli.command {
        Commands::Whoami => handle_whoami(cli.token.as_deref()),
        Commands::RoomKey { a, b } => handle_room_key(&a, &b),
        Commands::Lookup { id } => handle_lookup(&id, cli.token, &config).await,
        Commands::Search { query } => handle_search(&query, cli.token, &config).await,
        Commands::Chat { peer_id } => handle_chat(&peer_id, cli.token, config).await,
        Commands::Demo => handle_demo().await,
        Commands::Config { action } => handle_config_commands(action, &config),
    }
}

fn setup_logging(verbose: u8, quiet: bool, configured: &str) -> Result<()> {
    let log_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => configured,
            1 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    Ok(())
}

fn handle_whoami(token: Option<&str>) -> Result<()> {
    let identity = resolve(token)?;
    println!("User ID: {}", identity.user_id);
    Ok(())
}

fn handle_room_key(a: &str, b: &str) -> Result<()> {
    let key = room_key(&UserId::new(a), &UserId::new(b))?;
    println!("{}", key);
    Ok(())
}

fn http_directory(token: Option<String>, config: &MessengerConfig) -> Result<HttpDirectory> {
    let token = token.context("a credential is required (--token or MESSENGER_TOKEN)")?;
    Ok(HttpDirectory::new(
        config.server.api_base_url.clone(),
        Credential::new(token),
        &config.directory,
    )?)
}

fn print_participant(participant: &Participant) {
    if participant.avatar_ref.is_empty() {
        println!("{}", participant);
    } else {
        println!("{} [{}]", participant, participant.avatar_ref);
    }
}

async fn handle_lookup(id: &str, token: Option<String>, config: &MessengerConfig) -> Result<()> {
    let directory = http_directory(token, config)?;
    let participant = directory.find_participant(&UserId::new(id)).await?;
    print_participant(&participant);
    Ok(())
}

async fn handle_search(query: &str, token: Option<String>, config: &MessengerConfig) -> Result<()> {
    let directory = http_directory(token, config)?;
    let results = directory.search(query).await?;

    if results.is_empty() {
        println!("No participants found");
    }
    for participant in &results {
        print_participant(participant);
    }
    Ok(())
}

async fn handle_chat(peer_id: &str, token: Option<String>, config: MessengerConfig) -> Result<()> {
    let directory = http_directory(token.clone(), &config)?;
    let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
    let connector = WebSocketConnector::new(
        config.server.socket_url.clone(),
        deliveries_tx,
        config.session.outbound_queue_size,
    )
    .with_connect_timeout(Duration::from_secs(config.session.connect_timeout_secs));

    let mut client = ChatClient::new(connector, directory, deliveries_rx, config.session.event_queue_size);
    let user_id = client.authenticate(token.as_deref()).await?;
    info!("Signed in as {}", user_id);

    let updates = client.subscribe();
    let events = client.sender();
    let printer = tokio::spawn(print_updates(updates));
    let runner = tokio::spawn(async move { client.run().await });

    events.send(ClientEvent::SelectPeer(UserId::new(peer_id))).await?;
    println!("Type a message and press enter. /switch <id> changes peer, /quit leaves.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim_end();
                if line == "/quit" {
                    break;
                } else if let Some(peer) = line.strip_prefix("/switch ") {
                    events.send(ClientEvent::SelectPeer(UserId::new(peer.trim()))).await?;
                } else {
                    events.send(ClientEvent::Compose(line.to_string())).await?;
                    events.send(ClientEvent::Send).await?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    events.send(ClientEvent::Shutdown).await?;
    if let Err(e) = runner.await {
        error!("Client loop failed: {}", e);
    }
    printer.abort();
    Ok(())
}

async fn print_updates(mut updates: mpsc::UnboundedReceiver<ClientUpdate>) {
    while let Some(update) = updates.recv().await {
        match update {
            ClientUpdate::ConversationOpened { peer, room_key } => {
                println!("-- chatting with {} in {}", peer, room_key);
            }
            ClientUpdate::ConversationClosed => println!("-- conversation closed"),
            ClientUpdate::MessageReceived(message) => print_message(&message),
            ClientUpdate::NotificationReceived(notification) => {
                println!("(notification) {}", notification.payload);
            }
            ClientUpdate::MessageSent => {}
            ClientUpdate::Error(text) => eprintln!("! {}", text),
        }
    }
}

fn print_message(message: &MessageEvent) {
    let sender = if message.sender_display_name.is_empty() {
        message.sender_id.to_string()
    } else {
        message.sender_display_name.clone()
    };
    println!("[{}] {}", sender, message.body);
}

async fn handle_demo() -> Result<()> {
    let claims = serde_json::json!({ "id": 1 });
    let token = format!(
        "{}.{}.demo",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );

    let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
    let connector = MemoryConnector::new(deliveries_tx);
    let log = connector.log();
    let directory = StaticDirectory::new([
        Participant::new(UserId::numeric(2), "Bob"),
        Participant::new(UserId::numeric(3), "Carol"),
    ]);

    let mut client = ChatClient::new(connector.clone(), directory, deliveries_rx, 16);
    let user_id = client.authenticate(Some(&token)).await?;
    let mut updates = client.subscribe();
    let events = client.sender();
    let runner = tokio::spawn(async move { client.run().await });

    for peer in [UserId::numeric(2), UserId::numeric(3)] {
        events.send(ClientEvent::SelectPeer(peer.clone())).await?;
        let Some(ClientUpdate::ConversationOpened { peer: participant, room_key }) = updates.recv().await else {
            anyhow::bail!("conversation with {peer} did not open");
        };
        println!("-- chatting with {} in {}", participant, room_key);

        connector
            .deliver(InboundEvent::Message(MessageEvent {
                room_key,
                sender_id: peer.clone(),
                recipient_id: user_id.clone(),
                body: format!("hi from {}", participant.display_name),
                sender_display_name: participant.display_name.clone(),
                sender_avatar_ref: String::new(),
            }))
            .await;
        if let Some(ClientUpdate::MessageReceived(message)) = updates.recv().await {
            print_message(&message);
        }

        events.send(ClientEvent::Compose("hello back".to_string())).await?;
        events.send(ClientEvent::Send).await?;
        if let Some(ClientUpdate::MessageSent) = updates.recv().await {
            println!("[{}] hello back", user_id);
        }
    }

    events.send(ClientEvent::Shutdown).await?;
    runner.await?;

    println!();
    println!("Transport log");
    println!("=============");
    for record in log.records().await {
        println!("{:?}", record);
    }
    Ok(())
}

fn handle_config_commands(action: ConfigCommands, config: &MessengerConfig) -> Result<()> {
    match action {
        ConfigCommands::Generate { output } => {
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            MessengerConfig::default().save(&output_path)?;
            println!("✓ Configuration generated: {}", output_path.display());
        }
        ConfigCommands::Validate { file } => {
            let config_to_validate = if let Some(path) = file {
                MessengerConfig::from_file(path)?
            } else {
                config.clone()
            };

            config_to_validate.validate()?;
            println!("✓ Configuration is valid");
        }
        ConfigCommands::Show => println!("{}", config.to_toml_string()?),
    }
    Ok(())
}
