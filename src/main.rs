//! vizmse - Command-line client for the Vizrt Media Sequencer Engine
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use peptalk_client::ConnectionEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use vizmse_core::{create_session, SessionConfig};

#[derive(Parser)]
#[command(name = "vizmse")]
#[command(about = "Command-line client for the Vizrt Media Sequencer Engine")]
#[command(version)]
struct Cli {
    /// MSE host name or address
    #[arg(short = 'H', long, env = "VIZMSE_HOST")]
    host: Option<String>,

    /// PepTalk port
    #[arg(short, long)]
    port: Option<u16>,

    /// HTTP command port
    #[arg(long)]
    rest_port: Option<u16>,

    /// Request timeout in milliseconds
    #[arg(short, long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// Ping the MSE
    Ping,

    /// Print the subtree at a path
    Get {
        /// Tree path
        path: String,

        /// Levels to include
        #[arg(short, long)]
        depth: Option<u32>,

        /// Print the node flattened to JSON
        #[arg(short, long)]
        flat: bool,
    },

    /// Set the text of a node
    Set {
        /// Tree path
        path: String,

        /// New text
        text: String,
    },

    /// Delete a node
    Delete {
        /// Tree path
        path: String,
    },

    /// Send a raw PepTalk command (without request id)
    Raw {
        #[arg(trailing_var_arg = true, required = true)]
        words: Vec<String>,
    },

    /// List shows
    Shows,

    /// List playlists
    Playlists,

    /// List playout profiles
    Profiles,

    /// List Viz Engine handlers
    Engines,

    /// List rundowns
    Rundowns,

    /// Create a rundown for a show
    CreateRundown {
        /// Show id
        #[arg(short, long)]
        show: String,

        /// Playout profile
        #[arg(short, long)]
        profile: String,

        /// Playlist id (generated if omitted)
        #[arg(long)]
        playlist: Option<String>,

        /// Description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Deactivate and delete a rundown
    DeleteRundown {
        /// Playlist id
        playlist: String,
    },

    /// List the elements of a rundown
    Elements {
        /// Playlist id
        playlist: String,
    },

    /// Initialize a rundown on its profile
    Activate {
        /// Playlist id
        playlist: String,

        /// Send the initialize pair twice
        #[arg(long)]
        twice: bool,
    },

    /// Clean up a rundown on its profile
    Deactivate {
        /// Playlist id
        playlist: String,
    },

    /// Cue an element
    Cue {
        /// Playlist id
        playlist: String,

        /// Element name, or vcpid[:channel] for external elements
        element: String,
    },

    /// Take an element on air
    Take {
        /// Playlist id
        playlist: String,

        /// Element name, or vcpid[:channel] for external elements
        element: String,
    },

    /// Take an element off air
    Out {
        /// Playlist id
        playlist: String,

        /// Element name, or vcpid[:channel] for external elements
        element: String,
    },

    /// Print server events until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = SessionConfig::load()?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.peptalk_port = port;
    }
    if let Some(port) = cli.rest_port {
        config.rest_port = port;
    }
    if let Some(timeout) = cli.timeout {
        config.request_timeout_ms = timeout;
    }
    tracing::debug!(host = %config.host, port = config.peptalk_port, "effective config");

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(config).await?;
        }
        Some(Commands::Watch) => {
            config.noevents = false;
            let mse = create_session(config).await?;
            if !mse.is_connected() {
                eprintln!("{}", "Connection failed".red());
                std::process::exit(1);
            }

            let mut events = mse.subscribe();
            eprintln!("{}", "Watching events. Press Ctrl+C to stop...".dimmed());
            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(ConnectionEvent::Message { id, body }) => {
                                println!("{} {}", id.to_string().cyan(), body);
                            }
                            Ok(ConnectionEvent::Unmatched(e)) => {
                                eprintln!("{}: {}", "Unmatched".yellow(), e);
                            }
                            Ok(ConnectionEvent::Closed) => {
                                eprintln!("{}", "Connection closed, reconnecting...".red());
                            }
                            Ok(ConnectionEvent::Connected) => {
                                eprintln!("{}", "Connected".green());
                            }
                            Err(RecvError::Lagged(n)) => {
                                eprintln!("{}: lagged {} events", "Warning".yellow(), n);
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n{}", "Stopping watch...".dimmed());
                        break;
                    }
                }
            }

            mse.close().await?;
        }
        Some(cmd) => {
            // One-shot commands resolve external references on demand.
            config.build_channel_map_on_create = false;
            let mse = create_session(config).await?;
            if !mse.is_connected() {
                eprintln!(
                    "{}: cannot reach {}:{}",
                    "Connection failed".red(),
                    mse.config().host,
                    mse.config().peptalk_port
                );
                std::process::exit(1);
            }

            match commands::execute(&mse, cmd).await {
                Ok(output) => println!("{}", output),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    let _ = mse.close().await;
                    std::process::exit(1);
                }
            }

            mse.close().await?;
        }
    }

    Ok(())
}
