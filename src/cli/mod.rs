//! Command-line interface parsing and handling
//!
//! Parses arguments, sets up logging, loads the configuration directory and
//! dispatches to the browser UI or one of the inspection subcommands.

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::core::app::ChatApp;
use crate::core::chat_stream::OllamaClient;
use crate::core::config::{ConfigPaths, LoadedConfig};
use crate::core::history::HistoryArchive;
use crate::ui;

#[derive(Parser, Debug)]
#[command(name = "ollama-chat")]
#[command(version)]
#[command(about = "A browser chat front-end for a local Ollama server")]
#[command(
    long_about = "ollama-chat serves a small web page that talks to a locally running \
Ollama server. Replies stream into the page as they are generated and can be \
stopped at any time. Conversations can be saved to and restored from JSON \
snapshots.\n\n\
Configuration lives in settings.json, system_prompt.txt and greeting.txt inside \
the data directory. Missing or unreadable files are recreated with defaults.\n\n\
Environment Variables:\n\
  RUST_LOG          Log filter (defaults to info)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding settings, prompts and saved history
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Serve the chat UI (default)
    Serve {
        /// Model to chat with, overriding settings.json
        #[arg(short = 'm', long)]
        model: Option<String>,
        /// Port for the UI, overriding settings.json
        #[arg(long)]
        ui_port: Option<u16>,
        /// Address the UI binds to
        #[arg(long, default_value = "127.0.0.1")]
        bind: IpAddr,
    },
    /// Print the effective configuration
    Config,
    /// List saved conversation snapshots
    History,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Serve {
            model: None,
            ui_port: None,
            bind: IpAddr::from([127, 0, 0, 1]),
        }
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();

    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let paths = args
        .data_dir
        .map(ConfigPaths::new)
        .unwrap_or_default();
    let mut config = LoadedConfig::load(paths);

    match args.command.unwrap_or_default() {
        Commands::Serve {
            model,
            ui_port,
            bind,
        } => {
            if let Some(model) = model {
                config.settings.model_name = model;
            }
            if let Some(port) = ui_port {
                config.settings.ui_port = port;
            }
            serve(config, bind).await
        }
        Commands::Config => {
            config.print_all();
            Ok(())
        }
        Commands::History => {
            let archive = HistoryArchive::new(config.paths.history_dir());
            let names = archive.list()?;
            if names.is_empty() {
                println!("No saved conversations in {}", archive.dir().display());
            } else {
                for name in names {
                    println!("{name}");
                }
            }
            Ok(())
        }
    }
}

async fn serve(config: LoadedConfig, bind: IpAddr) -> Result<(), Box<dyn Error>> {
    let backend = Arc::new(OllamaClient::new(config.settings.base_url()));
    let app = Arc::new(ChatApp::new(&config, backend));

    let addr = SocketAddr::new(bind, config.settings.ui_port);
    let listener = TcpListener::bind(addr).await?;
    info!(
        model = %app.model_name(),
        server = %config.settings.base_url(),
        "starting chat UI"
    );

    ui::serve(Arc::clone(&app), listener, shutdown_signal()).await?;

    info!("shutting down");
    app.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
