//! Shellmate daemon - terminal with a local AI copilot.
//!
//! This is the main binary entry point. See the `shellmate` library for
//! the core functionality.

use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use shellmate::{Bridge, Config, OllamaClient};
use tokio_util::sync::CancellationToken;

/// mimalloc performs better than the system allocator for the daemon's
/// many small, short-lived allocations (frames, fragments).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "shellmate", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge daemon (default).
    Serve {
        /// Port for the WebSocket endpoints (127.0.0.1 only).
        #[arg(long)]
        port: Option<u16>,
        /// Shell to spawn instead of the platform default.
        #[arg(long)]
        shell: Option<String>,
        /// Default model for completions.
        #[arg(long)]
        model: Option<String>,
        /// Base URL of the Ollama server.
        #[arg(long)]
        ollama_url: Option<String>,
    },
    /// List the models the inference server has available.
    Models,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command.unwrap_or(Command::Serve {
        port: None,
        shell: None,
        model: None,
        ollama_url: None,
    }) {
        Command::Serve {
            port,
            shell,
            model,
            ollama_url,
        } => {
            let mut config = Config::load()?;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(shell) = shell {
                config.shell = Some(shell);
            }
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(ollama_url) = ollama_url {
                config.ollama_url = ollama_url;
            }
            runtime.block_on(serve(config))
        }
        Command::Models => {
            let config = Config::load()?;
            runtime.block_on(list_models(&config))
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            shutdown.cancel();
        })?;
    }

    let bridge = Bridge::bind(config).await?;
    println!("shellmate listening on ws://{}", bridge.local_addr()?);
    bridge.run(shutdown).await
}

async fn list_models(config: &Config) -> Result<()> {
    let client = OllamaClient::new(&config.ollama_url)?;
    let models = client.list_models().await?;
    if models.is_empty() {
        println!("No models installed at {}", client.base_url());
        return Ok(());
    }
    for model in models {
        match model.size {
            Some(size) => println!("{:<32} {:>8} MB", model.name, size / (1024 * 1024)),
            None => println!("{}", model.name),
        }
    }
    Ok(())
}
