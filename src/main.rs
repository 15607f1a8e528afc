//! support-hub binary.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

use support_hub::constants::HUB_COMMAND_CAPACITY;
use support_hub::identity::TokenTable;
use support_hub::llm::{ChatCompletion, LlmClient};
use support_hub::store::{MemoryStore, RecordStore};
use support_hub::{ChatPipeline, ChatServer, Config, Hub, Responder, ServerContext};

/// Global allocator. mimalloc performs better than the system allocator
/// under many concurrent connections.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "support-hub")]
#[command(version = VERSION)]
#[command(about = "Real-time customer-support chat hub with FAQ and LLM replies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebSocket server.
    Serve {
        /// Listen address (overrides config and SUPPORT_HUB_BIND).
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the effective configuration.
    Config {
        /// Also write it to the config directory (the API key is never saved).
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { bind } => {
            let mut config = Config::load()?;
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start tokio runtime")?;
            runtime.block_on(serve(config))?;
        }
        Commands::Config { save } => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                let path = config.save()?;
                log::info!("Configuration saved to {}", path.display());
            }
        }
    }

    Ok(())
}

/// Log to stderr, or to `SUPPORT_HUB_LOG_FILE` when set.
fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    if let Ok(path) = std::env::var("SUPPORT_HUB_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let store: Arc<dyn RecordStore> = match &config.faq_file {
        Some(path) => Arc::new(MemoryStore::from_faq_file(path)?),
        None => Arc::new(MemoryStore::new()),
    };

    let llm: Option<Arc<dyn ChatCompletion>> = if config.ai.is_enabled() {
        let client = LlmClient::new(
            &config.ai.base_url,
            config.ai.api_key.clone(),
            config.ai.request_timeout(),
        )?;
        log::info!("LLM fallback enabled ({}, model {})", client.endpoint(), config.ai.model);
        Some(Arc::new(client) as Arc<dyn ChatCompletion>)
    } else {
        log::warn!("LLM fallback disabled: set provider \"openai\" and SUPPORT_HUB_AI_API_KEY");
        None
    };

    let verifier = TokenTable::new(config.access_tokens.clone());
    if verifier.is_empty() {
        log::warn!("No access tokens configured; every connection will be rejected");
    } else {
        log::info!("{} access token(s) configured", verifier.len());
    }

    let (hub, hub_handle) = Hub::new(HUB_COMMAND_CAPACITY);
    let hub_task = tokio::spawn(hub.run());

    let responder = Responder::new(Arc::clone(&store), llm, config.responder_settings());
    let pipeline = Arc::new(ChatPipeline::new(store, responder, hub_handle.clone()));

    let server = ChatServer::bind(
        &config.bind_addr,
        ServerContext {
            verifier: Arc::new(verifier),
            pipeline,
            hub: hub_handle,
            settings: config.connection_settings(),
        },
    )
    .await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    log::info!("Shutdown signal received");

    server.shutdown().await;
    hub_task.await.context("Hub task failed")?;
    Ok(())
}
