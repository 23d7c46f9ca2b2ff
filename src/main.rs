use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

mod agent;
mod chat;
mod error;
mod models;
mod server;
mod session;
mod settings;

use agent::engine::{ChatLoop, LoopConfig};
use agent::tools::{ToolRegistry, TravelData};
use models::ProviderRouter;
use settings::{AppConfig, ModelCatalog, ModelSelection};

#[derive(Debug, Parser)]
#[command(name = "travel-chatbot")]
#[command(about = "Airline assistant chatbot with tool calling", long_about = None)]
struct Cli {
    /// Lookup tables for the travel tools: flight-ai or legacy
    #[arg(long, global = true)]
    dataset: Option<String>,
    /// Chat model as "Provider: model" or a bare OpenAI model name
    #[arg(long, global = true)]
    model: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the chat widget and HTTP API
    Start {
        #[arg(long, default_value = "127.0.0.1:7860")]
        listen: String,
        /// Generate an illustration for messages that mention places
        #[arg(long)]
        images: bool,
        /// Require HTTP basic auth, given as user:password
        #[arg(long)]
        auth: Option<String>,
    },
    /// Ask a single question and print the reply
    Ask {
        question: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(dataset) = cli.dataset {
        config.dataset = dataset;
    }
    if let Some(model) = cli.model.as_deref() {
        config.chat_model = ModelSelection::parse(model)?;
    }
    config.log_key_status();
    config.validate()?;

    let data: TravelData = config.dataset.parse()?;
    let tools = Arc::new(ToolRegistry::with_travel_tools(data));
    tracing::info!(dataset = %config.dataset, tools = ?tools.names(), "tool registry ready");
    let providers = ProviderRouter::new(&config.providers, config.http_timeout)?;

    match cli.command {
        Commands::Start { listen, images, auth } => {
            let addr: SocketAddr = listen.parse()?;
            config.images_enabled |= images;
            if let Some(auth) = auth {
                config.basic_auth = Some(settings::parse_credentials(&auth)?);
            }
            let metrics = match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(err = %e, "metrics recorder not installed");
                    None
                }
            };
            let state = server::AppState::new(server::Services {
                config,
                tools,
                providers,
                catalog: ModelCatalog::default(),
                metrics,
            });
            server::serve(addr, state).await?;
        }
        Commands::Ask { question } => {
            let model = providers.client(config.chat_model.provider)?;
            let mut loop_config = LoopConfig::new(config.system_message.clone(), config.chat_model.model.clone());
            loop_config.max_tool_rounds = config.max_tool_rounds;
            let chat = ChatLoop::new(model, tools, loop_config);
            let history = chat.converse(Vec::new(), &question).await?;
            if let Some(reply) = history.last() {
                println!("{}", reply.content);
            }
        }
    }
    Ok(())
}
