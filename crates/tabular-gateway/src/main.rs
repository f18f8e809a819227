//! Tabular Agent - autonomous data-analysis runtime

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tabular_core::RuntimeConfig;
use tabular_gateway::{start_gateway, GatewayOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "tabular-agent",
    about = "Tabular Agent - LLM-driven data analysis server"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the analysis server
    Serve {
        #[arg(short, long, default_value = "8640")]
        port: u16,
        /// Bind address (use 0.0.0.0 to expose on the network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// JSON config file; TABULAR_* env vars override its keys
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Loop strategy tag (overrides config agent_mode)
        #[arg(long)]
        mode: Option<String>,
        /// Root directory for session uploads
        #[arg(long)]
        upload_dir: Option<PathBuf>,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve {
            port,
            bind,
            config,
            mode,
            upload_dir,
        }) => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| {
                            "tabular_gateway=info,tabular_agent=info,tabular_tools=info,tower_http=info"
                                .into()
                        }),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let mut runtime_config = match config {
                Some(path) => RuntimeConfig::load(&path),
                None => RuntimeConfig::default(),
            };
            runtime_config.apply_env();
            if let Some(mode) = mode {
                runtime_config.agent_mode = mode;
            }
            if let Some(dir) = upload_dir {
                runtime_config.upload_dir = dir;
            }

            if runtime_config.llm_api_key.is_empty() {
                anyhow::bail!(
                    "no LLM API key configured (set llm_api_key or TABULAR_LLM_API_KEY)"
                );
            }

            start_gateway(GatewayOptions {
                config: runtime_config,
                bind,
                port,
            })
            .await?;
        }

        Some(Commands::Version) | None => {
            println!("tabular-agent v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
