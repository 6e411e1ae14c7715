use clap::{Parser, Subcommand};
use relay::labels::Label;
use relay::llm::{AssistantClient, Classifier};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "label-relay")]
#[command(about = "Chatwoot conversation label relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Serve the webhook endpoint. Secrets come from the environment (or a .env file in the working directory).
    Serve {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.label-relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config, RELAY_PORT, or 8080)
        #[arg(long, short)]
        port: Option<u16>,

        /// Bind address (default from config, RELAY_BIND, or 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Classify a text with the configured assistant and print the labels. Nothing is written to Chatwoot.
    Classify {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.label-relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Message text to classify.
        text: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("ignoring unreadable .env: {}", e);
        }
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("label-relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port, bind }) => {
            if let Err(e) = run_serve(config, port, bind).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Classify { config, text }) => {
            if let Err(e) = run_classify(config, &text).await {
                log::error!("classify failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn load(config_path: Option<PathBuf>) -> anyhow::Result<relay::config::Config> {
    let (mut config, path) = relay::config::load_config(config_path)?;
    log::debug!("configuration file: {}", path.display());
    config.apply_process_env();
    Ok(config)
}

async fn run_serve(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    bind: Option<String>,
) -> anyhow::Result<()> {
    let mut config = load(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    if let Some(b) = bind {
        config.gateway.bind = b;
    }
    log::info!("starting relay on {}:{}", config.gateway.bind, config.gateway.port);
    relay::gateway::run_gateway(config).await
}

async fn run_classify(config_path: Option<PathBuf>, text: &str) -> anyhow::Result<()> {
    let config = load(config_path)?;
    config.validate_openai()?;
    let client = AssistantClient::new(&config.openai)?;
    let labels = client.classify(text, &Label::ALL).await?;
    if labels.is_empty() {
        println!("(no labels)");
    } else {
        println!("{}", labels);
    }
    Ok(())
}
