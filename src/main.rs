//! chimera - command-line client for the Chimera inference gateway

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chimera::transport::{HttpProber, ProxyProber};
use chimera::types::{
    models, ChatCompletionRequest, ImageRequest, ImageSize, Message, TextToSpeechRequest,
};
use chimera::{ChimeraClient, Config};

#[derive(Parser)]
#[command(name = "chimera")]
#[command(about = "Client for the Chimera inference gateway")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "chimera.toml", global = true)]
    config: String,

    /// Enable debug logging (overrides the config file)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a chat completion request
    Chat {
        /// Model to use
        #[arg(short, long, default_value = models::GPT_3_5_TURBO)]
        model: String,

        /// Optional system prompt
        #[arg(long)]
        system: Option<String>,

        /// Stream the answer and print the raw event stream
        #[arg(long)]
        stream: bool,

        /// User message
        message: String,
    },

    /// Generate images from a prompt
    Image {
        /// Number of images
        #[arg(short, long)]
        n: Option<u32>,

        /// Image size: 256x256, 512x512 or 1024x1024
        #[arg(short, long)]
        size: Option<ImageSize>,

        prompt: String,
    },

    /// Convert text to speech
    Tts { text: String },

    /// Run content moderation on some text
    Moderate { input: String },

    /// Validate configuration file
    Check,

    /// Check whether the configured proxy is reachable
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config);

    // Initialize tracing
    let default_filter = match &config {
        Ok(config) if cli.debug || config.client.debug_logging => "chimera=debug".to_string(),
        Ok(config) => format!("chimera={}", config.logging.level),
        Err(_) if cli.debug => "chimera=debug".to_string(),
        Err(_) => "chimera=info".to_string(),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = config?;
    config.client.debug_logging |= cli.debug;
    tracing::debug!(config = %cli.config, key_source = %config.key_source, "Loaded configuration");

    match cli.command {
        Commands::Chat {
            model,
            system,
            stream,
            message,
        } => {
            let client = ChimeraClient::new(config.client)?;
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(Message::system(system));
            }
            messages.push(Message::user(message));
            let request = ChatCompletionRequest::new(model, messages);

            if stream {
                println!("{}", client.chat_completion_stream(&request).await?);
            } else {
                print_json(&client.chat_completion(&request).await?)?;
            }
            Ok(())
        }

        Commands::Image { n, size, prompt } => {
            let client = ChimeraClient::new(config.client)?;
            let request = ImageRequest {
                prompt,
                n,
                size,
                ..Default::default()
            };
            print_json(&client.image_generation(&request).await?)
        }

        Commands::Tts { text } => {
            let client = ChimeraClient::new(config.client)?;
            print_json(&client.text_to_speech(&TextToSpeechRequest { text }).await?)
        }

        Commands::Moderate { input } => {
            let client = ChimeraClient::new(config.client)?;
            print_json(&client.moderation(&input).await?)
        }

        Commands::Check => {
            println!("Configuration OK");
            println!("  base_url:      {}", config.client.base_url);
            println!("  api_key:       {} ({})", config.client.api_key, config.key_source);
            println!("  debug_logging: {}", config.client.debug_logging);
            match &config.client.proxy {
                None => println!("  proxy:         none"),
                Some(proxy) => println!("  proxy:         {}", proxy.validate()),
            }
            Ok(())
        }

        Commands::Probe => {
            let Some(proxy) = &config.client.proxy else {
                println!("No proxy configured");
                return Ok(());
            };
            match proxy.to_target() {
                Err(report) => println!("Proxy config is {}", report),
                Ok(target) => {
                    let online = HttpProber::default().probe(&target).await;
                    println!(
                        "Proxy {} is {}",
                        target,
                        if online { "online" } else { "offline" }
                    );
                }
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
