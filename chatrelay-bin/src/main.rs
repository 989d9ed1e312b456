use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use base64::Engine as _;
use chatrelay_core::config::{Config, PricingCfg};
use chatrelay_core::consumer::{ChatClient, ERROR_TEXT, ReplySink};
use chatrelay_core::http_client::HttpClient;
use chatrelay_core::model::{Message, Role};
use chatrelay_core::server;
use chatrelay_core::usage::{SessionUsage, UsageRecord};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const DEFAULT_IMAGE_PROMPT: &str = "Describe this image.";

#[derive(Parser)]
#[command(author, version, about = "LLM streaming relay and chat client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        #[arg(long, help = "JSON or TOML config file")]
        config: Option<PathBuf>,
        #[arg(long, help = "Override the configured bind host")]
        host: Option<String>,
        #[arg(long, help = "Override the configured bind port")]
        port: Option<u16>,
    },
    /// Talk to a running relay (REPL unless --message is given)
    Chat {
        #[arg(long, default_value = "http://127.0.0.1:8787")]
        url: String,
        #[arg(short, long, help = "Send a single message and exit")]
        message: Option<String>,
        #[arg(long, help = "Attach an image file to the message")]
        image: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chatrelay_core=info,chat_relay=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => {
            let mut cfg = match config {
                Some(path) => Config::from_path(&path)?,
                None => Config::default(),
            };
            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            server::serve(&cfg).await?;
        }
        Commands::Chat {
            url,
            message,
            image,
        } => {
            let client = ChatClient::new(HttpClient::new_default()?, url);
            let pricing = PricingCfg::default();
            match (message, image) {
                (Some(text), image) => {
                    let mut history = vec![build_message(text, image.as_deref())?];
                    let mut session = SessionUsage::default();
                    run_turn(&client, &mut history, &mut session, &pricing).await?;
                }
                (None, Some(image)) => {
                    let mut history =
                        vec![build_message(DEFAULT_IMAGE_PROMPT.to_string(), Some(&image))?];
                    let mut session = SessionUsage::default();
                    run_turn(&client, &mut history, &mut session, &pricing).await?;
                }
                (None, None) => repl(&client, &pricing).await?,
            }
        }
    }

    Ok(())
}

async fn repl(client: &ChatClient, pricing: &PricingCfg) -> anyhow::Result<()> {
    println!("chat-relay REPL. :quit to exit.");
    let mut history: Vec<Message> = Vec::new();
    let mut session = SessionUsage::default();
    let stdin = io::stdin();

    loop {
        print!("> ");
        io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == ":quit" {
            break;
        }

        history.push(Message {
            role: Role::User,
            content: line.to_string(),
            image: None,
        });
        if let Err(e) = run_turn(client, &mut history, &mut session, pricing).await {
            eprintln!("[error: {e}]");
        }
    }
    Ok(())
}

/// Stream one reply for the current history, printing it as it arrives.
///
/// The assistant turn is appended to the history either way; on failure it
/// carries the substitute error text, same as what was shown.
async fn run_turn(
    client: &ChatClient,
    history: &mut Vec<Message>,
    session: &mut SessionUsage,
    pricing: &PricingCfg,
) -> anyhow::Result<()> {
    let mut sink = PrintSink::new();
    match client.send(history, &mut sink).await {
        Ok(reply) => {
            println!();
            history.push(Message {
                role: Role::Assistant,
                content: reply.content,
                image: None,
            });
            if let Some(usage) = reply.usage {
                session.add(&usage);
                println!(
                    "[tokens: {} in / {} out | session: {} tokens, ${:.4}]",
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    session.total_tokens,
                    session.cost(pricing),
                );
            }
            Ok(())
        }
        Err(e) => {
            println!();
            history.push(Message {
                role: Role::Assistant,
                content: ERROR_TEXT.to_string(),
                image: None,
            });
            Err(e.into())
        }
    }
}

fn build_message(content: String, image: Option<&Path>) -> anyhow::Result<Message> {
    let image = match image {
        Some(path) => Some(encode_image(path)?),
        None => None,
    };
    Ok(Message {
        role: Role::User,
        content,
        image,
    })
}

/// Read a file into the `data:` URI shape the chat API expects for images.
fn encode_image(path: &Path) -> anyhow::Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{mime};base64,{encoded}"))
}

/// Streams the growing reply to stdout, printing only the unseen suffix.
struct PrintSink {
    printed: usize,
}

impl PrintSink {
    fn new() -> Self {
        Self { printed: 0 }
    }
}

impl ReplySink for PrintSink {
    fn on_reply(&mut self, content: &str) {
        // A snapshot can shrink or re-shape when a split trailer or a split
        // multi-byte character completes; reprint on a fresh line then.
        if content.len() >= self.printed && content.is_char_boundary(self.printed) {
            print!("{}", &content[self.printed..]);
        } else {
            println!();
            print!("{content}");
        }
        self.printed = content.len();
        io::stdout().flush().ok();
    }

    // Usage is handled from the returned reply; the print sink only renders
    // content.
    fn on_usage(&mut self, _usage: &UsageRecord) {}
}
