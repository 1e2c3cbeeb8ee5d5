use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use ollama_conductor::{
    ClientConfig, ClientState, ConductorError, Env, EventSink, OllamaClient, PendingGeneration,
};
use tokio::io::AsyncBufReadExt as _;
use tracing::{debug, info};
use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser, Debug)]
#[command(name = "ollama-conductor")]
#[command(about = "Chat with a local Ollama server from the terminal")]
#[command(version)]
struct Args {
    /// TOML client configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dotenv file consulted before the process environment
    #[arg(long)]
    dotenv: Option<PathBuf>,

    /// Server URL, overriding config and environment
    #[arg(long)]
    base_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json_logs: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout belongs to the conversation.
    let fmt_layer = if json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

/// Renders client events as a plain transcript on stdout.
#[derive(Default)]
struct TerminalSink {
    assistant_open: AtomicBool,
}

impl TerminalSink {
    fn print(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "{text}");
        let _ = out.flush();
    }

    fn close_assistant(&self) {
        if self.assistant_open.swap(false, Ordering::SeqCst) {
            self.print("\n");
        }
    }
}

impl EventSink for TerminalSink {
    fn on_user_message(&self, text: &str) {
        debug!(chars = text.chars().count(), "user message");
    }

    fn on_system_message(&self, text: &str) {
        self.close_assistant();
        self.print(&format!("[{text}]\n"));
    }

    fn on_assistant_message_start(&self, text: &str) {
        self.close_assistant();
        self.assistant_open.store(true, Ordering::SeqCst);
        self.print(text);
    }

    fn on_assistant_message_append(&self, text: &str) {
        self.print(text);
    }

    fn on_state_change(&self, state: ClientState) {
        if state == ClientState::Idle {
            self.close_assistant();
        }
    }
}

async fn load_config(args: &Args) -> Result<ClientConfig, ConductorError> {
    let env = match &args.dotenv {
        Some(path) => Env::load(path).await?,
        None => Env::default(),
    };

    let config = match &args.config {
        Some(path) => ClientConfig::load(path).await?,
        None => ClientConfig::default(),
    };
    let mut config = config.with_env_overrides(&env);
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.trim().to_string();
    }
    Ok(config)
}

enum Command<'a> {
    Chat(&'a str),
    Complete(&'a str),
    Image(Option<&'a str>),
    Ps,
    Cancel,
    Quit,
    Help,
}

fn parse_command(line: &str) -> Option<Command<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Chat(line));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match name {
        "complete" => Command::Complete(arg),
        "image" => Command::Image(Some(arg).filter(|path| !path.is_empty())),
        "ps" => Command::Ps,
        "cancel" => Command::Cancel,
        "quit" | "exit" => Command::Quit,
        _ => Command::Help,
    };
    Some(command)
}

const HELP: &str = "commands: <text> | /complete [prompt] | /image <path> | /ps | /cancel | /quit";

fn report_dispatch(sink: &TerminalSink, dispatched: Result<PendingGeneration, ConductorError>) {
    match dispatched {
        Ok(pending) => debug!(id = pending.id(), "generation dispatched"),
        Err(ConductorError::Busy) => {
            sink.on_system_message("A request is already running. Use /cancel to stop it.")
        }
        Err(err) => sink.on_system_message(&format!("Error: {err}")),
    }
}

async fn read_image(path: &Path) -> Option<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "image read failed");
            None
        }
    }
}

async fn list_models(client: &OllamaClient, sink: &TerminalSink) {
    match client.loaded_models().await {
        Ok(models) if models.is_empty() => sink.on_system_message("No models loaded."),
        Ok(models) => {
            for model in models {
                let size = model
                    .size
                    .map(|bytes| format!(" {bytes} bytes"))
                    .unwrap_or_default();
                let expires = model
                    .expires_at
                    .map(|at| format!(" until {at}"))
                    .unwrap_or_default();
                sink.on_system_message(&format!("{}{size}{expires}", model.name));
            }
        }
        Err(err) => sink.on_system_message(&format!("Error: {err}")),
    }
}

/// Returns false when the session should end.
async fn handle_line(client: &OllamaClient, sink: &TerminalSink, line: &str) -> bool {
    let Some(command) = parse_command(line) else {
        return true;
    };
    match command {
        Command::Chat(prompt) => report_dispatch(sink, client.chat(prompt)),
        Command::Complete(prompt) => report_dispatch(sink, client.complete(prompt)),
        Command::Image(None) => sink.on_system_message("No file selected."),
        Command::Image(Some(path)) => match read_image(Path::new(path)).await {
            Some(bytes) => report_dispatch(sink, client.describe_image(bytes)),
            None => sink.on_system_message("Error reading image."),
        },
        Command::Ps => list_models(client, sink).await,
        Command::Cancel => {
            if !client.cancel() {
                sink.on_system_message("Nothing to cancel.");
            }
        }
        Command::Quit => {
            client.cancel();
            return false;
        }
        Command::Help => sink.on_system_message(HELP),
    }
    true
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.json_logs)?;

    let config = load_config(&args).await?;
    info!(
        base_url = %config.base_url,
        text_model = %config.text_model,
        vision_model = %config.vision_model,
        "starting"
    );

    let sink = Arc::new(TerminalSink::default());
    let client = OllamaClient::from_config(config, sink.clone())?;
    sink.on_system_message(HELP);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !handle_line(&client, &sink, &line).await {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                if !client.cancel() {
                    break;
                }
            }
        }
    }

    client.cancel();
    Ok(())
}
