//! Memochat CLI
//!
//! Terminal chat front-end: login, replay of persisted history, starters and
//! a line-oriented conversation loop.
//!
//! The password prompt reads a plain line, so the password is echoed as it
//! is typed.

use clap::Parser;
use memochat::auth::CredentialTable;
use memochat::config::Starter;
use memochat::{AppConfig, ChatSession, OpenAiClient};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const MAX_LOGIN_ATTEMPTS: usize = 3;
/// Input is read as a plain line, so the prompt says it echoes
const PASSWORD_PROMPT: &str = "password (input is shown): ";

/// Memochat - chat with a hosted model, with memory kept on disk
#[derive(Parser, Debug)]
#[command(name = "memochat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the persisted history file
    #[arg(long)]
    memory_file: Option<PathBuf>,

    /// Model id
    #[arg(long)]
    model: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Cap on generated tokens per reply
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Token budget for messages sent per request (0 sends the whole log)
    #[arg(long)]
    context_tokens: Option<usize>,

    /// Stream replies as they are generated
    #[arg(long)]
    stream: bool,

    /// Do not print persisted history on start
    #[arg(long)]
    no_resume: bool,

    /// Verbose output: debug logging
    #[arg(short, long)]
    verbose: bool,

    /// First message to send
    #[arg(trailing_var_arg = true)]
    prompt: Vec<String>,
}

/// A line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Exit,
    History,
    Starters,
    Starter(usize),
    Unknown(String),
    Say(String),
    Empty,
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if line == "exit" {
        return Command::Exit;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or("");
    let arg = parts.next().map(str::trim).unwrap_or("");
    match name {
        "exit" | "quit" => Command::Exit,
        "history" => Command::History,
        "starters" => Command::Starters,
        "starter" => match arg.parse::<usize>() {
            Ok(n) if n >= 1 => Command::Starter(n),
            _ => Command::Unknown(line.to_string()),
        },
        _ => Command::Unknown(line.to_string()),
    }
}

fn format_starters(starters: &[Starter]) -> String {
    let mut out = String::new();
    for (i, starter) in starters.iter().enumerate() {
        out.push_str(&format!("  /starter {}  {}\n", i + 1, starter.label));
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config = resolve_config(&cli).await?;
    info!("History file: {:?}", config.memory_file);

    // Stdin lines arrive on a channel from a blocking reader thread
    let (input_tx, mut input_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if input_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    // All stdout goes through one writer task so streamed deltas stay in order
    let (output_tx, mut output_rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        while let Some(text) = output_rx.recv().await {
            let mut stdout = io::stdout();
            if let Err(e) = write!(stdout, "{}", text) {
                error!("Error writing stdout: {}", e);
                break;
            }
            let _ = stdout.flush();
        }
    });

    let result = run(cli, config, &mut input_rx, output_tx).await;
    let _ = writer.await;
    result
}

async fn resolve_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref()).await?;

    if let Some(memory_file) = &cli.memory_file {
        config = config.with_memory_file(memory_file.clone());
    }
    if let Some(model) = &cli.model {
        config = config.with_model(model.clone());
    }
    if let Some(temperature) = cli.temperature {
        config.temperature = temperature;
    }
    if let Some(max_tokens) = cli.max_tokens {
        config.max_tokens = Some(max_tokens);
    }
    if let Some(limit) = cli.context_tokens {
        config = config.with_context_token_limit((limit > 0).then_some(limit));
    }
    if cli.stream {
        config.stream = true;
    }
    Ok(config)
}

async fn run(
    cli: Cli,
    config: AppConfig,
    input_rx: &mut mpsc::Receiver<String>,
    output_tx: mpsc::Sender<String>,
) -> anyhow::Result<()> {
    let credentials = CredentialTable::new(config.users.clone());
    if credentials.is_required() && !login(&credentials, input_rx, &output_tx).await? {
        output_tx.send("Too many failed attempts.\n".to_string()).await?;
        return Ok(());
    }

    let mut session = ChatSession::open(&config).await?;

    let mut client = OpenAiClient::from_config(&config)?;
    if config.stream {
        client = client.with_delta_sink(output_tx.clone());
    }

    if !cli.no_resume && !session.history().is_empty() {
        let mut replay = String::from("── previous conversation ──\n");
        for record in session.history() {
            replay.push_str(&format!("{}: {}\n", record.role(), record.content()));
        }
        replay.push_str("───────────────────────────\n");
        output_tx.send(replay).await?;
    }

    if !config.starters.is_empty() {
        output_tx
            .send(format!("Starters:\n{}", format_starters(&config.starters)))
            .await?;
    }

    if !cli.prompt.is_empty() {
        let prompt = cli.prompt.join(" ");
        run_turn(&mut session, &client, &config, prompt, &output_tx).await?;
    }

    loop {
        output_tx.send("> ".to_string()).await?;
        let Some(line) = input_rx.recv().await else {
            output_tx.send("\n".to_string()).await?;
            break;
        };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Exit => break,
            Command::History => {
                let mut text = String::new();
                for record in session.history() {
                    text.push_str(&format!("{}: {}\n", record.role(), record.content()));
                }
                if text.is_empty() {
                    text.push_str("(no history)\n");
                }
                output_tx.send(text).await?;
            }
            Command::Starters => {
                output_tx.send(format_starters(&config.starters)).await?;
            }
            Command::Starter(n) => match config.starters.get(n - 1) {
                Some(starter) => {
                    let message = starter.message.clone();
                    output_tx.send(format!("you: {}\n", message)).await?;
                    run_turn(&mut session, &client, &config, message, &output_tx).await?;
                }
                None => {
                    output_tx
                        .send(format!("No starter {} (have {}).\n", n, config.starters.len()))
                        .await?;
                }
            },
            Command::Unknown(cmd) => {
                output_tx
                    .send(format!(
                        "Unknown command {}. Try /history, /starters, /starter <n>, /exit.\n",
                        cmd
                    ))
                    .await?;
            }
            Command::Say(text) => {
                run_turn(&mut session, &client, &config, text, &output_tx).await?;
            }
        }
    }

    info!(
        "Session ended: {} messages in log, {} persisted records",
        session.log().len(),
        session.history().len()
    );
    Ok(())
}

/// Send one turn; a failed turn is reported and the loop carries on
async fn run_turn(
    session: &mut ChatSession,
    client: &OpenAiClient,
    config: &AppConfig,
    text: String,
    output_tx: &mpsc::Sender<String>,
) -> anyhow::Result<()> {
    if config.stream {
        output_tx.send("assistant: ".to_string()).await?;
    }
    match session.send(client, text).await {
        Ok(reply) => {
            let out = if config.stream {
                "\n".to_string()
            } else {
                format!("assistant: {}\n", reply)
            };
            output_tx.send(out).await?;
        }
        Err(e) => {
            error!("Turn failed: {}", e);
            output_tx.send(format!("\n[error] {}\n", e)).await?;
        }
    }
    Ok(())
}

async fn login(
    credentials: &CredentialTable,
    input_rx: &mut mpsc::Receiver<String>,
    output_tx: &mpsc::Sender<String>,
) -> anyhow::Result<bool> {
    for _ in 0..MAX_LOGIN_ATTEMPTS {
        output_tx.send("username: ".to_string()).await?;
        let Some(username) = input_rx.recv().await else {
            return Ok(false);
        };
        output_tx.send(PASSWORD_PROMPT.to_string()).await?;
        let Some(password) = input_rx.recv().await else {
            return Ok(false);
        };

        match credentials.authenticate(username.trim(), password.trim()) {
            Ok(user) => {
                output_tx
                    .send(format!("Logged in as {}.\n", user.identifier))
                    .await?;
                return Ok(true);
            }
            Err(e) => output_tx.send(format!("{}\n", e)).await?,
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text_and_exit() {
        assert_eq!(parse_command("  Hello  "), Command::Say("Hello".to_string()));
        assert_eq!(parse_command("exit"), Command::Exit);
        assert_eq!(parse_command("/quit"), Command::Exit);
        assert_eq!(parse_command("   "), Command::Empty);
    }

    #[test]
    fn test_parse_slash_commands() {
        assert_eq!(parse_command("/history"), Command::History);
        assert_eq!(parse_command("/starters"), Command::Starters);
        assert_eq!(parse_command("/starter 2"), Command::Starter(2));
        assert!(matches!(parse_command("/starter 0"), Command::Unknown(_)));
        assert!(matches!(parse_command("/starter x"), Command::Unknown(_)));
        assert!(matches!(parse_command("/nope"), Command::Unknown(_)));
    }

    #[test]
    fn test_format_starters_numbers_from_one() {
        let starters = memochat::config::default_starters();
        let text = format_starters(&starters);
        assert!(text.contains("/starter 1  Morning routine ideation"));
        assert_eq!(text.lines().count(), starters.len());
    }

    #[tokio::test]
    async fn test_login_warns_that_password_echoes() {
        let users = [("alice".to_string(), "secret".to_string())].into_iter().collect();
        let credentials = CredentialTable::new(users);
        let (input_tx, mut input_rx) = mpsc::channel(4);
        let (output_tx, mut output_rx) = mpsc::channel(8);
        input_tx.send("alice".to_string()).await.unwrap();
        input_tx.send("secret".to_string()).await.unwrap();

        assert!(login(&credentials, &mut input_rx, &output_tx).await.unwrap());
        drop(output_tx);

        let mut prompts = Vec::new();
        while let Some(line) = output_rx.recv().await {
            prompts.push(line);
        }
        assert_eq!(prompts[0], "username: ");
        assert_eq!(prompts[1], "password (input is shown): ");
        assert_eq!(prompts[2], "Logged in as alice.\n");
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from([
            "memochat",
            "--model",
            "gpt-4o",
            "--context-tokens",
            "0",
            "--stream",
            "Hello",
            "there",
        ]);
        assert_eq!(cli.model.as_deref(), Some("gpt-4o"));
        assert_eq!(cli.context_tokens, Some(0));
        assert!(cli.stream);
        assert_eq!(cli.prompt, vec!["Hello", "there"]);
    }
}
