//! Headless chatline client
//!
//! Joins a conversation and the presence feed, prints what arrives and posts
//! every stdin line. Lines starting with `/` are commands:
//! `/call`, `/hangup`, `/status <status>`, `/upload <path>`, `/quit`.

use anyhow::Context;
use chatline::chat::{MessageBody, MessageId, PostedMessage};
use chatline::config::ClientConfig;
use chatline::presence::FriendStatus;
use chatline::ChatPage;
use clap::Parser;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "chatline")]
#[command(about = "Headless client for chat conversations and voice rooms")]
struct Cli {
    /// Conversation to join (also the voice room id)
    conversation: String,

    /// Config file, instead of CHATLINE_CONFIG or the platform default
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server host[:port]
    #[arg(long)]
    host: Option<String>,

    /// Use wss://
    #[arg(long)]
    secure: bool,

    /// Session cookie value
    #[arg(long)]
    session: Option<String>,

    /// CSRF cookie value, required for uploads
    #[arg(long)]
    csrf: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chatline::init_logging();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = ClientConfig::from_file(path).context("Failed to read config file")?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config
        }
        None => ClientConfig::load().context("Failed to load configuration")?,
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if cli.secure {
        config.secure = true;
    }
    if let Some(session) = cli.session {
        config.session_cookie = Some(session);
    }
    if let Some(csrf) = cli.csrf {
        config.csrf_token = Some(csrf);
    }

    let page = ChatPage::new(config);
    print_inbound(&page);
    page.open(&cli.conversation);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => {
                        if !handle_line(&page, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    page.close().await;
    tracing::info!("Bye");
    Ok(())
}

fn print_inbound(page: &ChatPage) {
    let current_user_id = page.config.current_user_id;
    let printed: Mutex<HashSet<MessageId>> = Mutex::new(HashSet::new());

    page.chat.channel().on("chat_message", move |message: PostedMessage| {
        if !printed.lock().insert(message.id) {
            return;
        }
        let who = if message.is_own(current_user_id) {
            "you".to_string()
        } else {
            message.sender_name.clone()
        };
        let time = message.display_time().unwrap_or_default();
        match message.body() {
            MessageBody::Sticker { url } => println!("[{}] {}: <sticker {}>", time, who, url),
            MessageBody::File { url, name } => println!("[{}] {}: <file {} {}>", time, who, name, url),
            MessageBody::Text(text) => println!("[{}] {}: {}", time, who, text),
        }
    });

    page.presence.channel().on("friend_status", |update: FriendStatus| {
        println!("* user {} is {}", update.user_id, update.status);
    });
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Quit,
    Call,
    HangUp,
    Status(&'a str),
    Upload(&'a str),
    Usage(&'static str),
    Post(&'a str),
    Nothing,
}

fn parse_command(line: &str) -> Command<'_> {
    let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match head {
        "" => Command::Nothing,
        "/quit" => Command::Quit,
        "/call" => Command::Call,
        "/hangup" => Command::HangUp,
        "/status" if rest.is_empty() => Command::Usage("/status <status>"),
        "/status" => Command::Status(rest),
        "/upload" if rest.is_empty() => Command::Usage("/upload <path>"),
        "/upload" => Command::Upload(rest),
        _ => Command::Post(line),
    }
}

/// Returns `false` when the client should exit
async fn handle_line(page: &ChatPage, line: &str) -> bool {
    match parse_command(line) {
        Command::Quit => return false,
        Command::Call => {
            if let Err(e) = page.call.start_audio().await {
                eprintln!("! call not started: {}", e);
            }
        }
        Command::HangUp => page.call.stop_audio().await,
        Command::Status(status) => {
            if let Err(e) = page.presence.set_status(status) {
                eprintln!("! status not sent: {}", e);
            }
        }
        Command::Upload(path) => match page.upload(Path::new(path)).await {
            Ok(uploaded) => println!("* uploaded {}", uploaded.filename.unwrap_or_default()),
            Err(e) => eprintln!("! upload failed: {}", e),
        },
        Command::Usage(usage) => eprintln!("usage: {}", usage),
        Command::Post(text) => {
            if let Err(e) = page.chat.post(text) {
                eprintln!("! message not sent: {}", e);
            }
        }
        Command::Nothing => {}
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands() {
        assert_eq!(parse_command("/quit"), Command::Quit);
        assert_eq!(parse_command("/call"), Command::Call);
        assert_eq!(parse_command("/hangup"), Command::HangUp);
        assert_eq!(parse_command("/status away"), Command::Status("away"));
        assert_eq!(parse_command("/upload ./a b.pdf"), Command::Upload("./a b.pdf"));
        assert_eq!(parse_command(""), Command::Nothing);
        assert_eq!(parse_command("hello there"), Command::Post("hello there"));
    }

    #[test]
    fn test_bare_commands_print_usage() {
        assert!(matches!(parse_command("/status"), Command::Usage(_)));
        assert!(matches!(parse_command("/status   "), Command::Usage(_)));
        assert!(matches!(parse_command("/upload"), Command::Usage(_)));
    }
}
