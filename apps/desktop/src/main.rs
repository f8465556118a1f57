use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{
    config::{load_settings_from, DEFAULT_SETTINGS_FILE},
    ClientEvent, ConnectionState, Message, RoomSession, SessionHandle, StoreChange,
};
use shared::domain::MessageId;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::warn;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    room: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
}

const HELP: &str = "\
commands:
  <text>                 send a message (or the edit / reply in progress)
  /reply <id>            reply to a message
  /edit <id>             edit one of your messages
  /cancel                leave reply or edit mode
  /react <id> <emoji>    react to a message
  /delete <id>           delete one of your messages
  /share <path>          upload a file and share it
  /who                   show who is typing and the connection state
  /quit                  leave the room";

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    let args = Args::parse();

    let mut settings = load_settings_from(&args.config, |key| std::env::var(key).ok());
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(room) = args.room {
        settings.room = room;
    }
    if let Some(username) = args.username {
        settings.username = username;
    }
    if args.user_id.is_some() {
        settings.user_id = args.user_id;
    }

    let (session, handle) = RoomSession::from_settings(&settings)?;
    let events = handle.subscribe_events();
    let session_task = tokio::spawn(session.run());
    let printer = tokio::spawn(print_events(events, handle.clone()));

    println!(
        "joined #{} as {} (type /help for commands)",
        settings.room, settings.username
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match run_line(&handle, &mut lines, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => println!("! {err:#}"),
        }
    }

    let _ = handle.shutdown().await;
    printer.abort();
    session_task.await?.context("room session failed")?;
    Ok(())
}

/// Returns `false` once the user asked to leave.
async fn run_line(
    handle: &SessionHandle,
    lines: &mut Lines<BufReader<Stdin>>,
    line: &str,
) -> Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }
    let Some(command) = line.strip_prefix('/') else {
        handle.send_message(line).await?;
        return Ok(true);
    };

    let mut parts = command.splitn(3, ' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("quit"), _, _) => return Ok(false),
        (Some("help"), _, _) => println!("{HELP}"),
        (Some("reply"), Some(id), _) => {
            let preview = handle.begin_reply(MessageId::new(id)).await?;
            println!("replying to \"{preview}\"");
        }
        (Some("edit"), Some(id), _) => {
            let body = handle.begin_edit(MessageId::new(id)).await?;
            println!("editing: {body}");
        }
        (Some("cancel"), _, _) => handle.cancel_compose().await?,
        (Some("react"), Some(id), Some(emoji)) => {
            handle.react(MessageId::new(id), emoji.trim()).await?
        }
        (Some("delete"), Some(id), _) => {
            println!("delete message {id}? [y/N]");
            let answer = lines.next_line().await?.unwrap_or_default();
            if answer.trim().eq_ignore_ascii_case("y") {
                handle.delete_message(MessageId::new(id)).await?;
            }
        }
        (Some("share"), Some(path), _) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read {path}"))?;
            let filename = PathBuf::from(path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string());
            handle.share_file(filename, bytes).await?;
        }
        (Some("who"), _, _) => {
            let snapshot = handle.snapshot().await?;
            let typing = snapshot.store.typing_users();
            if !typing.is_empty() {
                println!("typing: {}", typing.join(", "));
            }
            println!("connection: {:?}", snapshot.connection);
        }
        _ => bail!("unknown command: /{command}"),
    }
    Ok(true)
}

async fn print_events(
    mut events: tokio::sync::broadcast::Receiver<ClientEvent>,
    handle: SessionHandle,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer fell behind");
                continue;
            }
            Err(_) => return,
        };

        match event {
            ClientEvent::Store(StoreChange::MessageInserted(id)) => {
                if !print_message(&handle, &id).await {
                    return;
                }
                // Rendered counts as read, on top of the receipt sent on arrival.
                let _ = handle.mark_read(id).await;
            }
            ClientEvent::Store(
                StoreChange::MessageEdited(id) | StoreChange::MessageDeleted(id),
            ) => {
                if !print_message(&handle, &id).await {
                    return;
                }
            }
            ClientEvent::Store(StoreChange::ReactionChanged {
                message_id,
                emoji,
                count,
            }) => println!("  [{message_id}] {emoji} x{count}"),
            ClientEvent::Store(StoreChange::PresenceChanged { user_id, status }) => {
                println!("* user {user_id} is {}", status.as_str())
            }
            ClientEvent::Store(StoreChange::TypingChanged {
                username,
                is_typing: true,
                ..
            }) => println!("* {username} is typing..."),
            ClientEvent::Store(_) => {}
            ClientEvent::Connection(ConnectionState::Reconnecting { attempt, retry_in }) => {
                println!(
                    "* connection lost, retry {attempt} in {:.1}s",
                    retry_in.as_secs_f64()
                )
            }
            ClientEvent::Connection(ConnectionState::Open) => println!("* connected"),
            ClientEvent::Connection(ConnectionState::Disconnected) => {
                println!("* disconnected, giving up")
            }
            ClientEvent::Connection(ConnectionState::Connecting) => {}
            ClientEvent::UploadFailed { filename, error } => {
                println!("! upload of {filename} failed: {error}")
            }
            ClientEvent::Error(err) => println!("! {err}"),
        }
    }
}

/// Returns `false` once the session is gone.
async fn print_message(handle: &SessionHandle, id: &MessageId) -> bool {
    match handle.message(id.clone()).await {
        Ok(Some(message)) => println!("{}", render_message(&message)),
        Ok(None) => {}
        Err(_) => return false,
    }
    true
}

fn render_message(message: &Message) -> String {
    if message.deleted {
        return format!("[{}] (message deleted)", message.id);
    }
    let mut line = format!(
        "[{}] {} {}: {}",
        message.id,
        message.created_at.format("%H:%M"),
        message.author_name,
        message.body
    );
    if let Some(parent) = &message.parent_id {
        line.push_str(&format!(" (reply to {parent})"));
    }
    if let Some(file_ref) = &message.file_ref {
        line.push_str(&format!(" <{file_ref}>"));
    }
    if message.edited {
        line.push_str(" (edited)");
    }
    line
}
