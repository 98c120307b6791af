//! # parley
//!
//! Line-oriented terminal client. Reads commands from stdin, prints the view
//! to stdout, and logs to stderr.
//!
//! Anything that is not a command is sent to the active channel.

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use parley_client::{
    init_tracing, spawn_store, ClientConfig, HttpRemoteLog, StaticSession, SyncHandle, ViewEvent,
    ViewSnapshot,
};
use parley_shared::types::{ChannelId, ChannelKind, FriendRequestId, MessageId};

#[derive(Debug, PartialEq)]
enum Command {
    Join(ChannelId),
    Direct(String),
    Create { name: String, members: Vec<String> },
    Add(String),
    Friend(String),
    Accept(FriendRequestId),
    Decline(FriendRequestId),
    Requests,
    Refresh,
    Hide,
    Show,
    Quit,
    Say(String),
}

fn parse_command(line: &str) -> anyhow::Result<Command> {
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };
    let mut words = rest.split_whitespace();
    let verb = words.next().unwrap_or_default();
    let mut arg = |what: &str| {
        words
            .next()
            .map(str::to_string)
            .with_context(|| format!("/{verb} needs a {what}"))
    };

    let command = match verb {
        "join" => Command::Join(ChannelId(arg("channel id")?.parse()?)),
        "dm" => Command::Direct(arg("username")?),
        "create" => {
            let name = arg("name")?;
            Command::Create {
                name,
                members: words.map(str::to_string).collect(),
            }
        }
        "add" => Command::Add(arg("username")?),
        "friend" => Command::Friend(arg("username")?),
        "accept" => Command::Accept(FriendRequestId(arg("request id")?.parse()?)),
        "decline" => Command::Decline(FriendRequestId(arg("request id")?.parse()?)),
        "requests" => Command::Requests,
        "refresh" => Command::Refresh,
        "hide" => Command::Hide,
        "show" => Command::Show,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command /{other}"),
    };
    Ok(command)
}

/// Apply one command. Returns `false` when the client should exit.
fn execute(handle: &SyncHandle, command: Command) -> parley_client::Result<bool> {
    match command {
        Command::Join(channel) => handle.activate(channel)?,
        Command::Direct(peer) => handle.open_direct(&peer)?,
        Command::Create { name, members } => {
            let members: Vec<&str> = members.iter().map(String::as_str).collect();
            handle.create_channel(&name, &members)?
        }
        Command::Add(username) => handle.add_member(&username)?,
        Command::Friend(username) => handle.send_friend_request(&username)?,
        Command::Accept(id) => handle.accept_friend_request(id)?,
        Command::Decline(id) => handle.decline_friend_request(id)?,
        Command::Requests => handle.refresh_friend_requests()?,
        Command::Refresh => handle.refresh_channels()?,
        Command::Hide => handle.set_visible(false)?,
        Command::Show => handle.set_visible(true)?,
        Command::Say(text) => handle.send(&text)?,
        Command::Quit => {
            handle.shutdown()?;
            return Ok(false);
        }
    }
    Ok(true)
}

/// Prints what changed between consecutive snapshots.
#[derive(Default)]
struct Renderer {
    last: ViewSnapshot,
    printed_up_to: Option<(ChannelId, MessageId)>,
}

impl Renderer {
    fn render(&mut self, snapshot: ViewSnapshot) {
        if snapshot.channels != self.last.channels {
            println!("-- channels --");
            for channel in &snapshot.channels {
                let label = match &channel.kind {
                    ChannelKind::Direct { peer, .. } => format!("@{peer}"),
                    ChannelKind::Group { name } => format!("#{name}"),
                };
                println!("  [{}] {label}", channel.id);
            }
        }

        if snapshot.friend_requests != self.last.friend_requests {
            println!("-- friend requests --");
            for request in &snapshot.friend_requests {
                println!(
                    "  [{}] {} -> {} ({:?})",
                    request.id, request.from, request.to, request.status
                );
            }
        }

        if let Some(active) = snapshot.active_channel {
            let since = match self.printed_up_to {
                Some((channel, id)) if channel == active => id,
                _ => {
                    println!("-- channel {active} --");
                    MessageId::ZERO
                }
            };
            for message in snapshot.messages.iter().filter(|m| m.id > since) {
                let at = message
                    .created_at
                    .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
                    .unwrap_or_default();
                println!("{at} <{}> {}", message.sender, message.text);
            }
            let tail = snapshot.messages.last().map(|m| m.id).unwrap_or(since);
            self.printed_up_to = Some((active, tail.max(since)));
        }

        self.last = snapshot;
    }
}

async fn render_events(mut events: mpsc::UnboundedReceiver<ViewEvent>) {
    let mut renderer = Renderer::default();
    while let Some(event) = events.recv().await {
        match event {
            ViewEvent::StateChanged(snapshot) => renderer.render(snapshot),
            ViewEvent::Notice(notice) => match notice.channel {
                Some(channel) => println!("!! channel {channel}: {}", notice.error),
                None => println!("!! {}", notice.error),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let session = match config.user.clone() {
        Some(user) => StaticSession::signed_in(user),
        None => {
            tracing::warn!("PARLEY_USER is not set, starting without a session");
            StaticSession::anonymous()
        }
    };
    let remote = HttpRemoteLog::new(&config.server_url)?;

    let (handle, events) = spawn_store(Arc::new(remote), Arc::new(session), &config);
    let renderer = tokio::spawn(render_events(events));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(e) => {
                println!("!! {e}");
                continue;
            }
        };
        match execute(&handle, command) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("!! {e}"),
        }
    }

    // Dropping the last handle stops the store, which closes the event stream.
    drop(handle);
    renderer.await?;
    info!("Bye");
    Ok(())
}
