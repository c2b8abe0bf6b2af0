//! Line-oriented terminal client.
//!
//! Commands: `/users`, `/select <id>`, `/close`, `/quit`. Any other line is
//! sent to the selected peer.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use murmur_client::{
    ChannelConnection, ChatApi, ChatStore, ClientConfig, EventBus, FetchOutcome, HttpChatApi,
};
use murmur_shared::{Message, MessageContent, UserId};

fn print_message(store: &ChatStore, message: &Message) {
    let who = if message.sender_id == *store.me() {
        "you".to_string()
    } else {
        store
            .find_user(&message.sender_id)
            .map(|u| u.full_name)
            .unwrap_or_else(|| message.sender_id.to_string())
    };
    let body = message.text.as_deref().unwrap_or("");
    match &message.image {
        Some(image) => println!("[{}] {who}: {body} <image {image}>", message.created_at.format("%H:%M")),
        None => println!("[{}] {who}: {body}", message.created_at.format("%H:%M")),
    }
}

fn print_users(store: &ChatStore) {
    for user in store.users() {
        let online = if store.is_online(&user.id) { "*" } else { " " };
        let unread = match store.unread(&user.id) {
            0 => String::new(),
            n => format!(" ({n} unread)"),
        };
        println!("{online} {:<16} {}{unread}", user.id, user.full_name);
    }
}

/// Prints the open conversation as it fills and announces new unread messages.
async fn watch_store(store: Arc<ChatStore>) {
    let mut changes = store.changes();
    let mut peer: Option<UserId> = None;
    let mut printed = 0usize;
    let mut unread = 0u32;

    while changes.changed().await.is_ok() {
        let selected = store.selected_peer().map(|u| u.id);
        let messages = store.messages();
        if selected != peer || messages.len() < printed {
            peer = selected;
            printed = 0;
        }
        for message in messages.iter().skip(printed) {
            print_message(&store, message);
        }
        printed = messages.len();

        let total = store.total_unread();
        if total > unread {
            let senders: Vec<String> = store
                .unread_senders()
                .into_iter()
                .map(|(id, n)| format!("{id} ({n})"))
                .collect();
            println!("-- unread: {}", senders.join(", "));
        }
        unread = total;
    }
}

async fn handle_line(store: &ChatStore, line: &str) -> anyhow::Result<bool> {
    let mut parts = line.splitn(2, ' ');
    match (parts.next().unwrap_or(""), parts.next().map(str::trim)) {
        ("/quit", _) => return Ok(false),
        ("/users", _) => {
            store.get_users().await?;
            print_users(store);
        }
        ("/select", Some(id)) if !id.is_empty() => {
            let Some(user) = store.find_user(&UserId::from(id)) else {
                println!("unknown user {id}, try /users");
                return Ok(true);
            };
            println!("-- conversation with {}", user.full_name);
            if store.select_peer(Some(user)).await? == FetchOutcome::Discarded {
                tracing::debug!("Selection changed before history arrived");
            }
        }
        ("/close", _) => {
            store.select_peer(None).await?;
        }
        (cmd, _) if cmd.starts_with('/') => println!("unknown command {cmd}"),
        _ => match store.send_message(MessageContent::text(line)).await {
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => println!("not sent: {e}"),
        },
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("murmur_client=debug,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env()?;
    let api = HttpChatApi::new(&config)?;
    let me = api.current_user().await.context("session check failed")?;
    info!(user = %me.id, server = %config.server_url, "Logged in");

    let bus = Arc::new(EventBus::new());
    let store = Arc::new(ChatStore::new(me.id.clone(), Arc::new(api), bus.clone()));
    let channel = ChannelConnection::connect(&config, bus).await?;
    store.set_channel(channel.sender());

    store.get_users().await?;
    println!("Logged in as {}. /users, /select <id>, /close, /quit", me.full_name);
    print_users(&store);

    let watcher = tokio::spawn(watch_store(store.clone()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if !handle_line(&store, line).await? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
        if channel.is_closed() {
            anyhow::bail!("lost connection to {}", config.server_url);
        }
    }

    store.unsubscribe();
    watcher.abort();
    channel.close().await;
    Ok(())
}
