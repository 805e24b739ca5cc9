mod input;

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use huddle_client::{ClientConfig, GatewayConnection, HttpBackend};
use huddle_sync::{ConnectionState, MessageChange, StreamTransport, SyncController, SyncUpdate};
use huddle_types::Message;

use input::Input;

/// Messages shown when a channel finishes loading.
const BACKLOG_LINES: usize = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout is the chat.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=info,huddle_sync=info,huddle_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env()?;
    let backend = HttpBackend::new(&config.api_url, &config.context.token)?;

    let initial = match &config.initial_channel {
        Some(channel_id) => channel_id.clone(),
        None => backend
            .list_channels()
            .await
            .context("listing channels")?
            .into_iter()
            .next()
            .map(|c| c.id)
            .context("no channels available; set HUDDLE_CHANNEL")?,
    };

    let (gateway, events) = GatewayConnection::spawn(config.gateway_config());
    let stream: Arc<dyn StreamTransport> = Arc::new(gateway);
    let mut controller = SyncController::new(
        config.sync_config(),
        config.context.clone(),
        backend.clone(),
        stream,
        events,
    );

    info!("signed in as {} ({})", config.context.username, config.context.user_id);
    println!("{}", input::HELP);
    controller.select_channel(initial);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match input::parse(&line) {
                    Ok(Input::Quit) => break,
                    Ok(command) => handle(&mut controller, &backend, command).await,
                    Err(usage) => println!("{}", usage),
                }
            }
            update = controller.next_update() => match update {
                Some(update) => render(&controller, &update),
                None => {
                    println!("* connection closed");
                    break;
                }
            }
        }
    }

    controller.shutdown();
    Ok(())
}

async fn handle(
    controller: &mut SyncController<HttpBackend>,
    backend: &HttpBackend,
    command: Input,
) {
    let result = match command {
        Input::Send(content) => controller.send_message(&content).await.map(|_| ()),
        Input::Edit { id, content } => controller.edit_message(&id, &content).await.map(|_| ()),
        Input::Delete(id) => controller.delete_message(&id).await,
        Input::Older => controller.load_older_messages().map(|started| {
            if !started {
                println!("* no older messages");
            }
        }),
        Input::Channel(channel_id) => {
            controller.select_channel(channel_id);
            Ok(())
        }
        Input::Channels => backend.list_channels().await.map(|channels| {
            for channel in channels {
                println!(
                    "  {}  #{} ({} members) {}",
                    channel.id,
                    channel.name,
                    channel.members.len(),
                    channel.description
                );
            }
        }),
        Input::Join(channel_id) => backend.join_channel(&channel_id).await,
        Input::Leave(channel_id) => backend.leave_channel(&channel_id).await,
        Input::Typing => controller.notify_typing(),
        Input::Retry => controller.retry_load(),
        Input::Who => {
            if let Some(view) = controller.view() {
                let names: Vec<&str> =
                    view.online_users.iter().map(|u| u.username.as_str()).collect();
                println!("* online in {}: {}", view.channel_id, names.join(", "));
            }
            Ok(())
        }
        Input::Help => {
            println!("{}", input::HELP);
            Ok(())
        }
        Input::Quit | Input::Empty => Ok(()),
    };

    if let Err(e) = result {
        warn!("{}", e);
        println!("! {}", e);
    }
}

fn render(controller: &SyncController<HttpBackend>, update: &SyncUpdate) {
    if let SyncUpdate::ConnectionChanged(state) = update {
        match state {
            ConnectionState::Connected => println!("* connected"),
            ConnectionState::Reconnecting { attempt } => {
                println!("* reconnecting (attempt {})", attempt)
            }
            ConnectionState::Connecting => println!("* connecting"),
            ConnectionState::Disconnected => println!("* disconnected"),
        }
        return;
    }
    let Some(view) = controller.view() else {
        return;
    };
    match update {
        SyncUpdate::ChannelLoaded { channel_id, .. } => {
            println!("--- #{} ({} messages) ---", channel_id, view.total);
            if view.has_more {
                println!("  (/older for earlier history)");
            }
            let skip = view.messages.len().saturating_sub(BACKLOG_LINES);
            for message in &view.messages[skip..] {
                print_message(message);
            }
        }
        SyncUpdate::MessagesChanged { change, .. } => match change {
            MessageChange::Added(id) | MessageChange::Edited(id) => {
                if let Some(message) = view.messages.iter().find(|m| &m.id == id) {
                    print_message(message);
                }
            }
            MessageChange::Deleted(id) => println!("* {} deleted", id),
        },
        SyncUpdate::OlderMessagesLoaded { count, .. } => {
            for message in view.messages.iter().take(*count) {
                print_message(message);
            }
            println!("--- {} older messages ---", count);
        }
        SyncUpdate::PresenceChanged { .. } => {
            println!("* {} online", view.online_users.len());
        }
        SyncUpdate::TypingChanged { .. } => {
            if let Some(label) = view.typing_label() {
                println!("* {}", label);
            }
        }
        SyncUpdate::ConnectionChanged(_) => {}
        SyncUpdate::LoadFailed { channel_id, error } => {
            println!("! loading #{} failed: {} (/retry)", channel_id, error);
        }
        SyncUpdate::OlderMessagesFailed { error, .. } => {
            println!("! loading older messages failed: {}", error);
        }
    }
}

fn print_message(message: &Message) {
    let edited = if message.is_edited() { " (edited)" } else { "" };
    println!(
        "[{}] {} <{}> {}{}",
        message.created_at.with_timezone(&chrono::Local).format("%H:%M"),
        message.id,
        message.sender_name,
        message.content,
        edited
    );
}
