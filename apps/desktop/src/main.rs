use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    channel_preview,
    config::{load_settings, load_settings_from},
    ChannelPreview, VoicePermissions, VoicePresenceClient,
};
use shared::{
    domain::{ChannelId, ChannelSummary, UserId},
    protocol::ServerEvent,
};
use tracing::info;

/// Replays presence events and prints the voice channel sidebar.
#[derive(Parser, Debug)]
struct Args {
    /// JSON array of server events.
    #[arg(long)]
    events: PathBuf,
    /// Channels to render; defaults to every channel with known membership.
    #[arg(long = "channel")]
    channels: Vec<i64>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON object mapping user ids to display names.
    #[arg(long)]
    users: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => load_settings_from(path, |key| std::env::var(key).ok())?,
        None => load_settings()?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .init();

    let raw = fs::read_to_string(&args.events)
        .with_context(|| format!("reading events from {}", args.events.display()))?;
    let events: Vec<ServerEvent> = serde_json::from_str(&raw).context("parsing events")?;
    let names = match &args.users {
        Some(path) => load_user_names(path)?,
        None => HashMap::new(),
    };

    let client = VoicePresenceClient::new(settings, VoicePermissions::all());
    let mut channels: HashMap<ChannelId, ChannelSummary> = HashMap::new();
    for event in &events {
        match event {
            ServerEvent::ChannelUpdated { channel } => {
                channels.insert(channel.channel_id, channel.clone());
            }
            ServerEvent::ChannelDeleted { channel_id } => {
                channels.remove(channel_id);
            }
            _ => {}
        }
        client.handle_server_event(event);
    }
    info!("replayed {} events", events.len());

    let selected = if args.channels.is_empty() {
        let mut ids = client.store().snapshot().channel_ids().collect::<Vec<_>>();
        ids.sort();
        ids
    } else {
        args.channels.iter().copied().map(ChannelId).collect()
    };

    let previews = selected
        .into_iter()
        .map(|channel_id| {
            let presence = client.observe_channel(channel_id);
            channel_preview(&presence.current(), &names)
        })
        .collect::<Vec<_>>();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&previews)?);
        return Ok(());
    }
    for preview in &previews {
        print_preview(preview, channels.get(&preview.channel_id));
    }
    Ok(())
}

fn load_user_names(path: &Path) -> Result<HashMap<UserId, String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading user names from {}", path.display()))?;
    let by_id: HashMap<String, String> =
        serde_json::from_str(&raw).context("parsing user names")?;
    by_id
        .into_iter()
        .map(|(id, name)| {
            let id = id
                .parse::<i64>()
                .with_context(|| format!("invalid user id {id:?}"))?;
            Ok((UserId(id), name))
        })
        .collect()
}

fn print_preview(preview: &ChannelPreview, channel: Option<&ChannelSummary>) {
    let name = channel.map(|c| c.name.as_str()).unwrap_or("voice");
    println!("# {name} ({})", preview.channel_id);
    for row in &preview.rows {
        let marker = if row.speaking { "*" } else { " " };
        let icons = row
            .icons
            .iter()
            .map(|icon| icon.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        println!("  {marker} {} {icons}", row.display_name);
    }
}
