//! View models for the channel sidebar and the persistent voice control bar.

use std::collections::HashMap;

use serde::Serialize;
use shared::domain::{ChannelId, ChannelSummary, UserId};

use crate::{
    controls::{ControlIntent, LocalControlState},
    presence::ChannelPresenceView,
    VoiceSessionSnapshot,
};

const CHANNEL_NAME_FALLBACK: &str = "Voice Channel";
const MISSING_PERMISSION: &str = "Missing permission";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusIcon {
    Muted,
    Deafened,
    Camera,
    Screenshare,
}

impl StatusIcon {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusIcon::Muted => "muted",
            StatusIcon::Deafened => "deafened",
            StatusIcon::Camera => "camera",
            StatusIcon::Screenshare => "screenshare",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewRow {
    pub user_id: UserId,
    pub display_name: String,
    pub speaking: bool,
    /// Whether the context menu offers in-call actions for this row.
    pub in_voice: bool,
    pub icons: Vec<StatusIcon>,
}

/// Sidebar preview under a voice channel. Rendered even when it has no rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelPreview {
    pub channel_id: ChannelId,
    pub rows: Vec<PreviewRow>,
}

pub fn display_name(user_id: UserId, names: &HashMap<UserId, String>) -> String {
    names
        .get(&user_id)
        .cloned()
        .unwrap_or_else(|| format!("user {user_id}"))
}

pub fn channel_preview(view: &ChannelPresenceView, names: &HashMap<UserId, String>) -> ChannelPreview {
    let rows = view
        .participants
        .iter()
        .map(|record| {
            let icons = [
                (record.muted, StatusIcon::Muted),
                (record.deafened, StatusIcon::Deafened),
                (record.camera, StatusIcon::Camera),
                (record.screenshare, StatusIcon::Screenshare),
            ]
            .into_iter()
            .filter_map(|(shown, icon)| shown.then_some(icon))
            .collect();

            PreviewRow {
                user_id: record.user_id,
                display_name: display_name(record.user_id, names),
                speaking: record.speaking,
                in_voice: record.is_live,
                icons,
            }
        })
        .collect();

    ChannelPreview {
        channel_id: view.channel_id,
        rows,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonVariant {
    Filled,
    Tonal,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlButton {
    pub intent: ControlIntent,
    pub icon: &'static str,
    pub variant: ButtonVariant,
    pub tooltip: &'static str,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBarView {
    pub display_name: String,
    pub channel_name: String,
    pub buttons: Vec<ControlButton>,
}

fn variant(active: bool) -> ButtonVariant {
    if active {
        ButtonVariant::Filled
    } else {
        ButtonVariant::Tonal
    }
}

/// The bottom-corner control bar. `None` while no session exists.
pub fn control_bar(
    room: Option<&VoiceSessionSnapshot>,
    state: &LocalControlState,
    local_name: &str,
    channel: Option<&ChannelSummary>,
) -> Option<ControlBarView> {
    let room = room?;
    let channel_name = channel
        .filter(|channel| channel.channel_id == room.channel_id && !channel.name.is_empty())
        .map(|channel| channel.name.clone())
        .unwrap_or_else(|| CHANNEL_NAME_FALLBACK.to_string());

    let mic = ControlButton {
        intent: ControlIntent::ToggleMute,
        icon: if state.microphone_enabled { "mic" } else { "mic_off" },
        variant: variant(state.microphone_enabled),
        tooltip: match (state.speaking_permission, state.microphone_enabled) {
            (false, _) => MISSING_PERMISSION,
            (true, true) => "Mute",
            (true, false) => "Unmute",
        },
        disabled: !state.speaking_permission,
    };

    let deafen_off = state.deafened || !state.listen_permission;
    let deafen = ControlButton {
        intent: ControlIntent::ToggleDeafen,
        icon: if deafen_off { "headset_off" } else { "headset" },
        variant: variant(!deafen_off),
        tooltip: match (state.listen_permission, state.deafened) {
            (false, _) => MISSING_PERMISSION,
            (true, true) => "Undeafen",
            (true, false) => "Deafen",
        },
        disabled: !state.listen_permission,
    };

    let camera = ControlButton {
        intent: ControlIntent::ToggleCamera,
        icon: if state.camera_enabled { "videocam" } else { "videocam_off" },
        variant: variant(state.camera_enabled),
        tooltip: if state.camera_enabled { "Stop Camera" } else { "Start Camera" },
        disabled: false,
    };

    let screenshare = ControlButton {
        intent: ControlIntent::ToggleScreenshare,
        icon: if state.screensharing { "screen_share" } else { "stop_screen_share" },
        variant: variant(state.screensharing),
        tooltip: if state.screensharing { "Stop Sharing" } else { "Share Screen" },
        disabled: false,
    };

    let disconnect = ControlButton {
        intent: ControlIntent::Disconnect,
        icon: "call_end",
        variant: ButtonVariant::Error,
        tooltip: "Disconnect",
        disabled: false,
    };

    Some(ControlBarView {
        display_name: local_name.to_string(),
        channel_name,
        buttons: vec![mic, deafen, camera, screenshare, disconnect],
    })
}

#[cfg(test)]
#[path = "tests/presentation_tests.rs"]
mod tests;
