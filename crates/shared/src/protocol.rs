use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChannelId, ChannelSummary, GuildId, UserId},
    error::ApiError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    RequestLiveKitToken {
        guild_id: GuildId,
        channel_id: ChannelId,
        can_publish_mic: bool,
        can_publish_screen: bool,
    },
}

/// Voice membership of one user as broadcast by the server.
///
/// Flags missing from the payload default to `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceParticipantPayload {
    pub user_id: UserId,
    #[serde(default)]
    pub is_publishing: bool,
    #[serde(default)]
    pub is_receiving: bool,
    #[serde(default)]
    pub is_camera: bool,
    #[serde(default)]
    pub is_screensharing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelVoiceState {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub participants: Vec<VoiceParticipantPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    ChannelUpdated {
        channel: ChannelSummary,
    },
    ChannelDeleted {
        channel_id: ChannelId,
    },
    /// Full voice membership delivered on initial sync.
    VoiceStateSynced {
        channels: Vec<ChannelVoiceState>,
    },
    VoiceParticipantJoined {
        channel_id: ChannelId,
        participant: VoiceParticipantPayload,
    },
    VoiceParticipantUpdated {
        channel_id: ChannelId,
        participant: VoiceParticipantPayload,
    },
    VoiceParticipantLeft {
        channel_id: ChannelId,
        user_id: UserId,
    },
    LiveKitTokenIssued {
        guild_id: GuildId,
        channel_id: ChannelId,
        room_name: String,
        token: String,
    },
    Error(ApiError),
}
