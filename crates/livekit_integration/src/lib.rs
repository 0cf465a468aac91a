use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveKitRoomOptions {
    pub room_name: String,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    Microphone,
    Camera,
    ScreenShare,
}

impl TrackSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackSource::Microphone => "microphone",
            TrackSource::Camera => "camera",
            TrackSource::ScreenShare => "screen_share",
        }
    }
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "microphone" | "mic" => Ok(TrackSource::Microphone),
            "camera" => Ok(TrackSource::Camera),
            "screen_share" | "screenshare" => Ok(TrackSource::ScreenShare),
            other => Err(anyhow::anyhow!("unknown track source '{other}'")),
        }
    }
}

/// A track publication as seen by the local session. Only its presence and
/// flags matter here, never its media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub sid: String,
    pub source: TrackSource,
    pub subscribed: bool,
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub participant_id: String,
    pub identity: String,
    pub tracks: Vec<TrackInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParticipant {
    pub participant_id: String,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveKitRoomEvent {
    ParticipantJoined(RemoteParticipant),
    ParticipantLeft {
        participant_id: String,
    },
    TrackPublished {
        participant_id: String,
        track: TrackInfo,
    },
    TrackUnpublished {
        participant_id: String,
        track_sid: String,
    },
    TrackSubscribed {
        participant_id: String,
        track_sid: String,
    },
    TrackUnsubscribed {
        participant_id: String,
        track_sid: String,
    },
    TrackMuted {
        participant_id: String,
        track_sid: String,
    },
    TrackUnmuted {
        participant_id: String,
        track_sid: String,
    },
    /// Full replacement of the speaking set, local participant included.
    ActiveSpeakersChanged {
        participant_ids: Vec<String>,
    },
    /// Local capture state changed outside of an explicit request,
    /// e.g. the OS revoked camera access.
    LocalTrackChanged {
        source: TrackSource,
        enabled: bool,
    },
    LocalDeafenChanged {
        deafened: bool,
    },
    Disconnected {
        reason: String,
    },
}

#[async_trait]
pub trait LiveKitRoomSession: Send + Sync {
    async fn set_local_track_enabled(&self, source: TrackSource, enabled: bool)
        -> anyhow::Result<()>;
    async fn set_deafened(&self, deafened: bool) -> anyhow::Result<()>;
    async fn leave(&self) -> anyhow::Result<()>;
    fn local_participant(&self) -> LocalParticipant;
    /// Participants already present when the room was joined.
    fn remote_participants(&self) -> Vec<RemoteParticipant>;
    fn supports_screen_share(&self) -> bool;
    fn subscribe_events(&self) -> broadcast::Receiver<LiveKitRoomEvent>;
}

#[async_trait]
pub trait LiveKitRoomConnector: Send + Sync {
    async fn connect(&self, options: LiveKitRoomOptions)
        -> anyhow::Result<Arc<dyn LiveKitRoomSession>>;
}
