use serde::Serialize;
use shared::domain::{ChannelId, UserId};

use crate::{
    selector::{select_source, PresenceSource},
    session_registry::{LiveTrack, SessionState, TrackFilter},
    snapshot_store::{VoiceParticipant, VoicePresenceSnapshot},
};

/// One rendered participant row, tagged with the source it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergedParticipantRecord {
    pub user_id: UserId,
    pub speaking: bool,
    pub muted: bool,
    pub deafened: bool,
    pub camera: bool,
    pub screenshare: bool,
    pub is_live: bool,
}

impl From<&VoiceParticipant> for MergedParticipantRecord {
    fn from(participant: &VoiceParticipant) -> Self {
        Self {
            user_id: participant.user_id,
            speaking: false,
            muted: !participant.is_publishing,
            deafened: !participant.is_receiving,
            camera: participant.is_camera,
            screenshare: participant.is_screensharing,
            is_live: false,
        }
    }
}

impl From<&LiveTrack> for MergedParticipantRecord {
    /// Remote deafen state is not carried by the room.
    fn from(track: &LiveTrack) -> Self {
        Self {
            user_id: track.user_id,
            speaking: track.speaking,
            muted: track.muted,
            deafened: false,
            camera: track.camera,
            screenshare: track.screenshare,
            is_live: true,
        }
    }
}

/// Projects exactly one source. Live rows are per visible track, so a user
/// sharing both camera and screen gets two rows.
pub fn merge(source: &PresenceSource, snapshot: &[VoiceParticipant]) -> Vec<MergedParticipantRecord> {
    match source {
        PresenceSource::Snapshot => snapshot.iter().map(MergedParticipantRecord::from).collect(),
        PresenceSource::Live(tracks) => tracks.iter().map(MergedParticipantRecord::from).collect(),
    }
}

pub fn merged_participants(
    channel_id: ChannelId,
    snapshot: &VoicePresenceSnapshot,
    session: &SessionState,
    filter: &TrackFilter,
) -> Vec<MergedParticipantRecord> {
    let source = select_source(channel_id, session, filter);
    match source {
        PresenceSource::Snapshot => merge(&source, &snapshot.voice_participants(channel_id)),
        PresenceSource::Live(_) => merge(&source, &[]),
    }
}

#[cfg(test)]
#[path = "tests/merger_tests.rs"]
mod tests;
