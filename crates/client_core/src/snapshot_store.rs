//! Event-fed voice membership for every channel, independent of any media session.

use std::{collections::HashMap, sync::Arc};

use indexmap::IndexMap;
use shared::{
    domain::{ChannelId, UserId},
    protocol::{ServerEvent, VoiceParticipantPayload},
};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceParticipant {
    pub user_id: UserId,
    pub is_publishing: bool,
    pub is_receiving: bool,
    pub is_camera: bool,
    pub is_screensharing: bool,
}

impl From<&VoiceParticipantPayload> for VoiceParticipant {
    fn from(payload: &VoiceParticipantPayload) -> Self {
        Self {
            user_id: payload.user_id,
            is_publishing: payload.is_publishing,
            is_receiving: payload.is_receiving,
            is_camera: payload.is_camera,
            is_screensharing: payload.is_screensharing,
        }
    }
}

/// Participants of one channel in the order they were first seen.
pub type ChannelParticipants = IndexMap<UserId, VoiceParticipant>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoicePresenceSnapshot {
    channels: HashMap<ChannelId, ChannelParticipants>,
}

impl VoicePresenceSnapshot {
    pub fn participants(&self, channel_id: ChannelId) -> Option<&ChannelParticipants> {
        self.channels.get(&channel_id)
    }

    pub fn voice_participants(&self, channel_id: ChannelId) -> Vec<VoiceParticipant> {
        self.participants(channel_id)
            .map(|participants| participants.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.keys().copied()
    }

    /// Returns whether the snapshot changed.
    fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::VoiceStateSynced { channels } => {
                self.channels = channels
                    .iter()
                    .map(|channel| {
                        let participants = channel
                            .participants
                            .iter()
                            .map(|p| (p.user_id, VoiceParticipant::from(p)))
                            .collect::<ChannelParticipants>();
                        (channel.channel_id, participants)
                    })
                    .collect();
                true
            }
            ServerEvent::VoiceParticipantJoined {
                channel_id,
                participant,
            }
            | ServerEvent::VoiceParticipantUpdated {
                channel_id,
                participant,
            } => {
                let next = VoiceParticipant::from(participant);
                let participants = self.channels.entry(*channel_id).or_default();
                // Existing entries keep their slot; new ones go last.
                participants.insert(next.user_id, next) != Some(next)
            }
            ServerEvent::VoiceParticipantLeft {
                channel_id,
                user_id,
            } => self
                .channels
                .get_mut(channel_id)
                .and_then(|participants| participants.shift_remove(user_id))
                .is_some(),
            ServerEvent::ChannelDeleted { channel_id } => {
                self.channels.remove(channel_id).is_some()
            }
            ServerEvent::ChannelUpdated { .. }
            | ServerEvent::LiveKitTokenIssued { .. }
            | ServerEvent::Error(_) => false,
        }
    }
}

/// Read model of voice membership, updated only by server events.
#[derive(Debug, Clone)]
pub struct VoicePresenceStore {
    state: Arc<watch::Sender<VoicePresenceSnapshot>>,
}

impl Default for VoicePresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VoicePresenceStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(VoicePresenceSnapshot::default());
        Self {
            state: Arc::new(state),
        }
    }

    pub fn apply_server_event(&self, event: &ServerEvent) {
        if let ServerEvent::Error(error) = event {
            warn!(
                "voice presence: server error code={} message={}",
                error.code, error.message
            );
            return;
        }

        let changed = self.state.send_if_modified(|snapshot| snapshot.apply(event));
        if changed {
            debug!("voice presence: snapshot updated event={}", event_name(event));
        }
    }

    pub fn voice_participants(&self, channel_id: ChannelId) -> Vec<VoiceParticipant> {
        self.state.borrow().voice_participants(channel_id)
    }

    pub fn snapshot(&self) -> VoicePresenceSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VoicePresenceSnapshot> {
        self.state.subscribe()
    }
}

fn event_name(event: &ServerEvent) -> &'static str {
    match event {
        ServerEvent::ChannelUpdated { .. } => "channel_updated",
        ServerEvent::ChannelDeleted { .. } => "channel_deleted",
        ServerEvent::VoiceStateSynced { .. } => "voice_state_synced",
        ServerEvent::VoiceParticipantJoined { .. } => "voice_participant_joined",
        ServerEvent::VoiceParticipantUpdated { .. } => "voice_participant_updated",
        ServerEvent::VoiceParticipantLeft { .. } => "voice_participant_left",
        ServerEvent::LiveKitTokenIssued { .. } => "live_kit_token_issued",
        ServerEvent::Error(_) => "error",
    }
}

#[cfg(test)]
#[path = "tests/snapshot_store_tests.rs"]
mod tests;
