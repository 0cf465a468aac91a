//! Chooses which presence source is authoritative for a channel.

use shared::domain::ChannelId;

use crate::session_registry::{LiveTrack, SessionState, TrackFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceSource {
    Snapshot,
    /// The visible live tracks the decision was made on.
    Live(Vec<LiveTrack>),
}

impl PresenceSource {
    pub fn is_live(&self) -> bool {
        matches!(self, PresenceSource::Live(_))
    }
}

/// Live only when joined to `channel_id` and at least one track passes `filter`.
///
/// A joined session with nothing visible yet falls back to the snapshot, so the
/// rendered list never drops to empty while the transport is still surfacing tracks.
pub fn select_source(
    channel_id: ChannelId,
    session: &SessionState,
    filter: &TrackFilter,
) -> PresenceSource {
    if !session.is_joined(channel_id) {
        return PresenceSource::Snapshot;
    }

    let live = session.live_participants(channel_id, filter);
    if live.is_empty() {
        PresenceSource::Snapshot
    } else {
        PresenceSource::Live(live)
    }
}
