//! Reactive per-channel presence.
//!
//! A [`ChannelPresence`] owns one watcher task that recomputes the merged
//! participant list whenever the snapshot store or the session registry
//! publishes. Each recomputation is published as a whole view, so readers
//! never see a list assembled from both sources. Dropping the scope cancels
//! the watcher.

use serde::Serialize;
use shared::domain::ChannelId;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::{
    merger::{merged_participants, MergedParticipantRecord},
    session_registry::{MediaSessionRegistry, SessionState, TrackFilter},
    snapshot_store::{VoicePresenceSnapshot, VoicePresenceStore},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelPresenceView {
    pub channel_id: ChannelId,
    pub source_is_live: bool,
    pub participants: Vec<MergedParticipantRecord>,
}

impl ChannelPresenceView {
    pub fn compute(
        channel_id: ChannelId,
        snapshot: &VoicePresenceSnapshot,
        session: &SessionState,
        filter: &TrackFilter,
    ) -> Self {
        let participants = merged_participants(channel_id, snapshot, session, filter);
        Self {
            channel_id,
            // A live decision always carries at least one row.
            source_is_live: participants.first().is_some_and(|record| record.is_live),
            participants,
        }
    }
}

/// Observation scope for one channel. Observation ends when this is dropped.
pub struct ChannelPresence {
    channel_id: ChannelId,
    view: watch::Receiver<ChannelPresenceView>,
    _task_cancellation: DropGuard,
}

impl ChannelPresence {
    /// Must be called from within a tokio runtime.
    pub fn observe(
        channel_id: ChannelId,
        store: &VoicePresenceStore,
        registry: &MediaSessionRegistry,
        filter: TrackFilter,
    ) -> Self {
        let mut snapshot_rx = store.subscribe();
        let mut session_rx = registry.subscribe();

        let initial = ChannelPresenceView::compute(
            channel_id,
            &snapshot_rx.borrow_and_update(),
            &session_rx.borrow_and_update(),
            &filter,
        );
        let (view_tx, view) = watch::channel(initial);

        let token = CancellationToken::new();
        let drop_guard = token.clone().drop_guard();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = view_tx.closed() => break,
                    changed = snapshot_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = session_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }

                let next = ChannelPresenceView::compute(
                    channel_id,
                    &snapshot_rx.borrow_and_update(),
                    &session_rx.borrow_and_update(),
                    &filter,
                );
                view_tx.send_if_modified(|view| {
                    if *view == next {
                        return false;
                    }
                    *view = next;
                    true
                });
            }
            debug!("voice presence: stopped observing channel={channel_id}");
        });

        debug!("voice presence: observing channel={channel_id}");
        Self {
            channel_id,
            view,
            _task_cancellation: drop_guard,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn current(&self) -> ChannelPresenceView {
        self.view.borrow().clone()
    }

    /// Waits for the next published view. `None` once observation has stopped.
    pub async fn changed(&mut self) -> Option<ChannelPresenceView> {
        self.view.changed().await.ok()?;
        Some(self.view.borrow_and_update().clone())
    }

    pub fn watch(&self) -> watch::Receiver<ChannelPresenceView> {
        self.view.clone()
    }

    pub fn stream(&self) -> WatchStream<ChannelPresenceView> {
        WatchStream::new(self.view.clone())
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
