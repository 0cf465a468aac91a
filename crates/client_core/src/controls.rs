//! Local voice controls.
//!
//! Toggles never write local state directly. Each one computes the intended
//! end state, queues a set request on the [`MediaSessionRegistry`] and keeps a
//! pending overlay until the registry acknowledges that request. The displayed
//! state is always derived from the registry's latest push plus whatever
//! overlay is still unacknowledged, so a failed request falls back to the
//! authoritative value on its own.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::watch;
use tracing::debug;

use crate::{
    session_registry::{ControlKind, MediaSessionRegistry, RequestTicket, SessionState},
    VoiceSessionSnapshot,
};

/// Supplied by the permission system for the joined channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoicePermissions {
    pub speaking: bool,
    pub listen: bool,
}

impl VoicePermissions {
    pub fn all() -> Self {
        Self {
            speaking: true,
            listen: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalControlState {
    pub microphone_enabled: bool,
    pub deafened: bool,
    pub camera_enabled: bool,
    pub screensharing: bool,
    pub speaking_permission: bool,
    pub listen_permission: bool,
}

impl LocalControlState {
    fn get(&self, kind: ControlKind) -> bool {
        match kind {
            ControlKind::Microphone => self.microphone_enabled,
            ControlKind::Deafen => self.deafened,
            ControlKind::Camera => self.camera_enabled,
            ControlKind::ScreenShare => self.screensharing,
        }
    }

    fn set(&mut self, kind: ControlKind, enabled: bool) {
        match kind {
            ControlKind::Microphone => self.microphone_enabled = enabled,
            ControlKind::Deafen => self.deafened = enabled,
            ControlKind::Camera => self.camera_enabled = enabled,
            ControlKind::ScreenShare => self.screensharing = enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlIntent {
    ToggleMute,
    ToggleDeafen,
    ToggleCamera,
    ToggleScreenshare,
    Disconnect,
}

#[derive(Debug, Clone, Copy)]
struct PendingIntent {
    enabled: bool,
    ticket: RequestTicket,
}

impl PendingIntent {
    fn is_outstanding(&self, kind: ControlKind, session: &SessionState) -> bool {
        session.room().is_some()
            && session.generation() == self.ticket.generation
            && session.acknowledged(kind) < self.ticket.request_id
    }
}

type PendingIntents = HashMap<ControlKind, PendingIntent>;

const CONTROL_KINDS: [ControlKind; 4] = [
    ControlKind::Microphone,
    ControlKind::Deafen,
    ControlKind::Camera,
    ControlKind::ScreenShare,
];

fn derive_state(
    session: &SessionState,
    pending: &PendingIntents,
    permissions: VoicePermissions,
) -> LocalControlState {
    let local = session.local();
    let mut state = LocalControlState {
        microphone_enabled: local.microphone_enabled,
        deafened: local.deafened,
        camera_enabled: local.camera_enabled,
        screensharing: local.screensharing,
        speaking_permission: permissions.speaking,
        listen_permission: permissions.listen,
    };
    for kind in CONTROL_KINDS {
        if let Some(intent) = pending
            .get(&kind)
            .filter(|intent| intent.is_outstanding(kind, session))
        {
            state.set(kind, intent.enabled);
        }
    }
    state
}

pub struct ControlIntentDispatcher {
    registry: Arc<MediaSessionRegistry>,
    permissions: watch::Sender<VoicePermissions>,
    pending: watch::Sender<PendingIntents>,
}

impl ControlIntentDispatcher {
    pub fn new(registry: Arc<MediaSessionRegistry>, permissions: VoicePermissions) -> Self {
        Self {
            registry,
            permissions: watch::Sender::new(permissions),
            pending: watch::Sender::new(HashMap::new()),
        }
    }

    pub fn set_permissions(&self, permissions: VoicePermissions) {
        self.permissions.send_if_modified(|current| {
            let changed = *current != permissions;
            *current = permissions;
            changed
        });
    }

    pub fn permissions(&self) -> VoicePermissions {
        *self.permissions.borrow()
    }

    /// The active session, `None` when not connected.
    pub fn room(&self) -> Option<VoiceSessionSnapshot> {
        self.registry.room()
    }

    pub fn local_control_state(&self) -> LocalControlState {
        derive_state(
            &self.registry.state(),
            &self.pending.borrow(),
            *self.permissions.borrow(),
        )
    }

    pub fn subscribe(&self) -> LocalControlWatcher {
        LocalControlWatcher {
            session: self.registry.subscribe(),
            pending: self.pending.subscribe(),
            permissions: self.permissions.subscribe(),
        }
    }

    pub fn toggle_mute(&self) {
        if !self.permissions().speaking {
            debug!("voice: mute toggle ignored, missing speaking permission");
            return;
        }
        self.toggle(ControlKind::Microphone);
    }

    pub fn toggle_deafen(&self) {
        if !self.permissions().listen {
            debug!("voice: deafen toggle ignored, missing listen permission");
            return;
        }
        self.toggle(ControlKind::Deafen);
    }

    pub fn toggle_camera(&self) {
        self.toggle(ControlKind::Camera);
    }

    pub fn toggle_screenshare(&self) {
        self.toggle(ControlKind::ScreenShare);
    }

    pub fn disconnect(&self) {
        self.pending.send_if_modified(|pending| {
            let changed = !pending.is_empty();
            pending.clear();
            changed
        });
        self.registry.request_disconnect();
    }

    pub fn dispatch(&self, intent: ControlIntent) {
        match intent {
            ControlIntent::ToggleMute => self.toggle_mute(),
            ControlIntent::ToggleDeafen => self.toggle_deafen(),
            ControlIntent::ToggleCamera => self.toggle_camera(),
            ControlIntent::ToggleScreenshare => self.toggle_screenshare(),
            ControlIntent::Disconnect => self.disconnect(),
        }
    }

    /// Flips the displayed value, so a second toggle before the first lands
    /// targets the starting state again.
    fn toggle(&self, kind: ControlKind) {
        let enabled = !self.local_control_state().get(kind);
        let Some(ticket) = self.registry.request_toggle(kind, enabled) else {
            return;
        };

        let session = self.registry.state();
        self.pending.send_modify(|pending| {
            pending.retain(|held, intent| intent.is_outstanding(*held, &session));
            pending.insert(kind, PendingIntent { enabled, ticket });
        });
    }
}

/// Reactive view of [`LocalControlState`].
pub struct LocalControlWatcher {
    session: watch::Receiver<SessionState>,
    pending: watch::Receiver<PendingIntents>,
    permissions: watch::Receiver<VoicePermissions>,
}

impl LocalControlWatcher {
    pub fn current(&mut self) -> LocalControlState {
        derive_state(
            &self.session.borrow_and_update(),
            &self.pending.borrow_and_update(),
            *self.permissions.borrow_and_update(),
        )
    }

    /// Waits for any input to change. `None` once the dispatcher or registry is gone.
    pub async fn changed(&mut self) -> Option<LocalControlState> {
        let alive = tokio::select! {
            changed = self.session.changed() => changed.is_ok(),
            changed = self.pending.changed() => changed.is_ok(),
            changed = self.permissions.changed() => changed.is_ok(),
        };
        alive.then(|| self.current())
    }
}

#[cfg(test)]
#[path = "tests/controls_tests.rs"]
mod tests;
