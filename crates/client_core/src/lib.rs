use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use livekit_integration::{LiveKitRoomConnector, LiveKitRoomOptions, LiveKitRoomSession};
use shared::{
    domain::{ChannelId, GuildId},
    protocol::{ClientRequest, ServerEvent},
};

pub mod config;
pub mod controls;
pub mod error;
pub mod merger;
pub mod presence;
pub mod presentation;
pub mod selector;
pub mod session_registry;
pub mod snapshot_store;

pub use config::PresenceSettings;
pub use controls::{
    ControlIntent, ControlIntentDispatcher, LocalControlState, LocalControlWatcher, VoicePermissions,
};
pub use error::{SettingsError, VoiceSessionError};
pub use merger::{merged_participants, MergedParticipantRecord};
pub use presence::{ChannelPresence, ChannelPresenceView};
pub use presentation::{channel_preview, control_bar, ChannelPreview, ControlBarView};
pub use selector::{select_source, PresenceSource};
pub use session_registry::{
    ControlKind, LiveTrack, LocalMediaState, MediaSessionRegistry, RequestTicket, SessionParticipant,
    SessionState, TrackFilter,
};
pub use snapshot_store::{VoiceParticipant, VoicePresenceSnapshot, VoicePresenceStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSessionSnapshot {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub room_name: String,
}

#[derive(Debug, Clone)]
pub struct VoiceConnectOptions {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub can_publish_mic: bool,
    pub can_publish_screen: bool,
}

#[async_trait]
pub trait LiveKitControlPlane: Send + Sync {
    async fn request_livekit_token(&self, request: ClientRequest) -> Result<ServerEvent>;
}

pub struct MissingLiveKitControlPlane;

#[async_trait]
impl LiveKitControlPlane for MissingLiveKitControlPlane {
    async fn request_livekit_token(&self, _request: ClientRequest) -> Result<ServerEvent> {
        Err(anyhow!("livekit control plane is unavailable"))
    }
}

#[async_trait]
pub trait LiveKitConnectorProvider: Send + Sync {
    async fn connect_room(
        &self,
        options: LiveKitRoomOptions,
    ) -> Result<Arc<dyn LiveKitRoomSession>>;
}

pub struct MissingLiveKitConnector;

#[async_trait]
impl LiveKitConnectorProvider for MissingLiveKitConnector {
    async fn connect_room(
        &self,
        _options: LiveKitRoomOptions,
    ) -> Result<Arc<dyn LiveKitRoomSession>> {
        Err(anyhow!("livekit connector is unavailable"))
    }
}

#[async_trait]
impl<T> LiveKitConnectorProvider for T
where
    T: LiveKitRoomConnector,
{
    async fn connect_room(
        &self,
        options: LiveKitRoomOptions,
    ) -> Result<Arc<dyn LiveKitRoomSession>> {
        self.connect(options).await
    }
}

/// Wires the two presence sources, the control dispatcher and settings
/// together for one signed-in user.
pub struct VoicePresenceClient {
    settings: PresenceSettings,
    store: VoicePresenceStore,
    registry: Arc<MediaSessionRegistry>,
    controls: ControlIntentDispatcher,
}

impl VoicePresenceClient {
    pub fn new(settings: PresenceSettings, permissions: VoicePermissions) -> Self {
        Self::new_with_dependencies(
            settings,
            permissions,
            Arc::new(MissingLiveKitControlPlane),
            Arc::new(MissingLiveKitConnector),
        )
    }

    pub fn new_with_dependencies(
        settings: PresenceSettings,
        permissions: VoicePermissions,
        livekit_control_plane: Arc<dyn LiveKitControlPlane>,
        livekit_connector: Arc<dyn LiveKitConnectorProvider>,
    ) -> Self {
        let registry = MediaSessionRegistry::new(livekit_control_plane, livekit_connector);
        let controls = ControlIntentDispatcher::new(Arc::clone(&registry), permissions);
        Self {
            settings,
            store: VoicePresenceStore::new(),
            registry,
            controls,
        }
    }

    pub fn settings(&self) -> &PresenceSettings {
        &self.settings
    }

    pub fn store(&self) -> &VoicePresenceStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<MediaSessionRegistry> {
        &self.registry
    }

    pub fn controls(&self) -> &ControlIntentDispatcher {
        &self.controls
    }

    pub fn handle_server_event(&self, event: &ServerEvent) {
        self.store.apply_server_event(event);
    }

    pub async fn connect_voice_session(&self, options: VoiceConnectOptions) -> Result<()> {
        self.registry.connect(options).await
    }

    /// Starts observing one channel; observation stops when the returned scope is dropped.
    pub fn observe_channel(&self, channel_id: ChannelId) -> ChannelPresence {
        ChannelPresence::observe(
            channel_id,
            &self.store,
            &self.registry,
            self.settings.track_filter(),
        )
    }

    pub fn merged_participants(&self, channel_id: ChannelId) -> Vec<MergedParticipantRecord> {
        merged_participants(
            channel_id,
            &self.store.snapshot(),
            &self.registry.state(),
            &self.settings.track_filter(),
        )
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
