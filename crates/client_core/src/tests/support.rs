//! In-memory LiveKit doubles shared by the client_core tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use livekit_integration::{
    LiveKitRoomEvent, LiveKitRoomOptions, LiveKitRoomSession, LocalParticipant,
    RemoteParticipant, TrackInfo, TrackSource,
};
use shared::{
    domain::{ChannelId, GuildId, UserId},
    protocol::{ClientRequest, ServerEvent},
};
use tokio::sync::{broadcast, watch, Semaphore};

use crate::{
    session_registry::{MediaSessionRegistry, SessionState},
    LiveKitConnectorProvider, LiveKitControlPlane, VoiceConnectOptions,
};

pub(crate) const LOCAL_USER: i64 = 1;
pub(crate) const GUILD: GuildId = GuildId(11);
pub(crate) const CHANNEL: ChannelId = ChannelId(13);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockCall {
    Track(TrackSource, bool),
    Deafen(bool),
}

pub(crate) struct MockRoom {
    pub events_tx: broadcast::Sender<LiveKitRoomEvent>,
    pub roster: Mutex<Vec<RemoteParticipant>>,
    pub supports_screen: bool,
    pub calls: Mutex<Vec<MockCall>>,
    pub fail_with: Mutex<Option<String>>,
    pub leave_calls: Mutex<u32>,
    /// When set, every request waits for a permit before completing.
    pub gate: Option<Arc<Semaphore>>,
}

impl MockRoom {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_roster(Vec::new())
    }

    pub(crate) fn with_roster(roster: Vec<RemoteParticipant>) -> Arc<Self> {
        Arc::new(Self {
            events_tx: broadcast::channel(64).0,
            roster: Mutex::new(roster),
            supports_screen: true,
            calls: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
            leave_calls: Mutex::new(0),
            gate: None,
        })
    }

    pub(crate) fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            events_tx: broadcast::channel(64).0,
            roster: Mutex::new(Vec::new()),
            supports_screen: true,
            calls: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
            leave_calls: Mutex::new(0),
            gate: Some(gate),
        })
    }

    pub(crate) fn emit(&self, event: LiveKitRoomEvent) {
        self.events_tx.send(event).expect("room has subscribers");
    }

    pub(crate) fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn fail_requests(&self, reason: &str) {
        *self.fail_with.lock().unwrap() = Some(reason.to_string());
    }

    async fn record(&self, call: MockCall) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        self.calls.lock().unwrap().push(call);
        match self.fail_with.lock().unwrap().clone() {
            Some(reason) => Err(anyhow!(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LiveKitRoomSession for MockRoom {
    async fn set_local_track_enabled(&self, source: TrackSource, enabled: bool) -> Result<()> {
        self.record(MockCall::Track(source, enabled)).await
    }

    async fn set_deafened(&self, deafened: bool) -> Result<()> {
        self.record(MockCall::Deafen(deafened)).await
    }

    async fn leave(&self) -> Result<()> {
        *self.leave_calls.lock().unwrap() += 1;
        Ok(())
    }

    fn local_participant(&self) -> LocalParticipant {
        LocalParticipant {
            participant_id: "local".to_string(),
            identity: UserId(LOCAL_USER).livekit_identity(),
        }
    }

    fn remote_participants(&self) -> Vec<RemoteParticipant> {
        self.roster.lock().unwrap().clone()
    }

    fn supports_screen_share(&self) -> bool {
        self.supports_screen
    }

    fn subscribe_events(&self) -> broadcast::Receiver<LiveKitRoomEvent> {
        self.events_tx.subscribe()
    }
}

pub(crate) struct MockLiveKitControlPlane {
    pub event: ServerEvent,
}

impl MockLiveKitControlPlane {
    pub(crate) fn issuing(guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self {
            event: ServerEvent::LiveKitTokenIssued {
                guild_id,
                channel_id,
                room_name: format!("g:{}:c:{}", guild_id.0, channel_id.0),
                token: "token-abc".to_string(),
            },
        }
    }
}

#[async_trait]
impl LiveKitControlPlane for MockLiveKitControlPlane {
    async fn request_livekit_token(&self, request: ClientRequest) -> Result<ServerEvent> {
        match request {
            ClientRequest::RequestLiveKitToken { .. } => Ok(self.event.clone()),
        }
    }
}

pub(crate) struct MockLiveKitConnector {
    pub room: Arc<MockRoom>,
    pub options_seen: Mutex<Vec<LiveKitRoomOptions>>,
}

impl MockLiveKitConnector {
    pub(crate) fn new(room: Arc<MockRoom>) -> Self {
        Self {
            room,
            options_seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LiveKitConnectorProvider for MockLiveKitConnector {
    async fn connect_room(
        &self,
        options: LiveKitRoomOptions,
    ) -> Result<Arc<dyn LiveKitRoomSession>> {
        self.options_seen.lock().unwrap().push(options);
        Ok(self.room.clone())
    }
}

pub(crate) fn registry_for(room: Arc<MockRoom>) -> Arc<MediaSessionRegistry> {
    MediaSessionRegistry::new(
        Arc::new(MockLiveKitControlPlane::issuing(GUILD, CHANNEL)),
        Arc::new(MockLiveKitConnector::new(room)),
    )
}

pub(crate) fn connect_options(can_publish_mic: bool) -> VoiceConnectOptions {
    VoiceConnectOptions {
        guild_id: GUILD,
        channel_id: CHANNEL,
        can_publish_mic,
        can_publish_screen: false,
    }
}

pub(crate) async fn connected_registry(room: Arc<MockRoom>) -> Arc<MediaSessionRegistry> {
    let registry = registry_for(room);
    registry
        .connect(connect_options(false))
        .await
        .expect("connect");
    registry
}

pub(crate) fn remote(participant_id: &str, user_id: i64, tracks: Vec<TrackInfo>) -> RemoteParticipant {
    RemoteParticipant {
        participant_id: participant_id.to_string(),
        identity: UserId(user_id).livekit_identity(),
        tracks,
    }
}

pub(crate) fn camera(sid: &str, subscribed: bool) -> TrackInfo {
    TrackInfo {
        sid: sid.to_string(),
        source: TrackSource::Camera,
        subscribed,
        muted: false,
    }
}

pub(crate) fn microphone(sid: &str, muted: bool) -> TrackInfo {
    TrackInfo {
        sid: sid.to_string(),
        source: TrackSource::Microphone,
        subscribed: true,
        muted,
    }
}

pub(crate) fn screen_share(sid: &str) -> TrackInfo {
    TrackInfo {
        sid: sid.to_string(),
        source: TrackSource::ScreenShare,
        subscribed: true,
        muted: false,
    }
}

pub(crate) async fn wait_for_state(
    rx: &mut watch::Receiver<SessionState>,
    predicate: impl FnMut(&SessionState) -> bool,
) -> SessionState {
    tokio::time::timeout(Duration::from_secs(1), rx.wait_for(predicate))
        .await
        .expect("state timeout")
        .expect("registry alive")
        .clone()
}
