//! Live media session state for the channel the local user has joined.
//!
//! The registry owns the active LiveKit room. Room events are folded into a
//! [`SessionState`] cell that presence observers and the control dispatcher
//! read. Local media changes are requested through a per-session command
//! queue that applies requests strictly in order, so two requests for the
//! same control never race each other at the transport.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use livekit_integration::{
    LiveKitRoomEvent, LiveKitRoomOptions, LiveKitRoomSession, RemoteParticipant, TrackInfo,
    TrackSource,
};
use shared::{
    domain::{ChannelId, UserId},
    protocol::{ClientRequest, ServerEvent},
};
use tokio::{
    runtime::Handle,
    sync::{broadcast::error::RecvError, mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::VoiceSessionError, LiveKitConnectorProvider, LiveKitControlPlane, VoiceConnectOptions,
    VoiceSessionSnapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Microphone,
    Deafen,
    Camera,
    ScreenShare,
}

impl ControlKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlKind::Microphone => "microphone",
            ControlKind::Deafen => "deafen",
            ControlKind::Camera => "camera",
            ControlKind::ScreenShare => "screen_share",
        }
    }

    fn for_track(source: TrackSource) -> Self {
        match source {
            TrackSource::Microphone => ControlKind::Microphone,
            TrackSource::Camera => ControlKind::Camera,
            TrackSource::ScreenShare => ControlKind::ScreenShare,
        }
    }
}

/// Authoritative media state of the local participant as last reported by the room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalMediaState {
    pub microphone_enabled: bool,
    pub deafened: bool,
    pub camera_enabled: bool,
    pub screensharing: bool,
}

impl LocalMediaState {
    pub fn get(&self, kind: ControlKind) -> bool {
        match kind {
            ControlKind::Microphone => self.microphone_enabled,
            ControlKind::Deafen => self.deafened,
            ControlKind::Camera => self.camera_enabled,
            ControlKind::ScreenShare => self.screensharing,
        }
    }

    pub fn set(&mut self, kind: ControlKind, enabled: bool) {
        match kind {
            ControlKind::Microphone => self.microphone_enabled = enabled,
            ControlKind::Deafen => self.deafened = enabled,
            ControlKind::Camera => self.camera_enabled = enabled,
            ControlKind::ScreenShare => self.screensharing = enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParticipant {
    pub participant_id: String,
    pub identity: String,
    pub speaking: bool,
    pub tracks: Vec<TrackInfo>,
}

impl SessionParticipant {
    fn from_remote(remote: RemoteParticipant) -> Self {
        if UserId::from_livekit_identity(&remote.identity).is_none() {
            warn!(
                "voice: participant identity is not a user id participant={} identity={}",
                remote.participant_id, remote.identity
            );
        }
        Self {
            participant_id: remote.participant_id,
            identity: remote.identity,
            speaking: false,
            tracks: remote.tracks,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        UserId::from_livekit_identity(&self.identity)
    }

    /// Muted unless an unmuted microphone track is published.
    pub fn muted(&self) -> bool {
        !self
            .tracks
            .iter()
            .any(|track| track.source == TrackSource::Microphone && !track.muted)
    }

    pub fn has_track(&self, source: TrackSource) -> bool {
        self.tracks.iter().any(|track| track.source == source)
    }

    fn track_mut(&mut self, track_sid: &str) -> Option<&mut TrackInfo> {
        self.tracks.iter_mut().find(|track| track.sid == track_sid)
    }
}

/// One visible track in the live session, the unit the live path renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTrack {
    pub user_id: UserId,
    pub participant_id: String,
    pub track_sid: String,
    pub source: TrackSource,
    pub speaking: bool,
    pub muted: bool,
    pub camera: bool,
    pub screenshare: bool,
}

/// Which tracks make a live participant visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFilter {
    pub sources: Vec<TrackSource>,
    pub only_subscribed: bool,
}

impl Default for TrackFilter {
    /// Subscribed camera tracks.
    fn default() -> Self {
        Self {
            sources: vec![TrackSource::Camera],
            only_subscribed: true,
        }
    }
}

impl TrackFilter {
    pub fn matches(&self, track: &TrackInfo) -> bool {
        self.sources.contains(&track.source) && (track.subscribed || !self.only_subscribed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    generation: u64,
    room: Option<VoiceSessionSnapshot>,
    local: LocalMediaState,
    local_participant: Option<SessionParticipant>,
    remote: IndexMap<String, SessionParticipant>,
    acknowledged: HashMap<ControlKind, u64>,
}

impl SessionState {
    /// Incremented for every connected session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn room(&self) -> Option<&VoiceSessionSnapshot> {
        self.room.as_ref()
    }

    pub fn is_joined(&self, channel_id: ChannelId) -> bool {
        self.room
            .as_ref()
            .is_some_and(|room| room.channel_id == channel_id)
    }

    pub fn local(&self) -> LocalMediaState {
        self.local
    }

    /// Highest request id the transport has answered for `kind`, successfully or not.
    pub fn acknowledged(&self, kind: ControlKind) -> u64 {
        self.acknowledged.get(&kind).copied().unwrap_or_default()
    }

    /// Session participants in enumeration order, local participant first.
    pub fn participants(&self) -> Vec<SessionParticipant> {
        let local = self.local_participant.as_ref().map(|local| {
            let mut local = local.clone();
            local.tracks = local_tracks(&self.local);
            local
        });
        local
            .into_iter()
            .chain(self.remote.values().cloned())
            .collect()
    }

    /// Visible tracks for `channel_id`; empty unless the local user is joined there.
    pub fn live_participants(&self, channel_id: ChannelId, filter: &TrackFilter) -> Vec<LiveTrack> {
        if !self.is_joined(channel_id) {
            return Vec::new();
        }

        let mut live = Vec::new();
        for participant in self.participants() {
            let Some(user_id) = participant.user_id() else {
                continue;
            };
            let muted = participant.muted();
            let camera = participant.has_track(TrackSource::Camera);
            let screenshare = participant.has_track(TrackSource::ScreenShare);
            for track in participant.tracks.iter().filter(|track| filter.matches(track)) {
                live.push(LiveTrack {
                    user_id,
                    participant_id: participant.participant_id.clone(),
                    track_sid: track.sid.clone(),
                    source: track.source,
                    speaking: participant.speaking,
                    muted,
                    camera,
                    screenshare,
                });
            }
        }
        live
    }

    fn participant_mut(&mut self, participant_id: &str) -> Option<&mut SessionParticipant> {
        if let Some(local) = self
            .local_participant
            .as_mut()
            .filter(|local| local.participant_id == participant_id)
        {
            return Some(local);
        }
        self.remote.get_mut(participant_id)
    }

    /// Folds one room event into the state. Returns whether anything changed.
    fn apply_room_event(&mut self, event: LiveKitRoomEvent) -> bool {
        match event {
            LiveKitRoomEvent::ParticipantJoined(participant) => {
                let participant = SessionParticipant::from_remote(participant);
                self.remote
                    .insert(participant.participant_id.clone(), participant);
                true
            }
            LiveKitRoomEvent::ParticipantLeft { participant_id } => {
                self.remote.shift_remove(&participant_id).is_some()
            }
            LiveKitRoomEvent::TrackPublished {
                participant_id,
                track,
            } => {
                let Some(participant) = self.remote.get_mut(&participant_id) else {
                    return false;
                };
                match participant.track_mut(&track.sid) {
                    Some(existing) => *existing = track,
                    None => participant.tracks.push(track),
                }
                true
            }
            LiveKitRoomEvent::TrackUnpublished {
                participant_id,
                track_sid,
            } => {
                let Some(participant) = self.remote.get_mut(&participant_id) else {
                    return false;
                };
                let before = participant.tracks.len();
                participant.tracks.retain(|track| track.sid != track_sid);
                participant.tracks.len() != before
            }
            LiveKitRoomEvent::TrackSubscribed {
                participant_id,
                track_sid,
            } => self.update_track(&participant_id, &track_sid, |track| {
                track.subscribed = true
            }),
            LiveKitRoomEvent::TrackUnsubscribed {
                participant_id,
                track_sid,
            } => self.update_track(&participant_id, &track_sid, |track| {
                track.subscribed = false
            }),
            LiveKitRoomEvent::TrackMuted {
                participant_id,
                track_sid,
            } => self.update_track(&participant_id, &track_sid, |track| track.muted = true),
            LiveKitRoomEvent::TrackUnmuted {
                participant_id,
                track_sid,
            } => self.update_track(&participant_id, &track_sid, |track| track.muted = false),
            LiveKitRoomEvent::ActiveSpeakersChanged { participant_ids } => {
                let mut changed = false;
                let local = self.local_participant.iter_mut();
                for participant in local.chain(self.remote.values_mut()) {
                    let speaking = participant_ids.contains(&participant.participant_id);
                    changed |= participant.speaking != speaking;
                    participant.speaking = speaking;
                }
                changed
            }
            LiveKitRoomEvent::LocalTrackChanged { source, enabled } => {
                let kind = ControlKind::for_track(source);
                let changed = self.local.get(kind) != enabled;
                self.local.set(kind, enabled);
                changed
            }
            LiveKitRoomEvent::LocalDeafenChanged { deafened } => {
                let changed = self.local.deafened != deafened;
                self.local.deafened = deafened;
                changed
            }
            // Handled by the event loop, which also drops the session.
            LiveKitRoomEvent::Disconnected { .. } => false,
        }
    }

    fn update_track(
        &mut self,
        participant_id: &str,
        track_sid: &str,
        update: impl FnOnce(&mut TrackInfo),
    ) -> bool {
        let Some(track) = self
            .participant_mut(participant_id)
            .and_then(|participant| participant.track_mut(track_sid))
        else {
            return false;
        };
        let before = track.clone();
        update(track);
        *track != before
    }

    /// Replaces the remote roster. Speaking flags carry over for participants still present.
    fn reset_remote(&mut self, remote: Vec<RemoteParticipant>) {
        let previous = std::mem::take(&mut self.remote);
        self.remote = remote
            .into_iter()
            .map(|participant| {
                let mut participant = SessionParticipant::from_remote(participant);
                participant.speaking = previous
                    .get(&participant.participant_id)
                    .is_some_and(|known| known.speaking);
                (participant.participant_id.clone(), participant)
            })
            .collect();
    }
}

/// The local participant's own tracks always count as subscribed.
fn local_tracks(local: &LocalMediaState) -> Vec<TrackInfo> {
    let mut tracks = vec![TrackInfo {
        sid: "local-microphone".into(),
        source: TrackSource::Microphone,
        subscribed: true,
        muted: !local.microphone_enabled,
    }];
    if local.camera_enabled {
        tracks.push(TrackInfo {
            sid: "local-camera".into(),
            source: TrackSource::Camera,
            subscribed: true,
            muted: false,
        });
    }
    if local.screensharing {
        tracks.push(TrackInfo {
            sid: "local-screen-share".into(),
            source: TrackSource::ScreenShare,
            subscribed: true,
            muted: false,
        });
    }
    tracks
}

/// Identifies an accepted control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    pub generation: u64,
    pub request_id: u64,
}

#[derive(Debug)]
struct SessionCommand {
    kind: ControlKind,
    enabled: bool,
    request_id: u64,
}

struct ActiveVoiceSession {
    generation: u64,
    snapshot: VoiceSessionSnapshot,
    room: Arc<dyn LiveKitRoomSession>,
    runtime: Handle,
    commands: mpsc::UnboundedSender<SessionCommand>,
    event_task: JoinHandle<()>,
    command_task: JoinHandle<()>,
}

impl ActiveVoiceSession {
    fn abort_tasks(&self) {
        self.command_task.abort();
        self.event_task.abort();
    }

    async fn leave(self) {
        self.abort_tasks();
        if let Err(err) = self.room.leave().await {
            warn!(
                "voice: leave failed room={} channel={}: {err}",
                self.snapshot.room_name, self.snapshot.channel_id
            );
        } else {
            info!(
                "voice: disconnected room={} channel={}",
                self.snapshot.room_name, self.snapshot.channel_id
            );
        }
    }
}

type SharedActive = Arc<Mutex<Option<ActiveVoiceSession>>>;

fn lock_active(active: &Mutex<Option<ActiveVoiceSession>>) -> MutexGuard<'_, Option<ActiveVoiceSession>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of the live session for the local user.
pub struct MediaSessionRegistry {
    livekit_control_plane: Arc<dyn LiveKitControlPlane>,
    livekit_connector: Arc<dyn LiveKitConnectorProvider>,
    state: Arc<watch::Sender<SessionState>>,
    active: SharedActive,
    next_generation: AtomicU64,
    next_request_id: AtomicU64,
}

impl MediaSessionRegistry {
    pub fn new(
        livekit_control_plane: Arc<dyn LiveKitControlPlane>,
        livekit_connector: Arc<dyn LiveKitConnectorProvider>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::default());
        Arc::new(Self {
            livekit_control_plane,
            livekit_connector,
            state: Arc::new(state),
            active: Arc::new(Mutex::new(None)),
            next_generation: AtomicU64::new(0),
            next_request_id: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn room(&self) -> Option<VoiceSessionSnapshot> {
        self.state.borrow().room.clone()
    }

    pub fn is_joined(&self, channel_id: ChannelId) -> bool {
        self.state.borrow().is_joined(channel_id)
    }

    pub fn live_participants(&self, channel_id: ChannelId, filter: &TrackFilter) -> Vec<LiveTrack> {
        self.state.borrow().live_participants(channel_id, filter)
    }

    /// Joins the channel's media room, replacing any previous session.
    pub async fn connect(&self, options: VoiceConnectOptions) -> Result<()> {
        let request = ClientRequest::RequestLiveKitToken {
            guild_id: options.guild_id,
            channel_id: options.channel_id,
            can_publish_mic: options.can_publish_mic,
            can_publish_screen: options.can_publish_screen,
        };

        let event = self
            .livekit_control_plane
            .request_livekit_token(request)
            .await
            .map_err(|err| VoiceSessionError::TokenRequest(err.to_string()))?;

        let (guild_id, channel_id, room_name, token) = match event {
            ServerEvent::LiveKitTokenIssued {
                guild_id,
                channel_id,
                room_name,
                token,
            } => (guild_id, channel_id, room_name, token),
            _ => return Err(VoiceSessionError::UnexpectedTokenResponse.into()),
        };

        if guild_id != options.guild_id || channel_id != options.channel_id {
            return Err(VoiceSessionError::TokenChannelMismatch.into());
        }

        let room = self
            .livekit_connector
            .connect_room(LiveKitRoomOptions {
                room_name: room_name.clone(),
                token,
            })
            .await
            .map_err(|err| VoiceSessionError::Connect(err.to_string()))?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = VoiceSessionSnapshot {
            guild_id,
            channel_id,
            room_name: room_name.clone(),
        };

        // Subscribe before reading the roster. Events buffered in between are
        // replayed onto the roster once the loop starts.
        let events = room.subscribe_events();
        let local = room.local_participant();
        let mut initial = SessionState {
            generation,
            room: Some(snapshot.clone()),
            local: LocalMediaState::default(),
            local_participant: Some(SessionParticipant {
                participant_id: local.participant_id,
                identity: local.identity,
                speaking: false,
                tracks: Vec::new(),
            }),
            remote: IndexMap::new(),
            acknowledged: HashMap::new(),
        };
        initial.reset_remote(room.remote_participants());

        let (commands, command_rx) = mpsc::unbounded_channel();
        let previous = {
            let mut active = lock_active(&self.active);
            // Published before the tasks start; both drop updates for other generations.
            self.state.send_replace(initial);
            let command_task = tokio::spawn(run_command_worker(
                generation,
                Arc::clone(&room),
                command_rx,
                Arc::clone(&self.state),
            ));
            let event_task = tokio::spawn(run_event_loop(
                generation,
                Arc::clone(&room),
                events,
                Arc::clone(&self.state),
                Arc::clone(&self.active),
            ));
            active.replace(ActiveVoiceSession {
                generation,
                snapshot,
                room,
                runtime: Handle::current(),
                commands,
                event_task,
                command_task,
            })
        };
        if let Some(previous) = previous {
            tokio::spawn(previous.leave());
        }

        info!(
            "voice: connected room={} guild={} channel={}",
            room_name, guild_id, channel_id
        );

        if options.can_publish_mic {
            self.request_toggle(ControlKind::Microphone, true);
        }

        Ok(())
    }

    /// Queues a request to set `kind` to `enabled`. Returns `None` without a session.
    pub fn request_toggle(&self, kind: ControlKind, enabled: bool) -> Option<RequestTicket> {
        let active = lock_active(&self.active);
        let Some(session) = active.as_ref() else {
            debug!("voice: no active session, dropping {} request", kind.as_str());
            return None;
        };

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let command = SessionCommand {
            kind,
            enabled,
            request_id,
        };
        if session.commands.send(command).is_err() {
            warn!("voice: command worker stopped, dropping {} request", kind.as_str());
            return None;
        }

        debug!(
            "voice: queued {} request enabled={} request={}",
            kind.as_str(),
            enabled,
            request_id
        );
        Some(RequestTicket {
            generation: session.generation,
            request_id,
        })
    }

    /// Drops the session immediately and leaves the room in the background.
    pub fn request_disconnect(&self) {
        match self.take_active() {
            Some(active) => {
                let runtime = active.runtime.clone();
                runtime.spawn(active.leave());
            }
            None => debug!("voice: disconnect requested without an active session"),
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        if let Some(active) = self.take_active() {
            active.leave().await;
        }
        Ok(())
    }

    fn take_active(&self) -> Option<ActiveVoiceSession> {
        let mut active = lock_active(&self.active);
        let taken = active.take()?;
        reset_session(&self.state, taken.generation);
        Some(taken)
    }
}

impl Drop for MediaSessionRegistry {
    fn drop(&mut self) {
        if let Some(active) = lock_active(&self.active).take() {
            active.abort_tasks();
        }
    }
}

fn reset_session(state: &watch::Sender<SessionState>, generation: u64) {
    state.send_if_modified(|state| {
        if state.generation != generation {
            return false;
        }
        *state = SessionState {
            generation,
            ..SessionState::default()
        };
        true
    });
}

async fn run_event_loop(
    generation: u64,
    room: Arc<dyn LiveKitRoomSession>,
    mut events: tokio::sync::broadcast::Receiver<LiveKitRoomEvent>,
    state: Arc<watch::Sender<SessionState>>,
    active: SharedActive,
) {
    loop {
        match events.recv().await {
            Ok(LiveKitRoomEvent::Disconnected { reason }) => {
                warn!("voice: room dropped the session reason={reason}");
                let dropped = {
                    let mut active = lock_active(&active);
                    match active.as_ref() {
                        Some(session) if session.generation == generation => active.take(),
                        _ => None,
                    }
                };
                if let Some(dropped) = dropped {
                    dropped.command_task.abort();
                }
                reset_session(&state, generation);
                break;
            }
            Ok(event) => {
                state.send_if_modified(|state| {
                    state.generation == generation && state.apply_room_event(event)
                });
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("voice: room events lagged skipped={skipped}, resyncing roster");
                let roster = room.remote_participants();
                state.send_if_modified(|state| {
                    if state.generation != generation {
                        return false;
                    }
                    state.reset_remote(roster);
                    true
                });
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn run_command_worker(
    generation: u64,
    room: Arc<dyn LiveKitRoomSession>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    state: Arc<watch::Sender<SessionState>>,
) {
    while let Some(first) = commands.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = commands.try_recv() {
            batch.push(next);
        }

        for command in coalesce(batch) {
            apply_command(generation, room.as_ref(), &state, command).await;
        }
    }
}

/// Keeps only the latest queued request per control, in first-seen order.
fn coalesce(batch: Vec<SessionCommand>) -> Vec<SessionCommand> {
    let mut latest = IndexMap::new();
    for command in batch {
        latest.insert(command.kind, command);
    }
    latest.into_values().collect()
}

async fn apply_command(
    generation: u64,
    room: &dyn LiveKitRoomSession,
    state: &watch::Sender<SessionState>,
    command: SessionCommand,
) {
    let SessionCommand {
        kind,
        enabled,
        request_id,
    } = command;

    let result = match kind {
        ControlKind::Deafen => room.set_deafened(enabled).await,
        ControlKind::Microphone => {
            room.set_local_track_enabled(TrackSource::Microphone, enabled)
                .await
        }
        ControlKind::Camera => room.set_local_track_enabled(TrackSource::Camera, enabled).await,
        ControlKind::ScreenShare if enabled && !room.supports_screen_share() => {
            Err(anyhow!("screen share not supported by room backend"))
        }
        ControlKind::ScreenShare => {
            room.set_local_track_enabled(TrackSource::ScreenShare, enabled)
                .await
        }
    };

    if let Err(err) = &result {
        warn!(
            "voice: {} request failed enabled={} request={}: {err}",
            kind.as_str(),
            enabled,
            request_id
        );
    }

    state.send_if_modified(|state| {
        if state.generation != generation {
            return false;
        }
        if result.is_ok() {
            state.local.set(kind, enabled);
        }
        let acknowledged = state.acknowledged.entry(kind).or_default();
        *acknowledged = (*acknowledged).max(request_id);
        true
    });
}

#[cfg(test)]
#[path = "tests/session_registry_tests.rs"]
mod tests;
