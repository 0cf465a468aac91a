use super::*;

use std::time::Duration;

use futures::StreamExt;
use livekit_integration::LiveKitRoomEvent;
use shared::{
    domain::UserId,
    protocol::{ServerEvent, VoiceParticipantPayload},
};

use crate::test_support::*;

fn joined(channel_id: ChannelId, user_id: i64) -> ServerEvent {
    ServerEvent::VoiceParticipantJoined {
        channel_id,
        participant: VoiceParticipantPayload {
            user_id: UserId(user_id),
            is_publishing: true,
            is_receiving: true,
            is_camera: false,
            is_screensharing: false,
        },
    }
}

fn user_ids(view: &ChannelPresenceView) -> Vec<i64> {
    view.participants.iter().map(|p| p.user_id.0).collect()
}

async fn next_view(
    presence: &mut ChannelPresence,
    mut predicate: impl FnMut(&ChannelPresenceView) -> bool,
) -> ChannelPresenceView {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let view = presence.current();
            if predicate(&view) {
                return view;
            }
            presence.changed().await.expect("observation alive");
        }
    })
    .await
    .expect("view timeout")
}

#[tokio::test]
async fn initial_view_is_available_immediately() {
    let store = VoicePresenceStore::new();
    store.apply_server_event(&joined(CHANNEL, 5));
    let registry = registry_for(MockRoom::new());

    let presence = ChannelPresence::observe(CHANNEL, &store, &registry, TrackFilter::default());

    let view = presence.current();
    assert_eq!(presence.channel_id(), CHANNEL);
    assert_eq!(view.channel_id, CHANNEL);
    assert!(!view.source_is_live);
    assert_eq!(user_ids(&view), vec![5]);
}

#[tokio::test]
async fn snapshot_events_republish_the_view() {
    let store = VoicePresenceStore::new();
    let registry = registry_for(MockRoom::new());
    let mut presence = ChannelPresence::observe(CHANNEL, &store, &registry, TrackFilter::default());

    store.apply_server_event(&joined(CHANNEL, 1));
    store.apply_server_event(&joined(CHANNEL, 2));
    let view = next_view(&mut presence, |view| view.participants.len() == 2).await;
    assert_eq!(user_ids(&view), vec![1, 2]);

    store.apply_server_event(&ServerEvent::VoiceParticipantLeft {
        channel_id: CHANNEL,
        user_id: UserId(1),
    });
    let view = next_view(&mut presence, |view| view.participants.len() == 1).await;
    assert_eq!(user_ids(&view), vec![2]);
}

#[tokio::test]
async fn other_channels_do_not_publish() {
    let store = VoicePresenceStore::new();
    let registry = registry_for(MockRoom::new());
    let presence = ChannelPresence::observe(CHANNEL, &store, &registry, TrackFilter::default());
    let mut rx = presence.watch();

    store.apply_server_event(&joined(ChannelId(99), 1));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!rx.has_changed().expect("observation alive"));
    assert!(presence.current().participants.is_empty());
}

#[tokio::test]
async fn joining_hands_off_to_live_without_dropping_to_empty() {
    let store = VoicePresenceStore::new();
    store.apply_server_event(&joined(CHANNEL, 2));
    store.apply_server_event(&joined(CHANNEL, 3));

    let room = MockRoom::new();
    let registry = registry_for(room.clone());
    let mut presence = ChannelPresence::observe(CHANNEL, &store, &registry, TrackFilter::default());
    let views = presence.stream();

    // Joined, but nothing visible yet.
    registry
        .connect(connect_options(false))
        .await
        .expect("connect");
    room.emit(LiveKitRoomEvent::ParticipantJoined(remote(
        "p2",
        2,
        vec![camera("p2-cam", false)],
    )));
    room.emit(LiveKitRoomEvent::TrackSubscribed {
        participant_id: "p2".to_string(),
        track_sid: "p2-cam".to_string(),
    });

    let live = next_view(&mut presence, |view| view.source_is_live).await;
    assert_eq!(user_ids(&live), vec![2]);
    assert!(live.participants.iter().all(|p| p.is_live && !p.deafened));

    drop(presence);
    let seen = tokio::time::timeout(Duration::from_secs(1), views.collect::<Vec<_>>())
        .await
        .expect("stream ends once observation stops");
    assert!(!seen.is_empty());
    for view in seen {
        assert!(!view.participants.is_empty(), "presence flickered to empty");
        let live = view.participants.iter().filter(|p| p.is_live).count();
        assert!(live == 0 || live == view.participants.len());
    }
}

#[tokio::test]
async fn losing_the_last_visible_track_falls_back_to_snapshot() {
    let store = VoicePresenceStore::new();
    store.apply_server_event(&joined(CHANNEL, 2));
    store.apply_server_event(&joined(CHANNEL, 7));

    let room = MockRoom::with_roster(vec![remote("p2", 2, vec![camera("p2-cam", true)])]);
    let registry = connected_registry(room.clone()).await;
    let mut presence = ChannelPresence::observe(CHANNEL, &store, &registry, TrackFilter::default());
    assert!(presence.current().source_is_live);

    room.emit(LiveKitRoomEvent::TrackUnsubscribed {
        participant_id: "p2".to_string(),
        track_sid: "p2-cam".to_string(),
    });

    let view = next_view(&mut presence, |view| !view.source_is_live).await;
    assert_eq!(user_ids(&view), vec![2, 7]);
}

#[tokio::test]
async fn disconnecting_returns_to_the_snapshot() {
    let store = VoicePresenceStore::new();
    store.apply_server_event(&joined(CHANNEL, 2));

    let room = MockRoom::with_roster(vec![remote("p2", 2, vec![camera("p2-cam", true)])]);
    let registry = connected_registry(room).await;
    let mut presence = ChannelPresence::observe(CHANNEL, &store, &registry, TrackFilter::default());
    assert!(presence.current().source_is_live);

    registry.request_disconnect();

    let view = next_view(&mut presence, |view| !view.source_is_live).await;
    assert_eq!(user_ids(&view), vec![2]);
    assert!(!view.participants[0].is_live);
}

#[tokio::test]
async fn dropping_the_scope_stops_observation() {
    let store = VoicePresenceStore::new();
    let registry = registry_for(MockRoom::new());
    let presence = ChannelPresence::observe(CHANNEL, &store, &registry, TrackFilter::default());
    let mut rx = presence.watch();

    drop(presence);

    let closed = tokio::time::timeout(Duration::from_secs(1), rx.changed())
        .await
        .expect("watcher task exits");
    assert!(closed.is_err());

    // Later events go nowhere.
    store.apply_server_event(&joined(CHANNEL, 1));
    assert!(rx.borrow().participants.is_empty());
}
