//! End-to-end orchestration scenarios against the scripted mock driver.

use std::sync::Arc;
use std::time::Duration;

use confab_backend::adapter::{BackendAdapter, MediaAdapter};
use confab_backend::balancer::{BalanceStrategy, Balancer, Host};
use confab_backend::composed::ComposedAdapter;
use confab_backend::driver::{BackendEvent, ElementKind, ElementState, MediaDriver};
use confab_backend::testing::{sdp, Call, MockDriver};
use confab_controller::api::PublishParams;
use confab_controller::Controller;
use confab_core::config::{BackendConfig, Config};
use confab_core::models::id::{RoomId, UserId};
use confab_core::models::media::{ConnectionKind, SessionType, UserType};
use confab_core::{EventHub, EventKind, MediaEvent};

struct TestBed {
    driver: Arc<MockDriver>,
    controller: Controller,
    hub: EventHub,
}

fn testbed(hosts: usize) -> TestBed {
    let driver = Arc::new(MockDriver::new());
    let balancer = Arc::new(Balancer::new(BalanceStrategy::RoundRobin));
    for i in 1..=hosts {
        balancer.add_host(Host::new(format!("h{i}"), format!("10.0.0.{i}"), vec![]));
    }
    let hub = EventHub::new();
    let adapter: Arc<dyn MediaAdapter> = Arc::new(BackendAdapter::new(
        Arc::clone(&driver) as Arc<dyn MediaDriver>,
        Arc::clone(&balancer),
        hub.clone(),
        &BackendConfig::default(),
    ));
    let controller = Controller::new(adapter, balancer, hub.clone(), Config::default());
    TestBed {
        driver,
        controller,
        hub,
    }
}

fn offer_params(descriptor: &str) -> PublishParams {
    PublishParams {
        descriptor: Some(descriptor.to_string()),
        ..Default::default()
    }
}

async fn drain_for(duration_ms: u64) {
    tokio::time::sleep(Duration::from_millis(duration_ms)).await;
}

#[tokio::test]
async fn scenario_join_publish_subscribe() {
    let bed = testbed(1);
    let room = RoomId::from("conference-1");

    let (_, mut joined_rx) = bed.hub.subscribe(EventKind::UserJoined, "conference-1");
    let (_, mut connected_rx) = bed.hub.subscribe(EventKind::MediaConnected, "conference-1");

    // A joins and publishes
    let alice = bed
        .controller
        .join(room.clone(), UserType::Sfu, "alice")
        .await
        .unwrap();
    let joined = joined_rx.recv().await.unwrap();
    assert!(matches!(joined, MediaEvent::UserJoined { user_id, .. } if user_id == alice));

    let published = bed
        .controller
        .publish(
            &alice,
            &room,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_OFFER),
        )
        .await
        .unwrap();
    let answer = published.descriptor.clone().unwrap();
    assert!(answer.contains("o=mock"));
    assert!(connected_rx.recv().await.is_some());

    // B joins and subscribes to A's media
    let bob = bed
        .controller
        .join(room.clone(), UserType::Sfu, "bob")
        .await
        .unwrap();
    bed.driver.clear_calls();

    let subscription = bed
        .controller
        .subscribe(
            &bob,
            &published.media_id,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_OFFER),
        )
        .await
        .unwrap();
    assert!(subscription.descriptor.is_some());

    // Same host: the adapter saw exactly one connect and no transposer
    assert_eq!(bed.driver.count("connect"), 1);
    assert_eq!(bed.driver.count("generate_offer"), 0);
    let rtp_elements = bed
        .driver
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::CreateElement(_, _, ElementKind::Rtp)))
        .count();
    assert_eq!(rtp_elements, 0);
}

#[tokio::test]
async fn scenario_cross_host_connect() {
    let bed = testbed(2);
    let room = RoomId::from("conference-1");
    let alice = bed
        .controller
        .join(room.clone(), UserType::Sfu, "alice")
        .await
        .unwrap();
    let bob = bed
        .controller
        .join(room.clone(), UserType::Sfu, "bob")
        .await
        .unwrap();

    // Round-robin forces the source on h1 and the sink on h2
    let source = bed
        .controller
        .publish(
            &alice,
            &room,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_OFFER),
        )
        .await
        .unwrap();
    let sink = bed
        .controller
        .publish(
            &bob,
            &room,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_OFFER),
        )
        .await
        .unwrap();
    bed.driver.clear_calls();

    bed.controller
        .connect_sessions(&source.media_id, &sink.media_id, ConnectionKind::All)
        .await
        .unwrap();

    // Two RTP endpoints, one offer/answer leg, source leg + sink leg
    let rtp_elements = bed
        .driver
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::CreateElement(_, _, ElementKind::Rtp)))
        .count();
    assert_eq!(rtp_elements, 2);
    assert_eq!(bed.driver.count("generate_offer"), 1);
    assert_eq!(bed.driver.count("process_offer"), 1);
    assert_eq!(bed.driver.count("process_answer"), 1);
    assert_eq!(bed.driver.count("connect"), 2);
}

#[tokio::test]
async fn scenario_content_floor_auto_release_on_disconnect() {
    let bed = testbed(1);
    let room = RoomId::from("conference-1");
    let alice = bed
        .controller
        .join(room.clone(), UserType::Sfu, "alice")
        .await
        .unwrap();
    let published = bed
        .controller
        .publish(
            &alice,
            &room,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_CONTENT_OFFER),
        )
        .await
        .unwrap();

    let floor = bed
        .controller
        .set_content_floor(&room, &published.media_id)
        .await
        .unwrap();
    let floor_media = floor.floor.clone().unwrap();

    let (_, mut floor_rx) = bed.hub.subscribe(EventKind::ContentFloorChanged, "conference-1");

    // The backend reports the content element gone
    let element = bed.driver.created_elements().remove(0);
    bed.driver.emit(BackendEvent::MediaStateChanged {
        element_id: element,
        state: ElementState::Disconnected,
    });

    let event = tokio::time::timeout(Duration::from_secs(2), floor_rx.recv())
        .await
        .expect("floor event")
        .unwrap();
    match event {
        MediaEvent::ContentFloorChanged {
            floor,
            previous_floor,
            ..
        } => {
            assert!(floor.is_none());
            assert_eq!(previous_floor.len(), 1);
            assert_eq!(previous_floor[0].media_unit_id, floor_media.media_unit_id);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn scenario_content_floor_mru_restore() {
    let bed = testbed(1);
    let room = RoomId::from("conference-1");
    let alice = bed
        .controller
        .join(room.clone(), UserType::Sfu, "alice")
        .await
        .unwrap();

    let first = bed
        .controller
        .publish(
            &alice,
            &room,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_CONTENT_OFFER),
        )
        .await
        .unwrap();
    let second = bed
        .controller
        .publish(
            &alice,
            &room,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_CONTENT_OFFER),
        )
        .await
        .unwrap();

    let floor_a = bed
        .controller
        .set_content_floor(&room, &first.media_id)
        .await
        .unwrap();
    let media_a = floor_a.floor.unwrap();
    bed.controller
        .set_content_floor(&room, &second.media_id)
        .await
        .unwrap();

    // set A; set B; release => current = A
    let restored = bed.controller.release_content_floor(&room).await.unwrap();
    assert_eq!(
        restored.floor.unwrap().media_unit_id,
        media_a.media_unit_id
    );
}

#[tokio::test]
async fn scenario_mcu_lifecycle() {
    let bed = testbed(1);
    let room = RoomId::from("conference-1");

    // An SFU participant is already publishing
    let alice = bed
        .controller
        .join(room.clone(), UserType::Sfu, "alice")
        .await
        .unwrap();
    bed.controller
        .publish(
            &alice,
            &room,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_OFFER),
        )
        .await
        .unwrap();

    // First MCU user publishes: the mixer session appears and existing
    // sessions get wired into it
    let mixer_user = bed
        .controller
        .join(room.clone(), UserType::Mcu, "mixer-client")
        .await
        .unwrap();
    bed.controller
        .publish_and_subscribe(
            &mixer_user,
            &room,
            None,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_OFFER),
        )
        .await
        .unwrap();

    let mixers_created = bed
        .driver
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::CreateElement(_, _, ElementKind::Mixer)))
        .count();
    assert_eq!(mixers_created, 1);
    assert!(bed.driver.count("connect") >= 2);

    // Last MCU user leaves: the mixer dies, SFU media remains
    bed.driver.clear_calls();
    bed.controller.leave(&mixer_user, &room).await.unwrap();
    drain_for(50).await;

    assert!(bed.driver.count("release_element") >= 1);
    let alice_medias = bed.controller.get_user_medias(&alice).await.unwrap();
    assert!(!alice_medias.is_empty());
}

#[tokio::test]
async fn scenario_content_renegotiation_touches_content_backend_only() {
    // Composed adapter: audio, main video and content on separate backends
    let main_driver = Arc::new(MockDriver::new());
    let audio_driver = Arc::new(MockDriver::new());
    let content_driver = Arc::new(MockDriver::new());
    let hub = EventHub::new();

    let make = |driver: &Arc<MockDriver>| -> Arc<dyn MediaAdapter> {
        let balancer = Arc::new(Balancer::new(BalanceStrategy::RoundRobin));
        balancer.add_host(Host::new("h1", "10.0.0.1", vec![]));
        Arc::new(BackendAdapter::new(
            Arc::clone(driver) as Arc<dyn MediaDriver>,
            balancer,
            hub.clone(),
            &BackendConfig::default(),
        ))
    };
    let composed: Arc<dyn MediaAdapter> = ComposedAdapter::new(
        make(&main_driver),
        Some(make(&audio_driver)),
        Some(make(&content_driver)),
    );

    let balancer = Arc::new(Balancer::new(BalanceStrategy::RoundRobin));
    let controller = Controller::new(composed, balancer, hub.clone(), Config::default());

    let room = RoomId::from("conference-1");
    let alice = controller
        .join(room.clone(), UserType::Sfu, "alice")
        .await
        .unwrap();

    // Audio+video negotiated; no content yet
    let published = controller
        .publish(
            &alice,
            &room,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_OFFER),
        )
        .await
        .unwrap();
    assert_eq!(audio_driver.count("process_offer"), 1);
    assert_eq!(main_driver.count("process_offer"), 1);
    assert_eq!(content_driver.count("process_offer"), 0);

    main_driver.clear_calls();
    audio_driver.clear_calls();

    // The client renegotiates, now offering a=content:slides
    let answer = controller
        .publish(
            &alice,
            &room,
            SessionType::WebRtc,
            PublishParams {
                descriptor: Some(sdp::AUDIO_VIDEO_CONTENT_OFFER.to_string()),
                media_id: Some(published.media_id.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Only the content backend did element work
    assert_eq!(content_driver.count("create_element"), 1);
    assert_eq!(content_driver.count("process_offer"), 1);
    assert_eq!(main_driver.count("create_element"), 0);
    assert_eq!(main_driver.count("process_offer"), 0);
    assert_eq!(main_driver.count("process_answer"), 0);
    assert_eq!(audio_driver.count("create_element"), 0);
    assert_eq!(audio_driver.count("process_answer"), 0);

    // The reassembled local descriptor carries all three kinds, audio first
    let local = answer.descriptor.unwrap();
    let audio_pos = local.find("m=audio").unwrap();
    let video_pos = local.find("a=content:main").unwrap();
    let content_pos = local.find("a=content:slides").unwrap();
    assert!(audio_pos < video_pos);
    assert!(video_pos < content_pos);
}

#[tokio::test]
async fn scenario_dtmf_layout_command() {
    let bed = testbed(1);
    let room = RoomId::from("conference-1");

    let mixer_user = bed
        .controller
        .join(room.clone(), UserType::Mcu, "mixer-client")
        .await
        .unwrap();
    bed.controller
        .publish_and_subscribe(
            &mixer_user,
            &room,
            None,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_OFFER),
        )
        .await
        .unwrap();

    let (_, mut dtmf_rx) = bed.hub.subscribe(EventKind::Dtmf, "all");

    // The publisher's element is the first created WebRTC endpoint
    let publisher_element = {
        let kinds: Vec<ElementKind> = bed
            .driver
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::CreateElement(_, _, kind) => Some(*kind),
                _ => None,
            })
            .collect();
        let created = bed.driver.created_elements();
        created
            .into_iter()
            .zip(kinds)
            .find(|(_, kind)| *kind == ElementKind::WebRtc)
            .map(|(id, _)| id)
            .expect("publisher element")
    };

    bed.driver.emit(BackendEvent::Dtmf {
        element_id: publisher_element.clone(),
        tone: '#',
    });
    bed.driver.emit(BackendEvent::Dtmf {
        element_id: publisher_element,
        tone: '2',
    });

    // Both digits fan out as DTMF events
    assert!(tokio::time::timeout(Duration::from_secs(2), dtmf_rx.recv())
        .await
        .unwrap()
        .is_some());
    assert!(tokio::time::timeout(Duration::from_secs(2), dtmf_rx.recv())
        .await
        .unwrap()
        .is_some());

    // And the completed `#2` command reaches the mixer as a layout switch
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let layout_calls: Vec<Call> = bed
            .driver
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::SetLayoutType(_, _)))
            .collect();
        if let Some(Call::SetLayoutType(_, layout)) = layout_calls.first() {
            assert_eq!(layout, "2");
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "layout command never reached the mixer"
        );
        drain_for(10).await;
    }
}

#[tokio::test]
async fn leave_cleans_every_index() {
    let bed = testbed(1);
    let room = RoomId::from("conference-1");
    let alice = bed
        .controller
        .join(room.clone(), UserType::Sfu, "alice")
        .await
        .unwrap();
    let bob = bed
        .controller
        .join(room.clone(), UserType::Sfu, "bob")
        .await
        .unwrap();
    bed.controller
        .publish(
            &alice,
            &room,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_OFFER),
        )
        .await
        .unwrap();

    let (_, mut left_rx) = bed.hub.subscribe(EventKind::UserLeft, "conference-1");
    bed.controller.leave(&alice, &room).await.unwrap();

    assert!(left_rx.recv().await.is_some());
    assert!(bed.controller.get_user_medias(&alice).await.is_err());
    let remaining = bed.controller.get_users(&room).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].user_id, bob);
    // The element and its pipeline went with the session
    assert!(bed.driver.count("release_element") >= 1);
    assert_eq!(bed.driver.count("release_pipeline"), 1);
}

#[tokio::test]
async fn leave_for_unknown_user_is_idempotent() {
    let bed = testbed(1);
    let result = bed
        .controller
        .leave(&UserId::from("ghost"), &RoomId::from("nowhere"))
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn room_destroyed_when_last_user_leaves() {
    let bed = testbed(1);
    let room = RoomId::from("conference-1");
    let alice = bed
        .controller
        .join(room.clone(), UserType::Sfu, "alice")
        .await
        .unwrap();

    let (_, mut destroyed_rx) = bed.hub.subscribe(EventKind::RoomDestroyed, "all");
    bed.controller.leave(&alice, &room).await.unwrap();

    assert!(destroyed_rx.recv().await.is_some());
    assert!(bed.controller.get_rooms().is_empty());
}

#[tokio::test]
async fn recording_lifecycle() {
    let bed = testbed(1);
    let room = RoomId::from("conference-1");
    let alice = bed
        .controller
        .join(room.clone(), UserType::Sfu, "alice")
        .await
        .unwrap();
    let published = bed
        .controller
        .publish(
            &alice,
            &room,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_OFFER),
        )
        .await
        .unwrap();

    let recording_id = bed
        .controller
        .start_recording(
            &alice,
            &published.media_id,
            "/recordings/conf-1.webm",
            PublishParams::default(),
        )
        .await
        .unwrap();

    let recorders = bed
        .driver
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::CreateElement(_, _, ElementKind::Recorder)))
        .count();
    assert_eq!(recorders, 1);
    assert_eq!(bed.driver.count("start_recording"), 1);

    bed.controller
        .stop_recording(&alice, &recording_id)
        .await
        .unwrap();
    assert_eq!(bed.driver.count("stop_recording"), 1);

    // Stopping an unknown recording is an error
    assert!(bed
        .controller
        .stop_recording(&alice, &recording_id)
        .await
        .is_err());
}

#[tokio::test]
async fn volume_and_mute_emit_events() {
    let bed = testbed(1);
    let room = RoomId::from("conference-1");
    let alice = bed
        .controller
        .join(room.clone(), UserType::Sfu, "alice")
        .await
        .unwrap();
    let published = bed
        .controller
        .publish(
            &alice,
            &room,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_OFFER),
        )
        .await
        .unwrap();

    let (_, mut volume_rx) = bed.hub.subscribe(EventKind::MediaVolumeChanged, "all");
    let (_, mut muted_rx) = bed.hub.subscribe(EventKind::MediaMuted, "all");
    let (_, mut unmuted_rx) = bed.hub.subscribe(EventKind::MediaUnmuted, "all");

    bed.controller
        .set_volume(&published.media_id, 80)
        .await
        .unwrap();
    assert!(matches!(
        volume_rx.recv().await.unwrap(),
        MediaEvent::MediaVolumeChanged { volume: 80, .. }
    ));

    bed.controller.mute(&published.media_id).await.unwrap();
    assert!(muted_rx.recv().await.is_some());
    // Mute drives the element to zero volume
    assert!(bed
        .driver
        .calls()
        .iter()
        .any(|c| matches!(c, Call::SetVolume(_, 0))));

    bed.controller.unmute(&published.media_id).await.unwrap();
    assert!(unmuted_rx.recv().await.is_some());
    // Unmute restores the pre-mute volume
    assert!(bed
        .driver
        .calls()
        .iter()
        .any(|c| matches!(c, Call::SetVolume(_, 80))));
}

#[tokio::test]
async fn host_offline_purges_units_without_roundtrips() {
    let bed = testbed(1);
    let room = RoomId::from("conference-1");
    let alice = bed
        .controller
        .join(room.clone(), UserType::Sfu, "alice")
        .await
        .unwrap();
    bed.controller
        .publish(
            &alice,
            &room,
            SessionType::WebRtc,
            offer_params(sdp::AUDIO_VIDEO_OFFER),
        )
        .await
        .unwrap();

    let (_, mut offline_rx) = bed.hub.subscribe(EventKind::MediaServerOffline, "all");
    let (_, mut disconnected_rx) = bed.hub.subscribe(EventKind::MediaDisconnected, "all");
    bed.driver.clear_calls();

    // Take the host down through the balancer the controller shares with
    // the adapter
    bed.controller
        .balancer()
        .mark_offline(&confab_core::models::id::HostId::from("h1"));

    assert!(tokio::time::timeout(Duration::from_secs(2), offline_rx.recv())
        .await
        .unwrap()
        .is_some());
    assert!(
        tokio::time::timeout(Duration::from_secs(2), disconnected_rx.recv())
            .await
            .unwrap()
            .is_some()
    );
    drain_for(50).await;

    // No backend round-trips for the purge
    assert_eq!(bed.driver.count("release_element"), 0);
    assert_eq!(bed.driver.count("release_pipeline"), 0);
    let medias = bed.controller.get_user_medias(&alice).await.unwrap();
    assert!(medias.is_empty());
}
