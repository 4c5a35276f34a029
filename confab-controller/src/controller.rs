//! Top-level façade: request routing, cross-entity invariants, event
//! fan-out and lifecycle cleanup.
//!
//! Entities live in the room/user/session tree; the controller additionally
//! indexes every entity flat by ID. The tree is the source of truth, the
//! flat maps are caches. Per-session operations serialize on the session's
//! mutex; backend callbacks are folded back in through the event pump.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use confab_backend::adapter::{MediaAdapter, NegotiateOptions};
use confab_backend::balancer::Balancer;
use confab_backend::driver::{BackendEvent, ElementState};
use confab_core::config::Config;
use confab_core::events::{EventKind, IceCandidateInfo, SubscriptionId};
use confab_core::models::id::{
    ElementId, HostId, MediaUnitId, RecordingId, RoomId, SessionId, UserId,
};
use confab_core::models::media::{
    ConnectionKind, FloorInfo, MediaInfo, MediaProfile, SessionType, UserType,
};
use confab_core::{Error, EventHub, MediaEvent, Result};

use crate::api::{PublishParams, PublishResult};
use crate::dtmf::DtmfCommand;
use crate::media_session::MediaSession;
use crate::media_unit::MediaUnit;
use crate::room::Room;
use crate::strategy::Strategy;
use crate::user::{User, UserInfo};

struct Core {
    config: Config,
    adapter: Arc<dyn MediaAdapter>,
    balancer: Arc<Balancer>,
    hub: EventHub,
    rooms: DashMap<RoomId, Arc<RwLock<Room>>>,
    users: DashMap<UserId, Arc<RwLock<User>>>,
    sessions: DashMap<SessionId, Arc<Mutex<MediaSession>>>,
    units: DashMap<MediaUnitId, Arc<RwLock<MediaUnit>>>,
    /// backend element -> owning unit, for event routing
    elements: DashMap<ElementId, MediaUnitId>,
    recordings: DashMap<RecordingId, SessionId>,
}

/// The session-and-topology orchestrator façade
pub struct Controller {
    core: Arc<Core>,
    event_task: tokio::task::JoinHandle<()>,
    offline_task: tokio::task::JoinHandle<()>,
}

impl Controller {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn MediaAdapter>,
        balancer: Arc<Balancer>,
        hub: EventHub,
        config: Config,
    ) -> Self {
        let core = Arc::new(Core {
            config,
            adapter,
            balancer,
            hub,
            rooms: DashMap::new(),
            users: DashMap::new(),
            sessions: DashMap::new(),
            units: DashMap::new(),
            elements: DashMap::new(),
            recordings: DashMap::new(),
        });

        let events = core.adapter.events();
        let event_task = tokio::spawn(Self::run_event_pump(Arc::clone(&core), events));
        let offline_rx = core.balancer.subscribe_offline();
        let offline_task = tokio::spawn(Self::run_offline_watcher(Arc::clone(&core), offline_rx));

        Self {
            core,
            event_task,
            offline_task,
        }
    }

    #[must_use]
    pub fn hub(&self) -> &EventHub {
        &self.core.hub
    }

    #[must_use]
    pub fn balancer(&self) -> &Arc<Balancer> {
        &self.core.balancer
    }

    /// Subscribe an external consumer to `eventName:identifier`
    #[must_use]
    pub fn on_event(
        &self,
        kind: EventKind,
        identifier: &str,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<MediaEvent>) {
        self.core.hub.subscribe(kind, identifier)
    }

    // ─── membership ──────────────────────────────────────────────────────

    pub async fn join(
        &self,
        room_id: RoomId,
        user_type: UserType,
        name: &str,
    ) -> Result<UserId> {
        let core = &self.core;
        let mut created = false;
        let room_arc = Arc::clone(
            core.rooms
                .entry(room_id.clone())
                .or_insert_with(|| {
                    created = true;
                    Arc::new(RwLock::new(Room::new(room_id.clone())))
                })
                .value(),
        );
        if created {
            core.hub.publish(&MediaEvent::RoomCreated {
                room_id: room_id.clone(),
                timestamp: Utc::now(),
            });
            info!(room_id = %room_id, "Room created");
        }

        let user = User::new(room_id.clone(), user_type, name);
        let user_id = user.id.clone();
        core.users
            .insert(user_id.clone(), Arc::new(RwLock::new(user)));
        {
            let mut room = room_arc.write().await;
            room.users.insert(user_id.clone());
            if user_type == UserType::Mcu {
                room.mcu_user_count += 1;
            }
        }

        core.hub.publish(&MediaEvent::UserJoined {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            user_type,
            name: name.to_string(),
            timestamp: Utc::now(),
        });
        info!(room_id = %room_id, user_id = %user_id, user_type = ?user_type, "User joined");
        Ok(user_id)
    }

    /// Leave is idempotent: an unknown user or room resolves successfully.
    pub async fn leave(&self, user_id: &UserId, room_id: &RoomId) -> Result<()> {
        let core = &self.core;
        let Some((_, user_arc)) = core.users.remove(user_id) else {
            debug!(user_id = %user_id, "Leave for unknown user, nothing to do");
            return Ok(());
        };
        let (session_ids, user_type) = {
            let user = user_arc.read().await;
            (user.sessions.clone(), user.user_type)
        };

        for session_id in session_ids {
            if let Err(err) = self.stop_session(&session_id).await {
                warn!(session_id = %session_id, error = %err, "Failed to stop session on leave");
            }
        }

        let Some(room_arc) = core.rooms.get(room_id).map(|r| Arc::clone(r.value())) else {
            return Ok(());
        };
        let (room_empty, stop_mcu) = {
            let mut room = room_arc.write().await;
            room.users.remove(user_id);
            if user_type == UserType::Mcu {
                room.mcu_user_count = room.mcu_user_count.saturating_sub(1);
            }
            let stop_mcu = if room.mcu_user_count == 0 {
                room.mcu_session.take()
            } else {
                None
            };
            (room.is_empty(), stop_mcu)
        };

        core.hub.publish(&MediaEvent::UserLeft {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            timestamp: Utc::now(),
        });
        info!(room_id = %room_id, user_id = %user_id, "User left");

        if let Some(mcu_session) = stop_mcu {
            info!(room_id = %room_id, session_id = %mcu_session, "Last MCU user left, stopping mixer");
            if let Err(err) = self.stop_session(&mcu_session).await {
                warn!(session_id = %mcu_session, error = %err, "Failed to stop MCU session");
            }
        }

        if room_empty {
            core.hub.publish(&MediaEvent::RoomEmpty {
                room_id: room_id.clone(),
                timestamp: Utc::now(),
            });
            self.destroy_room(room_id).await;
        }
        Ok(())
    }

    async fn destroy_room(&self, room_id: &RoomId) {
        let core = &self.core;
        if core.rooms.remove(room_id).is_some() {
            core.hub.publish(&MediaEvent::RoomDestroyed {
                room_id: room_id.clone(),
                timestamp: Utc::now(),
            });
            // Every per-room subject dies with the room
            core.hub.unsubscribe_identifier(room_id.as_str());
            info!(room_id = %room_id, "Room destroyed");
        }
    }

    // ─── publish / subscribe ─────────────────────────────────────────────

    pub async fn publish(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        session_type: SessionType,
        params: PublishParams,
    ) -> Result<PublishResult> {
        if let Some(media_id) = params.media_id.clone() {
            // Renegotiation of an existing media
            let descriptor = params.descriptor.clone().ok_or_else(|| {
                Error::MediaInvalidOperation(format!(
                    "renegotiation of {media_id} requires a descriptor"
                ))
            })?;
            self.assert_session_owner(user_id, &media_id).await?;
            let answer = self.process_descriptor(&media_id, &descriptor).await?;
            return Ok(PublishResult {
                media_id,
                descriptor: answer,
            });
        }
        self.create_session(user_id, room_id, session_type, params)
            .await
    }

    /// Feed a further remote descriptor to a negotiated session (answer
    /// processing or renegotiation) and run `process`.
    pub async fn process_descriptor(
        &self,
        media_id: &SessionId,
        descriptor: &str,
    ) -> Result<Option<String>> {
        let core = &self.core;
        let session_arc = core
            .sessions
            .get(media_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| Error::MediaNotFound(media_id.to_string()))?;
        let answer = {
            let mut session = session_arc.lock().await;
            session.set_remote_descriptor(descriptor.to_string());
            session.process(&core.adapter, &core.hub).await?
        };
        // Renegotiation may have created new units (late content)
        self.index_session_units(media_id).await;
        Ok(answer)
    }

    pub async fn unpublish(&self, user_id: &UserId, media_id: &SessionId) -> Result<()> {
        self.assert_session_owner(user_id, media_id).await?;
        self.stop_session(media_id).await?;
        Ok(())
    }

    pub async fn subscribe(
        &self,
        user_id: &UserId,
        source_media_id: &SessionId,
        session_type: SessionType,
        params: PublishParams,
    ) -> Result<PublishResult> {
        let core = &self.core;
        if !core.sessions.contains_key(source_media_id) {
            return Err(Error::MediaNotFound(source_media_id.to_string()));
        }
        let room_id = {
            let source = core
                .sessions
                .get(source_media_id)
                .ok_or_else(|| Error::MediaNotFound(source_media_id.to_string()))?;
            let source = source.lock().await;
            source.room_id.clone()
        };

        let result = self
            .create_session(user_id, &room_id, session_type, params)
            .await?;
        self.connect_sessions(source_media_id, &result.media_id, ConnectionKind::All)
            .await?;

        let source_unit = self.first_unit_of(source_media_id).await;
        core.hub.publish(&MediaEvent::SubscribedTo {
            user_id: user_id.clone(),
            source_media_unit_id: source_unit.unwrap_or_else(|| MediaUnitId::from("unknown")),
            sink_session_id: result.media_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(result)
    }

    pub async fn unsubscribe(&self, user_id: &UserId, media_id: &SessionId) -> Result<()> {
        self.unpublish(user_id, media_id).await
    }

    /// Fused publish + subscribe. The first MCU-typed publish creates the
    /// room's mixer session and wires every live session into it.
    pub async fn publish_and_subscribe(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        source_media_id: Option<&SessionId>,
        session_type: SessionType,
        params: PublishParams,
    ) -> Result<PublishResult> {
        let core = &self.core;
        let result = self
            .create_session(user_id, room_id, session_type, params)
            .await?;

        let user_type = {
            let user = core
                .users
                .get(user_id)
                .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;
            let user = user.read().await;
            user.user_type
        };

        if user_type == UserType::Mcu {
            self.ensure_mcu_session(user_id, room_id).await?;
            let room_arc = self.room(room_id)?;
            let mcu_session = room_arc.read().await.mcu_session.clone();
            if let Some(mcu_session) = mcu_session {
                // Wire every live session into the mixer, the new one
                // included
                let session_ids: Vec<SessionId> = {
                    let room = room_arc.read().await;
                    room.media_sessions
                        .iter()
                        .filter(|s| **s != mcu_session)
                        .cloned()
                        .collect()
                };
                for session_id in session_ids {
                    if let Err(err) = self
                        .connect_sessions(&session_id, &mcu_session, ConnectionKind::All)
                        .await
                    {
                        warn!(
                            session_id = %session_id,
                            error = %err,
                            "Failed to connect session into mixer"
                        );
                    }
                }

                // A publisher carrying content gets the room's content floor
                self.connect_content_floor_to(room_id, &result.media_id)
                    .await?;
            }
        }

        if let Some(source) = source_media_id {
            self.connect_sessions(source, &result.media_id, ConnectionKind::All)
                .await?;
        }
        Ok(result)
    }

    async fn ensure_mcu_session(&self, user_id: &UserId, room_id: &RoomId) -> Result<()> {
        let room_arc = self.room(room_id)?;
        if room_arc.read().await.mcu_session.is_some() {
            return Ok(());
        }

        info!(room_id = %room_id, "Creating MCU mixer session");
        let result = self
            .create_session(
                user_id,
                room_id,
                SessionType::Mcu,
                PublishParams {
                    name: Some("mcu-mixer".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        let mut room = room_arc.write().await;
        room.mcu_session = Some(result.media_id);
        Ok(())
    }

    async fn connect_content_floor_to(
        &self,
        room_id: &RoomId,
        media_id: &SessionId,
    ) -> Result<()> {
        let core = &self.core;
        let floor_id = {
            let room_arc = self.room(room_id)?;
            let room = room_arc.read().await;
            room.content_floor().cloned()
        };
        let Some(floor_id) = floor_id else {
            return Ok(());
        };

        let sink_session = core
            .sessions
            .get(media_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| Error::MediaNotFound(media_id.to_string()))?;
        let sink_content = {
            let session = sink_session.lock().await;
            session.content_media().await
        };
        let (Some(sink_content), Some(floor_unit)) = (
            sink_content,
            core.units.get(&floor_id).map(|u| Arc::clone(u.value())),
        ) else {
            return Ok(());
        };

        let source_element = floor_unit.read().await.element.clone();
        let sink_element = sink_content.read().await.element.clone();
        core.adapter
            .connect(&source_element, &sink_element, ConnectionKind::Content)
            .await
    }

    async fn create_session(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        session_type: SessionType,
        params: PublishParams,
    ) -> Result<PublishResult> {
        let core = &self.core;
        let room_arc = self.room(room_id)?;
        let user_arc = core
            .users
            .get(user_id)
            .map(|u| Arc::clone(u.value()))
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;

        let options = NegotiateOptions {
            uri: params.uri.clone(),
            record_path: params.record_path.clone(),
        };
        let mut session = MediaSession::new(
            room_id.clone(),
            user_id.clone(),
            session_type,
            params.profile,
            params.name.clone().unwrap_or_default(),
            options,
            &core.config.dtmf,
        );
        if let Some(spec) = params.media_specs.clone() {
            session.spec = spec;
        }
        if let Some(descriptor) = &params.descriptor {
            session.set_remote_descriptor(descriptor.clone());
        }

        let session_id = session.id.clone();
        let session_arc = Arc::new(Mutex::new(session));
        core.sessions
            .insert(session_id.clone(), Arc::clone(&session_arc));

        let descriptor = {
            let mut session = session_arc.lock().await;
            match session.process(&core.adapter, &core.hub).await {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    // Unwind: nothing half-created survives
                    drop(session);
                    core.sessions.remove(&session_id);
                    return Err(err);
                }
            }
        };

        self.index_session_units(&session_id).await;
        {
            let mut room = room_arc.write().await;
            room.media_sessions.insert(session_id.clone());
        }
        {
            let mut user = user_arc.write().await;
            user.add_session(session_id.clone());
        }

        let infos = self.session_unit_infos(&session_id).await;
        for info in &infos {
            core.hub.publish(&MediaEvent::MediaConnected {
                room_id: room_id.clone(),
                media: info.clone(),
                timestamp: Utc::now(),
            });
        }

        Ok(PublishResult {
            media_id: session_id,
            descriptor,
        })
    }

    /// Refresh the flat unit/element indexes and the room's media set from a
    /// session's current units (renegotiation may have added some).
    async fn index_session_units(&self, session_id: &SessionId) {
        let core = &self.core;
        let Some(session_arc) = core.sessions.get(session_id).map(|s| Arc::clone(s.value()))
        else {
            return;
        };
        let session = session_arc.lock().await;
        let room_arc = core.rooms.get(&session.room_id).map(|r| Arc::clone(r.value()));
        for unit_arc in &session.medias {
            let unit = unit_arc.read().await;
            core.units.insert(unit.id.clone(), Arc::clone(unit_arc));
            core.elements
                .insert(unit.element.element_id.clone(), unit.id.clone());
            if let Some(room_arc) = &room_arc {
                room_arc.write().await.medias.insert(unit.id.clone());
            }
        }
    }

    // ─── wiring ──────────────────────────────────────────────────────────

    /// Connect every compatible unit pair of two sessions.
    pub async fn connect_sessions(
        &self,
        source_id: &SessionId,
        sink_id: &SessionId,
        kind: ConnectionKind,
    ) -> Result<()> {
        self.wire_sessions(source_id, sink_id, kind, false).await
    }

    pub async fn disconnect_sessions(
        &self,
        source_id: &SessionId,
        sink_id: &SessionId,
        kind: ConnectionKind,
    ) -> Result<()> {
        self.wire_sessions(source_id, sink_id, kind, true).await
    }

    async fn wire_sessions(
        &self,
        source_id: &SessionId,
        sink_id: &SessionId,
        kind: ConnectionKind,
        tear_down: bool,
    ) -> Result<()> {
        let core = &self.core;
        let source_units = self.session_units(source_id).await?;
        let sink_units = self.session_units(sink_id).await?;

        for source_arc in &source_units {
            let source = source_arc.read().await.clone();
            for sink_arc in &sink_units {
                let sink = sink_arc.read().await.clone();
                let pair_kind = match (source.profile, sink.profile) {
                    (MediaProfile::All, MediaProfile::All) => Some(kind),
                    _ if source.profile == sink.profile && source.carries(kind) => {
                        Some(source.connection_kind())
                    }
                    (MediaProfile::All, _) if sink.carries(kind) => Some(sink.connection_kind()),
                    (_, MediaProfile::All) if source.carries(kind) => {
                        Some(source.connection_kind())
                    }
                    _ => None,
                };
                let Some(pair_kind) = pair_kind else { continue };
                if tear_down {
                    source.disconnect(&core.adapter, &sink, pair_kind).await?;
                } else {
                    source.connect(&core.adapter, &sink, pair_kind).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn add_ice_candidate(
        &self,
        media_id: &SessionId,
        candidate: IceCandidateInfo,
    ) -> Result<()> {
        let core = &self.core;
        let units = self.session_units(media_id).await?;
        for unit_arc in units {
            let element = unit_arc.read().await.element.clone();
            core.adapter.add_ice_candidate(&element, &candidate).await?;
        }
        Ok(())
    }

    // ─── recording ───────────────────────────────────────────────────────

    pub async fn start_recording(
        &self,
        user_id: &UserId,
        media_id: &SessionId,
        path: &str,
        params: PublishParams,
    ) -> Result<RecordingId> {
        let core = &self.core;
        let room_id = {
            let source = core
                .sessions
                .get(media_id)
                .map(|s| Arc::clone(s.value()))
                .ok_or_else(|| Error::MediaNotFound(media_id.to_string()))?;
            let source = source.lock().await;
            source.room_id.clone()
        };

        let result = self
            .create_session(
                user_id,
                &room_id,
                SessionType::Recording,
                PublishParams {
                    record_path: Some(path.to_string()),
                    name: params.name.or_else(|| Some("recording".to_string())),
                    ..Default::default()
                },
            )
            .await?;
        self.connect_sessions(media_id, &result.media_id, ConnectionKind::All)
            .await?;

        let recorder = self
            .first_unit_element(&result.media_id)
            .await
            .ok_or_else(|| Error::MediaNotFound(result.media_id.to_string()))?;
        core.adapter.start_recording(&recorder, path).await?;

        let recording_id = RecordingId::new();
        core.recordings
            .insert(recording_id.clone(), result.media_id.clone());
        info!(
            recording_id = %recording_id,
            media_id = %media_id,
            path = %path,
            "Recording started"
        );
        Ok(recording_id)
    }

    pub async fn stop_recording(
        &self,
        user_id: &UserId,
        recording_id: &RecordingId,
    ) -> Result<()> {
        let core = &self.core;
        let (_, session_id) = core
            .recordings
            .remove(recording_id)
            .ok_or_else(|| Error::MediaNotFound(recording_id.to_string()))?;
        self.assert_session_owner(user_id, &session_id).await?;

        if let Some(recorder) = self.first_unit_element(&session_id).await {
            core.adapter.stop_recording(&recorder).await?;
        }
        self.stop_session(&session_id).await?;
        info!(recording_id = %recording_id, "Recording stopped");
        Ok(())
    }

    // ─── floors ──────────────────────────────────────────────────────────

    pub async fn set_content_floor(
        &self,
        room_id: &RoomId,
        media_id: &SessionId,
    ) -> Result<FloorInfo> {
        let core = &self.core;
        let session_arc = core
            .sessions
            .get(media_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| Error::MediaNotFound(media_id.to_string()))?;
        let content_unit = {
            let session = session_arc.lock().await;
            session.content_media().await
        }
        .ok_or_else(|| {
            Error::MediaInvalidType(format!("media {media_id} carries no content"))
        })?;
        let unit_id = content_unit.read().await.id.clone();

        let room_arc = self.room(room_id)?;
        {
            let mut room = room_arc.write().await;
            room.set_content_floor(unit_id);
        }
        let floor_info = self.content_floor_info(room_id, None).await?;
        core.hub.publish(&MediaEvent::ContentFloorChanged {
            room_id: room_id.clone(),
            floor: floor_info.floor.clone(),
            previous_floor: floor_info.previous_floor.clone(),
            timestamp: Utc::now(),
        });
        Ok(floor_info)
    }

    /// Replace the conference floor. A media without outgoing video falls
    /// back to (a) a sibling unit in the same session, then (b) any of the
    /// user's sessions; with no candidate the call warns and leaves the
    /// floor untouched.
    pub async fn set_conference_floor(
        &self,
        room_id: &RoomId,
        media_id: &SessionId,
    ) -> Result<FloorInfo> {
        let core = &self.core;
        let session_arc = core
            .sessions
            .get(media_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| Error::MediaNotFound(media_id.to_string()))?;

        let mut candidate = None;
        {
            let session = session_arc.lock().await;
            if let Some(video) = session.video_unit().await {
                if video.read().await.media_types.sends_video() {
                    candidate = Some(video);
                } else {
                    // (a) sibling units in the same session
                    for unit_arc in &session.medias {
                        if unit_arc.read().await.media_types.sends_video() {
                            candidate = Some(Arc::clone(unit_arc));
                            break;
                        }
                    }
                }
            }
            if candidate.is_none() {
                // (b) all the user's sessions
                let user_id = session.user_id.clone();
                drop(session);
                if let Some(user_arc) = core.users.get(&user_id).map(|u| Arc::clone(u.value())) {
                    let session_ids = user_arc.read().await.sessions.clone();
                    'outer: for session_id in session_ids {
                        let Some(other) =
                            core.sessions.get(&session_id).map(|s| Arc::clone(s.value()))
                        else {
                            continue;
                        };
                        let other = other.lock().await;
                        for unit_arc in &other.medias {
                            if unit_arc.read().await.media_types.sends_video() {
                                candidate = Some(Arc::clone(unit_arc));
                                break 'outer;
                            }
                        }
                    }
                }
            }
        }

        let Some(candidate) = candidate else {
            warn!(
                room_id = %room_id,
                media_id = %media_id,
                "No video-sending media for conference floor, ignoring"
            );
            return self.conference_floor_info(room_id, None).await;
        };

        let unit_id = candidate.read().await.id.clone();
        let room_arc = self.room(room_id)?;
        {
            let mut room = room_arc.write().await;
            room.set_conference_floor(unit_id);
        }
        let floor_info = self.conference_floor_info(room_id, None).await?;
        core.hub.publish(&MediaEvent::ConferenceFloorChanged {
            room_id: room_id.clone(),
            floor: floor_info.floor.clone(),
            previous_floor: floor_info.previous_floor.clone(),
            timestamp: Utc::now(),
        });
        Ok(floor_info)
    }

    pub async fn release_content_floor(&self, room_id: &RoomId) -> Result<FloorInfo> {
        let room_arc = self.room(room_id)?;
        {
            let mut room = room_arc.write().await;
            room.release_content_floor();
        }
        let floor_info = self.content_floor_info(room_id, None).await?;
        self.core.hub.publish(&MediaEvent::ContentFloorChanged {
            room_id: room_id.clone(),
            floor: floor_info.floor.clone(),
            previous_floor: floor_info.previous_floor.clone(),
            timestamp: Utc::now(),
        });
        Ok(floor_info)
    }

    pub async fn release_conference_floor(&self, room_id: &RoomId) -> Result<FloorInfo> {
        let room_arc = self.room(room_id)?;
        {
            let mut room = room_arc.write().await;
            room.release_conference_floor();
        }
        let floor_info = self.conference_floor_info(room_id, None).await?;
        self.core.hub.publish(&MediaEvent::ConferenceFloorChanged {
            room_id: room_id.clone(),
            floor: floor_info.floor.clone(),
            previous_floor: floor_info.previous_floor.clone(),
            timestamp: Utc::now(),
        });
        Ok(floor_info)
    }

    pub async fn content_floor_info(
        &self,
        room_id: &RoomId,
        extra: Option<(&MediaUnitId, &MediaInfo)>,
    ) -> Result<FloorInfo> {
        let room_arc = self.room(room_id)?;
        let room = room_arc.read().await;
        let floor = match room.content_floor() {
            Some(id) => self.resolve_info(id, extra).await,
            None => None,
        };
        let mut previous = Vec::new();
        for id in room.previous_content_floors() {
            if let Some(info) = self.resolve_info(id, extra).await {
                previous.push(info);
            }
        }
        Ok(FloorInfo {
            floor,
            previous_floor: previous,
        })
    }

    pub async fn conference_floor_info(
        &self,
        room_id: &RoomId,
        extra: Option<(&MediaUnitId, &MediaInfo)>,
    ) -> Result<FloorInfo> {
        let room_arc = self.room(room_id)?;
        let room = room_arc.read().await;
        let floor = match room.conference_floor() {
            Some(id) => self.resolve_info(id, extra).await,
            None => None,
        };
        let mut previous = Vec::new();
        for id in room.previous_conference_floors() {
            if let Some(info) = self.resolve_info(id, extra).await {
                previous.push(info);
            }
        }
        Ok(FloorInfo {
            floor,
            previous_floor: previous,
        })
    }

    // ─── queries ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn get_rooms(&self) -> Vec<RoomId> {
        self.core.rooms.iter().map(|e| e.key().clone()).collect()
    }

    pub async fn get_users(&self, room_id: &RoomId) -> Result<Vec<UserInfo>> {
        let room_arc = self.room(room_id)?;
        let user_ids: Vec<UserId> = room_arc.read().await.users.iter().cloned().collect();
        let mut infos = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            if let Some(user_arc) = self.core.users.get(&user_id).map(|u| Arc::clone(u.value())) {
                infos.push(user_arc.read().await.info());
            }
        }
        Ok(infos)
    }

    pub async fn get_user_medias(&self, user_id: &UserId) -> Result<Vec<MediaInfo>> {
        let core = &self.core;
        let user_arc = core
            .users
            .get(user_id)
            .map(|u| Arc::clone(u.value()))
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;
        let session_ids = user_arc.read().await.sessions.clone();
        let mut infos = Vec::new();
        for session_id in session_ids {
            infos.extend(self.session_unit_infos(&session_id).await);
        }
        Ok(infos)
    }

    // ─── media controls ──────────────────────────────────────────────────

    pub async fn set_volume(&self, media_id: &SessionId, volume: u8) -> Result<()> {
        let core = &self.core;
        let unit_arc = self
            .audio_unit_of(media_id)
            .await
            .ok_or_else(|| Error::MediaNotFound(media_id.to_string()))?;
        let element = unit_arc.read().await.element.clone();
        core.adapter.set_volume(&element, volume).await?;
        let unit_id = {
            let mut unit = unit_arc.write().await;
            unit.volume = volume;
            unit.muted = false;
            unit.id.clone()
        };
        core.hub.publish(&MediaEvent::MediaVolumeChanged {
            media_unit_id: unit_id,
            volume,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn mute(&self, media_id: &SessionId) -> Result<()> {
        let core = &self.core;
        let unit_arc = self
            .audio_unit_of(media_id)
            .await
            .ok_or_else(|| Error::MediaNotFound(media_id.to_string()))?;
        let element = unit_arc.read().await.element.clone();
        core.adapter.set_volume(&element, 0).await?;
        let unit_id = {
            let mut unit = unit_arc.write().await;
            unit.muted = true;
            unit.id.clone()
        };
        core.hub.publish(&MediaEvent::MediaMuted {
            media_unit_id: unit_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn unmute(&self, media_id: &SessionId) -> Result<()> {
        let core = &self.core;
        let unit_arc = self
            .audio_unit_of(media_id)
            .await
            .ok_or_else(|| Error::MediaNotFound(media_id.to_string()))?;
        let (element, volume) = {
            let unit = unit_arc.read().await;
            (unit.element.clone(), unit.volume)
        };
        core.adapter.set_volume(&element, volume).await?;
        let unit_id = {
            let mut unit = unit_arc.write().await;
            unit.muted = false;
            unit.id.clone()
        };
        core.hub.publish(&MediaEvent::MediaUnmuted {
            media_unit_id: unit_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn dtmf(&self, media_id: &SessionId, tone: char) -> Result<()> {
        let unit_arc = self
            .audio_unit_of(media_id)
            .await
            .ok_or_else(|| Error::MediaNotFound(media_id.to_string()))?;
        let element = unit_arc.read().await.element.clone();
        self.core.adapter.send_dtmf(&element, tone).await
    }

    pub async fn request_keyframe(&self, media_id: &SessionId) -> Result<()> {
        let units = self.session_units(media_id).await?;
        for unit_arc in units {
            let unit = unit_arc.read().await;
            if unit.media_types.has_video() || unit.media_types.has_content() {
                self.core.hub.publish(&MediaEvent::KeyframeNeeded {
                    media_unit_id: unit.id.clone(),
                    timestamp: Utc::now(),
                });
            }
        }
        Ok(())
    }

    // ─── strategy ────────────────────────────────────────────────────────

    /// Attach a strategy to whatever entity the identifier names
    pub async fn set_strategy(&self, identifier: &str, strategy: Strategy) -> Result<()> {
        let core = &self.core;
        let found = if let Some(room) = core
            .rooms
            .get(&RoomId::from(identifier))
            .map(|r| Arc::clone(r.value()))
        {
            room.write().await.strategy = strategy.clone();
            true
        } else if let Some(user) = core
            .users
            .get(&UserId::from(identifier))
            .map(|u| Arc::clone(u.value()))
        {
            user.write().await.strategy = strategy.clone();
            true
        } else if let Some(session) = core
            .sessions
            .get(&SessionId::from(identifier))
            .map(|s| Arc::clone(s.value()))
        {
            session.lock().await.strategy = strategy.clone();
            true
        } else if let Some(unit) = core
            .units
            .get(&MediaUnitId::from(identifier))
            .map(|u| Arc::clone(u.value()))
        {
            unit.write().await.strategy = strategy.clone();
            true
        } else {
            false
        };

        if !found {
            return Err(Error::MediaNotFound(identifier.to_string()));
        }
        core.hub.publish(&MediaEvent::StrategyChanged {
            identifier: identifier.to_string(),
            strategy: strategy.name,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn get_strategy(&self, identifier: &str) -> Result<Strategy> {
        let core = &self.core;
        if let Some(room) = core
            .rooms
            .get(&RoomId::from(identifier))
            .map(|r| Arc::clone(r.value()))
        {
            return Ok(room.read().await.strategy.clone());
        }
        if let Some(user) = core
            .users
            .get(&UserId::from(identifier))
            .map(|u| Arc::clone(u.value()))
        {
            return Ok(user.read().await.strategy.clone());
        }
        if let Some(session) = core
            .sessions
            .get(&SessionId::from(identifier))
            .map(|s| Arc::clone(s.value()))
        {
            return Ok(session.lock().await.strategy.clone());
        }
        if let Some(unit) = core
            .units
            .get(&MediaUnitId::from(identifier))
            .map(|u| Arc::clone(u.value()))
        {
            return Ok(unit.read().await.strategy.clone());
        }
        Err(Error::MediaNotFound(identifier.to_string()))
    }

    // ─── teardown ────────────────────────────────────────────────────────

    /// Stop every session and release every room. Used at process shutdown.
    pub async fn shutdown(&self) {
        let session_ids: Vec<SessionId> =
            self.core.sessions.iter().map(|e| e.key().clone()).collect();
        for session_id in session_ids {
            if let Err(err) = self.stop_session(&session_id).await {
                warn!(session_id = %session_id, error = %err, "Failed to stop session at shutdown");
            }
        }
        let room_ids = self.get_rooms();
        for room_id in room_ids {
            self.destroy_room(&room_id).await;
        }
        self.core.users.clear();
        self.event_task.abort();
        self.offline_task.abort();
        info!("Controller shut down");
    }

    // ─── internals ───────────────────────────────────────────────────────

    fn room(&self, room_id: &RoomId) -> Result<Arc<RwLock<Room>>> {
        self.core
            .rooms
            .get(room_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))
    }

    async fn assert_session_owner(&self, user_id: &UserId, media_id: &SessionId) -> Result<()> {
        let session = self
            .core
            .sessions
            .get(media_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| Error::MediaNotFound(media_id.to_string()))?;
        let session = session.lock().await;
        if &session.user_id != user_id {
            return Err(Error::MediaInvalidOperation(format!(
                "media {media_id} is not owned by user {user_id}"
            )));
        }
        Ok(())
    }

    async fn session_units(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<Arc<RwLock<MediaUnit>>>> {
        let session = self
            .core
            .sessions
            .get(session_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| Error::MediaNotFound(session_id.to_string()))?;
        let session = session.lock().await;
        Ok(session.medias.clone())
    }

    async fn session_unit_infos(&self, session_id: &SessionId) -> Vec<MediaInfo> {
        let Ok(units) = self.session_units(session_id).await else {
            return Vec::new();
        };
        let mut infos = Vec::with_capacity(units.len());
        for unit_arc in units {
            infos.push(unit_arc.read().await.info());
        }
        infos
    }

    async fn first_unit_of(&self, session_id: &SessionId) -> Option<MediaUnitId> {
        let units = self.session_units(session_id).await.ok()?;
        match units.first() {
            Some(unit) => Some(unit.read().await.id.clone()),
            None => None,
        }
    }

    async fn first_unit_element(
        &self,
        session_id: &SessionId,
    ) -> Option<confab_backend::driver::ElementHandle> {
        let units = self.session_units(session_id).await.ok()?;
        match units.first() {
            Some(unit) => Some(unit.read().await.element.clone()),
            None => None,
        }
    }

    async fn audio_unit_of(&self, session_id: &SessionId) -> Option<Arc<RwLock<MediaUnit>>> {
        let session = self
            .core
            .sessions
            .get(session_id)
            .map(|s| Arc::clone(s.value()))?;
        let session = session.lock().await;
        session.audio_unit().await
    }

    async fn resolve_info(
        &self,
        unit_id: &MediaUnitId,
        extra: Option<(&MediaUnitId, &MediaInfo)>,
    ) -> Option<MediaInfo> {
        if let Some((id, info)) = extra {
            if id == unit_id {
                return Some(info.clone());
            }
        }
        let unit = self.core.units.get(unit_id).map(|u| Arc::clone(u.value()))?;
        let unit = unit.read().await;
        Some(unit.info())
    }

    /// Stop a session, deindex its units, and run the disconnect-driven
    /// floor cleanup.
    pub async fn stop_session(&self, session_id: &SessionId) -> Result<()> {
        let core = &self.core;
        let Some((_, session_arc)) = core.sessions.remove(session_id) else {
            return Ok(());
        };

        // Snapshot before the units are drained
        let (room_id, user_id, unit_snapshots) = {
            let session = session_arc.lock().await;
            let mut snapshots: Vec<(MediaUnitId, ElementId, MediaInfo)> = Vec::new();
            for unit_arc in &session.medias {
                let unit = unit_arc.read().await;
                snapshots.push((unit.id.clone(), unit.element.element_id.clone(), unit.info()));
            }
            (session.room_id.clone(), session.user_id.clone(), snapshots)
        };

        let removed = {
            let mut session = session_arc.lock().await;
            session.stop(&core.adapter, &core.hub).await?
        };

        for (unit_id, element_id, info) in &unit_snapshots {
            core.units.remove(unit_id);
            core.elements.remove(element_id);
            self.release_floors_for(&room_id, unit_id, info).await;
        }

        if let Some(room_arc) = core.rooms.get(&room_id).map(|r| Arc::clone(r.value())) {
            let mut room = room_arc.write().await;
            room.media_sessions.remove(session_id);
            for unit_id in &removed {
                room.medias.remove(unit_id);
            }
            if room.mcu_session.as_ref() == Some(session_id) {
                room.mcu_session = None;
            }
        }
        if let Some(user_arc) = core.users.get(&user_id).map(|u| Arc::clone(u.value())) {
            user_arc.write().await.remove_session(session_id);
        }
        Ok(())
    }

    /// Clear any floor held by a dead media and emit the floor-changed
    /// events.
    async fn release_floors_for(
        &self,
        room_id: &RoomId,
        unit_id: &MediaUnitId,
        info: &MediaInfo,
    ) {
        let core = &self.core;
        let Some(room_arc) = core.rooms.get(room_id).map(|r| Arc::clone(r.value())) else {
            return;
        };
        let release = {
            let mut room = room_arc.write().await;
            room.on_media_disconnected(unit_id)
        };

        if release.content {
            if let Ok(floor_info) = self
                .content_floor_info(room_id, Some((unit_id, info)))
                .await
            {
                core.hub.publish(&MediaEvent::ContentFloorChanged {
                    room_id: room_id.clone(),
                    floor: floor_info.floor,
                    previous_floor: floor_info.previous_floor,
                    timestamp: Utc::now(),
                });
            }
        }
        if release.conference {
            if let Ok(floor_info) = self
                .conference_floor_info(room_id, Some((unit_id, info)))
                .await
            {
                core.hub.publish(&MediaEvent::ConferenceFloorChanged {
                    room_id: room_id.clone(),
                    floor: floor_info.floor,
                    previous_floor: floor_info.previous_floor,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    // ─── backend event pump ──────────────────────────────────────────────

    async fn run_event_pump(core: Arc<Core>, mut events: broadcast::Receiver<BackendEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(err) = Self::handle_backend_event(&core, event).await {
                        error!(error = %err, "Failed to handle backend event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Backend event feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn handle_backend_event(core: &Arc<Core>, event: BackendEvent) -> Result<()> {
        let Some(unit_id) = core
            .elements
            .get(event.element_id())
            .map(|e| e.value().clone())
        else {
            // Transposer endpoints and already-released elements
            return Ok(());
        };
        let Some(unit_arc) = core.units.get(&unit_id).map(|u| Arc::clone(u.value())) else {
            return Ok(());
        };
        let (room_id, session_id, info) = {
            let unit = unit_arc.read().await;
            (unit.room_id.clone(), unit.session_id.clone(), unit.info())
        };

        match event {
            BackendEvent::MediaStateChanged { state, .. } => match state {
                ElementState::Connected => {
                    core.hub.publish(&MediaEvent::MediaConnected {
                        room_id,
                        media: info,
                        timestamp: Utc::now(),
                    });
                }
                ElementState::Disconnected => {
                    Self::handle_media_disconnected(core, &room_id, &unit_id, &info).await;
                }
                ElementState::Talking => {
                    core.hub.publish(&MediaEvent::MediaStartTalking {
                        media_unit_id: unit_id,
                        timestamp: Utc::now(),
                    });
                }
                ElementState::Silence => {
                    core.hub.publish(&MediaEvent::MediaStopTalking {
                        media_unit_id: unit_id,
                        timestamp: Utc::now(),
                    });
                }
            },
            BackendEvent::MediaFlowIn { flowing, .. } => {
                core.hub.publish(&MediaEvent::MediaState {
                    media_unit_id: unit_id,
                    source: "MEDIA_FLOW_IN".to_string(),
                    state: if flowing { "FLOWING" } else { "NOT_FLOWING" }.to_string(),
                    timestamp: Utc::now(),
                });
            }
            BackendEvent::MediaFlowOut { flowing, .. } => {
                core.hub.publish(&MediaEvent::MediaState {
                    media_unit_id: unit_id,
                    source: "MEDIA_FLOW_OUT".to_string(),
                    state: if flowing { "FLOWING" } else { "NOT_FLOWING" }.to_string(),
                    timestamp: Utc::now(),
                });
            }
            BackendEvent::EndOfStream { .. } => {
                core.hub.publish(&MediaEvent::MediaState {
                    media_unit_id: unit_id,
                    source: "MEDIA_ENDOFSTREAM".to_string(),
                    state: "END_OF_STREAM".to_string(),
                    timestamp: Utc::now(),
                });
            }
            BackendEvent::IceCandidate { candidate, .. } => {
                core.hub.publish(&MediaEvent::IceCandidate {
                    media_unit_id: unit_id,
                    candidate,
                    timestamp: Utc::now(),
                });
            }
            BackendEvent::Dtmf { tone, .. } => {
                core.hub.publish(&MediaEvent::Dtmf {
                    media_unit_id: unit_id,
                    tone,
                    timestamp: Utc::now(),
                });
                let command = {
                    let Some(session_arc) =
                        core.sessions.get(&session_id).map(|s| Arc::clone(s.value()))
                    else {
                        return Ok(());
                    };
                    let mut session = session_arc.lock().await;
                    session.dtmf.push(tone.to_string())
                };
                if let Some(command) = command {
                    Self::execute_dtmf_command(core, &room_id, &session_id, command).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_media_disconnected(
        core: &Arc<Core>,
        room_id: &RoomId,
        unit_id: &MediaUnitId,
        info: &MediaInfo,
    ) {
        core.hub.publish(&MediaEvent::MediaDisconnected {
            room_id: room_id.clone(),
            media_unit_id: unit_id.clone(),
            timestamp: Utc::now(),
        });

        let Some(room_arc) = core.rooms.get(room_id).map(|r| Arc::clone(r.value())) else {
            return;
        };
        let release = {
            let mut room = room_arc.write().await;
            room.on_media_disconnected(unit_id)
        };

        if release.content {
            let floor_info = Self::floor_info_static(core, &room_arc, true, unit_id, info).await;
            core.hub.publish(&MediaEvent::ContentFloorChanged {
                room_id: room_id.clone(),
                floor: floor_info.floor,
                previous_floor: floor_info.previous_floor,
                timestamp: Utc::now(),
            });
        }
        if release.conference {
            let floor_info = Self::floor_info_static(core, &room_arc, false, unit_id, info).await;
            core.hub.publish(&MediaEvent::ConferenceFloorChanged {
                room_id: room_id.clone(),
                floor: floor_info.floor,
                previous_floor: floor_info.previous_floor,
                timestamp: Utc::now(),
            });
        }
    }

    async fn floor_info_static(
        core: &Arc<Core>,
        room_arc: &Arc<RwLock<Room>>,
        content: bool,
        dead_id: &MediaUnitId,
        dead_info: &MediaInfo,
    ) -> FloorInfo {
        let (floor_id, history): (Option<MediaUnitId>, Vec<MediaUnitId>) = {
            let room = room_arc.read().await;
            if content {
                (
                    room.content_floor().cloned(),
                    room.previous_content_floors().cloned().collect(),
                )
            } else {
                (
                    room.conference_floor().cloned(),
                    room.previous_conference_floors().cloned().collect(),
                )
            }
        };

        let mut previous = Vec::new();
        for id in &history {
            if let Some(info) = Self::resolve_info_static(core, id, dead_id, dead_info).await {
                previous.push(info);
            }
        }
        let floor = match &floor_id {
            Some(id) => Self::resolve_info_static(core, id, dead_id, dead_info).await,
            None => None,
        };
        FloorInfo {
            floor,
            previous_floor: previous,
        }
    }

    async fn resolve_info_static(
        core: &Arc<Core>,
        unit_id: &MediaUnitId,
        dead_id: &MediaUnitId,
        dead_info: &MediaInfo,
    ) -> Option<MediaInfo> {
        if unit_id == dead_id {
            return Some(dead_info.clone());
        }
        let unit = core.units.get(unit_id).map(|u| Arc::clone(u.value()))?;
        let info = unit.read().await.info();
        Some(info)
    }

    async fn execute_dtmf_command(
        core: &Arc<Core>,
        room_id: &RoomId,
        session_id: &SessionId,
        command: DtmfCommand,
    ) -> Result<()> {
        debug!(room_id = %room_id, session_id = %session_id, command = ?command, "Executing DTMF command");
        let mixer_element = {
            let Some(room_arc) = core.rooms.get(room_id).map(|r| Arc::clone(r.value())) else {
                return Ok(());
            };
            let mcu_session = room_arc.read().await.mcu_session.clone();
            match mcu_session {
                Some(mcu_id) => {
                    let Some(mcu_arc) = core.sessions.get(&mcu_id).map(|s| Arc::clone(s.value()))
                    else {
                        return Ok(());
                    };
                    let mcu = mcu_arc.lock().await;
                    match mcu.medias.first() {
                        Some(unit) => Some(unit.read().await.element.clone()),
                        None => None,
                    }
                }
                None => None,
            }
        };

        match command {
            DtmfCommand::SetVideoFloor => {
                let Some(mixer) = mixer_element else {
                    return Ok(());
                };
                let Some(session_arc) =
                    core.sessions.get(session_id).map(|s| Arc::clone(s.value()))
                else {
                    return Ok(());
                };
                let video = {
                    let session = session_arc.lock().await;
                    session.video_unit().await
                };
                if let Some(video) = video {
                    let element = video.read().await.element.clone();
                    core.adapter.set_video_floor(&mixer, &element).await?;
                }
            }
            DtmfCommand::SetLayout { layout } => {
                let Some(mixer) = mixer_element else {
                    return Ok(());
                };
                core.adapter.set_layout_type(&mixer, &layout).await?;
            }
            DtmfCommand::ToggleSubtitle => {
                let Some(room_arc) = core.rooms.get(room_id).map(|r| Arc::clone(r.value())) else {
                    return Ok(());
                };
                let media_ids: Vec<MediaUnitId> =
                    room_arc.read().await.medias.iter().cloned().collect();
                for media_id in media_ids {
                    if let Some(unit_arc) = core.units.get(&media_id).map(|u| Arc::clone(u.value()))
                    {
                        let mut unit = unit_arc.write().await;
                        unit.enable_subtitle = !unit.enable_subtitle;
                    }
                }
            }
            DtmfCommand::ToggleMediaSubtitle => {
                let Some(session_arc) =
                    core.sessions.get(session_id).map(|s| Arc::clone(s.value()))
                else {
                    return Ok(());
                };
                let units = session_arc.lock().await.medias.clone();
                for unit_arc in units {
                    let mut unit = unit_arc.write().await;
                    unit.enable_subtitle = !unit.enable_subtitle;
                }
            }
        }
        Ok(())
    }

    // ─── host failures ───────────────────────────────────────────────────

    async fn run_offline_watcher(core: Arc<Core>, mut offline: broadcast::Receiver<HostId>) {
        loop {
            match offline.recv().await {
                Ok(host_id) => {
                    warn!(host_id = %host_id, "Purging state for offline host");
                    core.hub.publish(&MediaEvent::MediaServerOffline {
                        host_id: host_id.clone(),
                        timestamp: Utc::now(),
                    });
                    core.adapter.purge_host(&host_id);
                    Self::drop_units_on_host(&core, &host_id).await;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Remove every media unit living on a lost host, with floor cleanup
    /// and disconnect events but no backend round-trips.
    async fn drop_units_on_host(core: &Arc<Core>, host_id: &HostId) {
        let candidates: Vec<(MediaUnitId, Arc<RwLock<MediaUnit>>)> = core
            .units
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        let mut doomed: Vec<(MediaUnitId, Arc<RwLock<MediaUnit>>)> = Vec::new();
        for (unit_id, unit_arc) in candidates {
            if &unit_arc.read().await.element.host_id == host_id {
                doomed.push((unit_id, unit_arc));
            }
        }

        for (unit_id, unit_arc) in doomed {
            let (room_id, session_id, element_id, info) = {
                let unit = unit_arc.read().await;
                (
                    unit.room_id.clone(),
                    unit.session_id.clone(),
                    unit.element.element_id.clone(),
                    unit.info(),
                )
            };
            if let Some(session_arc) = core.sessions.get(&session_id).map(|s| Arc::clone(s.value()))
            {
                let mut session = session_arc.lock().await;
                let mut kept = Vec::new();
                for existing in session.medias.drain(..) {
                    if existing.read().await.id != unit_id {
                        kept.push(existing);
                    }
                }
                session.medias = kept;
            }
            core.units.remove(&unit_id);
            core.elements.remove(&element_id);
            if let Some(room_arc) = core.rooms.get(&room_id).map(|r| Arc::clone(r.value())) {
                room_arc.write().await.medias.remove(&unit_id);
            }
            Self::handle_media_disconnected(core, &room_id, &unit_id, &info).await;
        }
    }
}
