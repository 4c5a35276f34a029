//! Per-profile adapter composition.
//!
//! A composed adapter routes MAIN, AUDIO and CONTENT media to different
//! physical backends. `negotiate` fan-splits one offer into per-profile
//! partials, negotiates them in parallel and returns the units tagged with
//! their profile so the session can reassemble the answer in offer order.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use confab_core::events::IceCandidateInfo;
use confab_core::models::id::{HostId, RoomId, SessionId, UserId};
use confab_core::models::media::{ConnectionKind, MediaProfile, SessionType};
use confab_core::Result;

use crate::adapter::{no_codec_error, MediaAdapter, NegotiateOptions, NegotiatedMedia};
use crate::driver::{BackendEvent, ElementHandle};

/// Routes media profiles to dedicated backends, falling back to the main
/// backend for profiles without one.
pub struct ComposedAdapter {
    main: Arc<dyn MediaAdapter>,
    audio: Option<Arc<dyn MediaAdapter>>,
    content: Option<Arc<dyn MediaAdapter>>,
    event_tx: broadcast::Sender<BackendEvent>,
}

impl ComposedAdapter {
    #[must_use]
    pub fn new(
        main: Arc<dyn MediaAdapter>,
        audio: Option<Arc<dyn MediaAdapter>>,
        content: Option<Arc<dyn MediaAdapter>>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        let composed = Arc::new(Self {
            main,
            audio,
            content,
            event_tx,
        });

        // Merge every distinct sub-backend's event feed into one
        let mut feeds = vec![composed.main.events()];
        if composed.audio.is_some() {
            feeds.push(composed.backend_for(MediaProfile::Audio).events());
        }
        if composed.content.is_some() {
            feeds.push(composed.backend_for(MediaProfile::Content).events());
        }
        for mut feed in feeds {
            let tx = composed.event_tx.clone();
            tokio::spawn(async move {
                while let Ok(event) = feed.recv().await {
                    let _ = tx.send(event);
                }
            });
        }

        composed
    }

    #[must_use]
    pub fn backend_for(&self, profile: MediaProfile) -> &Arc<dyn MediaAdapter> {
        match profile {
            MediaProfile::Audio => self.audio.as_ref().unwrap_or(&self.main),
            MediaProfile::Content => self.content.as_ref().unwrap_or(&self.main),
            MediaProfile::Main | MediaProfile::All => &self.main,
        }
    }

    /// The per-profile partials a negotiate call fans out to.
    /// With a remote descriptor, only the profiles present in it take part;
    /// for offer generation the requested profile decides.
    fn split(
        remote: Option<&str>,
        requested: MediaProfile,
    ) -> Vec<(MediaProfile, Option<String>)> {
        match remote {
            Some(sdp) => {
                let mut parts = Vec::new();
                if let Some(audio) = confab_sdp::audio_partial(sdp) {
                    parts.push((MediaProfile::Audio, Some(audio)));
                }
                if let Some(video) = confab_sdp::video_partial(sdp) {
                    parts.push((MediaProfile::Main, Some(video)));
                }
                if let Some(content) = confab_sdp::content_partial(sdp) {
                    parts.push((MediaProfile::Content, Some(content)));
                }
                parts
            }
            None => match requested {
                MediaProfile::All => vec![
                    (MediaProfile::Audio, None),
                    (MediaProfile::Main, None),
                ],
                profile => vec![(profile, None)],
            },
        }
    }
}

#[async_trait]
impl MediaAdapter for ComposedAdapter {
    async fn negotiate(
        &self,
        room: &RoomId,
        user: &UserId,
        session: &SessionId,
        remote: Option<&str>,
        session_type: SessionType,
        profile: MediaProfile,
        options: &NegotiateOptions,
    ) -> Result<Vec<NegotiatedMedia>> {
        if matches!(session_type, SessionType::Mcu | SessionType::Filter) {
            return self
                .main
                .negotiate(room, user, session, remote, session_type, profile, options)
                .await;
        }

        let parts = Self::split(remote, profile);
        if parts.is_empty() {
            return Err(no_codec_error(session));
        }
        debug!(
            session_id = %session,
            profiles = parts.len(),
            "Fan-split negotiation"
        );

        let negotiations = parts.into_iter().map(|(part_profile, partial)| {
            let backend = Arc::clone(self.backend_for(part_profile));
            let options = options.clone();
            let room = room.clone();
            let user = user.clone();
            let session = session.clone();
            async move {
                let mut units = backend
                    .negotiate(
                        &room,
                        &user,
                        &session,
                        partial.as_deref(),
                        session_type,
                        part_profile,
                        &options,
                    )
                    .await?;
                // Post-filter each unit's local descriptor to its profile
                for unit in &mut units {
                    unit.profile = part_profile;
                    if let Some(local) = unit.local_descriptor.take() {
                        let filtered = match part_profile {
                            MediaProfile::Audio => confab_sdp::audio_partial(&local),
                            MediaProfile::Main => confab_sdp::video_partial(&local),
                            MediaProfile::Content => confab_sdp::content_partial(&local)
                                .or_else(|| {
                                    confab_sdp::video_partial(&local)
                                        .map(|v| confab_sdp::mark_content_slides(&v))
                                }),
                            MediaProfile::All => Some(local.clone()),
                        };
                        unit.local_descriptor = Some(filtered.unwrap_or(local));
                    }
                }
                Ok::<Vec<NegotiatedMedia>, confab_core::Error>(units)
            }
        });

        let results = try_join_all(negotiations).await?;
        Ok(results.into_iter().flatten().collect())
    }

    async fn process_answer(&self, element: &ElementHandle, sdp: &str) -> Result<()> {
        self.backend_for(element.profile)
            .process_answer(element, sdp)
            .await
    }

    async fn generate_offer(&self, element: &ElementHandle) -> Result<String> {
        self.backend_for(element.profile).generate_offer(element).await
    }

    async fn gather_candidates(&self, element: &ElementHandle) -> Result<()> {
        self.backend_for(element.profile)
            .gather_candidates(element)
            .await
    }

    async fn add_ice_candidate(
        &self,
        element: &ElementHandle,
        candidate: &IceCandidateInfo,
    ) -> Result<()> {
        self.backend_for(element.profile)
            .add_ice_candidate(element, candidate)
            .await
    }

    async fn connect(
        &self,
        source: &ElementHandle,
        sink: &ElementHandle,
        kind: ConnectionKind,
    ) -> Result<()> {
        self.backend_for(source.profile)
            .connect(source, sink, kind)
            .await
    }

    async fn disconnect(
        &self,
        source: &ElementHandle,
        sink: &ElementHandle,
        kind: ConnectionKind,
    ) -> Result<()> {
        self.backend_for(source.profile)
            .disconnect(source, sink, kind)
            .await
    }

    async fn start_recording(&self, element: &ElementHandle, path: &str) -> Result<()> {
        self.backend_for(element.profile)
            .start_recording(element, path)
            .await
    }

    async fn stop_recording(&self, element: &ElementHandle) -> Result<()> {
        self.backend_for(element.profile).stop_recording(element).await
    }

    async fn set_video_floor(&self, mixer: &ElementHandle, element: &ElementHandle) -> Result<()> {
        self.backend_for(mixer.profile)
            .set_video_floor(mixer, element)
            .await
    }

    async fn set_layout_type(&self, mixer: &ElementHandle, layout: &str) -> Result<()> {
        self.backend_for(mixer.profile)
            .set_layout_type(mixer, layout)
            .await
    }

    async fn set_volume(&self, element: &ElementHandle, volume: u8) -> Result<()> {
        self.backend_for(element.profile)
            .set_volume(element, volume)
            .await
    }

    async fn send_dtmf(&self, element: &ElementHandle, tone: char) -> Result<()> {
        self.backend_for(element.profile).send_dtmf(element, tone).await
    }

    async fn stop(&self, element: &ElementHandle) -> Result<()> {
        self.backend_for(element.profile).stop(element).await
    }

    fn purge_host(&self, host_id: &HostId) {
        self.main.purge_host(host_id);
        if let Some(audio) = &self.audio {
            audio.purge_host(host_id);
        }
        if let Some(content) = &self.content {
            content.purge_host(host_id);
        }
    }

    fn events(&self) -> broadcast::Receiver<BackendEvent> {
        self.event_tx.subscribe()
    }

    fn is_composed(&self) -> bool {
        true
    }
}
