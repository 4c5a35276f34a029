//! Session-facing adapter contract and its single-backend implementation.
//!
//! A [`MediaAdapter`] hides host selection, pipeline bookkeeping and
//! cross-host transposition behind element-level operations. Sessions hand
//! it raw descriptors and get back [`NegotiatedMedia`] records to wrap into
//! media units.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use confab_core::config::BackendConfig;
use confab_core::events::IceCandidateInfo;
use confab_core::models::id::{RoomId, SessionId, UserId};
use confab_core::models::media::{
    ConnectionKind, MediaProfile, MediaTypesMap, SessionType,
};
use confab_core::{Error, EventHub, Result};

use crate::balancer::Balancer;
use crate::driver::{
    BackendEvent, ElementHandle, ElementKind, ElementOptions, MediaDriver,
};
use crate::pipeline::PipelineRegistry;
use crate::transposer::TransposerManager;

/// Options carried by a negotiate call
#[derive(Debug, Clone, Default)]
pub struct NegotiateOptions {
    /// Source URI for player-backed (URI) sessions
    pub uri: Option<String>,
    /// Target path for recorder-backed sessions
    pub record_path: Option<String>,
}

/// One negotiated backend element, ready to be wrapped into a media unit
#[derive(Debug, Clone)]
pub struct NegotiatedMedia {
    pub element: ElementHandle,
    pub profile: MediaProfile,
    pub local_descriptor: Option<String>,
    pub remote_descriptor: Option<String>,
    pub media_types: MediaTypesMap,
}

/// Backend-neutral operations the orchestrator drives media servers with
#[async_trait]
pub trait MediaAdapter: Send + Sync {
    /// Create and negotiate the element(s) for one offer/answer exchange.
    /// `remote == None` requests local offer generation.
    async fn negotiate(
        &self,
        room: &RoomId,
        user: &UserId,
        session: &SessionId,
        remote: Option<&str>,
        session_type: SessionType,
        profile: MediaProfile,
        options: &NegotiateOptions,
    ) -> Result<Vec<NegotiatedMedia>>;

    async fn process_answer(&self, element: &ElementHandle, sdp: &str) -> Result<()>;
    async fn generate_offer(&self, element: &ElementHandle) -> Result<String>;
    async fn gather_candidates(&self, element: &ElementHandle) -> Result<()>;
    async fn add_ice_candidate(
        &self,
        element: &ElementHandle,
        candidate: &IceCandidateInfo,
    ) -> Result<()>;

    async fn connect(
        &self,
        source: &ElementHandle,
        sink: &ElementHandle,
        kind: ConnectionKind,
    ) -> Result<()>;
    async fn disconnect(
        &self,
        source: &ElementHandle,
        sink: &ElementHandle,
        kind: ConnectionKind,
    ) -> Result<()>;

    async fn start_recording(&self, element: &ElementHandle, path: &str) -> Result<()>;
    async fn stop_recording(&self, element: &ElementHandle) -> Result<()>;

    async fn set_video_floor(&self, mixer: &ElementHandle, element: &ElementHandle) -> Result<()>;
    async fn set_layout_type(&self, mixer: &ElementHandle, layout: &str) -> Result<()>;
    async fn set_volume(&self, element: &ElementHandle, volume: u8) -> Result<()>;
    async fn send_dtmf(&self, element: &ElementHandle, tone: char) -> Result<()>;

    /// Release the element, its transposers and its pipeline share
    async fn stop(&self, element: &ElementHandle) -> Result<()>;

    /// Drop all state bound to an offline host, without backend round-trips
    fn purge_host(&self, host_id: &confab_core::models::id::HostId);

    fn events(&self) -> broadcast::Receiver<BackendEvent>;

    /// Whether media profiles route to different physical backends
    fn is_composed(&self) -> bool {
        false
    }
}

/// Adapter over a single media-server backend
pub struct BackendAdapter {
    driver: Arc<dyn MediaDriver>,
    balancer: Arc<Balancer>,
    pipelines: Arc<PipelineRegistry>,
    transposers: TransposerManager,
}

impl BackendAdapter {
    #[must_use]
    pub fn new(
        driver: Arc<dyn MediaDriver>,
        balancer: Arc<Balancer>,
        hub: EventHub,
        config: &BackendConfig,
    ) -> Self {
        let pipelines = Arc::new(PipelineRegistry::new(Arc::clone(&driver)));
        let transposers = TransposerManager::new(
            Arc::clone(&driver),
            Arc::clone(&balancer),
            Arc::clone(&pipelines),
            hub,
            config.transposition_codec.clone(),
        );
        Self {
            driver,
            balancer,
            pipelines,
            transposers,
        }
    }

    #[must_use]
    pub fn pipelines(&self) -> &Arc<PipelineRegistry> {
        &self.pipelines
    }

    #[must_use]
    pub fn transposers(&self) -> &TransposerManager {
        &self.transposers
    }
}

#[async_trait]
impl MediaAdapter for BackendAdapter {
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
        let host = self.balancer.get_host(profile)?;
        let pipeline = self.pipelines.get_or_create(room, &host).await?;

        let element_options = ElementOptions {
            profile: Some(profile),
            uri: options.uri.clone(),
            record_path: options.record_path.clone(),
        };
        let element_id = self
            .driver
            .create_element(
                &host,
                &pipeline.id,
                ElementKind::for_session(session_type),
                &element_options,
            )
            .await?;
        self.pipelines.element_created(&pipeline);
        self.balancer.increment_host_streams(&host.id, profile);

        let element = ElementHandle {
            element_id,
            host_id: host.id.clone(),
            room_id: room.clone(),
            profile,
        };

        let (local, remote_stored, media_types) = match remote {
            Some(remote_sdp) => {
                let answer = self
                    .driver
                    .process_offer(&host, &element.element_id, remote_sdp)
                    .await?;
                let types = confab_sdp::media_types_of(remote_sdp);
                (Some(answer), Some(remote_sdp.to_string()), types)
            }
            None if matches!(
                session_type,
                SessionType::Mcu | SessionType::Filter | SessionType::Recording | SessionType::Uri
            ) =>
            {
                // Mixers, filters, recorders and players carry no
                // descriptor of their own unless one is supplied
                (None, None, MediaTypesMap::default())
            }
            None => {
                let mut offer = self
                    .driver
                    .generate_offer(&host, &element.element_id)
                    .await?;
                if session_type == SessionType::Rtp {
                    offer = confab_sdp::downgrade_to_plain_rtp(&offer);
                }
                let types = confab_sdp::media_types_of(&offer);
                (Some(offer), None, types)
            }
        };

        if session_type == SessionType::WebRtc {
            self.driver
                .gather_candidates(&host, &element.element_id)
                .await?;
        }

        info!(
            room_id = %room,
            user_id = %user,
            session_id = %session,
            element_id = %element.element_id,
            host_id = %host.id,
            profile = %profile.as_str(),
            "Negotiated media element"
        );

        Ok(vec![NegotiatedMedia {
            element,
            profile,
            local_descriptor: local,
            remote_descriptor: remote_stored,
            media_types,
        }])
    }

    async fn process_answer(&self, element: &ElementHandle, sdp: &str) -> Result<()> {
        let host = self.balancer.retrieve_host(&element.host_id)?;
        self.driver
            .process_answer(&host, &element.element_id, sdp)
            .await
    }

    async fn generate_offer(&self, element: &ElementHandle) -> Result<String> {
        let host = self.balancer.retrieve_host(&element.host_id)?;
        self.driver.generate_offer(&host, &element.element_id).await
    }

    async fn gather_candidates(&self, element: &ElementHandle) -> Result<()> {
        let host = self.balancer.retrieve_host(&element.host_id)?;
        self.driver
            .gather_candidates(&host, &element.element_id)
            .await
    }

    async fn add_ice_candidate(
        &self,
        element: &ElementHandle,
        candidate: &IceCandidateInfo,
    ) -> Result<()> {
        let host = self.balancer.retrieve_host(&element.host_id)?;
        self.driver
            .add_ice_candidate(&host, &element.element_id, candidate)
            .await
    }

    async fn connect(
        &self,
        source: &ElementHandle,
        sink: &ElementHandle,
        kind: ConnectionKind,
    ) -> Result<()> {
        if source.host_id == sink.host_id {
            let host = self.balancer.retrieve_host(&source.host_id)?;
            return self
                .driver
                .connect(&host, &source.element_id, &sink.element_id, kind)
                .await;
        }

        // Different hosts: bridge through a transposer pair, then wire the
        // sink leg
        debug!(
            source = %source.element_id,
            sink = %sink.element_id,
            source_host = %source.host_id,
            sink_host = %sink.host_id,
            "Cross-host connect"
        );
        let sink_tx = self.transposers.bridge(source, &sink.host_id, kind).await?;
        let sink_host = self.balancer.retrieve_host(&sink.host_id)?;
        self.driver
            .connect(&sink_host, &sink_tx, &sink.element_id, kind)
            .await
    }

    async fn disconnect(
        &self,
        source: &ElementHandle,
        sink: &ElementHandle,
        kind: ConnectionKind,
    ) -> Result<()> {
        if source.host_id == sink.host_id {
            let host = self.balancer.retrieve_host(&source.host_id)?;
            return self
                .driver
                .disconnect(&host, &source.element_id, &sink.element_id, kind)
                .await;
        }
        self.transposers.disconnect_sink(source, sink, kind).await
    }

    async fn start_recording(&self, element: &ElementHandle, path: &str) -> Result<()> {
        let host = self.balancer.retrieve_host(&element.host_id)?;
        self.driver
            .start_recording(&host, &element.element_id, path)
            .await
    }

    async fn stop_recording(&self, element: &ElementHandle) -> Result<()> {
        let host = self.balancer.retrieve_host(&element.host_id)?;
        self.driver.stop_recording(&host, &element.element_id).await
    }

    async fn set_video_floor(&self, mixer: &ElementHandle, element: &ElementHandle) -> Result<()> {
        let host = self.balancer.retrieve_host(&mixer.host_id)?;
        self.driver
            .set_video_floor(&host, &mixer.element_id, &element.element_id)
            .await
    }

    async fn set_layout_type(&self, mixer: &ElementHandle, layout: &str) -> Result<()> {
        let host = self.balancer.retrieve_host(&mixer.host_id)?;
        self.driver
            .set_layout_type(&host, &mixer.element_id, layout)
            .await
    }

    async fn set_volume(&self, element: &ElementHandle, volume: u8) -> Result<()> {
        let host = self.balancer.retrieve_host(&element.host_id)?;
        self.driver
            .set_volume(&host, &element.element_id, volume)
            .await
    }

    async fn send_dtmf(&self, element: &ElementHandle, tone: char) -> Result<()> {
        let host = self.balancer.retrieve_host(&element.host_id)?;
        self.driver
            .send_dtmf(&host, &element.element_id, tone)
            .await
    }

    async fn stop(&self, element: &ElementHandle) -> Result<()> {
        self.transposers
            .release_source(&element.element_id)
            .await?;

        let host = self.balancer.retrieve_host(&element.host_id)?;
        self.driver
            .release_element(&host, &element.element_id)
            .await?;
        self.pipelines
            .element_released(&element.room_id, &host)
            .await?;
        self.balancer
            .decrement_host_streams(&element.host_id, element.profile);
        Ok(())
    }

    fn purge_host(&self, host_id: &confab_core::models::id::HostId) {
        self.pipelines.purge_host(host_id);
        self.transposers.purge_host(host_id);
    }

    fn events(&self) -> broadcast::Receiver<BackendEvent> {
        self.driver.events()
    }
}

/// A negotiate with a remote descriptor that produced nothing negotiable
pub(crate) fn no_codec_error(session: &SessionId) -> Error {
    Error::MediaNoAvailableCodec(format!("No negotiable codec for session {session}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::{BalanceStrategy, Host};
    use crate::testing::{sdp, MockDriver};
    use confab_core::config::BackendConfig;

    struct Fixture {
        driver: Arc<MockDriver>,
        adapter: Arc<BackendAdapter>,
        hub: EventHub,
    }

    fn fixture(hosts: &[&str]) -> Fixture {
        let driver = Arc::new(MockDriver::new());
        let balancer = Arc::new(Balancer::new(BalanceStrategy::RoundRobin));
        for (i, id) in hosts.iter().enumerate() {
            balancer.add_host(Host::new(*id, format!("10.0.0.{}", i + 1), vec![]));
        }
        let hub = EventHub::new();
        let adapter = Arc::new(BackendAdapter::new(
            Arc::clone(&driver) as Arc<dyn MediaDriver>,
            balancer,
            hub.clone(),
            &BackendConfig::default(),
        ));
        Fixture {
            driver,
            adapter,
            hub,
        }
    }

    async fn negotiated(adapter: &BackendAdapter, room: &str, remote: Option<&str>) -> NegotiatedMedia {
        adapter
            .negotiate(
                &RoomId::from(room),
                &UserId::from("u1"),
                &SessionId::new(),
                remote,
                SessionType::WebRtc,
                MediaProfile::All,
                &NegotiateOptions::default(),
            )
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_negotiate_with_offer_answers() {
        let f = fixture(&["h1"]);
        let media = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;

        assert!(media.local_descriptor.as_deref().unwrap().contains("o=mock"));
        assert_eq!(media.remote_descriptor.as_deref(), Some(sdp::AUDIO_VIDEO_OFFER));
        assert!(media.media_types.has_audio());
        assert!(media.media_types.has_video());

        let names = f.driver.call_names();
        assert_eq!(
            names,
            vec![
                "create_pipeline",
                "create_element",
                "process_offer",
                "gather_candidates"
            ]
        );
    }

    #[tokio::test]
    async fn test_negotiate_without_offer_generates() {
        let f = fixture(&["h1"]);
        let media = negotiated(&f.adapter, "r1", None).await;

        assert!(media.local_descriptor.is_some());
        assert!(media.remote_descriptor.is_none());
        assert_eq!(f.driver.count("generate_offer"), 1);
    }

    #[tokio::test]
    async fn test_same_host_connect_is_direct() {
        let f = fixture(&["h1"]);
        let a = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        let b = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        f.driver.clear_calls();

        f.adapter
            .connect(&a.element, &b.element, ConnectionKind::All)
            .await
            .unwrap();
        assert_eq!(f.driver.call_names(), vec!["connect"]);
        assert_eq!(f.adapter.transposers().pair_count(), 0);
    }

    #[tokio::test]
    async fn test_cross_host_connect_builds_transposer() {
        let f = fixture(&["h1", "h2"]);
        // Round-robin puts source on h1, sink on h2
        let source = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        let sink = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        assert_ne!(source.element.host_id, sink.element.host_id);
        f.driver.clear_calls();

        f.adapter
            .connect(&source.element, &sink.element, ConnectionKind::Video)
            .await
            .unwrap();

        let names = f.driver.call_names();
        // Pipeline for the sink host already exists; the pair costs two RTP
        // elements, one offer/answer exchange and two connects
        assert_eq!(names.iter().filter(|n| **n == "create_element").count(), 2);
        assert_eq!(f.driver.count("generate_offer"), 1);
        assert_eq!(f.driver.count("process_offer"), 1);
        assert_eq!(f.driver.count("process_answer"), 1);
        assert_eq!(f.driver.count("connect"), 2);

        // Offer crossed with the source host's IP, answer with the sink's
        let offer = f.driver.offers_seen().pop().unwrap();
        assert!(offer.contains("c=IN IP4 10.0.0.1"));
        // Transposed video is pinned to the configured codec
        assert!(!offer.contains("VP8"));
        let answer = f.driver.answers_seen().pop().unwrap();
        assert!(answer.contains("c=IN IP4 10.0.0.2"));
    }

    #[tokio::test]
    async fn test_second_sink_reuses_transposer() {
        let f = fixture(&["h1", "h2"]);
        let source = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        let sink_a = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        f.adapter
            .connect(&source.element, &sink_a.element, ConnectionKind::Video)
            .await
            .unwrap();

        // Another sink on the same remote host: no new pair, one connect
        let _skip = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await; // lands on h1
        let sink_b = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await; // h2
        f.driver.clear_calls();

        f.adapter
            .connect(&source.element, &sink_b.element, ConnectionKind::Video)
            .await
            .unwrap();
        assert_eq!(f.driver.call_names(), vec!["connect"]);
        assert_eq!(f.adapter.transposers().pair_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cross_host_connect_coalesces() {
        let f = fixture(&["h1", "h2"]);
        let source = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        let sink_a = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        let _skip = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        let sink_b = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        f.driver.clear_calls();

        let (_, mut transposed_rx) = f
            .hub
            .subscribe(confab_core::EventKind::ElementTransposed, "all");

        let adapter_a = Arc::clone(&f.adapter);
        let adapter_b = Arc::clone(&f.adapter);
        let (src_a, snk_a) = (source.element.clone(), sink_a.element.clone());
        let (src_b, snk_b) = (source.element.clone(), sink_b.element.clone());
        let first = tokio::spawn(async move {
            adapter_a.connect(&src_a, &snk_a, ConnectionKind::Video).await
        });
        let second = tokio::spawn(async move {
            adapter_b.connect(&src_b, &snk_b, ConnectionKind::Video).await
        });
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        // Exactly one pair was negotiated
        assert_eq!(f.driver.count("generate_offer"), 1);
        assert_eq!(f.driver.count("process_offer"), 1);
        assert_eq!(f.adapter.transposers().pair_count(), 1);
        // source leg once, one sink leg each
        assert_eq!(f.driver.count("connect"), 3);
        assert!(transposed_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_stop_releases_element_pipeline_and_transposers() {
        let f = fixture(&["h1", "h2"]);
        let source = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        let sink = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        f.adapter
            .connect(&source.element, &sink.element, ConnectionKind::Video)
            .await
            .unwrap();

        f.adapter.stop(&sink.element).await.unwrap();
        f.adapter.stop(&source.element).await.unwrap();

        assert_eq!(f.adapter.transposers().pair_count(), 0);
        // Both room pipelines are gone once their last elements left
        assert_eq!(f.adapter.pipelines().pipeline_count(), 0);
        assert!(f.driver.count("release_pipeline") >= 2);
    }

    #[tokio::test]
    async fn test_disconnect_cross_host_touches_only_sink_leg() {
        let f = fixture(&["h1", "h2"]);
        let source = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        let sink = negotiated(&f.adapter, "r1", Some(sdp::AUDIO_VIDEO_OFFER)).await;
        f.adapter
            .connect(&source.element, &sink.element, ConnectionKind::Video)
            .await
            .unwrap();
        f.driver.clear_calls();

        f.adapter
            .disconnect(&source.element, &sink.element, ConnectionKind::Video)
            .await
            .unwrap();

        assert_eq!(f.driver.call_names(), vec!["disconnect"]);
        // Pair survives for other sinks on that host
        assert_eq!(f.adapter.transposers().pair_count(), 1);
    }
}
