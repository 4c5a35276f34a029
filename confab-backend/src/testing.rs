//! Scripted in-memory driver for tests.
//!
//! Records every call in arrival order and answers SDP exchanges with
//! deterministic descriptors, so orchestration tests can assert exact
//! backend call sequences without a media server.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::broadcast;

use confab_core::events::IceCandidateInfo;
use confab_core::models::id::{ElementId, HostId, PipelineId, RoomId};
use confab_core::models::media::ConnectionKind;
use confab_core::{Error, Result};

use crate::balancer::Host;
use crate::driver::{BackendEvent, ElementKind, ElementOptions, MediaDriver};

/// Sample descriptors shared by tests
pub mod sdp {
    pub const AUDIO_VIDEO_OFFER: &str = "v=0\r\n\
o=client 1 1 IN IP4 198.51.100.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 5004 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 198.51.100.1\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=sendrecv\r\n\
m=video 5006 UDP/TLS/RTP/SAVPF 96 97\r\n\
c=IN IP4 198.51.100.1\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 H264/90000\r\n\
a=content:main\r\n\
a=sendrecv\r\n";

    pub const AUDIO_VIDEO_CONTENT_OFFER: &str = "v=0\r\n\
o=client 2 1 IN IP4 198.51.100.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 5004 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 198.51.100.1\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=sendrecv\r\n\
m=video 5006 UDP/TLS/RTP/SAVPF 97\r\n\
c=IN IP4 198.51.100.1\r\n\
a=rtpmap:97 H264/90000\r\n\
a=content:main\r\n\
a=sendrecv\r\n\
m=video 5008 UDP/TLS/RTP/SAVPF 98\r\n\
c=IN IP4 198.51.100.1\r\n\
a=rtpmap:98 H264/90000\r\n\
a=content:slides\r\n\
a=sendonly\r\n";

    pub const AUDIO_ONLY_OFFER: &str = "v=0\r\n\
o=client 3 1 IN IP4 198.51.100.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 5004 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 198.51.100.1\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=sendrecv\r\n";

    pub const VIDEO_ONLY_OFFER: &str = "v=0\r\n\
o=server 4 1 IN IP4 0.0.0.0\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 6000 RTP/AVP 96 97\r\n\
c=IN IP4 0.0.0.0\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 H264/90000\r\n\
a=sendrecv\r\n";
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Ping(HostId),
    CreatePipeline(HostId, RoomId),
    ReleasePipeline(HostId, PipelineId),
    CreateElement(HostId, PipelineId, ElementKind),
    ReleaseElement(HostId, ElementId),
    ProcessOffer(HostId, ElementId),
    ProcessAnswer(HostId, ElementId),
    GenerateOffer(HostId, ElementId),
    GatherCandidates(ElementId),
    AddIceCandidate(ElementId),
    Connect(HostId, ElementId, ElementId, ConnectionKind),
    Disconnect(HostId, ElementId, ElementId, ConnectionKind),
    StartRecording(ElementId, String),
    StopRecording(ElementId),
    SetVideoFloor(ElementId, ElementId),
    SetLayoutType(ElementId, String),
    SetVolume(ElementId, u8),
    SendDtmf(ElementId, char),
}

impl Call {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ping(_) => "ping",
            Self::CreatePipeline(_, _) => "create_pipeline",
            Self::ReleasePipeline(_, _) => "release_pipeline",
            Self::CreateElement(_, _, _) => "create_element",
            Self::ReleaseElement(_, _) => "release_element",
            Self::ProcessOffer(_, _) => "process_offer",
            Self::ProcessAnswer(_, _) => "process_answer",
            Self::GenerateOffer(_, _) => "generate_offer",
            Self::GatherCandidates(_) => "gather_candidates",
            Self::AddIceCandidate(_) => "add_ice_candidate",
            Self::Connect(_, _, _, _) => "connect",
            Self::Disconnect(_, _, _, _) => "disconnect",
            Self::StartRecording(_, _) => "start_recording",
            Self::StopRecording(_) => "stop_recording",
            Self::SetVideoFloor(_, _) => "set_video_floor",
            Self::SetLayoutType(_, _) => "set_layout_type",
            Self::SetVolume(_, _) => "set_volume",
            Self::SendDtmf(_, _) => "send_dtmf",
        }
    }
}

/// Deterministic in-memory media driver
pub struct MockDriver {
    calls: Mutex<Vec<Call>>,
    created_elements: Mutex<Vec<ElementId>>,
    element_kinds: DashMap<ElementId, ElementKind>,
    offers_seen: Mutex<Vec<String>>,
    answers_seen: Mutex<Vec<String>>,
    next_id: AtomicU64,
    fail_next_create_pipeline: AtomicBool,
    failing_pings: DashMap<HostId, bool>,
    event_tx: broadcast::Sender<BackendEvent>,
}

impl MockDriver {
    #[must_use]
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            calls: Mutex::new(Vec::new()),
            created_elements: Mutex::new(Vec::new()),
            element_kinds: DashMap::new(),
            offers_seen: Mutex::new(Vec::new()),
            answers_seen: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            fail_next_create_pipeline: AtomicBool::new(false),
            failing_pings: DashMap::new(),
            event_tx,
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Every recorded call, in arrival order
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Call names only, in arrival order
    #[must_use]
    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(Call::name).collect()
    }

    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.name() == name).count()
    }

    #[must_use]
    pub fn count_create_pipeline(&self) -> usize {
        self.count("create_pipeline")
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Elements created so far, in creation order
    #[must_use]
    pub fn created_elements(&self) -> Vec<ElementId> {
        self.created_elements.lock().clone()
    }

    /// Offers handed to `process_offer`, in arrival order
    #[must_use]
    pub fn offers_seen(&self) -> Vec<String> {
        self.offers_seen.lock().clone()
    }

    /// Answers handed to `process_answer`, in arrival order
    #[must_use]
    pub fn answers_seen(&self) -> Vec<String> {
        self.answers_seen.lock().clone()
    }

    pub fn fail_next_create_pipeline(&self) {
        self.fail_next_create_pipeline.store(true, Ordering::Release);
    }

    pub fn set_ping_failure(&self, host: HostId, failing: bool) {
        self.failing_pings.insert(host, failing);
    }

    /// Inject a backend event as if an element raised it
    pub fn emit(&self, event: BackendEvent) {
        let _ = self.event_tx.send(event);
    }

    /// The canned answer produced for an offer: same media sections, mock
    /// origin
    #[must_use]
    pub fn answer_for(offer: &str) -> String {
        offer
            .lines()
            .map(|l| {
                if l.starts_with("o=") {
                    "o=mock 0 0 IN IP4 10.0.0.100".to_string()
                } else {
                    l.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\r\n")
            + "\r\n"
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDriver for MockDriver {
    async fn ping(&self, host: &Host) -> Result<()> {
        self.record(Call::Ping(host.id.clone()));
        if self.failing_pings.get(&host.id).is_some_and(|f| *f) {
            return Err(Error::MediaServerRequestTimeout(format!(
                "ping {}",
                host.id
            )));
        }
        Ok(())
    }

    async fn create_pipeline(&self, host: &Host, room: &RoomId) -> Result<PipelineId> {
        self.record(Call::CreatePipeline(host.id.clone(), room.clone()));
        if self.fail_next_create_pipeline.swap(false, Ordering::AcqRel) {
            return Err(Error::MediaServerGenericError(
                "pipeline creation failed".to_string(),
            ));
        }
        Ok(PipelineId::from(self.next("pipe")))
    }

    async fn release_pipeline(&self, host: &Host, pipeline: &PipelineId) -> Result<()> {
        self.record(Call::ReleasePipeline(host.id.clone(), pipeline.clone()));
        Ok(())
    }

    async fn create_element(
        &self,
        host: &Host,
        pipeline: &PipelineId,
        kind: ElementKind,
        _options: &ElementOptions,
    ) -> Result<ElementId> {
        self.record(Call::CreateElement(host.id.clone(), pipeline.clone(), kind));
        let id = ElementId::from(self.next("el"));
        self.created_elements.lock().push(id.clone());
        self.element_kinds.insert(id.clone(), kind);
        Ok(id)
    }

    async fn release_element(&self, host: &Host, element: &ElementId) -> Result<()> {
        self.record(Call::ReleaseElement(host.id.clone(), element.clone()));
        self.element_kinds.remove(element);
        Ok(())
    }

    async fn process_offer(&self, host: &Host, element: &ElementId, sdp: &str) -> Result<String> {
        self.record(Call::ProcessOffer(host.id.clone(), element.clone()));
        self.offers_seen.lock().push(sdp.to_string());
        Ok(Self::answer_for(sdp))
    }

    async fn process_answer(&self, host: &Host, element: &ElementId, sdp: &str) -> Result<()> {
        self.record(Call::ProcessAnswer(host.id.clone(), element.clone()));
        self.answers_seen.lock().push(sdp.to_string());
        Ok(())
    }

    async fn generate_offer(&self, host: &Host, element: &ElementId) -> Result<String> {
        self.record(Call::GenerateOffer(host.id.clone(), element.clone()));
        let kind = self
            .element_kinds
            .get(element)
            .map_or(ElementKind::WebRtc, |k| *k);
        Ok(match kind {
            ElementKind::Rtp => sdp::VIDEO_ONLY_OFFER.to_string(),
            _ => sdp::AUDIO_VIDEO_OFFER.to_string(),
        })
    }

    async fn gather_candidates(&self, _host: &Host, element: &ElementId) -> Result<()> {
        self.record(Call::GatherCandidates(element.clone()));
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        _host: &Host,
        element: &ElementId,
        _candidate: &IceCandidateInfo,
    ) -> Result<()> {
        self.record(Call::AddIceCandidate(element.clone()));
        Ok(())
    }

    async fn connect(
        &self,
        host: &Host,
        source: &ElementId,
        sink: &ElementId,
        kind: ConnectionKind,
    ) -> Result<()> {
        self.record(Call::Connect(
            host.id.clone(),
            source.clone(),
            sink.clone(),
            kind,
        ));
        Ok(())
    }

    async fn disconnect(
        &self,
        host: &Host,
        source: &ElementId,
        sink: &ElementId,
        kind: ConnectionKind,
    ) -> Result<()> {
        self.record(Call::Disconnect(
            host.id.clone(),
            source.clone(),
            sink.clone(),
            kind,
        ));
        Ok(())
    }

    async fn start_recording(&self, _host: &Host, element: &ElementId, path: &str) -> Result<()> {
        self.record(Call::StartRecording(element.clone(), path.to_string()));
        Ok(())
    }

    async fn stop_recording(&self, _host: &Host, element: &ElementId) -> Result<()> {
        self.record(Call::StopRecording(element.clone()));
        Ok(())
    }

    async fn set_video_floor(
        &self,
        _host: &Host,
        mixer: &ElementId,
        element: &ElementId,
    ) -> Result<()> {
        self.record(Call::SetVideoFloor(mixer.clone(), element.clone()));
        Ok(())
    }

    async fn set_layout_type(&self, _host: &Host, mixer: &ElementId, layout: &str) -> Result<()> {
        self.record(Call::SetLayoutType(mixer.clone(), layout.to_string()));
        Ok(())
    }

    async fn set_volume(&self, _host: &Host, element: &ElementId, volume: u8) -> Result<()> {
        self.record(Call::SetVolume(element.clone(), volume));
        Ok(())
    }

    async fn send_dtmf(&self, _host: &Host, element: &ElementId, tone: char) -> Result<()> {
        self.record(Call::SendDtmf(element.clone(), tone));
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<BackendEvent> {
        self.event_tx.subscribe()
    }
}
