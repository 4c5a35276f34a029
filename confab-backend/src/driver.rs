//! Semantic contract of a concrete media-server driver.
//!
//! The orchestrator never talks RTP; it drives one or more media servers
//! through this trait. Transport, framing and transaction IDs live in the
//! driver implementation and are invisible here. Transient backend errors
//! are not retried at this layer; a timed-out request surfaces as
//! [`confab_core::Error::MediaServerRequestTimeout`].

use async_trait::async_trait;
use tokio::sync::broadcast;

use confab_core::events::IceCandidateInfo;
use confab_core::models::id::{ElementId, HostId, PipelineId, RoomId};
use confab_core::models::media::{ConnectionKind, MediaProfile, SessionType};
use confab_core::Result;

use crate::balancer::Host;

/// Kind of backend element to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    WebRtc,
    Rtp,
    Recorder,
    Player,
    Mixer,
    Filter,
}

impl ElementKind {
    /// Element kind backing a given session type
    #[must_use]
    pub const fn for_session(session_type: SessionType) -> Self {
        match session_type {
            SessionType::WebRtc => Self::WebRtc,
            SessionType::Rtp => Self::Rtp,
            SessionType::Recording => Self::Recorder,
            SessionType::Uri => Self::Player,
            SessionType::Mcu => Self::Mixer,
            SessionType::Filter => Self::Filter,
        }
    }
}

/// Element-level state reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Connected,
    Disconnected,
    Talking,
    Silence,
}

/// Events raised by backend elements
#[derive(Debug, Clone)]
pub enum BackendEvent {
    MediaStateChanged {
        element_id: ElementId,
        state: ElementState,
    },
    MediaFlowIn {
        element_id: ElementId,
        kind: ConnectionKind,
        flowing: bool,
    },
    MediaFlowOut {
        element_id: ElementId,
        kind: ConnectionKind,
        flowing: bool,
    },
    IceCandidate {
        element_id: ElementId,
        candidate: IceCandidateInfo,
    },
    EndOfStream {
        element_id: ElementId,
    },
    Dtmf {
        element_id: ElementId,
        tone: char,
    },
}

impl BackendEvent {
    #[must_use]
    pub const fn element_id(&self) -> &ElementId {
        match self {
            Self::MediaStateChanged { element_id, .. }
            | Self::MediaFlowIn { element_id, .. }
            | Self::MediaFlowOut { element_id, .. }
            | Self::IceCandidate { element_id, .. }
            | Self::EndOfStream { element_id }
            | Self::Dtmf { element_id, .. } => element_id,
        }
    }
}

/// Options for element creation
#[derive(Debug, Clone, Default)]
pub struct ElementOptions {
    pub profile: Option<MediaProfile>,
    /// Source URI for player elements
    pub uri: Option<String>,
    /// Target path for recorder elements
    pub record_path: Option<String>,
}

/// A created element together with where it lives.
/// `element_id` is opaque, backend-issued, and never parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub element_id: ElementId,
    pub host_id: HostId,
    pub room_id: RoomId,
    pub profile: MediaProfile,
}

/// Raw per-host media-server operations.
///
/// One driver instance may serve several hosts; every call names the host it
/// targets.
#[async_trait]
pub trait MediaDriver: Send + Sync {
    /// Health probe; failure counts toward taking the host offline
    async fn ping(&self, host: &Host) -> Result<()>;

    async fn create_pipeline(&self, host: &Host, room: &RoomId) -> Result<PipelineId>;
    async fn release_pipeline(&self, host: &Host, pipeline: &PipelineId) -> Result<()>;

    async fn create_element(
        &self,
        host: &Host,
        pipeline: &PipelineId,
        kind: ElementKind,
        options: &ElementOptions,
    ) -> Result<ElementId>;
    async fn release_element(&self, host: &Host, element: &ElementId) -> Result<()>;

    async fn process_offer(&self, host: &Host, element: &ElementId, sdp: &str) -> Result<String>;
    async fn process_answer(&self, host: &Host, element: &ElementId, sdp: &str) -> Result<()>;
    async fn generate_offer(&self, host: &Host, element: &ElementId) -> Result<String>;

    async fn gather_candidates(&self, host: &Host, element: &ElementId) -> Result<()>;
    async fn add_ice_candidate(
        &self,
        host: &Host,
        element: &ElementId,
        candidate: &IceCandidateInfo,
    ) -> Result<()>;

    async fn connect(
        &self,
        host: &Host,
        source: &ElementId,
        sink: &ElementId,
        kind: ConnectionKind,
    ) -> Result<()>;
    async fn disconnect(
        &self,
        host: &Host,
        source: &ElementId,
        sink: &ElementId,
        kind: ConnectionKind,
    ) -> Result<()>;

    async fn start_recording(&self, host: &Host, element: &ElementId, path: &str) -> Result<()>;
    async fn stop_recording(&self, host: &Host, element: &ElementId) -> Result<()>;

    async fn set_video_floor(&self, host: &Host, mixer: &ElementId, element: &ElementId)
        -> Result<()>;
    async fn set_layout_type(&self, host: &Host, mixer: &ElementId, layout: &str) -> Result<()>;

    async fn set_volume(&self, host: &Host, element: &ElementId, volume: u8) -> Result<()>;
    async fn send_dtmf(&self, host: &Host, element: &ElementId, tone: char) -> Result<()>;

    /// Element event feed; each subscriber gets every event
    fn events(&self) -> broadcast::Receiver<BackendEvent>;
}
