//! One backend element's worth of negotiated media.

use std::sync::Arc;
use tracing::debug;

use confab_backend::adapter::{MediaAdapter, NegotiatedMedia};
use confab_backend::driver::ElementHandle;
use confab_core::models::id::{ElementId, MediaUnitId, RoomId, SessionId, UserId};
use confab_core::models::media::{
    ConnectionKind, MediaInfo, MediaProfile, MediaTypesMap, SessionType,
};
use confab_core::Result;

use crate::strategy::Strategy;

/// A single negotiated media element, exclusively owned by its session
#[derive(Debug, Clone)]
pub struct MediaUnit {
    pub id: MediaUnitId,
    pub session_id: SessionId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub session_type: SessionType,
    pub profile: MediaProfile,
    pub element: ElementHandle,
    pub media_types: MediaTypesMap,
    pub local_descriptor: Option<String>,
    pub remote_descriptor: Option<String>,
    /// Mixer element this unit is wired into, when the room runs an MCU
    pub mixer_id: Option<ElementId>,
    pub subtitle: Option<String>,
    pub enable_subtitle: bool,
    /// Volume before the last mute, for restore on unmute
    pub volume: u8,
    pub muted: bool,
    pub strategy: Strategy,
}

impl MediaUnit {
    #[must_use]
    pub fn from_negotiated(
        negotiated: NegotiatedMedia,
        session_id: SessionId,
        room_id: RoomId,
        user_id: UserId,
        session_type: SessionType,
    ) -> Self {
        Self {
            id: MediaUnitId::new(),
            session_id,
            room_id,
            user_id,
            session_type,
            profile: negotiated.profile,
            element: negotiated.element,
            media_types: negotiated.media_types,
            local_descriptor: negotiated.local_descriptor,
            remote_descriptor: negotiated.remote_descriptor,
            mixer_id: None,
            subtitle: None,
            enable_subtitle: false,
            volume: 50,
            muted: false,
            strategy: Strategy::default(),
        }
    }

    /// Serializable snapshot used in events and floor queries
    #[must_use]
    pub fn info(&self) -> MediaInfo {
        MediaInfo {
            media_unit_id: self.id.clone(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            room_id: self.room_id.clone(),
            media_types: self.media_types,
        }
    }

    /// Whether this unit can feed a connection of the given kind
    #[must_use]
    pub fn carries(&self, kind: ConnectionKind) -> bool {
        match kind {
            ConnectionKind::All => true,
            ConnectionKind::Audio => {
                self.profile == MediaProfile::Audio
                    || self.profile == MediaProfile::All && self.media_types.has_audio()
            }
            ConnectionKind::Video => {
                self.profile == MediaProfile::Main
                    || self.profile == MediaProfile::All && self.media_types.has_video()
            }
            ConnectionKind::Content => {
                self.profile == MediaProfile::Content
                    || self.profile == MediaProfile::All && self.media_types.has_content()
            }
        }
    }

    /// Connection kind used when wiring this unit to a peer of the same
    /// profile
    #[must_use]
    pub const fn connection_kind(&self) -> ConnectionKind {
        match self.profile {
            MediaProfile::Audio => ConnectionKind::Audio,
            MediaProfile::Main => ConnectionKind::Video,
            MediaProfile::Content => ConnectionKind::Content,
            MediaProfile::All => ConnectionKind::All,
        }
    }

    pub async fn connect(
        &self,
        adapter: &Arc<dyn MediaAdapter>,
        sink: &MediaUnit,
        kind: ConnectionKind,
    ) -> Result<()> {
        debug!(
            source = %self.id,
            sink = %sink.id,
            kind = ?kind,
            "Connecting media units"
        );
        adapter.connect(&self.element, &sink.element, kind).await
    }

    pub async fn disconnect(
        &self,
        adapter: &Arc<dyn MediaAdapter>,
        sink: &MediaUnit,
        kind: ConnectionKind,
    ) -> Result<()> {
        adapter.disconnect(&self.element, &sink.element, kind).await
    }

    /// Stop the backend element; transposers and the pipeline share are
    /// released by the adapter.
    pub async fn release(&self, adapter: &Arc<dyn MediaAdapter>) -> Result<()> {
        adapter.stop(&self.element).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::models::media::MediaDirection;

    fn unit(profile: MediaProfile, media_types: MediaTypesMap) -> MediaUnit {
        MediaUnit {
            id: MediaUnitId::new(),
            session_id: SessionId::new(),
            room_id: RoomId::from("r1"),
            user_id: UserId::from("u1"),
            session_type: SessionType::WebRtc,
            profile,
            element: ElementHandle {
                element_id: ElementId::from("el-1"),
                host_id: "h1".into(),
                room_id: RoomId::from("r1"),
                profile,
            },
            media_types,
            local_descriptor: None,
            remote_descriptor: None,
            mixer_id: None,
            subtitle: None,
            enable_subtitle: false,
            volume: 50,
            muted: false,
            strategy: Strategy::default(),
        }
    }

    #[test]
    fn test_carries_by_profile() {
        let audio = unit(MediaProfile::Audio, MediaTypesMap::default());
        assert!(audio.carries(ConnectionKind::Audio));
        assert!(audio.carries(ConnectionKind::All));
        assert!(!audio.carries(ConnectionKind::Video));
    }

    #[test]
    fn test_carries_for_all_profile_consults_types() {
        let types = MediaTypesMap {
            audio: Some(MediaDirection::SendRecv),
            video: Some(MediaDirection::SendRecv),
            content: None,
        };
        let full = unit(MediaProfile::All, types);
        assert!(full.carries(ConnectionKind::Audio));
        assert!(full.carries(ConnectionKind::Video));
        assert!(!full.carries(ConnectionKind::Content));
    }
}
