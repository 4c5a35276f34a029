//! Media model shared by the whole control plane.
//!
//! These types describe what a media session *is* (its type, profile and
//! negotiation role) and what a media unit *carries* (per-kind directions),
//! independent of any backend.

use serde::{Deserialize, Serialize};

use super::id::{MediaUnitId, RoomId, SessionId, UserId};

/// How a participant joined the conference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserType {
    Sfu,
    Mcu,
    Other,
}

/// Kind of media session exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionType {
    #[serde(rename = "WEBRTC")]
    WebRtc,
    Rtp,
    Recording,
    Uri,
    Mcu,
    Filter,
}

/// Media profile a session (or a backend) is concerned with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaProfile {
    /// Camera video
    Main,
    /// Screen share
    Content,
    Audio,
    All,
}

impl MediaProfile {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "MAIN",
            Self::Content => "CONTENT",
            Self::Audio => "AUDIO",
            Self::All => "ALL",
        }
    }
}

/// Kind selector for connect/disconnect between elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionKind {
    All,
    Audio,
    Video,
    Content,
}

/// Direction of one negotiated media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    #[must_use]
    pub const fn can_send(self) -> bool {
        matches!(self, Self::SendRecv | Self::SendOnly)
    }

    #[must_use]
    pub const fn can_recv(self) -> bool {
        matches!(self, Self::SendRecv | Self::RecvOnly)
    }
}

/// Per-kind directions of a media unit or session.
///
/// `None` means the kind was never negotiated (the source modeled this as
/// `false`); `Some(Inactive)` means it was negotiated and then shut off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTypesMap {
    pub audio: Option<MediaDirection>,
    pub video: Option<MediaDirection>,
    pub content: Option<MediaDirection>,
}

impl MediaTypesMap {
    /// Union-merge: a kind present on either side stays present; the most
    /// capable direction wins.
    pub fn absorb(&mut self, other: &Self) {
        self.audio = merge_direction(self.audio, other.audio);
        self.video = merge_direction(self.video, other.video);
        self.content = merge_direction(self.content, other.content);
    }

    #[must_use]
    pub fn has_video(&self) -> bool {
        self.video.is_some_and(|d| d != MediaDirection::Inactive)
    }

    #[must_use]
    pub fn has_audio(&self) -> bool {
        self.audio.is_some_and(|d| d != MediaDirection::Inactive)
    }

    #[must_use]
    pub fn has_content(&self) -> bool {
        self.content.is_some_and(|d| d != MediaDirection::Inactive)
    }

    /// Video is actually flowing out of this media (floor eligibility)
    #[must_use]
    pub fn sends_video(&self) -> bool {
        self.video.is_some_and(MediaDirection::can_send)
    }
}

fn merge_direction(
    a: Option<MediaDirection>,
    b: Option<MediaDirection>,
) -> Option<MediaDirection> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(x), Some(y)) => Some(match (x.can_send() || y.can_send(), x.can_recv() || y.can_recv()) {
            (true, true) => MediaDirection::SendRecv,
            (true, false) => MediaDirection::SendOnly,
            (false, true) => MediaDirection::RecvOnly,
            (false, false) => MediaDirection::Inactive,
        }),
    }
}

/// Which side of the offer/answer exchange a session is on.
/// Set at first descriptor assignment, immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

/// Serializable snapshot of a media unit, used in events and floor queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub media_unit_id: MediaUnitId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub media_types: MediaTypesMap,
}

/// Snapshot of a floor and its MRU history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloorInfo {
    pub floor: Option<MediaInfo>,
    pub previous_floor: Vec<MediaInfo>,
}

/// Codec wish-list a session negotiates against.
///
/// After a successful negotiation the spec is narrowed to the codecs that
/// actually appeared in the answered descriptor, so later renegotiations stay
/// inside a compatible subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSpec {
    pub audio_codecs: Vec<String>,
    pub video_codecs: Vec<String>,
}

impl MediaSpec {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.audio_codecs.is_empty() && self.video_codecs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_prefers_most_capable() {
        let mut a = MediaTypesMap {
            audio: Some(MediaDirection::SendOnly),
            video: None,
            content: None,
        };
        let b = MediaTypesMap {
            audio: Some(MediaDirection::RecvOnly),
            video: Some(MediaDirection::SendRecv),
            content: None,
        };
        a.absorb(&b);
        assert_eq!(a.audio, Some(MediaDirection::SendRecv));
        assert_eq!(a.video, Some(MediaDirection::SendRecv));
        assert_eq!(a.content, None);
    }

    #[test]
    fn test_absorb_inactive_stays_inactive() {
        let mut a = MediaTypesMap {
            video: Some(MediaDirection::Inactive),
            ..Default::default()
        };
        a.absorb(&MediaTypesMap {
            video: Some(MediaDirection::Inactive),
            ..Default::default()
        });
        assert_eq!(a.video, Some(MediaDirection::Inactive));
        assert!(!a.has_video());
        assert!(!a.sends_video());
    }

    #[test]
    fn test_floor_eligibility() {
        let sending = MediaTypesMap {
            video: Some(MediaDirection::SendOnly),
            ..Default::default()
        };
        assert!(sending.sends_video());

        let receiving = MediaTypesMap {
            video: Some(MediaDirection::RecvOnly),
            ..Default::default()
        };
        assert!(!receiving.sends_video());
    }

    #[test]
    fn test_session_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&SessionType::WebRtc).unwrap(),
            "\"WEBRTC\""
        );
        assert_eq!(serde_json::to_string(&SessionType::Rtp).unwrap(), "\"RTP\"");
    }
}
