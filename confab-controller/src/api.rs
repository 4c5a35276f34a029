//! Client-facing request/response envelopes.
//!
//! The transport (WebSocket, JSON-RPC, anything bidirectional) frames these
//! however it likes; the contract here is that every request carries an
//! opaque transaction ID echoed verbatim in its response, and errors travel
//! with their stable numeric code.

use serde::{Deserialize, Serialize};

use confab_core::events::IceCandidateInfo;
use confab_core::models::id::{RecordingId, RoomId, SessionId, TransactionId, UserId};
use confab_core::models::media::{
    ConnectionKind, FloorInfo, MediaInfo, MediaProfile, MediaSpec, SessionType, UserType,
};
use confab_core::Error;

use crate::controller::Controller;
use crate::strategy::Strategy;
use crate::user::UserInfo;

/// Parameters of publish-like methods
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishParams {
    pub descriptor: Option<String>,
    pub profile: MediaProfile,
    pub name: Option<String>,
    pub uri: Option<String>,
    pub record_path: Option<String>,
    pub media_specs: Option<MediaSpec>,
    /// Naming an existing media renegotiates it instead of creating one
    pub media_id: Option<SessionId>,
}

impl Default for PublishParams {
    fn default() -> Self {
        Self {
            descriptor: None,
            profile: MediaProfile::All,
            name: None,
            uri: None,
            record_path: None,
            media_specs: None,
            media_id: None,
        }
    }
}

/// Result of publish-like methods: the media ID plus the local descriptor
/// (answer or generated offer), absent for descriptor-less sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResult {
    pub media_id: SessionId,
    pub descriptor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub transaction_id: TransactionId,
    #[serde(flatten)]
    pub body: RequestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum RequestBody {
    Join {
        room_id: RoomId,
        user_type: UserType,
        name: String,
    },
    Leave {
        user_id: UserId,
        room_id: RoomId,
    },
    Publish {
        user_id: UserId,
        room_id: RoomId,
        session_type: SessionType,
        params: PublishParams,
    },
    Unpublish {
        user_id: UserId,
        media_id: SessionId,
    },
    Subscribe {
        user_id: UserId,
        source_id: SessionId,
        session_type: SessionType,
        params: PublishParams,
    },
    Unsubscribe {
        user_id: UserId,
        media_id: SessionId,
    },
    PublishAndSubscribe {
        user_id: UserId,
        room_id: RoomId,
        source_id: Option<SessionId>,
        session_type: SessionType,
        params: PublishParams,
    },
    Connect {
        source_id: SessionId,
        sink_ids: Vec<SessionId>,
        kind: ConnectionKind,
    },
    Disconnect {
        source_id: SessionId,
        sink_ids: Vec<SessionId>,
        kind: ConnectionKind,
    },
    AddIceCandidate {
        media_id: SessionId,
        candidate: IceCandidateInfo,
    },
    StartRecording {
        user_id: UserId,
        media_id: SessionId,
        path: String,
        #[serde(default)]
        params: PublishParams,
    },
    StopRecording {
        user_id: UserId,
        recording_id: RecordingId,
    },
    SetConferenceFloor {
        room_id: RoomId,
        media_id: SessionId,
    },
    SetContentFloor {
        room_id: RoomId,
        media_id: SessionId,
    },
    ReleaseConferenceFloor {
        room_id: RoomId,
    },
    ReleaseContentFloor {
        room_id: RoomId,
    },
    GetConferenceFloor {
        room_id: RoomId,
    },
    GetContentFloor {
        room_id: RoomId,
    },
    GetRooms,
    GetUsers {
        room_id: RoomId,
    },
    GetUserMedias {
        user_id: UserId,
    },
    SetVolume {
        media_id: SessionId,
        volume: u8,
    },
    Mute {
        media_id: SessionId,
    },
    Unmute {
        media_id: SessionId,
    },
    Dtmf {
        media_id: SessionId,
        tone: char,
    },
    RequestKeyframe {
        media_id: SessionId,
    },
    SetStrategy {
        identifier: String,
        strategy: Strategy,
    },
    GetStrategy {
        identifier: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub transaction_id: TransactionId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Result(ResponseBody),
    Error(ErrorBody),
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Joined { user_id: UserId },
    Media(PublishResult),
    Recording { recording_id: RecordingId },
    Floor(FloorInfo),
    Rooms(Vec<RoomId>),
    Users(Vec<UserInfo>),
    Medias(Vec<MediaInfo>),
    Strategy(Strategy),
    Ack {},
}

/// Stable numeric code plus message, as clients see errors
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl Controller {
    /// Route one client request, echoing its transaction ID
    pub async fn execute(&self, request: Request) -> Response {
        let transaction_id = request.transaction_id.clone();
        let outcome = match self.dispatch(request.body).await {
            Ok(body) => Outcome::Result(body),
            Err(err) => Outcome::Error(ErrorBody::from(&err)),
        };
        Response {
            transaction_id,
            outcome,
        }
    }

    async fn dispatch(&self, body: RequestBody) -> confab_core::Result<ResponseBody> {
        match body {
            RequestBody::Join {
                room_id,
                user_type,
                name,
            } => {
                let user_id = self.join(room_id, user_type, &name).await?;
                Ok(ResponseBody::Joined { user_id })
            }
            RequestBody::Leave { user_id, room_id } => {
                self.leave(&user_id, &room_id).await?;
                Ok(ResponseBody::Ack {})
            }
            RequestBody::Publish {
                user_id,
                room_id,
                session_type,
                params,
            } => {
                let result = self.publish(&user_id, &room_id, session_type, params).await?;
                Ok(ResponseBody::Media(result))
            }
            RequestBody::Unpublish { user_id, media_id } => {
                self.unpublish(&user_id, &media_id).await?;
                Ok(ResponseBody::Ack {})
            }
            RequestBody::Subscribe {
                user_id,
                source_id,
                session_type,
                params,
            } => {
                let result = self
                    .subscribe(&user_id, &source_id, session_type, params)
                    .await?;
                Ok(ResponseBody::Media(result))
            }
            RequestBody::Unsubscribe { user_id, media_id } => {
                self.unsubscribe(&user_id, &media_id).await?;
                Ok(ResponseBody::Ack {})
            }
            RequestBody::PublishAndSubscribe {
                user_id,
                room_id,
                source_id,
                session_type,
                params,
            } => {
                let result = self
                    .publish_and_subscribe(
                        &user_id,
                        &room_id,
                        source_id.as_ref(),
                        session_type,
                        params,
                    )
                    .await?;
                Ok(ResponseBody::Media(result))
            }
            RequestBody::Connect {
                source_id,
                sink_ids,
                kind,
            } => {
                for sink_id in &sink_ids {
                    self.connect_sessions(&source_id, sink_id, kind).await?;
                }
                Ok(ResponseBody::Ack {})
            }
            RequestBody::Disconnect {
                source_id,
                sink_ids,
                kind,
            } => {
                for sink_id in &sink_ids {
                    self.disconnect_sessions(&source_id, sink_id, kind).await?;
                }
                Ok(ResponseBody::Ack {})
            }
            RequestBody::AddIceCandidate {
                media_id,
                candidate,
            } => {
                self.add_ice_candidate(&media_id, candidate).await?;
                Ok(ResponseBody::Ack {})
            }
            RequestBody::StartRecording {
                user_id,
                media_id,
                path,
                params,
            } => {
                let recording_id = self
                    .start_recording(&user_id, &media_id, &path, params)
                    .await?;
                Ok(ResponseBody::Recording { recording_id })
            }
            RequestBody::StopRecording {
                user_id,
                recording_id,
            } => {
                self.stop_recording(&user_id, &recording_id).await?;
                Ok(ResponseBody::Ack {})
            }
            RequestBody::SetConferenceFloor { room_id, media_id } => {
                let floor = self.set_conference_floor(&room_id, &media_id).await?;
                Ok(ResponseBody::Floor(floor))
            }
            RequestBody::SetContentFloor { room_id, media_id } => {
                let floor = self.set_content_floor(&room_id, &media_id).await?;
                Ok(ResponseBody::Floor(floor))
            }
            RequestBody::ReleaseConferenceFloor { room_id } => {
                let floor = self.release_conference_floor(&room_id).await?;
                Ok(ResponseBody::Floor(floor))
            }
            RequestBody::ReleaseContentFloor { room_id } => {
                let floor = self.release_content_floor(&room_id).await?;
                Ok(ResponseBody::Floor(floor))
            }
            RequestBody::GetConferenceFloor { room_id } => {
                let floor = self.conference_floor_info(&room_id, None).await?;
                Ok(ResponseBody::Floor(floor))
            }
            RequestBody::GetContentFloor { room_id } => {
                let floor = self.content_floor_info(&room_id, None).await?;
                Ok(ResponseBody::Floor(floor))
            }
            RequestBody::GetRooms => Ok(ResponseBody::Rooms(self.get_rooms())),
            RequestBody::GetUsers { room_id } => {
                Ok(ResponseBody::Users(self.get_users(&room_id).await?))
            }
            RequestBody::GetUserMedias { user_id } => {
                Ok(ResponseBody::Medias(self.get_user_medias(&user_id).await?))
            }
            RequestBody::SetVolume { media_id, volume } => {
                self.set_volume(&media_id, volume).await?;
                Ok(ResponseBody::Ack {})
            }
            RequestBody::Mute { media_id } => {
                self.mute(&media_id).await?;
                Ok(ResponseBody::Ack {})
            }
            RequestBody::Unmute { media_id } => {
                self.unmute(&media_id).await?;
                Ok(ResponseBody::Ack {})
            }
            RequestBody::Dtmf { media_id, tone } => {
                self.dtmf(&media_id, tone).await?;
                Ok(ResponseBody::Ack {})
            }
            RequestBody::RequestKeyframe { media_id } => {
                self.request_keyframe(&media_id).await?;
                Ok(ResponseBody::Ack {})
            }
            RequestBody::SetStrategy {
                identifier,
                strategy,
            } => {
                self.set_strategy(&identifier, strategy).await?;
                Ok(ResponseBody::Ack {})
            }
            RequestBody::GetStrategy { identifier } => {
                Ok(ResponseBody::Strategy(self.get_strategy(&identifier).await?))
            }
        }
    }
}
