pub mod id;
pub mod media;

pub use id::{
    ElementId, HostId, MediaUnitId, PipelineId, RecordingId, RoomId, SessionId, TransactionId,
    UserId,
};
pub use media::{
    ConnectionKind, FloorInfo, MediaDirection, MediaInfo, MediaProfile, MediaSpec, MediaTypesMap,
    NegotiationRole, SessionType, UserType,
};
