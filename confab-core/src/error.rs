use thiserror::Error;

/// Control-plane error taxonomy.
///
/// Every variant carries a stable numeric code that survives serialization to
/// clients; messages are free-form context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Media not found: {0}")]
    MediaNotFound(String),

    #[error("Invalid media type: {0}")]
    MediaInvalidType(String),

    #[error("Invalid operation: {0}")]
    MediaInvalidOperation(String),

    #[error("No available codec: {0}")]
    MediaNoAvailableCodec(String),

    #[error("Media server request timed out: {0}")]
    MediaServerRequestTimeout(String),

    #[error("Media server error: {0}")]
    MediaServerGenericError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl Error {
    /// Stable numeric code reported to clients alongside the message
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::RoomNotFound(_) => 4001,
            Self::UserNotFound(_) => 4002,
            Self::MediaNotFound(_) => 4003,
            Self::MediaInvalidType(_) => 4021,
            Self::MediaInvalidOperation(_) => 4022,
            Self::MediaNoAvailableCodec(_) => 4031,
            Self::MediaServerRequestTimeout(_) => 5001,
            Self::MediaServerGenericError(_) => 5002,
            Self::ConnectionError(_) => 5003,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::RoomNotFound("r".into()).code(), 4001);
        assert_eq!(Error::MediaNoAvailableCodec("s".into()).code(), 4031);
        assert_eq!(Error::MediaServerRequestTimeout("op".into()).code(), 5001);
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::MediaNotFound("media-42".into());
        assert!(err.to_string().contains("media-42"));
    }
}
