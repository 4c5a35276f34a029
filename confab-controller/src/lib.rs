//! Session and topology orchestration.
//!
//! Turns stateless client requests (join, publish, subscribe, connect,
//! set-floor, record) into a consistent graph of rooms, users, media
//! sessions and media units across one or more backend hosts, with SDP
//! offer/answer negotiation, floor arbitration, event fan-out and lifecycle
//! cleanup on disconnect.

pub mod api;
pub mod controller;
pub mod dtmf;
pub mod media_session;
pub mod media_unit;
pub mod room;
pub mod strategy;
pub mod user;

pub use controller::Controller;
pub use media_session::MediaSession;
pub use media_unit::MediaUnit;
pub use room::Room;
pub use strategy::Strategy;
pub use user::User;
