//! Conference participants.

use serde::Serialize;

use confab_core::models::id::{RoomId, SessionId, UserId};
use confab_core::models::media::UserType;

use crate::strategy::Strategy;

/// A participant in a room. Owns its media sessions by ID; the tree
/// membership is the source of truth and the controller's flat maps are
/// caches.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub room_id: RoomId,
    pub user_type: UserType,
    pub name: String,
    pub sessions: Vec<SessionId>,
    pub strategy: Strategy,
}

impl User {
    #[must_use]
    pub fn new(room_id: RoomId, user_type: UserType, name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            room_id,
            user_type,
            name: name.into(),
            sessions: Vec::new(),
            strategy: Strategy::default(),
        }
    }

    pub fn add_session(&mut self, session_id: SessionId) {
        if !self.sessions.contains(&session_id) {
            self.sessions.push(session_id);
        }
    }

    pub fn remove_session(&mut self, session_id: &SessionId) {
        self.sessions.retain(|s| s != session_id);
    }

    #[must_use]
    pub fn info(&self) -> UserInfo {
        UserInfo {
            user_id: self.id.clone(),
            room_id: self.room_id.clone(),
            user_type: self.user_type,
            name: self.name.clone(),
            media_sessions: self.sessions.clone(),
        }
    }
}

/// Serializable snapshot returned by user queries
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub user_type: UserType,
    pub name: String,
    pub media_sessions: Vec<SessionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_membership() {
        let mut user = User::new(RoomId::from("r1"), UserType::Sfu, "alice");
        let session = SessionId::new();

        user.add_session(session.clone());
        user.add_session(session.clone());
        assert_eq!(user.sessions.len(), 1);

        user.remove_session(&session);
        assert!(user.sessions.is_empty());
    }
}
