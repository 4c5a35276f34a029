//! Rooms: containers of users, sessions and media units, and owners of the
//! conference and content floors.
//!
//! Floor state is pure bookkeeping over media-unit IDs; the controller
//! resolves IDs to snapshots and emits the floor-changed events. Explicit
//! release restores the most recent previous floor; a disconnection of the
//! current floor clears it and archives the dead media in the history.

use std::collections::{HashSet, VecDeque};
use tracing::debug;

use confab_core::models::id::{MediaUnitId, RoomId, SessionId, UserId};

use crate::strategy::Strategy;

/// MRU floor history depth
pub const FLOOR_HISTORY_CAP: usize = 10;

/// Which floors a media disconnection released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FloorRelease {
    pub conference: bool,
    pub content: bool,
}

pub struct Room {
    pub id: RoomId,
    pub users: HashSet<UserId>,
    pub media_sessions: HashSet<SessionId>,
    pub medias: HashSet<MediaUnitId>,
    conference_floor: Option<MediaUnitId>,
    previous_conference_floors: VecDeque<MediaUnitId>,
    content_floor: Option<MediaUnitId>,
    previous_content_floors: VecDeque<MediaUnitId>,
    /// The room's mixer session, created on first MCU publish
    pub mcu_session: Option<SessionId>,
    pub mcu_user_count: usize,
    pub strategy: Strategy,
}

impl Room {
    #[must_use]
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            users: HashSet::new(),
            media_sessions: HashSet::new(),
            medias: HashSet::new(),
            conference_floor: None,
            previous_conference_floors: VecDeque::new(),
            content_floor: None,
            previous_content_floors: VecDeque::new(),
            mcu_session: None,
            mcu_user_count: 0,
            strategy: Strategy::default(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    #[must_use]
    pub fn conference_floor(&self) -> Option<&MediaUnitId> {
        self.conference_floor.as_ref()
    }

    #[must_use]
    pub fn content_floor(&self) -> Option<&MediaUnitId> {
        self.content_floor.as_ref()
    }

    #[must_use]
    pub fn previous_conference_floors(&self) -> impl Iterator<Item = &MediaUnitId> {
        self.previous_conference_floors.iter()
    }

    #[must_use]
    pub fn previous_content_floors(&self) -> impl Iterator<Item = &MediaUnitId> {
        self.previous_content_floors.iter()
    }

    pub fn set_conference_floor(&mut self, media: MediaUnitId) {
        Self::set_floor(
            &mut self.conference_floor,
            &mut self.previous_conference_floors,
            media,
        );
    }

    pub fn set_content_floor(&mut self, media: MediaUnitId) {
        Self::set_floor(
            &mut self.content_floor,
            &mut self.previous_content_floors,
            media,
        );
    }

    /// Restore the most recent previous conference floor, if any
    pub fn release_conference_floor(&mut self) -> Option<MediaUnitId> {
        Self::release_floor(
            &mut self.conference_floor,
            &mut self.previous_conference_floors,
        )
    }

    /// Restore the most recent previous content floor, if any
    pub fn release_content_floor(&mut self) -> Option<MediaUnitId> {
        Self::release_floor(&mut self.content_floor, &mut self.previous_content_floors)
    }

    /// A media disconnected: clear whichever floors it holds, archiving the
    /// dead media in the history. Each floor is checked against its own
    /// pointer.
    pub fn on_media_disconnected(&mut self, media: &MediaUnitId) -> FloorRelease {
        let mut release = FloorRelease::default();
        if self.conference_floor.as_ref() == Some(media) {
            self.conference_floor = None;
            Self::archive(&mut self.previous_conference_floors, media.clone());
            release.conference = true;
        }
        if self.content_floor.as_ref() == Some(media) {
            self.content_floor = None;
            Self::archive(&mut self.previous_content_floors, media.clone());
            release.content = true;
        }
        // A disconnected media also leaves both histories of the living
        self.medias.remove(media);
        release
    }

    fn set_floor(
        floor: &mut Option<MediaUnitId>,
        history: &mut VecDeque<MediaUnitId>,
        media: MediaUnitId,
    ) {
        if floor.as_ref() == Some(&media) {
            return;
        }
        if let Some(previous) = floor.replace(media.clone()) {
            Self::archive(history, previous);
        }
        // The new floor is no longer "previous"
        history.retain(|m| m != &media);
        debug!(media_unit_id = %media, "Floor changed");
    }

    fn release_floor(
        floor: &mut Option<MediaUnitId>,
        history: &mut VecDeque<MediaUnitId>,
    ) -> Option<MediaUnitId> {
        let restored = history.pop_front();
        match restored {
            Some(media) => {
                if let Some(previous) = floor.replace(media.clone()) {
                    Self::archive(history, previous);
                }
                Some(media)
            }
            None => {
                *floor = None;
                None
            }
        }
    }

    fn archive(history: &mut VecDeque<MediaUnitId>, media: MediaUnitId) {
        history.retain(|m| m != &media);
        history.push_front(media);
        history.truncate(FLOOR_HISTORY_CAP);
    }
}
