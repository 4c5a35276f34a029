//! Typed lifecycle and media-state events with keyed fan-out.
//!
//! Every event routes on `(EventKind, identifier)`. External subscribers pick
//! the pair they care about (or the `"all"` sentinel for a kind-wide feed);
//! internal consumers (floor release, transposer waiters) use the same hub.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::id::{HostId, MediaUnitId, RoomId, SessionId, UserId};
use crate::models::media::{MediaInfo, UserType};

/// Sentinel identifier subscribing to every instance of an event kind
pub const GLOBAL_IDENTIFIER: &str = "all";

/// ICE candidate as exchanged with clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInfo {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u32>,
}

/// Discriminant used as the first half of a subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    RoomCreated,
    RoomDestroyed,
    RoomEmpty,
    UserJoined,
    UserLeft,
    MediaConnected,
    MediaDisconnected,
    MediaState,
    IceCandidate,
    ContentFloorChanged,
    ConferenceFloorChanged,
    MediaVolumeChanged,
    MediaMuted,
    MediaUnmuted,
    MediaStartTalking,
    MediaStopTalking,
    StrategyChanged,
    SubscribedTo,
    KeyframeNeeded,
    Dtmf,
    MediaNegotiated,
    ElementTransposed,
    MediaServerOffline,
}

/// Events fanned out to subscribers, keyed by identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaEvent {
    RoomCreated {
        room_id: RoomId,
        timestamp: DateTime<Utc>,
    },
    RoomDestroyed {
        room_id: RoomId,
        timestamp: DateTime<Utc>,
    },
    /// Internal: last participant left; the controller tears the room down
    RoomEmpty {
        room_id: RoomId,
        timestamp: DateTime<Utc>,
    },
    UserJoined {
        room_id: RoomId,
        user_id: UserId,
        user_type: UserType,
        name: String,
        timestamp: DateTime<Utc>,
    },
    UserLeft {
        room_id: RoomId,
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },
    MediaConnected {
        room_id: RoomId,
        media: MediaInfo,
        timestamp: DateTime<Utc>,
    },
    MediaDisconnected {
        room_id: RoomId,
        media_unit_id: MediaUnitId,
        timestamp: DateTime<Utc>,
    },
    /// Composite media-state report (flow in/out, element state, end of stream)
    MediaState {
        media_unit_id: MediaUnitId,
        source: String,
        state: String,
        timestamp: DateTime<Utc>,
    },
    IceCandidate {
        media_unit_id: MediaUnitId,
        candidate: IceCandidateInfo,
        timestamp: DateTime<Utc>,
    },
    ContentFloorChanged {
        room_id: RoomId,
        floor: Option<MediaInfo>,
        previous_floor: Vec<MediaInfo>,
        timestamp: DateTime<Utc>,
    },
    ConferenceFloorChanged {
        room_id: RoomId,
        floor: Option<MediaInfo>,
        previous_floor: Vec<MediaInfo>,
        timestamp: DateTime<Utc>,
    },
    MediaVolumeChanged {
        media_unit_id: MediaUnitId,
        volume: u8,
        timestamp: DateTime<Utc>,
    },
    MediaMuted {
        media_unit_id: MediaUnitId,
        timestamp: DateTime<Utc>,
    },
    MediaUnmuted {
        media_unit_id: MediaUnitId,
        timestamp: DateTime<Utc>,
    },
    MediaStartTalking {
        media_unit_id: MediaUnitId,
        timestamp: DateTime<Utc>,
    },
    MediaStopTalking {
        media_unit_id: MediaUnitId,
        timestamp: DateTime<Utc>,
    },
    StrategyChanged {
        identifier: String,
        strategy: String,
        timestamp: DateTime<Utc>,
    },
    SubscribedTo {
        user_id: UserId,
        source_media_unit_id: MediaUnitId,
        sink_session_id: SessionId,
        timestamp: DateTime<Utc>,
    },
    KeyframeNeeded {
        media_unit_id: MediaUnitId,
        timestamp: DateTime<Utc>,
    },
    Dtmf {
        media_unit_id: MediaUnitId,
        tone: char,
        timestamp: DateTime<Utc>,
    },
    /// Internal: a session finished an offer/answer exchange
    MediaNegotiated {
        session_id: SessionId,
        room_id: RoomId,
        timestamp: DateTime<Utc>,
    },
    /// Internal: a cross-host transposer pair finished wiring up
    ElementTransposed {
        key: String,
        timestamp: DateTime<Utc>,
    },
    /// Internal: a backend host failed its health probes
    MediaServerOffline {
        host_id: HostId,
        timestamp: DateTime<Utc>,
    },
}

impl MediaEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::RoomCreated { .. } => EventKind::RoomCreated,
            Self::RoomDestroyed { .. } => EventKind::RoomDestroyed,
            Self::RoomEmpty { .. } => EventKind::RoomEmpty,
            Self::UserJoined { .. } => EventKind::UserJoined,
            Self::UserLeft { .. } => EventKind::UserLeft,
            Self::MediaConnected { .. } => EventKind::MediaConnected,
            Self::MediaDisconnected { .. } => EventKind::MediaDisconnected,
            Self::MediaState { .. } => EventKind::MediaState,
            Self::IceCandidate { .. } => EventKind::IceCandidate,
            Self::ContentFloorChanged { .. } => EventKind::ContentFloorChanged,
            Self::ConferenceFloorChanged { .. } => EventKind::ConferenceFloorChanged,
            Self::MediaVolumeChanged { .. } => EventKind::MediaVolumeChanged,
            Self::MediaMuted { .. } => EventKind::MediaMuted,
            Self::MediaUnmuted { .. } => EventKind::MediaUnmuted,
            Self::MediaStartTalking { .. } => EventKind::MediaStartTalking,
            Self::MediaStopTalking { .. } => EventKind::MediaStopTalking,
            Self::StrategyChanged { .. } => EventKind::StrategyChanged,
            Self::SubscribedTo { .. } => EventKind::SubscribedTo,
            Self::KeyframeNeeded { .. } => EventKind::KeyframeNeeded,
            Self::Dtmf { .. } => EventKind::Dtmf,
            Self::MediaNegotiated { .. } => EventKind::MediaNegotiated,
            Self::ElementTransposed { .. } => EventKind::ElementTransposed,
            Self::MediaServerOffline { .. } => EventKind::MediaServerOffline,
        }
    }

    /// Routing key: the second half of the subscription key
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::RoomCreated { room_id, .. }
            | Self::RoomDestroyed { room_id, .. }
            | Self::RoomEmpty { room_id, .. }
            | Self::UserJoined { room_id, .. }
            | Self::UserLeft { room_id, .. }
            | Self::MediaConnected { room_id, .. }
            | Self::MediaDisconnected { room_id, .. }
            | Self::ContentFloorChanged { room_id, .. }
            | Self::ConferenceFloorChanged { room_id, .. } => room_id.as_str(),
            Self::MediaState { media_unit_id, .. }
            | Self::IceCandidate { media_unit_id, .. }
            | Self::MediaVolumeChanged { media_unit_id, .. }
            | Self::MediaMuted { media_unit_id, .. }
            | Self::MediaUnmuted { media_unit_id, .. }
            | Self::MediaStartTalking { media_unit_id, .. }
            | Self::MediaStopTalking { media_unit_id, .. }
            | Self::KeyframeNeeded { media_unit_id, .. }
            | Self::Dtmf { media_unit_id, .. } => media_unit_id.as_str(),
            Self::StrategyChanged { identifier, .. } => identifier.as_str(),
            Self::SubscribedTo { user_id, .. } => user_id.as_str(),
            Self::MediaNegotiated { session_id, .. } => session_id.as_str(),
            Self::ElementTransposed { key, .. } => key.as_str(),
            Self::MediaServerOffline { host_id, .. } => host_id.as_str(),
        }
    }

    #[must_use]
    pub const fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::RoomCreated { timestamp, .. }
            | Self::RoomDestroyed { timestamp, .. }
            | Self::RoomEmpty { timestamp, .. }
            | Self::UserJoined { timestamp, .. }
            | Self::UserLeft { timestamp, .. }
            | Self::MediaConnected { timestamp, .. }
            | Self::MediaDisconnected { timestamp, .. }
            | Self::MediaState { timestamp, .. }
            | Self::IceCandidate { timestamp, .. }
            | Self::ContentFloorChanged { timestamp, .. }
            | Self::ConferenceFloorChanged { timestamp, .. }
            | Self::MediaVolumeChanged { timestamp, .. }
            | Self::MediaMuted { timestamp, .. }
            | Self::MediaUnmuted { timestamp, .. }
            | Self::MediaStartTalking { timestamp, .. }
            | Self::MediaStopTalking { timestamp, .. }
            | Self::StrategyChanged { timestamp, .. }
            | Self::SubscribedTo { timestamp, .. }
            | Self::KeyframeNeeded { timestamp, .. }
            | Self::Dtmf { timestamp, .. }
            | Self::MediaNegotiated { timestamp, .. }
            | Self::ElementTransposed { timestamp, .. }
            | Self::MediaServerOffline { timestamp, .. } => timestamp,
        }
    }
}

/// Handle returned by [`EventHub::subscribe`], used to unsubscribe
pub type SubscriptionId = u64;

struct Subscriber {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<MediaEvent>,
}

/// In-process publish/subscribe hub with `(kind, identifier)` keyed fan-out
#[derive(Clone)]
pub struct EventHub {
    subscribers: Arc<DashMap<(EventKind, String), Vec<Subscriber>>>,
    /// subscription id -> key, for targeted unsubscribe
    index: Arc<DashMap<SubscriptionId, (EventKind, String)>>,
    next_id: Arc<AtomicU64>,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            index: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to `(kind, identifier)`; pass [`GLOBAL_IDENTIFIER`] for a
    /// kind-wide feed.
    pub fn subscribe(
        &self,
        kind: EventKind,
        identifier: impl Into<String>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<MediaEvent>) {
        let identifier = identifier.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .entry((kind, identifier.clone()))
            .or_default()
            .push(Subscriber { id, sender: tx });
        self.index.insert(id, (kind, identifier.clone()));

        debug!(?kind, identifier = %identifier, subscription_id = id, "Subscriber registered");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some((_, key)) = self.index.remove(&id) {
            if let Some(mut subs) = self.subscribers.get_mut(&key) {
                subs.retain(|s| s.id != id);
                if subs.is_empty() {
                    drop(subs);
                    self.subscribers.remove(&key);
                }
            }
        } else {
            warn!(subscription_id = id, "Attempted to unsubscribe unknown subscription");
        }
    }

    /// Drop every subscription keyed on `identifier`, for any kind.
    /// Called when a room (and all its per-room subjects) dies.
    pub fn unsubscribe_identifier(&self, identifier: &str) {
        let stale: Vec<(EventKind, String)> = self
            .subscribers
            .iter()
            .filter(|e| e.key().1 == identifier)
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            if let Some((_, subs)) = self.subscribers.remove(&key) {
                for sub in subs {
                    self.index.remove(&sub.id);
                }
            }
        }
    }

    /// Fan an event out to its exact key and the `"all"` key.
    /// Returns the number of subscribers reached.
    pub fn publish(&self, event: &MediaEvent) -> usize {
        let kind = event.kind();
        let mut sent = 0;
        sent += self.send_to(&(kind, event.identifier().to_string()), event);
        sent += self.send_to(&(kind, GLOBAL_IDENTIFIER.to_string()), event);
        sent
    }

    fn send_to(&self, key: &(EventKind, String), event: &MediaEvent) -> usize {
        let mut sent = 0;
        let mut dead = Vec::new();

        if let Some(subs) = self.subscribers.get(key) {
            for sub in subs.iter() {
                if sub.sender.send(event.clone()).is_ok() {
                    sent += 1;
                } else {
                    dead.push(sub.id);
                }
            }
        }

        // Prune receivers that went away without unsubscribing
        for id in dead {
            self.unsubscribe(id);
        }
        sent
    }

    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind, identifier: &str) -> usize {
        self.subscribers
            .get(&(kind, identifier.to_string()))
            .map_or(0, |subs| subs.len())
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(room: &str) -> MediaEvent {
        MediaEvent::RoomCreated {
            room_id: RoomId::from(room),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_keyed_fanout() {
        let hub = EventHub::new();
        let (_, mut rx) = hub.subscribe(EventKind::RoomCreated, "r1");

        assert_eq!(hub.publish(&sample_event("r1")), 1);
        assert_eq!(hub.publish(&sample_event("r2")), 0);

        let got = rx.recv().await.unwrap();
        assert_eq!(got.identifier(), "r1");
        assert_eq!(got.kind(), EventKind::RoomCreated);
    }

    #[tokio::test]
    async fn test_global_identifier_sees_everything() {
        let hub = EventHub::new();
        let (_, mut rx) = hub.subscribe(EventKind::RoomCreated, GLOBAL_IDENTIFIER);

        hub.publish(&sample_event("r1"));
        hub.publish(&sample_event("r2"));

        assert_eq!(rx.recv().await.unwrap().identifier(), "r1");
        assert_eq!(rx.recv().await.unwrap().identifier(), "r2");
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let hub = EventHub::new();
        let (id, rx) = hub.subscribe(EventKind::RoomCreated, "r1");
        assert_eq!(hub.subscriber_count(EventKind::RoomCreated, "r1"), 1);

        hub.unsubscribe(id);
        drop(rx);
        assert_eq!(hub.subscriber_count(EventKind::RoomCreated, "r1"), 0);
        assert_eq!(hub.publish(&sample_event("r1")), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_identifier_drops_all_kinds() {
        let hub = EventHub::new();
        let (_, _rx1) = hub.subscribe(EventKind::RoomCreated, "r1");
        let (_, _rx2) = hub.subscribe(EventKind::UserJoined, "r1");
        let (_, _rx3) = hub.subscribe(EventKind::RoomCreated, "r2");

        hub.unsubscribe_identifier("r1");
        assert_eq!(hub.subscriber_count(EventKind::RoomCreated, "r1"), 0);
        assert_eq!(hub.subscriber_count(EventKind::UserJoined, "r1"), 0);
        assert_eq!(hub.subscriber_count(EventKind::RoomCreated, "r2"), 1);
    }

    #[tokio::test]
    async fn test_dead_receiver_pruned() {
        let hub = EventHub::new();
        let (_, rx) = hub.subscribe(EventKind::RoomCreated, "r1");
        drop(rx);

        assert_eq!(hub.publish(&sample_event("r1")), 0);
        assert_eq!(hub.subscriber_count(EventKind::RoomCreated, "r1"), 0);
    }

    #[test]
    fn test_event_serialization_tag() {
        let json = serde_json::to_string(&sample_event("r1")).unwrap();
        assert!(json.contains("\"type\":\"room_created\""));
        assert!(json.contains("r1"));
    }
}
