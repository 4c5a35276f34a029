//! One pipeline per `(room, host)` with coalesced creation.
//!
//! Concurrent first-time requests for the same key share one pending
//! creation; completion satisfies every waiter. Element creation bumps the
//! pipeline's active count; the last `stop` releases the pipeline on the
//! backend before the registry hands out a fresh one for the same key.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use confab_core::models::id::{HostId, PipelineId, RoomId};
use confab_core::{Error, Result};

use crate::balancer::Host;
use crate::driver::MediaDriver;

/// Logical backend pipeline: a container of elements on one host for one room
#[derive(Debug)]
pub struct Pipeline {
    pub id: PipelineId,
    pub room_id: RoomId,
    pub host: Arc<Host>,
    active_elements: AtomicUsize,
}

impl Pipeline {
    #[must_use]
    pub fn active_elements(&self) -> usize {
        self.active_elements.load(Ordering::Acquire)
    }
}

type PipelineSlot = Result<Arc<Pipeline>>;

enum Slot {
    /// Creation in flight; waiters share the receiver
    Pending(watch::Receiver<Option<PipelineSlot>>),
    Ready(Arc<Pipeline>),
}

/// Registry of pipelines, keyed by `(room, host)`
pub struct PipelineRegistry {
    driver: Arc<dyn MediaDriver>,
    slots: DashMap<(RoomId, HostId), Slot>,
}

impl PipelineRegistry {
    #[must_use]
    pub fn new(driver: Arc<dyn MediaDriver>) -> Self {
        Self {
            driver,
            slots: DashMap::new(),
        }
    }

    /// Get the pipeline for `(room, host)`, creating it if absent.
    /// Concurrent callers on the same key coalesce on one backend request.
    pub async fn get_or_create(&self, room: &RoomId, host: &Arc<Host>) -> Result<Arc<Pipeline>> {
        let key = (room.clone(), host.id.clone());
        loop {
            // Decide creator vs waiter without holding the map entry across
            // an await
            let waiter = {
                match self.slots.entry(key.clone()) {
                    dashmap::mapref::entry::Entry::Occupied(occupied) => match occupied.get() {
                        Slot::Ready(pipeline) => return Ok(Arc::clone(pipeline)),
                        Slot::Pending(rx) => Some(rx.clone()),
                    },
                    dashmap::mapref::entry::Entry::Vacant(vacant) => {
                        let (tx, rx) = watch::channel(None);
                        vacant.insert(Slot::Pending(rx));
                        return self.create(key, room, host, tx).await;
                    }
                }
            };

            if let Some(mut rx) = waiter {
                // Wait for the creator to publish a result, then re-check
                if rx.changed().await.is_err() {
                    // Creator dropped without publishing; retry from scratch
                    self.slots.remove(&key);
                    continue;
                }
                let value = rx.borrow().clone();
                match value {
                    Some(Ok(pipeline)) => return Ok(pipeline),
                    Some(Err(err)) => return Err(err),
                    None => continue,
                }
            }
        }
    }

    async fn create(
        &self,
        key: (RoomId, HostId),
        room: &RoomId,
        host: &Arc<Host>,
        tx: watch::Sender<Option<PipelineSlot>>,
    ) -> Result<Arc<Pipeline>> {
        match self.driver.create_pipeline(host, room).await {
            Ok(id) => {
                let pipeline = Arc::new(Pipeline {
                    id,
                    room_id: room.clone(),
                    host: Arc::clone(host),
                    active_elements: AtomicUsize::new(0),
                });
                info!(
                    room_id = %room,
                    host_id = %host.id,
                    pipeline_id = %pipeline.id,
                    "Created pipeline"
                );
                self.slots.insert(key, Slot::Ready(Arc::clone(&pipeline)));
                let _ = tx.send(Some(Ok(Arc::clone(&pipeline))));
                Ok(pipeline)
            }
            Err(err) => {
                self.slots.remove(&key);
                let _ = tx.send(Some(Err(err.clone())));
                Err(err)
            }
        }
    }

    /// Record an element joining its pipeline
    pub fn element_created(&self, pipeline: &Pipeline) {
        let count = pipeline.active_elements.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(pipeline_id = %pipeline.id, active_elements = count, "Element added to pipeline");
    }

    /// Record an element leaving its pipeline; releases the pipeline on the
    /// backend when the count reaches zero. Returns `true` if it was
    /// released.
    pub async fn element_released(&self, room: &RoomId, host: &Arc<Host>) -> Result<bool> {
        let key = (room.clone(), host.id.clone());
        let pipeline = match self.slots.get(&key) {
            Some(slot) => match &*slot {
                Slot::Ready(p) => Arc::clone(p),
                Slot::Pending(_) => {
                    return Err(Error::MediaInvalidOperation(
                        "Pipeline still being created".to_string(),
                    ))
                }
            },
            None => return Ok(false),
        };

        let remaining = pipeline
            .active_elements
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1);
        if remaining > 0 {
            return Ok(false);
        }

        // Remove the slot first so the next create for this key starts fresh
        self.slots.remove(&key);
        self.driver.release_pipeline(host, &pipeline.id).await?;
        info!(
            room_id = %room,
            host_id = %host.id,
            pipeline_id = %pipeline.id,
            "Released pipeline"
        );
        Ok(true)
    }

    /// Drop every pipeline on an offline host. No backend round-trips.
    pub fn purge_host(&self, host_id: &HostId) -> usize {
        let stale: Vec<(RoomId, HostId)> = self
            .slots
            .iter()
            .filter(|e| &e.key().1 == host_id)
            .map(|e| e.key().clone())
            .collect();
        let purged = stale.len();
        for key in stale {
            self.slots.remove(&key);
        }
        if purged > 0 {
            info!(host_id = %host_id, purged, "Purged pipelines for offline host");
        }
        purged
    }

    #[must_use]
    pub fn pipeline_count(&self) -> usize {
        self.slots.len()
    }

    /// The live pipeline for a key, if fully created
    #[must_use]
    pub fn get(&self, room: &RoomId, host_id: &HostId) -> Option<Arc<Pipeline>> {
        self.slots
            .get(&(room.clone(), host_id.clone()))
            .and_then(|slot| match &*slot {
                Slot::Ready(p) => Some(Arc::clone(p)),
                Slot::Pending(_) => None,
            })
    }
}
