//! Cross-host stream transposition.
//!
//! Connecting a source to a sink on a different host goes through a pair of
//! RTP endpoints, one on each host, negotiated once per
//! `(source host, source element, sink host)`. Later sinks on the same
//! remote host reuse the pair and only wire up their own sink leg; the
//! source leg survives individual sink disconnects and is torn down when the
//! source element is released.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use confab_core::events::MediaEvent;
use confab_core::models::id::{ElementId, HostId, RoomId};
use confab_core::models::media::{ConnectionKind, MediaProfile};
use confab_core::{EventHub, Result};

use crate::balancer::Balancer;
use crate::driver::{ElementHandle, ElementKind, ElementOptions, MediaDriver};
use crate::pipeline::PipelineRegistry;

/// A negotiated RTP bridge between two hosts
#[derive(Debug, Clone)]
pub struct TransposerPair {
    pub key: String,
    pub source_element: ElementId,
    pub source_host: HostId,
    pub sink_element: ElementId,
    pub sink_host: HostId,
    pub room_id: RoomId,
}

type PairSlot = Result<TransposerPair>;

enum Slot {
    Pending(watch::Receiver<Option<PairSlot>>),
    Ready(TransposerPair),
}

/// Bookkeeping and negotiation of transposer pairs
pub struct TransposerManager {
    driver: Arc<dyn MediaDriver>,
    balancer: Arc<Balancer>,
    pipelines: Arc<PipelineRegistry>,
    hub: EventHub,
    pairs: DashMap<String, Slot>,
    /// source element -> keys of its pairs, for release
    by_source: DashMap<ElementId, Vec<String>>,
    /// Codec transposed video is pinned to
    codec: String,
}

impl TransposerManager {
    #[must_use]
    pub fn new(
        driver: Arc<dyn MediaDriver>,
        balancer: Arc<Balancer>,
        pipelines: Arc<PipelineRegistry>,
        hub: EventHub,
        codec: impl Into<String>,
    ) -> Self {
        Self {
            driver,
            balancer,
            pipelines,
            hub,
            pairs: DashMap::new(),
            by_source: DashMap::new(),
            codec: codec.into(),
        }
    }

    fn key(source_host: &HostId, source: &ElementId, sink_host: &HostId) -> String {
        format!("{source_host}|{source}|{sink_host}")
    }

    /// Ensure a transposer pair exists from `source` toward `sink_host` and
    /// return its sink-side element. The caller connects that element to the
    /// actual sink. Concurrent callers on the same key share one creation.
    pub async fn bridge(
        &self,
        source: &ElementHandle,
        sink_host_id: &HostId,
        kind: ConnectionKind,
    ) -> Result<ElementId> {
        let key = Self::key(&source.host_id, &source.element_id, sink_host_id);
        loop {
            let waiter = {
                match self.pairs.entry(key.clone()) {
                    dashmap::mapref::entry::Entry::Occupied(occupied) => match occupied.get() {
                        Slot::Ready(pair) => return Ok(pair.sink_element.clone()),
                        Slot::Pending(rx) => Some(rx.clone()),
                    },
                    dashmap::mapref::entry::Entry::Vacant(vacant) => {
                        let (tx, rx) = watch::channel(None);
                        vacant.insert(Slot::Pending(rx));
                        return self
                            .negotiate_pair(key, source, sink_host_id, kind, tx)
                            .await
                            .map(|pair| pair.sink_element);
                    }
                }
            };

            if let Some(mut rx) = waiter {
                debug!(key = %key, "Awaiting in-flight transposer creation");
                if rx.changed().await.is_err() {
                    self.pairs.remove(&key);
                    continue;
                }
                let value = rx.borrow().clone();
                match value {
                    Some(Ok(pair)) => return Ok(pair.sink_element),
                    Some(Err(err)) => return Err(err),
                    None => continue,
                }
            }
        }
    }

    async fn negotiate_pair(
        &self,
        key: String,
        source: &ElementHandle,
        sink_host_id: &HostId,
        kind: ConnectionKind,
        tx: watch::Sender<Option<PairSlot>>,
    ) -> Result<TransposerPair> {
        let result = self.negotiate_pair_inner(&key, source, sink_host_id, kind).await;
        match &result {
            Ok(pair) => {
                self.pairs.insert(key.clone(), Slot::Ready(pair.clone()));
                self.by_source
                    .entry(source.element_id.clone())
                    .or_default()
                    .push(key.clone());
                let _ = tx.send(Some(Ok(pair.clone())));
                self.hub.publish(&MediaEvent::ElementTransposed {
                    key,
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(err) => {
                self.pairs.remove(&key);
                let _ = tx.send(Some(Err(err.clone())));
            }
        }
        result
    }

    async fn negotiate_pair_inner(
        &self,
        key: &str,
        source: &ElementHandle,
        sink_host_id: &HostId,
        kind: ConnectionKind,
    ) -> Result<TransposerPair> {
        let source_host = self.balancer.retrieve_host(&source.host_id)?;
        let sink_host = self.balancer.retrieve_host(sink_host_id)?;
        let room = &source.room_id;

        let source_pipeline = self.pipelines.get_or_create(room, &source_host).await?;
        let sink_pipeline = self.pipelines.get_or_create(room, &sink_host).await?;

        let options = ElementOptions::default();
        let source_tx = self
            .driver
            .create_element(&source_host, &source_pipeline.id, ElementKind::Rtp, &options)
            .await?;
        self.pipelines.element_created(&source_pipeline);
        let sink_tx = self
            .driver
            .create_element(&sink_host, &sink_pipeline.id, ElementKind::Rtp, &options)
            .await?;
        self.pipelines.element_created(&sink_pipeline);

        // Offer flows source -> sink with the source host's public IP; the
        // answer comes back with the sink host's.
        let wired: Result<()> = async {
            let mut offer = self.driver.generate_offer(&source_host, &source_tx).await?;
            if matches!(
                kind,
                ConnectionKind::Video | ConnectionKind::Content | ConnectionKind::All
            ) {
                offer = confab_sdp::filter_by_video_codec(&offer, &self.codec);
            }
            offer = confab_sdp::replace_connection_ipv4(&offer, &source_host.ip);

            let answer = self.driver.process_offer(&sink_host, &sink_tx, &offer).await?;
            let answer = confab_sdp::replace_connection_ipv4(&answer, &sink_host.ip);
            self.driver
                .process_answer(&source_host, &source_tx, &answer)
                .await?;

            // Source leg is wired once; every sink wires its own leg
            self.driver
                .connect(&source_host, &source.element_id, &source_tx, kind)
                .await
        }
        .await;

        if let Err(err) = wired {
            // Unwind the half-built pair so nothing leaks on the backends
            let _ = self.driver.release_element(&source_host, &source_tx).await;
            let _ = self.pipelines.element_released(room, &source_host).await;
            let _ = self.driver.release_element(&sink_host, &sink_tx).await;
            let _ = self.pipelines.element_released(room, &sink_host).await;
            return Err(err);
        }

        self.balancer
            .increment_host_streams(&source_host.id, MediaProfile::Main);
        self.balancer
            .increment_host_streams(&sink_host.id, MediaProfile::Main);

        info!(
            key = %key,
            source_host = %source_host.id,
            sink_host = %sink_host.id,
            "Transposer pair established"
        );

        Ok(TransposerPair {
            key: key.to_string(),
            source_element: source_tx,
            source_host: source_host.id.clone(),
            sink_element: sink_tx,
            sink_host: sink_host.id.clone(),
            room_id: room.clone(),
        })
    }

    /// Disconnect one sink from the pair's sink-side element. The source leg
    /// stays up for other sinks on the same remote host.
    pub async fn disconnect_sink(
        &self,
        source: &ElementHandle,
        sink: &ElementHandle,
        kind: ConnectionKind,
    ) -> Result<()> {
        let key = Self::key(&source.host_id, &source.element_id, &sink.host_id);
        let pair = match self.pairs.get(&key) {
            Some(slot) => match &*slot {
                Slot::Ready(pair) => pair.clone(),
                Slot::Pending(_) => return Ok(()),
            },
            None => return Ok(()),
        };
        let sink_host = self.balancer.retrieve_host(&pair.sink_host)?;
        self.driver
            .disconnect(&sink_host, &pair.sink_element, &sink.element_id, kind)
            .await
    }

    /// Release every pair rooted at a source element and decrement the
    /// stream counters taken at creation.
    pub async fn release_source(&self, source_element: &ElementId) -> Result<()> {
        let Some((_, keys)) = self.by_source.remove(source_element) else {
            return Ok(());
        };
        for key in keys {
            let Some((_, slot)) = self.pairs.remove(&key) else {
                continue;
            };
            let Slot::Ready(pair) = slot else { continue };

            if let Ok(source_host) = self.balancer.retrieve_host(&pair.source_host) {
                self.driver
                    .release_element(&source_host, &pair.source_element)
                    .await?;
                let _ = self
                    .pipelines
                    .element_released(&pair.room_id, &source_host)
                    .await;
                self.balancer
                    .decrement_host_streams(&pair.source_host, MediaProfile::Main);
            }
            if let Ok(sink_host) = self.balancer.retrieve_host(&pair.sink_host) {
                self.driver
                    .release_element(&sink_host, &pair.sink_element)
                    .await?;
                let _ = self
                    .pipelines
                    .element_released(&pair.room_id, &sink_host)
                    .await;
                self.balancer
                    .decrement_host_streams(&pair.sink_host, MediaProfile::Main);
            }
            info!(key = %pair.key, "Released transposer pair");
        }
        Ok(())
    }

    /// Drop every pair touching an offline host. No backend round-trips.
    pub fn purge_host(&self, host_id: &HostId) {
        let stale: Vec<String> = self
            .pairs
            .iter()
            .filter(|e| match e.value() {
                Slot::Ready(pair) => &pair.source_host == host_id || &pair.sink_host == host_id,
                Slot::Pending(_) => false,
            })
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            self.pairs.remove(&key);
        }
        self.by_source.retain(|_, keys| {
            keys.retain(|k| self.pairs.contains_key(k));
            !keys.is_empty()
        });
    }

    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }
}
