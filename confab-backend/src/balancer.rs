//! Host registry, per-profile load accounting and host selection.
//!
//! Hosts are shared-read by every session; load counters are mutated only
//! through [`Balancer::increment_host_streams`] /
//! [`Balancer::decrement_host_streams`]. A background [`HealthProber`] takes
//! hosts offline after consecutive probe failures and broadcasts the loss so
//! consumers can purge state without backend round-trips.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use confab_core::config::BalancerConfig;
use confab_core::models::id::HostId;
use confab_core::models::media::MediaProfile;
use confab_core::{Error, Result};

use crate::driver::MediaDriver;

/// One media-server host
pub struct Host {
    pub id: HostId,
    pub ip: String,
    /// Profiles this host is tagged for (media-affinity selection)
    pub profiles: Vec<MediaProfile>,
    online: AtomicBool,
    load: DashMap<MediaProfile, usize>,
}

impl Host {
    #[must_use]
    pub fn new(id: impl Into<HostId>, ip: impl Into<String>, profiles: Vec<MediaProfile>) -> Self {
        Self {
            id: id.into(),
            ip: ip.into(),
            profiles,
            online: AtomicBool::new(true),
            load: DashMap::new(),
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    #[must_use]
    pub fn load_for(&self, profile: MediaProfile) -> usize {
        self.load.get(&profile).map_or(0, |c| *c)
    }

    #[must_use]
    pub fn total_load(&self) -> usize {
        self.load.iter().map(|c| *c.value()).sum()
    }

    #[must_use]
    pub fn serves(&self, profile: MediaProfile) -> bool {
        self.profiles.is_empty()
            || self.profiles.contains(&profile)
            || self.profiles.contains(&MediaProfile::All)
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.id)
            .field("ip", &self.ip)
            .field("online", &self.is_online())
            .field("load", &self.total_load())
            .finish()
    }
}

/// Host selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceStrategy {
    RoundRobin,
    MediaAffinity,
}

impl BalanceStrategy {
    /// Parse the configured strategy name; unknown names fall back to
    /// round-robin with a warning.
    #[must_use]
    pub fn from_config(name: &str) -> Self {
        match name {
            "media_affinity" => Self::MediaAffinity,
            "round_robin" => Self::RoundRobin,
            other => {
                warn!(strategy = %other, "Unknown balance strategy, using round_robin");
                Self::RoundRobin
            }
        }
    }
}

/// Host registry and selection
pub struct Balancer {
    hosts: DashMap<HostId, Arc<Host>>,
    strategy: BalanceStrategy,
    round_robin_index: AtomicUsize,
    offline_tx: broadcast::Sender<HostId>,
}

impl Balancer {
    #[must_use]
    pub fn new(strategy: BalanceStrategy) -> Self {
        let (offline_tx, _) = broadcast::channel(16);
        Self {
            hosts: DashMap::new(),
            strategy,
            round_robin_index: AtomicUsize::new(0),
            offline_tx,
        }
    }

    pub fn add_host(&self, host: Host) -> Arc<Host> {
        let host = Arc::new(host);
        info!(host_id = %host.id, ip = %host.ip, "Registered media server host");
        self.hosts.insert(host.id.clone(), Arc::clone(&host));
        host
    }

    /// Select a host for a new element of the given profile
    pub fn get_host(&self, profile: MediaProfile) -> Result<Arc<Host>> {
        let mut online: Vec<Arc<Host>> = self
            .hosts
            .iter()
            .map(|e| Arc::clone(e.value()))
            .filter(|h| h.is_online())
            .collect();
        // Sort by id for stable ordering across calls
        online.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));

        if online.is_empty() {
            return Err(Error::ConnectionError(
                "No online media server hosts".to_string(),
            ));
        }

        let selected = match self.strategy {
            BalanceStrategy::RoundRobin => {
                let index = self.round_robin_index.fetch_add(1, Ordering::AcqRel) % online.len();
                Arc::clone(&online[index])
            }
            BalanceStrategy::MediaAffinity => {
                let mut candidates: Vec<Arc<Host>> = online
                    .iter()
                    .filter(|h| h.serves(profile))
                    .map(Arc::clone)
                    .collect();
                if candidates.is_empty() {
                    // No host tagged for this profile: least-loaded overall
                    candidates = online.clone();
                }
                match candidates.into_iter().min_by_key(|h| h.load_for(profile)) {
                    Some(h) => h,
                    None => {
                        return Err(Error::ConnectionError(
                            "No online media server hosts".to_string(),
                        ))
                    }
                }
            }
        };

        debug!(host_id = %selected.id, profile = %profile.as_str(), "Selected host");
        Ok(selected)
    }

    /// Direct lookup by ID
    pub fn retrieve_host(&self, id: &HostId) -> Result<Arc<Host>> {
        self.hosts
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::ConnectionError(format!("Unknown host {id}")))
    }

    pub fn increment_host_streams(&self, id: &HostId, profile: MediaProfile) {
        if let Some(host) = self.hosts.get(id) {
            *host.load.entry(profile).or_insert(0) += 1;
        }
    }

    pub fn decrement_host_streams(&self, id: &HostId, profile: MediaProfile) {
        if let Some(host) = self.hosts.get(id) {
            if let Some(mut count) = host.load.get_mut(&profile) {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Take a host offline and tell every consumer to purge its state
    pub fn mark_offline(&self, id: &HostId) {
        if let Some(host) = self.hosts.get(id) {
            if host.is_online() {
                host.set_online(false);
                warn!(host_id = %id, "Media server host offline");
                let _ = self.offline_tx.send(id.clone());
            }
        }
    }

    pub fn mark_online(&self, id: &HostId) {
        if let Some(host) = self.hosts.get(id) {
            host.set_online(true);
        }
    }

    #[must_use]
    pub fn subscribe_offline(&self) -> broadcast::Receiver<HostId> {
        self.offline_tx.subscribe()
    }

    #[must_use]
    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

/// Background health probing for every registered host
pub struct HealthProber {
    balancer: Arc<Balancer>,
    driver: Arc<dyn MediaDriver>,
    config: BalancerConfig,
    cancel_token: CancellationToken,
}

impl HealthProber {
    #[must_use]
    pub fn new(
        balancer: Arc<Balancer>,
        driver: Arc<dyn MediaDriver>,
        config: BalancerConfig,
    ) -> Self {
        Self {
            balancer,
            driver,
            config,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Start the probe loop. Returns the `JoinHandle` so the caller can
    /// detect task completion; use [`Self::shutdown`] to stop it.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let balancer = Arc::clone(&self.balancer);
        let driver = Arc::clone(&self.driver);
        let failure_threshold = self.config.failure_threshold;
        let cancel_token = self.cancel_token.clone();
        let mut timer = interval(Duration::from_secs(self.config.probe_interval_secs.max(1)));

        tokio::spawn(async move {
            let failures: DashMap<HostId, u32> = DashMap::new();
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        info!("Health prober shutting down");
                        break;
                    }
                    _ = timer.tick() => {
                        for host in balancer.hosts() {
                            match driver.ping(&host).await {
                                Ok(()) => {
                                    failures.insert(host.id.clone(), 0);
                                    if !host.is_online() {
                                        info!(host_id = %host.id, "Host recovered");
                                        balancer.mark_online(&host.id);
                                    }
                                }
                                Err(err) => {
                                    let mut count = failures.entry(host.id.clone()).or_insert(0);
                                    *count += 1;
                                    debug!(
                                        host_id = %host.id,
                                        consecutive_failures = *count,
                                        error = %err,
                                        "Health probe failed"
                                    );
                                    if *count >= failure_threshold && host.is_online() {
                                        drop(count);
                                        balancer.mark_offline(&host.id);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
