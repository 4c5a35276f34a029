//! Media sessions: the negotiation envelope exposed to clients.
//!
//! A session owns the media units produced by one offer/answer exchange and
//! drives the role state machine: the first descriptor assignment fixes the
//! role, later descriptors flag answer processing or renegotiation, and
//! `process` turns the pending state into backend work exactly once.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use confab_backend::adapter::{MediaAdapter, NegotiateOptions};
use confab_core::models::id::{MediaUnitId, RoomId, SessionId, UserId};
use confab_core::models::media::{
    MediaProfile, MediaSpec, MediaTypesMap, NegotiationRole, SessionType,
};
use confab_core::{Error, EventHub, MediaEvent, Result};
use confab_sdp::SectionSelector;

use crate::dtmf::DtmfAggregator;
use crate::media_unit::MediaUnit;
use crate::strategy::Strategy;

/// Outcome of a descriptor assignment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorFlags {
    /// The assignment fixed the session's role
    pub role_assigned: Option<NegotiationRole>,
    /// A remote answer arrived for a local offer (false -> true transition)
    pub process_as_answerer: bool,
    /// A further remote descriptor arrived on a negotiated session
    pub renegotiate: bool,
}

/// A negotiation unit exposed to clients
pub struct MediaSession {
    pub id: SessionId,
    pub name: String,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub session_type: SessionType,
    pub profile: MediaProfile,
    pub options: NegotiateOptions,
    pub medias: Vec<Arc<RwLock<MediaUnit>>>,
    pub negotiation_role: Option<NegotiationRole>,
    should_renegotiate: bool,
    should_process_remote_as_answerer: bool,
    pub remote_descriptor: Option<String>,
    pub local_descriptor: Option<String>,
    pub media_types: MediaTypesMap,
    pub spec: MediaSpec,
    pub dtmf: DtmfAggregator,
    pub strategy: Strategy,
}

impl MediaSession {
    #[must_use]
    pub fn new(
        room_id: RoomId,
        user_id: UserId,
        session_type: SessionType,
        profile: MediaProfile,
        name: impl Into<String>,
        options: NegotiateOptions,
        dtmf_config: &confab_core::config::DtmfConfig,
    ) -> Self {
        Self {
            id: SessionId::new(),
            name: name.into(),
            room_id,
            user_id,
            session_type,
            profile,
            options,
            medias: Vec::new(),
            negotiation_role: None,
            should_renegotiate: false,
            should_process_remote_as_answerer: false,
            remote_descriptor: None,
            local_descriptor: None,
            media_types: MediaTypesMap::default(),
            spec: MediaSpec::default(),
            dtmf: DtmfAggregator::new(dtmf_config),
            strategy: Strategy::default(),
        }
    }

    #[must_use]
    pub const fn should_renegotiate(&self) -> bool {
        self.should_renegotiate
    }

    #[must_use]
    pub const fn should_process_remote_as_answerer(&self) -> bool {
        self.should_process_remote_as_answerer
    }

    /// Assign a remote descriptor, driving the role state machine.
    ///
    /// - no local yet: the session becomes the ANSWERER
    /// - local set, first remote: this is the answer to our offer
    /// - local and remote both set: a renegotiation offer
    pub fn set_remote_descriptor(&mut self, sdp: impl Into<String>) -> DescriptorFlags {
        let mut flags = DescriptorFlags::default();
        let had_local = self.local_descriptor.is_some();
        let had_remote = self.remote_descriptor.is_some();

        if self.negotiation_role.is_none() && !had_local {
            self.negotiation_role = Some(NegotiationRole::Answerer);
            flags.role_assigned = Some(NegotiationRole::Answerer);
        }

        if had_local && had_remote {
            self.should_renegotiate = true;
            flags.renegotiate = true;
        } else if had_local && !self.should_process_remote_as_answerer {
            self.should_process_remote_as_answerer = true;
            flags.process_as_answerer = true;
        }

        self.remote_descriptor = Some(sdp.into());
        flags
    }

    /// Assign a local descriptor; fixes the role to OFFERER when no remote
    /// was seen first.
    pub fn set_local_descriptor(&mut self, sdp: impl Into<String>) -> DescriptorFlags {
        let mut flags = DescriptorFlags::default();
        if self.negotiation_role.is_none() && self.remote_descriptor.is_none() {
            self.negotiation_role = Some(NegotiationRole::Offerer);
            flags.role_assigned = Some(NegotiationRole::Offerer);
        }
        self.local_descriptor = Some(sdp.into());
        flags
    }

    /// Run the pending negotiation. Returns the local answer, the locally
    /// generated offer, or `None` for descriptor-less sessions (MCU/FILTER).
    pub async fn process(
        &mut self,
        adapter: &Arc<dyn MediaAdapter>,
        hub: &EventHub,
    ) -> Result<Option<String>> {
        if self.should_renegotiate || self.should_process_remote_as_answerer {
            return self.renegotiate(adapter, hub).await;
        }

        if !self.medias.is_empty() {
            // Nothing pending: idempotent under the same remote descriptor
            return Ok(self.local_descriptor.clone());
        }

        let remote = self.remote_descriptor.clone();
        let negotiated = adapter
            .negotiate(
                &self.room_id,
                &self.user_id,
                &self.id,
                remote.as_deref(),
                self.session_type,
                self.profile,
                &self.options,
            )
            .await?;

        if remote.is_some() && negotiated.is_empty() {
            return Err(Error::MediaNoAvailableCodec(format!(
                "session {} negotiated no media",
                self.id
            )));
        }

        for media in negotiated {
            let unit = MediaUnit::from_negotiated(
                media,
                self.id.clone(),
                self.room_id.clone(),
                self.user_id.clone(),
                self.session_type,
            );
            self.medias.push(Arc::new(RwLock::new(unit)));
        }

        let local = self.assemble_local_descriptor(remote.as_deref()).await;

        if let (Some(remote_sdp), Some(local_sdp)) = (remote.as_deref(), local.as_deref()) {
            let audio_parity = confab_sdp::has_available_audio_codec(remote_sdp)
                == confab_sdp::has_available_audio_codec(local_sdp);
            let video_parity = confab_sdp::has_available_video_codec(remote_sdp)
                == confab_sdp::has_available_video_codec(local_sdp);
            if !audio_parity || !video_parity {
                return Err(Error::MediaNoAvailableCodec(format!(
                    "session {} answer drops a media kind",
                    self.id
                )));
            }
        }

        self.media_types = self.union_media_types().await;

        if let Some(local_sdp) = &local {
            self.spec = confab_sdp::narrow_spec(&self.spec, local_sdp);
            if self.negotiation_role.is_none() && remote.is_none() {
                // A generated offer puts us on the offerer side
                self.negotiation_role = Some(NegotiationRole::Offerer);
            }
            self.local_descriptor = Some(local_sdp.clone());
        }

        info!(
            session_id = %self.id,
            role = ?self.negotiation_role,
            units = self.medias.len(),
            "Session negotiated"
        );

        if self.negotiation_role == Some(NegotiationRole::Answerer) {
            hub.publish(&MediaEvent::MediaNegotiated {
                session_id: self.id.clone(),
                room_id: self.room_id.clone(),
                timestamp: Utc::now(),
            });
        }

        Ok(local)
    }

    /// Renegotiation: process a remote answer on existing elements, or fold
    /// a renegotiation offer in (only newly offered content creates a new
    /// element; negotiated kinds stay untouched).
    async fn renegotiate(
        &mut self,
        adapter: &Arc<dyn MediaAdapter>,
        hub: &EventHub,
    ) -> Result<Option<String>> {
        let remote = self.remote_descriptor.clone().ok_or_else(|| {
            Error::MediaInvalidOperation(format!(
                "session {} has nothing to renegotiate",
                self.id
            ))
        })?;
        let processing_answer = self.should_process_remote_as_answerer;
        debug!(
            session_id = %self.id,
            processing_answer,
            "Renegotiating"
        );

        if let Some(single) = self.single_full_unit().await {
            // One element carries every kind: feed it the whole descriptor
            if processing_answer {
                let element = single.read().await.element.clone();
                adapter.process_answer(&element, &remote).await?;
            }
            let mut unit = single.write().await;
            unit.remote_descriptor = Some(remote.clone());
            unit.media_types = confab_sdp::media_types_of(&remote);
        } else {
            for (selector, profile) in [
                (SectionSelector::Audio, MediaProfile::Audio),
                (SectionSelector::MainVideo, MediaProfile::Main),
                (SectionSelector::Content, MediaProfile::Content),
            ] {
                let partial = match selector {
                    SectionSelector::Audio => confab_sdp::audio_partial(&remote),
                    SectionSelector::MainVideo => confab_sdp::video_partial(&remote),
                    SectionSelector::Content => confab_sdp::content_partial(&remote),
                };
                let Some(partial) = partial else { continue };

                if let Some(unit_arc) = self.unit_for_profile(profile).await {
                    if processing_answer {
                        let reduced = confab_sdp::reduced_description(&remote, selector)
                            .unwrap_or_else(|| partial.clone());
                        let element = unit_arc.read().await.element.clone();
                        adapter.process_answer(&element, &reduced).await?;
                    }
                    let mut unit = unit_arc.write().await;
                    unit.remote_descriptor = Some(partial.clone());
                    unit.media_types = confab_sdp::media_types_of(&partial);
                } else if profile == MediaProfile::Content {
                    // Content newly offered mid-call: create its unit now
                    info!(session_id = %self.id, "Negotiating late content media");
                    let negotiated = adapter
                        .negotiate(
                            &self.room_id,
                            &self.user_id,
                            &self.id,
                            Some(&partial),
                            self.session_type,
                            MediaProfile::Content,
                            &self.options,
                        )
                        .await?;
                    for media in negotiated {
                        let unit = MediaUnit::from_negotiated(
                            media,
                            self.id.clone(),
                            self.room_id.clone(),
                            self.user_id.clone(),
                            self.session_type,
                        );
                        self.medias.push(Arc::new(RwLock::new(unit)));
                    }
                }
            }
        }

        self.should_process_remote_as_answerer = false;
        self.should_renegotiate = false;
        self.media_types = self.union_media_types().await;

        let local = self.assemble_local_descriptor(Some(&remote)).await;
        if let Some(local_sdp) = &local {
            self.spec = confab_sdp::narrow_spec(&self.spec, local_sdp);
            self.local_descriptor = Some(local_sdp.clone());
        }

        // Answer processed (offerer) or new offer answered (answerer):
        // either way the exchange is complete
        hub.publish(&MediaEvent::MediaNegotiated {
            session_id: self.id.clone(),
            room_id: self.room_id.clone(),
            timestamp: Utc::now(),
        });

        Ok(local.or_else(|| self.local_descriptor.clone()))
    }

    /// Stop every owned unit and report the removed unit IDs so the caller
    /// can deindex them.
    pub async fn stop(
        &mut self,
        adapter: &Arc<dyn MediaAdapter>,
        hub: &EventHub,
    ) -> Result<Vec<MediaUnitId>> {
        let mut removed = Vec::new();
        for unit_arc in self.medias.drain(..) {
            let unit = unit_arc.read().await;
            if let Err(err) = unit.release(adapter).await {
                warn!(
                    media_unit_id = %unit.id,
                    error = %err,
                    "Failed to release media unit, continuing cleanup"
                );
            }
            hub.publish(&MediaEvent::MediaDisconnected {
                room_id: self.room_id.clone(),
                media_unit_id: unit.id.clone(),
                timestamp: Utc::now(),
            });
            removed.push(unit.id.clone());
        }
        info!(session_id = %self.id, units = removed.len(), "Session stopped");
        Ok(removed)
    }

    /// Reassemble the session-level local descriptor from the units.
    ///
    /// The audio partial leads (a compatibility requirement of some
    /// endpoints), the video and content partials follow in their original
    /// offer order, under a single session header taken from the first
    /// non-audio unit or, failing that, the first unit.
    async fn assemble_local_descriptor(&self, remote: Option<&str>) -> Option<String> {
        let mut parts: Vec<(MediaProfile, String)> = Vec::new();
        for unit_arc in &self.medias {
            let unit = unit_arc.read().await;
            if let Some(local) = &unit.local_descriptor {
                parts.push((unit.profile, local.clone()));
            }
        }

        match parts.len() {
            0 => None,
            1 => Some(parts.remove(0).1),
            _ => {
                let header = parts
                    .iter()
                    .find(|(profile, _)| *profile != MediaProfile::Audio)
                    .map_or_else(|| parts[0].1.clone(), |(_, local)| local.clone());

                let content_before_video = remote.is_some_and(|sdp| {
                    let sections = confab_sdp::media_sections(sdp);
                    let video = sections.iter().position(|s| {
                        s.starts_with("m=video") && !s.contains("a=content:slides")
                    });
                    let content = sections
                        .iter()
                        .position(|s| s.starts_with("m=video") && s.contains("a=content:slides"));
                    matches!((video, content), (Some(v), Some(c)) if c < v)
                });

                let take = |parts: &[(MediaProfile, String)], profile| -> Vec<String> {
                    parts
                        .iter()
                        .filter(|(p, _)| *p == profile)
                        .map(|(_, l)| l.clone())
                        .collect()
                };
                let mut ordered = take(&parts, MediaProfile::Audio);
                let video = take(&parts, MediaProfile::Main);
                let content = take(&parts, MediaProfile::Content);
                if content_before_video {
                    ordered.extend(content);
                    ordered.extend(video);
                } else {
                    ordered.extend(video);
                    ordered.extend(content);
                }
                ordered.extend(take(&parts, MediaProfile::All));

                Some(confab_sdp::reassemble(&header, &ordered))
            }
        }
    }

    async fn union_media_types(&self) -> MediaTypesMap {
        let mut types = MediaTypesMap::default();
        for unit_arc in &self.medias {
            types.absorb(&unit_arc.read().await.media_types);
        }
        types
    }

    /// The session's single unit when one element carries all kinds
    async fn single_full_unit(&self) -> Option<Arc<RwLock<MediaUnit>>> {
        if self.medias.len() != 1 {
            return None;
        }
        let unit = self.medias[0].read().await;
        (unit.profile == MediaProfile::All).then(|| Arc::clone(&self.medias[0]))
    }

    pub async fn unit_for_profile(
        &self,
        profile: MediaProfile,
    ) -> Option<Arc<RwLock<MediaUnit>>> {
        for unit_arc in &self.medias {
            if unit_arc.read().await.profile == profile {
                return Some(Arc::clone(unit_arc));
            }
        }
        None
    }

    /// First unit carrying audio, for DTMF and volume operations
    pub async fn audio_unit(&self) -> Option<Arc<RwLock<MediaUnit>>> {
        for unit_arc in &self.medias {
            let unit = unit_arc.read().await;
            if unit.profile == MediaProfile::Audio
                || unit.profile == MediaProfile::All && unit.media_types.has_audio()
            {
                return Some(Arc::clone(unit_arc));
            }
        }
        None
    }

    /// First unit carrying main video, for floor arbitration
    pub async fn video_unit(&self) -> Option<Arc<RwLock<MediaUnit>>> {
        for unit_arc in &self.medias {
            let unit = unit_arc.read().await;
            if unit.profile == MediaProfile::Main
                || unit.profile == MediaProfile::All && unit.media_types.has_video()
            {
                return Some(Arc::clone(unit_arc));
            }
        }
        None
    }

    /// The content (screen share) unit, for the content floor
    pub async fn content_media(&self) -> Option<Arc<RwLock<MediaUnit>>> {
        for unit_arc in &self.medias {
            let unit = unit_arc.read().await;
            if unit.profile == MediaProfile::Content
                || unit.profile == MediaProfile::All && unit.media_types.has_content()
            {
                return Some(Arc::clone(unit_arc));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_backend::balancer::{BalanceStrategy, Balancer, Host};
    use confab_backend::adapter::BackendAdapter;
    use confab_backend::driver::MediaDriver;
    use confab_backend::testing::{sdp, MockDriver};
    use confab_core::config::{BackendConfig, DtmfConfig};

    fn session(session_type: SessionType) -> MediaSession {
        MediaSession::new(
            RoomId::from("r1"),
            UserId::from("u1"),
            session_type,
            MediaProfile::All,
            "test",
            NegotiateOptions::default(),
            &DtmfConfig::default(),
        )
    }

    fn adapter() -> (Arc<MockDriver>, Arc<dyn MediaAdapter>, EventHub) {
        let driver = Arc::new(MockDriver::new());
        let balancer = Arc::new(Balancer::new(BalanceStrategy::RoundRobin));
        balancer.add_host(Host::new("h1", "10.0.0.1", vec![]));
        let hub = EventHub::new();
        let adapter: Arc<dyn MediaAdapter> = Arc::new(BackendAdapter::new(
            Arc::clone(&driver) as Arc<dyn MediaDriver>,
            balancer,
            hub.clone(),
            &BackendConfig::default(),
        ));
        (driver, adapter, hub)
    }

    #[test]
    fn test_role_fixed_by_first_descriptor() {
        let mut answerer = session(SessionType::WebRtc);
        let flags = answerer.set_remote_descriptor(sdp::AUDIO_VIDEO_OFFER);
        assert_eq!(flags.role_assigned, Some(NegotiationRole::Answerer));
        assert_eq!(answerer.negotiation_role, Some(NegotiationRole::Answerer));

        let mut offerer = session(SessionType::WebRtc);
        let flags = offerer.set_local_descriptor(sdp::AUDIO_VIDEO_OFFER);
        assert_eq!(flags.role_assigned, Some(NegotiationRole::Offerer));
        assert_eq!(offerer.negotiation_role, Some(NegotiationRole::Offerer));
    }

    #[test]
    fn test_role_never_flips() {
        let mut s = session(SessionType::WebRtc);
        s.set_local_descriptor("local-offer");
        s.set_remote_descriptor("remote-answer");
        assert_eq!(s.negotiation_role, Some(NegotiationRole::Offerer));
    }

    #[test]
    fn test_remote_after_local_flags_answer_processing() {
        let mut s = session(SessionType::WebRtc);
        s.set_local_descriptor("local-offer");

        let flags = s.set_remote_descriptor("remote-answer");
        assert!(flags.process_as_answerer);
        assert!(s.should_process_remote_as_answerer());
        assert!(!s.should_renegotiate());
    }

    #[test]
    fn test_second_remote_flags_renegotiation() {
        let mut s = session(SessionType::WebRtc);
        s.set_local_descriptor("local-offer");
        s.set_remote_descriptor("remote-answer");

        let flags = s.set_remote_descriptor("renegotiation-offer");
        assert!(flags.renegotiate);
        assert!(s.should_renegotiate());
    }

    #[test]
    fn test_role_law_unset_role_means_at_most_one_descriptor() {
        let s = session(SessionType::WebRtc);
        assert!(s.negotiation_role.is_none());
        assert!(s.remote_descriptor.is_none() && s.local_descriptor.is_none());
    }

    #[tokio::test]
    async fn test_process_as_answerer_emits_negotiated() {
        let (_driver, adapter, hub) = adapter();
        let (_, mut negotiated_rx) =
            hub.subscribe(confab_core::EventKind::MediaNegotiated, "all");

        let mut s = session(SessionType::WebRtc);
        s.set_remote_descriptor(sdp::AUDIO_VIDEO_OFFER);
        let answer = s.process(&adapter, &hub).await.unwrap();

        assert!(answer.unwrap().contains("o=mock"));
        assert_eq!(s.medias.len(), 1);
        assert!(s.media_types.has_audio());
        assert!(negotiated_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_process_as_offerer_defers_negotiated_event() {
        let (_driver, adapter, hub) = adapter();
        let (_, mut negotiated_rx) =
            hub.subscribe(confab_core::EventKind::MediaNegotiated, "all");

        let mut s = session(SessionType::WebRtc);
        let offer = s.process(&adapter, &hub).await.unwrap().unwrap();
        assert!(!offer.is_empty());
        assert_eq!(s.negotiation_role, Some(NegotiationRole::Offerer));
        // No MEDIA_NEGOTIATED until the answer is processed
        assert!(negotiated_rx.try_recv().is_err());

        s.set_remote_descriptor(sdp::AUDIO_VIDEO_OFFER);
        s.process(&adapter, &hub).await.unwrap();
        assert!(negotiated_rx.try_recv().is_ok());
        assert!(!s.should_process_remote_as_answerer());
    }

    #[tokio::test]
    async fn test_process_is_idempotent_without_pending_flags() {
        let (driver, adapter, hub) = adapter();
        let mut s = session(SessionType::WebRtc);
        s.set_remote_descriptor(sdp::AUDIO_VIDEO_OFFER);

        let first = s.process(&adapter, &hub).await.unwrap();
        let calls_after_first = driver.call_names().len();
        let second = s.process(&adapter, &hub).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(driver.call_names().len(), calls_after_first);
    }

    #[tokio::test]
    async fn test_mcu_session_has_no_descriptor() {
        let (_driver, adapter, hub) = adapter();
        let mut s = session(SessionType::Mcu);
        let result = s.process(&adapter, &hub).await.unwrap();
        assert!(result.is_none());
        assert_eq!(s.medias.len(), 1);
    }

    #[tokio::test]
    async fn test_spec_narrowed_after_negotiation() {
        let (_driver, adapter, hub) = adapter();
        let mut s = session(SessionType::WebRtc);
        s.spec = MediaSpec {
            audio_codecs: vec!["opus".into(), "G722".into()],
            video_codecs: vec!["H264".into()],
        };
        s.set_remote_descriptor(sdp::AUDIO_VIDEO_OFFER);
        s.process(&adapter, &hub).await.unwrap();

        assert_eq!(s.spec.audio_codecs, vec!["opus"]);
        assert_eq!(s.spec.video_codecs, vec!["H264"]);
    }

    #[tokio::test]
    async fn test_renegotiation_processes_answer_on_element() {
        let (driver, adapter, hub) = adapter();
        let mut s = session(SessionType::WebRtc);
        let _offer = s.process(&adapter, &hub).await.unwrap();
        driver.clear_calls();

        s.set_remote_descriptor(sdp::AUDIO_VIDEO_OFFER);
        s.process(&adapter, &hub).await.unwrap();

        assert_eq!(driver.count("process_answer"), 1);
        assert_eq!(driver.count("create_element"), 0);
    }
}
