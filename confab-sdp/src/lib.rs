//! Pure functions over SDP text.
//!
//! The orchestrator splits multi-m-line descriptors into per-profile
//! partials, routes each to its backend, and reassembles the answers under a
//! single session header. All functions here are line-level text transforms;
//! nothing round-trips through a parser, so unknown attributes pass through
//! untouched. Input line endings (`\r\n` or `\n`) are preserved on output
//! as `\r\n`.

use confab_core::models::media::{MediaDirection, MediaSpec, MediaTypesMap};

const CRLF: &str = "\r\n";

/// Marker attribute for a screen-share m-section
pub const CONTENT_SLIDES: &str = "a=content:slides";
/// Marker attribute for a camera-video m-section
pub const CONTENT_MAIN: &str = "a=content:main";

fn lines(sdp: &str) -> impl Iterator<Item = &str> {
    sdp.lines().filter(|l| !l.is_empty())
}

fn join(lines: &[&str]) -> String {
    let mut out = lines.join(CRLF);
    out.push_str(CRLF);
    out
}

/// Session-level prelude: everything before the first `m=` line
#[must_use]
pub fn session_header(sdp: &str) -> String {
    let header: Vec<&str> = lines(sdp).take_while(|l| !l.starts_with("m=")).collect();
    join(&header)
}

/// Everything from the first `m=` line on
#[must_use]
pub fn remove_session_header(sdp: &str) -> String {
    let body: Vec<&str> = lines(sdp).skip_while(|l| !l.starts_with("m=")).collect();
    if body.is_empty() {
        String::new()
    } else {
        join(&body)
    }
}

/// Media sections as separate bodies (no session header), offer order
#[must_use]
pub fn media_sections(sdp: &str) -> Vec<String> {
    let mut sections: Vec<Vec<&str>> = Vec::new();
    for line in lines(sdp) {
        if line.starts_with("m=") {
            sections.push(vec![line]);
        } else if let Some(current) = sections.last_mut() {
            current.push(line);
        }
    }
    sections.iter().map(|s| join(s)).collect()
}

/// Split a session description into one partial per media section, each
/// carrying the session header.
#[must_use]
pub fn partial_descriptions(sdp: &str) -> Vec<String> {
    let header = session_header(sdp);
    media_sections(sdp)
        .into_iter()
        .map(|body| format!("{header}{body}"))
        .collect()
}

fn section_kind(section: &str) -> Option<&str> {
    let m_line = lines(section).find(|l| l.starts_with("m="))?;
    m_line.strip_prefix("m=")?.split_whitespace().next()
}

fn is_content_section(section: &str) -> bool {
    lines(section).any(|l| l.trim() == CONTENT_SLIDES)
}

/// The audio partial of a multi-media descriptor, if present
#[must_use]
pub fn audio_partial(sdp: &str) -> Option<String> {
    let header = session_header(sdp);
    media_sections(sdp)
        .into_iter()
        .find(|s| section_kind(s) == Some("audio"))
        .map(|body| format!("{header}{body}"))
}

/// The main (camera) video partial: a video section not marked as slides
#[must_use]
pub fn video_partial(sdp: &str) -> Option<String> {
    let header = session_header(sdp);
    media_sections(sdp)
        .into_iter()
        .find(|s| section_kind(s) == Some("video") && !is_content_section(s))
        .map(|body| format!("{header}{body}"))
}

/// The content (screen share) partial: a video section marked `a=content:slides`
#[must_use]
pub fn content_partial(sdp: &str) -> Option<String> {
    let header = session_header(sdp);
    media_sections(sdp)
        .into_iter()
        .find(|s| section_kind(s) == Some("video") && is_content_section(s))
        .map(|body| format!("{header}{body}"))
}

/// Reassemble partials under one shared session header.
/// Bodies keep the order they are given in; the caller is responsible for
/// the audio-first convention.
#[must_use]
pub fn reassemble(header: &str, partials: &[String]) -> String {
    let mut out = session_header(header);
    for partial in partials {
        out.push_str(&remove_session_header(partial));
    }
    out
}

fn payload_types_for_codec(section_lines: &[&str], codec: &str) -> Vec<String> {
    let needle = codec.to_ascii_lowercase();
    section_lines
        .iter()
        .filter_map(|l| l.strip_prefix("a=rtpmap:"))
        .filter_map(|rest| {
            let (pt, name) = rest.split_once(' ')?;
            let codec_name = name.split('/').next()?.to_ascii_lowercase();
            (codec_name == needle).then(|| pt.to_string())
        })
        .collect()
}

fn line_payload_type(line: &str) -> Option<&str> {
    for prefix in ["a=rtpmap:", "a=fmtp:", "a=rtcp-fb:"] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return rest.split([' ', '/']).next();
        }
    }
    None
}

/// Retain only the payload types of the named codec in every video section.
/// Orphan `rtpmap`/`fmtp`/`rtcp-fb` lines are removed and the m-line payload
/// list is pruned accordingly. Audio sections pass through untouched.
#[must_use]
pub fn filter_by_video_codec(sdp: &str, codec: &str) -> String {
    let all: Vec<&str> = lines(sdp).collect();
    let mut out: Vec<String> = Vec::with_capacity(all.len());
    let mut in_video = false;
    let mut kept: Vec<String> = Vec::new();

    for (i, line) in all.iter().enumerate() {
        if line.starts_with("m=") {
            in_video = line.starts_with("m=video");
            if in_video {
                // Look ahead over this section to learn the surviving payloads
                let section: Vec<&str> = all[i + 1..]
                    .iter()
                    .take_while(|l| !l.starts_with("m="))
                    .copied()
                    .collect();
                kept = payload_types_for_codec(&section, codec);

                let mut parts = line.split_whitespace();
                let (m, port, proto) = (
                    parts.next().unwrap_or_default(),
                    parts.next().unwrap_or_default(),
                    parts.next().unwrap_or_default(),
                );
                let mut m_line = format!("{m} {port} {proto}");
                for pt in parts.filter(|pt| kept.iter().any(|k| k == pt)) {
                    m_line.push(' ');
                    m_line.push_str(pt);
                }
                out.push(m_line);
                continue;
            }
        }

        if in_video {
            if let Some(pt) = line_payload_type(line) {
                if !kept.iter().any(|k| k == pt) {
                    continue;
                }
            }
        }
        out.push((*line).to_string());
    }

    let mut text = out.join(CRLF);
    text.push_str(CRLF);
    text
}

/// Substitute every `c=IN IP4 …` connection address
#[must_use]
pub fn replace_connection_ipv4(sdp: &str, ip: &str) -> String {
    let replaced: Vec<String> = lines(sdp)
        .map(|l| {
            if l.starts_with("c=IN IP4 ") {
                format!("c=IN IP4 {ip}")
            } else {
                l.to_string()
            }
        })
        .collect();
    let mut text = replaced.join(CRLF);
    text.push_str(CRLF);
    text
}

fn section_direction(section: &str) -> MediaDirection {
    for line in lines(section) {
        match line.trim() {
            "a=sendrecv" => return MediaDirection::SendRecv,
            "a=sendonly" => return MediaDirection::SendOnly,
            "a=recvonly" => return MediaDirection::RecvOnly,
            "a=inactive" => return MediaDirection::Inactive,
            _ => {}
        }
    }
    // RFC 3264 default
    MediaDirection::SendRecv
}

fn section_port(section: &str) -> u16 {
    lines(section)
        .find(|l| l.starts_with("m="))
        .and_then(|m| m.split_whitespace().nth(1))
        .and_then(|p| p.parse().ok())
        .unwrap_or(0)
}

fn section_active(section: &str) -> bool {
    section_port(section) != 0 && section_direction(section) != MediaDirection::Inactive
}

fn merge_slot(slot: &mut Option<MediaDirection>, incoming: MediaDirection) {
    // A kind may appear in several sections; union toward the most capable
    *slot = match *slot {
        None => Some(incoming),
        Some(prev) => {
            let send = prev.can_send() || incoming.can_send();
            let recv = prev.can_recv() || incoming.can_recv();
            Some(match (send, recv) {
                (true, true) => MediaDirection::SendRecv,
                (true, false) => MediaDirection::SendOnly,
                (false, true) => MediaDirection::RecvOnly,
                (false, false) => MediaDirection::Inactive,
            })
        }
    };
}

/// Per-kind directions negotiated by this descriptor.
/// Rejected sections (port 0) count as inactive.
#[must_use]
pub fn media_types_of(sdp: &str) -> MediaTypesMap {
    let mut map = MediaTypesMap::default();
    for section in media_sections(sdp) {
        let direction = if section_port(&section) == 0 {
            MediaDirection::Inactive
        } else {
            section_direction(&section)
        };
        match section_kind(&section) {
            Some("audio") => merge_slot(&mut map.audio, direction),
            Some("video") if is_content_section(&section) => {
                merge_slot(&mut map.content, direction);
            }
            Some("video") => merge_slot(&mut map.video, direction),
            _ => {}
        }
    }
    map
}

/// At least one live (non-rejected, non-inactive) audio section with a codec
#[must_use]
pub fn has_available_audio_codec(sdp: &str) -> bool {
    media_sections(sdp)
        .iter()
        .any(|s| section_kind(s) == Some("audio") && section_active(s) && has_codec(s))
}

/// At least one live (non-rejected, non-inactive) video section with a codec
#[must_use]
pub fn has_available_video_codec(sdp: &str) -> bool {
    media_sections(sdp)
        .iter()
        .any(|s| section_kind(s) == Some("video") && section_active(s) && has_codec(s))
}

fn has_codec(section: &str) -> bool {
    lines(section).any(|l| l.starts_with("a=rtpmap:"))
        || lines(section)
            .find(|l| l.starts_with("m="))
            .is_some_and(|m| m.split_whitespace().count() > 3)
}

fn section_codecs(section: &str) -> Vec<String> {
    let mut codecs: Vec<String> = Vec::new();
    for line in lines(section) {
        if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            if let Some((_, name)) = rest.split_once(' ') {
                if let Some(codec) = name.split('/').next() {
                    if !codecs.iter().any(|c| c.eq_ignore_ascii_case(codec)) {
                        codecs.push(codec.to_string());
                    }
                }
            }
        }
    }
    codecs
}

/// Codecs actually present in a negotiated descriptor, used to narrow a
/// session's media spec so later renegotiations stay compatible.
#[must_use]
pub fn chosen_codecs(sdp: &str) -> MediaSpec {
    let mut spec = MediaSpec::default();
    for section in media_sections(sdp) {
        if !section_active(&section) {
            continue;
        }
        let target = match section_kind(&section) {
            Some("audio") => &mut spec.audio_codecs,
            Some("video") => &mut spec.video_codecs,
            _ => continue,
        };
        for codec in section_codecs(&section) {
            if !target.iter().any(|c| c.eq_ignore_ascii_case(&codec)) {
                target.push(codec);
            }
        }
    }
    spec
}

/// Narrow `spec` to the codecs present in `sdp`. An empty incoming side
/// leaves the existing wish-list untouched.
#[must_use]
pub fn narrow_spec(spec: &MediaSpec, sdp: &str) -> MediaSpec {
    let present = chosen_codecs(sdp);
    let narrow = |wish: &[String], actual: &[String]| -> Vec<String> {
        if wish.is_empty() {
            return actual.to_vec();
        }
        if actual.is_empty() {
            return wish.to_vec();
        }
        wish.iter()
            .filter(|w| actual.iter().any(|a| a.eq_ignore_ascii_case(w)))
            .cloned()
            .collect()
    };
    MediaSpec {
        audio_codecs: narrow(&spec.audio_codecs, &present.audio_codecs),
        video_codecs: narrow(&spec.video_codecs, &present.video_codecs),
    }
}

/// Strip WebRTC-only attributes for plain-RTP peers:
/// `a=rtcp-fb`, `a=mid`, the abs-send-time extension, `a=setup:actpass`,
/// and downshift `RTP/(S)AVPF` to `RTP/AVP` on every m-line.
#[must_use]
pub fn downgrade_to_plain_rtp(sdp: &str) -> String {
    let kept: Vec<String> = lines(sdp)
        .filter(|l| {
            !(l.starts_with("a=rtcp-fb:")
                || l.starts_with("a=mid:")
                || (l.starts_with("a=extmap:") && l.contains("abs-send-time"))
                || l.trim() == "a=setup:actpass")
        })
        .map(|l| {
            if l.starts_with("m=") {
                l.replace("UDP/TLS/RTP/SAVPF", "RTP/AVP")
                    .replace("RTP/SAVPF", "RTP/AVP")
                    .replace("RTP/AVPF", "RTP/AVP")
            } else {
                l.to_string()
            }
        })
        .collect();
    let mut text = kept.join(CRLF);
    text.push_str(CRLF);
    text
}

/// Ensure a content partial carries the `a=content:slides` marker
#[must_use]
pub fn mark_content_slides(partial: &str) -> String {
    if partial.lines().any(|l| l.trim() == CONTENT_SLIDES) {
        return partial.to_string();
    }
    let mut out: Vec<String> = Vec::new();
    let mut marked = false;
    for line in lines(partial) {
        out.push(line.to_string());
        if !marked && line.starts_with("m=video") {
            out.push(CONTENT_SLIDES.to_string());
            marked = true;
        }
    }
    let mut text = out.join(CRLF);
    text.push_str(CRLF);
    text
}

/// Reduce a multi-media descriptor to only the sections matching `keep`;
/// the others are stubbed as rejected inactive audio lines so m-line count
/// and order survive.
#[must_use]
pub fn reduced_description(sdp: &str, keep: SectionSelector) -> Option<String> {
    let header = session_header(sdp);
    let sections = media_sections(sdp);
    if !sections.iter().any(|s| keep.matches(s)) {
        return None;
    }
    let mut out = header;
    for section in &sections {
        if keep.matches(section) {
            out.push_str(section);
        } else {
            out.push_str("m=audio 0 RTP/AVP 0");
            out.push_str(CRLF);
            out.push_str("a=inactive");
            out.push_str(CRLF);
        }
    }
    Some(out)
}

/// Which media sections a reduced descriptor keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionSelector {
    Audio,
    MainVideo,
    Content,
}

impl SectionSelector {
    fn matches(self, section: &str) -> bool {
        match self {
            Self::Audio => section_kind(section) == Some("audio"),
            Self::MainVideo => {
                section_kind(section) == Some("video") && !is_content_section(section)
            }
            Self::Content => section_kind(section) == Some("video") && is_content_section(section),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 192.0.2.10\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1 2\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 0\r\n\
c=IN IP4 192.0.2.10\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=sendrecv\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n\
c=IN IP4 192.0.2.10\r\n\
a=mid:1\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 H264/90000\r\n\
a=fmtp:97 profile-level-id=42e01f\r\n\
a=rtcp-fb:96 nack\r\n\
a=rtcp-fb:97 nack pli\r\n\
a=content:main\r\n\
a=sendrecv\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 98\r\n\
c=IN IP4 192.0.2.10\r\n\
a=mid:2\r\n\
a=rtpmap:98 H264/90000\r\n\
a=content:slides\r\n\
a=sendonly\r\n";

    #[test]
    fn test_session_header_split() {
        let header = session_header(OFFER);
        assert!(header.starts_with("v=0"));
        assert!(header.contains("a=group:BUNDLE"));
        assert!(!header.contains("m=audio"));

        let body = remove_session_header(OFFER);
        assert!(body.starts_with("m=audio"));
    }

    #[test]
    fn test_partial_descriptions_carry_header() {
        let partials = partial_descriptions(OFFER);
        assert_eq!(partials.len(), 3);
        for p in &partials {
            assert!(p.starts_with("v=0"));
        }
        assert!(partials[0].contains("m=audio"));
        assert!(partials[1].contains("m=video"));
    }

    #[test]
    fn test_profile_extraction() {
        let audio = audio_partial(OFFER).unwrap();
        assert!(audio.contains("opus"));
        assert!(!audio.contains("m=video"));

        let video = video_partial(OFFER).unwrap();
        assert!(video.contains("a=content:main"));
        assert!(!video.contains("a=content:slides"));

        let content = content_partial(OFFER).unwrap();
        assert!(content.contains("a=content:slides"));
        assert!(content.contains("a=rtpmap:98"));
    }

    #[test]
    fn test_filter_by_video_codec() {
        let filtered = filter_by_video_codec(OFFER, "H264");
        assert!(!filtered.contains("VP8"));
        assert!(!filtered.contains("a=rtcp-fb:96"));
        assert!(filtered.contains("a=rtpmap:97 H264/90000"));
        assert!(filtered.contains("a=fmtp:97"));
        // m-line payload list pruned to the surviving codec
        assert!(filtered.contains("m=video 9 UDP/TLS/RTP/SAVPF 97\r\n"));
        // audio untouched
        assert!(filtered.contains("a=rtpmap:111 opus/48000/2"));
    }

    #[test]
    fn test_replace_connection_ipv4() {
        let rewritten = replace_connection_ipv4(OFFER, "203.0.113.5");
        assert!(!rewritten.contains("c=IN IP4 192.0.2.10"));
        assert_eq!(rewritten.matches("c=IN IP4 203.0.113.5").count(), 3);
    }

    #[test]
    fn test_media_types_of() {
        let types = media_types_of(OFFER);
        assert_eq!(types.audio, Some(MediaDirection::SendRecv));
        assert_eq!(types.video, Some(MediaDirection::SendRecv));
        assert_eq!(types.content, Some(MediaDirection::SendOnly));
    }

    #[test]
    fn test_rejected_section_is_inactive() {
        let sdp = "v=0\r\ns=-\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 VP8/90000\r\n";
        let types = media_types_of(sdp);
        assert_eq!(types.video, Some(MediaDirection::Inactive));
        assert!(!has_available_video_codec(sdp));
    }

    #[test]
    fn test_codec_availability() {
        assert!(has_available_audio_codec(OFFER));
        assert!(has_available_video_codec(OFFER));

        let audio_only = audio_partial(OFFER).unwrap();
        assert!(has_available_audio_codec(&audio_only));
        assert!(!has_available_video_codec(&audio_only));
    }

    #[test]
    fn test_chosen_codecs() {
        let spec = chosen_codecs(OFFER);
        assert_eq!(spec.audio_codecs, vec!["opus", "PCMU"]);
        assert_eq!(spec.video_codecs, vec!["VP8", "H264"]);
    }

    #[test]
    fn test_narrow_spec() {
        let wish = MediaSpec {
            audio_codecs: vec!["opus".into(), "G722".into()],
            video_codecs: vec!["H264".into(), "AV1".into()],
        };
        let narrowed = narrow_spec(&wish, OFFER);
        assert_eq!(narrowed.audio_codecs, vec!["opus"]);
        assert_eq!(narrowed.video_codecs, vec!["H264"]);
    }

    #[test]
    fn test_downgrade_to_plain_rtp() {
        let plain = downgrade_to_plain_rtp(OFFER);
        assert!(!plain.contains("a=rtcp-fb"));
        assert!(!plain.contains("a=mid:"));
        assert!(plain.contains("m=audio 9 RTP/AVP 111 0"));
        assert!(plain.contains("m=video 9 RTP/AVP 96 97"));
    }

    #[test]
    fn test_mark_content_slides_idempotent() {
        let content = content_partial(OFFER).unwrap();
        assert_eq!(mark_content_slides(&content), content);

        let video = video_partial(OFFER).unwrap();
        let marked = mark_content_slides(&video);
        assert!(marked.contains(CONTENT_SLIDES));
    }

    #[test]
    fn test_reassemble_audio_first() {
        let audio = audio_partial(OFFER).unwrap();
        let video = video_partial(OFFER).unwrap();
        let content = content_partial(OFFER).unwrap();

        let answer = reassemble(&video, &[audio, video.clone(), content]);
        let audio_pos = answer.find("m=audio").unwrap();
        let video_pos = answer.find("m=video").unwrap();
        assert!(audio_pos < video_pos);
        // one shared header only
        assert_eq!(answer.matches("v=0").count(), 1);
        assert_eq!(answer.matches("o=-").count(), 1);
    }

    #[test]
    fn test_reduced_description_stubs_other_kinds() {
        let reduced = reduced_description(OFFER, SectionSelector::Content).unwrap();
        assert!(reduced.contains("a=content:slides"));
        assert_eq!(reduced.matches("m=audio 0 RTP/AVP 0").count(), 2);
        assert!(!reduced.contains("a=content:main"));
    }

    #[test]
    fn test_reduced_description_missing_kind() {
        let audio_only = audio_partial(OFFER).unwrap();
        assert!(reduced_description(&audio_only, SectionSelector::Content).is_none());
    }

    #[test]
    fn test_tolerates_bare_newlines() {
        let lf = OFFER.replace("\r\n", "\n");
        assert_eq!(partial_descriptions(&lf).len(), 3);
        assert!(has_available_video_codec(&lf));
    }
}
