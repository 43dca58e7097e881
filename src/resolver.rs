//! Resolves a client's quality choice against a freshly fetched stream list.
//!
//! Catalogs go stale: between listing and downloading, the source may stop
//! offering the exact stream the client picked. The resolver accepts the exact
//! stream when it is still listed and otherwise falls back to the nearest
//! available one of the same kind.

use std::collections::HashSet;

use tracing::debug;

use crate::catalog::{QualityLabel, QualityOption};
use crate::descriptor::{
    DescriptorId, MediaKind, RawDescriptor, StreamDescriptor, normalize_all,
};
use crate::errors::ClassifiedError;

/// What the client asked for, with its kind stated explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityRequest {
    pub kind: MediaKind,
    pub descriptor_id: Option<DescriptorId>,
    pub label: Option<QualityLabel>,
}

impl QualityRequest {
    pub fn new(
        kind: MediaKind,
        descriptor_id: Option<DescriptorId>,
        label: Option<QualityLabel>,
    ) -> Self {
        Self {
            kind,
            descriptor_id,
            label,
        }
    }

    /// Echoes a catalog option back as a request.
    pub fn from_option(option: &QualityOption) -> Self {
        Self::new(
            option.kind,
            Some(option.descriptor_id.clone()),
            Some(option.quality_label.clone()),
        )
    }

    /// Builds a request from an untagged identifier that may be either a
    /// quality label (`720p`, `128kbps`) or an opaque descriptor id.
    ///
    /// The kind comes from the label shape; anything else is treated as a
    /// video descriptor id until [`resolve`] finds the listed stream and takes
    /// the kind from it. The identifier is always tried verbatim as a
    /// descriptor id first.
    pub fn infer(identifier: &str) -> Self {
        let identifier = identifier.trim();
        let label = QualityLabel::new(identifier);
        match label.parse() {
            Some((kind, _)) => Self::new(kind, Some(DescriptorId::new(identifier)), Some(label)),
            None => Self::new(MediaKind::Video, Some(DescriptorId::new(identifier)), None),
        }
    }

    fn target_height(&self) -> Option<u32> {
        match self.label.as_ref()?.parse()? {
            (MediaKind::Video, height) => Some(height),
            (MediaKind::Audio, _) => None,
        }
    }
}

/// A concrete stream the download can be built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub descriptor_id: DescriptorId,
    pub kind: MediaKind,
    pub height: Option<u32>,
    /// `true` when the requested stream was gone and a substitute was picked.
    pub fell_back: bool,
}

/// Resolves `request` against the current raw descriptor list.
///
/// Returns exactly one descriptor or `FormatUnavailable`; never an empty
/// resolution.
pub fn resolve(
    request: &QualityRequest,
    raw: &[RawDescriptor],
) -> Result<Resolution, ClassifiedError> {
    let descriptors = normalize_all(raw);

    if let Some(requested) = &request.descriptor_id {
        let available: HashSet<&str> = raw
            .iter()
            .filter_map(|descriptor| descriptor.format_id.as_deref())
            .collect();
        if available.contains(requested.as_str()) {
            let matched = descriptors
                .iter()
                .find(|descriptor| &descriptor.id == requested);
            // The stream itself decides the kind; an opaque id only guessed it.
            let kind = match matched {
                Some(descriptor) if descriptor.is_audio_only() => MediaKind::Audio,
                Some(descriptor) if descriptor.has_video => MediaKind::Video,
                _ => request.kind,
            };
            let height = matched
                .and_then(|descriptor| descriptor.height)
                .or_else(|| {
                    raw.iter()
                        .find(|descriptor| {
                            descriptor.format_id.as_deref() == Some(requested.as_str())
                        })
                        .and_then(|descriptor| descriptor.height)
                });
            return Ok(Resolution {
                descriptor_id: requested.clone(),
                kind,
                height,
                fell_back: false,
            });
        }
    }

    let fallback = match request.kind {
        MediaKind::Video => nearest_video(&descriptors, request.target_height()),
        MediaKind::Audio => best_audio(&descriptors),
    };

    let Some(chosen) = fallback else {
        return Err(ClassifiedError::format_unavailable(format!(
            "no {} stream available for request {:?}",
            request.kind.as_str(),
            request
        )));
    };

    debug!(
        requested = ?request.descriptor_id,
        label = ?request.label,
        chosen = %chosen.id,
        "requested stream gone, falling back"
    );

    Ok(Resolution {
        descriptor_id: chosen.id.clone(),
        kind: request.kind,
        height: chosen.height,
        fell_back: true,
    })
}

/// Closest height among video streams that carry audio or can be merged with
/// a separate audio stream. Equal distances keep the first in input order; an
/// unknown target picks the tallest stream.
fn nearest_video(
    descriptors: &[StreamDescriptor],
    target: Option<u32>,
) -> Option<&StreamDescriptor> {
    let audio_available = descriptors.iter().any(StreamDescriptor::is_audio_only);
    let target = target.unwrap_or(u32::MAX);

    let mut best: Option<(u32, &StreamDescriptor)> = None;
    for descriptor in descriptors {
        if !descriptor.has_video || !(descriptor.has_audio || audio_available) {
            continue;
        }
        let Some(height) = descriptor.height else {
            continue;
        };
        let distance = height.abs_diff(target);
        if best.is_none_or(|(current, _)| distance < current) {
            best = Some((distance, descriptor));
        }
    }
    best.map(|(_, descriptor)| descriptor)
}

/// Highest-bitrate audio-only stream; equal bitrates keep the first.
fn best_audio(descriptors: &[StreamDescriptor]) -> Option<&StreamDescriptor> {
    let mut best: Option<&StreamDescriptor> = None;
    for descriptor in descriptors.iter().filter(|d| d.is_audio_only()) {
        let bitrate = descriptor.bitrate_kbps.unwrap_or(0);
        if best.is_none_or(|current| bitrate > current.bitrate_kbps.unwrap_or(0)) {
            best = Some(descriptor);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use crate::catalog::Catalog;
    use crate::descriptor::fixtures::{audio, muxed, video};
    use crate::download_spec::DownloadSpec;
    use crate::errors::ErrorKind;

    fn video_request(id: &str, label: &str) -> QualityRequest {
        QualityRequest::new(
            MediaKind::Video,
            Some(DescriptorId::new(id)),
            Some(QualityLabel::new(label)),
        )
    }

    #[test]
    fn present_id_resolves_unchanged() {
        let raw = vec![
            video("137", "mp4", 1080, "avc1"),
            audio("140", "m4a", 128.0),
        ];
        let resolution = resolve(&video_request("137", "1080p"), &raw).unwrap();
        assert_eq!(resolution.descriptor_id.as_str(), "137");
        assert_eq!(resolution.height, Some(1080));
        assert!(!resolution.fell_back);
    }

    #[test]
    fn nearest_height_wins_when_requested_id_is_gone() {
        let raw = vec![muxed("18", "mp4", 360), muxed("22", "mp4", 720)];
        let resolution = resolve(&video_request("135", "480p"), &raw).unwrap();
        assert_eq!(resolution.descriptor_id.as_str(), "18");
        assert_eq!(resolution.height, Some(360));
        assert!(resolution.fell_back);
    }

    #[test]
    fn equidistant_candidates_keep_input_order() {
        let raw = vec![muxed("low", "mp4", 600), muxed("high", "mp4", 800)];
        let resolution = resolve(&video_request("gone", "700p"), &raw).unwrap();
        assert_eq!(resolution.descriptor_id.as_str(), "low");

        let reversed = vec![muxed("high", "mp4", 800), muxed("low", "mp4", 600)];
        let resolution = resolve(&video_request("gone", "700p"), &reversed).unwrap();
        assert_eq!(resolution.descriptor_id.as_str(), "high");
    }

    #[test]
    fn video_only_streams_need_separate_audio() {
        let without_audio = vec![video("136", "mp4", 720, "avc1")];
        let err = resolve(&video_request("gone", "720p"), &without_audio).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FormatUnavailable);

        let with_audio = vec![
            video("136", "mp4", 720, "avc1"),
            audio("140", "m4a", 128.0),
        ];
        let resolution = resolve(&video_request("gone", "720p"), &with_audio).unwrap();
        assert_eq!(resolution.descriptor_id.as_str(), "136");
    }

    #[test]
    fn unknown_target_picks_tallest() {
        let raw = vec![muxed("18", "mp4", 360), muxed("22", "mp4", 720)];
        let request = QualityRequest::from_option(&QualityOption::best_available());
        let resolution = resolve(&request, &raw).unwrap();
        assert_eq!(resolution.descriptor_id.as_str(), "22");
    }

    #[test]
    fn audio_falls_back_to_highest_bitrate() {
        let raw = vec![
            audio("139", "m4a", 48.0),
            audio("251", "webm", 160.0),
            audio("250", "webm", 160.0),
            muxed("18", "mp4", 360),
        ];
        let request = QualityRequest::new(
            MediaKind::Audio,
            Some(DescriptorId::new("140")),
            Some(QualityLabel::new("128kbps")),
        );
        let resolution = resolve(&request, &raw).unwrap();
        assert_eq!(resolution.descriptor_id.as_str(), "251");
        assert_eq!(resolution.kind, MediaKind::Audio);
        assert!(resolution.fell_back);
    }

    #[test]
    fn audio_request_without_audio_streams_is_unavailable() {
        let raw = vec![muxed("18", "mp4", 360)];
        let err = resolve(&QualityRequest::infer("128kbps"), &raw).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FormatUnavailable);
    }

    #[test]
    fn empty_list_is_unavailable() {
        let err = resolve(&video_request("137", "1080p"), &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FormatUnavailable);
    }

    #[test]
    fn infer_classifies_by_label_shape() {
        let video = QualityRequest::infer("720p");
        assert_eq!(video.kind, MediaKind::Video);
        assert_eq!(video.target_height(), Some(720));

        let audio = QualityRequest::infer("128kbps");
        assert_eq!(audio.kind, MediaKind::Audio);

        let opaque = QualityRequest::infer("137");
        assert_eq!(opaque.kind, MediaKind::Video);
        assert_eq!(opaque.label, None);
        assert_eq!(opaque.descriptor_id, Some(DescriptorId::new("137")));
    }

    #[test]
    fn inferred_label_matches_identically_named_descriptor() {
        let raw = vec![muxed("720p", "mp4", 720), muxed("18", "mp4", 360)];
        let resolution = resolve(&QualityRequest::infer("720p"), &raw).unwrap();
        assert_eq!(resolution.descriptor_id.as_str(), "720p");
        assert!(!resolution.fell_back);
    }

    #[test]
    fn opaque_audio_id_resolves_as_audio() {
        let raw = vec![muxed("18", "mp4", 360), audio("140", "m4a", 128.0)];
        let resolution = resolve(&QualityRequest::infer("140"), &raw).unwrap();
        assert_eq!(resolution.descriptor_id.as_str(), "140");
        assert_eq!(resolution.kind, MediaKind::Audio);
        assert_eq!(resolution.height, None);

        let spec = DownloadSpec::build(&resolution, Path::new("track.%(ext)s"));
        assert_eq!(spec.format_expression, "bestaudio[ext=m4a]/bestaudio");
        assert_eq!(spec.output_extension(), "mp3");
    }

    #[test]
    fn catalog_options_resolve_against_same_list() {
        let raw = vec![
            video("137", "mp4", 1080, "avc1"),
            video("248", "webm", 1080, "vp9"),
            video("136", "mp4", 720, "avc1"),
            audio("140", "m4a", 128.0),
        ];
        let catalog = Catalog::build(&normalize_all(&raw));
        for option in catalog.options() {
            let resolution = resolve(&QualityRequest::from_option(option), &raw).unwrap();
            assert_eq!(resolution.descriptor_id, option.descriptor_id);
            assert!(!resolution.fell_back);
        }
    }
}
