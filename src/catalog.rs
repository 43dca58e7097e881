//! Builds the user-facing quality catalog from normalized descriptors.
//!
//! Video streams are bucketed by height with one winner per bucket; audio-only
//! streams are ranked by bitrate and capped. The catalog is recomputed for
//! every listing request and never cached.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::descriptor::{DescriptorId, MediaKind, StreamDescriptor};
use crate::download_spec::AUDIO_TARGET_CODEC;

/// Container preferred when several streams share a height.
pub const STANDARD_VIDEO_CONTAINER: &str = "mp4";
/// Upper bound on audio options offered per catalog.
pub const MAX_AUDIO_OPTIONS: usize = 3;
/// Descriptor id of the placeholder offered when no video stream qualifies.
pub const BEST_AVAILABLE_ID: &str = "best";

const UNKNOWN_SIZE: &str = "Unknown";
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Catalog-facing quality label such as `720p` or `128kbps`.
///
/// Deliberately a different type from [`DescriptorId`]: a label names a
/// quality level, a descriptor id names one concrete stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityLabel(String);

impl QualityLabel {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn for_height(height: u32) -> Self {
        Self(format!("{height}p"))
    }

    pub fn for_bitrate(kbps: u32) -> Self {
        Self(format!("{kbps}kbps"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads the kind and numeric value back out of the label shape:
    /// `<n>p` is a video height, `<n>kbps` an audio bitrate.
    pub fn parse(&self) -> Option<(MediaKind, u32)> {
        let value = self.0.trim().to_ascii_lowercase();
        if let Some(digits) = value.strip_suffix("kbps") {
            return digits.trim().parse().ok().map(|kbps| (MediaKind::Audio, kbps));
        }
        if let Some(digits) = value.strip_suffix('p') {
            return digits
                .trim()
                .parse()
                .ok()
                .map(|height| (MediaKind::Video, height));
        }
        None
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One selectable entry of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityOption {
    pub display_format: String,
    pub quality_label: QualityLabel,
    pub size_label: String,
    pub kind: MediaKind,
    pub descriptor_id: DescriptorId,
    pub has_audio: bool,
    pub has_video: bool,
}

impl QualityOption {
    fn video(descriptor: &StreamDescriptor, height: u32) -> Self {
        Self {
            display_format: video_display_format(descriptor),
            quality_label: QualityLabel::for_height(height),
            size_label: size_label(descriptor.size_bytes),
            kind: MediaKind::Video,
            descriptor_id: descriptor.id.clone(),
            has_audio: descriptor.has_audio,
            has_video: descriptor.has_video,
        }
    }

    fn audio(descriptor: &StreamDescriptor) -> Self {
        Self {
            display_format: AUDIO_TARGET_CODEC.to_ascii_uppercase(),
            quality_label: QualityLabel::for_bitrate(descriptor.bitrate_kbps.unwrap_or(0)),
            size_label: size_label(descriptor.size_bytes),
            kind: MediaKind::Audio,
            descriptor_id: descriptor.id.clone(),
            has_audio: descriptor.has_audio,
            has_video: descriptor.has_video,
        }
    }

    /// Placeholder used when the source lists no rankable video stream.
    pub fn best_available() -> Self {
        Self {
            display_format: STANDARD_VIDEO_CONTAINER.to_ascii_uppercase(),
            quality_label: QualityLabel::new("Best"),
            size_label: UNKNOWN_SIZE.to_string(),
            kind: MediaKind::Video,
            descriptor_id: DescriptorId::new(BEST_AVAILABLE_ID),
            has_audio: true,
            has_video: true,
        }
    }
}

/// Ordered, immutable list of quality options: video first, then audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    options: Vec<QualityOption>,
}

impl Catalog {
    pub fn build(descriptors: &[StreamDescriptor]) -> Self {
        let mut options = rank_video_options(descriptors);
        if options.is_empty() {
            options.push(QualityOption::best_available());
        }
        options.extend(select_audio_options(descriptors));
        Self { options }
    }

    pub fn options(&self) -> &[QualityOption] {
        &self.options
    }

    pub fn video(&self) -> impl Iterator<Item = &QualityOption> {
        self.options
            .iter()
            .filter(|option| option.kind == MediaKind::Video)
    }

    pub fn audio(&self) -> impl Iterator<Item = &QualityOption> {
        self.options
            .iter()
            .filter(|option| option.kind == MediaKind::Audio)
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// One option per distinct height, tallest first.
///
/// Within a height the first stream in the standard container wins; without
/// one, the first stream encountered wins.
pub fn rank_video_options(descriptors: &[StreamDescriptor]) -> Vec<QualityOption> {
    let mut buckets: Vec<(u32, Vec<&StreamDescriptor>)> = Vec::new();
    let mut index: HashMap<u32, usize> = HashMap::new();

    for descriptor in descriptors.iter().filter(|d| d.has_video) {
        let Some(height) = descriptor.height else {
            continue;
        };
        let slot = *index.entry(height).or_insert_with(|| {
            buckets.push((height, Vec::new()));
            buckets.len() - 1
        });
        buckets[slot].1.push(descriptor);
    }

    let mut ranked: Vec<(u32, QualityOption)> = buckets
        .into_iter()
        .filter_map(|(height, group)| {
            let winner = group
                .iter()
                .find(|descriptor| descriptor.container == STANDARD_VIDEO_CONTAINER)
                .or_else(|| group.first())?;
            Some((height, QualityOption::video(winner, height)))
        })
        .collect();

    ranked.sort_by_key(|(height, _)| Reverse(*height));
    ranked.into_iter().map(|(_, option)| option).collect()
}

/// The highest-bitrate audio-only streams, at most [`MAX_AUDIO_OPTIONS`].
/// Missing bitrates rank last; equal bitrates keep input order.
pub fn select_audio_options(descriptors: &[StreamDescriptor]) -> Vec<QualityOption> {
    let mut audio: Vec<&StreamDescriptor> = descriptors
        .iter()
        .filter(|descriptor| descriptor.is_audio_only())
        .collect();
    audio.sort_by_key(|descriptor| Reverse(descriptor.bitrate_kbps.unwrap_or(0)));
    audio
        .into_iter()
        .take(MAX_AUDIO_OPTIONS)
        .map(QualityOption::audio)
        .collect()
}

/// Human-readable size with one decimal, or `Unknown`.
pub fn size_label(bytes: Option<u64>) -> String {
    match bytes.filter(|bytes| *bytes > 0) {
        Some(bytes) => format!("{:.1} MB", bytes as f64 / BYTES_PER_MB),
        None => UNKNOWN_SIZE.to_string(),
    }
}

fn video_display_format(descriptor: &StreamDescriptor) -> String {
    if descriptor.is_av1() {
        "AV1".to_string()
    } else if descriptor.is_vp9() {
        "VP9".to_string()
    } else if descriptor.is_hevc() {
        "HEVC".to_string()
    } else {
        descriptor.container.to_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::fixtures::{audio, muxed, video};
    use crate::descriptor::{RawDescriptor, normalize_all};
    use proptest::prelude::*;

    fn labels<'a>(options: impl Iterator<Item = &'a QualityOption>) -> Vec<String> {
        options
            .map(|option| option.quality_label.to_string())
            .collect()
    }

    #[test]
    fn duplicate_heights_collapse_and_prefer_standard_container() {
        let descriptors = normalize_all(&[
            video("248", "webm", 1080, "avc1.640028"),
            video("137", "mp4", 1080, "avc1.640028"),
            video("136", "mp4", 720, "avc1.4d401f"),
        ]);
        let catalog = Catalog::build(&descriptors);

        assert_eq!(labels(catalog.video()), ["1080p", "720p"]);
        let top = &catalog.options()[0];
        assert_eq!(top.descriptor_id.as_str(), "137");
        assert_eq!(top.display_format, "MP4");
        assert_eq!(top.kind, MediaKind::Video);
    }

    #[test]
    fn first_encountered_wins_without_standard_container() {
        let descriptors = normalize_all(&[
            video("a", "webm", 480, "avc1"),
            video("b", "mkv", 480, "avc1"),
        ]);
        let options = rank_video_options(&descriptors);
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].descriptor_id.as_str(), "a");
        assert_eq!(options[0].display_format, "WEBM");
    }

    #[test]
    fn high_efficiency_codecs_override_display_format() {
        let descriptors = normalize_all(&[
            video("399", "mp4", 1080, "av01.0.08M.08"),
            video("247", "webm", 720, "vp9"),
            video("135", "mp4", 480, "avc1.4d401e"),
        ]);
        let formats: Vec<_> = rank_video_options(&descriptors)
            .into_iter()
            .map(|option| option.display_format)
            .collect();
        assert_eq!(formats, ["AV1", "VP9", "MP4"]);
    }

    #[test]
    fn video_options_sorted_descending() {
        let descriptors = normalize_all(&[
            video("a", "mp4", 360, "avc1"),
            muxed("b", "mp4", 1440),
            video("c", "mp4", 720, "avc1"),
        ]);
        let options = rank_video_options(&descriptors);
        assert_eq!(labels(options.iter()), ["1440p", "720p", "360p"]);
        assert!(options[0].has_audio);
    }

    #[test]
    fn ranker_on_empty_input_is_empty() {
        assert!(rank_video_options(&[]).is_empty());
    }

    #[test]
    fn catalog_without_video_offers_best_placeholder() {
        let descriptors = normalize_all(&[audio("140", "m4a", 128.0)]);
        let catalog = Catalog::build(&descriptors);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.options()[0], QualityOption::best_available());
        assert_eq!(catalog.options()[1].kind, MediaKind::Audio);
    }

    #[test]
    fn audio_section_keeps_top_three_bitrates() {
        let descriptors = normalize_all(&[
            audio("a64", "webm", 64.0),
            audio("a128", "m4a", 128.0),
            audio("a160", "webm", 160.0),
            audio("a192", "m4a", 192.0),
            audio("a320", "webm", 320.0),
        ]);
        let catalog = Catalog::build(&descriptors);
        assert_eq!(labels(catalog.audio()), ["320kbps", "192kbps", "160kbps"]);
        assert!(catalog.audio().all(|option| option.display_format == "MP3"));
    }

    #[test]
    fn audio_without_bitrate_ranks_last() {
        let descriptors = normalize_all(&[
            audio("unknown", "m4a", 0.0),
            audio("a48", "webm", 48.0),
        ]);
        let options = select_audio_options(&descriptors);
        assert_eq!(options[0].descriptor_id.as_str(), "a48");
        assert_eq!(options[1].quality_label.as_str(), "0kbps");
    }

    #[test]
    fn video_precedes_audio_in_catalog() {
        let descriptors = normalize_all(&[
            audio("140", "m4a", 128.0),
            video("136", "mp4", 720, "avc1"),
        ]);
        let kinds: Vec<_> = Catalog::build(&descriptors)
            .options()
            .iter()
            .map(|option| option.kind)
            .collect();
        assert_eq!(kinds, [MediaKind::Video, MediaKind::Audio]);
    }

    #[test]
    fn size_labels() {
        assert_eq!(size_label(Some(108_000_000)), "103.0 MB");
        assert_eq!(size_label(Some(1_572_864)), "1.5 MB");
        assert_eq!(size_label(Some(0)), "Unknown");
        assert_eq!(size_label(None), "Unknown");
    }

    #[test]
    fn quality_label_parsing() {
        assert_eq!(
            QualityLabel::new("720p").parse(),
            Some((MediaKind::Video, 720))
        );
        assert_eq!(
            QualityLabel::new("128kbps").parse(),
            Some((MediaKind::Audio, 128))
        );
        assert_eq!(QualityLabel::new("137").parse(), None);
        assert_eq!(QualityLabel::new("Best").parse(), None);
    }

    #[test]
    fn option_serializes_camel_case() {
        let descriptors = normalize_all(&[video("136", "mp4", 720, "avc1")]);
        let value = serde_json::to_value(&rank_video_options(&descriptors)[0]).unwrap();
        assert_eq!(value["qualityLabel"], "720p");
        assert_eq!(value["descriptorId"], "136");
        assert_eq!(value["kind"], "video");
        assert_eq!(value["hasAudio"], false);
    }

    fn arbitrary_raw() -> impl Strategy<Value = RawDescriptor> {
        (
            0u32..6,
            prop::option::of(prop::sample::select(vec![144u32, 360, 720, 1080])),
            prop::option::of(0.0f64..400.0),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(n, height, abr, has_video, has_audio)| RawDescriptor {
                format_id: Some(format!("f{n}")),
                ext: Some(if n % 2 == 0 { "mp4" } else { "webm" }.to_string()),
                height,
                abr,
                vcodec: Some(if has_video { "avc1" } else { "none" }.to_string()),
                acodec: Some(if has_audio { "opus" } else { "none" }.to_string()),
                ..RawDescriptor::default()
            })
    }

    proptest! {
        #[test]
        fn video_labels_are_unique(raw in prop::collection::vec(arbitrary_raw(), 0..30)) {
            let catalog = Catalog::build(&normalize_all(&raw));
            let mut seen = std::collections::HashSet::new();
            for option in catalog.video() {
                prop_assert!(seen.insert(option.quality_label.clone()));
            }
        }

        #[test]
        fn audio_section_is_bounded_and_descending(raw in prop::collection::vec(arbitrary_raw(), 0..30)) {
            let options = select_audio_options(&normalize_all(&raw));
            prop_assert!(options.len() <= MAX_AUDIO_OPTIONS);
            let bitrates: Vec<u32> = options
                .iter()
                .filter_map(|option| option.quality_label.parse().map(|(_, kbps)| kbps))
                .collect();
            prop_assert!(bitrates.windows(2).all(|pair| pair[0] >= pair[1]));
        }
    }
}
