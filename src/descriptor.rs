//! Canonical stream descriptors.
//!
//! The extractor reports every encoded stream it found as a loosely typed JSON
//! object. Everything downstream (catalog, resolver, download spec) works on
//! [`StreamDescriptor`] instead, so the schema quirks are handled exactly once.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder yt-dlp uses for a missing codec.
const NO_CODEC: &str = "none";

/// Opaque identifier the extractor assigned to one stream (e.g. `137`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorId(String);

impl DescriptorId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether an option (and the download it produces) is video or audio-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }
}

/// One entry of yt-dlp's `formats` array. Only the fields the engine reads are
/// declared; all of them are optional because extractors omit freely.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawDescriptor {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub tbr: Option<f64>,
    pub abr: Option<f64>,
    pub vbr: Option<f64>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
}

/// Normalized, request-scoped view of one available stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub id: DescriptorId,
    pub container: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    pub size_bytes: Option<u64>,
    pub has_audio: bool,
    pub has_video: bool,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

impl StreamDescriptor {
    /// Audio-only streams are the ones the audio selector and the audio
    /// fallback consider.
    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    pub fn is_av1(&self) -> bool {
        self.video_codec_starts_with(&["av01", "av1"])
    }

    pub fn is_vp9(&self) -> bool {
        self.video_codec_starts_with(&["vp09", "vp9"])
    }

    pub fn is_hevc(&self) -> bool {
        self.video_codec_starts_with(&["hev1", "hvc1", "hevc", "h265"])
    }

    fn video_codec_starts_with(&self, prefixes: &[&str]) -> bool {
        self.video_codec.as_deref().is_some_and(|codec| {
            let codec = codec.to_ascii_lowercase();
            prefixes.iter().any(|prefix| codec.starts_with(prefix))
        })
    }
}

/// Maps one raw descriptor into its canonical form.
///
/// Returns `None` when the descriptor has no id or container, carries neither a
/// height nor a bitrate, or has no usable audio or video track (storyboards).
pub fn normalize(raw: &RawDescriptor) -> Option<StreamDescriptor> {
    let id = non_empty(raw.format_id.as_deref())?;
    let container = non_empty(raw.ext.as_deref())?.to_ascii_lowercase();

    let video_codec = codec(raw.vcodec.as_deref());
    let audio_codec = codec(raw.acodec.as_deref());

    let has_video = match raw.vcodec.as_deref() {
        Some(_) => video_codec.is_some(),
        None => raw.height.is_some(),
    };
    let has_audio = match raw.acodec.as_deref() {
        Some(_) => audio_codec.is_some(),
        None => !has_video && raw.abr.is_some(),
    };
    if !has_video && !has_audio {
        return None;
    }

    let bitrate = if has_video {
        raw.tbr.or(raw.vbr).or(raw.abr)
    } else {
        raw.abr.or(raw.tbr)
    };
    let bitrate_kbps = bitrate
        .filter(|value| value.is_finite() && *value >= 0.0)
        .map(|value| value.round() as u32);

    let height = raw.height.filter(|value| *value > 0);
    if height.is_none() && bitrate_kbps.is_none() {
        return None;
    }

    Some(StreamDescriptor {
        id: DescriptorId::new(id),
        container,
        height,
        width: raw.width,
        bitrate_kbps,
        size_bytes: raw.filesize.or(raw.filesize_approx),
        has_audio,
        has_video,
        video_codec,
        audio_codec,
    })
}

/// Normalizes a whole list, dropping unusable entries and keeping input order.
pub fn normalize_all(raw: &[RawDescriptor]) -> Vec<StreamDescriptor> {
    raw.iter().filter_map(normalize).collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn codec(value: Option<&str>) -> Option<String> {
    non_empty(value)
        .filter(|value| !value.eq_ignore_ascii_case(NO_CODEC))
        .map(str::to_owned)
}


#[cfg(test)]
mod tests {
    use super::fixtures::{audio, muxed, video};
    use super::*;

    #[test]
    fn normalize_video_only_stream() {
        let descriptor = normalize(&video("137", "MP4", 1080, "avc1.640028")).unwrap();
        assert_eq!(descriptor.id.as_str(), "137");
        assert_eq!(descriptor.container, "mp4");
        assert_eq!(descriptor.height, Some(1080));
        assert!(descriptor.has_video);
        assert!(!descriptor.has_audio);
        assert_eq!(descriptor.audio_codec, None);
        assert_eq!(descriptor.size_bytes, Some(108_000_000));
    }

    #[test]
    fn normalize_muxed_stream_has_both_tracks() {
        let descriptor = normalize(&muxed("18", "mp4", 360)).unwrap();
        assert!(descriptor.has_video);
        assert!(descriptor.has_audio);
        assert!(!descriptor.is_audio_only());
    }

    #[test]
    fn normalize_audio_prefers_abr_and_approx_size() {
        let raw = RawDescriptor {
            tbr: Some(999.0),
            ..audio("251", "webm", 139.6)
        };
        let descriptor = normalize(&raw).unwrap();
        assert!(descriptor.is_audio_only());
        assert_eq!(descriptor.bitrate_kbps, Some(140));
        assert_eq!(descriptor.size_bytes, Some(2_000_000));
    }

    #[test]
    fn normalize_rejects_missing_required_fields() {
        let no_ext = RawDescriptor {
            ext: None,
            ..video("137", "mp4", 1080, "avc1")
        };
        assert!(normalize(&no_ext).is_none());

        let no_id = RawDescriptor {
            format_id: Some("  ".into()),
            ..video("137", "mp4", 1080, "avc1")
        };
        assert!(normalize(&no_id).is_none());

        let no_height_or_bitrate = RawDescriptor {
            abr: None,
            ..audio("140", "m4a", 128.0)
        };
        assert!(normalize(&no_height_or_bitrate).is_none());
    }

    #[test]
    fn normalize_drops_storyboards() {
        let storyboard = RawDescriptor {
            format_id: Some("sb0".into()),
            ext: Some("mhtml".into()),
            height: Some(180),
            vcodec: Some("none".into()),
            acodec: Some("none".into()),
            ..RawDescriptor::default()
        };
        assert!(normalize(&storyboard).is_none());
    }

    #[test]
    fn normalize_infers_tracks_without_codec_fields() {
        let bare_video = RawDescriptor {
            format_id: Some("hls-720".into()),
            ext: Some("mp4".into()),
            height: Some(720),
            ..RawDescriptor::default()
        };
        let descriptor = normalize(&bare_video).unwrap();
        assert!(descriptor.has_video);
        assert!(!descriptor.has_audio);

        let bare_audio = RawDescriptor {
            format_id: Some("hls-audio".into()),
            ext: Some("m4a".into()),
            abr: Some(96.0),
            ..RawDescriptor::default()
        };
        assert!(normalize(&bare_audio).unwrap().is_audio_only());
    }

    #[test]
    fn codec_signatures() {
        let av1 = normalize(&video("399", "mp4", 1080, "av01.0.08M.08")).unwrap();
        let vp9 = normalize(&video("248", "webm", 1080, "vp9")).unwrap();
        let hevc = normalize(&video("x", "mp4", 1080, "hvc1.1.6.L120")).unwrap();
        assert!(av1.is_av1() && !av1.is_vp9());
        assert!(vp9.is_vp9());
        assert!(hevc.is_hevc());
    }

    #[test]
    fn normalize_all_keeps_order() {
        let raw = vec![
            video("a", "mp4", 720, "avc1"),
            RawDescriptor::default(),
            audio("b", "m4a", 128.0),
        ];
        let ids: Vec<_> = normalize_all(&raw)
            .into_iter()
            .map(|descriptor| descriptor.id.to_string())
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn media_kind_parse_is_case_insensitive() {
        assert_eq!(MediaKind::parse(" Audio "), Some(MediaKind::Audio));
        assert_eq!(MediaKind::parse("video"), Some(MediaKind::Video));
        assert_eq!(MediaKind::parse("short"), None);
    }
}
