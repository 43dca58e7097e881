//! Turns a resolved stream into the instructions handed to the downloader.

use std::path::{Path, PathBuf};

use crate::descriptor::{DescriptorId, MediaKind};
use crate::resolver::Resolution;

/// Codec every audio download is transcoded to.
pub const AUDIO_TARGET_CODEC: &str = "mp3";
pub const AUDIO_TARGET_BITRATE_KBPS: u32 = 192;
/// Container preferred for the audio stream fetched before transcoding.
pub const AUDIO_INTERMEDIATE_EXT: &str = "m4a";
/// Container every video download ends up in.
pub const VIDEO_TARGET_CONTAINER: &str = "mp4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcess {
    /// Drop the video track and re-encode the audio.
    ExtractAudio { codec: &'static str, bitrate_kbps: u32 },
    /// Merge or repackage video and audio into one container.
    Remux { container: &'static str },
}

/// Everything the downloader needs for one request. Built once, consumed
/// once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSpec {
    pub descriptor_id: DescriptorId,
    pub kind: MediaKind,
    pub format_expression: String,
    pub post_processing: Vec<PostProcess>,
    pub output_template: PathBuf,
}

impl DownloadSpec {
    /// Builds the spec for `resolution`, writing to `output_template`
    /// (which may contain the downloader's `%(ext)s` placeholder).
    pub fn build(resolution: &Resolution, output_template: &Path) -> Self {
        let (format_expression, post_processing) = match resolution.kind {
            MediaKind::Audio => (
                format!("bestaudio[ext={AUDIO_INTERMEDIATE_EXT}]/bestaudio"),
                vec![PostProcess::ExtractAudio {
                    codec: AUDIO_TARGET_CODEC,
                    bitrate_kbps: AUDIO_TARGET_BITRATE_KBPS,
                }],
            ),
            MediaKind::Video => (
                video_expression(&resolution.descriptor_id, resolution.height),
                vec![PostProcess::Remux {
                    container: VIDEO_TARGET_CONTAINER,
                }],
            ),
        };

        Self {
            descriptor_id: resolution.descriptor_id.clone(),
            kind: resolution.kind,
            format_expression,
            post_processing,
            output_template: output_template.to_path_buf(),
        }
    }

    /// Extension of the file the downloader leaves behind.
    pub fn output_extension(&self) -> &'static str {
        match self.kind {
            MediaKind::Audio => AUDIO_TARGET_CODEC,
            MediaKind::Video => VIDEO_TARGET_CONTAINER,
        }
    }

    /// Renders the spec as yt-dlp arguments (without the URL).
    pub fn extractor_args(&self) -> Vec<String> {
        let mut args = vec![
            "--format".to_string(),
            self.format_expression.clone(),
            "--output".to_string(),
            self.output_template.to_string_lossy().into_owned(),
        ];
        for step in &self.post_processing {
            match step {
                PostProcess::ExtractAudio {
                    codec,
                    bitrate_kbps,
                } => {
                    args.push("--extract-audio".to_string());
                    args.push("--audio-format".to_string());
                    args.push((*codec).to_string());
                    args.push("--audio-quality".to_string());
                    args.push(format!("{bitrate_kbps}K"));
                }
                PostProcess::Remux { container } => {
                    args.push("--merge-output-format".to_string());
                    args.push((*container).to_string());
                    args.push("--remux-video".to_string());
                    args.push((*container).to_string());
                }
            }
        }
        args
    }
}

// Best video under the resolved height merged with the best audio, then the
// best single file under the cap, then anything.
fn video_expression(descriptor_id: &DescriptorId, height: Option<u32>) -> String {
    match height {
        Some(height) => format!(
            "bestvideo[height<={height}]+bestaudio[ext={AUDIO_INTERMEDIATE_EXT}]\
             /bestvideo[height<={height}]+bestaudio\
             /best[height<={height}]\
             /best"
        ),
        None => format!("{descriptor_id}+bestaudio/{descriptor_id}/best"),
    }
}
