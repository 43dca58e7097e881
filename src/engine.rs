//! The two request-scoped operations: list the qualities of a URL, and fetch
//! one of them as a file.
//!
//! Both start from a fresh extractor call; nothing from a previous listing is
//! reused when a download is requested.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tracing::info;

use crate::catalog::{Catalog, QualityLabel};
use crate::config::ExtractorConfig;
use crate::descriptor::{MediaKind, normalize_all};
use crate::download_spec::{AUDIO_TARGET_BITRATE_KBPS, DownloadSpec};
use crate::errors::ClassifiedError;
use crate::extractor::{MediaSource, SourceInfo};
use crate::resolver::{QualityRequest, Resolution, resolve};

const UNTITLED: &str = "Untitled";
const UNKNOWN_CHANNEL: &str = "Unknown";
const FALLBACK_FILE_STEM: &str = "video";
/// Stem of the file the extractor writes inside the per-request directory.
const DOWNLOAD_STEM: &str = "download";

/// Video metadata passed through from the extractor alongside the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoMetadata {
    pub title: String,
    pub channel: String,
    pub duration: String,
    pub thumbnail: Option<String>,
}

impl VideoMetadata {
    pub fn from_source(info: &SourceInfo) -> Self {
        Self {
            title: non_blank(info.title.as_deref())
                .unwrap_or(UNTITLED)
                .to_string(),
            channel: non_blank(info.uploader.as_deref())
                .or_else(|| non_blank(info.channel.as_deref()))
                .unwrap_or(UNKNOWN_CHANNEL)
                .to_string(),
            duration: format_duration(info.duration),
            thumbnail: info.thumbnail.clone(),
        }
    }
}

/// Body of a listing response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogResponse {
    #[serde(flatten)]
    pub metadata: VideoMetadata,
    pub qualities: Catalog,
}

/// A resolved request, ready to hand to the extractor.
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub info: SourceInfo,
    pub resolution: Resolution,
    pub spec: DownloadSpec,
}

/// A finished download sitting on disk.
#[derive(Debug, Clone)]
pub struct PreparedDownload {
    pub path: PathBuf,
    /// Name offered to the client, e.g. `My clip_720p.mp4`.
    pub file_name: String,
    pub resolution: Resolution,
}

#[derive(Clone)]
pub struct Engine {
    source: Arc<dyn MediaSource>,
    config: Arc<ExtractorConfig>,
}

impl Engine {
    pub fn new(source: Arc<dyn MediaSource>, config: ExtractorConfig) -> Self {
        Self {
            source,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub async fn list_qualities(&self, url: &str) -> Result<CatalogResponse, ClassifiedError> {
        let url = require_url(url)?;
        let info = self.source.fetch_info(url, &self.config).await?;
        let descriptors = normalize_all(&info.formats);
        let qualities = Catalog::build(&descriptors);
        info!(
            url,
            raw = info.formats.len(),
            usable = descriptors.len(),
            options = qualities.len(),
            "built catalog"
        );
        Ok(CatalogResponse {
            metadata: VideoMetadata::from_source(&info),
            qualities,
        })
    }

    /// Fetches the descriptor list again, resolves `request` against it and
    /// builds the spec that would write into `dest_dir`. Nothing is
    /// downloaded.
    pub async fn plan_download(
        &self,
        url: &str,
        request: &QualityRequest,
        dest_dir: &Path,
    ) -> Result<DownloadPlan, ClassifiedError> {
        let url = require_url(url)?;
        let info = self.source.fetch_info(url, &self.config).await?;
        let resolution = resolve(request, &info.formats)?;
        let template = dest_dir.join(format!("{DOWNLOAD_STEM}.%(ext)s"));
        let spec = DownloadSpec::build(&resolution, &template);
        Ok(DownloadPlan {
            info,
            resolution,
            spec,
        })
    }

    /// Resolves and downloads `request` into `dest_dir`. `title` overrides
    /// the source title when naming the file.
    pub async fn fetch_download(
        &self,
        url: &str,
        request: &QualityRequest,
        dest_dir: &Path,
        title: Option<&str>,
    ) -> Result<PreparedDownload, ClassifiedError> {
        let plan = self.plan_download(url, request, dest_dir).await?;
        let path = self
            .source
            .download(url.trim(), &plan.spec, &self.config)
            .await?;

        let title = non_blank(title).or(plan.info.title.as_deref()).unwrap_or_default();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_else(|| plan.spec.output_extension());
        let file_name = format!(
            "{}_{}.{}",
            sanitize_title(title),
            quality_tag(&plan.resolution),
            extension
        );
        info!(
            url = url.trim(),
            descriptor = %plan.resolution.descriptor_id,
            fell_back = plan.resolution.fell_back,
            file = %file_name,
            "download ready"
        );

        Ok(PreparedDownload {
            path,
            file_name,
            resolution: plan.resolution,
        })
    }
}

fn require_url(url: &str) -> Result<&str, ClassifiedError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ClassifiedError::invalid_input("No URL provided"));
    }
    Ok(url)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Renders seconds as `HH:MM:SS` from one hour up, `MM:SS` below.
pub fn format_duration(seconds: Option<f64>) -> String {
    let total = seconds
        .filter(|value| value.is_finite() && *value > 0.0)
        .map_or(0, |value| value as u64);
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

/// Keeps letters, digits and spaces; an empty result becomes `video`.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        FALLBACK_FILE_STEM.to_string()
    } else {
        cleaned.to_string()
    }
}

// Names the file after what was actually delivered: the encoder bitrate for
// audio, the resolved height for video, otherwise the descriptor id.
fn quality_tag(resolution: &Resolution) -> String {
    let tag = match (resolution.kind, resolution.height) {
        (MediaKind::Audio, _) => {
            QualityLabel::for_bitrate(AUDIO_TARGET_BITRATE_KBPS).to_string()
        }
        (MediaKind::Video, Some(height)) => QualityLabel::for_height(height).to_string(),
        (MediaKind::Video, None) => resolution.descriptor_id.to_string(),
    };
    tag.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | ' ' => '_',
            _ => c,
        })
        .collect()
}
