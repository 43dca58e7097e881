//! Boundary to the external media-information and download tool.
//!
//! Everything behind [`MediaSource`] may block on the network. The yt-dlp
//! implementation runs the tool as a child process that is killed when the
//! calling future is dropped, and classifies whatever it prints on failure.

use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ExtractorConfig;
use crate::descriptor::RawDescriptor;
use crate::download_spec::DownloadSpec;
use crate::errors::{ClassifiedError, ErrorKind, classify};

/// Raw metadata for one source URL, as reported by the extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    /// Seconds; the extractor reports fractional values for some sites.
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawDescriptor>,
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Fetches metadata and the full raw descriptor list for `url`.
    async fn fetch_info(
        &self,
        url: &str,
        config: &ExtractorConfig,
    ) -> Result<SourceInfo, ClassifiedError>;

    /// Runs the download described by `spec` and returns the path of the
    /// single file it produced.
    async fn download(
        &self,
        url: &str,
        spec: &DownloadSpec,
        config: &ExtractorConfig,
    ) -> Result<PathBuf, ClassifiedError>;
}

/// The yt-dlp command-line tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct YtDlp;

#[async_trait]
impl MediaSource for YtDlp {
    async fn fetch_info(
        &self,
        url: &str,
        config: &ExtractorConfig,
    ) -> Result<SourceInfo, ClassifiedError> {
        let mut command = Command::new(&config.ytdlp_bin);
        command
            .args(common_args(config))
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--")
            .arg(url);

        let stdout = run_extractor(command).await?;
        let info: SourceInfo =
            serde_json::from_slice(&stdout).context("parsing yt-dlp metadata response")?;
        debug!(url, formats = info.formats.len(), "fetched source info");
        Ok(info)
    }

    async fn download(
        &self,
        url: &str,
        spec: &DownloadSpec,
        config: &ExtractorConfig,
    ) -> Result<PathBuf, ClassifiedError> {
        let spec_args = spec.extractor_args();
        debug!(url, args = ?spec_args, "starting yt-dlp download");

        let mut command = Command::new(&config.ytdlp_bin);
        command
            .args(common_args(config))
            .args(spec_args)
            .arg("--")
            .arg(url);
        run_extractor(command).await?;

        locate_output(&spec.output_template, spec.output_extension()).await
    }
}

/// Flags shared by every yt-dlp invocation, derived from `config`.
pub fn common_args(config: &ExtractorConfig) -> Vec<String> {
    let mut args = vec![
        "--no-warnings".to_string(),
        "--no-progress".to_string(),
        "--no-playlist".to_string(),
        "--retries".to_string(),
        config.retries.to_string(),
        "--socket-timeout".to_string(),
        config.socket_timeout_secs.to_string(),
    ];
    if let Some(cookies) = &config.cookies_file
        && cookies.exists()
    {
        args.push("--cookies".to_string());
        args.push(cookies.to_string_lossy().into_owned());
    }
    if let Some(user_agent) = &config.user_agent {
        args.push("--user-agent".to_string());
        args.push(user_agent.clone());
    }
    for (name, value) in &config.headers {
        args.push("--add-header".to_string());
        args.push(format!("{name}:{value}"));
    }
    if let Some(rate) = &config.rate_limit {
        args.push("--limit-rate".to_string());
        args.push(rate.clone());
    }
    if let Some(ffmpeg) = &config.ffmpeg_location {
        args.push("--ffmpeg-location".to_string());
        args.push(ffmpeg.to_string_lossy().into_owned());
    }
    args
}

// A cancelled request drops this future; `kill_on_drop` takes the child down
// with it so nothing keeps writing into a scratch directory already removed.
async fn run_extractor(mut command: Command) -> Result<Vec<u8>, ClassifiedError> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    let output = command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("launching {program}"))?;

    if !output.status.success() {
        let text = failure_text(&output.stderr, output.status);
        let classified = classify(&text);
        warn!(
            program = %program,
            status = %output.status,
            kind = classified.kind.code(),
            raw = %classified.raw,
            "extractor failed"
        );
        return Err(classified);
    }
    Ok(output.stdout)
}

// yt-dlp prefixes fatal lines with `ERROR:`; everything else on stderr is
// noise unless nothing was flagged.
fn failure_text(stderr: &[u8], status: ExitStatus) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let errors: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("ERROR"))
        .collect();
    if !errors.is_empty() {
        return errors.join("\n");
    }
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        format!("extractor exited with {status}")
    } else {
        trimmed.to_string()
    }
}

fn is_partial(name: &str) -> bool {
    name.ends_with(".part")
        || name.ends_with(".ytdl")
        || name.ends_with(".temp")
        || name.contains(".part-Frag")
}

/// Finds the file the downloader left for `template`, preferring the
/// expected extension over leftovers such as an unmerged stream.
async fn locate_output(template: &Path, extension: &str) -> Result<PathBuf, ClassifiedError> {
    let dir = template
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = template
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.split("%(").next())
        .unwrap_or_default()
        .to_string();

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("listing {}", dir.display()))?;
    let mut fallback = None;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("listing {}", dir.display()))?
    {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !name.starts_with(&prefix) || is_partial(name) {
            continue;
        }
        let is_file = entry
            .file_type()
            .await
            .map(|kind| kind.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) == Some(extension) {
            return Ok(path);
        }
        fallback.get_or_insert(path);
    }

    fallback.ok_or_else(|| {
        ClassifiedError::new(
            ErrorKind::Unknown,
            format!("download finished but left no file in {}", dir.display()),
        )
    })
}
