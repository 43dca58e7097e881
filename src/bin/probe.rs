#![forbid(unsafe_code)]

//! Prints what the service would offer for a URL, or what it would run for
//! one chosen quality, without downloading anything.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use tubegrab_tools::catalog::QualityLabel;
use tubegrab_tools::config::{RuntimeOverrides, resolve_runtime_config};
use tubegrab_tools::descriptor::{DescriptorId, MediaKind};
use tubegrab_tools::engine::{DownloadPlan, Engine};
use tubegrab_tools::extractor::{YtDlp, common_args};
use tubegrab_tools::resolver::QualityRequest;
use tubegrab_tools::security::ensure_not_root;

#[derive(Debug, Parser)]
#[command(name = "probe", version, about = "Inspect the quality catalog of a video URL")]
struct ProbeArgs {
    /// Source video URL.
    url: String,
    /// Quality label (`720p`, `128kbps`) or descriptor id to resolve.
    #[arg(short, long)]
    quality: Option<String>,
    /// Media kind of `--quality`; inferred from the label shape when omitted.
    #[arg(short, long, requires = "quality")]
    kind: Option<String>,
    /// Path to the yt-dlp binary.
    #[arg(long)]
    ytdlp_bin: Option<PathBuf>,
    /// Netscape cookie file handed to yt-dlp.
    #[arg(long)]
    cookies: Option<PathBuf>,
    /// Alternative `.env` file.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl ProbeArgs {
    fn quality_request(&self) -> Result<Option<QualityRequest>> {
        let Some(quality) = self.quality.as_deref() else {
            return Ok(None);
        };
        let Some(kind) = self.kind.as_deref() else {
            return Ok(Some(QualityRequest::infer(quality)));
        };
        let kind =
            MediaKind::parse(kind).ok_or_else(|| anyhow!("--kind must be `video` or `audio`"))?;
        // A tagged value may be either; the resolver tries it as an id first.
        let label = QualityLabel::new(quality);
        let label = label.parse().is_some_and(|(parsed, _)| parsed == kind).then_some(label);
        Ok(Some(QualityRequest::new(
            kind,
            Some(DescriptorId::new(quality)),
            label,
        )))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanReport {
    descriptor_id: String,
    kind: MediaKind,
    height: Option<u32>,
    fell_back: bool,
    format_expression: String,
    extractor_args: Vec<String>,
}

impl PlanReport {
    fn new(plan: &DownloadPlan, engine: &Engine) -> Self {
        let mut extractor_args = common_args(engine.config());
        extractor_args.extend(plan.spec.extractor_args());
        Self {
            descriptor_id: plan.resolution.descriptor_id.to_string(),
            kind: plan.resolution.kind,
            height: plan.resolution.height,
            fell_back: plan.resolution.fell_back,
            format_expression: plan.spec.format_expression.clone(),
            extractor_args,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args = ProbeArgs::parse();
    ensure_not_root("tubegrab probe")?;

    let runtime = resolve_runtime_config(RuntimeOverrides {
        ytdlp_bin: args.ytdlp_bin.clone(),
        cookies_file: args.cookies.clone(),
        env_path: args.env_file.clone(),
        ..RuntimeOverrides::default()
    })?;
    let engine = Engine::new(Arc::new(YtDlp), runtime.extractor);

    let rendered = match args.quality_request()? {
        None => {
            let response = engine
                .list_qualities(&args.url)
                .await
                .map_err(|err| anyhow!("{} ({})", err.message, err.raw))?;
            serde_json::to_string_pretty(&response)
        }
        Some(request) => {
            let plan = engine
                .plan_download(&args.url, &request, &runtime.download_root)
                .await
                .map_err(|err| anyhow!("{} ({})", err.message, err.raw))?;
            serde_json::to_string_pretty(&PlanReport::new(&plan, &engine))
        }
    }
    .context("rendering JSON output")?;

    println!("{rendered}");
    Ok(())
}
