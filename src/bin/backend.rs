#![forbid(unsafe_code)]

//! Axum service in front of the format catalog engine.
//!
//! `/api/info` lists the qualities of a URL; `/api/download` resolves one of
//! them against a fresh descriptor list, downloads it into a private scratch
//! directory and streams it back. The scratch directory lives inside the
//! response body, so it disappears once the body is sent or dropped.

use std::{
    io,
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use mime_guess::MimeGuess;
use serde::Deserialize;
use tempfile::TempDir;
use tokio::{
    fs::File,
    io::{AsyncRead, ReadBuf},
    signal,
};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use tubegrab_tools::catalog::QualityLabel;
use tubegrab_tools::config::{RuntimeOverrides, resolve_runtime_config};
use tubegrab_tools::descriptor::{DescriptorId, MediaKind};
use tubegrab_tools::engine::{CatalogResponse, Engine};
use tubegrab_tools::errors::{ClassifiedError, ErrorKind};
use tubegrab_tools::extractor::YtDlp;
use tubegrab_tools::resolver::QualityRequest;
use tubegrab_tools::security::ensure_not_root;

const SCRATCH_PREFIX: &str = "tubegrab-";

#[derive(Debug, Parser)]
#[command(name = "backend", version, about = "Lists and serves video qualities over HTTP")]
struct BackendArgs {
    /// Address to listen on (overrides TUBEGRAB_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides TUBEGRAB_PORT / PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Directory of static files served for non-API paths.
    #[arg(long)]
    www_root: Option<PathBuf>,
    /// Parent directory for per-request scratch directories.
    #[arg(long)]
    download_root: Option<PathBuf>,
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

impl BackendArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host,
            port: self.port,
            www_root: self.www_root,
            download_root: self.download_root,
            ytdlp_bin: self.ytdlp_bin,
            cookies_file: self.cookies,
            env_path: self.env_file,
        }
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUBEGRAB_HOST")
}

#[derive(Clone)]
struct AppState {
    engine: Engine,
    www_root: Option<Arc<PathBuf>>,
    download_root: Arc<PathBuf>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    kind: Option<ErrorKind>,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: Some(ErrorKind::InvalidInput),
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: None,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: Some(ErrorKind::Unknown),
            message: message.into(),
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::AuthExpired => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::PrivateOrRestricted => StatusCode::FORBIDDEN,
        ErrorKind::ContentUnavailable => StatusCode::NOT_FOUND,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::FormatUnavailable => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ClassifiedError> for ApiError {
    fn from(err: ClassifiedError) -> Self {
        warn!(kind = err.kind.code(), raw = %err.raw, "request failed");
        Self {
            status: status_for(err.kind),
            kind: Some(err.kind),
            message: err.message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.kind {
            Some(kind) => serde_json::json!({ "error": self.message, "kind": kind.code() }),
            None => serde_json::json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = BackendArgs::parse();
    ensure_not_root("tubegrab backend")?;

    let runtime = resolve_runtime_config(args.into_overrides())?;
    let host = parse_host_arg(&runtime.host)?;

    tokio::fs::create_dir_all(&runtime.download_root)
        .await
        .with_context(|| format!("creating {}", runtime.download_root.display()))?;

    let state = AppState {
        engine: Engine::new(Arc::new(YtDlp), runtime.extractor),
        www_root: runtime.www_root.map(Arc::new),
        download_root: Arc::new(runtime.download_root),
    };

    let app = Router::new()
        .route("/api/info", post(video_info))
        .route("/api/download", get(download))
        .fallback(static_fallback)
        .with_state(state);

    let addr = SocketAddr::new(host, runtime.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("API server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still terminates.
    if let Err(err) = signal::ctrl_c().await {
        warn!("failed to install Ctrl+C handler: {err}");
    }
}

#[derive(Debug, Default, Deserialize)]
struct InfoRequest {
    url: Option<String>,
}

async fn video_info(
    State(state): State<AppState>,
    Json(payload): Json<InfoRequest>,
) -> ApiResult<Json<CatalogResponse>> {
    let url = non_blank(payload.url.as_deref())
        .ok_or_else(|| ApiError::bad_request("No URL provided"))?;
    info!(url, "listing qualities");
    let response = state.engine.list_qualities(url).await?;
    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadParams {
    url: Option<String>,
    descriptor_id: Option<String>,
    quality: Option<String>,
    kind: Option<String>,
    title: Option<String>,
    /// Untagged identifier sent by older clients.
    #[serde(rename = "format_id")]
    format_id: Option<String>,
}

/// Tagged requests carry `kind`; untagged ones are classified by label shape.
fn quality_request(params: &DownloadParams) -> ApiResult<QualityRequest> {
    let descriptor_id = non_blank(params.descriptor_id.as_deref());
    let quality = non_blank(params.quality.as_deref());

    if let Some(kind) = non_blank(params.kind.as_deref()) {
        let kind = MediaKind::parse(kind)
            .ok_or_else(|| ApiError::bad_request(format!("unknown media kind `{kind}`")))?;
        return Ok(QualityRequest::new(
            kind,
            descriptor_id.map(DescriptorId::new),
            quality.map(QualityLabel::new),
        ));
    }

    let identifier = non_blank(params.format_id.as_deref())
        .or(descriptor_id)
        .or(quality)
        .ok_or_else(|| ApiError::bad_request("No quality selected"))?;
    Ok(QualityRequest::infer(identifier))
}

async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> ApiResult<Response> {
    let url = non_blank(params.url.as_deref())
        .ok_or_else(|| ApiError::bad_request("No URL provided"))?;
    let request = quality_request(&params)?;

    let scratch = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(state.download_root.as_path())
        .map_err(|err| ApiError::internal(format!("creating scratch directory: {err}")))?;

    // Any early return below drops `scratch` and removes the directory.
    let prepared = state
        .engine
        .fetch_download(url, &request, scratch.path(), params.title.as_deref())
        .await?;

    let file = File::open(&prepared.path)
        .await
        .map_err(|err| ApiError::internal(format!("opening downloaded file: {err}")))?;
    let size = file
        .metadata()
        .await
        .map_err(|err| ApiError::internal(format!("reading downloaded file: {err}")))?
        .len();

    let stream = ReaderStream::new(ScratchFile {
        file,
        _scratch: scratch,
    });
    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(header::CONTENT_DISPOSITION, attachment(&prepared.file_name));
    if let Ok(value) = HeaderValue::from_str(
        MimeGuess::from_path(&prepared.file_name)
            .first_or_octet_stream()
            .as_ref(),
    ) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

/// A downloaded file that takes its scratch directory with it when dropped.
struct ScratchFile {
    file: File,
    _scratch: TempDir,
}

impl AsyncRead for ScratchFile {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_read(cx, buf)
    }
}

// `filename` carries an ASCII approximation, `filename*` the exact UTF-8 name.
fn attachment(file_name: &str) -> HeaderValue {
    let ascii: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    let mut encoded = String::with_capacity(file_name.len());
    for byte in file_name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }
    let Some(root) = state.www_root.as_deref() else {
        return ApiError::not_found("file not found").into_response();
    };

    match serve_www_path(root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => stream_file(root.join("index.html")).await,
        Ok(_) => stream_file(target).await,
        Err(_) if should_fallback_to_index(request_path) => {
            stream_file(root.join("index.html")).await
        }
        Err(_) => Err(ApiError::not_found("file not found")),
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

// Extensionless paths are client-side routes of the single-page frontend.
fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}
