#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_FFMPEG_LOCATION: &str = "/usr/bin/ffmpeg";
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u32 = 30;

/// Settings handed through to the extractor on every call. Immutable once
/// loaded; the engine never consults process-wide state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    pub ytdlp_bin: PathBuf,
    pub ffmpeg_location: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub headers: Vec<(String, String)>,
    pub rate_limit: Option<String>,
    pub retries: u32,
    pub socket_timeout_secs: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ytdlp_bin: PathBuf::from(DEFAULT_YTDLP_BIN),
            ffmpeg_location: None,
            cookies_file: None,
            user_agent: None,
            headers: Vec::new(),
            rate_limit: None,
            retries: DEFAULT_RETRIES,
            socket_timeout_secs: DEFAULT_SOCKET_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    pub www_root: Option<PathBuf>,
    pub download_root: PathBuf,
    pub extractor: ExtractorConfig,
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    resolve_runtime_config(RuntimeOverrides::default())
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub www_root: Option<PathBuf>,
    pub download_root: Option<PathBuf>,
    pub ytdlp_bin: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeConfig> {
    build_runtime_config_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("TUBEGRAB_HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| {
            lookup("TUBEGRAB_PORT")
                .or_else(|| lookup("PORT"))
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let www_root = overrides
        .www_root
        .or_else(|| lookup("TUBEGRAB_WWW_ROOT").map(PathBuf::from));
    let download_root = overrides
        .download_root
        .or_else(|| lookup("DOWNLOAD_ROOT").map(PathBuf::from))
        .unwrap_or_else(env::temp_dir);

    let ytdlp_bin = overrides
        .ytdlp_bin
        .or_else(|| lookup("YTDLP_BIN").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));
    let ffmpeg_location = lookup("FFMPEG_LOCATION").map(PathBuf::from).or_else(|| {
        let default = PathBuf::from(DEFAULT_FFMPEG_LOCATION);
        default.exists().then_some(default)
    });
    let cookies_file = overrides
        .cookies_file
        .or_else(|| lookup("COOKIES_FILE").map(PathBuf::from));
    let headers = match lookup("EXTRA_HEADERS") {
        Some(raw) => parse_headers(&raw)?,
        None => Vec::new(),
    };
    let retries = lookup("RETRIES")
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(DEFAULT_RETRIES);
    let socket_timeout_secs = lookup("SOCKET_TIMEOUT")
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_SOCKET_TIMEOUT_SECS);

    Ok(RuntimeConfig {
        host,
        port,
        www_root,
        download_root,
        extractor: ExtractorConfig {
            ytdlp_bin,
            ffmpeg_location,
            cookies_file,
            user_agent: lookup("USER_AGENT"),
            headers,
            rate_limit: lookup("RATE_LIMIT"),
            retries,
            socket_timeout_secs,
        },
    })
}

/// Parses `Name: value; Other: value` into header pairs.
fn parse_headers(raw: &str) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for entry in raw.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((name, value)) = entry.split_once(':') else {
            bail!("EXTRA_HEADERS entry `{entry}` must look like `Name: value`");
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("EXTRA_HEADERS entry `{entry}` has an empty header name");
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
