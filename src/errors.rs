//! Maps raw extractor/downloader failures onto a small user-facing taxonomy.
//!
//! Classification is substring based and runs the rule table top to bottom:
//! rate limiting, then credentials, then privacy, then unsupported input, then
//! a missing format, then unavailability. The first rule with a matching
//! marker wins.
//!
//! yt-dlp appends "Use --cookies-from-browser or --cookies for the
//! authentication" to every login-required error, so cookie and
//! authentication wording alone never counts as a credential failure.

use serde::Serialize;
use thiserror::Error;

/// User-facing failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    AuthExpired,
    PrivateOrRestricted,
    ContentUnavailable,
    InvalidInput,
    FormatUnavailable,
    Unknown,
}

impl ErrorKind {
    /// Stable machine-readable code used in API responses.
    pub fn code(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::AuthExpired => "auth_expired",
            Self::PrivateOrRestricted => "private_or_restricted",
            Self::ContentUnavailable => "content_unavailable",
            Self::InvalidInput => "invalid_input",
            Self::FormatUnavailable => "format_unavailable",
            Self::Unknown => "unknown",
        }
    }

    /// Message shown to the caller. `Unknown` has none of its own; the raw
    /// text is surfaced instead.
    pub fn user_message(self) -> Option<&'static str> {
        match self {
            Self::RateLimited => {
                Some("The video site is rate limiting requests. Please try again in a few minutes.")
            }
            Self::AuthExpired => Some(
                "The server's video site credentials have expired or were rejected. Please try again later.",
            ),
            Self::PrivateOrRestricted => {
                Some("This video is private, age-restricted, or requires signing in.")
            }
            Self::ContentUnavailable => Some("This video is unavailable or has been removed."),
            Self::InvalidInput => Some("This URL is not supported. Please check the link."),
            Self::FormatUnavailable => {
                Some("The selected quality is no longer available for this video.")
            }
            Self::Unknown => None,
        }
    }
}

/// A failure that has been placed in the taxonomy. The raw text is kept for
/// diagnostics; `Display` renders the user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub raw: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let message = kind
            .user_message()
            .map_or_else(|| raw.clone(), str::to_owned);
        Self { kind, message, raw }
    }

    pub fn format_unavailable(raw: impl Into<String>) -> Self {
        Self::new(ErrorKind::FormatUnavailable, raw)
    }

    pub fn invalid_input(raw: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, raw)
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for ClassifiedError {
    fn from(err: anyhow::Error) -> Self {
        classify(&format!("{err:#}"))
    }
}

struct Rule {
    kind: ErrorKind,
    markers: &'static [&'static str],
}

// Markers are matched against the lowercased text.
const RULES: &[Rule] = &[
    Rule {
        kind: ErrorKind::RateLimited,
        markers: &[
            "http error 429",
            "status code 429",
            "too many requests",
            "rate limit",
            "rate-limit",
            "ratelimit",
        ],
    },
    Rule {
        kind: ErrorKind::AuthExpired,
        markers: &[
            "cookies are no longer valid",
            "cookies have expired",
            "invalid cookies",
            "not a bot",
            "http error 401",
        ],
    },
    Rule {
        kind: ErrorKind::PrivateOrRestricted,
        markers: &[
            "private video",
            "video is private",
            "sign in",
            "login required",
            "requires login",
            "log in",
            "age-restricted",
            "age restricted",
            "confirm your age",
            "members-only",
            "members only",
            "http error 403",
        ],
    },
    Rule {
        kind: ErrorKind::InvalidInput,
        markers: &[
            "unsupported url",
            "is not a valid url",
            "invalid url",
            "no url provided",
        ],
    },
    // Narrower than the unavailability wording it would otherwise match.
    Rule {
        kind: ErrorKind::FormatUnavailable,
        markers: &[
            "requested format is not available",
            "requested format not available",
        ],
    },
    Rule {
        kind: ErrorKind::ContentUnavailable,
        markers: &[
            "video unavailable",
            "is not available",
            "not available in your country",
            "no longer available",
            "has been removed",
            "does not exist",
            "has been terminated",
            "http error 404",
        ],
    },
];

/// Classifies raw error text. Never fails: unmatched text becomes `Unknown`.
pub fn classify(raw: &str) -> ClassifiedError {
    let lower = raw.to_lowercase();
    let kind = RULES
        .iter()
        .find(|rule| rule.markers.iter().any(|marker| lower.contains(marker)))
        .map_or(ErrorKind::Unknown, |rule| rule.kind);
    ClassifiedError::new(kind, raw.trim())
}
