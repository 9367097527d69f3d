/// Data models for avatar-service
///
/// Transient per-request values: what was asked for ([`AvatarRequest`]) and
/// what is sent back ([`AvatarImage`]), plus the staged-upload record.
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

pub const MIN_SIZE: u32 = 8;
pub const MAX_SIZE: u32 = 512;
pub const DEFAULT_SIZE: u32 = 80;

/// Default option meaning "report not-found, never substitute a default"
pub const STRICT_DEFAULT: &str = "404";

/// Every served avatar carries this TTL, remote results included
pub const CACHE_CONTROL: &str = "max-age=300";

/// `Last-Modified` used when the file modification time is unavailable
pub const FALLBACK_LAST_MODIFIED: &str = "Sat, 01 Jan 2000 12:00:00 GMT";

/// Canonical store directory, relative to the data dir
pub const AVATAR_DIR: &str = "avatars";
/// Staging directory for unconfirmed uploads, relative to the data dir
pub const UNCONFIRMED_DIR: &str = "unconfirmed";

/// Hashes and tokens are plain alphanumeric strings; anything else could
/// escape the storage directories.
pub fn is_valid_key_component(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric())
}

pub fn avatar_key(hash: &str) -> String {
    format!("{AVATAR_DIR}/{hash}")
}

pub fn unconfirmed_key(token: &str, hash: &str) -> String {
    format!("{UNCONFIRMED_DIR}/{token}-{hash}")
}

/// Supported image formats. Each variant knows how to encode itself (see
/// `services::transform`); anything else is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvatarFormat {
    Jpeg,
    Png,
    Gif,
}

impl AvatarFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvatarFormat::Jpeg => "jpeg",
            AvatarFormat::Png => "png",
            AvatarFormat::Gif => "gif",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AvatarFormat::Jpeg => "image/jpeg",
            AvatarFormat::Png => "image/png",
            AvatarFormat::Gif => "image/gif",
        }
    }

    /// Map a codec detected by the `image` crate onto a supported format
    pub fn from_image_format(format: image::ImageFormat) -> Result<Self, AppError> {
        match format {
            image::ImageFormat::Jpeg => Ok(AvatarFormat::Jpeg),
            image::ImageFormat::Png => Ok(AvatarFormat::Png),
            image::ImageFormat::Gif => Ok(AvatarFormat::Gif),
            other => Err(AppError::UnsupportedFormat(format!("{other:?}"))),
        }
    }
}

impl FromStr for AvatarFormat {
    type Err = AppError;

    /// Accepts the names used in URL extensions; `jpg` normalizes to jpeg.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(AvatarFormat::Jpeg),
            "png" => Ok(AvatarFormat::Png),
            "gif" => Ok(AvatarFormat::Gif),
            other => Err(AppError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for AvatarFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request default option (`d` query parameter)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultOption {
    /// The `"404"` sentinel: strict lookup, no default substitution
    Strict,
    /// Builtin default keyword understood by the remote service (e.g. `identicon`)
    Keyword(String),
}

impl DefaultOption {
    /// Returns `None` for values that are neither the sentinel nor a keyword;
    /// those are ignored rather than forwarded to a remote.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw == STRICT_DEFAULT {
            Some(DefaultOption::Strict)
        } else if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(DefaultOption::Keyword(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_query_value(&self) -> &str {
        match self {
            DefaultOption::Strict => STRICT_DEFAULT,
            DefaultOption::Keyword(keyword) => keyword,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarRequest {
    pub hash: String,
    pub size: u32,
    pub format: Option<AvatarFormat>,
    pub default: Option<DefaultOption>,
}

impl AvatarRequest {
    pub fn new(hash: impl Into<String>, size: u32) -> Self {
        Self {
            hash: hash.into(),
            size: clamp_size(size as i64),
            format: None,
            default: None,
        }
    }

    pub fn with_format(mut self, format: AvatarFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_default(mut self, default: DefaultOption) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_strict(&self) -> bool {
        matches!(self.default, Some(DefaultOption::Strict))
    }
}

pub fn clamp_size(size: i64) -> u32 {
    size.clamp(MIN_SIZE as i64, MAX_SIZE as i64) as u32
}

/// Parse the `s` query parameter; unparsable values fall back to `default_size`
pub fn parse_size(raw: Option<&str>, default_size: u32) -> u32 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .map(clamp_size)
        .unwrap_or(default_size)
}

/// Avatar image with the metadata that ends up in response headers
#[derive(Debug, Clone)]
pub struct AvatarImage {
    pub data: Bytes,
    pub format: AvatarFormat,
    /// Side length in pixels after transformation
    pub size: u32,
    pub cache_control: String,
    pub last_modified: Option<String>,
}

/// Format a timestamp as an HTTP date (RFC 7231 IMF-fixdate)
pub fn http_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// An upload staged under a random token, waiting for confirmation
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub token: String,
    /// Identity hash derived from the submitter's email
    pub hash: String,
    pub staged_key: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_parsing() {
        assert_eq!("jpg".parse::<AvatarFormat>().unwrap(), AvatarFormat::Jpeg);
        assert_eq!("JPEG".parse::<AvatarFormat>().unwrap(), AvatarFormat::Jpeg);
        assert_eq!("png".parse::<AvatarFormat>().unwrap(), AvatarFormat::Png);
        assert_eq!("gif".parse::<AvatarFormat>().unwrap(), AvatarFormat::Gif);
        assert!(matches!(
            "webp".parse::<AvatarFormat>(),
            Err(AppError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_size_clamping() {
        assert_eq!(parse_size(None, DEFAULT_SIZE), 80);
        assert_eq!(parse_size(Some("abc"), DEFAULT_SIZE), 80);
        assert_eq!(parse_size(Some("1"), DEFAULT_SIZE), MIN_SIZE);
        assert_eq!(parse_size(Some("-20"), DEFAULT_SIZE), MIN_SIZE);
        assert_eq!(parse_size(Some("4096"), DEFAULT_SIZE), MAX_SIZE);
        assert_eq!(parse_size(Some("128"), DEFAULT_SIZE), 128);
        assert_eq!(AvatarRequest::new("abc", 1000).size, MAX_SIZE);
    }

    #[test]
    fn test_default_option() {
        assert_eq!(DefaultOption::parse("404"), Some(DefaultOption::Strict));
        assert_eq!(
            DefaultOption::parse("identicon"),
            Some(DefaultOption::Keyword("identicon".into()))
        );
        assert_eq!(DefaultOption::parse("http://evil"), None);
        assert_eq!(DefaultOption::parse(""), None);
    }

    #[test]
    fn test_http_date() {
        let ts = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(http_date(ts), "Wed, 21 Oct 2015 07:28:00 GMT");
    }

    #[test]
    fn test_key_components() {
        assert!(is_valid_key_component("0a1b2c"));
        assert!(!is_valid_key_component(""));
        assert!(!is_valid_key_component("../etc"));
        assert!(!is_valid_key_component("abc-def"));
    }

    #[test]
    fn test_keys() {
        assert_eq!(avatar_key("abc"), "avatars/abc");
        assert_eq!(unconfirmed_key("tok", "abc"), "unconfirmed/tok-abc");
    }
}
