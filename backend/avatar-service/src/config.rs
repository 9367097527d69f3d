//! Configuration management for avatar-service
//!
//! Loads settings once at startup from environment variables (and a `.env`
//! file in development). The resulting [`Config`] is immutable and handed to
//! the cascade, the upload workflow and the mailer explicitly.

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::models::DEFAULT_SIZE;

#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppConfig,
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub upload: UploadConfig,
    pub email: EmailConfig,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Base URL embedded in confirmation links, always ends with `/`
    pub public_url: String,
    pub default_size: u32,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Which image is served when neither the canonical store nor a remote
/// service has an avatar for the hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DefaultImage {
    /// Let the last remote service pick its own default (no `d` parameter)
    RemoteFallback,
    /// Ask the last remote service for one of its builtin defaults
    RemoteBuiltin(String),
    /// Serve a local image; remotes are always queried with `d=404`
    LocalFile(PathBuf),
}

impl DefaultImage {
    /// Parse the `AVATAR_DEFAULT` option: `fallback`, `remote:<keyword>` or a path
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "fallback" {
            return Ok(DefaultImage::RemoteFallback);
        }
        if let Some(keyword) = raw.strip_prefix("remote:") {
            if keyword.is_empty() || !keyword.chars().all(|c| c.is_ascii_alphabetic()) {
                bail!("Invalid remote default keyword: {keyword:?}");
            }
            return Ok(DefaultImage::RemoteBuiltin(keyword.to_string()));
        }
        let path = PathBuf::from(raw);
        let path = if path.is_absolute() {
            path
        } else {
            env::current_dir()
                .context("Failed to resolve current directory")?
                .join(path)
        };
        Ok(DefaultImage::LocalFile(path))
    }

    /// Value of the `d` parameter sent to the last remote when the request
    /// does not carry its own default.
    pub fn remote_option(&self) -> Option<&str> {
        match self {
            DefaultImage::RemoteFallback => None,
            DefaultImage::RemoteBuiltin(keyword) => Some(keyword.as_str()),
            DefaultImage::LocalFile(_) => Some(crate::models::STRICT_DEFAULT),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    /// Gravatar-compatible services, queried in order
    pub urls: Vec<String>,
    pub default_image: DefaultImage,
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            default_image: DefaultImage::RemoteFallback,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Allowed email domains; empty accepts every address
    pub email_domains: Vec<String>,
    pub max_upload_bytes: usize,
    /// Unset means staged uploads never expire
    pub confirmation_ttl: Option<Duration>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            email_domains: Vec::new(),
            max_upload_bytes: 10 * 1024 * 1024,
            confirmation_ttl: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    /// Empty disables email confirmation; uploads are confirmed immediately
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub no_tls: bool,
    pub smtp_from: String,
    pub test_recipient: Option<String>,
    pub queue_capacity: usize,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: 25,
            smtp_username: None,
            smtp_password: None,
            no_tls: false,
            smtp_from: "Intravatar <noreply@localhost>".to_string(),
            test_recipient: None,
            queue_capacity: 64,
        }
    }
}

impl EmailConfig {
    pub fn is_enabled(&self) -> bool {
        !self.smtp_host.trim().is_empty()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
        }

        let port: u16 = env::var("AVATAR_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("Invalid AVATAR_PORT")?;

        let public_url = match env::var("AVATAR_PUBLIC_URL") {
            Ok(url) if !url.trim().is_empty() => normalize_base_url(&url),
            _ => default_public_url(port),
        };

        let remote_urls = parse_remote_urls(
            &env::var("AVATAR_REMOTE_URLS").unwrap_or_else(|_| "http://gravatar.com/avatar".into()),
        );

        let default_image = DefaultImage::parse(
            &env::var("AVATAR_DEFAULT").unwrap_or_else(|_| "remote:monsterid".to_string()),
        )?;

        let confirmation_ttl = match env::var("AVATAR_CONFIRMATION_TTL_SECS") {
            Ok(raw) if !raw.trim().is_empty() => Some(Duration::from_secs(
                raw.trim()
                    .parse()
                    .context("Invalid AVATAR_CONFIRMATION_TTL_SECS")?,
            )),
            _ => None,
        };

        let config = Config {
            app: AppConfig {
                host: env::var("AVATAR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port,
                public_url,
                default_size: DEFAULT_SIZE,
            },
            storage: StorageConfig {
                data_dir: PathBuf::from(
                    env::var("AVATAR_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
                ),
            },
            remote: RemoteConfig {
                urls: remote_urls,
                default_image,
                timeout: Duration::from_secs(
                    env::var("AVATAR_REMOTE_TIMEOUT_SECS")
                        .unwrap_or_else(|_| "5".to_string())
                        .parse()
                        .context("Invalid AVATAR_REMOTE_TIMEOUT_SECS")?,
                ),
            },
            upload: UploadConfig {
                email_domains: split_list(&env::var("AVATAR_EMAIL_DOMAINS").unwrap_or_default())
                    .into_iter()
                    .map(|d| d.to_lowercase())
                    .collect(),
                max_upload_bytes: env::var("AVATAR_MAX_UPLOAD_BYTES")
                    .unwrap_or_else(|_| (10 * 1024 * 1024).to_string())
                    .parse()
                    .context("Invalid AVATAR_MAX_UPLOAD_BYTES")?,
                confirmation_ttl,
            },
            email: EmailConfig {
                smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
                smtp_port: env::var("SMTP_PORT")
                    .unwrap_or_else(|_| "25".to_string())
                    .parse()
                    .context("Invalid SMTP_PORT")?,
                smtp_username: env::var("SMTP_USERNAME").ok().filter(|v| !v.is_empty()),
                smtp_password: env::var("SMTP_PASSWORD").ok().filter(|v| !v.is_empty()),
                no_tls: env::var("SMTP_NO_TLS")
                    .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                    .unwrap_or(false),
                smtp_from: env::var("SMTP_FROM")
                    .unwrap_or_else(|_| EmailConfig::default().smtp_from),
                test_recipient: env::var("SMTP_TEST_RECIPIENT").ok().filter(|v| !v.is_empty()),
                queue_capacity: env::var("MAIL_QUEUE_CAPACITY")
                    .unwrap_or_else(|_| "64".to_string())
                    .parse()
                    .context("Invalid MAIL_QUEUE_CAPACITY")?,
            },
        };

        info!(
            data_dir = %config.storage.data_dir.display(),
            remotes = config.remote.urls.len(),
            email_confirmation = config.email.is_enabled(),
            "Configuration loaded"
        );

        Ok(config)
    }
}

/// `none` disables remote lookups entirely.
fn parse_remote_urls(raw: &str) -> Vec<String> {
    if raw.trim() == "none" {
        return Vec::new();
    }
    split_list(raw)
        .into_iter()
        .map(|url| url.trim_end_matches('/').to_string())
        .collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_base_url(url: &str) -> String {
    format!("{}/", url.trim().trim_end_matches('/'))
}

fn default_public_url(port: u16) -> String {
    let hostname = env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    if port == 80 {
        format!("http://{hostname}/")
    } else {
        format!("http://{hostname}:{port}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_image() {
        assert_eq!(
            DefaultImage::parse("fallback").unwrap(),
            DefaultImage::RemoteFallback
        );
        assert_eq!(
            DefaultImage::parse("remote:monsterid").unwrap(),
            DefaultImage::RemoteBuiltin("monsterid".into())
        );
        assert!(DefaultImage::parse("remote:bad-word").is_err());

        match DefaultImage::parse("/srv/avatars/default.png").unwrap() {
            DefaultImage::LocalFile(path) => {
                assert_eq!(path, PathBuf::from("/srv/avatars/default.png"))
            }
            other => panic!("unexpected default: {other:?}"),
        }
    }

    #[test]
    fn test_remote_option() {
        assert_eq!(DefaultImage::RemoteFallback.remote_option(), None);
        assert_eq!(
            DefaultImage::RemoteBuiltin("identicon".into()).remote_option(),
            Some("identicon")
        );
        assert_eq!(
            DefaultImage::LocalFile(PathBuf::from("/tmp/x")).remote_option(),
            Some("404")
        );
    }

    #[test]
    fn test_parse_remote_urls() {
        assert!(parse_remote_urls("none").is_empty());
        assert_eq!(
            parse_remote_urls("http://a/avatar/, http://b/avatar"),
            vec!["http://a/avatar".to_string(), "http://b/avatar".to_string()]
        );
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://avatars.example.com"), "https://avatars.example.com/");
        assert_eq!(normalize_base_url("https://avatars.example.com//"), "https://avatars.example.com/");
    }
}
