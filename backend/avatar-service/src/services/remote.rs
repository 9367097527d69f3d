/// Client for gravatar-compatible remote avatar services
///
/// Services are queried in order. All but the last are asked with the strict
/// `d=404` default so that a miss is a real miss and not the remote's own
/// placeholder; the last one gets the caller's effective default.
use bytes::Bytes;
use reqwest::{header, Client as HttpClient, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::models::{AvatarFormat, AvatarImage, AvatarRequest, CACHE_CONTROL, STRICT_DEFAULT};

#[derive(Clone)]
pub struct RemoteFallbackClient {
    http_client: HttpClient,
    urls: Vec<String>,
}

impl RemoteFallbackClient {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { http_client, urls })
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Try every remote in order; the first hit wins.
    ///
    /// `effective_default` is only sent to the last service.
    pub async fn lookup(
        &self,
        request: &AvatarRequest,
        effective_default: Option<&str>,
    ) -> Option<AvatarImage> {
        let Some((last, leading)) = self.urls.split_last() else {
            return None;
        };

        for base_url in leading {
            if let Some(avatar) = self.try_fetch(base_url, request, Some(STRICT_DEFAULT)).await {
                return Some(avatar);
            }
        }

        self.try_fetch(last, request, effective_default).await
    }

    async fn try_fetch(
        &self,
        base_url: &str,
        request: &AvatarRequest,
        default: Option<&str>,
    ) -> Option<AvatarImage> {
        match self.fetch(base_url, request, default).await {
            Ok(Some(avatar)) => {
                info!(hash = %request.hash, remote = %base_url, "Avatar retrieved from remote");
                Some(avatar)
            }
            Ok(None) => {
                debug!(hash = %request.hash, remote = %base_url, "Avatar not found on remote");
                None
            }
            Err(e) => {
                warn!(hash = %request.hash, remote = %base_url, error = %e, "Remote lookup failed");
                None
            }
        }
    }

    /// Single lookup. `Ok(None)` is a 404; transport errors, other non-success
    /// statuses and undecodable bodies are [`AppError::RemoteLookup`].
    pub async fn fetch(
        &self,
        base_url: &str,
        request: &AvatarRequest,
        default: Option<&str>,
    ) -> Result<Option<AvatarImage>> {
        let url = remote_url(base_url, request);
        let mut query = vec![("s", request.size.to_string())];
        if let Some(default) = default {
            query.push(("d", default.to_string()));
        }

        debug!(url = %url, ?query, "Retrieving avatar from remote");
        let response = self.http_client.get(&url).query(&query).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AppError::RemoteLookup(format!(
                "{url} answered with status {status}"
            )));
        }

        // Cache-Control from the remote is ignored
        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let data: Bytes = response.bytes().await?;
        let format = detect_format(&data, content_type.as_deref())?;

        Ok(Some(AvatarImage {
            data,
            format,
            // The remote already scaled the image for us
            size: request.size,
            cache_control: CACHE_CONTROL.to_string(),
            last_modified,
        }))
    }
}

fn remote_url(base_url: &str, request: &AvatarRequest) -> String {
    match request.format {
        Some(format) => format!("{}/{}.{}", base_url, request.hash, format.as_str()),
        None => format!("{}/{}", base_url, request.hash),
    }
}

/// Sniff the body first; fall back to the declared content type.
fn detect_format(data: &[u8], content_type: Option<&str>) -> Result<AvatarFormat> {
    if let Ok(format) = image::guess_format(data) {
        return AvatarFormat::from_image_format(format)
            .map_err(|e| AppError::RemoteLookup(e.to_string()));
    }
    match content_type.and_then(|ct| ct.split(';').next()).map(str::trim) {
        Some("image/jpeg") => Ok(AvatarFormat::Jpeg),
        Some("image/png") => Ok(AvatarFormat::Png),
        Some("image/gif") => Ok(AvatarFormat::Gif),
        other => Err(AppError::RemoteLookup(format!(
            "Remote returned non-image content ({})",
            other.unwrap_or("no content type")
        ))),
    }
}
