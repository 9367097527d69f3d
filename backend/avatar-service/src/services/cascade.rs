/// Avatar resolution cascade
///
/// Resolves a request by trying, in order and stopping at the first hit:
/// 1. the canonical store (`avatars/{hash}`), scaled to the request
/// 2. the remote services
/// 3. the configured local default image (unless the request is strict)
/// 4. the built-in default (unless the request is strict)
///
/// Every failure along the way is logged and treated as a miss.
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DefaultImage;
use crate::error::Result;
use crate::models::{
    avatar_key, http_date, is_valid_key_component, AvatarImage, AvatarRequest, CACHE_CONTROL,
    FALLBACK_LAST_MODIFIED,
};
use crate::services::fallback::builtin_default;
use crate::services::remote::RemoteFallbackClient;
use crate::services::storage::BlobStore;
use crate::services::transform::AvatarProcessor;

#[derive(Clone)]
pub struct ResolutionCascade {
    store: Arc<dyn BlobStore>,
    processor: Arc<AvatarProcessor>,
    remote: RemoteFallbackClient,
    default_image: DefaultImage,
}

impl ResolutionCascade {
    pub fn new(
        store: Arc<dyn BlobStore>,
        processor: Arc<AvatarProcessor>,
        remote: RemoteFallbackClient,
        default_image: DefaultImage,
    ) -> Self {
        Self {
            store,
            processor,
            remote,
            default_image,
        }
    }

    /// Resolve an avatar; `None` means not found
    pub async fn resolve(&self, request: &AvatarRequest) -> Option<AvatarImage> {
        if let Some(avatar) = self.from_local(request).await {
            return Some(avatar);
        }

        if let Some(avatar) = self.from_remote(request).await {
            return Some(avatar);
        }

        if request.is_strict() {
            debug!(hash = %request.hash, "Strict lookup missed, not substituting a default");
            return None;
        }

        if let Some(avatar) = self.from_configured_default(request).await {
            return Some(avatar);
        }

        self.from_builtin_default(request).await
    }

    async fn from_local(&self, request: &AvatarRequest) -> Option<AvatarImage> {
        if !is_valid_key_component(&request.hash) {
            warn!(hash = %request.hash, "Refusing local lookup for malformed hash");
            return None;
        }

        let key = avatar_key(&request.hash);
        let avatar = self.read_and_scale(&key, request).await;
        if avatar.is_some() {
            info!(hash = %request.hash, size = request.size, "Avatar served from canonical store");
        }
        avatar
    }

    async fn from_remote(&self, request: &AvatarRequest) -> Option<AvatarImage> {
        if self.remote.is_empty() {
            return None;
        }
        // An explicit per-request default wins over the configured one
        let effective_default = request
            .default
            .as_ref()
            .map(|d| d.as_query_value())
            .or_else(|| self.default_image.remote_option());

        self.remote.lookup(request, effective_default).await
    }

    async fn from_configured_default(&self, request: &AvatarRequest) -> Option<AvatarImage> {
        let DefaultImage::LocalFile(path) = &self.default_image else {
            return None;
        };
        let key = path.to_string_lossy();
        self.read_and_scale(&key, request).await
    }

    async fn from_builtin_default(&self, request: &AvatarRequest) -> Option<AvatarImage> {
        let data = builtin_default()?;
        match self.scale(data, request).await {
            Ok(mut avatar) => {
                avatar.last_modified = Some(FALLBACK_LAST_MODIFIED.to_string());
                Some(avatar)
            }
            Err(e) => {
                warn!(error = %e, "Could not scale built-in default avatar");
                None
            }
        }
    }

    /// Load and scale a stored image. A corrupt or unscalable artifact is a
    /// miss; it is never served.
    async fn read_and_scale(&self, key: &str, request: &AvatarRequest) -> Option<AvatarImage> {
        let blob = match self.store.load(key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!(key = %self.store.full_name(key), "No stored image");
                return None;
            }
            Err(e) => {
                warn!(key = %self.store.full_name(key), error = %e, "Error reading stored image");
                return None;
            }
        };

        match self.scale(blob.data, request).await {
            Ok(mut avatar) => {
                avatar.last_modified = Some(
                    blob.modified
                        .map(http_date)
                        .unwrap_or_else(|| FALLBACK_LAST_MODIFIED.to_string()),
                );
                Some(avatar)
            }
            Err(e) => {
                warn!(key = %self.store.full_name(key), error = %e, "Could not scale image");
                None
            }
        }
    }

    async fn scale(&self, data: Bytes, request: &AvatarRequest) -> Result<AvatarImage> {
        let scaled = self
            .processor
            .clone()
            .scale_async(data, request.size, request.format)
            .await?;

        Ok(AvatarImage {
            data: scaled.data,
            format: scaled.format,
            size: scaled.size,
            cache_control: CACHE_CONTROL.to_string(),
            last_modified: None,
        })
    }
}
