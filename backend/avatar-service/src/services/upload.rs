/// Upload confirmation workflow
///
/// Validated -> Staged -> Confirmed. An upload is canonicalized
/// (crop-to-square, capped size), staged under `unconfirmed/{token}-{hash}`
/// and only promoted to `avatars/{hash}` once its token is confirmed. Without
/// an SMTP relay the upload is confirmed immediately.
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::error::{AppError, Result};
use crate::models::{
    avatar_key, is_valid_key_component, unconfirmed_key, PendingUpload, UNCONFIRMED_DIR,
};
use crate::services::email::{MailQueue, OutgoingMail};
use crate::services::storage::BlobStore;
use crate::services::transform::AvatarProcessor;

const CONFIRMATION_EXPIRED: &str = "Confirmation period expired";

/// Result of a successful submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Promoted right away (no mail relay configured)
    Confirmed { hash: String },
    /// Staged; a confirmation link was queued for delivery
    PendingConfirmation { email: String },
}

/// Identity hash: md5 of the trimmed, lower-cased email address
pub fn create_hash(email: &str) -> String {
    format!("{:x}", md5::compute(email.trim().to_lowercase().as_bytes()))
}

/// 128-bit random token, hex encoded
pub fn create_token() -> Result<String> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AppError::Internal(format!("Failed to generate random token: {e}")))?;
    Ok(hex::encode(bytes))
}

/// Check the address against the domain allow-list (case-insensitive
/// `@domain` suffix). An empty list accepts every address.
pub fn verify_email(domains: &[String], email: &str) -> Result<()> {
    if domains.is_empty() {
        return Ok(());
    }
    let email = email.trim().to_lowercase();
    if domains
        .iter()
        .any(|domain| email.ends_with(&format!("@{}", domain.to_lowercase())))
    {
        return Ok(());
    }
    Err(AppError::Validation(format!(
        "email is not in white list of mail domains [{}]",
        domains.join(", ")
    )))
}

/// Token index of staged uploads
#[derive(Default)]
pub struct PendingUploads {
    entries: DashMap<String, PendingUpload>,
}

impl PendingUploads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a staged upload, returning older uploads for the same hash
    /// that it supersedes.
    pub fn insert(&self, upload: PendingUpload) -> Vec<PendingUpload> {
        let superseded: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.hash == upload.hash && entry.token != upload.token)
            .map(|entry| entry.key().clone())
            .collect();

        let removed = superseded
            .into_iter()
            .filter_map(|token| self.entries.remove(&token).map(|(_, upload)| upload))
            .collect();

        self.entries.insert(upload.token.clone(), upload);
        removed
    }

    /// Remove and return the entry for a token; tokens are single-use
    pub fn take(&self, token: &str) -> Option<PendingUpload> {
        self.entries.remove(token).map(|(_, upload)| upload)
    }

    /// Re-index an entry taken out earlier, without superseding anything
    pub fn restore(&self, upload: PendingUpload) {
        self.entries.insert(upload.token.clone(), upload);
    }

    /// Remove and return every entry older than `ttl`
    pub fn take_expired(&self, ttl: Duration) -> Vec<PendingUpload> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| is_expired(entry.value(), ttl))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|token| self.entries.remove(&token).map(|(_, upload)| upload))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_expired(upload: &PendingUpload, ttl: Duration) -> bool {
    let age = Utc::now().signed_duration_since(upload.created_at);
    age.to_std().map(|age| age > ttl).unwrap_or(false)
}

pub struct UploadWorkflow {
    store: Arc<dyn BlobStore>,
    processor: Arc<AvatarProcessor>,
    pending: Arc<PendingUploads>,
    mail_queue: Option<MailQueue>,
    config: UploadConfig,
    public_url: String,
}

impl UploadWorkflow {
    pub fn new(
        store: Arc<dyn BlobStore>,
        processor: Arc<AvatarProcessor>,
        mail_queue: Option<MailQueue>,
        config: UploadConfig,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            processor,
            pending: Arc::new(PendingUploads::new()),
            mail_queue,
            config,
            public_url: public_url.into(),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn pending(&self) -> &PendingUploads {
        &self.pending
    }

    pub fn verify_email(&self, email: &str) -> Result<()> {
        verify_email(&self.config.email_domains, email)
    }

    /// Validate, canonicalize and stage an upload, then either confirm it
    /// immediately or queue the confirmation mail.
    pub async fn submit(&self, email: &str, image: Bytes) -> Result<UploadOutcome> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AppError::Validation("Please enter your email address".into()));
        }
        email
            .parse::<lettre::Address>()
            .map_err(|e| AppError::Validation(format!("Invalid email address: {e}")))?;
        self.verify_email(email)?;

        if image.is_empty() {
            return Err(AppError::Validation("Please choose a file to upload".into()));
        }
        if image.len() > self.config.max_upload_bytes {
            return Err(AppError::Validation(format!(
                "Image exceeds the upload limit of {} bytes",
                self.config.max_upload_bytes
            )));
        }

        let avatar = self.processor.clone().crop_and_scale_async(image).await?;

        let hash = create_hash(email);
        let token = create_token()?;
        let staged_key = unconfirmed_key(&token, &hash);

        self.store.save(&staged_key, &avatar.data).await?;
        info!(hash = %hash, token = %token, size = avatar.size, format = %avatar.format, "Avatar upload staged");

        let superseded = self.pending.insert(PendingUpload {
            token: token.clone(),
            hash: hash.clone(),
            staged_key,
            created_at: Utc::now(),
        });
        for old in superseded {
            debug!(hash = %hash, token = %old.token, "Discarding superseded upload");
            if let Err(e) = self.store.delete(&old.staged_key).await {
                warn!(key = %old.staged_key, error = %e, "Failed to delete superseded upload");
            }
        }

        match &self.mail_queue {
            None => {
                debug!(hash = %hash, "No mail relay configured, confirming immediately");
                let hash = self.confirm(&token).await?;
                Ok(UploadOutcome::Confirmed { hash })
            }
            Some(queue) => {
                queue.enqueue(OutgoingMail::confirmation(email, &self.public_url, &token))?;
                info!(hash = %hash, "Confirmation email queued");
                Ok(UploadOutcome::PendingConfirmation {
                    email: email.to_string(),
                })
            }
        }
    }

    /// Promote the staged upload for `token` into the canonical store,
    /// replacing any existing avatar. Returns the identity hash.
    pub async fn confirm(&self, token: &str) -> Result<String> {
        info!(token = %token, "Confirming uploaded avatar");
        let upload = self.locate(token).await?;

        self.store
            .rename(&upload.staged_key, &avatar_key(&upload.hash))
            .await?;

        info!(hash = %upload.hash, "Avatar confirmed");
        Ok(upload.hash)
    }

    /// Delete staged uploads older than the configured TTL and return how
    /// many were removed. Entries whose file could not be deleted stay
    /// indexed so they keep failing as expired.
    pub async fn purge_expired(&self) -> usize {
        let Some(ttl) = self.config.confirmation_ttl else {
            return 0;
        };

        let mut purged = 0;
        for upload in self.pending.take_expired(ttl) {
            if self.discard(upload).await {
                purged += 1;
            }
        }
        if purged > 0 {
            info!(count = purged, "Purged expired uploads");
        }
        purged
    }

    /// Delete a staged file. On failure the upload goes back into the index
    /// so it keeps failing as expired.
    async fn discard(&self, upload: PendingUpload) -> bool {
        match self.store.delete(&upload.staged_key).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %upload.staged_key, error = %e, "Failed to delete expired upload");
                self.pending.restore(upload);
                false
            }
        }
    }

    /// Resolve a token through the index, falling back to a scan of the
    /// staging directory for uploads staged before a restart.
    async fn locate(&self, token: &str) -> Result<PendingUpload> {
        if !is_valid_key_component(token) {
            return Err(AppError::Confirmation(CONFIRMATION_EXPIRED.into()));
        }

        if let Some(upload) = self.pending.take(token) {
            if let Some(ttl) = self.config.confirmation_ttl {
                if is_expired(&upload, ttl) {
                    self.discard(upload).await;
                    return Err(AppError::Confirmation(CONFIRMATION_EXPIRED.into()));
                }
            }
            return Ok(upload);
        }

        let filename = self
            .store
            .find_by_prefix(UNCONFIRMED_DIR, &format!("{token}-"))
            .await?
            .ok_or_else(|| AppError::Confirmation(CONFIRMATION_EXPIRED.into()))?;

        let hash = match filename.split_once('-') {
            Some((_, hash)) if is_valid_key_component(hash) => hash.to_string(),
            _ => {
                warn!(filename = %filename, "Invalid confirmation file name");
                return Err(AppError::Internal("Invalid confirmation file name".into()));
            }
        };
        debug!(filename = %filename, hash = %hash, "Found confirmation file by scan");

        Ok(PendingUpload {
            token: token.to_string(),
            staged_key: format!("{UNCONFIRMED_DIR}/{filename}"),
            hash,
            created_at: Utc::now(),
        })
    }
}
