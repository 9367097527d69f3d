/// Service layer for avatars
///
/// This module provides the business logic for:
/// - Transform: decode, crop-to-square, resize, re-encode
/// - Storage: key-addressed blob store (canonical store and staging area)
/// - Remote: lookups against gravatar-compatible services
/// - Cascade: local -> remote -> configured default -> built-in default
/// - Upload: stage, notify, confirm
pub mod cascade;
pub mod email;
pub mod fallback;
pub mod remote;
pub mod storage;
pub mod transform;
pub mod upload;

pub use cascade::ResolutionCascade;
pub use email::{Mailer, MailQueue, OutgoingMail, SmtpMailer};
pub use remote::RemoteFallbackClient;
pub use storage::{Blob, BlobStore, FileStorage};
pub use transform::{AvatarProcessor, TransformConfig};
pub use upload::{PendingUploads, UploadOutcome, UploadWorkflow};
