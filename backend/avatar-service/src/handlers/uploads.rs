/// Upload Handlers
///
/// Browser-facing endpoints of the upload workflow:
/// - GET /upload: upload form
/// - POST /upload: stage a new avatar (multipart `email` + `image`)
/// - GET /confirm/{token}: promote a staged avatar
///
/// Failures are rendered on the save-error page with the underlying message.
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, ResponseError};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tracing::{error, info};

use crate::error::{AppError, Result};
use crate::handlers::pages;
use crate::services::{UploadOutcome, UploadWorkflow};

const FIELD_EMAIL: &str = "email";
const FIELD_IMAGE: &str = "image";

/// Form fields collected from the multipart body
#[derive(Debug, Default)]
pub struct UploadForm {
    pub email: Option<String>,
    pub image: Option<Bytes>,
}

fn render_save_error(message: &str, err: &AppError) -> HttpResponse {
    error!(error = %err, "{}", message);
    pages::save_error_page(err.status_code(), message, &err.to_string())
}

/// Drain the multipart payload. Reading stops as soon as the image exceeds
/// `max_image_bytes`.
pub async fn read_upload_form(mut payload: Multipart, max_image_bytes: usize) -> Result<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::Validation(format!("Invalid upload form: {e}")))?;
        let name = field.name().unwrap_or_default().to_string();

        let mut buf = BytesMut::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::Validation(format!("Error reading upload: {e}")))?;
            buf.extend_from_slice(&chunk);
            if name == FIELD_IMAGE && buf.len() > max_image_bytes {
                return Err(AppError::Validation(format!(
                    "Image exceeds the upload limit of {max_image_bytes} bytes"
                )));
            }
        }

        match name.as_str() {
            FIELD_EMAIL => form.email = Some(String::from_utf8_lossy(&buf).into_owned()),
            FIELD_IMAGE => form.image = Some(buf.freeze()),
            _ => {}
        }
    }

    Ok(form)
}

/// GET /upload
pub async fn upload_form() -> HttpResponse {
    pages::upload_page()
}

/// POST /upload
pub async fn save_upload(payload: Multipart, workflow: web::Data<UploadWorkflow>) -> HttpResponse {
    let form = match read_upload_form(payload, workflow.config().max_upload_bytes).await {
        Ok(form) => form,
        Err(e) => return render_save_error("Failed to read upload", &e),
    };

    let email = form.email.unwrap_or_default();
    if let Err(e) = workflow.verify_email(&email) {
        return render_save_error("Please use a valid email", &e);
    }
    info!(email = %email, "Saving image for email address");

    let Some(image) = form.image.filter(|image| !image.is_empty()) else {
        let err = AppError::Validation("missing image field".into());
        return render_save_error("Please choose a file to upload", &err);
    };

    match workflow.submit(&email, image).await {
        Ok(UploadOutcome::Confirmed { hash }) => pages::confirmed_page(&hash, &cache_breaker()),
        Ok(UploadOutcome::PendingConfirmation { email }) => pages::pending_page(&email),
        Err(e @ (AppError::Decode(_) | AppError::UnsupportedFormat(_) | AppError::Transform(_))) => {
            render_save_error(
                "Failed to read image file. Note that only jpeg, png and gif images are supported",
                &e,
            )
        }
        Err(e @ AppError::Validation(_)) => render_save_error("Invalid upload", &e),
        Err(e @ AppError::Mail(_)) => render_save_error("Failed to send confirmation email", &e),
        Err(e) => render_save_error("Error while saving file", &e),
    }
}

/// GET /confirm/{token}
pub async fn confirm_upload(
    path: web::Path<String>,
    workflow: web::Data<UploadWorkflow>,
) -> HttpResponse {
    match workflow.confirm(&path).await {
        Ok(hash) => pages::confirmed_page(&hash, &cache_breaker()),
        Err(e) => render_save_error("Error confirming upload", &e),
    }
}

fn cache_breaker() -> String {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_string()
}
