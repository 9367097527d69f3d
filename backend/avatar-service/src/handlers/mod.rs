/// HTTP handlers for avatar-service
///
/// This module contains handlers for:
/// - Avatars: resolve and serve an avatar image
/// - Uploads: upload form, staging and confirmation
/// - Pages: the small HTML pages returned to browsers
pub mod avatars;
pub mod pages;
pub mod uploads;

pub use avatars::get_avatar;
pub use pages::index;
pub use uploads::{confirm_upload, save_upload, upload_form};

use actix_web::{web, HttpResponse};

/// Register every avatar-service route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/avatar/{name}", web::get().to(get_avatar))
        .route("/upload", web::get().to(upload_form))
        .route("/upload", web::post().to(save_upload))
        .route("/save", web::post().to(save_upload))
        .route("/confirm/{token}", web::get().to(confirm_upload))
        .route(
            "/api/v1/health",
            web::get()
                .to(|| async { HttpResponse::Ok().json(serde_json::json!({"status": "ok"})) }),
        )
        .route(
            "/api/v1/health/ready",
            web::get().to(|| async { HttpResponse::Ok().finish() }),
        )
        .route(
            "/api/v1/health/live",
            web::get().to(|| async { HttpResponse::Ok().finish() }),
        );
}
