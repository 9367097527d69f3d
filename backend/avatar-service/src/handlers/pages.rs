/// HTML pages served to browsers
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};

use crate::config::Config;

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; padding: 20px; color: #333;">
{body}
</body>
</html>"#,
        title = escape_html(title),
        body = body
    )
}

fn html(status: StatusCode, title: &str, body: &str) -> HttpResponse {
    HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .body(layout(title, body))
}

/// GET /
pub async fn index(config: web::Data<Config>) -> HttpResponse {
    let avatar_link = format!("{}avatar/", config.app.public_url);
    let body = format!(
        r#"    <h2>Intravatar</h2>
    <p>Avatars are served from <code>{link}&lt;md5 of your email&gt;</code>.</p>
    <p>Optional parameters: <code>s</code> (size, 8-512 pixels) and <code>d=404</code> (no default image).</p>
    <p><a href="/upload">Upload your avatar</a></p>"#,
        link = escape_html(&avatar_link)
    );
    html(StatusCode::OK, "Intravatar", &body)
}

pub fn upload_page() -> HttpResponse {
    let body = r#"    <h2>Upload your avatar</h2>
    <form action="/upload" method="post" enctype="multipart/form-data">
        <p><label>Email <input type="email" name="email" required></label></p>
        <p><label>Image (jpeg, png or gif) <input type="file" name="image" accept="image/jpeg,image/png,image/gif" required></label></p>
        <p><button type="submit">Upload</button></p>
    </form>"#;
    html(StatusCode::OK, "Upload your avatar", body)
}

/// A confirmation email has been queued
pub fn pending_page(email: &str) -> HttpResponse {
    let body = format!(
        r#"    <h2>Almost done</h2>
    <p>A confirmation email has been sent to <b>{email}</b>. Open the link in that email to publish your avatar.</p>"#,
        email = escape_html(email)
    );
    html(StatusCode::OK, "Confirm your upload", &body)
}

/// `uniq` breaks browser caches so the new avatar shows up immediately
pub fn confirmed_page(hash: &str, uniq: &str) -> HttpResponse {
    let body = format!(
        r#"    <h2>Thank you for uploading your avatar</h2>
    <p><img src="/avatar/{hash}?s=128&amp;{uniq}" alt="Your avatar" width="128" height="128"></p>"#,
        hash = escape_html(hash),
        uniq = escape_html(uniq)
    );
    html(StatusCode::OK, "Avatar confirmed", &body)
}

pub fn save_error_page(status: StatusCode, message: &str, error: &str) -> HttpResponse {
    let body = format!(
        r#"    <h2>{message}</h2>
    <p style="color: #a00;">{error}</p>
    <p><a href="/upload">Try again</a></p>"#,
        message = escape_html(message),
        error = escape_html(error)
    );
    html(status, "Upload failed", &body)
}
