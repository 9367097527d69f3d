/// Avatar handler
///
/// GET /avatar/{hash}[.{ext}]?s={size}&d={default}
use actix_web::http::header;
use actix_web::{web, HttpResponse};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{parse_size, AvatarFormat, AvatarRequest, DefaultOption};
use crate::services::ResolutionCascade;

static AVATAR_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z0-9]+)(?:\.([0-9a-zA-Z]+))?$").expect("valid regex"));

#[derive(Debug, Deserialize)]
pub struct AvatarQuery {
    pub s: Option<String>,
    pub d: Option<String>,
}

/// Split `{hash}[.{ext}]` into the hash and the requested output format
pub fn parse_avatar_name(name: &str) -> Result<(String, Option<AvatarFormat>)> {
    let captures = AVATAR_NAME
        .captures(name)
        .ok_or_else(|| AppError::NotFound(format!("Invalid avatar name: {name}")))?;

    let hash = captures[1].to_string();
    let format = captures
        .get(2)
        .map(|ext| ext.as_str().parse::<AvatarFormat>())
        .transpose()?;

    Ok((hash, format))
}

pub async fn get_avatar(
    path: web::Path<String>,
    query: web::Query<AvatarQuery>,
    cascade: web::Data<ResolutionCascade>,
    config: web::Data<Config>,
) -> Result<HttpResponse> {
    let (hash, format) = parse_avatar_name(&path)?;

    let mut request = AvatarRequest::new(
        hash,
        parse_size(query.s.as_deref(), config.app.default_size),
    );
    if let Some(format) = format {
        request = request.with_format(format);
    }
    if let Some(default) = query.d.as_deref().and_then(DefaultOption::parse) {
        request = request.with_default(default);
    }

    debug!(?request, "Loading avatar");
    let avatar = cascade
        .resolve(&request)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No avatar for {}", request.hash)))?;

    let mut response = HttpResponse::Ok();
    response
        .content_type(avatar.format.mime_type())
        .insert_header((header::CACHE_CONTROL, avatar.cache_control.clone()));
    if let Some(last_modified) = &avatar.last_modified {
        response.insert_header((header::LAST_MODIFIED, last_modified.clone()));
    }

    Ok(response.body(avatar.data))
}
