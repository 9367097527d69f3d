//! Built-in "mystery man" default avatar, rendered once in memory.

use bytes::Bytes;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use once_cell::sync::Lazy;
use std::io::Cursor;
use tracing::error;

use crate::models::MAX_SIZE;

const BACKGROUND: Rgb<u8> = Rgb([0xd3, 0xd3, 0xd3]);
const FIGURE: Rgb<u8> = Rgb([0xf5, 0xf5, 0xf5]);

static MYSTERY_MAN: Lazy<Option<Bytes>> = Lazy::new(|| {
    let mut buf = Vec::new();
    let image = DynamicImage::ImageRgb8(render(MAX_SIZE));
    match image.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png) {
        Ok(()) => Some(Bytes::from(buf)),
        Err(e) => {
            error!(error = %e, "Failed to render built-in default avatar");
            None
        }
    }
});

/// PNG bytes of the built-in default, square and `MAX_SIZE` wide
pub fn builtin_default() -> Option<Bytes> {
    MYSTERY_MAN.clone()
}

/// Head and shoulders silhouette
fn render(size: u32) -> RgbImage {
    let s = size as f32;
    let (head_x, head_y, head_r) = (s * 0.5, s * 0.38, s * 0.2);
    let (body_x, body_y, body_rx, body_ry) = (s * 0.5, s * 1.0, s * 0.38, s * 0.36);

    RgbImage::from_fn(size, size, |x, y| {
        let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
        let in_head = (px - head_x).powi(2) + (py - head_y).powi(2) <= head_r.powi(2);
        let in_body =
            ((px - body_x) / body_rx).powi(2) + ((py - body_y) / body_ry).powi(2) <= 1.0;
        if in_head || in_body {
            FIGURE
        } else {
            BACKGROUND
        }
    })
}
