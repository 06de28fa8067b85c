// Shrinks encoded images to fit a bounding box before upload.

use crate::error::Result;
use image::imageops::FilterType;
use std::io::Cursor;

/// Target size for a `width` x `height` image inside `max_width` x
/// `max_height`, keeping the aspect ratio. A zero bound leaves that axis
/// unconstrained. Returns `None` when the image already fits.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> Option<(u32, u32)> {
    let over_w = max_width > 0 && width > max_width;
    let over_h = max_height > 0 && height > max_height;
    if !over_w && !over_h {
        return None;
    }
    let scale_w = if max_width > 0 { max_width as f64 / width as f64 } else { f64::INFINITY };
    let scale_h = if max_height > 0 { max_height as f64 / height as f64 } else { f64::INFINITY };
    let scale = scale_w.min(scale_h);
    let w = ((width as f64 * scale).round() as u32).clamp(1, width);
    let h = ((height as f64 * scale).round() as u32).clamp(1, height);
    Some((w, h))
}

/// Downsize `bytes` so the image fits within the bounds, re-encoding in the
/// format it came in. Images that already fit are returned untouched.
pub fn resize(bytes: &[u8], max_width: u32, max_height: u32) -> Result<Vec<u8>> {
    let format = image::guess_format(bytes)?;
    let img = image::load_from_memory_with_format(bytes, format)?;
    let Some((w, h)) = fit_within(img.width(), img.height(), max_width, max_height) else {
        return Ok(bytes.to_vec());
    };
    let resized = img.resize_exact(w, h, FilterType::Lanczos3);
    let mut out = Cursor::new(Vec::new());
    resized.write_to(&mut out, format)?;
    Ok(out.into_inner())
}
