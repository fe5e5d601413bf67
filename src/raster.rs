//! Raster surface: the pixel primitives the editor composes with.
//!
//! DESIGN
//! ======
//! `Surface` wraps an `image::RgbaImage` (straight, non-premultiplied alpha)
//! and offers exactly the operations layers and tools need: draw another
//! raster at a rectangle with a composite mode and optional blur, stamp brush
//! discs, fill a linear gradient, mask/fill/erase a polygon, crop, read back
//! pixels, encode/decode PNG, and the downscaled JPEG variants a background
//! is published with.
//!
//! Encoding and decoding large rasters is CPU-bound, so the async entry
//! points (`decode`, `encode_png`) run on `spawn_blocking` and are real
//! suspension points for the caller.

use std::borrow::Cow;
use std::io::Cursor;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{ImageEncoder, Rgba, RgbaImage};

use crate::error::ErrorCode;
use crate::geometry::{Bounds, Point, point_in_polygon};

#[cfg(test)]
#[path = "raster_test.rs"]
mod tests;

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RasterError {
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("image encode failed: {0}")]
    Encode(String),
    #[error("empty surface: {width}x{height}")]
    EmptySurface { width: u32, height: u32 },
    #[error("raster worker failed: {0}")]
    Worker(String),
}

impl ErrorCode for RasterError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "E_RASTER_DECODE",
            Self::Encode(_) => "E_RASTER_ENCODE",
            Self::EmptySurface { .. } => "E_RASTER_EMPTY",
            Self::Worker(_) => "E_RASTER_WORKER",
        }
    }
}

// =============================================================================
// SURFACE
// =============================================================================

/// How source pixels combine with the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum CompositeMode {
    /// Normal painting: source drawn over destination.
    #[default]
    SourceOver,
    /// Erasing: destination alpha is reduced by source alpha.
    DestinationOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    pixels: RgbaImage,
}

impl Surface {
    /// Fully transparent surface.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { pixels: RgbaImage::new(width, height) }
    }

    #[must_use]
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self { pixels: RgbaImage::from_pixel(width, height, Rgba(rgba)) }
    }

    #[must_use]
    pub fn from_image(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[must_use]
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        if x < self.width() && y < self.height() { Some(*self.pixels.get_pixel(x, y)) } else { None }
    }

    /// Alpha channel only, row-major.
    #[must_use]
    pub fn alpha_channel(&self) -> Vec<u8> {
        self.pixels.pixels().map(|p| p.0[3]).collect()
    }

    #[must_use]
    pub fn is_fully_transparent(&self) -> bool {
        self.pixels.pixels().all(|p| p.0[3] == 0)
    }

    pub fn clear(&mut self) {
        for p in self.pixels.pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
    }

    /// Draw `src` scaled into `dest` (surface pixel coordinates). A positive
    /// `blur` applies a gaussian of that sigma to the source first.
    pub fn draw_image(&mut self, src: &RgbaImage, dest: Bounds, mode: CompositeMode, blur: f32) {
        if !dest.is_positive_area() || src.width() == 0 || src.height() == 0 {
            return;
        }
        let scaled: Cow<'_, RgbaImage> = if src.dimensions() == (dest.width, dest.height) {
            Cow::Borrowed(src)
        } else {
            Cow::Owned(imageops::resize(src, dest.width, dest.height, FilterType::Triangle))
        };
        let blurred;
        let source: &RgbaImage = if blur > 0.0 {
            blurred = imageops::blur(scaled.as_ref(), blur);
            &blurred
        } else {
            scaled.as_ref()
        };

        let (w, h) = (i64::from(self.width()), i64::from(self.height()));
        for (sx, sy, px) in source.enumerate_pixels() {
            let dx = i64::from(dest.x) + i64::from(sx);
            let dy = i64::from(dest.y) + i64::from(sy);
            if dx < 0 || dy < 0 || dx >= w || dy >= h {
                continue;
            }
            blend(self.pixels.get_pixel_mut(dx as u32, dy as u32), *px, mode);
        }
    }

    /// Paint a filled disc. Pixels already at least as opaque as `color` are
    /// left alone so overlapping stamps along a stroke do not accumulate.
    pub fn stamp_disc(&mut self, center: Point, radius: f64, color: Rgba<u8>) {
        let radius = radius.max(0.5);
        let x0 = (center.x - radius).floor().max(0.0) as u32;
        let y0 = (center.y - radius).floor().max(0.0) as u32;
        let x1 = ((center.x + radius).ceil().max(0.0) as u32).min(self.width());
        let y1 = ((center.y + radius).ceil().max(0.0) as u32).min(self.height());
        for y in y0..y1 {
            for x in x0..x1 {
                let d = (f64::from(x) + 0.5 - center.x).hypot(f64::from(y) + 0.5 - center.y);
                if d <= radius {
                    let px = self.pixels.get_pixel_mut(x, y);
                    if px.0[3] < color.0[3] {
                        *px = color;
                    }
                }
            }
        }
    }

    /// Stamp discs along the segment `a -> b` at half-radius spacing.
    pub fn stroke_segment(&mut self, a: Point, b: Point, radius: f64, color: Rgba<u8>) {
        let step = (radius / 2.0).max(0.5);
        let steps = (a.distance(b) / step).ceil().max(1.0) as u32;
        for i in 0..=steps {
            let t = f64::from(i) / f64::from(steps);
            self.stamp_disc(Point::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t), radius, color);
        }
    }

    /// Overwrite the whole surface with a linear gradient from `color` at
    /// `start` to fully transparent at `end`.
    pub fn fill_linear_gradient(&mut self, start: Point, end: Point, color: Rgba<u8>) {
        let (dx, dy) = (end.x - start.x, end.y - start.y);
        let len_sq = dx * dx + dy * dy;
        for (x, y, px) in self.pixels.enumerate_pixels_mut() {
            let t = if len_sq <= f64::EPSILON {
                0.0
            } else {
                (((f64::from(x) + 0.5 - start.x) * dx + (f64::from(y) + 0.5 - start.y) * dy) / len_sq).clamp(0.0, 1.0)
            };
            let alpha = (f64::from(color.0[3]) * (1.0 - t)).round() as u8;
            *px = Rgba([color.0[0], color.0[1], color.0[2], alpha]);
        }
    }

    /// Make every pixel outside `polygon` transparent.
    pub fn retain_polygon(&mut self, polygon: &[Point]) {
        for (x, y, px) in self.pixels.enumerate_pixels_mut() {
            if !point_in_polygon(pixel_center(x, y), polygon) {
                px.0[3] = 0;
            }
        }
    }

    /// Overwrite every pixel inside `polygon` with `color`.
    pub fn fill_polygon(&mut self, polygon: &[Point], color: Rgba<u8>) {
        for (x, y, px) in self.pixels.enumerate_pixels_mut() {
            if point_in_polygon(pixel_center(x, y), polygon) {
                *px = color;
            }
        }
    }

    /// Copy of the region `bounds` (clipped to the surface).
    pub fn crop(&self, bounds: Bounds) -> Result<Surface, RasterError> {
        let clipped = Bounds::new(0, 0, self.width(), self.height())
            .intersect(&bounds)
            .ok_or(RasterError::EmptySurface { width: bounds.width, height: bounds.height })?;
        let view = imageops::crop_imm(&self.pixels, clipped.x as u32, clipped.y as u32, clipped.width, clipped.height);
        Ok(Surface { pixels: view.to_image() })
    }

    pub fn to_png(&self) -> Result<Vec<u8>, RasterError> {
        if self.width() == 0 || self.height() == 0 {
            return Err(RasterError::EmptySurface { width: self.width(), height: self.height() });
        }
        let mut out = Cursor::new(Vec::new());
        image::codecs::png::PngEncoder::new(&mut out)
            .write_image(self.pixels.as_raw(), self.width(), self.height(), image::ColorType::Rgba8)
            .map_err(|e| RasterError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }

    /// Scaled copy whose longest side is at most `max_side`. Never upscales.
    #[must_use]
    pub fn fit_within(&self, max_side: u32) -> Surface {
        let (w, h) = (self.width(), self.height());
        let longest = w.max(h);
        if longest <= max_side || max_side == 0 {
            return self.clone();
        }
        let scale = f64::from(max_side) / f64::from(longest);
        let nw = ((f64::from(w) * scale).round() as u32).max(1);
        let nh = ((f64::from(h) * scale).round() as u32).max(1);
        Surface { pixels: imageops::resize(&self.pixels, nw, nh, FilterType::Triangle) }
    }

    /// Encode as JPEG, flattening transparency onto white.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, RasterError> {
        if self.width() == 0 || self.height() == 0 {
            return Err(RasterError::EmptySurface { width: self.width(), height: self.height() });
        }
        let flat = image::RgbImage::from_fn(self.width(), self.height(), |x, y| {
            let p = self.pixels.get_pixel(x, y).0;
            let a = f64::from(p[3]) / 255.0;
            let over_white = |c: u8| (f64::from(c) * a + 255.0 * (1.0 - a)).round().clamp(0.0, 255.0) as u8;
            image::Rgb([over_white(p[0]), over_white(p[1]), over_white(p[2])])
        });
        let mut out = Cursor::new(Vec::new());
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality)
            .write_image(flat.as_raw(), flat.width(), flat.height(), image::ColorType::Rgb8)
            .map_err(|e| RasterError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }

    /// Decode any supported format (PNG, JPEG) into RGBA.
    pub fn from_bytes(bytes: &[u8]) -> Result<Surface, RasterError> {
        let decoded = image::load_from_memory(bytes).map_err(|e| RasterError::Decode(e.to_string()))?;
        Ok(Surface { pixels: decoded.to_rgba8() })
    }
}

fn pixel_center(x: u32, y: u32) -> Point {
    Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5)
}

fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>, mode: CompositeMode) {
    let sa = f64::from(src.0[3]) / 255.0;
    if sa <= 0.0 {
        return;
    }
    match mode {
        CompositeMode::SourceOver => {
            let da = f64::from(dst.0[3]) / 255.0;
            let out_a = sa + da * (1.0 - sa);
            for c in 0..3 {
                let sc = f64::from(src.0[c]);
                let dc = f64::from(dst.0[c]);
                dst.0[c] = ((sc * sa + dc * da * (1.0 - sa)) / out_a).round().clamp(0.0, 255.0) as u8;
            }
            dst.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        CompositeMode::DestinationOut => {
            let da = f64::from(dst.0[3]) * (1.0 - sa);
            dst.0[3] = da.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Parse `#rrggbb` or `#rrggbbaa`.
#[must_use]
pub fn parse_hex_color(raw: &str) -> Option<Rgba<u8>> {
    let hex = raw.trim().strip_prefix('#')?;
    if !matches!(hex.len(), 6 | 8) || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| match u8::from_str_radix(&hex[i..i + 2], 16) {
        Ok(v) => Some(v),
        Err(_) => None,
    };
    let alpha = if hex.len() == 8 { channel(6)? } else { 255 };
    Some(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

// =============================================================================
// ASYNC CODEC
// =============================================================================

/// Decode on the blocking pool.
pub async fn decode(bytes: Arc<[u8]>) -> Result<Surface, RasterError> {
    tokio::task::spawn_blocking(move || Surface::from_bytes(&bytes))
        .await
        .map_err(|e| RasterError::Worker(e.to_string()))?
}

/// Encode to PNG on the blocking pool.
pub async fn encode_png(surface: Surface) -> Result<Vec<u8>, RasterError> {
    tokio::task::spawn_blocking(move || surface.to_png())
        .await
        .map_err(|e| RasterError::Worker(e.to_string()))?
}

// ── Background variants ─────────────────────────────────────

/// Longest side of the background thumbnail.
pub const THUMB_MAX_SIDE: u32 = 200;
/// Longest side of the background preview.
pub const PREVIEW_MAX_SIDE: u32 = 800;
const VARIANT_JPEG_QUALITY: u8 = 85;

/// Downscaled JPEG copies of a background image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaledVariants {
    pub thumb: Vec<u8>,
    pub preview: Vec<u8>,
}

/// Build the thumbnail and preview variants on the blocking pool.
pub async fn encode_scaled_variants(surface: Surface) -> Result<ScaledVariants, RasterError> {
    tokio::task::spawn_blocking(move || {
        Ok(ScaledVariants {
            thumb: surface.fit_within(THUMB_MAX_SIDE).to_jpeg(VARIANT_JPEG_QUALITY)?,
            preview: surface.fit_within(PREVIEW_MAX_SIDE).to_jpeg(VARIANT_JPEG_QUALITY)?,
        })
    })
    .await
    .map_err(|e| RasterError::Worker(e.to_string()))?
}
