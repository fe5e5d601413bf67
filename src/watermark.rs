//! Watermark scrub: randomizes the least-significant bits of every colour
//! channel so invisible watermarks embedded there do not survive.
//!
//! Alpha is never touched, so transparent regions stay transparent. The
//! change per channel is at most `2^bits - 1`, well below what is visible.

use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use crate::raster::{self, RasterError, Surface};

#[cfg(test)]
#[path = "watermark_test.rs"]
mod tests;

/// How many low bits of each colour channel get replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScrubStrength {
    Low,
    #[default]
    High,
}

impl ScrubStrength {
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::High => 2,
        }
    }

    fn mask(self) -> u8 {
        (1u8 << self.bits()) - 1
    }
}

/// Replace the low bits of every R, G and B channel with bits from `rng`.
pub fn scrub_lsb_with<R: Rng>(surface: Surface, strength: ScrubStrength, rng: &mut R) -> Surface {
    let mask = strength.mask();
    let mut image = surface.into_image();
    for px in image.pixels_mut() {
        for channel in &mut px.0[..3] {
            *channel = (*channel & !mask) | (rng.random::<u8>() & mask);
        }
    }
    Surface::from_image(image)
}

/// [`scrub_lsb_with`] using the thread-local generator.
#[must_use]
pub fn scrub_lsb(surface: Surface, strength: ScrubStrength) -> Surface {
    scrub_lsb_with(surface, strength, &mut rand::rng())
}

/// Decode, scrub and re-encode an image as PNG.
pub async fn remove_watermark(bytes: Arc<[u8]>, strength: ScrubStrength) -> Result<Vec<u8>, RasterError> {
    let surface = raster::decode(bytes).await?;
    let (width, height) = (surface.width(), surface.height());
    let scrubbed = scrub_lsb(surface, strength);
    debug!(width, height, bits = strength.bits(), "watermark: scrubbed");
    raster::encode_png(scrubbed).await
}
