use super::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn gradient_surface() -> Surface {
    let image = image::RgbaImage::from_fn(16, 16, |x, y| image::Rgba([(x * 16) as u8, (y * 16) as u8, 200, 255]));
    Surface::from_image(image)
}

#[test]
fn strength_bits() {
    assert_eq!(ScrubStrength::Low.bits(), 1);
    assert_eq!(ScrubStrength::High.bits(), 2);
    assert_eq!(ScrubStrength::default(), ScrubStrength::High);
}

#[test]
fn only_low_bits_change() {
    let original = gradient_surface();
    let mut rng = StdRng::seed_from_u64(7);
    let scrubbed = scrub_lsb_with(original.clone(), ScrubStrength::High, &mut rng);

    for (a, b) in original.pixels().pixels().zip(scrubbed.pixels().pixels()) {
        for c in 0..3 {
            assert_eq!(a.0[c] & !0b11, b.0[c] & !0b11);
        }
        assert_eq!(a.0[3], b.0[3]);
    }
}

#[test]
fn low_bits_are_actually_rewritten() {
    let original = gradient_surface();
    let mut rng = StdRng::seed_from_u64(11);
    let scrubbed = scrub_lsb_with(original.clone(), ScrubStrength::Low, &mut rng);
    let changed = original.pixels().pixels().zip(scrubbed.pixels().pixels()).filter(|(a, b)| a != b).count();
    assert!(changed > 0);
}

#[test]
fn transparent_pixels_stay_transparent() {
    let scrubbed = scrub_lsb(Surface::new(4, 4), ScrubStrength::High);
    assert!(scrubbed.is_fully_transparent());
}

#[tokio::test]
async fn remove_watermark_round_trips_png() {
    let png = gradient_surface().to_png().unwrap();
    let out = remove_watermark(Arc::from(png), ScrubStrength::High).await.unwrap();
    let decoded = Surface::from_bytes(&out).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (16, 16));
}

#[tokio::test]
async fn remove_watermark_rejects_garbage() {
    let err = remove_watermark(Arc::from(vec![1u8, 2, 3]), ScrubStrength::Low).await;
    assert!(matches!(err, Err(RasterError::Decode(_))));
}
