//! Patch preparation for the recognition model.
//!
//! Crop by region, orient, resize to the model height with right padding,
//! normalise to [0,1] NCHW floats.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use tracing::debug;

use crate::error::{RecognitionError, Result};
use crate::orient::OrientationResult;
use crate::pool::BufferPool;
use crate::region::DetectedRegion;

/// Aspect ratio above which a patch is considered vertical text.
pub const VERTICAL_ASPECT_RATIO: f32 = 1.2;
/// Stricter ratio for the orienter-null fallback (no classifier installed).
pub const VERTICAL_ASPECT_RATIO_FALLBACK: f32 = 1.5;

/// Crop the region's axis-aligned bounding box out of the image.
pub fn crop_region(image: &DynamicImage, region: &DetectedRegion) -> Result<RgbImage> {
    let (img_w, img_h) = image.dimensions();
    if img_w == 0 || img_h == 0 {
        return Err(RecognitionError::Preprocessing("empty input image".into()));
    }
    let bbox = region.aabb().ok_or_else(|| {
        RecognitionError::Preprocessing("region has neither polygon nor box".into())
    })?;
    let (x, y, w, h) = bbox.clamp_to(img_w, img_h).ok_or_else(|| {
        RecognitionError::Preprocessing("region lies outside the image".into())
    })?;
    Ok(image.crop_imm(x, y, w, h).to_rgb8())
}

/// Rotate a patch by a quarter-turn angle, losslessly.
pub fn rotate_patch(patch: &RgbImage, angle: u16) -> RgbImage {
    match angle % 360 {
        90 => image::imageops::rotate90(patch),
        180 => image::imageops::rotate180(patch),
        270 => image::imageops::rotate270(patch),
        _ => patch.clone(),
    }
}

/// Decide whether and how to rotate a patch so its text runs horizontally.
///
/// Resolution order: classifier verdict, then the `rotate_if_vertical`
/// configuration flag, then the plain aspect heuristic. Returns the patch
/// and whether it was rotated.
pub fn orient_patch(
    patch: RgbImage,
    classification: Option<OrientationResult>,
    rotate_if_vertical: bool,
) -> (RgbImage, bool) {
    let (w, h) = patch.dimensions();

    if let Some(result) = classification {
        if result.angle != 0 {
            debug!(angle = result.angle, confidence = result.confidence, "rotating patch");
            return (rotate_patch(&patch, result.angle), true);
        }
        // The classifier said upright, but a clearly vertical patch still
        // gets the aspect fallback at the default threshold.
        if h as f32 > VERTICAL_ASPECT_RATIO * w as f32 {
            return (image::imageops::rotate270(&patch), true);
        }
        return (patch, false);
    }

    if rotate_if_vertical && h as f32 > VERTICAL_ASPECT_RATIO_FALLBACK * w as f32 {
        return (image::imageops::rotate270(&patch), true);
    }

    (patch, false)
}

/// Aspect-preserving resize to a fixed height, clamped to `max_width`.
pub fn resize_to_height(patch: &RgbImage, target_height: u32, max_width: u32) -> Result<RgbImage> {
    let (w, h) = patch.dimensions();
    if w == 0 || h == 0 || target_height == 0 {
        return Err(RecognitionError::Preprocessing(format!(
            "cannot resize {w}x{h} patch to height {target_height}"
        )));
    }

    let scale = target_height as f32 / h as f32;
    let mut new_w = (w as f32 * scale).round().max(1.0) as u32;
    if max_width > 0 {
        new_w = new_w.min(max_width);
    }

    if new_w == w && h == target_height {
        return Ok(patch.clone());
    }
    Ok(image::imageops::resize(
        patch,
        new_w,
        target_height,
        FilterType::Lanczos3,
    ))
}

/// Round `width` up to the next multiple of `pad_multiple` (0 keeps it).
pub fn padded_width(width: u32, pad_multiple: u32) -> u32 {
    if pad_multiple == 0 || width % pad_multiple == 0 {
        return width;
    }
    (width / pad_multiple + 1) * pad_multiple
}

/// Largest usable width under `max_width` that still satisfies the pad
/// multiple. With no multiple the cap itself is used.
pub fn effective_max_width(max_width: u32, pad_multiple: u32) -> u32 {
    if pad_multiple == 0 || max_width == 0 {
        return max_width;
    }
    let floored = max_width - max_width % pad_multiple;
    if floored == 0 { max_width } else { floored }
}

/// Place `patch` at (0,0) on a black canvas of `out_width` x same height.
pub fn pad_right(patch: &RgbImage, out_width: u32) -> RgbImage {
    let (w, h) = patch.dimensions();
    if out_width <= w {
        return patch.clone();
    }
    let mut canvas = RgbImage::new(out_width, h);
    image::imageops::replace(&mut canvas, patch, 0, 0);
    canvas
}

/// Resize + clamp + pad in one step. Returns the padded patch and the
/// content width before padding.
pub fn resize_with_pad(
    patch: &RgbImage,
    target_height: u32,
    max_width: u32,
    pad_multiple: u32,
) -> Result<(RgbImage, u32)> {
    let max = effective_max_width(max_width, pad_multiple);
    let mut resized = resize_to_height(patch, target_height, max)?;
    let content_w = resized.width();
    let out_w = padded_width(content_w, pad_multiple);
    if out_w > content_w {
        resized = pad_right(&resized, out_w);
    }
    Ok((resized, content_w))
}

/// Write the patch as `[0,1]` floats in NCHW order into `buf`.
///
/// `buf` must hold exactly `3 * h * w` entries.
pub fn normalize_into(patch: &RgbImage, buf: &mut [f32]) -> Result<()> {
    let (w, h) = patch.dimensions();
    let plane = (w * h) as usize;
    if buf.len() != 3 * plane {
        return Err(RecognitionError::Preprocessing(format!(
            "normalise buffer has {} entries, patch {w}x{h} needs {}",
            buf.len(),
            3 * plane
        )));
    }
    for (x, y, pixel) in patch.enumerate_pixels() {
        let offset = (y * w + x) as usize;
        buf[offset] = f32::from(pixel[0]) / 255.0;
        buf[plane + offset] = f32::from(pixel[1]) / 255.0;
        buf[2 * plane + offset] = f32::from(pixel[2]) / 255.0;
    }
    Ok(())
}

/// Normalise into a pooled buffer of exactly `3 * h * w` floats.
pub fn normalize_pooled(patch: &RgbImage, pool: &BufferPool) -> Result<Vec<f32>> {
    let (w, h) = patch.dimensions();
    let mut buf = pool.get(3 * (w * h) as usize);
    normalize_into(patch, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{BoundingBox, Point};

    fn gradient_patch(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        })
    }

    #[test]
    fn crop_uses_polygon_aabb() {
        let image = DynamicImage::ImageRgb8(gradient_patch(100, 60));
        let region = DetectedRegion::from_polygon(
            vec![
                Point::new(10.0, 10.0),
                Point::new(40.0, 10.0),
                Point::new(40.0, 30.0),
                Point::new(10.0, 30.0),
            ],
            0.9,
        );
        let crop = crop_region(&image, &region).unwrap();
        assert_eq!(crop.dimensions(), (30, 20));
    }

    #[test]
    fn crop_clips_to_image() {
        let image = DynamicImage::ImageRgb8(gradient_patch(50, 40));
        let region = DetectedRegion::from_bbox(BoundingBox::new(30.0, 20.0, 100.0, 100.0), 0.9);
        let crop = crop_region(&image, &region).unwrap();
        assert_eq!(crop.dimensions(), (20, 20));
    }

    #[test]
    fn crop_fails_without_geometry() {
        let image = DynamicImage::ImageRgb8(gradient_patch(50, 40));
        let region = DetectedRegion::from_bbox(BoundingBox::default(), 0.0);
        assert!(crop_region(&image, &region).is_err());
    }

    #[test]
    fn resize_preserves_aspect() {
        let patch = gradient_patch(200, 100);
        let resized = resize_to_height(&patch, 48, 0).unwrap();
        assert_eq!(resized.dimensions(), (96, 48));
    }

    #[test]
    fn resize_clamps_to_max_width() {
        let patch = gradient_patch(2000, 100);
        let resized = resize_to_height(&patch, 48, 320).unwrap();
        assert_eq!(resized.dimensions(), (320, 48));
    }

    #[test]
    fn padded_width_rounds_up() {
        assert_eq!(padded_width(100, 8), 104);
        assert_eq!(padded_width(104, 8), 104);
        assert_eq!(padded_width(96, 0), 96);
        assert_eq!(padded_width(1, 8), 8);
    }

    #[test]
    fn effective_max_respects_pad_multiple() {
        assert_eq!(effective_max_width(100, 8), 96);
        assert_eq!(effective_max_width(96, 8), 96);
        assert_eq!(effective_max_width(0, 8), 0);
        assert_eq!(effective_max_width(5, 8), 5);
    }

    #[test]
    fn resize_with_pad_honours_all_constraints() {
        let patch = gradient_patch(203, 100);
        let (out, content_w) = resize_with_pad(&patch, 48, 120, 8).unwrap();
        assert_eq!(out.height(), 48);
        assert_eq!(out.width() % 8, 0);
        assert!(out.width() <= 120);
        assert!(content_w <= out.width());

        // Padding area stays black, content starts at (0,0).
        if content_w < out.width() {
            assert_eq!(out.get_pixel(out.width() - 1, 10), &image::Rgb([0, 0, 0]));
        }
    }

    #[test]
    fn orient_rotates_vertical_patches() {
        let vertical = gradient_patch(30, 100);
        let (rotated, was_rotated) = orient_patch(vertical, None, true);
        assert!(was_rotated);
        assert_eq!(rotated.dimensions(), (100, 30));

        let horizontal = gradient_patch(100, 30);
        let (same, was_rotated) = orient_patch(horizontal, None, true);
        assert!(!was_rotated);
        assert_eq!(same.dimensions(), (100, 30));

        // Without a classifier the fallback holds out to 1.5x; a mildly
        // tall patch stays as it is.
        let mildly_tall = gradient_patch(30, 40);
        let (same, was_rotated) = orient_patch(mildly_tall, None, true);
        assert!(!was_rotated);
        assert_eq!(same.dimensions(), (30, 40));
    }

    #[test]
    fn orient_without_flag_keeps_patch() {
        let vertical = gradient_patch(30, 100);
        let (same, was_rotated) = orient_patch(vertical, None, false);
        assert!(!was_rotated);
        assert_eq!(same.dimensions(), (30, 100));
    }

    #[test]
    fn orient_applies_classifier_angle() {
        let patch = gradient_patch(40, 100);
        let classification = Some(OrientationResult {
            angle: 90,
            confidence: 0.95,
        });
        let (rotated, was_rotated) = orient_patch(patch, classification, false);
        assert!(was_rotated);
        assert_eq!(rotated.dimensions(), (100, 40));
    }

    #[test]
    fn orient_falls_back_when_classifier_says_zero_on_tall_patch() {
        // Taller than 1.2x wide: a classifier verdict of 0 still falls
        // back to the aspect check at the default threshold.
        let tall = gradient_patch(30, 40);
        let classification = Some(OrientationResult {
            angle: 0,
            confidence: 0.6,
        });
        let (rotated, was_rotated) = orient_patch(tall, classification, false);
        assert!(was_rotated);
        assert_eq!(rotated.dimensions(), (40, 30));

        // Under 1.2x: trusted as upright.
        let near_square = gradient_patch(30, 34);
        let classification = Some(OrientationResult {
            angle: 0,
            confidence: 0.6,
        });
        let (same, was_rotated) = orient_patch(near_square, classification, false);
        assert!(!was_rotated);
        assert_eq!(same.dimensions(), (30, 34));
    }

    #[test]
    fn normalize_values_in_unit_range() {
        let patch = gradient_patch(16, 8);
        let pool = BufferPool::new();
        let buf = normalize_pooled(&patch, &pool).unwrap();
        assert_eq!(buf.len(), 3 * 16 * 8);
        assert!(buf.iter().all(|&v| (0.0..=1.0).contains(&v)));

        // NCHW: red plane first.
        let red_at_5_0 = buf[5];
        assert!((red_at_5_0 - 5.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_rejects_wrong_buffer_size() {
        let patch = gradient_patch(4, 4);
        let mut buf = vec![0.0; 10];
        assert!(normalize_into(&patch, &mut buf).is_err());
    }

    #[test]
    fn batch_widths_pad_to_common_multiple() {
        // S6: widths 100/80/120 with pad multiple 8 batch at width 120.
        let widths = [100u32, 80, 120];
        let w_max = widths
            .iter()
            .map(|&w| padded_width(w, 8))
            .max()
            .unwrap();
        assert_eq!(w_max, 120);
    }
}
