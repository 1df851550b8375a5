//! Alpha matting of a base image with an opacity mask.
//!
//! Pure functions only: images come in decoded and leave as pixel buffers or
//! PNG bytes. Identical inputs always produce identical bytes.

use crate::error::Result;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Combine `image` with `mask` into an RGBA image of the same dimensions.
///
/// The mask is resampled bilinearly to the image size and read as
/// luminance. Each output alpha is `round(alpha * mask / 255)`; RGB is kept
/// unchanged. Images without an alpha channel count as fully opaque.
pub fn apply_mask(image: &DynamicImage, mask: &DynamicImage) -> RgbaImage {
    let mut rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mask = fit_mask(mask, width, height);

    for (pixel, coverage) in rgba.pixels_mut().zip(mask.pixels()) {
        pixel[3] = scale_alpha(pixel[3], coverage[0]);
    }

    rgba
}

/// Scale an image down to fit within `max_dimensions`, preserving aspect ratio.
///
/// Uses Lanczos resampling. Images already inside the bounds are returned
/// unchanged; this never upscales.
pub fn make_thumbnail(image: &DynamicImage, max_dimensions: (u32, u32)) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (target_width, target_height) = fit_within((width, height), max_dimensions);

    if (target_width, target_height) == (width, height) {
        return image.clone();
    }

    image.resize_exact(target_width, target_height, FilterType::Lanczos3)
}

/// Decode an encoded image, sniffing the format from its content
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

/// Encode an RGBA image as PNG
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Dimensions of `size` scaled down to fit in `bounds`
pub fn fit_within(size: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (width, height) = size;
    let (max_width, max_height) = bounds;

    if width <= max_width && height <= max_height {
        return size;
    }

    let ratio = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );

    let scaled_width = ((width as f64 * ratio).round() as u32).clamp(1, max_width.max(1));
    let scaled_height = ((height as f64 * ratio).round() as u32).clamp(1, max_height.max(1));

    (scaled_width, scaled_height)
}

/// Resample the mask to the target size and reduce it to one channel
fn fit_mask(mask: &DynamicImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        mask.to_luma8()
    } else {
        mask.resize_exact(width, height, FilterType::Triangle).to_luma8()
    }
}

/// `round(alpha * coverage / 255)` in integer arithmetic.
///
/// `alpha * coverage` is never an odd multiple of 127.5, so adding 127
/// before the division rounds half-way cases the only way they can occur.
fn scale_alpha(alpha: u8, coverage: u8) -> u8 {
    ((alpha as u32 * coverage as u32 + 127) / 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba};

    fn gradient_rgba(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 7) as u8, (y * 11) as u8, ((x + y) * 3) as u8, ((x * y) % 256) as u8])
        })
    }

    #[test]
    fn test_scale_alpha_rounds_to_nearest() {
        for alpha in 0..=255u32 {
            for coverage in 0..=255u32 {
                let expected = (alpha as f64 * coverage as f64 / 255.0).round() as u8;
                assert_eq!(scale_alpha(alpha as u8, coverage as u8), expected);
            }
        }
    }

    #[test]
    fn test_apply_mask_preserves_rgb_and_scales_alpha() {
        let image = gradient_rgba(16, 9);
        let mask = GrayImage::from_fn(16, 9, |x, y| Luma([((x * 16 + y * 5) % 256) as u8]));

        let output = apply_mask(
            &DynamicImage::ImageRgba8(image.clone()),
            &DynamicImage::ImageLuma8(mask.clone()),
        );

        assert_eq!(output.dimensions(), (16, 9));
        for (x, y, pixel) in output.enumerate_pixels() {
            let original = image.get_pixel(x, y);
            let coverage = mask.get_pixel(x, y)[0] as f64;
            assert_eq!(&pixel.0[..3], &original.0[..3]);
            let expected = (original[3] as f64 * coverage / 255.0).round() as u8;
            assert_eq!(pixel[3], expected);
        }
    }

    #[test]
    fn test_white_mask_on_rgb_image_is_fully_opaque() {
        let image = RgbImage::from_fn(8, 6, |x, y| Rgb([x as u8 * 30, y as u8 * 40, 200]));
        let mask = GrayImage::from_pixel(8, 6, Luma([255]));
        let image = DynamicImage::ImageRgb8(image);

        let output = apply_mask(&image, &DynamicImage::ImageLuma8(mask));

        assert_eq!(output, image.to_rgba8());
        assert!(output.pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn test_border_mask_clears_border_and_keeps_center() {
        let image = gradient_rgba(10, 10);
        let mask = GrayImage::from_fn(10, 10, |x, y| {
            if (2..8).contains(&x) && (2..8).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        });

        let output = apply_mask(
            &DynamicImage::ImageRgba8(image.clone()),
            &DynamicImage::ImageLuma8(mask),
        );

        for (x, y, pixel) in output.enumerate_pixels() {
            let inside = (2..8).contains(&x) && (2..8).contains(&y);
            if inside {
                assert_eq!(pixel[3], image.get_pixel(x, y)[3]);
            } else {
                assert_eq!(pixel[3], 0);
            }
        }
    }

    #[test]
    fn test_mask_is_resized_to_image_dimensions() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([10, 20, 30])));
        let mask = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 2, Luma([255])));

        let output = apply_mask(&image, &mask);

        assert_eq!(output.dimensions(), (40, 20));
        assert!(output.pixels().all(|p| p.0 == [10, 20, 30, 255]));
    }

    #[test]
    fn test_rgba_mask_is_read_as_luminance() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([1, 2, 3])));
        let mask = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 3, Rgba([0, 0, 0, 255])));

        let output = apply_mask(&image, &mask);

        assert!(output.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within((1024, 768), (512, 512)), (512, 384));
        assert_eq!(fit_within((768, 1024), (512, 512)), (384, 512));
        assert_eq!(fit_within((300, 200), (512, 512)), (300, 200));
        assert_eq!(fit_within((5000, 10), (512, 512)), (512, 1));
        assert_eq!(fit_within((1000, 333), (100, 100)), (100, 33));
    }

    #[test]
    fn test_thumbnail_respects_bounds_and_aspect_ratio() {
        let image = DynamicImage::ImageRgba8(gradient_rgba(200, 120));

        let thumbnail = make_thumbnail(&image, (64, 64));
        let (width, height) = thumbnail.dimensions();

        assert!(width <= 64 && height <= 64);
        assert_eq!(width, 64);
        let expected_height = 120.0 * 64.0 / 200.0;
        assert!((height as f64 - expected_height).abs() <= 1.0);
    }

    #[test]
    fn test_thumbnail_never_upscales() {
        let image = DynamicImage::ImageRgba8(gradient_rgba(30, 20));
        let thumbnail = make_thumbnail(&image, (512, 512));
        assert_eq!(thumbnail.dimensions(), (30, 20));
        assert_eq!(thumbnail.to_rgba8(), image.to_rgba8());
    }

    #[test]
    fn test_png_round_trip_is_lossless_and_deterministic() {
        let mask = GrayImage::from_fn(13, 7, |x, y| Luma([(x * 19 + y * 23) as u8]));
        let rgba = DynamicImage::ImageLuma8(mask.clone()).to_rgba8();

        let first = encode_png(&rgba).unwrap();
        let second = encode_png(&rgba).unwrap();
        assert_eq!(first, second);

        let decoded = decode_image(&first).unwrap().to_luma8();
        assert_eq!(decoded, mask);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_image(b"not an image").is_err());
    }
}
