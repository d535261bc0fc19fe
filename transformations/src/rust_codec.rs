//! Pure Rust codec built on the `image` crate.
//!
//! | Primitive | Implementation |
//! |---|---|
//! | decode | `image::guess_format` + `load_from_memory_with_format` |
//! | resize (cover / contain / fill) | `resize_to_fill` / `resize` / `resize_exact`, Lanczos3 |
//! | crop with anchor | fill dimensions, then `crop_imm` at the anchor offset |
//! | rotate | `rotate90/180/270` for right angles, bilinear resampling otherwise |
//! | grayscale / blur / sharpen | `grayscale`, `blur`, `unsharpen` |
//! | encode | `DynamicImage::write_to` after converting to a layout the encoder accepts |

use crate::codec::{CropPosition, FitMode, ImageCodec, OutputFormat, Region, WorkingImage};
use crate::error::{Result, TransformationError};
use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};
use std::borrow::Cow;
use std::io::Cursor;

/// Largest side any resize, crop or rotate may produce.
pub const MAX_DIMENSION: u32 = 16_384;

/// Largest pixel count any resize, crop or rotate may produce, intermediate
/// buffers included.
pub const MAX_PIXELS: u64 = 64 * 1024 * 1024;

const RESAMPLE_FILTER: FilterType = FilterType::Lanczos3;

const SHARPEN_THRESHOLD: i32 = 1;

#[derive(Debug, Default, Clone, Copy)]
pub struct RustCodec;

impl RustCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ImageCodec for RustCodec {
    fn decode(&self, bytes: &[u8]) -> Result<WorkingImage> {
        if bytes.is_empty() {
            return Err(TransformationError::Decode("input is empty".to_string()));
        }
        let format = image::guess_format(bytes)
            .map_err(|e| TransformationError::Decode(format!("unrecognized image data: {}", e)))?;
        let image = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| TransformationError::Decode(e.to_string()))?;

        log::debug!(
            "Decoded {:?} image ({}x{})",
            format,
            image.width(),
            image.height()
        );
        let target = OutputFormat::from_image_format(format).unwrap_or(OutputFormat::Png);
        Ok(WorkingImage::new(image, target))
    }

    fn resize(
        &self,
        image: &WorkingImage,
        width: Option<u32>,
        height: Option<u32>,
        fit: FitMode,
    ) -> Result<WorkingImage> {
        check_target(width, height)?;
        let source = image.image();
        let (src_w, src_h) = (source.width(), source.height());
        let resized = match (width, height, fit) {
            (None, None, _) => return Ok(image.clone()),
            (Some(w), Some(h), FitMode::Cover) => {
                let (fill_w, fill_h) = fill_dimensions(src_w, src_h, w, h);
                check_output(fill_w, fill_h)?;
                source.resize_to_fill(w, h, RESAMPLE_FILTER)
            }
            (Some(w), Some(h), FitMode::Contain) => {
                let (fit_w, fit_h) = contain_dimensions(src_w, src_h, w, h);
                check_output(fit_w, fit_h)?;
                source.resize(w, h, RESAMPLE_FILTER)
            }
            (Some(w), Some(h), FitMode::Fill) => {
                check_output(w, h)?;
                source.resize_exact(w, h, RESAMPLE_FILTER)
            }
            (w, h, _) => {
                let (w, h) = proportional_dimensions(src_w, src_h, w, h);
                check_output(w, h)?;
                source.resize_exact(w, h, RESAMPLE_FILTER)
            }
        };
        Ok(image.with_image(resized))
    }

    fn crop(
        &self,
        image: &WorkingImage,
        width: Option<u32>,
        height: Option<u32>,
        position: CropPosition,
    ) -> Result<WorkingImage> {
        let (width, height) = match (width, height) {
            (Some(w), Some(h)) => (w, h),
            (w, h) => return self.resize(image, w, h, FitMode::Cover),
        };
        check_target(Some(width), Some(height))?;

        let source = image.image();
        let (fill_w, fill_h) = fill_dimensions(source.width(), source.height(), width, height);
        check_output(fill_w, fill_h)?;
        let filled = source.resize_exact(fill_w, fill_h, RESAMPLE_FILTER);
        let (x, y) = position.offsets(fill_w - width, fill_h - height);
        Ok(image.with_image(filled.crop_imm(x, y, width, height)))
    }

    fn extract(&self, image: &WorkingImage, region: Region) -> Result<WorkingImage> {
        if region.width == 0 || region.height == 0 {
            return Err(TransformationError::Transform(
                "extract region must not be empty".to_string(),
            ));
        }
        let fits_horizontally = region
            .left
            .checked_add(region.width)
            .is_some_and(|right| right <= image.width());
        let fits_vertically = region
            .top
            .checked_add(region.height)
            .is_some_and(|bottom| bottom <= image.height());
        if !fits_horizontally || !fits_vertically {
            return Err(TransformationError::Transform(format!(
                "region {}x{} at ({}, {}) lies outside the {}x{} image",
                region.width,
                region.height,
                region.left,
                region.top,
                image.width(),
                image.height()
            )));
        }
        let cropped = image
            .image()
            .crop_imm(region.left, region.top, region.width, region.height);
        Ok(image.with_image(cropped))
    }

    fn set_format(&self, image: &WorkingImage, format: OutputFormat) -> Result<WorkingImage> {
        Ok(WorkingImage::new(image.image().clone(), format))
    }

    fn rotate(&self, image: &WorkingImage, angle: f64) -> Result<WorkingImage> {
        if !angle.is_finite() {
            return Err(TransformationError::Transform(format!(
                "rotation angle must be finite, got {}",
                angle
            )));
        }
        let degrees = angle.rem_euclid(360.0);
        let quarter_turns = degrees / 90.0;
        let source = image.image();

        if (quarter_turns - quarter_turns.round()).abs() < 1e-9 {
            let rotated = match quarter_turns.round() as u32 % 4 {
                0 => return Ok(image.clone()),
                1 => source.rotate90(),
                2 => source.rotate180(),
                _ => source.rotate270(),
            };
            return Ok(image.with_image(rotated));
        }

        let (out_w, out_h) = rotated_dimensions(source.width(), source.height(), degrees);
        check_output(out_w, out_h)?;
        let rotated = rotate_bilinear(&source.to_rgba8(), degrees);
        Ok(image.with_image(DynamicImage::ImageRgba8(rotated)))
    }

    fn grayscale(&self, image: &WorkingImage) -> Result<WorkingImage> {
        Ok(image.with_image(image.image().grayscale()))
    }

    fn blur(&self, image: &WorkingImage, sigma: f32) -> Result<WorkingImage> {
        Ok(image.with_image(image.image().blur(sigma)))
    }

    fn sharpen(&self, image: &WorkingImage, sigma: f32) -> Result<WorkingImage> {
        Ok(image.with_image(image.image().unsharpen(sigma, SHARPEN_THRESHOLD)))
    }

    fn encode(&self, image: &WorkingImage) -> Result<Vec<u8>> {
        let format = image.format();
        let prepared = prepare_for_encode(image.image(), format);
        let mut output = Cursor::new(Vec::new());
        prepared
            .write_to(&mut output, format.image_format())
            .map_err(|e| TransformationError::Encode(format!("{}: {}", format.name(), e)))?;
        Ok(output.into_inner())
    }
}

fn check_target(width: Option<u32>, height: Option<u32>) -> Result<()> {
    for side in [width, height].into_iter().flatten() {
        if side == 0 || side > MAX_DIMENSION {
            return Err(TransformationError::Transform(format!(
                "target side {} is outside 1..={}",
                side, MAX_DIMENSION
            )));
        }
    }
    Ok(())
}

/// Rejects buffers the process could not allocate. Derived sides count too:
/// a narrow image stretched to a wide target grows a very tall side.
fn check_output(width: u32, height: u32) -> Result<()> {
    let pixels = width as u64 * height as u64;
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(TransformationError::Transform(format!(
            "output {}x{} has a side outside 1..={}",
            width, height, MAX_DIMENSION
        )));
    }
    if pixels > MAX_PIXELS {
        return Err(TransformationError::Transform(format!(
            "output {}x{} exceeds {} pixels",
            width, height, MAX_PIXELS
        )));
    }
    Ok(())
}

/// Scales one side to the requested length and the other by the same factor.
fn proportional_dimensions(
    src_w: u32,
    src_h: u32,
    width: Option<u32>,
    height: Option<u32>,
) -> (u32, u32) {
    match (width, height) {
        (Some(w), _) => {
            let h = (src_h as f64 * w as f64 / src_w as f64).round() as u32;
            (w, h.max(1))
        }
        (None, Some(h)) => {
            let w = (src_w as f64 * h as f64 / src_h as f64).round() as u32;
            (w.max(1), h)
        }
        (None, None) => (src_w, src_h),
    }
}

/// Largest aspect-preserving size that fits inside the target box.
fn contain_dimensions(src_w: u32, src_h: u32, tgt_w: u32, tgt_h: u32) -> (u32, u32) {
    let scale = (tgt_w as f64 / src_w as f64).min(tgt_h as f64 / src_h as f64);
    let w = (src_w as f64 * scale).round() as u32;
    let h = (src_h as f64 * scale).round() as u32;
    (w.clamp(1, tgt_w), h.clamp(1, tgt_h))
}

/// Smallest aspect-preserving size that covers the target box.
fn fill_dimensions(src_w: u32, src_h: u32, tgt_w: u32, tgt_h: u32) -> (u32, u32) {
    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        let w = (tgt_h as f64 * src_aspect).round() as u32;
        (w.max(tgt_w), tgt_h)
    } else {
        let h = (tgt_w as f64 / src_aspect).round() as u32;
        (tgt_w, h.max(tgt_h))
    }
}

fn prepare_for_encode(image: &DynamicImage, format: OutputFormat) -> Cow<'_, DynamicImage> {
    match (format, image) {
        (OutputFormat::Png, _) => Cow::Borrowed(image),
        (OutputFormat::Jpeg, DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_)) => {
            Cow::Borrowed(image)
        }
        (OutputFormat::Jpeg, _) => Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8())),
        (
            OutputFormat::Tiff,
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_),
        ) => Cow::Borrowed(image),
        (_, DynamicImage::ImageRgba8(_)) => Cow::Borrowed(image),
        _ => Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8())),
    }
}

/// Canvas size holding every source pixel after a rotation by `degrees`.
fn rotated_dimensions(w: u32, h: u32, degrees: f64) -> (u32, u32) {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let out_w = (w as f64 * cos.abs() + h as f64 * sin.abs()).ceil().max(1.0) as u32;
    let out_h = (w as f64 * sin.abs() + h as f64 * cos.abs()).ceil().max(1.0) as u32;
    (out_w, out_h)
}

/// Rotates clockwise onto a canvas large enough to hold every source pixel.
/// Uncovered corners are transparent.
fn rotate_bilinear(source: &RgbaImage, degrees: f64) -> RgbaImage {
    let (w, h) = source.dimensions();
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (out_w, out_h) = rotated_dimensions(w, h, degrees);

    let (src_cx, src_cy) = (w as f64 / 2.0, h as f64 / 2.0);
    let (dst_cx, dst_cy) = (out_w as f64 / 2.0, out_h as f64 / 2.0);

    ImageBuffer::from_fn(out_w, out_h, |x, y| {
        let dx = x as f64 + 0.5 - dst_cx;
        let dy = y as f64 + 0.5 - dst_cy;
        let sx = cos * dx + sin * dy + src_cx - 0.5;
        let sy = -sin * dx + cos * dy + src_cy - 0.5;
        sample_bilinear(source, sx, sy)
    })
}

fn sample_bilinear(source: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (w, h) = (source.width() as f64, source.height() as f64);
    if x <= -1.0 || y <= -1.0 || x >= w || y >= h {
        return Rgba([0, 0, 0, 0]);
    }

    let fetch = |px: f64, py: f64| -> [f64; 4] {
        if px < 0.0 || py < 0.0 || px >= w || py >= h {
            return [0.0; 4];
        }
        let pixel = source.get_pixel(px as u32, py as u32);
        [
            pixel[0] as f64,
            pixel[1] as f64,
            pixel[2] as f64,
            pixel[3] as f64,
        ]
    };

    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let top_left = fetch(x0, y0);
    let top_right = fetch(x0 + 1.0, y0);
    let bottom_left = fetch(x0, y0 + 1.0);
    let bottom_right = fetch(x0 + 1.0, y0 + 1.0);

    let mut out = [0u8; 4];
    for channel in 0..4 {
        let top = top_left[channel] * (1.0 - fx) + top_right[channel] * fx;
        let bottom = bottom_left[channel] * (1.0 - fx) + bottom_right[channel] * fx;
        out[channel] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    fn working(width: u32, height: u32) -> WorkingImage {
        let buffer = RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        WorkingImage::new(DynamicImage::ImageRgb8(buffer), OutputFormat::Png)
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        RustCodec::new().encode(&working(width, height)).unwrap()
    }

    #[test]
    fn test_decode_detects_format() {
        let codec = RustCodec::new();
        let decoded = codec.decode(&png_bytes(6, 4)).unwrap();
        assert_eq!(decoded.format(), OutputFormat::Png);
        assert_eq!((decoded.width(), decoded.height()), (6, 4));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let codec = RustCodec::new();
        assert!(matches!(
            codec.decode(b"definitely not an image"),
            Err(TransformationError::Decode(_))
        ));
        assert!(matches!(codec.decode(&[]), Err(TransformationError::Decode(_))));
    }

    #[test]
    fn test_resize_cover_is_exact() {
        let codec = RustCodec::new();
        let out = codec
            .resize(&working(40, 20), Some(10), Some(10), FitMode::Cover)
            .unwrap();
        assert_eq!((out.width(), out.height()), (10, 10));
    }

    #[test]
    fn test_resize_contain_keeps_aspect() {
        let codec = RustCodec::new();
        let out = codec
            .resize(&working(40, 20), Some(10), Some(10), FitMode::Contain)
            .unwrap();
        assert_eq!((out.width(), out.height()), (10, 5));
    }

    #[test]
    fn test_resize_single_side_is_proportional() {
        let codec = RustCodec::new();
        let out = codec
            .resize(&working(40, 20), Some(20), None, FitMode::Cover)
            .unwrap();
        assert_eq!((out.width(), out.height()), (20, 10));

        let out = codec
            .resize(&working(40, 20), None, Some(5), FitMode::Cover)
            .unwrap();
        assert_eq!((out.width(), out.height()), (10, 5));
    }

    #[test]
    fn test_resize_without_target_is_identity() {
        let codec = RustCodec::new();
        let input = working(8, 8);
        let out = codec.resize(&input, None, None, FitMode::Cover).unwrap();
        assert_eq!(out.image().as_bytes(), input.image().as_bytes());
    }

    #[test]
    fn test_resize_rejects_oversized_target() {
        let codec = RustCodec::new();
        let result = codec.resize(&working(8, 8), Some(MAX_DIMENSION + 1), None, FitMode::Cover);
        assert!(matches!(result, Err(TransformationError::Transform(_))));
    }

    #[test]
    fn test_resize_rejects_oversized_derived_side() {
        let codec = RustCodec::new();
        let tall = working(1, 2000);

        let result = codec.resize(&tall, Some(MAX_DIMENSION), None, FitMode::Cover);
        assert!(matches!(result, Err(TransformationError::Transform(_))));

        let result = codec.resize(&tall, Some(MAX_DIMENSION), Some(1), FitMode::Cover);
        assert!(matches!(result, Err(TransformationError::Transform(_))));

        let result = codec.resize(&tall, Some(MAX_DIMENSION), Some(MAX_DIMENSION), FitMode::Fill);
        assert!(matches!(result, Err(TransformationError::Transform(_))));
    }

    #[test]
    fn test_crop_rejects_oversized_intermediate() {
        let codec = RustCodec::new();
        let tall = working(1, 2000);

        let result = codec.crop(&tall, Some(MAX_DIMENSION), Some(1), CropPosition::Center);
        assert!(matches!(result, Err(TransformationError::Transform(_))));

        let result = codec.crop(&tall, Some(MAX_DIMENSION), None, CropPosition::Center);
        assert!(matches!(result, Err(TransformationError::Transform(_))));
    }

    #[test]
    fn test_rotate_rejects_oversized_canvas() {
        let codec = RustCodec::new();
        let result = codec.rotate(&working(12_000, 1), 45.0);
        assert!(matches!(result, Err(TransformationError::Transform(_))));
    }

    #[test]
    fn test_size_limits() {
        assert!(check_output(MAX_DIMENSION, 1).is_ok());
        assert!(check_output(8192, 8192).is_ok());
        assert!(check_output(MAX_DIMENSION, MAX_DIMENSION).is_err());
        assert!(check_output(MAX_DIMENSION + 1, 1).is_err());
        assert_eq!(contain_dimensions(100, 50, 10, 10), (10, 5));
        assert_eq!(rotated_dimensions(10, 10, 45.0), (15, 15));
    }

    #[test]
    fn test_crop_anchor_selects_side() {
        let codec = RustCodec::new();
        // Left half red, right half blue; a square crop anchored left keeps red.
        let left = codec
            .crop(&working(20, 10), Some(10), Some(10), CropPosition::Left)
            .unwrap();
        assert_eq!((left.width(), left.height()), (10, 10));
        let pixel = left.image().get_pixel(5, 5);
        assert!(pixel[0] > 200 && pixel[2] < 50);

        let right = codec
            .crop(&working(20, 10), Some(10), Some(10), CropPosition::Right)
            .unwrap();
        let pixel = right.image().get_pixel(5, 5);
        assert!(pixel[2] > 200 && pixel[0] < 50);
    }

    #[test]
    fn test_extract_region_bounds() {
        let codec = RustCodec::new();
        let region = Region {
            left: 2,
            top: 1,
            width: 4,
            height: 3,
        };
        let out = codec.extract(&working(10, 10), region).unwrap();
        assert_eq!((out.width(), out.height()), (4, 3));

        let outside = Region {
            left: 8,
            top: 0,
            width: 4,
            height: 3,
        };
        assert!(codec.extract(&working(10, 10), outside).is_err());
    }

    #[test]
    fn test_rotate_right_angles_swap_dimensions() {
        let codec = RustCodec::new();
        let out = codec.rotate(&working(6, 4), 90.0).unwrap();
        assert_eq!((out.width(), out.height()), (4, 6));
        let out = codec.rotate(&working(6, 4), -270.0).unwrap();
        assert_eq!((out.width(), out.height()), (4, 6));
        let out = codec.rotate(&working(6, 4), 360.0).unwrap();
        assert_eq!((out.width(), out.height()), (6, 4));
    }

    #[test]
    fn test_rotate_arbitrary_expands_canvas() {
        let codec = RustCodec::new();
        let out = codec.rotate(&working(10, 10), 45.0).unwrap();
        assert_eq!(out.width(), 15);
        assert_eq!(out.height(), 15);
        // Corners fall outside the source and stay transparent.
        assert_eq!(out.image().get_pixel(0, 0)[3], 0);
        assert_eq!(out.image().get_pixel(7, 7)[3], 255);
    }

    #[test]
    fn test_rotate_rejects_non_finite_angle() {
        let codec = RustCodec::new();
        assert!(codec.rotate(&working(4, 4), f64::NAN).is_err());
    }

    #[test]
    fn test_encode_jpeg_drops_alpha() {
        let codec = RustCodec::new();
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 128])));
        let image = WorkingImage::new(rgba, OutputFormat::Jpeg);
        let bytes = codec.encode(&image).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
    }

    #[test]
    fn test_set_format_changes_encoding_only() {
        let codec = RustCodec::new();
        let input = working(5, 5);
        let out = codec.set_format(&input, OutputFormat::WebP).unwrap();
        assert_eq!(out.format(), OutputFormat::WebP);
        assert_eq!(out.image().as_bytes(), input.image().as_bytes());

        let bytes = codec.encode(&out).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::WebP);
    }

    #[test]
    fn test_fill_dimensions_cover_target() {
        assert_eq!(fill_dimensions(40, 20, 10, 10), (20, 10));
        assert_eq!(fill_dimensions(20, 40, 10, 10), (10, 20));
        assert_eq!(fill_dimensions(10, 10, 5, 5), (5, 5));
    }
}
