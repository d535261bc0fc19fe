//! The image codec capability consumed by operation nodes.
//!
//! Nodes never touch pixels directly. Every transform goes through an
//! [`ImageCodec`], which owns decoding, the per-operation primitives and the
//! final encode. [`RustCodec`](crate::rust_codec::RustCodec) is the
//! production implementation; tests wrap it to observe calls.

use crate::error::Result;
use image::{DynamicImage, ImageFormat};

/// Encodings a working image can be serialized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Png,
    Jpeg,
    WebP,
    Gif,
    Tiff,
    Bmp,
}

impl OutputFormat {
    /// Parses a user-supplied format name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "webp" => Some(Self::WebP),
            "gif" => Some(Self::Gif),
            "tiff" | "tif" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::WebP => Some(Self::WebP),
            ImageFormat::Gif => Some(Self::Gif),
            ImageFormat::Tiff => Some(Self::Tiff),
            ImageFormat::Bmp => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::WebP => ImageFormat::WebP,
            Self::Gif => ImageFormat::Gif,
            Self::Tiff => ImageFormat::Tiff,
            Self::Bmp => ImageFormat::Bmp,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::WebP => "webp",
            Self::Gif => "gif",
            Self::Tiff => "tiff",
            Self::Bmp => "bmp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
            Self::Gif => "image/gif",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
        }
    }
}

/// How a resize treats the requested box when both sides are given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FitMode {
    /// Cover the box, then crop the overflow so the output is exactly the box.
    #[default]
    Cover,
    /// Fit inside the box, preserving aspect ratio.
    Contain,
    /// Stretch to the box, ignoring aspect ratio.
    Fill,
}

impl FitMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cover" => Some(Self::Cover),
            "contain" | "inside" => Some(Self::Contain),
            "fill" => Some(Self::Fill),
            _ => None,
        }
    }
}

/// Anchor kept in view when a cover-resize crops the overflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CropPosition {
    #[default]
    Center,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl CropPosition {
    /// Accepts plain anchors (`top-left`), compass names (`northwest`) and
    /// the two-word form (`left top`).
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "center" | "centre" => Some(Self::Center),
            "top" | "north" => Some(Self::Top),
            "bottom" | "south" => Some(Self::Bottom),
            "left" | "west" => Some(Self::Left),
            "right" | "east" => Some(Self::Right),
            "top-left" | "left-top" | "northwest" => Some(Self::TopLeft),
            "top-right" | "right-top" | "northeast" => Some(Self::TopRight),
            "bottom-left" | "left-bottom" | "southwest" => Some(Self::BottomLeft),
            "bottom-right" | "right-bottom" | "southeast" => Some(Self::BottomRight),
            _ => None,
        }
    }

    /// Offset of the kept window given how much the image overflows the box.
    pub fn offsets(self, excess_width: u32, excess_height: u32) -> (u32, u32) {
        let x = match self {
            Self::Left | Self::TopLeft | Self::BottomLeft => 0,
            Self::Right | Self::TopRight | Self::BottomRight => excess_width,
            Self::Center | Self::Top | Self::Bottom => excess_width / 2,
        };
        let y = match self {
            Self::Top | Self::TopLeft | Self::TopRight => 0,
            Self::Bottom | Self::BottomLeft | Self::BottomRight => excess_height,
            Self::Center | Self::Left | Self::Right => excess_height / 2,
        };
        (x, y)
    }
}

/// An explicit rectangle inside the image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// A decoded image plus the encoding it will eventually be written as.
#[derive(Debug, Clone)]
pub struct WorkingImage {
    image: DynamicImage,
    format: OutputFormat,
}

impl WorkingImage {
    pub fn new(image: DynamicImage, format: OutputFormat) -> Self {
        Self { image, format }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Same target format, new pixels.
    pub fn with_image(&self, image: DynamicImage) -> Self {
        Self {
            image,
            format: self.format,
        }
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

/// Decode, per-operation primitives and encode.
///
/// Primitives borrow their input and return a new image so a failed step
/// still has the untouched input to fall back on.
pub trait ImageCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<WorkingImage>;

    fn resize(
        &self,
        image: &WorkingImage,
        width: Option<u32>,
        height: Option<u32>,
        fit: FitMode,
    ) -> Result<WorkingImage>;

    fn crop(
        &self,
        image: &WorkingImage,
        width: Option<u32>,
        height: Option<u32>,
        position: CropPosition,
    ) -> Result<WorkingImage>;

    fn extract(&self, image: &WorkingImage, region: Region) -> Result<WorkingImage>;

    fn set_format(&self, image: &WorkingImage, format: OutputFormat) -> Result<WorkingImage>;

    /// Rotates clockwise by `angle` degrees.
    fn rotate(&self, image: &WorkingImage, angle: f64) -> Result<WorkingImage>;

    fn grayscale(&self, image: &WorkingImage) -> Result<WorkingImage>;

    fn blur(&self, image: &WorkingImage, sigma: f32) -> Result<WorkingImage>;

    fn sharpen(&self, image: &WorkingImage, sigma: f32) -> Result<WorkingImage>;

    fn encode(&self, image: &WorkingImage) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_names() {
        assert_eq!(OutputFormat::from_name("WEBP"), Some(OutputFormat::WebP));
        assert_eq!(OutputFormat::from_name("jpg"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_name(" png "), Some(OutputFormat::Png));
        assert_eq!(OutputFormat::from_name("heic"), None);
        assert_eq!(OutputFormat::Jpeg.mime_type(), "image/jpeg");
    }

    #[test]
    fn test_output_format_image_format_mapping() {
        for format in [
            OutputFormat::Png,
            OutputFormat::Jpeg,
            OutputFormat::WebP,
            OutputFormat::Gif,
            OutputFormat::Tiff,
            OutputFormat::Bmp,
        ] {
            assert_eq!(OutputFormat::from_image_format(format.image_format()), Some(format));
        }
        assert_eq!(OutputFormat::from_image_format(ImageFormat::Ico), None);
    }

    #[test]
    fn test_crop_position_aliases() {
        assert_eq!(CropPosition::from_name("centre"), Some(CropPosition::Center));
        assert_eq!(CropPosition::from_name("left top"), Some(CropPosition::TopLeft));
        assert_eq!(CropPosition::from_name("SouthEast"), Some(CropPosition::BottomRight));
        assert_eq!(CropPosition::from_name("right_bottom"), Some(CropPosition::BottomRight));
        assert_eq!(CropPosition::from_name("middle"), None);
    }

    #[test]
    fn test_crop_position_offsets() {
        assert_eq!(CropPosition::Center.offsets(10, 4), (5, 2));
        assert_eq!(CropPosition::TopLeft.offsets(10, 4), (0, 0));
        assert_eq!(CropPosition::BottomRight.offsets(10, 4), (10, 4));
        assert_eq!(CropPosition::Top.offsets(10, 4), (5, 0));
        assert_eq!(CropPosition::Right.offsets(10, 4), (10, 2));
    }

    #[test]
    fn test_fit_mode_defaults_to_cover() {
        assert_eq!(FitMode::default(), FitMode::Cover);
        assert_eq!(FitMode::from_name("inside"), Some(FitMode::Contain));
        assert_eq!(FitMode::from_name("stretch"), None);
    }
}
