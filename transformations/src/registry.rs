//! The closed set of operation kinds and their transform functions.

use crate::codec::{CropPosition, FitMode, ImageCodec, OutputFormat, Region, WorkingImage};
use crate::error::{Result, TransformationError};
use crate::params::OperationParams;
use std::fmt;

/// A pure transform: reads the input image and the node's parameters,
/// returns a new image through the codec.
pub type TransformFn = fn(&dyn ImageCodec, &WorkingImage, &OperationParams) -> Result<WorkingImage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Resize,
    Crop,
    Format,
    Rotate,
    Filter,
}

const REGISTRY: &[(&str, OperationKind)] = &[
    ("resize", OperationKind::Resize),
    ("crop", OperationKind::Crop),
    ("format", OperationKind::Format),
    ("rotate", OperationKind::Rotate),
    ("filter", OperationKind::Filter),
];

const DEFAULT_SIGMA: f64 = 1.0;

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Resize,
        OperationKind::Crop,
        OperationKind::Format,
        OperationKind::Rotate,
        OperationKind::Filter,
    ];

    /// Case-insensitive lookup by operation type name.
    pub fn lookup(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        REGISTRY
            .iter()
            .find(|(registered, _)| *registered == name)
            .map(|(_, kind)| *kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Resize => "resize",
            Self::Crop => "crop",
            Self::Format => "format",
            Self::Rotate => "rotate",
            Self::Filter => "filter",
        }
    }

    pub fn transform(self) -> TransformFn {
        match self {
            Self::Resize => apply_resize,
            Self::Crop => apply_crop,
            Self::Format => apply_format,
            Self::Rotate => apply_rotate,
            Self::Filter => apply_filter,
        }
    }

    pub fn apply(
        self,
        codec: &dyn ImageCodec,
        image: &WorkingImage,
        params: &OperationParams,
    ) -> Result<WorkingImage> {
        (self.transform())(codec, image, params)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn apply_resize(
    codec: &dyn ImageCodec,
    image: &WorkingImage,
    params: &OperationParams,
) -> Result<WorkingImage> {
    let width = params.dimension("width")?;
    let height = params.dimension("height")?;
    let fit = match params.text("fit")? {
        None => FitMode::default(),
        Some(name) => FitMode::from_name(name).ok_or_else(|| {
            TransformationError::invalid_param("fit", format!("unknown fit mode '{}'", name))
        })?,
    };
    codec.resize(image, width, height, fit)
}

fn apply_crop(
    codec: &dyn ImageCodec,
    image: &WorkingImage,
    params: &OperationParams,
) -> Result<WorkingImage> {
    let width = params.dimension("width")?;
    let height = params.dimension("height")?;

    match (params.offset("left")?, params.offset("top")?) {
        (Some(left), Some(top)) => {
            let (width, height) = width.zip(height).ok_or_else(|| {
                TransformationError::invalid_param(
                    "width",
                    "width and height are required with left/top",
                )
            })?;
            codec.extract(
                image,
                Region {
                    left,
                    top,
                    width,
                    height,
                },
            )
        }
        (Some(_), None) => Err(TransformationError::invalid_param(
            "top",
            "left and top must be given together",
        )),
        (None, Some(_)) => Err(TransformationError::invalid_param(
            "left",
            "left and top must be given together",
        )),
        (None, None) => {
            let position = match params.text("position")? {
                None => CropPosition::default(),
                Some(name) => CropPosition::from_name(name).ok_or_else(|| {
                    TransformationError::invalid_param(
                        "position",
                        format!("unknown position '{}'", name),
                    )
                })?,
            };
            codec.crop(image, width, height, position)
        }
    }
}

fn apply_format(
    codec: &dyn ImageCodec,
    image: &WorkingImage,
    params: &OperationParams,
) -> Result<WorkingImage> {
    let name = params.text("format")?.unwrap_or("png");
    let format = OutputFormat::from_name(name).ok_or_else(|| {
        TransformationError::invalid_param("format", format!("unsupported format '{}'", name))
    })?;
    codec.set_format(image, format)
}

fn apply_rotate(
    codec: &dyn ImageCodec,
    image: &WorkingImage,
    params: &OperationParams,
) -> Result<WorkingImage> {
    let angle = params.number("angle")?.unwrap_or(0.0);
    codec.rotate(image, angle)
}

fn apply_filter(
    codec: &dyn ImageCodec,
    image: &WorkingImage,
    params: &OperationParams,
) -> Result<WorkingImage> {
    // Unknown or missing filter names pass the image through.
    let filter = params
        .get("filterType")
        .and_then(|value| value.as_str())
        .map(|name| name.trim().to_ascii_lowercase());

    match filter.as_deref() {
        Some("grayscale") | Some("greyscale") => codec.grayscale(image),
        Some("blur") => codec.blur(image, sigma(params)?),
        Some("sharpen") => codec.sharpen(image, sigma(params)?),
        _ => Ok(image.clone()),
    }
}

fn sigma(params: &OperationParams) -> Result<f32> {
    let sigma = params.number("sigma")?.unwrap_or(DEFAULT_SIGMA);
    if sigma <= 0.0 || sigma > 1000.0 {
        return Err(TransformationError::invalid_param(
            "sigma",
            "must be within (0, 1000]",
        ));
    }
    Ok(sigma as f32)
}
