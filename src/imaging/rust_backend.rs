//! Pure Rust transform backend built on the `image` crate.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Step | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::ImageReader` with guessed format |
//! | Auto-orient | `ImageDecoder::orientation` + `DynamicImage::apply_orientation` |
//! | Resize | `image::imageops::resize` with the configured filter |
//! | Gamma-correct resize | same, on an `Rgb32F` buffer converted to linear light |
//! | Fill crop | `DynamicImage::crop_imm` centred on the resized image |
//! | Colour normalization | `DynamicImage::to_rgb8` (8-bit sRGB, alpha dropped) |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::{
    calculate_center_crop, calculate_fill_dimensions, calculate_fit_dimensions,
};
use super::params::{Fit, Quality, TransformParams};
use image::codecs::jpeg::JpegEncoder;
use image::metadata::Orientation;
use image::{DynamicImage, ImageBuffer, ImageDecoder, ImageReader, Rgb};
use std::path::Path;
use tracing::instrument;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-step mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode an image and rotate/flip it upright according to its EXIF
/// orientation. Sniffs the format from content, so cache files keep working
/// even when their extension lies.
fn load_oriented(path: &Path) -> Result<DynamicImage, BackendError> {
    let decode_err = |e: image::ImageError| {
        BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
    };
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()
        .map_err(decode_err)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    img.apply_orientation(orientation);
    Ok(img)
}

fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f32) -> f32 {
    let v = v.clamp(0.0, 1.0);
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

fn resample(img: &DynamicImage, size: (u32, u32), params: &TransformParams) -> DynamicImage {
    let filter = params.filter.filter_type();
    if !params.gamma_correct {
        return img.resize_exact(size.0, size.1, filter);
    }

    let mut linear: ImageBuffer<Rgb<f32>, Vec<f32>> = img.to_rgb32f();
    for value in linear.iter_mut() {
        *value = srgb_to_linear(*value);
    }
    let mut resized = image::imageops::resize(&linear, size.0, size.1, filter);
    for value in resized.iter_mut() {
        *value = linear_to_srgb(*value);
    }
    DynamicImage::ImageRgb32F(resized)
}

fn save_jpeg(img: &DynamicImage, path: &Path, quality: Quality) -> Result<(), BackendError> {
    let file = std::fs::File::create(path)?;
    let writer = std::io::BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(writer, quality.as_u8());
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {}", e)))
}

impl ImageBackend for RustBackend {
    #[instrument(skip_all, fields(input = %input.display()))]
    fn transform(
        &self,
        input: &Path,
        output: &Path,
        params: &TransformParams,
    ) -> Result<Dimensions, BackendError> {
        if params.width == 0 || params.height == 0 {
            return Err(BackendError::ProcessingFailed(
                "target dimensions must be non-zero".into(),
            ));
        }
        let img = load_oriented(input)?;
        let source = (img.width(), img.height());
        let target = (params.width, params.height);

        let final_img = match params.fit {
            Fit::Fill => {
                let filled = calculate_fill_dimensions(source, target);
                let resized = if filled == source {
                    img
                } else {
                    resample(&img, filled, params)
                };
                let (x, y) = calculate_center_crop(filled, target);
                resized.crop_imm(x, y, target.0, target.1)
            }
            Fit::Fit => {
                let fitted = calculate_fit_dimensions(source, target);
                if fitted == source {
                    img
                } else {
                    resample(&img, fitted, params)
                }
            }
        };

        save_jpeg(&final_img, output, params.quality)?;
        Ok(Dimensions {
            width: final_img.width(),
            height: final_img.height(),
        })
    }

    fn name(&self) -> &'static str {
        "rust"
    }
}
