//! Parameter types for image transforms.
//!
//! These describe *what* a derived artifact should look like, not *how* the
//! pixels get there. The pipeline builds a [`TransformParams`] from each
//! configured kind and hands it to an [`ImageBackend`](super::ImageBackend);
//! the engine itself never interprets the values.
//!
//! ## Types
//!
//! - [`Quality`]: JPEG quality (1-100, default 85). Clamped on construction.
//! - [`Fit`]: `fill` covers the box and centre-crops, `fit` stays inside it.
//! - [`ResizeFilter`]: resampling kernel, mapped onto `image::imageops::FilterType`.
//! - [`TransformParams`]: everything the backend needs for one transform.

use crate::config::KindConfig;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Quality as the encoder expects it.
    pub fn as_u8(self) -> u8 {
        self.0.clamp(1, 100) as u8
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// How the source is mapped onto the target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Fit {
    /// Cover the whole box, then centre-crop to exactly `width x height`.
    #[default]
    Fill,
    /// Scale down to fit inside the box. Never upscales.
    Fit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    #[default]
    Lanczos3,
}

impl ResizeFilter {
    pub fn filter_type(self) -> FilterType {
        match self {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// One transform: decode, auto-orient, resize, encode as JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformParams {
    pub width: u32,
    pub height: u32,
    pub quality: Quality,
    pub fit: Fit,
    pub filter: ResizeFilter,
    /// Resample in linear light rather than on sRGB-encoded values.
    pub gamma_correct: bool,
}

impl From<&KindConfig> for TransformParams {
    fn from(kind: &KindConfig) -> Self {
        Self {
            width: kind.width,
            height: kind.height,
            quality: Quality::new(kind.quality),
            fit: kind.fit,
            filter: kind.filter,
            gamma_correct: kind.gamma_correct,
        }
    }
}
