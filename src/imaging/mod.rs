//! Image transforms, pure Rust.
//!
//! | Step | Crate / function |
//! |---|---|
//! | **Decode + auto-orient** | `image::ImageReader` + EXIF orientation |
//! | **Fill** | cover resize + centre `crop_imm` |
//! | **Fit** | bounded resize, never upscaled |
//! | **Encode** | `JpegEncoder` at the kind's quality |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing a transform
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use params::{Fit, Quality, ResizeFilter, TransformParams};
pub use rust_backend::RustBackend;
