//! Image transform backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the transform collaborator: it takes a local
//! input file plus [`TransformParams`] and writes a local output file, or
//! fails. The engine treats the parameters as opaque.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Backends are synchronous; the pipeline runs them on tokio's
//! blocking pool.

use super::params::TransformParams;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Pixel dimensions of a written output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image transform backends.
pub trait ImageBackend: Send + Sync {
    /// Decode `input`, apply `params`, and write a JPEG to `output`.
    ///
    /// `output` already exists as an empty temporary file; implementations
    /// overwrite it.
    fn transform(
        &self,
        input: &Path,
        output: &Path,
        params: &TransformParams,
    ) -> Result<Dimensions, BackendError>;

    /// Short identifier for logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::params::{Fit, Quality, ResizeFilter};
    use std::sync::Mutex;

    /// Mock backend that records operations without executing them.
    /// Uses Mutex (not RefCell) so it is Sync and can be shared across tasks.
    #[derive(Default)]
    pub struct MockBackend {
        pub operations: Mutex<Vec<RecordedOp>>,
        /// Inputs whose file name contains this marker fail.
        pub fail_marker: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedOp {
        pub input: String,
        pub width: u32,
        pub height: u32,
        pub quality: u32,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_on(marker: &str) -> Self {
            Self {
                fail_marker: Some(marker.to_string()),
                ..Self::default()
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }
    }

    impl ImageBackend for MockBackend {
        fn transform(
            &self,
            input: &Path,
            output: &Path,
            params: &TransformParams,
        ) -> Result<Dimensions, BackendError> {
            let input_name = input.to_string_lossy().to_string();
            self.operations.lock().unwrap().push(RecordedOp {
                input: input_name.clone(),
                width: params.width,
                height: params.height,
                quality: params.quality.value(),
            });
            if let Some(marker) = &self.fail_marker {
                if input_name.contains(marker.as_str()) {
                    return Err(BackendError::ProcessingFailed(format!(
                        "mock failure for {input_name}"
                    )));
                }
            }
            std::fs::write(output, format!("{}x{}", params.width, params.height))?;
            Ok(Dimensions {
                width: params.width,
                height: params.height,
            })
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    fn params() -> TransformParams {
        TransformParams {
            width: 200,
            height: 200,
            quality: Quality::new(80),
            fit: Fit::Fill,
            filter: ResizeFilter::Lanczos3,
            gamma_correct: false,
        }
    }

    #[test]
    fn mock_records_transform() {
        let tmp = tempfile::TempDir::new().unwrap();
        let output = tmp.path().join("out.jpg");
        let backend = MockBackend::new();

        let dims = backend
            .transform(Path::new("/cache/abc.jpg"), &output, &params())
            .unwrap();
        assert_eq!(dims, Dimensions { width: 200, height: 200 });
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "200x200");

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].input, "/cache/abc.jpg");
        assert_eq!(ops[0].quality, 80);
    }

    #[test]
    fn mock_fails_on_marker() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = MockBackend::failing_on("bad");
        let result = backend.transform(
            Path::new("/cache/bad.jpg"),
            &tmp.path().join("out.jpg"),
            &params(),
        );
        assert!(matches!(result, Err(BackendError::ProcessingFailed(_))));
        assert_eq!(backend.get_operations().len(), 1);
    }
}
