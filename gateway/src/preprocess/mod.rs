//! Input and output preprocessing.
//!
//! The gateway never looks inside payloads itself. It hands caller input to an
//! [`InputPreprocessor`] to obtain the wire payload, and hands raw backend output
//! to an [`OutputPreprocessor`] to obtain the caller-facing result. Alternate
//! encodings or label sets plug in here without touching the dispatch logic.

mod image_input;
mod labels;

pub use image_input::ImageInputPreprocessor;
pub use labels::{LabelOutputPreprocessor, UNKNOWN_LABEL};

use std::sync::Arc;

use procapi_common::{InputData, OutputData};
use thiserror::Error;

/// Reasons caller input cannot be turned into a backend payload.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("img64 is not valid base64: {0}")]
    Base64(String),
    #[error("Unsupported or corrupt image: {0}")]
    Image(String),
    #[error("Failed to encode payload: {0}")]
    Encode(String),
}

/// Turns caller input into the payload string the backend expects.
pub trait InputPreprocessor: Send + Sync {
    fn encode_input(&self, input: &InputData) -> Result<String, PreprocessError>;
}

/// Turns a raw backend output string into the caller-facing result.
///
/// Must be total: values it does not recognise map to a sentinel result.
pub trait OutputPreprocessor: Send + Sync {
    fn decode_output(&self, raw: &str) -> OutputData;
}

/// The input and output halves used by a gateway instance.
#[derive(Clone)]
pub struct PredictionPipeline {
    pub input: Arc<dyn InputPreprocessor>,
    pub output: Arc<dyn OutputPreprocessor>,
}

impl PredictionPipeline {
    pub fn new(input: Arc<dyn InputPreprocessor>, output: Arc<dyn OutputPreprocessor>) -> Self {
        Self { input, output }
    }
}

impl Default for PredictionPipeline {
    /// Image classification: grayscale 256x256 JPEG in, cat/dog labels out.
    fn default() -> Self {
        Self::new(
            Arc::new(ImageInputPreprocessor::default()),
            Arc::new(LabelOutputPreprocessor::default()),
        )
    }
}
