//! Caller-facing prediction types.

use serde::{Deserialize, Serialize};

/// Body of `POST /prediction/short` and `POST /prediction/long`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputData {
    /// Base64-encoded image.
    pub img64: String,
}

/// Postprocessed prediction returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputData {
    pub result_class: String,
}

impl OutputData {
    pub fn new(result_class: impl Into<String>) -> Self {
        Self {
            result_class: result_class.into(),
        }
    }
}
