use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::imageops::FilterType;
use image::ImageFormat;
use procapi_common::InputData;

use super::{InputPreprocessor, PreprocessError};

const WIDTH: u32 = 256;
const HEIGHT: u32 = 256;

/// Resizes the submitted image to a fixed grayscale JPEG, base64-encoded.
#[derive(Debug, Clone)]
pub struct ImageInputPreprocessor {
    width: u32,
    height: u32,
}

impl Default for ImageInputPreprocessor {
    fn default() -> Self {
        Self {
            width: WIDTH,
            height: HEIGHT,
        }
    }
}

impl ImageInputPreprocessor {
    pub fn with_size(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl InputPreprocessor for ImageInputPreprocessor {
    fn encode_input(&self, input: &InputData) -> Result<String, PreprocessError> {
        let bytes = STANDARD
            .decode(input.img64.trim())
            .map_err(|e| PreprocessError::Base64(e.to_string()))?;

        let img = image::load_from_memory(&bytes)
            .map_err(|e| PreprocessError::Image(e.to_string()))?
            .resize_exact(self.width, self.height, FilterType::Nearest)
            .grayscale();

        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
            .map_err(|e| PreprocessError::Encode(e.to_string()))?;

        Ok(STANDARD.encode(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::png_base64;

    #[test]
    fn test_encodes_grayscale_jpeg_at_target_size() {
        let input = InputData {
            img64: png_base64(32, 16),
        };
        let payload = ImageInputPreprocessor::default().encode_input(&input).unwrap();

        let jpeg = STANDARD.decode(payload).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), WIDTH);
        assert_eq!(decoded.height(), HEIGHT);
        assert_eq!(decoded.color(), image::ColorType::L8);
    }

    #[test]
    fn test_custom_size() {
        let input = InputData {
            img64: png_base64(8, 8),
        };
        let payload = ImageInputPreprocessor::with_size(4, 2)
            .encode_input(&input)
            .unwrap();
        let decoded = image::load_from_memory(&STANDARD.decode(payload).unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 2));
    }

    #[test]
    fn test_rejects_invalid_base64() {
        let input = InputData {
            img64: "not base64 !!".to_string(),
        };
        let err = ImageInputPreprocessor::default().encode_input(&input).unwrap_err();
        assert!(matches!(err, PreprocessError::Base64(_)));
    }

    #[test]
    fn test_rejects_non_image_bytes() {
        let input = InputData {
            img64: STANDARD.encode(b"definitely not an image"),
        };
        let err = ImageInputPreprocessor::default().encode_input(&input).unwrap_err();
        assert!(matches!(err, PreprocessError::Image(_)));
    }
}
