//! Request payload adaptation.
//!
//! Turns the raw JSON `input` into the representation the declared task
//! expects. Text is bounded in size before anything else looks at it.

use crate::config::{LimitsConfig, DEFAULT_MAX_TEXT_BYTES};
use crate::error::PreprocessError;
use crate::models::NormalizedInput;
use crate::types::{InputSize, ModelType, TaskConfig};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use serde_json::Value;
use tracing::debug;

const DATA_URI_PREFIX: &str = "data:image/";
const BASE64_MARKER: &str = ";base64,";

/// Preprocessor bound to the configured input limits
#[derive(Debug, Clone)]
pub struct Preprocessor {
    max_text_bytes: usize,
}

impl Preprocessor {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            max_text_bytes: limits.max_text_bytes,
        }
    }

    pub fn preprocess(
        &self,
        payload: &Value,
        task: &TaskConfig,
    ) -> Result<NormalizedInput, PreprocessError> {
        task.validate()?;

        let input = match task.model_type {
            ModelType::TextClassification => NormalizedInput::Text(self.text(payload)?),
            ModelType::ImageClassification => image_tensor(payload, task.input_size)?,
            ModelType::Regression => NormalizedInput::Numeric(numeric(payload)?),
            ModelType::Other => {
                if let Value::String(text) = payload {
                    self.check_size(text)?;
                }
                NormalizedInput::Raw(payload.clone())
            }
        };

        debug!(model_type = %task.model_type, input = input.kind(), "Payload preprocessed");
        Ok(input)
    }

    /// Bare string or `{ "text": ... }`, returned unchanged
    fn text(&self, payload: &Value) -> Result<String, PreprocessError> {
        let text = match payload {
            Value::String(text) => text,
            Value::Object(fields) => match fields.get("text") {
                Some(Value::String(text)) => text,
                _ => {
                    return Err(PreprocessError::InvalidPayloadShape(
                        "expected an object with a string 'text' field".to_string(),
                    ))
                }
            },
            other => {
                return Err(PreprocessError::InvalidPayloadShape(format!(
                    "expected text, got {}",
                    describe(other)
                )))
            }
        };
        self.check_size(text)?;
        Ok(text.clone())
    }

    fn check_size(&self, text: &str) -> Result<(), PreprocessError> {
        if text.len() > self.max_text_bytes {
            return Err(PreprocessError::OversizedInput {
                size: text.len(),
                limit: self.max_text_bytes,
            });
        }
        Ok(())
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            max_text_bytes: DEFAULT_MAX_TEXT_BYTES,
        }
    }
}

/// Preprocess with the default limits
pub fn preprocess(payload: &Value, task: &TaskConfig) -> Result<NormalizedInput, PreprocessError> {
    Preprocessor::default().preprocess(payload, task)
}

/// Decode a `data:image/<fmt>;base64,<data>` URI into a `[3, H, W]` tensor in [0, 1]
fn image_tensor(payload: &Value, size: InputSize) -> Result<NormalizedInput, PreprocessError> {
    let Value::String(uri) = payload else {
        return Err(PreprocessError::InvalidImageFormat(format!(
            "expected a data URI string, got {}",
            describe(payload)
        )));
    };
    let Some(rest) = uri.strip_prefix(DATA_URI_PREFIX) else {
        return Err(PreprocessError::InvalidImageFormat(
            "image input must be a base64 data URI starting with 'data:image/'".to_string(),
        ));
    };
    let Some((format, encoded)) = rest.split_once(BASE64_MARKER) else {
        return Err(PreprocessError::InvalidImageFormat(
            "data URI is not base64 encoded".to_string(),
        ));
    };

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| PreprocessError::InvalidImageFormat(format!("bad base64 data: {}", e)))?;
    let decoded = image::load_from_memory(&bytes).map_err(|e| {
        PreprocessError::InvalidImageFormat(format!("cannot decode image/{}: {}", format, e))
    })?;

    let (width, height) = (size.width, size.height);
    let rgb = decoded
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8();

    let plane = (width as usize) * (height as usize);
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = (y as usize) * (width as usize) + x as usize;
        for channel in 0..3 {
            data[channel * plane + offset] = pixel[channel] as f32 / 255.0;
        }
    }

    debug!(
        format = format,
        source_width = decoded.width(),
        source_height = decoded.height(),
        target = %size,
        "Image decoded"
    );

    Ok(NormalizedInput::Tensor {
        shape: vec![3, height as usize, width as usize],
        data,
    })
}

fn numeric(payload: &Value) -> Result<Vec<f32>, PreprocessError> {
    let Value::Array(items) = payload else {
        return Err(PreprocessError::InvalidPayloadShape(format!(
            "expected a numeric array, got {}",
            describe(payload)
        )));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_f64().map(|v| v as f32).ok_or_else(|| {
                PreprocessError::InvalidPayloadShape(format!(
                    "element {} is {}, not a number",
                    i,
                    describe(item)
                ))
            })
        })
        .collect()
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use serde_json::json;
    use std::io::Cursor;

    fn text_task() -> TaskConfig {
        TaskConfig::new(ModelType::TextClassification)
    }

    fn png_data_uri(width: u32, height: u32, color: [u8; 3]) -> String {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(bytes.into_inner()))
    }

    #[test]
    fn test_text_passes_through_unchanged() {
        let text = "  Hi John, let's meet for coffee tomorrow at 3pm.  ";
        assert_eq!(
            preprocess(&json!(text), &text_task()).unwrap(),
            NormalizedInput::Text(text.to_string())
        );
        assert_eq!(
            preprocess(&json!({"text": text}), &text_task()).unwrap(),
            NormalizedInput::Text(text.to_string())
        );
    }

    #[test]
    fn test_text_size_boundary() {
        let at_limit = "a".repeat(DEFAULT_MAX_TEXT_BYTES);
        assert!(preprocess(&json!(at_limit), &text_task()).is_ok());

        let over = "a".repeat(DEFAULT_MAX_TEXT_BYTES + 1);
        match preprocess(&json!(over), &text_task()) {
            Err(PreprocessError::OversizedInput { size, limit }) => {
                assert_eq!(size, DEFAULT_MAX_TEXT_BYTES + 1);
                assert_eq!(limit, DEFAULT_MAX_TEXT_BYTES);
            }
            other => panic!("expected OversizedInput, got {:?}", other),
        }
    }

    #[test]
    fn test_size_is_counted_in_utf8_bytes() {
        let preprocessor = Preprocessor::new(&LimitsConfig { max_text_bytes: 4 });
        // two characters, six bytes
        assert!(matches!(
            preprocessor.preprocess(&json!("€€"), &text_task()),
            Err(PreprocessError::OversizedInput { size: 6, limit: 4 })
        ));
    }

    #[test]
    fn test_text_rejects_numbers() {
        assert!(matches!(
            preprocess(&json!([1, 2]), &text_task()),
            Err(PreprocessError::InvalidPayloadShape(_))
        ));
        assert!(matches!(
            preprocess(&json!({"body": "x"}), &text_task()),
            Err(PreprocessError::InvalidPayloadShape(_))
        ));
    }

    #[test]
    fn test_image_is_resized_to_chw() {
        let task = TaskConfig::new(ModelType::ImageClassification)
            .with_input_size(InputSize::new(4, 2));
        let uri = png_data_uri(10, 6, [255, 0, 51]);

        let NormalizedInput::Tensor { shape, data } = preprocess(&json!(uri), &task).unwrap() else {
            panic!("expected a tensor");
        };
        assert_eq!(shape, vec![3, 2, 4]);
        assert_eq!(data.len(), 24);
        assert!(data[..8].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(data[8..16].iter().all(|&v| v == 0.0));
        assert!(data[16..].iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_image_default_size() {
        let task = TaskConfig::new(ModelType::ImageClassification);
        let uri = png_data_uri(3, 3, [0, 0, 0]);
        let NormalizedInput::Tensor { shape, .. } = preprocess(&json!(uri), &task).unwrap() else {
            panic!("expected a tensor");
        };
        assert_eq!(shape, vec![3, 224, 224]);
    }

    #[test]
    fn test_image_requires_data_uri() {
        let task = TaskConfig::new(ModelType::ImageClassification);
        for payload in [
            json!("aGVsbG8="),
            json!("data:text/plain;base64,aGVsbG8="),
            json!("data:image/png;base64,not base64!"),
            json!("data:image/png;base64,aGVsbG8="),
            json!([0.1, 0.2]),
        ] {
            assert!(
                matches!(
                    preprocess(&payload, &task),
                    Err(PreprocessError::InvalidImageFormat(_))
                ),
                "payload {} should be rejected",
                payload
            );
        }
    }

    #[test]
    fn test_regression_numbers() {
        let task = TaskConfig::new(ModelType::Regression);
        assert_eq!(
            preprocess(&json!([1, 2.5, -3]), &task).unwrap(),
            NormalizedInput::Numeric(vec![1.0, 2.5, -3.0])
        );
        assert!(matches!(
            preprocess(&json!([1, "two"]), &task),
            Err(PreprocessError::InvalidPayloadShape(_))
        ));
    }

    #[test]
    fn test_other_passes_json_through() {
        let task = TaskConfig::new(ModelType::Other);
        let payload = json!({"anything": [1, 2, 3]});
        assert_eq!(
            preprocess(&payload, &task).unwrap(),
            NormalizedInput::Raw(payload)
        );
    }

    #[test]
    fn test_invalid_task_config() {
        let task = text_task().with_labels(["A", "A"]);
        assert!(matches!(
            preprocess(&json!("hi"), &task),
            Err(PreprocessError::InvalidTaskConfig(_))
        ));
    }
}
