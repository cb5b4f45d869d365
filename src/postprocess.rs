//! Raw output normalization

use crate::error::PostprocessError;
use crate::models::RawOutput;
use crate::types::{InferenceResult, ModelType, Probabilities, TaskConfig};
use serde_json::Value;

/// Classification scores may drift this far outside [0, 1]
const PROBABILITY_TOLERANCE: f64 = 1e-6;

pub fn postprocess(raw: &RawOutput, task: &TaskConfig) -> Result<InferenceResult, PostprocessError> {
    let values = &raw.values;
    if values.is_empty() {
        return Err(PostprocessError::InvalidOutput(
            "model produced an empty output".to_string(),
        ));
    }
    if let Some((i, v)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(PostprocessError::InvalidOutput(format!(
            "output {} is not finite ({})",
            i, v
        )));
    }

    match task.model_type {
        ModelType::TextClassification | ModelType::ImageClassification => {
            classify(values, task.labels.as_deref(), task.softmax)
        }
        ModelType::Regression => Ok(InferenceResult::Regression {
            prediction: values[0],
        }),
        ModelType::Other => Ok(InferenceResult::Raw {
            output: Value::from(values.clone()),
        }),
    }
}

fn classify(
    values: &[f64],
    labels: Option<&[String]>,
    apply_softmax: bool,
) -> Result<InferenceResult, PostprocessError> {
    let scores = if apply_softmax {
        softmax(values)
    } else {
        values.to_vec()
    };

    if let Some((i, v)) = scores.iter().enumerate().find(|(_, &v)| {
        !(-PROBABILITY_TOLERANCE..=1.0 + PROBABILITY_TOLERANCE).contains(&v)
    }) {
        return Err(PostprocessError::InvalidOutput(format!(
            "score {} is {}, outside [0, 1]; enable softmax for logits",
            i, v
        )));
    }

    let names: Vec<String> = match labels {
        Some(labels) if labels.len() != scores.len() => {
            return Err(PostprocessError::LabelMismatch {
                labels: labels.len(),
                outputs: scores.len(),
            })
        }
        Some(labels) => labels.to_vec(),
        None => (0..scores.len()).map(|i| i.to_string()).collect(),
    };

    // first maximum wins ties
    let (best, confidence) = scores
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        });

    Ok(InferenceResult::Classification {
        label: names[best].clone(),
        confidence,
        probabilities: Probabilities::new(names.into_iter().zip(scores).collect()),
    })
}

fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spam_task() -> TaskConfig {
        TaskConfig::new(ModelType::TextClassification).with_labels(["NOT_SPAM", "SPAM"])
    }

    #[test]
    fn test_spam_classification() {
        let result = postprocess(&RawOutput::new(vec![0.2, 0.8]), &spam_task()).unwrap();
        assert_eq!(result.label(), Some("SPAM"));
        assert_eq!(result.confidence(), Some(0.8));

        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(
            json,
            r#"{"label":"SPAM","confidence":0.8,"probabilities":{"NOT_SPAM":0.2,"SPAM":0.8}}"#
        );
    }

    #[test]
    fn test_label_order_is_preserved() {
        let task = TaskConfig::new(ModelType::TextClassification).with_labels(["zeta", "alpha", "mid"]);
        let result = postprocess(&RawOutput::new(vec![0.1, 0.3, 0.6]), &task).unwrap();
        let InferenceResult::Classification { probabilities, .. } = result else {
            panic!("expected classification");
        };
        assert_eq!(probabilities.labels().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
        assert!((probabilities.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_index_labels_without_configuration() {
        let task = TaskConfig::new(ModelType::ImageClassification);
        let result = postprocess(&RawOutput::new(vec![0.1, 0.7, 0.2]), &task).unwrap();
        assert_eq!(result.label(), Some("1"));
    }

    #[test]
    fn test_label_mismatch() {
        assert!(matches!(
            postprocess(&RawOutput::new(vec![0.2, 0.3, 0.5]), &spam_task()),
            Err(PostprocessError::LabelMismatch { labels: 2, outputs: 3 })
        ));
    }

    #[test]
    fn test_logits_need_softmax() {
        let logits = RawOutput::new(vec![-1.0, 3.0]);
        assert!(matches!(
            postprocess(&logits, &spam_task()),
            Err(PostprocessError::InvalidOutput(_))
        ));

        let result = postprocess(&logits, &spam_task().with_softmax(true)).unwrap();
        let InferenceResult::Classification { label, probabilities, .. } = result else {
            panic!("expected classification");
        };
        assert_eq!(label, "SPAM");
        assert!((probabilities.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_regression_takes_first_value() {
        let task = TaskConfig::new(ModelType::Regression);
        let result = postprocess(&RawOutput::new(vec![42.5, 1.0]), &task).unwrap();
        assert_eq!(result, InferenceResult::Regression { prediction: 42.5 });
    }

    #[test]
    fn test_other_passes_values_through() {
        let task = TaskConfig::new(ModelType::Other);
        let result = postprocess(&RawOutput::new(vec![1.5, -2.0]), &task).unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"output": [1.5, -2.0]})
        );
    }

    #[test]
    fn test_invalid_outputs() {
        let task = TaskConfig::new(ModelType::Regression);
        assert!(matches!(
            postprocess(&RawOutput::new(vec![]), &task),
            Err(PostprocessError::InvalidOutput(_))
        ));
        assert!(matches!(
            postprocess(&RawOutput::new(vec![f64::NAN]), &task),
            Err(PostprocessError::InvalidOutput(_))
        ));
    }
}
