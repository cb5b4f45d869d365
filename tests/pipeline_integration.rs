//! End-to-end runs of the adapter against generated model files

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use candle_core::{Device, Tensor};
use common::{spam_bundle, spam_pipeline, write_file, write_json};
use image::{ImageFormat, Rgb, RgbImage};
use inference_adapter::{Adapter, InferenceResult, ResponseEnvelope};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use tempfile::TempDir;

fn respond(model: &Path, request: &Value) -> Value {
    let envelope = Adapter::default().respond(model, &request.to_string());
    let json: Value = serde_json::from_str(&envelope.to_json()).unwrap();
    assert_eq!(json["success"], json!(envelope.is_success()));
    json
}

fn png_data_uri(color: [u8; 3]) -> String {
    let img = RgbImage::from_pixel(8, 8, Rgb(color));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png).unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(bytes.into_inner()))
}

#[test]
fn test_ham_message_is_not_spam() {
    let dir = TempDir::new().unwrap();
    let model = write_json(dir.path(), "spam.pipeline", &spam_pipeline());

    let response = respond(
        &model,
        &json!({"input": "Hi John, let's meet for coffee tomorrow at 3pm."}),
    );
    assert_eq!(response["success"], json!(true), "{}", response);
    assert_eq!(response["output"]["label"], json!("NOT_SPAM"));
    assert!(response["output"]["confidence"].as_f64().unwrap() > 0.5);

    let probabilities = response["output"]["probabilities"].as_object().unwrap();
    assert_eq!(
        probabilities.keys().collect::<Vec<_>>(),
        vec!["NOT_SPAM", "SPAM"]
    );
    let total: f64 = probabilities.values().map(|p| p.as_f64().unwrap()).sum();
    assert!((total - 1.0).abs() < 1e-6);

    assert_eq!(response["metadata"]["runtime"], json!("classical_pipeline"));
    assert_eq!(response["metadata"]["model_type"], json!("text_classification"));
}

#[test]
fn test_promotional_message_is_spam() {
    let dir = TempDir::new().unwrap();
    let model = write_json(dir.path(), "spam.json", &spam_pipeline());

    let response = respond(
        &model,
        &json!({
            "input": {"text": "FREE MONEY! Claim your prize now!!!"},
            "modelType": "text_classification",
            "modelConfig": {"labels": ["ham", "spam"]}
        }),
    );
    assert_eq!(response["output"]["label"], json!("spam"), "{}", response);
}

#[test]
fn test_request_file_form() {
    let dir = TempDir::new().unwrap();
    let model = write_json(dir.path(), "spam.pipeline", &spam_pipeline());
    let request = write_json(
        dir.path(),
        "request.json",
        &json!({"input": "Looking forward to the team meeting tomorrow"}),
    );

    let envelope = Adapter::default().respond(&model, request.to_str().unwrap());
    match envelope {
        ResponseEnvelope::Success { output, .. } => assert_eq!(output.label(), Some("NOT_SPAM")),
        other => panic!("expected success, got {}", other.to_json()),
    }
}

#[test]
fn test_bundle_uses_metadata_labels() {
    let dir = TempDir::new().unwrap();
    let model = write_json(
        dir.path(),
        "spam.bundle",
        &spam_bundle(json!({"labels": ["ham", "spam"], "version": "2.1.0"})),
    );

    let response = respond(&model, &json!({"input": "You've WON the lottery! Claim your prize!"}));
    assert_eq!(response["output"]["label"], json!("spam"), "{}", response);
    assert_eq!(response["metadata"]["bundle"]["version"], json!("2.1.0"));
    assert_eq!(response["metadata"]["runtime"], json!("classical_pipeline"));
}

#[test]
fn test_bundle_selected_by_declared_format() {
    let dir = TempDir::new().unwrap();
    let model = write_json(dir.path(), "artifact.json", &spam_bundle(json!({})));

    let response = respond(
        &model,
        &json!({"input": "Your package has been delivered", "modelFormat": "bundle"}),
    );
    assert_eq!(response["output"]["label"], json!("NOT_SPAM"), "{}", response);

    // without the declaration the same file is read as a single estimator
    let response = respond(&model, &json!({"input": "Your package has been delivered"}));
    assert_eq!(response["success"], json!(false));
}

#[test]
fn test_broken_bundle_names_missing_part() {
    let dir = TempDir::new().unwrap();
    let mut bundle = spam_bundle(json!({}));
    bundle.as_object_mut().unwrap().remove("vectorizer");
    let model = write_json(dir.path(), "broken.bundle", &bundle);

    let response = respond(&model, &json!({"input": "hello there"}));
    assert_eq!(response["success"], json!(false));
    assert!(response["error"].as_str().unwrap().contains("'vectorizer'"));
}

#[test]
fn test_missing_model_fails_with_not_found() {
    let response = respond(Path::new("/no/such/dir/model.pipeline"), &json!({"input": "hi"}));
    assert_eq!(response["success"], json!(false));
    assert!(response["error"].as_str().unwrap().contains("not found"));
    assert!(response["traceback"].as_str().unwrap().contains("Caused by"));

    let envelope = Adapter::default().respond(Path::new("/no/such/dir/model.pipeline"), "{}");
    assert_eq!(envelope.exit_code(), 1);
}

#[test]
fn test_oversized_text_rejected() {
    let dir = TempDir::new().unwrap();
    let model = write_json(dir.path(), "spam.pipeline", &spam_pipeline());

    let response = respond(&model, &json!({"input": "a".repeat(100 * 1024 + 1)}));
    assert_eq!(response["success"], json!(false));
    assert!(response["error"].as_str().unwrap().contains("Input too large"));
}

#[test]
fn test_label_count_mismatch() {
    let dir = TempDir::new().unwrap();
    let model = write_json(dir.path(), "spam.pipeline", &spam_pipeline());

    let response = respond(
        &model,
        &json!({
            "input": "hello",
            "modelType": "text_classification",
            "modelConfig": {"labels": ["a", "b", "c"]}
        }),
    );
    assert_eq!(response["success"], json!(false));
    assert!(response["error"].as_str().unwrap().contains("Label count mismatch"));
}

fn brightness_graph(dir: &Path) -> std::path::PathBuf {
    // 3 x 2 x 2 image → [dark, bright] logits
    let kernel: Vec<[f32; 2]> = (0..12).map(|_| [-1.0, 1.0]).collect();
    write_json(
        dir,
        "brightness.graph",
        &json!({
            "input_width": 12,
            "output": "probs",
            "nodes": [
                {"name": "centered", "inputs": ["input"], "op": "rescale", "scale": 1.0, "offset": -0.5},
                {"name": "probs", "inputs": ["centered"], "op": "dense", "kernel": kernel, "activation": "softmax"}
            ]
        }),
    )
}

#[test]
fn test_image_classification_with_graph() {
    let dir = TempDir::new().unwrap();
    let model = brightness_graph(dir.path());

    for (color, expected) in [([250, 250, 250], "bright"), ([5, 5, 5], "dark")] {
        let response = respond(
            &model,
            &json!({
                "input": png_data_uri(color),
                "modelType": "image_classification",
                "modelConfig": {"labels": ["dark", "bright"], "inputSize": [2, 2]}
            }),
        );
        assert_eq!(response["output"]["label"], json!(expected), "{}", response);
        assert_eq!(response["metadata"]["runtime"], json!("graph_execution"));
    }
}

#[test]
fn test_image_without_data_uri_prefix() {
    let dir = TempDir::new().unwrap();
    let model = brightness_graph(dir.path());
    let encoded = png_data_uri([0, 0, 0]).replacen("data:image/png;base64,", "", 1);

    let response = respond(
        &model,
        &json!({
            "input": encoded,
            "modelType": "image_classification",
            "modelConfig": {"labels": ["dark", "bright"], "inputSize": [2, 2]}
        }),
    );
    assert_eq!(response["success"], json!(false));
    assert!(response["error"].as_str().unwrap().contains("Invalid image format"));
}

#[test]
fn test_safetensors_network_runs_in_inference_mode() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("net.safetensors");
    let tensor = |data: &[f32], shape: &[usize]| Tensor::from_vec(data.to_vec(), shape, &Device::Cpu).unwrap();
    let tensors: HashMap<String, Tensor> = [
        ("0.weight", tensor(&[1.0, 0.0, 0.0, 1.0], &[2, 2])),
        ("0.bias", tensor(&[0.0, 0.0], &[2])),
        ("1.running_mean", tensor(&[1.0, 1.0], &[2])),
        ("1.running_var", tensor(&[1.0, 1.0], &[2])),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    candle_core::safetensors::save(&tensors, &path).unwrap();

    let response = respond(&path, &json!({"input": [3.0, 0.0], "modelType": "other"}));
    assert_eq!(response["success"], json!(true), "{}", response);
    assert_eq!(response["metadata"]["runtime"], json!("tensor_network"));

    let output: Vec<f64> = response["output"]["output"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    // running statistics, not the single-row batch statistics
    assert!((output[0] - 2.0).abs() < 1e-3, "{:?}", output);
    assert!((output[1] + 1.0).abs() < 1e-3, "{:?}", output);
}

#[test]
fn test_regression_model() {
    let dir = TempDir::new().unwrap();
    let model = write_file(
        dir.path(),
        "price.pipeline",
        r#"{"type": "linear_regression", "coef": [10.0, -2.0], "intercept": 5.0}"#,
    );

    let response = respond(&model, &json!({"input": [1.5, 2], "modelType": "regression"}));
    assert_eq!(response["output"], json!({"prediction": 16.0}), "{}", response);

    let response = respond(&model, &json!({"input": [1.5, "2"], "modelType": "regression"}));
    assert_eq!(response["success"], json!(false));
}

#[test]
fn test_unsupported_extension() {
    let dir = TempDir::new().unwrap();
    let model = write_file(dir.path(), "model.pkl", b"\x80\x03}q\x00.");

    let response = respond(&model, &json!({"input": "hi"}));
    assert_eq!(response["success"], json!(false));
    assert!(response["error"].as_str().unwrap().contains("Unsupported model format"));
}

#[test]
fn test_result_accessors() {
    let dir = TempDir::new().unwrap();
    let model = write_json(dir.path(), "spam.pipeline", &spam_pipeline());
    let request = inference_adapter::InferenceRequest::from_json(
        r#"{"input": "Make money fast! Work from home!"}"#,
    )
    .unwrap();

    let outcome = Adapter::default().run(&model, &request).unwrap();
    assert_eq!(outcome.output.label(), Some("SPAM"));
    assert!(matches!(outcome.output, InferenceResult::Classification { .. }));
}
