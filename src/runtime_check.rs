//! Smoke checks for every runtime library the adapter links

use crate::models::classical::DEFAULT_TOKEN_PATTERN;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use candle_core::{Device, Tensor};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::array;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Cursor;

/// Outcome of one library probe
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub name: &'static str,
    /// Locked crate version backing the library
    pub version: &'static str,
    /// What the probe exercised, or why it failed
    pub outcome: Result<String, String>,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(detail) => write!(f, "[PASS] {} {} ({})", self.name, self.version, detail),
            Err(error) => write!(f, "[FAIL] {} {} - Error: {}", self.name, self.version, error),
        }
    }
}

type Probe = fn() -> Result<String, String>;

// Versions are read from Cargo.lock by the build script
const PROBES: [(&str, &str, Probe); 7] = [
    ("onnxruntime", env!("LOCKED_VERSION_ORT"), check_onnxruntime),
    ("candle-core", env!("LOCKED_VERSION_CANDLE_CORE"), check_candle),
    ("ndarray", env!("LOCKED_VERSION_NDARRAY"), check_ndarray),
    ("image", env!("LOCKED_VERSION_IMAGE"), check_image),
    ("base64", env!("LOCKED_VERSION_BASE64"), check_base64),
    ("sha2", env!("LOCKED_VERSION_SHA2"), check_sha256),
    ("regex", env!("LOCKED_VERSION_REGEX"), check_regex),
];

/// Run every probe; order is stable
pub fn run_checks() -> Vec<CheckResult> {
    PROBES
        .iter()
        .map(|&(name, version, probe)| CheckResult {
            name,
            version,
            outcome: probe(),
        })
        .collect()
}

fn check_onnxruntime() -> Result<String, String> {
    ort::init().commit().map_err(|e| e.to_string())?;
    ort::session::Session::builder().map_err(|e| e.to_string())?;
    Ok("environment and session builder".to_string())
}

fn check_candle() -> Result<String, String> {
    let run = || -> candle_core::Result<f32> {
        let a = Tensor::new(&[[1f32, 2.0], [3.0, 4.0]], &Device::Cpu)?;
        let b = Tensor::new(&[[1f32], [1.0]], &Device::Cpu)?;
        a.matmul(&b)?.sum_all()?.to_scalar::<f32>()
    };
    match run() {
        Ok(sum) if sum == 10.0 => Ok("cpu matmul".to_string()),
        Ok(sum) => Err(format!("matmul produced {}, expected 10", sum)),
        Err(e) => Err(e.to_string()),
    }
}

fn check_ndarray() -> Result<String, String> {
    let product = array![[1.0, 2.0], [3.0, 4.0]].dot(&array![1.0, 1.0]);
    if product == array![3.0, 7.0] {
        Ok("dot product".to_string())
    } else {
        Err(format!("dot produced {}", product))
    }
}

fn check_image() -> Result<String, String> {
    let img = RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    let decoded = image::load_from_memory(bytes.get_ref()).map_err(|e| e.to_string())?;
    if decoded.to_rgb8().into_raw() == img.into_raw() {
        Ok("png encode/decode".to_string())
    } else {
        Err("decoded pixels differ".to_string())
    }
}

fn check_base64() -> Result<String, String> {
    let encoded = STANDARD.encode(b"inference");
    let decoded = STANDARD.decode(&encoded).map_err(|e| e.to_string())?;
    if decoded == b"inference" {
        Ok("standard alphabet".to_string())
    } else {
        Err("round trip mismatch".to_string())
    }
}

fn check_sha256() -> Result<String, String> {
    let digest = hex::encode(Sha256::digest(b"abc"));
    if digest == "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad" {
        Ok("sha-256".to_string())
    } else {
        Err(format!("unexpected digest {}", digest))
    }
}

fn check_regex() -> Result<String, String> {
    let tokenizer = Regex::new(DEFAULT_TOKEN_PATTERN).map_err(|e| e.to_string())?;
    let tokens = tokenizer.find_iter("a unicode tökenizer").count();
    if tokens == 2 {
        Ok("unicode word tokenizer".to_string())
    } else {
        Err(format!("found {} tokens, expected 2", tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_rust_probes_pass() {
        for probe in [check_candle, check_ndarray, check_image, check_base64, check_sha256, check_regex] {
            let outcome = probe();
            assert!(outcome.is_ok(), "{:?}", outcome);
        }
    }

    #[test]
    fn test_every_probe_reports_a_locked_version() {
        for (name, version, _) in PROBES {
            assert!(
                version.starts_with(|c: char| c.is_ascii_digit()),
                "{} has version '{}'",
                name,
                version
            );
        }
        assert_eq!(PROBES[0].1, "2.0.0-rc.10");
    }

    #[test]
    fn test_report_lines() {
        let pass = CheckResult {
            name: "sha2",
            version: "0.10.8",
            outcome: Ok("sha-256".to_string()),
        };
        let fail = CheckResult {
            name: "onnxruntime",
            version: "2.0.0-rc.10",
            outcome: Err("library not found".to_string()),
        };
        assert_eq!(pass.to_string(), "[PASS] sha2 0.10.8 (sha-256)");
        assert_eq!(
            fail.to_string(),
            "[FAIL] onnxruntime 2.0.0-rc.10 - Error: library not found"
        );
        assert!(!fail.passed());
    }
}
