//! Tensor-network models backed by candle.
//!
//! Weights come from a safetensors file or a PyTorch state-dict checkpoint.
//! Parameters are grouped by module prefix (`0.weight`, `0.bias`, `fc2.weight`,
//! ...) and executed in natural prefix order: 2-D weights become linear
//! layers, groups carrying `running_mean`/`running_var` become batch norms.
//! Hidden linear layers are separated by ReLU.

use candle_core::{DType, Device, Tensor};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

const BATCH_NORM_EPS: f64 = 1e-5;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error("unsupported layer layout: {0}")]
    Layout(String),

    #[error("layer '{layer}' expects {expected} features, got {actual}")]
    ShapeMismatch {
        layer: String,
        expected: usize,
        actual: usize,
    },
}

/// Whether normalization layers use batch or running statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Training,
    Inference,
}

enum Layer {
    Linear {
        name: String,
        weight: Tensor,
        bias: Option<Tensor>,
    },
    BatchNorm {
        name: String,
        weight: Option<Tensor>,
        bias: Option<Tensor>,
        running_mean: Tensor,
        running_var: Tensor,
    },
}

pub struct TensorNetwork {
    layers: Vec<Layer>,
    mode: Mode,
    device: Device,
}

impl TensorNetwork {
    /// Read a checkpoint; the network starts in training mode like a freshly built module
    pub fn load(path: &Path) -> Result<Self, NetworkError> {
        let device = Device::Cpu;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let tensors: Vec<(String, Tensor)> = match ext.as_deref() {
            Some("safetensors") => candle_core::safetensors::load(path, &device)?
                .into_iter()
                .collect(),
            _ => candle_core::pickle::read_all(path)?,
        };

        Self::from_tensors(tensors, device)
    }

    pub fn from_tensors(
        tensors: Vec<(String, Tensor)>,
        device: Device,
    ) -> Result<Self, NetworkError> {
        let mut groups: BTreeMap<ModuleKey, BTreeMap<String, Tensor>> = BTreeMap::new();
        for (name, tensor) in tensors {
            let (prefix, param) = match name.rsplit_once('.') {
                Some((prefix, param)) => (prefix.to_string(), param.to_string()),
                None => (String::new(), name),
            };
            if param == "num_batches_tracked" {
                continue;
            }
            let tensor = tensor.to_dtype(DType::F32)?;
            groups
                .entry(ModuleKey::new(prefix))
                .or_default()
                .insert(param, tensor);
        }

        let mut layers = Vec::with_capacity(groups.len());
        for (key, mut params) in groups {
            let name = key.raw;
            if let (Some(running_mean), Some(running_var)) =
                (params.remove("running_mean"), params.remove("running_var"))
            {
                layers.push(Layer::BatchNorm {
                    name,
                    weight: params.remove("weight"),
                    bias: params.remove("bias"),
                    running_mean,
                    running_var,
                });
                continue;
            }

            match params.remove("weight") {
                Some(weight) if weight.rank() == 2 => layers.push(Layer::Linear {
                    name,
                    weight,
                    bias: params.remove("bias"),
                }),
                Some(weight) => {
                    return Err(NetworkError::Layout(format!(
                        "'{}' has a {}-D weight; only linear and batch-norm layers are supported",
                        name,
                        weight.rank()
                    )))
                }
                None => {
                    return Err(NetworkError::Layout(format!(
                        "'{}' has no weight (parameters: {:?})",
                        name,
                        params.keys().collect::<Vec<_>>()
                    )))
                }
            }
        }

        if !layers.iter().any(|l| matches!(l, Layer::Linear { .. })) {
            return Err(NetworkError::Layout(
                "checkpoint contains no linear layers".to_string(),
            ));
        }

        Ok(Self {
            layers,
            mode: Mode::Training,
            device,
        })
    }

    /// Switch to inference mode: normalization uses running statistics
    pub fn eval(&mut self) {
        self.mode = Mode::Inference;
    }

    pub fn input_width(&self) -> Option<usize> {
        self.layers.iter().find_map(|layer| match layer {
            Layer::Linear { weight, .. } => weight.dims2().ok().map(|(_, inputs)| inputs),
            Layer::BatchNorm { .. } => None,
        })
    }

    /// Run a `[1, n]` forward pass without gradient tracking
    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>, NetworkError> {
        let mut x = Tensor::from_vec(input.to_vec(), (1, input.len()), &self.device)?.detach();
        let mut seen_linear = false;

        for layer in &self.layers {
            x = match layer {
                Layer::Linear { name, weight, bias } => {
                    let (_, expected) = weight.dims2()?;
                    let (_, actual) = x.dims2()?;
                    if expected != actual {
                        return Err(NetworkError::ShapeMismatch {
                            layer: name.clone(),
                            expected,
                            actual,
                        });
                    }
                    if seen_linear {
                        x = x.relu()?;
                    }
                    seen_linear = true;
                    let out = x.matmul(&weight.t()?)?;
                    match bias {
                        Some(b) => out.broadcast_add(b)?,
                        None => out,
                    }
                }
                Layer::BatchNorm {
                    weight,
                    bias,
                    running_mean,
                    running_var,
                    ..
                } => {
                    let (mean, var) = match self.mode {
                        Mode::Inference => (running_mean.clone(), running_var.clone()),
                        Mode::Training => {
                            let mean = x.mean_keepdim(0)?;
                            let var = x.broadcast_sub(&mean)?.sqr()?.mean_keepdim(0)?;
                            (mean, var)
                        }
                    };
                    let std = var.affine(1.0, BATCH_NORM_EPS)?.sqrt()?;
                    let mut out = x.broadcast_sub(&mean)?.broadcast_div(&std)?;
                    if let Some(w) = weight {
                        out = out.broadcast_mul(w)?;
                    }
                    if let Some(b) = bias {
                        out = out.broadcast_add(b)?;
                    }
                    out
                }
            };
        }

        Ok(x.flatten_all()?.to_vec1::<f32>()?)
    }
}

/// Module prefix ordered numerically where segments are numbers (`2` < `10`)
#[derive(Debug, Clone, PartialEq, Eq)]
struct ModuleKey {
    raw: String,
}

impl ModuleKey {
    fn new(raw: String) -> Self {
        Self { raw }
    }
}

impl Ord for ModuleKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut a = self.raw.split('.');
        let mut b = other.raw.split('.');
        loop {
            match (a.next(), b.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(x), Some(y)) => {
                    let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                        (Ok(n), Ok(m)) => n.cmp(&m).then_with(|| x.cmp(y)),
                        _ => natural_cmp(x, y),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }
}

impl PartialOrd for ModuleKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare `fc2` < `fc10`: split trailing digits off the segment
fn natural_cmp(x: &str, y: &str) -> Ordering {
    fn split(s: &str) -> (&str, Option<u64>) {
        let digits = s.len() - s.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let (head, tail) = s.split_at(s.len() - digits);
        (head, tail.parse().ok())
    }
    let (hx, nx) = split(x);
    let (hy, ny) = split(y);
    hx.cmp(hy).then(nx.cmp(&ny)).then_with(|| x.cmp(y))
}
