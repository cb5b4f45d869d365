//! Graph-execution models.
//!
//! A `.graph` file is a JSON dataflow graph: named nodes, each naming the
//! nodes (or the graph input) it consumes. Loading validates the graph and
//! fixes a topological order; [`GraphModel::predict_batch`] then evaluates
//! every node once per batch.

use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("invalid graph: {0}")]
    Invalid(String),

    #[error("node '{node}' expects width {expected}, got {actual}")]
    ShapeMismatch {
        node: String,
        expected: usize,
        actual: usize,
    },
}

fn default_input() -> String {
    "input".to_string()
}

/// On-disk graph document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    /// Name under which the input batch is visible to nodes
    #[serde(default = "default_input")]
    pub input: String,
    /// Declared input width, checked against every batch when present
    #[serde(default)]
    pub input_width: Option<usize>,
    /// Node whose value is the graph output
    pub output: String,
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub inputs: Vec<String>,
    #[serde(flatten)]
    pub op: OpSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpSpec {
    /// `x · kernel + bias`, kernel laid out `[in][out]`
    Dense {
        kernel: Vec<Vec<f32>>,
        #[serde(default)]
        bias: Option<Vec<f32>>,
        #[serde(default)]
        activation: Activation,
    },
    Activation {
        activation: Activation,
    },
    /// `x * scale + offset`
    Rescale {
        scale: f32,
        #[serde(default)]
        offset: f32,
    },
    Add,
    Concat,
}

enum Op {
    Dense {
        kernel: Array2<f32>,
        bias: Option<Array1<f32>>,
        activation: Activation,
    },
    Activation(Activation),
    Rescale {
        scale: f32,
        offset: f32,
    },
    Add,
    Concat,
}

struct Node {
    name: String,
    inputs: Vec<String>,
    op: Op,
}

/// A validated graph ready for batch prediction
pub struct GraphModel {
    input: String,
    input_width: Option<usize>,
    output: String,
    /// Nodes in evaluation order
    nodes: Vec<Node>,
}

impl GraphModel {
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let spec: GraphSpec =
            serde_json::from_str(json).map_err(|e| GraphError::Invalid(e.to_string()))?;
        Self::from_spec(spec)
    }

    pub fn from_spec(spec: GraphSpec) -> Result<Self, GraphError> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, node) in spec.nodes.iter().enumerate() {
            if node.name == spec.input {
                return Err(GraphError::Invalid(format!(
                    "node '{}' shadows the graph input",
                    node.name
                )));
            }
            if index.insert(node.name.as_str(), i).is_some() {
                return Err(GraphError::Invalid(format!(
                    "duplicate node name '{}'",
                    node.name
                )));
            }
        }
        if !index.contains_key(spec.output.as_str()) {
            return Err(GraphError::Invalid(format!(
                "output node '{}' does not exist",
                spec.output
            )));
        }

        // Kahn's algorithm over node dependencies
        let mut pending = vec![0usize; spec.nodes.len()];
        let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); spec.nodes.len()];
        for (i, node) in spec.nodes.iter().enumerate() {
            check_arity(node)?;
            for input in &node.inputs {
                if *input == spec.input {
                    continue;
                }
                let &dep = index.get(input.as_str()).ok_or_else(|| {
                    GraphError::Invalid(format!(
                        "node '{}' consumes unknown node '{}'",
                        node.name, input
                    ))
                })?;
                pending[i] += 1;
                consumers[dep].push(i);
            }
        }

        let mut ready: VecDeque<usize> = (0..spec.nodes.len()).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(spec.nodes.len());
        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &next in &consumers[i] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.push_back(next);
                }
            }
        }
        if order.len() != spec.nodes.len() {
            return Err(GraphError::Invalid("graph contains a cycle".to_string()));
        }

        let mut slots: Vec<Option<NodeSpec>> = spec.nodes.into_iter().map(Some).collect();
        let nodes = order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .map(compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            input: spec.input,
            input_width: spec.input_width,
            output: spec.output,
            nodes,
        })
    }

    /// Input width, declared or implied by a dense node reading the input directly
    pub fn input_width(&self) -> Option<usize> {
        self.input_width.or_else(|| {
            self.nodes.iter().find_map(|node| match &node.op {
                Op::Dense { kernel, .. } if node.inputs.iter().any(|i| *i == self.input) => {
                    Some(kernel.nrows())
                }
                _ => None,
            })
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Evaluate the graph on a `[batch, features]` input
    pub fn predict_batch(&self, batch: ArrayView2<'_, f32>) -> Result<Array2<f32>, GraphError> {
        if let Some(width) = self.input_width {
            if batch.ncols() != width {
                return Err(GraphError::ShapeMismatch {
                    node: self.input.clone(),
                    expected: width,
                    actual: batch.ncols(),
                });
            }
        }

        let mut values: HashMap<&str, Array2<f32>> = HashMap::with_capacity(self.nodes.len() + 1);
        values.insert(self.input.as_str(), batch.to_owned());

        for node in &self.nodes {
            let args: Vec<&Array2<f32>> = node
                .inputs
                .iter()
                .map(|name| {
                    values.get(name.as_str()).ok_or_else(|| {
                        GraphError::Invalid(format!("value '{}' was never computed", name))
                    })
                })
                .collect::<Result<_, _>>()?;
            let value = evaluate(node, &args)?;
            values.insert(node.name.as_str(), value);
        }

        values
            .remove(self.output.as_str())
            .ok_or_else(|| GraphError::Invalid(format!("output '{}' was never computed", self.output)))
    }
}

fn check_arity(node: &NodeSpec) -> Result<(), GraphError> {
    let count = node.inputs.len();
    let ok = match node.op {
        OpSpec::Dense { .. } | OpSpec::Activation { .. } | OpSpec::Rescale { .. } => count == 1,
        OpSpec::Add => count >= 2,
        OpSpec::Concat => count >= 1,
    };
    if ok {
        Ok(())
    } else {
        Err(GraphError::Invalid(format!(
            "node '{}' has {} inputs",
            node.name, count
        )))
    }
}

fn compile(spec: NodeSpec) -> Result<Node, GraphError> {
    let op = match spec.op {
        OpSpec::Dense {
            kernel,
            bias,
            activation,
        } => {
            let rows = kernel.len();
            let cols = kernel.first().map_or(0, Vec::len);
            if rows == 0 || cols == 0 || kernel.iter().any(|r| r.len() != cols) {
                return Err(GraphError::Invalid(format!(
                    "dense node '{}' has an empty or ragged kernel",
                    spec.name
                )));
            }
            if let Some(b) = &bias {
                if b.len() != cols {
                    return Err(GraphError::ShapeMismatch {
                        node: spec.name,
                        expected: cols,
                        actual: b.len(),
                    });
                }
            }
            let flat: Vec<f32> = kernel.into_iter().flatten().collect();
            let kernel = Array2::from_shape_vec((rows, cols), flat)
                .map_err(|e| GraphError::Invalid(e.to_string()))?;
            Op::Dense {
                kernel,
                bias: bias.map(Array1::from),
                activation,
            }
        }
        OpSpec::Activation { activation } => Op::Activation(activation),
        OpSpec::Rescale { scale, offset } => Op::Rescale { scale, offset },
        OpSpec::Add => Op::Add,
        OpSpec::Concat => Op::Concat,
    };
    Ok(Node {
        name: spec.name,
        inputs: spec.inputs,
        op,
    })
}

fn evaluate(node: &Node, args: &[&Array2<f32>]) -> Result<Array2<f32>, GraphError> {
    match &node.op {
        Op::Dense {
            kernel,
            bias,
            activation,
        } => {
            let x = args[0];
            if x.ncols() != kernel.nrows() {
                return Err(GraphError::ShapeMismatch {
                    node: node.name.clone(),
                    expected: kernel.nrows(),
                    actual: x.ncols(),
                });
            }
            let mut out = x.dot(kernel);
            if let Some(b) = bias {
                out += b;
            }
            Ok(activate(out, *activation))
        }
        Op::Activation(activation) => Ok(activate(args[0].clone(), *activation)),
        Op::Rescale { scale, offset } => Ok(args[0].mapv(|v| v * scale + offset)),
        Op::Add => {
            let mut sum = args[0].clone();
            for other in &args[1..] {
                if other.dim() != sum.dim() {
                    return Err(GraphError::ShapeMismatch {
                        node: node.name.clone(),
                        expected: sum.ncols(),
                        actual: other.ncols(),
                    });
                }
                sum += *other;
            }
            Ok(sum)
        }
        Op::Concat => {
            let views: Vec<ArrayView2<'_, f32>> = args.iter().map(|a| a.view()).collect();
            concatenate(Axis(1), &views).map_err(|e| GraphError::Invalid(e.to_string()))
        }
    }
}

fn activate(mut x: Array2<f32>, activation: Activation) -> Array2<f32> {
    match activation {
        Activation::Linear => {}
        Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
        Activation::Sigmoid => x.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp())),
        Activation::Tanh => x.mapv_inplace(f32::tanh),
        Activation::Softmax => {
            for mut row in x.axis_iter_mut(Axis(0)) {
                let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                row.mapv_inplace(|v| (v - max).exp());
                let total = row.sum();
                row /= total;
            }
        }
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const TWO_LAYER: &str = r#"{
        "output": "probs",
        "nodes": [
            {"name": "hidden", "inputs": ["input"], "op": "dense",
             "kernel": [[1.0, -1.0], [1.0, -1.0]], "bias": [0.0, 0.0], "activation": "relu"},
            {"name": "logits", "inputs": ["hidden"], "op": "dense",
             "kernel": [[1.0, 0.0], [0.0, 1.0]]},
            {"name": "probs", "inputs": ["logits"], "op": "activation", "activation": "softmax"}
        ]
    }"#;

    #[test]
    fn test_two_layer_softmax() {
        let graph = GraphModel::from_json(TWO_LAYER).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.input_width(), Some(2));

        let out = graph.predict_batch(array![[1.0f32, 2.0]].view()).unwrap();
        assert_eq!(out.dim(), (1, 2));
        assert!((out.row(0).sum() - 1.0).abs() < 1e-6);
        assert!(out[[0, 0]] > out[[0, 1]]);
    }

    #[test]
    fn test_nodes_may_be_listed_out_of_order() {
        let json = r#"{
            "output": "sum",
            "nodes": [
                {"name": "sum", "inputs": ["a", "b"], "op": "add"},
                {"name": "a", "inputs": ["input"], "op": "rescale", "scale": 2.0},
                {"name": "b", "inputs": ["input"], "op": "rescale", "scale": 1.0, "offset": 1.0}
            ]
        }"#;
        let graph = GraphModel::from_json(json).unwrap();
        let out = graph.predict_batch(array![[1.0f32, 3.0]].view()).unwrap();
        assert_eq!(out, array![[4.0f32, 10.0]]);
    }

    #[test]
    fn test_cycle_rejected() {
        let json = r#"{
            "output": "a",
            "nodes": [
                {"name": "a", "inputs": ["b"], "op": "activation", "activation": "relu"},
                {"name": "b", "inputs": ["a"], "op": "activation", "activation": "relu"}
            ]
        }"#;
        assert!(matches!(
            GraphModel::from_json(json),
            Err(GraphError::Invalid(msg)) if msg.contains("cycle")
        ));
    }

    #[test]
    fn test_unknown_input_rejected() {
        let json = r#"{"output": "a", "nodes": [
            {"name": "a", "inputs": ["missing"], "op": "activation", "activation": "tanh"}
        ]}"#;
        assert!(GraphModel::from_json(json).is_err());
    }

    #[test]
    fn test_width_mismatch() {
        let graph = GraphModel::from_json(TWO_LAYER).unwrap();
        let err = graph
            .predict_batch(array![[1.0f32, 2.0, 3.0]].view())
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::ShapeMismatch { expected: 2, actual: 3, .. }
        ));
    }

    #[test]
    fn test_concat() {
        let json = r#"{"output": "both", "nodes": [
            {"name": "pos", "inputs": ["input"], "op": "activation", "activation": "relu"},
            {"name": "both", "inputs": ["input", "pos"], "op": "concat"}
        ]}"#;
        let graph = GraphModel::from_json(json).unwrap();
        let out = graph.predict_batch(array![[-1.0f32, 2.0]].view()).unwrap();
        assert_eq!(out, array![[-1.0f32, 2.0, 0.0, 2.0]]);
    }
}
