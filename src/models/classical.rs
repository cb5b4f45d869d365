//! Classical predict-style estimators.
//!
//! Models are stored as tagged JSON documents (`{"type": "multinomial_nb", ...}`)
//! holding fitted parameters. Feature extractors turn documents into dense
//! count rows; classifiers and regressors consume those rows. A `pipeline`
//! chains transform steps in front of a final estimator.

use super::{Capabilities, Capability};
use ndarray::{Array1, Array2, Axis};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Default token pattern: runs of two or more word characters
pub const DEFAULT_TOKEN_PATTERN: &str = r"(?u)\b\w\w+\b";

static DEFAULT_TOKENIZER: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_TOKEN_PATTERN).expect("default token pattern is valid"));

/// Errors raised by estimator parameters or calls
#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("{estimator} does not support {capability:?}")]
    MissingCapability {
        estimator: &'static str,
        capability: Capability,
    },

    #[error("{estimator} expects {expected} features, got {actual}")]
    FeatureMismatch {
        estimator: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{estimator} expects {expected} input")]
    WrongInput {
        estimator: &'static str,
        expected: &'static str,
    },

    #[error("invalid {estimator} parameters: {reason}")]
    InvalidParameters {
        estimator: &'static str,
        reason: String,
    },
}

type EstimatorResult<T> = std::result::Result<T, EstimatorError>;

/// Input flowing between estimator steps
#[derive(Debug, Clone, PartialEq)]
pub enum Features {
    /// Raw documents, one per row
    Text(Vec<String>),
    /// Dense feature matrix, shape `[rows, features]`
    Dense(Array2<f64>),
}

impl Features {
    pub fn text(doc: impl Into<String>) -> Self {
        Features::Text(vec![doc.into()])
    }

    /// A single dense row
    pub fn row(values: &[f32]) -> Self {
        let row: Array1<f64> = values.iter().map(|&v| v as f64).collect();
        Features::Dense(row.insert_axis(Axis(0)))
    }
}

fn default_true() -> bool {
    true
}

fn default_ngram_range() -> (usize, usize) {
    (1, 1)
}

/// Token counter over a fixed vocabulary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountVectorizer {
    /// Term → column index
    pub vocabulary: BTreeMap<String, usize>,
    #[serde(default = "default_true")]
    pub lowercase: bool,
    #[serde(default)]
    pub token_pattern: Option<String>,
    #[serde(default = "default_ngram_range")]
    pub ngram_range: (usize, usize),
    /// Record presence (1.0) instead of counts
    #[serde(default)]
    pub binary: bool,
}

impl CountVectorizer {
    /// Build a vectorizer from terms; column order is the iteration order
    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let vocabulary = terms
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t.into(), i))
            .collect();
        Self {
            vocabulary,
            lowercase: true,
            token_pattern: None,
            ngram_range: (1, 1),
            binary: false,
        }
    }

    pub fn width(&self) -> usize {
        self.vocabulary.len()
    }

    fn validate(&self) -> EstimatorResult<()> {
        let width = self.width();
        if let Some((term, &idx)) = self.vocabulary.iter().find(|(_, &idx)| idx >= width) {
            return Err(invalid(
                "count_vectorizer",
                format!("term '{}' maps to column {} but vocabulary has {} terms", term, idx, width),
            ));
        }
        let (lo, hi) = self.ngram_range;
        if lo == 0 || lo > hi {
            return Err(invalid(
                "count_vectorizer",
                format!("invalid ngram range ({}, {})", lo, hi),
            ));
        }
        self.tokenizer()?;
        Ok(())
    }

    fn tokenizer(&self) -> EstimatorResult<Regex> {
        match &self.token_pattern {
            None => Ok(DEFAULT_TOKENIZER.clone()),
            Some(pattern) => Regex::new(pattern)
                .map_err(|e| invalid("count_vectorizer", format!("bad token pattern: {}", e))),
        }
    }

    /// Split a document into terms (n-grams joined by a single space)
    pub fn analyze(&self, doc: &str) -> EstimatorResult<Vec<String>> {
        let tokenizer = self.tokenizer()?;
        let doc = if self.lowercase {
            doc.to_lowercase()
        } else {
            doc.to_string()
        };
        let tokens: Vec<&str> = tokenizer.find_iter(&doc).map(|m| m.as_str()).collect();

        let (lo, hi) = self.ngram_range;
        let mut terms = Vec::new();
        for n in lo..=hi {
            if n > tokens.len() {
                break;
            }
            terms.extend(tokens.windows(n).map(|w| w.join(" ")));
        }
        Ok(terms)
    }

    fn counts(&self, docs: &[String]) -> EstimatorResult<Array2<f64>> {
        let mut matrix = Array2::<f64>::zeros((docs.len(), self.width()));
        for (row, doc) in docs.iter().enumerate() {
            for term in self.analyze(doc)? {
                if let Some(&col) = self.vocabulary.get(&term) {
                    if self.binary {
                        matrix[[row, col]] = 1.0;
                    } else {
                        matrix[[row, col]] += 1.0;
                    }
                }
            }
        }
        Ok(matrix)
    }
}

/// Row normalization applied after TF-IDF weighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Norm {
    L1,
    L2,
}

fn default_norm() -> Option<Norm> {
    Some(Norm::L2)
}

/// Count vectorizer followed by inverse-document-frequency weighting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    #[serde(flatten)]
    pub counts: CountVectorizer,
    pub idf: Vec<f64>,
    #[serde(default = "default_norm")]
    pub norm: Option<Norm>,
    #[serde(default)]
    pub sublinear_tf: bool,
}

impl TfidfVectorizer {
    fn validate(&self) -> EstimatorResult<()> {
        self.counts.validate()?;
        if self.idf.len() != self.counts.width() {
            return Err(invalid(
                "tfidf_vectorizer",
                format!(
                    "idf has {} weights for {} terms",
                    self.idf.len(),
                    self.counts.width()
                ),
            ));
        }
        Ok(())
    }

    fn transform(&self, docs: &[String]) -> EstimatorResult<Array2<f64>> {
        let mut matrix = self.counts.counts(docs)?;
        if self.sublinear_tf {
            matrix.mapv_inplace(|tf| if tf > 0.0 { 1.0 + tf.ln() } else { 0.0 });
        }
        let idf = Array1::from(self.idf.clone());
        matrix *= &idf;

        if let Some(norm) = self.norm {
            for mut row in matrix.axis_iter_mut(Axis(0)) {
                let length = match norm {
                    Norm::L1 => row.iter().map(|v| v.abs()).sum::<f64>(),
                    Norm::L2 => row.iter().map(|v| v * v).sum::<f64>().sqrt(),
                };
                if length > 0.0 {
                    row /= length;
                }
            }
        }
        Ok(matrix)
    }
}

/// Multinomial naive Bayes over count features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultinomialNb {
    pub class_log_prior: Vec<f64>,
    /// `[classes][features]` log probabilities
    pub feature_log_prob: Vec<Vec<f64>>,
    #[serde(default)]
    pub classes: Option<Vec<f64>>,
}

impl MultinomialNb {
    fn validate(&self) -> EstimatorResult<()> {
        let classes = self.class_log_prior.len();
        if classes == 0 || self.feature_log_prob.len() != classes {
            return Err(invalid(
                "multinomial_nb",
                format!(
                    "{} class priors but {} feature rows",
                    classes,
                    self.feature_log_prob.len()
                ),
            ));
        }
        check_rectangular("multinomial_nb", &self.feature_log_prob)?;
        check_classes("multinomial_nb", self.classes.as_deref(), classes)
    }

    fn width(&self) -> usize {
        self.feature_log_prob.first().map_or(0, Vec::len)
    }

    fn joint_log_likelihood(&self, x: &Array2<f64>) -> EstimatorResult<Array2<f64>> {
        check_width("multinomial_nb", self.width(), x)?;
        let weights = to_matrix(&self.feature_log_prob);
        let mut jll = x.dot(&weights.t());
        jll += &Array1::from(self.class_log_prior.clone());
        Ok(jll)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> EstimatorResult<Array2<f64>> {
        Ok(softmax_rows(self.joint_log_likelihood(x)?))
    }
}

/// Linear classifier with logistic (binary) or softmax (multiclass) link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// One row for binary problems, one row per class otherwise
    pub coef: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
    #[serde(default)]
    pub classes: Option<Vec<f64>>,
}

impl LogisticRegression {
    fn validate(&self) -> EstimatorResult<()> {
        if self.coef.is_empty() || self.coef.len() != self.intercept.len() {
            return Err(invalid(
                "logistic_regression",
                format!(
                    "{} coefficient rows but {} intercepts",
                    self.coef.len(),
                    self.intercept.len()
                ),
            ));
        }
        check_rectangular("logistic_regression", &self.coef)?;
        check_classes("logistic_regression", self.classes.as_deref(), self.n_classes())
    }

    fn n_classes(&self) -> usize {
        if self.coef.len() == 1 {
            2
        } else {
            self.coef.len()
        }
    }

    fn width(&self) -> usize {
        self.coef.first().map_or(0, Vec::len)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> EstimatorResult<Array2<f64>> {
        check_width("logistic_regression", self.width(), x)?;
        let weights = to_matrix(&self.coef);
        let mut z = x.dot(&weights.t());
        z += &Array1::from(self.intercept.clone());

        if self.coef.len() == 1 {
            let mut proba = Array2::<f64>::zeros((x.nrows(), 2));
            for (row, &score) in z.column(0).iter().enumerate() {
                let p = 1.0 / (1.0 + (-score).exp());
                proba[[row, 0]] = 1.0 - p;
                proba[[row, 1]] = p;
            }
            Ok(proba)
        } else {
            Ok(softmax_rows(z))
        }
    }
}

/// Ordinary least squares regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    pub coef: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
}

impl LinearRegression {
    fn predict(&self, x: &Array2<f64>) -> EstimatorResult<Array1<f64>> {
        check_width("linear_regression", self.coef.len(), x)?;
        Ok(x.dot(&Array1::from(self.coef.clone())) + self.intercept)
    }
}

/// Named transform steps followed by a final estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub steps: Vec<(String, Estimator)>,
}

impl Pipeline {
    fn validate(&self) -> EstimatorResult<()> {
        let Some(((_, _), head)) = self.steps.split_last() else {
            return Err(invalid("pipeline", "pipeline has no steps".to_string()));
        };
        for (_, step) in &self.steps {
            step.validate()?;
        }
        for (name, step) in head {
            if !step.capabilities().contains(&Capability::Transform) {
                return Err(invalid(
                    "pipeline",
                    format!("intermediate step '{}' ({}) cannot transform", name, step.name()),
                ));
            }
        }
        Ok(())
    }

    fn final_step(&self) -> Option<&Estimator> {
        self.steps.last().map(|(_, step)| step)
    }

    /// Run every step except the last as a transform; returns the features and the last step
    fn split(&self, input: Features) -> EstimatorResult<(Features, &Estimator)> {
        let Some(((_, last), head)) = self.steps.split_last() else {
            return Err(invalid("pipeline", "pipeline has no steps".to_string()));
        };
        let features = head
            .iter()
            .try_fold(input, |features, (_, step)| step.transform(features))?;
        Ok((features, last))
    }
}

/// A fitted classical estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Estimator {
    CountVectorizer(CountVectorizer),
    TfidfVectorizer(TfidfVectorizer),
    MultinomialNb(MultinomialNb),
    LogisticRegression(LogisticRegression),
    LinearRegression(LinearRegression),
    Pipeline(Pipeline),
}

impl Estimator {
    pub fn name(&self) -> &'static str {
        match self {
            Estimator::CountVectorizer(_) => "count_vectorizer",
            Estimator::TfidfVectorizer(_) => "tfidf_vectorizer",
            Estimator::MultinomialNb(_) => "multinomial_nb",
            Estimator::LogisticRegression(_) => "logistic_regression",
            Estimator::LinearRegression(_) => "linear_regression",
            Estimator::Pipeline(_) => "pipeline",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Estimator::CountVectorizer(_) | Estimator::TfidfVectorizer(_) => {
                [Capability::Transform].into_iter().collect()
            }
            Estimator::MultinomialNb(_) | Estimator::LogisticRegression(_) => {
                [Capability::Predict, Capability::PredictProba]
                    .into_iter()
                    .collect()
            }
            Estimator::LinearRegression(_) => [Capability::Predict].into_iter().collect(),
            Estimator::Pipeline(pipeline) => pipeline
                .final_step()
                .map(Estimator::capabilities)
                .unwrap_or_default(),
        }
    }

    /// Check parameter shapes after deserialization
    pub fn validate(&self) -> EstimatorResult<()> {
        match self {
            Estimator::CountVectorizer(v) => v.validate(),
            Estimator::TfidfVectorizer(v) => v.validate(),
            Estimator::MultinomialNb(nb) => nb.validate(),
            Estimator::LogisticRegression(lr) => lr.validate(),
            Estimator::LinearRegression(_) => Ok(()),
            Estimator::Pipeline(p) => p.validate(),
        }
    }

    /// Whether the first stage consumes raw documents
    pub fn accepts_text(&self) -> bool {
        match self {
            Estimator::CountVectorizer(_) | Estimator::TfidfVectorizer(_) => true,
            Estimator::Pipeline(p) => p.steps.first().is_some_and(|(_, s)| s.accepts_text()),
            _ => false,
        }
    }

    /// Dense feature width consumed, if the first stage takes dense rows
    pub fn input_width(&self) -> Option<usize> {
        match self {
            Estimator::CountVectorizer(_) | Estimator::TfidfVectorizer(_) => None,
            Estimator::MultinomialNb(nb) => Some(nb.width()),
            Estimator::LogisticRegression(lr) => Some(lr.width()),
            Estimator::LinearRegression(lr) => Some(lr.coef.len()),
            Estimator::Pipeline(p) => p.steps.first().and_then(|(_, s)| s.input_width()),
        }
    }

    /// Feature width produced by a transform
    pub fn output_width(&self) -> Option<usize> {
        match self {
            Estimator::CountVectorizer(v) => Some(v.width()),
            Estimator::TfidfVectorizer(v) => Some(v.counts.width()),
            Estimator::Pipeline(p) => p.final_step().and_then(Estimator::output_width),
            _ => None,
        }
    }

    pub fn transform(&self, input: Features) -> EstimatorResult<Features> {
        match self {
            Estimator::CountVectorizer(v) => Ok(Features::Dense(v.counts(expect_text(self, &input)?)?)),
            Estimator::TfidfVectorizer(v) => {
                Ok(Features::Dense(v.transform(expect_text(self, &input)?)?))
            }
            Estimator::Pipeline(p) => {
                let (features, last) = p.split(input)?;
                last.transform(features)
            }
            _ => Err(self.missing(Capability::Transform)),
        }
    }

    /// Class probabilities, shape `[rows, classes]`
    pub fn predict_proba(&self, input: Features) -> EstimatorResult<Array2<f64>> {
        match self {
            Estimator::MultinomialNb(nb) => nb.predict_proba(expect_dense(self, &input)?),
            Estimator::LogisticRegression(lr) => lr.predict_proba(expect_dense(self, &input)?),
            Estimator::Pipeline(p) => {
                let (features, last) = p.split(input)?;
                last.predict_proba(features)
            }
            _ => Err(self.missing(Capability::PredictProba)),
        }
    }

    /// Point predictions: class values for classifiers, targets for regressors
    pub fn predict(&self, input: Features) -> EstimatorResult<Array1<f64>> {
        match self {
            Estimator::MultinomialNb(MultinomialNb { classes, .. })
            | Estimator::LogisticRegression(LogisticRegression { classes, .. }) => {
                let classes = classes.clone();
                let proba = self.predict_proba(input)?;
                Ok(proba
                    .axis_iter(Axis(0))
                    .map(|row| {
                        let idx = argmax(row.iter().copied());
                        classes
                            .as_ref()
                            .map_or(idx as f64, |c| c[idx])
                    })
                    .collect())
            }
            Estimator::LinearRegression(lr) => lr.predict(expect_dense(self, &input)?),
            Estimator::Pipeline(p) => {
                let (features, last) = p.split(input)?;
                last.predict(features)
            }
            _ => Err(self.missing(Capability::Predict)),
        }
    }

    fn missing(&self, capability: Capability) -> EstimatorError {
        EstimatorError::MissingCapability {
            estimator: self.name(),
            capability,
        }
    }
}

fn expect_text<'a>(estimator: &Estimator, input: &'a Features) -> EstimatorResult<&'a [String]> {
    match input {
        Features::Text(docs) => Ok(docs),
        Features::Dense(_) => Err(EstimatorError::WrongInput {
            estimator: estimator.name(),
            expected: "text",
        }),
    }
}

fn expect_dense<'a>(
    estimator: &Estimator,
    input: &'a Features,
) -> EstimatorResult<&'a Array2<f64>> {
    match input {
        Features::Dense(x) => Ok(x),
        Features::Text(_) => Err(EstimatorError::WrongInput {
            estimator: estimator.name(),
            expected: "dense feature",
        }),
    }
}

fn invalid(estimator: &'static str, reason: String) -> EstimatorError {
    EstimatorError::InvalidParameters { estimator, reason }
}

fn check_rectangular(estimator: &'static str, rows: &[Vec<f64>]) -> EstimatorResult<()> {
    let width = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != width) {
        return Err(invalid(estimator, "ragged parameter matrix".to_string()));
    }
    Ok(())
}

fn check_classes(
    estimator: &'static str,
    classes: Option<&[f64]>,
    expected: usize,
) -> EstimatorResult<()> {
    match classes {
        Some(c) if c.len() != expected => Err(invalid(
            estimator,
            format!("{} class values for {} classes", c.len(), expected),
        )),
        _ => Ok(()),
    }
}

fn check_width(estimator: &'static str, expected: usize, x: &Array2<f64>) -> EstimatorResult<()> {
    if x.ncols() != expected {
        return Err(EstimatorError::FeatureMismatch {
            estimator,
            expected,
            actual: x.ncols(),
        });
    }
    Ok(())
}

fn to_matrix(rows: &[Vec<f64>]) -> Array2<f64> {
    let width = rows.first().map_or(0, Vec::len);
    Array2::from_shape_fn((rows.len(), width), |(r, c)| rows[r][c])
}

/// Numerically stable row-wise softmax
fn softmax_rows(mut scores: Array2<f64>) -> Array2<f64> {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row /= total;
    }
    scores
}

fn argmax(values: impl Iterator<Item = f64>) -> usize {
    values
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, max), (i, v)| {
            if v > max {
                (i, v)
            } else {
                (best, max)
            }
        })
        .0
}
