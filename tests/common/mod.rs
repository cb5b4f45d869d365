//! Shared fixtures: every model file is generated in the test itself

#![allow(dead_code)]

use inference_adapter::models::classical::{CountVectorizer, Estimator, MultinomialNb, Pipeline};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const SPAM_EXAMPLES: [&str; 8] = [
    "CONGRATULATIONS! You've WON! Click here to claim your prize!!!",
    "GET RICH QUICK! Amazing investment opportunity!",
    "FREE MONEY! Limited time offer! Act now!",
    "You've won $1,000,000 in the lottery!",
    "URGENT: Your account needs verification",
    "Buy now! Special discount! Limited time!!!",
    "Make money fast! Work from home!",
    "100% Free credit card! Apply now!",
];

pub const HAM_EXAMPLES: [&str; 8] = [
    "Hi John, let's meet for coffee tomorrow at 3pm.",
    "Meeting reminder: Team sync at 10am",
    "Your order has been shipped. Tracking: ABC123",
    "Thanks for your email. I'll get back to you soon.",
    "Project update: milestone 1 completed",
    "Please review the attached document",
    "Looking forward to seeing you tomorrow",
    "Your package has been delivered",
];

/// Fit a count vectorizer + multinomial NB (alpha = 1) on the examples; class 0 is ham
pub fn fit_spam_model() -> (CountVectorizer, MultinomialNb) {
    let analyzer = CountVectorizer::from_terms(Vec::<String>::new());
    let docs: Vec<(usize, Vec<String>)> = HAM_EXAMPLES
        .iter()
        .map(|d| (0, *d))
        .chain(SPAM_EXAMPLES.iter().map(|d| (1, *d)))
        .map(|(class, doc)| (class, analyzer.analyze(doc).unwrap()))
        .collect();

    let terms: BTreeSet<&str> = docs
        .iter()
        .flat_map(|(_, terms)| terms.iter().map(String::as_str))
        .collect();
    let vectorizer = CountVectorizer::from_terms(terms.iter().copied());
    let width = vectorizer.width();

    let mut counts = vec![vec![0.0f64; width]; 2];
    let mut class_docs = [0.0f64; 2];
    for (class, doc_terms) in &docs {
        class_docs[*class] += 1.0;
        for term in doc_terms {
            counts[*class][vectorizer.vocabulary[term]] += 1.0;
        }
    }

    let total_docs: f64 = class_docs.iter().sum();
    let feature_log_prob = counts
        .iter()
        .map(|row| {
            let total: f64 = row.iter().sum::<f64>() + width as f64;
            row.iter().map(|c| ((c + 1.0) / total).ln()).collect()
        })
        .collect();

    let nb = MultinomialNb {
        class_log_prior: class_docs.iter().map(|n| (n / total_docs).ln()).collect(),
        feature_log_prob,
        classes: Some(vec![0.0, 1.0]),
    };
    (vectorizer, nb)
}

pub fn spam_pipeline() -> Estimator {
    let (vectorizer, nb) = fit_spam_model();
    Estimator::Pipeline(Pipeline {
        steps: vec![
            ("vectorizer".to_string(), Estimator::CountVectorizer(vectorizer)),
            ("classifier".to_string(), Estimator::MultinomialNb(nb)),
        ],
    })
}

pub fn spam_bundle(metadata: Value) -> Value {
    let (vectorizer, nb) = fit_spam_model();
    json!({
        "model": Estimator::MultinomialNb(nb),
        "vectorizer": Estimator::CountVectorizer(vectorizer),
        "metadata": metadata,
    })
}

pub fn write_file(dir: &Path, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

pub fn write_json(dir: &Path, name: &str, value: &impl serde::Serialize) -> PathBuf {
    write_file(dir, name, serde_json::to_vec(value).unwrap())
}
