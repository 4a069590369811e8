//! Labelled review dataset loading and splitting.

use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::SentimentError;

/// `(review, label)` pair.
pub type Sample = (String, String);

const REVIEW_COLUMN: &str = "review";
const LABEL_COLUMN: &str = "sentiment";

/// Read a CSV with `review` and `sentiment` header columns.
pub fn load_csv(path: &Path) -> Result<Vec<Sample>, SentimentError> {
    if !path.exists() {
        return Err(SentimentError::Dataset(format!(
            "dataset not found at {}",
            path.display()
        )));
    }
    let reader = csv::Reader::from_path(path)?;
    read_samples(reader)
}

pub fn read_samples<R: std::io::Read>(
    mut reader: csv::Reader<R>,
) -> Result<Vec<Sample>, SentimentError> {
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| SentimentError::Dataset(format!("missing '{name}' column")))
    };
    let review_idx = column(REVIEW_COLUMN)?;
    let label_idx = column(LABEL_COLUMN)?;

    let mut samples = Vec::new();
    for record in reader.records() {
        let record = record?;
        let (Some(review), Some(label)) = (record.get(review_idx), record.get(label_idx)) else {
            continue;
        };
        let label = label.trim();
        if label.is_empty() {
            continue;
        }
        samples.push((review.to_string(), label.to_string()));
    }
    Ok(samples)
}

/// Shuffle with a seeded RNG and hold out `ceil(len * test_size)` samples.
pub fn train_test_split(
    samples: &[Sample],
    test_size: f64,
    seed: u64,
) -> (Vec<Sample>, Vec<Sample>) {
    let mut indices: Vec<usize> = (0..samples.len()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let fraction = test_size.clamp(0.0, 1.0);
    let n_test = ((samples.len() as f64) * fraction).ceil() as usize;

    let (test_idx, train_idx) = indices.split_at(n_test.min(samples.len()));
    let pick = |idx: &[usize]| idx.iter().map(|&i| samples[i].clone()).collect::<Vec<_>>();
    (pick(train_idx), pick(test_idx))
}
