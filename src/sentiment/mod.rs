//! Sentiment classifier: bag-of-words counts fed to a binary logistic
//! regression, trained on a labelled review CSV and persisted as JSON.

pub mod dataset;
pub mod logistic;
pub mod preprocess;
pub mod vectorizer;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SentimentConfig;
use crate::error::SentimentError;
use logistic::{LogisticRegression, SolverOptions};
use preprocess::preprocess;
use vectorizer::CountVectorizer;

/// Training hyper-parameters.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub max_features: usize,
    pub max_iter: usize,
    /// Held-out fraction used for the accuracy figure.
    pub test_size: f64,
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            max_features: 10_000,
            max_iter: 1000,
            test_size: 0.2,
            seed: 42,
        }
    }
}

impl From<&SentimentConfig> for TrainOptions {
    fn from(config: &SentimentConfig) -> Self {
        Self {
            max_features: config.max_features,
            max_iter: config.max_iter,
            ..Self::default()
        }
    }
}

/// Figures reported after a training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainSummary {
    pub samples: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub vocabulary: usize,
    /// `None` when nothing was held out.
    pub accuracy: Option<f64>,
}

/// Vectorizer and classifier, persisted together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentModel {
    vectorizer: CountVectorizer,
    classifier: LogisticRegression,
}

impl SentimentModel {
    pub fn train(
        samples: &[dataset::Sample],
        options: &TrainOptions,
    ) -> Result<(Self, TrainSummary), SentimentError> {
        let (train, test) = dataset::train_test_split(samples, options.test_size, options.seed);

        let docs: Vec<String> = train.iter().map(|(review, _)| preprocess(review)).collect();
        let labels: Vec<String> = train.iter().map(|(_, label)| label.clone()).collect();

        let vectorizer = CountVectorizer::fit(&docs, options.max_features);
        let features: Vec<_> = docs.iter().map(|d| vectorizer.transform(d)).collect();

        let solver = SolverOptions {
            max_iter: options.max_iter,
            ..SolverOptions::default()
        };
        let classifier = LogisticRegression::fit(&features, &labels, vectorizer.len(), &solver)?;

        let model = Self {
            vectorizer,
            classifier,
        };
        let accuracy = model.accuracy(&test);
        let summary = TrainSummary {
            samples: samples.len(),
            train_samples: train.len(),
            test_samples: test.len(),
            vocabulary: model.vectorizer.len(),
            accuracy,
        };
        Ok((model, summary))
    }

    /// Predicted label for raw (unpreprocessed) text.
    pub fn predict(&self, text: &str) -> &str {
        let features = self.vectorizer.transform(&preprocess(text));
        self.classifier.predict(&features)
    }

    /// Fraction of `samples` predicted correctly, `None` if empty.
    pub fn accuracy(&self, samples: &[dataset::Sample]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let correct = samples
            .iter()
            .filter(|(review, label)| self.predict(review) == label)
            .count();
        Some(correct as f64 / samples.len() as f64)
    }

    pub fn save(&self, path: &Path) -> Result<(), SentimentError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SentimentError> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SentimentError::Persistence(format!("{}: {e}", path.display())))
    }
}

/// Result of a training request.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainOutcome {
    Trained(TrainSummary),
    AlreadyTrained,
    InProgress,
}

/// Releases the training slot on drop, including when training panics.
struct TrainingGuard<'a>(&'a AtomicBool);

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Shared classifier handle used by the HTTP layer and the sentiment
/// responder.
pub struct SentimentService {
    config: SentimentConfig,
    model: RwLock<Option<Arc<SentimentModel>>>,
    training: AtomicBool,
}

impl SentimentService {
    /// Service with no model loaded.
    pub fn new(config: SentimentConfig) -> Self {
        Self {
            config,
            model: RwLock::new(None),
            training: AtomicBool::new(false),
        }
    }

    /// Service with the persisted model loaded if one exists. A missing or
    /// unreadable model file leaves the service unloaded.
    pub fn load(config: SentimentConfig) -> Self {
        let service = Self::new(config);
        let path = service.config.model_path.clone();
        if !path.exists() {
            info!(path = %path.display(), "No persisted sentiment model");
            return service;
        }
        match SentimentModel::load(&path) {
            Ok(model) => {
                info!(path = %path.display(), "Loaded sentiment model");
                service.install(model);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to load sentiment model"),
        }
        service
    }

    pub fn is_loaded(&self) -> bool {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn install(&self, model: SentimentModel) {
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(model));
    }

    pub fn predict(&self, text: &str) -> Result<String, SentimentError> {
        let model = self
            .model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SentimentError::NotLoaded)?;
        Ok(model.predict(text).to_string())
    }

    /// Train from the configured dataset, persist, and install the result.
    ///
    /// Blocking; run it on a blocking thread from async code. Never retrains
    /// over an already-loaded model.
    pub fn train(&self) -> Result<TrainOutcome, SentimentError> {
        if self.is_loaded() {
            return Ok(TrainOutcome::AlreadyTrained);
        }
        let Some(_guard) = self.begin_training() else {
            return Ok(TrainOutcome::InProgress);
        };
        self.train_inner().map(TrainOutcome::Trained)
    }

    /// Claim the training slot. `None` while another training run holds it.
    fn begin_training(&self) -> Option<TrainingGuard<'_>> {
        if self.training.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(TrainingGuard(&self.training))
    }

    fn train_inner(&self) -> Result<TrainSummary, SentimentError> {
        let samples = dataset::load_csv(&self.config.dataset_path)?;
        info!(
            samples = samples.len(),
            path = %self.config.dataset_path.display(),
            "Training sentiment model"
        );

        let (model, summary) = SentimentModel::train(&samples, &TrainOptions::from(&self.config))?;
        model.save(&self.config.model_path)?;
        info!(
            vocabulary = summary.vocabulary,
            accuracy = ?summary.accuracy,
            path = %self.config.model_path.display(),
            "Sentiment model trained and saved"
        );
        self.install(model);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DATASET: &str = "review,sentiment
\"A wonderful, moving film. Great acting!\",positive
\"Great story<br />and excellent cast\",positive
Loved every wonderful and excellent minute,positive
Excellent direction and great music,positive
\"Wonderful, great fun\",positive
\"Terrible plot, awful acting\",negative
Boring and awful. A waste,negative
Terrible script and boring pace,negative
\"Awful, terrible, boring\",negative
Boring cast and terrible music,negative
";

    fn write_dataset(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("reviews.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(DATASET.as_bytes()).unwrap();
        path
    }

    fn config(dir: &tempfile::TempDir) -> SentimentConfig {
        SentimentConfig {
            model_path: dir.path().join("bin").join("model.json"),
            dataset_path: write_dataset(dir),
            max_features: 100,
            max_iter: 300,
        }
    }

    #[test]
    fn predict_without_model_is_not_loaded() {
        let service = SentimentService::new(SentimentConfig::default());
        assert!(matches!(service.predict("hi"), Err(SentimentError::NotLoaded)));
    }

    #[test]
    fn train_persists_and_predicts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let service = SentimentService::new(config.clone());

        let outcome = service.train().unwrap();
        let TrainOutcome::Trained(summary) = outcome else {
            panic!("expected a trained outcome, got {outcome:?}");
        };
        assert_eq!(summary.samples, 10);
        assert_eq!(summary.test_samples, 2);
        assert!(summary.vocabulary > 0);
        assert!(summary.accuracy.is_some());
        assert!(config.model_path.exists());

        assert_eq!(service.predict("awful, terrible and boring").unwrap(), "negative");
        assert_eq!(service.predict("wonderful, great and excellent").unwrap(), "positive");
    }

    #[test]
    fn training_slot_is_released_after_panic() {
        let service = SentimentService::new(SentimentConfig::default());

        let guard = service.begin_training().unwrap();
        assert!(service.begin_training().is_none());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _held = guard;
            panic!("vectorizer blew up");
        }));
        assert!(result.is_err());

        assert!(service.begin_training().is_some());
    }

    #[test]
    fn second_train_reports_already_trained() {
        let dir = tempfile::tempdir().unwrap();
        let service = SentimentService::new(config(&dir));
        service.train().unwrap();
        assert_eq!(service.train().unwrap(), TrainOutcome::AlreadyTrained);
    }

    #[test]
    fn load_picks_up_saved_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        SentimentService::new(config.clone()).train().unwrap();

        let reloaded = SentimentService::load(config);
        assert!(reloaded.is_loaded());
        assert_eq!(reloaded.predict("boring, awful, terrible").unwrap(), "negative");
    }

    #[test]
    fn load_with_corrupt_file_stays_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        std::fs::write(&config.model_path, b"not json").unwrap();

        let service = SentimentService::load(config);
        assert!(!service.is_loaded());
    }

    #[test]
    fn missing_dataset_fails_training() {
        let dir = tempfile::tempdir().unwrap();
        let service = SentimentService::new(SentimentConfig {
            model_path: dir.path().join("model.json"),
            dataset_path: dir.path().join("absent.csv"),
            ..SentimentConfig::default()
        });
        assert!(matches!(service.train(), Err(SentimentError::Dataset(_))));
        assert!(!service.is_loaded());
    }

    #[test]
    fn training_is_deterministic() {
        let rows: Vec<dataset::Sample> = DATASET
            .lines()
            .skip(1)
            .filter_map(|l| l.rsplit_once(','))
            .map(|(r, s)| (r.to_string(), s.to_string()))
            .collect();
        let (a, sa) = SentimentModel::train(&rows, &TrainOptions::default()).unwrap();
        let (b, sb) = SentimentModel::train(&rows, &TrainOptions::default()).unwrap();
        assert_eq!(sa, sb);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
