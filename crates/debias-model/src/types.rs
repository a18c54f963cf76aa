//! Calibration and request records.
//!
//! Serde field names follow the survey data files the calibration store is
//! built from (`Question`, `Embedding`, `Average_Human_Response`, ...), so
//! records deserialize from those files without a translation layer.

use crate::error::{ModelError, Result};
use crate::linalg::all_finite;
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// A calibration question with known human and model average responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationItem {
    /// Question text
    #[serde(rename = "Question")]
    pub question_text: String,

    /// Text embedding of the question
    #[serde(rename = "Embedding")]
    pub embedding: Vec<f64>,

    /// Average response of human respondents
    #[serde(rename = "Average_Human_Response")]
    pub avg_human_response: f64,

    /// Average response of simulated (model) respondents
    #[serde(rename = "Average_LLM_Response")]
    pub avg_llm_response: f64,
}

impl CalibrationItem {
    /// Create a new calibration item.
    pub fn new(
        question_text: impl Into<String>,
        embedding: Vec<f64>,
        avg_human_response: f64,
        avg_llm_response: f64,
    ) -> Self {
        Self {
            question_text: question_text.into(),
            embedding,
            avg_human_response,
            avg_llm_response,
        }
    }

    /// Observed bias: model average minus human average.
    pub fn delta(&self) -> f64 {
        self.avg_llm_response - self.avg_human_response
    }
}

/// Ordered, validated collection of calibration items sharing one embedding dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CalibrationSet {
    items: Vec<CalibrationItem>,
}

impl CalibrationSet {
    /// Build a calibration set, checking that it is non-empty, rectangular and finite.
    pub fn new(items: Vec<CalibrationItem>) -> Result<Self> {
        let first = items.first().ok_or(ModelError::InsufficientData {
            required: 1,
            actual: 0,
        })?;
        let dimension = first.embedding.len();
        if dimension == 0 {
            return Err(ModelError::Configuration(
                "calibration embeddings must have at least one dimension".to_string(),
            ));
        }

        for item in &items {
            if item.embedding.len() != dimension {
                return Err(ModelError::DimensionMismatch {
                    expected: dimension,
                    actual: item.embedding.len(),
                });
            }
            if !all_finite(item.embedding.iter())
                || !item.avg_human_response.is_finite()
                || !item.avg_llm_response.is_finite()
            {
                return Err(ModelError::non_finite(&format!(
                    "calibration item '{}'",
                    item.question_text
                )));
            }
        }

        Ok(Self { items })
    }

    /// Number of items (n).
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always false; construction rejects empty sets.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Embedding dimension (D).
    pub fn dimension(&self) -> usize {
        self.items.first().map_or(0, |item| item.embedding.len())
    }

    /// The underlying items in order.
    pub fn items(&self) -> &[CalibrationItem] {
        &self.items
    }

    /// Stack embeddings into an n x D matrix.
    ///
    /// # Errors
    /// Configuration error if the embeddings do not share one width.
    pub fn embedding_matrix(&self) -> Result<Array2<f64>> {
        let (n, d) = (self.len(), self.dimension());
        let flat: Vec<f64> = self
            .items
            .iter()
            .flat_map(|item| item.embedding.iter().copied())
            .collect();
        Array2::from_shape_vec((n, d), flat)
            .map_err(|e| ModelError::Configuration(format!("ragged calibration embeddings: {e}")))
    }

    /// Per-item bias targets: `avg_llm_response - avg_human_response`.
    pub fn deltas(&self) -> Array1<f64> {
        self.items.iter().map(CalibrationItem::delta).collect()
    }

    /// Seeded shuffle into a training set of `train_size` items and a validation set of the rest.
    pub fn split(&self, train_size: usize, seed: u64) -> Result<(Self, Self)> {
        if train_size == 0 || train_size >= self.len() {
            return Err(ModelError::Configuration(format!(
                "train size {train_size} must be between 1 and {}",
                self.len().saturating_sub(1)
            )));
        }

        let mut shuffled = self.items.clone();
        let mut rng = StdRng::seed_from_u64(seed);
        shuffled.shuffle(&mut rng);
        let valid = shuffled.split_off(train_size);

        Ok((Self { items: shuffled }, Self { items: valid }))
    }
}

impl<'de> Deserialize<'de> for CalibrationSet {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let items = Vec::<CalibrationItem>::deserialize(deserializer)?;
        Self::new(items).map_err(serde::de::Error::custom)
    }
}

/// A new question with raw simulated responses awaiting correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuestionItem {
    /// Question text
    pub question_text: String,

    /// Text embedding of the question
    pub embedding: Vec<f64>,

    /// Raw simulated responses, one per simulated respondent
    pub raw_llm_responses: Vec<f64>,
}

impl NewQuestionItem {
    /// Create a new question item.
    pub fn new(
        question_text: impl Into<String>,
        embedding: Vec<f64>,
        raw_llm_responses: Vec<f64>,
    ) -> Self {
        Self {
            question_text: question_text.into(),
            embedding,
            raw_llm_responses,
        }
    }
}

/// Debiased responses for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebiasedResult {
    /// Question text
    pub question_text: String,

    /// Raw simulated responses, unchanged
    pub raw_llm_responses: Vec<f64>,

    /// The single bias estimate subtracted from every response
    pub bias: f64,

    /// `raw - bias` for each response, same order as the raw responses
    pub debiased_responses: Vec<f64>,
}
