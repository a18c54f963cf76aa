//! Calibration-set evaluation of a fitted model
//!
//! Compares model averages against human averages before and after
//! correction:
//!
//! raw_mse      = (1/n) Σ (avg_llm_i − avg_human_i)²
//! debiased_mse = (1/n) Σ (avg_llm_i − b_i − avg_human_i)²

use crate::error::Result;
use crate::transform::BiasModel;
use crate::types::CalibrationSet;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Per-question evaluation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEvaluation {
    /// Question text
    pub question_text: String,
    /// Human average
    pub avg_human_response: f64,
    /// Raw model average
    pub avg_llm_response: f64,
    /// Predicted bias b
    pub predicted_bias: f64,
    /// avg_llm − b
    pub debiased_average: f64,
}

/// Error summary over a calibration set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Per-question rows in set order
    pub items: Vec<ItemEvaluation>,
    /// MSE of the raw model averages against human averages
    pub raw_mse: f64,
    /// MSE of the debiased averages against human averages
    pub debiased_mse: f64,
}

impl EvaluationReport {
    /// Relative MSE reduction, 1 − debiased / raw (`None` when raw MSE is zero)
    pub fn improvement(&self) -> Option<f64> {
        (self.raw_mse > 0.0).then(|| 1.0 - self.debiased_mse / self.raw_mse)
    }
}

/// Evaluate `model` on every item of `set`.
pub fn evaluate(model: &BiasModel, set: &CalibrationSet) -> Result<EvaluationReport> {
    let items = set
        .items()
        .iter()
        .map(|item| {
            let predicted_bias = model.predict_bias(&ArrayView1::from(item.embedding.as_slice()))?;
            Ok(ItemEvaluation {
                question_text: item.question_text.clone(),
                avg_human_response: item.avg_human_response,
                avg_llm_response: item.avg_llm_response,
                predicted_bias,
                debiased_average: item.avg_llm_response - predicted_bias,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let n = items.len() as f64;
    let raw_mse = items
        .iter()
        .map(|it| (it.avg_llm_response - it.avg_human_response).powi(2))
        .sum::<f64>()
        / n;
    let debiased_mse = items
        .iter()
        .map(|it| (it.debiased_average - it.avg_human_response).powi(2))
        .sum::<f64>()
        / n;

    Ok(EvaluationReport {
        items,
        raw_mse,
        debiased_mse,
    })
}
