//! Applying a fitted bias model to new questions
//!
//! One scalar bias b is computed per question and subtracted from every raw
//! response for it:
//!
//! factor path:   b = z(x)·β,  z(x) the factor score of embedding x
//! transfer path: b = x·β
//!
//! debiased_i = raw_i − b

use crate::error::{ModelError, Result};
use crate::factor::FactorModel;
use crate::types::{DebiasedResult, NewQuestionItem};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// A frozen, fitted bias model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BiasModel {
    /// Factor model plus coefficients over its k factor scores
    Factor {
        /// Embedding-to-score mapping
        factor_model: FactorModel,
        /// Coefficients, length k
        beta: Array1<f64>,
    },
    /// Coefficients applied directly to embeddings
    Transfer {
        /// Coefficients, length D
        beta: Array1<f64>,
    },
}

impl BiasModel {
    /// Factor-path model; `beta` must have one entry per factor.
    pub fn factor(factor_model: FactorModel, beta: Array1<f64>) -> Result<Self> {
        let model = Self::Factor { factor_model, beta };
        model.validate()?;
        Ok(model)
    }

    /// Transfer-path model.
    pub fn transfer(beta: Array1<f64>) -> Result<Self> {
        let model = Self::Transfer { beta };
        model.validate()?;
        Ok(model)
    }

    /// Check that β matches the model's space and is finite.
    ///
    /// Models read from disk bypass the constructors, so callers loading a
    /// model should run this once.
    pub fn validate(&self) -> Result<()> {
        let beta = self.beta();
        if let Self::Factor { factor_model, .. } = self
            && beta.len() != factor_model.n_factors()
        {
            return Err(ModelError::DimensionMismatch {
                expected: factor_model.n_factors(),
                actual: beta.len(),
            });
        }
        if beta.is_empty() {
            return Err(ModelError::Configuration(
                "bias coefficients must be non-empty".to_string(),
            ));
        }
        if beta.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::non_finite("bias coefficients"));
        }
        Ok(())
    }

    /// The coefficient vector
    pub const fn beta(&self) -> &Array1<f64> {
        match self {
            Self::Factor { beta, .. } | Self::Transfer { beta } => beta,
        }
    }

    /// Embedding dimension the model accepts
    pub fn dimension(&self) -> usize {
        match self {
            Self::Factor { factor_model, .. } => factor_model.dimension(),
            Self::Transfer { beta } => beta.len(),
        }
    }

    /// Short name of the fitting path
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Factor { .. } => "factor",
            Self::Transfer { .. } => "transfer",
        }
    }

    /// Predicted bias for one embedding.
    ///
    /// # Errors
    /// * Dimension mismatch if the embedding width differs from the model's
    /// * Numerical error if the embedding or the resulting bias is non-finite
    pub fn predict_bias(&self, embedding: &ArrayView1<'_, f64>) -> Result<f64> {
        if embedding.len() != self.dimension() {
            return Err(ModelError::DimensionMismatch {
                expected: self.dimension(),
                actual: embedding.len(),
            });
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::non_finite("embedding"));
        }

        let bias = match self {
            Self::Factor { factor_model, beta } => {
                let scores = factor_model.transform_one(embedding)?;
                if scores.len() != beta.len() {
                    return Err(ModelError::DimensionMismatch {
                        expected: scores.len(),
                        actual: beta.len(),
                    });
                }
                scores.dot(beta)
            }
            Self::Transfer { beta } => embedding.dot(beta),
        };

        if !bias.is_finite() {
            return Err(ModelError::Numerical(format!("predicted bias {bias} is not finite")));
        }
        Ok(bias)
    }
}

/// Subtract one scalar from every response, keeping order.
pub fn shift_responses(raw: &[f64], bias: f64) -> Vec<f64> {
    raw.iter().map(|r| r - bias).collect()
}

/// Applies a fitted model to new questions
#[derive(Debug, Clone, Copy)]
pub struct DebiasTransform<'a> {
    model: &'a BiasModel,
}

impl<'a> DebiasTransform<'a> {
    /// Bind a fitted model
    pub const fn new(model: &'a BiasModel) -> Self {
        Self { model }
    }

    /// The bound model
    pub const fn model(&self) -> &'a BiasModel {
        self.model
    }

    /// Debias the raw responses of one question.
    pub fn apply(&self, embedding: &ArrayView1<'_, f64>, raw_responses: &[f64]) -> Result<(f64, Vec<f64>)> {
        let bias = self.model.predict_bias(embedding)?;
        Ok((bias, shift_responses(raw_responses, bias)))
    }

    /// Debias one new question item.
    pub fn debias(&self, item: &NewQuestionItem) -> Result<DebiasedResult> {
        let embedding = ArrayView1::from(item.embedding.as_slice());
        let (bias, debiased_responses) = self.apply(&embedding, &item.raw_llm_responses)?;
        Ok(DebiasedResult {
            question_text: item.question_text.clone(),
            raw_llm_responses: item.raw_llm_responses.clone(),
            bias,
            debiased_responses,
        })
    }

    /// Debias many items with the same model; stops at the first failure.
    pub fn debias_batch(&self, items: &[NewQuestionItem]) -> Result<Vec<DebiasedResult>> {
        items.iter().map(|item| self.debias(item)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::FactorExtractor;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn transfer_model() -> BiasModel {
        BiasModel::transfer(array![0.5, 0.0, -0.25]).unwrap()
    }

    #[test]
    fn test_uniform_shift() {
        let model = transfer_model();
        let item = NewQuestionItem::new("q", vec![1.0, 3.0, 0.0], vec![5.0, 6.0, 4.5]);
        let result = DebiasTransform::new(&model).debias(&item).unwrap();

        assert_abs_diff_eq!(result.bias, 0.5);
        assert_eq!(result.debiased_responses, vec![4.5, 5.5, 4.0]);
        assert_eq!(result.raw_llm_responses, vec![5.0, 6.0, 4.5]);
        assert_eq!(result.question_text, "q");
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let model = transfer_model();
        let transform = DebiasTransform::new(&model);
        let item = NewQuestionItem::new("q", vec![0.3, -1.7, 2.2], vec![1.1, 2.9, 3.3, 4.0]);
        let a = transform.debias(&item).unwrap();
        let b = transform.debias(&item).unwrap();
        assert_eq!(a, b);
        for (raw, out) in a.raw_llm_responses.iter().zip(&a.debiased_responses) {
            assert_abs_diff_eq!(raw - out, a.bias, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_empty_responses() {
        let model = transfer_model();
        let item = NewQuestionItem::new("q", vec![1.0, 0.0, 0.0], vec![]);
        let result = DebiasTransform::new(&model).debias(&item).unwrap();
        assert!(result.debiased_responses.is_empty());
    }

    #[test]
    fn test_wrong_dimension_is_rejected() {
        let model = transfer_model();
        let item = NewQuestionItem::new("q", vec![1.0, 0.0], vec![3.0]);
        let err = DebiasTransform::new(&model).debias(&item).unwrap_err();
        assert!(matches!(
            err,
            ModelError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_non_finite_embedding_is_numerical() {
        let model = transfer_model();
        let err = model
            .predict_bias(&array![f64::INFINITY, 0.0, 0.0].view())
            .unwrap_err();
        assert!(err.is_numerical());
    }

    #[test]
    fn test_batch_keeps_order() {
        let model = transfer_model();
        let items = vec![
            NewQuestionItem::new("a", vec![2.0, 0.0, 0.0], vec![3.0]),
            NewQuestionItem::new("b", vec![0.0, 0.0, 4.0], vec![3.0]),
        ];
        let results = DebiasTransform::new(&model).debias_batch(&items).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].question_text, "a");
        assert_abs_diff_eq!(results[0].debiased_responses[0], 2.0);
        assert_abs_diff_eq!(results[1].debiased_responses[0], 4.0);
    }

    fn factor_model() -> BiasModel {
        let x = Array2::from_shape_fn((10, 4), |(i, j)| {
            let a = (i as f64 * 0.7).sin();
            let b = (i as f64 * 1.3).cos();
            a * [1.0, 0.5, -0.2, 0.3][j] + b * [0.1, -0.4, 0.9, 0.2][j] + 0.01 * ((i * 4 + j) % 3) as f64
        });
        let fit = FactorExtractor::default().fit(&x.view(), 2).unwrap();
        BiasModel::factor(fit.model, array![0.3, -0.1]).unwrap()
    }

    #[test]
    fn test_factor_path_bias_is_score_dot_beta() {
        let model = factor_model();
        let embedding = array![0.2, -0.1, 0.4, 0.0];
        let bias = model.predict_bias(&embedding.view()).unwrap();
        let BiasModel::Factor { factor_model, beta } = &model else {
            panic!("expected factor model");
        };
        let scores = factor_model.transform_one(&embedding.view()).unwrap();
        assert_abs_diff_eq!(bias, scores.dot(beta), epsilon = 1e-12);
        assert_eq!(model.dimension(), 4);
        assert_eq!(model.kind(), "factor");
    }

    #[test]
    fn test_factor_beta_length_checked() {
        let BiasModel::Factor { factor_model, .. } = factor_model() else {
            panic!("expected factor model");
        };
        let err = BiasModel::factor(factor_model, array![1.0, 2.0, 3.0]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_model_json_roundtrip() {
        let model = factor_model();
        let json = serde_json::to_string(&model).unwrap();
        assert!(json.contains("\"kind\":\"factor\""));
        let back: BiasModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model);

        let transfer = transfer_model();
        let back: BiasModel = serde_json::from_str(&serde_json::to_string(&transfer).unwrap()).unwrap();
        assert_eq!(back, transfer);
    }
}
