//! Adam moment state
//!
//! Keeps bias-corrected exponential moving averages of the gradient and its
//! square per coefficient:
//!
//! m_t = β₁ m_{t−1} + (1 − β₁) g_t
//! v_t = β₂ v_{t−1} + (1 − β₂) g_t²
//! θ_t = θ_{t−1} − lr · m̂_t / (√v̂_t + ε),   m̂_t = m_t / (1 − β₁ᵗ), v̂_t = v_t / (1 − β₂ᵗ)

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Adam hyperparameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AdamConfig {
    /// Decay rate of the first moment (default: 0.9)
    pub beta1: f64,
    /// Decay rate of the second moment (default: 0.999)
    pub beta2: f64,
    /// Denominator offset (default: 1e-8)
    pub epsilon: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Optimizer state: first moment, second moment and step count
#[derive(Debug, Clone, PartialEq)]
pub struct AdamState {
    first_moment: Array1<f64>,
    second_moment: Array1<f64>,
    step_count: u64,
    config: AdamConfig,
}

impl AdamState {
    /// Zeroed state for `n_params` coefficients
    pub fn new(n_params: usize, config: AdamConfig) -> Self {
        Self {
            first_moment: Array1::zeros(n_params),
            second_moment: Array1::zeros(n_params),
            step_count: 0,
            config,
        }
    }

    /// Number of steps taken
    pub const fn step_count(&self) -> u64 {
        self.step_count
    }

    /// First moment estimate m_t
    pub const fn first_moment(&self) -> &Array1<f64> {
        &self.first_moment
    }

    /// Second moment estimate v_t
    pub const fn second_moment(&self) -> &Array1<f64> {
        &self.second_moment
    }

    /// Fold in `gradient` and move `params` one step.
    pub fn step(&mut self, params: &mut Array1<f64>, gradient: &Array1<f64>, learning_rate: f64) {
        let AdamConfig {
            beta1,
            beta2,
            epsilon,
        } = self.config;

        self.step_count = self.step_count.saturating_add(1);
        self.first_moment
            .zip_mut_with(gradient, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        self.second_moment
            .zip_mut_with(gradient, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        // β^t underflows to 0 long before t leaves i32 range
        let t = i32::try_from(self.step_count).unwrap_or(i32::MAX);
        let first_correction = 1.0 - beta1.powi(t);
        let second_correction = 1.0 - beta2.powi(t);

        for ((theta, m), v) in params
            .iter_mut()
            .zip(self.first_moment.iter())
            .zip(self.second_moment.iter())
        {
            let m_hat = m / first_correction;
            let v_hat = v / second_correction;
            *theta -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
        }
    }
}
