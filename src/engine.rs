//! First-order gradient step engine over the displacement field.
//!
//! Wraps a single (F×3) parameter array with either momentum SGD or Adam.
//! The engine owns the accumulated gradient buffer plus whatever running-
//! average state its rule needs; that state persists across the whole run
//! by design, unlike the mechanical model's per-iteration caches. The
//! public contract is two operations: `zero_grad` before each backward
//! pass, `step` after it.

use crate::types::UpdateRule;
use ndarray::Array2;

#[derive(Debug)]
pub struct DescentEngine {
    pub lr: f64,
    /// Momentum coefficient μ (SGD rule only).
    pub momentum: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    rule: UpdateRule,
    t: u32,
    grad: Array2<f64>,
    /// SGD velocity buffer.
    velocity: Array2<f64>,
    /// Adam first/second moment buffers.
    m: Array2<f64>,
    v: Array2<f64>,
}

impl DescentEngine {
    /// Engine for a parameter array with `free_count` rows.
    pub fn new(rule: UpdateRule, lr: f64, momentum: f64, free_count: usize) -> Self {
        Self {
            lr,
            momentum,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            rule,
            t: 0,
            grad: Array2::zeros((free_count, 3)),
            velocity: Array2::zeros((free_count, 3)),
            m: Array2::zeros((free_count, 3)),
            v: Array2::zeros((free_count, 3)),
        }
    }

    /// Clear the accumulated gradient. Idempotent; must run before each
    /// iteration's gradient accumulation so gradients never sum across
    /// iterations.
    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn grad(&self) -> &Array2<f64> {
        &self.grad
    }

    /// Accumulation target for the current iteration's backward pass.
    pub fn grad_mut(&mut self) -> &mut Array2<f64> {
        &mut self.grad
    }

    /// Apply one update step in place using the accumulated gradient.
    pub fn step(&mut self, params: &mut Array2<f64>) {
        assert_eq!(params.raw_dim(), self.grad.raw_dim());
        match self.rule {
            UpdateRule::Sgd => self.step_sgd(params),
            UpdateRule::Adam => self.step_adam(params),
        }
    }

    /// v ← μv + g;  p ← p − lr·v
    fn step_sgd(&mut self, params: &mut Array2<f64>) {
        for r in 0..params.nrows() {
            for d in 0..3 {
                let g = self.grad[[r, d]];
                let v = self.momentum * self.velocity[[r, d]] + g;
                self.velocity[[r, d]] = v;
                params[[r, d]] -= self.lr * v;
            }
        }
    }

    fn step_adam(&mut self, params: &mut Array2<f64>) {
        self.t += 1;
        let t = self.t as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);

        for r in 0..params.nrows() {
            for d in 0..3 {
                let g = self.grad[[r, d]];
                let m = self.m[[r, d]] * self.beta1 + g * (1.0 - self.beta1);
                let v = self.v[[r, d]] * self.beta2 + g * g * (1.0 - self.beta2);
                self.m[[r, d]] = m;
                self.v[[r, d]] = v;

                let m_hat = m / bias1;
                let v_hat = v / bias2;
                params[[r, d]] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sgd_moves_against_gradient() {
        let mut engine = DescentEngine::new(UpdateRule::Sgd, 0.1, 0.0, 1);
        let mut params = Array2::from_shape_vec((1, 3), vec![1.0, 1.0, 1.0]).unwrap();
        engine.grad_mut()[[0, 0]] = 2.0;
        engine.step(&mut params);
        assert_relative_eq!(params[[0, 0]], 0.8);
        assert_relative_eq!(params[[0, 1]], 1.0);
    }

    #[test]
    fn sgd_momentum_accumulates_velocity() {
        let mut engine = DescentEngine::new(UpdateRule::Sgd, 1.0, 0.5, 1);
        let mut params = Array2::zeros((1, 3));
        engine.grad_mut()[[0, 0]] = 1.0;
        engine.step(&mut params); // v = 1, p = -1
        engine.step(&mut params); // v = 1.5, p = -2.5
        assert_relative_eq!(params[[0, 0]], -2.5);
    }

    #[test]
    fn adam_moves_against_gradient() {
        let mut engine = DescentEngine::new(UpdateRule::Adam, 0.01, 0.0, 1);
        let mut params = Array2::from_shape_vec((1, 3), vec![1.0, 1.0, 1.0]).unwrap();
        engine.grad_mut().fill(1.0);
        engine.step(&mut params);
        for d in 0..3 {
            assert!(params[[0, d]] < 1.0);
        }
    }

    #[test]
    fn zero_grad_is_idempotent_and_clears() {
        let mut engine = DescentEngine::new(UpdateRule::Sgd, 0.1, 0.9, 2);
        engine.zero_grad();
        engine.grad_mut().fill(3.0);
        engine.zero_grad();
        engine.zero_grad();
        assert!(engine.grad().iter().all(|&g| g == 0.0));
    }
}
