//! Limited-memory BFGS over a flat parameter vector.
//!
//! One `step` performs up to `max_iter` quasi-Newton iterations, calling the
//! objective at most `max_eval` times. History survives across steps.

use super::EngineError;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct LbfgsConfig {
    pub lr: f64,
    pub max_iter: usize,
    pub max_eval: usize,
    pub tolerance_grad: f64,
    pub tolerance_change: f64,
    pub history_size: usize,
    /// Backtracking (Armijo) line search instead of a fixed step.
    pub line_search: bool,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            lr: 1.0,
            max_iter: 20,
            max_eval: 25,
            tolerance_grad: 1e-7,
            tolerance_change: 1e-9,
            history_size: 100,
            line_search: false,
        }
    }
}

/// Something L-BFGS can minimize.
pub trait Objective {
    /// Loss and gradient at `params`. The objective may project `params` in
    /// place (e.g. clamp them) before evaluating.
    fn evaluate(&mut self, params: &mut [f32]) -> Result<(f64, Vec<f32>), EngineError>;
}

pub struct Lbfgs {
    config: LbfgsConfig,
    direction: Vec<f32>,
    step_size: f64,
    old_dirs: VecDeque<Vec<f32>>,
    old_steps: VecDeque<Vec<f32>>,
    rho: VecDeque<f64>,
    hessian_diag: f64,
    prev_grad: Vec<f32>,
    iterations: usize,
    evaluations: usize,
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum()
}

fn abs_max(a: &[f32]) -> f64 {
    a.iter().fold(0f64, |m, v| m.max(v.abs() as f64))
}

fn axpy(alpha: f64, x: &[f32], y: &mut [f32]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += (alpha * *xi as f64) as f32;
    }
}

impl Lbfgs {
    pub fn new(config: LbfgsConfig) -> Self {
        Self {
            config,
            direction: Vec::new(),
            step_size: 0.0,
            old_dirs: VecDeque::new(),
            old_steps: VecDeque::new(),
            rho: VecDeque::new(),
            hessian_diag: 1.0,
            prev_grad: Vec::new(),
            iterations: 0,
            evaluations: 0,
        }
    }

    /// Total objective evaluations across all steps.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Run one optimizer step and return the loss at its start.
    pub fn step<O: Objective>(
        &mut self,
        params: &mut [f32],
        objective: &mut O,
    ) -> Result<f64, EngineError> {
        let cfg = self.config.clone();

        let (orig_loss, mut grad) = objective.evaluate(params)?;
        let mut loss = orig_loss;
        let mut current_evals = 1;
        self.evaluations += 1;

        let mut opt_cond = abs_max(&grad) <= cfg.tolerance_grad;
        if opt_cond {
            return Ok(orig_loss);
        }

        let mut n_iter = 0;
        while n_iter < cfg.max_iter {
            n_iter += 1;
            self.iterations += 1;

            if self.iterations == 1 {
                self.direction = grad.iter().map(|g| -g).collect();
                self.old_dirs.clear();
                self.old_steps.clear();
                self.rho.clear();
                self.hessian_diag = 1.0;
            } else {
                self.update_direction(&grad);
            }

            self.prev_grad.clone_from(&grad);
            let prev_loss = loss;

            self.step_size = if self.iterations == 1 {
                let grad_l1: f64 = grad.iter().map(|g| g.abs() as f64).sum();
                (1.0f64).min(1.0 / grad_l1) * cfg.lr
            } else {
                cfg.lr
            };

            let gtd = dot(&grad, &self.direction);
            if gtd > -cfg.tolerance_change {
                break;
            }

            let mut ls_evals = 0;
            if cfg.line_search {
                let (new_loss, new_grad, evals) =
                    self.backtrack(params, objective, loss, gtd)?;
                loss = new_loss;
                grad = new_grad;
                ls_evals = evals;
                opt_cond = abs_max(&grad) <= cfg.tolerance_grad;
            } else {
                axpy(self.step_size, &self.direction, params);
                if n_iter != cfg.max_iter {
                    let (new_loss, new_grad) = objective.evaluate(params)?;
                    loss = new_loss;
                    grad = new_grad;
                    opt_cond = abs_max(&grad) <= cfg.tolerance_grad;
                    ls_evals = 1;
                }
            }
            current_evals += ls_evals;
            self.evaluations += ls_evals;

            if n_iter == cfg.max_iter || current_evals >= cfg.max_eval || opt_cond {
                break;
            }
            if abs_max(&self.direction) * self.step_size.abs() <= cfg.tolerance_change {
                break;
            }
            if (loss - prev_loss).abs() < cfg.tolerance_change {
                break;
            }
        }

        Ok(orig_loss)
    }

    /// Two-loop recursion over the curvature history.
    fn update_direction(&mut self, grad: &[f32]) {
        let y: Vec<f32> = grad.iter().zip(&self.prev_grad).map(|(g, p)| g - p).collect();
        let s: Vec<f32> = self
            .direction
            .iter()
            .map(|d| (*d as f64 * self.step_size) as f32)
            .collect();
        let ys = dot(&y, &s);

        if ys > 1e-10 {
            if self.old_dirs.len() == self.config.history_size {
                self.old_dirs.pop_front();
                self.old_steps.pop_front();
                self.rho.pop_front();
            }
            self.hessian_diag = ys / dot(&y, &y);
            self.old_dirs.push_back(y);
            self.old_steps.push_back(s);
            self.rho.push_back(1.0 / ys);
        }

        let history = self.old_dirs.len();
        let mut alpha = vec![0f64; history];
        let mut q: Vec<f32> = grad.iter().map(|g| -g).collect();
        for i in (0..history).rev() {
            alpha[i] = dot(&self.old_steps[i], &q) * self.rho[i];
            axpy(-alpha[i], &self.old_dirs[i], &mut q);
        }

        let mut r: Vec<f32> = q.iter().map(|v| (*v as f64 * self.hessian_diag) as f32).collect();
        for i in 0..history {
            let beta = dot(&self.old_dirs[i], &r) * self.rho[i];
            axpy(alpha[i] - beta, &self.old_steps[i], &mut r);
        }
        self.direction = r;
    }

    /// Halve the step until the Armijo condition holds or the evaluation
    /// budget runs out. Leaves `params` at the accepted point.
    fn backtrack<O: Objective>(
        &mut self,
        params: &mut [f32],
        objective: &mut O,
        loss: f64,
        gtd: f64,
    ) -> Result<(f64, Vec<f32>, usize), EngineError> {
        const ARMIJO: f64 = 1e-4;
        let origin = params.to_vec();
        let mut evals = 0;

        loop {
            params.copy_from_slice(&origin);
            axpy(self.step_size, &self.direction, params);
            let (new_loss, new_grad) = objective.evaluate(params)?;
            evals += 1;

            let accepted = new_loss <= loss + ARMIJO * self.step_size * gtd;
            if accepted || evals >= self.config.max_eval {
                return Ok((new_loss, new_grad, evals));
            }
            self.step_size *= 0.5;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// f(x) = sum((x - c)^2 * w)
    struct Quadratic {
        center: Vec<f32>,
        weights: Vec<f32>,
        calls: usize,
    }

    impl Objective for Quadratic {
        fn evaluate(&mut self, params: &mut [f32]) -> Result<(f64, Vec<f32>), EngineError> {
            self.calls += 1;
            let mut loss = 0f64;
            let mut grad = Vec::with_capacity(params.len());
            for ((x, c), w) in params.iter().zip(&self.center).zip(&self.weights) {
                let d = x - c;
                loss += (d * d * w) as f64;
                grad.push(2.0 * d * w);
            }
            Ok((loss, grad))
        }
    }

    fn quadratic() -> Quadratic {
        Quadratic {
            center: vec![1.0, -2.0, 0.5],
            weights: vec![1.0, 3.0, 0.5],
            calls: 0,
        }
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut objective = quadratic();
        let mut params = vec![0f32; 3];
        let mut lbfgs = Lbfgs::new(LbfgsConfig::default());

        for _ in 0..5 {
            lbfgs.step(&mut params, &mut objective).unwrap();
        }

        for (x, c) in params.iter().zip(&objective.center) {
            assert!((x - c).abs() < 1e-3, "{} vs {}", x, c);
        }
        assert_eq!(lbfgs.evaluations(), objective.calls);
    }

    #[test]
    fn test_line_search_minimizes_quadratic() {
        let mut objective = quadratic();
        let mut params = vec![3f32, 3.0, 3.0];
        let mut lbfgs = Lbfgs::new(LbfgsConfig {
            line_search: true,
            ..Default::default()
        });

        for _ in 0..5 {
            lbfgs.step(&mut params, &mut objective).unwrap();
        }

        for (x, c) in params.iter().zip(&objective.center) {
            assert!((x - c).abs() < 1e-3, "{} vs {}", x, c);
        }
    }

    #[test]
    fn test_stationary_point_returns_after_one_evaluation() {
        let mut objective = quadratic();
        let mut params = objective.center.clone();
        let mut lbfgs = Lbfgs::new(LbfgsConfig::default());

        let loss = lbfgs.step(&mut params, &mut objective).unwrap();
        assert_eq!(loss, 0.0);
        assert_eq!(objective.calls, 1);
    }

    #[test]
    fn test_step_respects_evaluation_budget() {
        let mut objective = quadratic();
        let mut params = vec![10f32; 3];
        let mut lbfgs = Lbfgs::new(LbfgsConfig {
            max_iter: 3,
            ..Default::default()
        });

        lbfgs.step(&mut params, &mut objective).unwrap();
        assert!(objective.calls <= 3);
    }
}
