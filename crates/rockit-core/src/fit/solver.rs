//! Small dense nonlinear least-squares solvers.
//!
//! All three minimize `0.5 * ||f(p) - y||^2` for a [`PeakModel`]:
//!
//! - [`FitMethod::Lm`]: Levenberg-Marquardt with Marquardt diagonal scaling,
//!   ignoring bounds.
//! - [`FitMethod::Trf`]: trust-region reflective. Iterates stay strictly
//!   inside the bounds; the trust region is measured in Coleman-Li scaled
//!   variables so parameters approaching a bound take shorter steps.
//! - [`FitMethod::Dogbox`]: dogleg steps in the intersection of a box trust
//!   region with the bounds. Parameters pinned at a bound with the gradient
//!   pushing outward are frozen for the iteration.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::consts::{BOUNDARY_STEP_BACK, EPSILON};

use super::method::FitMethod;
use super::model::{Bounds, PeakModel};

/// Convergence tolerances and iteration budget shared by all methods.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum number of outer iterations (Jacobian evaluations).
    pub max_iterations: usize,
    /// Relative cost reduction below which the fit has converged.
    pub ftol: f64,
    /// Relative step size below which the fit has converged.
    pub xtol: f64,
    /// Gradient magnitude below which the fit has converged.
    pub gtol: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
        }
    }
}

/// Why a solve did not produce a usable minimum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverFailure {
    /// The model is not finite at the starting point.
    NonFiniteStart,
    /// The normal equations could not be solved.
    Singular,
    /// The iteration budget ran out before convergence.
    MaxIterations,
}

impl std::fmt::Display for SolverFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFiniteStart => write!(f, "model not finite at initial estimate"),
            Self::Singular => write!(f, "singular Jacobian"),
            Self::MaxIterations => write!(f, "maximum iterations exceeded"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Solution {
    pub params: Vec<f64>,
    pub cost: f64,
    pub iterations: usize,
}

/// Residual and Jacobian evaluation of one curve against a model.
struct Problem<'a> {
    model: &'a PeakModel,
    y: &'a [f64],
}

impl Problem<'_> {
    fn n_samples(&self) -> usize {
        self.y.len()
    }

    /// Fill `r` with `f(p) - y` and return the cost (`inf` when not finite).
    fn cost(&self, p: &DVector<f64>, r: &mut DVector<f64>) -> f64 {
        self.model.evaluate(p.as_slice(), r.as_mut_slice());
        for (ri, &yi) in r.iter_mut().zip(self.y) {
            *ri -= yi;
        }
        let c = 0.5 * r.norm_squared();
        if c.is_finite() {
            c
        } else {
            f64::INFINITY
        }
    }

    fn jacobian(&self, p: &DVector<f64>, jac: &mut DMatrix<f64>) {
        self.model.jacobian(p.as_slice(), jac);
    }
}

/// Fit `model` to `y` starting from `x0`.
pub fn solve(
    method: FitMethod,
    model: &PeakModel,
    y: &[f64],
    x0: &[f64],
    config: &SolverConfig,
) -> Result<Solution, SolverFailure> {
    let problem = Problem { model, y };
    match method {
        FitMethod::Lm => levenberg_marquardt(&problem, x0, config),
        FitMethod::Trf => trust_region_reflective(&problem, x0, &model.bounds(), config),
        FitMethod::Dogbox => dogbox(&problem, x0, &model.bounds(), config),
    }
}

/// Cost small enough that the residual is at rounding level.
fn negligible_cost(y: &[f64]) -> f64 {
    let scale: f64 = y.iter().map(|v| v * v).sum::<f64>().max(1.0);
    1e-28 * scale
}

fn step_converged(step: &DVector<f64>, x: &DVector<f64>, xtol: f64) -> bool {
    step.norm() <= xtol * (xtol + x.norm())
}

/// Scaled gradient test: the residual is orthogonal to every Jacobian column.
fn gradient_converged(jac: &DMatrix<f64>, g: &DVector<f64>, r_norm: f64, gtol: f64) -> bool {
    if r_norm == 0.0 {
        return true;
    }
    jac.column_iter().zip(g.iter()).all(|(col, &gi)| {
        let cn = col.norm();
        cn == 0.0 || gi.abs() / (cn * r_norm) <= gtol
    })
}

fn levenberg_marquardt(
    problem: &Problem<'_>,
    x0: &[f64],
    config: &SolverConfig,
) -> Result<Solution, SolverFailure> {
    let n = x0.len();
    let m = problem.n_samples();
    let tiny = negligible_cost(problem.y);

    let mut x = DVector::from_column_slice(x0);
    let mut r = DVector::zeros(m);
    let mut r_trial = DVector::zeros(m);
    let mut jac = DMatrix::zeros(m, n);

    let mut cost = problem.cost(&x, &mut r);
    if !cost.is_finite() {
        return Err(SolverFailure::NonFiniteStart);
    }
    let mut lambda: Option<f64> = None;

    for iteration in 0..config.max_iterations {
        if cost <= tiny {
            return Ok(finish(x, cost, iteration));
        }
        problem.jacobian(&x, &mut jac);
        let jtj = jac.tr_mul(&jac);
        let g = jac.tr_mul(&r);
        if gradient_converged(&jac, &g, r.norm(), config.gtol) {
            return Ok(finish(x, cost, iteration));
        }

        let scale: DVector<f64> = jtj.diagonal().map(|d| d.max(EPSILON));
        let mut lam = lambda.unwrap_or_else(|| 1e-3 * scale.max());
        let neg_g = -&g;

        let mut accepted = false;
        while lam < 1e16 {
            let mut a = jtj.clone();
            for i in 0..n {
                a[(i, i)] += lam * scale[i];
            }
            let Some(chol) = a.cholesky() else {
                lam *= 10.0;
                continue;
            };
            let step = chol.solve(&neg_g);
            let trial = &x + &step;
            let trial_cost = problem.cost(&trial, &mut r_trial);

            if trial_cost < cost {
                let reduction = cost - trial_cost;
                let done = reduction <= config.ftol * cost
                    || step_converged(&step, &trial, config.xtol);
                x = trial;
                std::mem::swap(&mut r, &mut r_trial);
                cost = trial_cost;
                lambda = Some((lam / 3.0).max(1e-15));
                if done {
                    return Ok(finish(x, cost, iteration + 1));
                }
                accepted = true;
                break;
            }

            if step_converged(&step, &x, config.xtol) {
                return Ok(finish(x, cost, iteration + 1));
            }
            lam *= 4.0;
        }

        if !accepted {
            return Err(SolverFailure::Singular);
        }
    }

    Err(SolverFailure::MaxIterations)
}

/// Coleman-Li scaling: distance to the bound the gradient points towards.
fn coleman_li(x: &DVector<f64>, g: &DVector<f64>, bounds: &Bounds) -> DVector<f64> {
    DVector::from_iterator(
        x.len(),
        (0..x.len()).map(|i| {
            let (lo, hi) = (bounds.lower[i], bounds.upper[i]);
            if g[i] < 0.0 && hi.is_finite() {
                hi - x[i]
            } else if g[i] > 0.0 && lo.is_finite() {
                x[i] - lo
            } else {
                1.0
            }
        }),
    )
}

/// Largest `t >= 0` keeping `x + t * s` inside `[lower, upper]`.
fn step_to_bounds(x: &DVector<f64>, s: &DVector<f64>, lower: &[f64], upper: &[f64]) -> f64 {
    let mut t = f64::INFINITY;
    for i in 0..x.len() {
        if s[i] > 0.0 {
            t = t.min((upper[i] - x[i]) / s[i]);
        } else if s[i] < 0.0 {
            t = t.min((lower[i] - x[i]) / s[i]);
        }
    }
    t.max(0.0)
}

/// Minimize `g.s + 0.5 s'As` subject to `||s|| <= delta`.
///
/// Uses the unconstrained Newton step when it fits, otherwise bisects on the
/// Levenberg parameter until the damped step lies on the boundary.
fn trust_region_step(a: &DMatrix<f64>, g: &DVector<f64>, delta: f64) -> DVector<f64> {
    let n = g.len();
    let g_norm = g.norm();
    if g_norm == 0.0 {
        return DVector::zeros(n);
    }
    let damped = |lam: f64| -> Option<DVector<f64>> {
        let mut m = a.clone();
        for i in 0..n {
            m[(i, i)] += lam;
        }
        m.cholesky().map(|c| c.solve(&(-g)))
    };

    if let Some(s) = damped(0.0) {
        if s.norm() <= delta {
            return s;
        }
    }

    let mut lo = 0.0;
    let mut hi = g_norm / delta;
    let mut best = damped(hi).unwrap_or_else(|| -g * (delta / g_norm));
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        match damped(mid) {
            Some(s) if s.norm() <= delta => {
                hi = mid;
                best = s;
            }
            _ => lo = mid,
        }
        if hi - lo <= 1e-12 * hi {
            break;
        }
    }
    best
}

fn trust_region_reflective(
    problem: &Problem<'_>,
    x0: &[f64],
    bounds: &Bounds,
    config: &SolverConfig,
) -> Result<Solution, SolverFailure> {
    let n = x0.len();
    let m = problem.n_samples();
    let tiny = negligible_cost(problem.y);

    let mut start = x0.to_vec();
    bounds.make_strictly_feasible(&mut start, 1e-10);
    let mut x = DVector::from_column_slice(&start);
    let mut r = DVector::zeros(m);
    let mut r_trial = DVector::zeros(m);
    let mut jac = DMatrix::zeros(m, n);

    let mut cost = problem.cost(&x, &mut r);
    if !cost.is_finite() {
        return Err(SolverFailure::NonFiniteStart);
    }

    problem.jacobian(&x, &mut jac);
    let mut g = jac.tr_mul(&r);
    let d0 = coleman_li(&x, &g, bounds).map(f64::sqrt);
    let mut delta = x.component_div(&d0).norm();
    if delta == 0.0 || !delta.is_finite() {
        delta = 1.0;
    }

    for iteration in 0..config.max_iterations {
        if cost <= tiny {
            return Ok(finish(x, cost, iteration));
        }
        if iteration > 0 {
            problem.jacobian(&x, &mut jac);
            g = jac.tr_mul(&r);
        }
        let v = coleman_li(&x, &g, bounds);
        if g.component_mul(&v).amax() <= config.gtol * (1.0 + cost) {
            return Ok(finish(x, cost, iteration));
        }

        let d = v.map(f64::sqrt);
        let mut jac_h = jac.clone();
        for (j, mut col) in jac_h.column_iter_mut().enumerate() {
            col *= d[j];
        }
        let g_h = g.component_mul(&d);
        let a_h = jac_h.tr_mul(&jac_h);
        if a_h.iter().any(|v| !v.is_finite()) {
            return Err(SolverFailure::Singular);
        }

        let mut accepted = false;
        for _ in 0..30 {
            let step_h = trust_region_step(&a_h, &g_h, delta);
            let mut step = step_h.component_mul(&d);
            let t = step_to_bounds(&x, &step, &bounds.lower, &bounds.upper);
            if t < 1.0 {
                step *= BOUNDARY_STEP_BACK * t;
            }
            let step_h_norm = step.component_div(&d).norm();

            let trial = &x + &step;
            let trial_cost = problem.cost(&trial, &mut r_trial);
            let js = &jac * &step;
            let predicted = -(g.dot(&step) + 0.5 * js.norm_squared());
            let actual = cost - trial_cost;
            let ratio = if predicted > 0.0 { actual / predicted } else { -1.0 };

            if ratio < 0.25 {
                delta = 0.25 * step_h_norm;
            } else if ratio > 0.75 && step_h_norm >= 0.95 * delta {
                delta *= 2.0;
            }

            if actual > 0.0 {
                let done =
                    actual <= config.ftol * cost || step_converged(&step, &trial, config.xtol);
                x = trial;
                std::mem::swap(&mut r, &mut r_trial);
                cost = trial_cost;
                if done {
                    return Ok(finish(x, cost, iteration + 1));
                }
                accepted = true;
                break;
            }
            if step_converged(&step, &x, config.xtol) || delta <= EPSILON {
                return Ok(finish(x, cost, iteration + 1));
            }
        }
        if !accepted {
            return Err(SolverFailure::MaxIterations);
        }
    }

    Err(SolverFailure::MaxIterations)
}

fn in_box(s: &DVector<f64>, lower: &[f64], upper: &[f64]) -> bool {
    s.iter()
        .zip(lower.iter().zip(upper))
        .all(|(&v, (&lo, &hi))| v >= lo - EPSILON && v <= hi + EPSILON)
}

/// Dogleg path from the Cauchy point to the Gauss-Newton point, truncated
/// to the box `[lower, upper]` (which contains the origin).
fn dogleg(
    newton: &DVector<f64>,
    cauchy: &DVector<f64>,
    lower: &[f64],
    upper: &[f64],
) -> DVector<f64> {
    if in_box(newton, lower, upper) {
        return newton.clone();
    }
    let origin = DVector::zeros(cauchy.len());
    let t = step_to_bounds(&origin, cauchy, lower, upper);
    if t < 1.0 {
        return cauchy * t;
    }
    let direction = newton - cauchy;
    let alpha = step_to_bounds(cauchy, &direction, lower, upper).min(1.0);
    cauchy + direction * alpha
}

fn dogbox(
    problem: &Problem<'_>,
    x0: &[f64],
    bounds: &Bounds,
    config: &SolverConfig,
) -> Result<Solution, SolverFailure> {
    let n = x0.len();
    let m = problem.n_samples();
    let tiny = negligible_cost(problem.y);

    let mut start = x0.to_vec();
    bounds.clip(&mut start);
    let mut x = DVector::from_column_slice(&start);
    let mut r = DVector::zeros(m);
    let mut r_trial = DVector::zeros(m);
    let mut jac = DMatrix::zeros(m, n);

    let mut cost = problem.cost(&x, &mut r);
    if !cost.is_finite() {
        return Err(SolverFailure::NonFiniteStart);
    }
    let mut delta = x.amax();
    if delta == 0.0 {
        delta = 1.0;
    }

    for iteration in 0..config.max_iterations {
        if cost <= tiny {
            return Ok(finish(x, cost, iteration));
        }
        problem.jacobian(&x, &mut jac);
        let g = jac.tr_mul(&r);

        let free: Vec<usize> = (0..n)
            .filter(|&i| {
                let at_lower = x[i] <= bounds.lower[i] && g[i] > 0.0;
                let at_upper = x[i] >= bounds.upper[i] && g[i] < 0.0;
                !(at_lower || at_upper)
            })
            .collect();
        if free.is_empty() {
            return Ok(finish(x, cost, iteration));
        }
        let g_free = DVector::from_iterator(free.len(), free.iter().map(|&i| g[i]));
        if g_free.amax() <= config.gtol * (1.0 + cost) {
            return Ok(finish(x, cost, iteration));
        }
        let jac_free = jac.select_columns(free.iter());

        let newton = jac_free
            .clone()
            .svd(true, true)
            .solve(&(-&r), 1e-14)
            .map_err(|_| SolverFailure::Singular)?;
        let jg = &jac_free * &g_free;
        let curvature = jg.norm_squared();
        let cauchy = if curvature > 0.0 {
            &g_free * (-g_free.norm_squared() / curvature)
        } else {
            -&g_free
        };

        let mut accepted = false;
        for _ in 0..30 {
            let lower: Vec<f64> = free
                .iter()
                .map(|&i| (bounds.lower[i] - x[i]).max(-delta))
                .collect();
            let upper: Vec<f64> = free
                .iter()
                .map(|&i| (bounds.upper[i] - x[i]).min(delta))
                .collect();
            let step_free = dogleg(&newton, &cauchy, &lower, &upper);

            let mut step = DVector::zeros(n);
            for (k, &i) in free.iter().enumerate() {
                step[i] = step_free[k];
            }
            let mut trial = &x + &step;
            bounds.clip(trial.as_mut_slice());
            let step = &trial - &x;

            let trial_cost = problem.cost(&trial, &mut r_trial);
            let js = &jac * &step;
            let predicted = -(g.dot(&step) + 0.5 * js.norm_squared());
            let actual = cost - trial_cost;
            let ratio = if predicted > 0.0 { actual / predicted } else { -1.0 };
            let step_norm = step.amax();

            if ratio < 0.25 {
                delta = 0.25 * step_norm;
            } else if ratio > 0.75 && step_norm >= 0.95 * delta {
                delta *= 2.0;
            }

            if actual > 0.0 {
                let done =
                    actual <= config.ftol * cost || step_converged(&step, &trial, config.xtol);
                x = trial;
                std::mem::swap(&mut r, &mut r_trial);
                cost = trial_cost;
                if done {
                    return Ok(finish(x, cost, iteration + 1));
                }
                accepted = true;
                break;
            }
            if step_converged(&step, &x, config.xtol) || delta <= EPSILON {
                return Ok(finish(x, cost, iteration + 1));
            }
        }
        if !accepted {
            return Err(SolverFailure::MaxIterations);
        }
    }

    Err(SolverFailure::MaxIterations)
}

fn finish(x: DVector<f64>, cost: f64, iterations: usize) -> Solution {
    Solution {
        params: x.as_slice().to_vec(),
        cost,
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::model::Gaussian1D;

    fn gaussian(x: &[f64], p: [f64; 4]) -> Vec<f64> {
        x.iter()
            .map(|&v| p[0] * (-0.5 * ((v - p[1]) / p[2]).powi(2)).exp() + p[3])
            .collect()
    }

    #[test]
    fn every_method_recovers_a_clean_peak() {
        let x: Vec<f64> = (0..60).map(|i| i as f64 * 0.2).collect();
        let truth = [80.0, 6.1, 1.2, 12.0];
        let y = gaussian(&x, truth);
        let model = PeakModel::Gaussian1D(Gaussian1D::new(x));
        let x0 = [70.0, 5.8, 1.6, 11.0];
        for method in FitMethod::ALL {
            let sol = solve(method, &model, &y, &x0, &SolverConfig::default())
                .unwrap_or_else(|e| panic!("{method}: {e}"));
            for (got, want) in sol.params.iter().zip(truth) {
                assert!(
                    (got - want).abs() <= 1e-4 * want.abs(),
                    "{method}: {:?}",
                    sol.params
                );
            }
        }
    }

    #[test]
    fn non_finite_start_is_reported() {
        let model = PeakModel::Gaussian1D(Gaussian1D::new(vec![0.0, 1.0, 2.0]));
        let y = [1.0, 2.0, 1.0];
        let err = solve(
            FitMethod::Lm,
            &model,
            &y,
            &[1.0, 1.0, f64::NAN, 0.0],
            &SolverConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, SolverFailure::NonFiniteStart);
    }

    #[test]
    fn dogleg_keeps_newton_step_inside_box() {
        let newton = DVector::from_vec(vec![0.5, -0.5]);
        let cauchy = DVector::from_vec(vec![0.1, -0.1]);
        let s = dogleg(&newton, &cauchy, &[-1.0, -1.0], &[1.0, 1.0]);
        assert_eq!(s, newton);
        let s = dogleg(&newton, &cauchy, &[-0.2, -0.2], &[0.2, 0.2]);
        assert!(s.amax() <= 0.2 + 1e-12);
    }

    #[test]
    fn trust_region_step_respects_radius() {
        let a = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0]));
        let g = DVector::from_vec(vec![10.0, 0.0]);
        let s = trust_region_step(&a, &g, 1.0);
        assert!(s.norm() <= 1.0 + 1e-9);
        assert!(s[0] < 0.0);
    }
}
