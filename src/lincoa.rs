//! Implementation of the solver configuration, its hyperparameters, the
//! outer iteration and the termination report.
use log::{debug, info, warn};
use nalgebra::{convert, DVector, RealField};
use num_traits::Float;

use crate::geometry::{geometry_step, StepFeasibility};
use crate::init::{initialize, InitError};
use crate::problem::{LinearConstraints, ObjectiveFunction};
use crate::state::SolverState;
use crate::trust_region::trust_region_step;
use crate::update::update_factorization;

/// Reasons for terminating without a successful minimization.
///
/// The first four are detected before the objective is evaluated even once;
/// the last three end a running minimization early, in which case the
/// report still carries the best feasible point found so far.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Failure {
    /// The problem must have at least two variables.
    TooFewVariables,
    /// The number of interpolation points must lie in
    /// `$[n + 2, (n+1)(n+2)/2]$`.
    InterpolationCountOutOfRange,
    /// The evaluation budget does not exceed the number of interpolation
    /// points, so not even the initial model could be built.
    PatienceTooLow,
    /// A constraint gradient is the zero vector.
    ZeroConstraintGradient,
    /// The evaluation budget was exhausted.
    LostPatience,
    /// An objective evaluation was requested at a displacement so small or
    /// so large that rounding errors dominate.
    RoundingErrors,
    /// The denominator of the factorization update vanished, which means
    /// the interpolation system has become numerically singular.
    DegenerateDenominator,
}

/// How much progress information is emitted through the [`log`] crate.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub enum Verbosity {
    Silent,
    /// One line with the final value and point.
    FinalOnly,
    /// Additionally a line whenever the resolution `$\rho$` is reduced.
    RhoChanges,
    /// Additionally a line per objective evaluation.
    EveryEvaluation,
}

/// Information about the minimization.
///
/// `objective_function` and `x` are the best feasible value and point; when
/// a validation [`Failure`] occurred before any evaluation the value is NaN
/// and `x` is the unchanged initial guess.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizationReport<F: RealField> {
    pub failure: Option<Failure>,
    pub number_of_evaluations: usize,
    pub objective_function: F,
    pub x: DVector<F>,
}

/// Derivative-free minimization of a nonlinear function subject to linear
/// inequality constraints `$\mathbf{A}^\top\vec{x} \leq \vec{b}$`.
///
/// A quadratic model interpolating the objective at `npt` points is
/// minimized within a trust region whose radius shrinks from `rhobeg` to
/// `rhoend`; interpolation points are replaced one at a time, keeping the
/// factorized inverse of the interpolation system exact throughout. Only
/// objective values are used, never gradients.
///
/// # Usage example
/// ```
/// # use lincoa::{Lincoa, LinearConstraints};
/// # use nalgebra::{DMatrix, DVector};
/// // minimize (x1 - 2)^2 + (x2 - 2)^2 subject to x1 + x2 <= 1
/// let constraints = LinearConstraints::new(
///     DMatrix::from_column_slice(2, 1, &[1.0, 1.0]),
///     DVector::from_element(1, 1.0),
/// );
/// let x0 = DVector::from_column_slice(&[0.0, 0.0]);
/// let (_objective, report) = Lincoa::new(0.5, 1.0e-8).minimize(
///     &constraints,
///     x0,
///     |x: &DVector<f64>, _feasible: bool| (x[0] - 2.0).powi(2) + (x[1] - 2.0).powi(2),
/// );
/// assert!(report.failure.is_none());
/// assert!((report.x[0] - 0.5).abs() < 1.0e-5);
/// assert!((report.x[1] - 0.5).abs() < 1.0e-5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lincoa<F: RealField + Float> {
    rhobeg: F,
    rhoend: F,
    npt: Option<usize>,
    patience: Option<usize>,
    verbosity: Verbosity,
}

impl<F: RealField + Float> Lincoa<F> {
    /// Configure a solver with initial and final trust-region resolution.
    ///
    /// Panics unless `$0 < \mathtt{rhoend} \leq \mathtt{rhobeg}$`.
    pub fn new(rhobeg: F, rhoend: F) -> Self {
        assert!(
            rhoend > F::zero() && rhoend <= rhobeg,
            "rhobeg and rhoend must satisfy 0 < rhoend <= rhobeg"
        );
        Self {
            rhobeg,
            rhoend,
            npt: None,
            patience: None,
            verbosity: Verbosity::Silent,
        }
    }

    /// Set the number of interpolation points. The default is `$2n + 1$`;
    /// values outside `$[n+2, (n+1)(n+2)/2]$` are rejected by `minimize`.
    pub fn with_npt(self, npt: usize) -> Self {
        Self {
            npt: Some(npt),
            ..self
        }
    }

    /// Set the evaluation budget. The default is `$500\,n$`.
    pub fn with_patience(self, patience: usize) -> Self {
        Self {
            patience: Some(patience),
            ..self
        }
    }

    pub fn with_verbosity(self, verbosity: Verbosity) -> Self {
        Self { verbosity, ..self }
    }

    /// Run the minimization from `initial_x`, which should satisfy the
    /// constraints; if it does not, the offending right-hand sides are
    /// relaxed just enough and a warning is logged.
    pub fn minimize<O: ObjectiveFunction<F>>(
        &self,
        constraints: &LinearConstraints<F>,
        initial_x: DVector<F>,
        mut objective: O,
    ) -> (O, MinimizationReport<F>) {
        let n = initial_x.len();
        let npt = self.npt.unwrap_or(2 * n + 1);
        let maxfun = self.patience.unwrap_or(500 * n);
        assert_eq!(
            constraints.a.nrows(),
            n,
            "constraint gradients must have the same dimension as x"
        );

        let invalid = |failure| MinimizationReport {
            failure: Some(failure),
            number_of_evaluations: 0,
            objective_function: Float::nan(),
            x: initial_x.clone(),
        };
        if n < 2 {
            return (objective, invalid(Failure::TooFewVariables));
        }
        if npt < n + 2 || npt > (n + 1) * (n + 2) / 2 {
            return (objective, invalid(Failure::InterpolationCountOutOfRange));
        }
        if maxfun <= npt {
            return (objective, invalid(Failure::PatienceTooLow));
        }

        // Normalize the constraint gradients and relax the right-hand sides
        // where the starting point violates them.
        let m = constraints.len();
        let mut amat = constraints.a.clone();
        let mut b = constraints.b.clone();
        for j in 0..m {
            let norm = amat.column(j).norm();
            if norm == F::zero() {
                return (objective, invalid(Failure::ZeroConstraintGradient));
            }
            let mut col = amat.column_mut(j);
            col /= norm;
            b[j] /= norm;
            let value = amat.column(j).dot(&initial_x);
            if value > b[j] {
                if self.verbosity >= Verbosity::FinalOnly {
                    warn!(
                        "initial point violates constraint {} by {:?}; relaxing its bound",
                        j,
                        value - b[j]
                    );
                }
                b[j] = value;
            }
        }

        let mut state = match initialize(
            &mut objective,
            &amat,
            &b,
            &initial_x,
            npt,
            self.rhobeg,
            self.verbosity,
        ) {
            Ok(state) => state,
            Err(err) => return (objective, report_init_error(err, npt)),
        };
        let mut nf = npt;
        let outcome = self.iterate(&mut objective, &mut state, maxfun, &mut nf);

        let (x, f) = match &outcome.last_feasible {
            Some((x, f)) if *f < state.fopt => (x.clone(), *f),
            _ => (state.xsav.clone(), state.fopt),
        };
        if self.verbosity >= Verbosity::FinalOnly {
            info!(
                "finished after {} evaluations: f = {:?} at {:?}",
                nf,
                f,
                x.as_slice()
            );
        }
        (
            objective,
            MinimizationReport {
                failure: outcome.failure,
                number_of_evaluations: nf,
                objective_function: f,
                x,
            },
        )
    }

    /// The outer iteration, from the freshly initialized state to a
    /// termination condition.
    fn iterate<O: ObjectiveFunction<F>>(
        &self,
        objective: &mut O,
        state: &mut SolverState<F>,
        maxfun: usize,
        nf: &mut usize,
    ) -> Outcome<F> {
        let half: F = convert(0.5);
        let tenth: F = convert(0.1);
        let one_point_four: F = convert(1.4);
        let shift_bound: F = convert(1.0e4);
        let rhoend = self.rhoend;

        // Counter driving the occasional replacement of the model by the
        // least-Frobenius-norm interpolant; starting at the limit makes the
        // first feasible iteration seed the comparison baseline.
        let mut itest = 3usize;
        let mut last_feasible: Option<(DVector<F>, F)> = None;
        // Counters of consecutive short unprofitable steps; they survive
        // restarts of the iteration and are cleared by a full-length step
        // or a reduction of rho.
        let mut nvala = 0usize;
        let mut nvalb = 0usize;

        'resolution: loop {
            let mut knew: Option<usize> = None;

            'inner: loop {
                let fsave = state.fopt;
                if state.xopt.norm_squared() >= shift_bound * state.delta * state.delta {
                    state.shift_base();
                }

                let geo = knew.take();
                let delsav = state.delta;
                let step;
                let mut snorm = F::zero();
                let mut ifeas = true;
                // Set when the resolution floor is reached with a computed
                // but never evaluated trust-region step.
                let mut pending_final = false;
                let mut reduce_resolution = false;

                match geo {
                    None => {
                        let trial = trust_region_step(state, state.delta);
                        snorm = trial.snorm;
                        step = trial.step;
                        let accept = if trial.active_set_changed {
                            convert::<f64, F>(0.1999) * delsav
                        } else {
                            half * delsav
                        };
                        if snorm <= accept {
                            state.delta = half * state.delta;
                            if state.delta <= one_point_four * state.rho {
                                state.delta = state.rho;
                            }
                            state.refresh_rescon();
                            nvala += 1;
                            nvalb += 1;
                            let temp = if delsav > state.rho {
                                F::one()
                            } else {
                                snorm / state.rho
                            };
                            if temp >= half {
                                nvala = 0;
                            }
                            if temp >= tenth {
                                nvalb = 0;
                            }
                            if delsav > state.rho || (nvala < 5 && nvalb < 3) {
                                // Look for a far point worth replacing.
                                match self.far_point(state) {
                                    Some(k) => {
                                        knew = Some(k);
                                        continue 'inner;
                                    }
                                    None => {
                                        if state.fopt < fsave || delsav > state.rho {
                                            continue 'resolution;
                                        }
                                        reduce_resolution = true;
                                    }
                                }
                            } else {
                                pending_final = snorm > F::zero();
                                reduce_resolution = true;
                            }
                        } else {
                            nvala = 0;
                            nvalb = 0;
                        }
                    }
                    Some(k) => {
                        let del = Float::max(tenth * state.delta, state.rho);
                        let trial = geometry_step(state, k, del);
                        step = trial.step;
                        ifeas = trial.feasibility == StepFeasibility::Feasible;
                    }
                }

                if reduce_resolution {
                    if state.rho > rhoend {
                        self.reduce_rho(state, *nf);
                        nvala = 0;
                        nvalb = 0;
                        continue 'resolution;
                    }
                    // Resolution floor reached. Evaluate the pending step
                    // once if the budget allows, then stop.
                    if pending_final {
                        if *nf + 1 > maxfun {
                            return Outcome {
                                failure: Some(Failure::LostPatience),
                                last_feasible,
                            };
                        }
                        let x = &state.xbase + &state.xopt + &step;
                        *nf += 1;
                        let f = objective.value(&x, true);
                        self.log_evaluation(*nf, f, &x);
                        last_feasible = Some((x, f));
                    }
                    return Outcome {
                        failure: None,
                        last_feasible,
                    };
                }

                let vquad = state.model_change(&step);
                if geo.is_none() && vquad >= F::zero() {
                    // The model predicts no reduction along the step; treat
                    // it like an unprofitable iteration.
                    match self.far_point(state) {
                        Some(k) => {
                            knew = Some(k);
                            continue 'inner;
                        }
                        None => {
                            if state.fopt < fsave || delsav > state.rho {
                                continue 'resolution;
                            }
                            if state.rho > rhoend {
                                self.reduce_rho(state, *nf);
                                nvala = 0;
                                nvalb = 0;
                                continue 'resolution;
                            }
                            return Outcome {
                                failure: None,
                                last_feasible,
                            };
                        }
                    }
                }

                // One objective evaluation per inner iteration.
                if *nf + 1 > maxfun {
                    return Outcome {
                        failure: Some(Failure::LostPatience),
                        last_feasible,
                    };
                }
                let xnew = &state.xopt + &step;
                let x = &state.xbase + &xnew;
                let xdiff = (&x - &state.xsav).norm();
                if xdiff <= tenth * state.rho
                    || xdiff >= state.delta + state.delta
                    || !Float::is_finite(xdiff)
                {
                    return Outcome {
                        failure: Some(Failure::RoundingErrors),
                        last_feasible,
                    };
                }
                *nf += 1;
                let f = objective.value(&x, ifeas);
                self.log_evaluation(*nf, f, &x);
                if ifeas {
                    last_feasible = Some((x, f));
                }
                let diff = f - state.fopt - vquad;

                // Disagreement of the alternative model, using the factors
                // before the update.
                let mut dffalt = diff;
                if ifeas && itest < 3 {
                    let mut w = DVector::<F>::zeros(state.npt());
                    for k in 0..state.npt() {
                        w[k] = state.fval[k] - state.fopt;
                    }
                    let pqw = state.omega_mul(&w);
                    let mut vqalt = F::zero();
                    for k in 0..state.npt() {
                        let t = state.xpt.column(k).dot(&step);
                        vqalt += w[k] * state.bmat_row(k).dot(&step);
                        vqalt += pqw[k] * t * (half * t + state.xpt.column(k).dot(&state.xopt));
                    }
                    dffalt = f - state.fopt - vqalt;
                }
                if itest == 3 {
                    dffalt = diff;
                    itest = 0;
                }

                // Radius schedule after a trust-region step.
                let mut ratio = F::zero();
                if geo.is_none() {
                    ratio = (f - state.fopt) / vquad;
                    if ratio <= tenth {
                        state.delta = half * state.delta;
                    } else if ratio <= convert(0.7) {
                        state.delta = Float::max(half * state.delta, snorm);
                    } else {
                        let cap = Float::sqrt(convert::<f64, F>(2.0)) * state.delta;
                        state.delta = Float::max(half * state.delta, snorm + snorm);
                        state.delta = Float::min(state.delta, cap);
                    }
                    if state.delta <= one_point_four * state.rho {
                        state.delta = state.rho;
                    }
                }

                // Swap the new point into the factorization.
                let knew_idx = match update_factorization(state, &step, geo) {
                    Ok(k) => k,
                    Err(failure) => {
                        return Outcome {
                            failure: Some(failure),
                            last_feasible,
                        };
                    }
                };

                if ifeas {
                    itest += 1;
                    if Float::abs(dffalt) >= tenth * Float::abs(diff) {
                        itest = 0;
                    }
                }

                // Model update: symmetric Broyden, or the full
                // least-Frobenius-norm rebuild every third consistent
                // disagreement with the alternative model.
                let old_point = state.xpt.column(knew_idx).clone_owned();
                state.xpt.set_column(knew_idx, &xnew);
                state.fval[knew_idx] = f;
                if itest < 3 {
                    let pqw = state.omega_column(knew_idx);
                    let moved_pq = state.pq[knew_idx];
                    for i in 0..state.n() {
                        for j in 0..state.n() {
                            state.hq[(i, j)] += moved_pq * old_point[i] * old_point[j];
                        }
                    }
                    state.pq[knew_idx] = F::zero();
                    for k in 0..state.npt() {
                        state.pq[k] += diff * pqw[k];
                    }
                    let mut lagrange_grad = state.bmat_row(knew_idx);
                    for k in 0..state.npt() {
                        let xk = state.xpt.column(k);
                        lagrange_grad.axpy(pqw[k] * xk.dot(&state.xopt), &xk, F::one());
                    }
                    state.gopt.axpy(diff, &lagrange_grad, F::one());
                } else {
                    let mut w = DVector::<F>::zeros(state.npt());
                    for k in 0..state.npt() {
                        w[k] = state.fval[k] - state.fopt;
                    }
                    state.pq = state.omega_mul(&w);
                    state.hq.fill(F::zero());
                    let mut gopt = DVector::<F>::zeros(state.n());
                    for k in 0..state.npt() {
                        gopt.axpy(w[k], &state.bmat_row(k), F::one());
                    }
                    for k in 0..state.npt() {
                        let xk = state.xpt.column(k);
                        gopt.axpy(state.pq[k] * xk.dot(&state.xopt), &xk, F::one());
                    }
                    state.gopt = gopt;
                }

                // Move the incumbent when the new point is feasible and
                // strictly better.
                if ifeas && f < state.fopt {
                    let hd = state.hessian_product(&step);
                    state.gopt += hd;
                    state.kopt = knew_idx;
                    state.xopt = xnew;
                    state.fopt = f;
                    state.xsav = &state.xbase + &state.xopt;
                }
                state.refresh_rescon();

                if geo.is_some() || ratio >= tenth {
                    continue 'inner;
                }
                match self.far_point(state) {
                    Some(k) => {
                        knew = Some(k);
                        continue 'inner;
                    }
                    None => {
                        if state.fopt < fsave || delsav > state.rho {
                            continue 'resolution;
                        }
                        if state.rho > rhoend {
                            self.reduce_rho(state, *nf);
                            nvala = 0;
                            nvalb = 0;
                            continue 'resolution;
                        }
                        return Outcome {
                            failure: None,
                            last_feasible,
                        };
                    }
                }
            }
        }
    }

    /// Interpolation point furthest from the centre, if it lies beyond the
    /// distance that makes replacing it worthwhile.
    fn far_point(&self, state: &SolverState<F>) -> Option<usize> {
        let four: F = convert(4.0);
        let threshold = Float::max(state.delta * state.delta, four * state.rho * state.rho);
        let (k, distsq) = state.furthest_point();
        if distsq > threshold {
            Some(k)
        } else {
            None
        }
    }

    fn reduce_rho(&self, state: &mut SolverState<F>, nf: usize) {
        let half: F = convert(0.5);
        let delta = half * state.rho;
        if state.rho > convert::<f64, F>(250.0) * self.rhoend {
            state.rho *= convert::<f64, F>(0.1);
        } else if state.rho <= convert::<f64, F>(16.0) * self.rhoend {
            state.rho = self.rhoend;
        } else {
            state.rho = Float::sqrt(state.rho * self.rhoend);
        }
        state.delta = Float::max(delta, state.rho);
        state.refresh_rescon();
        if self.verbosity >= Verbosity::RhoChanges {
            info!(
                "rho reduced to {:?} after {} evaluations, best f = {:?}",
                state.rho, nf, state.fopt
            );
        }
    }

    fn log_evaluation(&self, nf: usize, f: F, x: &DVector<F>) {
        if self.verbosity >= Verbosity::EveryEvaluation {
            debug!("evaluation {}: f = {:?} at {:?}", nf, f, x.as_slice());
        }
    }
}

struct Outcome<F: RealField> {
    failure: Option<Failure>,
    last_feasible: Option<(DVector<F>, F)>,
}

/// A setup failure still consumed `npt` evaluations; the report carries the
/// best of them rather than the untouched initial guess.
fn report_init_error<F: RealField + Float>(err: InitError<F>, npt: usize) -> MinimizationReport<F> {
    MinimizationReport {
        failure: Some(err.failure),
        number_of_evaluations: npt,
        objective_function: err.best_f,
        x: err.best_x,
    }
}
