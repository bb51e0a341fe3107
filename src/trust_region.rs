//! Trust-region subproblem: approximately minimize the quadratic model
//! within a ball of radius `snorm` without violating the linear constraints.
//!
//! The method alternates between active-set selection
//! ([`projected_descent_direction`]) and conjugate-gradient segments in the
//! null space of the active normals. Each segment length is bounded by the
//! trust-region boundary, by the one-dimensional model minimizer and by
//! ratio tests on the inactive constraints; hitting a constraint restarts
//! the active-set phase as long as the step is still well inside the ball.
use nalgebra::{convert, DVector, RealField};
use num_traits::Float;

use crate::active_set::projected_descent_direction;
use crate::state::SolverState;

pub(crate) struct TrustRegionStep<F: RealField> {
    pub step: DVector<F>,
    /// Length of the step, or zero when no model reduction was found.
    pub snorm: F,
    /// True when the active set was revised during the iteration.
    pub active_set_changed: bool,
}

pub(crate) fn trust_region_step<F: RealField + Float>(
    state: &mut SolverState<F>,
    snorm: F,
) -> TrustRegionStep<F> {
    let n = state.n();
    let m = state.m();
    let half: F = convert(0.5);
    let ctest: F = convert(0.01);
    let tiny: F = Float::min_positive_value();
    let snsq = snorm * snorm;

    // Residual book-keeping: positive entries are usable residuals, zero
    // marks an active constraint, negative ones are out of reach.
    let mut resnew = DVector::<F>::zeros(m);
    for j in 0..m {
        resnew[j] = if state.rescon[j] >= snorm {
            -F::one()
        } else if state.rescon[j] >= F::zero() {
            Float::max(state.rescon[j], tiny)
        } else {
            state.rescon[j]
        };
    }
    let mut resact = DVector::<F>::zeros(n);
    for k in 0..state.nact {
        resact[k] = state.rescon[state.iact[k]];
        resnew[state.iact[k]] = F::zero();
    }
    let mut vlam = DVector::<F>::zeros(n);

    let mut step = DVector::<F>::zeros(n);
    let mut ss = F::zero();
    let mut reduct = F::zero();
    let mut g = state.gopt.clone();
    let mut w = DVector::<F>::zeros(m);
    let mut ncall = 0usize;

    'outer: loop {
        ncall += 1;
        let (d0, dd0) = projected_descent_direction(
            state, &g, snorm, &mut resnew, &mut resact, &mut vlam,
        );
        if dd0 == F::zero() {
            break 'outer;
        }
        let scale = convert::<f64, F>(0.2) * snorm / Float::sqrt(dd0);
        let dw = d0 * scale;

        // Move toward the active boundaries when their residuals are not
        // negligible, bounded by the trust region and the other constraints.
        let mut gamma = F::zero();
        let resmax = (0..state.nact).fold(F::zero(), |acc, k| Float::max(acc, resact[k]));
        let mut restore = DVector::<F>::zeros(n);
        if resmax > convert::<f64, F>(1.0e-4) * snorm {
            let mut wcoef = DVector::<F>::zeros(n);
            for k in 0..state.nact {
                let mut t = resact[k];
                for j in 0..k {
                    t -= state.rfac[(j, k)] * wcoef[j];
                }
                wcoef[k] = t / state.rfac[(k, k)];
            }
            for k in 0..state.nact {
                restore.axpy(wcoef[k], &state.qfac.column(k), F::one());
            }
            let mut rhs = snsq;
            let mut ds = F::zero();
            let mut dd = F::zero();
            for i in 0..n {
                let sum = step[i] + dw[i];
                rhs -= sum * sum;
                ds += restore[i] * sum;
                dd += restore[i] * restore[i];
            }
            if rhs > F::zero() {
                let t = Float::sqrt(ds * ds + dd * rhs);
                gamma = if ds <= F::zero() {
                    (t - ds) / dd
                } else {
                    rhs / (t + ds)
                };
            }
            for j in 0..m {
                if gamma <= F::zero() {
                    break;
                }
                if resnew[j] > F::zero() {
                    let ad = state.amat.column(j).dot(&restore);
                    let adw = state.amat.column(j).dot(&dw);
                    if ad > F::zero() {
                        gamma = Float::min(gamma, Float::max((resnew[j] - adw) / ad, F::zero()));
                    }
                }
            }
            gamma = Float::min(gamma, F::one());
        }

        let mut d;
        let mut icount;
        if gamma <= F::zero() {
            d = dw;
            icount = state.nact;
        } else {
            d = dw + restore * gamma;
            icount = state.nact - 1;
        }
        let mut alpbd = F::one();

        // Conjugate-gradient segments for the current active set.
        loop {
            icount += 1;
            let rhs = snsq - ss;
            if rhs <= F::zero() {
                break 'outer;
            }
            let dg = d.dot(&g);
            let ds = d.dot(&step);
            let dd = d.norm_squared();
            if dg >= F::zero() {
                break 'outer;
            }
            let t = Float::sqrt(rhs * dd + ds * ds);
            let mut alpha = if ds <= F::zero() {
                (t - ds) / dd
            } else {
                rhs / (t + ds)
            };
            if -alpha * dg <= ctest * reduct {
                break 'outer;
            }

            let hd = state.hessian_product(&d);
            let dgd = d.dot(&hd);
            let alpht = alpha;
            if dg + alpha * dgd > F::zero() {
                alpha = -dg / dgd;
            }
            let alphm = alpha;
            let mut jsav = None;
            for j in 0..m {
                if resnew[j] > F::zero() {
                    let ad = state.amat.column(j).dot(&d);
                    w[j] = ad;
                    if alpha * ad > resnew[j] {
                        alpha = resnew[j] / ad;
                        jsav = Some(j);
                    }
                }
            }
            alpha = Float::max(alpha, alpbd);
            alpha = Float::min(alpha, alphm);
            if icount == state.nact {
                alpha = Float::min(alpha, F::one());
            }

            step.axpy(alpha, &d, F::one());
            ss = step.norm_squared();
            g.axpy(alpha, &hd, F::one());
            for j in 0..m {
                if resnew[j] > F::zero() {
                    resnew[j] = Float::max(resnew[j] - alpha * w[j], tiny);
                }
            }
            if icount == state.nact && state.nact > 0 {
                let factor = F::one() - alpha * gamma;
                for k in 0..state.nact {
                    resact[k] *= factor;
                }
            }
            reduct -= alpha * (dg + half * alpha * dgd);

            if alpha == alpht {
                break 'outer;
            }
            if -alphm * (dg + half * alphm * dgd) <= ctest * reduct {
                break 'outer;
            }
            if jsav.is_some() {
                if ss <= convert::<f64, F>(0.64) * snsq {
                    continue 'outer;
                }
                break 'outer;
            }
            if icount == n {
                break 'outer;
            }

            // Next direction, conjugate to the previous one except on the
            // segment that follows an active-set change.
            let gproj = if state.nact > 0 {
                state.project_out_active(&g)
            } else {
                g.clone()
            };
            let beta = if icount == state.nact {
                F::zero()
            } else {
                gproj.dot(&hd) / dgd
            };
            d = d * beta - gproj;
            alpbd = F::zero();
        }
    }

    let out_norm = if reduct > F::zero() {
        Float::sqrt(ss)
    } else {
        F::zero()
    };
    TrustRegionStep {
        step,
        snorm: out_norm,
        active_set_changed: ncall > 1,
    }
}
