//! Active-set selection for the constrained trust-region subproblem.
//!
//! Maintains a working set of constraint normals in an incremental QR
//! factorization (`qfac` orthonormal, `rfac` upper triangular) and returns
//! the steepest-descent direction projected into the null space of the
//! active normals. Constraints enter when the projected direction runs into
//! them fast enough to matter within the current step length, and leave when
//! their multiplier has the wrong sign; both transitions touch the factors
//! only through Givens rotations, so orthonormality is never rebuilt from
//! scratch.
use nalgebra::{convert, DVector, RealField};
use num_traits::Float;

use crate::state::SolverState;

/// Projected steepest-descent direction for the gradient `g`.
///
/// `resnew` carries the constraint residual book-keeping of the surrounding
/// conjugate-gradient iteration (positive: usable residual; zero: active;
/// negative: out of reach for this step length), `resact` and `vlam` the
/// residuals and multipliers of the active constraints. All three are
/// updated in place alongside the active set itself.
///
/// Returns the direction and its squared norm; a squared norm of zero means
/// no useful descent direction exists for the current active set.
pub(crate) fn projected_descent_direction<F: RealField + Float>(
    state: &mut SolverState<F>,
    g: &DVector<F>,
    snorm: F,
    resnew: &mut DVector<F>,
    resact: &mut DVector<F>,
    vlam: &mut DVector<F>,
) -> (DVector<F>, F) {
    let n = state.n();
    let m = state.m();
    let tdel: F = convert::<f64, F>(0.2) * snorm;
    let tiny: F = Float::min_positive_value();

    // Constraints whose residual has grown beyond the deletion threshold
    // have drifted out of the working set.
    let mut ic = state.nact;
    while ic > 0 {
        ic -= 1;
        if resact[ic] > tdel {
            resnew[state.iact[ic]] = Float::max(resact[ic], tiny);
            delete_constraint(state, ic, resact, vlam);
        }
    }

    // Multipliers of the remaining set, by back-substitution in RFAC; a
    // nonnegative value means the constraint no longer restrains descent.
    'multipliers: loop {
        for ic in (0..state.nact).rev() {
            let mut temp = state.qfac.column(ic).dot(g);
            for j in ic + 1..state.nact {
                temp -= state.rfac[(ic, j)] * vlam[j];
            }
            if temp >= F::zero() {
                resnew[state.iact[ic]] = Float::max(resact[ic], tiny);
                delete_constraint(state, ic, resact, vlam);
                continue 'multipliers;
            }
            vlam[ic] = temp / state.rfac[(ic, ic)];
        }
        break;
    }

    let mut ddsav = g.norm_squared();
    ddsav += ddsav;

    loop {
        // Steepest descent in the null space of the active normals.
        if state.nact == n {
            return (DVector::zeros(n), F::zero());
        }
        let mut d = DVector::<F>::zeros(n);
        for j in state.nact..n {
            let qj = state.qfac.column(j);
            d.axpy(-qj.dot(g), &qj, F::one());
        }
        let dd = d.norm_squared();
        if dd == F::zero() || dd >= ddsav {
            return (DVector::zeros(n), F::zero());
        }
        ddsav = dd;
        let dnorm = Float::sqrt(dd);

        // Most rapidly approached constraint among those reachable within
        // the step length.
        let mut l = None;
        let mut violmx = F::zero();
        for j in 0..m {
            if resnew[j] > F::zero() && resnew[j] <= tdel {
                let sum = state.amat.column(j).dot(&d);
                if sum > (dnorm / snorm) * resnew[j] && sum > violmx {
                    l = Some(j);
                    violmx = sum;
                }
            }
        }
        // Guard against violations explained by rounding in the projection.
        let hundredth: F = convert(0.01);
        let ten: F = convert(10.0);
        if violmx > F::zero() && violmx < hundredth * dnorm {
            let mut ctol = F::zero();
            for k in 0..state.nact {
                let sum = state.amat.column(state.iact[k]).dot(&d);
                ctol = Float::max(ctol, Float::abs(sum));
            }
            if violmx <= ten * ctol {
                l = None;
            }
        }
        let l = match l {
            Some(l) => l,
            None => return (d, dd),
        };

        // Add constraint l to the factorization. Rotations sweep the
        // null-space component of its normal into column nact of QFAC.
        let nact = state.nact;
        let mut rdiag = F::zero();
        let tiny_ratio: F = convert(1.0e-20);
        for j in (0..n).rev() {
            let sprod = state.qfac.column(j).dot(&state.amat.column(l));
            if j < nact {
                state.rfac[(j, nact)] = sprod;
            } else if Float::abs(rdiag) <= tiny_ratio * Float::abs(sprod) {
                rdiag = sprod;
            } else {
                let temp = Float::sqrt(sprod * sprod + rdiag * rdiag);
                let cosv = sprod / temp;
                let sinv = rdiag / temp;
                rdiag = temp;
                for i in 0..n {
                    let a = state.qfac[(i, j)];
                    let b = state.qfac[(i, j + 1)];
                    state.qfac[(i, j)] = cosv * a + sinv * b;
                    state.qfac[(i, j + 1)] = cosv * b - sinv * a;
                }
            }
        }
        if rdiag < F::zero() {
            for i in 0..n {
                state.qfac[(i, nact)] = -state.qfac[(i, nact)];
            }
        }
        state.rfac[(nact, nact)] = Float::abs(rdiag);
        state.iact[nact] = l;
        resact[nact] = resnew[l];
        vlam[nact] = F::zero();
        resnew[l] = F::zero();
        state.nact += 1;

        // Dual loop: shift multiplier mass onto the new constraint, dropping
        // any whose multiplier is driven to the wrong sign.
        let mut vmu = DVector::<F>::zeros(n);
        while violmx > F::zero() {
            let nact = state.nact;
            vmu[nact - 1] = F::one() / (state.rfac[(nact - 1, nact - 1)] * state.rfac[(nact - 1, nact - 1)]);
            for i in (0..nact - 1).rev() {
                let mut sum = F::zero();
                for j in i + 1..nact {
                    sum += state.rfac[(i, j)] * vmu[j];
                }
                vmu[i] = -sum / state.rfac[(i, i)];
            }
            let mut vmult = violmx;
            let mut icdel = None;
            for j in 0..nact - 1 {
                if vlam[j] >= vmult * vmu[j] {
                    icdel = Some(j);
                    vmult = vlam[j] / vmu[j];
                }
            }
            for j in 0..nact {
                vlam[j] -= vmult * vmu[j];
            }
            if let Some(jc) = icdel {
                vlam[jc] = F::zero();
                violmx = Float::max(violmx - vmult, F::zero());
            } else {
                violmx = F::zero();
            }
            let mut jc = state.nact;
            while jc > 0 {
                jc -= 1;
                if vlam[jc] >= F::zero() {
                    resnew[state.iact[jc]] = Float::max(resact[jc], tiny);
                    delete_constraint(state, jc, resact, vlam);
                }
            }
        }
        // Recompute the projected direction for the revised set.
    }
}

/// Remove the constraint in position `k` of the working set, restoring the
/// triangularity of RFAC by Givens rotations mirrored onto QFAC.
fn delete_constraint<F: RealField + Float>(
    state: &mut SolverState<F>,
    k: usize,
    resact: &mut DVector<F>,
    vlam: &mut DVector<F>,
) {
    let n = state.n();
    let nact = state.nact;
    for j in k..nact - 1 {
        for i in 0..=j + 1 {
            state.rfac[(i, j)] = state.rfac[(i, j + 1)];
        }
        state.rfac[(j + 1, j + 1)] = F::zero();
        state.iact[j] = state.iact[j + 1];
        resact[j] = resact[j + 1];
        vlam[j] = vlam[j + 1];
    }
    for j in k..nact - 1 {
        let a = state.rfac[(j, j)];
        let b = state.rfac[(j + 1, j)];
        if b != F::zero() {
            let temp = Float::sqrt(a * a + b * b);
            let cosv = a / temp;
            let sinv = b / temp;
            for c in j..nact - 1 {
                let ra = state.rfac[(j, c)];
                let rb = state.rfac[(j + 1, c)];
                state.rfac[(j, c)] = cosv * ra + sinv * rb;
                state.rfac[(j + 1, c)] = cosv * rb - sinv * ra;
            }
            for i in 0..n {
                let qa = state.qfac[(i, j)];
                let qb = state.qfac[(i, j + 1)];
                state.qfac[(i, j)] = cosv * qa + sinv * qb;
                state.qfac[(i, j + 1)] = cosv * qb - sinv * qa;
            }
        }
        state.rfac[(j + 1, j)] = F::zero();
    }
    state.nact -= 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, DVector};

    fn free_state(n: usize, m: usize) -> SolverState<f64> {
        let npt = 2 * n + 1;
        SolverState {
            xbase: DVector::zeros(n),
            xpt: DMatrix::zeros(n, npt),
            fval: DVector::zeros(npt),
            gopt: DVector::zeros(n),
            hq: DMatrix::zeros(n, n),
            pq: DVector::zeros(npt),
            bmat: DMatrix::zeros(npt + n, n),
            zmat: DMatrix::zeros(npt, npt - n - 1),
            idz: 0,
            amat: DMatrix::zeros(n, m),
            b: DVector::zeros(m),
            rescon: DVector::zeros(m),
            nact: 0,
            iact: vec![0; n],
            qfac: DMatrix::identity(n, n),
            rfac: DMatrix::zeros(n, n),
            kopt: 0,
            xopt: DVector::zeros(n),
            fopt: 0.0,
            xsav: DVector::zeros(n),
            delta: 1.0,
            rho: 1.0,
        }
    }

    #[test]
    fn unconstrained_direction_is_negative_gradient() {
        let mut state = free_state(3, 1);
        state.amat.set_column(0, &DVector::from_column_slice(&[1.0, 0.0, 0.0]));
        let g = DVector::from_column_slice(&[1.0, -2.0, 0.5]);
        let mut resnew = DVector::from_element(1, -1.0);
        let mut resact = DVector::zeros(3);
        let mut vlam = DVector::zeros(3);
        let (d, dd) = projected_descent_direction(
            &mut state, &g, 1.0, &mut resnew, &mut resact, &mut vlam,
        );
        approx::assert_relative_eq!(dd, g.norm_squared());
        approx::assert_relative_eq!(d[0], -1.0);
        approx::assert_relative_eq!(d[1], 2.0);
        approx::assert_relative_eq!(d[2], -0.5);
        assert_eq!(state.nact, 0);
    }

    #[test]
    fn nearby_violated_constraint_gets_activated() {
        let mut state = free_state(2, 1);
        // Constraint normal e1; the gradient pushes straight into it and the
        // residual is small enough to be hit within the step length.
        state.amat.set_column(0, &DVector::from_column_slice(&[1.0, 0.0]));
        let g = DVector::from_column_slice(&[-1.0, -1.0]);
        let mut resnew = DVector::from_element(1, 0.05);
        let mut resact = DVector::zeros(2);
        let mut vlam = DVector::zeros(2);
        let (d, dd) = projected_descent_direction(
            &mut state, &g, 1.0, &mut resnew, &mut resact, &mut vlam,
        );
        assert_eq!(state.nact, 1);
        assert_eq!(state.iact[0], 0);
        // The returned direction lies in the null space of the normal.
        assert!(dd > 0.0);
        approx::assert_relative_eq!(d[0], 0.0, epsilon = 1e-12);
        approx::assert_relative_eq!(d[1], 1.0, epsilon = 1e-12);
        // QFAC column 0 is the unit normal after the rotation sweep.
        approx::assert_relative_eq!(state.qfac[(0, 0)].abs(), 1.0, epsilon = 1e-12);
        approx::assert_relative_eq!(state.rfac[(0, 0)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn stale_active_constraint_is_dropped() {
        let mut state = free_state(2, 1);
        state.amat.set_column(0, &DVector::from_column_slice(&[0.0, 1.0]));
        state.nact = 1;
        state.iact[0] = 0;
        state.qfac = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        state.rfac[(0, 0)] = 1.0;
        let g = DVector::from_column_slice(&[1.0, 0.0]);
        let mut resnew = DVector::from_element(1, 0.0);
        // Residual far beyond the 0.2*snorm deletion threshold.
        let mut resact = DVector::from_column_slice(&[0.9, 0.0]);
        let mut vlam = DVector::zeros(2);
        let (d, _dd) = projected_descent_direction(
            &mut state, &g, 1.0, &mut resnew, &mut resact, &mut vlam,
        );
        assert_eq!(state.nact, 0);
        assert!(resnew[0] > 0.0);
        approx::assert_relative_eq!(d[0], -1.0);
        approx::assert_relative_eq!(d[1], 0.0);
    }
}
