//! Construction of the first interpolation set, its factorization and the
//! initial quadratic model.
//!
//! The design is the classical coordinate one: the start point, a step of
//! `rhobeg` along each axis, the opposite step on as many axes as the point
//! count allows, and two-axis diagonal points beyond `2n + 1`. For this
//! design the inverse of the interpolation system has closed-form entries
//! (central and forward difference rows in `bmat`, scaled columns in
//! `zmat`), so no factorization work is needed, except for design points
//! that sit close to a constraint boundary, which are pushed outward and
//! swapped into the factors through the regular update.
use log::debug;
use nalgebra::{convert, DMatrix, DVector, RealField};
use num_traits::Float;

use crate::lincoa::{Failure, Verbosity};
use crate::problem::ObjectiveFunction;
use crate::state::SolverState;
use crate::update::update_factorization;

/// A factorization failure during setup. The design points have already been
/// evaluated at this stage, so the best feasible one travels with the error.
#[derive(Debug)]
pub(crate) struct InitError<F: RealField> {
    pub failure: Failure,
    pub best_x: DVector<F>,
    pub best_f: F,
}

pub(crate) fn initialize<F, O>(
    objective: &mut O,
    amat: &DMatrix<F>,
    b_abs: &DVector<F>,
    x0: &DVector<F>,
    npt: usize,
    rhobeg: F,
    verbosity: Verbosity,
) -> Result<SolverState<F>, InitError<F>>
where
    F: RealField + Float,
    O: ObjectiveFunction<F>,
{
    let n = x0.len();
    let m = b_abs.len();
    let half: F = convert(0.5);
    let fifth: F = convert(0.2);
    let test = fifth * rhobeg;
    let rhosq = rhobeg * rhobeg;
    let recip = F::one() / rhosq;
    let reciq = Float::sqrt(half) / rhosq;

    // Right-hand sides relative to the base point.
    let mut b = b_abs.clone();
    for j in 0..m {
        b[j] -= amat.column(j).dot(x0);
    }

    // The unshifted coordinate design.
    let two_sided = usize::min(n, npt - n - 1);
    let mut design = DMatrix::<F>::zeros(n, npt);
    for j in 0..n {
        design[(j, 1 + j)] = rhobeg;
    }
    for j in 0..two_sided {
        design[(j, n + 1 + j)] = -rhobeg;
    }
    for nf in 2 * n + 1..npt {
        let k = nf - n;
        let itemp = (k - 1) / n;
        let ipt = k - itemp * n;
        let mut jpt = ipt + itemp;
        if jpt > n {
            jpt -= n;
        }
        design[(ipt - 1, nf)] = rhobeg;
        design[(jpt - 1, nf)] = rhobeg;
    }

    // Points near a constraint boundary are moved outward along that
    // gradient so their violation is exactly the margin; points violating
    // by more are left alone but flagged infeasible.
    let mut points = design.clone();
    let mut shifted = vec![false; npt];
    let mut feas = vec![true; npt];
    for nf in 1..npt {
        let p = points.column(nf).clone_owned();
        let mut bigv = F::zero();
        let mut jsav = None;
        for j in 0..m {
            let resid = amat.column(j).dot(&p) - b[j];
            if resid > bigv {
                bigv = resid;
                jsav = Some(j);
            }
        }
        if let Some(j) = jsav {
            feas[nf] = false;
            if bigv <= test {
                let mut col = points.column_mut(nf);
                col.axpy(test - bigv, &amat.column(j), F::one());
                shifted[nf] = true;
            }
        }
    }

    // Evaluate in design order, keeping the first strictly-least feasible
    // value as the incumbent.
    let mut fval = DVector::<F>::zeros(npt);
    let mut kopt = 0usize;
    for nf in 0..npt {
        let x_abs = x0 + points.column(nf);
        let f = objective.value(&x_abs, feas[nf]);
        fval[nf] = f;
        if verbosity >= Verbosity::EveryEvaluation {
            debug!(
                "evaluation {}: f = {:?} at {:?}",
                nf + 1,
                f,
                x_abs.as_slice()
            );
        }
        if feas[nf] && f < fval[kopt] {
            kopt = nf;
        }
    }

    // Closed-form factorization of the unshifted design.
    let mut bmat = DMatrix::<F>::zeros(npt + n, n);
    let mut zmat = DMatrix::<F>::zeros(npt, npt - n - 1);
    for j in 0..two_sided {
        bmat[(1 + j, j)] = half / rhobeg;
        bmat[(n + 1 + j, j)] = -half / rhobeg;
        zmat[(0, j)] = -reciq - reciq;
        zmat[(1 + j, j)] = reciq;
        zmat[(n + 1 + j, j)] = reciq;
    }
    for j in two_sided..n {
        bmat[(0, j)] = -F::one() / rhobeg;
        bmat[(1 + j, j)] = F::one() / rhobeg;
        bmat[(npt + j, j)] = -half * rhosq;
    }
    for nf in 2 * n + 1..npt {
        let k = nf - n;
        let itemp = (k - 1) / n;
        let ipt = k - itemp * n;
        let mut jpt = ipt + itemp;
        if jpt > n {
            jpt -= n;
        }
        let col = nf - n - 1;
        zmat[(0, col)] = recip;
        zmat[(nf, col)] = recip;
        zmat[(ipt, col)] = -recip;
        zmat[(jpt, col)] = -recip;
    }

    let mut state = SolverState {
        xbase: x0.clone(),
        xpt: design,
        fval,
        gopt: DVector::zeros(n),
        hq: DMatrix::zeros(n, n),
        pq: DVector::zeros(npt),
        bmat,
        zmat,
        idz: 0,
        amat: amat.clone(),
        b,
        rescon: DVector::zeros(m),
        nact: 0,
        iact: vec![0; n],
        qfac: DMatrix::identity(n, n),
        rfac: DMatrix::zeros(n, n),
        kopt: 0,
        xopt: DVector::zeros(n),
        fopt: F::zero(),
        xsav: x0.clone(),
        delta: rhobeg,
        rho: rhobeg,
    };

    // Swap the moved points into the factors; each swap is exact, so the
    // factorization stays the inverse of the live system.
    for nf in 1..npt {
        if shifted[nf] {
            let new_point = points.column(nf).clone_owned();
            update_factorization(&mut state, &new_point, Some(nf)).map_err(|failure| {
                InitError {
                    failure,
                    best_x: x0 + points.column(kopt),
                    best_f: state.fval[kopt],
                }
            })?;
            state.xpt.set_column(nf, &new_point);
        }
    }

    // Incumbent and the least-Frobenius-norm model through all values.
    state.kopt = kopt;
    state.xopt = state.xpt.column(kopt).clone_owned();
    state.fopt = state.fval[kopt];
    state.xsav = &state.xbase + &state.xopt;
    state.pq = state.omega_mul(&state.fval);
    let mut gopt = DVector::<F>::zeros(n);
    for k in 0..npt {
        gopt.axpy(state.fval[k], &state.bmat_row(k), F::one());
    }
    for k in 0..npt {
        let xk = state.xpt.column(k);
        gopt.axpy(state.pq[k] * xk.dot(&state.xopt), &xk, F::one());
    }
    state.gopt = gopt;
    state.refresh_rescon();
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::LinearConstraints;

    fn quadratic(x: &DVector<f64>, _feasible: bool) -> f64 {
        (x[0] - 1.0).powi(2) + 2.0 * (x[1] + 0.5).powi(2) + 0.25 * x[0] * x[1]
    }

    // The Lagrange function of point k, evaluated at point l relative to the
    // base point, must be delta_kl - delta_k0. This exercises bmat, zmat and
    // the idz sign convention together.
    fn check_lagrange(state: &SolverState<f64>) {
        let npt = state.npt();
        for k in 0..npt {
            let pqw = state.omega_column(k);
            let gl = state.bmat_row(k);
            for l in 0..npt {
                let xl = state.xpt.column(l).clone_owned();
                let mut value = gl.dot(&xl);
                for j in 0..npt {
                    let t = state.xpt.column(j).dot(&xl);
                    value += 0.5 * pqw[j] * t * t;
                }
                let expected = (if k == l { 1.0 } else { 0.0 }) - (if k == 0 { 1.0 } else { 0.0 });
                approx::assert_relative_eq!(value, expected, epsilon = 1.0e-9);
            }
        }
    }

    #[test]
    fn closed_form_factors_reproduce_lagrange_conditions() {
        for npt in [4, 5, 6] {
            let constraints = LinearConstraints::<f64>::none(2);
            let x0 = DVector::from_column_slice(&[0.3, -0.2]);
            let mut f = quadratic;
            let state = initialize(
                &mut f,
                &constraints.a,
                &constraints.b,
                &x0,
                npt,
                0.5,
                Verbosity::Silent,
            )
            .unwrap();
            check_lagrange(&state);
        }
    }

    #[test]
    fn initial_model_interpolates_the_objective() {
        let constraints = LinearConstraints::<f64>::none(2);
        let x0 = DVector::from_column_slice(&[0.0, 0.0]);
        let mut f = quadratic;
        let state = initialize(
            &mut f,
            &constraints.a,
            &constraints.b,
            &x0,
            6,
            1.0,
            Verbosity::Silent,
        )
        .unwrap();
        for k in 0..state.npt() {
            let step = state.xpt.column(k) - &state.xopt;
            let predicted = state.model_change(&step);
            approx::assert_relative_eq!(
                predicted,
                state.fval[k] - state.fopt,
                epsilon = 1.0e-9,
            );
        }
        assert!(state.fopt <= state.fval.min());
    }

    #[test]
    fn near_boundary_points_are_pushed_to_the_margin() {
        // Constraint x1 <= 0.45 with rhobeg 0.5: the +e1 design point
        // violates by 0.05 < 0.2*rhobeg = 0.1 and is pushed to violate by
        // exactly the margin; the factors must stay exact through the swap.
        let a = DMatrix::from_column_slice(2, 1, &[1.0, 0.0]);
        let b = DVector::from_element(1, 0.45);
        let x0 = DVector::from_column_slice(&[0.0, 0.0]);
        let mut f = quadratic;
        let state = initialize(&mut f, &a, &b, &x0, 6, 0.5, Verbosity::Silent).unwrap();
        approx::assert_relative_eq!(state.xpt[(0, 1)], 0.55, epsilon = 1.0e-12);
        check_lagrange(&state);
        // The shifted point must not be the incumbent even if its value is
        // low, because it is infeasible.
        assert!(state.b[0] - state.amat.column(0).dot(&state.xopt) >= 0.0);
    }

    #[test]
    fn far_violating_points_are_left_in_place() {
        let a = DMatrix::from_column_slice(2, 1, &[1.0, 0.0]);
        let b = DVector::from_element(1, 0.1);
        let x0 = DVector::from_column_slice(&[0.0, 0.0]);
        let mut f = quadratic;
        let state = initialize(&mut f, &a, &b, &x0, 6, 0.5, Verbosity::Silent).unwrap();
        // Violation 0.4 > 0.2*rhobeg: unshifted.
        approx::assert_relative_eq!(state.xpt[(0, 1)], 0.5, epsilon = 1.0e-12);
    }
}
