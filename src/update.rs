//! Rank-2 update of the factorized inverse interpolation system when one
//! interpolation point is replaced by `$\vec{x}_\mathrm{opt} + \vec{d}$`.
//!
//! The inverse of the KKT-style interpolation matrix is held as
//! `$\Omega = \mathbf{Z}\mathbf{S}\mathbf{Z}^\top$` (with `$\mathbf{S}$`
//! a signature matrix controlled by `idz`) together with the border blocks
//! in `bmat`. Replacing a point is a rank-2 modification of the system, so
//! the factors can be carried along exactly; the update is the familiar one
//! from Powell's derivative-free solvers, driven by the quantities
//! `$\beta$`, `$\tau$` and `$\alpha$` whose combination
//! `$\sigma = \alpha\beta + \tau^2$` is the denominator of the modified
//! Lagrange functions.
use nalgebra::{convert, DVector, RealField};
use num_traits::Float;

use crate::lincoa::Failure;
use crate::state::SolverState;

/// Replace one interpolation point by `xopt + step` in the factorization.
///
/// When `knew` is `None` the point to drop is chosen here, by maximizing the
/// product of the denominator magnitude with the fourth power of the distance
/// from the current centre. Returns the index that was replaced. The caller
/// still has to install the new coordinates and function value in `xpt` and
/// `fval` and refresh the model.
///
/// Fails with [`Failure::DegenerateDenominator`] when the updating formula
/// divides by zero, which signals severe loss of accuracy in the factors.
pub(crate) fn update_factorization<F: RealField + Float>(
    state: &mut SolverState<F>,
    step: &DVector<F>,
    knew: Option<usize>,
) -> Result<usize, Failure> {
    let n = state.n();
    let npt = state.npt();
    let nptm = npt - n - 1;
    let half: F = convert(0.5);

    // VLAG holds the values of the modified Lagrange functions at the new
    // point; W is the corresponding column of the interpolation system.
    let mut vlag = DVector::<F>::zeros(npt + n);
    let mut w = DVector::<F>::zeros(npt + n);
    for k in 0..npt {
        let xk = state.xpt.column(k);
        let xd = xk.dot(step);
        w[k] = xd * (half * xd + xk.dot(&state.xopt));
        vlag[k] = state.bmat.row(k).transpose().dot(step);
    }

    let mut beta = F::zero();
    for j in 0..nptm {
        let zj = state.zmat.column(j);
        let mut sum = F::zero();
        for k in 0..npt {
            sum += zj[k] * w[k];
        }
        if j < state.idz {
            beta += sum * sum;
            sum = -sum;
        } else {
            beta -= sum * sum;
        }
        for k in 0..npt {
            vlag[k] += sum * zj[k];
        }
    }

    let mut bsum = F::zero();
    let mut dx = F::zero();
    for j in 0..n {
        let mut sum = F::zero();
        for k in 0..npt {
            sum += w[k] * state.bmat[(k, j)];
        }
        bsum += sum * step[j];
        let jp = npt + j;
        for k in 0..n {
            sum += state.bmat[(jp, k)] * step[k];
        }
        vlag[jp] = sum;
        bsum += sum * step[j];
        dx += step[j] * state.xopt[j];
    }
    let dsq = step.norm_squared();
    let xoptsq = state.xopt.norm_squared();
    beta = dx * dx + dsq * (xoptsq + dx + dx + half * dsq) + beta - bsum;
    vlag[state.kopt] += F::one();

    // Pick the point to drop unless the caller has already decided.
    let knew = match knew {
        Some(k) => k,
        None => {
            let mut best = F::zero();
            let mut pick = None;
            for k in 0..npt {
                let mut hdiag = F::zero();
                for j in 0..nptm {
                    let z = state.zmat[(k, j)];
                    if j < state.idz {
                        hdiag -= z * z;
                    } else {
                        hdiag += z * z;
                    }
                }
                let denabs = Float::abs(beta * hdiag + vlag[k] * vlag[k]);
                let distsq = (state.xpt.column(k) - &state.xopt).norm_squared();
                let merit = denabs * distsq * distsq;
                if merit > best {
                    best = merit;
                    pick = Some(k);
                }
            }
            match pick {
                Some(k) => k,
                None => return Err(Failure::DegenerateDenominator),
            }
        }
    };

    // Rotate the KNEW row of ZMAT into at most two nonzeros, one on each
    // side of the signature split.
    let mut jl = 0usize;
    for j in 1..nptm {
        if j == state.idz {
            jl = state.idz;
        } else if state.zmat[(knew, j)] != F::zero() {
            let temp = Float::sqrt(
                state.zmat[(knew, jl)] * state.zmat[(knew, jl)]
                    + state.zmat[(knew, j)] * state.zmat[(knew, j)],
            );
            let cs = state.zmat[(knew, jl)] / temp;
            let sn = state.zmat[(knew, j)] / temp;
            for i in 0..npt {
                let t = cs * state.zmat[(i, jl)] + sn * state.zmat[(i, j)];
                state.zmat[(i, j)] = cs * state.zmat[(i, j)] - sn * state.zmat[(i, jl)];
                state.zmat[(i, jl)] = t;
            }
            state.zmat[(knew, j)] = F::zero();
        }
    }

    let mut tempa = state.zmat[(knew, 0)];
    if state.idz >= 1 {
        tempa = -tempa;
    }
    let tempb = if jl > 0 { state.zmat[(knew, jl)] } else { F::zero() };
    for i in 0..npt {
        w[i] = tempa * state.zmat[(i, 0)];
        if jl > 0 {
            w[i] += tempb * state.zmat[(i, jl)];
        }
    }
    let alpha = w[knew];
    let tau = vlag[knew];
    let denom = alpha * beta + tau * tau;
    vlag[knew] -= F::one();
    if denom == F::zero() {
        return Err(Failure::DegenerateDenominator);
    }
    let sqrtdn = Float::sqrt(Float::abs(denom));

    // Complete the updating of ZMAT, tracking the signature.
    let mut shrink_idz = false;
    if jl == 0 {
        let ta = tau / sqrtdn;
        // tempa carries the signature of column 0.
        let tb = tempa / sqrtdn;
        for i in 0..npt {
            state.zmat[(i, 0)] = ta * state.zmat[(i, 0)] - tb * vlag[i];
        }
        if denom < F::zero() {
            if state.idz == 0 {
                state.idz = 1;
            } else {
                shrink_idz = true;
            }
        }
    } else {
        let (ja, jb) = if beta >= F::zero() { (jl, 0) } else { (0, jl) };
        let temp = state.zmat[(knew, jb)] / denom;
        let tempa2 = temp * beta;
        let tempb2 = temp * tau;
        let zka = state.zmat[(knew, ja)];
        let scala = F::one() / Float::sqrt(Float::abs(beta) * zka * zka + tau * tau);
        let scalb = scala * sqrtdn;
        for i in 0..npt {
            state.zmat[(i, ja)] = scala * (tau * state.zmat[(i, ja)] - zka * vlag[i]);
            state.zmat[(i, jb)] =
                scalb * (state.zmat[(i, jb)] - tempa2 * w[i] - tempb2 * vlag[i]);
        }
        if denom <= F::zero() {
            if beta < F::zero() {
                state.idz += 1;
            } else {
                shrink_idz = true;
            }
        }
    }
    if shrink_idz {
        state.idz -= 1;
        for i in 0..npt {
            let t = state.zmat[(i, 0)];
            state.zmat[(i, 0)] = state.zmat[(i, state.idz)];
            state.zmat[(i, state.idz)] = t;
        }
    }

    // Rank-2 update of the border blocks.
    for j in 0..n {
        let jp = npt + j;
        w[jp] = state.bmat[(knew, j)];
        let ta = (alpha * vlag[jp] - tau * w[jp]) / denom;
        let tb = (-beta * w[jp] - tau * vlag[jp]) / denom;
        for i in 0..=jp {
            state.bmat[(i, j)] += ta * vlag[i] + tb * w[i];
            if i >= npt {
                state.bmat[(jp, i - npt)] = state.bmat[(i, j)];
            }
        }
    }
    Ok(knew)
}
