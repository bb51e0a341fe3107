//! The solver state shared by all phases of a minimization run.
//!
//! Everything the algorithm mutates lives in one aggregate owned by the
//! outer loop and passed by reference to the subroutines. The quadratic
//! model is
//! ```math
//!   q(\vec{x}) = c + \vec{g}^\top\vec{x}
//!     + \tfrac{1}{2}\vec{x}^\top\Bigl(\mathbf{H} + \sum_k p_k\,\vec{x}_k\vec{x}_k^\top\Bigr)\vec{x},
//! ```
//! with an explicit part `$\mathbf{H}$` (`hq`) and implicit per-point
//! coefficients `$p_k$` (`pq`). The inverse of the interpolation KKT system
//! is held factorized as `bmat`/`zmat`/`idz` and is kept exact for the live
//! point set at all times.
use nalgebra::{convert, DMatrix, DVector, RealField};
use num_traits::Float;

pub(crate) struct SolverState<F: RealField> {
    /// Origin shift; all stored points are relative to this.
    pub xbase: DVector<F>,
    /// Interpolation points as columns, `$n \times \mathtt{npt}$`.
    pub xpt: DMatrix<F>,
    /// Objective values at the interpolation points.
    pub fval: DVector<F>,
    /// Model gradient at the trust-region centre `xopt`.
    pub gopt: DVector<F>,
    /// Explicit symmetric part of the model Hessian.
    pub hq: DMatrix<F>,
    /// Implicit Hessian coefficients, one per interpolation point.
    pub pq: DVector<F>,
    /// Last `$n$` rows of the inverse KKT system, `$(\mathtt{npt}+n)\times n$`.
    /// The top `npt` rows are `$\Xi^\top$`, the bottom `$n$` rows `$\Upsilon$`.
    pub bmat: DMatrix<F>,
    /// Factor of the leading block: `$\Omega = \mathbf{Z}\mathbf{S}\mathbf{Z}^\top$`,
    /// `$\mathtt{npt}\times(\mathtt{npt}-n-1)$`.
    pub zmat: DMatrix<F>,
    /// Number of leading `zmat` columns whose sign in `$\mathbf{S}$` is `$-1$`.
    pub idz: usize,
    /// Unit-norm constraint gradients as columns, `$n \times m$`.
    pub amat: DMatrix<F>,
    /// Right-hand sides, shifted so they refer to `xbase`-relative points.
    pub b: DVector<F>,
    /// Signed constraint residuals at the centre. A value `$r \geq 0$` is the
    /// slack of the constraint; `$r < 0$` records that the slack is at least
    /// `$|r| \geq \Delta$`.
    pub rescon: DVector<F>,
    /// Active-set size and constraint indices (first `nact` entries live).
    pub nact: usize,
    pub iact: Vec<usize>,
    /// Orthonormal basis; the first `nact` columns span the active normals.
    pub qfac: DMatrix<F>,
    /// Upper-triangular factor of the active normals in the `qfac` basis.
    pub rfac: DMatrix<F>,
    /// Index of the incumbent among the interpolation points.
    pub kopt: usize,
    /// Incumbent relative to `xbase`.
    pub xopt: DVector<F>,
    /// Incumbent objective value.
    pub fopt: F,
    /// Incumbent in absolute coordinates.
    pub xsav: DVector<F>,
    /// Working trust-region radius.
    pub delta: F,
    /// Resolution floor; never increases and `delta >= rho` always.
    pub rho: F,
}

impl<F: RealField + Float> SolverState<F> {
    pub fn n(&self) -> usize {
        self.xpt.nrows()
    }

    pub fn npt(&self) -> usize {
        self.xpt.ncols()
    }

    pub fn m(&self) -> usize {
        self.b.len()
    }

    /// Product of the full model Hessian with `d`.
    pub fn hessian_product(&self, d: &DVector<F>) -> DVector<F> {
        let mut h = &self.hq * d;
        for k in 0..self.npt() {
            let xk = self.xpt.column(k);
            let t = self.pq[k] * xk.dot(d);
            h.axpy(t, &xk, F::one());
        }
        h
    }

    /// Change of the model along `step` from the centre:
    /// `$\vec{g}^\top\vec{d} + \frac{1}{2}\vec{d}^\top\mathbf{H}\vec{d}$`.
    pub fn model_change(&self, step: &DVector<F>) -> F {
        let half: F = convert(0.5);
        self.gopt.dot(step) + half * step.dot(&self.hessian_product(step))
    }

    /// `$\Omega\vec{v}$` with the `idz` sign split.
    pub fn omega_mul(&self, v: &DVector<F>) -> DVector<F> {
        let mut out = DVector::zeros(self.npt());
        for j in 0..self.zmat.ncols() {
            let zj = self.zmat.column(j);
            let mut s = zj.dot(v);
            if j < self.idz {
                s = -s;
            }
            out.axpy(s, &zj, F::one());
        }
        out
    }

    /// Column `k` of `$\Omega$`: the implicit Hessian coefficients of the
    /// `$k$`-th Lagrange function.
    pub fn omega_column(&self, k: usize) -> DVector<F> {
        let mut out = DVector::zeros(self.npt());
        for j in 0..self.zmat.ncols() {
            let zj = self.zmat.column(j);
            let mut s = zj[k];
            if j < self.idz {
                s = -s;
            }
            out.axpy(s, &zj, F::one());
        }
        out
    }

    /// Row `k` of `bmat` as an owned vector (the base-point gradient of the
    /// `$k$`-th Lagrange function for `$k < \mathtt{npt}$`).
    pub fn bmat_row(&self, k: usize) -> DVector<F> {
        self.bmat.row(k).transpose()
    }

    /// Projection of `v` onto the null space of the active constraint
    /// normals, `$\mathbf{Q}_2\mathbf{Q}_2^\top\vec{v}$`.
    pub fn project_out_active(&self, v: &DVector<F>) -> DVector<F> {
        if self.nact == 0 {
            return v.clone();
        }
        let n = self.n();
        let mut out = DVector::zeros(n);
        for j in self.nact..n {
            let qj = self.qfac.column(j);
            out.axpy(qj.dot(v), &qj, F::one());
        }
        out
    }

    /// Recompute `rescon` from `b`, `xopt` and `delta`. Slacks below the
    /// trust-region radius are stored directly (clamped at zero against
    /// rounding); larger slacks are recorded negated, so a negative entry
    /// certifies that the constraint cannot be reached within `delta`.
    pub fn refresh_rescon(&mut self) {
        for j in 0..self.m() {
            let slack = self.b[j] - self.amat.column(j).dot(&self.xopt);
            self.rescon[j] = if slack < self.delta {
                Float::max(slack, F::zero())
            } else {
                -slack
            };
        }
    }

    /// Move `xbase` to the current `xopt`, transforming the factorization by
    /// the corresponding congruence and absorbing the shift into `hq`, the
    /// stored points and the constraint right-hand sides. Called when the
    /// centre drifts far enough from the origin that the fourth powers in
    /// the interpolation system would lose accuracy.
    pub fn shift_base(&mut self) {
        let n = self.n();
        let npt = self.npt();
        let half: F = convert(0.5);
        let quart: F = convert(0.25);

        let s = self.xopt.clone();
        let ssq = s.norm_squared();

        // P has one column per point: gamma_k (x_k - s/2) + ||s||^2/4 s,
        // with gamma_k = x_k.s - ||s||^2/2 taken at the old coordinates.
        let mut p = DMatrix::zeros(n, npt);
        for k in 0..npt {
            let xk = self.xpt.column(k);
            let gamma = xk.dot(&s) - half * ssq;
            let mut col = p.column_mut(k);
            for i in 0..n {
                col[i] = gamma * (xk[i] - half * s[i]) + quart * ssq * s[i];
            }
        }

        // U = P * Omega through the Z factor.
        let mut pz = &p * &self.zmat;
        for j in 0..self.idz {
            pz.column_mut(j).neg_mut();
        }
        let u = &pz * self.zmat.transpose();

        // Upsilon += Xi P^T + P Xi^T + P Omega P^T, with the old Xi.
        let xi = self.bmat.rows(0, npt).transpose();
        let xi_pt = &xi * p.transpose();
        let u_pt = &u * p.transpose();
        // u_pt is symmetric in exact arithmetic; average it to stay so.
        let upsilon_add = &xi_pt + xi_pt.transpose() + (&u_pt + u_pt.transpose()) * half;
        {
            let mut bottom = self.bmat.rows_mut(npt, n);
            bottom += upsilon_add;
        }
        // Xi += P Omega.
        {
            let mut top = self.bmat.rows_mut(0, npt);
            top += u.transpose();
        }
        // Keep the bottom block numerically symmetric.
        for i in 0..n {
            for j in 0..i {
                let avg = half * (self.bmat[(npt + i, j)] + self.bmat[(npt + j, i)]);
                self.bmat[(npt + i, j)] = avg;
                self.bmat[(npt + j, i)] = avg;
            }
        }

        // hq += w s^T + s w^T where w = sum_k pq_k (x_k - s/2).
        let mut w = DVector::zeros(n);
        let mut sumpq = F::zero();
        for k in 0..npt {
            sumpq += self.pq[k];
            w.axpy(self.pq[k], &self.xpt.column(k), F::one());
        }
        w.axpy(-half * sumpq, &s, F::one());
        for i in 0..n {
            for j in 0..n {
                self.hq[(i, j)] += w[i] * s[j] + s[i] * w[j];
            }
        }

        // Finally shift the stored coordinates.
        for k in 0..npt {
            let mut col = self.xpt.column_mut(k);
            col -= &s;
        }
        self.xbase += &s;
        for j in 0..self.m() {
            self.b[j] -= self.amat.column(j).dot(&s);
        }
        self.xopt.fill(F::zero());
    }

    /// Largest squared distance from the centre to any interpolation point,
    /// together with its index.
    pub fn furthest_point(&self) -> (usize, F) {
        let mut kmax = self.kopt;
        let mut dmax = F::zero();
        for k in 0..self.npt() {
            let d = (self.xpt.column(k) - &self.xopt).norm_squared();
            if d > dmax {
                dmax = d;
                kmax = k;
            }
        }
        (kmax, dmax)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tiny_state() -> SolverState<f64> {
        // Two variables, six points on the standard coordinate design.
        let n = 2;
        let npt = 6;
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
            amat: DMatrix::zeros(n, 1),
            b: DVector::zeros(1),
            rescon: DVector::zeros(1),
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
    fn rescon_signs_follow_delta() {
        let mut state = tiny_state();
        state.amat = DMatrix::from_column_slice(2, 1, &[1.0, 0.0]);
        state.b = DVector::from_element(1, 3.0);
        state.delta = 1.0;
        state.refresh_rescon();
        // Slack 3 >= delta, stored negated.
        assert_relative_eq!(state.rescon[0], -3.0);

        state.delta = 5.0;
        state.refresh_rescon();
        assert_relative_eq!(state.rescon[0], 3.0);
    }

    #[test]
    fn hessian_product_combines_explicit_and_implicit_parts() {
        let mut state = tiny_state();
        state.hq = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 4.0]);
        state.xpt.set_column(1, &DVector::from_column_slice(&[1.0, 0.0]));
        state.pq[1] = 3.0;
        let d = DVector::from_column_slice(&[1.0, 2.0]);
        let h = state.hessian_product(&d);
        // hq*d = (4, 9); pq part adds 3*(x1.d)*x1 = (3, 0).
        assert_relative_eq!(h[0], 7.0);
        assert_relative_eq!(h[1], 9.0);
    }

    #[test]
    fn projection_removes_active_normal_components() {
        let mut state = tiny_state();
        state.nact = 1;
        // Active normal e1; null space spanned by e2.
        state.qfac = DMatrix::identity(2, 2);
        let v = DVector::from_column_slice(&[3.0, 5.0]);
        let p = state.project_out_active(&v);
        assert_relative_eq!(p[0], 0.0);
        assert_relative_eq!(p[1], 5.0);
    }
}
