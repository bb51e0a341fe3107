//! Geometry step: choose a move of length about `del` from the centre that
//! makes the magnitude of the `knew`-th Lagrange function large, so that
//! replacing point `knew` keeps the interpolation set well poised.
//!
//! Three candidates compete: the best multiple of a difference
//! `$\vec{x}_k - \vec{x}_\mathrm{opt}$`, the gradient of the Lagrange
//! function at the centre, and that gradient projected into the null space
//! of the active constraint normals. Constraint residuals steer the choice;
//! a mild violation of an inactive constraint is pushed out to the margin
//! `$0.2\,\delta$` rather than left ambiguous.
use nalgebra::{convert, DVector, RealField};
use num_traits::Float;

use crate::state::SolverState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepFeasibility {
    Feasible,
    Infeasible,
    /// Mildly violating; moved out to the violation margin and treated as
    /// infeasible when hinting the objective.
    Clamped,
}

pub(crate) struct GeometryStep<F: RealField> {
    pub step: DVector<F>,
    pub feasibility: StepFeasibility,
}

pub(crate) fn geometry_step<F: RealField + Float>(
    state: &SolverState<F>,
    knew: usize,
    del: F,
) -> GeometryStep<F> {
    let n = state.n();
    let npt = state.npt();
    let m = state.m();
    let half: F = convert(0.5);
    let tenth: F = convert(0.1);
    let fifth: F = convert(0.2);
    let test = fifth * del;

    // Gradient of the knew-th Lagrange function, moved from the base point
    // to the centre.
    let pqw = state.omega_column(knew);
    let mut gl = state.bmat_row(knew);
    for k in 0..npt {
        let xk = state.xpt.column(k);
        gl.axpy(pqw[k] * xk.dot(&state.xopt), &xk, F::one());
    }

    // Constraint status: 1 usable, -1 too far away to matter, 0 active.
    let mut rstat = vec![1i8; m];
    for j in 0..m {
        if Float::abs(state.rescon[j]) >= del {
            rstat[j] = -1;
        }
    }
    for k in 0..state.nact {
        rstat[state.iact[k]] = 0;
    }

    // First candidate: the best multiple of a point difference.
    let mut ksav = knew;
    let mut stpsav = F::zero();
    let mut vbig = F::zero();
    for k in 0..npt {
        if k == state.kopt {
            continue;
        }
        let diff = state.xpt.column(k) - &state.xopt;
        let ss = diff.norm_squared();
        let sp = gl.dot(&diff);
        let mut stp = -del / Float::sqrt(ss);
        let vlag = if k == knew {
            if sp * (sp - F::one()) < F::zero() {
                stp = -stp;
            }
            Float::abs(stp * sp) + stp * stp * Float::abs(sp - F::one())
        } else {
            Float::abs(stp * (F::one() - stp) * sp)
        };
        if vlag > vbig {
            ksav = k;
            stpsav = stp;
            vbig = vlag;
        }
    }
    let mut step = (state.xpt.column(ksav) - &state.xopt) * stpsav;

    // Second candidate: the Lagrange gradient itself, scored with a
    // curvature correction.
    let gg = gl.norm_squared();
    let vgrad = del * Float::sqrt(gg);
    if vgrad > tenth * vbig {
        let mut ghg = F::zero();
        for k in 0..npt {
            let t = state.xpt.column(k).dot(&gl);
            ghg += pqw[k] * t * t;
        }
        let vnew = vgrad + Float::abs(half * del * del * ghg / gg);
        if vnew > vbig {
            vbig = vnew;
            let mut stp = del / Float::sqrt(gg);
            if ghg < F::zero() {
                stp = -stp;
            }
            step = &gl * stp;
        }
    }

    // Third candidate: the projected gradient, adopted when it keeps enough
    // of the magnitude and its feasibility status is unambiguous.
    if state.nact > 0 && state.nact < n {
        let glproj = state.project_out_active(&gl);
        let gg = glproj.norm_squared();
        let vgrad = del * Float::sqrt(gg);
        if vgrad > tenth * vbig {
            let mut ghg = F::zero();
            for k in 0..npt {
                let t = state.xpt.column(k).dot(&glproj);
                ghg += pqw[k] * t * t;
            }
            let mut stp = del / Float::sqrt(gg);
            if ghg < F::zero() {
                stp = -stp;
            }
            let vnew = vgrad + Float::abs(half * del * del * ghg / gg);
            if vnew / vbig >= fifth {
                let w = &glproj * stp;
                let mut bigv = F::zero();
                for j in 0..m {
                    if rstat[j] == 1 {
                        let temp = state.amat.column(j).dot(&w) - state.rescon[j];
                        bigv = Float::max(bigv, temp);
                    }
                }
                let mut ctol = F::zero();
                let hundredth: F = convert(0.01);
                if bigv > F::zero() && bigv < hundredth * Float::sqrt(w.norm_squared()) {
                    for k in 0..state.nact {
                        let sum = state.amat.column(state.iact[k]).dot(&w);
                        ctol = Float::max(ctol, Float::abs(sum));
                    }
                }
                let ten: F = convert(10.0);
                if bigv >= test {
                    return GeometryStep {
                        step: w,
                        feasibility: StepFeasibility::Infeasible,
                    };
                }
                if bigv <= ten * ctol {
                    return GeometryStep {
                        step: w,
                        feasibility: StepFeasibility::Feasible,
                    };
                }
            }
        }
    }

    // Feasibility of the chosen step against the nearby inactive
    // constraints; mild violations are pushed out to the margin.
    let mut bigv = F::zero();
    let mut jsav = None;
    for j in 0..m {
        if rstat[j] >= 0 {
            let temp = state.amat.column(j).dot(&step) - state.rescon[j];
            if temp > bigv {
                bigv = temp;
                jsav = Some(j);
            }
        }
    }
    let feasibility = match jsav {
        None => StepFeasibility::Feasible,
        Some(j) if bigv < test => {
            step.axpy(test - bigv, &state.amat.column(j), F::one());
            StepFeasibility::Clamped
        }
        Some(_) => StepFeasibility::Infeasible,
    };
    GeometryStep { step, feasibility }
}
