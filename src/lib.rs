//! Implementation of the LINCOA derivative-free optimization algorithm
//! using [nalgebra](https://nalgebra.org).
//!
//! This algorithm tries to solve the linearly constrained optimization
//! problem
//! ```math
//! \min_{\vec{x}\in\R^n} f(\vec{x})
//! \quad\text{subject to}\quad
//! \mathbf{A}^\top\vec{x} \leq \vec{b},
//! ```
//! using **only values** of `$f$`, no derivatives. It maintains a
//! quadratic model that interpolates `$f$` at a set of sample points and
//! minimizes the model within a shrinking trust region, respecting the
//! `$m$` linear inequality constraints given by the columns of
//! `$\mathbf{A}\in\R^{n\times m}$` and `$\vec{b}\in\R^m$`.
//!
//! # Inputs
//!
//! You must provide
//!
//! - the objective `$f\!:\R^n\to\R$`, as anything implementing
//!   [`ObjectiveFunction`] (a closure `|x, feasible| ...` works),
//! - the constraints as a [`LinearConstraints`] value (possibly
//!   [`LinearConstraints::none`]),
//! - a starting point, which should satisfy the constraints,
//! - and the initial and final trust-region resolutions `rhobeg` and
//!   `rhoend`, which bound the scale of the first exploration steps and
//!   the accuracy of the answer respectively.
//!
//! Further hyperparameters are documented at
//! [`Lincoa`](struct.Lincoa.html).
//!
//! # Usage Example
//!
//! ```
//! # use lincoa::{Lincoa, LinearConstraints};
//! # use nalgebra::DVector;
//! // minimize the quadratic bowl (x1 - 1)^2 + (x2 - 2)^2
//! let constraints = LinearConstraints::none(2);
//! let x0 = DVector::from_column_slice(&[0.0, 0.0]);
//! let (_f, report) = Lincoa::new(1.0, 1.0e-6).minimize(
//!     &constraints,
//!     x0,
//!     |x: &DVector<f64>, _feasible: bool| (x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2),
//! );
//! assert!(report.failure.is_none());
//! assert!(report.objective_function < 1e-8);
//! ```

mod active_set;
mod geometry;
mod init;
mod lincoa;
mod problem;
mod state;
mod trust_region;
mod update;

pub use crate::lincoa::{Failure, Lincoa, MinimizationReport, Verbosity};
pub use crate::problem::{LinearConstraints, ObjectiveFunction};
