use nalgebra::{DMatrix, DVector, RealField};

/// An objective function `$f\!:\R^n\to\R$` evaluated from function values only.
///
/// This is what [`Lincoa`](struct.Lincoa.html) needs from the caller: a way to
/// obtain `$f(\vec{x})$` at a requested point. No gradient or Hessian is ever
/// asked for. See the [module documentation](index.html) for a usage example.
///
/// The trait is implemented for closures of the matching shape, so
/// `|x: &DVector<f64>, _feasible: bool| ...` can be passed directly.
pub trait ObjectiveFunction<F: RealField> {
    /// Compute `$f(\vec{x})$`.
    ///
    /// `feasible` reports whether `$\vec{x}$` satisfies all linear
    /// constraints. It is purely advisory: the optimizer may evaluate at
    /// slightly infeasible points to improve the interpolation geometry,
    /// and some objectives are undefined or expensive outside the feasible
    /// region. Implementations are free to ignore it.
    fn value(&mut self, x: &DVector<F>, feasible: bool) -> F;
}

impl<F: RealField, G> ObjectiveFunction<F> for G
where
    G: FnMut(&DVector<F>, bool) -> F,
{
    fn value(&mut self, x: &DVector<F>, feasible: bool) -> F {
        self(x, feasible)
    }
}

/// The linear inequality constraints `$\mathbf{A}^\top\vec{x} \leq \vec{b}$`.
///
/// The constraint gradients are stored as the columns of an `$n\times m$`
/// matrix, one column per constraint. The solver normalizes each gradient to
/// unit length internally (scaling the right-hand side accordingly), so
/// callers may supply constraints at any scale.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraints<F: RealField> {
    pub(crate) a: DMatrix<F>,
    pub(crate) b: DVector<F>,
}

impl<F: RealField> LinearConstraints<F> {
    /// Create constraints from the `$n\times m$` gradient matrix and the
    /// length-`$m$` right-hand side.
    ///
    /// # Panics
    ///
    /// Panics if `a.ncols() != b.len()`.
    pub fn new(a: DMatrix<F>, b: DVector<F>) -> Self {
        assert_eq!(
            a.ncols(),
            b.len(),
            "one right-hand side entry per constraint"
        );
        Self { a, b }
    }

    /// No constraints at all, for a problem in `$\R^n$`.
    pub fn none(n: usize) -> Self {
        Self {
            a: DMatrix::zeros(n, 0),
            b: DVector::zeros(0),
        }
    }

    /// Number of constraints `$m$`.
    pub fn len(&self) -> usize {
        self.b.len()
    }

    /// `true` if there are no constraints.
    pub fn is_empty(&self) -> bool {
        self.b.len() == 0
    }
}
