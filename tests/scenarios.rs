use approx::assert_relative_eq;
use lincoa::{Failure, LinearConstraints, Lincoa, ObjectiveFunction};
use nalgebra::{DMatrix, DVector};

#[test]
fn unconstrained_quadratic_bowl() {
    let objective = |x: &DVector<f64>, _feasible: bool| {
        (x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2)
    };
    let (_, report) = Lincoa::new(1.0, 1e-6)
        .with_npt(6)
        .minimize(
            &LinearConstraints::none(2),
            DVector::from_column_slice(&[0.0, 0.0]),
            objective,
        );
    assert!(report.failure.is_none(), "failed: {:?}", report.failure);
    assert_relative_eq!(report.x[0], 1.0, epsilon = 1e-4);
    assert_relative_eq!(report.x[1], 2.0, epsilon = 1e-4);
    assert!(report.objective_function < 1e-8);
}

#[test]
fn single_linear_constraint_is_active_at_the_solution() {
    // Minimize (x1 - 2)^2 + (x2 - 2)^2 subject to x1 + x2 <= 1; the
    // unconstrained minimizer is cut off and the solution sits on the
    // boundary at (0.5, 0.5).
    let constraints = LinearConstraints::new(
        DMatrix::from_column_slice(2, 1, &[1.0, 1.0]),
        DVector::from_column_slice(&[1.0]),
    );
    let objective = |x: &DVector<f64>, _feasible: bool| {
        (x[0] - 2.0).powi(2) + (x[1] - 2.0).powi(2)
    };
    let (_, report) = Lincoa::new(0.5, 1e-7).minimize(
        &constraints,
        DVector::from_column_slice(&[-1.0, 0.0]),
        objective,
    );
    assert!(report.failure.is_none(), "failed: {:?}", report.failure);
    assert_relative_eq!(report.x[0], 0.5, epsilon = 1e-4);
    assert_relative_eq!(report.x[1], 0.5, epsilon = 1e-4);
    assert!(report.x[0] + report.x[1] <= 1.0 + 1e-8);
    assert_relative_eq!(report.objective_function, 4.5, epsilon = 1e-4);
}

#[test]
fn two_constraints_active_at_a_vertex() {
    // Minimize -x1 - x2 subject to x1 <= 1 and x2 <= 1; the solution is
    // the vertex (1, 1) where both constraints are active.
    let constraints = LinearConstraints::new(
        DMatrix::from_column_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]),
        DVector::from_column_slice(&[1.0, 1.0]),
    );
    let objective = |x: &DVector<f64>, _feasible: bool| -x[0] - x[1];
    let (_, report) = Lincoa::new(0.5, 1e-7).minimize(
        &constraints,
        DVector::from_column_slice(&[0.0, 0.0]),
        objective,
    );
    assert!(report.failure.is_none(), "failed: {:?}", report.failure);
    assert_relative_eq!(report.x[0], 1.0, epsilon = 1e-4);
    assert_relative_eq!(report.x[1], 1.0, epsilon = 1e-4);
    assert_relative_eq!(report.objective_function, -2.0, epsilon = 1e-4);
}

#[test]
fn minimal_interpolation_count_still_converges() {
    // NPT = N + 2 is the smallest admissible interpolation set; the model
    // carries almost no curvature information and every update exercises a
    // single ZMAT column.
    let objective = |x: &DVector<f64>, _feasible: bool| {
        (x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2)
    };
    let (_, report) = Lincoa::new(1.0, 1e-6)
        .with_npt(4)
        .minimize(
            &LinearConstraints::none(2),
            DVector::from_column_slice(&[0.0, 0.0]),
            objective,
        );
    assert!(report.failure.is_none(), "failed: {:?}", report.failure);
    assert_relative_eq!(report.x[0], 1.0, epsilon = 1e-3);
    assert_relative_eq!(report.x[1], 2.0, epsilon = 1e-3);
}

#[test]
fn ill_conditioned_objective_still_converges() {
    // Strongly unequal curvatures force many trust-region rejections and
    // several rounds of resolution reduction before the minimizer at the
    // origin is located.
    let objective = |x: &DVector<f64>, _feasible: bool| {
        x[0] * x[0] + 100.0 * x[1] * x[1] + x[0].powi(4)
    };
    let (_, report) = Lincoa::new(0.5, 1e-7).minimize(
        &LinearConstraints::none(2),
        DVector::from_column_slice(&[1.0, 1.0]),
        objective,
    );
    assert!(report.failure.is_none(), "failed: {:?}", report.failure);
    assert_relative_eq!(report.x[0], 0.0, epsilon = 1e-3);
    assert_relative_eq!(report.x[1], 0.0, epsilon = 1e-4);
    assert!(report.objective_function < 1e-5);
}

#[test]
fn infeasible_start_relaxes_the_bound() {
    // The starting point violates x1 <= 1, so that bound is relaxed to the
    // starting value 5; the minimizer of the objective is then reachable.
    let constraints = LinearConstraints::new(
        DMatrix::from_column_slice(2, 1, &[1.0, 0.0]),
        DVector::from_column_slice(&[1.0]),
    );
    let objective =
        |x: &DVector<f64>, _feasible: bool| (x[0] - 3.0).powi(2) + x[1].powi(2);
    let (_, report) = Lincoa::new(0.5, 1e-7).minimize(
        &constraints,
        DVector::from_column_slice(&[5.0, 0.0]),
        objective,
    );
    assert!(report.failure.is_none(), "failed: {:?}", report.failure);
    assert_relative_eq!(report.x[0], 3.0, epsilon = 1e-4);
    assert_relative_eq!(report.x[1], 0.0, epsilon = 1e-4);
}

struct CountingBowl {
    calls: usize,
    best: f64,
}

impl ObjectiveFunction<f64> for CountingBowl {
    fn value(&mut self, x: &DVector<f64>, _feasible: bool) -> f64 {
        self.calls += 1;
        let f = x.norm_squared();
        self.best = self.best.min(f);
        f
    }
}

#[test]
fn exhausted_patience_reports_the_best_point_seen() {
    let budget = 6;
    let (objective, report) = Lincoa::new(1.0, 1e-8)
        .with_patience(budget)
        .minimize(
            &LinearConstraints::none(2),
            DVector::from_column_slice(&[2.0, 2.0]),
            CountingBowl {
                calls: 0,
                best: f64::INFINITY,
            },
        );
    assert_eq!(report.failure, Some(Failure::LostPatience));
    assert_eq!(objective.calls, budget);
    assert_eq!(report.number_of_evaluations, budget);
    // The returned point must be the best one actually evaluated.
    assert_eq!(report.objective_function, objective.best);
    assert_relative_eq!(
        report.objective_function,
        report.x.norm_squared(),
        epsilon = 1e-12
    );
}

#[test]
fn report_matches_a_fresh_evaluation() {
    let objective = |x: &DVector<f64>, _feasible: bool| {
        let a = x[0] - 0.3;
        let b = x[1] + 0.7;
        2.0 * a * a + a * b + b * b
    };
    let (mut objective, report) = Lincoa::new(0.5, 1e-7).minimize(
        &LinearConstraints::none(2),
        DVector::from_column_slice(&[1.0, 1.0]),
        objective,
    );
    assert!(report.failure.is_none(), "failed: {:?}", report.failure);
    assert_relative_eq!(
        report.objective_function,
        objective.value(&report.x, true),
        epsilon = 1e-12
    );
    assert_relative_eq!(report.x[0], 0.3, epsilon = 1e-4);
    assert_relative_eq!(report.x[1], -0.7, epsilon = 1e-4);
}

struct RecordingBowl {
    evaluations: Vec<(DVector<f64>, f64, bool)>,
}

impl ObjectiveFunction<f64> for RecordingBowl {
    fn value(&mut self, x: &DVector<f64>, feasible: bool) -> f64 {
        let f = (x[0] - 2.0).powi(2) + (x[1] - 2.0).powi(2);
        self.evaluations.push((x.clone(), f, feasible));
        f
    }
}

#[test]
fn report_is_the_best_feasible_evaluation() {
    // Record every evaluation together with its feasibility hint. The
    // reported value must be the minimum over the points flagged feasible,
    // and those points must actually satisfy the constraint.
    let constraints = LinearConstraints::new(
        DMatrix::from_column_slice(2, 1, &[1.0, 1.0]),
        DVector::from_column_slice(&[1.0]),
    );
    let (objective, report) = Lincoa::new(0.5, 1e-7).minimize(
        &constraints,
        DVector::from_column_slice(&[-1.0, 0.0]),
        RecordingBowl {
            evaluations: Vec::new(),
        },
    );
    assert!(report.failure.is_none(), "failed: {:?}", report.failure);

    let mut best = f64::INFINITY;
    for (x, f, feasible) in &objective.evaluations {
        if *feasible {
            assert!(x[0] + x[1] <= 1.0 + 1e-6, "hinted feasible at {x}");
            best = best.min(*f);
        }
    }
    assert_eq!(report.objective_function, best);
    assert_relative_eq!(report.objective_function, 4.5, epsilon = 1e-4);
}
