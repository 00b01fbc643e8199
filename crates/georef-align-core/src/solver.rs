//! Dense Levenberg-Marquardt minimizer for the 3-dof alignment problem.
//!
//! The problem is always tiny in the parameter dimension (3) and grows only
//! in the number of residuals (`2·N`), so every iteration accumulates the
//! 3×3 normal equations `JᵀJ` and the gradient `Jᵀr` and solves the damped
//! system `(JᵀJ + λ·D) δ = −Jᵀr` directly, where `D` is the clamped diagonal
//! of `JᵀJ`.
//!
//! Step acceptance follows the usual gain-ratio rule: the actual cost
//! decrease is compared against the decrease predicted by the linear model.
//! Good steps shrink the damping (Nielsen's update), bad steps grow it.

use crate::manifold::{AngleManifold, EuclideanManifold, Manifold};
use crate::residual::ResidualBlock;
use crate::types::TransformEstimate;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SolverError {
    #[error("least-squares problem has no residual blocks")]
    EmptyProblem,
}

/// Termination criteria and damping schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_iterations: usize,
    /// Converged when `|Δcost| <= function_tolerance · cost`.
    pub function_tolerance: f64,
    /// Converged when `max|Jᵀr| <= gradient_tolerance`.
    pub gradient_tolerance: f64,
    /// Converged when every `|δᵢ| <= min(parameter_tolerance · (|xᵢ| + parameter_tolerance),
    /// absolute_step_tolerance)`.
    ///
    /// Checked per component so a large georeferenced offset does not mask
    /// a rotation that is still moving.
    pub parameter_tolerance: f64,
    /// Cap on the relative step test, in parameter units. Keeps UTM-sized
    /// translations (~1e6 m) from stopping on millimetre steps.
    pub absolute_step_tolerance: f64,
    pub initial_damping: f64,
    /// Damping above this means no descent direction is left; the solve stops.
    pub max_damping: f64,
    /// Lower clamp for the scaling diagonal `D`.
    pub min_diagonal: f64,
    /// Minimum gain ratio for a step to be accepted.
    pub min_relative_decrease: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            function_tolerance: 1e-6,
            gradient_tolerance: 1e-10,
            parameter_tolerance: 1e-8,
            absolute_step_tolerance: 1e-7,
            initial_damping: 1e-4,
            max_damping: 1e32,
            min_diagonal: 1e-6,
            min_relative_decrease: 1e-3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationType {
    /// One of the tolerances was met.
    Convergence,
    /// Iteration limit hit before any tolerance was met.
    NoConvergence,
    /// The problem evaluated to a non-finite cost.
    Failure,
}

impl fmt::Display for TerminationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationType::Convergence => "CONVERGENCE",
            TerminationType::NoConvergence => "NO_CONVERGENCE",
            TerminationType::Failure => "FAILURE",
        };
        f.write_str(s)
    }
}

/// One row of the iteration trace.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: usize,
    pub cost: f64,
    pub cost_change: f64,
    pub gradient_max_norm: f64,
    pub step_norm: f64,
    pub gain_ratio: f64,
    pub damping: f64,
    pub step_accepted: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverSummary {
    pub termination: TerminationType,
    pub message: String,
    pub num_residual_blocks: usize,
    pub num_residuals: usize,
    pub num_parameters: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub num_successful_steps: usize,
    pub num_unsuccessful_steps: usize,
    pub iterations: Vec<IterationSummary>,
}

impl SolverSummary {
    #[inline]
    pub fn is_converged(&self) -> bool {
        self.termination == TerminationType::Convergence
    }

    pub fn num_iterations(&self) -> usize {
        self.iterations.len()
    }

    /// One-line summary for status logs.
    pub fn brief_report(&self) -> String {
        format!(
            "Levenberg-Marquardt, {} iterations, cost {:e} -> {:e}, termination: {}",
            self.num_iterations(),
            self.initial_cost,
            self.final_cost,
            self.termination
        )
    }

    /// Multi-line report with problem size, iteration trace and termination reason.
    pub fn full_report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Solver summary (Levenberg-Marquardt, dense normal equations)");
        let _ = writeln!(out, "  residual blocks   {:>10}", self.num_residual_blocks);
        let _ = writeln!(out, "  residuals         {:>10}", self.num_residuals);
        let _ = writeln!(out, "  parameters        {:>10}", self.num_parameters);
        let _ = writeln!(out, "  initial cost      {:>10e}", self.initial_cost);
        let _ = writeln!(out, "  final cost        {:>10e}", self.final_cost);
        let _ = writeln!(out, "  successful steps  {:>10}", self.num_successful_steps);
        let _ = writeln!(out, "  unsuccessful steps{:>10}", self.num_unsuccessful_steps);
        let _ = writeln!(
            out,
            "{:>5} {:>14} {:>12} {:>12} {:>12} {:>10} {:>10} {:>4}",
            "iter", "cost", "cost_change", "|gradient|", "|step|", "rho", "lambda", "ok"
        );
        for it in &self.iterations {
            let _ = writeln!(
                out,
                "{:>5} {:>14.6e} {:>12.3e} {:>12.3e} {:>12.3e} {:>10.3e} {:>10.3e} {:>4}",
                it.iteration,
                it.cost,
                it.cost_change,
                it.gradient_max_norm,
                it.step_norm,
                it.gain_ratio,
                it.damping,
                if it.step_accepted { "yes" } else { "no" }
            );
        }
        let _ = write!(out, "Termination: {} ({})", self.termination, self.message);
        out
    }
}

/// Linearization of the whole problem at one point.
struct NormalEquations {
    cost: f64,
    jtj: Matrix3<f64>,
    gradient: Vector3<f64>,
}

fn linearize<R: ResidualBlock>(blocks: &[R], x: &TransformEstimate) -> NormalEquations {
    let mut cost = 0.0;
    let mut jtj = Matrix3::<f64>::zeros();
    let mut gradient = Vector3::<f64>::zeros();
    for block in blocks {
        let (r, j) = block.evaluate(x);
        cost += 0.5 * r.norm_squared();
        jtj += j.transpose() * j;
        gradient += j.transpose() * r;
    }
    NormalEquations {
        cost,
        jtj,
        gradient,
    }
}

fn total_cost<R: ResidualBlock>(blocks: &[R], x: &TransformEstimate) -> f64 {
    blocks
        .iter()
        .map(|b| 0.5 * b.residual(x).norm_squared())
        .sum()
}

/// Levenberg-Marquardt minimizer with the translation on the real line and
/// the rotation on the circle.
#[derive(Clone, Debug, Default)]
pub struct LevenbergMarquardt {
    options: SolverOptions,
}

impl LevenbergMarquardt {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    #[inline]
    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    fn plus(&self, x: &TransformEstimate, delta: &Vector3<f64>) -> TransformEstimate {
        TransformEstimate::from_array([
            EuclideanManifold.plus(x.translation.x, delta[0]),
            EuclideanManifold.plus(x.translation.y, delta[1]),
            AngleManifold.plus(x.rotation, delta[2]),
        ])
    }

    fn damped_step(&self, eq: &NormalEquations, damping: f64) -> Option<Vector3<f64>> {
        let mut a = eq.jtj;
        for i in 0..3 {
            let d = eq.jtj[(i, i)].max(self.options.min_diagonal);
            a[(i, i)] += damping * d;
        }
        let rhs = -eq.gradient;
        let step = match a.cholesky() {
            Some(chol) => chol.solve(&rhs),
            None => a.lu().solve(&rhs)?,
        };
        step.iter().all(|v| v.is_finite()).then_some(step)
    }

    /// Minimize the summed squared residuals starting from `initial`.
    ///
    /// Always returns the last parameters the solver accepted, together with
    /// the summary; callers decide what to do on non-convergence.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, blocks, initial), fields(blocks = blocks.len()))
    )]
    pub fn minimize<R: ResidualBlock>(
        &self,
        blocks: &[R],
        initial: TransformEstimate,
    ) -> Result<(TransformEstimate, SolverSummary), SolverError> {
        if blocks.is_empty() {
            return Err(SolverError::EmptyProblem);
        }
        let opts = &self.options;

        let mut x = initial;
        let mut eq = linearize(blocks, &x);
        let mut summary = SolverSummary {
            termination: TerminationType::NoConvergence,
            message: String::new(),
            num_residual_blocks: blocks.len(),
            num_residuals: 2 * blocks.len(),
            num_parameters: 3,
            initial_cost: eq.cost,
            final_cost: eq.cost,
            num_successful_steps: 0,
            num_unsuccessful_steps: 0,
            iterations: Vec::new(),
        };

        if !eq.cost.is_finite() || !x.is_finite() {
            summary.termination = TerminationType::Failure;
            summary.message = "initial cost is not finite".to_string();
            return Ok((x, summary));
        }

        let mut damping = opts.initial_damping;
        let mut nu = 2.0;

        for iteration in 1..=opts.max_iterations {
            let gradient_max_norm = eq.gradient.amax();
            if gradient_max_norm <= opts.gradient_tolerance {
                summary.termination = TerminationType::Convergence;
                summary.message = format!(
                    "gradient tolerance reached: {:e} <= {:e}",
                    gradient_max_norm, opts.gradient_tolerance
                );
                break;
            }

            let Some(step) = self.damped_step(&eq, damping) else {
                summary.num_unsuccessful_steps += 1;
                damping *= nu;
                nu *= 2.0;
                if damping > opts.max_damping {
                    summary.termination = TerminationType::Convergence;
                    summary.message = "damping exceeded its upper bound".to_string();
                    break;
                }
                continue;
            };

            let step_norm = step.norm();
            let tol = opts.parameter_tolerance;
            let params = x.to_array();
            let step_is_small = (0..3).all(|i| {
                step[i].abs() <= (tol * (params[i].abs() + tol)).min(opts.absolute_step_tolerance)
            });
            if step_is_small {
                summary.termination = TerminationType::Convergence;
                summary.message = format!("parameter tolerance reached: |step| {step_norm:e}");
                break;
            }

            let candidate = self.plus(&x, &step);
            let new_cost = total_cost(blocks, &candidate);
            // Decrease predicted by the linear model: −(gᵀδ + ½ δᵀ JᵀJ δ).
            let predicted = -(eq.gradient.dot(&step) + 0.5 * step.dot(&(eq.jtj * step)));
            let actual = eq.cost - new_cost;
            let gain_ratio = if predicted > 0.0 {
                actual / predicted
            } else {
                -1.0
            };
            let accepted = new_cost.is_finite() && gain_ratio > opts.min_relative_decrease;

            summary.iterations.push(IterationSummary {
                iteration,
                cost: if accepted { new_cost } else { eq.cost },
                cost_change: actual,
                gradient_max_norm,
                step_norm,
                gain_ratio,
                damping,
                step_accepted: accepted,
            });
            log::debug!(
                "lm iter {iteration}: cost {:.6e} -> {:.6e}, rho {:.3}, lambda {:.3e}, accepted {accepted}",
                eq.cost,
                new_cost,
                gain_ratio,
                damping
            );

            if accepted {
                let previous_cost = eq.cost;
                x = candidate;
                eq = linearize(blocks, &x);
                summary.num_successful_steps += 1;

                let t = 2.0 * gain_ratio - 1.0;
                damping *= (1.0_f64 / 3.0).max(1.0 - t * t * t);
                nu = 2.0;

                if actual.abs() <= opts.function_tolerance * previous_cost {
                    summary.termination = TerminationType::Convergence;
                    summary.message = format!(
                        "function tolerance reached: |cost_change|/cost {:e} <= {:e}",
                        actual.abs() / previous_cost,
                        opts.function_tolerance
                    );
                    break;
                }
            } else {
                summary.num_unsuccessful_steps += 1;
                damping *= nu;
                nu *= 2.0;
                if damping > opts.max_damping {
                    summary.termination = TerminationType::Convergence;
                    summary.message = "damping exceeded its upper bound".to_string();
                    break;
                }
            }
        }

        if summary.message.is_empty() {
            summary.termination = TerminationType::NoConvergence;
            summary.message = format!(
                "maximum number of iterations reached ({})",
                opts.max_iterations
            );
        }
        summary.final_cost = eq.cost;
        Ok((x, summary))
    }
}

/// Convenience wrapper around [`LevenbergMarquardt::minimize`].
pub fn solve_alignment<R: ResidualBlock>(
    blocks: &[R],
    initial: TransformEstimate,
    options: &SolverOptions,
) -> Result<(TransformEstimate, SolverSummary), SolverError> {
    LevenbergMarquardt::new(options.clone()).minimize(blocks, initial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::residual::AlignmentResidual;
    use crate::types::CorrespondencePoint;
    use approx::assert_relative_eq;
    use nalgebra::Point2;

    fn synthetic(truth: &TransformEstimate, n: usize) -> Vec<AlignmentResidual> {
        (0..n)
            .map(|i| {
                let a = i as f64 * 0.7;
                let w = Point2::new(5.0 * a.cos() + i as f64, 3.0 * a.sin() - 0.5 * i as f64);
                AlignmentResidual::from(CorrespondencePoint::new(w, truth.apply(w)))
            })
            .collect()
    }

    #[test]
    fn empty_problem_is_an_error() {
        let blocks: Vec<AlignmentResidual> = Vec::new();
        let err = solve_alignment(&blocks, TransformEstimate::identity(), &SolverOptions::default())
            .unwrap_err();
        assert_eq!(err, SolverError::EmptyProblem);
    }

    #[test]
    fn recovers_transform_from_far_start() {
        let truth = TransformEstimate::new([12.0, -7.5], -2.2);
        let blocks = synthetic(&truth, 20);
        let start = TransformEstimate::new([-40.0, 90.0], 1.9);

        let (est, summary) = solve_alignment(&blocks, start, &SolverOptions::default()).unwrap();
        assert!(summary.is_converged(), "{}", summary.full_report());
        assert_relative_eq!(est.translation.x, 12.0, epsilon = 1e-6);
        assert_relative_eq!(est.translation.y, -7.5, epsilon = 1e-6);
        assert_relative_eq!(est.rotation, -2.2, epsilon = 1e-6);
        assert!(summary.final_cost < 1e-12);
    }

    #[test]
    fn already_optimal_start_converges_immediately() {
        let truth = TransformEstimate::new([1.0, 2.0], 0.3);
        let blocks = synthetic(&truth, 10);
        let (est, summary) = solve_alignment(&blocks, truth, &SolverOptions::default()).unwrap();
        assert!(summary.is_converged());
        assert!(summary.iterations.is_empty());
        assert_eq!(est, truth);
    }

    #[test]
    fn iteration_limit_reports_no_convergence_and_keeps_progress() {
        let truth = TransformEstimate::new([3.0, 4.0], 1.0);
        let blocks = synthetic(&truth, 12);
        let start = TransformEstimate::new([-30.0, 50.0], -2.0);
        let opts = SolverOptions {
            max_iterations: 1,
            ..SolverOptions::default()
        };
        let (est, summary) = solve_alignment(&blocks, start, &opts).unwrap();
        assert_eq!(summary.termination, TerminationType::NoConvergence);
        assert!(summary.final_cost <= summary.initial_cost);
        if summary.num_successful_steps > 0 {
            assert_ne!(est, start);
        }
        assert!(summary.full_report().contains("NO_CONVERGENCE"));
    }

    #[test]
    fn non_finite_start_is_a_failure() {
        let truth = TransformEstimate::identity();
        let blocks = synthetic(&truth, 4);
        let start = TransformEstimate::new([f64::NAN, 0.0], 0.0);
        let (_, summary) = solve_alignment(&blocks, start, &SolverOptions::default()).unwrap();
        assert_eq!(summary.termination, TerminationType::Failure);
    }

    #[test]
    fn single_correspondence_still_terminates() {
        let blocks = vec![AlignmentResidual::new(
            Point2::new(1.0, 1.0),
            Point2::new(4.0, 5.0),
        )];
        let (est, summary) =
            solve_alignment(&blocks, TransformEstimate::identity(), &SolverOptions::default())
                .unwrap();
        assert!(est.is_finite());
        assert!(summary.final_cost < 1e-12, "{}", summary.full_report());
    }

    #[test]
    fn georeferenced_scale_offsets_converge() {
        // UTM-sized translation with a local trajectory of a few hundred metres.
        let truth = TransformEstimate::new([448_251.3, 5_411_932.8], 0.83);
        let blocks = synthetic(&truth, 40);
        let (est, summary) =
            solve_alignment(&blocks, TransformEstimate::identity(), &SolverOptions::default())
                .unwrap();
        assert!(summary.is_converged(), "{}", summary.full_report());
        assert_relative_eq!(est.translation.x, truth.translation.x, epsilon = 1e-6);
        assert_relative_eq!(est.translation.y, truth.translation.y, epsilon = 1e-6);
        assert_relative_eq!(est.rotation, truth.rotation, epsilon = 1e-8);
    }

    #[test]
    fn georeferenced_offsets_recovered_to_micrometres_from_any_start() {
        let truth = TransformEstimate::new([448_251.3, 5_411_932.8], 0.7);
        let blocks = synthetic(&truth, 20);
        for theta in [-3.1, -1.5, 0.0, 1.2, 3.1] {
            for t in [[0.0, 0.0], [1e6, -1e6], [-1e6, 1e6], [448_251.3, 5_411_932.8]] {
                let start = TransformEstimate::new(t, theta);
                let (est, summary) =
                    solve_alignment(&blocks, start, &SolverOptions::default()).unwrap();
                assert!(summary.is_converged(), "{}", summary.full_report());
                assert_relative_eq!(est.translation.x, truth.translation.x, epsilon = 1e-6);
                assert_relative_eq!(est.translation.y, truth.translation.y, epsilon = 1e-6);
                assert_relative_eq!(
                    crate::manifold::normalize_angle(est.rotation - truth.rotation),
                    0.0,
                    epsilon = 1e-8
                );
            }
        }
    }

    #[test]
    fn absolute_step_cap_only_tightens_large_parameters() {
        let truth = TransformEstimate::new([448_251.3, 5_411_932.8], 0.7);
        let blocks = synthetic(&truth, 20);
        let start = TransformEstimate::new([448_251.0, 5_411_932.0], 0.6);
        let loose = SolverOptions {
            absolute_step_tolerance: f64::INFINITY,
            ..SolverOptions::default()
        };
        let (_, loose_summary) = solve_alignment(&blocks, start, &loose).unwrap();
        let (est, summary) = solve_alignment(&blocks, start, &SolverOptions::default()).unwrap();
        assert!(summary.is_converged(), "{}", summary.full_report());
        assert!(summary.num_iterations() >= loose_summary.num_iterations());
        assert_relative_eq!(est.translation.x, truth.translation.x, epsilon = 1e-6);
    }
}
