use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};

/// A square linear operator acting on a flat vector of unknowns.
///
pub trait LinearOperator: Sync {
    /// Number of unknowns.
    fn dim(&self) -> usize;

    /// Compute `y = A x`.
    fn apply(&self, x: &[f64], y: &mut [f64]);

    /// Diagonal of `A`, if the operator can supply one cheaply.
    fn diagonal(&self) -> Option<Vec<f64>> {
        None
    }

    /// Whether `A` annihilates constant vectors (pure Neumann or periodic
    /// problems). The solver then projects the constant mode out of the
    /// right-hand side and the solution.
    fn is_singular(&self) -> bool {
        false
    }
}

/// Tolerances and limits of one linear solve. Every operator that solves
/// owns a set of these under its own configuration key.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub max_iter: usize,
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            rel_tol: 1e-11,
            abs_tol: 1e-14,
            max_iter: 500,
            verbose: false,
        }
    }
}

/// Outcome of a converged solve.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,
    pub residual: f64,
}

/// The linear-solver collaborator.
///
pub trait LinearSolver: Send + Sync {
    /// Solve `A x = rhs`, starting from the contents of `x`. Failure to meet
    /// the tolerance within the iteration cap is reported as
    /// `Error::SolverNotConverged`, tagged with `label`.
    fn solve(&self, label: &str, op: &dyn LinearOperator, rhs: &[f64], x: &mut [f64], options: &SolverOptions) -> Result<SolveStats>;
}

/// Jacobi-preconditioned conjugate gradients. Requires a symmetric
/// positive (semi-)definite operator.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct ConjugateGradient;

impl LinearSolver for ConjugateGradient {
    fn solve(&self, label: &str, op: &dyn LinearOperator, rhs: &[f64], x: &mut [f64], options: &SolverOptions) -> Result<SolveStats> {
        let n = op.dim();
        assert_eq!(rhs.len(), n, "{}: right-hand side has the wrong length", label);
        assert_eq!(x.len(), n, "{}: solution vector has the wrong length", label);

        if n == 0 {
            return Ok(SolveStats {
                iterations: 0,
                residual: 0.0,
            });
        }
        let singular = op.is_singular();
        let mut b = rhs.to_vec();

        if singular {
            remove_mean(&mut b);
            remove_mean(x);
        }
        let inv_diag: Vec<f64> = match op.diagonal() {
            Some(d) => d.into_par_iter().map(|a| if a != 0.0 { 1.0 / a } else { 1.0 }).collect(),
            None => vec![1.0; n],
        };

        let mut r = vec![0.0; n];
        op.apply(x, &mut r);
        r.par_iter_mut().zip(&b).for_each(|(r, b)| *r = b - *r);

        let target = (options.rel_tol * norm(&b)).max(options.abs_tol);
        let mut residual = norm(&r);

        if residual <= target {
            return Ok(SolveStats {
                iterations: 0,
                residual,
            });
        }
        let mut z: Vec<f64> = r.par_iter().zip(&inv_diag).map(|(r, d)| r * d).collect();
        let mut p = z.clone();
        let mut q = vec![0.0; n];
        let mut rz = dot(&r, &z);

        for iteration in 1..=options.max_iter {
            op.apply(&p, &mut q);
            let pq = dot(&p, &q);

            if pq.abs() <= f64::MIN_POSITIVE {
                break;
            }
            let alpha = rz / pq;
            x.par_iter_mut().zip(&p).for_each(|(x, p)| *x += alpha * p);
            r.par_iter_mut().zip(&q).for_each(|(r, q)| *r -= alpha * q);

            if singular {
                remove_mean(&mut r);
            }
            residual = norm(&r);

            if options.verbose {
                debug!("{}: iteration {} residual {:.3e}", label, iteration, residual);
            }
            if residual <= target {
                if singular {
                    remove_mean(x);
                }
                if options.verbose {
                    info!("{}: converged in {} iterations", label, iteration);
                }
                return Ok(SolveStats {
                    iterations: iteration,
                    residual,
                });
            }
            z.par_iter_mut().zip(&r).zip(&inv_diag).for_each(|((z, r), d)| *z = r * d);
            let rz_new = dot(&r, &z);
            let beta = rz_new / rz;
            rz = rz_new;
            p.par_iter_mut().zip(&z).for_each(|(p, z)| *p = z + beta * *p);
        }
        Err(Error::SolverNotConverged {
            label: label.to_string(),
            iterations: options.max_iter,
            residual,
        })
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.par_iter().zip(b).map(|(a, b)| a * b).sum()
}

pub fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn remove_mean(a: &mut [f64]) {
    let mean = a.par_iter().sum::<f64>() / a.len() as f64;
    a.par_iter_mut().for_each(|a| *a -= mean);
}

#[cfg(test)]
mod test {
    use super::{ConjugateGradient, LinearOperator, LinearSolver, SolverOptions};
    use crate::error::Error;

    /// The 1D Laplacian `-u'' = f` with Dirichlet ends, or periodic.
    struct Laplace1d {
        n: usize,
        periodic: bool,
    }

    impl LinearOperator for Laplace1d {
        fn dim(&self) -> usize {
            self.n
        }

        fn apply(&self, x: &[f64], y: &mut [f64]) {
            let n = self.n;
            for i in 0..n {
                let l = if i > 0 { x[i - 1] } else if self.periodic { x[n - 1] } else { 0.0 };
                let r = if i + 1 < n { x[i + 1] } else if self.periodic { x[0] } else { 0.0 };
                y[i] = 2.0 * x[i] - l - r;
            }
        }

        fn diagonal(&self) -> Option<Vec<f64>> {
            Some(vec![2.0; self.n])
        }

        fn is_singular(&self) -> bool {
            self.periodic
        }
    }

    #[test]
    fn cg_solves_a_dirichlet_system() {
        let op = Laplace1d { n: 32, periodic: false };
        let exact: Vec<f64> = (0..32).map(|i| (i as f64 * 0.3).sin()).collect();
        let mut rhs = vec![0.0; 32];
        op.apply(&exact, &mut rhs);

        let mut x = vec![0.0; 32];
        let stats = ConjugateGradient.solve("test", &op, &rhs, &mut x, &SolverOptions::default()).unwrap();
        assert!(stats.iterations <= 32);
        for (a, b) in x.iter().zip(&exact) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn cg_solves_a_singular_system_up_to_a_constant() {
        let op = Laplace1d { n: 16, periodic: true };
        let exact: Vec<f64> = (0..16).map(|i| (i as f64 * std::f64::consts::PI / 8.0).cos()).collect();
        let mut rhs = vec![0.0; 16];
        op.apply(&exact, &mut rhs);
        rhs.iter_mut().for_each(|r| *r += 0.25);

        let mut x = vec![1.0; 16];
        ConjugateGradient.solve("test", &op, &rhs, &mut x, &SolverOptions::default()).unwrap();
        for (a, b) in x.iter().zip(&exact) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn iteration_cap_is_reported() {
        let op = Laplace1d { n: 64, periodic: false };
        let rhs = vec![1.0; 64];
        let mut x = vec![0.0; 64];
        let options = SolverOptions {
            max_iter: 2,
            ..SolverOptions::default()
        };
        match ConjugateGradient.solve("mac_proj", &op, &rhs, &mut x, &options) {
            Err(Error::SolverNotConverged { label, iterations, .. }) => {
                assert_eq!(label, "mac_proj");
                assert_eq!(iterations, 2);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
