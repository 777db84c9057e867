//! Jacobians and Jacobian-vector products of vector-valued targets.
//!
//! A single evaluation at `x + h_j·e_j` yields column `j` for every output at once,
//! so the full Jacobian costs `n + 1` (forward) or `2n` (central) evaluations.
//! The product `J(x)·p` uses the directional stencil and costs 2 evaluations
//! regardless of `n`.

use crate::callable::{Callable, SampleShape};
use crate::error::{DiffError, Result};
use crate::step::{DiffSettings, Method, StepPolicy, StepSize};
use crate::stencil::{central_quotient, ensure_finite, forward_quotient, Stencil};
use crate::traits::Scalar;
use nalgebra::{DMatrix, DVector};

/// Fills an m×n matrix column by column from perturbed vector samples.
///
/// `rows` pins the output length; otherwise the first sample fixes it.
pub(crate) fn jacobian_matrix<T: Scalar>(
    stencil: &mut Stencil<'_, T>,
    n: usize,
    steps: &StepSize<T>,
    method: Method,
    rows: Option<usize>,
) -> Result<DMatrix<T>> {
    let what = stencil.stage();
    let mut columns: Vec<Vec<T>> = Vec::with_capacity(n);
    let mut m = rows;

    match method {
        Method::Forward => {
            let fx = stencil.at_base()?.into_vector(what, m)?;
            m = Some(fx.len());
            for j in 0..n {
                let h = steps.get(j);
                let fx1 = stencil.shifted(j, h)?.into_vector(what, m)?;
                columns.push(forward_quotient(&fx1, &fx, h));
            }
        }
        Method::Central => {
            for j in 0..n {
                let h = steps.get(j);
                let fx1 = stencil.shifted(j, h)?.into_vector(what, m)?;
                m = Some(fx1.len());
                let fx2 = stencil.shifted(j, -h)?.into_vector(what, m)?;
                columns.push(central_quotient(&fx1, &fx2, h));
            }
        }
    }

    let m = m.unwrap_or(0);
    let mut out = DMatrix::from_element(m, n, T::zero());
    for (j, column) in columns.iter().enumerate() {
        ensure_finite(column, what, j)?;
        for (i, &value) in column.iter().enumerate() {
            out[(i, j)] = value;
        }
    }
    Ok(out)
}

/// Directional quotient along `p` with step `h`.
pub(crate) fn directional<T: Scalar>(
    stencil: &mut Stencil<'_, T>,
    p: &[T],
    h: T,
    method: Method,
    rows: Option<usize>,
) -> Result<DVector<T>> {
    let what = stencil.stage();
    let out = match method {
        Method::Forward => {
            let fx = stencil.at_base()?.into_vector(what, rows)?;
            let fx1 = stencil.along(p, h)?.into_vector(what, Some(fx.len()))?;
            forward_quotient(&fx1, &fx, h)
        }
        Method::Central => {
            let fx1 = stencil.along(p, h)?.into_vector(what, rows)?;
            let fx2 = stencil.along(p, -h)?.into_vector(what, Some(fx1.len()))?;
            central_quotient(&fx1, &fx2, h)
        }
    };
    ensure_finite(&out, what, 0)?;
    Ok(DVector::from_vec(out))
}

pub(crate) fn check_direction<T>(x: &[T], p: &[T]) -> Result<()> {
    if x.len() == p.len() {
        Ok(())
    } else {
        Err(DiffError::mismatch(
            "direction",
            SampleShape::Vector(x.len()),
            SampleShape::Vector(p.len()),
        ))
    }
}

/// Full Jacobian of a vector-valued target.
#[derive(Debug)]
pub struct JacobianOp<T: Scalar> {
    target: Callable<T>,
    method: Method,
    policy: StepPolicy<T>,
}

impl<T: Scalar> JacobianOp<T> {
    pub fn new(target: Callable<T>, method: Method) -> Self {
        Self {
            target,
            method,
            policy: StepPolicy::default(),
        }
    }

    pub fn with_settings(target: Callable<T>, method: Method, settings: &DiffSettings) -> Result<Self> {
        Ok(Self {
            target,
            method,
            policy: StepPolicy::from_settings(settings)?,
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// m×n Jacobian at `x`; entry (i, j) is ∂f_i/∂x_j.
    pub fn eval(&self, x: &[T]) -> Result<DMatrix<T>> {
        let steps = self.policy.step_sizes(x, self.method);
        let mut stencil = Stencil::new(&self.target, x, "jacobian");
        jacobian_matrix(&mut stencil, x.len(), &steps, self.method, None)
    }
}

/// Jacobian-vector product `J(x)·p` without forming `J`.
#[derive(Debug)]
pub struct JvpOp<T: Scalar> {
    target: Callable<T>,
    method: Method,
    policy: StepPolicy<T>,
}

impl<T: Scalar> JvpOp<T> {
    pub fn new(target: Callable<T>, method: Method) -> Self {
        Self {
            target,
            method,
            policy: StepPolicy::default(),
        }
    }

    pub fn with_settings(target: Callable<T>, method: Method, settings: &DiffSettings) -> Result<Self> {
        Ok(Self {
            target,
            method,
            policy: StepPolicy::from_settings(settings)?,
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn eval(&self, x: &[T], p: &[T]) -> Result<DVector<T>> {
        check_direction(x, p)?;
        let h = self.policy.directional_step(x, p, self.method);
        let mut stencil = Stencil::new(&self.target, x, "jacobian-vector product");
        directional(&mut stencil, p, h, self.method, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    const COMP_ACC: f64 = 1e-6;

    fn op(x: &[f64]) -> anyhow::Result<Vec<f64>> {
        Ok(vec![
            2.0 * (x[1].powi(3) - x[0].powi(2)),
            3.0 * (x[1].powi(3) - x[0].powi(2)) + 2.0 * (x[2].powi(3) - x[1].powi(2)),
            3.0 * (x[2].powi(3) - x[1].powi(2)) + 2.0 * (x[3].powi(3) - x[2].powi(2)),
            3.0 * (x[3].powi(3) - x[2].powi(2)) + 2.0 * (x[4].powi(3) - x[3].powi(2)),
            3.0 * (x[4].powi(3) - x[3].powi(2)) + 2.0 * (x[5].powi(3) - x[4].powi(2)),
            3.0 * (x[5].powi(3) - x[4].powi(2)),
        ])
    }

    fn op_jacobian_at_ones() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            6,
            6,
            &[
                -4.0, 6.0, 0.0, 0.0, 0.0, 0.0, //
                -6.0, 5.0, 6.0, 0.0, 0.0, 0.0, //
                0.0, -6.0, 5.0, 6.0, 0.0, 0.0, //
                0.0, 0.0, -6.0, 5.0, 6.0, 0.0, //
                0.0, 0.0, 0.0, -6.0, 5.0, 6.0, //
                0.0, 0.0, 0.0, 0.0, -6.0, 9.0,
            ],
        )
    }

    fn counted(calls: Rc<Cell<usize>>) -> Callable<f64> {
        Callable::function(move |x: &[f64]| {
            calls.set(calls.get() + 1);
            op(x)
        })
    }

    #[test]
    fn forward_and_central_match_analytic_jacobian() {
        let x = vec![1.0; 6];
        let expected = op_jacobian_at_ones();
        for method in [Method::Forward, Method::Central] {
            let jac = JacobianOp::new(Callable::function(op), method)
                .eval(&x)
                .expect("jacobian");
            assert_eq!(jac.shape(), (6, 6));
            for i in 0..6 {
                for j in 0..6 {
                    assert!(
                        (jac[(i, j)] - expected[(i, j)]).abs() < COMP_ACC,
                        "{:?} ({}, {}): {} vs {}",
                        method,
                        i,
                        j,
                        jac[(i, j)],
                        expected[(i, j)]
                    );
                }
            }
        }
    }

    #[test]
    fn forward_and_central_agree() {
        let x = [0.3, -1.2, 0.7, 2.0, 1.1, -0.4];
        let fwd = JacobianOp::new(Callable::function(op), Method::Forward)
            .eval(&x)
            .expect("forward");
        let cen = JacobianOp::new(Callable::function(op), Method::Central)
            .eval(&x)
            .expect("central");
        assert!((fwd - cen).amax() < 1e-5);
    }

    #[test]
    fn evaluation_counts() {
        let x = vec![1.0; 6];
        let calls = Rc::new(Cell::new(0));

        JacobianOp::new(counted(calls.clone()), Method::Forward)
            .eval(&x)
            .expect("forward");
        assert_eq!(calls.get(), 7);

        calls.set(0);
        JacobianOp::new(counted(calls.clone()), Method::Central)
            .eval(&x)
            .expect("central");
        assert_eq!(calls.get(), 12);

        for method in [Method::Forward, Method::Central] {
            calls.set(0);
            JvpOp::new(counted(calls.clone()), method)
                .eval(&x, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
                .expect("jvp");
            assert_eq!(calls.get(), 2);
        }
    }

    #[test]
    fn non_square_jacobian() {
        let target = Callable::function(|x: &[f64]| -> anyhow::Result<Vec<f64>> {
            Ok(vec![x[0] * x[1], x[0] + x[1], x[1].sin()])
        });
        let jac = JacobianOp::new(target, Method::Central)
            .eval(&[2.0, 0.5])
            .expect("jacobian");
        assert_eq!(jac.shape(), (3, 2));
        assert!((jac[(0, 0)] - 0.5).abs() < 1e-8);
        assert!((jac[(0, 1)] - 2.0).abs() < 1e-8);
        assert!((jac[(1, 0)] - 1.0).abs() < 1e-8);
        assert!((jac[(2, 0)]).abs() < 1e-8);
        assert!((jac[(2, 1)] - 0.5f64.cos()).abs() < 1e-8);
    }

    #[test]
    fn jvp_matches_jacobian_times_direction() {
        let x = vec![1.0; 6];
        let p = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let expected = op_jacobian_at_ones() * DVector::from_column_slice(&p);
        assert_eq!(expected.as_slice(), &[8.0, 22.0, 27.0, 32.0, 37.0, 24.0]);

        let central = JvpOp::new(Callable::function(op), Method::Central)
            .eval(&x, &p)
            .expect("central jvp");
        let forward = JvpOp::new(Callable::function(op), Method::Forward)
            .eval(&x, &p)
            .expect("forward jvp");
        for i in 0..6 {
            assert!((central[i] - expected[i]).abs() < 1e-7);
            assert!((forward[i] - expected[i]).abs() < 1e-5);
        }
    }

    #[test]
    fn scalar_output_is_rejected() {
        let target = Callable::function(|x: &[f64]| -> anyhow::Result<f64> { Ok(x[0]) });
        let err = JacobianOp::new(target, Method::Forward)
            .eval(&[1.0])
            .expect_err("scalar target");
        assert!(matches!(err, DiffError::DimensionMismatch { .. }));
    }

    #[test]
    fn output_length_must_not_change() {
        let target = Callable::function(|x: &[f64]| -> anyhow::Result<Vec<f64>> {
            Ok(if x[1] > 1.0 { vec![x[0]] } else { vec![x[0], x[1]] })
        });
        let err = JacobianOp::new(target, Method::Forward)
            .eval(&[1.0, 1.0])
            .expect_err("ragged outputs");
        match err {
            DiffError::DimensionMismatch { expected, actual, .. } => {
                assert_eq!(expected, SampleShape::Vector(2));
                assert_eq!(actual, SampleShape::Vector(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn direction_length_is_checked() {
        let err = JvpOp::new(Callable::function(op), Method::Central)
            .eval(&[1.0; 6], &[1.0, 2.0])
            .expect_err("short direction");
        assert!(err.to_string().contains("direction"));
    }

    #[test]
    fn target_failure_stops_evaluation() {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let target = Callable::function(move |x: &[f64]| -> anyhow::Result<Vec<f64>> {
            seen.set(seen.get() + 1);
            if x[0] > 1.0 {
                anyhow::bail!("out of domain");
            }
            Ok(x.to_vec())
        });
        let err = JacobianOp::new(target, Method::Central)
            .eval(&[1.0, 1.0, 1.0])
            .expect_err("should abort");
        assert!(matches!(err, DiffError::Target(_)));
        assert_eq!(calls.get(), 1);
    }
}
