//! Hessians and Hessian-vector products.
//!
//! With a gradient function `g = ∇f` the Hessian is the Jacobian of `g` and the
//! Hessian-vector product is the directional derivative of `g`. Without a gradient
//! the Hessian is assembled from a second-order stencil on `f` alone.

use crate::callable::Callable;
use crate::error::Result;
use crate::jacobian::{check_direction, directional, jacobian_matrix};
use crate::step::{DiffSettings, Method, Scheme, StepPolicy};
use crate::stencil::{ensure_finite, Stencil};
use crate::traits::Scalar;
use nalgebra::{DMatrix, DVector};

/// Hessian from a gradient function.
///
/// The estimate is symmetric only up to truncation and round-off error unless
/// `DiffSettings::symmetrize_hessian` is set.
#[derive(Debug)]
pub struct HessianOp<T: Scalar> {
    gradient: Callable<T>,
    method: Method,
    policy: StepPolicy<T>,
    symmetrize: bool,
}

impl<T: Scalar> HessianOp<T> {
    pub fn new(gradient: Callable<T>, method: Method) -> Self {
        Self {
            gradient,
            method,
            policy: StepPolicy::default(),
            symmetrize: false,
        }
    }

    pub fn with_settings(gradient: Callable<T>, method: Method, settings: &DiffSettings) -> Result<Self> {
        Ok(Self {
            gradient,
            method,
            policy: StepPolicy::from_settings(settings)?,
            symmetrize: settings.symmetrize_hessian,
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn eval(&self, x: &[T]) -> Result<DMatrix<T>> {
        let n = x.len();
        let steps = self.policy.step_sizes(x, self.method);
        let mut stencil = Stencil::new(&self.gradient, x, "hessian");
        let hessian = jacobian_matrix(&mut stencil, n, &steps, self.method, Some(n))?;
        Ok(if self.symmetrize {
            restore_symmetry(hessian)
        } else {
            hessian
        })
    }
}

/// `(H + Hᵀ) / 2`
fn restore_symmetry<T: Scalar>(mut mat: DMatrix<T>) -> DMatrix<T> {
    let half = T::constant(0.5);
    let n = mat.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let t = (mat[(i, j)] + mat[(j, i)]) * half;
            mat[(i, j)] = t;
            mat[(j, i)] = t;
        }
    }
    mat
}

/// Hessian-vector product `H(x)·p` from a gradient function.
#[derive(Debug)]
pub struct HvpOp<T: Scalar> {
    gradient: Callable<T>,
    method: Method,
    policy: StepPolicy<T>,
}

impl<T: Scalar> HvpOp<T> {
    pub fn new(gradient: Callable<T>, method: Method) -> Self {
        Self {
            gradient,
            method,
            policy: StepPolicy::default(),
        }
    }

    pub fn with_settings(gradient: Callable<T>, method: Method, settings: &DiffSettings) -> Result<Self> {
        Ok(Self {
            gradient,
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
        let mut stencil = Stencil::new(&self.gradient, x, "hessian-vector product");
        directional(&mut stencil, p, h, self.method, Some(x.len()))
    }
}

/// Hessian of a scalar target without a gradient function.
///
/// Diagonal: `(f(x+h_i e_i) − 2f(x) + f(x−h_i e_i)) / h_i²`.
/// Off-diagonal: `(f(++) − f(+−) − f(−+) + f(−−)) / (4 h_i h_j)`, computed once per
/// pair and mirrored, so the result is exactly symmetric. Costs `2n² + 1` evaluations.
#[derive(Debug)]
pub struct NogradHessianOp<T: Scalar> {
    target: Callable<T>,
    policy: StepPolicy<T>,
}

impl<T: Scalar> NogradHessianOp<T> {
    pub fn new(target: Callable<T>) -> Self {
        Self {
            target,
            policy: StepPolicy::default(),
        }
    }

    pub fn with_settings(target: Callable<T>, settings: &DiffSettings) -> Result<Self> {
        Ok(Self {
            target,
            policy: StepPolicy::from_settings(settings)?,
        })
    }

    pub fn eval(&self, x: &[T]) -> Result<DMatrix<T>> {
        let n = x.len();
        let steps = self.policy.steps_for(x, Scheme::SecondOrder);
        let mut stencil = Stencil::new(&self.target, x, "gradient-free hessian");
        let what = stencil.stage();
        let two = T::constant(2.0);
        let four = T::constant(4.0);

        let fx = stencil.at_base()?.into_scalar(what)?;
        let mut out = DMatrix::from_element(n, n, T::zero());

        for i in 0..n {
            let hi = steps.get(i);
            let fp = stencil.shifted(i, hi)?.into_scalar(what)?;
            let fm = stencil.shifted(i, -hi)?.into_scalar(what)?;
            out[(i, i)] = (fp - two * fx + fm) / (hi * hi);
        }

        for i in 0..n {
            let hi = steps.get(i);
            for j in (i + 1)..n {
                let hj = steps.get(j);
                let fpp = stencil.shifted_pair((i, hi), (j, hj))?.into_scalar(what)?;
                let fpm = stencil.shifted_pair((i, hi), (j, -hj))?.into_scalar(what)?;
                let fmp = stencil.shifted_pair((i, -hi), (j, hj))?.into_scalar(what)?;
                let fmm = stencil.shifted_pair((i, -hi), (j, -hj))?.into_scalar(what)?;
                let t = (fpp - fpm - fmp + fmm) / (four * hi * hj);
                out[(i, j)] = t;
                out[(j, i)] = t;
            }
        }

        ensure_finite(out.as_slice(), what, 0)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiffError;
    use std::cell::Cell;
    use std::rc::Rc;

    const COMP_ACC: f64 = 1e-6;

    fn f3(x: &[f64]) -> anyhow::Result<f64> {
        Ok(x[0] + x[1].powi(2) + x[2] * x[3].powi(2))
    }

    fn g(x: &[f64]) -> anyhow::Result<Vec<f64>> {
        Ok(vec![1.0, 2.0 * x[1], x[3].powi(2), 2.0 * x[3] * x[2]])
    }

    fn hessian_at_ones() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            4,
            4,
            &[
                0.0, 0.0, 0.0, 0.0, //
                0.0, 2.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 2.0, //
                0.0, 0.0, 2.0, 2.0,
            ],
        )
    }

    fn counted<R: Into<crate::callable::Sample<f64>> + 'static>(
        calls: Rc<Cell<usize>>,
        f: fn(&[f64]) -> anyhow::Result<R>,
    ) -> Callable<f64> {
        Callable::function(move |x: &[f64]| {
            calls.set(calls.get() + 1);
            f(x)
        })
    }

    #[test]
    fn hessian_from_gradient() {
        let x = vec![1.0; 4];
        let expected = hessian_at_ones();
        for method in [Method::Forward, Method::Central] {
            let hessian = HessianOp::new(Callable::function(g), method)
                .eval(&x)
                .expect("hessian");
            for i in 0..4 {
                for j in 0..4 {
                    assert!((hessian[(i, j)] - expected[(i, j)]).abs() < COMP_ACC);
                    assert!((hessian[(i, j)] - hessian[(j, i)]).abs() < COMP_ACC);
                }
            }
        }
    }

    #[test]
    fn symmetrized_hessian_is_exactly_symmetric() {
        let settings = DiffSettings {
            symmetrize_hessian: true,
            ..DiffSettings::default()
        };
        let hessian = HessianOp::with_settings(Callable::function(g), Method::Forward, &settings)
            .expect("settings")
            .eval(&[0.4, -1.3, 2.1, 0.8])
            .expect("hessian");
        assert_eq!(hessian, hessian.transpose());
    }

    #[test]
    fn hvp_matches_hessian_times_direction() {
        let x = vec![1.0; 4];
        let p = [2.0, 3.0, 4.0, 5.0];
        let expected = hessian_at_ones() * DVector::from_column_slice(&p);
        assert_eq!(expected.as_slice(), &[0.0, 6.0, 10.0, 18.0]);

        for method in [Method::Forward, Method::Central] {
            let hvp = HvpOp::new(Callable::function(g), method)
                .eval(&x, &p)
                .expect("hvp");
            let hessian = HessianOp::new(Callable::function(g), method)
                .eval(&x)
                .expect("hessian");
            let product = hessian * DVector::from_column_slice(&p);
            for i in 0..4 {
                assert!((hvp[i] - expected[i]).abs() < 1e-5);
                assert!((hvp[i] - product[i]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn gradient_length_must_match_point() {
        let short = Callable::function(|x: &[f64]| -> anyhow::Result<Vec<f64>> { Ok(vec![x[0]]) });
        let err = HessianOp::new(short, Method::Central)
            .eval(&[1.0, 2.0])
            .expect_err("gradient too short");
        assert!(matches!(err, DiffError::DimensionMismatch { .. }));

        let short = Callable::function(|x: &[f64]| -> anyhow::Result<Vec<f64>> { Ok(vec![x[0]]) });
        let err = HvpOp::new(short, Method::Forward)
            .eval(&[1.0, 2.0], &[1.0, 0.0])
            .expect_err("gradient too short");
        assert!(matches!(err, DiffError::DimensionMismatch { .. }));
    }

    #[test]
    fn nograd_hessian_matches_known_values() {
        let hessian = NogradHessianOp::new(Callable::function(f3))
            .eval(&[1.0, 1.0, 1.0, 1.0])
            .expect("hessian");
        let expected = hessian_at_ones();
        for i in 0..4 {
            for j in 0..4 {
                assert!((hessian[(i, j)] - expected[(i, j)]).abs() < 1e-4);
            }
        }
        assert_eq!(hessian, hessian.transpose());
    }

    #[test]
    fn nograd_and_gradient_hessians_agree() {
        let x = [0.5, -0.3, 1.7, 0.9];
        let with_grad = HessianOp::new(Callable::function(g), Method::Central)
            .eval(&x)
            .expect("hessian");
        let without = NogradHessianOp::new(Callable::function(f3))
            .eval(&x)
            .expect("nograd hessian");
        assert!((with_grad - without).amax() < 1e-4);
    }

    #[test]
    fn evaluation_counts() {
        let calls = Rc::new(Cell::new(0));
        let x = [1.0; 4];

        HessianOp::new(counted(calls.clone(), g), Method::Forward)
            .eval(&x)
            .expect("forward");
        assert_eq!(calls.get(), 5);

        calls.set(0);
        HessianOp::new(counted(calls.clone(), g), Method::Central)
            .eval(&x)
            .expect("central");
        assert_eq!(calls.get(), 8);

        for method in [Method::Forward, Method::Central] {
            calls.set(0);
            HvpOp::new(counted(calls.clone(), g), method)
                .eval(&x, &[2.0, 3.0, 4.0, 5.0])
                .expect("hvp");
            assert_eq!(calls.get(), 2);
        }

        calls.set(0);
        NogradHessianOp::new(counted(calls.clone(), f3))
            .eval(&x)
            .expect("nograd");
        assert_eq!(calls.get(), 2 * 4 * 4 + 1);
    }
}
