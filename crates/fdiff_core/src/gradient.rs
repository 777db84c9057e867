//! Gradients of scalar-valued targets.

use crate::callable::Callable;
use crate::error::Result;
use crate::step::{DiffSettings, Method, StepPolicy};
use crate::stencil::{ensure_finite, Stencil};
use crate::traits::Scalar;
use nalgebra::DVector;

/// Gradient of a scalar target.
///
/// Forward differences evaluate `f(x)` once and reuse it for all `n` partials
/// (`n + 1` evaluations); central differences need `2n` evaluations and no base value.
#[derive(Debug)]
pub struct GradientOp<T: Scalar> {
    target: Callable<T>,
    method: Method,
    policy: StepPolicy<T>,
}

impl<T: Scalar> GradientOp<T> {
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

    pub fn eval(&self, x: &[T]) -> Result<DVector<T>> {
        let n = x.len();
        let steps = self.policy.step_sizes(x, self.method);
        let mut stencil = Stencil::new(&self.target, x, "gradient");
        let what = stencil.stage();
        let two = T::constant(2.0);

        let mut grad = Vec::with_capacity(n);
        match self.method {
            Method::Forward => {
                let fx = stencil.at_base()?.into_scalar(what)?;
                for i in 0..n {
                    let h = steps.get(i);
                    let fx1 = stencil.shifted(i, h)?.into_scalar(what)?;
                    grad.push((fx1 - fx) / h);
                }
            }
            Method::Central => {
                for i in 0..n {
                    let h = steps.get(i);
                    let fx1 = stencil.shifted(i, h)?.into_scalar(what)?;
                    let fx2 = stencil.shifted(i, -h)?.into_scalar(what)?;
                    grad.push((fx1 - fx2) / (two * h));
                }
            }
        }

        ensure_finite(&grad, what, 0)?;
        Ok(DVector::from_vec(grad))
    }
}
