//! Step size selection.
//!
//! Steps are `h_i = c * max(|x_i|, 1)`. The constant `c` balances truncation error
//! against round-off: forward differences (error O(h)) use `c = ε^(1/2)`, central
//! differences (error O(h²)) use `c = ε^(1/3)`, and the second-order stencil of the
//! gradient-free Hessian uses `c = ε^(1/4)`.

use crate::error::{DiffError, Result};
use crate::traits::Scalar;
use serde::{Deserialize, Serialize};

/// Finite-difference scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Forward,
    Central,
}

/// Which scale constant to use; `SecondOrder` only drives the gradient-free Hessian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scheme {
    Forward,
    Central,
    SecondOrder,
}

impl From<Method> for Scheme {
    fn from(method: Method) -> Self {
        match method {
            Method::Forward => Scheme::Forward,
            Method::Central => Scheme::Central,
        }
    }
}

/// Perturbation magnitude: one value for all dimensions or one per dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum StepSize<T> {
    Uniform(T),
    PerDimension(Vec<T>),
}

impl<T: Scalar> StepSize<T> {
    /// Step for dimension `i`.
    pub fn get(&self, i: usize) -> T {
        match self {
            StepSize::Uniform(h) => *h,
            StepSize::PerDimension(hs) => hs[i],
        }
    }
}

/// User-facing configuration. `None` scales fall back to the epsilon-derived defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffSettings {
    pub forward_scale: Option<f64>,
    pub central_scale: Option<f64>,
    pub second_order_scale: Option<f64>,
    /// Replace Hessians from a gradient function by `(H + Hᵀ) / 2`.
    pub symmetrize_hessian: bool,
}

/// Resolved step constants for one scalar type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepPolicy<T> {
    forward: T,
    central: T,
    second_order: T,
}

impl<T: Scalar> Default for StepPolicy<T> {
    fn default() -> Self {
        let eps = T::epsilon();
        Self {
            forward: eps.sqrt(),
            central: eps.cbrt(),
            second_order: eps.sqrt().sqrt(),
        }
    }
}

impl<T: Scalar> StepPolicy<T> {
    /// Builds a policy from settings, rejecting scales that are not finite and positive.
    pub fn from_settings(settings: &DiffSettings) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            forward: resolve_scale("forward_scale", settings.forward_scale, defaults.forward)?,
            central: resolve_scale("central_scale", settings.central_scale, defaults.central)?,
            second_order: resolve_scale(
                "second_order_scale",
                settings.second_order_scale,
                defaults.second_order,
            )?,
        })
    }

    pub(crate) fn scale(&self, scheme: Scheme) -> T {
        match scheme {
            Scheme::Forward => self.forward,
            Scheme::Central => self.central,
            Scheme::SecondOrder => self.second_order,
        }
    }

    /// Per-dimension steps for `x`.
    pub fn step_sizes(&self, x: &[T], method: Method) -> StepSize<T> {
        self.steps_for(x, method.into())
    }

    pub(crate) fn steps_for(&self, x: &[T], scheme: Scheme) -> StepSize<T> {
        let c = self.scale(scheme);
        StepSize::PerDimension(x.iter().map(|xi| c * xi.abs().max(T::one())).collect())
    }

    /// Step along direction `p`, chosen so that `‖h·p‖` matches the per-dimension
    /// step of the largest coordinate of `x`.
    pub fn directional_step(&self, x: &[T], p: &[T], method: Method) -> T {
        let c = self.scale(method.into());
        let x_scale = x
            .iter()
            .fold(T::one(), |acc, xi| if xi.abs() > acc { xi.abs() } else { acc });
        let p_norm = p.iter().fold(T::zero(), |acc, pi| acc + *pi * *pi).sqrt();
        if p_norm > T::zero() && p_norm.is_finite() {
            c * x_scale / p_norm
        } else {
            c * x_scale
        }
    }
}

fn resolve_scale<T: Scalar>(name: &str, value: Option<f64>, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(v) if v.is_finite() && v > 0.0 => Ok(T::constant(v)),
        Some(v) => Err(DiffError::InvalidSettings(format!(
            "{} must be finite and positive, got {}",
            name, v
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scales_follow_epsilon_powers() {
        let policy = StepPolicy::<f64>::default();
        assert!((policy.scale(Scheme::Forward) - f64::EPSILON.sqrt()).abs() < 1e-20);
        assert!((policy.scale(Scheme::Central) - f64::EPSILON.cbrt()).abs() < 1e-20);
        assert!((policy.scale(Scheme::SecondOrder) - f64::EPSILON.powf(0.25)).abs() < 1e-18);
        assert!(policy.scale(Scheme::Forward) < policy.scale(Scheme::Central));
    }

    #[test]
    fn steps_are_floored_near_zero() {
        let policy = StepPolicy::<f64>::default();
        let steps = policy.step_sizes(&[0.0, 1e-300, -4.0], Method::Forward);
        let c = f64::EPSILON.sqrt();
        assert_eq!(steps.get(0), c);
        assert_eq!(steps.get(1), c);
        assert_eq!(steps.get(2), 4.0 * c);
    }

    #[test]
    fn uniform_step_applies_everywhere() {
        let steps = StepSize::Uniform(0.5f64);
        assert_eq!(steps.get(0), 0.5);
        assert_eq!(steps.get(7), 0.5);
    }

    #[test]
    fn directional_step_is_scaled_by_direction_norm() {
        let policy = StepPolicy::<f64>::default();
        let c = f64::EPSILON.cbrt();
        let h = policy.directional_step(&[1.0, -2.0], &[3.0, 4.0], Method::Central);
        assert!((h - c * 2.0 / 5.0).abs() < 1e-20);

        let h_zero = policy.directional_step(&[0.5], &[0.0], Method::Forward);
        assert_eq!(h_zero, f64::EPSILON.sqrt());
    }

    #[test]
    fn settings_override_and_validate() {
        let settings = DiffSettings {
            forward_scale: Some(1e-4),
            ..DiffSettings::default()
        };
        let policy = StepPolicy::<f64>::from_settings(&settings).expect("valid");
        assert_eq!(policy.scale(Scheme::Forward), 1e-4);
        assert_eq!(policy.scale(Scheme::Central), f64::EPSILON.cbrt());

        let bad = DiffSettings {
            central_scale: Some(-1.0),
            ..DiffSettings::default()
        };
        let err = StepPolicy::<f64>::from_settings(&bad).expect_err("negative scale");
        assert!(err.to_string().contains("central_scale"));
        assert!(err.is_configuration());
    }
}
