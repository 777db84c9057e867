pub mod callable;
pub mod error;
pub mod expression;
pub mod gradient;
pub mod hessian;
pub mod jacobian;
pub mod ops;
pub mod step;
mod stencil;
/// The `fdiff_core` crate computes derivatives of black-box functions with finite differences.
/// Everything is generic over the `Scalar` trait, with `f64` being the usual choice.
///
/// Key components:
/// - **Callable**: `Callable` (function, bound method, callable object) and `HostValue` for untyped targets.
/// - **Step**: `StepPolicy` picks perturbation sizes relative to machine epsilon and the point.
/// - **Engines**: gradient, Jacobian, JVP, Hessian, HVP and the gradient-free Hessian.
/// - **Ops**: `forward_diff`, `central_jacobian`, ... build ready-to-call derivative operations.
/// - **Expression**: a small parser and stack VM turning formulas into callable targets.
pub mod traits;

pub use callable::{Callable, Sample};
pub use error::DiffError;
pub use ops::*;
pub use step::{DiffSettings, Method, StepPolicy, StepSize};
