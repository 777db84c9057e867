//! Constructors for derivative operations, one per derivative kind and method.
//!
//! Each constructor wraps the target once and returns an op that can be called
//! repeatedly with different points.

use crate::callable::Callable;
use crate::gradient::GradientOp;
use crate::hessian::{HessianOp, HvpOp, NogradHessianOp};
use crate::jacobian::{JacobianOp, JvpOp};
use crate::step::Method;
use crate::traits::Scalar;

/// Gradient of a scalar target with forward differences (`n + 1` evaluations).
pub fn forward_diff<T: Scalar>(f: Callable<T>) -> GradientOp<T> {
    GradientOp::new(f, Method::Forward)
}

/// Gradient of a scalar target with central differences (`2n` evaluations).
pub fn central_diff<T: Scalar>(f: Callable<T>) -> GradientOp<T> {
    GradientOp::new(f, Method::Central)
}

pub fn forward_jacobian<T: Scalar>(f: Callable<T>) -> JacobianOp<T> {
    JacobianOp::new(f, Method::Forward)
}

pub fn central_jacobian<T: Scalar>(f: Callable<T>) -> JacobianOp<T> {
    JacobianOp::new(f, Method::Central)
}

pub fn forward_jacobian_vec_prod<T: Scalar>(f: Callable<T>) -> JvpOp<T> {
    JvpOp::new(f, Method::Forward)
}

pub fn central_jacobian_vec_prod<T: Scalar>(f: Callable<T>) -> JvpOp<T> {
    JvpOp::new(f, Method::Central)
}

/// Hessian from the gradient function `g`, not from the scalar target itself.
pub fn forward_hessian<T: Scalar>(g: Callable<T>) -> HessianOp<T> {
    HessianOp::new(g, Method::Forward)
}

pub fn central_hessian<T: Scalar>(g: Callable<T>) -> HessianOp<T> {
    HessianOp::new(g, Method::Central)
}

pub fn forward_hessian_vec_prod<T: Scalar>(g: Callable<T>) -> HvpOp<T> {
    HvpOp::new(g, Method::Forward)
}

pub fn central_hessian_vec_prod<T: Scalar>(g: Callable<T>) -> HvpOp<T> {
    HvpOp::new(g, Method::Central)
}

/// Hessian of a scalar target using function values only.
pub fn hessian_nograd<T: Scalar>(f: Callable<T>) -> NogradHessianOp<T> {
    NogradHessianOp::new(f)
}
