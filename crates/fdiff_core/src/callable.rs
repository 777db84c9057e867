//! Uniform invocation contract for differentiable targets.
//!
//! A target is resolved once, when it is wrapped, into one of three call shapes:
//! a free function (or closure), a bound method, or a callable object. After that
//! every shape is invoked the same way through [`Callable::invoke`].

use crate::error::{DiffError, Result};
use crate::traits::{Evaluate, Scalar};
use nalgebra::DVector;
use std::fmt;
use std::rc::Rc;

/// One evaluation of a target: a scalar or a vector.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample<T> {
    Scalar(T),
    Vector(Vec<T>),
}

/// Shape of a sample, used when reporting dimension mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleShape {
    Scalar,
    Vector(usize),
    /// A vector whose length is not fixed yet.
    AnyVector,
}

impl fmt::Display for SampleShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleShape::Scalar => write!(f, "scalar"),
            SampleShape::Vector(len) => write!(f, "vector of length {}", len),
            SampleShape::AnyVector => write!(f, "vector"),
        }
    }
}

impl<T: Scalar> Sample<T> {
    pub fn shape(&self) -> SampleShape {
        match self {
            Sample::Scalar(_) => SampleShape::Scalar,
            Sample::Vector(v) => SampleShape::Vector(v.len()),
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Sample::Scalar(v) => v.is_finite(),
            Sample::Vector(v) => v.iter().all(|c| c.is_finite()),
        }
    }

    /// Unwraps a scalar sample.
    pub fn into_scalar(self, what: &'static str) -> Result<T> {
        match self {
            Sample::Scalar(v) => Ok(v),
            other => Err(DiffError::mismatch(what, SampleShape::Scalar, other.shape())),
        }
    }

    /// Unwraps a vector sample, checking its length when `len` is given.
    pub fn into_vector(self, what: &'static str, len: Option<usize>) -> Result<Vec<T>> {
        let expected = len.map_or(SampleShape::AnyVector, SampleShape::Vector);
        match self {
            Sample::Vector(v) if len.map_or(true, |n| n == v.len()) => Ok(v),
            other => Err(DiffError::mismatch(what, expected, other.shape())),
        }
    }
}

impl<T: Scalar> From<T> for Sample<T> {
    fn from(value: T) -> Self {
        Sample::Scalar(value)
    }
}

impl<T: Scalar> From<Vec<T>> for Sample<T> {
    fn from(value: Vec<T>) -> Self {
        Sample::Vector(value)
    }
}

impl<T: Scalar> From<DVector<T>> for Sample<T> {
    fn from(value: DVector<T>) -> Self {
        Sample::Vector(value.iter().copied().collect())
    }
}

/// The call shapes a target can be resolved into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    Function,
    BoundMethod,
    CallableObject,
}

/// What a host value reports about itself before it is wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Shape(CallShape),
    /// Callability can only be decided by trying to call the value.
    Undetermined,
    NotCallable,
}

/// An untyped value handed over by a binding layer (for example a `JsValue`).
pub trait HostValue<T: Scalar> {
    /// Type name used in `NotInvocable` errors.
    fn type_name(&self) -> String;

    fn probe(&self) -> Probe;

    /// Calls the value. `Ok(None)` means it turned out not to be callable.
    fn call(&self, x: &[T]) -> anyhow::Result<Option<Sample<T>>>;
}

type Invoker<T> = Box<dyn Fn(&[T]) -> Result<Sample<T>>>;

/// A differentiable target resolved into one of the recognised call shapes.
pub enum Callable<T: Scalar> {
    Function { name: String, invoke: Invoker<T> },
    Method { name: String, invoke: Invoker<T> },
    Object { name: String, invoke: Invoker<T> },
}

impl<T: Scalar> Callable<T> {
    /// Wraps a free function or closure.
    pub fn function<F, R>(f: F) -> Self
    where
        F: Fn(&[T]) -> anyhow::Result<R> + 'static,
        R: Into<Sample<T>> + 'static,
    {
        Callable::Function {
            name: std::any::type_name::<F>().to_string(),
            invoke: Box::new(move |x: &[T]| f(x).map(Into::into).map_err(DiffError::Target)),
        }
    }

    /// Binds `method` to `receiver`.
    pub fn method<S, R>(receiver: S, method: fn(&S, &[T]) -> anyhow::Result<R>) -> Self
    where
        S: 'static,
        R: Into<Sample<T>> + 'static,
    {
        Callable::Method {
            name: std::any::type_name::<S>().to_string(),
            invoke: Box::new(move |x: &[T]| {
                method(&receiver, x)
                    .map(Into::into)
                    .map_err(DiffError::Target)
            }),
        }
    }

    /// Wraps an object with a call operation.
    pub fn object<O>(object: O) -> Self
    where
        O: Evaluate<T> + 'static,
    {
        Callable::Object {
            name: std::any::type_name::<O>().to_string(),
            invoke: Box::new(move |x: &[T]| object.evaluate(x).map_err(DiffError::Target)),
        }
    }

    /// Resolves an untyped host value. Values that report themselves as not callable
    /// are rejected here; undetermined values are rejected on first invocation.
    pub fn from_host(value: Rc<dyn HostValue<T>>) -> Result<Self> {
        let name = value.type_name();
        let shape = match value.probe() {
            Probe::NotCallable => return Err(DiffError::NotInvocable { type_name: name }),
            Probe::Shape(shape) => shape,
            Probe::Undetermined => CallShape::CallableObject,
        };

        let type_name = name.clone();
        let invoke: Invoker<T> = Box::new(move |x: &[T]| {
            value
                .call(x)
                .map_err(DiffError::Target)?
                .ok_or_else(|| DiffError::NotInvocable {
                    type_name: type_name.clone(),
                })
        });

        Ok(match shape {
            CallShape::Function => Callable::Function { name, invoke },
            CallShape::BoundMethod => Callable::Method { name, invoke },
            CallShape::CallableObject => Callable::Object { name, invoke },
        })
    }

    pub fn shape(&self) -> CallShape {
        match self {
            Callable::Function { .. } => CallShape::Function,
            Callable::Method { .. } => CallShape::BoundMethod,
            Callable::Object { .. } => CallShape::CallableObject,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Callable::Function { name, .. }
            | Callable::Method { name, .. }
            | Callable::Object { name, .. } => name,
        }
    }

    pub fn invoke(&self, x: &[T]) -> Result<Sample<T>> {
        match self {
            Callable::Function { invoke, .. }
            | Callable::Method { invoke, .. }
            | Callable::Object { invoke, .. } => invoke(x),
        }
    }
}

impl<T: Scalar> fmt::Debug for Callable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("shape", &self.shape())
            .field("name", &self.name())
            .finish()
    }
}
