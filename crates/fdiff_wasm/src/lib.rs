//! WASM bindings: derivative operations over JS functions and formula strings.

mod target;

use fdiff_core::callable::{Callable, HostValue};
use fdiff_core::expression::{ExpressionTarget, Output};
use fdiff_core::gradient::GradientOp;
use fdiff_core::hessian::{HessianOp, HvpOp, NogradHessianOp};
use fdiff_core::jacobian::{JacobianOp, JvpOp};
use fdiff_core::{DiffError, DiffSettings, Method};
use nalgebra::{DMatrix, DVector};
use serde_wasm_bindgen::from_value;
use std::rc::Rc;
use target::JsTarget;
use wasm_bindgen::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Gradient,
    Jacobian,
    JacobianVecProd,
    Hessian,
    HessianVecProd,
    HessianNograd,
}

impl Kind {
    fn parse(name: &str) -> Result<Self, JsValue> {
        match name {
            "gradient" => Ok(Kind::Gradient),
            "jacobian" => Ok(Kind::Jacobian),
            "jacobian_vec_prod" => Ok(Kind::JacobianVecProd),
            "hessian" => Ok(Kind::Hessian),
            "hessian_vec_prod" => Ok(Kind::HessianVecProd),
            "hessian_nograd" => Ok(Kind::HessianNograd),
            _ => Err(JsValue::from_str(&format!("Unknown derivative kind '{}'", name))),
        }
    }

    /// Gradients and gradient-free Hessians take scalar targets; the rest take vector ones.
    fn output(self) -> Output {
        match self {
            Kind::Gradient | Kind::HessianNograd => Output::Scalar,
            _ => Output::Vector,
        }
    }
}

fn parse_method(name: &str) -> Result<Method, JsValue> {
    match name {
        "forward" => Ok(Method::Forward),
        "central" => Ok(Method::Central),
        _ => Err(JsValue::from_str(&format!("Unknown method '{}'", name))),
    }
}

enum DerivativeOp {
    Gradient(GradientOp<f64>),
    Jacobian(JacobianOp<f64>),
    Jvp(JvpOp<f64>),
    Hessian(HessianOp<f64>),
    Hvp(HvpOp<f64>),
    Nograd(NogradHessianOp<f64>),
}

impl DerivativeOp {
    fn build(
        kind: Kind,
        method: Method,
        target: Callable<f64>,
        settings: &DiffSettings,
    ) -> Result<Self, DiffError> {
        Ok(match kind {
            Kind::Gradient => {
                DerivativeOp::Gradient(GradientOp::with_settings(target, method, settings)?)
            }
            Kind::Jacobian => {
                DerivativeOp::Jacobian(JacobianOp::with_settings(target, method, settings)?)
            }
            Kind::JacobianVecProd => {
                DerivativeOp::Jvp(JvpOp::with_settings(target, method, settings)?)
            }
            Kind::Hessian => {
                DerivativeOp::Hessian(HessianOp::with_settings(target, method, settings)?)
            }
            Kind::HessianVecProd => {
                DerivativeOp::Hvp(HvpOp::with_settings(target, method, settings)?)
            }
            Kind::HessianNograd => {
                DerivativeOp::Nograd(NogradHessianOp::with_settings(target, settings)?)
            }
        })
    }

    fn needs_direction(&self) -> bool {
        matches!(self, DerivativeOp::Jvp(_) | DerivativeOp::Hvp(_))
    }
}

/// Row-major copy of `m`, the layout JS callers index with `i * cols + j`.
pub(crate) fn row_major(m: &DMatrix<f64>) -> Vec<f64> {
    let mut out = Vec::with_capacity(m.nrows() * m.ncols());
    for i in 0..m.nrows() {
        out.extend(m.row(i).iter().copied());
    }
    out
}

fn to_js_error(err: DiffError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn read_settings(settings: JsValue) -> Result<DiffSettings, JsValue> {
    if settings.is_undefined() || settings.is_null() {
        return Ok(DiffSettings::default());
    }
    from_value(settings).map_err(|e| JsValue::from_str(&format!("Invalid settings: {}", e)))
}

/// A derivative operation bound to one target.
///
/// Results come back flattened; `rows()` and `cols()` give the shape of the last result
/// (`cols() == 1` for vectors).
#[wasm_bindgen]
pub struct WasmDerivative {
    op: DerivativeOp,
    rows: usize,
    cols: usize,
}

#[wasm_bindgen]
impl WasmDerivative {
    /// Builds a derivative of formula targets, e.g. `["x^2 * y", "sin(y)"]` over `["x", "y"]`.
    pub fn from_expressions(
        kind: &str,
        method: &str,
        expressions: Vec<String>,
        var_names: Vec<String>,
        settings: JsValue,
    ) -> Result<WasmDerivative, JsValue> {
        console_error_panic_hook::set_once();

        let kind = Kind::parse(kind)?;
        let method = parse_method(method)?;
        let settings = read_settings(settings)?;
        let target = ExpressionTarget::<f64>::compile(expressions.as_slice(), &var_names, kind.output())
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        WasmDerivative::build(kind, method, Callable::object(target), &settings)
    }

    pub fn call(&mut self, x: &[f64]) -> Result<Vec<f64>, JsValue> {
        let (data, rows, cols) = match &self.op {
            DerivativeOp::Gradient(op) => vector(op.eval(x).map_err(to_js_error)?),
            DerivativeOp::Jacobian(op) => matrix(op.eval(x).map_err(to_js_error)?),
            DerivativeOp::Hessian(op) => matrix(op.eval(x).map_err(to_js_error)?),
            DerivativeOp::Nograd(op) => matrix(op.eval(x).map_err(to_js_error)?),
            DerivativeOp::Jvp(_) | DerivativeOp::Hvp(_) => {
                return Err(JsValue::from_str(
                    "This derivative needs a direction; use call_with_direction",
                ))
            }
        };
        self.rows = rows;
        self.cols = cols;
        Ok(data)
    }

    pub fn call_with_direction(&mut self, x: &[f64], p: &[f64]) -> Result<Vec<f64>, JsValue> {
        let result = match &self.op {
            DerivativeOp::Jvp(op) => op.eval(x, p).map_err(to_js_error)?,
            DerivativeOp::Hvp(op) => op.eval(x, p).map_err(to_js_error)?,
            _ => {
                return Err(JsValue::from_str(
                    "This derivative takes no direction; use call",
                ))
            }
        };
        let (data, rows, cols) = vector(result);
        self.rows = rows;
        self.cols = cols;
        Ok(data)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn needs_direction(&self) -> bool {
        self.op.needs_direction()
    }
}

impl WasmDerivative {
    fn build(
        kind: Kind,
        method: Method,
        target: Callable<f64>,
        settings: &DiffSettings,
    ) -> Result<WasmDerivative, JsValue> {
        let op = DerivativeOp::build(kind, method, target, settings).map_err(to_js_error)?;
        Ok(WasmDerivative { op, rows: 0, cols: 0 })
    }

    fn from_js(
        kind: Kind,
        method: Method,
        f: JsValue,
        settings: JsValue,
    ) -> Result<WasmDerivative, JsValue> {
        console_error_panic_hook::set_once();

        let settings = read_settings(settings)?;
        let host: Rc<dyn HostValue<f64>> = Rc::new(JsTarget::new(f));
        let target = Callable::from_host(host).map_err(to_js_error)?;
        WasmDerivative::build(kind, method, target, &settings)
    }
}

fn vector(v: DVector<f64>) -> (Vec<f64>, usize, usize) {
    let rows = v.len();
    (v.as_slice().to_vec(), rows, 1)
}

fn matrix(m: DMatrix<f64>) -> (Vec<f64>, usize, usize) {
    (row_major(&m), m.nrows(), m.ncols())
}

#[wasm_bindgen]
pub fn forward_diff(f: JsValue, settings: JsValue) -> Result<WasmDerivative, JsValue> {
    WasmDerivative::from_js(Kind::Gradient, Method::Forward, f, settings)
}

#[wasm_bindgen]
pub fn central_diff(f: JsValue, settings: JsValue) -> Result<WasmDerivative, JsValue> {
    WasmDerivative::from_js(Kind::Gradient, Method::Central, f, settings)
}

#[wasm_bindgen]
pub fn forward_jacobian(f: JsValue, settings: JsValue) -> Result<WasmDerivative, JsValue> {
    WasmDerivative::from_js(Kind::Jacobian, Method::Forward, f, settings)
}

#[wasm_bindgen]
pub fn central_jacobian(f: JsValue, settings: JsValue) -> Result<WasmDerivative, JsValue> {
    WasmDerivative::from_js(Kind::Jacobian, Method::Central, f, settings)
}

#[wasm_bindgen]
pub fn forward_jacobian_vec_prod(f: JsValue, settings: JsValue) -> Result<WasmDerivative, JsValue> {
    WasmDerivative::from_js(Kind::JacobianVecProd, Method::Forward, f, settings)
}

#[wasm_bindgen]
pub fn central_jacobian_vec_prod(f: JsValue, settings: JsValue) -> Result<WasmDerivative, JsValue> {
    WasmDerivative::from_js(Kind::JacobianVecProd, Method::Central, f, settings)
}

/// `g` is the gradient function.
#[wasm_bindgen]
pub fn forward_hessian(g: JsValue, settings: JsValue) -> Result<WasmDerivative, JsValue> {
    WasmDerivative::from_js(Kind::Hessian, Method::Forward, g, settings)
}

#[wasm_bindgen]
pub fn central_hessian(g: JsValue, settings: JsValue) -> Result<WasmDerivative, JsValue> {
    WasmDerivative::from_js(Kind::Hessian, Method::Central, g, settings)
}

#[wasm_bindgen]
pub fn forward_hessian_vec_prod(g: JsValue, settings: JsValue) -> Result<WasmDerivative, JsValue> {
    WasmDerivative::from_js(Kind::HessianVecProd, Method::Forward, g, settings)
}

#[wasm_bindgen]
pub fn central_hessian_vec_prod(g: JsValue, settings: JsValue) -> Result<WasmDerivative, JsValue> {
    WasmDerivative::from_js(Kind::HessianVecProd, Method::Central, g, settings)
}

#[wasm_bindgen]
pub fn hessian_nograd(f: JsValue, settings: JsValue) -> Result<WasmDerivative, JsValue> {
    WasmDerivative::from_js(Kind::HessianNograd, Method::Central, f, settings)
}
