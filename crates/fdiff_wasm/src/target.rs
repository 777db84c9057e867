//! `JsValue` targets.

use anyhow::{anyhow, bail};
use fdiff_core::callable::{CallShape, HostValue, Probe, Sample};
use js_sys::{Array, Float64Array, Function, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

/// A JS value handed in as a differentiation target.
///
/// Accepted shapes: a function, a `[receiver, "methodName"]` pair, or an object with
/// a `call` method. Any other object is re-inspected when it is first called.
pub struct JsTarget {
    value: JsValue,
}

impl JsTarget {
    pub fn new(value: JsValue) -> Self {
        Self { value }
    }

    /// The function to call and the `this` to call it with, if the value is callable.
    fn resolve(&self) -> Option<(Function, JsValue)> {
        if let Some(func) = self.value.dyn_ref::<Function>() {
            return Some((func.clone(), JsValue::NULL));
        }
        if let Some((receiver, method)) = self.bound_method() {
            return Some((method, receiver));
        }
        if self.value.is_object() {
            let call = Reflect::get(&self.value, &JsValue::from_str("call")).ok()?;
            return call
                .dyn_into::<Function>()
                .ok()
                .map(|func| (func, self.value.clone()));
        }
        None
    }

    fn bound_method(&self) -> Option<(JsValue, Function)> {
        let pair = self.value.dyn_ref::<Array>()?;
        if pair.length() != 2 {
            return None;
        }
        let receiver = pair.get(0);
        let name = pair.get(1);
        if !name.is_string() {
            return None;
        }
        let method = Reflect::get(&receiver, &name).ok()?;
        method.dyn_into::<Function>().ok().map(|m| (receiver, m))
    }
}

impl HostValue<f64> for JsTarget {
    fn type_name(&self) -> String {
        if self.value.is_null() {
            return "null".to_string();
        }
        if self.value.is_object() && !self.value.is_function() {
            let name = Reflect::get(&self.value, &JsValue::from_str("constructor"))
                .and_then(|ctor| Reflect::get(&ctor, &JsValue::from_str("name")))
                .ok()
                .and_then(|name| name.as_string());
            if let Some(name) = name {
                return name;
            }
        }
        self.value
            .js_typeof()
            .as_string()
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn probe(&self) -> Probe {
        if self.value.is_function() {
            Probe::Shape(CallShape::Function)
        } else if self.bound_method().is_some() {
            Probe::Shape(CallShape::BoundMethod)
        } else if self.resolve().is_some() {
            Probe::Shape(CallShape::CallableObject)
        } else if self.value.is_object() {
            Probe::Undetermined
        } else {
            Probe::NotCallable
        }
    }

    fn call(&self, x: &[f64]) -> anyhow::Result<Option<Sample<f64>>> {
        let Some((func, this)) = self.resolve() else {
            return Ok(None);
        };
        let arg = Float64Array::from(x);
        let out = func
            .call1(&this, &arg)
            .map_err(|e| anyhow!("{}", describe(&e)))?;
        to_sample(&out).map(Some)
    }
}

fn to_sample(out: &JsValue) -> anyhow::Result<Sample<f64>> {
    if let Some(v) = out.as_f64() {
        return Ok(Sample::Scalar(v));
    }
    if let Some(typed) = out.dyn_ref::<Float64Array>() {
        return Ok(Sample::Vector(typed.to_vec()));
    }
    if let Some(array) = out.dyn_ref::<Array>() {
        return array
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_f64()
                    .ok_or_else(|| anyhow!("component {} of the result is not a number", i))
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .map(Sample::Vector);
    }
    bail!("target returned {}, expected a number or an array", describe(out))
}

fn describe(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| {
            value
                .dyn_ref::<js_sys::Error>()
                .and_then(|e| e.message().as_string())
        })
        .unwrap_or_else(|| format!("{:?}", value))
}
