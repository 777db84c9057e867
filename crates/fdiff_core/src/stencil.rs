//! Evaluation of perturbed points and the raw difference quotients built from them.

use crate::callable::{Callable, Sample};
use crate::error::{DiffError, Result};
use crate::traits::Scalar;

/// The evaluation plan of one derivative computation.
///
/// Holds a working copy of the base point that is perturbed in place and restored
/// after every evaluation, and counts evaluations so that non-finite samples can
/// be reported by position.
pub(crate) struct Stencil<'a, T: Scalar> {
    target: &'a Callable<T>,
    stage: &'static str,
    base: &'a [T],
    work: Vec<T>,
    evaluations: usize,
}

impl<'a, T: Scalar> Stencil<'a, T> {
    pub(crate) fn new(target: &'a Callable<T>, base: &'a [T], stage: &'static str) -> Self {
        Self {
            target,
            stage,
            base,
            work: base.to_vec(),
            evaluations: 0,
        }
    }

    pub(crate) fn stage(&self) -> &'static str {
        self.stage
    }

    /// f(x)
    pub(crate) fn at_base(&mut self) -> Result<Sample<T>> {
        self.evaluate_work()
    }

    /// f(x + h·e_i)
    pub(crate) fn shifted(&mut self, i: usize, h: T) -> Result<Sample<T>> {
        let xi = self.work[i];
        self.work[i] = xi + h;
        let sample = self.evaluate_work();
        self.work[i] = xi;
        sample
    }

    /// f(x + hi·e_i + hj·e_j), with `i != j`.
    pub(crate) fn shifted_pair(&mut self, (i, hi): (usize, T), (j, hj): (usize, T)) -> Result<Sample<T>> {
        let xi = self.work[i];
        let xj = self.work[j];
        self.work[i] = xi + hi;
        self.work[j] = xj + hj;
        let sample = self.evaluate_work();
        self.work[i] = xi;
        self.work[j] = xj;
        sample
    }

    /// f(x + h·p)
    pub(crate) fn along(&mut self, p: &[T], h: T) -> Result<Sample<T>> {
        for (w, (&xi, &pi)) in self.work.iter_mut().zip(self.base.iter().zip(p.iter())) {
            *w = xi + h * pi;
        }
        let sample = self.evaluate_work();
        self.work.copy_from_slice(self.base);
        sample
    }

    pub(crate) fn evaluations(&self) -> usize {
        self.evaluations
    }

    fn evaluate_work(&mut self) -> Result<Sample<T>> {
        let index = self.evaluations;
        self.evaluations += 1;
        log::trace!("{}: evaluation {} at {:?}", self.stage, index, self.work);

        let sample = self.target.invoke(&self.work)?;
        if !sample.is_finite() {
            return Err(DiffError::NonFiniteResult {
                stage: self.stage,
                index,
            });
        }
        Ok(sample)
    }
}

impl<'a, T: Scalar> Drop for Stencil<'a, T> {
    fn drop(&mut self) {
        log::debug!(
            "{}: n = {}, {} target evaluations",
            self.stage,
            self.base.len(),
            self.evaluations()
        );
    }
}

/// `(plus - base) / h`, component-wise.
pub(crate) fn forward_quotient<T: Scalar>(plus: &[T], base: &[T], h: T) -> Vec<T> {
    plus.iter().zip(base.iter()).map(|(&a, &b)| (a - b) / h).collect()
}

/// `(plus - minus) / (2h)`, component-wise.
pub(crate) fn central_quotient<T: Scalar>(plus: &[T], minus: &[T], h: T) -> Vec<T> {
    let two_h = T::constant(2.0) * h;
    plus.iter()
        .zip(minus.iter())
        .map(|(&a, &b)| (a - b) / two_h)
        .collect()
}

/// Rejects quotients that overflowed or became NaN.
pub(crate) fn ensure_finite<T: Scalar>(values: &[T], stage: &'static str, index: usize) -> Result<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(DiffError::NonFiniteResult { stage, index })
    }
}
