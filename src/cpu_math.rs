use std::fmt::Debug;

use thiserror::Error;

/// Errors that happen when we evaluate the logp and gradient function
pub trait LogpError: std::error::Error + Send + Sync {
    /// Unrecoverable errors during logp computation stop sampling,
    /// recoverable errors are seen as divergences.
    fn is_recoverable(&self) -> bool;
}

/// The unnormalized log density of the target distribution.
///
/// This needs to be implemented by users of the library to define
/// what distribution the users wants to sample from. A single call
/// returns the log density at `position` and writes its gradient
/// into `grad`.
///
/// Implementations must be deterministic in `position`. Returning
/// `-inf` is allowed and marks the point as outside the support.
pub trait CpuLogpFunc {
    type LogpError: Debug + LogpError + 'static;

    fn logp(&mut self, position: &[f64], grad: &mut [f64]) -> Result<f64, Self::LogpError>;
    fn dim(&self) -> usize;
}

impl<F: CpuLogpFunc + ?Sized> CpuLogpFunc for &mut F {
    type LogpError = F::LogpError;

    fn logp(&mut self, position: &[f64], grad: &mut [f64]) -> Result<f64, Self::LogpError> {
        (**self).logp(position, grad)
    }

    fn dim(&self) -> usize {
        (**self).dim()
    }
}

/// Closures can not fail, so their error type has no values.
#[derive(Error, Debug)]
pub enum InfallibleLogp {}

impl LogpError for InfallibleLogp {
    fn is_recoverable(&self) -> bool {
        match *self {}
    }
}

/// A log density given as a pair of closures, one for the density
/// and one for its gradient.
///
/// ```
/// use slice_nuts::LogpFn;
///
/// let normal = LogpFn::new(
///     1,
///     |x: &[f64]| -0.5 * x[0] * x[0],
///     |x: &[f64], grad: &mut [f64]| grad[0] = -x[0],
/// );
/// # let _ = normal;
/// ```
pub struct LogpFn<F, G> {
    dim: usize,
    logp: F,
    grad: G,
}

impl<F, G> LogpFn<F, G>
where
    F: FnMut(&[f64]) -> f64,
    G: FnMut(&[f64], &mut [f64]),
{
    pub fn new(dim: usize, logp: F, grad: G) -> Self {
        Self { dim, logp, grad }
    }
}

impl<F, G> CpuLogpFunc for LogpFn<F, G>
where
    F: FnMut(&[f64]) -> f64,
    G: FnMut(&[f64], &mut [f64]),
{
    type LogpError = InfallibleLogp;

    fn logp(&mut self, position: &[f64], grad: &mut [f64]) -> Result<f64, Self::LogpError> {
        (self.grad)(position, grad);
        Ok((self.logp)(position))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
