//! Sample from a continuous distribution with the No-U-Turn Sampler.
//!
//! The target is given by a log density and its gradient, either as an
//! implementation of [`CpuLogpFunc`] or as a pair of closures in
//! [`LogpFn`]. Trajectories are built with the slice sampling variant of
//! NUTS and a dense, fixed mass matrix. The step size is adapted by dual
//! averaging during the tuning draws.
//!
//! ```
//! use slice_nuts::{sample, DenseMassMatrix, LogpFn, NutsSettings};
//!
//! let logp = LogpFn::new(
//!     2,
//!     |x: &[f64]| -0.5 * (x[0] * x[0] + x[1] * x[1]),
//!     |x: &[f64], grad: &mut [f64]| {
//!         grad[0] = -x[0];
//!         grad[1] = -x[1];
//!     },
//! );
//! let settings = NutsSettings {
//!     num_draws: 200,
//!     seed: 42,
//!     ..Default::default()
//! };
//! let trace = sample(logp, DenseMassMatrix::identity(2), &[0., 0.], &settings).unwrap();
//! assert_eq!(trace.draws_after_tuning().len(), 150);
//! ```

pub(crate) mod chain;
pub(crate) mod cpu_math;
pub(crate) mod csv_storage;
pub(crate) mod hamiltonian;
pub(crate) mod mass_matrix;
pub(crate) mod math;
pub(crate) mod nuts;
pub(crate) mod sampler;
pub(crate) mod state;
pub(crate) mod stepsize;
pub(crate) mod trace;

pub use chain::{NutsChain, Progress};
pub use cpu_math::{CpuLogpFunc, InfallibleLogp, LogpError, LogpFn};
pub use csv_storage::CsvConfig;
pub use hamiltonian::{Direction, DivergenceInfo, EuclideanHamiltonian, LeapfrogResult};
pub use mass_matrix::DenseMassMatrix;
pub use nuts::{NutsError, NutsOptions, SampleInfo};
pub use sampler::{sample, NutsSettings};
pub use state::State;
pub use stepsize::{find_reasonable_step_size, AdaptationState, DualAverageSettings, StepSizeSearch};
pub use trace::{Draw, Trace};
