use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{
    chain::NutsChain,
    cpu_math::CpuLogpFunc,
    hamiltonian::EuclideanHamiltonian,
    mass_matrix::DenseMassMatrix,
    nuts::{NutsError, NutsOptions},
    stepsize::DualAverageSettings,
    trace::{Draw, Trace},
};

/// Settings for the NUTS sampler
#[derive(Debug, Clone, Copy)]
pub struct NutsSettings {
    /// The number of tuning steps, where we adapt the step size.
    pub num_tune: u64,
    /// The total number of draws, including the tuning draws.
    pub num_draws: u64,
    /// The maximum tree depth during sampling. The number of leapfrog steps
    /// is smaller than 2 ^ maxdepth.
    pub maxdepth: u64,
    /// Step size guess. Used as is if `find_step_size` is false.
    pub initial_step: f64,
    /// Search for a reasonable initial step size before the first draw.
    pub find_step_size: bool,
    /// If the energy error is larger than this threshold we treat the leapfrog
    /// step as a divergence.
    pub max_energy_error: f64,
    /// Log a line for every draw
    pub verbose: bool,
    pub seed: u64,
    pub step_size: DualAverageSettings,
}

impl Default for NutsSettings {
    fn default() -> Self {
        Self {
            num_tune: 50,
            num_draws: 1000,
            maxdepth: 10,
            initial_step: 1.,
            find_step_size: true,
            max_energy_error: 1000f64,
            verbose: false,
            seed: 0,
            step_size: DualAverageSettings::default(),
        }
    }
}

impl NutsSettings {
    pub fn options(&self) -> NutsOptions {
        NutsOptions {
            maxdepth: self.maxdepth,
            max_energy_error: self.max_energy_error,
            num_tune: self.num_tune,
            step_size_adapt: self.step_size,
            verbose: self.verbose,
        }
    }

    /// Create a chain at `init` with a `ChaCha8Rng` seeded from `seed`.
    pub fn new_chain<F: CpuLogpFunc>(
        &self,
        logp: F,
        mass_matrix: DenseMassMatrix,
        init: &[f64],
    ) -> Result<NutsChain<F, ChaCha8Rng>, NutsError> {
        let hamiltonian = EuclideanHamiltonian::new(logp, mass_matrix)?;
        NutsChain::new(
            hamiltonian,
            self.options(),
            self.initial_step,
            self.find_step_size,
            init,
            ChaCha8Rng::seed_from_u64(self.seed),
        )
    }
}

/// Run a single chain for `settings.num_draws` draws and collect the trace.
///
/// ```
/// use slice_nuts::{sample, DenseMassMatrix, LogpFn, NutsSettings};
///
/// let logp = LogpFn::new(
///     1,
///     |x: &[f64]| -0.5 * x[0] * x[0],
///     |x: &[f64], grad: &mut [f64]| grad[0] = -x[0],
/// );
/// let settings = NutsSettings {
///     num_draws: 100,
///     ..Default::default()
/// };
/// let trace = sample(logp, DenseMassMatrix::identity(1), &[0.], &settings).unwrap();
/// assert_eq!(trace.len(), 100);
/// ```
pub fn sample<F: CpuLogpFunc>(
    logp: F,
    mass_matrix: DenseMassMatrix,
    init: &[f64],
    settings: &NutsSettings,
) -> Result<Trace, NutsError> {
    let mut chain = settings.new_chain(logp, mass_matrix, init)?;
    let mut trace = Trace::with_capacity(chain.dim(), settings.num_draws as usize);
    for _ in 0..settings.num_draws {
        let (position, progress) = chain.draw()?;
        trace.push(Draw {
            position,
            step_size: progress.step_size,
            depth: progress.depth,
            maxdepth_reached: progress.maxdepth_reached,
            diverging: progress.diverging,
            logp: chain.state().logp(),
            tuning: progress.tuning,
        });
    }
    let divergences = trace.num_divergences();
    if divergences > 0 {
        log::warn!(
            "{} of {} draws had divergent transitions",
            divergences,
            trace.len()
        );
    }
    Ok(trace)
}
