use crate::{
    cpu_math::CpuLogpFunc,
    hamiltonian::EuclideanHamiltonian,
    nuts::{draw, NutsError, NutsOptions, SampleInfo},
    state::State,
    stepsize::{find_reasonable_step_size, AdaptationState},
};

/// Diagnostic information about one draw of a chain.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Progress {
    /// The draw number, starting at one
    pub draw: u64,
    pub diverging: bool,
    pub tuning: bool,
    pub step_size: f64,
    pub depth: u64,
    pub maxdepth_reached: bool,
    pub num_steps: u64,
}

impl From<&SampleInfo> for Progress {
    fn from(info: &SampleInfo) -> Self {
        Progress {
            draw: info.iteration,
            diverging: info.diverging,
            tuning: info.tuning,
            step_size: info.step_size,
            depth: info.depth,
            maxdepth_reached: info.reached_maxdepth,
            num_steps: info.num_steps,
        }
    }
}

/// A single Markov chain.
///
/// The chain owns the hamiltonian, the random number generator, the
/// current point and the step size adaptation, and threads the last two
/// through consecutive calls of the NUTS transition.
pub struct NutsChain<F, R>
where
    F: CpuLogpFunc,
    R: rand::Rng,
{
    hamiltonian: EuclideanHamiltonian<F>,
    options: NutsOptions,
    initial_step: f64,
    find_step_size: bool,
    rng: R,
    state: State,
    // Created in the first draw
    adapt: Option<AdaptationState>,
    last_info: Option<SampleInfo>,
}

impl<F, R> NutsChain<F, R>
where
    F: CpuLogpFunc,
    R: rand::Rng,
{
    /// Create a chain at `position`.
    ///
    /// This fails if the logp function returns an error at the initial
    /// point, or if the log density or its gradient are not finite there.
    /// The initial step size must be finite and positive.
    pub fn new(
        mut hamiltonian: EuclideanHamiltonian<F>,
        options: NutsOptions,
        initial_step: f64,
        find_step_size: bool,
        position: &[f64],
        rng: R,
    ) -> Result<Self, NutsError> {
        if !initial_step.is_finite() | !(initial_step > 0.) {
            return Err(NutsError::BadStepSize(initial_step));
        }
        let state = hamiltonian.init_state(position)?;
        Ok(NutsChain {
            hamiltonian,
            options,
            initial_step,
            find_step_size,
            rng,
            state,
            adapt: None,
            last_info: None,
        })
    }

    /// Move the chain to a new position. The adaptation state is kept.
    pub fn set_position(&mut self, position: &[f64]) -> Result<(), NutsError> {
        self.state = self.hamiltonian.init_state(position)?;
        Ok(())
    }

    /// Draw a new sample and return the position and some diagnostic information.
    pub fn draw(&mut self) -> Result<(Box<[f64]>, Progress), NutsError> {
        let adapt = match self.adapt {
            Some(adapt) => adapt,
            None => self.init_adaptation()?,
        };
        let (state, adapt, info) = draw(
            &mut self.hamiltonian,
            &mut self.rng,
            &self.state,
            adapt,
            &self.options,
        )?;
        self.state = state;
        self.adapt = Some(adapt);
        self.last_info = Some(info);
        Ok((self.state.position().into(), Progress::from(&info)))
    }

    fn init_adaptation(&mut self) -> Result<AdaptationState, NutsError> {
        let step_size = if self.find_step_size {
            let search = find_reasonable_step_size(
                &mut self.hamiltonian,
                &self.state,
                self.initial_step,
                &mut self.rng,
            )?;
            if self.options.verbose {
                log::info!(
                    "Initial step size {} after {} leapfrog steps",
                    search.step_size,
                    search.num_steps
                );
            }
            search.step_size
        } else {
            self.initial_step
        };
        Ok(AdaptationState::new(step_size, self.options.num_tune))
    }

    /// The dimensionality of the posterior.
    pub fn dim(&self) -> usize {
        self.hamiltonian.dim()
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// The step size adaptation after the last draw, `None` before the first draw.
    pub fn adaptation(&self) -> Option<&AdaptationState> {
        self.adapt.as_ref()
    }

    pub fn last_info(&self) -> Option<&SampleInfo> {
        self.last_info.as_ref()
    }
}
