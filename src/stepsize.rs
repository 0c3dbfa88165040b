use rand_distr::Uniform;

use crate::{
    cpu_math::CpuLogpFunc,
    hamiltonian::{Direction, EuclideanHamiltonian, LeapfrogResult},
    nuts::NutsError,
    state::State,
};

/// Settings for step size adaptation
#[derive(Debug, Clone, Copy)]
pub struct DualAverageSettings {
    /// The mean acceptance statistic we aim for (delta)
    pub target: f64,
    pub k: f64,
    pub t0: f64,
    pub gamma: f64,
}

impl Default for DualAverageSettings {
    fn default() -> DualAverageSettings {
        DualAverageSettings {
            target: 0.5,
            k: 0.75,
            t0: 10.,
            gamma: 0.05,
        }
    }
}

/// Step size adaptation state, threaded from one draw to the next.
///
/// During tuning `step_size` follows the dual averaging iterates and
/// `step_size_bar` their weighted average. After tuning `step_size` is
/// frozen at `step_size_bar`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptationState {
    pub step_size: f64,
    pub step_size_bar: f64,
    pub hbar: f64,
    pub mu: f64,
    /// Number of finished draws
    pub iteration: u64,
    /// Tree depth reached in the last draw
    pub depth: u64,
}

impl AdaptationState {
    /// The state before the first draw.
    ///
    /// `step_size_bar` starts at one if the first draw is a tuning draw,
    /// otherwise at the initial step size.
    pub fn new(initial_step: f64, num_tune: u64) -> AdaptationState {
        let step_size_bar = if 1 > num_tune { initial_step } else { 1. };
        AdaptationState {
            step_size: initial_step,
            step_size_bar,
            hbar: 0.,
            mu: (10. * initial_step).ln(),
            iteration: 0,
            depth: 0,
        }
    }

    /// The step size to integrate with in draw number `iteration`.
    ///
    /// After tuning we jitter around the adapted value, so that the
    /// trajectory length does not resonate with the target.
    pub(crate) fn trajectory_step_size<R: rand::Rng + ?Sized>(
        &self,
        iteration: u64,
        num_tune: u64,
        rng: &mut R,
    ) -> f64 {
        if iteration <= num_tune {
            return self.step_size;
        }
        match Uniform::new_inclusive(0.9 * self.step_size_bar, 1.1 * self.step_size_bar) {
            Ok(dist) => rng.sample(dist),
            Err(_) => self.step_size_bar,
        }
    }

    /// One dual averaging update after draw number `iteration`.
    pub(crate) fn advance(
        mut self,
        accept_stat: f64,
        iteration: u64,
        settings: &DualAverageSettings,
    ) -> AdaptationState {
        let count = iteration as f64;
        let w = 1. / (count + settings.t0);
        self.hbar = (1. - w) * self.hbar + w * (settings.target - accept_stat);
        let log_step = self.mu - self.hbar * count.sqrt() / settings.gamma;
        let mk = count.powf(-settings.k);
        let log_step_bar = mk * log_step + (1. - mk) * self.step_size_bar.ln();
        self.step_size = log_step.exp();
        self.step_size_bar = log_step_bar.exp();
        self
    }

    pub(crate) fn freeze(mut self) -> AdaptationState {
        self.step_size = self.step_size_bar;
        self
    }
}

/// Outcome of the initial step size search.
#[derive(Debug, Clone, Copy)]
pub struct StepSizeSearch {
    pub step_size: f64,
    /// One step acceptance ratio at `step_size`
    pub accept_ratio: f64,
    /// One step acceptance ratio at the step size before the last
    /// doubling or halving
    pub previous_accept_ratio: f64,
    pub num_steps: u64,
}

/// Stop the search after this many doublings or halvings.
const MAX_SEARCH_STEPS: u64 = 100;

/// Find a step size whose one step acceptance ratio is close to 0.5.
///
/// We draw one momentum and then double (or halve) the step size until
/// the acceptance ratio of a single leapfrog step from the initial point
/// crosses 0.5.
pub fn find_reasonable_step_size<F, R>(
    hamiltonian: &mut EuclideanHamiltonian<F>,
    init: &State,
    initial_step: f64,
    rng: &mut R,
) -> Result<StepSizeSearch, NutsError>
where
    F: CpuLogpFunc,
    R: rand::Rng + ?Sized,
{
    let mut start = init.clone();
    hamiltonian.initialize_trajectory(&mut start, rng);
    let initial_joint = start.joint_logp();

    let mut step_size = initial_step;
    let mut accept = accept_ratio(hamiltonian, &start, step_size, initial_joint)?;
    let mut previous = accept;
    let a: i32 = if accept > 0.5 { 1 } else { -1 };

    let mut num_steps = 1;
    while accept.powi(a) >= 2f64.powi(-a) {
        if num_steps > MAX_SEARCH_STEPS {
            log::warn!(
                "Step size search did not terminate after {} steps, using step size {}",
                MAX_SEARCH_STEPS,
                step_size
            );
            break;
        }
        step_size *= 2f64.powi(a);
        previous = accept;
        accept = accept_ratio(hamiltonian, &start, step_size, initial_joint)?;
        num_steps += 1;
    }

    log::debug!(
        "Initial step size {} (acceptance ratio {}, {} leapfrog steps)",
        step_size,
        accept,
        num_steps
    );

    Ok(StepSizeSearch {
        step_size,
        accept_ratio: accept,
        previous_accept_ratio: previous,
        num_steps,
    })
}

/// `exp(H(q', p') - H(q, p))` for one leapfrog step, zero if the step
/// failed or produced non-finite values.
fn accept_ratio<F: CpuLogpFunc>(
    hamiltonian: &mut EuclideanHamiltonian<F>,
    start: &State,
    step_size: f64,
    initial_joint: f64,
) -> Result<f64, NutsError> {
    let ratio = match hamiltonian.leapfrog(start, step_size, Direction::Forward)? {
        LeapfrogResult::Ok(end) => (end.joint_logp() - initial_joint).exp(),
        LeapfrogResult::Divergence(_) => 0.,
    };
    if ratio.is_nan() {
        return Ok(0.);
    }
    Ok(ratio)
}
