use std::sync::Arc;

use rand_distr::{Distribution, StandardUniform};

use crate::{
    cpu_math::{CpuLogpFunc, LogpError},
    mass_matrix::DenseMassMatrix,
    math::{all_finite, axpy, axpy_out},
    nuts::NutsError,
    state::State,
};

/// Details about a leapfrog step that could not be completed because the
/// logp function returned a recoverable error.
#[derive(Debug, Clone)]
pub struct DivergenceInfo {
    pub start_location: Option<Box<[f64]>>,
    pub end_location: Option<Box<[f64]>>,
    pub logp_function_error: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.,
            Direction::Backward => -1.,
        }
    }

    pub fn reverse(self) -> Direction {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

impl Distribution<Direction> for StandardUniform {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Direction {
        if rng.random::<bool>() {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

pub enum LeapfrogResult {
    Ok(State),
    Divergence(DivergenceInfo),
}

/// The hamiltonian defined by the target log density (potential energy)
/// and a gaussian kinetic energy with a dense mass matrix.
pub struct EuclideanHamiltonian<F: CpuLogpFunc> {
    logp: F,
    mass_matrix: DenseMassMatrix,
}

impl<F: CpuLogpFunc> EuclideanHamiltonian<F> {
    pub fn new(logp: F, mass_matrix: DenseMassMatrix) -> Result<Self, NutsError> {
        if logp.dim() != mass_matrix.dim() {
            return Err(NutsError::DimensionMismatch {
                expected: logp.dim(),
                found: mass_matrix.dim(),
            });
        }
        Ok(Self { logp, mass_matrix })
    }

    pub fn dim(&self) -> usize {
        self.logp.dim()
    }

    pub fn mass_matrix(&self) -> &DenseMassMatrix {
        &self.mass_matrix
    }

    /// Build a state at an arbitrary point of phase space.
    ///
    /// Any error of the logp function is returned, recoverable or not.
    pub fn new_state(&mut self, position: &[f64], momentum: &[f64]) -> Result<State, NutsError> {
        self.check_dim(position.len())?;
        self.check_dim(momentum.len())?;
        let mut state = State::new(self.dim());
        state.q.copy_from_slice(position);
        state.p.copy_from_slice(momentum);
        self.update_potential_gradient(&mut state)
            .map_err(|err| NutsError::LogpFailure(Box::new(err)))?;
        self.mass_matrix.update_velocity(&mut state);
        self.mass_matrix.update_kinetic_energy(&mut state);
        Ok(state)
    }

    /// Initialize a state at a new location.
    ///
    /// The momentum is zero; it is drawn at the start of each trajectory.
    pub fn init_state(&mut self, position: &[f64]) -> Result<State, NutsError> {
        let zeros = vec![0f64; position.len()];
        let state = self.new_state(position, &zeros)?;
        if !state.logp.is_finite() | !all_finite(&state.grad) {
            return Err(NutsError::BadInitGrad);
        }
        Ok(state)
    }

    /// Draw a fresh momentum `p ~ N(0, M)` for the state.
    pub fn initialize_trajectory<R: rand::Rng + ?Sized>(&self, state: &mut State, rng: &mut R) {
        self.mass_matrix.randomize_momentum(state, rng);
        self.mass_matrix.update_velocity(state);
        self.mass_matrix.update_kinetic_energy(state);
    }

    /// Perform one leapfrog step of size `step_size` in direction `dir`.
    ///
    /// Return either an unrecoverable error, a new state or a divergence
    /// caused by a recoverable logp error. Non-finite values are not
    /// checked here, the caller decides what to do with them.
    pub fn leapfrog(
        &mut self,
        start: &State,
        step_size: f64,
        dir: Direction,
    ) -> Result<LeapfrogResult, NutsError> {
        let epsilon = dir.sign() * step_size;
        let mut out = start.clone();

        // half step for the momentum, full step for the position
        axpy_out(&start.grad, &start.p, 0.5 * epsilon, &mut out.p);
        self.mass_matrix.update_velocity(&mut out);
        axpy_out(&out.v, &start.q, epsilon, &mut out.q);

        if let Err(logp_error) = self.update_potential_gradient(&mut out) {
            if !logp_error.is_recoverable() {
                return Err(NutsError::LogpFailure(Box::new(logp_error)));
            }
            let info = DivergenceInfo {
                start_location: Some(start.q.clone()),
                end_location: Some(out.q.clone()),
                logp_function_error: Some(Arc::new(logp_error)),
            };
            return Ok(LeapfrogResult::Divergence(info));
        }

        axpy(&out.grad, &mut out.p, 0.5 * epsilon);
        self.mass_matrix.update_velocity(&mut out);
        self.mass_matrix.update_kinetic_energy(&mut out);

        Ok(LeapfrogResult::Ok(out))
    }

    fn update_potential_gradient(&mut self, state: &mut State) -> Result<(), F::LogpError> {
        state.logp = self.logp.logp(&state.q, &mut state.grad)?;
        Ok(())
    }

    fn check_dim(&self, found: usize) -> Result<(), NutsError> {
        if found != self.dim() {
            return Err(NutsError::DimensionMismatch {
                expected: self.dim(),
                found,
            });
        }
        Ok(())
    }
}
