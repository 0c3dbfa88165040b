/// A point in phase space.
///
/// Besides position and momentum we keep everything the sampler needs
/// repeatedly at this point: the velocity `M^{-1} p`, the gradient of the
/// log density and the two energy terms. A state is only ever built by
/// the hamiltonian, so these caches always belong to `q` and `p`.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub(crate) q: Box<[f64]>,
    pub(crate) p: Box<[f64]>,
    pub(crate) v: Box<[f64]>,
    pub(crate) grad: Box<[f64]>,
    pub(crate) logp: f64,
    pub(crate) kinetic_energy: f64,
}

impl State {
    pub(crate) fn new(dim: usize) -> State {
        State {
            q: vec![0f64; dim].into(),
            p: vec![0f64; dim].into(),
            v: vec![0f64; dim].into(),
            grad: vec![0f64; dim].into(),
            logp: f64::NEG_INFINITY,
            kinetic_energy: 0f64,
        }
    }

    pub fn dim(&self) -> usize {
        self.q.len()
    }

    pub fn position(&self) -> &[f64] {
        &self.q
    }

    pub fn momentum(&self) -> &[f64] {
        &self.p
    }

    pub fn gradient(&self) -> &[f64] {
        &self.grad
    }

    /// The log density of the target at the position.
    pub fn logp(&self) -> f64 {
        self.logp
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.kinetic_energy
    }

    /// Log density of the joint distribution over position and momentum,
    /// `logp(q) - 0.5 p^T M^{-1} p`.
    ///
    /// Non-finite values of the target are passed through unchanged.
    pub fn joint_logp(&self) -> f64 {
        self.logp - self.kinetic_energy
    }

    /// The total energy (potential + kinetic)
    pub fn energy(&self) -> f64 {
        -self.joint_logp()
    }

    pub fn write_position(&self, out: &mut [f64]) {
        out.copy_from_slice(&self.q);
    }
}
