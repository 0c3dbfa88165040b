use faer::{linalg::solvers::DenseSolveCore, Mat, Side};
use rand_distr::StandardNormal;

use crate::{
    math::{mat_vec, vector_dot},
    nuts::NutsError,
    state::State,
};

/// A dense mass matrix `M` together with its lower Cholesky factor
/// (`M = L L^T`) and its inverse.
///
/// All three are computed or supplied once and never change while
/// sampling.
#[derive(Debug, Clone)]
pub struct DenseMassMatrix {
    mass: Mat<f64>,
    chol: Mat<f64>,
    inv: Mat<f64>,
}

impl DenseMassMatrix {
    /// Factor a symmetric positive definite mass matrix.
    pub fn new(mass: Mat<f64>) -> Result<Self, NutsError> {
        check_square(&mass, "mass matrix")?;
        let n = mass.nrows();
        for i in 0..n {
            for j in 0..=i {
                let (a, b) = (mass[(i, j)], mass[(j, i)]);
                if !a.is_finite() | !b.is_finite() {
                    return Err(NutsError::BadMassMatrix(
                        "mass matrix contains non-finite values".into(),
                    ));
                }
                if (a - b).abs() > 1e-10 * (1. + a.abs().max(b.abs())) {
                    return Err(NutsError::BadMassMatrix(format!(
                        "mass matrix is not symmetric at ({i}, {j})"
                    )));
                }
            }
        }

        let llt = mass.llt(Side::Lower).map_err(|err| {
            NutsError::BadMassMatrix(format!("mass matrix is not positive definite: {err:?}"))
        })?;
        let chol = llt.L().to_owned();
        let inv = llt.inverse();

        Ok(Self { mass, chol, inv })
    }

    /// Use precomputed factors. Only the shapes are checked.
    pub fn from_factors(mass: Mat<f64>, chol: Mat<f64>, inv: Mat<f64>) -> Result<Self, NutsError> {
        check_square(&mass, "mass matrix")?;
        check_square(&chol, "cholesky factor")?;
        check_square(&inv, "inverse mass matrix")?;
        let n = mass.nrows();
        for other in [&chol, &inv] {
            if other.nrows() != n {
                return Err(NutsError::DimensionMismatch {
                    expected: n,
                    found: other.nrows(),
                });
            }
        }
        Ok(Self { mass, chol, inv })
    }

    pub fn identity(dim: usize) -> Self {
        Self {
            mass: Mat::identity(dim, dim),
            chol: Mat::identity(dim, dim),
            inv: Mat::identity(dim, dim),
        }
    }

    pub fn dim(&self) -> usize {
        self.mass.nrows()
    }

    pub fn mass(&self) -> &Mat<f64> {
        &self.mass
    }

    pub fn cholesky(&self) -> &Mat<f64> {
        &self.chol
    }

    pub fn inverse(&self) -> &Mat<f64> {
        &self.inv
    }

    /// Draw `p ~ N(0, M)` as `L z` with standard normal `z`.
    pub(crate) fn randomize_momentum<R: rand::Rng + ?Sized>(&self, state: &mut State, rng: &mut R) {
        let z: Vec<f64> = (0..self.dim()).map(|_| rng.sample(StandardNormal)).collect();
        mat_vec(&self.chol, &z, &mut state.p);
    }

    /// `v = M^{-1} p`
    pub(crate) fn update_velocity(&self, state: &mut State) {
        mat_vec(&self.inv, &state.p, &mut state.v);
    }

    /// `0.5 p^T M^{-1} p`, needs an up to date velocity.
    pub(crate) fn update_kinetic_energy(&self, state: &mut State) {
        state.kinetic_energy = 0.5 * vector_dot(&state.p, &state.v);
    }
}

fn check_square(mat: &Mat<f64>, what: &str) -> Result<(), NutsError> {
    if mat.nrows() != mat.ncols() {
        return Err(NutsError::BadMassMatrix(format!(
            "{what} must be square, got {}x{}",
            mat.nrows(),
            mat.ncols()
        )));
    }
    Ok(())
}
