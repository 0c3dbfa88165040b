use rand_distr::Exp1;
use thiserror::Error;

use crate::{
    cpu_math::CpuLogpFunc,
    hamiltonian::{Direction, EuclideanHamiltonian, LeapfrogResult},
    math::{difference, vector_dot},
    state::State,
    stepsize::{AdaptationState, DualAverageSettings},
};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum NutsError {
    #[error("Logp function returned unrecoverable error")]
    LogpFailure(Box<dyn std::error::Error + Send + Sync>),

    #[error("Could not find a valid initial point: logp or gradient is not finite")]
    BadInitGrad,

    #[error("Invalid mass matrix: {0}")]
    BadMassMatrix(String),

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Initial step size must be finite and positive, got {0}")]
    BadStepSize(f64),
}

pub type Result<T> = std::result::Result<T, NutsError>;

/// Options that stay fixed for all draws of a chain.
#[derive(Debug, Clone, Copy)]
pub struct NutsOptions {
    /// Growing the trajectory stops once its depth exceeds this.
    pub maxdepth: u64,
    /// A leapfrog state whose joint log density is further than this
    /// below the slice is treated as a divergence.
    pub max_energy_error: f64,
    /// Number of draws with step size adaptation
    pub num_tune: u64,
    pub step_size_adapt: DualAverageSettings,
    /// Log one line per draw at info level
    pub verbose: bool,
}

impl Default for NutsOptions {
    fn default() -> Self {
        NutsOptions {
            maxdepth: 10,
            max_energy_error: 1000.,
            num_tune: 50,
            step_size_adapt: DualAverageSettings::default(),
            verbose: false,
        }
    }
}

/// Information about a draw, exported as part of the trace
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleInfo {
    /// The draw number, starting at one
    pub iteration: u64,
    /// The step size the trajectory was integrated with
    pub step_size: f64,
    /// The depth of the trajectory that this point was sampled from
    pub depth: u64,
    /// Whether the trajectory was terminated because it reached
    /// the maximum tree depth.
    pub reached_maxdepth: bool,
    /// Whether some leapfrog state fell too far below the slice, or
    /// the logp function failed recoverably.
    pub diverging: bool,
    /// Number of states in the slice
    pub tree_size: u64,
    /// Mean acceptance statistic of the last subtree
    pub mean_tree_accept: f64,
    pub num_steps: u64,
    /// The draw contributed to step size adaptation
    pub tuning: bool,
}

/// Result of growing one side of the trajectory by `2^depth` leapfrog steps.
///
/// Only the two outermost states and one candidate are kept, never the
/// whole trajectory.
#[derive(Debug, Clone)]
pub(crate) struct Subtree {
    pub(crate) minus: State,
    pub(crate) plus: State,
    pub(crate) candidate: State,
    /// Number of states in the slice
    pub(crate) n: u64,
    pub(crate) valid: bool,
    /// Sum of the acceptance statistics of all leapfrog states
    pub(crate) alpha: f64,
    pub(crate) n_alpha: u64,
    pub(crate) diverging: bool,
}

/// Compute the termination criterion for NUTS.
///
/// Returns `false` if the trajectory was invalid already, or if one of
/// the ends moves back towards the other one in the metric given by the
/// inverse mass matrix. Non-finite projections also stop.
pub(crate) fn no_u_turn(valid: bool, minus: &State, plus: &State) -> bool {
    if !valid {
        return false;
    }
    let mut dq = vec![0f64; minus.dim()];
    difference(&plus.q, &minus.q, &mut dq);
    let proj_minus = vector_dot(&dq, &minus.v);
    let proj_plus = vector_dot(&dq, &plus.v);
    // NaN compares false and ends up here as well
    (proj_minus >= 0.) & (proj_plus >= 0.)
}

/// Everything `build_tree` needs that is fixed during one draw.
pub(crate) struct TreeContext {
    pub(crate) log_u: f64,
    pub(crate) step_size: f64,
    /// Joint log density of the initial point of the trajectory
    pub(crate) initial_joint: f64,
    pub(crate) max_energy_error: f64,
}

/// Grow the trajectory from `start` by `2^depth` leapfrog steps in
/// direction `dir`.
pub(crate) fn build_tree<F, R>(
    hamiltonian: &mut EuclideanHamiltonian<F>,
    rng: &mut R,
    start: &State,
    dir: Direction,
    depth: u64,
    ctx: &TreeContext,
) -> Result<Subtree>
where
    F: CpuLogpFunc,
    R: rand::Rng + ?Sized,
{
    if depth == 0 {
        return single_step(hamiltonian, start, dir, ctx);
    }

    let mut tree = build_tree(hamiltonian, rng, start, dir, depth - 1, ctx)?;
    if !tree.valid {
        return Ok(tree);
    }

    let edge = match dir {
        Direction::Forward => &tree.plus,
        Direction::Backward => &tree.minus,
    };
    let other = build_tree(hamiltonian, rng, edge, dir, depth - 1, ctx)?;

    let n = tree.n + other.n;
    let Subtree {
        minus,
        plus,
        candidate,
        n: other_n,
        valid: other_valid,
        alpha,
        n_alpha,
        diverging,
    } = other;

    if rng.random::<f64>() < other_n as f64 / n.max(1) as f64 {
        tree.candidate = candidate;
    }
    match dir {
        Direction::Forward => tree.plus = plus,
        Direction::Backward => tree.minus = minus,
    }

    tree.valid = other_valid && no_u_turn(true, &tree.minus, &tree.plus);
    tree.n = n;
    tree.alpha += alpha;
    tree.n_alpha += n_alpha;
    tree.diverging |= diverging;
    Ok(tree)
}

fn single_step<F: CpuLogpFunc>(
    hamiltonian: &mut EuclideanHamiltonian<F>,
    start: &State,
    dir: Direction,
    ctx: &TreeContext,
) -> Result<Subtree> {
    let end = match hamiltonian.leapfrog(start, ctx.step_size, dir)? {
        LeapfrogResult::Ok(end) => end,
        LeapfrogResult::Divergence(info) => {
            log::debug!(
                "Leapfrog step failed at {:?}: {:?}",
                info.end_location,
                info.logp_function_error
            );
            return Ok(Subtree {
                minus: start.clone(),
                plus: start.clone(),
                candidate: start.clone(),
                n: 0,
                valid: false,
                alpha: 0.,
                n_alpha: 1,
                diverging: true,
            });
        }
    };

    let joint = end.joint_logp();
    let valid = joint.is_finite() & (joint > ctx.log_u - ctx.max_energy_error);
    let n = if joint >= ctx.log_u { 1 } else { 0 };
    let alpha = if joint.is_nan() {
        0.
    } else {
        (joint - ctx.initial_joint).exp().min(1.)
    };
    if !valid {
        log::debug!(
            "Divergent leapfrog step at {:?} with joint log density {}",
            end.position(),
            joint
        );
    }

    Ok(Subtree {
        minus: end.clone(),
        plus: end.clone(),
        candidate: end,
        n,
        valid,
        alpha,
        n_alpha: 1,
        diverging: !valid,
    })
}

/// Draw a slice threshold below the joint log density of the initial point.
fn slice_threshold<R: rand::Rng + ?Sized>(initial_joint: f64, rng: &mut R) -> f64 {
    let log_u = initial_joint - rng.sample::<f64, _>(Exp1);
    if log_u.is_finite() {
        return log_u;
    }
    log::warn!(
        "Slice threshold is not finite (joint log density {}), drawing a fallback",
        initial_joint
    );
    (rng.random::<f64>() * 1e5).ln()
}

/// Perform one NUTS transition starting at `init`.
///
/// Returns the new point, the updated step size adaptation and some
/// information about the trajectory.
pub(crate) fn draw<F, R>(
    hamiltonian: &mut EuclideanHamiltonian<F>,
    rng: &mut R,
    init: &State,
    adapt: AdaptationState,
    options: &NutsOptions,
) -> Result<(State, AdaptationState, SampleInfo)>
where
    F: CpuLogpFunc,
    R: rand::Rng + ?Sized,
{
    let iteration = adapt.iteration + 1;
    let tuning = iteration <= options.num_tune;
    let step_size = adapt.trajectory_step_size(iteration, options.num_tune, rng);

    let mut start = init.clone();
    hamiltonian.initialize_trajectory(&mut start, rng);
    let initial_joint = start.joint_logp();
    let ctx = TreeContext {
        log_u: slice_threshold(initial_joint, rng),
        step_size,
        initial_joint,
        max_energy_error: options.max_energy_error,
    };

    let mut minus = start.clone();
    let mut plus = start.clone();
    let mut current = start;
    let mut depth = 0;
    let mut n: u64 = 1;
    let mut valid = true;
    let mut diverging = false;
    let mut reached_maxdepth = false;
    let mut num_steps = 0;
    let mut accept_stat = 0.;

    while valid {
        let dir: Direction = rng.random();
        let edge = match dir {
            Direction::Forward => &plus,
            Direction::Backward => &minus,
        };
        let tree = build_tree(hamiltonian, rng, edge, dir, depth, &ctx)?;

        num_steps += tree.n_alpha;
        accept_stat = tree.alpha / tree.n_alpha as f64;
        diverging |= tree.diverging;

        let Subtree {
            minus: tree_minus,
            plus: tree_plus,
            candidate,
            n: tree_n,
            valid: tree_valid,
            ..
        } = tree;
        match dir {
            Direction::Forward => plus = tree_plus,
            Direction::Backward => minus = tree_minus,
        }

        if tree_valid && rng.random::<f64>() < tree_n as f64 / n as f64 {
            current = candidate;
        }
        n += tree_n;
        valid = no_u_turn(tree_valid, &minus, &plus);
        depth += 1;
        if depth > options.maxdepth {
            log::warn!(
                "Reached maximum tree depth {} in draw {}",
                options.maxdepth,
                iteration
            );
            reached_maxdepth = true;
            break;
        }
    }

    let mut adapt = if tuning {
        adapt.advance(accept_stat, iteration, &options.step_size_adapt)
    } else {
        adapt.freeze()
    };
    adapt.iteration = iteration;
    adapt.depth = depth;

    if options.verbose {
        log::info!(
            "draw {}: step size {:.4e}, depth {}, tree size {}, accept {:.3}{}",
            iteration,
            step_size,
            depth,
            n,
            accept_stat,
            if diverging { ", diverging" } else { "" }
        );
    }

    let info = SampleInfo {
        iteration,
        step_size,
        depth,
        reached_maxdepth,
        diverging,
        tree_size: n,
        mean_tree_accept: accept_stat,
        num_steps,
        tuning,
    };
    Ok((current, adapt, info))
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::{
        sync::Mutex,
        thread::{self, ThreadId},
    };

    use super::*;
    use crate::{
        cpu_math::test_logps::{BoundedLogp, NormalLogp},
        mass_matrix::DenseMassMatrix,
    };

    /// Collects warnings together with the thread that logged them, so
    /// that tests running in parallel only see their own records.
    struct WarningLog;

    static WARNINGS: Mutex<Vec<(ThreadId, String)>> = Mutex::new(Vec::new());
    static WARNING_LOG: WarningLog = WarningLog;

    impl log::Log for WarningLog {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= log::Level::Warn
        }

        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                let message = (thread::current().id(), record.args().to_string());
                WARNINGS.lock().unwrap().push(message);
            }
        }

        fn flush(&self) {}
    }

    fn with_warnings<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
        // another test may have installed the logger already
        let _ = log::set_logger(&WARNING_LOG);
        log::set_max_level(log::LevelFilter::Warn);

        let id = thread::current().id();
        let before = WARNINGS.lock().unwrap().len();
        let result = f();
        let warnings = WARNINGS.lock().unwrap()[before..]
            .iter()
            .filter(|(thread, _)| *thread == id)
            .map(|(_, message)| message.clone())
            .collect();
        (result, warnings)
    }

    fn normal_hamiltonian(dim: usize) -> EuclideanHamiltonian<NormalLogp> {
        EuclideanHamiltonian::new(NormalLogp::new(dim, 0.), DenseMassMatrix::identity(dim)).unwrap()
    }

    fn state_at(q: &[f64], p: &[f64]) -> State {
        let mut hamiltonian = normal_hamiltonian(q.len());
        hamiltonian.new_state(q, p).unwrap()
    }

    proptest! {
        #[test]
        fn invalid_trajectory_always_stops(
            q1 in prop::collection::vec(-5f64..5f64, 2),
            p1 in prop::collection::vec(-5f64..5f64, 2),
            q2 in prop::collection::vec(-5f64..5f64, 2),
            p2 in prop::collection::vec(-5f64..5f64, 2),
        ) {
            let minus = state_at(&q1, &p1);
            let plus = state_at(&q2, &p2);
            prop_assert!(!no_u_turn(false, &minus, &plus));
        }
    }

    #[test]
    fn u_turn_criterion() {
        // the trajectory keeps moving forward at both ends
        let minus = state_at(&[0.], &[1.]);
        let plus = state_at(&[1.], &[0.5]);
        assert!(no_u_turn(true, &minus, &plus));

        // the right end turns back
        let plus = state_at(&[1.], &[-0.5]);
        assert!(!no_u_turn(true, &minus, &plus));

        // the left end turns back
        let minus = state_at(&[0.], &[-0.5]);
        let plus = state_at(&[1.], &[1.]);
        assert!(!no_u_turn(true, &minus, &plus));

        let minus = state_at(&[f64::NAN], &[0.5]);
        assert!(!no_u_turn(true, &minus, &plus));
    }

    #[test]
    fn u_turn_uses_metric() {
        // dq = (1, 1) and p_minus = (-1, 1.2) point the same way in the
        // euclidean metric, but not after applying the inverse mass matrix.
        let mass = DenseMassMatrix::new(faer::mat![[0.5, 0.], [0., 2.]]).unwrap();
        let mut hamiltonian = EuclideanHamiltonian::new(NormalLogp::new(2, 0.), mass).unwrap();
        let minus = hamiltonian.new_state(&[0., 0.], &[-1., 1.2]).unwrap();
        let plus = hamiltonian.new_state(&[1., 1.], &[1., 1.]).unwrap();
        // euclidean: -1 + 1.2 > 0, metric: -2 + 0.6 < 0
        assert!(!no_u_turn(true, &minus, &plus));
    }

    fn context(start: &State) -> TreeContext {
        TreeContext {
            log_u: start.joint_logp() - 1.,
            step_size: 0.1,
            initial_joint: start.joint_logp(),
            max_energy_error: 1000.,
        }
    }

    #[test]
    fn zero_step_size_base_case() {
        let mut hamiltonian = normal_hamiltonian(2);
        let start = hamiltonian.new_state(&[0.5, -0.3], &[1., 2.]).unwrap();
        let ctx = TreeContext {
            step_size: 0.,
            ..context(&start)
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = build_tree(&mut hamiltonian, &mut rng, &start, Direction::Forward, 0, &ctx)
            .unwrap();
        assert_eq!(tree.n_alpha, 1);
        assert_eq!(tree.alpha, 1.);
        assert_eq!(tree.n, 1);
        assert!(tree.valid);
        assert_eq!(tree.candidate, start);
    }

    #[test]
    fn subtree_counts_and_boundaries() {
        let mut hamiltonian = normal_hamiltonian(1);
        let start = hamiltonian.new_state(&[0.], &[1.]).unwrap();
        let ctx = context(&start);
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let tree = build_tree(&mut hamiltonian, &mut rng, &start, Direction::Forward, 3, &ctx)
            .unwrap();
        // small steps on a harmonic oscillator do not turn within 8 steps
        assert!(tree.valid);
        assert_eq!(tree.n_alpha, 8);
        assert!(tree.n <= 8);
        assert!(tree.alpha <= 8.);

        // walking 8 steps one by one ends at the same point
        let mut state = start.clone();
        for _ in 0..8 {
            state = match hamiltonian.leapfrog(&state, 0.1, Direction::Forward).unwrap() {
                LeapfrogResult::Ok(state) => state,
                LeapfrogResult::Divergence(_) => panic!(),
            };
        }
        assert_abs_diff_eq!(tree.plus.q[0], state.q[0], epsilon = 1e-14);
        assert!(tree.minus.q[0] > 0.);
        assert!(tree.minus.q[0] < tree.plus.q[0]);

        let back = build_tree(&mut hamiltonian, &mut rng, &start, Direction::Backward, 2, &ctx)
            .unwrap();
        assert!(back.minus.q[0] < back.plus.q[0]);
        assert!(back.plus.q[0] < 0.);
        assert_eq!(back.n_alpha, 4);
    }

    #[test]
    fn invalid_left_half_is_not_expanded() {
        let mut hamiltonian = normal_hamiltonian(1);
        let start = hamiltonian.new_state(&[0.], &[1.]).unwrap();
        let ctx = TreeContext {
            // every state is far below the slice
            log_u: 1e6,
            ..context(&start)
        };
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let tree = build_tree(&mut hamiltonian, &mut rng, &start, Direction::Forward, 4, &ctx)
            .unwrap();
        assert!(!tree.valid);
        assert!(tree.diverging);
        assert_eq!(tree.n, 0);
        // only the first leapfrog of the leftmost leaf was computed
        assert_eq!(tree.n_alpha, 1);
    }

    #[test]
    fn recoverable_errors_invalidate_subtree() {
        let func = BoundedLogp {
            bound: 1.,
            recoverable: true,
        };
        let mut hamiltonian =
            EuclideanHamiltonian::new(func, DenseMassMatrix::identity(1)).unwrap();
        let start = hamiltonian.new_state(&[0.9], &[3.]).unwrap();
        let ctx = TreeContext {
            log_u: start.joint_logp() - 1.,
            step_size: 0.5,
            initial_joint: start.joint_logp(),
            max_energy_error: 1000.,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let tree = build_tree(&mut hamiltonian, &mut rng, &start, Direction::Forward, 2, &ctx)
            .unwrap();
        assert!(!tree.valid);
        assert!(tree.diverging);
        assert_eq!(tree.alpha, 0.);
    }

    #[test]
    fn unrecoverable_errors_propagate() {
        let func = BoundedLogp {
            bound: 1.,
            recoverable: false,
        };
        let mut hamiltonian =
            EuclideanHamiltonian::new(func, DenseMassMatrix::identity(1)).unwrap();
        let init = hamiltonian.init_state(&[0.9]).unwrap();
        let options = NutsOptions::default();
        let adapt = AdaptationState::new(50., options.num_tune);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let result = draw(&mut hamiltonian, &mut rng, &init, adapt, &options);
        assert!(matches!(result, Err(NutsError::LogpFailure(_))));
    }

    #[test]
    fn draw_respects_maxdepth() {
        // a flat density never turns around
        let func = crate::cpu_math::LogpFn::new(
            1,
            |_: &[f64]| 0.,
            |_: &[f64], grad: &mut [f64]| grad[0] = 0.,
        );
        let mut hamiltonian =
            EuclideanHamiltonian::new(func, DenseMassMatrix::identity(1)).unwrap();
        let init = hamiltonian.init_state(&[0.]).unwrap();
        let options = NutsOptions {
            maxdepth: 4,
            num_tune: 0,
            ..Default::default()
        };
        let adapt = AdaptationState::new(0.1, options.num_tune);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..5 {
            let ((_, new_adapt, info), warnings) =
                with_warnings(|| draw(&mut hamiltonian, &mut rng, &init, adapt, &options).unwrap());
            assert!(info.reached_maxdepth);
            assert_eq!(info.depth, options.maxdepth + 1);
            assert_eq!(new_adapt.depth, options.maxdepth + 1);
            assert_eq!(info.num_steps, (1 << (options.maxdepth + 1)) - 1);
            assert!(!info.diverging);
            assert_eq!(warnings.len(), 1);
            assert!(warnings[0].contains("maximum tree depth 4"));
        }
    }

    #[test]
    fn shallow_draws_do_not_warn() {
        let options = NutsOptions::default();
        let mut hamiltonian = normal_hamiltonian(1);
        let init = hamiltonian.init_state(&[0.3]).unwrap();
        let adapt = AdaptationState::new(0.5, options.num_tune);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let ((_, _, info), warnings) =
            with_warnings(|| draw(&mut hamiltonian, &mut rng, &init, adapt, &options).unwrap());
        assert!(!info.reached_maxdepth);
        assert!(warnings.is_empty());
    }

    #[test]
    fn slice_threshold_fallback() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let (log_u, warnings) = with_warnings(|| slice_threshold(-1., &mut rng));
        assert!(log_u < -1.);
        assert!(warnings.is_empty());

        for joint in [f64::NEG_INFINITY, f64::INFINITY, f64::NAN] {
            let (log_u, warnings) = with_warnings(|| slice_threshold(joint, &mut rng));
            assert!(log_u.is_finite());
            assert!(log_u <= 1e5f64.ln());
            assert_eq!(warnings.len(), 1);
            assert!(warnings[0].starts_with("Slice threshold is not finite"));
        }
    }

    #[test]
    fn draw_is_deterministic() {
        let options = NutsOptions::default();
        let run = |seed: u64| {
            let mut hamiltonian = normal_hamiltonian(3);
            let mut state = hamiltonian.init_state(&[0.5, -0.5, 1.]).unwrap();
            let mut adapt = AdaptationState::new(0.7, options.num_tune);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut infos = vec![];
            for _ in 0..20 {
                let (new_state, new_adapt, info) =
                    draw(&mut hamiltonian, &mut rng, &state, adapt, &options).unwrap();
                state = new_state;
                adapt = new_adapt;
                infos.push(info);
            }
            (state.position().to_vec(), adapt, infos)
        };
        let (pos1, adapt1, infos1) = run(42);
        let (pos2, adapt2, infos2) = run(42);
        assert_eq!(pos1, pos2);
        assert_eq!(adapt1, adapt2);
        assert_eq!(infos1, infos2);
        assert_eq!(adapt1.iteration, 20);
    }

    #[test]
    fn draw_adapts_only_while_tuning() {
        let options = NutsOptions {
            num_tune: 5,
            ..Default::default()
        };
        let mut hamiltonian = normal_hamiltonian(2);
        let mut state = hamiltonian.init_state(&[0.1, 0.2]).unwrap();
        let mut adapt = AdaptationState::new(0.5, options.num_tune);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for i in 1..=10 {
            let before = adapt;
            let (new_state, new_adapt, info) =
                draw(&mut hamiltonian, &mut rng, &state, adapt, &options).unwrap();
            assert_eq!(info.iteration, i);
            assert_eq!(info.tuning, i <= 5);
            if i <= 5 {
                assert_eq!(info.step_size, before.step_size);
                assert!(new_adapt.hbar != before.hbar);
            } else {
                assert_eq!(new_adapt.hbar, before.hbar);
                assert_eq!(new_adapt.step_size, new_adapt.step_size_bar);
                assert!(info.step_size >= 0.9 * before.step_size_bar);
                assert!(info.step_size <= 1.1 * before.step_size_bar);
            }
            state = new_state;
            adapt = new_adapt;
        }
    }
}
