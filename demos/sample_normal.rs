//! Sample a correlated two dimensional normal distribution and write the
//! trace to `nuts_output/chain_0.csv`.

use anyhow::Result;
use slice_nuts::{sample, CsvConfig, DenseMassMatrix, LogpFn, NutsSettings};

fn main() -> Result<()> {
    env_logger::init();

    // a normal with unit variances and correlation 0.8, `scale` is the
    // diagonal of its precision matrix
    let rho: f64 = 0.8;
    let scale = 1. / (1. - rho * rho);
    let logp = LogpFn::new(
        2,
        move |x: &[f64]| -0.5 * scale * (x[0] * x[0] - 2. * rho * x[0] * x[1] + x[1] * x[1]),
        move |x: &[f64], grad: &mut [f64]| {
            grad[0] = -scale * (x[0] - rho * x[1]);
            grad[1] = -scale * (x[1] - rho * x[0]);
        },
    );
    // the precision matrix of the target is a good mass matrix
    let mass = DenseMassMatrix::new(faer::mat![
        [scale, -rho * scale],
        [-rho * scale, scale]
    ])?;

    let settings = NutsSettings {
        num_tune: 200,
        num_draws: 2000,
        seed: 42,
        ..Default::default()
    };
    let trace = sample(logp, mass, &[1., -1.], &settings)?;

    println!("mean: {:?}", trace.mean());
    println!("std: {:?}", trace.std());
    println!("divergences: {}", trace.num_divergences());

    let path = CsvConfig::new("nuts_output").write_trace(&trace, 0)?;
    println!("wrote {}", path.display());
    Ok(())
}
