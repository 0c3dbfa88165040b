//! CSV export of a trace in the layout of CmdStan output files
//!
//! Existing Stan analysis tools can read the files, as long as they only
//! need the columns a NUTS chain with a fixed mass matrix produces.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::trace::{Draw, Trace};

/// Configuration for CSV output.
///
/// Each chain is written to `chain_{id}.csv` in the output directory.
///
/// The CSV format matches CmdStan output:
/// - Header row with column names
/// - Sampler statistics (lp__, stepsize__, treedepth__, divergent__)
/// - Parameter columns
pub struct CsvConfig {
    /// Directory where CSV files will be written
    output_dir: PathBuf,
    /// Number of decimal places for floating point values
    precision: usize,
    /// Whether to store warmup samples (default: true)
    store_warmup: bool,
    /// Column names of the parameters, `theta.1`, `theta.2`, ... if empty
    parameter_names: Vec<String>,
}

impl CsvConfig {
    /// Create a new CSV configuration.
    ///
    /// ```rust
    /// use slice_nuts::CsvConfig;
    /// let config = CsvConfig::new("mcmc_output");
    /// ```
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            precision: 6,
            store_warmup: true,
            parameter_names: vec![],
        }
    }

    /// Set the precision (number of decimal places) for floating point values.
    ///
    /// Default is 6 decimal places.
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    /// Configure whether to store warmup samples.
    pub fn store_warmup(mut self, store: bool) -> Self {
        self.store_warmup = store;
        self
    }

    pub fn with_parameter_names<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.parameter_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Write the trace of chain `chain_id` and return the path of the file.
    pub fn write_trace(&self, trace: &Trace, chain_id: u64) -> Result<PathBuf> {
        let names = self.column_names(trace.dim())?;

        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create output directory: {:?}", self.output_dir))?;
        let file_path = self.output_dir.join(format!("chain_{}.csv", chain_id));
        let file = File::create(&file_path)
            .with_context(|| format!("Failed to create CSV file: {:?}", file_path))?;
        let mut writer = BufWriter::new(file);

        let mut headers = vec![
            "lp__".to_string(),
            "stepsize__".to_string(),
            "treedepth__".to_string(),
            "divergent__".to_string(),
        ];
        headers.extend(names);
        writeln!(writer, "{}", headers.join(","))?;

        for draw in trace.draws() {
            if draw.tuning && !self.store_warmup {
                continue;
            }
            self.write_row(&mut writer, draw)?;
        }

        writer
            .flush()
            .with_context(|| format!("Failed to write CSV file: {:?}", file_path))?;
        Ok(file_path)
    }

    fn column_names(&self, dim: usize) -> Result<Vec<String>> {
        if self.parameter_names.is_empty() {
            return Ok((1..=dim).map(|i| format!("theta.{}", i)).collect());
        }
        if self.parameter_names.len() != dim {
            bail!(
                "Got {} parameter names for a trace of dimension {}",
                self.parameter_names.len(),
                dim
            );
        }
        Ok(self.parameter_names.clone())
    }

    fn write_row<W: Write>(&self, writer: &mut W, draw: &Draw) -> Result<()> {
        let mut row = vec![
            self.format_float(draw.logp),
            self.format_float(draw.step_size),
            draw.depth.to_string(),
            if draw.diverging { "1" } else { "0" }.to_string(),
        ];
        row.extend(draw.position.iter().map(|&v| self.format_float(v)));
        writeln!(writer, "{}", row.join(","))?;
        Ok(())
    }

    fn format_float(&self, v: f64) -> String {
        if v.is_nan() {
            "NA".to_string()
        } else if v.is_infinite() {
            if v > 0.0 { "Inf" } else { "-Inf" }.to_string()
        } else {
            format!("{:.prec$}", v, prec = self.precision)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn example_trace() -> Trace {
        let mut trace = Trace::new(2);
        for (i, tuning) in [true, false, false].into_iter().enumerate() {
            trace.push(Draw {
                position: vec![i as f64, -0.5].into(),
                step_size: 0.25,
                depth: 3,
                maxdepth_reached: false,
                diverging: i == 2,
                logp: if i == 1 { f64::NEG_INFINITY } else { -1.5 },
                tuning,
            });
        }
        trace
    }

    #[test]
    fn writes_cmdstan_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = CsvConfig::new(dir.path().join("out")).with_precision(2);
        let path = config.write_trace(&example_trace(), 3).unwrap();
        assert_eq!(path.file_name().unwrap(), "chain_3.csv");

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "lp__,stepsize__,treedepth__,divergent__,theta.1,theta.2",
                "-1.50,0.25,3,0,0.00,-0.50",
                "-Inf,0.25,3,0,1.00,-0.50",
                "-1.50,0.25,3,1,2.00,-0.50",
            ]
        );
    }

    #[test]
    fn skips_warmup_and_names_columns() {
        let dir = tempfile::tempdir().unwrap();
        let config = CsvConfig::new(dir.path())
            .store_warmup(false)
            .with_parameter_names(["mu", "sigma"]);
        let path = config.write_trace(&example_trace(), 0).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("divergent__,mu,sigma"));
    }

    #[test]
    fn rejects_wrong_number_of_names() {
        let dir = tempfile::tempdir().unwrap();
        let config = CsvConfig::new(dir.path()).with_parameter_names(["mu"]);
        assert!(config.write_trace(&example_trace(), 0).is_err());
    }
}
