use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::{
    array::{
        Array, ArrayBuilder, ArrayRef, BooleanArray, FixedSizeListBuilder, Float64Array,
        PrimitiveBuilder, StructArray, UInt64Array,
    },
    datatypes::{DataType, Field, Float64Type},
};
use itertools::Itertools;

/// One draw of a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    pub position: Box<[f64]>,
    /// The step size the trajectory of this draw was integrated with
    pub step_size: f64,
    pub depth: u64,
    pub maxdepth_reached: bool,
    pub diverging: bool,
    /// Log density at `position`
    pub logp: f64,
    /// This draw was used for step size adaptation
    pub tuning: bool,
}

/// The draws of a chain in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    dim: usize,
    draws: Vec<Draw>,
}

impl Trace {
    pub fn new(dim: usize) -> Self {
        Self::with_capacity(dim, 0)
    }

    pub fn with_capacity(dim: usize, capacity: usize) -> Self {
        Self {
            dim,
            draws: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, draw: Draw) {
        debug_assert_eq!(draw.position.len(), self.dim);
        self.draws.push(draw);
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn draws(&self) -> &[Draw] {
        &self.draws
    }

    /// The draws after the last tuning draw.
    pub fn draws_after_tuning(&self) -> &[Draw] {
        let start = self
            .draws
            .iter()
            .rposition(|draw| draw.tuning)
            .map_or(0, |last| last + 1);
        &self.draws[start..]
    }

    pub fn num_divergences(&self) -> usize {
        self.draws.iter().filter(|draw| draw.diverging).count()
    }

    /// Mean of each coordinate over the draws after tuning.
    ///
    /// NaN if there are no such draws.
    pub fn mean(&self) -> Box<[f64]> {
        let draws = self.draws_after_tuning();
        let n = draws.len() as f64;
        (0..self.dim)
            .map(|i| draws.iter().map(|draw| draw.position[i]).sum::<f64>() / n)
            .collect()
    }

    /// Sample standard deviation of each coordinate over the draws after tuning.
    ///
    /// NaN if there are less than two such draws.
    pub fn std(&self) -> Box<[f64]> {
        let draws = self.draws_after_tuning();
        let n = draws.len() as f64;
        self.mean()
            .iter()
            .enumerate()
            .map(|(i, &mean)| {
                let sum_sq: f64 = draws
                    .iter()
                    .map(|draw| (draw.position[i] - mean).powi(2))
                    .sum();
                (sum_sq / (n - 1.)).sqrt()
            })
            .collect()
    }

    /// Export all draws as an arrow struct array with one row per draw.
    ///
    /// The positions are stored in a fixed size list column `position`.
    pub fn to_arrow(&self) -> Result<StructArray> {
        let size = i32::try_from(self.dim).context("Dimension does not fit into an arrow list")?;
        let mut positions = FixedSizeListBuilder::new(PrimitiveBuilder::<Float64Type>::new(), size);
        for draw in self.draws.iter() {
            positions.values().append_slice(&draw.position);
            positions.append(true);
        }
        let positions: ArrayRef = ArrayBuilder::finish(&mut positions);

        let floats = |value: fn(&Draw) -> f64| -> ArrayRef {
            Arc::new(Float64Array::from(self.draws.iter().map(value).collect_vec()))
        };
        let bools = |value: fn(&Draw) -> bool| -> ArrayRef {
            Arc::new(BooleanArray::from(self.draws.iter().map(value).collect_vec()))
        };
        let depth: ArrayRef = Arc::new(UInt64Array::from(
            self.draws.iter().map(|draw| draw.depth).collect_vec(),
        ));

        let fields = vec![
            Field::new("position", positions.data_type().clone(), false),
            Field::new("step_size", DataType::Float64, false),
            Field::new("depth", DataType::UInt64, false),
            Field::new("maxdepth_reached", DataType::Boolean, false),
            Field::new("diverging", DataType::Boolean, false),
            Field::new("logp", DataType::Float64, false),
            Field::new("tuning", DataType::Boolean, false),
        ];
        let arrays = vec![
            positions,
            floats(|draw| draw.step_size),
            depth,
            bools(|draw| draw.maxdepth_reached),
            bools(|draw| draw.diverging),
            floats(|draw| draw.logp),
            bools(|draw| draw.tuning),
        ];

        StructArray::try_new(fields.into(), arrays, None).context("Could not build trace array")
    }
}
