#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::Error;

/// Piecewise-linear function of one variable with linear extrapolation.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Table1D {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Table1D {
    /// `x` must be strictly increasing. A single point gives a constant.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self, Error> {
        if x.is_empty() || x.len() != y.len() {
            return Err(Error::Props(format!(
                "table with {} abscissas and {} values",
                x.len(),
                y.len()
            )));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(Error::Props("table with non-finite entries".into()));
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Props("table abscissas must be strictly increasing".into()));
        }
        Ok(Table1D { x, y })
    }

    pub fn constant(value: f64) -> Self {
        Table1D {
            x: vec![0.0],
            y: vec![value],
        }
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn is_increasing(&self) -> bool {
        self.y.windows(2).all(|w| w[1] > w[0])
    }

    fn segment(x: &[f64], v: f64) -> usize {
        let n = x.len();
        match x.partition_point(|&xi| xi <= v) {
            0 => 0,
            k if k >= n - 1 => n - 2,
            k => k - 1,
        }
    }

    /// Value and slope at `v`.
    pub fn eval_with_slope(&self, v: f64) -> (f64, f64) {
        if self.x.len() == 1 {
            return (self.y[0], 0.0);
        }
        let i = Self::segment(&self.x, v);
        let slope = (self.y[i + 1] - self.y[i]) / (self.x[i + 1] - self.x[i]);
        (self.y[i] + slope * (v - self.x[i]), slope)
    }

    pub fn eval(&self, v: f64) -> f64 {
        self.eval_with_slope(v).0
    }

    /// Abscissa where the function takes value `v`, with `dx/dy`. Only meaningful for strictly
    /// increasing values.
    pub fn inverse_with_slope(&self, v: f64) -> (f64, f64) {
        if self.y.len() == 1 {
            return (self.x[0], 0.0);
        }
        let i = Self::segment(&self.y, v);
        let slope = (self.x[i + 1] - self.x[i]) / (self.y[i + 1] - self.y[i]);
        (self.x[i] + slope * (v - self.y[i]), slope)
    }
}
