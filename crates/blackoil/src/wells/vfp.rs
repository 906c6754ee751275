//! Vertical flow performance tables relating bottom-hole pressure to rate and tubing-head
//! pressure.

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{phases::Phase, Error};

/// Rate the table is tabulated against.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloType {
    Oil,
    Liquid,
    Gas,
}

impl FloType {
    /// Weight of each canonical phase rate in the flow rate.
    pub fn coefficients(self) -> [f64; 3] {
        match self {
            FloType::Oil => [0.0, 1.0, 0.0],
            FloType::Liquid => [1.0, 1.0, 0.0],
            FloType::Gas => [0.0, 0.0, 1.0],
        }
    }
}

/// `bhp(flo, thp)` on a rectangular grid, bilinear inside.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct VfpTable {
    flo_type: FloType,
    flo: Vec<f64>,
    thp: Vec<f64>,
    /// `bhp[i][j]` at `thp[i]`, `flo[j]`
    bhp: Vec<Vec<f64>>,
}

fn check_axis(name: &str, axis: &[f64]) -> Result<(), Error> {
    if axis.is_empty() || axis.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::Config(format!(
            "VFP {name} axis must be non-empty and strictly increasing"
        )));
    }
    Ok(())
}

/// Segment index and weight of `v` on `axis`, extrapolating linearly.
fn locate(axis: &[f64], v: f64) -> (usize, f64) {
    if axis.len() == 1 {
        return (0, 0.0);
    }
    let n = axis.len();
    let i = match axis.partition_point(|&x| x <= v) {
        0 => 0,
        k if k >= n - 1 => n - 2,
        k => k - 1,
    };
    (i, (v - axis[i]) / (axis[i + 1] - axis[i]))
}

impl VfpTable {
    pub fn new(
        flo_type: FloType,
        flo: Vec<f64>,
        thp: Vec<f64>,
        bhp: Vec<Vec<f64>>,
    ) -> Result<Self, Error> {
        check_axis("flow rate", &flo)?;
        check_axis("THP", &thp)?;
        if bhp.len() != thp.len() || bhp.iter().any(|row| row.len() != flo.len()) {
            return Err(Error::Config("VFP table values do not match its axes".into()));
        }
        Ok(VfpTable {
            flo_type,
            flo,
            thp,
            bhp,
        })
    }

    pub fn flo_type(&self) -> FloType {
        self.flo_type
    }

    /// Production flow rate (positive) from surface rates positive into the reservoir.
    pub fn flo(&self, rates: &[f64; 3]) -> f64 {
        let c = self.flo_type.coefficients();
        -Phase::ALL
            .iter()
            .map(|p| c[p.index()] * rates[p.index()])
            .sum::<f64>()
    }

    fn row(&self, i: usize, flo: f64) -> (f64, f64) {
        let row = &self.bhp[i];
        if row.len() == 1 {
            return (row[0], 0.0);
        }
        let (j, t) = locate(&self.flo, flo);
        let slope = (row[j + 1] - row[j]) / (self.flo[j + 1] - self.flo[j]);
        (row[j] + t * (row[j + 1] - row[j]), slope)
    }

    /// Bottom-hole pressure and its derivative with respect to `flo`. The THP axis is clamped.
    pub fn bhp(&self, flo: f64, thp: f64) -> (f64, f64) {
        let thp = thp.clamp(self.thp[0], self.thp[self.thp.len() - 1]);
        let (i, t) = locate(&self.thp, thp);
        let (v0, d0) = self.row(i, flo);
        if self.thp.len() == 1 {
            return (v0, d0);
        }
        let (v1, d1) = self.row(i + 1, flo);
        (v0 + t * (v1 - v0), d0 + t * (d1 - d0))
    }
}
