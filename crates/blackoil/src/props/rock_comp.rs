#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use super::Table1D;

/// Pressure dependence of pore volume and transmissibility (ROCK / ROCKTAB).
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RockCompressibility {
    pub p_ref: f64,
    pub compressibility: f64,
    pub trans_mult: Option<Table1D>,
}

impl RockCompressibility {
    pub fn new(p_ref: f64, compressibility: f64) -> Self {
        RockCompressibility {
            p_ref,
            compressibility,
            trans_mult: None,
        }
    }

    pub fn with_trans_mult(mut self, table: Table1D) -> Self {
        self.trans_mult = Some(table);
        self
    }

    /// `1 + x + x²/2`, `x = c (p − p_ref)`.
    pub fn pore_mult(&self, p: f64) -> (f64, f64) {
        let x = self.compressibility * (p - self.p_ref);
        (1.0 + x + 0.5 * x * x, (1.0 + x) * self.compressibility)
    }

    pub fn trans_mult(&self, p: f64) -> (f64, f64) {
        self.trans_mult
            .as_ref()
            .map_or((1.0, 0.0), |t| t.eval_with_slope(p))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_multipliers() {
        let rc = RockCompressibility::new(1.0e7, 1.0e-9);
        assert_eq!(rc.pore_mult(1.0e7), (1.0, 1.0e-9));
        let (m, _) = rc.pore_mult(2.0e7);
        assert_relative_eq!(m, 1.0 + 0.01 + 0.5e-4, max_relative = 1e-12);
        assert_eq!(rc.trans_mult(3.0e7), (1.0, 0.0));
        let rc = rc.with_trans_mult(Table1D::new(vec![0.0, 2.0e7], vec![1.0, 2.0]).unwrap());
        assert_relative_eq!(rc.trans_mult(1.0e7).0, 1.5, max_relative = 1e-12);
    }
}
