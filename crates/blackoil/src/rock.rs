//! Per-cell rock properties.

use nalgebra::Matrix3;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{grid::FaceTag, Error};

pub trait RockProps: Send + Sync {
    fn num_cells(&self) -> usize;

    fn porosity(&self, c: usize) -> f64;

    /// Absolute permeability tensor, m².
    fn permeability(&self, c: usize) -> Matrix3<f64>;

    fn ntg(&self, _c: usize) -> f64 {
        1.0
    }

    fn multpv(&self, _c: usize) -> f64 {
        1.0
    }

    fn pvt_region(&self, _c: usize) -> usize {
        0
    }

    fn sat_region(&self, _c: usize) -> usize {
        0
    }

    /// Transmissibility multiplier of the face of cell `c` with orientation `tag` (MULTX/Y/Z).
    fn trans_mult(&self, _c: usize, _tag: FaceTag) -> f64 {
        1.0
    }
}

/// Rock properties held in per-cell arrays.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayRock {
    porosity: Vec<f64>,
    permeability: Vec<Matrix3<f64>>,
    ntg: Option<Vec<f64>>,
    multpv: Option<Vec<f64>>,
    pvt_region: Option<Vec<usize>>,
    sat_region: Option<Vec<usize>>,
    /// MULTX, MULTY, MULTZ
    trans_mult: Option<Vec<[f64; 3]>>,
}

impl ArrayRock {
    pub fn new(porosity: Vec<f64>, permeability: Vec<Matrix3<f64>>) -> Result<Self, Error> {
        if porosity.len() != permeability.len() {
            return Err(Error::Geology(format!(
                "{} porosities for {} permeabilities",
                porosity.len(),
                permeability.len()
            )));
        }
        if let Some(c) = porosity.iter().position(|&p| !(0.0..=1.0).contains(&p)) {
            return Err(Error::Geology(format!(
                "porosity {} of cell {c} outside [0, 1]",
                porosity[c]
            )));
        }
        Ok(ArrayRock {
            porosity,
            permeability,
            ntg: None,
            multpv: None,
            pvt_region: None,
            sat_region: None,
            trans_mult: None,
        })
    }

    /// Same porosity and isotropic permeability everywhere.
    pub fn uniform(num_cells: usize, porosity: f64, permeability: f64) -> Result<Self, Error> {
        Self::new(
            vec![porosity; num_cells],
            vec![Matrix3::from_diagonal_element(permeability); num_cells],
        )
    }

    fn check_len(&self, what: &str, len: usize) -> Result<(), Error> {
        if len != self.porosity.len() {
            return Err(Error::Geology(format!(
                "{what} has {len} entries for {} cells",
                self.porosity.len()
            )));
        }
        Ok(())
    }

    pub fn with_ntg(mut self, ntg: Vec<f64>) -> Result<Self, Error> {
        self.check_len("NTG", ntg.len())?;
        self.ntg = Some(ntg);
        Ok(self)
    }

    pub fn with_multpv(mut self, multpv: Vec<f64>) -> Result<Self, Error> {
        self.check_len("MULTPV", multpv.len())?;
        self.multpv = Some(multpv);
        Ok(self)
    }

    pub fn with_regions(mut self, pvt: Vec<usize>, sat: Vec<usize>) -> Result<Self, Error> {
        self.check_len("PVTNUM", pvt.len())?;
        self.check_len("SATNUM", sat.len())?;
        self.pvt_region = Some(pvt);
        self.sat_region = Some(sat);
        Ok(self)
    }

    pub fn with_trans_mult(mut self, mult: Vec<[f64; 3]>) -> Result<Self, Error> {
        self.check_len("MULT[XYZ]", mult.len())?;
        self.trans_mult = Some(mult);
        Ok(self)
    }

    /// Copies every property of `rock` for the given cells.
    pub fn extract(rock: &dyn RockProps, cells: &[usize]) -> Result<Self, Error> {
        let mut out = ArrayRock::new(
            cells.iter().map(|&c| rock.porosity(c)).collect(),
            cells.iter().map(|&c| rock.permeability(c)).collect(),
        )?;
        out.ntg = Some(cells.iter().map(|&c| rock.ntg(c)).collect());
        out.multpv = Some(cells.iter().map(|&c| rock.multpv(c)).collect());
        out.pvt_region = Some(cells.iter().map(|&c| rock.pvt_region(c)).collect());
        out.sat_region = Some(cells.iter().map(|&c| rock.sat_region(c)).collect());
        out.trans_mult = Some(
            cells
                .iter()
                .map(|&c| {
                    [
                        rock.trans_mult(c, FaceTag::XPlus),
                        rock.trans_mult(c, FaceTag::YPlus),
                        rock.trans_mult(c, FaceTag::ZPlus),
                    ]
                })
                .collect(),
        );
        Ok(out)
    }

    pub(crate) fn set_porosity(&mut self, c: usize, porosity: f64) {
        self.porosity[c] = porosity;
    }

    pub(crate) fn set_ntg(&mut self, c: usize, ntg: f64) {
        self.ntg.get_or_insert_with(|| vec![1.0; self.porosity.len()])[c] = ntg;
    }

    pub(crate) fn set_multpv(&mut self, c: usize, multpv: f64) {
        self.multpv.get_or_insert_with(|| vec![1.0; self.porosity.len()])[c] = multpv;
    }
}

impl RockProps for ArrayRock {
    fn num_cells(&self) -> usize {
        self.porosity.len()
    }

    fn porosity(&self, c: usize) -> f64 {
        self.porosity[c]
    }

    fn permeability(&self, c: usize) -> Matrix3<f64> {
        self.permeability[c]
    }

    fn ntg(&self, c: usize) -> f64 {
        self.ntg.as_ref().map_or(1.0, |v| v[c])
    }

    fn multpv(&self, c: usize) -> f64 {
        self.multpv.as_ref().map_or(1.0, |v| v[c])
    }

    fn pvt_region(&self, c: usize) -> usize {
        self.pvt_region.as_ref().map_or(0, |v| v[c])
    }

    fn sat_region(&self, c: usize) -> usize {
        self.sat_region.as_ref().map_or(0, |v| v[c])
    }

    fn trans_mult(&self, c: usize, tag: FaceTag) -> f64 {
        self.trans_mult.as_ref().map_or(1.0, |v| v[c][tag.axis()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_overrides() {
        let rock = ArrayRock::uniform(3, 0.2, 1e-13)
            .unwrap()
            .with_ntg(vec![1.0, 0.5, 1.0])
            .unwrap()
            .with_trans_mult(vec![[1.0, 1.0, 0.1]; 3])
            .unwrap();
        assert_eq!(rock.ntg(1), 0.5);
        assert_eq!(rock.multpv(1), 1.0);
        assert_eq!(rock.trans_mult(0, FaceTag::ZPlus), 0.1);
        assert_eq!(rock.trans_mult(0, FaceTag::XPlus), 1.0);
        assert_eq!(rock.permeability(2)[(1, 1)], 1e-13);
    }

    #[test]
    fn test_invalid_input() {
        assert!(ArrayRock::uniform(2, 1.5, 1e-13).is_err());
        assert!(ArrayRock::uniform(2, 0.2, 1e-13)
            .unwrap()
            .with_ntg(vec![1.0])
            .is_err());
    }
}
