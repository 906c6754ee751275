use nalgebra::DVector;

use crate::{
    config::ModelConfig,
    geology::{DerivedGeology, MinPvProcessor, Nnc},
    grid::Grid,
    ops::Operators,
    rock::{ArrayRock, RockProps},
    Error,
};

/// Geology, operators and rock of the active cells, fixed for the whole run.
///
/// With a positive `min_pore_volume` small cells are collapsed first; wells, properties and
/// initial states then refer to the active cells (see [`Discretization::active_cell`]).
#[derive(Clone, Debug)]
pub struct Discretization {
    geo: DerivedGeology,
    ops: Operators,
    rock: ArrayRock,
    cell_map: Option<Vec<Option<usize>>>,
}

impl Discretization {
    pub fn new(
        grid: &dyn Grid,
        rock: &dyn RockProps,
        nnc: &[Nnc],
        config: &ModelConfig,
        gravity: f64,
    ) -> Result<Self, Error> {
        if config.min_pore_volume > 0.0 {
            let res = MinPvProcessor::new(config.min_pore_volume, config.opmfil).process(
                grid,
                rock,
                config.transmissibility,
            )?;
            let mut all_nnc = res.nnc.clone();
            for n in nnc {
                match (res.cell_map.get(n.cell1), res.cell_map.get(n.cell2)) {
                    (Some(&Some(c1)), Some(&Some(c2))) if c1 != c2 => all_nnc.push(Nnc {
                        cell1: c1,
                        cell2: c2,
                        trans: n.trans,
                    }),
                    _ => log::debug!("NNC ({}, {}) dropped by the pore volume cut", n.cell1, n.cell2),
                }
            }
            let geo = DerivedGeology::new(
                &res.grid,
                &res.rock,
                &all_nnc,
                config.transmissibility,
                gravity,
            )?;
            return Ok(Discretization {
                ops: Operators::new(&res.grid, &all_nnc),
                geo,
                rock: res.rock,
                cell_map: Some(res.cell_map),
            });
        }
        let cells: Vec<usize> = (0..grid.num_cells()).collect();
        Ok(Discretization {
            geo: DerivedGeology::new(grid, rock, nnc, config.transmissibility, gravity)?,
            ops: Operators::new(grid, nnc),
            rock: ArrayRock::extract(rock, &cells)?,
            cell_map: None,
        })
    }

    pub fn num_cells(&self) -> usize {
        self.ops.num_cells()
    }

    pub fn geology(&self) -> &DerivedGeology {
        &self.geo
    }

    pub fn operators(&self) -> &Operators {
        &self.ops
    }

    /// Rock of the active cells, for building region-aware properties.
    pub fn rock(&self) -> &ArrayRock {
        &self.rock
    }

    pub fn pore_volume(&self) -> &DVector<f64> {
        self.geo.pore_volume()
    }

    /// Active cell representing cell `c` of the input grid.
    pub fn active_cell(&self, c: usize) -> Option<usize> {
        match &self.cell_map {
            None => (c < self.num_cells()).then_some(c),
            Some(map) => map.get(c).copied().flatten(),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::grid::CartesianGrid;

    #[test]
    fn test_without_collapse() {
        let grid = CartesianGrid::new([3, 1, 1], [1.0, 1.0, 1.0]).unwrap();
        let rock = ArrayRock::uniform(3, 0.25, 1.0e-13).unwrap();
        let disc = Discretization::new(&grid, &rock, &[], &ModelConfig::default(), 0.0).unwrap();
        assert_eq!(disc.num_cells(), 3);
        assert_eq!(disc.operators().num_connections(), 2);
        assert_eq!(disc.active_cell(2), Some(2));
        assert_eq!(disc.active_cell(3), None);
        assert_relative_eq!(disc.pore_volume().sum(), 0.75, max_relative = 1e-12);
    }

    #[test]
    fn test_collapse_keeps_pore_volume() {
        let grid = CartesianGrid::new([1, 1, 3], [1.0, 1.0, 1.0]).unwrap();
        let rock = ArrayRock::new(vec![0.2, 0.001, 0.2], vec![nalgebra::Matrix3::identity() * 1.0e-13; 3])
            .unwrap();
        let config = ModelConfig {
            min_pore_volume: 0.01,
            ..Default::default()
        };
        let disc = Discretization::new(&grid, &rock, &[], &config, 9.81).unwrap();
        assert_eq!(disc.num_cells(), 2);
        assert_eq!(disc.active_cell(1), disc.active_cell(2));
        assert_relative_eq!(disc.pore_volume().sum(), 0.401, max_relative = 1e-12);
    }
}
