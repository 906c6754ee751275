use std::collections::BTreeMap;

use super::{half_transmissibility, harmonic, Nnc, TransmissibilityModel};
use crate::{
    grid::{CollapsedGrid, Grid},
    rock::{ArrayRock, RockProps},
    Error,
};

/// Removes cells whose pore volume is below a threshold, column by column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MinPvProcessor {
    pub min_pore_volume: f64,
    /// merge small cells into the next active cell below instead of pinching them out
    pub opmfil: bool,
}

#[derive(Clone, Debug)]
pub struct MinPvResult {
    pub grid: CollapsedGrid,
    pub rock: ArrayRock,
    /// vertical connections across pinched-out runs
    pub nnc: Vec<Nnc>,
    /// active cell of every parent cell
    pub cell_map: Vec<Option<usize>>,
}

fn pore_volume(grid: &dyn Grid, rock: &dyn RockProps, c: usize) -> f64 {
    rock.porosity(c) * grid.cell_volume(c) * rock.multpv(c) * rock.ntg(c)
}

/// Face shared by `upper` and `lower`.
fn shared_face(grid: &dyn Grid, upper: usize, lower: usize) -> Option<usize> {
    grid.cell_faces(upper).into_iter().find(|&f| {
        let (l, r) = grid.face_cells(f);
        (l == Some(upper) && r == Some(lower)) || (l == Some(lower) && r == Some(upper))
    })
}

impl MinPvProcessor {
    pub fn new(min_pore_volume: f64, opmfil: bool) -> Self {
        MinPvProcessor {
            min_pore_volume,
            opmfil,
        }
    }

    pub fn process(
        &self,
        grid: &dyn Grid,
        rock: &dyn RockProps,
        model: TransmissibilityModel,
    ) -> Result<MinPvResult, Error> {
        let nc = grid.num_cells();
        if grid.cartesian_dims().is_none() {
            return Err(Error::Geology(
                "minimum pore volume processing needs a Cartesian index".into(),
            ));
        }
        let mut columns: BTreeMap<(usize, usize), Vec<(usize, usize)>> = BTreeMap::new();
        for c in 0..nc {
            let [i, j, k] = grid.cartesian_index(c).ok_or_else(|| {
                Error::Geology(format!("cell {c} has no Cartesian index"))
            })?;
            columns.entry((i, j)).or_default().push((k, c));
        }

        let pv: Vec<f64> = (0..nc).map(|c| pore_volume(grid, rock, c)).collect();
        let active: Vec<bool> = pv.iter().map(|&v| v >= self.min_pore_volume).collect();

        // parent cell each cell is merged into
        let mut target: Vec<Option<usize>> = (0..nc).map(|c| active[c].then_some(c)).collect();
        let mut pinched = Vec::new();
        for cells in columns.values_mut() {
            cells.sort_unstable();
            let mut pending: Vec<usize> = Vec::new();
            let mut above: Option<usize> = None;
            for &(_, c) in cells.iter() {
                if !active[c] {
                    pending.push(c);
                    continue;
                }
                if !pending.is_empty() {
                    if self.opmfil {
                        for &p in &pending {
                            target[p] = Some(c);
                        }
                    } else if let Some(a) = above {
                        pinched.push((a, pending[0], pending[pending.len() - 1], c));
                    }
                    pending.clear();
                }
                above = Some(c);
            }
            if self.opmfil {
                if let Some(a) = above {
                    for &p in &pending {
                        target[p] = Some(a);
                    }
                }
            }
        }

        let receivers: Vec<usize> = (0..nc).filter(|&c| active[c]).collect();
        let mut index = vec![None; nc];
        for (a, &c) in receivers.iter().enumerate() {
            index[c] = Some(a);
        }
        let cell_map: Vec<Option<usize>> = target.iter().map(|t| t.and_then(|c| index[c])).collect();
        let dropped = cell_map.iter().filter(|m| m.is_none()).count();
        if dropped > 0 {
            log::debug!(
                "minimum pore volume {:.3e}: {} of {nc} cells inactive, {} merged",
                self.min_pore_volume,
                dropped,
                nc - receivers.len() - dropped
            );
        }

        let collapsed = CollapsedGrid::new(grid, &cell_map, &receivers)?;
        let mut new_rock = ArrayRock::extract(rock, &receivers)?;

        // merged groups: pore volume summed, NTG volume weighted
        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); receivers.len()];
        for (c, m) in cell_map.iter().enumerate() {
            if let Some(a) = m {
                groups[*a].push(c);
            }
        }
        for (a, group) in groups.iter().enumerate() {
            if group.len() < 2 {
                continue;
            }
            let volume: f64 = group.iter().map(|&c| grid.cell_volume(c)).sum();
            let pv_sum: f64 = group.iter().map(|&c| pv[c]).sum();
            let ntg = group
                .iter()
                .map(|&c| grid.cell_volume(c) * rock.ntg(c))
                .sum::<f64>()
                / volume;
            new_rock.set_ntg(a, ntg);
            new_rock.set_multpv(a, 1.0);
            let denom = volume * ntg;
            new_rock.set_porosity(a, if denom > 0.0 { pv_sum / denom } else { 0.0 });
        }

        let mut nnc = Vec::with_capacity(pinched.len());
        for (upper, first, last, lower) in pinched {
            let (Some(f_up), Some(f_low)) =
                (shared_face(grid, upper, first), shared_face(grid, last, lower))
            else {
                continue;
            };
            let t_up = half_transmissibility(grid, rock, upper, f_up, model);
            let t_low = half_transmissibility(grid, rock, lower, f_low, model);
            if let (Some(c1), Some(c2)) = (index[upper], index[lower]) {
                nnc.push(Nnc {
                    cell1: c1,
                    cell2: c2,
                    trans: harmonic(t_up, t_low),
                });
            }
        }

        Ok(MinPvResult {
            grid: collapsed,
            rock: new_rock,
            nnc,
            cell_map,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{geology::DerivedGeology, grid::CartesianGrid};

    fn column_rock() -> ArrayRock {
        // layer 1 and 2 of every column are thin
        let poro = (0..8)
            .map(|c| if (c / 2) % 4 == 1 || (c / 2) % 4 == 2 { 0.001 } else { 0.2 })
            .collect();
        ArrayRock::new(poro, vec![nalgebra::Matrix3::identity(); 8])
            .unwrap()
            .with_ntg((0..8).map(|c| 0.5 + 0.1 * c as f64).collect())
            .unwrap()
    }

    #[test]
    fn test_merge_conserves_pore_volume() {
        let grid = CartesianGrid::new([2, 1, 4], [1.0, 1.0, 1.0]).unwrap();
        let rock = column_rock();
        let total: f64 = (0..8).map(|c| pore_volume(&grid, &rock, c)).sum();

        let res = MinPvProcessor::new(0.01, true)
            .process(&grid, &rock, TransmissibilityModel::Tpfa)
            .unwrap();
        assert_eq!(res.grid.num_cells(), 4);
        assert!(res.nnc.is_empty());
        // the thin cells of layers 1 and 2 go to layer 3
        assert_eq!(res.cell_map[2], res.cell_map[6]);
        assert_eq!(res.cell_map[4], res.cell_map[6]);

        let geo = DerivedGeology::new(
            &res.grid,
            &res.rock,
            &res.nnc,
            TransmissibilityModel::Tpfa,
            0.0,
        )
        .unwrap();
        let after: f64 = geo.pore_volume().sum();
        assert_relative_eq!(after, total, max_relative = 1e-12);

        // NTG of the merged cell is the volume weighted average
        let a = res.cell_map[6].unwrap();
        assert_relative_eq!(res.rock.ntg(a), (0.7 + 0.9 + 1.1) / 3.0, max_relative = 1e-12);
    }

    #[test]
    fn test_pinch_adds_nnc() {
        let grid = CartesianGrid::new([2, 1, 4], [1.0, 1.0, 1.0]).unwrap();
        let rock = column_rock();
        let res = MinPvProcessor::new(0.01, false)
            .process(&grid, &rock, TransmissibilityModel::Tpfa)
            .unwrap();
        assert_eq!(res.grid.num_cells(), 4);
        assert_eq!(res.nnc.len(), 2);
        assert!(res.cell_map[2].is_none());
        let n = res.nnc[0];
        assert_eq!((n.cell1, n.cell2), (res.cell_map[0].unwrap(), res.cell_map[6].unwrap()));
        // unit cubes, unit vertical permeability: both half transmissibilities are 2
        assert_relative_eq!(n.trans, 1.0, max_relative = 1e-12);
    }

    #[test]
    fn test_collapsed_grid_can_be_processed_again() {
        let parent = CartesianGrid::new([1, 1, 2], [1.0, 1.0, 1.0]).unwrap();
        let rock = ArrayRock::uniform(2, 0.2, 1.0).unwrap();
        let collapsed = CollapsedGrid::new(&parent, &[Some(0), Some(1)], &[0, 1]).unwrap();
        // the collapsed grid keeps the Cartesian index of its parent
        assert!(MinPvProcessor::new(0.0, true)
            .process(&collapsed, &rock, TransmissibilityModel::Tpfa)
            .is_ok());
    }
}
