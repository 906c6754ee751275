//! Pore volumes, transmissibilities and gravity terms derived from grid and rock.

use std::str::FromStr;

use nalgebra::DVector;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{
    grid::{internal_faces, Grid},
    rock::RockProps,
    Error,
};

mod minpv;

pub use minpv::{MinPvProcessor, MinPvResult};

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransmissibilityModel {
    /// `t = |A (K n̂)·d| / |d|²`
    #[default]
    Tpfa,
    /// `t = A K_axis |d·n̂| / |d|²` with the diagonal permeability of the face axis
    Directional,
}

impl FromStr for TransmissibilityModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tpfa" => Ok(TransmissibilityModel::Tpfa),
            "directional" => Ok(TransmissibilityModel::Directional),
            _ => Err(Error::Config(format!(
                "unknown transmissibility model '{s}'"
            ))),
        }
    }
}

/// A non-neighbour connection.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Nnc {
    pub cell1: usize,
    pub cell2: usize,
    pub trans: f64,
}

/// Connections of the flow graph: internal faces in face order, then the NNCs.
pub fn connections(grid: &dyn Grid, nnc: &[Nnc]) -> Vec<(usize, usize)> {
    internal_faces(grid)
        .into_iter()
        .map(|(_, l, r)| (l, r))
        .chain(nnc.iter().map(|n| (n.cell1, n.cell2)))
        .collect()
}

/// Half-transmissibility of cell `c` towards its face `f`.
pub fn half_transmissibility(
    grid: &dyn Grid,
    rock: &dyn RockProps,
    c: usize,
    f: usize,
    model: TransmissibilityModel,
) -> f64 {
    let d = grid.face_centroid(f) - grid.cell_centroid(c);
    let n = grid.face_normal(f);
    let d2 = d.norm_squared();
    if d2 == 0.0 {
        return 0.0;
    }
    let mut k = rock.permeability(c);
    let ntg = rock.ntg(c);
    for j in 0..3 {
        k[(0, j)] *= ntg;
        k[(1, j)] *= ntg;
    }
    match model {
        TransmissibilityModel::Tpfa => (k * n).dot(&d).abs() / d2,
        TransmissibilityModel::Directional => {
            let axis = grid.face_tag(f).axis();
            k[(axis, axis)] * d.dot(&n).abs() / d2
        }
    }
}

fn harmonic(t1: f64, t2: f64) -> f64 {
    if t1 + t2 > 0.0 {
        t1 * t2 / (t1 + t2)
    } else {
        0.0
    }
}

/// Geometric quantities of the discretization that do not change during a run.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedGeology {
    pore_volume: DVector<f64>,
    trans: DVector<f64>,
    gravity_potential: DVector<f64>,
    depth: DVector<f64>,
    gravity: f64,
}

impl DerivedGeology {
    pub fn new(
        grid: &dyn Grid,
        rock: &dyn RockProps,
        nnc: &[Nnc],
        model: TransmissibilityModel,
        gravity: f64,
    ) -> Result<Self, Error> {
        let nc = grid.num_cells();
        if rock.num_cells() != nc {
            return Err(Error::Geology(format!(
                "rock has {} cells, grid has {nc}",
                rock.num_cells()
            )));
        }

        let pore_volume = DVector::from_fn(nc, |c, _| {
            rock.porosity(c) * grid.cell_volume(c) * rock.multpv(c) * rock.ntg(c)
        });
        if let Some(c) = pore_volume.iter().position(|v| !(*v >= 0.0) || !v.is_finite()) {
            return Err(Error::Geology(format!(
                "invalid pore volume {} in cell {c}",
                pore_volume[c]
            )));
        }

        let depth = DVector::from_fn(nc, |c, _| grid.cell_centroid(c)[2]);

        let faces = internal_faces(grid);
        let mut trans = Vec::with_capacity(faces.len() + nnc.len());
        let mut gpot = Vec::with_capacity(faces.len() + nnc.len());
        for &(f, l, r) in &faces {
            let tl = half_transmissibility(grid, rock, l, f, model);
            let tr = half_transmissibility(grid, rock, r, f, model);
            trans.push(harmonic(tl, tr) * rock.trans_mult(l, grid.face_tag(f)));
            gpot.push(gravity * (depth[l] - depth[r]));
        }
        for n in nnc {
            if n.cell1 >= nc || n.cell2 >= nc {
                return Err(Error::Geology(format!(
                    "NNC ({}, {}) refers to a missing cell",
                    n.cell1, n.cell2
                )));
            }
            trans.push(n.trans);
            gpot.push(gravity * (depth[n.cell1] - depth[n.cell2]));
        }
        if let Some(i) = trans.iter().position(|t| !(*t >= 0.0) || !t.is_finite()) {
            return Err(Error::Geology(format!(
                "invalid transmissibility {} on connection {i}",
                trans[i]
            )));
        }

        Ok(DerivedGeology {
            pore_volume,
            trans: DVector::from_vec(trans),
            gravity_potential: DVector::from_vec(gpot),
            depth,
            gravity,
        })
    }

    pub fn pore_volume(&self) -> &DVector<f64> {
        &self.pore_volume
    }

    /// Transmissibility per connection.
    pub fn transmissibility(&self) -> &DVector<f64> {
        &self.trans
    }

    /// `g (z_L − z_R)` per connection.
    pub fn gravity_potential(&self) -> &DVector<f64> {
        &self.gravity_potential
    }

    /// Cell centroid depths.
    pub fn depth(&self) -> &DVector<f64> {
        &self.depth
    }

    pub fn gravity(&self) -> f64 {
        self.gravity
    }
}
