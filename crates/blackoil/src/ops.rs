//! Discrete differential operators on the connection graph and upwind selection.

use ad::{AdMatrix, AutoDiffBlock};
use nalgebra::DVector;

use crate::{
    geology::{connections, Nnc},
    grid::Grid,
    Error,
};

/// Sparse operators built once from the grid topology.
///
/// Rows of `ngrad`, `grad` and `caver` are the connections: internal faces in face order, then
/// the NNCs. `fullngrad` and `fulldiv` cover every grid face including the boundary.
#[derive(Clone, Debug)]
pub struct Operators {
    num_cells: usize,
    connections: Vec<(usize, usize)>,
    pub ngrad: AdMatrix,
    pub grad: AdMatrix,
    pub caver: AdMatrix,
    pub div: AdMatrix,
    pub fullngrad: AdMatrix,
    pub fulldiv: AdMatrix,
}

impl Operators {
    pub fn new(grid: &dyn Grid, nnc: &[Nnc]) -> Self {
        let nc = grid.num_cells();
        let conns = connections(grid, nnc);
        let ni = conns.len();

        let mut ng = Vec::with_capacity(2 * ni);
        let mut av = Vec::with_capacity(2 * ni);
        for (f, &(l, r)) in conns.iter().enumerate() {
            ng.push((f, l, 1.0));
            ng.push((f, r, -1.0));
            av.push((f, l, 0.5));
            av.push((f, r, 0.5));
        }
        let ngrad = AdMatrix::from_triplets(ni, nc, &ng);

        let nf = grid.num_faces();
        let mut full = Vec::with_capacity(2 * nf);
        for f in 0..nf {
            let (l, r) = grid.face_cells(f);
            if let Some(l) = l {
                full.push((f, l, 1.0));
            }
            if let Some(r) = r {
                full.push((f, r, -1.0));
            }
        }
        let fullngrad = AdMatrix::from_triplets(nf, nc, &full);

        Operators {
            num_cells: nc,
            connections: conns,
            grad: ngrad.scale(-1.0),
            caver: AdMatrix::from_triplets(ni, nc, &av),
            div: ngrad.transpose(),
            fulldiv: fullngrad.transpose(),
            ngrad,
            fullngrad,
        }
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    /// `(L, R)` of every connection.
    pub fn connections(&self) -> &[(usize, usize)] {
        &self.connections
    }
}

/// Picks the upstream cell value for every connection.
#[derive(Clone, Debug)]
pub struct UpwindSelector {
    select: AdMatrix,
    upstream: Vec<usize>,
}

impl UpwindSelector {
    /// Upstream is `L` where `flux >= 0`, `R` otherwise.
    pub fn new(ops: &Operators, flux: &DVector<f64>) -> Result<Self, Error> {
        if flux.len() != ops.num_connections() {
            return Err(ad::Error::ShapeMismatch {
                op: "upwind",
                lhs: (ops.num_connections(), 1),
                rhs: (flux.len(), 1),
            }
            .into());
        }
        let left: Vec<bool> = flux.iter().map(|&v| v >= 0.0).collect();
        Ok(Self::from_directions(ops, &left))
    }

    /// `left[f]` selects `L` on connection `f`.
    pub fn from_directions(ops: &Operators, left: &[bool]) -> Self {
        let upstream: Vec<usize> = ops
            .connections()
            .iter()
            .zip(left)
            .map(|(&(l, r), &from_left)| if from_left { l } else { r })
            .collect();
        let triplets: Vec<(usize, usize, f64)> = upstream
            .iter()
            .enumerate()
            .map(|(f, &c)| (f, c, 1.0))
            .collect();
        UpwindSelector {
            select: AdMatrix::from_triplets(upstream.len(), ops.num_cells(), &triplets),
            upstream,
        }
    }

    pub fn select(&self, x: &AutoDiffBlock) -> Result<AutoDiffBlock, Error> {
        Ok(x.try_left_mul(&self.select)?)
    }

    pub fn select_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(self.upstream.len(), self.upstream.iter().map(|&c| x[c]))
    }

    pub fn matrix(&self) -> &AdMatrix {
        &self.select
    }

    pub fn upstream_cells(&self) -> &[usize] {
        &self.upstream
    }
}

/// Upstream direction of every phase on one connection, accounting for counter-current flow.
///
/// `head_diff[p]` is the potential difference `L − R` of phase `p`, `mob_l`/`mob_r` the phase
/// mobilities of the two cells and `flux` the total flux from `L` to `R`. Returns `true` where
/// `L` is upstream. (Brenier and Jaffré, SIAM J. Numer. Anal. 28(3), 1991.)
pub fn connection_multiphase_upwind(
    head_diff: &[f64],
    mob_l: &[f64],
    mob_r: &[f64],
    trans: f64,
    flux: f64,
) -> Vec<bool> {
    let np = head_diff.len();
    let mut order: Vec<usize> = (0..np).collect();
    order.sort_by(|&a, &b| head_diff[a].total_cmp(&head_diff[b]));

    let mut upw = vec![true; np];
    for (ii, &ix) in order.iter().enumerate() {
        let mut theta = flux;
        for (j, &jx) in order.iter().enumerate() {
            if j < ii {
                theta += trans * (head_diff[ix] - head_diff[jx]) * mob_l[jx];
            } else if j > ii {
                theta += trans * (head_diff[ix] - head_diff[jx]) * mob_r[jx];
            }
        }
        if theta < 0.0 {
            upw[ix] = false;
        }
    }
    upw
}

/// One selector per phase from the multiphase upwind rule.
///
/// `head[p]` holds the potential differences per connection (without transmissibility) and
/// `mob[p]` the cell mobilities of phase `p`.
pub fn multiphase_selectors(
    ops: &Operators,
    head: &[DVector<f64>],
    mob: &[DVector<f64>],
    trans: &DVector<f64>,
) -> Result<Vec<UpwindSelector>, Error> {
    let np = head.len();
    if mob.len() != np {
        return Err(ad::Error::BlockPattern {
            lhs: np,
            rhs: mob.len(),
        }
        .into());
    }
    let conns = ops.connections();
    let mut left = vec![vec![true; conns.len()]; np];
    let mut dh = vec![0.0; np];
    let mut ml = vec![0.0; np];
    let mut mr = vec![0.0; np];
    for (f, &(l, r)) in conns.iter().enumerate() {
        let mut flux = 0.0;
        for p in 0..np {
            dh[p] = head[p][f];
            ml[p] = mob[p][l];
            mr[p] = mob[p][r];
            let up = if dh[p] >= 0.0 { ml[p] } else { mr[p] };
            flux += trans[f] * up * dh[p];
        }
        let upw = connection_multiphase_upwind(&dh, &ml, &mr, trans[f], flux);
        for p in 0..np {
            left[p][f] = upw[p];
        }
    }
    Ok(left
        .iter()
        .map(|l| UpwindSelector::from_directions(ops, l))
        .collect())
}
