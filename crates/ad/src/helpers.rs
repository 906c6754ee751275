//! Row selection, embedding and concatenation of AD expressions.

use nalgebra::DVector;
use nalgebra_sparse::csr::CsrMatrix;

use crate::{AdMatrix, AutoDiffBlock, Error};

/// The `idx.len() × n` matrix picking rows `idx` out of a length-`n` vector.
pub fn selection_matrix(idx: &[usize], n: usize) -> Result<CsrMatrix<f64>, Error> {
    if let Some(&index) = idx.iter().find(|&&i| i >= n) {
        return Err(Error::IndexOutOfRange { index, len: n });
    }
    CsrMatrix::try_from_csr_data(
        idx.len(),
        n,
        (0..=idx.len()).collect(),
        idx.to_vec(),
        vec![1.0; idx.len()],
    )
    .map_err(Error::from)
}

/// A sparse diagonal block.
pub fn spdiag(d: &DVector<f64>) -> AdMatrix {
    AdMatrix::from_diagonal(d.clone())
}

/// Rows `idx` of `x`.
pub fn subset(x: &AutoDiffBlock, idx: &[usize]) -> Result<AutoDiffBlock, Error> {
    let sel = AdMatrix::from_csr(selection_matrix(idx, x.size())?);
    x.try_left_mul(&sel)
}

/// Embeds `x` into rows `idx` of a zero expression of length `n`.
pub fn superset(x: &AutoDiffBlock, idx: &[usize], n: usize) -> Result<AutoDiffBlock, Error> {
    if idx.len() != x.size() {
        return Err(Error::shape("superset", (x.size(), 1), (idx.len(), 1)));
    }
    let emb = AdMatrix::from_csr(selection_matrix(idx, n)?.transpose());
    x.try_left_mul(&emb)
}

pub fn subset_vec(x: &DVector<f64>, idx: &[usize]) -> DVector<f64> {
    DVector::from_iterator(idx.len(), idx.iter().map(|&i| x[i]))
}

pub fn superset_vec(x: &DVector<f64>, idx: &[usize], n: usize) -> DVector<f64> {
    let mut out = DVector::zeros(n);
    for (k, &i) in idx.iter().enumerate() {
        out[i] += x[k];
    }
    out
}

/// Stacks `a` on top of `b`.
pub fn vertcat(a: &AutoDiffBlock, b: &AutoDiffBlock) -> Result<AutoDiffBlock, Error> {
    vertcat_all(&[a, b])
}

/// Stacks several expressions sharing a block pattern.
pub fn vertcat_all(parts: &[&AutoDiffBlock]) -> Result<AutoDiffBlock, Error> {
    let n: usize = parts.iter().map(|p| p.size()).sum();
    let val = DVector::from_iterator(n, parts.iter().flat_map(|p| p.value().iter().copied()));

    let pattern = parts
        .iter()
        .find(|p| p.num_blocks() > 0)
        .map(|p| p.block_pattern())
        .unwrap_or_default();
    if let Some(p) = parts
        .iter()
        .find(|p| p.num_blocks() > 0 && p.num_blocks() != pattern.len())
    {
        return Err(Error::BlockPattern {
            lhs: pattern.len(),
            rhs: p.num_blocks(),
        });
    }

    let mut jac = Vec::with_capacity(pattern.len());
    for (b, &cols) in pattern.iter().enumerate() {
        let zeros: Vec<AdMatrix> = parts
            .iter()
            .map(|p| AdMatrix::zeros(p.size(), cols))
            .collect();
        let blocks: Vec<&AdMatrix> = parts
            .iter()
            .zip(zeros.iter())
            .map(|(p, z)| p.derivative().get(b).unwrap_or(z))
            .collect();
        jac.push(AdMatrix::vstack(&blocks)?);
    }
    AutoDiffBlock::function(val, jac)
}

/// The full Jacobian of `x`, columns ordered as the concatenated primary variables.
pub fn collapse_jacs(x: &AutoDiffBlock) -> Result<CsrMatrix<f64>, Error> {
    x.collapse_jacs()
}

/// Cellwise choice `mask ? a : b`, differentiable in both branches.
pub fn select(mask: &[bool], a: &AutoDiffBlock, b: &AutoDiffBlock) -> Result<AutoDiffBlock, Error> {
    let m = DVector::from_iterator(mask.len(), mask.iter().map(|&t| if t { 1.0 } else { 0.0 }));
    let not_m = m.map(|v| 1.0 - v);
    a.try_mul_const(&m)?.try_add(&b.try_mul_const(&not_m)?)
}
