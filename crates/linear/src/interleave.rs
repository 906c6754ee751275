//! Permutation between variable-major and cell-major (interleaved) orderings.

use nalgebra::DVector;

use crate::BlockCsrMatrix;

/// Below this ratio of `|a_00|` to the off-diagonal absolute row sum the first equation of a
/// cell is replaced by the sum of all its equations.
pub const WEAK_DIAGONAL_RATIO: f64 = 0.01;

/// `x[e * n + c]` → `y[c * bs + e]`
pub fn interleave_vec(x: &DVector<f64>, n: usize, bs: usize) -> DVector<f64> {
    DVector::from_fn(n * bs, |i, _| x[(i % bs) * n + i / bs])
}

/// `y[c * bs + e]` → `x[e * n + c]`
pub fn deinterleave_vec(y: &DVector<f64>, n: usize, bs: usize) -> DVector<f64> {
    DVector::from_fn(n * bs, |i, _| y[(i % n) * bs + i / n])
}

/// Makes the first equation of every cell with a weak pressure diagonal elliptic by replacing
/// it with the sum of the cell's equations, in both the matrix and the right hand side.
///
/// Returns the number of rows replaced.
pub fn make_first_row_elliptic(a: &mut BlockCsrMatrix, b: &mut DVector<f64>) -> usize {
    let bs = a.block_size();
    if bs < 2 {
        return 0;
    }
    let mut replaced = 0;
    for i in 0..a.num_block_rows() {
        let range = a.row_range(i);
        let diag = a.blocks()[a.diagonal_position(i)][(0, 0)].abs();
        let row_sum: f64 = a.blocks()[range.clone()]
            .iter()
            .map(|blk| blk.row(0).iter().map(|v| v.abs()).sum::<f64>())
            .sum();
        let off = row_sum - diag;
        if off > 0.0 && diag / off < WEAK_DIAGONAL_RATIO {
            for blk in &mut a.blocks_mut()[range] {
                let sum = blk.row_sum();
                blk.set_row(0, &sum);
            }
            b[i * bs] = (0..bs).map(|e| b[i * bs + e]).sum();
            replaced += 1;
        }
    }
    replaced
}
