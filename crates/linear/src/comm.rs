use nalgebra::DVector;

/// Global reductions over a partitioned domain.
///
/// Every process works on its local cells; cells it does not own (ghosts) are excluded from
/// reductions by the owner mask.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn sum(&self, local: f64) -> f64;

    fn max(&self, local: f64) -> f64;

    /// `true` for every local cell owned by this process.
    fn owner_mask(&self) -> &[bool];

    /// Elementwise global sum.
    fn sum_all(&self, local: &mut [f64]) {
        for v in local.iter_mut() {
            *v = self.sum(*v);
        }
    }

    /// Elementwise global maximum.
    fn max_all(&self, local: &mut [f64]) {
        for v in local.iter_mut() {
            *v = self.max(*v);
        }
    }

    /// Copies owned values to the overlap copies held by neighbouring processes. `block` is the
    /// number of unknowns per cell.
    fn copy_owner_to_all(&self, _x: &mut DVector<f64>, _block: usize) {}

    /// Global dot product over owned cells, `block` unknowns per cell.
    fn dot(&self, x: &DVector<f64>, y: &DVector<f64>, block: usize) -> f64 {
        let mask = self.owner_mask();
        let local = x
            .iter()
            .zip(y.iter())
            .enumerate()
            .filter(|(i, _)| mask.get(i / block).copied().unwrap_or(true))
            .map(|(_, (a, b))| a * b)
            .sum();
        self.sum(local)
    }

    fn norm(&self, x: &DVector<f64>, block: usize) -> f64 {
        self.dot(x, x, block).sqrt()
    }
}

/// A single process owning every cell.
#[derive(Clone, Debug)]
pub struct SerialCommunicator {
    mask: Vec<bool>,
}

impl SerialCommunicator {
    pub fn new(num_cells: usize) -> Self {
        SerialCommunicator {
            mask: vec![true; num_cells],
        }
    }
}

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum(&self, local: f64) -> f64 {
        local
    }

    fn max(&self, local: f64) -> f64 {
        local
    }

    fn owner_mask(&self) -> &[bool] {
        &self.mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Masked(Vec<bool>);

    impl Communicator for Masked {
        fn rank(&self) -> usize {
            0
        }
        fn size(&self) -> usize {
            1
        }
        fn sum(&self, local: f64) -> f64 {
            local
        }
        fn max(&self, local: f64) -> f64 {
            local
        }
        fn owner_mask(&self) -> &[bool] {
            &self.0
        }
    }

    #[test]
    fn test_dot_skips_ghosts() {
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(SerialCommunicator::new(2).dot(&x, &x, 2), 30.0);
        assert_eq!(Masked(vec![true, false]).dot(&x, &x, 2), 5.0);
    }
}
