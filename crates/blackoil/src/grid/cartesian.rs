use nalgebra::Vector3;

use super::{FaceTag, Grid};
use crate::Error;

/// Uniform `nx × ny × nz` box. Cells are numbered `i + nx (j + ny k)`; faces are numbered X faces
/// first, then Y, then Z, each block ordered like the cells with the face axis index running
/// over `0..=n`.
#[derive(Clone, Debug, PartialEq)]
pub struct CartesianGrid {
    dims: [usize; 3],
    spacing: [f64; 3],
    /// depth of the top of layer 0
    top: f64,
}

impl CartesianGrid {
    pub fn new(dims: [usize; 3], spacing: [f64; 3]) -> Result<Self, Error> {
        Self::with_top(dims, spacing, 0.0)
    }

    pub fn with_top(dims: [usize; 3], spacing: [f64; 3], top: f64) -> Result<Self, Error> {
        if dims.iter().any(|&n| n == 0) {
            return Err(Error::Geology(format!("empty grid dimensions {dims:?}")));
        }
        if spacing.iter().any(|&h| h <= 0.0 || !h.is_finite()) {
            return Err(Error::Geology(format!("invalid cell size {spacing:?}")));
        }
        Ok(CartesianGrid { dims, spacing, top })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn cell_index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    fn ijk(&self, c: usize) -> [usize; 3] {
        let [nx, ny, _] = self.dims;
        [c % nx, (c / nx) % ny, c / (nx * ny)]
    }

    /// Number of faces normal to each axis.
    fn faces_per_axis(&self, axis: usize) -> usize {
        let mut d = self.dims;
        d[axis] += 1;
        d[0] * d[1] * d[2]
    }

    fn face_offset(&self, axis: usize) -> usize {
        (0..axis).map(|a| self.faces_per_axis(a)).sum()
    }

    fn face_index(&self, axis: usize, ijk: [usize; 3]) -> usize {
        let mut d = self.dims;
        d[axis] += 1;
        self.face_offset(axis) + ijk[0] + d[0] * (ijk[1] + d[1] * ijk[2])
    }

    /// Axis and face-lattice index of face `f`.
    fn face_ijk(&self, f: usize) -> (usize, [usize; 3]) {
        let mut rem = f;
        let mut axis = 0;
        while axis < 2 && rem >= self.faces_per_axis(axis) {
            rem -= self.faces_per_axis(axis);
            axis += 1;
        }
        let mut d = self.dims;
        d[axis] += 1;
        (axis, [rem % d[0], (rem / d[0]) % d[1], rem / (d[0] * d[1])])
    }
}

impl Grid for CartesianGrid {
    fn num_cells(&self) -> usize {
        self.dims.iter().product()
    }

    fn num_faces(&self) -> usize {
        (0..3).map(|a| self.faces_per_axis(a)).sum()
    }

    fn face_cells(&self, f: usize) -> (Option<usize>, Option<usize>) {
        let (axis, ijk) = self.face_ijk(f);
        let left = (ijk[axis] > 0).then(|| {
            let mut c = ijk;
            c[axis] -= 1;
            self.cell_index(c[0], c[1], c[2])
        });
        let right = (ijk[axis] < self.dims[axis]).then(|| self.cell_index(ijk[0], ijk[1], ijk[2]));
        (left, right)
    }

    fn cell_volume(&self, _c: usize) -> f64 {
        self.spacing.iter().product()
    }

    fn face_area(&self, f: usize) -> f64 {
        let (axis, _) = self.face_ijk(f);
        self.spacing[(axis + 1) % 3] * self.spacing[(axis + 2) % 3]
    }

    fn face_centroid(&self, f: usize) -> Vector3<f64> {
        let (axis, ijk) = self.face_ijk(f);
        let mut x = Vector3::zeros();
        for a in 0..3 {
            let offset = if a == axis { 0.0 } else { 0.5 };
            x[a] = (ijk[a] as f64 + offset) * self.spacing[a];
        }
        x[2] += self.top;
        x
    }

    fn cell_centroid(&self, c: usize) -> Vector3<f64> {
        let ijk = self.ijk(c);
        Vector3::new(
            (ijk[0] as f64 + 0.5) * self.spacing[0],
            (ijk[1] as f64 + 0.5) * self.spacing[1],
            self.top + (ijk[2] as f64 + 0.5) * self.spacing[2],
        )
    }

    fn face_normal(&self, f: usize) -> Vector3<f64> {
        let (axis, _) = self.face_ijk(f);
        let mut n = Vector3::zeros();
        n[axis] = self.face_area(f);
        n
    }

    fn cell_faces(&self, c: usize) -> Vec<usize> {
        let ijk = self.ijk(c);
        let mut faces = Vec::with_capacity(6);
        for axis in 0..3 {
            faces.push(self.face_index(axis, ijk));
            let mut up = ijk;
            up[axis] += 1;
            faces.push(self.face_index(axis, up));
        }
        faces
    }

    fn face_tag(&self, f: usize) -> FaceTag {
        let (axis, ijk) = self.face_ijk(f);
        FaceTag::from_axis(axis, ijk[axis] > 0)
    }

    fn cartesian_dims(&self) -> Option<[usize; 3]> {
        Some(self.dims)
    }

    fn cartesian_index(&self, c: usize) -> Option<[usize; 3]> {
        Some(self.ijk(c))
    }
}
