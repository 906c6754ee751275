//! Grid topology and geometry as consumed by the simulator.

use nalgebra::Vector3;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

mod cartesian;
mod collapsed;

pub use cartesian::CartesianGrid;
pub use collapsed::CollapsedGrid;

/// Orientation of a face as seen from its left cell (boundary faces without a left cell carry
/// the minus tag of their axis).
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaceTag {
    XMinus,
    XPlus,
    YMinus,
    YPlus,
    ZMinus,
    ZPlus,
}

impl FaceTag {
    /// 0 for X, 1 for Y, 2 for Z.
    pub fn axis(self) -> usize {
        match self {
            FaceTag::XMinus | FaceTag::XPlus => 0,
            FaceTag::YMinus | FaceTag::YPlus => 1,
            FaceTag::ZMinus | FaceTag::ZPlus => 2,
        }
    }

    pub fn from_axis(axis: usize, plus: bool) -> FaceTag {
        match (axis, plus) {
            (0, false) => FaceTag::XMinus,
            (0, true) => FaceTag::XPlus,
            (1, false) => FaceTag::YMinus,
            (1, true) => FaceTag::YPlus,
            (_, false) => FaceTag::ZMinus,
            (_, true) => FaceTag::ZPlus,
        }
    }
}

/// Cell-centered grid. Depth (the third coordinate) increases downwards.
pub trait Grid: Send + Sync {
    fn num_cells(&self) -> usize;

    fn num_faces(&self) -> usize;

    /// Ordered neighbours `(L, R)` of face `f`; `None` marks the boundary.
    fn face_cells(&self, f: usize) -> (Option<usize>, Option<usize>);

    fn cell_volume(&self, c: usize) -> f64;

    fn face_area(&self, f: usize) -> f64;

    fn face_centroid(&self, f: usize) -> Vector3<f64>;

    fn cell_centroid(&self, c: usize) -> Vector3<f64>;

    /// Area-weighted normal, oriented from `L` to `R`.
    fn face_normal(&self, f: usize) -> Vector3<f64>;

    fn cell_faces(&self, c: usize) -> Vec<usize>;

    fn face_tag(&self, f: usize) -> FaceTag;

    fn cartesian_dims(&self) -> Option<[usize; 3]> {
        None
    }

    fn cartesian_index(&self, _c: usize) -> Option<[usize; 3]> {
        None
    }
}

/// Faces with two neighbours, as `(face, L, R)` in face order.
pub fn internal_faces(grid: &dyn Grid) -> Vec<(usize, usize, usize)> {
    (0..grid.num_faces())
        .filter_map(|f| match grid.face_cells(f) {
            (Some(l), Some(r)) => Some((f, l, r)),
            _ => None,
        })
        .collect()
}
