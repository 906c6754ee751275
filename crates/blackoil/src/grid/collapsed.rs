use nalgebra::Vector3;

use super::{FaceTag, Grid};
use crate::Error;

#[derive(Clone, Debug, PartialEq)]
struct Face {
    cells: (Option<usize>, Option<usize>),
    area: f64,
    centroid: Vector3<f64>,
    normal: Vector3<f64>,
    tag: FaceTag,
}

#[derive(Clone, Debug, PartialEq)]
struct Cell {
    volume: f64,
    centroid: Vector3<f64>,
    /// original cell that receives the merged cells
    global: usize,
    faces: Vec<usize>,
}

/// A grid with some cells of a parent grid removed or merged into a neighbour.
///
/// Geometry is copied out of the parent, so the collapsed grid does not borrow it. Faces between
/// cells merged into the same active cell disappear; faces towards removed cells become boundary
/// faces.
#[derive(Clone, Debug, PartialEq)]
pub struct CollapsedGrid {
    cells: Vec<Cell>,
    faces: Vec<Face>,
    dims: Option<[usize; 3]>,
    cart: Vec<Option<[usize; 3]>>,
}

impl CollapsedGrid {
    /// `cell_map[c]` is the active cell that parent cell `c` belongs to, `None` when removed.
    /// `receivers[a]` is the parent cell whose properties active cell `a` keeps.
    pub fn new(
        parent: &dyn Grid,
        cell_map: &[Option<usize>],
        receivers: &[usize],
    ) -> Result<Self, Error> {
        if cell_map.len() != parent.num_cells() {
            return Err(Error::Geology(format!(
                "cell map has {} entries for {} cells",
                cell_map.len(),
                parent.num_cells()
            )));
        }
        let num_active = receivers.len();
        if let Some(a) = cell_map.iter().flatten().find(|&&a| a >= num_active) {
            return Err(Error::Geology(format!(
                "active index {a} out of range {num_active}"
            )));
        }

        let mut volume = vec![0.0; num_active];
        let mut moment = vec![Vector3::zeros(); num_active];
        for (c, a) in cell_map.iter().enumerate() {
            if let Some(a) = *a {
                let v = parent.cell_volume(c);
                volume[a] += v;
                moment[a] += parent.cell_centroid(c) * v;
            }
        }

        let mut cells: Vec<Cell> = receivers
            .iter()
            .enumerate()
            .map(|(a, &g)| Cell {
                volume: volume[a],
                centroid: if volume[a] > 0.0 {
                    moment[a] / volume[a]
                } else {
                    parent.cell_centroid(g)
                },
                global: g,
                faces: Vec::new(),
            })
            .collect();

        let mut faces = Vec::new();
        for f in 0..parent.num_faces() {
            let (l, r) = parent.face_cells(f);
            let ml = l.and_then(|c| cell_map[c]);
            let mr = r.and_then(|c| cell_map[c]);
            let keep = match (ml, mr) {
                (None, None) => false,
                (Some(a), Some(b)) => a != b,
                _ => true,
            };
            if !keep {
                continue;
            }
            let idx = faces.len();
            for a in [ml, mr].into_iter().flatten() {
                cells[a].faces.push(idx);
            }
            faces.push(Face {
                cells: (ml, mr),
                area: parent.face_area(f),
                centroid: parent.face_centroid(f),
                normal: parent.face_normal(f),
                tag: parent.face_tag(f),
            });
        }

        let cart = receivers.iter().map(|&g| parent.cartesian_index(g)).collect();
        Ok(CollapsedGrid {
            cells,
            faces,
            dims: parent.cartesian_dims(),
            cart,
        })
    }

    /// Parent cell that active cell `c` stands for.
    pub fn global_cell(&self, c: usize) -> usize {
        self.cells[c].global
    }
}

impl Grid for CollapsedGrid {
    fn num_cells(&self) -> usize {
        self.cells.len()
    }

    fn num_faces(&self) -> usize {
        self.faces.len()
    }

    fn face_cells(&self, f: usize) -> (Option<usize>, Option<usize>) {
        self.faces[f].cells
    }

    fn cell_volume(&self, c: usize) -> f64 {
        self.cells[c].volume
    }

    fn face_area(&self, f: usize) -> f64 {
        self.faces[f].area
    }

    fn face_centroid(&self, f: usize) -> Vector3<f64> {
        self.faces[f].centroid
    }

    fn cell_centroid(&self, c: usize) -> Vector3<f64> {
        self.cells[c].centroid
    }

    fn face_normal(&self, f: usize) -> Vector3<f64> {
        self.faces[f].normal
    }

    fn cell_faces(&self, c: usize) -> Vec<usize> {
        self.cells[c].faces.clone()
    }

    fn face_tag(&self, f: usize) -> FaceTag {
        self.faces[f].tag
    }

    fn cartesian_dims(&self) -> Option<[usize; 3]> {
        self.dims
    }

    fn cartesian_index(&self, c: usize) -> Option<[usize; 3]> {
        self.cart[c]
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::grid::{internal_faces, CartesianGrid};

    #[test]
    fn test_merge_column() {
        // one column of three cells; the middle one merged into the bottom one
        let parent = CartesianGrid::new([1, 1, 3], [1.0, 1.0, 1.0]).unwrap();
        let g = CollapsedGrid::new(&parent, &[Some(0), Some(1), Some(1)], &[0, 2]).unwrap();
        assert_eq!(g.num_cells(), 2);
        assert_relative_eq!(g.cell_volume(1), 2.0, max_relative = 1e-12);
        assert_relative_eq!(g.cell_centroid(1)[2], 2.0, max_relative = 1e-12);
        assert_eq!(internal_faces(&g).len(), 1);
        assert_eq!(g.global_cell(1), 2);
        assert_eq!(g.cartesian_index(1), Some([0, 0, 2]));
    }

    #[test]
    fn test_removed_cell_leaves_boundary() {
        let parent = CartesianGrid::new([1, 1, 3], [1.0, 1.0, 1.0]).unwrap();
        let g = CollapsedGrid::new(&parent, &[Some(0), None, Some(1)], &[0, 2]).unwrap();
        assert!(internal_faces(&g).is_empty());
        // both neighbours of the removed cell keep their face towards it as a boundary face
        let boundary = (0..g.num_faces())
            .filter(|&f| g.face_tag(f).axis() == 2)
            .count();
        assert_eq!(boundary, 4);
    }
}
