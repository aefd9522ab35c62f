//! Mesh-backed collision shapes
//!
//! All meshes are stored in model space and never modified. Colliders
//! transform queries into model space instead of transforming the mesh.

use super::primitives::Triangle;
use crate::foundation::math::{Aabb, Vec3};

fn triangles_from_indices(vertex_count: usize, indices: &[u32]) -> Vec<[u32; 3]> {
    indices
        .chunks_exact(3)
        .filter(|chunk| chunk.iter().all(|&i| (i as usize) < vertex_count))
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect()
}

fn bounds_of(vertices: &[Vec3]) -> Aabb {
    Aabb::from_points(vertices).unwrap_or_else(|| Aabb::new(Vec3::zeros(), Vec3::zeros()))
}

/// A convex polyhedron given by its vertices and (optionally) its faces
#[derive(Debug, Clone, PartialEq)]
pub struct ConvexHull {
    vertices: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    local_aabb: Aabb,
    volume: f32,
    centroid: Vec3,
}

impl ConvexHull {
    /// Creates a hull from vertices and triangle indices (three per face,
    /// counter-clockwise seen from outside). Out-of-range indices are dropped.
    pub fn from_vertices(vertices: &[Vec3], indices: &[u32]) -> Self {
        let triangles = triangles_from_indices(vertices.len(), indices);
        let (volume, centroid) = signed_volume_and_centroid(vertices, &triangles);
        Self {
            vertices: vertices.to_vec(),
            local_aabb: bounds_of(vertices),
            triangles,
            volume,
            centroid,
        }
    }

    /// Creates a hull from a point cloud without faces. Such a hull
    /// collides normally but has no volume, so it contributes no mass.
    pub fn from_points(vertices: &[Vec3]) -> Self {
        Self::from_vertices(vertices, &[])
    }

    /// Axis aligned box hull, mostly for tests and demos
    pub fn cuboid(half_extents: Vec3) -> Self {
        let h = half_extents;
        let vertices: Vec<Vec3> = (0..8)
            .map(|i| {
                Vec3::new(
                    if i & 1 == 0 { -h.x } else { h.x },
                    if i & 2 == 0 { -h.y } else { h.y },
                    if i & 4 == 0 { -h.z } else { h.z },
                )
            })
            .collect();
        #[rustfmt::skip]
        let indices = [
            0, 2, 1, 1, 2, 3, // -z
            4, 5, 6, 5, 7, 6, // +z
            0, 1, 4, 1, 5, 4, // -y
            2, 6, 3, 3, 6, 7, // +y
            0, 4, 2, 2, 4, 6, // -x
            1, 3, 5, 3, 7, 5, // +x
        ];
        Self::from_vertices(&vertices, &indices)
    }

    /// Model space vertices
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// Face triangles as vertex indices
    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    /// Model space bounds
    pub const fn local_aabb(&self) -> Aabb {
        self.local_aabb
    }

    /// Enclosed volume (zero for hulls built without faces)
    pub const fn volume(&self) -> f32 {
        self.volume
    }

    /// Center of mass for uniform density
    pub const fn centroid(&self) -> Vec3 {
        self.centroid
    }

    /// Vertex furthest along `direction`
    pub fn support(&self, direction: &Vec3) -> Vec3 {
        let mut best = self.vertices.first().copied().unwrap_or_else(Vec3::zeros);
        let mut best_dot = best.dot(direction);
        for v in self.vertices.iter().skip(1) {
            let d = v.dot(direction);
            if d > best_dot {
                best_dot = d;
                best = *v;
            }
        }
        best
    }
}

/// Volume and centroid from a closed triangle surface, summing the
/// signed tetrahedra spanned with the origin.
fn signed_volume_and_centroid(vertices: &[Vec3], triangles: &[[u32; 3]]) -> (f32, Vec3) {
    let mut volume = 0.0;
    let mut weighted = Vec3::zeros();
    for tri in triangles {
        let a = vertices[tri[0] as usize];
        let b = vertices[tri[1] as usize];
        let c = vertices[tri[2] as usize];
        let v = a.dot(&b.cross(&c)) / 6.0;
        volume += v;
        weighted += (a + b + c) * (v / 4.0);
    }

    if volume.abs() < 1e-9 {
        let average = if vertices.is_empty() {
            Vec3::zeros()
        } else {
            vertices.iter().sum::<Vec3>() / vertices.len() as f32
        };
        return (0.0, average);
    }
    (volume.abs(), weighted / volume)
}

/// A static triangle soup
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleMesh {
    vertices: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    triangle_bounds: Vec<Aabb>,
    local_aabb: Aabb,
}

impl TriangleMesh {
    /// Creates a mesh from model space vertices and indices
    pub fn from_vertices(vertices: &[Vec3], indices: &[u32]) -> Self {
        let triangles = triangles_from_indices(vertices.len(), indices);
        let triangle_bounds = triangles
            .iter()
            .map(|t| {
                Triangle::new(
                    vertices[t[0] as usize],
                    vertices[t[1] as usize],
                    vertices[t[2] as usize],
                )
                .aabb()
            })
            .collect();
        Self {
            vertices: vertices.to_vec(),
            local_aabb: bounds_of(vertices),
            triangles,
            triangle_bounds,
        }
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Model space bounds
    pub const fn local_aabb(&self) -> Aabb {
        self.local_aabb
    }

    /// Triangle `index` in model space
    pub fn triangle(&self, index: usize) -> Option<Triangle> {
        let t = self.triangles.get(index)?;
        Some(Triangle::new(
            self.vertices[t[0] as usize],
            self.vertices[t[1] as usize],
            self.vertices[t[2] as usize],
        ))
    }

    /// Collect indices of triangles whose bounds overlap `local_aabb`
    pub fn overlapping(&self, local_aabb: &Aabb, out: &mut Vec<usize>) {
        out.extend(
            self.triangle_bounds
                .iter()
                .enumerate()
                .filter(|(_, b)| b.overlaps(local_aabb))
                .map(|(i, _)| i),
        );
    }
}

/// A compound of convex hulls sharing one collider
#[derive(Debug, Clone, PartialEq)]
pub struct MultiConvexMesh {
    hulls: Vec<ConvexHull>,
    local_aabb: Aabb,
}

impl MultiConvexMesh {
    /// Creates a compound from its pieces
    pub fn new(hulls: Vec<ConvexHull>) -> Self {
        let local_aabb = hulls
            .iter()
            .map(ConvexHull::local_aabb)
            .reduce(|a, b| a.merged(&b))
            .unwrap_or_else(|| Aabb::new(Vec3::zeros(), Vec3::zeros()));
        Self { hulls, local_aabb }
    }

    /// The pieces
    pub fn hulls(&self) -> &[ConvexHull] {
        &self.hulls
    }

    /// Model space bounds
    pub const fn local_aabb(&self) -> Aabb {
        self.local_aabb
    }

    /// Summed volume of every piece
    pub fn volume(&self) -> f32 {
        self.hulls.iter().map(ConvexHull::volume).sum()
    }

    /// Volume weighted centroid of the pieces
    pub fn centroid(&self) -> Vec3 {
        let volume = self.volume();
        if volume <= 0.0 {
            return self.local_aabb.center();
        }
        self.hulls.iter().map(|h| h.centroid() * h.volume()).sum::<Vec3>() / volume
    }

    /// Collect indices of hulls whose bounds overlap `local_aabb`
    pub fn overlapping(&self, local_aabb: &Aabb, out: &mut Vec<usize>) {
        out.extend(
            self.hulls
                .iter()
                .enumerate()
                .filter(|(_, h)| h.local_aabb().overlaps(local_aabb))
                .map(|(i, _)| i),
        );
    }
}

/// A regular grid of heights on the local XZ plane.
///
/// Vertex `(row, col)` sits at `(col * cell_size, height, row * cell_size)`.
/// Every cell is split into two triangles, so sub-shape `i` lives in cell
/// `i / 2`.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightField {
    rows: usize,
    cols: usize,
    cell_size: f32,
    heights: Vec<f32>,
    local_aabb: Aabb,
}

impl HeightField {
    /// Creates a height field from row-major heights. Missing samples read
    /// as zero and the grid is at least 2x2.
    pub fn new(rows: usize, cols: usize, cell_size: f32, heights: Vec<f32>) -> Self {
        let rows = rows.max(2);
        let cols = cols.max(2);
        let cell_size = if cell_size > 0.0 { cell_size } else { 1.0 };
        let mut heights = heights;
        heights.resize(rows * cols, 0.0);

        let (min_h, max_h) = heights
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &h| (lo.min(h), hi.max(h)));
        let local_aabb = Aabb::new(
            Vec3::new(0.0, min_h, 0.0),
            Vec3::new((cols - 1) as f32 * cell_size, max_h, (rows - 1) as f32 * cell_size),
        );
        Self { rows, cols, cell_size, heights, local_aabb }
    }

    /// Grid rows
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Grid columns
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Model space bounds
    pub const fn local_aabb(&self) -> Aabb {
        self.local_aabb
    }

    /// Number of triangles
    pub const fn triangle_count(&self) -> usize {
        (self.rows - 1) * (self.cols - 1) * 2
    }

    fn vertex(&self, row: usize, col: usize) -> Vec3 {
        Vec3::new(
            col as f32 * self.cell_size,
            self.heights[row * self.cols + col],
            row as f32 * self.cell_size,
        )
    }

    /// Triangle `index` in model space, wound so faces point up
    pub fn triangle(&self, index: usize) -> Option<Triangle> {
        if index >= self.triangle_count() {
            return None;
        }
        let cell = index / 2;
        let row = cell / (self.cols - 1);
        let col = cell % (self.cols - 1);
        let v00 = self.vertex(row, col);
        let v10 = self.vertex(row, col + 1);
        let v01 = self.vertex(row + 1, col);
        let v11 = self.vertex(row + 1, col + 1);
        Some(if index % 2 == 0 {
            Triangle::new(v00, v01, v10)
        } else {
            Triangle::new(v10, v01, v11)
        })
    }

    /// Collect indices of triangles whose cells overlap `local_aabb`
    pub fn overlapping(&self, local_aabb: &Aabb, out: &mut Vec<usize>) {
        if !self.local_aabb.overlaps(local_aabb) {
            return;
        }
        let max_cell_col = self.cols - 2;
        let max_cell_row = self.rows - 2;
        let to_cell = |v: f32, max: usize| ((v / self.cell_size).floor().max(0.0) as usize).min(max);

        let col_range = to_cell(local_aabb.min.x, max_cell_col)..=to_cell(local_aabb.max.x, max_cell_col);
        let row_range = to_cell(local_aabb.min.z, max_cell_row)..=to_cell(local_aabb.max.z, max_cell_row);

        for row in row_range {
            for col in col_range.clone() {
                let cell = row * (self.cols - 1) + col;
                for index in [cell * 2, cell * 2 + 1] {
                    if let Some(tri) = self.triangle(index) {
                        if tri.aabb().overlaps(local_aabb) {
                            out.push(index);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cuboid_hull_volume_and_support() {
        let hull = ConvexHull::cuboid(Vec3::new(1.0, 2.0, 0.5));
        assert_relative_eq!(hull.volume(), 8.0, epsilon = 1e-4);
        assert_relative_eq!(hull.centroid(), Vec3::zeros(), epsilon = 1e-5);
        assert_relative_eq!(
            hull.support(&Vec3::new(1.0, 1.0, 1.0)),
            Vec3::new(1.0, 2.0, 0.5)
        );
    }

    #[test]
    fn test_point_cloud_hull_is_massless() {
        let hull = ConvexHull::from_points(&[Vec3::zeros(), Vec3::x(), Vec3::y(), Vec3::z()]);
        assert_eq!(hull.volume(), 0.0);
        assert!(hull.triangles().is_empty());
    }

    #[test]
    fn test_triangle_mesh_overlap() {
        let vertices = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(10.0, 0.0, 10.0),
            Vec3::new(11.0, 0.0, 10.0),
            Vec3::new(10.0, 0.0, 11.0),
        ];
        let mesh = TriangleMesh::from_vertices(&vertices, &[0, 1, 2, 3, 4, 5, 7, 8]);
        assert_eq!(mesh.triangle_count(), 2);

        let mut hits = Vec::new();
        mesh.overlapping(&Aabb::new(Vec3::new(-0.5, -0.5, -0.5), Vec3::new(0.5, 0.5, 0.5)), &mut hits);
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn test_height_field_triangles_face_up() {
        let field = HeightField::new(3, 3, 1.0, vec![0.0; 9]);
        assert_eq!(field.triangle_count(), 8);
        for i in 0..field.triangle_count() {
            let normal = field.triangle(i).map(|t| t.normal()).unwrap_or_else(Vec3::zeros);
            assert_relative_eq!(normal, Vec3::y(), epsilon = 1e-5);
        }
        assert!(field.triangle(8).is_none());
    }

    #[test]
    fn test_height_field_overlap_selects_cells() {
        let field = HeightField::new(3, 3, 1.0, vec![0.0; 9]);
        let mut hits = Vec::new();
        field.overlapping(&Aabb::new(Vec3::new(1.2, -0.1, 0.2), Vec3::new(1.4, 0.1, 0.4)), &mut hits);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|&i| i / 2 == 1));
    }
}
