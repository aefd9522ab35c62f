//! GJK distance and EPA penetration queries
//!
//! Both work on the Minkowski difference `A - B` through [`Support`] only,
//! keeping the per-vertex support points of each shape so closest points
//! and contact points can be rebuilt from barycentric weights.
//!
//! Normals always point from A towards B.

use crate::foundation::math::utils::{any_perpendicular, attempt_normalize, quat_from_axis_angle};
use crate::foundation::math::Vec3;
use crate::physics::shape::primitives::{closest_point_on_segment, closest_point_on_triangle};
use crate::physics::shape::Support;

/// Distances below this count as touching
pub const GJK_EPSILON: f32 = 1.0e-4;

const MAX_GJK_ITERATIONS: usize = 64;
const MAX_EPA_ITERATIONS: usize = 64;
const EPA_TOLERANCE: f32 = 1.0e-4;

/// A vertex of the Minkowski difference with the points that made it
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SupportPoint {
    /// `a - b`
    pub point: Vec3,
    /// Support point on A
    pub a: Vec3,
    /// Support point on B
    pub b: Vec3,
}

/// Support of `A - B` along `direction`
pub fn minkowski_support<A, B>(a: &A, b: &B, direction: &Vec3) -> SupportPoint
where
    A: Support + ?Sized,
    B: Support + ?Sized,
{
    let pa = a.support(direction);
    let pb = b.support(&-direction);
    SupportPoint { point: pa - pb, a: pa, b: pb }
}

/// Up to four support points
#[derive(Debug, Clone, Copy, Default)]
pub struct Simplex {
    points: [SupportPoint; 4],
    len: usize,
}

impl Simplex {
    /// Live vertices
    pub fn points(&self) -> &[SupportPoint] {
        &self.points[..self.len]
    }

    /// Number of live vertices
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the simplex has no vertices
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, point: SupportPoint) {
        if self.len < 4 {
            self.points[self.len] = point;
            self.len += 1;
        }
    }

    fn contains(&self, point: &Vec3) -> bool {
        self.points().iter().any(|p| (p.point - point).norm_squared() < GJK_EPSILON * GJK_EPSILON)
    }

    /// Keep only vertices with non-zero weight, compacting the weights too
    fn reduce(&mut self, weights: &mut [f32; 4]) {
        let mut kept = 0;
        for i in 0..self.len {
            if weights[i] > 0.0 {
                self.points[kept] = self.points[i];
                weights[kept] = weights[i];
                kept += 1;
            }
        }
        self.len = kept;
    }
}

/// Closest features of two separated shapes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Separation {
    /// Distance between the shapes
    pub distance: f32,
    /// Closest point on A
    pub point_a: Vec3,
    /// Closest point on B
    pub point_b: Vec3,
    /// Unit axis from A towards B
    pub normal: Vec3,
}

/// Overlap of two intersecting shapes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Penetration {
    /// Depth along the normal
    pub depth: f32,
    /// Deepest point of A inside B
    pub point_a: Vec3,
    /// Deepest point of B inside A
    pub point_b: Vec3,
    /// Unit axis from A towards B
    pub normal: Vec3,
}

/// Outcome of a GJK query
#[derive(Debug, Clone, Copy)]
pub enum GjkResult {
    /// The shapes overlap or touch; the simplex encloses (or touches) the origin
    Intersecting(Simplex),
    /// The shapes are apart
    Separated(Separation),
}

impl GjkResult {
    /// Whether the shapes overlap
    pub const fn is_intersecting(&self) -> bool {
        matches!(self, Self::Intersecting(_))
    }
}

/// Closest point on the simplex to the origin, with barycentric weights
fn closest_to_origin(simplex: &Simplex) -> (Vec3, [f32; 4]) {
    let origin = Vec3::zeros();
    let p = simplex.points();
    match simplex.len() {
        1 => (p[0].point, [1.0, 0.0, 0.0, 0.0]),
        2 => {
            let (closest, w) = closest_point_on_segment(&origin, &p[0].point, &p[1].point);
            (closest, [w[0], w[1], 0.0, 0.0])
        }
        3 => {
            let (closest, w) = closest_point_on_triangle(&origin, &p[0].point, &p[1].point, &p[2].point);
            (closest, [w[0], w[1], w[2], 0.0])
        }
        _ => closest_on_tetrahedron(p),
    }
}

/// Whether the origin and `d` lie on opposite sides of plane `abc`
fn origin_outside_face(a: &Vec3, b: &Vec3, c: &Vec3, d: &Vec3) -> bool {
    let n = (b - a).cross(&(c - a));
    let side_origin = (-a).dot(&n);
    let side_d = (d - a).dot(&n);
    if side_d * side_d < 1e-12 {
        // Flat tetrahedron, every face is a candidate
        return true;
    }
    side_origin * side_d < 0.0
}

fn closest_on_tetrahedron(p: &[SupportPoint]) -> (Vec3, [f32; 4]) {
    const FACES: [[usize; 4]; 4] = [[0, 1, 2, 3], [0, 3, 1, 2], [0, 2, 3, 1], [1, 3, 2, 0]];

    let mut best: Option<(f32, Vec3, [f32; 4])> = None;
    for [i, j, k, opposite] in FACES {
        if !origin_outside_face(&p[i].point, &p[j].point, &p[k].point, &p[opposite].point) {
            continue;
        }
        let (closest, w) = closest_point_on_triangle(&Vec3::zeros(), &p[i].point, &p[j].point, &p[k].point);
        let dist = closest.norm_squared();
        if best.map_or(true, |(d, _, _)| dist < d) {
            let mut weights = [0.0; 4];
            weights[i] = w[0];
            weights[j] = w[1];
            weights[k] = w[2];
            best = Some((dist, closest, weights));
        }
    }

    // Origin inside every face: all four vertices stay
    best.map_or((Vec3::zeros(), [0.25; 4]), |(_, closest, weights)| (closest, weights))
}

/// GJK distance query between two convex sets
pub fn gjk<A, B>(a: &A, b: &B) -> GjkResult
where
    A: Support + ?Sized,
    B: Support + ?Sized,
{
    let mut direction = b.center() - a.center();
    if direction.norm_squared() < GJK_EPSILON * GJK_EPSILON {
        direction = Vec3::x();
    }

    let mut simplex = Simplex::default();
    simplex.push(minkowski_support(a, b, &-direction));
    let mut weights = [1.0, 0.0, 0.0, 0.0];
    let mut v = simplex.points[0].point;
    let mut last_distance_sq = f32::MAX;

    for _ in 0..MAX_GJK_ITERATIONS {
        let distance_sq = v.norm_squared();
        if distance_sq < GJK_EPSILON * GJK_EPSILON {
            return GjkResult::Intersecting(simplex);
        }

        let w = minkowski_support(a, b, &-v);

        // No further progress towards the origin
        if distance_sq - v.dot(&w.point) <= 1.0e-6 * distance_sq.max(1.0) || simplex.contains(&w.point) {
            break;
        }

        simplex.push(w);
        let (closest, mut new_weights) = closest_to_origin(&simplex);
        if simplex.len() == 4 && new_weights.iter().all(|&x| x > 0.0) && closest.norm_squared() == 0.0 {
            return GjkResult::Intersecting(simplex);
        }
        simplex.reduce(&mut new_weights);
        weights = new_weights;

        let new_distance_sq = closest.norm_squared();
        if new_distance_sq >= last_distance_sq && new_distance_sq >= distance_sq {
            break;
        }
        last_distance_sq = distance_sq;
        v = closest;
    }

    let mut point_a = Vec3::zeros();
    let mut point_b = Vec3::zeros();
    let total: f32 = weights[..simplex.len()].iter().sum();
    let total = if total > 0.0 { total } else { 1.0 };
    for (p, w) in simplex.points().iter().zip(weights.iter()) {
        point_a += p.a * (w / total);
        point_b += p.b * (w / total);
    }

    let (normal, distance) = attempt_normalize(&(point_b - point_a));
    if distance < GJK_EPSILON {
        return GjkResult::Intersecting(simplex);
    }
    GjkResult::Separated(Separation { distance, point_a, point_b, normal })
}

/// Grow a GJK simplex into a tetrahedron with volume, searching along the
/// principal axes and around existing edges.
fn complete_simplex<A, B>(a: &A, b: &B, simplex: &Simplex) -> Option<[SupportPoint; 4]>
where
    A: Support + ?Sized,
    B: Support + ?Sized,
{
    let mut points: Vec<SupportPoint> = simplex.points().to_vec();
    let axes = [Vec3::x(), Vec3::y(), Vec3::z(), -Vec3::x(), -Vec3::y(), -Vec3::z()];

    if points.is_empty() {
        points.push(minkowski_support(a, b, &Vec3::x()));
    }

    if points.len() == 1 {
        for axis in &axes {
            let w = minkowski_support(a, b, axis);
            if (w.point - points[0].point).norm_squared() > GJK_EPSILON * GJK_EPSILON {
                points.push(w);
                break;
            }
        }
    }

    if points.len() == 2 {
        let (line, length) = attempt_normalize(&(points[1].point - points[0].point));
        if length == 0.0 {
            return None;
        }
        let perp = any_perpendicular(&line);
        for step in 0..6 {
            let dir = quat_from_axis_angle(&line, step as f32 * std::f32::consts::FRAC_PI_3) * perp;
            let w = minkowski_support(a, b, &dir);
            let offset = w.point - points[0].point;
            if offset.cross(&line).norm_squared() > GJK_EPSILON * GJK_EPSILON {
                points.push(w);
                break;
            }
        }
    }

    if points.len() == 3 {
        let n = (points[1].point - points[0].point).cross(&(points[2].point - points[0].point));
        let mut w = minkowski_support(a, b, &n);
        if (w.point - points[0].point).dot(&n).abs() < GJK_EPSILON * n.norm() {
            w = minkowski_support(a, b, &-n);
        }
        if (w.point - points[0].point).dot(&n).abs() < GJK_EPSILON * n.norm() {
            return None;
        }
        points.push(w);
    }

    (points.len() == 4).then(|| [points[0], points[1], points[2], points[3]])
}

#[derive(Debug, Clone, Copy)]
struct EpaFace {
    indices: [usize; 3],
    normal: Vec3,
    distance: f32,
}

fn make_face(vertices: &[SupportPoint], i: usize, j: usize, k: usize, interior: Option<&Vec3>) -> Option<EpaFace> {
    let a = vertices[i].point;
    let (normal, area) = attempt_normalize(&(vertices[j].point - a).cross(&(vertices[k].point - a)));
    if area == 0.0 {
        return None;
    }
    let distance = a.dot(&normal);
    if interior.is_some_and(|inside| (a - inside).dot(&normal) < 0.0) {
        // Swap two vertices so the winding matches the flipped normal
        return Some(EpaFace { indices: [i, k, j], normal: -normal, distance: -distance });
    }
    Some(EpaFace { indices: [i, j, k], normal, distance })
}

/// EPA penetration query seeded by an intersecting GJK simplex
pub fn epa<A, B>(a: &A, b: &B, simplex: &Simplex) -> Option<Penetration>
where
    A: Support + ?Sized,
    B: Support + ?Sized,
{
    let seed = complete_simplex(a, b, simplex)?;
    let mut vertices: Vec<SupportPoint> = seed.to_vec();
    let interior = seed.iter().map(|p| p.point).sum::<Vec3>() / 4.0;
    let mut faces: Vec<EpaFace> = [[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]]
        .iter()
        .filter_map(|&[i, j, k]| make_face(&vertices, i, j, k, Some(&interior)))
        .collect();
    if faces.len() < 4 {
        return None;
    }

    for _ in 0..MAX_EPA_ITERATIONS {
        let closest = *faces
            .iter()
            .min_by(|x, y| x.distance.total_cmp(&y.distance))?;

        let support = minkowski_support(a, b, &closest.normal);
        let distance = support.point.dot(&closest.normal);

        if distance - closest.distance < EPA_TOLERANCE {
            return Some(penetration_from_face(&vertices, &closest));
        }

        let new_index = vertices.len();
        vertices.push(support);

        let mut edges: Vec<(usize, usize)> = Vec::new();
        faces.retain(|face| {
            let to_new = support.point - vertices[face.indices[0]].point;
            if face.normal.dot(&to_new) > 0.0 {
                for i in 0..3 {
                    let edge = (face.indices[i], face.indices[(i + 1) % 3]);
                    if let Some(pos) = edges.iter().position(|&e| e == (edge.1, edge.0)) {
                        edges.swap_remove(pos);
                    } else {
                        edges.push(edge);
                    }
                }
                false
            } else {
                true
            }
        });

        for (i, j) in edges {
            if let Some(face) = make_face(&vertices, i, j, new_index, None) {
                faces.push(face);
            }
        }
        if faces.is_empty() {
            return None;
        }
    }

    // Out of iterations: report the best face found
    let closest = *faces.iter().min_by(|x, y| x.distance.total_cmp(&y.distance))?;
    Some(penetration_from_face(&vertices, &closest))
}

fn penetration_from_face(vertices: &[SupportPoint], face: &EpaFace) -> Penetration {
    let [i, j, k] = face.indices;
    let projected = face.normal * face.distance;
    let (_, w) = closest_point_on_triangle(&projected, &vertices[i].point, &vertices[j].point, &vertices[k].point);

    let point_a = vertices[i].a * w[0] + vertices[j].a * w[1] + vertices[k].a * w[2];
    let point_b = vertices[i].b * w[0] + vertices[j].b * w[1] + vertices[k].b * w[2];
    Penetration { depth: face.distance.max(0.0), point_a, point_b, normal: face.normal }
}

/// Penetration of two overlapping shapes, or `None` when they are apart
pub fn penetration<A, B>(a: &A, b: &B) -> Option<Penetration>
where
    A: Support + ?Sized,
    B: Support + ?Sized,
{
    match gjk(a, b) {
        GjkResult::Intersecting(simplex) => epa(a, b, &simplex),
        GjkResult::Separated(_) => None,
    }
}
