//! Incremental Delaunay triangulation of scattered 2d points and linear interpolation over it.
//!
//! The triangulation is built with the Bowyer-Watson algorithm inside a large enclosing
//! triangle that is discarded at the end. Triangles keep their neighbours so that point
//! location is a short walk from a nearby triangle.

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use rayon::prelude::*;

use crate::linalg::orient2d;

const NO_NEIGHBOR: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Triangle {
    // vertices in counter clockwise order
    v: [usize; 3],
    // n[i] is the neighbour across the edge opposite to v[i]
    n: [usize; 3],
    alive: bool,
}

/// A Delaunay triangulation of a set of 2d points.
#[derive(Debug, Clone)]
pub struct Triangulation {
    points: Vec<[f64; 2]>,
    triangles: Vec<Triangle>,
    // one triangle incident to every point, NO_NEIGHBOR for skipped duplicates
    vertex_triangle: Vec<usize>,
}

/// Location of a query point in a [`Triangulation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    /// Indices of the triangle vertices in the input point list.
    pub vertices: [usize; 3],
    /// Barycentric weights of the query point for each vertex.
    pub weights: [f64; 3],
}

fn in_circumcircle(a: [f64; 2], b: [f64; 2], c: [f64; 2], p: [f64; 2]) -> bool {
    let (adx, ady) = (a[0] - p[0], a[1] - p[1]);
    let (bdx, bdy) = (b[0] - p[0], b[1] - p[1]);
    let (cdx, cdy) = (c[0] - p[0], c[1] - p[1]);

    let ad = adx * adx + ady * ady;
    let bd = bdx * bdx + bdy * bdy;
    let cd = cdx * cdx + cdy * cdy;

    let det = adx * (bdy * cd - bd * cdy) - ady * (bdx * cd - bd * cdx) + ad * (bdx * cdy - bdy * cdx);
    det > 0.0
}

impl Triangulation {
    /// Build the Delaunay triangulation of `points`.
    ///
    /// Points that coincide with an earlier point are ignored. Fewer than three distinct
    /// non collinear points yield an empty triangulation.
    pub fn new(points: &[[f64; 2]]) -> Self {
        let mut tri = Self {
            points: points.to_vec(),
            triangles: Vec::new(),
            vertex_triangle: vec![NO_NEIGHBOR; points.len()],
        };

        let finite = points
            .iter()
            .filter(|p| p[0].is_finite() && p[1].is_finite())
            .collect::<Vec<_>>();
        if finite.len() < 3 {
            return tri;
        }

        // enclosing triangle far outside the bounding box
        let (mut min_x, mut min_y) = (f64::MAX, f64::MAX);
        let (mut max_x, mut max_y) = (f64::MIN, f64::MIN);
        for p in &finite {
            min_x = min_x.min(p[0]);
            min_y = min_y.min(p[1]);
            max_x = max_x.max(p[0]);
            max_y = max_y.max(p[1]);
        }
        let span = (max_x - min_x).max(max_y - min_y).max(1.0);
        let (mx, my) = (0.5 * (min_x + max_x), 0.5 * (min_y + max_y));
        let big = 1e3 * span;

        let n = points.len();
        tri.points.push([mx - big, my - big]);
        tri.points.push([mx + big, my - big]);
        tri.points.push([mx, my + big]);
        tri.triangles.push(Triangle {
            v: [n, n + 1, n + 2],
            n: [NO_NEIGHBOR; 3],
            alive: true,
        });

        let mut free = Vec::new();
        let mut last = 0;
        let mut seen = std::collections::HashSet::with_capacity(n);
        for i in 0..n {
            let p = points[i];
            if !(p[0].is_finite() && p[1].is_finite()) {
                continue;
            }
            if !seen.insert((p[0].to_bits(), p[1].to_bits())) {
                continue;
            }
            if let Some(t) = tri.insert(i, last, &mut free) {
                last = t;
            }
        }

        tri.remove_enclosing(n);
        tri
    }

    /// Number of input points, including skipped duplicates.
    pub fn num_points(&self) -> usize {
        self.vertex_triangle.len()
    }

    /// Number of triangles.
    pub fn num_triangles(&self) -> usize {
        self.triangles.iter().filter(|t| t.alive).count()
    }

    /// Vertex indices of every triangle, counter clockwise.
    pub fn triangles(&self) -> Vec<[usize; 3]> {
        self.triangles
            .iter()
            .filter(|t| t.alive)
            .map(|t| t.v)
            .collect()
    }

    /// Whether the triangulation has no triangles.
    pub fn is_empty(&self) -> bool {
        self.num_triangles() == 0
    }

    fn pt(&self, i: usize) -> [f64; 2] {
        self.points[i]
    }

    fn contains(&self, t: usize, p: [f64; 2]) -> Option<usize> {
        // index of the first edge the point lies strictly outside of
        let tri = &self.triangles[t];
        (0..3).find(|&i| {
            let a = self.pt(tri.v[(i + 1) % 3]);
            let b = self.pt(tri.v[(i + 2) % 3]);
            orient2d(a, b, p) < 0.0
        })
    }

    /// Walk from `start` towards `p`. Returns the containing triangle, or `Err` with the
    /// last triangle when the walk leaves the triangulation.
    fn walk(&self, start: usize, p: [f64; 2]) -> Result<usize, Option<usize>> {
        let max_steps = 4 * self.triangles.len() + 16;
        let mut t = start;
        for _ in 0..max_steps {
            match self.contains(t, p) {
                None => return Ok(t),
                Some(edge) => {
                    let next = self.triangles[t].n[edge];
                    if next == NO_NEIGHBOR {
                        return Err(Some(t));
                    }
                    t = next;
                }
            }
        }
        Err(None)
    }

    fn locate_brute_force(&self, p: [f64; 2]) -> Option<usize> {
        self.triangles
            .iter()
            .enumerate()
            .find(|(i, t)| t.alive && self.contains(*i, p).is_none())
            .map(|(i, _)| i)
    }

    fn insert(&mut self, idx: usize, hint: usize, free: &mut Vec<usize>) -> Option<usize> {
        let p = self.pt(idx);
        let start = if self.triangles[hint].alive {
            hint
        } else {
            self.triangles.iter().position(|t| t.alive)?
        };
        let t0 = match self.walk(start, p) {
            Ok(t) => t,
            Err(_) => self.locate_brute_force(p)?,
        };

        // cavity of triangles whose circumcircle contains the point
        let mut cavity = vec![t0];
        let mut in_cavity = std::collections::HashSet::from([t0]);
        let mut boundary: Vec<(usize, usize, usize)> = Vec::new();
        let mut k = 0;
        while k < cavity.len() {
            let t = cavity[k];
            k += 1;
            let tri = self.triangles[t];
            for i in 0..3 {
                let nb = tri.n[i];
                let (a, b) = (tri.v[(i + 1) % 3], tri.v[(i + 2) % 3]);
                if nb != NO_NEIGHBOR && !in_cavity.contains(&nb) {
                    let o = self.triangles[nb];
                    if in_circumcircle(self.pt(o.v[0]), self.pt(o.v[1]), self.pt(o.v[2]), p) {
                        in_cavity.insert(nb);
                        cavity.push(nb);
                        continue;
                    }
                }
                if nb == NO_NEIGHBOR || !in_cavity.contains(&nb) {
                    boundary.push((a, b, nb));
                }
            }
        }
        // a neighbour may join the cavity after its shared edge was recorded
        boundary.retain(|&(_, _, nb)| nb == NO_NEIGHBOR || !in_cavity.contains(&nb));

        // new triangles must be strictly counter clockwise or the cavity is not star shaped
        if boundary
            .iter()
            .any(|&(a, b, _)| orient2d(self.pt(a), self.pt(b), p) <= 0.0)
        {
            return None;
        }

        for &t in &cavity {
            self.triangles[t].alive = false;
            free.push(t);
        }

        let mut by_start = std::collections::HashMap::with_capacity(boundary.len());
        let mut by_end = std::collections::HashMap::with_capacity(boundary.len());
        let mut created = Vec::with_capacity(boundary.len());
        for &(a, b, nb) in &boundary {
            let new_tri = Triangle {
                v: [a, b, idx],
                n: [NO_NEIGHBOR, NO_NEIGHBOR, nb],
                alive: true,
            };
            let t = match free.pop() {
                Some(slot) => {
                    self.triangles[slot] = new_tri;
                    slot
                }
                None => {
                    self.triangles.push(new_tri);
                    self.triangles.len() - 1
                }
            };
            by_start.insert(a, t);
            by_end.insert(b, t);
            created.push(t);

            if nb != NO_NEIGHBOR {
                let outer = &mut self.triangles[nb];
                for j in 0..3 {
                    let (oa, ob) = (outer.v[(j + 1) % 3], outer.v[(j + 2) % 3]);
                    if oa == b && ob == a {
                        outer.n[j] = t;
                    }
                }
            }
            self.vertex_triangle_set(a, t);
            self.vertex_triangle_set(b, t);
        }

        for &t in &created {
            let [a, b, _] = self.triangles[t].v;
            // edge (b, p) is shared with the triangle starting at b
            // edge (p, a) is shared with the triangle ending at a
            self.triangles[t].n[0] = by_start.get(&b).copied().unwrap_or(NO_NEIGHBOR);
            self.triangles[t].n[1] = by_end.get(&a).copied().unwrap_or(NO_NEIGHBOR);
        }
        let last = created.last().copied();
        if let Some(t) = last {
            self.vertex_triangle_set(idx, t);
        }
        last
    }

    fn vertex_triangle_set(&mut self, v: usize, t: usize) {
        if let Some(slot) = self.vertex_triangle.get_mut(v) {
            *slot = t;
        }
    }

    fn remove_enclosing(&mut self, first_super: usize) {
        for t in 0..self.triangles.len() {
            if self.triangles[t].alive && self.triangles[t].v.iter().any(|&v| v >= first_super) {
                self.triangles[t].alive = false;
            }
        }
        for t in 0..self.triangles.len() {
            for i in 0..3 {
                let nb = self.triangles[t].n[i];
                if nb != NO_NEIGHBOR && !self.triangles[nb].alive {
                    self.triangles[t].n[i] = NO_NEIGHBOR;
                }
            }
        }
        self.points.truncate(first_super);

        self.vertex_triangle.iter_mut().for_each(|v| *v = NO_NEIGHBOR);
        for t in 0..self.triangles.len() {
            if self.triangles[t].alive {
                for k in 0..3 {
                    let v = self.triangles[t].v[k];
                    self.vertex_triangle[v] = t;
                }
            }
        }
    }

    /// Locate `p` starting the walk from the triangle incident to vertex `hint`.
    ///
    /// Returns `None` when the point lies outside the convex hull.
    pub fn locate(&self, p: [f64; 2], hint: usize) -> Option<Location> {
        if !(p[0].is_finite() && p[1].is_finite()) {
            return None;
        }
        let start = match self.vertex_triangle.get(hint) {
            Some(&t) if t != NO_NEIGHBOR => t,
            _ => self.triangles.iter().position(|t| t.alive)?,
        };
        let t = match self.walk(start, p) {
            Ok(t) => t,
            Err(Some(_)) => return None,
            Err(None) => self.locate_brute_force(p)?,
        };

        let v = self.triangles[t].v;
        let (a, b, c) = (self.pt(v[0]), self.pt(v[1]), self.pt(v[2]));
        let area = orient2d(a, b, c);
        if area.abs() < f64::MIN_POSITIVE {
            return None;
        }
        let w0 = orient2d(b, c, p) / area;
        let w1 = orient2d(c, a, p) / area;
        Some(Location {
            vertices: v,
            weights: [w0, w1, 1.0 - w0 - w1],
        })
    }
}

/// Piecewise linear interpolation of vector values over a Delaunay triangulation.
///
/// Queries outside the convex hull of the sample points evaluate to NaN.
pub struct LinearInterpolator<const D: usize> {
    triangulation: Triangulation,
    values: Vec<[f64; D]>,
    kdtree: Option<ImmutableKdTree<f64, u32, 2, 32>>,
}

impl<const D: usize> LinearInterpolator<D> {
    /// Create an interpolator from sample positions and their values.
    ///
    /// PRECONDITION: `points` and `values` have the same length.
    pub fn new(points: &[[f64; 2]], values: Vec<[f64; D]>) -> Self {
        let triangulation = Triangulation::new(points);
        let kdtree = (!triangulation.is_empty()).then(|| ImmutableKdTree::new_from_slice(points));
        Self {
            triangulation,
            values,
            kdtree,
        }
    }

    /// The underlying triangulation.
    pub fn triangulation(&self) -> &Triangulation {
        &self.triangulation
    }

    /// Interpolate the value at `p`.
    pub fn interpolate(&self, p: [f64; 2]) -> [f64; D] {
        let Some(kdtree) = &self.kdtree else {
            return [f64::NAN; D];
        };
        if !(p[0].is_finite() && p[1].is_finite()) {
            return [f64::NAN; D];
        }
        let hint = kdtree.nearest_one::<kiddo::SquaredEuclidean>(&p).item as usize;
        match self.triangulation.locate(p, hint) {
            Some(loc) => {
                let mut out = [0.0; D];
                for (k, &v) in loc.vertices.iter().enumerate() {
                    let w = loc.weights[k];
                    for (o, val) in out.iter_mut().zip(self.values[v].iter()) {
                        *o += w * val;
                    }
                }
                out
            }
            None => [f64::NAN; D],
        }
    }

    /// Interpolate the values at many points in parallel.
    pub fn interpolate_many(&self, points: &[[f64; 2]]) -> Vec<[f64; D]> {
        points.par_iter().map(|&p| self.interpolate(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn is_delaunay(tri: &Triangulation, points: &[[f64; 2]]) -> bool {
        tri.triangles().iter().all(|t| {
            let (a, b, c) = (points[t[0]], points[t[1]], points[t[2]]);
            points
                .iter()
                .enumerate()
                .all(|(i, &p)| t.contains(&i) || !in_circumcircle(a, b, c, p))
        })
    }

    #[test]
    fn test_square() {
        let points = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let tri = Triangulation::new(&points);
        assert_eq!(tri.num_triangles(), 2);
        for t in tri.triangles() {
            assert!(orient2d(points[t[0]], points[t[1]], points[t[2]]) > 0.0);
        }
    }

    #[test]
    fn test_random_points_are_delaunay() {
        let mut rng = StdRng::seed_from_u64(7);
        let points = (0..300)
            .map(|_| [rng.random_range(0.0..100.0), rng.random_range(0.0..50.0)])
            .collect::<Vec<[f64; 2]>>();
        let tri = Triangulation::new(&points);

        // euler: 2n - 2 - h triangles, h >= 3 hull vertices
        assert!(tri.num_triangles() > 500 && tri.num_triangles() <= 2 * 300 - 5);
        assert!(is_delaunay(&tri, &points));
    }

    #[test]
    fn test_duplicates_and_degenerate_input() {
        let points = [[0.0, 0.0], [1.0, 0.0], [0.0, 0.0], [0.0, 1.0], [f64::NAN, 1.0]];
        let tri = Triangulation::new(&points);
        assert_eq!(tri.num_triangles(), 1);
        assert_eq!(tri.num_points(), 5);

        let collinear = [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]];
        assert!(Triangulation::new(&collinear).is_empty());
        assert!(Triangulation::new(&collinear[..2]).is_empty());
    }

    #[test]
    fn test_linear_interpolator_reproduces_planes() {
        let mut points = Vec::new();
        let mut values = Vec::new();
        for y in 0..10 {
            for x in 0..12 {
                let (xf, yf) = (x as f64 * 3.0, y as f64 * 2.0 + 0.1 * x as f64);
                points.push([xf, yf]);
                values.push([2.0 * xf - yf + 1.0, 0.5 * yf]);
            }
        }
        let interp = LinearInterpolator::new(&points, values);

        let queries = [[4.2, 5.5], [17.0, 9.1], [30.3, 17.0]];
        for (q, v) in queries.iter().zip(interp.interpolate_many(&queries)) {
            assert_relative_eq!(v[0], 2.0 * q[0] - q[1] + 1.0, epsilon = 1e-9);
            assert_relative_eq!(v[1], 0.5 * q[1], epsilon = 1e-9);
        }

        let outside = interp.interpolate([-5.0, 3.0]);
        assert!(outside[0].is_nan() && outside[1].is_nan());
        assert!(interp.interpolate([f64::NAN, 3.0])[0].is_nan());
    }
}
