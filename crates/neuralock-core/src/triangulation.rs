//! Incremental Delaunay triangulation (Bowyer–Watson).

use std::collections::{BTreeSet, HashMap};

/// Super-triangle size in multiples of the point span. Hull edges of
/// shallow point sets are lost when its vertices sit too close.
const SUPER_TRIANGLE_SCALE: f64 = 1e4;

/// Delaunay triangulation of a planar point set.
///
/// Triangles are stored counter-clockwise as indices into `points`.
/// Degenerate input (fewer than three points, all collinear) yields no
/// triangles.
#[derive(Debug, Clone)]
pub struct Triangulation {
    points: Vec<(f64, f64)>,
    triangles: Vec<[usize; 3]>,
}

fn orient(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

/// Positive when `d` lies inside the circumcircle of counter-clockwise `abc`.
fn in_circle(a: (f64, f64), b: (f64, f64), c: (f64, f64), d: (f64, f64)) -> f64 {
    let (adx, ady) = (a.0 - d.0, a.1 - d.1);
    let (bdx, bdy) = (b.0 - d.0, b.1 - d.1);
    let (cdx, cdy) = (c.0 - d.0, c.1 - d.1);
    let ad = adx * adx + ady * ady;
    let bd = bdx * bdx + bdy * bdy;
    let cd = cdx * cdx + cdy * cdy;
    adx * (bdy * cd - bd * cdy) - ady * (bdx * cd - bd * cdx) + ad * (bdx * cdy - bdy * cdx)
}

impl Triangulation {
    /// Triangulate `points`. Exact duplicate coordinates must be removed beforehand.
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        let n = points.len();
        if n < 3 {
            return Self {
                points,
                triangles: Vec::new(),
            };
        }

        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &(x, y) in &points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        let span = (max_x - min_x).max(max_y - min_y).max(1.0);
        let (mid_x, mid_y) = ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0);

        // super-triangle vertices live at indices n, n+1, n+2
        let mut verts = points.clone();
        verts.push((mid_x - SUPER_TRIANGLE_SCALE * span, mid_y - span));
        verts.push((mid_x + SUPER_TRIANGLE_SCALE * span, mid_y - span));
        verts.push((mid_x, mid_y + SUPER_TRIANGLE_SCALE * span));

        let mut triangles: Vec<[usize; 3]> = vec![[n, n + 1, n + 2]];
        for i in 0..n {
            let p = verts[i];
            let (bad, good): (Vec<[usize; 3]>, Vec<[usize; 3]>) = triangles
                .into_iter()
                .partition(|t| in_circle(verts[t[0]], verts[t[1]], verts[t[2]], p) > 0.0);

            // boundary of the cavity: directed edges not shared by two bad triangles
            let mut edge_count: HashMap<(usize, usize), usize> = HashMap::new();
            for t in &bad {
                for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                    *edge_count.entry((a.min(b), a.max(b))).or_insert(0) += 1;
                }
            }

            triangles = good;
            for t in &bad {
                for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                    if edge_count[&(a.min(b), a.max(b))] != 1 {
                        continue;
                    }
                    // a→b is counter-clockwise around the cavity, so (a, b, p) is too
                    if orient(verts[a], verts[b], p) > 0.0 {
                        triangles.push([a, b, i]);
                    }
                }
            }
        }

        triangles.retain(|t| t.iter().all(|&v| v < n));
        Self { points, triangles }
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Indices of the vertices sharing an edge with each vertex.
    pub fn neighbors(&self) -> Vec<Vec<usize>> {
        let mut sets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.points.len()];
        for t in &self.triangles {
            for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                sets[a].insert(b);
                sets[b].insert(a);
            }
        }
        sets.into_iter().map(|s| s.into_iter().collect()).collect()
    }

    /// Barycentric weights of `p` in triangle `t`, or `None` when degenerate.
    pub fn barycentric(&self, t: &[usize; 3], p: (f64, f64)) -> Option<(f64, f64, f64)> {
        let (a, b, c) = (self.points[t[0]], self.points[t[1]], self.points[t[2]]);
        let det = orient(a, b, c);
        if det.abs() < 1e-12 {
            return None;
        }
        let u = orient(p, b, c) / det;
        let v = orient(a, p, c) / det;
        Some((u, v, 1.0 - u - v))
    }
}
