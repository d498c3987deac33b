use glam::Vec3;

use crate::collision::shapes::support_of;

const MAX_ITERATIONS: u32 = 64;
const PROGRESS_EPSILON: f32 = 1e-6;

/// Result of a GJK query between two convex point sets. `on_a`/`on_b` are the
/// closest points on the respective sets; when `overlapping` the witness
/// points are meaningless and callers fall back to a deep-penetration query.
#[derive(Debug, Clone, Copy)]
pub struct GjkResult {
    pub distance: f32,
    pub on_a: Vec3,
    pub on_b: Vec3,
    pub overlapping: bool,
}

#[derive(Clone, Copy)]
struct SupportPoint {
    w: Vec3,
    a: Vec3,
    b: Vec3,
}

/// Gilbert–Johnson–Keerthi distance on the Minkowski difference of two
/// world-space vertex sets. Bounded iteration; spheres and capsules enter as
/// one- and two-point sets with their radius handled by the caller.
pub fn closest_points(verts_a: &[Vec3], verts_b: &[Vec3]) -> GjkResult {
    let mut simplex: Vec<SupportPoint> = Vec::with_capacity(4);

    let mut dir = verts_b[0] - verts_a[0];
    if dir.length_squared() < 1e-12 {
        dir = Vec3::X;
    }
    simplex.push(support(verts_a, verts_b, dir));

    let mut last_dist_sq = f32::MAX;
    for _ in 0..MAX_ITERATIONS {
        let (closest, lambda) = closest_on_simplex(&mut simplex);
        let dist_sq = closest.length_squared();

        if simplex.len() == 4 || dist_sq < 1e-10 {
            return GjkResult {
                distance: 0.0,
                on_a: Vec3::ZERO,
                on_b: Vec3::ZERO,
                overlapping: true,
            };
        }

        // no measurable progress towards the origin: converged
        if last_dist_sq - dist_sq <= PROGRESS_EPSILON * last_dist_sq {
            return witness(&simplex, &lambda, dist_sq);
        }
        last_dist_sq = dist_sq;

        let sp = support(verts_a, verts_b, -closest);
        // support no closer than the current simplex: converged
        if closest.dot(closest - sp.w) <= PROGRESS_EPSILON * dist_sq.max(1.0) {
            return witness(&simplex, &lambda, dist_sq);
        }
        simplex.push(sp);
    }

    let (_, lambda) = closest_on_simplex(&mut simplex);
    let dist_sq = combine(&simplex, &lambda).w.length_squared();
    witness(&simplex, &lambda, dist_sq)
}

fn support(verts_a: &[Vec3], verts_b: &[Vec3], dir: Vec3) -> SupportPoint {
    let a = support_of(verts_a, dir);
    let b = support_of(verts_b, -dir);
    SupportPoint { w: a - b, a, b }
}

fn combine(simplex: &[SupportPoint], lambda: &[f32]) -> SupportPoint {
    let mut out = SupportPoint {
        w: Vec3::ZERO,
        a: Vec3::ZERO,
        b: Vec3::ZERO,
    };
    for (sp, &l) in simplex.iter().zip(lambda) {
        out.w += sp.w * l;
        out.a += sp.a * l;
        out.b += sp.b * l;
    }
    out
}

fn witness(simplex: &[SupportPoint], lambda: &[f32], dist_sq: f32) -> GjkResult {
    let combined = combine(simplex, lambda);
    GjkResult {
        distance: dist_sq.max(0.0).sqrt(),
        on_a: combined.a,
        on_b: combined.b,
        overlapping: false,
    }
}

/// Reduces the simplex to the minimal feature closest to the origin and
/// returns that point together with its barycentric coordinates.
fn closest_on_simplex(simplex: &mut Vec<SupportPoint>) -> (Vec3, Vec<f32>) {
    match simplex.len() {
        1 => (simplex[0].w, vec![1.0]),
        2 => {
            let (t, keep_both) = segment_param(simplex[0].w, simplex[1].w);
            if !keep_both {
                if t <= 0.0 {
                    simplex.truncate(1);
                    return (simplex[0].w, vec![1.0]);
                }
                let last = simplex[1];
                simplex.clear();
                simplex.push(last);
                return (simplex[0].w, vec![1.0]);
            }
            let closest = simplex[0].w + (simplex[1].w - simplex[0].w) * t;
            (closest, vec![1.0 - t, t])
        }
        3 => {
            let (closest, bary, keep) = triangle_closest(simplex[0].w, simplex[1].w, simplex[2].w);
            reduce(simplex, &keep);
            (closest, bary)
        }
        4 => {
            let contains = tetrahedron_closest(simplex);
            match contains {
                None => (Vec3::ZERO, vec![0.25; 4]),
                Some((closest, bary, keep)) => {
                    reduce(simplex, &keep);
                    (closest, bary)
                }
            }
        }
        _ => unreachable!("simplex cardinality"),
    }
}

fn reduce(simplex: &mut Vec<SupportPoint>, keep: &[usize]) {
    let kept: Vec<SupportPoint> = keep.iter().map(|&i| simplex[i]).collect();
    simplex.clear();
    simplex.extend(kept);
}

fn segment_param(a: Vec3, b: Vec3) -> (f32, bool) {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < 1e-12 {
        return (0.0, false);
    }
    let t = -a.dot(ab) / len_sq;
    if !(0.0..=1.0).contains(&t) {
        return (t.clamp(0.0, 1.0), false);
    }
    (t, true)
}

/// Closest point on triangle `abc` to the origin, with barycentrics and the
/// indices of the retained vertices.
#[allow(clippy::many_single_char_names)]
fn triangle_closest(a: Vec3, b: Vec3, c: Vec3) -> (Vec3, Vec<f32>, Vec<usize>) {
    let ab = b - a;
    let ac = c - a;
    let ap = -a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, vec![1.0], vec![0]);
    }

    let bp = -b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, vec![1.0], vec![1]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, vec![1.0 - v, v], vec![0, 1]);
    }

    let cp = -c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, vec![1.0], vec![2]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, vec![1.0 - w, w], vec![0, 2]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, vec![1.0 - w, w], vec![1, 2]);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, vec![1.0 - v - w, v, w], vec![0, 1, 2])
}

/// Returns `None` when the origin is inside the tetrahedron.
fn tetrahedron_closest(
    simplex: &[SupportPoint],
) -> Option<(Vec3, Vec<f32>, Vec<usize>)> {
    const FACES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    let mut best: Option<(f32, Vec3, Vec<f32>, Vec<usize>)> = None;
    let mut outside_any = false;

    for face in FACES {
        let [i, j, k] = face;
        let opposite = (0..4).find(|v| !face.contains(v)).unwrap();
        let a = simplex[i].w;
        let b = simplex[j].w;
        let c = simplex[k].w;
        let n = (b - a).cross(c - a);
        let plane_origin = -a.dot(n);
        let plane_opposite = (simplex[opposite].w - a).dot(n);
        // origin and the opposite vertex on the same side: face not facing it
        if plane_origin * plane_opposite >= 0.0 {
            continue;
        }
        outside_any = true;

        let (closest, bary, keep) = triangle_closest(a, b, c);
        let dist_sq = closest.length_squared();
        let keep_global: Vec<usize> = keep.iter().map(|&l| face[l]).collect();
        if best.as_ref().is_none_or(|(d, _, _, _)| dist_sq < *d) {
            best = Some((dist_sq, closest, bary, keep_global));
        }
    }

    if !outside_any {
        return None;
    }
    best.map(|(_, closest, bary, keep)| (closest, bary, keep))
}
