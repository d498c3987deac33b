use glam::{Quat, Vec3};

use crate::collision::clipping::{clip_to_face, reduce_manifold};
use crate::collision::contact::{ContactManifold, PairResult, SatCacheKind};
use crate::collision::gjk;
use crate::collision::shapes::{ray_triangle, CollisionShape, Dcel, ShapeGeometry, TriMesh};
use crate::utils::math::{closest_point_on_triangle, Aabb, Plane, Ray, Segment};

/// Face-contact preference over edge-contact when depths are comparable;
/// keeps the reference face stable across ticks.
const FACE_PREFERENCE: f32 = 0.99;
/// Parallel-edge rejection threshold in the edge-edge sweep.
const PARALLEL_EDGE_EPSILON: f32 = 1e-5;
/// Alignment bound when merging per-triangle manifolds from a mesh.
const TRIANGLE_NORMAL_MERGE: f32 = 0.95;

/// A collision shape at a world pose. Narrowphase works purely on poses; body
/// bookkeeping stays in the pipeline.
#[derive(Clone, Copy)]
pub struct ShapePose<'a> {
    pub shape: &'a CollisionShape,
    pub position: Vec3,
    pub rotation: Quat,
}

impl<'a> ShapePose<'a> {
    pub fn new(shape: &'a CollisionShape, position: Vec3, rotation: Quat) -> Self {
        Self {
            shape,
            position,
            rotation,
        }
    }

    fn to_local_ray(&self, ray: &Ray) -> Ray {
        let inv = self.rotation.inverse();
        Ray {
            origin: inv * (ray.origin - self.position),
            dir: inv * ray.dir,
        }
    }
}

fn hull_world_verts(hull: &Dcel, pose: &ShapePose) -> Vec<Vec3> {
    hull.vertices
        .iter()
        .map(|&v| pose.rotation * v + pose.position)
        .collect()
}

fn capsule_world_segment(pose: &ShapePose, half_height: f32) -> Segment {
    let axis = pose.rotation * Vec3::Y * half_height;
    Segment::new(pose.position - axis, pose.position + axis)
}

/// Contact manifold between two posed shapes, `body1 < body2` being the pool
/// indices used for keying; the manifold normal points body1 → body2.
/// `cached` carries the pair's SAT cache when one exists (hull/hull only).
pub fn contact(
    pose1: &ShapePose,
    pose2: &ShapePose,
    body1: u32,
    body2: u32,
    cached: Option<&SatCacheKind>,
    margin: f32,
) -> PairResult {
    use ShapeGeometry as G;
    match (&pose1.shape.geometry, &pose2.shape.geometry) {
        (G::Sphere { radius: r1 }, G::Sphere { radius: r2 }) => point_contact(
            pose1.position,
            *r1,
            pose2.position,
            *r2,
            margin,
            body1,
            body2,
        ),
        (G::Sphere { radius }, G::Capsule { half_height, .. }) => {
            let seg = capsule_world_segment(pose2, *half_height);
            let on_cap = seg.closest_point_to(pose1.position);
            point_contact(
                pose1.position,
                *radius,
                on_cap,
                capsule_radius(pose2.shape),
                margin,
                body1,
                body2,
            )
        }
        (G::Capsule { half_height, .. }, G::Sphere { radius }) => {
            let seg = capsule_world_segment(pose1, *half_height);
            let on_cap = seg.closest_point_to(pose2.position);
            point_contact(
                on_cap,
                capsule_radius(pose1.shape),
                pose2.position,
                *radius,
                margin,
                body1,
                body2,
            )
        }
        (G::Capsule { half_height: h1, .. }, G::Capsule { half_height: h2, .. }) => {
            let s1 = capsule_world_segment(pose1, *h1);
            let s2 = capsule_world_segment(pose2, *h2);
            let (c1, c2) = s1.closest_points(&s2);
            point_contact(
                c1,
                capsule_radius(pose1.shape),
                c2,
                capsule_radius(pose2.shape),
                margin,
                body1,
                body2,
            )
        }
        (G::ConvexHull(hull), G::Sphere { radius }) => {
            hull_sphere_contact(hull, pose1, pose2.position, *radius, margin, body1, body2, false)
        }
        (G::Sphere { radius }, G::ConvexHull(hull)) => {
            hull_sphere_contact(hull, pose2, pose1.position, *radius, margin, body1, body2, true)
        }
        (G::ConvexHull(hull), G::Capsule { half_height, .. }) => hull_capsule_contact(
            hull,
            pose1,
            capsule_world_segment(pose2, *half_height),
            capsule_radius(pose2.shape),
            margin,
            body1,
            body2,
            false,
        ),
        (G::Capsule { half_height, .. }, G::ConvexHull(hull)) => hull_capsule_contact(
            hull,
            pose2,
            capsule_world_segment(pose1, *half_height),
            capsule_radius(pose1.shape),
            margin,
            body1,
            body2,
            true,
        ),
        (G::ConvexHull(h1), G::ConvexHull(h2)) => {
            hull_hull_contact(h1, pose1, h2, pose2, body1, body2, cached, margin)
        }
        (G::TriMesh(mesh), _) => trimesh_contact(mesh, pose1, pose2, margin, body1, body2, false),
        (_, G::TriMesh(mesh)) => trimesh_contact(mesh, pose2, pose1, margin, body1, body2, true),
    }
}

fn capsule_radius(shape: &CollisionShape) -> f32 {
    match shape.geometry {
        ShapeGeometry::Capsule { radius, .. } => radius,
        _ => unreachable!("capsule geometry expected"),
    }
}

/// Single-point contact between two spherical loci (sphere centers, capsule
/// axis points). Depth may be slightly negative within the margin band.
fn point_contact(
    c1: Vec3,
    r1: f32,
    c2: Vec3,
    r2: f32,
    margin: f32,
    body1: u32,
    body2: u32,
) -> PairResult {
    let delta = c2 - c1;
    let dist = delta.length();
    if dist - r1 - r2 > margin {
        return PairResult::MISS;
    }
    let normal = if dist > 1e-6 { delta / dist } else { Vec3::Y };
    let depth = r1 + r2 - dist;
    let mut manifold = ContactManifold::empty(body1, body2);
    manifold.normal = normal;
    let surface1 = c1 + normal * r1;
    let surface2 = c2 - normal * r2;
    manifold.push((surface1 + surface2) * 0.5, depth);
    PairResult::contact(manifold)
}

#[allow(clippy::too_many_arguments)]
fn hull_sphere_contact(
    hull: &Dcel,
    hull_pose: &ShapePose,
    center: Vec3,
    radius: f32,
    margin: f32,
    body1: u32,
    body2: u32,
    hull_is_second: bool,
) -> PairResult {
    let verts = hull_world_verts(hull, hull_pose);
    let result = gjk::closest_points(&verts, &[center]);

    let (normal_hull_to_sphere, depth, point) = if !result.overlapping && result.distance > 1e-6 {
        if result.distance - radius > margin {
            return PairResult::MISS;
        }
        let normal = (center - result.on_a) / result.distance;
        (normal, radius - result.distance, result.on_a)
    } else {
        // center inside the hull: deepest face pushes the sphere out
        let (face, signed) = deepest_face(hull, &verts, center);
        let n = hull.face_normal(face, &verts);
        (n, radius - signed, center - n * signed)
    };

    let mut manifold = ContactManifold::empty(body1, body2);
    manifold.normal = if hull_is_second {
        -normal_hull_to_sphere
    } else {
        normal_hull_to_sphere
    };
    manifold.push(point, depth);
    PairResult::contact(manifold)
}

/// Face of `hull` whose plane the point is least below (all signed distances
/// negative for an interior point).
fn deepest_face(hull: &Dcel, verts: &[Vec3], point: Vec3) -> (u32, f32) {
    let mut best_face = 0;
    let mut best = f32::NEG_INFINITY;
    for fi in 0..hull.faces.len() as u32 {
        let n = hull.face_normal(fi, verts);
        let v0 = verts[hull.edges[hull.faces[fi as usize].first as usize].origin as usize];
        let signed = (point - v0).dot(n);
        if signed > best {
            best = signed;
            best_face = fi;
        }
    }
    (best_face, best)
}

#[allow(clippy::too_many_arguments)]
fn hull_capsule_contact(
    hull: &Dcel,
    hull_pose: &ShapePose,
    segment: Segment,
    radius: f32,
    margin: f32,
    body1: u32,
    body2: u32,
    hull_is_second: bool,
) -> PairResult {
    let verts = hull_world_verts(hull, hull_pose);
    let ends = [segment.a, segment.b];
    let result = gjk::closest_points(&verts, &ends);

    let orient = |n: Vec3| if hull_is_second { -n } else { n };

    if !result.overlapping && result.distance > 1e-6 {
        if result.distance - radius > margin {
            return PairResult::MISS;
        }
        let normal = (result.on_b - result.on_a) / result.distance;

        // a capsule lying on a face wants a two-point manifold; detect the
        // aligned face and clip the axis segment against it
        let (face, _) = deepest_face(hull, &verts, result.on_b);
        let n_face = hull.face_normal(face, &verts);
        if n_face.dot(normal) > 0.999 && segment.dir().normalize_or_zero().dot(n_face).abs() < 0.05
        {
            if let Some(manifold) = capsule_face_manifold(
                hull, &verts, face, &segment, radius, margin, body1, body2, hull_is_second,
            ) {
                return PairResult::contact(manifold);
            }
        }

        let mut manifold = ContactManifold::empty(body1, body2);
        manifold.normal = orient(normal);
        let capsule_surface = result.on_b - normal * radius;
        manifold.push((result.on_a + capsule_surface) * 0.5, radius - result.distance);
        return PairResult::contact(manifold);
    }

    // deep: reference face against the deeper endpoint, clip the axis
    let sa = deepest_face(hull, &verts, segment.a);
    let sb = deepest_face(hull, &verts, segment.b);
    let face = if sa.1 < sb.1 { sa.0 } else { sb.0 };
    match capsule_face_manifold(
        hull, &verts, face, &segment, radius, margin, body1, body2, hull_is_second,
    ) {
        Some(manifold) => PairResult::contact(manifold),
        None => PairResult::MISS,
    }
}

/// Clips the capsule axis to a reference face of the hull and emits up to two
/// contact points at `radius` offset.
#[allow(clippy::too_many_arguments)]
fn capsule_face_manifold(
    hull: &Dcel,
    verts: &[Vec3],
    face: u32,
    segment: &Segment,
    radius: f32,
    margin: f32,
    body1: u32,
    body2: u32,
    hull_is_second: bool,
) -> Option<ContactManifold> {
    let n = hull.face_normal(face, verts);
    let ring: Vec<Vec3> = hull.face_ring(face).map(|v| verts[v as usize]).collect();
    let clipped = clip_to_face(&[segment.a, segment.b], &ring, n);
    if clipped.is_empty() {
        return None;
    }

    let mut manifold = ContactManifold::empty(body1, body2);
    manifold.normal = if hull_is_second { -n } else { n };
    for p in clipped.iter().take(2) {
        let signed = (*p - ring[0]).dot(n);
        let depth = radius - signed;
        if depth < -margin {
            continue;
        }
        manifold.push(*p - n * signed, depth);
    }
    (manifold.count > 0).then_some(manifold)
}

struct FaceQuery {
    depth: f32,
    face: u32,
    normal: Vec3,
}

struct EdgeQuery {
    depth: f32,
    normal: Vec3,
    edge1: u32,
    edge2: u32,
    s1: Segment,
    s2: Segment,
}

impl EdgeQuery {
    fn empty() -> Self {
        Self {
            depth: f32::NEG_INFINITY,
            normal: Vec3::ZERO,
            edge1: 0,
            edge2: 0,
            s1: Segment::new(Vec3::ZERO, Vec3::ZERO),
            s2: Segment::new(Vec3::ZERO, Vec3::ZERO),
        }
    }
}

/// Separating-axis test for two hulls with warm restart from the pair's SAT
/// cache. See Gregorius, "The Separating Axis Test between Convex Polyhedra"
/// (GDC 2013) for the Gauss-map edge pruning.
#[allow(clippy::too_many_arguments)]
fn hull_hull_contact(
    h1: &Dcel,
    pose1: &ShapePose,
    h2: &Dcel,
    pose2: &ShapePose,
    body1: u32,
    body2: u32,
    cached: Option<&SatCacheKind>,
    _margin: f32,
) -> PairResult {
    let v1 = hull_world_verts(h1, pose1);
    let v2 = hull_world_verts(h2, pose2);

    // ---- warm restart from the cache ----
    if let Some(kind) = cached {
        match *kind {
            SatCacheKind::Separation { axis, .. } => {
                let support1 = crate::collision::shapes::support_of(&v1, axis);
                let support2 = crate::collision::shapes::support_of(&v2, -axis);
                let separation = support2.dot(axis) - support1.dot(axis);
                if separation > 0.0 {
                    return PairResult {
                        manifold: None,
                        sat_cache: Some(SatCacheKind::Separation { axis, separation }),
                        full_sat: false,
                    };
                }
            }
            // a cache can outlive its pair by one tick when a body index is
            // recycled, so witness indices are validated against the hulls
            SatCacheKind::Edge { edge1, edge2 } => {
                if (edge1 as usize) < h1.edges.len() && (edge2 as usize) < h2.edges.len() {
                    let mut query = EdgeQuery::empty();
                    edge_edge_check(&mut query, h1, &v1, edge1, h2, &v2, edge2, pose1.position);
                    if query.depth.is_finite() && query.depth < 0.0 {
                        let (manifold, cache) = edge_query_result(&query, body1, body2);
                        return PairResult {
                            manifold: Some(manifold),
                            sat_cache: Some(cache),
                            full_sat: false,
                        };
                    }
                }
            }
            SatCacheKind::Face { body, face } => {
                let manifold = if body == 0 && (face as usize) < h1.faces.len() {
                    let n_ref = h1.face_normal(face, &v1);
                    face_contact(n_ref, h1, &v1, face, n_ref, h2, &v2, body1, body2)
                } else if body == 1 && (face as usize) < h2.faces.len() {
                    let n_ref = h2.face_normal(face, &v2);
                    face_contact(-n_ref, h2, &v2, face, n_ref, h1, &v1, body1, body2)
                } else {
                    None
                };
                if let Some(manifold) = manifold {
                    return PairResult {
                        manifold: Some(manifold),
                        sat_cache: Some(SatCacheKind::Face { body, face }),
                        full_sat: false,
                    };
                }
            }
        }
    }

    // ---- full SAT ----
    let fq1 = face_separation(h1, &v1, &v2);
    if fq1.depth > 0.0 {
        return PairResult {
            manifold: None,
            sat_cache: Some(SatCacheKind::Separation {
                axis: fq1.normal,
                separation: fq1.depth,
            }),
            full_sat: true,
        };
    }
    let fq2 = face_separation(h2, &v2, &v1);
    if fq2.depth > 0.0 {
        return PairResult {
            manifold: None,
            sat_cache: Some(SatCacheKind::Separation {
                axis: -fq2.normal,
                separation: fq2.depth,
            }),
            full_sat: true,
        };
    }

    let mut eq = EdgeQuery::empty();
    if edge_separation(&mut eq, h1, &v1, h2, &v2, pose1.position) {
        return PairResult {
            manifold: None,
            sat_cache: Some(SatCacheKind::Separation {
                axis: eq.normal,
                separation: eq.depth,
            }),
            full_sat: true,
        };
    }

    if FACE_PREFERENCE * fq1.depth >= eq.depth || FACE_PREFERENCE * fq2.depth >= eq.depth {
        let (cache_body, fq, manifold) = if fq1.depth > fq2.depth {
            let manifold = face_contact(
                fq1.normal, h1, &v1, fq1.face, fq1.normal, h2, &v2, body1, body2,
            );
            (0, &fq1, manifold)
        } else {
            let manifold = face_contact(
                -fq2.normal, h2, &v2, fq2.face, fq2.normal, h1, &v1, body1, body2,
            );
            (1, &fq2, manifold)
        };

        match manifold {
            Some(manifold) => PairResult {
                manifold: Some(manifold),
                sat_cache: Some(SatCacheKind::Face {
                    body: cache_body,
                    face: fq.face,
                }),
                full_sat: true,
            },
            // clipping came up empty: grazing configuration, store the axis
            None => PairResult {
                manifold: None,
                sat_cache: Some(SatCacheKind::Separation {
                    axis: if cache_body == 0 { fq.normal } else { -fq.normal },
                    separation: 0.0,
                }),
                full_sat: true,
            },
        }
    } else {
        let (manifold, cache) = edge_query_result(&eq, body1, body2);
        PairResult {
            manifold: Some(manifold),
            sat_cache: Some(cache),
            full_sat: true,
        }
    }
}

/// Max over faces of `hull` of the min signed distance of `other` vertices.
/// Positive depth means the face plane separates.
fn face_separation(hull: &Dcel, verts: &[Vec3], other: &[Vec3]) -> FaceQuery {
    let mut query = FaceQuery {
        depth: f32::NEG_INFINITY,
        face: 0,
        normal: Vec3::ZERO,
    };
    for fi in 0..hull.faces.len() as u32 {
        let n = hull.face_normal(fi, verts);
        let v0 = verts[hull.edges[hull.faces[fi as usize].first as usize].origin as usize];
        let plane = Plane::new(n, v0);
        let mut min_dist = f32::INFINITY;
        for &v in other {
            min_dist = min_dist.min(plane.signed_distance(v));
        }
        if min_dist > query.depth {
            query.depth = min_dist;
            query.face = fi;
            query.normal = n;
        }
        if min_dist > 0.0 {
            // early out: separating face found
            query.depth = min_dist;
            query.face = fi;
            query.normal = n;
            return query;
        }
    }
    query
}

/// Gauss-map test: do the arcs of edge A and edge −B cross? Equivalent to the
/// edge pair forming a face of the Minkowski difference.
fn is_minkowski_face(n1_1: Vec3, n1_2: Vec3, n2_1: Vec3, n2_2: Vec3, arc1: Vec3, arc2: Vec3) -> bool {
    let n1_1d = n1_1.dot(arc2);
    let n1_2d = n1_2.dot(arc2);
    let n2_1d = n2_1.dot(arc1);
    let n2_2d = n2_2.dot(arc1);
    // two plane-crossing tests plus the hemisphere test
    n1_1d * n1_2d < 0.0 && n2_1d * n2_2d < 0.0 && n1_2d * n2_1d > 0.0
}

#[allow(clippy::too_many_arguments)]
fn edge_edge_check(
    query: &mut EdgeQuery,
    h1: &Dcel,
    v1: &[Vec3],
    e1: u32,
    h2: &Dcel,
    v2: &[Vec3],
    e2: u32,
    center1: Vec3,
) {
    let t1 = h1.edges[e1 as usize].twin;
    let t2 = h2.edges[e2 as usize].twin;

    let n1_1 = h1.face_normal(h1.edges[e1 as usize].face, v1);
    let n1_2 = h1.face_normal(h1.edges[t1 as usize].face, v1);
    // Minkowski difference A − B: the Gauss map of B enters negated
    let n2_1 = -h2.face_normal(h2.edges[e2 as usize].face, v2);
    let n2_2 = -h2.face_normal(h2.edges[t2 as usize].face, v2);

    let s1 = Segment::new(
        v1[h1.edges[e1 as usize].origin as usize],
        v1[h1.edges[t1 as usize].origin as usize],
    );
    let s2 = Segment::new(
        v2[h2.edges[e2 as usize].origin as usize],
        v2[h2.edges[t2 as usize].origin as usize],
    );

    if !is_minkowski_face(n1_1, n1_2, n2_1, n2_2, s1.dir(), s2.dir()) {
        return;
    }

    let d1 = s1.dir();
    let d2 = s2.dir();
    let cross_sq = d1.length_squared() * d2.length_squared() - d1.dot(d2) * d1.dot(d2);
    if cross_sq <= PARALLEL_EDGE_EPSILON {
        return;
    }

    let mut axis = d1.cross(d2).normalize();
    if axis.dot(s1.a - center1) < 0.0 {
        axis = -axis;
    }
    let dist = axis.dot(s2.a - s1.a);
    if dist > query.depth {
        query.depth = dist;
        query.normal = axis;
        query.edge1 = e1;
        query.edge2 = e2;
        query.s1 = s1;
        query.s2 = s2;
    }
}

fn edge_separation(
    query: &mut EdgeQuery,
    h1: &Dcel,
    v1: &[Vec3],
    h2: &Dcel,
    v2: &[Vec3],
    center1: Vec3,
) -> bool {
    for e1 in 0..h1.edges.len() as u32 {
        if h1.edges[e1 as usize].twin < e1 {
            continue;
        }
        for e2 in 0..h2.edges.len() as u32 {
            if h2.edges[e2 as usize].twin < e2 {
                continue;
            }
            edge_edge_check(query, h1, v1, e1, h2, v2, e2, center1);
            if query.depth > 0.0 {
                return true;
            }
        }
    }
    false
}

fn edge_query_result(query: &EdgeQuery, body1: u32, body2: u32) -> (ContactManifold, SatCacheKind) {
    let (c1, c2) = query.s1.closest_points(&query.s2);
    let mut manifold = ContactManifold::empty(body1, body2);
    manifold.normal = query.normal;
    manifold.push((c1 + c2) * 0.5, -query.depth);
    crate::events::debug_segment(c1, c2, [0.0, 0.8, 0.8, 1.0]);
    (
        manifold,
        SatCacheKind::Edge {
            edge1: query.edge1,
            edge2: query.edge2,
        },
    )
}

/// Clips the incident face of `inc` against the side planes of the reference
/// face and keeps clip points with non-negative penetration, projected onto
/// the reference plane. `manifold_normal` is the body1 → body2 normal.
#[allow(clippy::too_many_arguments)]
fn face_contact(
    manifold_normal: Vec3,
    ref_hull: &Dcel,
    ref_verts: &[Vec3],
    ref_face: u32,
    ref_normal: Vec3,
    inc_hull: &Dcel,
    inc_verts: &[Vec3],
    body1: u32,
    body2: u32,
) -> Option<ContactManifold> {
    // incident face: most anti-parallel to the reference normal
    let mut inc_face = 0u32;
    let mut min_dot = f32::INFINITY;
    for fi in 0..inc_hull.faces.len() as u32 {
        let n = inc_hull.face_normal(fi, inc_verts);
        let dot = n.dot(ref_normal);
        if dot < min_dot {
            min_dot = dot;
            inc_face = fi;
        }
    }

    let ref_ring: Vec<Vec3> = ref_hull
        .face_ring(ref_face)
        .map(|v| ref_verts[v as usize])
        .collect();
    let inc_ring: Vec<Vec3> = inc_hull
        .face_ring(inc_face)
        .map(|v| inc_verts[v as usize])
        .collect();

    let clipped = clip_to_face(&inc_ring, &ref_ring, ref_normal);
    if clipped.is_empty() {
        return None;
    }

    let mut kept: Vec<(Vec3, f32)> = Vec::with_capacity(clipped.len());
    for p in clipped {
        let depth = -(p - ref_ring[0]).dot(ref_normal);
        if depth >= 0.0 {
            // store the point on the reference plane
            kept.push((p + ref_normal * depth, depth));
        }
    }
    if kept.is_empty() {
        return None;
    }

    for i in 0..kept.len() {
        crate::events::debug_segment(
            kept[i].0,
            kept[(i + 1) % kept.len()].0,
            [0.8, 0.6, 0.1, 1.0],
        );
    }

    let reduced = reduce_manifold(&kept, ref_normal);
    let mut manifold = ContactManifold::empty(body1, body2);
    manifold.normal = manifold_normal;
    for (p, d) in reduced {
        manifold.push(p, d);
    }
    Some(manifold)
}

// ---------------------------------------------------------------------------
// triangle mesh
// ---------------------------------------------------------------------------

/// Convex-vs-trimesh contact: BVH gathers candidate triangles in mesh-local
/// space, the convex-vs-triangle path runs per candidate, and compatible
/// manifolds merge onto the deepest normal.
fn trimesh_contact(
    mesh: &TriMesh,
    mesh_pose: &ShapePose,
    other: &ShapePose,
    margin: f32,
    body1: u32,
    body2: u32,
    mesh_is_second: bool,
) -> PairResult {
    if matches!(other.shape.geometry, ShapeGeometry::TriMesh(_)) {
        // two immovable meshes never produce contacts
        return PairResult::MISS;
    }

    let world_query = other
        .shape
        .rotated_local_bbox(other.rotation)
        .translated(other.position)
        .inflated(margin);
    let inv = mesh_pose.rotation.inverse();
    let local_query = world_query
        .translated(-mesh_pose.position)
        .rotated(inv);

    let mut candidates = Vec::new();
    mesh.overlap_triangles(&local_query, &mut candidates);
    if candidates.is_empty() {
        return PairResult::MISS;
    }

    let mut merged: Vec<(Vec3, f32)> = Vec::new();
    let mut best_normal = Vec3::ZERO;
    let mut best_depth = f32::NEG_INFINITY;
    let mut all: Vec<(Vec3, Vec3, f32)> = Vec::new();

    for tri in candidates {
        let (a, b, c) = mesh.triangle(tri);
        let a = mesh_pose.rotation * a + mesh_pose.position;
        let b = mesh_pose.rotation * b + mesh_pose.position;
        let c = mesh_pose.rotation * c + mesh_pose.position;

        let hits = triangle_convex_contact(a, b, c, other, margin);
        for (normal, point, depth) in hits {
            if depth > best_depth {
                best_depth = depth;
                best_normal = normal;
            }
            all.push((normal, point, depth));
        }
    }
    if all.is_empty() {
        return PairResult::MISS;
    }

    for (normal, point, depth) in all {
        if normal.dot(best_normal) > TRIANGLE_NORMAL_MERGE {
            merged.push((point, depth));
        }
    }
    let reduced = reduce_manifold(&merged, best_normal);

    let mut manifold = ContactManifold::empty(body1, body2);
    manifold.normal = if mesh_is_second {
        -best_normal
    } else {
        best_normal
    };
    for (p, d) in reduced {
        manifold.push(p, d);
    }
    PairResult::contact(manifold)
}

/// Contacts of a world triangle against a convex shape; normals point from
/// the triangle to the shape.
fn triangle_convex_contact(
    a: Vec3,
    b: Vec3,
    c: Vec3,
    other: &ShapePose,
    margin: f32,
) -> Vec<(Vec3, Vec3, f32)> {
    match &other.shape.geometry {
        ShapeGeometry::Sphere { radius } => {
            sphere_triangle(other.position, *radius, a, b, c, margin)
                .into_iter()
                .collect()
        }
        ShapeGeometry::Capsule {
            half_height,
            radius,
        } => {
            let seg = capsule_world_segment(other, *half_height);
            let mut out = Vec::new();
            for end in [seg.a, seg.b] {
                if let Some(hit) = sphere_triangle(end, *radius, a, b, c, margin) {
                    out.push(hit);
                }
            }
            if out.is_empty() {
                // axis crossing the interior without either end being closest
                let (on_seg, on_tri) = segment_triangle_closest(&seg, a, b, c);
                let delta = on_seg - on_tri;
                let dist = delta.length();
                if dist - radius <= margin && dist > 1e-6 {
                    out.push((delta / dist, on_tri, radius - dist));
                }
            }
            out
        }
        ShapeGeometry::ConvexHull(hull) => hull_triangle(hull, other, a, b, c, margin),
        ShapeGeometry::TriMesh(_) => Vec::new(),
    }
}

fn sphere_triangle(
    center: Vec3,
    radius: f32,
    a: Vec3,
    b: Vec3,
    c: Vec3,
    margin: f32,
) -> Option<(Vec3, Vec3, f32)> {
    let closest = closest_point_on_triangle(center, a, b, c);
    let delta = center - closest;
    let dist = delta.length();
    if dist - radius > margin {
        return None;
    }
    let normal = if dist > 1e-6 {
        delta / dist
    } else {
        (b - a).cross(c - a).normalize()
    };
    Some((normal, closest, radius - dist))
}

fn segment_triangle_closest(seg: &Segment, a: Vec3, b: Vec3, c: Vec3) -> (Vec3, Vec3) {
    let mut best = (seg.a, closest_point_on_triangle(seg.a, a, b, c));
    let mut best_dist = (best.0 - best.1).length_squared();

    let end = (seg.b, closest_point_on_triangle(seg.b, a, b, c));
    let end_dist = (end.0 - end.1).length_squared();
    if end_dist < best_dist {
        best = end;
        best_dist = end_dist;
    }

    for edge in [Segment::new(a, b), Segment::new(b, c), Segment::new(c, a)] {
        let (on_seg, on_edge) = seg.closest_points(&edge);
        let d = (on_seg - on_edge).length_squared();
        if d < best_dist {
            best = (on_seg, on_edge);
            best_dist = d;
        }
    }
    best
}

/// Face-query SAT between a hull and a single triangle. The triangle plane
/// (oriented towards the hull) and the hull faces are the candidate axes;
/// the deeper-side face clips the other feature.
fn hull_triangle(
    hull: &Dcel,
    pose: &ShapePose,
    a: Vec3,
    b: Vec3,
    c: Vec3,
    margin: f32,
) -> Vec<(Vec3, Vec3, f32)> {
    let verts = hull_world_verts(hull, pose);
    let mut n_tri = (b - a).cross(c - a).normalize_or_zero();
    if n_tri == Vec3::ZERO {
        return Vec::new();
    }
    let hull_center = pose.position;
    if (hull_center - a).dot(n_tri) < 0.0 {
        n_tri = -n_tri;
    }

    // separation on the triangle plane
    let tri_plane = Plane::new(n_tri, a);
    let mut sep_tri = f32::INFINITY;
    for &v in &verts {
        sep_tri = sep_tri.min(tri_plane.signed_distance(v));
    }
    if sep_tri > margin {
        return Vec::new();
    }

    // separation on hull faces against the triangle corners
    let fq = face_separation(hull, &verts, &[a, b, c]);
    if fq.depth > margin {
        return Vec::new();
    }

    if sep_tri >= FACE_PREFERENCE * fq.depth {
        // triangle is the reference face: clip the incident hull face
        let mut inc_face = 0u32;
        let mut min_dot = f32::INFINITY;
        for fi in 0..hull.faces.len() as u32 {
            let n = hull.face_normal(fi, &verts);
            if n.dot(n_tri) < min_dot {
                min_dot = n.dot(n_tri);
                inc_face = fi;
            }
        }
        let inc_ring: Vec<Vec3> = hull
            .face_ring(inc_face)
            .map(|v| verts[v as usize])
            .collect();
        let clipped = clip_to_face(&inc_ring, &[a, b, c], n_tri);
        clipped
            .into_iter()
            .filter_map(|p| {
                let depth = -tri_plane.signed_distance(p);
                (depth >= -margin).then(|| (n_tri, p + n_tri * depth.max(0.0), depth))
            })
            .collect()
    } else {
        // hull face is the reference: clip the triangle against it
        let n_ref = fq.normal;
        let ring: Vec<Vec3> = hull
            .face_ring(fq.face)
            .map(|v| verts[v as usize])
            .collect();
        let clipped = clip_to_face(&[a, b, c], &ring, n_ref);
        let plane = Plane::new(n_ref, ring[0]);
        clipped
            .into_iter()
            .filter_map(|p| {
                let depth = -plane.signed_distance(p);
                // normal still triangle → hull
                (depth >= -margin).then(|| (-n_ref, p + n_ref * depth.max(0.0), depth))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// distance and boolean queries
// ---------------------------------------------------------------------------

/// Distance between two posed shapes with surface witness points. Returns
/// zero with coincident witnesses when the shapes intersect.
pub fn distance(pose1: &ShapePose, pose2: &ShapePose) -> (f32, Vec3, Vec3) {
    use ShapeGeometry as G;

    let radius = |shape: &CollisionShape| match shape.geometry {
        G::Sphere { radius } => radius,
        G::Capsule { radius, .. } => radius,
        _ => 0.0,
    };

    let core_points = |pose: &ShapePose| -> Vec<Vec3> {
        match &pose.shape.geometry {
            G::Sphere { .. } => vec![pose.position],
            G::Capsule { half_height, .. } => {
                let seg = capsule_world_segment(pose, *half_height);
                vec![seg.a, seg.b]
            }
            G::ConvexHull(hull) => hull_world_verts(hull, pose),
            G::TriMesh(_) => Vec::new(),
        }
    };

    // mesh pairs reduce to per-triangle queries
    if let G::TriMesh(mesh) = &pose1.shape.geometry {
        return trimesh_distance(mesh, pose1, pose2, false);
    }
    if let G::TriMesh(mesh) = &pose2.shape.geometry {
        return trimesh_distance(mesh, pose2, pose1, true);
    }

    let pts1 = core_points(pose1);
    let pts2 = core_points(pose2);
    let r1 = radius(pose1.shape);
    let r2 = radius(pose2.shape);

    let result = gjk::closest_points(&pts1, &pts2);
    if result.overlapping || result.distance <= r1 + r2 {
        return (0.0, result.on_a, result.on_b);
    }
    let dir = (result.on_b - result.on_a) / result.distance;
    (
        result.distance - r1 - r2,
        result.on_a + dir * r1,
        result.on_b - dir * r2,
    )
}

fn trimesh_distance(
    mesh: &TriMesh,
    mesh_pose: &ShapePose,
    other: &ShapePose,
    flipped: bool,
) -> (f32, Vec3, Vec3) {
    let mut best = (f32::INFINITY, Vec3::ZERO, Vec3::ZERO);
    for tri in 0..mesh.indices.len() as u32 {
        let (a, b, c) = mesh.triangle(tri);
        let tri_world = [
            mesh_pose.rotation * a + mesh_pose.position,
            mesh_pose.rotation * b + mesh_pose.position,
            mesh_pose.rotation * c + mesh_pose.position,
        ];
        let tri_shape = CollisionShape::convex_hull_unchecked_triangle(&tri_world);
        let tri_pose = ShapePose::new(&tri_shape, Vec3::ZERO, Quat::IDENTITY);
        let (d, on_tri, on_other) = distance(&tri_pose, other);
        if d < best.0 {
            best = (d, on_tri, on_other);
        }
        if d == 0.0 {
            break;
        }
    }
    if flipped {
        (best.0, best.2, best.1)
    } else {
        best
    }
}

/// Boolean intersection with a shared margin.
pub fn test(pose1: &ShapePose, pose2: &ShapePose, margin: f32) -> bool {
    distance(pose1, pose2).0 <= margin
}

// ---------------------------------------------------------------------------
// raycast
// ---------------------------------------------------------------------------

/// Ray parameter of the closest hit on a posed shape, `f32::INFINITY` on miss.
pub fn raycast(pose: &ShapePose, ray: &Ray) -> f32 {
    match &pose.shape.geometry {
        ShapeGeometry::Sphere { radius } => ray_sphere(ray, pose.position, *radius),
        ShapeGeometry::Capsule {
            half_height,
            radius,
        } => {
            let local = pose.to_local_ray(ray);
            ray_capsule_local(&local, *half_height, *radius)
        }
        ShapeGeometry::ConvexHull(hull) => {
            let local = pose.to_local_ray(ray);
            ray_hull_local(&local, hull)
        }
        ShapeGeometry::TriMesh(mesh) => {
            let local = pose.to_local_ray(ray);
            mesh.raycast(&local)
        }
    }
}

fn ray_sphere(ray: &Ray, center: Vec3, radius: f32) -> f32 {
    let oc = ray.origin - center;
    let b = oc.dot(ray.dir);
    let c = oc.length_squared() - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return f32::INFINITY;
    }
    let t = -b - disc.sqrt();
    if t >= 0.0 {
        t
    } else if c <= 0.0 {
        0.0
    } else {
        f32::INFINITY
    }
}

/// Capsule raycast in the local frame (axis along Y).
fn ray_capsule_local(ray: &Ray, half_height: f32, radius: f32) -> f32 {
    let mut best = f32::INFINITY;

    // cylindrical mantle
    let a = ray.dir.x * ray.dir.x + ray.dir.z * ray.dir.z;
    if a > 1e-12 {
        let b = ray.origin.x * ray.dir.x + ray.origin.z * ray.dir.z;
        let c = ray.origin.x * ray.origin.x + ray.origin.z * ray.origin.z - radius * radius;
        let disc = b * b - a * c;
        if disc >= 0.0 {
            let t = (-b - disc.sqrt()) / a;
            if t >= 0.0 {
                let y = ray.origin.y + ray.dir.y * t;
                if y.abs() <= half_height {
                    best = t;
                }
            }
        }
    }

    for cap in [half_height, -half_height] {
        let t = ray_sphere(ray, Vec3::new(0.0, cap, 0.0), radius);
        best = best.min(t);
    }
    best
}

/// Ray vs convex hull by clipping the ray against every face half-space.
fn ray_hull_local(ray: &Ray, hull: &Dcel) -> f32 {
    let mut t_enter = 0.0f32;
    let mut t_exit = f32::INFINITY;
    for fi in 0..hull.faces.len() as u32 {
        let n = hull.face_normal(fi, &hull.vertices);
        let v0 = hull.vertices[hull.edges[hull.faces[fi as usize].first as usize].origin as usize];
        let denom = n.dot(ray.dir);
        let dist = n.dot(v0 - ray.origin);
        if denom.abs() < 1e-12 {
            if dist < 0.0 {
                return f32::INFINITY;
            }
            continue;
        }
        let t = dist / denom;
        if denom < 0.0 {
            t_enter = t_enter.max(t);
        } else {
            t_exit = t_exit.min(t);
        }
        if t_enter > t_exit {
            return f32::INFINITY;
        }
    }
    t_enter
}

impl CollisionShape {
    /// Throwaway triangle hull used by mesh distance queries; not registered
    /// in any database.
    fn convex_hull_unchecked_triangle(verts: &[Vec3; 3]) -> CollisionShape {
        let dcel = Dcel::from_faces(verts.to_vec(), &[vec![0, 1, 2], vec![0, 2, 1]]);
        CollisionShape {
            geometry: ShapeGeometry::ConvexHull(dcel),
            volume: 0.0,
            center_of_mass: (verts[0] + verts[1] + verts[2]) / 3.0,
            unit_inertia: glam::Mat3::IDENTITY,
        }
    }
}

/// Closest hit of a ray against a whole body shape list is handled by the
/// pipeline; this helper only exists for triangle tests.
pub fn raycast_triangle(ray: &Ray, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    ray_triangle(ray, a, b, c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn shape_pose(shape: &CollisionShape, position: Vec3) -> ShapePose<'_> {
        ShapePose::new(shape, position, Quat::IDENTITY)
    }

    #[test]
    fn sphere_sphere_touching_produces_midpoint() {
        let s = CollisionShape::sphere(0.5);
        let p1 = shape_pose(&s, Vec3::ZERO);
        let p2 = shape_pose(&s, Vec3::new(0.9, 0.0, 0.0));
        let result = contact(&p1, &p2, 0, 1, None, 0.005);
        let manifold = result.manifold.expect("overlap expected");
        assert_eq!(manifold.count, 1);
        assert_relative_eq!(manifold.normal.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(manifold.depths[0], 0.1, epsilon = 1e-5);
        assert_relative_eq!(manifold.points[0].x, 0.45, epsilon = 1e-5);
    }

    #[test]
    fn sphere_sphere_outside_margin_misses() {
        let s = CollisionShape::sphere(0.5);
        let p1 = shape_pose(&s, Vec3::ZERO);
        let p2 = shape_pose(&s, Vec3::new(1.2, 0.0, 0.0));
        assert!(contact(&p1, &p2, 0, 1, None, 0.005).manifold.is_none());
    }

    #[test]
    fn hull_hull_face_contact_makes_four_points() {
        let cube = CollisionShape::cuboid(Vec3::splat(0.5));
        let p1 = shape_pose(&cube, Vec3::ZERO);
        let p2 = shape_pose(&cube, Vec3::new(0.0, 0.95, 0.0));
        let result = contact(&p1, &p2, 0, 1, None, 0.005);
        assert!(result.full_sat);
        let manifold = result.manifold.expect("stacked cubes touch");
        assert_eq!(manifold.count, 4);
        assert_relative_eq!(manifold.normal.y, 1.0, epsilon = 1e-4);
        for i in 0..4 {
            assert_relative_eq!(manifold.depths[i], 0.05, epsilon = 1e-4);
        }
        assert!(matches!(
            result.sat_cache,
            Some(SatCacheKind::Face { .. })
        ));
    }

    #[test]
    fn hull_hull_cached_face_skips_full_sat() {
        let cube = CollisionShape::cuboid(Vec3::splat(0.5));
        let p1 = shape_pose(&cube, Vec3::ZERO);
        let p2 = shape_pose(&cube, Vec3::new(0.0, 0.95, 0.0));
        let first = contact(&p1, &p2, 0, 1, None, 0.005);
        let cache = first.sat_cache.unwrap();
        let second = contact(&p1, &p2, 0, 1, Some(&cache), 0.005);
        assert!(!second.full_sat);
        assert_eq!(second.manifold.unwrap().count, 4);
    }

    #[test]
    fn hull_hull_separated_caches_axis() {
        let cube = CollisionShape::cuboid(Vec3::splat(0.5));
        let p1 = shape_pose(&cube, Vec3::ZERO);
        let p2 = shape_pose(&cube, Vec3::new(3.0, 0.0, 0.0));
        let result = contact(&p1, &p2, 0, 1, None, 0.005);
        assert!(result.manifold.is_none());
        let Some(SatCacheKind::Separation { separation, .. }) = result.sat_cache else {
            panic!("expected separation cache");
        };
        assert_relative_eq!(separation, 2.0, epsilon = 1e-4);

        // cached axis confirms separation without a full sweep
        let again = contact(&p1, &p2, 0, 1, result.sat_cache.as_ref(), 0.005);
        assert!(!again.full_sat);
        assert!(again.manifold.is_none());
    }

    #[test]
    fn hull_hull_edge_contact_single_point() {
        let cube = CollisionShape::cuboid(Vec3::splat(0.5));
        let p1 = shape_pose(&cube, Vec3::ZERO);
        // rotate 45° about X and Y so edges cross
        let rot = Quat::from_rotation_y(std::f32::consts::FRAC_PI_4)
            * Quat::from_rotation_x(std::f32::consts::FRAC_PI_4);
        let p2 = ShapePose::new(&cube, Vec3::new(0.0, 1.15, 0.0), rot);
        let result = contact(&p1, &p2, 0, 1, None, 0.01);
        if let Some(manifold) = result.manifold {
            assert!(manifold.count >= 1);
            assert!(manifold.normal.y > 0.5);
        }
    }

    #[test]
    fn capsule_on_hull_face_gets_two_points() {
        let slab = CollisionShape::cuboid(Vec3::new(5.0, 0.1, 5.0));
        let cap = CollisionShape::capsule(1.0, 0.3);
        let p1 = shape_pose(&slab, Vec3::ZERO);
        // capsule axis horizontal, resting on the top face
        let rot = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let p2 = ShapePose::new(&cap, Vec3::new(0.0, 0.38, 0.0), rot);
        let result = contact(&p1, &p2, 0, 1, None, 0.005);
        let manifold = result.manifold.expect("capsule rests on slab");
        assert!(manifold.count >= 1);
        assert!(manifold.normal.y > 0.9);
    }

    #[test]
    fn distance_between_separated_hulls() {
        let cube = CollisionShape::cuboid(Vec3::splat(0.5));
        let p1 = shape_pose(&cube, Vec3::ZERO);
        let p2 = shape_pose(&cube, Vec3::new(2.0, 0.0, 0.0));
        let (d, on1, on2) = distance(&p1, &p2);
        assert_relative_eq!(d, 1.0, epsilon = 1e-4);
        assert_relative_eq!(on1.x, 0.5, epsilon = 1e-4);
        assert_relative_eq!(on2.x, 1.5, epsilon = 1e-4);
    }

    #[test]
    fn raycast_hits_cuboid_face() {
        let cube = CollisionShape::cuboid(Vec3::splat(0.5));
        let pose = shape_pose(&cube, Vec3::new(0.0, 2.0, 0.0));
        let ray = Ray::new(Vec3::new(0.0, 10.0, 0.0), -Vec3::Y);
        assert_relative_eq!(raycast(&pose, &ray), 7.5, epsilon = 1e-4);
    }

    #[test]
    fn raycast_sphere_from_inside_returns_zero() {
        let s = CollisionShape::sphere(1.0);
        let pose = shape_pose(&s, Vec3::ZERO);
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert_eq!(raycast(&pose, &ray), 0.0);
    }

    #[test]
    fn raycast_capsule_mantle() {
        let cap = CollisionShape::capsule(1.0, 0.5);
        let pose = shape_pose(&cap, Vec3::ZERO);
        let ray = Ray::new(Vec3::new(5.0, 0.0, 0.0), -Vec3::X);
        assert_relative_eq!(raycast(&pose, &ray), 4.5, epsilon = 1e-4);
    }

    #[test]
    fn sphere_trimesh_contact_from_above() {
        let mesh = TriMesh::new(
            vec![
                Vec3::new(-5.0, 0.0, -5.0),
                Vec3::new(5.0, 0.0, -5.0),
                Vec3::new(5.0, 0.0, 5.0),
                Vec3::new(-5.0, 0.0, 5.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        let mesh_shape = CollisionShape::tri_mesh(mesh);
        let sphere = CollisionShape::sphere(0.5);
        let p1 = shape_pose(&mesh_shape, Vec3::ZERO);
        let p2 = shape_pose(&sphere, Vec3::new(0.0, 0.45, 0.0));
        let result = contact(&p1, &p2, 0, 1, None, 0.005);
        let manifold = result.manifold.expect("sphere touches mesh");
        assert_relative_eq!(manifold.normal.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(manifold.depths[0], 0.05, epsilon = 1e-5);
    }
}
