use glam::{Mat3, Vec3};

use crate::utils::math::Aabb;

/// Half-edge of a convex polyhedron. Edges of a face are stored contiguously,
/// so the successor of edge `i` inside its face is implicit.
#[derive(Debug, Clone, Copy)]
pub struct HalfEdge {
    pub origin: u32,
    pub twin: u32,
    pub face: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Face {
    pub first: u32,
    pub count: u32,
}

/// Doubly-connected edge list of a convex hull.
#[derive(Debug, Clone, Default)]
pub struct Dcel {
    pub vertices: Vec<Vec3>,
    pub edges: Vec<HalfEdge>,
    pub faces: Vec<Face>,
}

impl Dcel {
    /// Builds the half-edge structure from faces given as CCW vertex rings.
    /// Twins are matched over undirected vertex pairs; every edge of a closed
    /// convex polyhedron has exactly one.
    pub fn from_faces(vertices: Vec<Vec3>, face_rings: &[Vec<u32>]) -> Self {
        let mut edges = Vec::new();
        let mut faces = Vec::with_capacity(face_rings.len());
        let mut by_pair = std::collections::HashMap::new();

        for (fi, ring) in face_rings.iter().enumerate() {
            debug_assert!(ring.len() >= 3);
            let first = edges.len() as u32;
            faces.push(Face {
                first,
                count: ring.len() as u32,
            });
            for (i, &origin) in ring.iter().enumerate() {
                let dest = ring[(i + 1) % ring.len()];
                let ei = edges.len() as u32;
                edges.push(HalfEdge {
                    origin,
                    twin: u32::MAX,
                    face: fi as u32,
                });
                let key = (origin.min(dest), origin.max(dest));
                if let Some(other) = by_pair.insert(key, ei) {
                    edges[other as usize].twin = ei;
                    edges[ei as usize].twin = other;
                }
            }
        }
        debug_assert!(edges.iter().all(|e| e.twin != u32::MAX));

        Self {
            vertices,
            edges,
            faces,
        }
    }

    /// Axis-aligned box hull; the canonical test shape.
    pub fn cuboid(half: Vec3) -> Self {
        let v = |x: f32, y: f32, z: f32| Vec3::new(x * half.x, y * half.y, z * half.z);
        let vertices = vec![
            v(-1.0, -1.0, -1.0),
            v(1.0, -1.0, -1.0),
            v(1.0, 1.0, -1.0),
            v(-1.0, 1.0, -1.0),
            v(-1.0, -1.0, 1.0),
            v(1.0, -1.0, 1.0),
            v(1.0, 1.0, 1.0),
            v(-1.0, 1.0, 1.0),
        ];
        let rings = [
            vec![0, 3, 2, 1], // -z
            vec![4, 5, 6, 7], // +z
            vec![0, 1, 5, 4], // -y
            vec![2, 3, 7, 6], // +y
            vec![0, 4, 7, 3], // -x
            vec![1, 2, 6, 5], // +x
        ];
        Self::from_faces(vertices, &rings)
    }

    pub fn face_ring(&self, face: u32) -> impl Iterator<Item = u32> + '_ {
        let f = self.faces[face as usize];
        (f.first..f.first + f.count).map(move |ei| self.edges[ei as usize].origin)
    }

    /// Unit face normal from the first three ring vertices in `verts`, which
    /// may be the local vertices or a world-transformed copy.
    pub fn face_normal(&self, face: u32, verts: &[Vec3]) -> Vec3 {
        let f = self.faces[face as usize];
        let a = verts[self.edges[f.first as usize].origin as usize];
        let b = verts[self.edges[f.first as usize + 1].origin as usize];
        let c = verts[self.edges[f.first as usize + 2].origin as usize];
        (b - a).cross(c - a).normalize()
    }

    pub fn support(&self, dir: Vec3) -> Vec3 {
        let mut best = self.vertices[0];
        let mut best_dot = best.dot(dir);
        for &v in &self.vertices[1..] {
            let d = v.dot(dir);
            if d > best_dot {
                best_dot = d;
                best = v;
            }
        }
        best
    }
}

pub fn support_of(verts: &[Vec3], dir: Vec3) -> Vec3 {
    let mut best = verts[0];
    let mut best_dot = best.dot(dir);
    for &v in &verts[1..] {
        let d = v.dot(dir);
        if d > best_dot {
            best_dot = d;
            best = v;
        }
    }
    best
}

/// Triangle mesh with an internal static BVH, for immovable world geometry.
#[derive(Debug, Clone)]
pub struct TriMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
    nodes: Vec<MeshNode>,
    root: u32,
}

#[derive(Debug, Clone, Copy)]
struct MeshNode {
    bbox: Aabb,
    // leaf when right == u32::MAX; left then holds the triangle index
    left: u32,
    right: u32,
}

impl TriMesh {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<[u32; 3]>) -> Self {
        assert!(!indices.is_empty(), "empty triangle mesh");
        let mut mesh = Self {
            vertices,
            indices,
            nodes: Vec::new(),
            root: 0,
        };
        let mut order: Vec<u32> = (0..mesh.indices.len() as u32).collect();
        mesh.root = mesh.build(&mut order);
        mesh
    }

    fn triangle_bbox(&self, tri: u32) -> Aabb {
        let [i0, i1, i2] = self.indices[tri as usize];
        let a = self.vertices[i0 as usize];
        let b = self.vertices[i1 as usize];
        let c = self.vertices[i2 as usize];
        Aabb::from_min_max(a.min(b).min(c), a.max(b).max(c))
    }

    pub fn triangle(&self, tri: u32) -> (Vec3, Vec3, Vec3) {
        let [i0, i1, i2] = self.indices[tri as usize];
        (
            self.vertices[i0 as usize],
            self.vertices[i1 as usize],
            self.vertices[i2 as usize],
        )
    }

    pub fn root_bbox(&self) -> Aabb {
        self.nodes[self.root as usize].bbox
    }

    fn build(&mut self, order: &mut [u32]) -> u32 {
        let mut bbox = self.triangle_bbox(order[0]);
        for &tri in order.iter().skip(1) {
            bbox = bbox.union(&self.triangle_bbox(tri));
        }

        if order.len() == 1 {
            self.nodes.push(MeshNode {
                bbox,
                left: order[0],
                right: u32::MAX,
            });
            return self.nodes.len() as u32 - 1;
        }

        // median split along the widest centroid axis
        let extent = bbox.half * 2.0;
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };
        let mid = order.len() / 2;
        order.select_nth_unstable_by(mid, |&a, &b| {
            let ca = self.triangle_bbox(a).center[axis];
            let cb = self.triangle_bbox(b).center[axis];
            ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let (left_half, right_half) = order.split_at_mut(mid);
        // recurse on temporaries to appease the borrow of self.nodes
        let mut left_order: Vec<u32> = left_half.to_vec();
        let mut right_order: Vec<u32> = right_half.to_vec();
        let left = self.build(&mut left_order);
        let right = self.build(&mut right_order);
        self.nodes.push(MeshNode { bbox, left, right });
        self.nodes.len() as u32 - 1
    }

    /// Pushes indices of triangles whose bbox overlaps `query` (local frame).
    pub fn overlap_triangles(&self, query: &Aabb, out: &mut Vec<u32>) {
        let mut stack = vec![self.root];
        while let Some(ni) = stack.pop() {
            let node = self.nodes[ni as usize];
            if !node.bbox.overlaps(query) {
                continue;
            }
            if node.right == u32::MAX {
                out.push(node.left);
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }

    /// Closest-hit raycast in the mesh local frame.
    pub fn raycast(&self, ray: &crate::utils::math::Ray) -> f32 {
        let mut best = f32::INFINITY;
        let mut stack = vec![self.root];
        while let Some(ni) = stack.pop() {
            let node = self.nodes[ni as usize];
            match node.bbox.ray_entry(ray, best) {
                Some(t) if t < best => {}
                _ => continue,
            }
            if node.right == u32::MAX {
                let (a, b, c) = self.triangle(node.left);
                if let Some(t) = ray_triangle(ray, a, b, c) {
                    best = best.min(t);
                }
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
        best
    }
}

/// Möller–Trumbore, double-sided.
pub fn ray_triangle(ray: &crate::utils::math::Ray, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let edge1 = b - a;
    let edge2 = c - a;
    let pvec = ray.dir.cross(edge2);
    let det = edge1.dot(pvec);
    if det.abs() < 1e-10 {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = ray.origin - a;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(edge1);
    let v = ray.dir.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(qvec) * inv_det;
    (t >= 0.0).then_some(t)
}

/// Immutable collision geometry shared by bodies through the shape database.
#[derive(Debug, Clone)]
pub enum ShapeGeometry {
    Sphere { radius: f32 },
    Capsule { half_height: f32, radius: f32 },
    ConvexHull(Dcel),
    TriMesh(TriMesh),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShapeType {
    Sphere = 0,
    Capsule = 1,
    ConvexHull = 2,
    TriMesh = 3,
}

/// Collision shape with precomputed unit-density mass properties in the
/// shape's local frame (inertia about the center of mass).
#[derive(Debug, Clone)]
pub struct CollisionShape {
    pub geometry: ShapeGeometry,
    pub volume: f32,
    pub center_of_mass: Vec3,
    pub unit_inertia: Mat3,
}

impl CollisionShape {
    pub fn sphere(radius: f32) -> Self {
        let volume = 4.0 / 3.0 * std::f32::consts::PI * radius.powi(3);
        let i = 0.4 * volume * radius * radius;
        Self {
            geometry: ShapeGeometry::Sphere { radius },
            volume,
            center_of_mass: Vec3::ZERO,
            unit_inertia: Mat3::from_diagonal(Vec3::splat(i)),
        }
    }

    pub fn capsule(half_height: f32, radius: f32) -> Self {
        use std::f32::consts::PI;
        let length = 2.0 * half_height;
        let v_cyl = PI * radius * radius * length;
        let v_sph = 4.0 / 3.0 * PI * radius.powi(3);
        let volume = v_cyl + v_sph;

        // cylinder plus two hemispheres shifted to the ends, unit density
        let i_axis = v_cyl * radius * radius / 2.0 + v_sph * 0.4 * radius * radius;
        let i_perp = v_cyl * (length * length / 12.0 + radius * radius / 4.0)
            + v_sph
                * (0.4 * radius * radius
                    + half_height * half_height
                    + 3.0 / 8.0 * length * radius);
        Self {
            geometry: ShapeGeometry::Capsule {
                half_height,
                radius,
            },
            volume,
            center_of_mass: Vec3::ZERO,
            unit_inertia: Mat3::from_diagonal(Vec3::new(i_perp, i_axis, i_perp)),
        }
    }

    pub fn convex_hull(hull: Dcel) -> Self {
        let (volume, com, inertia) = hull_mass_properties(&hull);
        Self {
            geometry: ShapeGeometry::ConvexHull(hull),
            volume,
            center_of_mass: com,
            unit_inertia: inertia,
        }
    }

    pub fn cuboid(half: Vec3) -> Self {
        Self::convex_hull(Dcel::cuboid(half))
    }

    /// Triangle meshes are world geometry; they carry no mass.
    pub fn tri_mesh(mesh: TriMesh) -> Self {
        Self {
            geometry: ShapeGeometry::TriMesh(mesh),
            volume: 0.0,
            center_of_mass: Vec3::ZERO,
            unit_inertia: Mat3::IDENTITY,
        }
    }

    pub fn shape_type(&self) -> ShapeType {
        match &self.geometry {
            ShapeGeometry::Sphere { .. } => ShapeType::Sphere,
            ShapeGeometry::Capsule { .. } => ShapeType::Capsule,
            ShapeGeometry::ConvexHull(_) => ShapeType::ConvexHull,
            ShapeGeometry::TriMesh(_) => ShapeType::TriMesh,
        }
    }

    /// Local-frame AABB under the given rotation, centered on the rotated
    /// shape; bodies add their world position on top.
    pub fn rotated_local_bbox(&self, rotation: glam::Quat) -> Aabb {
        match &self.geometry {
            ShapeGeometry::Sphere { radius } => Aabb::new(Vec3::ZERO, Vec3::splat(*radius)),
            ShapeGeometry::Capsule {
                half_height,
                radius,
            } => {
                let axis = rotation * Vec3::Y * *half_height;
                let half = axis.abs() + Vec3::splat(*radius);
                Aabb::new(Vec3::ZERO, half)
            }
            ShapeGeometry::ConvexHull(hull) => {
                let mut min = Vec3::splat(f32::INFINITY);
                let mut max = Vec3::splat(f32::NEG_INFINITY);
                for &v in &hull.vertices {
                    let w = rotation * v;
                    min = min.min(w);
                    max = max.max(w);
                }
                Aabb::from_min_max(min, max)
            }
            ShapeGeometry::TriMesh(mesh) => mesh.root_bbox().rotated(rotation),
        }
    }
}

// Mirtich-style polygon-projection volume integrals ("Fast and Accurate
// Computation of Polyhedral Mass Properties", 1996). Surface integrals reduce
// to line integrals over each face boundary; faces project onto the plane
// that maximizes the projected area.
fn hull_mass_properties(hull: &Dcel) -> (f32, Vec3, Mat3) {
    let mut t0 = 0.0f32;
    let mut t1 = Vec3::ZERO;
    let mut t2 = Vec3::ZERO;
    let mut tp = Vec3::ZERO;

    for fi in 0..hull.faces.len() as u32 {
        let n = hull.face_normal(fi, &hull.vertices);
        let nx = n.x.abs();
        let ny = n.y.abs();
        let nz = n.z.abs();
        let c = if nx > ny && nx > nz {
            0
        } else if ny > nz {
            1
        } else {
            2
        };
        let a = (c + 1) % 3;
        let b = (c + 2) % 3;

        let p = projection_integrals(hull, fi, a, b);
        let ring: Vec<Vec3> = hull.face_ring(fi).map(|v| hull.vertices[v as usize]).collect();
        let w = -n.dot(ring[0]);

        let k1 = 1.0 / n[c];
        let k2 = k1 * k1;
        let k3 = k2 * k1;
        let k4 = k3 * k1;

        let fa = k1 * p.pa;
        let fb = k1 * p.pb;
        let fc = -k2 * (n[a] * p.pa + n[b] * p.pb + w * p.p1);

        let faa = k1 * p.paa;
        let fbb = k1 * p.pbb;
        let fcc = k3
            * (n[a] * n[a] * p.paa
                + 2.0 * n[a] * n[b] * p.pab
                + n[b] * n[b] * p.pbb
                + w * (2.0 * (n[a] * p.pa + n[b] * p.pb) + w * p.p1));

        let faaa = k1 * p.paaa;
        let fbbb = k1 * p.pbbb;
        let fccc = -k4
            * (n[a].powi(3) * p.paaa
                + 3.0 * n[a] * n[a] * n[b] * p.paab
                + 3.0 * n[a] * n[b] * n[b] * p.pabb
                + n[b].powi(3) * p.pbbb
                + 3.0 * w
                    * (n[a] * n[a] * p.paa + 2.0 * n[a] * n[b] * p.pab + n[b] * n[b] * p.pbb)
                + w * w * (3.0 * (n[a] * p.pa + n[b] * p.pb) + w * p.p1));

        let faab = k1 * p.paab;
        let fbbc = -k2 * (n[a] * p.pabb + n[b] * p.pbbb + w * p.pbb);
        let fcca = k3
            * (n[a] * n[a] * p.paaa
                + 2.0 * n[a] * n[b] * p.paab
                + n[b] * n[b] * p.pabb
                + w * (2.0 * (n[a] * p.paa + n[b] * p.pab) + w * p.pa));

        t0 += n.x
            * if a == 0 {
                fa
            } else if b == 0 {
                fb
            } else {
                fc
            };

        t1[a] += n[a] * faa;
        t1[b] += n[b] * fbb;
        t1[c] += n[c] * fcc;
        t2[a] += n[a] * faaa;
        t2[b] += n[b] * fbbb;
        t2[c] += n[c] * fccc;
        tp[a] += n[a] * faab;
        tp[b] += n[b] * fbbc;
        tp[c] += n[c] * fcca;
    }

    t1 *= 0.5;
    t2 /= 3.0;
    tp *= 0.5;

    let volume = t0;
    debug_assert!(volume > 0.0, "degenerate or inverted hull");
    let com = t1 / volume;

    // unit-density inertia about the origin, then shift to the centroid
    let mut ixx = t2.y + t2.z;
    let mut iyy = t2.z + t2.x;
    let mut izz = t2.x + t2.y;
    let mut ixy = -tp.x;
    let mut iyz = -tp.y;
    let mut izx = -tp.z;

    ixx -= volume * (com.y * com.y + com.z * com.z);
    iyy -= volume * (com.z * com.z + com.x * com.x);
    izz -= volume * (com.x * com.x + com.y * com.y);
    ixy += volume * com.x * com.y;
    iyz += volume * com.y * com.z;
    izx += volume * com.z * com.x;

    let inertia = Mat3::from_cols(
        Vec3::new(ixx, ixy, izx),
        Vec3::new(ixy, iyy, iyz),
        Vec3::new(izx, iyz, izz),
    );
    (volume, com, inertia)
}

struct ProjectionIntegrals {
    p1: f32,
    pa: f32,
    pb: f32,
    paa: f32,
    pab: f32,
    pbb: f32,
    paaa: f32,
    paab: f32,
    pabb: f32,
    pbbb: f32,
}

fn projection_integrals(hull: &Dcel, face: u32, ai: usize, bi: usize) -> ProjectionIntegrals {
    let mut p = ProjectionIntegrals {
        p1: 0.0,
        pa: 0.0,
        pb: 0.0,
        paa: 0.0,
        pab: 0.0,
        pbb: 0.0,
        paaa: 0.0,
        paab: 0.0,
        pabb: 0.0,
        pbbb: 0.0,
    };

    let ring: Vec<Vec3> = hull.face_ring(face).map(|v| hull.vertices[v as usize]).collect();
    for i in 0..ring.len() {
        let a0 = ring[i][ai];
        let b0 = ring[i][bi];
        let a1 = ring[(i + 1) % ring.len()][ai];
        let b1 = ring[(i + 1) % ring.len()][bi];
        let da = a1 - a0;
        let db = b1 - b0;

        let a0_2 = a0 * a0;
        let a0_3 = a0_2 * a0;
        let a0_4 = a0_3 * a0;
        let b0_2 = b0 * b0;
        let b0_3 = b0_2 * b0;
        let b0_4 = b0_3 * b0;
        let a1_2 = a1 * a1;
        let a1_3 = a1_2 * a1;
        let b1_2 = b1 * b1;
        let b1_3 = b1_2 * b1;

        let c1 = a1 + a0;
        let ca = a1 * c1 + a0_2;
        let caa = a1 * ca + a0_3;
        let caaa = a1 * caa + a0_4;
        let cb = b1 * (b1 + b0) + b0_2;
        let cbb = b1 * cb + b0_3;
        let cbbb = b1 * cbb + b0_4;
        let cab = 3.0 * a1_2 + 2.0 * a1 * a0 + a0_2;
        let kab = a1_2 + 2.0 * a1 * a0 + 3.0 * a0_2;
        let caab = a0 * cab + 4.0 * a1_3;
        let kaab = a1 * kab + 4.0 * a0_3;
        let cabb = 4.0 * b1_3 + 3.0 * b1_2 * b0 + 2.0 * b1 * b0_2 + b0_3;
        let kabb = b1_3 + 2.0 * b1_2 * b0 + 3.0 * b1 * b0_2 + 4.0 * b0_3;

        p.p1 += db * c1;
        p.pa += db * ca;
        p.paa += db * caa;
        p.paaa += db * caaa;
        p.pb += da * cb;
        p.pbb += da * cbb;
        p.pbbb += da * cbbb;
        p.pab += db * (b1 * cab + b0 * kab);
        p.paab += db * (b1 * caab + b0 * kaab);
        p.pabb += da * (a1 * cabb + a0 * kabb);
    }

    p.p1 /= 2.0;
    p.pa /= 6.0;
    p.paa /= 12.0;
    p.paaa /= 20.0;
    p.pb /= -6.0;
    p.pbb /= -12.0;
    p.pbbb /= -20.0;
    p.pab /= 24.0;
    p.paab /= 60.0;
    p.pabb /= -60.0;
    p
}
