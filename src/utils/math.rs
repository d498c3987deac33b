use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned box stored as center and half-widths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub center: Vec3,
    pub half: Vec3,
}

impl Aabb {
    pub const fn new(center: Vec3, half: Vec3) -> Self {
        Self { center, half }
    }

    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        let half = (max - min) * 0.5;
        Self {
            center: min + half,
            half,
        }
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.half
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.half
    }

    pub fn inflated(&self, margin: f32) -> Self {
        Self {
            center: self.center,
            half: self.half + Vec3::splat(margin),
        }
    }

    pub fn translated(&self, offset: Vec3) -> Self {
        Self {
            center: self.center + offset,
            half: self.half,
        }
    }

    pub fn contains(&self, other: &Aabb) -> bool {
        let d = (other.center - self.center).abs();
        d.x + other.half.x <= self.half.x
            && d.y + other.half.y <= self.half.y
            && d.z + other.half.z <= self.half.z
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        let d = (other.center - self.center).abs();
        d.x <= self.half.x + other.half.x
            && d.y <= self.half.y + other.half.y
            && d.z <= self.half.z + other.half.z
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::from_min_max(self.min().min(other.min()), self.max().max(other.max()))
    }

    pub fn surface_area(&self) -> f32 {
        let e = self.half * 2.0;
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    /// AABB of this box under a rotation about the origin of its own frame.
    pub fn rotated(&self, rotation: Quat) -> Aabb {
        let m = glam::Mat3::from_quat(rotation);
        let half = Vec3::new(
            m.x_axis.x.abs() * self.half.x
                + m.y_axis.x.abs() * self.half.y
                + m.z_axis.x.abs() * self.half.z,
            m.x_axis.y.abs() * self.half.x
                + m.y_axis.y.abs() * self.half.y
                + m.z_axis.y.abs() * self.half.z,
            m.x_axis.z.abs() * self.half.x
                + m.y_axis.z.abs() * self.half.y
                + m.z_axis.z.abs() * self.half.z,
        );
        Aabb {
            center: rotation * self.center,
            half,
        }
    }

    /// Slab test. Returns the entry parameter when the ray hits within
    /// `[0, t_max]`; a ray starting inside reports entry 0.
    pub fn ray_entry(&self, ray: &Ray, t_max: f32) -> Option<f32> {
        let mut t_enter: f32 = 0.0;
        let mut t_exit = t_max;
        for axis in 0..3 {
            let origin = ray.origin[axis];
            let dir = ray.dir[axis];
            let min = self.center[axis] - self.half[axis];
            let max = self.center[axis] + self.half[axis];
            if dir.abs() < 1e-12 {
                if origin < min || origin > max {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dir;
            let mut t0 = (min - origin) * inv;
            let mut t1 = (max - origin) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_enter = t_enter.max(t0);
            t_exit = t_exit.min(t1);
            if t_enter > t_exit {
                return None;
            }
        }
        Some(t_enter)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ray {
    pub origin: Vec3,
    pub dir: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, dir: Vec3) -> Self {
        Self {
            origin,
            dir: dir.normalize_or_zero(),
        }
    }

    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }
}

/// Plane `normal · x = d` with unit normal.
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    pub fn new(normal: Vec3, point_on_plane: Vec3) -> Self {
        Self {
            normal,
            d: normal.dot(point_on_plane),
        }
    }

    pub fn from_ccw_triangle(a: Vec3, b: Vec3, c: Vec3) -> Self {
        let normal = (b - a).cross(c - a).normalize();
        Self {
            normal,
            d: normal.dot(a),
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.d
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub a: Vec3,
    pub b: Vec3,
}

impl Segment {
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self { a, b }
    }

    pub fn dir(&self) -> Vec3 {
        self.b - self.a
    }

    pub fn closest_point_to(&self, point: Vec3) -> Vec3 {
        let d = self.dir();
        let len_sq = d.length_squared();
        if len_sq < 1e-12 {
            return self.a;
        }
        let t = ((point - self.a).dot(d) / len_sq).clamp(0.0, 1.0);
        self.a + d * t
    }

    /// Closest points between two segments (Ericson, Real-Time Collision
    /// Detection §5.1.9). Returns `(on_self, on_other)`.
    pub fn closest_points(&self, other: &Segment) -> (Vec3, Vec3) {
        let d1 = self.dir();
        let d2 = other.dir();
        let r = self.a - other.a;
        let a = d1.length_squared();
        let e = d2.length_squared();
        let f = d2.dot(r);

        let (s, t);
        if a < 1e-12 && e < 1e-12 {
            return (self.a, other.a);
        }
        if a < 1e-12 {
            s = 0.0;
            t = (f / e).clamp(0.0, 1.0);
        } else {
            let c = d1.dot(r);
            if e < 1e-12 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else {
                let b = d1.dot(d2);
                let denom = a * e - b * b;
                let mut s_val = if denom > 1e-12 {
                    ((b * f - c * e) / denom).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let mut t_val = (b * s_val + f) / e;
                if t_val < 0.0 {
                    t_val = 0.0;
                    s_val = (-c / a).clamp(0.0, 1.0);
                } else if t_val > 1.0 {
                    t_val = 1.0;
                    s_val = ((b - c) / a).clamp(0.0, 1.0);
                }
                s = s_val;
                t = t_val;
            }
        }

        (self.a + d1 * s, other.a + d2 * t)
    }
}

/// Closest point on triangle `(a, b, c)` to `point` (Ericson §5.1.5).
pub fn closest_point_on_triangle(point: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = point - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = point - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = point - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Orthonormal tangent basis for a unit normal.
pub fn tangent_basis(normal: Vec3) -> (Vec3, Vec3) {
    let t1 = if normal.x.abs() >= 0.57735 {
        Vec3::new(normal.y, -normal.x, 0.0)
    } else {
        Vec3::new(0.0, normal.z, -normal.y)
    }
    .normalize();
    (t1, normal.cross(t1))
}

/// Semi-implicit orientation step `q ← normalize(q + ½ ω̂ q Δt)`.
pub fn integrate_orientation(rotation: Quat, angular_velocity: Vec3, dt: f32) -> Quat {
    let omega = Quat::from_xyzw(angular_velocity.x, angular_velocity.y, angular_velocity.z, 0.0);
    let delta = omega * rotation;
    let stepped = Quat::from_xyzw(
        rotation.x + 0.5 * dt * delta.x,
        rotation.y + 0.5 * dt * delta.y,
        rotation.z + 0.5 * dt * delta.z,
        rotation.w + 0.5 * dt * delta.w,
    );
    stepped.normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn aabb_containment_is_inclusive() {
        let outer = Aabb::new(Vec3::ZERO, Vec3::splat(2.0));
        let inner = Aabb::new(Vec3::splat(0.5), Vec3::splat(1.0));
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains(&outer));
    }

    #[test]
    fn segment_closest_points_cross() {
        let s1 = Segment::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        let s2 = Segment::new(Vec3::new(0.0, 1.0, 1.0), Vec3::new(0.0, -1.0, 1.0));
        let (c1, c2) = s1.closest_points(&s2);
        assert_relative_eq!(c1.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(c2.z, 1.0, epsilon = 1e-6);
        assert_relative_eq!((c2 - c1).length(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn ray_entry_from_inside_is_zero() {
        let bbox = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert_eq!(bbox.ray_entry(&ray, f32::INFINITY), Some(0.0));
    }

    #[test]
    fn tangent_basis_is_orthonormal() {
        for normal in [Vec3::X, Vec3::Y, Vec3::Z, Vec3::new(0.3, -0.5, 0.8).normalize()] {
            let (t1, t2) = tangent_basis(normal);
            assert_relative_eq!(t1.dot(normal), 0.0, epsilon = 1e-6);
            assert_relative_eq!(t2.dot(normal), 0.0, epsilon = 1e-6);
            assert_relative_eq!(t1.dot(t2), 0.0, epsilon = 1e-6);
            assert_relative_eq!(t1.length(), 1.0, epsilon = 1e-6);
            assert_relative_eq!(t2.length(), 1.0, epsilon = 1e-6);
        }
    }
}
