use glam::Vec3;

use crate::collision::contact::MAX_MANIFOLD_POINTS;
use crate::utils::math::Plane;

/// Sutherland–Hodgman clip of `polygon` against the side planes of a
/// reference face given as a CCW ring with outward normal `ref_normal`.
/// Side-plane normals point out of the face, so interior points test behind.
pub fn clip_to_face(polygon: &[Vec3], ref_ring: &[Vec3], ref_normal: Vec3) -> Vec<Vec3> {
    let mut current = polygon.to_vec();
    let mut next = Vec::with_capacity(polygon.len() + ref_ring.len());

    for j in 0..ref_ring.len() {
        if current.is_empty() {
            break;
        }
        let edge = ref_ring[(j + 1) % ref_ring.len()] - ref_ring[j];
        let normal = edge.cross(ref_normal).normalize_or_zero();
        if normal == Vec3::ZERO {
            continue;
        }
        let plane = Plane::new(normal, ref_ring[j]);

        next.clear();
        for i in 0..current.len() {
            let p0 = current[i];
            let p1 = current[(i + 1) % current.len()];
            let d0 = plane.signed_distance(p0);
            let d1 = plane.signed_distance(p1);

            if d0 <= 0.0 {
                next.push(p0);
            }
            if (d0 < 0.0) != (d1 < 0.0) && (d0 - d1).abs() > 1e-12 {
                let t = d0 / (d0 - d1);
                if t > 0.0 && t < 1.0 {
                    next.push(p0 + (p1 - p0) * t);
                }
            }
        }
        std::mem::swap(&mut current, &mut next);
    }

    current
}

/// Reduces a clipped contact polygon to at most four points: the deepest
/// point, the point farthest from it, and the two points spanning the largest
/// triangle area on either side of that axis.
pub fn reduce_manifold(points: &[(Vec3, f32)], normal: Vec3) -> Vec<(Vec3, f32)> {
    if points.len() <= MAX_MANIFOLD_POINTS {
        return points.to_vec();
    }

    let deepest = points
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap();

    let farthest = points
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != deepest)
        .max_by(|(_, a), (_, b)| {
            let da = (a.0 - points[deepest].0).length_squared();
            let db = (b.0 - points[deepest].0).length_squared();
            da.total_cmp(&db)
        })
        .map(|(i, _)| i)
        .unwrap();

    let anchor = points[deepest].0;
    let axis = points[farthest].0;
    let mut best_pos: Option<(usize, f32)> = None;
    let mut best_neg: Option<(usize, f32)> = None;
    for (i, (p, _)) in points.iter().enumerate() {
        if i == deepest || i == farthest {
            continue;
        }
        let area = (anchor - *p).cross(axis - *p).dot(normal);
        if area >= 0.0 {
            if best_pos.is_none_or(|(_, a)| area > a) {
                best_pos = Some((i, area));
            }
        } else if best_neg.is_none_or(|(_, a)| area < a) {
            best_neg = Some((i, area));
        }
    }

    let mut out = vec![points[deepest], points[farthest]];
    if let Some((i, _)) = best_pos {
        out.push(points[i]);
    }
    if let Some((i, _)) = best_neg {
        out.push(points[i]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn clip_quad_inside_larger_quad_is_unchanged() {
        let small: Vec<Vec3> = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)]
            .iter()
            .map(|&(x, z)| Vec3::new(x, 0.0, z))
            .collect();
        let big: Vec<Vec3> = [(-2.0, -2.0), (2.0, -2.0), (2.0, 2.0), (-2.0, 2.0)]
            .iter()
            .map(|&(x, z)| Vec3::new(x, 0.0, z))
            .collect();
        let clipped = clip_to_face(&small, &big, Vec3::Y);
        assert_eq!(clipped.len(), 4);
    }

    #[test]
    fn clip_offset_quad_shrinks() {
        // unit quad shifted so half of it pokes out of the reference quad
        let incident: Vec<Vec3> = [(0.5, -0.5), (1.5, -0.5), (1.5, 0.5), (0.5, 0.5)]
            .iter()
            .map(|&(x, z)| Vec3::new(x, 0.0, z))
            .collect();
        let reference: Vec<Vec3> = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
            .iter()
            .map(|&(x, z)| Vec3::new(x, 0.0, z))
            .collect();
        let clipped = clip_to_face(&incident, &reference, Vec3::Y);
        assert!(!clipped.is_empty());
        for p in &clipped {
            assert!(p.x <= 1.0 + 1e-5);
        }
        let max_x = clipped.iter().map(|p| p.x).fold(f32::MIN, f32::max);
        assert_relative_eq!(max_x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn reduce_keeps_spread_of_hexagon() {
        let mut points = Vec::new();
        for i in 0..6 {
            let angle = i as f32 / 6.0 * std::f32::consts::TAU;
            points.push((Vec3::new(angle.cos(), 0.0, angle.sin()), 0.01 * i as f32));
        }
        let reduced = reduce_manifold(&points, Vec3::Y);
        assert_eq!(reduced.len(), 4);
        // deepest point must survive
        assert!(reduced.iter().any(|(_, d)| (*d - 0.05).abs() < 1e-6));
        // the four survivors should still span a sizeable area
        let area = {
            let centroid: Vec3 =
                reduced.iter().map(|(p, _)| *p).sum::<Vec3>() / reduced.len() as f32;
            reduced
                .iter()
                .map(|(p, _)| (*p - centroid).length())
                .sum::<f32>()
        };
        assert!(area > 2.0);
    }
}
