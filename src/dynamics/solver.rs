use std::collections::HashMap;

use glam::{Mat3, Quat, Vec3};

use crate::collision::contact::MAX_MANIFOLD_POINTS;
use crate::config::SolverSettings;
use crate::core::body::RigidBody;
use crate::dynamics::contact_db::ContactDatabase;
use crate::dynamics::island::{Island, IslandFlags};
use crate::utils::allocator::{Pool, NIL};
use crate::utils::math::{integrate_orientation, tangent_basis};

/// Post-solve state of one body, applied by the orchestrator after the
/// barrier. Solve tasks never write into the shared pools.
#[derive(Debug, Clone, Copy)]
pub struct BodyUpdate {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub low_velocity_time: f32,
    pub awake: bool,
}

/// Accumulated impulses written back into a contact record for next tick's
/// warm start.
#[derive(Debug, Clone, Copy)]
pub struct ImpulseCache {
    pub points: [Vec3; MAX_MANIFOLD_POINTS],
    pub normal: [f32; MAX_MANIFOLD_POINTS],
    pub tangent: [[f32; 2]; MAX_MANIFOLD_POINTS],
    pub count: u32,
}

/// Output of one island solve task.
pub struct IslandSolveOutput {
    pub island: u32,
    pub asleep: bool,
    pub new_flags: IslandFlags,
    pub body_updates: Vec<(u32, BodyUpdate)>,
    pub contact_caches: Vec<(u32, ImpulseCache)>,
}

struct VelocityConstraintPoint {
    r1: Vec3,
    r2: Vec3,
    normal_mass: f32,
    tangent_mass: [f32; 2],
    bias: f32,
    normal_impulse: f32,
    tangent_impulse: [f32; 2],
}

struct VelocityConstraint {
    contact: u32,
    lb1: usize,
    lb2: usize,
    normal: Vec3,
    tangent: [Vec3; 2],
    friction: f32,
    points: Vec<VelocityConstraintPoint>,
    /// `J M⁻¹ Jᵀ` over the manifold normals when the block path is on and
    /// the matrix is well conditioned.
    block: Option<BlockMass>,
}

struct BlockMass {
    k: [[f32; 4]; 4],
    n: usize,
}

/// Temporary velocity state of the island plus the shared static sentinel in
/// the trailing slot, so constraints index uniformly.
struct SolverState {
    lv: Vec<Vec3>,
    av: Vec<Vec3>,
    inv_mass: Vec<f32>,
    inv_inertia: Vec<Mat3>,
}

impl SolverState {
    fn relative_velocity(&self, vc: &VelocityConstraint, p: &VelocityConstraintPoint) -> Vec3 {
        self.lv[vc.lb2] + self.av[vc.lb2].cross(p.r2)
            - self.lv[vc.lb1]
            - self.av[vc.lb1].cross(p.r1)
    }

    fn apply_impulse(&mut self, vc: &VelocityConstraint, p: &VelocityConstraintPoint, impulse: Vec3) {
        self.lv[vc.lb1] -= impulse * self.inv_mass[vc.lb1];
        self.av[vc.lb1] -= self.inv_inertia[vc.lb1] * p.r1.cross(impulse);
        self.lv[vc.lb2] += impulse * self.inv_mass[vc.lb2];
        self.av[vc.lb2] += self.inv_inertia[vc.lb2] * p.r2.cross(impulse);
    }
}

/// Solves one awake island: build velocity constraints, warm start, iterate
/// sequential impulses, cache impulses, integrate, and account sleep. Reads
/// the shared pools only; the returned output is applied by the caller.
pub fn solve_island(
    bodies: &Pool<RigidBody>,
    cdb: &ContactDatabase,
    islands: &Pool<Island>,
    island_index: u32,
    settings: &SolverSettings,
    dt: f32,
) -> IslandSolveOutput {
    let island = islands.at(island_index);

    // gather member bodies and the body → local index map
    let mut member: Vec<u32> = Vec::with_capacity(island.body_list.count as usize);
    let mut local_of: HashMap<u32, usize> = HashMap::with_capacity(member.capacity());
    let mut bi = island.body_list.first;
    while bi != NIL {
        local_of.insert(bi, member.len());
        member.push(bi);
        bi = bodies.at(bi).island_next;
    }

    // a clean TRY_SLEEP puts the island under: bodies keep their state and
    // drop AWAKE, and the island stops being scheduled
    if settings.sleep_enabled && island.flags.contains(IslandFlags::TRY_SLEEP) {
        let body_updates = member
            .iter()
            .map(|&b| {
                let body = bodies.at(b);
                (
                    b,
                    BodyUpdate {
                        position: body.position,
                        rotation: body.rotation,
                        velocity: body.velocity,
                        angular_velocity: body.angular_velocity,
                        low_velocity_time: body.low_velocity_time,
                        awake: false,
                    },
                )
            })
            .collect();
        return IslandSolveOutput {
            island: island_index,
            asleep: true,
            new_flags: IslandFlags::default(),
            body_updates,
            contact_caches: Vec::new(),
        };
    }

    let n = member.len();
    let sentinel = n;
    let mut state = SolverState {
        lv: vec![Vec3::ZERO; n + 1],
        av: vec![Vec3::ZERO; n + 1],
        inv_mass: vec![0.0; n + 1],
        inv_inertia: vec![Mat3::ZERO; n + 1],
    };

    let linear_damping = 1.0 / (1.0 + settings.linear_dampening * dt);
    let angular_damping = 1.0 / (1.0 + settings.angular_dampening * dt);
    for (i, &b) in member.iter().enumerate() {
        let body = bodies.at(b);
        state.lv[i] = (body.velocity + settings.gravity * dt) * linear_damping;
        state.av[i] = body.angular_velocity * angular_damping;
        state.inv_mass[i] = body.inv_mass;
        state.inv_inertia[i] = body.world_inv_inertia();
    }

    // build velocity constraints over the island's contacts
    let mut constraints: Vec<VelocityConstraint> =
        Vec::with_capacity(island.contact_list.count as usize);
    let mut ci = island.contact_list.first;
    while ci != NIL {
        let contact = cdb.contacts.at(ci);
        constraints.push(build_constraint(
            bodies, &state, &local_of, sentinel, ci, contact, settings, dt,
        ));
        ci = contact.island_next;
    }

    if settings.warmup_solver {
        for vc in &constraints {
            for p in &vc.points {
                let impulse = vc.normal * p.normal_impulse
                    + vc.tangent[0] * p.tangent_impulse[0]
                    + vc.tangent[1] * p.tangent_impulse[1];
                state.apply_impulse(vc, p, impulse);
            }
        }
    } else {
        for vc in &mut constraints {
            for p in &mut vc.points {
                p.normal_impulse = 0.0;
                p.tangent_impulse = [0.0; 2];
            }
        }
    }

    for _ in 0..settings.iteration_count {
        for vc in &mut constraints {
            iterate_constraint(&mut state, vc);
        }
    }

    // cache accumulated impulses and contact positions for warm starting
    let contact_caches = constraints
        .iter()
        .map(|vc| {
            let contact = cdb.contacts.at(vc.contact);
            let mut cache = ImpulseCache {
                points: [Vec3::ZERO; MAX_MANIFOLD_POINTS],
                normal: [0.0; MAX_MANIFOLD_POINTS],
                tangent: [[0.0; 2]; MAX_MANIFOLD_POINTS],
                count: vc.points.len() as u32,
            };
            for (k, p) in vc.points.iter().enumerate() {
                cache.points[k] = contact.manifold.points[k];
                cache.normal[k] = p.normal_impulse;
                cache.tangent[k] = p.tangent_impulse;
            }
            (vc.contact, cache)
        })
        .collect();

    // integrate and account sleep
    let sleep_reset = island.flags.contains(IslandFlags::SLEEP_RESET);
    let mut min_low_velocity_time = f32::MAX;
    let mut body_updates = Vec::with_capacity(n);
    for (i, &b) in member.iter().enumerate() {
        let body = bodies.at(b);
        let velocity = state.lv[i];
        let angular_velocity = state.av[i];

        let rotation = integrate_orientation(body.rotation, angular_velocity, dt);
        let com = body.world_center_of_mass() + velocity * dt;
        let position = com - rotation * body.local_center_of_mass;

        let mut low_velocity_time = if sleep_reset { 0.0 } else { body.low_velocity_time };
        if settings.sleep_enabled {
            let lv_sq = velocity.length_squared();
            let av_sq = angular_velocity.length_squared();
            if lv_sq <= settings.sleep_linear_velocity_sq_limit
                && av_sq <= settings.sleep_angular_velocity_sq_limit
            {
                low_velocity_time += dt;
            } else {
                low_velocity_time = 0.0;
            }
            min_low_velocity_time = min_low_velocity_time.min(low_velocity_time);
        }

        body_updates.push((
            b,
            BodyUpdate {
                position,
                rotation,
                velocity,
                angular_velocity,
                low_velocity_time,
                awake: true,
            },
        ));
    }

    let mut new_flags = island.flags;
    new_flags.remove(IslandFlags::SLEEP_RESET);
    if settings.sleep_enabled && settings.sleep_time_threshold <= min_low_velocity_time {
        new_flags.insert(IslandFlags::TRY_SLEEP);
    }

    IslandSolveOutput {
        island: island_index,
        asleep: false,
        new_flags,
        body_updates,
        contact_caches,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_constraint(
    bodies: &Pool<RigidBody>,
    state: &SolverState,
    local_of: &HashMap<u32, usize>,
    sentinel: usize,
    ci: u32,
    contact: &crate::dynamics::contact_db::Contact,
    settings: &SolverSettings,
    dt: f32,
) -> VelocityConstraint {
    let b1 = contact.body_low();
    let b2 = contact.body_high();
    let body1 = bodies.at(b1);
    let body2 = bodies.at(b2);
    let lb1 = *local_of.get(&b1).unwrap_or(&sentinel);
    let lb2 = *local_of.get(&b2).unwrap_or(&sentinel);

    let manifold = &contact.manifold;
    let normal = manifold.normal;
    let (t1, t2) = tangent_basis(normal);

    let mut vc = VelocityConstraint {
        contact: ci,
        lb1,
        lb2,
        normal,
        tangent: [t1, t2],
        friction: body1.friction.max(body2.friction),
        points: Vec::with_capacity(manifold.count as usize),
        block: None,
    };
    let restitution = body1.restitution.max(body2.restitution);

    let com1 = body1.world_center_of_mass();
    let com2 = body2.world_center_of_mass();
    let warm = settings.warmup_solver && contact.cached_count == manifold.count;

    for k in 0..manifold.count as usize {
        let p = manifold.points[k];
        let r1 = p - com1;
        let r2 = p - com2;

        let effective_mass = |axis: Vec3| -> f32 {
            let k = state.inv_mass[lb1]
                + state.inv_mass[lb2]
                + (state.inv_inertia[lb1] * r1.cross(axis))
                    .cross(r1)
                    .dot(axis)
                + (state.inv_inertia[lb2] * r2.cross(axis))
                    .cross(r2)
                    .dot(axis);
            if k > 0.0 {
                1.0 / k
            } else {
                0.0
            }
        };

        let mut bias = settings.baumgarte_constant
            * (manifold.depths[k] - settings.linear_slop).max(0.0)
            / dt;
        let vp = state.lv[lb2] + state.av[lb2].cross(r2) - state.lv[lb1] - state.av[lb1].cross(r1);
        let vn = vp.dot(normal);
        if vn < -settings.restitution_threshold {
            bias += -restitution * vn;
        }

        vc.points.push(VelocityConstraintPoint {
            r1,
            r2,
            normal_mass: effective_mass(normal),
            tangent_mass: [effective_mass(t1), effective_mass(t2)],
            bias,
            normal_impulse: if warm { contact.cached_normal_impulse[k] } else { 0.0 },
            tangent_impulse: if warm {
                contact.cached_tangent_impulse[k]
            } else {
                [0.0; 2]
            },
        });
    }

    if settings.block_solver && vc.points.len() >= 2 {
        vc.block = build_block_mass(state, &vc, settings.max_condition);
    }
    vc
}

/// `K = J M⁻¹ Jᵀ` over the manifold's normal rows, gated by a condition
/// estimate; ill-conditioned manifolds stay on the scalar path.
fn build_block_mass(
    state: &SolverState,
    vc: &VelocityConstraint,
    max_condition: f32,
) -> Option<BlockMass> {
    let n = vc.points.len();
    let mut k = [[0.0f32; 4]; 4];
    for i in 0..n {
        for j in 0..n {
            let pi = &vc.points[i];
            let pj = &vc.points[j];
            k[i][j] = state.inv_mass[vc.lb1]
                + state.inv_mass[vc.lb2]
                + (state.inv_inertia[vc.lb1] * pi.r1.cross(vc.normal))
                    .cross(pj.r1)
                    .dot(vc.normal)
                + (state.inv_inertia[vc.lb2] * pi.r2.cross(vc.normal))
                    .cross(pj.r2)
                    .dot(vc.normal);
        }
    }

    if n == 2 {
        // exact eigenvalue ratio of the symmetric 2x2
        let (a, b, c) = (k[0][0], k[1][1], k[0][1]);
        let mean = 0.5 * (a + b);
        let disc = (0.25 * (a - b) * (a - b) + c * c).sqrt();
        let (lo, hi) = (mean - disc, mean + disc);
        if lo <= 0.0 || hi > max_condition * lo {
            return None;
        }
    } else {
        // diagonal spread as a cheap conditioning proxy
        let mut lo = f32::INFINITY;
        let mut hi = 0.0f32;
        for (i, row) in k.iter().enumerate().take(n) {
            lo = lo.min(row[i]);
            hi = hi.max(row[i]);
        }
        if lo <= 0.0 || hi > max_condition * lo {
            return None;
        }
    }

    Some(BlockMass { k, n })
}

fn iterate_constraint(state: &mut SolverState, vc: &mut VelocityConstraint) {
    // normal direction: block solve when armed, scalar otherwise
    let block_armed = vc
        .block
        .as_ref()
        .is_some_and(|block| block.n == vc.points.len());
    let solved_block = block_armed && block_normal_solve(state, vc);

    if !solved_block {
        for k in 0..vc.points.len() {
            let p = &vc.points[k];
            let vn = state.relative_velocity(vc, p).dot(vc.normal);
            let lambda = -p.normal_mass * (vn - p.bias);
            let new_impulse = (p.normal_impulse + lambda).max(0.0);
            let delta = new_impulse - p.normal_impulse;
            let impulse = vc.normal * delta;
            let p = &mut vc.points[k];
            p.normal_impulse = new_impulse;
            let p_imm = &vc.points[k];
            state.apply_impulse(vc, p_imm, impulse);
        }
    }

    // friction, clamped by the accumulated normal impulse
    for k in 0..vc.points.len() {
        for t in 0..2 {
            let p = &vc.points[k];
            let vt = state.relative_velocity(vc, p).dot(vc.tangent[t]);
            let lambda = -p.tangent_mass[t] * vt;
            let bound = vc.friction * p.normal_impulse;
            let new_impulse = (p.tangent_impulse[t] + lambda).clamp(-bound, bound);
            let delta = new_impulse - p.tangent_impulse[t];
            let impulse = vc.tangent[t] * delta;
            let p = &mut vc.points[k];
            p.tangent_impulse[t] = new_impulse;
            let p_imm = &vc.points[k];
            state.apply_impulse(vc, p_imm, impulse);
        }
    }
}

/// Coupled normal solve preserving λ ≥ 0. Two points enumerate the four LCP
/// active sets exactly; three and four points accept the full Gauss solve
/// when it lands in the feasible region and fall back otherwise.
fn block_normal_solve(state: &mut SolverState, vc: &mut VelocityConstraint) -> bool {
    let n = vc.points.len();
    let block = vc.block.as_ref().unwrap();
    let k = block.k;

    let mut a = [0.0f32; 4];
    let mut b = [0.0f32; 4];
    for i in 0..n {
        let p = &vc.points[i];
        a[i] = p.normal_impulse;
        b[i] = state.relative_velocity(vc, p).dot(vc.normal) - p.bias;
    }
    // affine constant: b' = vn - K a
    for i in 0..n {
        for j in 0..n {
            b[i] -= k[i][j] * a[j];
        }
    }

    let x = if n == 2 {
        solve_lcp_2(&k, &b)
    } else {
        solve_gauss_nonnegative(&k, &b, n)
    };
    let Some(x) = x else {
        return false;
    };

    for i in 0..n {
        let delta = x[i] - a[i];
        let impulse = vc.normal * delta;
        vc.points[i].normal_impulse = x[i];
        let p = &vc.points[i];
        state.apply_impulse(vc, p, impulse);
    }
    true
}

/// Direct enumeration of the 2x2 LCP active sets (both active, one active,
/// none active), accepting the first feasible case.
fn solve_lcp_2(k: &[[f32; 4]; 4], b: &[f32; 4]) -> Option<[f32; 4]> {
    let det = k[0][0] * k[1][1] - k[0][1] * k[1][0];
    if det.abs() > 1e-12 {
        let inv_det = 1.0 / det;
        let x0 = inv_det * (k[0][1] * b[1] - k[1][1] * b[0]);
        let x1 = inv_det * (k[1][0] * b[0] - k[0][0] * b[1]);
        if x0 >= 0.0 && x1 >= 0.0 {
            return Some([x0, x1, 0.0, 0.0]);
        }
    }

    // only point 0 active
    if k[0][0] > 0.0 {
        let x0 = -b[0] / k[0][0];
        let vn1 = k[1][0] * x0 + b[1];
        if x0 >= 0.0 && vn1 >= 0.0 {
            return Some([x0, 0.0, 0.0, 0.0]);
        }
    }
    // only point 1 active
    if k[1][1] > 0.0 {
        let x1 = -b[1] / k[1][1];
        let vn0 = k[0][1] * x1 + b[0];
        if x1 >= 0.0 && vn0 >= 0.0 {
            return Some([0.0, x1, 0.0, 0.0]);
        }
    }
    // both separating
    if b[0] >= 0.0 && b[1] >= 0.0 {
        return Some([0.0; 4]);
    }
    None
}

/// Gaussian elimination of `K x = -b`; accepted only when fully feasible.
fn solve_gauss_nonnegative(k: &[[f32; 4]; 4], b: &[f32; 4], n: usize) -> Option<[f32; 4]> {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..n {
        m[i][..n].copy_from_slice(&k[i][..n]);
        m[i][n] = -b[i];
    }

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))?;
        if m[pivot_row][col].abs() < 1e-10 {
            return None;
        }
        m.swap(col, pivot_row);
        for row in col + 1..n {
            let factor = m[row][col] / m[col][col];
            for c in col..=n {
                m[row][c] -= factor * m[col][c];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for row in (0..n).rev() {
        let mut sum = m[row][n];
        for c in row + 1..n {
            sum -= m[row][c] * x[c];
        }
        x[row] = sum / m[row][row];
        if !x[row].is_finite() || x[row] < 0.0 {
            return None;
        }
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lcp_2_prefers_fully_active_solution() {
        let mut k = [[0.0f32; 4]; 4];
        k[0][0] = 2.0;
        k[1][1] = 2.0;
        k[0][1] = 0.5;
        k[1][0] = 0.5;
        let b = [-1.0f32, -1.0, 0.0, 0.0];
        let x = solve_lcp_2(&k, &b).unwrap();
        assert!(x[0] > 0.0 && x[1] > 0.0);
        // K x + b = 0 on active constraints
        assert_relative_eq!(k[0][0] * x[0] + k[0][1] * x[1] + b[0], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn lcp_2_deactivates_separating_point() {
        let mut k = [[0.0f32; 4]; 4];
        k[0][0] = 1.0;
        k[1][1] = 1.0;
        k[0][1] = 0.9;
        k[1][0] = 0.9;
        // point 1 already separating
        let b = [-1.0f32, 2.0, 0.0, 0.0];
        let x = solve_lcp_2(&k, &b).unwrap();
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-5);
        assert_eq!(x[1], 0.0);
    }

    #[test]
    fn gauss_rejects_negative_impulses() {
        let mut k = [[0.0f32; 4]; 4];
        for (i, row) in k.iter_mut().enumerate().take(3) {
            row[i] = 1.0;
        }
        let b = [-1.0f32, 1.0, -1.0, 0.0];
        assert!(solve_gauss_nonnegative(&k, &b, 3).is_none());
        let b = [-1.0f32, -2.0, -3.0, 0.0];
        let x = solve_gauss_nonnegative(&k, &b, 3).unwrap();
        assert_relative_eq!(x[1], 2.0, epsilon = 1e-6);
    }
}
