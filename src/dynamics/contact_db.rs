use std::collections::HashMap;

use glam::Vec3;

use crate::collision::contact::{ContactManifold, SatCacheKind, MAX_MANIFOLD_POINTS};
use crate::core::body::RigidBody;
use crate::utils::allocator::{BitVec, Pool, NIL};

/// Unordered body pair key: `(min << 32) | max`.
pub fn pair_key(a: u32, b: u32) -> u64 {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    ((lo as u64) << 32) | hi as u64
}

pub fn key_low(key: u64) -> u32 {
    (key >> 32) as u32
}

pub fn key_high(key: u64) -> u32 {
    key as u32
}

/// Persistent contact record. Lives simultaneously in both bodies' net-lists
/// (slot 0 belongs to the lower-indexed body, slot 1 to the higher) and in
/// one island's contact list.
#[derive(Debug, Clone)]
pub struct Contact {
    pub key: u64,
    pub manifold: ContactManifold,

    pub island_next: u32,
    pub island_prev: u32,
    pub net_next: [u32; 2],
    pub net_prev: [u32; 2],

    /// Warm-start cache carried from the previous tick.
    pub cached_points: [Vec3; MAX_MANIFOLD_POINTS],
    pub cached_normal_impulse: [f32; MAX_MANIFOLD_POINTS],
    pub cached_tangent_impulse: [[f32; 2]; MAX_MANIFOLD_POINTS],
    pub cached_count: u32,
}

impl Contact {
    pub fn body_low(&self) -> u32 {
        key_low(self.key)
    }

    pub fn body_high(&self) -> u32 {
        key_high(self.key)
    }

    pub fn other(&self, body: u32) -> u32 {
        if body == self.body_low() {
            self.body_high()
        } else {
            self.body_low()
        }
    }

    /// Net-list slot owned by `body` within this record.
    pub fn slot_of(&self, body: u32) -> usize {
        if body == self.body_low() {
            0
        } else {
            debug_assert_eq!(body, self.body_high());
            1
        }
    }
}

#[derive(Debug, Clone)]
pub struct SatCacheEntry {
    pub key: u64,
    pub kind: SatCacheKind,
    pub touched: bool,
}

/// Database of persistent contacts and per-pair SAT caches.
///
/// `persistent` marks the record indices live at the end of the previous
/// tick; `frame` marks those narrowphase touched this tick. The difference
/// `persistent & !frame` names the broken contacts.
#[derive(Default)]
pub struct ContactDatabase {
    pub contacts: Pool<Contact>,
    map: HashMap<u64, u32>,

    sat_pool: Pool<SatCacheEntry>,
    sat_map: HashMap<u64, u32>,

    pub persistent: BitVec,
    pub frame: BitVec,
}

impl ContactDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick start: drop SAT caches narrowphase did not reference last tick
    /// and reset the touch marks on the survivors.
    pub fn reclaim_sat_caches(&mut self) {
        let stale: Vec<u32> = self
            .sat_pool
            .iter()
            .filter(|(_, entry)| !entry.touched)
            .map(|(i, _)| i)
            .collect();
        for index in stale {
            let entry = self.sat_pool.remove(index);
            self.sat_map.remove(&entry.key);
        }
        for (_, entry) in self.sat_pool.iter_mut() {
            entry.touched = false;
        }
    }

    /// Allocates the per-tick usage bitmap, sized to the persistent map.
    pub fn begin_frame(&mut self) {
        self.frame = BitVec::with_len(self.persistent.len());
    }

    pub fn lookup(&self, b1: u32, b2: u32) -> Option<u32> {
        self.map.get(&pair_key(b1, b2)).copied()
    }

    /// Update or insert a contact for the manifold's pair. New records splice
    /// into both bodies' net-list heads; existing records just take the new
    /// manifold, keeping the warm-start cache.
    pub fn contact_add(
        &mut self,
        bodies: &mut Pool<RigidBody>,
        manifold: &ContactManifold,
    ) -> (u32, bool) {
        let key = pair_key(manifold.body1, manifold.body2);
        debug_assert_eq!(key_low(key), manifold.body1);

        if let Some(&index) = self.map.get(&key) {
            let contact = self.contacts.at_mut(index);
            contact.manifold = *manifold;
            if (index as usize) < self.frame.len() {
                self.frame.set(index as usize, true);
            }
            return (index, false);
        }

        let (b_lo, b_hi) = (key_low(key), key_high(key));
        let head_lo = bodies.at(b_lo).contact_first;
        let head_hi = bodies.at(b_hi).contact_first;

        let index = self.contacts.insert(Contact {
            key,
            manifold: *manifold,
            island_next: NIL,
            island_prev: NIL,
            net_next: [head_lo, head_hi],
            net_prev: [NIL, NIL],
            cached_points: [Vec3::ZERO; MAX_MANIFOLD_POINTS],
            cached_normal_impulse: [0.0; MAX_MANIFOLD_POINTS],
            cached_tangent_impulse: [[0.0; 2]; MAX_MANIFOLD_POINTS],
            cached_count: 0,
        });

        if head_lo != NIL {
            let head = self.contacts.at_mut(head_lo);
            let slot = head.slot_of(b_lo);
            head.net_prev[slot] = index;
        }
        if head_hi != NIL {
            let head = self.contacts.at_mut(head_hi);
            let slot = head.slot_of(b_hi);
            head.net_prev[slot] = index;
        }
        bodies.at_mut(b_lo).contact_first = index;
        bodies.at_mut(b_hi).contact_first = index;

        self.map.insert(key, index);
        if (index as usize) < self.frame.len() {
            self.frame.set(index as usize, true);
        }
        (index, true)
    }

    /// Unlinks the record from both net-lists and frees it. Island list
    /// removal is the island database's business and must happen first.
    pub fn contact_remove(&mut self, bodies: &mut Pool<RigidBody>, index: u32) {
        let (key, net_next, net_prev) = {
            let c = self.contacts.at(index);
            (c.key, c.net_next, c.net_prev)
        };

        for slot in 0..2 {
            let owner = if slot == 0 { key_low(key) } else { key_high(key) };
            let prev = net_prev[slot];
            let next = net_next[slot];
            if prev == NIL {
                bodies.at_mut(owner).contact_first = next;
            } else {
                let pc = self.contacts.at_mut(prev);
                let ps = pc.slot_of(owner);
                pc.net_next[ps] = next;
            }
            if next != NIL {
                let nc = self.contacts.at_mut(next);
                let ns = nc.slot_of(owner);
                nc.net_prev[ns] = prev;
            }
        }

        if (index as usize) < self.persistent.len() {
            self.persistent.set(index as usize, false);
        }
        if (index as usize) < self.frame.len() {
            self.frame.set(index as usize, false);
        }
        self.map.remove(&key);
        self.contacts.remove(index);
    }

    /// Contact indices incident to `body`, walked through its net-list.
    pub fn body_contacts(&self, body: u32, first: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut index = first;
        while index != NIL {
            let c = self.contacts.at(index);
            out.push(index);
            index = c.net_next[c.slot_of(body)];
        }
        out
    }

    /// End of tick: the frame usage becomes the persistent usage, extended
    /// with a set bit for every record appended past the old bound.
    pub fn update_persistent_usage(&mut self) {
        self.persistent.copy_from(&self.frame);
        self.persistent
            .grow(self.contacts.index_bound() as usize, true);
    }

    pub fn sat_cache_lookup(&self, b1: u32, b2: u32) -> Option<&SatCacheKind> {
        let index = *self.sat_map.get(&pair_key(b1, b2))?;
        Some(&self.sat_pool.at(index).kind)
    }

    /// Inserts or overwrites the pair's cache and marks it referenced.
    pub fn sat_cache_upsert(&mut self, key: u64, kind: SatCacheKind) {
        if let Some(&index) = self.sat_map.get(&key) {
            let entry = self.sat_pool.at_mut(index);
            entry.kind = kind;
            entry.touched = true;
            return;
        }
        let index = self.sat_pool.insert(SatCacheEntry {
            key,
            kind,
            touched: true,
        });
        self.sat_map.insert(key, index);
    }

    pub fn sat_cache_remove(&mut self, key: u64) {
        if let Some(index) = self.sat_map.remove(&key) {
            self.sat_pool.remove(index);
        }
    }

    pub fn sat_cache_count(&self) -> u32 {
        self.sat_pool.len()
    }

    /// Debug sweep: every persistent record is reachable from both of its
    /// bodies' net-list heads exactly once.
    pub fn validate(&self, bodies: &Pool<RigidBody>) {
        for index in self.persistent.iter_ones() {
            let Some(c) = self.contacts.get(index) else {
                debug_assert!(false, "persistent bit names a freed contact {index}");
                continue;
            };
            for body in [c.body_low(), c.body_high()] {
                let head = bodies.at(body).contact_first;
                let hits = self
                    .body_contacts(body, head)
                    .iter()
                    .filter(|&&i| i == index)
                    .count();
                debug_assert_eq!(hits, 1, "contact {index} net-list reachability");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::body::{BodyFlags, IslandRef, ListHead, RigidBody};
    use glam::{Mat3, Quat};

    fn test_body() -> RigidBody {
        RigidBody {
            flags: BodyFlags::new(BodyFlags::ACTIVE | BodyFlags::DYNAMIC | BodyFlags::AWAKE),
            entity: 0,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            local_center_of_mass: Vec3::ZERO,
            local_bbox: crate::utils::math::Aabb::new(Vec3::ZERO, Vec3::ONE),
            margin: 0.25,
            mass: 1.0,
            inv_mass: 1.0,
            inertia_tensor: Mat3::IDENTITY,
            inv_inertia_tensor: Mat3::IDENTITY,
            restitution: 0.0,
            friction: 0.5,
            shape: 0,
            shape_list: ListHead::default(),
            island: IslandRef::None,
            island_next: NIL,
            island_prev: NIL,
            contact_first: NIL,
            proxy: NIL,
            low_velocity_time: 0.0,
        }
    }

    fn manifold(b1: u32, b2: u32) -> ContactManifold {
        let mut m = ContactManifold::empty(b1.min(b2), b1.max(b2));
        m.push(Vec3::ZERO, 0.01);
        m
    }

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(pair_key(7, 3), pair_key(3, 7));
        assert_eq!(key_low(pair_key(7, 3)), 3);
        assert_eq!(key_high(pair_key(7, 3)), 7);
    }

    #[test]
    fn net_list_reaches_all_incident_contacts() {
        let mut bodies = Pool::new();
        for _ in 0..3 {
            bodies.insert(test_body());
        }
        let mut cdb = ContactDatabase::new();
        cdb.begin_frame();

        let (c01, new01) = cdb.contact_add(&mut bodies, &manifold(0, 1));
        let (c02, _) = cdb.contact_add(&mut bodies, &manifold(0, 2));
        let (c12, _) = cdb.contact_add(&mut bodies, &manifold(1, 2));
        assert!(new01);

        let of0 = cdb.body_contacts(0, bodies.at(0).contact_first);
        let of1 = cdb.body_contacts(1, bodies.at(1).contact_first);
        let of2 = cdb.body_contacts(2, bodies.at(2).contact_first);
        assert_eq!(of0.len(), 2);
        assert!(of0.contains(&c01) && of0.contains(&c02));
        assert!(of1.contains(&c01) && of1.contains(&c12));
        assert!(of2.contains(&c02) && of2.contains(&c12));

        cdb.update_persistent_usage();
        cdb.validate(&bodies);

        // removing the middle record must keep both neighbours linked
        cdb.contact_remove(&mut bodies, c02);
        let of0 = cdb.body_contacts(0, bodies.at(0).contact_first);
        assert_eq!(of0, vec![c01]);
        let of2 = cdb.body_contacts(2, bodies.at(2).contact_first);
        assert_eq!(of2, vec![c12]);
    }

    #[test]
    fn broken_contacts_are_persistent_minus_frame() {
        let mut bodies = Pool::new();
        for _ in 0..4 {
            bodies.insert(test_body());
        }
        let mut cdb = ContactDatabase::new();
        cdb.begin_frame();
        let (c01, _) = cdb.contact_add(&mut bodies, &manifold(0, 1));
        let (c23, _) = cdb.contact_add(&mut bodies, &manifold(2, 3));
        cdb.update_persistent_usage();

        // next tick: only 0-1 is touched
        cdb.begin_frame();
        let (again, is_new) = cdb.contact_add(&mut bodies, &manifold(0, 1));
        assert_eq!(again, c01);
        assert!(!is_new);

        let broken: Vec<u32> = cdb.persistent.iter_and_not(&cdb.frame).collect();
        assert_eq!(broken, vec![c23]);
    }

    #[test]
    fn untouched_sat_caches_are_reclaimed() {
        let mut cdb = ContactDatabase::new();
        let key = pair_key(0, 1);
        cdb.sat_cache_upsert(
            key,
            SatCacheKind::Separation {
                axis: Vec3::X,
                separation: 1.0,
            },
        );
        assert_eq!(cdb.sat_cache_count(), 1);

        // survives the tick it was touched in
        cdb.reclaim_sat_caches();
        assert_eq!(cdb.sat_cache_count(), 1);
        // not referenced during the next tick: reclaimed
        cdb.reclaim_sat_caches();
        assert_eq!(cdb.sat_cache_count(), 0);
        assert!(cdb.sat_cache_lookup(0, 1).is_none());
    }
}
