use glam::{Quat, Vec3};
use log::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::collision::broadphase::DynamicBvh;
use crate::collision::contact::PairResult;
use crate::collision::narrowphase::{self, ShapePose};
use crate::collision::shapes::ShapeType;
use crate::config::{
    SleepTransition, SolverConfig, SolverSettings, BODY_PROXY_MARGIN, COLLISION_MARGIN_DEFAULT,
};
use crate::core::body::{BodyFlags, IslandRef, ListHead, RigidBody};
use crate::core::database::{PrefabDatabase, ShapeDatabase};
use crate::core::shape::{aggregate_mass_properties, ShapeInstance, ShapePrefab};
use crate::core::types::Transform;
use crate::dynamics::contact_db::{pair_key, ContactDatabase};
use crate::dynamics::island::{IslandDatabase, IslandFlags};
use crate::dynamics::solver::{solve_island, IslandSolveOutput};
use crate::events::{EventQueue, PhysicsEvent, PhysicsEventKind};
use crate::utils::allocator::{Pool, NIL};
use crate::utils::logging::TickTimer;
use crate::utils::math::Ray;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Raycast result; `MISS` carries the sentinel handle and parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub body: u32,
    pub t: f32,
}

impl RayHit {
    pub const MISS: RayHit = RayHit {
        body: u32::MAX,
        t: f32::INFINITY,
    };

    pub fn is_miss(&self) -> bool {
        self.body == u32::MAX
    }
}

/// The rigid body pipeline: owns bodies, shapes, broadphase, the contact and
/// island databases, and drives one fixed step per [`tick`](Self::tick).
pub struct PhysicsPipeline {
    config: SolverConfig,

    shape_db: ShapeDatabase,
    prefab_db: PrefabDatabase,

    bodies: Pool<RigidBody>,
    shape_instances: Pool<ShapeInstance>,
    marked: Vec<u32>,

    bvh: DynamicBvh,
    cdb: ContactDatabase,
    isdb: IslandDatabase,
    events: EventQueue,

    ns_start: u64,
    ns_tick: u64,
    ns_elapsed: u64,
    frames_completed: u64,

    margin_enabled: bool,
    parallel_enabled: bool,

    /// Running count of full SAT sweeps (face + face + edge); cached-axis
    /// confirmations do not count.
    full_sat_evaluations: u64,

    overlap_pairs: Vec<(u32, u32)>,
    new_contacts: Vec<u32>,
}

pub struct PhysicsPipelineBuilder {
    ns_tick: u64,
    settings: SolverSettings,
    parallel: bool,
}

impl Default for PhysicsPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsPipelineBuilder {
    pub fn new() -> Self {
        Self {
            ns_tick: NSEC_PER_SEC / 60,
            settings: SolverSettings::default(),
            parallel: cfg!(feature = "parallel"),
        }
    }

    pub fn ns_tick(mut self, ns: u64) -> Self {
        self.ns_tick = ns.max(1);
        self
    }

    pub fn gravity(mut self, gravity: Vec3) -> Self {
        self.settings.gravity = gravity;
        self
    }

    pub fn settings(mut self, settings: SolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    pub fn build(self) -> PhysicsPipeline {
        PhysicsPipeline {
            config: SolverConfig::new(self.settings),
            shape_db: ShapeDatabase::new(),
            prefab_db: PrefabDatabase::new(),
            bodies: Pool::new(),
            shape_instances: Pool::new(),
            marked: Vec::new(),
            bvh: DynamicBvh::new(),
            cdb: ContactDatabase::new(),
            isdb: IslandDatabase::new(),
            events: EventQueue::new(),
            ns_start: 0,
            ns_tick: self.ns_tick,
            ns_elapsed: 0,
            frames_completed: 0,
            margin_enabled: true,
            parallel_enabled: self.parallel,
            full_sat_evaluations: 0,
            overlap_pairs: Vec::new(),
            new_contacts: Vec::new(),
        }
    }
}

impl PhysicsPipeline {
    pub fn new(ns_tick: u64) -> Self {
        Self::builder().ns_tick(ns_tick).build()
    }

    pub fn builder() -> PhysicsPipelineBuilder {
        PhysicsPipelineBuilder::new()
    }

    // ---- databases and accessors ----

    pub fn shape_db(&self) -> &ShapeDatabase {
        &self.shape_db
    }

    pub fn shape_db_mut(&mut self) -> &mut ShapeDatabase {
        &mut self.shape_db
    }

    pub fn prefab_db(&self) -> &PrefabDatabase {
        &self.prefab_db
    }

    pub fn prefab_db_mut(&mut self) -> &mut PrefabDatabase {
        &mut self.prefab_db
    }

    pub fn body(&self, handle: u32) -> &RigidBody {
        self.bodies.at(handle)
    }

    /// Mutable body access for host-side impulses and initial velocities.
    /// Structural fields (island, lists, proxy) belong to the pipeline.
    pub fn body_mut(&mut self, handle: u32) -> &mut RigidBody {
        self.bodies.at_mut(handle)
    }

    pub fn body_count(&self) -> u32 {
        self.bodies.len()
    }

    pub fn island_count(&self) -> u32 {
        self.isdb.islands.len()
    }

    pub fn contact_count(&self) -> u32 {
        self.cdb.contacts.len()
    }

    pub fn contact_depths(&self) -> Vec<f32> {
        self.cdb
            .contacts
            .iter()
            .map(|(_, c)| c.manifold.max_depth())
            .collect()
    }

    pub fn settings(&self) -> &SolverSettings {
        self.config.settings()
    }

    /// Hot-reload entry point; edits apply at the start of the next tick.
    pub fn settings_pending_mut(&mut self) -> &mut SolverSettings {
        self.config.pending_mut()
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames_completed
    }

    pub fn ns_elapsed(&self) -> u64 {
        self.ns_elapsed
    }

    pub fn full_sat_evaluations(&self) -> u64 {
        self.full_sat_evaluations
    }

    pub fn set_parallel_enabled(&mut self, enabled: bool) {
        self.parallel_enabled = enabled;
    }

    pub fn parallel_enabled(&self) -> bool {
        self.parallel_enabled
    }

    pub fn set_margin_enabled(&mut self, enabled: bool) {
        self.margin_enabled = enabled;
    }

    pub fn events_drain(&mut self) -> Vec<PhysicsEvent> {
        self.events.drain().collect()
    }

    // ---- body and shape lifecycle ----

    /// Allocates a body from a prefab. Dynamic bodies become singleton
    /// islands; static bodies carry the static island sentinel.
    pub fn body_add(
        &mut self,
        prefab_handle: u32,
        position: Vec3,
        rotation: Quat,
        entity: u32,
    ) -> u32 {
        let prefab = *self.prefab_db.address(prefab_handle);
        self.shape_db.retain(prefab.shape);

        let sleep_enabled = self.config.settings().sleep_enabled;
        let mut flags = BodyFlags::new(BodyFlags::ACTIVE);
        if sleep_enabled {
            flags.insert(BodyFlags::AWAKE);
        }
        if prefab.dynamic {
            flags.insert(BodyFlags::DYNAMIC);
        }

        let shape = self.shape_db.address(prefab.shape);
        let shape_type = shape.shape_type();
        let local_bbox = shape.rotated_local_bbox(rotation);

        let inv_mass = if prefab.dynamic && prefab.mass > f32::EPSILON {
            1.0 / prefab.mass
        } else {
            0.0
        };

        let index = self.bodies.insert(RigidBody {
            flags,
            entity,
            position,
            rotation,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            local_center_of_mass: prefab.local_center_of_mass,
            local_bbox,
            margin: BODY_PROXY_MARGIN,
            mass: prefab.mass,
            inv_mass,
            inertia_tensor: prefab.inertia_tensor,
            inv_inertia_tensor: prefab.inv_inertia_tensor,
            restitution: prefab.restitution,
            friction: prefab.friction,
            shape: prefab.shape,
            shape_list: ListHead::default(),
            island: IslandRef::None,
            island_next: NIL,
            island_prev: NIL,
            contact_first: NIL,
            proxy: NIL,
            low_velocity_time: 0.0,
        });
        self.events.push(PhysicsEventKind::BodyNew { body: index });

        // the prefab shape doubles as the first instance so mass aggregation
        // sees every attached shape
        self.shape_db.retain(prefab.shape);
        let instance = self.shape_instances.insert(ShapeInstance {
            body: index,
            shape: prefab.shape,
            density: prefab.density,
            restitution: prefab.restitution,
            friction: prefab.friction,
            margin: BODY_PROXY_MARGIN,
            local_transform: Transform::default(),
            next: NIL,
            prev: NIL,
        });
        {
            let body = self.bodies.at_mut(index);
            body.shape_list = ListHead {
                first: instance,
                last: instance,
                count: 1,
            };
        }

        // triangle meshes are immovable; their proxies stay tight
        let proxy_box = if shape_type == ShapeType::TriMesh {
            local_bbox.translated(position)
        } else {
            local_bbox.translated(position).inflated(BODY_PROXY_MARGIN)
        };
        let proxy = self.bvh.insert(index, proxy_box);
        self.bodies.at_mut(index).proxy = proxy;

        if prefab.dynamic {
            self.isdb
                .init_island_from_body(&mut self.bodies, &mut self.events, index, sleep_enabled);
        } else {
            self.bodies.at_mut(index).island = IslandRef::Static;
        }

        index
    }

    /// Deferred removal; the body is actually freed at the start of the next
    /// tick so this tick's events may still name it.
    pub fn body_tag_for_removal(&mut self, handle: u32) {
        let body = self.bodies.at_mut(handle);
        if !body.flags.is_marked() {
            body.flags.insert(BodyFlags::MARKED_FOR_REMOVAL);
            self.marked.push(handle);
        }
    }

    /// Attaches an additional shape instance to a body and re-aggregates its
    /// mass, centroid, and inertia over the whole shape list.
    pub fn shape_add(&mut self, body: u32, prefab: &ShapePrefab, local: Transform) -> u32 {
        self.shape_db.retain(prefab.shape);
        let index = self
            .shape_instances
            .insert(ShapeInstance::from_prefab(prefab, local, body));

        {
            let list = self.bodies.at(body).shape_list;
            if list.last != NIL {
                self.shape_instances.at_mut(list.last).next = index;
                self.shape_instances.at_mut(index).prev = list.last;
            }
            let b = self.bodies.at_mut(body);
            if b.shape_list.first == NIL {
                b.shape_list.first = index;
            }
            b.shape_list.last = index;
            b.shape_list.count += 1;
        }

        let first = self.bodies.at(body).shape_list.first;
        let props = aggregate_mass_properties(&self.shape_instances, &self.shape_db, first);
        let b = self.bodies.at_mut(body);
        b.mass = props.mass;
        b.local_center_of_mass = props.local_center_of_mass;
        b.inertia_tensor = props.inertia_tensor;
        if b.flags.is_dynamic() && props.mass > f32::EPSILON {
            b.inv_mass = 1.0 / props.mass;
            b.inv_inertia_tensor = props.inertia_tensor.inverse();
        } else {
            b.inv_mass = 0.0;
            b.inv_inertia_tensor = glam::Mat3::ZERO;
        }
        index
    }

    // ---- sleeping ----

    pub fn sleep_enable(&mut self) {
        if self.config.settings().sleep_enabled {
            return;
        }
        self.config.force_sleep_enabled(true);
        for (_, body) in self.bodies.iter_mut() {
            if body.flags.contains(BodyFlags::ACTIVE | BodyFlags::DYNAMIC) {
                body.flags.insert(BodyFlags::AWAKE);
            }
        }
        for (_, island) in self.isdb.islands.iter_mut() {
            island
                .flags
                .insert(IslandFlags::AWAKE | IslandFlags::SLEEP_RESET);
            island.flags.remove(IslandFlags::TRY_SLEEP);
        }
    }

    pub fn sleep_disable(&mut self) {
        if !self.config.settings().sleep_enabled {
            return;
        }
        self.config.force_sleep_enabled(false);
        for (_, body) in self.bodies.iter_mut() {
            if body.flags.contains(BodyFlags::ACTIVE | BodyFlags::DYNAMIC) {
                body.flags.insert(BodyFlags::AWAKE);
            }
        }
        for (_, island) in self.isdb.islands.iter_mut() {
            island.flags.insert(IslandFlags::AWAKE);
            island
                .flags
                .remove(IslandFlags::SLEEP_RESET | IslandFlags::TRY_SLEEP);
        }
    }

    // ---- queries ----

    /// First body hit by the ray: best-first descent over the dynamic BVH
    /// with exact shape raycasts at the leaves.
    pub fn raycast(&self, ray: &Ray) -> RayHit {
        let mut hit = RayHit::MISS;
        let bodies = &self.bodies;
        let shape_db = &self.shape_db;
        let t = self.bvh.raycast(ray, f32::INFINITY, |body_index, best| {
            let body = bodies.at(body_index);
            let shape = shape_db.address(body.shape);
            let pose = ShapePose::new(shape, body.position, body.rotation);
            let t = narrowphase::raycast(&pose, ray);
            if t < best {
                hit.body = body_index;
                t
            } else {
                best
            }
        });
        if hit.is_miss() {
            RayHit::MISS
        } else {
            RayHit { body: hit.body, t }
        }
    }

    // ---- the tick ----

    /// Advances the simulation by one fixed step.
    pub fn tick(&mut self) {
        self.frames_completed += 1;
        let _timer = TickTimer::begin(self.frames_completed, self.ns_tick);
        self.events
            .stamp(self.ns_start + self.frames_completed * self.ns_tick);

        self.isdb.clear_frame();
        self.cdb.reclaim_sat_caches();

        // 1. free bodies marked last tick
        self.remove_marked_bodies();

        // 2. pending solver-config changes
        match self.config.apply_pending() {
            SleepTransition::Enable => self.sleep_enable(),
            SleepTransition::Disable => self.sleep_disable(),
            SleepTransition::Unchanged => {}
        }

        // 3. refit proxies of awake dynamic bodies
        self.update_dynamic_tree();

        // 4. broadphase overlap pairs
        self.push_overlap_pairs();

        // 5. narrowphase and contact database merge
        self.run_narrowphase();

        // 6. island merge over new contacts
        self.merge_islands();

        // 7. broken contacts out, split candidates tagged
        self.remove_broken_contacts();

        // 8. split tagged islands
        let splits = std::mem::take(&mut self.isdb.possible_splits);
        let sleep_enabled = self.config.settings().sleep_enabled;
        for island in splits {
            self.isdb.split(
                &mut self.bodies,
                &mut self.cdb,
                &mut self.events,
                island,
                sleep_enabled,
            );
        }
        self.cdb.update_persistent_usage();

        // 9. solve awake islands and integrate
        self.solve_islands();

        // 10. stamp completion
        self.ns_elapsed += self.ns_tick;

        #[cfg(debug_assertions)]
        self.validate();
    }

    fn remove_marked_bodies(&mut self) {
        let marked = std::mem::take(&mut self.marked);
        for handle in marked {
            self.body_dealloc(handle);
        }
    }

    fn body_dealloc(&mut self, handle: u32) {
        let sleep_enabled = self.config.settings().sleep_enabled;
        let (shape, island, contact_first, proxy, shape_first) = {
            let body = self.bodies.at(handle);
            (
                body.shape,
                body.island,
                body.contact_first,
                body.proxy,
                body.shape_list.first,
            )
        };

        self.shape_db.dereference(shape);
        let mut si = shape_first;
        while si != NIL {
            let instance = self.shape_instances.remove(si);
            self.shape_db.dereference(instance.shape);
            si = instance.next;
        }

        self.bvh.remove(proxy);

        match island {
            IslandRef::Handle(island_index) => {
                let incident = self.cdb.body_contacts(handle, contact_first);
                self.isdb.remove_body_resources(
                    &mut self.bodies,
                    &mut self.cdb,
                    &mut self.events,
                    island_index,
                    handle,
                );
                for ci in incident {
                    let (key, b1, b2) = {
                        let c = self.cdb.contacts.at(ci);
                        (c.key, c.body_low(), c.body_high())
                    };
                    self.events
                        .push(PhysicsEventKind::ContactRemoved { body1: b1, body2: b2 });
                    self.cdb.sat_cache_remove(key);
                    self.cdb.contact_remove(&mut self.bodies, ci);
                }
                // the survivors may no longer be connected
                if self.isdb.islands.contains(island_index) && {
                    let island = self.isdb.islands.at(island_index);
                    island.contact_list.count > 0 || island.body_list.count > 1
                } {
                    self.isdb.split(
                        &mut self.bodies,
                        &mut self.cdb,
                        &mut self.events,
                        island_index,
                        sleep_enabled,
                    );
                }
            }
            IslandRef::Static => {
                self.static_remove_contacts_and_update_islands(handle, contact_first);
            }
            IslandRef::None => {}
        }

        self.bodies.remove(handle);
        self.events
            .push(PhysicsEventKind::BodyRemoved { body: handle });
    }

    /// Removing a static body: its contacts live in the dynamic partners'
    /// islands. Every affected island either splits (contacts remain) or is
    /// woken outright.
    fn static_remove_contacts_and_update_islands(&mut self, handle: u32, contact_first: u32) {
        let sleep_enabled = self.config.settings().sleep_enabled;
        let mut affected: Vec<u32> = Vec::new();

        for ci in self.cdb.body_contacts(handle, contact_first) {
            let (key, b1, b2, other) = {
                let c = self.cdb.contacts.at(ci);
                (c.key, c.body_low(), c.body_high(), c.other(handle))
            };
            let island_index = self
                .bodies
                .at(other)
                .island
                .handle()
                .expect("static contact without a dynamic island");

            let island = self.isdb.islands.at_mut(island_index);
            if !island.flags.contains(IslandFlags::SPLIT) {
                island.flags.insert(IslandFlags::SPLIT);
                affected.push(island_index);
            }
            self.isdb.contact_remove(&mut self.cdb, island_index, ci);

            self.events
                .push(PhysicsEventKind::ContactRemoved { body1: b1, body2: b2 });
            self.cdb.sat_cache_remove(key);
            self.cdb.contact_remove(&mut self.bodies, ci);
        }

        for island_index in affected {
            if self.isdb.islands.at(island_index).contact_list.count > 0 {
                self.isdb.split(
                    &mut self.bodies,
                    &mut self.cdb,
                    &mut self.events,
                    island_index,
                    sleep_enabled,
                );
            } else {
                let island = self.isdb.islands.at_mut(island_index);
                island.flags.remove(IslandFlags::SPLIT);
                if !island.flags.is_awake() {
                    self.events.push(PhysicsEventKind::IslandAwake {
                        island: island_index,
                    });
                }
                island
                    .flags
                    .insert(IslandFlags::AWAKE | IslandFlags::SLEEP_RESET);
            }
        }
    }

    fn update_dynamic_tree(&mut self) {
        let sleep_enabled = self.config.settings().sleep_enabled;
        let mut required = BodyFlags::ACTIVE | BodyFlags::DYNAMIC;
        if sleep_enabled {
            required |= BodyFlags::AWAKE;
        }

        let indices: Vec<u32> = self.bodies.indices().collect();
        for index in indices {
            let (flags, shape, rotation, position, margin, proxy) = {
                let b = self.bodies.at(index);
                (b.flags, b.shape, b.rotation, b.position, b.margin, b.proxy)
            };
            if !flags.contains(required) {
                continue;
            }

            let local_bbox = self.shape_db.address(shape).rotated_local_bbox(rotation);
            self.bodies.at_mut(index).local_bbox = local_bbox;
            let world = local_bbox.translated(position);
            if !self.bvh.proxy_bbox(proxy).contains(&world) {
                self.bvh.remove(proxy);
                let new_proxy = self.bvh.insert(index, world.inflated(margin));
                self.bodies.at_mut(index).proxy = new_proxy;
            }
        }
    }

    fn push_overlap_pairs(&mut self) {
        self.overlap_pairs.clear();
        self.bvh.push_overlap_pairs(&mut self.overlap_pairs);
        // static pairs can never produce motion, so they never enter the
        // contact database
        let bodies = &self.bodies;
        self.overlap_pairs.retain(|&(a, b)| {
            bodies.at(a).flags.is_dynamic() || bodies.at(b).flags.is_dynamic()
        });
    }

    fn narrow_pair(&self, b1: u32, b2: u32) -> PairResult {
        let body1 = self.bodies.at(b1);
        let body2 = self.bodies.at(b2);
        let pose1 = ShapePose::new(self.shape_db.address(body1.shape), body1.position, body1.rotation);
        let pose2 = ShapePose::new(self.shape_db.address(body2.shape), body2.position, body2.rotation);
        let cached = self.cdb.sat_cache_lookup(b1, b2);
        let margin = if self.margin_enabled {
            COLLISION_MARGIN_DEFAULT
        } else {
            0.0
        };
        narrowphase::contact(&pose1, &pose2, b1, b2, cached, margin)
    }

    fn run_narrowphase(&mut self) {
        self.cdb.begin_frame();

        let pairs = std::mem::take(&mut self.overlap_pairs);
        #[cfg(feature = "parallel")]
        let results: Vec<PairResult> = if self.parallel_enabled {
            pairs
                .par_iter()
                .map(|&(b1, b2)| self.narrow_pair(b1, b2))
                .collect()
        } else {
            pairs
                .iter()
                .map(|&(b1, b2)| self.narrow_pair(b1, b2))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let results: Vec<PairResult> = pairs
            .iter()
            .map(|&(b1, b2)| self.narrow_pair(b1, b2))
            .collect();

        self.new_contacts.clear();
        for (&(b1, b2), result) in pairs.iter().zip(results) {
            if result.full_sat {
                self.full_sat_evaluations += 1;
            }
            if let Some(kind) = result.sat_cache {
                self.cdb.sat_cache_upsert(pair_key(b1, b2), kind);
            }
            if let Some(manifold) = result.manifold {
                let (ci, is_new) = self.cdb.contact_add(&mut self.bodies, &manifold);
                if is_new {
                    self.new_contacts.push(ci);
                    self.events.push(PhysicsEventKind::ContactNew {
                        body1: manifold.body1,
                        body2: manifold.body2,
                    });
                }
            }
        }
        self.overlap_pairs = pairs;

        debug!(
            "narrowphase: {} pairs, {} new contacts, {} live contacts",
            self.overlap_pairs.len(),
            self.new_contacts.len(),
            self.cdb.contacts.len()
        );
    }

    fn merge_islands(&mut self) {
        let sleep_enabled = self.config.settings().sleep_enabled;
        let new_contacts = std::mem::take(&mut self.new_contacts);
        for &ci in &new_contacts {
            let (b1, b2) = {
                let c = self.cdb.contacts.at(ci);
                (c.body_low(), c.body_high())
            };
            let d1 = self.bodies.at(b1).flags.is_dynamic();
            let d2 = self.bodies.at(b2).flags.is_dynamic();
            match (d1, d2) {
                (true, true) => self.isdb.merge(
                    &mut self.bodies,
                    &mut self.cdb,
                    &mut self.events,
                    ci,
                    b1,
                    b2,
                    sleep_enabled,
                ),
                (true, false) => {
                    let island = self.bodies.at(b1).island.handle().unwrap();
                    self.isdb.contact_append(&mut self.cdb, island, ci);
                }
                (false, true) => {
                    let island = self.bodies.at(b2).island.handle().unwrap();
                    self.isdb.contact_append(&mut self.cdb, island, ci);
                }
                (false, false) => unreachable!("static pair filtered in broadphase"),
            }
        }
        self.new_contacts = new_contacts;
    }

    fn remove_broken_contacts(&mut self) {
        // the pair's SAT cache is left alone: a still-overlapping pair keeps
        // its cached separating axis and is reclaimed by inactivity instead
        let broken: Vec<u32> = self.cdb.persistent.iter_and_not(&self.cdb.frame).collect();
        for ci in broken {
            let (b1, b2) = {
                let c = self.cdb.contacts.at(ci);
                (c.body_low(), c.body_high())
            };
            let d1 = self.bodies.at(b1).flags.is_dynamic();
            let island = if d1 {
                if self.bodies.at(b2).flags.is_dynamic() {
                    self.isdb.tag_for_splitting(&self.bodies, b1);
                }
                self.bodies.at(b1).island.handle().unwrap()
            } else {
                self.bodies.at(b2).island.handle().unwrap()
            };

            self.isdb.contact_remove(&mut self.cdb, island, ci);
            self.events
                .push(PhysicsEventKind::ContactRemoved { body1: b1, body2: b2 });
            self.cdb.contact_remove(&mut self.bodies, ci);
        }
    }

    fn solve_islands(&mut self) {
        let settings = *self.config.settings();
        let dt = self.ns_tick as f32 / NSEC_PER_SEC as f32;

        let awake: Vec<u32> = self
            .isdb
            .islands
            .iter()
            .filter(|(_, island)| !settings.sleep_enabled || island.flags.is_awake())
            .map(|(index, _)| index)
            .collect();

        let bodies = &self.bodies;
        let cdb = &self.cdb;
        let islands = &self.isdb.islands;
        #[cfg(feature = "parallel")]
        let outputs: Vec<IslandSolveOutput> = if self.parallel_enabled {
            awake
                .par_iter()
                .map(|&i| solve_island(bodies, cdb, islands, i, &settings, dt))
                .collect()
        } else {
            awake
                .iter()
                .map(|&i| solve_island(bodies, cdb, islands, i, &settings, dt))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let outputs: Vec<IslandSolveOutput> = awake
            .iter()
            .map(|&i| solve_island(bodies, cdb, islands, i, &settings, dt))
            .collect();

        for output in outputs {
            self.isdb.islands.at_mut(output.island).flags = output.new_flags;
            if output.asleep {
                self.events.push(PhysicsEventKind::IslandAsleep {
                    island: output.island,
                });
            }
            for (handle, update) in output.body_updates {
                let body = self.bodies.at_mut(handle);
                body.position = update.position;
                body.rotation = update.rotation;
                body.velocity = update.velocity;
                body.angular_velocity = update.angular_velocity;
                body.low_velocity_time = update.low_velocity_time;
                if update.awake {
                    body.flags.insert(BodyFlags::AWAKE);
                } else {
                    body.flags.remove(BodyFlags::AWAKE);
                }
                self.events
                    .push(PhysicsEventKind::BodyOrientation { body: handle });
            }
            for (ci, cache) in output.contact_caches {
                let contact = self.cdb.contacts.at_mut(ci);
                contact.cached_points = cache.points;
                contact.cached_normal_impulse = cache.normal;
                contact.cached_tangent_impulse = cache.tangent;
                contact.cached_count = cache.count;
            }
        }
    }

    /// Debug-only coherence sweep over the contact and island databases and
    /// BVH containment.
    pub fn validate(&self) {
        self.cdb.validate(&self.bodies);
        self.isdb.validate(&self.bodies, &self.cdb);
        self.bvh.validate();
        // proxies are refit before integration, so a moving body may lag one
        // tick behind its fat box; a margin of slack covers that drift
        for (_, body) in self.bodies.iter() {
            if body.proxy != NIL && body.flags.is_dynamic() {
                debug_assert!(
                    self.bvh
                        .proxy_bbox(body.proxy)
                        .inflated(body.margin)
                        .contains(&body.world_bbox()),
                    "proxy lost the body entirely"
                );
            }
        }
    }
}
