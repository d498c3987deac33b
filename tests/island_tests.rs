use glam::{Quat, Vec3};
use impulse_engine::{
    BodyPrefab, CollisionShape, PhysicsEventKind, PhysicsPipeline, SolverSettings,
};

const NS_TICK: u64 = 1_000_000_000 / 60;

/// Free-floating connectivity sandbox: no gravity, no sleeping.
fn floating_pipeline() -> PhysicsPipeline {
    PhysicsPipeline::builder()
        .ns_tick(NS_TICK)
        .settings(SolverSettings {
            gravity: Vec3::ZERO,
            sleep_enabled: false,
            ..SolverSettings::default()
        })
        .build()
}

fn sphere_prefab(pipeline: &mut PhysicsPipeline, name: &str, radius: f32) -> u32 {
    let shape = pipeline
        .shape_db_mut()
        .insert(name, CollisionShape::sphere(radius));
    let prefab = BodyPrefab::new(pipeline.shape_db(), shape, 1.0, 0.0, 0.5, true);
    pipeline.prefab_db_mut().insert(name, prefab)
}

fn count_kind(events: &[impulse_engine::PhysicsEvent], f: impl Fn(&PhysicsEventKind) -> bool) -> usize {
    events.iter().filter(|e| f(&e.kind)).count()
}

#[test]
fn bridging_body_merges_islands_and_its_removal_splits_them() {
    let mut pipeline = floating_pipeline();
    let small = sphere_prefab(&mut pipeline, "small", 0.6);
    let wide = sphere_prefab(&mut pipeline, "wide", 1.5);

    let _left = pipeline.body_add(small, Vec3::new(0.0, 0.0, 0.0), Quat::IDENTITY, 0);
    let _right = pipeline.body_add(small, Vec3::new(4.0, 0.0, 0.0), Quat::IDENTITY, 1);
    pipeline.tick();
    pipeline.events_drain();
    assert_eq!(pipeline.island_count(), 2);

    // a wide body dropped between the two touches both
    let middle = pipeline.body_add(wide, Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY, 2);
    pipeline.tick();
    let events = pipeline.events_drain();

    assert_eq!(
        count_kind(&events, |k| matches!(k, PhysicsEventKind::IslandNew { .. })),
        1,
        "only the middle body's singleton island is new"
    );
    assert_eq!(
        count_kind(&events, |k| matches!(k, PhysicsEventKind::ContactNew { .. })),
        2
    );
    assert!(
        count_kind(&events, |k| matches!(k, PhysicsEventKind::IslandExpanded { .. })) >= 1
    );
    assert!(
        count_kind(&events, |k| matches!(k, PhysicsEventKind::IslandRemoved { .. })) >= 1
    );
    assert_eq!(pipeline.island_count(), 1, "all three share one island");
    pipeline.validate();

    // removing the bridge leaves two singletons
    pipeline.body_tag_for_removal(middle);
    pipeline.tick();
    let events = pipeline.events_drain();

    assert_eq!(
        count_kind(&events, |k| matches!(k, PhysicsEventKind::ContactRemoved { .. })),
        2
    );
    assert_eq!(
        count_kind(&events, |k| matches!(k, PhysicsEventKind::BodyRemoved { .. })),
        1
    );
    assert_eq!(
        count_kind(&events, |k| matches!(k, PhysicsEventKind::IslandRemoved { .. })),
        1
    );
    assert_eq!(
        count_kind(&events, |k| matches!(k, PhysicsEventKind::IslandNew { .. })),
        2,
        "each survivor seeds a fresh island"
    );
    assert_eq!(pipeline.island_count(), 2);
    assert_eq!(pipeline.contact_count(), 0);
    pipeline.validate();
}

#[test]
fn contact_chain_forms_one_island() {
    let mut pipeline = floating_pipeline();
    let prefab = sphere_prefab(&mut pipeline, "link", 0.6);

    for i in 0..5 {
        pipeline.body_add(prefab, Vec3::new(i as f32, 0.0, 0.0), Quat::IDENTITY, i as u32);
    }
    pipeline.tick();

    assert_eq!(pipeline.island_count(), 1);
    assert_eq!(pipeline.contact_count(), 4);
    pipeline.validate();
}

#[test]
fn separating_bodies_split_back_into_singletons() {
    let mut pipeline = floating_pipeline();
    let prefab = sphere_prefab(&mut pipeline, "pair", 0.6);

    let a = pipeline.body_add(prefab, Vec3::new(0.0, 0.0, 0.0), Quat::IDENTITY, 0);
    let b = pipeline.body_add(prefab, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY, 1);
    pipeline.tick();
    assert_eq!(pipeline.island_count(), 1);

    // push them apart; the broken contact tags the island for splitting
    pipeline.body_mut(a).velocity = Vec3::new(-4.0, 0.0, 0.0);
    pipeline.body_mut(b).velocity = Vec3::new(4.0, 0.0, 0.0);
    for _ in 0..30 {
        pipeline.tick();
    }

    assert_eq!(pipeline.island_count(), 2);
    assert_eq!(pipeline.contact_count(), 0);
    pipeline.validate();
}

#[test]
fn sleeping_island_stays_asleep_undisturbed() {
    let mut pipeline = PhysicsPipeline::new(NS_TICK);
    let ground_shape = pipeline
        .shape_db_mut()
        .insert("ground", CollisionShape::cuboid(Vec3::new(5.0, 0.05, 5.0)));
    let ground = BodyPrefab::new(pipeline.shape_db(), ground_shape, 1.0, 0.0, 0.5, false);
    let ground = pipeline.prefab_db_mut().insert("ground", ground);
    pipeline.body_add(ground, Vec3::new(0.0, -0.05, 0.0), Quat::IDENTITY, 0);

    let ball = sphere_prefab(&mut pipeline, "ball", 0.5);
    let body = pipeline.body_add(ball, Vec3::new(0.0, 0.5, 0.0), Quat::IDENTITY, 1);

    // resting from the start; must sleep within threshold + a few ticks
    let threshold_ticks = (pipeline.settings().sleep_time_threshold * 60.0) as usize;
    for _ in 0..threshold_ticks + 20 {
        pipeline.tick();
    }
    assert!(!pipeline.body(body).flags.is_awake(), "ball should sleep");
    let frozen = pipeline.body(body).position;

    // sleep idempotence: nothing disturbs it, so it stays down bit-exact
    for _ in 0..threshold_ticks {
        pipeline.tick();
        assert!(!pipeline.body(body).flags.is_awake());
    }
    assert_eq!(pipeline.body(body).position, frozen);
}

#[test]
fn new_contact_wakes_a_sleeping_island() {
    let mut pipeline = PhysicsPipeline::new(NS_TICK);
    let ground_shape = pipeline
        .shape_db_mut()
        .insert("ground", CollisionShape::cuboid(Vec3::new(5.0, 0.05, 5.0)));
    let ground = BodyPrefab::new(pipeline.shape_db(), ground_shape, 1.0, 0.0, 0.5, false);
    let ground = pipeline.prefab_db_mut().insert("ground", ground);
    pipeline.body_add(ground, Vec3::new(0.0, -0.05, 0.0), Quat::IDENTITY, 0);

    let ball = sphere_prefab(&mut pipeline, "ball", 0.5);
    let sleeper = pipeline.body_add(ball, Vec3::new(0.0, 0.5, 0.0), Quat::IDENTITY, 1);
    for _ in 0..60 {
        pipeline.tick();
    }
    assert!(!pipeline.body(sleeper).flags.is_awake());
    pipeline.events_drain();

    // drop a second ball onto the sleeper
    let dropper = pipeline.body_add(ball, Vec3::new(0.0, 3.0, 0.0), Quat::IDENTITY, 2);
    let mut woke = false;
    for _ in 0..120 {
        pipeline.tick();
        if pipeline.body(sleeper).flags.is_awake() {
            woke = true;
            break;
        }
    }
    assert!(woke, "impact must wake the sleeping island");
    let _ = dropper;

    let events = pipeline.events_drain();
    assert!(events
        .iter()
        .any(|e| matches!(e.kind, PhysicsEventKind::IslandAwake { .. })));
}

#[test]
fn sleep_disable_wakes_everything() {
    let mut pipeline = PhysicsPipeline::new(NS_TICK);
    let ground_shape = pipeline
        .shape_db_mut()
        .insert("ground", CollisionShape::cuboid(Vec3::new(5.0, 0.05, 5.0)));
    let ground = BodyPrefab::new(pipeline.shape_db(), ground_shape, 1.0, 0.0, 0.5, false);
    let ground = pipeline.prefab_db_mut().insert("ground", ground);
    pipeline.body_add(ground, Vec3::new(0.0, -0.05, 0.0), Quat::IDENTITY, 0);

    let ball = sphere_prefab(&mut pipeline, "ball", 0.5);
    let body = pipeline.body_add(ball, Vec3::new(0.0, 0.5, 0.0), Quat::IDENTITY, 1);
    for _ in 0..60 {
        pipeline.tick();
    }
    assert!(!pipeline.body(body).flags.is_awake());

    pipeline.sleep_disable();
    assert!(pipeline.body(body).flags.is_awake());
    pipeline.tick();
    // with sleeping off, the body never goes back down
    for _ in 0..60 {
        pipeline.tick();
    }
    assert!(pipeline.body(body).flags.is_awake());
}
