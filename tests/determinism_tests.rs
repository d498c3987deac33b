use glam::{Quat, Vec3};
use impulse_engine::{BodyPrefab, CollisionShape, PhysicsPipeline};

const NS_TICK: u64 = 1_000_000_000 / 60;

fn build_scene() -> (PhysicsPipeline, Vec<u32>) {
    let mut pipeline = PhysicsPipeline::builder()
        .ns_tick(NS_TICK)
        .parallel(false)
        .build();

    let ground_shape = pipeline
        .shape_db_mut()
        .insert("ground", CollisionShape::cuboid(Vec3::new(8.0, 0.05, 8.0)));
    let ground = BodyPrefab::new(pipeline.shape_db(), ground_shape, 1.0, 0.0, 0.5, false);
    let ground = pipeline.prefab_db_mut().insert("ground", ground);
    pipeline.body_add(ground, Vec3::new(0.0, -0.05, 0.0), Quat::IDENTITY, 0);

    let box_shape = pipeline
        .shape_db_mut()
        .insert("unit_box", CollisionShape::cuboid(Vec3::splat(0.5)));
    let box_prefab = BodyPrefab::new(pipeline.shape_db(), box_shape, 1.0, 0.0, 0.5, true);
    let box_prefab = pipeline.prefab_db_mut().insert("unit_box", box_prefab);

    let ball_shape = pipeline
        .shape_db_mut()
        .insert("ball", CollisionShape::sphere(0.4));
    let ball_prefab = BodyPrefab::new(pipeline.shape_db(), ball_shape, 1.0, 0.0, 0.5, true);
    let ball_prefab = pipeline.prefab_db_mut().insert("ball", ball_prefab);

    let mut bodies = Vec::new();
    for i in 0..4 {
        let y = 0.5 + i as f32 * 1.001;
        bodies.push(pipeline.body_add(box_prefab, Vec3::new(0.0, y, 0.0), Quat::IDENTITY, i));
    }
    bodies.push(pipeline.body_add(
        ball_prefab,
        Vec3::new(0.3, 6.0, 0.1),
        Quat::IDENTITY,
        10,
    ));
    bodies.push(pipeline.body_add(
        ball_prefab,
        Vec3::new(-2.0, 1.0, 2.0),
        Quat::IDENTITY,
        11,
    ));
    (pipeline, bodies)
}

#[test]
fn single_threaded_runs_are_bit_exact() {
    let (mut a, bodies_a) = build_scene();
    let (mut b, bodies_b) = build_scene();

    for _ in 0..1000 {
        a.tick();
        b.tick();
    }

    for (&ha, &hb) in bodies_a.iter().zip(&bodies_b) {
        let ba = a.body(ha);
        let bb = b.body(hb);
        assert_eq!(ba.position, bb.position);
        assert_eq!(ba.rotation, bb.rotation);
        assert_eq!(ba.velocity, bb.velocity);
        assert_eq!(ba.angular_velocity, bb.angular_velocity);
    }
}

#[test]
fn warm_started_stack_settles_without_oscillation() {
    let (mut pipeline, bodies) = build_scene();

    for _ in 0..300 {
        pipeline.tick();
    }

    // once settled, per-tick kinetic energy must not flare back up
    let energy = |p: &PhysicsPipeline| -> f32 {
        bodies
            .iter()
            .map(|&h| {
                let b = p.body(h);
                b.velocity.length_squared() + b.angular_velocity.length_squared()
            })
            .sum()
    };

    let settled = energy(&pipeline);
    assert!(settled < 1e-2, "scene failed to settle: {settled}");
    for _ in 0..120 {
        pipeline.tick();
        assert!(energy(&pipeline) <= settled.max(1e-3) * 10.0);
    }
}
