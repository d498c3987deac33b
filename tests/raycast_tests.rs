use glam::{Quat, Vec3};
use impulse_engine::{
    BodyPrefab, CollisionShape, PhysicsPipeline, Ray, RayHit, ShapePose,
};

const NS_TICK: u64 = 1_000_000_000 / 60;

fn pipeline_with_stack() -> (PhysicsPipeline, Vec<u32>) {
    let mut pipeline = PhysicsPipeline::new(NS_TICK);
    let ground_shape = pipeline
        .shape_db_mut()
        .insert("ground", CollisionShape::cuboid(Vec3::new(5.0, 0.05, 5.0)));
    let ground = BodyPrefab::new(pipeline.shape_db(), ground_shape, 1.0, 0.0, 0.5, false);
    let ground = pipeline.prefab_db_mut().insert("ground", ground);
    pipeline.body_add(ground, Vec3::new(0.0, -0.05, 0.0), Quat::IDENTITY, 0);

    let unit_shape = pipeline
        .shape_db_mut()
        .insert("unit_box", CollisionShape::cuboid(Vec3::splat(0.5)));
    let unit = BodyPrefab::new(pipeline.shape_db(), unit_shape, 1.0, 0.0, 0.5, true);
    let unit = pipeline.prefab_db_mut().insert("unit_box", unit);

    let mut boxes = Vec::new();
    for i in 0..6 {
        let y = 0.5 + i as f32 * (1.0 + 1e-4);
        boxes.push(pipeline.body_add(unit, Vec3::new(0.0, y, 0.0), Quat::IDENTITY, i));
    }
    (pipeline, boxes)
}

#[test]
fn ray_down_into_stack_hits_topmost_box() {
    let (pipeline, boxes) = pipeline_with_stack();

    let ray = Ray::new(Vec3::new(0.0, 10.0, 0.0), -Vec3::Y);
    let hit = pipeline.raycast(&ray);
    assert!(!hit.is_miss());
    assert_eq!(hit.body, *boxes.last().unwrap());

    let top_face = 0.5 + 5.0 * (1.0 + 1e-4) + 0.5;
    let analytic = 10.0 - top_face;
    assert!(
        (hit.t - analytic).abs() <= 1e-3,
        "t = {} expected {}",
        hit.t,
        analytic
    );
}

#[test]
fn miss_returns_the_sentinel() {
    let (pipeline, _) = pipeline_with_stack();
    let ray = Ray::new(Vec3::new(50.0, 10.0, 0.0), -Vec3::Y);
    let hit = pipeline.raycast(&ray);
    assert!(hit.is_miss());
    assert_eq!(hit, RayHit::MISS);
    assert_eq!(hit.body, u32::MAX);
    assert!(hit.t.is_infinite());
}

#[test]
fn hit_points_lie_on_the_surface() {
    let (pipeline, _) = pipeline_with_stack();

    let probes = [
        Ray::new(Vec3::new(0.0, 10.0, 0.0), -Vec3::Y),
        Ray::new(Vec3::new(0.2, 10.0, 0.3), -Vec3::Y),
        Ray::new(Vec3::new(4.0, 3.0, 0.1), Vec3::new(-1.0, -0.2, 0.0).normalize()),
        Ray::new(Vec3::new(-3.0, 0.8, -3.0), Vec3::new(1.0, 0.0, 1.0).normalize()),
    ];

    let probe_shape = CollisionShape::sphere(0.0);
    for ray in probes {
        let hit = pipeline.raycast(&ray);
        if hit.is_miss() {
            continue;
        }
        let point = ray.point_at(hit.t);
        let body = pipeline.body(hit.body);
        let shape = pipeline.shape_db().address(body.shape);
        let body_pose = ShapePose::new(shape, body.position, body.rotation);
        let probe_pose = ShapePose::new(&probe_shape, point, Quat::IDENTITY);
        let (distance, _, _) =
            impulse_engine::collision::narrowphase::distance(&body_pose, &probe_pose);
        assert!(
            distance <= 1e-3,
            "hit point strays {distance} from the surface"
        );
    }
}

#[test]
fn raycast_tracks_moving_bodies_across_ticks() {
    let mut pipeline = PhysicsPipeline::new(NS_TICK);
    let ground_shape = pipeline
        .shape_db_mut()
        .insert("ground", CollisionShape::cuboid(Vec3::new(5.0, 0.05, 5.0)));
    let ground = BodyPrefab::new(pipeline.shape_db(), ground_shape, 1.0, 0.0, 0.5, false);
    let ground = pipeline.prefab_db_mut().insert("ground", ground);
    pipeline.body_add(ground, Vec3::new(0.0, -0.05, 0.0), Quat::IDENTITY, 0);

    let ball_shape = pipeline
        .shape_db_mut()
        .insert("ball", CollisionShape::sphere(0.5));
    let ball = BodyPrefab::new(pipeline.shape_db(), ball_shape, 1.0, 0.0, 0.5, true);
    let ball = pipeline.prefab_db_mut().insert("ball", ball);
    let body = pipeline.body_add(ball, Vec3::new(0.0, 4.0, 0.0), Quat::IDENTITY, 1);

    let ray = Ray::new(Vec3::new(0.0, 10.0, 0.0), -Vec3::Y);
    let before = pipeline.raycast(&ray);
    for _ in 0..30 {
        pipeline.tick();
    }
    let after = pipeline.raycast(&ray);

    assert_eq!(before.body, body);
    assert_eq!(after.body, body);
    assert!(after.t > before.t, "falling ball moves the hit further away");
}
