use criterion::{black_box, criterion_group, criterion_main, Criterion};
use impulse_engine::*;

const NS_TICK: u64 = 1_000_000_000 / 60;

fn build_pile(count: u32) -> PhysicsPipeline {
    let mut pipeline = PhysicsPipeline::builder()
        .ns_tick(NS_TICK)
        .parallel(false)
        .build();

    let ground_shape = pipeline
        .shape_db_mut()
        .insert("ground", CollisionShape::cuboid(Vec3::new(20.0, 0.05, 20.0)));
    let ground = BodyPrefab::new(pipeline.shape_db(), ground_shape, 1.0, 0.0, 0.5, false);
    let ground = pipeline.prefab_db_mut().insert("ground", ground);
    pipeline.body_add(ground, Vec3::new(0.0, -0.05, 0.0), Quat::IDENTITY, 0);

    let ball_shape = pipeline
        .shape_db_mut()
        .insert("ball", CollisionShape::sphere(0.4));
    let ball = BodyPrefab::new(pipeline.shape_db(), ball_shape, 1.0, 0.0, 0.5, true);
    let ball = pipeline.prefab_db_mut().insert("ball", ball);

    let side = (count as f32).sqrt().ceil() as u32;
    for i in 0..count {
        let x = (i % side) as f32 - side as f32 * 0.5;
        let z = (i / side) as f32 - side as f32 * 0.5;
        let y = 1.0 + (i % 3) as f32 * 0.9;
        pipeline.body_add(ball, Vec3::new(x, y, z), Quat::IDENTITY, i);
    }
    pipeline
}

fn bench_tick(c: &mut Criterion) {
    c.bench_function("tick_100_spheres", |b| {
        let mut pipeline = build_pile(100);
        for _ in 0..30 {
            pipeline.tick();
        }
        b.iter(|| {
            pipeline.tick();
            black_box(pipeline.frames_completed());
        })
    });
}

fn bench_raycast(c: &mut Criterion) {
    c.bench_function("raycast_100_spheres", |b| {
        let mut pipeline = build_pile(100);
        for _ in 0..30 {
            pipeline.tick();
        }
        let ray = Ray::new(Vec3::new(0.0, 20.0, 0.0), -Vec3::Y);
        b.iter(|| black_box(pipeline.raycast(&ray)))
    });
}

criterion_group!(benches, bench_tick, bench_raycast);
criterion_main!(benches);
