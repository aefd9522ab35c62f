//! Drop demo
//!
//! Spawns a pile of random spheres and boxes above a ground slab, steps the
//! engine for a few simulated seconds and logs where everything came to
//! rest. Pass a `.toml` or `.ron` space configuration as the first argument
//! to override the defaults.

use log::{debug, info, warn};
use physics_core::foundation::logging;
use physics_core::prelude::*;
use rand::prelude::*;
use thiserror::Error;

const BODY_COUNT: usize = 24;
const FRAME_DT: f32 = 1.0 / 60.0;
const FRAMES: usize = 600;

#[derive(Error, Debug)]
enum DemoError {
    #[error("Configuration error: {0}")]
    Config(#[from] physics_core::config::ConfigError),

    #[error("Physics error: {0}")]
    Physics(#[from] PhysicsError),

    #[error("Space {0:?} disappeared")]
    MissingSpace(SpaceHandle),
}

struct Dropped {
    node: NodeHandle,
    body: BodyHandle,
}

fn load_config() -> Result<PhysicsSpaceConfig, DemoError> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading space configuration from {path}");
            Ok(PhysicsSpaceConfig::load_from_file(&path)?)
        }
        None => Ok(PhysicsSpaceConfig::default().with_sub_steps(2)),
    }
}

fn build_scene(space: &mut PhysicsSpace, rng: &mut impl Rng) -> Result<Vec<Dropped>, DemoError> {
    let ground = space.create_node(None, Transform::from_position(Vec3::new(0.0, -0.5, 0.0)))?;
    space.add_collider(ground, ColliderDesc::new(Shape::cuboid(Vec3::new(20.0, 0.5, 20.0))))?;

    let rubber = PhysicsMaterial::new("Rubber").with_restitution(0.6).with_friction(0.9);
    let mut dropped = Vec::with_capacity(BODY_COUNT);
    for i in 0..BODY_COUNT {
        let position = Vec3::new(rng.gen_range(-4.0..4.0), 2.0 + i as f32 * 1.2, rng.gen_range(-4.0..4.0));
        let node = space.create_node(None, Transform::from_position(position))?;
        let shape = if rng.gen_bool(0.5) {
            Shape::sphere(rng.gen_range(0.25..0.6))
        } else {
            Shape::cuboid(Vec3::new(rng.gen_range(0.2..0.5), rng.gen_range(0.2..0.5), rng.gen_range(0.2..0.5)))
        };
        let mut desc = ColliderDesc::new(shape);
        if i % 3 == 0 {
            desc = desc.with_material(rubber.clone());
        }
        space.add_collider(node, desc)?;
        let body = space.add_rigid_body(node, &RigidBodyDesc::dynamic())?;
        dropped.push(Dropped { node, body });
    }
    Ok(dropped)
}

fn run() -> Result<(), DemoError> {
    let config = load_config()?;
    let mut engine = PhysicsEngine::new();
    let handle = engine.create_space(config);
    let recorder = EventRecorder::new();
    let mut rng = StdRng::seed_from_u64(7);

    let dropped = {
        let space = engine.space_mut(handle).ok_or(DemoError::MissingSpace(handle))?;
        space.register_global_handler(Box::new(recorder.clone()));
        build_scene(space, &mut rng)?
    };
    info!("Dropping {} bodies", dropped.len());

    for frame in 0..FRAMES {
        engine.update(FRAME_DT);
        if frame % 60 == 0 {
            let space = engine.space(handle).ok_or(DemoError::MissingSpace(handle))?;
            let stats = space.statistics();
            debug!(
                "frame {frame}: {} candidate pairs, {} manifolds, {} islands, {} contacts",
                stats.candidate_pairs,
                stats.manifolds,
                stats.islands,
                space.contacts().len()
            );
        }
    }

    let space = engine.space_mut(handle).ok_or(DemoError::MissingSpace(handle))?;
    let mut sleeping = 0;
    for item in &dropped {
        let Some(world) = space.world_transform(item.node) else {
            warn!("Node {:?} vanished", item.node);
            continue;
        };
        let asleep = space.body(item.body).is_some_and(RigidBody::is_asleep);
        sleeping += usize::from(asleep);
        info!("{:?} rests at {:.3?} (asleep: {asleep})", item.body, world.position);
    }

    info!(
        "{sleeping}/{} bodies asleep; {} collisions started, {} ended, {} bodies fell asleep",
        dropped.len(),
        recorder.count(PhysicsEventType::CollisionStarted),
        recorder.count(PhysicsEventType::CollisionEnded),
        recorder.count(PhysicsEventType::BodySlept)
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    info!("Starting drop demo");
    run()?;
    info!("Drop demo finished successfully");
    Ok(())
}
