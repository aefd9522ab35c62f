//! Tunneling demo
//!
//! Fires small spheres at a thin wall at increasing speeds. Every shot
//! should stop on the near side of the wall; the log shows the time of
//! impact the sweep predicted and where the sphere ended up.

use log::{error, info};
use physics_core::foundation::logging;
use physics_core::prelude::*;

const FRAME_DT: f32 = 1.0 / 60.0;
const WALL_HALF_THICKNESS: f32 = 0.025;
const BALL_RADIUS: f32 = 0.1;

struct Shot {
    speed: f32,
    predicted_time: Option<f32>,
    final_x: f32,
}

fn fire(speed: f32) -> PhysicsResult<Shot> {
    let mut space = PhysicsSpace::new(PhysicsSpaceConfig::default().with_gravity(Vec3::zeros()));
    let wall = space.create_node(None, Transform::identity())?;
    space.add_collider(wall, ColliderDesc::new(Shape::cuboid(Vec3::new(WALL_HALF_THICKNESS, 5.0, 5.0))))?;

    let node = space.create_node(None, Transform::from_position(Vec3::new(-1.0, 0.0, 0.0)))?;
    let ball = space.add_collider(node, ColliderDesc::new(Shape::sphere(BALL_RADIUS)))?;
    let velocity = Vec3::new(speed, 0.0, 0.0);
    space.add_rigid_body(node, &RigidBodyDesc::dynamic().with_velocity(velocity))?;

    let predicted_time = space
        .sweep_collider(ball, velocity, FRAME_DT, &CastFilter::new())
        .first()
        .map(|hit| hit.time);

    for _ in 0..30 {
        space.update(FRAME_DT);
    }
    let final_x = space.world_transform(node).map_or(f32::NAN, |world| world.position.x);
    Ok(Shot { speed, predicted_time, final_x })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    info!("Starting tunneling demo");
    let mut tunneled = 0;
    for speed in [10.0, 50.0, 100.0, 200.0, 400.0] {
        let shot = fire(speed)?;
        let predicted = shot
            .predicted_time
            .map_or_else(|| "beyond this frame".to_owned(), |t| format!("{t:.5}s"));
        if shot.final_x < -WALL_HALF_THICKNESS {
            info!("{:>5} u/s: impact in {predicted}, stopped at x = {:.4}", shot.speed, shot.final_x);
        } else {
            tunneled += 1;
            error!("{:>5} u/s: impact in {predicted}, but ended at x = {:.4}", shot.speed, shot.final_x);
        }
    }

    if tunneled > 0 {
        return Err(format!("{tunneled} shots passed through the wall").into());
    }
    info!("No shot passed through the wall");
    Ok(())
}
