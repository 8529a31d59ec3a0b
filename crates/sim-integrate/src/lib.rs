//! Per-tick motion integration and wall reflection.

use sim_map::{Axis, Map};
use sim_particle::{sign, Particle};

/// Timestep used by every tick.
pub const DT: f64 = 5e-4;
/// Velocity magnitude clamp applied before each velocity update.
const MAX_SPEED: f64 = 2.0;

#[derive(Debug, thiserror::Error)]
pub enum InvariantViolation {
    #[error("particle at ({x}, {y}) is not walkable after integration")]
    NotWalkable { x: f64, y: f64 },
}

/// Advances one particle by one tick: velocity update toward its goal,
/// position update, then wall-reflection resolution against `map`.
pub fn step(p: &mut Particle, map: &Map) -> Result<(), InvariantViolation> {
    let (ox, oy) = (p.x, p.y);

    p.vx = sign(p.vx) * p.vx.abs().min(MAX_SPEED);
    p.vy = sign(p.vy) * p.vy.abs().min(MAX_SPEED);

    let mut dir_x = p.x_direction_to_goal();
    update_velocity(&mut p.vx, dir_x, p.ax);

    let dir_y = p.y_direction_to_goal();
    update_velocity(&mut p.vy, dir_y, p.ay);

    if !p.at_goal() {
        p.x += p.vx * DT;
        p.y += p.vy * DT;
    }

    if let Some(wall_x) = map.wall_between(Axis::X, ox, oy, p.x) {
        while straddles(p.x, wall_x, ox) {
            p.x = 2.0 * wall_x - p.x;
            dir_x = sim_particle::signed_direction_to_goal(p.x, p.gx);
            if dir_x < 0.0 {
                p.vx = -p.vx + p.ax * DT;
            } else if dir_x == 0.0 {
                p.vx = 0.0;
                p.vy += p.ay * p.ay;
            }
        }
    }

    // Checked against the already-updated p.x, not the pre-motion ox.
    if let Some(wall_y) = map.wall_between(Axis::Y, p.x, oy, p.y) {
        while straddles(p.y, wall_y, oy) {
            p.y = 2.0 * wall_y - p.y;
            let dir_y = p.y_direction_to_goal();
            if dir_y < 0.0 {
                p.vy = -p.vy + p.ay * DT;
            } else if dir_y == 0.0 {
                p.vy = 0.0;
                p.vx += p.ax * p.ax;
            }
        }
    }

    if !map.is_walkable(p.x, p.y) {
        return Err(InvariantViolation::NotWalkable { x: p.x, y: p.y });
    }
    Ok(())
}

fn update_velocity(v: &mut f64, dir: f64, a: f64) {
    if dir > 0.0 {
        *v += a * DT;
    } else if dir < 0.0 {
        *v += a * DT * -1.0;
    } else {
        *v = 0.0;
    }
}

/// True while `new` and `origin` sit on opposite sides of `wall`.
fn straddles(new: f64, wall: f64, origin: f64) -> bool {
    (new > wall && wall > origin) || (origin > wall && wall > new)
}
