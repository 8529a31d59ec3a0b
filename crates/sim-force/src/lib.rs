//! Short-range pairwise repulsive force.

use sim_particle::{sign, Particle};

/// Short-range cutoff radius. Pairs farther apart than this exert no force.
pub const CUTOFF: f64 = 0.01;
/// Floor on the squared separation used in the force kernel, preventing a
/// singularity at near-exact overlap.
pub const MIN_R: f64 = CUTOFF / 100.0;
/// Per-particle mass used by the force-to-acceleration conversion.
pub const MASS: f64 = 0.01;
/// Cap on the magnitude of acceleration contributed by a single pair,
/// preventing explosive acceleration when particles clump.
const MAX_SPEEDUP: f64 = 1000.0;

/// Applies the force `neighbor` exerts on `particle`, accumulating into
/// `particle.ax`/`particle.ay`. Has no effect if the pair is farther apart
/// than [`CUTOFF`]. Not symmetric: call once per ordered pair.
pub fn apply_force(particle: &mut Particle, neighbor: &Particle) {
    // The 0.1 padding biases particles to slip past each other instead of
    // colliding exactly; preserved as observed in the source system.
    let dx = (neighbor.x - particle.x) + sign(neighbor.x - particle.x) * 0.1;
    let dy = (neighbor.y - particle.y) + sign(neighbor.y - particle.y) * 0.1;

    let mut r2 = dx * dx + dy * dy;
    if r2 > CUTOFF * CUTOFF {
        return;
    }
    r2 = r2.max(MIN_R * MIN_R);
    let r = r2.sqrt();

    let coef = (1.0 - CUTOFF / r) / r2 / MASS;

    particle.ax += sign(coef * dx) * (MAX_SPEEDUP).min((coef * dx).abs());
    particle.ay += sign(coef * dy) * (MAX_SPEEDUP).min((coef * dy).abs());
}
