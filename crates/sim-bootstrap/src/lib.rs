//! Map/agent parsing orchestration, random placement, and scatter to ranks.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use sim_comm::{Comm, CommError, Tag};
use sim_map::Map;
use sim_partition::Partitioner;
use sim_particle::{signed_direction_to_goal, Particle};

/// Rejection-sampling attempts allowed per particle before giving up.
pub const MAX_PLACEMENT_RETRIES: usize = 10_000;

const PARTICLE_BYTES: usize = 11 * 8;

#[derive(Debug, thiserror::Error)]
pub enum AgentFormatError {
    #[error("agent file declares {declared} agents but has {found} parseable lines")]
    CountMismatch { declared: usize, found: usize },
    #[error("agent line {line} is malformed: {text:?}")]
    MalformedLine { line: usize, text: String },
}

#[derive(Debug, thiserror::Error)]
pub enum UnreachableInit {
    #[error("could not find a walkable placement after {0} attempts")]
    RetriesExhausted(usize),
    #[error("pinned agent start ({x}, {y}) or goal ({gx}, {gy}) is not walkable")]
    PinnedAgentNotWalkable { x: f64, y: f64, gx: f64, gy: f64 },
}

/// A pinned agent: fixed start and goal position, parsed from the agent
/// file's `start_x,start_y,goal_x,goal_y` records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinnedAgent {
    pub x: f64,
    pub y: f64,
    pub gx: f64,
    pub gy: f64,
}

/// Parses the agent-pin text format: one `sx,sy,gx,gy` record per line,
/// whitespace-terminated. Fails if the line count doesn't match
/// `declared_count`.
pub fn parse_agent_file(text: &str, declared_count: usize) -> Result<Vec<PinnedAgent>, AgentFormatError> {
    let mut agents = Vec::new();
    for (line_no, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let fields: Vec<&str> = trimmed.split(',').collect();
        if fields.len() != 4 {
            return Err(AgentFormatError::MalformedLine {
                line: line_no,
                text: raw.to_string(),
            });
        }
        let mut parsed = [0.0f64; 4];
        for (slot, field) in parsed.iter_mut().zip(fields.iter()) {
            *slot = field
                .trim()
                .parse()
                .map_err(|_| AgentFormatError::MalformedLine {
                    line: line_no,
                    text: raw.to_string(),
                })?;
        }
        agents.push(PinnedAgent {
            x: parsed[0],
            y: parsed[1],
            gx: parsed[2],
            gy: parsed[3],
        });
    }

    if agents.len() != declared_count {
        return Err(AgentFormatError::CountMismatch {
            declared: declared_count,
            found: agents.len(),
        });
    }
    Ok(agents)
}

/// Rejection-samples a walkable `(x, y)` pair uniformly over `[0,1)^2`.
fn sample_walkable_point(map: &Map, rng: &mut SmallRng) -> Result<(f64, f64), UnreachableInit> {
    for _ in 0..MAX_PLACEMENT_RETRIES {
        let x = rng.gen_range(0.0..1.0);
        let y = rng.gen_range(0.0..1.0);
        if map.is_walkable(x, y) {
            return Ok((x, y));
        }
    }
    Err(UnreachableInit::RetriesExhausted(MAX_PLACEMENT_RETRIES))
}

fn finish_particle(x: f64, y: f64, gx: f64, gy: f64, rng: &mut SmallRng) -> Particle {
    let mut p = Particle::new(x, y, gx, gy, rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0));
    // u,v in [1,3), then biased toward the goal direction (zeroed within
    // tolerance), exactly as the source system's init_particles assigns
    // initial velocity.
    let u = rng.gen_range(0.0..1.0) * 2.0 + 1.0;
    let v = rng.gen_range(0.0..1.0) * 2.0 + 1.0;
    p.vx = u * signed_direction_to_goal(p.x, p.gx);
    p.vy = v * signed_direction_to_goal(p.y, p.gy);
    p
}

/// Builds the full initial particle population on root: pinned agents
/// first, then `random_count` additional rejection-sampled agents.
pub fn bootstrap_particles(
    map: &Map,
    pinned: &[PinnedAgent],
    random_count: usize,
    seed: u64,
) -> Result<Vec<Particle>, UnreachableInit> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut particles = Vec::with_capacity(pinned.len() + random_count);

    for agent in pinned {
        if !map.is_walkable(agent.x, agent.y) || !map.is_walkable(agent.gx, agent.gy) {
            return Err(UnreachableInit::PinnedAgentNotWalkable {
                x: agent.x,
                y: agent.y,
                gx: agent.gx,
                gy: agent.gy,
            });
        }
        particles.push(finish_particle(agent.x, agent.y, agent.gx, agent.gy, &mut rng));
    }

    for _ in 0..random_count {
        let (x, y) = sample_walkable_point(map, &mut rng)?;
        let (gx, gy) = sample_walkable_point(map, &mut rng)?;
        particles.push(finish_particle(x, y, gx, gy, &mut rng));
    }

    Ok(particles)
}

fn encode(particles: &[Particle]) -> Vec<u8> {
    let mut out = Vec::with_capacity(particles.len() * PARTICLE_BYTES);
    for p in particles {
        for field in [
            p.x, p.y, p.vx, p.vy, p.ax, p.ay, p.gx, p.gy, p.cr, p.cg, p.cb,
        ] {
            out.extend_from_slice(&field.to_le_bytes());
        }
    }
    out
}

fn decode(bytes: &[u8]) -> Vec<Particle> {
    bytes
        .chunks_exact(PARTICLE_BYTES)
        .map(|chunk| {
            let mut fields = [0.0f64; 11];
            for (i, f) in fields.iter_mut().enumerate() {
                let start = i * 8;
                *f = f64::from_le_bytes(chunk[start..start + 8].try_into().unwrap());
            }
            Particle {
                x: fields[0],
                y: fields[1],
                vx: fields[2],
                vy: fields[3],
                ax: fields[4],
                ay: fields[5],
                gx: fields[6],
                gy: fields[7],
                cr: fields[8],
                cg: fields[9],
                cb: fields[10],
            }
        })
        .collect()
}

/// Buckets the full population by initial owning rank and scatters each
/// bucket to its owner. Root keeps its own bucket directly; every other
/// rank receives theirs over `comm`. Must be called by every rank.
pub fn scatter(
    full_population: Option<Vec<Particle>>,
    partitioner: &Partitioner,
    comm: &dyn Comm,
) -> Result<Vec<Particle>, CommError> {
    let my_rank = comm.rank();
    let size = comm.size();

    if my_rank == 0 {
        let population = full_population.expect("root must supply the full population");
        let mut buckets: Vec<Vec<Particle>> = vec![Vec::new(); size];
        for p in population {
            buckets[partitioner.rank_of(p.x, p.y)].push(p);
        }

        for to in 1..size {
            comm.send(to, Tag::BootstrapCount, &(buckets[to].len() as u64).to_le_bytes())?;
        }
        for to in 1..size {
            if !buckets[to].is_empty() {
                comm.send(to, Tag::BootstrapPayload, &encode(&buckets[to]))?;
            }
        }

        Ok(std::mem::take(&mut buckets[0]))
    } else {
        let (_, count_bytes) = comm.recv(Tag::BootstrapCount)?;
        let expected = u64::from_le_bytes(count_bytes.try_into().unwrap()) as usize;
        if expected == 0 {
            return Ok(Vec::new());
        }
        let (_, payload) = comm.recv(Tag::BootstrapPayload)?;
        Ok(decode(&payload))
    }
}
