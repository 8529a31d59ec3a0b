//! Per-tick ownership migration and ghost-zone publication across ranks.
//!
//! Both phases follow the same two-round shape: exchange counts, then
//! exchange payloads for non-zero counts. Counts for a phase are fully sent
//! and received before any payload in that phase is sent — posting the
//! count receive ahead of the payload send is what prevents a large rank
//! count from deadlocking on a full channel.

use sim_comm::{Comm, CommError, Tag};
use sim_partition::Partitioner;
use sim_particle::Particle;

/// Distance from a sub-domain edge within which a locally owned particle is
/// published as a ghost to the relevant neighbor(s).
pub const GHOST_PAD: f64 = 0.1;

const PARTICLE_BYTES: usize = 11 * 8;

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error("received a payload of {0} bytes, not a multiple of the particle record size")]
    MalformedPayload(usize),
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

fn decode(bytes: &[u8]) -> Result<Vec<Particle>, ExchangeError> {
    if bytes.len() % PARTICLE_BYTES != 0 {
        return Err(ExchangeError::MalformedPayload(bytes.len()));
    }
    let mut out = Vec::with_capacity(bytes.len() / PARTICLE_BYTES);
    for chunk in bytes.chunks_exact(PARTICLE_BYTES) {
        let mut fields = [0.0f64; 11];
        for (i, f) in fields.iter_mut().enumerate() {
            let start = i * 8;
            *f = f64::from_le_bytes(chunk[start..start + 8].try_into().unwrap());
        }
        out.push(Particle {
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
        });
    }
    Ok(out)
}

fn count_bytes(n: usize) -> [u8; 8] {
    (n as u64).to_le_bytes()
}

fn read_count(bytes: &[u8]) -> usize {
    u64::from_le_bytes(bytes.try_into().unwrap()) as usize
}

/// Moves particles that have crossed into another rank's sub-domain over
/// to that rank, and accepts any particles other ranks send this one.
/// `local` is partitioned in place: on return it contains every particle
/// still owned by `my_rank` plus every particle just received.
pub fn migrate(
    local: &mut Vec<Particle>,
    partitioner: &Partitioner,
    comm: &dyn Comm,
) -> Result<(), ExchangeError> {
    let my_rank = comm.rank();
    let size = comm.size();

    let mut kept = Vec::with_capacity(local.len());
    let mut outgoing: Vec<Vec<Particle>> = vec![Vec::new(); size];
    for p in local.drain(..) {
        let owner = partitioner.rank_of(p.x, p.y);
        if owner == my_rank {
            kept.push(p);
        } else {
            outgoing[owner].push(p);
        }
    }

    for to in 0..size {
        if to == my_rank {
            continue;
        }
        comm.send(to, Tag::MigrationCount, &count_bytes(outgoing[to].len()))?;
    }

    let mut incoming_counts = vec![0usize; size];
    for _ in 0..size.saturating_sub(1) {
        let (from, bytes) = comm.recv(Tag::MigrationCount)?;
        incoming_counts[from] = read_count(&bytes);
    }

    for to in 0..size {
        if to == my_rank || outgoing[to].is_empty() {
            continue;
        }
        comm.send(to, Tag::MigrationPayload, &encode(&outgoing[to]))?;
    }

    let mut immigrants = Vec::new();
    for (from, &expected) in incoming_counts.iter().enumerate() {
        if expected == 0 || from == my_rank {
            continue;
        }
        let (_, bytes) = comm.recv(Tag::MigrationPayload)?;
        immigrants.extend(decode(&bytes)?);
    }

    kept.extend(immigrants);
    *local = kept;
    Ok(())
}

/// Publishes ephemeral ghost copies of locally owned particles near a
/// sub-domain edge to the relevant neighboring ranks, and returns ghost
/// particles received from neighbors this tick. The returned particles are
/// not owned by this rank: they feed `sim-force` only and must be dropped
/// before the next motion phase.
pub fn publish_ghosts(
    owned: &[Particle],
    partitioner: &Partitioner,
    comm: &dyn Comm,
) -> Result<Vec<Particle>, ExchangeError> {
    let my_rank = comm.rank();
    let size = comm.size();

    let mut outgoing: Vec<Vec<Particle>> = vec![Vec::new(); size];
    for p in owned {
        let mut recipients = std::collections::HashSet::new();
        for dx in [-GHOST_PAD, 0.0, GHOST_PAD] {
            for dy in [-GHOST_PAD, 0.0, GHOST_PAD] {
                if dx == 0.0 && dy == 0.0 {
                    continue;
                }
                let recipient = partitioner.rank_of(p.x + dx, p.y + dy);
                if recipient != my_rank {
                    recipients.insert(recipient);
                }
            }
        }
        for recipient in recipients {
            outgoing[recipient].push(*p);
        }
    }

    for to in 0..size {
        if to == my_rank {
            continue;
        }
        comm.send(to, Tag::GhostCount, &count_bytes(outgoing[to].len()))?;
    }

    let mut incoming_counts = vec![0usize; size];
    for _ in 0..size.saturating_sub(1) {
        let (from, bytes) = comm.recv(Tag::GhostCount)?;
        incoming_counts[from] = read_count(&bytes);
    }

    for to in 0..size {
        if to == my_rank || outgoing[to].is_empty() {
            continue;
        }
        comm.send(to, Tag::GhostPayload, &encode(&outgoing[to]))?;
    }

    let mut ghosts = Vec::new();
    for (from, &expected) in incoming_counts.iter().enumerate() {
        if expected == 0 || from == my_rank {
            continue;
        }
        let (_, bytes) = comm.recv(Tag::GhostPayload)?;
        ghosts.extend(decode(&bytes)?);
    }

    Ok(ghosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle_at(x: f64, y: f64) -> Particle {
        Particle::new(x, y, 0.0, 0.0, 0.0, 0.0, 0.0)
    }

    #[test]
    fn round_trip_encode_decode_preserves_fields() {
        let particles = vec![particle_at(0.1, 0.2), particle_at(0.9, 0.8)];
        let bytes = encode(&particles);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].x, 0.1);
        assert_eq!(decoded[1].y, 0.8);
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let err = decode(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, ExchangeError::MalformedPayload(10)));
    }

    #[test]
    fn migrate_moves_particles_across_two_ranks() {
        let partitioner = Partitioner::new(4).unwrap();
        let comms = sim_comm::ChannelComm::mesh(4);

        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let partitioner = &partitioner;
                    scope.spawn(move || {
                        // Every rank starts with one particle sitting in
                        // quadrant 0 (0.1, 0.1); only rank 0 should keep it.
                        let mut local = if comm.rank() == 0 {
                            vec![particle_at(0.1, 0.1)]
                        } else {
                            Vec::new()
                        };
                        migrate(&mut local, partitioner, &comm).unwrap();
                        (comm.rank(), local.len())
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(results[0], (0, 1));
            assert_eq!(results[1], (1, 0));
            assert_eq!(results[2], (2, 0));
            assert_eq!(results[3], (3, 0));
        });
    }

    #[test]
    fn ghosts_are_not_owned_and_do_not_duplicate_destination() {
        let partitioner = Partitioner::new(4).unwrap();
        let comms = sim_comm::ChannelComm::mesh(4);

        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let partitioner = &partitioner;
                    scope.spawn(move || {
                        // Rank 0 (quadrant [0,0.5)x[0,0.5)) owns a particle
                        // right at the shared corner, within GHOST_PAD of
                        // all three neighboring quadrants.
                        let owned = if comm.rank() == 0 {
                            vec![particle_at(0.49, 0.49)]
                        } else {
                            Vec::new()
                        };
                        let ghosts = publish_ghosts(&owned, partitioner, &comm).unwrap();
                        (comm.rank(), ghosts.len())
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(results[0], (0, 0));
            assert_eq!(results[1], (1, 1));
            assert_eq!(results[2], (2, 1));
            assert_eq!(results[3], (3, 1));
        });
    }
}
