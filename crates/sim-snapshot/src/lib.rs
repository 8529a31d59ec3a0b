//! Gather-to-root and framed text-stream emission.

use std::io::{self, Write};

use sim_comm::{Comm, CommError};
use sim_particle::Particle;

const RECORD_BYTES: usize = 5 * 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimalRecord {
    pub x: f64,
    pub y: f64,
    pub cr: f64,
    pub cg: f64,
    pub cb: f64,
}

impl From<&Particle> for MinimalRecord {
    fn from(p: &Particle) -> Self {
        Self {
            x: p.x,
            y: p.y,
            cr: p.cr,
            cg: p.cg,
            cb: p.cb,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error("gathered snapshot payload of {0} bytes is not a multiple of the record size")]
    MalformedPayload(usize),
    #[error("failed to write snapshot frame: {0}")]
    Io(#[from] io::Error),
}

fn encode(records: &[MinimalRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * RECORD_BYTES);
    for r in records {
        for field in [r.x, r.y, r.cr, r.cg, r.cb] {
            out.extend_from_slice(&field.to_le_bytes());
        }
    }
    out
}

fn decode(bytes: &[u8]) -> Result<Vec<MinimalRecord>, SnapshotError> {
    if bytes.len() % RECORD_BYTES != 0 {
        return Err(SnapshotError::MalformedPayload(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(RECORD_BYTES)
        .map(|chunk| {
            let mut fields = [0.0f64; 5];
            for (i, f) in fields.iter_mut().enumerate() {
                let start = i * 8;
                *f = f64::from_le_bytes(chunk[start..start + 8].try_into().unwrap());
            }
            MinimalRecord {
                x: fields[0],
                y: fields[1],
                cr: fields[2],
                cg: fields[3],
                cb: fields[4],
            }
        })
        .collect())
}

/// Gathers each rank's locally owned particles, reduced to [`MinimalRecord`],
/// to the root rank. Returns `Some` only on root; non-root ranks discard
/// their own records after sending them, per the shared-resources note.
pub fn gather_snapshot(
    owned: &[Particle],
    comm: &dyn Comm,
) -> Result<Option<Vec<MinimalRecord>>, SnapshotError> {
    let records: Vec<MinimalRecord> = owned.iter().map(MinimalRecord::from).collect();
    let payload = encode(&records);
    match comm.gather_to_root(&payload)? {
        None => Ok(None),
        Some(per_rank) => {
            let mut all = Vec::new();
            for bytes in per_rank {
                all.extend(decode(&bytes)?);
            }
            Ok(Some(all))
        }
    }
}

/// Framed text-stream writer: one-time header and color block, then one
/// position line per particle per frame, matching the source system's
/// `save()` format exactly.
pub struct SnapshotWriter<W: Write> {
    out: W,
    n: usize,
    cutoff: f64,
    world_size: f64,
    rasterization_denominator: usize,
    header_written: bool,
}

impl<W: Write> SnapshotWriter<W> {
    pub fn new(out: W, n: usize, cutoff: f64, world_size: f64, rasterization_denominator: usize) -> Self {
        Self {
            out,
            n,
            cutoff,
            world_size,
            rasterization_denominator,
            header_written: false,
        }
    }

    pub fn write_frame(&mut self, records: &[MinimalRecord]) -> Result<(), SnapshotError> {
        if !self.header_written {
            writeln!(self.out, "n {}", self.n)?;
            writeln!(self.out, "r {}", format_g(self.cutoff))?;
            writeln!(self.out, "s {}", format_g(self.world_size))?;
            writeln!(self.out, "a {}", self.rasterization_denominator)?;
            for (i, r) in records.iter().enumerate() {
                writeln!(
                    self.out,
                    "c {} {} {} {}",
                    i,
                    format_g(r.cr),
                    format_g(r.cg),
                    format_g(r.cb)
                )?;
            }
            self.header_written = true;
        }

        for r in records {
            writeln!(self.out, "p {} {}", format_g(r.x), format_g(r.y))?;
        }
        Ok(())
    }
}

/// Renders an `f64` the way `%g` would for the magnitudes this simulator
/// produces: Rust's default `Display` for `f64` already emits the shortest
/// decimal that round-trips, which coincides with `%g`'s output for the
/// bounded-magnitude ([0,1]-ish) values this stream carries.
fn format_g(v: f64) -> String {
    format!("{v}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_encode_decode() {
        let records = vec![MinimalRecord {
            x: 0.25,
            y: 0.75,
            cr: 1.0,
            cg: 0.5,
            cb: 0.0,
        }];
        let bytes = encode(&records);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn first_frame_includes_header_and_colors() {
        let mut buf = Vec::new();
        let mut writer = SnapshotWriter::new(&mut buf, 2, 0.01, 1.0, 10);
        let records = vec![
            MinimalRecord {
                x: 0.1,
                y: 0.2,
                cr: 1.0,
                cg: 0.0,
                cb: 0.0,
            },
            MinimalRecord {
                x: 0.3,
                y: 0.4,
                cr: 0.0,
                cg: 1.0,
                cb: 0.0,
            },
        ];
        writer.write_frame(&records).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let expected = "n 2\nr 0.01\ns 1\na 10\nc 0 1 0 0\nc 1 0 1 0\np 0.1 0.2\np 0.3 0.4\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn subsequent_frames_omit_header_and_colors() {
        let mut buf = Vec::new();
        let mut writer = SnapshotWriter::new(&mut buf, 1, 0.01, 1.0, 10);
        let records = vec![MinimalRecord {
            x: 0.5,
            y: 0.5,
            cr: 0.0,
            cg: 0.0,
            cb: 0.0,
        }];
        writer.write_frame(&records).unwrap();
        buf.clear();
        writer.write_frame(&records).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "p 0.5 0.5\n");
    }
}
