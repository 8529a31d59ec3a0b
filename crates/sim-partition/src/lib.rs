//! Sub-domain table and rank-assignment queries.
//!
//! The unit square is tiled into a `side x side` grid of equal rectangles,
//! `side = sqrt(rank_count)`. Only rank counts whose square root is a power
//! of two are supported (1, 4, 16, 64, ...), matching the grid sizes the
//! source system's launch scripts actually exercise.

#[derive(Debug, thiserror::Error)]
pub enum UnsupportedRankCount {
    #[error(
        "rank count {0} is not a perfect square of a power of two (expected one of 1, 4, 16, 64, ...)"
    )]
    NotSquarePowerOfTwo(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Rect {
    /// A point on a shared edge belongs to the lower-index rectangle, so
    /// `min_x`/`min_y` are exclusive except at the domain origin, and
    /// `max_x`/`max_y` are inclusive. Matches [`clamp_index`].
    pub fn contains(&self, x: f64, y: f64) -> bool {
        (x > self.min_x || self.min_x == 0.0)
            && x <= self.max_x
            && (y > self.min_y || self.min_y == 0.0)
            && y <= self.max_y
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    N,
    S,
    E,
    W,
    Ne,
    Nw,
    Se,
    Sw,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::N,
        Direction::S,
        Direction::E,
        Direction::W,
        Direction::Ne,
        Direction::Nw,
        Direction::Se,
        Direction::Sw,
    ];

    fn offset(self) -> (i64, i64) {
        match self {
            Direction::N => (0, -1),
            Direction::S => (0, 1),
            Direction::E => (1, 0),
            Direction::W => (-1, 0),
            Direction::Ne => (1, -1),
            Direction::Nw => (-1, -1),
            Direction::Se => (1, 1),
            Direction::Sw => (-1, 1),
        }
    }
}

/// Immutable, replicated sub-domain table. Built once at bootstrap.
#[derive(Debug, Clone)]
pub struct Partitioner {
    side: usize,
    rects: Vec<Rect>,
}

impl Partitioner {
    pub fn new(rank_count: usize) -> Result<Self, UnsupportedRankCount> {
        let side = (rank_count as f64).sqrt().round() as usize;
        if side == 0 || side * side != rank_count || !side.is_power_of_two() {
            return Err(UnsupportedRankCount::NotSquarePowerOfTwo(rank_count));
        }

        let mut rects = Vec::with_capacity(rank_count);
        for row in 0..side {
            for col in 0..side {
                rects.push(Rect {
                    min_x: col as f64 / side as f64,
                    max_x: (col + 1) as f64 / side as f64,
                    min_y: row as f64 / side as f64,
                    max_y: (row + 1) as f64 / side as f64,
                });
            }
        }

        Ok(Self { side, rects })
    }

    pub fn rank_count(&self) -> usize {
        self.rects.len()
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn rect_of_rank(&self, rank: usize) -> Rect {
        self.rects[rank]
    }

    /// Rank whose rectangle contains `(x, y)`. Equivalent to a linear search
    /// over the sub-domain table with ties broken toward the lower index,
    /// but computed directly since the grid is regular; out-of-`[0,1)`
    /// points clamp to the nearest edge rectangle rather than panicking.
    pub fn rank_of(&self, x: f64, y: f64) -> usize {
        let col = clamp_index(x, self.side);
        let row = clamp_index(y, self.side);
        row * self.side + col
    }

    /// Up to 8 adjacent ranks, keyed by direction. Ranks on an edge or
    /// corner of the global grid simply have fewer entries.
    pub fn neighbors_of(&self, rank: usize) -> Vec<(Direction, usize)> {
        let row = (rank / self.side) as i64;
        let col = (rank % self.side) as i64;
        let side = self.side as i64;

        Direction::ALL
            .iter()
            .filter_map(|&dir| {
                let (dcol, drow) = dir.offset();
                let (nc, nr) = (col + dcol, row + drow);
                if nc < 0 || nr < 0 || nc >= side || nr >= side {
                    None
                } else {
                    Some((dir, (nr * side + nc) as usize))
                }
            })
            .collect()
    }
}

/// Column/row index for `coord` in `[0, side)`. The boundary shared by two
/// adjacent cells belongs to the lower-index cell: a coordinate sitting
/// exactly on `k / side` resolves to cell `k - 1`, not `k` (cell `0` at the
/// domain origin is the one exception, since there is no lower neighbor to
/// claim it). Out-of-range coordinates clamp to the nearest valid index.
fn clamp_index(coord: f64, side: usize) -> usize {
    let idx = (coord * side as f64).ceil() as usize;
    idx.saturating_sub(1).min(side - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_rank_covers_everything() {
        let p = Partitioner::new(1).unwrap();
        assert_eq!(p.rank_of(0.0, 0.0), 0);
        assert_eq!(p.rank_of(0.99, 0.99), 0);
        assert!(p.neighbors_of(0).is_empty());
    }

    #[test]
    fn rejects_non_power_of_two_square() {
        assert!(matches!(
            Partitioner::new(9),
            Err(UnsupportedRankCount::NotSquarePowerOfTwo(9))
        ));
        assert!(matches!(
            Partitioner::new(3),
            Err(UnsupportedRankCount::NotSquarePowerOfTwo(3))
        ));
    }

    #[test]
    fn four_ranks_tile_quadrants() {
        let p = Partitioner::new(4).unwrap();
        assert_eq!(p.rank_of(0.1, 0.1), 0);
        assert_eq!(p.rank_of(0.9, 0.1), 1);
        assert_eq!(p.rank_of(0.1, 0.9), 2);
        assert_eq!(p.rank_of(0.9, 0.9), 3);
    }

    #[test]
    fn boundary_point_belongs_to_lower_index_rank() {
        let p = Partitioner::new(4).unwrap();
        assert_eq!(p.rank_of(0.5, 0.1), 0);
    }

    #[test]
    fn out_of_range_clamps_to_nearest_rect() {
        let p = Partitioner::new(4).unwrap();
        assert_eq!(p.rank_of(-0.5, -0.5), 0);
        assert_eq!(p.rank_of(1.5, 1.5), 3);
    }

    #[test]
    fn sixteen_ranks_interior_has_eight_neighbors() {
        let p = Partitioner::new(16).unwrap();
        // rank 5 = row 1, col 1 (side 4) is fully interior.
        assert_eq!(p.neighbors_of(5).len(), 8);
    }

    #[test]
    fn corner_rank_has_three_neighbors() {
        let p = Partitioner::new(4).unwrap();
        // rank 0 = row 0, col 0: E, S, SE only.
        let neighbors = p.neighbors_of(0);
        assert_eq!(neighbors.len(), 3);
        assert!(neighbors.contains(&(Direction::E, 1)));
        assert!(neighbors.contains(&(Direction::S, 2)));
        assert!(neighbors.contains(&(Direction::Se, 3)));
    }
}
