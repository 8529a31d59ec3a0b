//! The rasterized occupancy/goal grid particles move through.
//!
//! A [`Map`] is built once on the root rank, parsed from the plain-text
//! format described in the external interface contract, and is immutable for
//! the lifetime of a run. Every rank holds its own copy after "broadcast"
//! (see `sim-comm`); nothing here mutates after [`Map::load`] / [`Map::parse`]
//! returns.

use std::fmt;
use std::path::Path;

/// Cell value: wall. Particles may never rest here.
pub const WALL: u8 = 0;
/// Cell value: plain floor.
pub const FLOOR: u8 = 1;
/// Cell value: goal marker. Walkable like floor; flags the map's default goal.
pub const GOAL: u8 = 3;

#[derive(Debug, thiserror::Error)]
pub enum MapFormatError {
    #[error("expected header line `h <height>`, found {0:?}")]
    MissingHeight(String),
    #[error("expected header line `w <width>`, found {0:?}")]
    MissingWidth(String),
    #[error("map declares {declared} rows but file has {found}")]
    RowCountMismatch { declared: usize, found: usize },
    #[error("row {row} has width {found}, expected {expected}")]
    RowWidthMismatch {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("row {row} contains invalid cell character {ch:?} (expected '0', '1', or '3')")]
    InvalidCell { row: usize, ch: char },
    #[error("failed to read map file: {0}")]
    Io(#[from] std::io::Error),
}

/// Axis along which a single-coordinate move is checked for a wall crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// Immutable rasterized occupancy grid.
///
/// Coordinates live in the unit square `[0,1)`; `cell_of` rasterizes them
/// against `max(width, height)` so that rectangular maps still map onto a
/// square coordinate space (the short axis simply leaves an unused margin).
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    width: usize,
    height: usize,
    occupancy: Vec<u8>,
    /// First cell with value `GOAL`, row-major order, if any.
    default_goal: Option<(usize, usize)>,
}

impl Map {
    /// Build a map from an already-parsed grid. Panics only on caller bugs
    /// (mismatched buffer length), never on map content.
    pub fn new(width: usize, height: usize, occupancy: Vec<u8>) -> Self {
        assert_eq!(
            occupancy.len(),
            width * height,
            "occupancy buffer length must equal width*height"
        );
        let default_goal = occupancy
            .iter()
            .position(|&c| c == GOAL)
            .map(|idx| (idx % width, idx / width));
        Self {
            width,
            height,
            occupancy,
            default_goal,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MapFormatError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse the `h <height>\nw <width>\n<rows...>` text format.
    pub fn parse(text: &str) -> Result<Self, MapFormatError> {
        let mut lines = text.lines();

        let height = parse_header(lines.next(), "h", MapFormatError::MissingHeight)?;
        let width = parse_header(lines.next(), "w", MapFormatError::MissingWidth)?;

        let mut occupancy = Vec::with_capacity(width * height);
        let mut found_rows = 0usize;
        for (row, line) in lines.enumerate() {
            if line.is_empty() {
                continue;
            }
            if line.chars().count() != width {
                return Err(MapFormatError::RowWidthMismatch {
                    row,
                    found: line.chars().count(),
                    expected: width,
                });
            }
            for ch in line.chars() {
                let value = match ch {
                    '0' => WALL,
                    '1' => FLOOR,
                    '3' => GOAL,
                    other => return Err(MapFormatError::InvalidCell { row, ch: other }),
                };
                occupancy.push(value);
            }
            found_rows += 1;
        }

        if found_rows != height {
            return Err(MapFormatError::RowCountMismatch {
                declared: height,
                found: found_rows,
            });
        }

        Ok(Self::new(width, height, occupancy))
    }

    /// Re-serialize to the exact text format `parse` consumes. Used by the
    /// round-trip test and by a debugging dump path.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.occupancy.len() + self.height * 2 + 16);
        out.push_str(&format!("h {}\n", self.height));
        out.push_str(&format!("w {}\n", self.width));
        for row in 0..self.height {
            for col in 0..self.width {
                let ch = match self.occupancy[row * self.width + col] {
                    WALL => '0',
                    GOAL => '3',
                    _ => '1',
                };
                out.push(ch);
            }
            out.push('\n');
        }
        out
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Denominator used to rasterize [0,1) coordinates: `max(width, height)`.
    pub fn rasterization_denominator(&self) -> usize {
        self.width.max(self.height)
    }

    pub fn default_goal(&self) -> Option<(usize, usize)> {
        self.default_goal
    }

    /// Pure integer derivation of the `(col, row, cell index)` a coordinate
    /// falls into. Does not check bounds; callers that care use
    /// [`Map::is_walkable`].
    pub fn cell_of(&self, x: f64, y: f64) -> (i64, i64, i64) {
        let hd = self.rasterization_denominator() as f64;
        let col = (x * hd).floor() as i64;
        let row = (y * hd).floor() as i64;
        let cell = row * self.width as i64 + col;
        (col, row, cell)
    }

    pub fn is_walkable(&self, x: f64, y: f64) -> bool {
        let (col, row, cell) = self.cell_of(x, y);
        if col < 0 || row < 0 || col as usize >= self.width || row as usize >= self.height {
            return false;
        }
        match self.occupancy.get(cell as usize) {
            Some(&value) => value != WALL,
            None => false,
        }
    }

    /// If moving `old_{x,y}` along `axis` to `new_coord` crosses into a
    /// non-walkable cell, returns the coordinate of the shared edge between
    /// the old and new cell. `None` if the destination cell is walkable (no
    /// wall was crossed).
    ///
    /// The boundary is always `max(old_idx, new_idx) / max(W,H)`: cell `k`
    /// occupies `[k/hd, (k+1)/hd)`, so the edge shared by cells `k-1` and `k`
    /// sits at `k/hd` regardless of which direction the particle is moving.
    pub fn wall_between(&self, axis: Axis, old_x: f64, old_y: f64, new_coord: f64) -> Option<f64> {
        let hd = self.rasterization_denominator() as f64;
        let (old_cell_idx, new_cell_idx, new_cell) = match axis {
            Axis::X => {
                let (old_col, _, old_cell) = self.cell_of(old_x, old_y);
                let (new_col, _, new_cell) = self.cell_of(new_coord, old_y);
                (old_col, new_col, new_cell)
            }
            Axis::Y => {
                let (_, old_row, old_cell) = self.cell_of(old_x, old_y);
                let (_, new_row, new_cell) = self.cell_of(old_x, new_coord);
                (old_row, new_row, new_cell)
            }
        };

        if self.is_walkable_cell(new_cell) {
            return None;
        }

        Some(old_cell_idx.max(new_cell_idx) as f64 / hd)
    }

    fn is_walkable_cell(&self, cell: i64) -> bool {
        if cell < 0 {
            return false;
        }
        match self.occupancy.get(cell as usize) {
            Some(&value) => value != WALL,
            None => false,
        }
    }
}

impl fmt::Display for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

fn parse_header(
    line: Option<&str>,
    prefix: &str,
    err: impl FnOnce(String) -> MapFormatError,
) -> Result<usize, MapFormatError> {
    let line = line.ok_or_else(|| err(String::new()))?;
    let mut parts = line.split_whitespace();
    let tag = parts.next().unwrap_or_default();
    let value = parts.next();
    if tag != prefix {
        return Err(err(line.to_string()));
    }
    value
        .and_then(|v| v.parse::<usize>().ok())
        .ok_or_else(|| err(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_4x4() -> Map {
        Map::parse("h 4\nw 4\n1111\n1111\n1111\n1111\n").unwrap()
    }

    #[test]
    fn parses_simple_grid() {
        let map = empty_4x4();
        assert_eq!(map.width(), 4);
        assert_eq!(map.height(), 4);
        assert!(map.is_walkable(0.1, 0.1));
    }

    #[test]
    fn rejects_row_width_mismatch() {
        let err = Map::parse("h 2\nw 3\n111\n11\n").unwrap_err();
        assert!(matches!(err, MapFormatError::RowWidthMismatch { .. }));
    }

    #[test]
    fn rejects_row_count_mismatch() {
        let err = Map::parse("h 3\nw 2\n11\n11\n").unwrap_err();
        assert!(matches!(err, MapFormatError::RowCountMismatch { .. }));
    }

    #[test]
    fn rejects_invalid_cell() {
        let err = Map::parse("h 1\nw 2\n1x\n").unwrap_err();
        assert!(matches!(err, MapFormatError::InvalidCell { .. }));
    }

    #[test]
    fn walls_are_not_walkable() {
        let map = Map::parse("h 2\nw 2\n10\n11\n").unwrap();
        assert!(map.is_walkable(0.1, 0.1)); // col 0, row 0 -> '1'
        assert!(!map.is_walkable(0.6, 0.1)); // col 1, row 0 -> '0'
    }

    #[test]
    fn out_of_bounds_is_not_walkable() {
        let map = empty_4x4();
        assert!(!map.is_walkable(-0.1, 0.1));
        assert!(!map.is_walkable(1.1, 0.1));
    }

    #[test]
    fn round_trip_preserves_bytes() {
        let text = "h 3\nw 3\n111\n103\n111\n";
        let map = Map::parse(text).unwrap();
        assert_eq!(map.to_text(), text);
    }

    #[test]
    fn default_goal_is_first_marker_row_major() {
        let map = Map::parse("h 2\nw 2\n10\n31\n").unwrap();
        assert_eq!(map.default_goal(), Some((0, 1)));
    }

    #[test]
    fn wall_between_reports_shared_edge_moving_right() {
        // 10x10 map, wall at column 5 (index 5) for every row.
        let mut rows = Vec::new();
        for _ in 0..10 {
            let mut row = String::new();
            for col in 0..10 {
                row.push(if col == 5 { '0' } else { '1' });
            }
            rows.push(row);
        }
        let text = format!("h 10\nw 10\n{}\n", rows.join("\n"));
        let map = Map::parse(&text).unwrap();

        // Moving from x=0.45 to x=0.50 along X at y=0.5 crosses into column 5 (wall).
        let wall = map.wall_between(Axis::X, 0.45, 0.5, 0.50);
        assert_eq!(wall, Some(0.5));
    }

    #[test]
    fn wall_between_none_when_destination_walkable() {
        let map = empty_4x4();
        assert_eq!(map.wall_between(Axis::X, 0.1, 0.1, 0.2), None);
    }

    #[test]
    fn load_from_disk_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.cfg");
        let text = "h 2\nw 2\n11\n11\n";
        std::fs::write(&path, text).unwrap();
        let map = Map::load(&path).unwrap();
        assert_eq!(map.to_text(), text);
    }
}
