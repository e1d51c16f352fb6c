use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

pub const BLOCK_SIZE: i64 = 16;
pub const NODES_PER_BLOCK: usize = 4096;
/// Side length of the logical block grid addressed by a block id.
pub const BLOCK_GRID: i64 = 4096;

/// Signed key of one block in the backing store.
pub type BlockKey = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Pos {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl Pos {
    pub const ORIGIN: Pos = Pos { x: 0, y: 0, z: 0 };

    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    pub fn min(self, other: Pos) -> Pos {
        Pos::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    pub fn max(self, other: Pos) -> Pos {
        Pos::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    pub fn scale(self, factor: i64) -> Pos {
        Pos::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

impl Add for Pos {
    type Output = Pos;

    fn add(self, rhs: Pos) -> Pos {
        Pos::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Pos {
    type Output = Pos;

    fn sub(self, rhs: Pos) -> Pos {
        Pos::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalNodeCoord {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl LocalNodeCoord {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    pub fn index(self) -> usize {
        self.x + self.y * BLOCK_SIZE as usize + self.z * (BLOCK_SIZE * BLOCK_SIZE) as usize
    }
}

/// Block coordinate containing `pos`, flooring toward negative infinity.
pub fn block_coord_of(pos: Pos) -> Pos {
    Pos::new(
        pos.x.div_euclid(BLOCK_SIZE),
        pos.y.div_euclid(BLOCK_SIZE),
        pos.z.div_euclid(BLOCK_SIZE),
    )
}

/// Linearizes a block coordinate into its store key, wrapping at the i64 range.
pub fn block_id(block_coord: Pos) -> BlockKey {
    block_coord
        .z
        .wrapping_mul(BLOCK_GRID * BLOCK_GRID)
        .wrapping_add(block_coord.y.wrapping_mul(BLOCK_GRID))
        .wrapping_add(block_coord.x)
}

pub fn block_id_of(pos: Pos) -> BlockKey {
    block_id(block_coord_of(pos))
}

/// Inverse of [`block_id`] for coordinates in -2048..=2047. Any key,
/// wrapped ones included, maps to some coordinate in that range.
pub fn block_coord_from_id(id: BlockKey) -> Pos {
    let mut rest = id;
    // The subtraction may wrap; the difference stays a multiple of the grid.
    let x = unsigned_to_signed(rest.rem_euclid(BLOCK_GRID), BLOCK_GRID / 2);
    rest = rest.wrapping_sub(x).div_euclid(BLOCK_GRID);
    let y = unsigned_to_signed(rest.rem_euclid(BLOCK_GRID), BLOCK_GRID / 2);
    rest = rest.wrapping_sub(y).div_euclid(BLOCK_GRID);
    let z = unsigned_to_signed(rest.rem_euclid(BLOCK_GRID), BLOCK_GRID / 2);
    Pos::new(x, y, z)
}

/// Absolute node position of local (0, 0, 0) inside the block.
pub fn block_origin(block_coord: Pos) -> Pos {
    block_coord.scale(BLOCK_SIZE)
}

pub fn local_coord_of(pos: Pos) -> LocalNodeCoord {
    LocalNodeCoord::new(
        pos.x.rem_euclid(BLOCK_SIZE) as usize,
        pos.y.rem_euclid(BLOCK_SIZE) as usize,
        pos.z.rem_euclid(BLOCK_SIZE) as usize,
    )
}

pub fn local_index(pos: Pos) -> usize {
    local_coord_of(pos).index()
}

/// Inverse of a linear index over a cube of side `size`.
pub fn from_local_index(index: usize, size: usize) -> Pos {
    let x = index % size;
    let rest = index / size;
    let y = rest % size;
    let z = rest / size;
    Pos::new(x as i64, y as i64, z as i64)
}

fn unsigned_to_signed(value: i64, max_positive: i64) -> i64 {
    if value < max_positive {
        value
    } else {
        value - 2 * max_positive
    }
}
