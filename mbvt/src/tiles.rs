//! Tile addressing in the Web Mercator grid, and the transform that carries geometry decoded from
//! one tile into the frame of another.

use std::f64::consts::PI;

use crate::position::{MapBounds, MapPos, TilePos};

/// Zoom levels above this one are not supported by the tile addressing.
pub const MAX_SUPPORTED_ZOOM_LEVEL: u8 = 24;

/// Half of the Web Mercator world width, in meters.
const MERCATOR_HALF_SIZE: f64 = 6378137.0 * PI;

/// Address of a vector tile. A payload is decoded for its source tile and read into a target
/// tile, which differs from the source when the payload is overzoomed or reused for an ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TileId {
    /// Column, growing eastwards from the antimeridian.
    pub x: u32,
    /// Row, growing southwards from the northern edge of the grid.
    pub y: u32,
    /// Grid level. Level `z` is `2^z` tiles wide, up to [`MAX_SUPPORTED_ZOOM_LEVEL`].
    pub zoom: u8,
}

pub fn total_tiles(zoom: u8) -> u32 {
    2u32.pow(zoom as u32)
}

impl TileId {
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    pub fn valid(&self) -> bool {
        self.zoom <= MAX_SUPPORTED_ZOOM_LEVEL
            && self.x < total_tiles(self.zoom)
            && self.y < total_tiles(self.zoom)
    }

    /// Identifier unique to this tile address. Used to give every feature of a tile the same id.
    pub fn global_id(&self) -> u64 {
        ((self.zoom as u64) << 58) | ((self.y as u64) << 29) | self.x as u64
    }

    /// Bounds of the tile in Web Mercator meters (EPSG:3857).
    pub fn mercator_bounds(&self) -> MapBounds {
        let size = 2.0 * MERCATOR_HALF_SIZE / total_tiles(self.zoom) as f64;
        let min_x = -MERCATOR_HALF_SIZE + self.x as f64 * size;
        let max_y = MERCATOR_HALF_SIZE - self.y as f64 * size;
        MapBounds::new(
            MapPos {
                x: min_x,
                y: max_y - size,
            },
            MapPos {
                x: min_x + size,
                y: max_y,
            },
        )
    }
}

/// Maps positions local to a source tile onto positions local to a target tile. The target may
/// be the source itself, one of its descendants (overzooming) or one of its ancestors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileTransform {
    scale: f64,
    offset_x: f64,
    offset_y: f64,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("invalid tile address: {0:?}")]
pub struct InvalidTile(pub TileId);

impl TileTransform {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    /// Calculate the transform from `source` addressing to `target` addressing.
    pub fn between(source: TileId, target: TileId) -> Result<Self, InvalidTile> {
        for tile in [source, target] {
            if !tile.valid() {
                return Err(InvalidTile(tile));
            }
        }

        let scale = 2f64.powi(target.zoom as i32 - source.zoom as i32);
        Ok(Self {
            scale,
            offset_x: source.x as f64 * scale - target.x as f64,
            offset_y: source.y as f64 * scale - target.y as f64,
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn apply(&self, pos: TilePos) -> TilePos {
        TilePos {
            x: (pos.x as f64 * self.scale + self.offset_x) as f32,
            y: (pos.y as f64 * self.scale + self.offset_y) as f32,
        }
    }
}
