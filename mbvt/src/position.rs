//! Types and functions for working with positions.

use geo_types::{
    Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};

/// Position in the map projection.
pub type MapPos = Coord<f64>;

/// Bounding rectangle of a tile in the map projection.
pub type MapBounds = geo_types::Rect<f64>;

/// Position inside a tile. `(0, 0)` is the top-left corner and `(1, 1)` the bottom-right one, so
/// `y` grows downward.
pub type TilePos = Coord<f32>;

/// Geometry as stored in a vector tile, in tile-local coordinates. Every variant holds a list of
/// parts, even when there is only one.
#[derive(Debug, Clone, PartialEq)]
pub enum TileGeometry {
    Points(Vec<TilePos>),
    Lines(Vec<Vec<TilePos>>),
    /// Polygons, each a list of rings where the first one is the exterior.
    Polygons(Vec<Vec<Vec<TilePos>>>),
}

impl TileGeometry {
    /// Apply `f` to every vertex.
    pub fn map_coords(&self, f: impl Fn(TilePos) -> TilePos) -> Self {
        match self {
            Self::Points(points) => Self::Points(points.iter().copied().map(&f).collect()),
            Self::Lines(lines) => Self::Lines(
                lines
                    .iter()
                    .map(|line| line.iter().copied().map(&f).collect())
                    .collect(),
            ),
            Self::Polygons(polygons) => Self::Polygons(
                polygons
                    .iter()
                    .map(|rings| {
                        rings
                            .iter()
                            .map(|ring| ring.iter().copied().map(&f).collect())
                            .collect()
                    })
                    .collect(),
            ),
        }
    }

    /// Tile-local geometry as a [`Geometry`], without any projection. Used for spatial tests.
    pub(crate) fn to_geo(&self) -> Geometry<f64> {
        build_geometry(self, |pos| MapPos {
            x: pos.x as f64,
            y: pos.y as f64,
        })
    }
}

/// Maps tile-local positions into the map projection given the tile's bounds.
#[derive(Debug, Clone, Copy)]
pub struct GeometryConverter {
    bounds: MapBounds,
}

impl GeometryConverter {
    pub fn new(bounds: MapBounds) -> Self {
        Self { bounds }
    }

    /// `x` maps linearly onto the bounds, `y` is inverted since the map projection grows upward.
    pub fn convert_pos(&self, pos: TilePos) -> MapPos {
        let min = self.bounds.min();
        let max = self.bounds.max();
        MapPos {
            x: min.x + pos.x as f64 * self.bounds.width(),
            y: max.y - pos.y as f64 * self.bounds.height(),
        }
    }

    /// Convert the geometry. Single-part geometries collapse to their singular type.
    pub fn convert(&self, geometry: &TileGeometry) -> Geometry<f64> {
        build_geometry(geometry, |pos| self.convert_pos(pos))
    }
}

fn build_geometry(geometry: &TileGeometry, convert: impl Fn(TilePos) -> MapPos) -> Geometry<f64> {
    let ring = |ring: &[TilePos]| -> LineString<f64> {
        LineString(ring.iter().map(|pos| convert(*pos)).collect())
    };

    match geometry {
        TileGeometry::Points(points) => {
            let mut points: Vec<Point<f64>> =
                points.iter().map(|pos| Point(convert(*pos))).collect();
            if points.len() == 1 {
                Geometry::Point(points.remove(0))
            } else {
                Geometry::MultiPoint(MultiPoint(points))
            }
        }
        TileGeometry::Lines(lines) => {
            let mut lines: Vec<LineString<f64>> = lines.iter().map(|line| ring(line)).collect();
            if lines.len() == 1 {
                Geometry::LineString(lines.remove(0))
            } else {
                Geometry::MultiLineString(MultiLineString(lines))
            }
        }
        TileGeometry::Polygons(polygons) => {
            let mut polygons: Vec<Polygon<f64>> = polygons
                .iter()
                .map(|rings| {
                    let mut rings = rings.iter().map(|r| ring(r));
                    let exterior = rings.next().unwrap_or_else(|| LineString(Vec::new()));
                    Polygon::new(exterior, rings.collect())
                })
                .collect();
            if polygons.len() == 1 {
                Geometry::Polygon(polygons.remove(0))
            } else {
                Geometry::MultiPolygon(MultiPolygon(polygons))
            }
        }
    }
}
