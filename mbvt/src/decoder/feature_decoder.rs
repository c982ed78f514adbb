//! Reads features from vector tile payloads into tile-local geometry.

use std::collections::HashMap;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};

use flate2::read::GzDecoder;
use geo::{BoundingRect, Intersects};
use geo_types::{Geometry, LineString, Rect};

use crate::position::{TileGeometry, TilePos};
use crate::tiles::TileTransform;
use crate::value::Value;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extent assumed when a layer does not declare one.
const DEFAULT_EXTENT: u32 = 4096;

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("could not inflate the payload: {0}")]
    Gzip(#[from] std::io::Error),

    #[error("invalid vector tile: {0}")]
    Format(String),
}

/// Feature with its geometry in tile-local coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct TileFeature {
    pub id: u64,
    pub geometry: TileGeometry,
    pub properties: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLayer {
    pub name: String,
    pub features: Vec<TileFeature>,
}

/// How to decode a payload. The default reads the features as they are.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    pub transform: TileTransform,
    /// Features entirely outside the tile grown by this margin are dropped. `None` keeps all.
    pub buffer: Option<f32>,
    /// Id given to every feature instead of its own.
    pub global_id_override: Option<u64>,
    /// Name given to every layer instead of its own.
    pub layer_name_override: Option<String>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            transform: TileTransform::identity(),
            buffer: None,
            global_id_override: None,
            layer_name_override: None,
        }
    }
}

/// Decoded payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureDecoder {
    layers: Vec<DecodedLayer>,
}

impl FeatureDecoder {
    pub fn decode(data: &[u8], options: &DecodeOptions) -> Result<Self, DecodeError> {
        let data = inflate(data)?;
        // Malformed geometry command streams can make the reader panic.
        guarded(|| Self::decode_layers(data, options))
    }

    fn decode_layers(data: Vec<u8>, options: &DecodeOptions) -> Result<Self, DecodeError> {
        let reader = mvt_reader::Reader::new(data)
            .map_err(|err| DecodeError::Format(format!("{err:?}")))?;
        let metadata = reader
            .get_layer_metadata()
            .map_err(|err| DecodeError::Format(format!("{err:?}")))?;

        let mut layers = Vec::with_capacity(metadata.len());
        for layer in metadata {
            let extent = (match layer.extent {
                0 => DEFAULT_EXTENT,
                extent => extent,
            }) as f32;
            let features = reader
                .get_features(layer.layer_index)
                .map_err(|err| DecodeError::Format(format!("{err:?}")))?;

            let mut decoded = Vec::with_capacity(features.len());
            for feature in features {
                let Some(geometry) = tile_geometry(&feature.geometry, extent) else {
                    log::warn!("Skipping feature with unsupported geometry in layer '{}'", layer.name);
                    continue;
                };
                let geometry = geometry.map_coords(|pos| options.transform.apply(pos));
                if let Some(buffer) = options.buffer {
                    if !within_buffer(&geometry, buffer) {
                        continue;
                    }
                }

                decoded.push(TileFeature {
                    id: options
                        .global_id_override
                        .unwrap_or(feature.id.unwrap_or_default()),
                    geometry,
                    properties: feature
                        .properties
                        .iter()
                        .flatten()
                        .map(|(key, value)| (key.clone(), Value::from(value)))
                        .collect(),
                });
            }

            layers.push(DecodedLayer {
                name: options
                    .layer_name_override
                    .clone()
                    .unwrap_or(layer.name),
                features: decoded,
            });
        }

        log::trace!("Decoded {} layers", layers.len());
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[DecodedLayer] {
        &self.layers
    }

    /// First feature with the given id and the name of its layer.
    pub fn get_feature(&self, id: u64) -> Option<(&str, &TileFeature)> {
        self.layers.iter().find_map(|layer| {
            layer
                .features
                .iter()
                .find(|feature| feature.id == id)
                .map(|feature| (layer.name.as_str(), feature))
        })
    }
}

/// Run `decode`, turning a panic into a format error.
fn guarded<T>(decode: impl FnOnce() -> Result<T, DecodeError>) -> Result<T, DecodeError> {
    panic::catch_unwind(AssertUnwindSafe(decode)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        Err(DecodeError::Format(format!("reader panicked: {message}")))
    })
}

/// Payload with the gzip compression removed, if it had any.
fn inflate(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if data.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        GzDecoder::new(data).read_to_end(&mut inflated)?;
        Ok(inflated)
    } else {
        Ok(data.to_vec())
    }
}

fn tile_geometry(geometry: &Geometry<f32>, extent: f32) -> Option<TileGeometry> {
    let pos = |c: &geo_types::Coord<f32>| TilePos {
        x: c.x / extent,
        y: c.y / extent,
    };
    let line = |l: &LineString<f32>| l.0.iter().map(pos).collect::<Vec<_>>();
    let rings = |p: &geo_types::Polygon<f32>| {
        std::iter::once(p.exterior())
            .chain(p.interiors())
            .map(line)
            .collect::<Vec<_>>()
    };

    Some(match geometry {
        Geometry::Point(p) => TileGeometry::Points(vec![pos(&p.0)]),
        Geometry::MultiPoint(points) => TileGeometry::Points(points.iter().map(|p| pos(&p.0)).collect()),
        Geometry::LineString(l) => TileGeometry::Lines(vec![line(l)]),
        Geometry::MultiLineString(lines) => TileGeometry::Lines(lines.iter().map(line).collect()),
        Geometry::Polygon(p) => TileGeometry::Polygons(vec![rings(p)]),
        Geometry::MultiPolygon(polygons) => {
            TileGeometry::Polygons(polygons.iter().map(rings).collect())
        }
        _ => return None,
    })
}

fn within_buffer(geometry: &TileGeometry, buffer: f32) -> bool {
    let buffer = buffer as f64;
    let area = Rect::new((-buffer, -buffer), (1.0 + buffer, 1.0 + buffer));
    geometry
        .to_geo()
        .bounding_rect()
        .is_some_and(|bounds| area.intersects(&bounds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::mvt_encoder::{
        LayerBuilder, TestGeometry, TestValue, TileBuilder, command, square,
    };
    use crate::tiles::TileId;
    use approx::assert_relative_eq;
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;

    fn payload() -> Vec<u8> {
        TileBuilder::new()
            .layer(
                LayerBuilder::new("poi")
                    .feature(
                        Some(1),
                        TestGeometry::Points(vec![(1024, 2048)]),
                        &[
                            ("name", TestValue::String("Odra".to_owned())),
                            ("rank", TestValue::Int(-3)),
                            ("big", TestValue::UInt(u64::MAX)),
                            ("open", TestValue::Bool(true)),
                        ],
                    )
                    .feature(Some(2), TestGeometry::Points(vec![(0, 0), (4096, 4096)]), &[]),
            )
            .layer(
                LayerBuilder::new("water")
                    .extent(512)
                    .feature(Some(3), TestGeometry::Polygon(vec![square(0, 0, 128)]), &[])
                    .feature(
                        Some(4),
                        TestGeometry::Lines(vec![vec![(0, 0), (512, 512)]]),
                        &[("height", TestValue::Double(2.5))],
                    ),
            )
            .build()
    }

    #[test]
    fn decodes_layers_and_features() {
        let decoder = FeatureDecoder::decode(&payload(), &DecodeOptions::default()).unwrap();

        let names: Vec<_> = decoder.layers().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["poi", "water"]);

        let (layer, feature) = decoder.get_feature(1).unwrap();
        assert_eq!(layer, "poi");
        assert_eq!(
            feature.geometry,
            TileGeometry::Points(vec![TilePos { x: 0.25, y: 0.5 }])
        );
        assert_eq!(feature.properties["name"], Value::String("Odra".to_owned()));
        assert_eq!(feature.properties["rank"], Value::Int(-3));
        assert_eq!(feature.properties["open"], Value::Bool(true));
        assert_eq!(feature.properties["big"], Value::Float(u64::MAX as f64));

        let (_, multi) = decoder.get_feature(2).unwrap();
        assert!(matches!(&multi.geometry, TileGeometry::Points(p) if p.len() == 2));
        assert!(decoder.get_feature(42).is_none());
    }

    #[test]
    fn coordinates_are_normalized_by_layer_extent() {
        let decoder = FeatureDecoder::decode(&payload(), &DecodeOptions::default()).unwrap();

        let (layer, polygon) = decoder.get_feature(3).unwrap();
        assert_eq!(layer, "water");
        let TileGeometry::Polygons(polygons) = &polygon.geometry else {
            panic!("expected polygons, got {:?}", polygon.geometry);
        };
        assert_eq!(polygons.len(), 1);
        let xs: Vec<f32> = polygons[0][0].iter().map(|p| p.x).collect();
        assert!(xs.iter().all(|x| *x == 0.0 || *x == 0.25));

        let (_, line) = decoder.get_feature(4).unwrap();
        assert_eq!(
            line.geometry,
            TileGeometry::Lines(vec![vec![TilePos { x: 0.0, y: 0.0 }, TilePos { x: 1.0, y: 1.0 }]])
        );
        assert_relative_eq!(line.properties["height"].as_f64().unwrap(), 2.5);
    }

    #[test]
    fn gzip_payloads() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload()).unwrap();
        let compressed = encoder.finish().unwrap();

        let decoder = FeatureDecoder::decode(&compressed, &DecodeOptions::default()).unwrap();
        assert_eq!(decoder.layers().len(), 2);

        assert!(matches!(
            FeatureDecoder::decode(&GZIP_MAGIC, &DecodeOptions::default()),
            Err(DecodeError::Gzip(_))
        ));
    }

    #[test]
    fn transform_and_buffer() {
        // Bottom-right child of the source tile.
        let transform =
            TileTransform::between(TileId::new(0, 0, 0), TileId::new(1, 1, 1)).unwrap();
        let options = DecodeOptions {
            transform,
            buffer: Some(0.0),
            ..Default::default()
        };
        let decoder = FeatureDecoder::decode(&payload(), &options).unwrap();

        // Point at (0.25, 0.5) lands at (-0.5, 0) and is dropped, so is the polygon near the
        // top left corner.
        assert!(decoder.get_feature(1).is_none());
        assert!(decoder.get_feature(3).is_none());

        let (_, line) = decoder.get_feature(4).unwrap();
        let TileGeometry::Lines(lines) = &line.geometry else {
            panic!("expected lines");
        };
        assert_relative_eq!(lines[0][0].x, -1.0);
        assert_relative_eq!(lines[0][1].y, 1.0);

        // A generous buffer keeps the point.
        let options = DecodeOptions {
            buffer: Some(0.6),
            ..options
        };
        assert!(
            FeatureDecoder::decode(&payload(), &options)
                .unwrap()
                .get_feature(1)
                .is_some()
        );
    }

    #[test]
    fn overrides() {
        let options = DecodeOptions {
            global_id_override: Some(77),
            layer_name_override: Some("all".to_owned()),
            ..Default::default()
        };
        let decoder = FeatureDecoder::decode(&payload(), &options).unwrap();

        assert!(decoder.layers().iter().all(|layer| layer.name == "all"));
        assert!(
            decoder
                .layers()
                .iter()
                .flat_map(|layer| &layer.features)
                .all(|feature| feature.id == 77)
        );
    }

    #[test]
    fn garbage() {
        assert!(matches!(
            FeatureDecoder::decode(&[0xff, 0xff, 0xff], &DecodeOptions::default()),
            Err(DecodeError::Format(_))
        ));
    }

    #[test]
    fn panics_become_format_errors() {
        let result: Result<(), _> = guarded(|| panic!("index out of bounds"));
        assert!(
            matches!(result, Err(DecodeError::Format(message)) if message.contains("index out of bounds"))
        );

        let result: Result<(), _> = guarded(|| std::panic::panic_any(17));
        assert!(matches!(result, Err(DecodeError::Format(_))));

        assert_eq!(guarded(|| Ok(5)).unwrap(), 5);
    }

    #[test]
    fn corrupted_geometry_does_not_escape() {
        let corrupted = [
            // MoveTo announcing five points with one present.
            TestGeometry::Raw(1, vec![command(1, 5), 2, 2]),
            // LineTo without a preceding MoveTo.
            TestGeometry::Raw(2, vec![command(2, 1), 4, 4]),
            // Ring that only closes.
            TestGeometry::Raw(3, vec![command(7, 1)]),
            // Ring cut off after its LineTo header.
            TestGeometry::Raw(3, vec![command(1, 1), 0, 0, command(2, 3), 8]),
            // Unknown command id.
            TestGeometry::Raw(2, vec![command(5, 1), 0, 0]),
            // Unknown geometry type.
            TestGeometry::Raw(9, vec![command(1, 1), 0, 0]),
        ];

        for geometry in corrupted {
            let payload = TileBuilder::new()
                .layer(LayerBuilder::new("ok").feature(Some(1), TestGeometry::Points(vec![(1, 1)]), &[]))
                .layer(LayerBuilder::new("broken").feature(Some(2), geometry.clone(), &[]))
                .build();

            match FeatureDecoder::decode(&payload, &DecodeOptions::default()) {
                Ok(decoder) => assert!(decoder.get_feature(1).is_some(), "{geometry:?}"),
                Err(err) => assert!(matches!(err, DecodeError::Format(_)), "{geometry:?}"),
            }
        }
    }
}
