//! Applies the compiled style to decoded features.

use std::collections::HashMap;
use std::sync::Arc;

use super::feature_decoder::{FeatureDecoder, TileFeature};
use crate::compiler::ResourceBindings;
use crate::parameters::RuntimeSettings;
use crate::position::TileGeometry;
use crate::resources::{Bitmap, Glyph};
use crate::style::expression::Context;
use crate::style::{Color, Filter, FilterMode, Map, Rule, Style, Symbolizer, SymbolizerKind};
use crate::tiles::TileId;
use crate::value::Value;

/// Tile ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct StyledTile {
    pub tile: TileId,
    pub background_color: Color,
    pub background_pattern: Option<Arc<Bitmap>>,
    /// In drawing order: style layers first, then the styles within each layer.
    pub layers: Vec<StyledLayer>,
}

impl StyledTile {
    pub fn feature_count(&self) -> usize {
        self.layers.iter().map(|layer| layer.features.len()).sum()
    }
}

/// Features drawn by one style of a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct StyledLayer {
    pub name: String,
    pub style: String,
    pub opacity: f32,
    pub features: Vec<StyledFeature>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyledFeature {
    pub id: u64,
    pub geometry: TileGeometry,
    pub symbolizer: ResolvedSymbolizer,
}

/// Symbolizer with its properties evaluated for one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSymbolizer {
    pub kind: SymbolizerKind,
    pub attributes: HashMap<String, Value>,
    /// Stroke map row of the dash pattern.
    pub stroke_pattern: Option<u32>,
    /// Marker or pattern image.
    pub glyph: Option<Arc<Glyph>>,
    /// Font asset used for text.
    pub font: Option<String>,
}

/// Reads a decoded tile with one style state.
pub struct TileReader<'a> {
    map: &'a Map,
    settings: &'a RuntimeSettings,
    resources: &'a ResourceBindings,
}

impl<'a> TileReader<'a> {
    pub fn new(map: &'a Map, settings: &'a RuntimeSettings, resources: &'a ResourceBindings) -> Self {
        Self {
            map,
            settings,
            resources,
        }
    }

    pub fn read_tile(&self, tile: TileId, decoder: &FeatureDecoder) -> StyledTile {
        let mut layers = Vec::new();

        for layer in &self.map.layers {
            let features: Vec<&TileFeature> = decoder
                .layers()
                .iter()
                .filter(|decoded| decoded.name == layer.name)
                .flat_map(|decoded| &decoded.features)
                .collect();
            if features.is_empty() {
                continue;
            }

            for style in &layer.styles {
                let styled: Vec<StyledFeature> = features
                    .iter()
                    .flat_map(|feature| self.apply_style(style, tile.zoom, feature))
                    .collect();
                if !styled.is_empty() {
                    layers.push(StyledLayer {
                        name: layer.name.clone(),
                        style: style.name.clone(),
                        opacity: style.opacity,
                        features: styled,
                    });
                }
            }
        }

        StyledTile {
            tile,
            background_color: self.map.settings.background_color,
            background_pattern: self.resources.background_pattern.clone(),
            layers,
        }
    }

    fn apply_style(&self, style: &Style, zoom: u8, feature: &TileFeature) -> Vec<StyledFeature> {
        let context = Context::new(&feature.properties, zoom, &self.settings.parameters);
        let active = |rule: &&Rule| rule.active_at(zoom);

        let mut matched: Vec<&Rule> = Vec::new();
        for rule in style.rules.iter().filter(active) {
            if rule.filter != Filter::Else && rule.filter.matches(&context) {
                matched.push(rule);
                if style.filter_mode == FilterMode::First {
                    break;
                }
            }
        }
        if matched.is_empty() {
            matched.extend(
                style
                    .rules
                    .iter()
                    .filter(active)
                    .filter(|rule| rule.filter == Filter::Else),
            );
        }

        matched
            .into_iter()
            .flat_map(|rule| &rule.symbolizers)
            .map(|symbolizer| StyledFeature {
                id: feature.id,
                geometry: feature.geometry.clone(),
                symbolizer: self.resolve(symbolizer, &context),
            })
            .collect()
    }

    fn resolve(&self, symbolizer: &Symbolizer, context: &Context<'_>) -> ResolvedSymbolizer {
        let attributes = symbolizer.evaluate(context);
        let text = |name: &str| match attributes.get(name) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        };

        let stroke_pattern = match symbolizer.kind {
            SymbolizerKind::Line => text("stroke-dasharray")
                .and_then(|dashes| self.resources.strokes.load_stroke_pattern(dashes)),
            _ => None,
        };

        let glyph = match symbolizer.kind {
            SymbolizerKind::Point
            | SymbolizerKind::Marker
            | SymbolizerKind::Shield
            | SymbolizerKind::LinePattern
            | SymbolizerKind::PolygonPattern => text("file").and_then(|file| {
                let bitmap = self.resources.bitmaps.load_bitmap(file)?;
                let path = self.resources.bitmaps.asset_path(file);
                self.resources.glyphs.load_bitmap_glyph(&path, bitmap)
            }),
            _ => None,
        };

        let font = match symbolizer.kind {
            SymbolizerKind::Text | SymbolizerKind::Shield => text("face-name")
                .and_then(|face| self.resources.fonts.find_font(face))
                .map(str::to_owned),
            _ => None,
        };

        ResolvedSymbolizer {
            kind: symbolizer.kind,
            stroke_pattern,
            glyph,
            font,
            attributes,
        }
    }
}
