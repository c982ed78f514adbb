//! Compiled styling model. Both style front-ends produce a [`Map`], and nothing downstream knows
//! which one did.

pub mod carto;
pub mod expression;
pub mod filter;
pub mod project;
pub mod xml;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use color::{AlphaColor, Srgb};
use serde_json::Value as Json;

use crate::tiles::MAX_SUPPORTED_ZOOM_LEVEL;
use crate::value::{ParameterKind, Value};
use expression::{Context, evaluate};

/// Compiled style. Immutable once built; a style change produces a new one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Map {
    pub settings: MapSettings,
    /// Runtime-overridable parameters, referenced from the style as `[nuti::name]`.
    pub parameters: BTreeMap<String, StyleParameter>,
    /// Layers in drawing order.
    pub layers: Vec<Layer>,
}

impl Map {
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapSettings {
    pub background_color: Color,
    /// Bitmap used as the background pattern. Empty if there is none.
    pub background_image: String,
    /// Directory holding the fonts, relative to the style asset.
    pub font_directory: String,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            background_color: Color::TRANSPARENT,
            background_image: String::new(),
            font_directory: "fonts".to_owned(),
            min_zoom: 0,
            max_zoom: MAX_SUPPORTED_ZOOM_LEVEL,
        }
    }
}

/// A value exposed by the style for runtime overriding.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleParameter {
    pub default: Value,
    /// Label to value mapping. When not empty, only these values are allowed.
    pub enum_map: BTreeMap<String, Value>,
}

impl StyleParameter {
    pub fn new(default: Value) -> Self {
        Self {
            default,
            enum_map: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> ParameterKind {
        self.default.kind()
    }

    /// Label of an enum value, if this parameter is an enum and the value is one of its members.
    pub fn label_of(&self, value: &Value) -> Option<&str> {
        self.enum_map
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(label, _)| label.as_str())
    }
}

/// Layer of the tile, matched against wire layers by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub styles: Vec<Style>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub name: String,
    pub filter_mode: FilterMode,
    pub opacity: f32,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// Every matching rule is applied.
    #[default]
    All,
    /// Only the first matching rule is applied.
    First,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub filter: Filter,
    /// Zoom range in which the rule is active, both ends inclusive.
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub symbolizers: Vec<Symbolizer>,
}

impl Rule {
    pub fn new(filter: Filter, symbolizers: Vec<Symbolizer>) -> Self {
        Self {
            filter,
            min_zoom: 0,
            max_zoom: MAX_SUPPORTED_ZOOM_LEVEL,
            symbolizers,
        }
    }

    pub fn active_at(&self, zoom: u8) -> bool {
        self.min_zoom <= zoom && zoom <= self.max_zoom
    }
}

/// Rule predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Always,
    /// Matches when the expression evaluates to `true`.
    Expression(Json),
    /// Matches when no other rule of the style matched.
    Else,
}

impl Filter {
    pub fn matches(&self, context: &Context<'_>) -> bool {
        match self {
            Filter::Always | Filter::Else => true,
            Filter::Expression(expression) => match evaluate(expression, context) {
                Ok(Json::Bool(result)) => result,
                Ok(_) => false,
                Err(err) => {
                    log::debug!("Filter {expression} failed: {err}");
                    false
                }
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolizerKind {
    Line,
    LinePattern,
    Polygon,
    PolygonPattern,
    Point,
    Marker,
    Text,
    Shield,
}

impl SymbolizerKind {
    /// Kind of the symbolizer element in a symbolizer document, e.g. `LineSymbolizer`.
    pub fn from_element(name: &str) -> Option<Self> {
        Some(match name {
            "LineSymbolizer" => Self::Line,
            "LinePatternSymbolizer" => Self::LinePattern,
            "PolygonSymbolizer" => Self::Polygon,
            "PolygonPatternSymbolizer" => Self::PolygonPattern,
            "PointSymbolizer" => Self::Point,
            "MarkersSymbolizer" => Self::Marker,
            "TextSymbolizer" => Self::Text,
            "ShieldSymbolizer" => Self::Shield,
            _ => return None,
        })
    }

    /// Kind for a style-language property prefix, e.g. `line` in `line-width`.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Some(match prefix {
            "line" => Self::Line,
            "line-pattern" => Self::LinePattern,
            "polygon" => Self::Polygon,
            "polygon-pattern" => Self::PolygonPattern,
            "point" => Self::Point,
            "marker" => Self::Marker,
            "text" => Self::Text,
            "shield" => Self::Shield,
            _ => return None,
        })
    }
}

/// How to draw a feature matched by a rule. Properties are expressions; literals are valid
/// expressions evaluating to themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbolizer {
    pub kind: SymbolizerKind,
    pub properties: BTreeMap<String, Json>,
}

impl Symbolizer {
    pub fn new(kind: SymbolizerKind) -> Self {
        Self {
            kind,
            properties: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: Json) -> Self {
        self.properties.insert(name.to_owned(), value);
        self
    }

    /// Evaluate all properties. Properties which fail to evaluate are left out.
    pub fn evaluate(&self, context: &Context<'_>) -> HashMap<String, Value> {
        self.properties
            .iter()
            .filter_map(|(name, expression)| match evaluate(expression, context) {
                Ok(json) => Value::from_json(&json).map(|value| (name.clone(), value)),
                Err(err) => {
                    log::debug!("Property '{name}' of {:?} failed: {err}", self.kind);
                    None
                }
            })
            .collect()
    }
}

/// RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::from_rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::from_rgba(0, 0, 0, 255);
    pub const WHITE: Color = Color::from_rgba(255, 255, 255, 255);

    pub const fn from_rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse a CSS color: `#rgb`, `#rrggbb`, `rgb(...)`, `rgba(...)` or a named color.
    pub fn parse(text: &str) -> Result<Self, color::ParseError> {
        let color: AlphaColor<Srgb> = text.trim().parse()?;
        let rgba = color.to_rgba8();
        Ok(Self::from_rgba(rgba.r, rgba.g, rgba.b, rgba.a))
    }

    /// Packed as `0xAARRGGBB`.
    pub fn argb(&self) -> u32 {
        u32::from_be_bytes([self.a, self.r, self.g, self.b])
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parsing_colors() {
        assert_eq!(Color::parse("#ffffff").unwrap(), Color::WHITE);
        assert_eq!(Color::parse("black").unwrap(), Color::BLACK);
        assert_eq!(
            Color::parse("rgba(255, 0, 0, 0.4)").unwrap(),
            Color::from_rgba(255, 0, 0, 102)
        );
        assert!(Color::parse("no-such-color").is_err());
    }

    #[test]
    fn color_display() {
        assert_eq!(Color::from_rgba(255, 0, 16, 255).to_string(), "#ff0010");
        assert_eq!(Color::TRANSPARENT.to_string(), "#00000000");
        assert_eq!(Color::from_rgba(1, 2, 3, 4).argb(), 0x04010203);
    }

    #[test]
    fn enum_labels() {
        let mut parameter = StyleParameter::new(Value::Int(0));
        parameter.enum_map.insert("light".to_owned(), Value::Int(0));
        parameter.enum_map.insert("dark".to_owned(), Value::Int(1));

        assert_eq!(parameter.label_of(&Value::Int(1)), Some("dark"));
        assert_eq!(parameter.label_of(&Value::Int(2)), None);
        assert_eq!(parameter.kind(), ParameterKind::Int);
    }

    #[test]
    fn filters_match_on_expression_result() {
        let properties = HashMap::from([("class".to_owned(), Value::String("park".to_owned()))]);
        let parameters = BTreeMap::new();
        let context = Context::new(&properties, 10, &parameters);

        assert!(Filter::Always.matches(&context));
        assert!(Filter::Expression(json!(["==", ["get", "class"], "park"])).matches(&context));
        assert!(!Filter::Expression(json!(["==", ["get", "class"], "wood"])).matches(&context));
        // Not a boolean, so no match.
        assert!(!Filter::Expression(json!("park")).matches(&context));
    }

    #[test]
    fn rule_zoom_range_is_inclusive() {
        let mut rule = Rule::new(Filter::Always, Vec::new());
        rule.min_zoom = 5;
        rule.max_zoom = 7;

        assert!(!rule.active_at(4));
        assert!(rule.active_at(5));
        assert!(rule.active_at(7));
        assert!(!rule.active_at(8));
    }

    #[test]
    fn symbolizer_properties_evaluate_against_features() {
        let properties = HashMap::from([("name".to_owned(), Value::String("Odra".to_owned()))]);
        let parameters = BTreeMap::new();
        let context = Context::new(&properties, 10, &parameters);

        let symbolizer = Symbolizer::new(SymbolizerKind::Text)
            .with("name", json!(["get", "name"]))
            .with("size", json!(12))
            .with("broken", json!(["no-such-operator"]));

        let evaluated = symbolizer.evaluate(&context);
        assert_eq!(evaluated["name"], Value::String("Odra".to_owned()));
        assert_eq!(evaluated["size"], Value::Int(12));
        assert!(!evaluated.contains_key("broken"));
    }
}
