//! Symbolizer document front-end. Reads a Mapnik-like XML map definition:
//!
//! ```xml
//! <Map background-color="#f8f4f0" font-directory="fonts">
//!   <NutiParameters>
//!     <NutiParameter name="theme" type="integer" value="0">
//!       <Value id="light" value="0"/>
//!       <Value id="dark" value="1"/>
//!     </NutiParameter>
//!   </NutiParameters>
//!   <Style name="water">
//!     <Rule>
//!       <Filter>[class] = 'lake'</Filter>
//!       <PolygonSymbolizer fill="#a0c8f0"/>
//!     </Rule>
//!   </Style>
//!   <Layer name="water"><StyleName>water</StyleName></Layer>
//! </Map>
//! ```

use std::collections::{BTreeMap, HashMap};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::filter::{FilterError, parse_expression, parse_property};
use super::{
    Color, Filter, FilterMode, Layer, Map, Rule, Style, StyleParameter, Symbolizer,
    SymbolizerKind,
};
use crate::tiles::MAX_SUPPORTED_ZOOM_LEVEL;
use crate::value::Value;

/// Scale denominator of zoom level 0, for 256px tiles.
const ZOOM0_SCALE_DENOMINATOR: f64 = 559_082_264.028;

#[derive(thiserror::Error, Debug)]
pub enum XmlError {
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
    #[error(transparent)]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("Document is not UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("Missing <Map> root element")]
    MissingMap,
    #[error("Unbalanced element </{0}>")]
    Unbalanced(String),
    #[error("Invalid value '{value}' of '{name}'")]
    InvalidValue { name: String, value: String },
    #[error("Invalid expression: {0}")]
    Expression(#[from] FilterError),
}

/// Minimal element tree, enough to interpret the map definition.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: BTreeMap<String, String>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, XmlError> {
        let mut attributes = BTreeMap::new();
        for attribute in start.attributes() {
            let attribute = attribute?;
            let key = std::str::from_utf8(attribute.key.as_ref())?.to_owned();
            attributes.insert(key, attribute.unescape_value()?.into_owned());
        }
        Ok(Self {
            name: std::str::from_utf8(start.name().as_ref())?.to_owned(),
            attributes,
            ..Default::default()
        })
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    fn child_text<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.children(name).next().map(|child| child.text.trim())
    }
}

fn parse_tree(text: &str) -> Result<Element, XmlError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    // Root is a synthetic document element.
    let mut stack = vec![Element::default()];

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(Element::from_start(&start)?),
            Event::Empty(start) => {
                let element = Element::from_start(&start)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            }
            Event::End(end) => {
                let name = std::str::from_utf8(end.name().as_ref())?.to_owned();
                if stack.len() < 2 {
                    return Err(XmlError::Unbalanced(name));
                }
                if let Some(element) = stack.pop() {
                    if element.name != name {
                        return Err(XmlError::Unbalanced(name));
                    }
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(element);
                    }
                }
            }
            Event::Text(text) => {
                if let Some(element) = stack.last_mut() {
                    element.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(element) = stack.last_mut() {
                    element.text.push_str(std::str::from_utf8(&data)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match stack.pop() {
        Some(document) if stack.is_empty() => Ok(document),
        _ => Err(XmlError::Unbalanced("<eof>".to_owned())),
    }
}

/// Parse a symbolizer document into a [`Map`].
pub fn parse_map(text: &str) -> Result<Map, XmlError> {
    let document = parse_tree(text)?;
    let root = document.children("Map").next().ok_or(XmlError::MissingMap)?;

    let mut map = Map::default();

    if let Some(color) = root.attribute("background-color") {
        map.settings.background_color = parse_color("background-color", color)?;
    }
    if let Some(image) = root.attribute("background-image") {
        map.settings.background_image = image.to_owned();
    }
    if let Some(directory) = root.attribute("font-directory") {
        map.settings.font_directory = directory.to_owned();
    }

    for parameter in root.children("Parameters").flat_map(|p| p.children("Parameter")) {
        let value = parameter.text.trim();
        match parameter.attribute("name") {
            Some("minzoom") => map.settings.min_zoom = parse_zoom("minzoom", value)?,
            Some("maxzoom") => map.settings.max_zoom = parse_zoom("maxzoom", value)?,
            _ => {}
        }
    }

    for parameter in root
        .children("NutiParameters")
        .flat_map(|p| p.children("NutiParameter"))
    {
        let (name, parameter) = parse_parameter(parameter)?;
        map.parameters.insert(name, parameter);
    }

    let styles: HashMap<&str, Style> = root
        .children("Style")
        .map(|style| Ok((style.attribute("name").unwrap_or_default(), parse_style(style)?)))
        .collect::<Result<_, XmlError>>()?;

    for layer in root.children("Layer") {
        if layer.attribute("status") == Some("off") {
            continue;
        }
        let name = layer.attribute("name").unwrap_or_default().to_owned();
        let layer_styles = layer
            .children("StyleName")
            .filter_map(|style_name| {
                let style_name = style_name.text.trim();
                let style = styles.get(style_name).cloned();
                if style.is_none() {
                    log::warn!("Layer '{name}' references unknown style '{style_name}'");
                }
                style
            })
            .collect();
        map.layers.push(Layer {
            name,
            styles: layer_styles,
        });
    }

    Ok(map)
}

fn parse_parameter(element: &Element) -> Result<(String, StyleParameter), XmlError> {
    let name = element.attribute("name").unwrap_or_default().to_owned();
    let kind = element.attribute("type").unwrap_or("string");
    let parse = |text: &str| -> Result<Value, XmlError> {
        let invalid = || XmlError::InvalidValue {
            name: name.clone(),
            value: text.to_owned(),
        };
        Ok(match kind {
            "bool" | "boolean" => Value::Bool(text.parse().map_err(|_| invalid())?),
            "int" | "integer" => Value::Int(text.parse().map_err(|_| invalid())?),
            "float" | "double" | "number" => Value::Float(text.parse().map_err(|_| invalid())?),
            "string" => Value::String(text.to_owned()),
            _ => return Err(invalid()),
        })
    };

    let mut parameter = StyleParameter::new(parse(element.attribute("value").unwrap_or_default())?);
    for value in element.children("Value") {
        let label = value.attribute("id").unwrap_or_default().to_owned();
        parameter
            .enum_map
            .insert(label, parse(value.attribute("value").unwrap_or_default())?);
    }
    Ok((name, parameter))
}

fn parse_style(element: &Element) -> Result<Style, XmlError> {
    let filter_mode = match element.attribute("filter-mode") {
        Some("first") => FilterMode::First,
        _ => FilterMode::All,
    };
    let opacity = match element.attribute("opacity") {
        Some(opacity) => parse_number("opacity", opacity)? as f32,
        None => 1.0,
    };

    Ok(Style {
        name: element.attribute("name").unwrap_or_default().to_owned(),
        filter_mode,
        opacity,
        rules: element
            .children("Rule")
            .map(parse_rule)
            .collect::<Result<_, _>>()?,
    })
}

fn parse_rule(element: &Element) -> Result<Rule, XmlError> {
    let filter = if element.children("ElseFilter").next().is_some() {
        Filter::Else
    } else {
        match element.child_text("Filter") {
            Some(filter) if !filter.is_empty() => Filter::Expression(parse_expression(filter)?),
            _ => Filter::Always,
        }
    };

    let mut symbolizers = Vec::new();
    for child in &element.children {
        let Some(kind) = SymbolizerKind::from_element(&child.name) else {
            continue;
        };
        let mut symbolizer = Symbolizer::new(kind);
        for (name, value) in &child.attributes {
            symbolizer
                .properties
                .insert(name.clone(), parse_property(value)?);
        }
        let text = child.text.trim();
        if !text.is_empty() {
            symbolizer
                .properties
                .insert("name".to_owned(), parse_expression(text)?);
        }
        symbolizers.push(symbolizer);
    }

    let mut rule = Rule::new(filter, symbolizers);
    if let Some(max_scale) = element.child_text("MaxScaleDenominator") {
        let max_scale = parse_number("MaxScaleDenominator", max_scale)?;
        rule.min_zoom = (0..=MAX_SUPPORTED_ZOOM_LEVEL)
            .find(|zoom| scale_denominator(*zoom) < max_scale)
            .unwrap_or(MAX_SUPPORTED_ZOOM_LEVEL);
    }
    if let Some(min_scale) = element.child_text("MinScaleDenominator") {
        let min_scale = parse_number("MinScaleDenominator", min_scale)?;
        rule.max_zoom = (0..=MAX_SUPPORTED_ZOOM_LEVEL)
            .rev()
            .find(|zoom| scale_denominator(*zoom) >= min_scale)
            .unwrap_or(0);
    }
    Ok(rule)
}

fn scale_denominator(zoom: u8) -> f64 {
    ZOOM0_SCALE_DENOMINATOR / 2f64.powi(zoom as i32)
}

fn parse_number(name: &str, value: &str) -> Result<f64, XmlError> {
    value.trim().parse().map_err(|_| XmlError::InvalidValue {
        name: name.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_zoom(name: &str, value: &str) -> Result<u8, XmlError> {
    value
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|zoom| *zoom <= MAX_SUPPORTED_ZOOM_LEVEL)
        .ok_or_else(|| XmlError::InvalidValue {
            name: name.to_owned(),
            value: value.to_owned(),
        })
}

fn parse_color(name: &str, value: &str) -> Result<Color, XmlError> {
    Color::parse(value).map_err(|_| XmlError::InvalidValue {
        name: name.to_owned(),
        value: value.to_owned(),
    })
}
