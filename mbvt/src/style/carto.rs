//! Style-language front-end. Compiles CartoCSS-like stylesheets:
//!
//! ```css
//! @water: #a0c8f0;
//! Map { background-color: #f8f4f0; }
//! #water[class='lake'][zoom>=10] { polygon-fill: @water; }
//! #road {
//!   line-color: white;
//!   [class='motorway'] { line-width: 3; }
//!   ::label { text-name: [name]; text-face-name: 'Noto Sans Regular'; }
//! }
//! ```
//!
//! Every ruleset becomes a rule. Rules of one attachment form a style where the first matching
//! rule wins, more specific rulesets first. Nested rulesets inherit the filters and the
//! properties of their parents.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value as Json;

use super::filter::{FilterError, parse_expression};
use super::{Color, Filter, FilterMode, Layer, Map, MapSettings, Rule, Style, Symbolizer, SymbolizerKind};
use crate::tiles::MAX_SUPPORTED_ZOOM_LEVEL;
use crate::value::Value;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CartoError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: {source}")]
    Expression { line: usize, source: FilterError },
    #[error("undefined variable @{0}")]
    UndefinedVariable(String),
}

/// Options of the compilation.
#[derive(Debug, Clone, Default)]
pub struct CartoOptions {
    /// Layers in drawing order. When empty, layers appear in the order they are first selected.
    pub layers: Vec<String>,
    /// Apply rulesets to every layer regardless of their `#layer` selector.
    pub ignore_layer_predicates: bool,
}

/// One selector of a ruleset, already combined with the selectors of enclosing rulesets.
#[derive(Debug, Clone, Default, PartialEq)]
struct Selector {
    layer: Option<String>,
    attachment: String,
    filters: Vec<Json>,
    min_zoom: u8,
    max_zoom: u8,
    is_map: bool,
}

impl Selector {
    fn root() -> Self {
        Self {
            max_zoom: MAX_SUPPORTED_ZOOM_LEVEL,
            ..Default::default()
        }
    }

    fn specificity(&self) -> usize {
        self.layer.is_some() as usize * 100
            + self.filters.len() * 10
            + (self.min_zoom > 0) as usize
            + (self.max_zoom < MAX_SUPPORTED_ZOOM_LEVEL) as usize
    }
}

/// Ruleset with its declarations resolved against variables and parents.
#[derive(Debug, Clone)]
struct RuleSet {
    selector: Selector,
    properties: Vec<(String, Json)>,
    order: usize,
}

struct Parser {
    chars: Vec<char>,
    position: usize,
    variables: HashMap<String, String>,
    rulesets: Vec<RuleSet>,
    settings: MapSettings,
}

/// Compile stylesheet source into a [`Map`]. `sources` are concatenated in order.
pub fn parse_stylesheets(sources: &[&str], options: &CartoOptions) -> Result<Map, CartoError> {
    let text = sources.join("\n");
    let mut parser = Parser {
        chars: text.chars().collect(),
        position: 0,
        variables: HashMap::new(),
        rulesets: Vec::new(),
        settings: MapSettings::default(),
    };
    parser.parse_block(&[Selector::root()], &[], true)?;
    Ok(build_map(parser.settings, parser.rulesets, options))
}

/// Compile a single stylesheet.
pub fn parse_stylesheet(text: &str, options: &CartoOptions) -> Result<Map, CartoError> {
    parse_stylesheets(&[text], options)
}

impl Parser {
    fn line(&self) -> usize {
        self.chars[..self.position.min(self.chars.len())]
            .iter()
            .filter(|c| **c == '\n')
            .count()
            + 1
    }

    fn syntax(&self, message: impl Into<String>) -> CartoError {
        CartoError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match (self.peek(), self.chars.get(self.position + 1).copied()) {
                (Some(c), _) if c.is_whitespace() => self.position += 1,
                (Some('/'), Some('/')) => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.position += 1;
                    }
                }
                (Some('/'), Some('*')) => {
                    self.position += 2;
                    while self.position < self.chars.len()
                        && !(self.chars[self.position] == '*'
                            && self.chars.get(self.position + 1) == Some(&'/'))
                    {
                        self.position += 1;
                    }
                    self.position += 2;
                }
                _ => break,
            }
        }
    }

    /// Read until one of `stops` at nesting level zero, outside strings and brackets.
    fn read_until(&mut self, stops: &[char]) -> (String, Option<char>) {
        let mut text = String::new();
        let mut depth = 0usize;
        let mut quote = None;

        while let Some(c) = self.peek() {
            match quote {
                Some(q) => {
                    if c == q {
                        quote = None;
                    }
                }
                None => match c {
                    '/' if depth == 0
                        && matches!(self.chars.get(self.position + 1), Some('/' | '*')) =>
                    {
                        self.skip_whitespace_and_comments();
                        text.push(' ');
                        continue;
                    }
                    '\'' | '"' => quote = Some(c),
                    '[' | '(' => depth += 1,
                    ']' | ')' => depth = depth.saturating_sub(1),
                    c if depth == 0 && stops.contains(&c) => return (text, Some(c)),
                    _ => {}
                },
            }
            text.push(c);
            self.position += 1;
        }
        (text, None)
    }

    /// Parse ruleset contents until the closing brace (or the end of input at top level).
    fn parse_block(
        &mut self,
        parents: &[Selector],
        inherited: &[(String, Json)],
        top_level: bool,
    ) -> Result<(), CartoError> {
        let mut properties = inherited.to_vec();
        let mut children = Vec::new();

        loop {
            self.skip_whitespace_and_comments();
            match self.peek() {
                None if top_level => break,
                None => return Err(self.syntax("unexpected end of input, missing '}'")),
                Some('}') if !top_level => {
                    self.position += 1;
                    break;
                }
                Some('}') => return Err(self.syntax("unexpected '}'")),
                Some('@') if top_level => self.parse_variable()?,
                _ => {
                    let (text, stop) = self.read_until(&['{', ';', '}']);
                    match stop {
                        Some('{') => {
                            self.position += 1;
                            let selectors = self.parse_selectors(parents, &text)?;
                            // Properties of the enclosing ruleset must be known first, so
                            // nested rulesets are parsed once the block is complete.
                            let body_start = self.position;
                            self.skip_block()?;
                            children.push((selectors, body_start));
                        }
                        _ => {
                            if stop == Some(';') {
                                self.position += 1;
                            }
                            if text.trim().is_empty() {
                                continue;
                            }
                            if top_level {
                                return Err(self.syntax("declaration outside of a ruleset"));
                            }
                            let (name, value) = text.split_once(':').ok_or_else(|| {
                                self.syntax(format!("expected a declaration, got '{}'", text.trim()))
                            })?;
                            let value = self.resolve(value.trim())?;
                            properties.retain(|(n, _)| n != name.trim());
                            properties.push((name.trim().to_owned(), value));
                        }
                    }
                }
            }
        }

        if !top_level {
            for selector in parents {
                if selector.is_map {
                    self.apply_map_settings(&properties)?;
                } else {
                    self.rulesets.push(RuleSet {
                        selector: selector.clone(),
                        properties: properties.clone(),
                        order: self.rulesets.len(),
                    });
                }
            }
        }

        let end = self.position;
        for (selectors, body_start) in children {
            self.position = body_start;
            // Attachments draw separately and start without the parent's properties.
            let same_attachment = selectors
                .iter()
                .all(|s| parents.iter().any(|p| p.attachment == s.attachment));
            let inherited = if same_attachment { properties.as_slice() } else { &[] };
            self.parse_block(&selectors, inherited, false)?;
        }
        self.position = end;
        Ok(())
    }

    fn skip_block(&mut self) -> Result<(), CartoError> {
        let mut depth = 1;
        while depth > 0 {
            self.skip_whitespace_and_comments();
            let (_, stop) = self.read_until(&['{', '}']);
            match stop {
                Some('{') => depth += 1,
                Some(_) => depth -= 1,
                None => return Err(self.syntax("unexpected end of input, missing '}'")),
            }
            self.position += 1;
        }
        Ok(())
    }

    fn parse_variable(&mut self) -> Result<(), CartoError> {
        self.position += 1;
        let (text, stop) = self.read_until(&[';']);
        if stop.is_none() {
            return Err(self.syntax("variable declaration without ';'"));
        }
        self.position += 1;
        let (name, value) = text
            .split_once(':')
            .ok_or_else(|| self.syntax(format!("invalid variable declaration '@{text}'")))?;
        let value = self.substitute(value.trim())?;
        self.variables.insert(name.trim().to_owned(), value);
        Ok(())
    }

    /// Replace `@variable` references with their values.
    fn substitute(&self, value: &str) -> Result<String, CartoError> {
        let mut result = String::new();
        let mut chars = value.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '@' {
                result.push(c);
                continue;
            }
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphanumeric() || c == '_' || c == '-' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let replacement = self
                .variables
                .get(&name)
                .ok_or(CartoError::UndefinedVariable(name))?;
            result.push_str(replacement);
        }
        Ok(result)
    }

    /// Value of a declaration as an expression.
    fn resolve(&self, value: &str) -> Result<Json, CartoError> {
        let value = self.substitute(value)?;
        let value = value.trim();

        if value.contains('[') {
            return parse_expression(value).map_err(|source| CartoError::Expression {
                line: self.line(),
                source,
            });
        }
        if let Some(url) = value.strip_prefix("url(").and_then(|v| v.strip_suffix(')')) {
            return Ok(Json::String(unquote(url.trim()).to_owned()));
        }
        Ok(match unquote(value) {
            unquoted if unquoted.len() != value.len() => Json::String(unquoted.to_owned()),
            _ => Value::from_literal(value).to_json(),
        })
    }

    fn apply_map_settings(&mut self, properties: &[(String, Json)]) -> Result<(), CartoError> {
        for (name, value) in properties {
            let text = match value {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            };
            match name.as_str() {
                "background-color" => {
                    self.settings.background_color = Color::parse(&text)
                        .map_err(|_| self.syntax(format!("invalid color '{text}'")))?;
                }
                "background-image" => self.settings.background_image = text,
                "font-directory" => self.settings.font_directory = text,
                other => log::debug!("Ignoring Map property '{other}'"),
            }
        }
        Ok(())
    }

    fn parse_selectors(&self, parents: &[Selector], text: &str) -> Result<Vec<Selector>, CartoError> {
        let mut selectors = Vec::new();
        for part in split_top_level(text, ',') {
            for parent in parents {
                selectors.push(self.parse_selector(parent.clone(), part.trim())?);
            }
        }
        Ok(selectors)
    }

    fn parse_selector(&self, mut selector: Selector, text: &str) -> Result<Selector, CartoError> {
        let chars: Vec<char> = text.chars().collect();
        let mut i = 0;
        let ident = |start: usize| -> String {
            chars[start..]
                .iter()
                .take_while(|c| c.is_alphanumeric() || **c == '_' || **c == '-')
                .collect()
        };

        while i < chars.len() {
            match chars[i] {
                c if c.is_whitespace() => i += 1,
                '*' => i += 1,
                '#' => {
                    let name = ident(i + 1);
                    i += 1 + name.chars().count();
                    selector.layer = Some(name);
                }
                '.' => {
                    // Classes do not exist in vector tiles, so they select nothing extra.
                    let name = ident(i + 1);
                    i += 1 + name.chars().count();
                }
                ':' if chars.get(i + 1) == Some(&':') => {
                    let name = ident(i + 2);
                    i += 2 + name.chars().count();
                    selector.attachment = name;
                }
                '[' => {
                    let end = chars[i..]
                        .iter()
                        .position(|c| *c == ']')
                        .ok_or_else(|| self.syntax(format!("unterminated filter in '{text}'")))?;
                    let filter: String = chars[i + 1..i + end].iter().collect();
                    self.apply_filter(&mut selector, &filter)?;
                    i += end + 1;
                }
                _ => {
                    let name = ident(i);
                    if name == "Map" {
                        selector.is_map = true;
                        i += name.len();
                    } else {
                        return Err(self.syntax(format!("invalid selector '{text}'")));
                    }
                }
            }
        }
        Ok(selector)
    }

    /// Add a `field op value` filter. Zoom conditions narrow the zoom range instead.
    fn apply_filter(&self, selector: &mut Selector, filter: &str) -> Result<(), CartoError> {
        let filter = self.substitute(filter)?;
        let op_start = filter
            .find(['=', '!', '<', '>'])
            .ok_or_else(|| self.syntax(format!("invalid filter '[{filter}]'")))?;
        let field = filter[..op_start].trim();
        let rest = &filter[op_start..];
        let op_len = rest.chars().take_while(|c| "=!<>".contains(*c)).count();
        let (op, value) = (&rest[..op_len], rest[op_len..].trim());

        if field == "zoom" {
            let zoom: u8 = value
                .parse()
                .map_err(|_| self.syntax(format!("invalid zoom '{value}'")))?;
            let zoom = zoom.min(MAX_SUPPORTED_ZOOM_LEVEL);
            match op {
                "=" | "==" => {
                    selector.min_zoom = selector.min_zoom.max(zoom);
                    selector.max_zoom = selector.max_zoom.min(zoom);
                }
                ">=" => selector.min_zoom = selector.min_zoom.max(zoom),
                ">" => selector.min_zoom = selector.min_zoom.max(zoom.saturating_add(1)),
                "<=" => selector.max_zoom = selector.max_zoom.min(zoom),
                "<" => match zoom.checked_sub(1) {
                    Some(below) => selector.max_zoom = selector.max_zoom.min(below),
                    // Nothing lies below zoom 0, so the range is left empty.
                    None => selector.min_zoom = MAX_SUPPORTED_ZOOM_LEVEL + 1,
                },
                _ => return Err(self.syntax(format!("invalid zoom filter '[{filter}]'"))),
            }
            return Ok(());
        }

        let value = match value {
            v if v.starts_with('\'') || v.starts_with('"') => v.to_owned(),
            v if matches!(Value::from_literal(v), Value::String(_)) && v != "null" => {
                format!("'{v}'")
            }
            v => v.to_owned(),
        };
        let expression = parse_expression(&format!("[{field}] {op} {value}")).map_err(|source| {
            CartoError::Expression {
                line: self.line(),
                source,
            }
        })?;
        selector.filters.push(expression);
        Ok(())
    }
}

fn unquote(text: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|t| t.strip_suffix(quote))
        {
            return inner;
        }
    }
    text
}

fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, c) in text.char_indices() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(&text[start..index]);
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Style-language property names mapped onto symbolizer attributes. Names not listed keep the
/// part after the symbolizer prefix.
const PROPERTY_NAMES: [(SymbolizerKind, &str, &str); 7] = [
    (SymbolizerKind::Line, "color", "stroke"),
    (SymbolizerKind::Line, "width", "stroke-width"),
    (SymbolizerKind::Line, "opacity", "stroke-opacity"),
    (SymbolizerKind::Line, "dasharray", "stroke-dasharray"),
    (SymbolizerKind::Line, "join", "stroke-linejoin"),
    (SymbolizerKind::Line, "cap", "stroke-linecap"),
    (SymbolizerKind::Polygon, "opacity", "fill-opacity"),
];

/// Split `line-pattern-file` into the symbolizer kind and its attribute, `file`.
fn symbolizer_property(name: &str) -> Option<(SymbolizerKind, String)> {
    let (kind, attribute) = ["line-pattern", "polygon-pattern"]
        .iter()
        .filter_map(|prefix| Some((*prefix, name.strip_prefix(prefix)?.strip_prefix('-')?)))
        .chain(
            name.split_once('-')
                .filter(|(prefix, _)| !prefix.ends_with("pattern")),
        )
        .find_map(|(prefix, attribute)| Some((SymbolizerKind::from_prefix(prefix)?, attribute)))?;

    let attribute = PROPERTY_NAMES
        .iter()
        .find(|(k, from, _)| *k == kind && *from == attribute)
        .map(|(_, _, to)| *to)
        .unwrap_or(attribute);
    Some((kind, attribute.to_owned()))
}

fn symbolizers(properties: &[(String, Json)]) -> Vec<Symbolizer> {
    let mut symbolizers: Vec<Symbolizer> = Vec::new();
    for (name, value) in properties {
        let Some((kind, attribute)) = symbolizer_property(name) else {
            log::warn!("Unsupported style property '{name}'");
            continue;
        };
        match symbolizers.iter_mut().find(|s| s.kind == kind) {
            Some(symbolizer) => {
                symbolizer.properties.insert(attribute, value.clone());
            }
            None => symbolizers.push(Symbolizer::new(kind).with(&attribute, value.clone())),
        }
    }
    symbolizers
}

fn build_map(settings: MapSettings, rulesets: Vec<RuleSet>, options: &CartoOptions) -> Map {
    let mut layer_names = options.layers.clone();
    if layer_names.is_empty() {
        for ruleset in &rulesets {
            if let Some(layer) = &ruleset.selector.layer {
                if !layer_names.contains(layer) {
                    layer_names.push(layer.clone());
                }
            }
        }
    }

    let layers = layer_names
        .into_iter()
        .map(|layer_name| {
            let mut applicable: Vec<&RuleSet> = rulesets
                .iter()
                .filter(|ruleset| {
                    options.ignore_layer_predicates
                        || ruleset
                            .selector
                            .layer
                            .as_ref()
                            .is_none_or(|layer| *layer == layer_name)
                })
                .filter(|ruleset| !ruleset.properties.is_empty())
                .collect();
            // Most specific first; among equals, later rulesets win.
            applicable.sort_by(|a, b| {
                b.selector
                    .specificity()
                    .cmp(&a.selector.specificity())
                    .then(b.order.cmp(&a.order))
            });

            let mut styles: BTreeMap<usize, Style> = BTreeMap::new();
            let mut attachments: Vec<String> = Vec::new();
            for ruleset in &rulesets {
                if !attachments.contains(&ruleset.selector.attachment) {
                    attachments.push(ruleset.selector.attachment.clone());
                }
            }
            for ruleset in applicable {
                let index = attachments
                    .iter()
                    .position(|a| *a == ruleset.selector.attachment)
                    .unwrap_or_default();
                let style = styles.entry(index).or_insert_with(|| Style {
                    name: format!("{layer_name}{}", attachment_suffix(&ruleset.selector)),
                    filter_mode: FilterMode::First,
                    opacity: 1.0,
                    rules: Vec::new(),
                });
                let filter = match ruleset.selector.filters.len() {
                    0 => Filter::Always,
                    1 => Filter::Expression(ruleset.selector.filters[0].clone()),
                    _ => {
                        let mut all = vec![Json::String("all".to_owned())];
                        all.extend(ruleset.selector.filters.iter().cloned());
                        Filter::Expression(Json::Array(all))
                    }
                };
                let mut rule = Rule::new(filter, symbolizers(&ruleset.properties));
                rule.min_zoom = ruleset.selector.min_zoom;
                rule.max_zoom = ruleset.selector.max_zoom;
                style.rules.push(rule);
            }

            Layer {
                name: layer_name,
                styles: styles.into_values().collect(),
            }
        })
        .collect();

    Map {
        settings,
        parameters: BTreeMap::new(),
        layers,
    }
}

fn attachment_suffix(selector: &Selector) -> String {
    if selector.attachment.is_empty() {
        String::new()
    } else {
        format!("::{}", selector.attachment)
    }
}
