//! Current values of the style parameters.

use std::collections::BTreeMap;

use crate::style::StyleParameter;
use crate::value::{ParameterKind, Value};

/// Tile size assumed by the symbolizers, in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Everything symbolizer evaluation needs besides the feature itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub tile_size: u32,
    /// Value of every declared parameter.
    pub parameters: BTreeMap<String, Value>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            parameters: BTreeMap::new(),
        }
    }
}

/// Style parameters declared by the style and their current values. Values arrive as text from
/// untrusted input, so invalid ones are rejected with `false` instead of an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStore {
    declarations: BTreeMap<String, StyleParameter>,
    values: BTreeMap<String, Value>,
}

impl ParameterStore {
    /// Store with every parameter at its default value.
    pub fn new(declarations: BTreeMap<String, StyleParameter>) -> Self {
        let values = declarations
            .iter()
            .map(|(name, parameter)| (name.clone(), parameter.default.clone()))
            .collect();
        Self {
            declarations,
            values,
        }
    }

    /// Take over the values of `previous` for parameters which are still declared with the same
    /// kind, e.g. after the same style got recompiled.
    pub fn carry_over(&mut self, previous: &ParameterStore) {
        for (name, value) in &previous.values {
            if let Some(parameter) = self.declarations.get(name) {
                let valid = value.kind() == parameter.kind()
                    && (parameter.enum_map.is_empty() || parameter.label_of(value).is_some());
                if valid {
                    self.values.insert(name.clone(), value.clone());
                }
            }
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.declarations.keys().cloned().collect()
    }

    /// Current value, or the declared default when no value was set.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values
            .get(name)
            .or_else(|| Some(&self.declarations.get(name)?.default))
    }

    /// Current value as text. Enum parameters give their label.
    pub fn get(&self, name: &str) -> Option<String> {
        let parameter = self.declarations.get(name)?;
        let value = self.value(name)?;
        Some(match parameter.label_of(value) {
            Some(label) => label.to_owned(),
            None => value.to_string(),
        })
    }

    /// Parse `text` as the declared kind of the parameter and store it. Enum parameters take
    /// one of their labels.
    pub fn set(&mut self, name: &str, text: &str) -> bool {
        let Some(parameter) = self.declarations.get(name) else {
            log::info!("Unknown style parameter '{name}'");
            return false;
        };

        let value = if parameter.enum_map.is_empty() {
            Value::parse_as(parameter.kind(), text)
        } else {
            let value = parameter.enum_map.get(text).cloned();
            if value.is_none() {
                log::info!("Illegal value '{text}' for enum parameter '{name}'");
            }
            value
        };

        match value {
            Some(value) => {
                self.values.insert(name.to_owned(), value);
                true
            }
            None => {
                if parameter.enum_map.is_empty() {
                    log::info!(
                        "Could not parse '{text}' as {:?} for parameter '{name}'",
                        parameter.kind()
                    );
                }
                false
            }
        }
    }

    pub fn kind(&self, name: &str) -> Option<ParameterKind> {
        Some(self.declarations.get(name)?.kind())
    }

    pub fn runtime_settings(&self, tile_size: u32) -> RuntimeSettings {
        RuntimeSettings {
            tile_size,
            parameters: self
                .declarations
                .keys()
                .filter_map(|name| Some((name.clone(), self.value(name)?.clone())))
                .collect(),
        }
    }
}
