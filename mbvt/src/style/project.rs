//! Style-language projects: a `project.json` naming the stylesheets, the layer order and the
//! style parameters.
//!
//! ```json
//! {
//!   "styles": ["base.mss", "labels.mss"],
//!   "layers": ["water", "road", "poi"],
//!   "nutiparameters": {
//!     "show_labels": { "default": true },
//!     "theme": { "default": 0, "values": { "light": 0, "dark": 1 } }
//!   },
//!   "minzoom": 0,
//!   "maxzoom": 18,
//!   "fontdirectory": "../fonts"
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::carto::{CartoError, CartoOptions, parse_stylesheets};
use super::{Map, StyleParameter};
use crate::assets::{AssetPackage, file_path, normalize_path};
use crate::value::Value;

#[derive(thiserror::Error, Debug)]
pub enum ProjectError {
    #[error("invalid project file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stylesheet '{0}' not found")]
    MissingStylesheet(String),
    #[error("stylesheet '{0}' is not valid UTF-8")]
    Encoding(String),
    #[error("invalid parameter '{0}'")]
    InvalidParameter(String),
    #[error(transparent)]
    Carto(#[from] CartoError),
}

/// Contents of `project.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Stylesheet asset names, relative to the project file.
    #[serde(default)]
    pub styles: Vec<String>,
    /// Layers in drawing order.
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default)]
    pub nutiparameters: BTreeMap<String, ProjectParameter>,
    #[serde(default)]
    pub minzoom: Option<u8>,
    #[serde(default)]
    pub maxzoom: Option<u8>,
    #[serde(default)]
    pub fontdirectory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectParameter {
    pub default: Json,
    /// Enum labels and their values.
    #[serde(default)]
    pub values: BTreeMap<String, Json>,
}

impl ProjectParameter {
    fn to_style_parameter(&self, name: &str) -> Result<StyleParameter, ProjectError> {
        let invalid = || ProjectError::InvalidParameter(name.to_owned());
        let mut parameter = StyleParameter::new(Value::from_json(&self.default).ok_or_else(invalid)?);
        for (label, value) in &self.values {
            let value = Value::from_json(value)
                .filter(|v| v.kind() == parameter.kind())
                .ok_or_else(invalid)?;
            parameter.enum_map.insert(label.clone(), value);
        }
        Ok(parameter)
    }
}

/// Load the project stored as `asset_name` together with its stylesheets.
pub fn load_project(
    asset_name: &str,
    text: &str,
    assets: &dyn AssetPackage,
    ignore_layer_predicates: bool,
) -> Result<Map, ProjectError> {
    let project: Project = serde_json::from_str(text)?;
    let directory = file_path(asset_name);

    let mut sources = Vec::with_capacity(project.styles.len());
    for style in &project.styles {
        let name = normalize_path(&format!("{directory}{style}"));
        let data = assets
            .load_asset(&name)
            .ok_or_else(|| ProjectError::MissingStylesheet(name.clone()))?;
        let source = String::from_utf8(data.to_vec()).map_err(|_| ProjectError::Encoding(name))?;
        sources.push(source);
    }

    let options = CartoOptions {
        layers: project.layers.clone(),
        ignore_layer_predicates,
    };
    let sources: Vec<&str> = sources.iter().map(String::as_str).collect();
    let mut map = parse_stylesheets(&sources, &options)?;

    for (name, parameter) in &project.nutiparameters {
        map.parameters
            .insert(name.clone(), parameter.to_style_parameter(name)?);
    }
    if let Some(min_zoom) = project.minzoom {
        map.settings.min_zoom = min_zoom;
    }
    if let Some(max_zoom) = project.maxzoom {
        map.settings.max_zoom = max_zoom;
    }
    if let Some(font_directory) = project.fontdirectory {
        map.settings.font_directory = font_directory;
    }

    log::debug!(
        "Loaded project '{asset_name}' with {} stylesheets and {} layers",
        project.styles.len(),
        map.layers.len()
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssets;

    const PROJECT: &str = r#"{
        "styles": ["base.mss", "../shared/labels.mss"],
        "layers": ["water", "poi"],
        "nutiparameters": {
            "show_labels": { "default": true },
            "theme": { "default": 0, "values": { "light": 0, "dark": 1 } }
        },
        "maxzoom": 18,
        "fontdirectory": "../fonts"
    }"#;

    fn assets() -> MemoryAssets {
        MemoryAssets::new()
            .with("style/base.mss", "#water { polygon-fill: #a0c8f0; }")
            .with(
                "shared/labels.mss",
                "#poi[nuti::show_labels=true] { text-name: [name]; }",
            )
    }

    #[test]
    fn loads_stylesheets_relative_to_the_project() {
        let map = load_project("style/project.json", PROJECT, &assets(), false).unwrap();

        assert_eq!(map.layers.len(), 2);
        assert_eq!(map.layers[0].name, "water");
        assert_eq!(map.layers[1].name, "poi");
        assert_eq!(map.layers[1].styles[0].rules.len(), 1);
        assert_eq!(map.settings.max_zoom, 18);
        assert_eq!(map.settings.min_zoom, 0);
        assert_eq!(map.settings.font_directory, "../fonts");
    }

    #[test]
    fn declares_parameters() {
        let map = load_project("style/project.json", PROJECT, &assets(), false).unwrap();

        assert_eq!(map.parameters["show_labels"].default, Value::Bool(true));
        let theme = &map.parameters["theme"];
        assert_eq!(theme.default, Value::Int(0));
        assert_eq!(theme.enum_map["dark"], Value::Int(1));
    }

    #[test]
    fn missing_stylesheet() {
        let assets = MemoryAssets::new().with("style/base.mss", "");
        assert!(matches!(
            load_project("style/project.json", PROJECT, &assets, false),
            Err(ProjectError::MissingStylesheet(name)) if name == "shared/labels.mss"
        ));
    }

    #[test]
    fn invalid_projects() {
        let assets = MemoryAssets::new();
        assert!(matches!(
            load_project("project.json", "{ not json", &assets, false),
            Err(ProjectError::Json(_))
        ));
        assert!(matches!(
            load_project(
                "project.json",
                r#"{ "nutiparameters": { "x": { "default": 1, "values": { "a": "b" } } } }"#,
                &assets,
                false
            ),
            Err(ProjectError::InvalidParameter(name)) if name == "x"
        ));
    }
}
