//! Turns a [`StyleSource`] into a compiled [`Map`] and the resources it needs.

use std::fmt;
use std::sync::Arc;

use crate::Error;
use crate::assets::{AssetPackage, file_path, normalize_path};
use crate::resources::{Bitmap, BitmapManager, FontManager, GlyphMap, StrokeMap};
use crate::style::carto::{CartoOptions, parse_stylesheet};
use crate::style::project::{ProjectError, load_project};
use crate::style::{Map, SymbolizerKind, xml};

/// Where the style comes from.
#[derive(Clone)]
pub enum StyleSource {
    /// Style stored in the assets, either a symbolizer document (`.xml`) or a style-language
    /// project (`.json`).
    Precompiled {
        asset_name: String,
        assets: Arc<dyn AssetPackage>,
    },
    /// Style-language source text. Images and fonts are still loaded from the assets.
    Source {
        text: String,
        assets: Arc<dyn AssetPackage>,
    },
}

impl StyleSource {
    pub fn precompiled(assets: Arc<dyn AssetPackage>, asset_name: impl Into<String>) -> Self {
        Self::Precompiled {
            asset_name: asset_name.into(),
            assets,
        }
    }

    pub fn source(text: impl Into<String>, assets: Arc<dyn AssetPackage>) -> Self {
        Self::Source {
            text: text.into(),
            assets,
        }
    }

    pub fn assets(&self) -> &Arc<dyn AssetPackage> {
        match self {
            Self::Precompiled { assets, .. } | Self::Source { assets, .. } => assets,
        }
    }

    /// Name of the style asset; empty for source text.
    pub fn asset_name(&self) -> &str {
        match self {
            Self::Precompiled { asset_name, .. } => asset_name,
            Self::Source { .. } => "",
        }
    }
}

impl fmt::Debug for StyleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precompiled { asset_name, .. } => f
                .debug_struct("Precompiled")
                .field("asset_name", asset_name)
                .finish_non_exhaustive(),
            Self::Source { text, .. } => f
                .debug_struct("Source")
                .field("text", &format!("{} bytes", text.len()))
                .finish_non_exhaustive(),
        }
    }
}

/// Resource managers of a compiled style.
#[derive(Debug, Clone)]
pub struct ResourceBindings {
    pub fonts: Arc<FontManager>,
    pub bitmaps: Arc<BitmapManager>,
    pub strokes: Arc<StrokeMap>,
    pub glyphs: Arc<GlyphMap>,
    pub background_pattern: Option<Arc<Bitmap>>,
}

#[derive(Debug, Clone)]
pub struct CompiledStyle {
    pub map: Arc<Map>,
    pub resources: ResourceBindings,
}

/// Compile the style. With `ignore_layer_predicates`, style-language rules apply to every
/// layer regardless of the layer they select.
pub fn compile(source: &StyleSource, ignore_layer_predicates: bool) -> Result<CompiledStyle, Error> {
    let map = match source {
        StyleSource::Precompiled { asset_name, assets } => {
            compile_asset(asset_name, assets.as_ref(), ignore_layer_predicates)?
        }
        StyleSource::Source { text, .. } => {
            if text.trim().is_empty() {
                return Err(Error::InvalidConfig("empty style source".to_owned()));
            }
            let options = CartoOptions {
                layers: Vec::new(),
                ignore_layer_predicates,
            };
            parse_stylesheet(text, &options)
                .map_err(|err| Error::parse("CartoCSS style parsing failed", err))?
        }
    };

    let resources = bind_resources(&map, source);
    log::debug!(
        "Compiled style {:?}: {} layers, {} parameters, {} fonts",
        source,
        map.layers.len(),
        map.parameters.len(),
        resources.fonts.len()
    );
    Ok(CompiledStyle {
        map: Arc::new(map),
        resources,
    })
}

fn compile_asset(
    asset_name: &str,
    assets: &dyn AssetPackage,
    ignore_layer_predicates: bool,
) -> Result<Map, Error> {
    if asset_name.is_empty() {
        return Err(Error::InvalidConfig(
            "could not find any styles in the style set".to_owned(),
        ));
    }
    let data = assets
        .load_asset(asset_name)
        .ok_or_else(|| Error::Asset(format!("failed to load style asset '{asset_name}'")))?;
    let text = std::str::from_utf8(&data)
        .map_err(|err| Error::parse("Style asset is not valid UTF-8", err))?;

    if asset_name.ends_with(".xml") {
        xml::parse_map(text).map_err(|err| Error::parse("XML style processing failed", err))
    } else if asset_name.ends_with(".json") {
        load_project(asset_name, text, assets, ignore_layer_predicates).map_err(|err| match err {
            ProjectError::MissingStylesheet(name) => {
                Error::Asset(format!("failed to load stylesheet '{name}'"))
            }
            err => Error::parse("CartoCSS style parsing failed", err),
        })
    } else {
        Err(Error::UnsupportedFormat(asset_name.to_owned()))
    }
}

fn bind_resources(map: &Map, source: &StyleSource) -> ResourceBindings {
    let assets = source.assets();
    let base_path = file_path(source.asset_name());

    let font_prefix = normalize_path(&format!(
        "{base_path}{}/",
        map.settings.font_directory
    ));
    let mut fonts = FontManager::new();
    fonts.load_directory(assets.as_ref(), &font_prefix);
    warn_about_missing_fonts(map, &fonts);

    let bitmaps = Arc::new(BitmapManager::new(assets.clone(), base_path));
    let background_pattern = if map.settings.background_image.is_empty() {
        None
    } else {
        bitmaps.load_bitmap(&map.settings.background_image)
    };

    ResourceBindings {
        fonts: Arc::new(fonts),
        bitmaps,
        strokes: Arc::new(StrokeMap::new()),
        glyphs: Arc::new(GlyphMap::new()),
        background_pattern,
    }
}

fn warn_about_missing_fonts(map: &Map, fonts: &FontManager) {
    let face_names = map
        .layers
        .iter()
        .flat_map(|layer| &layer.styles)
        .flat_map(|style| &style.rules)
        .flat_map(|rule| &rule.symbolizers)
        .filter(|s| matches!(s.kind, SymbolizerKind::Text | SymbolizerKind::Shield))
        .filter_map(|s| s.properties.get("face-name")?.as_str());

    for face_name in face_names {
        if fonts.find_font(face_name).is_none() {
            log::warn!("Font '{face_name}' is not available");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssets;
    use crate::resources::tests::png;
    use crate::style::Color;

    const XML_STYLE: &str = r##"<Map background-color="#102030" background-image="paper.png" font-directory="../fonts">
        <Style name="water"><Rule><PolygonSymbolizer fill="blue"/></Rule></Style>
        <Style name="labels">
          <Rule><TextSymbolizer face-name="Noto Sans Regular">[name]</TextSymbolizer></Rule>
        </Style>
        <Layer name="water"><StyleName>water</StyleName><StyleName>labels</StyleName></Layer>
    </Map>"##;

    fn assets() -> Arc<dyn AssetPackage> {
        Arc::new(
            MemoryAssets::new()
                .with("style/style.xml", XML_STYLE)
                .with("style/paper.png", png(4, 4))
                .with("style/broken.css", "")
                .with("fonts/NotoSans-Regular.ttf", "font")
                .with("style/project.json", r#"{ "styles": ["a.mss"], "layers": ["water"] }"#)
                .with("style/a.mss", "#water { polygon-fill: blue; }")
                .with("style/invalid.xml", "<Map><Layer></Map>")
                .with("style/missing.json", r#"{ "styles": ["nope.mss"] }"#),
        )
    }

    #[test]
    fn symbolizer_document() {
        let style = compile(&StyleSource::precompiled(assets(), "style/style.xml"), false).unwrap();

        assert_eq!(style.map.settings.background_color, Color::from_rgba(0x10, 0x20, 0x30, 255));
        assert_eq!(style.map.layers[0].styles.len(), 2);
        assert_eq!(
            style.resources.fonts.font_names().collect::<Vec<_>>(),
            vec!["fonts/NotoSans-Regular.ttf"]
        );
        let pattern = style.resources.background_pattern.unwrap();
        assert_eq!((pattern.width, pattern.height), (4, 4));
    }

    #[test]
    fn project_and_source_converge() {
        let project = compile(&StyleSource::precompiled(assets(), "style/project.json"), false).unwrap();
        let source = compile(
            &StyleSource::source("#water { polygon-fill: blue; }", assets()),
            false,
        )
        .unwrap();

        assert_eq!(project.map.layers, source.map.layers);
    }

    #[test]
    fn errors() {
        let compile_asset = |name: &str| compile(&StyleSource::precompiled(assets(), name), false);

        assert!(matches!(compile_asset(""), Err(Error::InvalidConfig(_))));
        assert!(matches!(compile_asset("style/none.xml"), Err(Error::Asset(_))));
        assert!(matches!(compile_asset("style/missing.json"), Err(Error::Asset(_))));
        assert!(matches!(
            compile_asset("style/broken.css"),
            Err(Error::UnsupportedFormat(name)) if name == "style/broken.css"
        ));
        assert!(matches!(
            compile_asset("style/invalid.xml"),
            Err(Error::Parse { message, .. }) if message == "XML style processing failed"
        ));
        assert!(matches!(
            compile(&StyleSource::source("  ", assets()), false),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            compile(&StyleSource::source("#a { line-width: 1", assets()), false),
            Err(Error::Parse { message, details })
                if message == "CartoCSS style parsing failed" && !details.is_empty()
        ));
    }
}
