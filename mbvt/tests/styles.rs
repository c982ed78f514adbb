use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mbvt::style::SymbolizerKind;
use mbvt::{
    AssetPackage, Color, Error, MemoryAssets, ParameterKind, StyleSource, Value, VectorTileDecoder,
    compile,
};

const XML_STYLE: &str = r##"<?xml version="1.0" encoding="utf-8"?>
<Map background-color="#f8f4f0" font-directory="fonts">
  <NutiParameters>
    <NutiParameter name="show_labels" type="bool" value="true"/>
    <NutiParameter name="theme" type="integer" value="0">
      <Value id="light" value="0"/>
      <Value id="dark" value="1"/>
    </NutiParameter>
    <NutiParameter name="scale" type="float" value="1.5"/>
    <NutiParameter name="lang" type="string" value="en"/>
  </NutiParameters>
  <Style name="water">
    <Rule><PolygonSymbolizer fill="#a0c8f0"/></Rule>
  </Style>
  <Style name="poi">
    <Rule>
      <Filter>[nuti::show_labels]</Filter>
      <TextSymbolizer face-name="Noto Sans Regular">[name]</TextSymbolizer>
    </Rule>
  </Style>
  <Layer name="water"><StyleName>water</StyleName></Layer>
  <Layer name="poi"><StyleName>poi</StyleName></Layer>
</Map>
"##;

const PROJECT: &str = r#"{
    "styles": ["water.mss", "poi.mss"],
    "layers": ["water", "poi"],
    "nutiparameters": {
        "show_labels": { "default": true },
        "theme": { "default": 0, "values": { "light": 0, "dark": 1 } }
    }
}"#;

fn assets() -> Arc<dyn AssetPackage> {
    Arc::new(
        MemoryAssets::new()
            .with("xml/style.xml", XML_STYLE)
            .with("xml/fonts/NotoSans-Regular.ttf", "font")
            .with("carto/project.json", PROJECT)
            .with("carto/water.mss", "Map { background-color: #f8f4f0; }\n#water { polygon-fill: #a0c8f0; }")
            .with(
                "carto/poi.mss",
                "#poi[nuti::show_labels=true] { text-name: [name]; text-face-name: 'Noto Sans Regular'; }",
            )
            .with("broken.xml", "<Map><Style name=\"a\"><Rule></Map>")
            .with("style.yaml", "layers: []"),
    )
}

#[test]
fn both_front_ends_converge() {
    let _ = env_logger::try_init();

    let xml = compile(&StyleSource::precompiled(assets(), "xml/style.xml"), false).unwrap();
    let carto = compile(&StyleSource::precompiled(assets(), "carto/project.json"), false).unwrap();

    for map in [&xml.map, &carto.map] {
        assert_eq!(map.settings.background_color, Color::from_rgba(0xf8, 0xf4, 0xf0, 255));
        let layers: Vec<_> = map.layers.iter().map(|layer| layer.name.as_str()).collect();
        assert_eq!(layers, vec!["water", "poi"]);

        let water = &map.layers[0].styles[0].rules[0].symbolizers[0];
        assert_eq!(water.kind, SymbolizerKind::Polygon);
        let poi = &map.layers[1].styles[0].rules[0].symbolizers[0];
        assert_eq!(poi.kind, SymbolizerKind::Text);

        assert_eq!(map.parameters["show_labels"].default, Value::Bool(true));
        assert_eq!(map.parameters["theme"].enum_map["dark"], Value::Int(1));
    }

    assert_eq!(xml.resources.fonts.len(), 1);
}

#[test]
fn compiling_is_deterministic() {
    for name in ["xml/style.xml", "carto/project.json"] {
        let first = compile(&StyleSource::precompiled(assets(), name), false).unwrap();
        let second = compile(&StyleSource::precompiled(assets(), name), false).unwrap();
        assert_eq!(first.map, second.map);
    }
}

#[test]
fn installation_errors() {
    let _ = env_logger::try_init();

    let error = |source| VectorTileDecoder::new(source).err().unwrap();

    assert!(matches!(
        error(StyleSource::precompiled(assets(), "")),
        Error::InvalidConfig(_)
    ));
    assert!(matches!(
        error(StyleSource::source("  ", assets())),
        Error::InvalidConfig(_)
    ));
    assert!(matches!(
        error(StyleSource::precompiled(assets(), "missing.xml")),
        Error::Asset(_)
    ));
    assert!(matches!(
        error(StyleSource::precompiled(assets(), "style.yaml")),
        Error::UnsupportedFormat(_)
    ));
    assert!(matches!(
        error(StyleSource::precompiled(assets(), "broken.xml")),
        Error::Parse { .. }
    ));

    let Error::Parse { message, details } = error(StyleSource::source("#water { ", assets())) else {
        panic!("expected a parse error");
    };
    assert_eq!(message, "CartoCSS style parsing failed");
    assert!(!details.is_empty());
}

#[test]
fn parameter_round_trip() {
    let decoder = VectorTileDecoder::new(StyleSource::precompiled(assets(), "xml/style.xml")).unwrap();

    let mut names = decoder.style_parameter_names();
    names.sort();
    assert_eq!(names, vec!["lang", "scale", "show_labels", "theme"]);

    for name in &names {
        let before = decoder.style_parameter(name).unwrap();
        assert!(decoder.set_style_parameter(name, &before), "{name}");
        assert_eq!(decoder.style_parameter(name).unwrap(), before);
    }
}

#[test]
fn show_labels_scenario() {
    let _ = env_logger::try_init();

    for name in ["xml/style.xml", "carto/project.json"] {
        let decoder = VectorTileDecoder::new(StyleSource::precompiled(assets(), name)).unwrap();
        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = notifications.clone();
        decoder.add_listener(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(decoder.style_parameter("show_labels").as_deref(), Some("true"));
        assert!(decoder.set_style_parameter("show_labels", "false"));
        assert_eq!(decoder.style_parameter("show_labels").as_deref(), Some("false"));
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn theme_scenario() {
    let decoder =
        VectorTileDecoder::new(StyleSource::precompiled(assets(), "carto/project.json")).unwrap();

    assert_eq!(decoder.style_parameter("theme").as_deref(), Some("light"));
    assert!(decoder.set_style_parameter("theme", "dark"));
    assert_eq!(decoder.style_parameter("theme").as_deref(), Some("dark"));

    assert!(!decoder.set_style_parameter("theme", "blue"));
    assert_eq!(decoder.style_parameter("theme").as_deref(), Some("dark"));
}

#[test]
fn unknown_parameters_change_nothing() {
    let decoder = VectorTileDecoder::new(StyleSource::precompiled(assets(), "xml/style.xml")).unwrap();
    let before: Vec<_> = decoder
        .style_parameter_names()
        .iter()
        .map(|name| decoder.style_parameter(name))
        .collect();

    assert!(!decoder.set_style_parameter("no_such_parameter", "1"));
    assert!(!decoder.set_style_parameter("scale", "big"));
    assert_eq!(decoder.style_parameter("no_such_parameter"), None);

    let after: Vec<_> = decoder
        .style_parameter_names()
        .iter()
        .map(|name| decoder.style_parameter(name))
        .collect();
    assert_eq!(before, after);
    assert_eq!(
        decoder.runtime_settings().parameters["scale"].kind(),
        ParameterKind::Float
    );
}
