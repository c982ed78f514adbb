//! The decoding engine: holds the installed style and turns tile payloads into styled tiles or
//! single features.
//!
//! All state lives behind one lock and is only copied out there. Parsing and styling run
//! unlocked, and change listeners are called after the lock is released, so they may call back
//! into the decoder.

pub mod cache;
pub mod feature_decoder;
#[cfg(test)]
pub(crate) mod mvt_encoder;
pub mod reader;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use geo_types::Geometry;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::compiler::{ResourceBindings, StyleSource, compile};
use crate::parameters::{DEFAULT_TILE_SIZE, ParameterStore, RuntimeSettings};
use crate::position::{GeometryConverter, MapBounds};
use crate::resources::Bitmap;
use crate::style::{Color, Map};
use crate::tiles::{MAX_SUPPORTED_ZOOM_LEVEL, TileId, TileTransform};
use crate::value::Value;
use cache::FeatureDecodeCache;
use feature_decoder::{DecodeError, DecodeOptions, FeatureDecoder};
use reader::{StyledTile, TileReader};

/// Decoder settings which do not come from the style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderOptions {
    /// Margin around the tile, as a fraction of its size, within which features are kept.
    pub buffering: f32,
    /// Give all features of a tile the same id, derived from the tile address.
    pub feature_id_override: bool,
    /// Apply style-language rules to every layer regardless of the layer they select.
    pub layer_names_ignored: bool,
    /// Read every layer of the tile as if it had this name. Empty means no override.
    pub layer_name_override: String,
    /// Edge length of a rendered tile in pixels. Exposed to the style through the runtime
    /// settings.
    pub tile_size: u32,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            buffering: 0.0,
            feature_id_override: false,
            layer_names_ignored: false,
            layer_name_override: String::new(),
            tile_size: DEFAULT_TILE_SIZE,
        }
    }
}

/// Feature found by [`VectorTileDecoder::decode_feature`], in map coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFeature {
    pub id: u64,
    pub layer_name: String,
    pub geometry: Geometry<f64>,
    pub properties: HashMap<String, Value>,
}

/// Called whenever anything affecting decoded tiles changes.
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// Everything derived from the installed style. Replaced as a whole.
struct StyleState {
    source: StyleSource,
    map: Arc<Map>,
    parameters: ParameterStore,
    settings: Arc<RuntimeSettings>,
    resources: ResourceBindings,
}

impl StyleState {
    fn compile(source: StyleSource, options: &DecoderOptions) -> Result<Self, Error> {
        let compiled = compile(&source, options.layer_names_ignored)?;
        let parameters = ParameterStore::new(compiled.map.parameters.clone());
        let settings = Arc::new(parameters.runtime_settings(options.tile_size));
        Ok(Self {
            source,
            map: compiled.map,
            parameters,
            settings,
            resources: compiled.resources,
        })
    }
}

struct State {
    style: Arc<StyleState>,
    options: DecoderOptions,
    cache: FeatureDecodeCache,
}

pub struct VectorTileDecoder {
    state: Mutex<State>,
    listeners: Mutex<Vec<ChangeListener>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VectorTileDecoder {
    pub fn new(source: StyleSource) -> Result<Self, Error> {
        Self::with_options(source, DecoderOptions::default())
    }

    pub fn with_options(source: StyleSource, options: DecoderOptions) -> Result<Self, Error> {
        let style = StyleState::compile(source, &options)?;
        Ok(Self {
            state: Mutex::new(State {
                style: Arc::new(style),
                options,
                cache: FeatureDecodeCache::default(),
            }),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn add_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        lock(&self.listeners).push(Arc::new(listener));
    }

    fn notify(&self) {
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener();
        }
    }

    fn style(&self) -> Arc<StyleState> {
        lock(&self.state).style.clone()
    }

    /// Change the options under the lock, then tell the listeners.
    fn update_options(&self, update: impl FnOnce(&mut DecoderOptions)) {
        update(&mut lock(&self.state).options);
        self.notify();
    }

    pub fn style_source(&self) -> StyleSource {
        self.style().source.clone()
    }

    /// Install a new style. On failure the current style stays.
    pub fn set_style_source(&self, source: StyleSource) -> Result<(), Error> {
        loop {
            let options = lock(&self.state).options.clone();
            let style = StyleState::compile(source.clone(), &options)?;

            let mut state = lock(&self.state);
            // Compiled against a stale flag, do it again.
            if state.options.layer_names_ignored != options.layer_names_ignored {
                continue;
            }
            state.style = Arc::new(style);
            break;
        }
        self.notify();
        Ok(())
    }

    pub fn map(&self) -> Arc<Map> {
        self.style().map.clone()
    }

    pub fn background_color(&self) -> Color {
        self.style().map.settings.background_color
    }

    pub fn background_pattern(&self) -> Option<Arc<Bitmap>> {
        self.style().resources.background_pattern.clone()
    }

    pub fn min_zoom(&self) -> u8 {
        0
    }

    pub fn max_zoom(&self) -> u8 {
        MAX_SUPPORTED_ZOOM_LEVEL
    }

    pub fn runtime_settings(&self) -> Arc<RuntimeSettings> {
        self.style().settings.clone()
    }

    pub fn style_parameter_names(&self) -> Vec<String> {
        self.style().parameters.list()
    }

    /// Current value of a style parameter as text. Enum parameters give their label.
    pub fn style_parameter(&self, name: &str) -> Option<String> {
        self.style().parameters.get(name)
    }

    /// Set a style parameter from text. Returns `false`, without changing anything, when the
    /// parameter is unknown or the value is not valid for it.
    pub fn set_style_parameter(&self, name: &str, value: &str) -> bool {
        {
            let mut state = lock(&self.state);
            let mut parameters = state.style.parameters.clone();
            if !parameters.set(name, value) {
                return false;
            }
            let settings = Arc::new(parameters.runtime_settings(state.options.tile_size));
            let style = &state.style;
            let style = StyleState {
                source: style.source.clone(),
                map: style.map.clone(),
                parameters,
                settings,
                resources: style.resources.clone(),
            };
            state.style = Arc::new(style);
        }
        self.notify();
        true
    }

    pub fn buffering(&self) -> f32 {
        lock(&self.state).options.buffering
    }

    pub fn set_buffering(&self, buffering: f32) {
        self.update_options(|options| options.buffering = buffering);
    }

    pub fn is_feature_id_override(&self) -> bool {
        lock(&self.state).options.feature_id_override
    }

    pub fn set_feature_id_override(&self, enabled: bool) {
        self.update_options(|options| options.feature_id_override = enabled);
    }

    pub fn layer_name_override(&self) -> String {
        lock(&self.state).options.layer_name_override.clone()
    }

    pub fn set_layer_name_override(&self, name: impl Into<String>) {
        let name = name.into();
        self.update_options(|options| options.layer_name_override = name);
    }

    pub fn is_layer_names_ignored(&self) -> bool {
        lock(&self.state).options.layer_names_ignored
    }

    /// Recompiles the installed style so the flag takes effect. Parameter values are kept.
    pub fn set_layer_names_ignored(&self, ignored: bool) -> Result<(), Error> {
        loop {
            let (previous, mut options) = {
                let state = lock(&self.state);
                (state.style.clone(), state.options.clone())
            };
            options.layer_names_ignored = ignored;

            let mut style = StyleState::compile(previous.source.clone(), &options)?;
            style.parameters.carry_over(&previous.parameters);
            style.settings = Arc::new(style.parameters.runtime_settings(options.tile_size));

            let mut state = lock(&self.state);
            // The style or its parameters were replaced meanwhile, start over from the new one.
            if !Arc::ptr_eq(&state.style, &previous) {
                continue;
            }
            state.options.layer_names_ignored = ignored;
            state.style = Arc::new(style);
            break;
        }
        self.notify();
        Ok(())
    }

    /// Find feature `id` in `payload` and convert it into map coordinates within `bounds`.
    /// Payloads are parsed once and reused while the same payload keeps coming.
    pub fn decode_feature(
        &self,
        id: u64,
        tile: TileId,
        payload: Option<&Bytes>,
        bounds: MapBounds,
    ) -> Option<DecodedFeature> {
        let Some(payload) = payload else {
            log::warn!("decode_feature: no payload for {tile:?}");
            return None;
        };
        if payload.is_empty() {
            return None;
        }

        let cached = lock(&self.state).cache.get(payload);
        let decoder = match cached {
            Some(decoder) => {
                log::trace!("Feature decoder cache hit for {tile:?}");
                decoder
            }
            None => {
                log::trace!("Feature decoder cache miss for {tile:?}");
                match FeatureDecoder::decode(payload, &DecodeOptions::default()) {
                    Ok(decoder) => lock(&self.state).cache.install(payload, Arc::new(decoder)),
                    Err(err) => {
                        log::error!("decode_feature: exception while decoding {tile:?}: {err}");
                        return None;
                    }
                }
            }
        };

        let (layer_name, feature) = decoder.get_feature(id)?;
        Some(DecodedFeature {
            id: feature.id,
            layer_name: layer_name.to_owned(),
            geometry: GeometryConverter::new(bounds).convert(&feature.geometry),
            properties: feature.properties.clone(),
        })
    }

    /// Decode and style `payload` of `tile` as the `target` tile, which can be the tile itself,
    /// one of its descendants or one of its ancestors. The result is keyed by overscale level,
    /// which is always 0.
    pub fn decode_tile(
        &self,
        tile: TileId,
        target: TileId,
        payload: Option<&Bytes>,
    ) -> Option<BTreeMap<u8, StyledTile>> {
        let Some(payload) = payload else {
            log::warn!("decode_tile: no payload for {tile:?}");
            return None;
        };
        if payload.is_empty() {
            return None;
        }

        let (style, options) = {
            let state = lock(&self.state);
            (state.style.clone(), state.options.clone())
        };

        match decode_styled(tile, target, payload, &style, &options) {
            Ok(styled) => Some(BTreeMap::from([(0, styled)])),
            Err(err) => {
                log::error!("decode_tile: exception while decoding {tile:?}: {err}");
                None
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum TileError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    InvalidTile(#[from] crate::tiles::InvalidTile),
}

fn decode_styled(
    tile: TileId,
    target: TileId,
    payload: &[u8],
    style: &StyleState,
    options: &DecoderOptions,
) -> Result<StyledTile, TileError> {
    let decode_options = DecodeOptions {
        transform: TileTransform::between(tile, target)?,
        buffer: Some(options.buffering),
        global_id_override: options.feature_id_override.then(|| tile.global_id()),
        layer_name_override: Some(options.layer_name_override.clone())
            .filter(|name| !name.is_empty()),
    };
    let decoder = FeatureDecoder::decode(payload, &decode_options)?;
    Ok(TileReader::new(&style.map, &style.settings, &style.resources).read_tile(target, &decoder))
}
