//! Resources referenced by a compiled style: fonts, bitmaps, stroke patterns and the glyph atlas.
//! All of them are created per style and populated lazily.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use image::ImageError;
use lru::LruCache;

use crate::assets::{AssetPackage, normalize_path};

/// Width of the stroke pattern atlas, and the number of patterns it can hold.
pub const STROKEMAP_SIZE: u32 = 512;

/// Width and height of the glyph atlas.
pub const GLYPHMAP_SIZE: u32 = 2048;

// Just arbitrary value which seemed right.
#[allow(clippy::unwrap_used)]
const BITMAP_CACHE_SIZE: NonZeroUsize = NonZeroUsize::new(64).unwrap();

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Font files available to the style, by asset name.
#[derive(Debug, Clone, Default)]
pub struct FontManager {
    fonts: BTreeMap<String, Bytes>,
}

impl FontManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_font(&mut self, name: impl Into<String>, data: Bytes) {
        self.fonts.insert(name.into(), data);
    }

    /// Load every asset whose name starts with `prefix`.
    pub fn load_directory(&mut self, assets: &dyn AssetPackage, prefix: &str) {
        for name in assets.asset_names() {
            if name.len() > prefix.len() && name.starts_with(prefix) {
                match assets.load_asset(&name) {
                    Some(data) => self.add_font(name, data),
                    None => log::warn!("Font '{name}' is listed but could not be loaded"),
                }
            }
        }
    }

    pub fn font(&self, name: &str) -> Option<&Bytes> {
        self.fonts.get(name)
    }

    /// Font file for a face name. `Noto Sans Regular` matches `fonts/NotoSans-Regular.ttf`.
    pub fn find_font(&self, face_name: &str) -> Option<&str> {
        let simplify = |name: &str| -> String {
            name.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect()
        };
        let wanted = simplify(face_name);
        self.fonts.keys().map(String::as_str).find(|name| {
            let file_name = name.rsplit('/').next().unwrap_or(name);
            let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
            simplify(stem) == wanted
        })
    }

    pub fn font_names(&self) -> impl Iterator<Item = &str> {
        self.fonts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }
}

/// Decoded RGBA image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    /// Unpremultiplied RGBA, row by row.
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub fn decode(data: &[u8]) -> Result<Self, ImageError> {
        let image = image::load_from_memory(data)?.to_rgba8();
        Ok(Self {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        })
    }
}

/// Loads bitmaps from the assets, relative to the style directory.
pub struct BitmapManager {
    assets: Arc<dyn AssetPackage>,
    base_path: String,
    cache: Mutex<LruCache<String, Option<Arc<Bitmap>>>>,
}

impl BitmapManager {
    pub fn new(assets: Arc<dyn AssetPackage>, base_path: impl Into<String>) -> Self {
        Self {
            assets,
            base_path: base_path.into(),
            cache: Mutex::new(LruCache::new(BITMAP_CACHE_SIZE)),
        }
    }

    /// Asset path a bitmap name resolves to. Names spelling the same file share a path.
    pub fn asset_path(&self, name: &str) -> String {
        normalize_path(&format!("{}{name}", self.base_path))
    }

    /// Load and decode a bitmap. Failures are cached too, so a broken file is reported once.
    pub fn load_bitmap(&self, name: &str) -> Option<Arc<Bitmap>> {
        let path = self.asset_path(name);
        if let Some(bitmap) = lock(&self.cache).get(&path) {
            return bitmap.clone();
        }

        let bitmap = match self.assets.load_asset(&path) {
            Some(data) => match Bitmap::decode(&data) {
                Ok(bitmap) => Some(Arc::new(bitmap)),
                Err(err) => {
                    log::warn!("Could not decode bitmap '{path}': {err}");
                    None
                }
            },
            None => {
                log::warn!("Bitmap '{path}' not found");
                None
            }
        };
        lock(&self.cache).put(path, bitmap.clone());
        bitmap
    }
}

impl std::fmt::Debug for BitmapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitmapManager")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

/// Dash pattern, one row of the stroke atlas.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokePattern {
    pub id: u32,
    /// Alternating dash and gap lengths.
    pub dashes: Vec<f32>,
}

impl StrokePattern {
    pub fn length(&self) -> f32 {
        self.dashes.iter().sum()
    }
}

#[derive(Debug, Default)]
struct StrokeMapInner {
    ids: HashMap<String, u32>,
    patterns: Vec<Arc<StrokePattern>>,
}

/// Allocates atlas rows for dash patterns. Equal patterns share a row.
#[derive(Debug, Default)]
pub struct StrokeMap {
    inner: Mutex<StrokeMapInner>,
}

impl StrokeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dash array such as `"4, 2"` and return its row. `None` when the array is
    /// invalid or the atlas is full.
    pub fn load_stroke_pattern(&self, dasharray: &str) -> Option<u32> {
        let dashes: Vec<f32> = dasharray
            .split([',', ' '])
            .filter(|s| !s.is_empty())
            .map(|s| s.trim().parse::<f32>())
            .collect::<Result<_, _>>()
            .ok()?;
        if dashes.is_empty() || dashes.iter().any(|d| *d < 0.0) || dashes.iter().sum::<f32>() <= 0.0 {
            log::warn!("Invalid dash array '{dasharray}'");
            return None;
        }

        let key = dashes
            .iter()
            .map(f32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut inner = lock(&self.inner);
        if let Some(id) = inner.ids.get(&key) {
            return Some(*id);
        }
        let id = inner.patterns.len() as u32;
        if id >= STROKEMAP_SIZE {
            log::warn!("Stroke map is full, dropping dash array '{dasharray}'");
            return None;
        }
        inner.patterns.push(Arc::new(StrokePattern { id, dashes }));
        inner.ids.insert(key, id);
        Some(id)
    }

    pub fn stroke_pattern(&self, id: u32) -> Option<Arc<StrokePattern>> {
        lock(&self.inner).patterns.get(id as usize).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Placement of a bitmap in the glyph atlas.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub id: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub bitmap: Arc<Bitmap>,
}

#[derive(Debug, Default)]
struct GlyphMapInner {
    glyphs: HashMap<String, Arc<Glyph>>,
    shelf_x: u32,
    shelf_y: u32,
    shelf_height: u32,
    next_id: u32,
}

/// Packs marker and pattern bitmaps into a square atlas, shelf by shelf.
#[derive(Debug, Default)]
pub struct GlyphMap {
    inner: Mutex<GlyphMapInner>,
}

impl GlyphMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `bitmap` under `name`, or return the existing placement. `None` when the bitmap
    /// does not fit anymore.
    pub fn load_bitmap_glyph(&self, name: &str, bitmap: Arc<Bitmap>) -> Option<Arc<Glyph>> {
        let mut inner = lock(&self.inner);
        if let Some(glyph) = inner.glyphs.get(name) {
            return Some(glyph.clone());
        }

        let (width, height) = (bitmap.width, bitmap.height);
        if width > GLYPHMAP_SIZE || height > GLYPHMAP_SIZE {
            log::warn!("Bitmap '{name}' is too large for the glyph map");
            return None;
        }
        if inner.shelf_x + width > GLYPHMAP_SIZE {
            inner.shelf_y += inner.shelf_height;
            inner.shelf_x = 0;
            inner.shelf_height = 0;
        }
        if inner.shelf_y + height > GLYPHMAP_SIZE {
            log::warn!("Glyph map is full, dropping '{name}'");
            return None;
        }

        let glyph = Arc::new(Glyph {
            id: inner.next_id,
            x: inner.shelf_x,
            y: inner.shelf_y,
            width,
            height,
            bitmap,
        });
        inner.next_id += 1;
        inner.shelf_x += width;
        inner.shelf_height = inner.shelf_height.max(height);
        inner.glyphs.insert(name.to_owned(), glyph.clone());
        Some(glyph)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
