#![doc = include_str!("../README.md")]
#![deny(clippy::unwrap_used, rustdoc::broken_intra_doc_links)]

pub mod assets;
mod compiler;
pub mod decoder;
mod error;
mod parameters;
pub mod position;
pub mod resources;
pub mod style;
pub mod tiles;
mod value;

pub use assets::{AssetPackage, DirectoryAssets, MemoryAssets};
pub use bytes::Bytes;
pub use compiler::{CompiledStyle, ResourceBindings, StyleSource, compile};
pub use decoder::reader::{ResolvedSymbolizer, StyledFeature, StyledLayer, StyledTile};
pub use decoder::{ChangeListener, DecodedFeature, DecoderOptions, VectorTileDecoder};
pub use error::Error;
pub use parameters::{DEFAULT_TILE_SIZE, ParameterStore, RuntimeSettings};
pub use position::{GeometryConverter, MapBounds, MapPos, TileGeometry, TilePos};
pub use style::{Color, Map};
pub use tiles::{MAX_SUPPORTED_ZOOM_LEVEL, TileId};
pub use value::{ParameterKind, Value};
