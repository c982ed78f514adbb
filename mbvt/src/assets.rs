//! Byte-level storage of style assets: stylesheets, fonts and images.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;

/// Resolves named assets to raw bytes. Missing asset is a normal condition and is reported as
/// `None`, not as an error.
pub trait AssetPackage: Send + Sync {
    fn load_asset(&self, name: &str) -> Option<Bytes>;

    fn asset_names(&self) -> Vec<String>;
}

/// Assets kept in memory. Handy for bundled styles and for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssets {
    assets: BTreeMap<String, Bytes>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.assets.insert(name.into(), data.into());
    }

    pub fn with(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(name, data);
        self
    }
}

impl AssetPackage for MemoryAssets {
    fn load_asset(&self, name: &str) -> Option<Bytes> {
        self.assets.get(name).cloned()
    }

    fn asset_names(&self) -> Vec<String> {
        self.assets.keys().cloned().collect()
    }
}

/// Assets stored in a directory on disk. Asset names are paths relative to the directory, always
/// separated with `/`.
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    directory: PathBuf,
}

impl DirectoryAssets {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            directory: path.into(),
        }
    }

    fn collect_names(&self, dir: &Path, names: &mut Vec<String>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("Could not list assets in {}: {err}", dir.display());
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.collect_names(&path, names);
            } else if let Ok(relative) = path.strip_prefix(&self.directory) {
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                names.push(name);
            }
        }
    }
}

impl AssetPackage for DirectoryAssets {
    fn load_asset(&self, name: &str) -> Option<Bytes> {
        let path = self.directory.join(name);
        match fs::read(&path) {
            Ok(data) => Some(data.into()),
            Err(err) => {
                log::debug!("Asset {} not available: {err}", path.display());
                None
            }
        }
    }

    fn asset_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_names(&self.directory, &mut names);
        names.sort();
        names
    }
}

/// Directory part of an asset name, including the trailing separator. Empty for names without
/// a directory.
pub(crate) fn file_path(name: &str) -> &str {
    match name.rfind('/') {
        Some(index) => &name[..=index],
        None => "",
    }
}

/// Collapse `.` and `..` segments and duplicated separators. A trailing separator is kept.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else {
                    segments.push(segment);
                }
            }
            _ => segments.push(segment),
        }
    }

    let mut normalized = segments.join("/");
    if path.ends_with('/') && !normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}
