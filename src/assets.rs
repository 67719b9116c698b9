use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::ElementDrawError;

/// Decoded dimensions plus the original encoded bytes of a label image.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub name: String,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Named raster assets, looked up in memory first and then in the image directory.
#[derive(Debug, Clone, Default)]
pub struct ImageStore {
    dir: Option<PathBuf>,
    memory: HashMap<String, Vec<u8>>,
}

impl ImageStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            memory: HashMap::new(),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.memory.insert(name.into(), data);
    }

    pub fn load(&self, name: &str) -> Result<LoadedImage, ElementDrawError> {
        let data = self.read_bytes(name)?;
        let decoded =
            image::load_from_memory(&data).map_err(|err| ElementDrawError::UndecodableImage {
                name: name.to_string(),
                reason: err.to_string(),
            })?;
        Ok(LoadedImage {
            name: name.to_string(),
            width: decoded.width(),
            height: decoded.height(),
            data,
        })
    }

    fn read_bytes(&self, name: &str) -> Result<Vec<u8>, ElementDrawError> {
        if let Some(data) = self.memory.get(name) {
            return Ok(data.clone());
        }
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.trim().is_empty() || escapes {
            return Err(ElementDrawError::InvalidAssetName(name.to_string()));
        }
        let Some(dir) = self.dir.as_ref() else {
            return Err(ElementDrawError::MissingAsset(name.to_string()));
        };
        let path = dir.join(relative);
        if !path.is_file() {
            return Err(ElementDrawError::MissingAsset(name.to_string()));
        }
        Ok(fs::read(path)?)
    }
}
