// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Places to keep named images.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::trace;

use super::{fits, Image, ImageError, ImageGrid};

/// Named image storage shared by the controller and all workers.
///
/// Implementations must be safe to use from many threads at once; workers
/// only ever touch images whose names are private to them.
pub trait ImageStore: Send + Sync {
    /// Write an image, replacing any existing image of the same name.
    fn write(&self, name: &str, image: &Image) -> Result<(), ImageError>;

    fn read(&self, name: &str) -> Result<Image, ImageError>;

    fn exists(&self, name: &str) -> bool;

    /// Delete an image. Deleting an image that doesn't exist is not an error.
    fn delete(&self, name: &str) -> Result<(), ImageError>;

    /// The names of all images starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, ImageError>;

    /// Create a zero-filled image with the given grid.
    fn create(&self, name: &str, grid: ImageGrid) -> Result<Image, ImageError> {
        grid.validate()?;
        let image = Image::zeros(grid);
        self.write(name, &image)?;
        Ok(image)
    }
}

/// An image store that lives in memory; useful when the engine and controller
/// share a process, and for testing.
#[derive(Debug, Default)]
pub struct MemoryImageStore {
    images: Mutex<HashMap<String, Image>>,
}

impl MemoryImageStore {
    pub fn new() -> MemoryImageStore {
        MemoryImageStore::default()
    }
}

impl ImageStore for MemoryImageStore {
    fn write(&self, name: &str, image: &Image) -> Result<(), ImageError> {
        trace!("Writing image '{name}'");
        self.images
            .lock()
            .unwrap()
            .insert(name.to_string(), image.clone());
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Image, ImageError> {
        self.images
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ImageError::NotFound(name.to_string()))
    }

    fn exists(&self, name: &str) -> bool {
        self.images.lock().unwrap().contains_key(name)
    }

    fn delete(&self, name: &str) -> Result<(), ImageError> {
        trace!("Deleting image '{name}'");
        self.images.lock().unwrap().remove(name);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, ImageError> {
        let mut names = self
            .images
            .lock()
            .unwrap()
            .keys()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect::<Vec<_>>();
        names.sort_unstable();
        Ok(names)
    }
}

/// An image store backed by a directory of FITS files. The image "name" is
/// stored as "name.fits".
#[derive(Debug, Clone)]
pub struct FitsImageStore {
    dir: PathBuf,
}

impl FitsImageStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<FitsImageStore, ImageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(FitsImageStore { dir })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.fits"))
    }
}

impl ImageStore for FitsImageStore {
    fn write(&self, name: &str, image: &Image) -> Result<(), ImageError> {
        let path = self.path(name);
        trace!("Writing image {}", path.display());
        fits::write_image(&path, image)?;
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Image, ImageError> {
        let path = self.path(name);
        if !path.exists() {
            return Err(ImageError::NotFound(name.to_string()));
        }
        Ok(fits::read_image(&path)?)
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    fn delete(&self, name: &str) -> Result<(), ImageError> {
        let path = self.path(name);
        if path.exists() {
            trace!("Deleting image {}", path.display());
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, ImageError> {
        let mut names = vec![];
        for entry in std::fs::read_dir(&self.dir)? {
            let file_name = entry?.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name.strip_suffix(".fits") {
                if name.starts_with(prefix) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort_unstable();
        Ok(names)
    }
}
