//! Image files on disk, decoded lazily.

use facebase_core::{EmptyImages, Identity, ImageSequence, TrainingDataProvider};
use image::DynamicImage;
use std::borrow::Cow;
use std::path::PathBuf;

/// Forward-only sequence over image files. Each file is decoded when it
/// becomes the current image; undecodable files yield no image.
pub struct FileImages {
    paths: Vec<PathBuf>,
    position: usize,
}

impl FileImages {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths, position: 0 }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }
}

impl ImageSequence for FileImages {
    fn size(&self) -> usize {
        self.paths.len()
    }

    fn at_end(&self) -> bool {
        self.position >= self.paths.len()
    }

    fn proceed(&mut self, steps: usize) {
        self.position = (self.position + steps).min(self.paths.len());
    }

    fn image(&self) -> Option<Cow<'_, DynamicImage>> {
        let path = self.paths.get(self.position)?;
        match image::open(path) {
            Ok(image) => Some(Cow::Owned(image)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot decode image");
                None
            }
        }
    }
}

/// Training images of one identity, read from files.
pub struct FileTrainingData {
    identity: i64,
    files: FileImages,
    empty: EmptyImages,
}

impl FileTrainingData {
    pub fn new(identity: &Identity, paths: Vec<PathBuf>) -> Self {
        Self {
            identity: identity.id,
            files: FileImages::new(paths),
            empty: EmptyImages,
        }
    }
}

impl TrainingDataProvider for FileTrainingData {
    fn new_images(&mut self, identity: &Identity) -> &mut dyn ImageSequence {
        if identity.id == self.identity {
            &mut self.files
        } else {
            &mut self.empty
        }
    }

    fn images(&mut self, identity: &Identity) -> &mut dyn ImageSequence {
        if identity.id == self.identity {
            self.files.rewind();
            &mut self.files
        } else {
            &mut self.empty
        }
    }
}
