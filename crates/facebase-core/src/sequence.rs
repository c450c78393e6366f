//! Lazy image sequences and training data providers.
//!
//! Sequences are forward-only and finite. The engine reads the current image,
//! then advances exactly once per processed image.

use crate::types::Identity;
use image::DynamicImage;
use std::borrow::Cow;

/// A forward-only, finite sequence of face crops.
pub trait ImageSequence {
    /// Total number of images, consumed or not.
    fn size(&self) -> usize;

    fn at_end(&self) -> bool;

    /// Advance by `steps` images. Advancing past the end stays at the end.
    fn proceed(&mut self, steps: usize);

    /// The current image. `None` at the end or when the image cannot be produced.
    fn image(&self) -> Option<Cow<'_, DynamicImage>>;
}

/// In-memory image sequence.
#[derive(Debug, Clone, Default)]
pub struct ImageList {
    images: Vec<DynamicImage>,
    position: usize,
}

impl ImageList {
    pub fn new(images: Vec<DynamicImage>) -> Self {
        Self { images, position: 0 }
    }

    pub fn images(&self) -> &[DynamicImage] {
        &self.images
    }

    /// Start again from the first image.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Replace the contents and start again from the first image.
    pub fn set_images(&mut self, images: Vec<DynamicImage>) {
        self.images = images;
        self.position = 0;
    }
}

impl From<Vec<DynamicImage>> for ImageList {
    fn from(images: Vec<DynamicImage>) -> Self {
        Self::new(images)
    }
}

impl ImageSequence for ImageList {
    fn size(&self) -> usize {
        self.images.len()
    }

    fn at_end(&self) -> bool {
        self.position >= self.images.len()
    }

    fn proceed(&mut self, steps: usize) {
        self.position = (self.position + steps).min(self.images.len());
    }

    fn image(&self) -> Option<Cow<'_, DynamicImage>> {
        self.images.get(self.position).map(Cow::Borrowed)
    }
}

/// A sequence that never has images.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyImages;

impl ImageSequence for EmptyImages {
    fn size(&self) -> usize {
        0
    }

    fn at_end(&self) -> bool {
        true
    }

    fn proceed(&mut self, _steps: usize) {}

    fn image(&self) -> Option<Cow<'_, DynamicImage>> {
        None
    }
}

/// Source of training images per identity.
///
/// Returned sequences stay owned by the provider.
pub trait TrainingDataProvider {
    /// Images of `identity` not used for training before.
    fn new_images(&mut self, identity: &Identity) -> &mut dyn ImageSequence;

    /// Every known image of `identity`.
    fn images(&mut self, identity: &Identity) -> &mut dyn ImageSequence;
}

/// Provides a fixed image list for one identity and nothing for any other.
pub struct SimpleTrainingData {
    identity: i64,
    fresh: ImageList,
    all: ImageList,
    empty: EmptyImages,
}

impl SimpleTrainingData {
    pub fn new(identity: &Identity, images: Vec<DynamicImage>) -> Self {
        Self {
            identity: identity.id,
            fresh: ImageList::new(images.clone()),
            all: ImageList::new(images),
            empty: EmptyImages,
        }
    }
}

impl TrainingDataProvider for SimpleTrainingData {
    fn new_images(&mut self, identity: &Identity) -> &mut dyn ImageSequence {
        if identity.id == self.identity {
            &mut self.fresh
        } else {
            &mut self.empty
        }
    }

    fn images(&mut self, identity: &Identity) -> &mut dyn ImageSequence {
        if identity.id == self.identity {
            self.all.rewind();
            &mut self.all
        } else {
            &mut self.empty
        }
    }
}
