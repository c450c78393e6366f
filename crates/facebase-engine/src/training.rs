//! Training coordination: turn provider images into labelled samples.

use facebase_core::{ImageSequence, Preprocessor, Sample};
use serde::Serialize;

/// Outcome of one training batch, by identity id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrainingReport {
    /// Identities whose samples reached the recognizer.
    pub trained: Vec<i64>,
    /// Identities left out because no image could be prepared, training
    /// failed, or the trained records could not be saved.
    pub skipped: Vec<i64>,
}

impl TrainingReport {
    pub fn is_empty(&self) -> bool {
        self.trained.is_empty() && self.skipped.is_empty()
    }
}

/// Samples prepared from one identity's images.
#[derive(Debug, Default)]
pub(crate) struct Gathered {
    pub samples: Vec<Sample>,
    pub failed: usize,
}

/// Prepare every remaining image of `images`, advancing once per image.
/// Images that cannot be produced or prepared are counted and skipped.
pub(crate) fn gather(images: &mut dyn ImageSequence, preprocessor: &Preprocessor) -> Gathered {
    let mut gathered = Gathered::default();

    while !images.at_end() {
        let sample = images
            .image()
            .map(|image| preprocessor.prepare(&image))
            .unwrap_or_else(Sample::empty);
        images.proceed(1);

        if sample.is_empty() {
            gathered.failed += 1;
        } else {
            gathered.samples.push(sample);
        }
    }
    gathered
}

/// Training under debug or test contexts only touches the in-memory model.
pub(crate) fn persists(context: &str) -> bool {
    let context = context.to_lowercase();
    !(context.contains("debug") || context.contains("test"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use facebase_core::{ImageList, SampleSpec};
    use image::DynamicImage;

    #[test]
    fn test_gather_skips_failures() {
        let mut images = ImageList::new(vec![
            DynamicImage::new_luma8(20, 20),
            DynamicImage::new_luma8(0, 0),
            DynamicImage::new_rgb8(40, 30),
        ]);
        let gathered = gather(&mut images, &Preprocessor::new(SampleSpec::gray(16)));

        assert_eq!(gathered.samples.len(), 2);
        assert_eq!(gathered.failed, 1);
        assert!(gathered.samples.iter().all(|s| s.matches(SampleSpec::gray(16))));
        assert!(images.at_end());
    }

    #[test]
    fn test_gather_empty_sequence() {
        let mut images = ImageList::default();
        let gathered = gather(&mut images, &Preprocessor::new(SampleSpec::gray(16)));
        assert!(gathered.samples.is_empty());
        assert_eq!(gathered.failed, 0);
    }

    #[test]
    fn test_persists() {
        assert!(persists("albums"));
        assert!(persists("t1"));
        assert!(!persists("Debug run"));
        assert!(!persists("unit-TEST"));
    }
}
