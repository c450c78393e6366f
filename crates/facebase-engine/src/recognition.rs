//! Recognition pipeline over a lazy image sequence.

use facebase_core::{ImageSequence, Prediction, Preprocessor, Sample};

/// Run `recognize` on every remaining image of `images`, in order.
///
/// The sequence advances exactly once per image. Images that cannot be
/// prepared yield `None` at their position instead of shrinking the result.
pub(crate) fn predict_all(
    images: &mut dyn ImageSequence,
    preprocessor: &Preprocessor,
    mut recognize: impl FnMut(&Sample) -> Option<Prediction>,
) -> Vec<Option<Prediction>> {
    let mut predictions = Vec::with_capacity(images.size());

    while !images.at_end() {
        let sample = images
            .image()
            .map(|image| preprocessor.prepare(&image))
            .unwrap_or_else(Sample::empty);
        images.proceed(1);

        let prediction = if sample.is_empty() {
            None
        } else {
            recognize(&sample).filter(Prediction::is_known)
        };
        predictions.push(prediction);
    }
    predictions
}

#[cfg(test)]
mod tests {
    use super::*;
    use facebase_core::{ImageList, SampleSpec};
    use image::DynamicImage;

    #[test]
    fn test_positions_are_preserved() {
        let mut images = ImageList::new(vec![
            DynamicImage::new_luma8(10, 10),
            DynamicImage::new_luma8(0, 0),
            DynamicImage::new_luma8(12, 12),
        ]);
        let mut calls = 0;
        let predictions = predict_all(&mut images, &Preprocessor::new(SampleSpec::gray(8)), |_| {
            calls += 1;
            Some(Prediction { label: calls, confidence: 0.0 })
        });

        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0].map(|p| p.label), Some(1));
        assert!(predictions[1].is_none());
        assert_eq!(predictions[2].map(|p| p.label), Some(2));
    }

    #[test]
    fn test_unknown_label_is_none() {
        let mut images = ImageList::new(vec![DynamicImage::new_luma8(10, 10)]);
        let predictions = predict_all(&mut images, &Preprocessor::new(SampleSpec::gray(8)), |_| {
            Some(Prediction::unknown(0.9))
        });
        assert_eq!(predictions, vec![None]);
    }
}
