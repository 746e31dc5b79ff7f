use std::sync::Arc;

use image::GrayImage;

/// A patch classifier with a fixed input size.
///
/// `classify` receives a patch of exactly the configured window size and
/// returns raw per-class scores. Callers normalize them with [`softmax`].
pub trait Classifier {
    type Error;

    fn classify(&self, patch: &GrayImage) -> Result<Vec<f32>, Self::Error>;
}

impl<C: Classifier + ?Sized> Classifier for Arc<C> {
    type Error = C::Error;

    fn classify(&self, patch: &GrayImage) -> Result<Vec<f32>, Self::Error> {
        (**self).classify(patch)
    }
}

/// Numerically stable softmax. Empty input gives an empty distribution.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return logits.iter().map(|_| 0.0).collect();
    }
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Probability of `class` after softmax, or `None` if the output has no such class.
pub fn class_probability(logits: &[f32], class: usize) -> Option<f32> {
    if class >= logits.len() {
        return None;
    }
    softmax(logits).get(class).copied()
}
