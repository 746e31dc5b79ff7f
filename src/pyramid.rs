//! Lazy geometric image pyramid.
//!
//! Each level is the previous one shrunk by a constant `scale`, floor-rounded,
//! until either side would fall below the configured minimum.

use std::convert::Infallible;
use std::iter::FusedIterator;
use std::sync::Arc;

use image::GrayImage;
use image::imageops::{self, FilterType};
use tracing::debug;

use crate::error::PyramidError;

/// Resampling primitive used to build pyramid levels.
pub trait Resize {
    type Error;

    fn resize(&self, image: &GrayImage, width: u32, height: u32) -> Result<GrayImage, Self::Error>;
}

impl Resize for FilterType {
    type Error = Infallible;

    fn resize(&self, image: &GrayImage, width: u32, height: u32) -> Result<GrayImage, Infallible> {
        Ok(imageops::resize(image, width, height, *self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PyramidParams {
    /// Shrink factor between consecutive levels, strictly above 1.
    pub scale: f32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for PyramidParams {
    fn default() -> Self {
        Self { scale: 1.5, min_width: 30, min_height: 30 }
    }
}

/// One pyramid level. The buffer is shared with the iterator, which resamples
/// the next level from it.
pub struct PyramidLevel {
    pub image: Arc<GrayImage>,
    /// Original height over level height; 1.0 for the first level.
    pub scale_factor: f32,
}

/// Iterator over pyramid levels, starting with a copy of the original.
///
/// A resize failure, or a resized image of the wrong size, is yielded once as
/// an error and ends the sequence.
pub struct Pyramid<'a, R> {
    original: &'a GrayImage,
    params: PyramidParams,
    resizer: R,
    current: Option<Arc<GrayImage>>,
    started: bool,
}

impl<'a, R: Resize> Pyramid<'a, R> {
    pub fn new(original: &'a GrayImage, params: PyramidParams, resizer: R) -> Self {
        Self { original, params, resizer, current: None, started: false }
    }

    fn level(&mut self, image: GrayImage, scale_factor: f32) -> PyramidLevel {
        debug!("event" = "pyramid.level", width = image.width(), height = image.height(), scale_factor);
        let image = Arc::new(image);
        self.current = Some(Arc::clone(&image));
        PyramidLevel { image, scale_factor }
    }
}

impl<R: Resize> Iterator for Pyramid<'_, R> {
    type Item = Result<PyramidLevel, PyramidError<R::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            return Some(Ok(self.level(self.original.clone(), 1.0)));
        }
        let current = self.current.take()?;
        let new_width = (current.width() as f32 / self.params.scale).floor() as u32;
        let new_height = (current.height() as f32 / self.params.scale).floor() as u32;
        if new_width < self.params.min_width
            || new_height < self.params.min_height
            || new_width == 0
            || new_height == 0
        {
            return None;
        }
        let next = match self.resizer.resize(&current, new_width, new_height) {
            Ok(next) => next,
            Err(err) => return Some(Err(PyramidError::Resize(err))),
        };
        if next.dimensions() != (new_width, new_height) {
            return Some(Err(PyramidError::SizeMismatch {
                width: new_width,
                height: new_height,
                got_width: next.width(),
                got_height: next.height(),
            }));
        }
        let scale_factor = self.original.height() as f32 / new_height as f32;
        Some(Ok(self.level(next, scale_factor)))
    }
}

impl<R: Resize> FusedIterator for Pyramid<'_, R> {}
