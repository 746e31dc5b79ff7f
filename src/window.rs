use std::iter::FusedIterator;

use image::imageops;
use image::{GenericImageView, GrayImage, SubImage};
use serde::{Deserialize, Serialize};

/// Classifier input size in level-local pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

/// A window at level-local offset `(x, y)`. The patch is clipped at the
/// right and bottom edges, so it can be smaller than the requested size.
pub struct Window<'a> {
    pub x: u32,
    pub y: u32,
    pub patch: SubImage<&'a GrayImage>,
}

impl Window<'_> {
    pub fn is_complete(&self, size: WindowSize) -> bool {
        let (w, h) = self.patch.dimensions();
        w == size.width && h == size.height
    }
}

/// Row-major scan over `0, step, 2*step, ...` in both axes.
pub struct SlidingWindows<'a> {
    image: &'a GrayImage,
    step: u32,
    size: WindowSize,
    x: u32,
    y: u32,
}

impl<'a> SlidingWindows<'a> {
    /// `step` must be positive.
    pub fn new(image: &'a GrayImage, step: u32, size: WindowSize) -> Self {
        debug_assert!(step > 0, "step must be positive");
        Self { image, step: step.max(1), size, x: 0, y: 0 }
    }

    /// Number of offsets the scan visits along each axis.
    pub fn grid(&self) -> (u32, u32) {
        (self.image.width().div_ceil(self.step), self.image.height().div_ceil(self.step))
    }

    fn remaining(&self) -> usize {
        let (cols, rows) = self.grid();
        if self.y >= self.image.height() || cols == 0 {
            return 0;
        }
        let row = (self.y / self.step) as usize;
        let col = (self.x / self.step) as usize;
        (rows as usize - row) * cols as usize - col
    }
}

impl<'a> Iterator for SlidingWindows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Window<'a>> {
        if self.y >= self.image.height() || self.image.width() == 0 {
            return None;
        }
        let (x, y) = (self.x, self.y);
        let patch = imageops::crop_imm(self.image, x, y, self.size.width, self.size.height);
        self.x = self.x.saturating_add(self.step);
        if self.x >= self.image.width() {
            self.x = 0;
            self.y = self.y.saturating_add(self.step);
        }
        Some(Window { x, y, patch })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for SlidingWindows<'_> {}

impl FusedIterator for SlidingWindows<'_> {}
