//! Multi-scale sliding-window detection.
//!
//! [`collect_detections`] walks every pyramid level, classifies each complete
//! window and maps hits back to original-image coordinates. [`detect`] adds
//! non-maximum suppression on top of the full candidate set.

use image::GrayImage;
use serde::Serialize;
use tracing::{debug, info};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::config::DetectConfig;
use crate::error::DetectError;
use crate::infer::classifier::{Classifier, class_probability};
use crate::infer::{Detection, non_max_suppression};
use crate::pyramid::{Pyramid, Resize};
use crate::window::{SlidingWindows, WindowSize};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSummary {
    pub width: u32,
    pub height: u32,
    pub scale_factor: f32,
    /// Offsets visited, clipped ones included.
    pub windows: usize,
    /// Windows handed to the classifier.
    pub classified: usize,
    pub candidates: usize,
}

/// Unsuppressed candidates of a full multi-scale pass.
#[derive(Debug, Clone, Serialize)]
pub struct Scan {
    pub detections: Vec<Detection>,
    pub levels: Vec<LevelSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectSummary {
    pub detections: Vec<Detection>,
    pub candidates: usize,
    pub levels: Vec<LevelSummary>,
}

/// Hit in level-local coordinates.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x: u32,
    y: u32,
    score: f32,
}

fn to_original(c: Candidate, window: WindowSize, scale_factor: f32) -> Detection {
    Detection {
        x1: c.x as f32 * scale_factor,
        y1: c.y as f32 * scale_factor,
        x2: (c.x + window.width) as f32 * scale_factor,
        y2: (c.y + window.height) as f32 * scale_factor,
        score: c.score,
    }
}

fn score_patch<C: Classifier, RE>(
    classifier: &C,
    patch: &GrayImage,
    positive_class: usize,
) -> Result<f32, DetectError<C::Error, RE>> {
    let logits = classifier
        .classify(patch)
        .map_err(DetectError::<C::Error, RE>::Classifier)?;
    class_probability(&logits, positive_class).ok_or(DetectError::MissingClass {
        classes: logits.len(),
        positive_class,
    })
}

#[cfg(not(feature = "rayon"))]
fn scan_level<C, RE>(
    classifier: &C,
    level: &GrayImage,
    config: &DetectConfig,
) -> Result<(Vec<Candidate>, usize, usize), DetectError<C::Error, RE>>
where
    C: Classifier + Sync,
    C::Error: Send,
    RE: Send,
{
    let windows = SlidingWindows::new(level, config.step_size, config.window);
    let total = windows.len();
    let mut classified = 0;
    let mut hits = Vec::new();
    for window in windows.filter(|w| w.is_complete(config.window)) {
        let patch = window.patch.to_image();
        classified += 1;
        let score = score_patch::<C, RE>(classifier, &patch, config.positive_class)?;
        if score >= config.prob_threshold {
            hits.push(Candidate { x: window.x, y: window.y, score });
        }
    }
    Ok((hits, total, classified))
}

#[cfg(feature = "rayon")]
fn scan_level<C, RE>(
    classifier: &C,
    level: &GrayImage,
    config: &DetectConfig,
) -> Result<(Vec<Candidate>, usize, usize), DetectError<C::Error, RE>>
where
    C: Classifier + Sync,
    C::Error: Send,
    RE: Send,
{
    let windows = SlidingWindows::new(level, config.step_size, config.window);
    let total = windows.len();
    let offsets: Vec<(u32, u32)> = windows
        .filter(|w| w.is_complete(config.window))
        .map(|w| (w.x, w.y))
        .collect();
    let classified = offsets.len();
    // Collecting an indexed parallel iterator keeps scan order.
    let scored: Vec<Option<Candidate>> = offsets
        .into_par_iter()
        .map(|(x, y)| -> Result<Option<Candidate>, DetectError<C::Error, RE>> {
            let patch = image::imageops::crop_imm(level, x, y, config.window.width, config.window.height)
                .to_image();
            let score = score_patch::<C, RE>(classifier, &patch, config.positive_class)?;
            Ok((score >= config.prob_threshold).then_some(Candidate { x, y, score }))
        })
        .collect::<Result<_, _>>()?;
    Ok((scored.into_iter().flatten().collect(), total, classified))
}

/// Runs the classifier over every complete window of every pyramid level and
/// returns all hits at or above `prob_threshold` in original-image
/// coordinates, level by level.
///
/// Clipped edge windows are never classified. A window larger than a level
/// simply yields no candidates there. Classifier errors abort the scan and are
/// returned unchanged in [`DetectError::Classifier`]; a failed or wrong-sized
/// resize aborts it with [`DetectError::Pyramid`].
pub fn collect_detections<C, R>(
    classifier: &C,
    image: &GrayImage,
    config: &DetectConfig,
    resizer: R,
) -> Result<Scan, DetectError<C::Error, R::Error>>
where
    C: Classifier + Sync,
    C::Error: Send,
    R: Resize,
    R::Error: Send,
{
    config.validate()?;
    let mut detections = Vec::new();
    let mut levels = Vec::new();
    for level in Pyramid::new(image, config.pyramid_params(), resizer) {
        let level = level.map_err(DetectError::<C::Error, R::Error>::Pyramid)?;
        let (hits, windows, classified) = scan_level::<C, R::Error>(classifier, &level.image, config)?;
        let summary = LevelSummary {
            width: level.image.width(),
            height: level.image.height(),
            scale_factor: level.scale_factor,
            windows,
            classified,
            candidates: hits.len(),
        };
        debug!(
            "event" = "scan.level",
            width = summary.width,
            height = summary.height,
            scale_factor = summary.scale_factor,
            windows,
            classified,
            candidates = summary.candidates
        );
        levels.push(summary);
        detections.extend(
            hits.into_iter()
                .map(|c| to_original(c, config.window, level.scale_factor)),
        );
    }
    Ok(Scan { detections, levels })
}

/// Full pipeline: multi-scale scan followed by non-maximum suppression.
pub fn detect<C, R>(
    classifier: &C,
    image: &GrayImage,
    config: &DetectConfig,
    resizer: R,
) -> Result<Vec<Detection>, DetectError<C::Error, R::Error>>
where
    C: Classifier + Sync,
    C::Error: Send,
    R: Resize,
    R::Error: Send,
{
    detect_with_summary(classifier, image, config, resizer).map(|s| s.detections)
}

pub fn detect_with_summary<C, R>(
    classifier: &C,
    image: &GrayImage,
    config: &DetectConfig,
    resizer: R,
) -> Result<DetectSummary, DetectError<C::Error, R::Error>>
where
    C: Classifier + Sync,
    C::Error: Send,
    R: Resize,
    R::Error: Send,
{
    let scan = collect_detections(classifier, image, config, resizer)?;
    let candidates = scan.detections.len();
    let detections = non_max_suppression(scan.detections, config.iou_threshold, config.selection_order);
    info!(
        "event" = "detect.done",
        width = image.width(),
        height = image.height(),
        levels = scan.levels.len(),
        candidates,
        kept = detections.len()
    );
    Ok(DetectSummary { detections, candidates, levels: scan.levels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MinSize;
    use crate::error::PyramidError;
    use image::Luma;
    use image::imageops::FilterType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores a patch by its mean brightness: bright patches look positive.
    struct Brightness {
        calls: AtomicUsize,
        size: WindowSize,
    }

    impl Brightness {
        fn new(size: WindowSize) -> Self {
            Self { calls: AtomicUsize::new(0), size }
        }
    }

    impl Classifier for Brightness {
        type Error = String;

        fn classify(&self, patch: &GrayImage) -> Result<Vec<f32>, String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if patch.dimensions() != (self.size.width, self.size.height) {
                return Err(format!("bad patch {:?}", patch.dimensions()));
            }
            let mean = patch.pixels().map(|p| p[0] as f32).sum::<f32>() / patch.len() as f32;
            // logit gap of 20 at full white, -20 at black
            Ok(vec![0.0, (mean / 255.0) * 40.0 - 20.0])
        }
    }

    fn config(window: u32, step: u32) -> DetectConfig {
        DetectConfig {
            window: WindowSize { width: window, height: window },
            step_size: step,
            min_size: MinSize { width: window, height: window },
            ..DetectConfig::default()
        }
    }

    fn with_square(w: u32, h: u32, x0: u32, y0: u32, side: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let inside = x >= x0 && x < x0 + side && y >= y0 && y < y0 + side;
            Luma([if inside { 255 } else { 0 }])
        })
    }

    #[test]
    fn maps_hits_to_original_coordinates() {
        let c = Candidate { x: 4, y: 6, score: 1.0 };
        let win = WindowSize { width: 10, height: 12 };
        assert_eq!(to_original(c, win, 1.0), Detection::new(4.0, 6.0, 14.0, 18.0, 1.0));
        assert_eq!(to_original(c, win, 2.0), Detection::new(8.0, 12.0, 28.0, 36.0, 1.0));
    }

    #[test]
    fn finds_bright_square_at_base_level() {
        let img = with_square(40, 40, 8, 8, 8);
        let cfg = config(8, 4);
        let clf = Brightness::new(cfg.window);
        let scan = collect_detections(&clf, &img, &cfg, FilterType::Nearest).unwrap();
        assert_eq!(scan.levels[0].scale_factor, 1.0);
        assert!(scan.detections.iter().any(|d| (d.x1, d.y1, d.x2, d.y2) == (8.0, 8.0, 16.0, 16.0)));
        let kept = detect(&clf, &img, &cfg, FilterType::Nearest).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!((kept[0].x1, kept[0].y1, kept[0].x2, kept[0].y2), (8.0, 8.0, 16.0, 16.0));
    }

    #[test]
    fn never_classifies_clipped_windows() {
        let img = GrayImage::new(30, 22);
        let cfg = DetectConfig {
            min_size: MinSize { width: 100, height: 100 },
            ..config(8, 5)
        };
        let clf = Brightness::new(cfg.window);
        let scan = collect_detections(&clf, &img, &cfg, FilterType::Nearest).unwrap();
        // x in {0,5,10,15,20} fits, y in {0,5,10} fits
        assert_eq!(clf.calls.load(Ordering::Relaxed), 15);
        assert_eq!(scan.levels.len(), 1);
        assert_eq!(scan.levels[0].windows, 6 * 5);
        assert_eq!(scan.levels[0].classified, 15);
        assert!(scan.detections.is_empty());
    }

    #[test]
    fn window_larger_than_image_gives_nothing() {
        let img = with_square(20, 20, 0, 0, 20);
        let cfg = DetectConfig {
            min_size: MinSize { width: 10, height: 10 },
            ..config(32, 4)
        };
        let clf = Brightness::new(cfg.window);
        let scan = collect_detections(&clf, &img, &cfg, FilterType::Nearest).unwrap();
        assert!(scan.detections.is_empty());
        assert_eq!(clf.calls.load(Ordering::Relaxed), 0);
        assert!(scan.levels.iter().all(|l| l.classified == 0));
    }

    #[test]
    fn coarse_levels_scale_boxes_up() {
        let img = with_square(96, 96, 0, 0, 64);
        let cfg = DetectConfig {
            scale: 2.0,
            min_size: MinSize { width: 16, height: 16 },
            prob_threshold: 0.99,
            ..config(16, 16)
        };
        let clf = Brightness::new(cfg.window);
        let scan = collect_detections(&clf, &img, &cfg, FilterType::Nearest).unwrap();
        let factors: Vec<f32> = scan.levels.iter().map(|l| l.scale_factor).collect();
        assert_eq!(factors, vec![1.0, 2.0, 4.0]);
        // 96 -> 48 -> 24; the single complete window of the 24x24 level covers
        // the shrunken block and maps back four times larger.
        assert_eq!(scan.levels[2].classified, 1);
        assert_eq!(scan.levels[2].candidates, 1);
        let last = scan.detections.last().unwrap();
        assert_eq!((last.x1, last.y1, last.x2, last.y2), (0.0, 0.0, 64.0, 64.0));
        assert_eq!(scan.levels[0].candidates, 16);
        for d in &scan.detections {
            assert!(d.score >= 0.99);
        }
    }

    #[test]
    fn classifier_errors_propagate() {
        struct Failing;
        impl Classifier for Failing {
            type Error = String;
            fn classify(&self, _: &GrayImage) -> Result<Vec<f32>, String> {
                Err("model crashed".to_string())
            }
        }
        let img = GrayImage::new(40, 40);
        let err = detect(&Failing, &img, &config(8, 8), FilterType::Nearest).unwrap_err();
        match err {
            DetectError::Classifier(e) => assert_eq!(e, "model crashed"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_positive_class_is_reported() {
        struct OneClass;
        impl Classifier for OneClass {
            type Error = String;
            fn classify(&self, _: &GrayImage) -> Result<Vec<f32>, String> {
                Ok(vec![1.0])
            }
        }
        let img = GrayImage::new(16, 16);
        let err = detect(&OneClass, &img, &config(8, 8), FilterType::Nearest).unwrap_err();
        assert!(matches!(err, DetectError::MissingClass { classes: 1, positive_class: 1 }));
    }

    #[test]
    fn invalid_config_is_rejected_before_scanning() {
        let img = GrayImage::new(16, 16);
        let cfg = DetectConfig { scale: 0.5, ..config(8, 8) };
        let clf = Brightness::new(cfg.window);
        let err = detect(&clf, &img, &cfg, FilterType::Nearest).unwrap_err();
        assert!(matches!(err, DetectError::Config(_)));
        assert_eq!(clf.calls.load(Ordering::Relaxed), 0);
    }

    /// Positive exactly when the top-left pixel of the patch is lit.
    struct MarkedCorner;

    impl Classifier for MarkedCorner {
        type Error = String;

        fn classify(&self, patch: &GrayImage) -> Result<Vec<f32>, String> {
            let lit = patch.get_pixel(0, 0)[0] == 255;
            Ok(vec![0.0, if lit { 20.0 } else { -20.0 }])
        }
    }

    #[test]
    fn candidates_within_a_level_keep_scan_order() {
        let mut img = GrayImage::new(32, 32);
        let marks = [(16, 0), (0, 8), (24, 8), (8, 16), (24, 24)];
        for &(x, y) in &marks {
            img.put_pixel(x, y, Luma([255]));
        }
        let cfg = DetectConfig {
            min_size: MinSize { width: 100, height: 100 },
            ..config(8, 8)
        };
        let scan = collect_detections(&MarkedCorner, &img, &cfg, FilterType::Nearest).unwrap();
        assert_eq!(scan.levels.len(), 1);
        let origins: Vec<(f32, f32)> = scan.detections.iter().map(|d| (d.x1, d.y1)).collect();
        let expected: Vec<(f32, f32)> = marks.iter().map(|&(x, y)| (x as f32, y as f32)).collect();
        assert_eq!(origins, expected);
    }

    struct BrokenResize;

    impl Resize for BrokenResize {
        type Error = String;

        fn resize(&self, _: &GrayImage, _: u32, _: u32) -> Result<GrayImage, String> {
            Err("resampler unavailable".to_string())
        }
    }

    #[test]
    fn resize_errors_abort_the_scan() {
        let img = GrayImage::new(48, 48);
        let cfg = config(8, 8);
        let clf = Brightness::new(cfg.window);
        let err = detect(&clf, &img, &cfg, BrokenResize).unwrap_err();
        match err {
            DetectError::Pyramid(PyramidError::Resize(e)) => assert_eq!(e, "resampler unavailable"),
            other => panic!("unexpected error: {other:?}"),
        }
        // The base level is scanned before the first resize.
        assert_eq!(clf.calls.load(Ordering::Relaxed), 36);
    }
}
