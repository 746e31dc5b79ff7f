//! Multi-scale sliding-window object detection.
//!
//! An image pyramid is scanned with a fixed-size window, every complete window
//! is scored by a patch [`Classifier`], hits are mapped back to original-image
//! coordinates and duplicates are collapsed with greedy non-maximum
//! suppression.

pub mod config;
pub mod detect;
pub mod error;
pub mod infer;
pub mod models;
pub mod pyramid;
pub mod window;

pub use config::{DetectConfig, DetectOverrides, MinSize};
pub use detect::{DetectSummary, LevelSummary, Scan, collect_detections, detect, detect_with_summary};
pub use error::{ConfigError, DetectError, PyramidError};
pub use infer::classifier::{Classifier, class_probability, softmax};
pub use infer::{Detection, SelectionOrder, intersection_over_union, non_max_suppression};
pub use pyramid::{Pyramid, PyramidLevel, PyramidParams, Resize};
pub use window::{SlidingWindows, Window, WindowSize};
