use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::infer::SelectionOrder;
use crate::pyramid::PyramidParams;
use crate::window::WindowSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinSize {
    pub width: u32,
    pub height: u32,
}

impl Default for MinSize {
    fn default() -> Self {
        Self { width: 30, height: 30 }
    }
}

/// Parameters of one detection run: pyramid, scan and suppression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectConfig {
    pub scale: f32,
    pub min_size: MinSize,
    pub window: WindowSize,
    pub step_size: u32,
    pub prob_threshold: f32,
    pub iou_threshold: f32,
    pub positive_class: usize,
    pub selection_order: SelectionOrder,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            scale: 1.5,
            min_size: MinSize::default(),
            window: WindowSize { width: 36, height: 36 },
            step_size: 4,
            prob_threshold: 0.999,
            iou_threshold: 0.2,
            positive_class: 1,
            selection_order: SelectionOrder::HighestFirst,
        }
    }
}

impl DetectConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config: DetectConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scale.is_finite() || self.scale <= 1.0 {
            return Err(ConfigError::InvalidScale(self.scale));
        }
        if self.min_size.width == 0 || self.min_size.height == 0 {
            return Err(ConfigError::InvalidMinSize {
                width: self.min_size.width,
                height: self.min_size.height,
            });
        }
        if self.step_size == 0 {
            return Err(ConfigError::InvalidStep);
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::InvalidWindow {
                width: self.window.width,
                height: self.window.height,
            });
        }
        if !(0.0..=1.0).contains(&self.prob_threshold) {
            return Err(ConfigError::InvalidProbThreshold(self.prob_threshold));
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(ConfigError::InvalidIouThreshold(self.iou_threshold));
        }
        Ok(())
    }

    pub fn pyramid_params(&self) -> PyramidParams {
        PyramidParams {
            scale: self.scale,
            min_width: self.min_size.width,
            min_height: self.min_size.height,
        }
    }

    pub fn with_overrides(&self, overrides: &DetectOverrides) -> DetectConfig {
        let mut config = self.clone();
        if let Some(v) = overrides.scale { config.scale = v; }
        if let Some(v) = overrides.step_size { config.step_size = v; }
        if let Some(v) = overrides.prob_threshold { config.prob_threshold = v; }
        if let Some(v) = overrides.iou_threshold { config.iou_threshold = v; }
        if let Some(v) = overrides.selection_order { config.selection_order = v; }
        config
    }
}

/// Per-request adjustments on top of the active config. The window size and
/// positive class are tied to the loaded classifier and cannot be overridden.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectOverrides {
    #[serde(default)]
    pub scale: Option<f32>,
    #[serde(default)]
    pub step_size: Option<u32>,
    #[serde(default)]
    pub prob_threshold: Option<f32>,
    #[serde(default)]
    pub iou_threshold: Option<f32>,
    #[serde(default)]
    pub selection_order: Option<SelectionOrder>,
}
