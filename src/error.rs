use std::convert::Infallible;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("pyramid scale must be a finite value above 1, got {0}")]
    InvalidScale(f32),
    #[error("minimum pyramid size must be at least 1x1, got {width}x{height}")]
    InvalidMinSize { width: u32, height: u32 },
    #[error("step size must be positive")]
    InvalidStep,
    #[error("window size must be at least 1x1, got {width}x{height}")]
    InvalidWindow { width: u32, height: u32 },
    #[error("probability threshold must be within [0, 1], got {0}")]
    InvalidProbThreshold(f32),
    #[error("iou threshold must be within (0, 1], got {0}")]
    InvalidIouThreshold(f32),
    #[error("failed to read config file")]
    Io(#[from] io::Error),
    #[error("failed to parse config file")]
    Parse(#[from] serde_json::Error),
}

/// Failure while building a pyramid level.
#[derive(Debug, thiserror::Error)]
pub enum PyramidError<E> {
    #[error(transparent)]
    Resize(E),
    #[error("resize returned {got_width}x{got_height}, expected {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
}

/// Failure of a detection run. Classifier and resize errors are carried as-is.
#[derive(Debug, thiserror::Error)]
pub enum DetectError<C, R = Infallible> {
    #[error("invalid detection config")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Classifier(C),
    #[error(transparent)]
    Pyramid(PyramidError<R>),
    #[error("classifier returned {classes} classes, positive class index is {positive_class}")]
    MissingClass { classes: usize, positive_class: usize },
}
