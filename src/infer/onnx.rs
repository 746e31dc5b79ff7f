use std::path::Path;
use std::sync::Mutex;

use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::infer::classifier::Classifier;

#[derive(Debug, thiserror::Error)]
pub enum OnnxError {
    #[error(transparent)]
    Runtime(#[from] ort::Error),
    #[error("patch is {got_width}x{got_height}, classifier expects {width}x{height}")]
    InputMismatch {
        width: usize,
        height: usize,
        got_width: u32,
        got_height: u32,
    },
    #[error("classifier produced no output tensor")]
    MissingOutput,
    #[error("session lock poisoned")]
    Poisoned,
}

/// Patch classifier backed by an ONNX graph taking `[1, 1, H, W]` floats and
/// producing one row of class scores.
pub struct OnnxClassifier {
    pub session: Mutex<Session>,
    pub input_width: usize,
    pub input_height: usize,
    pub mean: f32,
    pub std: f32,
    pub input_name: String,
}

impl OnnxClassifier {
    pub fn new(session: Session, input_width: usize, input_height: usize) -> Self {
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input".to_string());
        Self {
            session: Mutex::new(session),
            input_width,
            input_height,
            mean: 0.0,
            std: 1.0,
            input_name,
        }
    }

    pub fn from_file(path: impl AsRef<Path>, input_width: usize, input_height: usize) -> Result<Self, OnnxError> {
        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(path)?;
        Ok(Self::new(session, input_width, input_height))
    }

    fn tensor(&self, patch: &GrayImage) -> Array4<f32> {
        let (w, h) = (self.input_width, self.input_height);
        Array4::from_shape_fn((1, 1, h, w), |(_, _, y, x)| {
            let v = patch.get_pixel(x as u32, y as u32)[0] as f32 / 255.0;
            (v - self.mean) / self.std
        })
    }
}

impl Classifier for OnnxClassifier {
    type Error = OnnxError;

    fn classify(&self, patch: &GrayImage) -> Result<Vec<f32>, OnnxError> {
        let (pw, ph) = patch.dimensions();
        if pw as usize != self.input_width || ph as usize != self.input_height {
            return Err(OnnxError::InputMismatch {
                width: self.input_width,
                height: self.input_height,
                got_width: pw,
                got_height: ph,
            });
        }
        let input = Tensor::from_array(self.tensor(patch))?;
        let mut session = self.session.lock().map_err(|_| OnnxError::Poisoned)?;
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input])?;
        let (_, value) = outputs.iter().next().ok_or(OnnxError::MissingOutput)?;
        let (_shape, data) = value.try_extract_tensor::<f32>()?;
        Ok(data.to_vec())
    }
}
