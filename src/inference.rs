use std::sync::Arc;

use tracing::{info, warn};
use sliding_detector::models::{ModelSelection, select_best_model};
use sliding_detector::{Classifier, DetectConfig, WindowSize};
#[cfg(feature = "onnx")]
use sliding_detector::infer::onnx::OnnxClassifier;

pub type SharedClassifier = Arc<dyn Classifier<Error = anyhow::Error> + Send + Sync>;

/// Erases a concrete classifier error into `anyhow::Error`.
#[cfg(feature = "onnx")]
struct Erased<C>(C);

#[cfg(feature = "onnx")]
impl<C> Classifier for Erased<C>
where
    C: Classifier,
    C::Error: std::error::Error + Send + Sync + 'static,
{
    type Error = anyhow::Error;

    fn classify(&self, patch: &image::GrayImage) -> Result<Vec<f32>, anyhow::Error> {
        self.0.classify(patch).map_err(anyhow::Error::from)
    }
}

pub struct InferenceContext {
    pub selected_model: Option<ModelSelection>,
    pub classifier: Option<SharedClassifier>,
    pub config: DetectConfig,
}

impl InferenceContext {
    pub fn new(models_dir: &str, mut config: DetectConfig) -> Self {
        let selected = select_best_model(models_dir);
        if selected.is_none() {
            warn!("event" = "models.missing", "message" = "no classifier found in models directory", dir = models_dir);
        }
        if let Some(sel) = selected.as_ref() {
            // The window must match the model's fixed input.
            if let Some((w, h)) = sel.input_size() {
                config.window = WindowSize { width: w as u32, height: h as u32 };
            }
            if let Some(class) = sel.metadata.positive_class {
                config.positive_class = class;
            }
            info!("event" = "models.selected", version = %sel.version, window_width = config.window.width, window_height = config.window.height);
        }

        #[cfg(feature = "onnx")]
        let _ = ort::init().with_name("sliding-detector").commit();

        #[cfg(feature = "onnx")]
        let classifier: Option<SharedClassifier> = selected.as_ref().and_then(|sel| {
            let (w, h) = (config.window.width as usize, config.window.height as usize);
            match OnnxClassifier::from_file(&sel.path, w, h) {
                Ok(mut clf) => {
                    if let Some(spec) = sel.metadata.inputs.first() {
                        if let Some(m) = spec.mean { clf.mean = m; }
                        if let Some(s) = spec.std { clf.std = s; }
                        clf.input_name = spec.name.clone();
                    }
                    info!("event" = "classifier.ready", width = w, height = h);
                    Some(Arc::new(Erased(clf)) as SharedClassifier)
                }
                Err(err) => {
                    warn!("event" = "classifier.fail", error = %err);
                    None
                }
            }
        });

        #[cfg(not(feature = "onnx"))]
        let classifier: Option<SharedClassifier> = {
            warn!("event" = "classifier.missing", "message" = "built without the onnx feature");
            None
        };

        InferenceContext { selected_model: selected, classifier, config }
    }
}
