use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

/// Subdirectory of the models dir that holds patch classifiers, one
/// `<version>/metadata.json` per model.
pub const CLASSIFIER_KIND: &str = "classifier";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputSpec {
    pub name: String,
    pub shape: Vec<i64>,
    pub layout: String,
    pub mean: Option<f32>,
    pub std: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub name: String,
    pub version: String,
    pub url: String,
    pub sha256: String,
    pub inputs: Vec<InputSpec>,
    pub license: String,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub positive_class: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSelection {
    pub version: String,
    pub path: String,
    pub metadata: ModelMetadata,
}

impl ModelSelection {
    /// `(width, height)` from an `[N, C, H, W]` input shape.
    pub fn input_size(&self) -> Option<(usize, usize)> {
        let spec = self.metadata.inputs.first()?;
        match spec.shape.as_slice() {
            [_, _, h, w] if *h > 0 && *w > 0 => Some((*w as usize, *h as usize)),
            _ => None,
        }
    }
}

/// Versions under `<base>/classifier` that carry a `metadata.json`, sorted.
pub fn inspect_models_dir(base_dir: impl AsRef<Path>) -> Vec<String> {
    let kind_dir: PathBuf = base_dir.as_ref().join(CLASSIFIER_KIND);
    let mut versions: Vec<String> = Vec::new();
    if let Ok(read) = fs::read_dir(&kind_dir) {
        for item in read.flatten() {
            if item.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
                let name = item.file_name().to_string_lossy().to_string();
                if kind_dir.join(&name).join("metadata.json").exists() {
                    versions.push(name);
                }
            }
        }
    }
    versions.sort();
    versions
}

pub fn read_metadata(path: &Path) -> Option<ModelMetadata> {
    let data = fs::read_to_string(path).ok()?;
    serde_json::from_str::<ModelMetadata>(&data).ok()
}

fn discover(base_dir: &Path) -> Vec<ModelSelection> {
    let kind_dir = base_dir.join(CLASSIFIER_KIND);
    let mut out: Vec<ModelSelection> = Vec::new();
    for version in inspect_models_dir(base_dir) {
        let dir = kind_dir.join(&version);
        let Some(metadata) = read_metadata(&dir.join("metadata.json")) else { continue };
        if let Some(existing) = ["model.onnx", "model.ort", "model"]
            .into_iter()
            .map(|fname| dir.join(fname))
            .find(|p| p.exists())
        {
            out.push(ModelSelection {
                version,
                path: existing.to_string_lossy().to_string(),
                metadata,
            });
        }
    }
    out
}

fn pick_best(mut items: Vec<ModelSelection>) -> Option<ModelSelection> {
    items.sort_by(|a, b| {
        let acc_a = a.metadata.accuracy.unwrap_or(f64::NEG_INFINITY);
        let acc_b = b.metadata.accuracy.unwrap_or(f64::NEG_INFINITY);
        acc_b
            .partial_cmp(&acc_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.version.cmp(&a.version))
    });
    items.into_iter().next()
}

/// Most accurate classifier with a model file present; ties go to the
/// highest version.
pub fn select_best_model(base_dir: impl AsRef<Path>) -> Option<ModelSelection> {
    pick_best(discover(base_dir.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_models_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sliding-detector-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(dir.join(CLASSIFIER_KIND)).unwrap();
        dir
    }

    fn write_model(base: &Path, version: &str, accuracy: Option<f64>, with_file: bool) {
        let dir = base.join(CLASSIFIER_KIND).join(version);
        fs::create_dir_all(&dir).unwrap();
        let meta = serde_json::json!({
            "name": "patch-net",
            "version": version,
            "url": "",
            "sha256": "<to-fill>",
            "inputs": [{ "name": "input", "shape": [1, 1, 36, 32], "layout": "NCHW" }],
            "license": "MIT",
            "accuracy": accuracy,
        });
        fs::write(dir.join("metadata.json"), meta.to_string()).unwrap();
        if with_file {
            fs::write(dir.join("model.onnx"), b"onnx").unwrap();
        }
    }

    #[test]
    fn picks_most_accurate_model_with_file() {
        let base = temp_models_dir();
        write_model(&base, "0001", Some(0.91), true);
        write_model(&base, "0002", Some(0.95), true);
        write_model(&base, "0003", Some(0.99), false);
        fs::create_dir_all(base.join(CLASSIFIER_KIND).join("scratch")).unwrap();

        assert_eq!(inspect_models_dir(&base), vec!["0001", "0002", "0003"]);
        let best = select_best_model(&base).unwrap();
        assert_eq!(best.version, "0002");
        assert_eq!(best.input_size(), Some((32, 36)));
        assert_eq!(best.metadata.positive_class, None);
        fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn ties_prefer_newest_version() {
        let base = temp_models_dir();
        write_model(&base, "0001", None, true);
        write_model(&base, "0002", None, true);
        assert_eq!(select_best_model(&base).unwrap().version, "0002");
        fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn empty_dir_selects_nothing() {
        let base = temp_models_dir();
        assert!(select_best_model(&base).is_none());
        assert!(inspect_models_dir(base.join("missing")).is_empty());
        fs::remove_dir_all(&base).unwrap();
    }
}
