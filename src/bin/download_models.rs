use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use reqwest::blocking::get;
use sha2::{Digest, Sha256};
use sliding_detector::models::{self, CLASSIFIER_KIND};

fn main() -> anyhow::Result<()> {
    let base = std::env::var("MODELS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models"));
    println!("models directory: {}", base.display());
    let kind_dir = base.join(CLASSIFIER_KIND);
    if !kind_dir.exists() {
        fs::create_dir_all(&kind_dir).context("failed to create models subdir")?;
        println!("created: {}", kind_dir.display());
    }

    let versions = models::inspect_models_dir(&base);
    if versions.is_empty() {
        println!("no metadata found under {}", kind_dir.display());
    }
    for version in versions {
        let dir = kind_dir.join(&version);
        let meta_path = dir.join("metadata.json");
        let Some(meta) = models::read_metadata(&meta_path) else {
            println!("skip: unreadable metadata {}", meta_path.display());
            continue;
        };
        if meta.url.is_empty() || meta.sha256.is_empty() || meta.sha256 == "<to-fill>" {
            println!("skip: provide valid url and sha256 in {}", meta_path.display());
            continue;
        }
        let model_path = dir.join("model.onnx");
        if model_path.exists() {
            println!("model exists: {}", model_path.display());
            continue;
        }
        println!("downloading {} -> {}", meta.url, model_path.display());
        let buf = get(&meta.url)
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.bytes())
            .with_context(|| format!("failed to download {}", meta.url))?
            .to_vec();
        let digest = hex::encode(Sha256::digest(&buf));
        if digest != meta.sha256 {
            bail!("checksum mismatch for {version}: {digest} != {}", meta.sha256);
        }
        fs::write(&model_path, &buf).with_context(|| format!("failed to write {}", model_path.display()))?;
        println!("saved {} ({} bytes)", model_path.display(), buf.len());
    }
    Ok(())
}
