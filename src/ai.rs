use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_onnx::{onnx, read_file, simple_eval};
use hf_hub::api::sync::Api;
use image::imageops::FilterType;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::errors::{HatCheckError, HatCheckResult};
use crate::frame::Frame;
use crate::scores::{ScoreEntry, ScoreSet, Vocabulary};
use crate::scoring::Scorer;
use crate::tokenizer::{Batch, ClipTokenizer};

const INPUT_SIZE: u32 = 224;
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];
const LOGITS_OUTPUT: &str = "logits_per_image";

/// Zero-shot image classifier backed by a CLIP ONNX export.
pub struct ClipScorer {
    model: Arc<onnx::ModelProto>,
    tokenizer: ClipTokenizer,
    template: String,
    device: Device,
    inference: Arc<Semaphore>,
}

impl ClipScorer {
    /// Resolves the model, vocabulary and merges files (local paths first,
    /// then the hub) and parses them. Blocking.
    pub fn load(cfg: &ModelConfig) -> HatCheckResult<Self> {
        let model_file = std::env::var("HATCHECK_MODEL").unwrap_or_else(|_| cfg.file.clone());
        let repo = std::env::var("HATCHECK_MODEL_REPO").unwrap_or_else(|_| cfg.repo.clone());

        let model_path = resolve_file(&repo, &model_file)?;
        let vocab_path = resolve_file(&repo, &cfg.vocab_file)?;
        let merges_path = resolve_file(&repo, &cfg.merges_file)?;

        let model = read_file(&model_path)
            .map_err(|e| HatCheckError::ModelLoad(format!("{}: {e}", model_path.display())))?;
        if model.graph.is_none() {
            return Err(HatCheckError::ModelLoad("model graph missing".into()));
        }
        let tokenizer = ClipTokenizer::from_files(&vocab_path, &merges_path)
            .map_err(|e| HatCheckError::ModelLoad(format!("tokenizer: {e}")))?;
        info!(path = %model_path.display(), "CLIP model loaded");

        Ok(Self {
            model: Arc::new(model),
            tokenizer,
            template: cfg.hypothesis_template.clone(),
            device: Device::Cpu,
            inference: Arc::new(Semaphore::new(1)),
        })
    }

    fn prompts(&self, vocabulary: &Vocabulary) -> Vec<String> {
        vocabulary
            .labels()
            .iter()
            .map(|label| self.template.replace("{}", label))
            .collect()
    }
}

#[async_trait]
impl Scorer for ClipScorer {
    async fn classify(&self, frame: &Frame, vocabulary: &Vocabulary) -> HatCheckResult<ScoreSet> {
        let batch = self.tokenizer.encode_batch(&self.prompts(vocabulary))?;
        let labels = vocabulary.labels().to_vec();
        let frame = frame.clone();
        let model = self.model.clone();
        let device = self.device.clone();

        // The permit travels into the blocking task so an abandoned call
        // still holds it until inference actually finishes.
        let permit = self
            .inference
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| HatCheckError::Scoring(format!("inference gate closed: {e}")))?;

        tokio::task::spawn_blocking(move || -> HatCheckResult<ScoreSet> {
            let _permit = permit;
            let pixels = preprocess(&frame, &device)?;
            let probs = run_clip(&model, pixels, &batch, &device)?;
            Ok(rank(labels, probs))
        })
        .await
        .map_err(|e| HatCheckError::Scoring(format!("join: {e}")))?
    }
}

fn resolve_file(repo: &str, filename: &str) -> HatCheckResult<PathBuf> {
    if Path::new(filename).exists() {
        return Ok(PathBuf::from(filename));
    }
    debug!(repo, filename, "fetching model file from hub");
    Api::new()
        .and_then(|api| api.model(repo.to_string()).get(filename))
        .map_err(|e| HatCheckError::ModelLoad(format!("failed to download {filename}: {e}")))
}

fn scoring_err(e: candle_core::Error) -> HatCheckError {
    HatCheckError::Scoring(e.to_string())
}

/// Shortest side to 224 (bicubic), centre crop, CLIP normalisation, NCHW.
fn preprocess(frame: &Frame, device: &Device) -> HatCheckResult<Tensor> {
    let img = frame
        .decode()
        .map_err(|e| HatCheckError::Scoring(format!("frame decode: {e}")))?;
    let (w, h) = (img.width().max(1), img.height().max(1));
    let scale = INPUT_SIZE as f32 / w.min(h) as f32;
    let nw = ((w as f32 * scale).round() as u32).max(INPUT_SIZE);
    let nh = ((h as f32 * scale).round() as u32).max(INPUT_SIZE);
    let resized = img.resize_exact(nw, nh, FilterType::CatmullRom);
    let cropped = resized.crop_imm(
        (nw - INPUT_SIZE) / 2,
        (nh - INPUT_SIZE) / 2,
        INPUT_SIZE,
        INPUT_SIZE,
    );
    let data = cropped.into_rgb8().into_raw();

    let size = INPUT_SIZE as usize;
    let mean = Tensor::new(&CLIP_MEAN, device)
        .and_then(|t| t.reshape((3, 1, 1)))
        .map_err(scoring_err)?;
    let std = Tensor::new(&CLIP_STD, device)
        .and_then(|t| t.reshape((3, 1, 1)))
        .map_err(scoring_err)?;
    Tensor::from_vec(data, (size, size, 3), device)
        .and_then(|t| t.permute((2, 0, 1)))
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.affine(1.0 / 255.0, 0.0))
        .and_then(|t| t.broadcast_sub(&mean))
        .and_then(|t| t.broadcast_div(&std))
        .and_then(|t| t.unsqueeze(0))
        .map_err(scoring_err)
}

fn run_clip(
    model: &onnx::ModelProto,
    pixels: Tensor,
    batch: &Batch,
    device: &Device,
) -> HatCheckResult<Vec<f32>> {
    let graph = model
        .graph
        .as_ref()
        .ok_or_else(|| HatCheckError::Scoring("model graph missing".into()))?;
    let shape = (batch.rows, batch.seq_len);

    let mut inputs = HashMap::new();
    for input in &graph.input {
        let tensor = match input.name.as_str() {
            "pixel_values" => pixels.clone(),
            "input_ids" => Tensor::from_vec(batch.ids.clone(), shape, device).map_err(scoring_err)?,
            "attention_mask" => {
                Tensor::from_vec(batch.attention_mask.clone(), shape, device).map_err(scoring_err)?
            }
            other => {
                return Err(HatCheckError::Scoring(format!("unexpected model input {other}")));
            }
        };
        inputs.insert(input.name.clone(), tensor);
    }

    let mut outputs = simple_eval(model, inputs).map_err(scoring_err)?;
    let logits = outputs
        .remove(LOGITS_OUTPUT)
        .ok_or_else(|| HatCheckError::Scoring(format!("model output {LOGITS_OUTPUT} missing")))?;
    let logits = logits
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(scoring_err)?;
    if logits.len() != batch.rows {
        return Err(HatCheckError::Scoring(format!(
            "expected {} logits, got {}",
            batch.rows,
            logits.len()
        )));
    }
    Ok(softmax(&logits))
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Pairs labels with probabilities, highest first.
fn rank(labels: Vec<String>, probs: Vec<f32>) -> ScoreSet {
    let mut scores: ScoreSet = labels
        .into_iter()
        .zip(probs)
        .map(|(label, score)| ScoreEntry { label, score })
        .collect();
    scores.sort_by(|a, b| b.score.total_cmp(&a.score));
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[2.0, 1.0, 0.1]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);
    }

    #[test]
    fn rank_orders_by_descending_score() {
        let labels = vec!["head".to_string(), "hands".to_string(), "hat".to_string()];
        let ranked = rank(labels, vec![0.2, 0.1, 0.7]);
        let order: Vec<_> = ranked.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(order, ["hat", "head", "hands"]);
    }

    #[test]
    fn preprocess_produces_clip_input_shape() {
        let img = image::RgbImage::from_pixel(320, 240, image::Rgb([128, 64, 32]));
        let frame = Frame::from_rgb(&img).unwrap();
        let tensor = preprocess(&frame, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
    }
}
