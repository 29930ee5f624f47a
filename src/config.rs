use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{env, fs, path::PathBuf};
use tracing::{debug, warn};

use crate::classification::LoopSettings;
use crate::errors::HatCheckResult;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub camera_index: u32,
    pub vocabulary: Vec<String>,
    pub model: ModelConfig,
    pub tick_delay_ms: u64,
    pub scoring_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_index: 0,
            vocabulary: vec!["head".into(), "hands".into(), "hat".into()],
            model: ModelConfig::default(),
            tick_delay_ms: 16,
            scoring_timeout_ms: None,
        }
    }
}

impl Config {
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            tick_delay: Duration::from_millis(self.tick_delay_ms),
            scoring_timeout: self.scoring_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub repo: String,
    pub file: String,
    pub vocab_file: String,
    pub merges_file: String,
    /// Prompt each concept is substituted into, at `{}`.
    pub hypothesis_template: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            repo: "Xenova/clip-vit-base-patch32".into(),
            file: "onnx/model.onnx".into(),
            vocab_file: "vocab.json".into(),
            merges_file: "merges.txt".into(),
            hypothesis_template: "This is a photo of {}".into(),
        }
    }
}

fn config_path() -> PathBuf {
    env::var_os("HATCHECK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("hat-check.json"))
}

pub fn load_config() -> Config {
    let path = config_path();
    match fs::read(&path) {
        Ok(data) => match serde_json::from_slice(&data) {
            Ok(cfg) => {
                debug!(path = %path.display(), "configuration loaded");
                cfg
            }
            Err(e) => {
                warn!(path = %path.display(), "ignoring invalid configuration: {e}");
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

pub fn save_config(cfg: &Config) -> HatCheckResult<()> {
    let path = config_path();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_vec_pretty(cfg)?)?;
    debug!(path = %path.display(), "configuration saved");
    Ok(())
}
