//! Configuration types for synthesis runs.
//!
//! Configurations are typically loaded from YAML files using [`load_config`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of the synthesis configuration.
pub const DEFAULT_CONFIG_PATH: &str = "./config/synthesis.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
/// Audio analysis and reconstruction parameters.
pub struct AudioConfig {
    /// Sample rate in Hz.
    pub sr: u32,
    /// Number of mel channels produced by the acoustic model.
    pub num_mels: usize,
    /// Floor of the normalized dB range (negative).
    pub min_level_db: f32,
    /// Reference level added back before dB-to-amplitude conversion.
    pub ref_level_db: f32,
    /// FFT size.
    pub n_fft: usize,
    /// Analysis window length.
    pub win_length: usize,
    /// Hop between frames.
    pub hop_length: usize,
    /// Magnitude exponent applied before phase reconstruction.
    pub power: f32,
    /// Pre-emphasis coefficient (0.0 disables de-emphasis).
    pub preemphasis: f32,
    /// Griffin-Lim iterations.
    #[serde(default = "default_griffin_lim_iters")]
    pub griffin_lim_iters: usize,
}

fn default_griffin_lim_iters() -> usize {
    60
}

impl AudioConfig {
    /// Number of linear-frequency bins (`n_fft / 2 + 1`).
    pub fn num_freq(&self) -> usize {
        self.n_fft / 2 + 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
/// Hyperparameters for the frame-projection models.
pub struct ModelConfig {
    /// Hidden width shared by the encoder and decoder projections.
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
}

fn default_hidden_size() -> usize {
    256
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: default_hidden_size(),
        }
    }
}

/// Top-level synthesis configuration.
///
/// # Example YAML
///
/// ```yaml
/// use_gpu: false
/// log_dir: ./log
/// checkpoint_path: ./checkpoint
/// transformer_step: 160000
/// postnet_step: 100000
/// max_len: 400
/// sample_path: ./sample
/// audio:
///   sr: 22050
///   num_mels: 80
///   min_level_db: -100
///   ref_level_db: 20
///   n_fft: 2048
///   win_length: 1024
///   hop_length: 256
///   power: 1.2
///   preemphasis: 0.97
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SynthesisConfig {
    /// Prefer a GPU backend when one is compiled in.
    #[serde(default)]
    pub use_gpu: bool,
    /// Root directory for monitoring output.
    pub log_dir: PathBuf,
    /// Step identifier of the acoustic model checkpoint.
    #[serde(deserialize_with = "step_id::deserialize")]
    pub transformer_step: String,
    /// Step identifier of the post-net checkpoint.
    #[serde(deserialize_with = "step_id::deserialize")]
    pub postnet_step: String,
    /// Root directory holding both checkpoint families.
    pub checkpoint_path: PathBuf,
    /// Acoustic model checkpoint directory, relative to `checkpoint_path`.
    #[serde(default = "default_transformer_dir")]
    pub transformer_dir: PathBuf,
    /// Post-net checkpoint directory, relative to `checkpoint_path`.
    #[serde(default = "default_postnet_dir")]
    pub postnet_dir: PathBuf,
    /// Number of decoder iterations.
    pub max_len: usize,
    /// Stop-token probability that ends decoding early. Unset runs all `max_len` steps.
    #[serde(default)]
    pub stop_threshold: Option<f32>,
    /// Directory receiving `test.wav`.
    pub sample_path: PathBuf,
    /// Audio parameters.
    pub audio: AudioConfig,
    /// Model hyperparameters.
    #[serde(default)]
    pub model: ModelConfig,
}

fn default_transformer_dir() -> PathBuf {
    PathBuf::from("nostop_token/transformer")
}

fn default_postnet_dir() -> PathBuf {
    PathBuf::from("postnet")
}

// Step identifiers are usually integers in YAML; accept both forms.
mod step_id {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(value) => value.to_string(),
            Raw::Str(value) => value,
        })
    }
}

impl SynthesisConfig {
    /// Directory holding acoustic model checkpoints.
    pub fn transformer_checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_path.join(&self.transformer_dir)
    }

    /// Directory holding post-net checkpoints.
    pub fn postnet_checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_path.join(&self.postnet_dir)
    }

    /// Directory the monitor writes into.
    pub fn monitor_dir(&self) -> PathBuf {
        self.log_dir.join("synthesis")
    }

    /// Path of the synthesized waveform.
    pub fn sample_file(&self) -> PathBuf {
        self.sample_path.join("test.wav")
    }

    /// Reject parameter combinations the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let audio = &self.audio;
        if audio.num_mels == 0 {
            anyhow::bail!("audio.num_mels must be > 0");
        }
        if audio.n_fft == 0 {
            anyhow::bail!("audio.n_fft must be > 0");
        }
        if audio.hop_length == 0 {
            anyhow::bail!("audio.hop_length must be > 0");
        }
        if audio.win_length == 0 || audio.win_length > audio.n_fft {
            anyhow::bail!(
                "audio.win_length must be in 1..={} (got {})",
                audio.n_fft,
                audio.win_length
            );
        }
        if audio.sr == 0 {
            anyhow::bail!("audio.sr must be > 0");
        }
        if self.model.hidden_size == 0 {
            anyhow::bail!("model.hidden_size must be > 0");
        }
        Ok(())
    }
}

/// Load a synthesis configuration from a YAML file.
///
/// # Errors
///
/// Returns an error if the file doesn't exist, contains invalid YAML, or fails validation.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<SynthesisConfig> {
    let path = path.as_ref();
    if !path.exists() {
        anyhow::bail!("Config file not found: {}", path.display());
    }

    let data = fs::read_to_string(path)?;
    parse_config(&data)
}

/// Parse and validate a YAML configuration document.
pub fn parse_config(data: &str) -> anyhow::Result<SynthesisConfig> {
    let config: SynthesisConfig = serde_yaml::from_str(data)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
use_gpu: false
log_dir: ./log
checkpoint_path: ./checkpoint
transformer_step: 160000
postnet_step: "100000"
max_len: 50
sample_path: ./sample
audio:
  sr: 22050
  num_mels: 80
  min_level_db: -100
  ref_level_db: 20
  n_fft: 2048
  win_length: 1024
  hop_length: 256
  power: 1.2
  preemphasis: 0.97
"#;

    #[test]
    fn parses_step_ids_and_defaults() {
        let config = parse_config(YAML).expect("parse config");
        assert_eq!(config.transformer_step, "160000");
        assert_eq!(config.postnet_step, "100000");
        assert_eq!(config.audio.griffin_lim_iters, 60);
        assert_eq!(config.audio.num_freq(), 1025);
        assert_eq!(config.model.hidden_size, 256);
        assert!(config.stop_threshold.is_none());
        assert_eq!(
            config.transformer_checkpoint_dir(),
            PathBuf::from("./checkpoint/nostop_token/transformer")
        );
        assert_eq!(config.postnet_checkpoint_dir(), PathBuf::from("./checkpoint/postnet"));
        assert_eq!(config.monitor_dir(), PathBuf::from("./log/synthesis"));
        assert_eq!(config.sample_file(), PathBuf::from("./sample/test.wav"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = format!("{YAML}\nbatch_size: 4\n");
        assert!(parse_config(&yaml).is_err());
    }

    #[test]
    fn rejects_window_longer_than_fft() {
        let yaml = YAML.replace("win_length: 1024", "win_length: 4096");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("win_length"));
    }

    #[test]
    fn missing_file_errors() {
        let err = load_config("does/not/exist.yaml").unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }
}
