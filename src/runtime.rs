//! High-level runtime wrapper for config-driven synthesis.
//!
//! This module loads a [`SynthesisConfig`], both checkpoints and the
//! frame-projection models, and writes results to the sample directory and
//! the monitoring log.

use crate::audio::io::WavIo;
use crate::audio::processor::AudioProcessor;
use crate::config::{load_config, SynthesisConfig};
use crate::model::projection::{
    ProjectionPostNet, ProjectionPostNetConfig, ProjectionTts, ProjectionTtsConfig,
};
use crate::model::LoadParams;
use crate::monitor::MonitorWriter;
use crate::perf::{self, Metric};
use crate::synthesis::{DecodeParams, DecodeStep, Synthesis, Synthesizer};
use crate::text;
use crate::weights::load_checkpoint;
use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Synthesizer over the frame-projection models.
pub type ProjectionSynthesizer<B> = Synthesizer<B, ProjectionTts<B>, ProjectionPostNet<B>>;

/// Owns the configuration and the loaded synthesis pipeline.
#[derive(Debug)]
pub struct SynthesisRuntime<B: Backend> {
    config: SynthesisConfig,
    synthesizer: ProjectionSynthesizer<B>,
}

impl<B: Backend> SynthesisRuntime<B> {
    /// Create a runtime from a config path.
    pub fn from_config_path(path: impl AsRef<Path>, device: &B::Device) -> Result<Self> {
        let config = load_config(path)?;
        Self::from_config(&config, device)
    }

    /// Create a runtime from an already-loaded config.
    pub fn from_config(config: &SynthesisConfig, device: &B::Device) -> Result<Self> {
        let _span = perf::span(Metric::RuntimeFromConfig);
        config.validate()?;

        let tts_config = ProjectionTtsConfig {
            vocab_size: text::vocab_size(),
            hidden_size: config.model.hidden_size,
            num_mels: config.audio.num_mels,
        };
        let mut acoustic = tts_config.init::<B>(device);
        let params = load_checkpoint(config.transformer_checkpoint_dir(), &config.transformer_step)?;
        acoustic
            .load_params(&params, device)
            .context("Failed to load acoustic model weights")?;

        let postnet_config = ProjectionPostNetConfig {
            num_mels: config.audio.num_mels,
            num_freq: config.audio.num_freq(),
        };
        let mut postnet = postnet_config.init::<B>(device);
        let params = load_checkpoint(config.postnet_checkpoint_dir(), &config.postnet_step)?;
        postnet
            .load_params(&params, device)
            .context("Failed to load post-net weights")?;

        info!(
            transformer_step = %config.transformer_step,
            postnet_step = %config.postnet_step,
            "loaded checkpoints"
        );

        let decode = DecodeParams {
            max_len: config.max_len,
            stop_threshold: config.stop_threshold,
        };
        let synthesizer = Synthesizer::new(
            acoustic,
            postnet,
            AudioProcessor::from_config(&config.audio),
            decode,
            device,
        );
        Ok(Self {
            config: config.clone(),
            synthesizer,
        })
    }

    /// Access the loaded configuration.
    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Access the underlying pipeline (advanced usage).
    pub fn synthesizer(&self) -> &ProjectionSynthesizer<B> {
        &self.synthesizer
    }

    /// Synthesize `text` into a waveform.
    pub fn synthesize<F>(&self, text: &str, observer: F) -> Result<Synthesis>
    where
        F: FnMut(DecodeStep) -> Result<()>,
    {
        self.synthesizer.synthesize(text, observer)
    }

    /// Synthesize `text`, then write the sample file and the monitor entry.
    ///
    /// Returns the synthesis and the path of the written waveform.
    pub fn run<F>(&self, text: &str, output: Option<&Path>, observer: F) -> Result<(Synthesis, PathBuf)>
    where
        F: FnMut(DecodeStep) -> Result<()>,
    {
        let mut monitor = MonitorWriter::create(self.config.monitor_dir())?;
        let synthesis = self.synthesize(text, observer)?;
        let path = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.sample_file());
        write_outputs(&synthesis, text, &path, &mut monitor)?;
        monitor.close()?;
        Ok((synthesis, path))
    }
}

/// Write the waveform to `path` (creating its directory) and log it to `monitor`.
pub fn write_outputs(
    synthesis: &Synthesis,
    text: &str,
    path: &Path,
    monitor: &mut MonitorWriter,
) -> Result<()> {
    monitor.add_audio(text, &synthesis.samples, 0, synthesis.sample_rate)?;
    monitor.add_scalar("decode/steps", synthesis.steps as f64, 0)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let _span = perf::span(Metric::WavWrite);
    WavIo::write_mono(path, &synthesis.samples, synthesis.sample_rate)?;
    info!(path = %path.display(), samples = synthesis.samples.len(), "wrote waveform");
    Ok(())
}
