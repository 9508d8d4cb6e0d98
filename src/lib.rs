//! # ttsynth - autoregressive mel-spectrogram text-to-speech
//!
//! Loads an acoustic model and a post-net from SafeTensors checkpoints,
//! decodes a mel-spectrogram one frame at a time, projects it to linear
//! magnitudes, and reconstructs a waveform with Griffin-Lim.
//!
//! ## Pipeline
//!
//! 1. **Text** ([`text::text_to_sequence`]): characters to symbol ids.
//! 2. **Decode** ([`synthesis::decode`]): starting from one zero frame, every
//!    step runs the [`AcousticModel`] over the whole prefix and appends the
//!    newest post-net frame.
//! 3. **Post-net** ([`VocoderFeatureModel`]): mel frames to normalized linear
//!    magnitudes.
//! 4. **Audio** ([`audio::processor::AudioProcessor`]): Griffin-Lim inversion.
//!
//! ## Quick Start
//!
//! ```no_run
//! use burn_ndarray::{NdArray, NdArrayDevice};
//! use ttsynth::SynthesisRuntime;
//!
//! let device = NdArrayDevice::default();
//! let runtime =
//!     SynthesisRuntime::<NdArray<f32>>::from_config_path("config/synthesis.yaml", &device)
//!         .unwrap();
//! let (synthesis, path) = runtime
//!     .run("Transformer model is so fast!", None, |_| Ok(()))
//!     .unwrap();
//! println!("{} samples written to {}", synthesis.samples.len(), path.display());
//! ```
//!
//! ## Custom models
//!
//! Any type implementing [`AcousticModel`] and [`VocoderFeatureModel`] can be
//! plugged into a [`Synthesizer`]:
//!
//! ```no_run
//! # use burn_ndarray::{NdArray, NdArrayDevice};
//! # use ttsynth::model::projection::{ProjectionPostNetConfig, ProjectionTtsConfig};
//! use ttsynth::audio::processor::AudioProcessor;
//! use ttsynth::synthesis::{DecodeParams, Synthesizer};
//! # let device = NdArrayDevice::default();
//! # let config = ttsynth::load_config("config/synthesis.yaml").unwrap();
//! # let acoustic = ProjectionTtsConfig { vocab_size: 65, hidden_size: 256, num_mels: 80 }
//! #     .init::<NdArray<f32>>(&device);
//! # let postnet = ProjectionPostNetConfig { num_mels: 80, num_freq: 1025 }
//! #     .init::<NdArray<f32>>(&device);
//! let synthesizer = Synthesizer::new(
//!     acoustic,
//!     postnet,
//!     AudioProcessor::from_config(&config.audio),
//!     DecodeParams::new(config.max_len),
//!     &device,
//! );
//! let synthesis = synthesizer.synthesize("Hello.", |_| Ok(())).unwrap();
//! ```

pub mod audio;
pub mod config;
pub mod model;
pub mod monitor;
pub mod perf;
pub mod runtime;
pub mod synthesis;
pub mod text;
pub mod weights;

pub use config::{load_config, AudioConfig, SynthesisConfig};
pub use model::{AcousticModel, AcousticOutput, LoadParams, VocoderFeatureModel};
pub use runtime::SynthesisRuntime;
pub use synthesis::{decode, DecodeOutput, DecodeParams, DecodeStep, Synthesis, Synthesizer};
pub use weights::{load_checkpoint, normalize_param_names, ParamMap, ParamTensor};
