//! Model contracts for the acoustic and vocoder-feature stages.
//!
//! The decode loop only depends on these traits, so any architecture that
//! follows the forward contract can drive synthesis. [`projection`] provides
//! the frame-projection pair the runtime loads from checkpoints.

use crate::weights::ParamMap;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

pub mod projection;

/// Everything the acoustic model returns for one forward pass.
///
/// Shapes use `T_mel` for the current decoder length and `T_text` for the
/// encoded text length.
#[derive(Debug, Clone)]
pub struct AcousticOutput<B: Backend> {
    /// Raw decoder mel prediction `[1, T_mel, num_mels]`.
    pub mel_pred: Tensor<B, 3>,
    /// Post-net refined mel prediction `[1, T_mel, num_mels]`.
    pub postnet_pred: Tensor<B, 3>,
    /// Decoder-to-encoder attention per layer `[1, heads, T_mel, T_text]`.
    pub attn_probs: Vec<Tensor<B, 4>>,
    /// Stop-token probabilities `[1, T_mel, 1]`.
    pub stop_preds: Tensor<B, 3>,
    /// Encoder self-attention per layer `[1, heads, T_text, T_text]`.
    pub attn_enc: Vec<Tensor<B, 4>>,
    /// Decoder self-attention per layer `[1, heads, T_mel, T_mel]`.
    pub attn_dec: Vec<Tensor<B, 4>>,
}

/// Sequence-to-sequence model predicting mel frames from text.
pub trait AcousticModel<B: Backend> {
    /// Number of mel channels per predicted frame.
    fn num_mels(&self) -> usize;

    /// Run one decoder pass over the full mel prefix.
    ///
    /// * `text` - token ids `[1, T_text]`
    /// * `mel_input` - mel prefix `[1, T_mel, num_mels]`
    /// * `pos_text` - 1-based text positions `[1, T_text]`
    /// * `pos_mel` - 1-based mel positions `[1, T_mel]`
    fn forward(
        &self,
        text: Tensor<B, 2, Int>,
        mel_input: Tensor<B, 3>,
        pos_text: Tensor<B, 2, Int>,
        pos_mel: Tensor<B, 2, Int>,
    ) -> anyhow::Result<AcousticOutput<B>>;
}

/// Model mapping refined mel frames to linear-spectrogram features.
pub trait VocoderFeatureModel<B: Backend> {
    /// Project `[1, T, num_mels]` into `[1, T, num_freq]`.
    fn forward(&self, postnet_pred: Tensor<B, 3>) -> anyhow::Result<Tensor<B, 3>>;
}

/// Models whose weights come from a normalized checkpoint mapping.
pub trait LoadParams<B: Backend> {
    /// Replace the model weights with the checkpoint values.
    ///
    /// Fails when an expected parameter is missing or has the wrong shape.
    fn load_params(&mut self, params: &ParamMap, device: &B::Device) -> anyhow::Result<()>;
}
