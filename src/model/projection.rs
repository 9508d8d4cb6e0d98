//! Frame-projection acoustic and post-net models.
//!
//! The acoustic model embeds text, adds sinusoidal position encodings, and
//! predicts each mel frame from causal decoder self-attention followed by
//! single-head attention over the encoded text. The post-net maps mel frames
//! to normalized linear magnitudes with one projection and a sigmoid.
//!
//! Linear weights are stored `[d_input, d_output]`.
//!
//! | parameter                 | shape                      |
//! |---------------------------|----------------------------|
//! | `encoder.embedding.weight`| `[vocab, hidden]`          |
//! | `decoder.prenet.weight`   | `[num_mels, hidden]`       |
//! | `decoder.prenet.bias`     | `[hidden]`                 |
//! | `decoder.mel_linear.weight` | `[hidden, num_mels]`     |
//! | `decoder.mel_linear.bias` | `[num_mels]`               |
//! | `decoder.stop_linear.weight` | `[hidden, 1]`           |
//! | `decoder.stop_linear.bias`| `[1]`                      |
//! | `decoder.postnet.weight`  | `[num_mels, num_mels]`     |
//! | `decoder.postnet.bias`    | `[num_mels]`               |
//! | `proj.weight` (post-net)  | `[num_mels, num_freq]`     |
//! | `proj.bias` (post-net)    | `[num_freq]`               |

use super::{AcousticModel, AcousticOutput, LoadParams, VocoderFeatureModel};
use crate::weights::{ParamMap, ParamTensor};
use burn::tensor::activation::{sigmoid, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::module::{embedding, linear};
use burn::tensor::{Bool, Int, Tensor, TensorData};

/// Dimensions of the acoustic model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionTtsConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_mels: usize,
}

impl ProjectionTtsConfig {
    /// Initialize a zero-weight model on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ProjectionTts<B> {
        let h = self.hidden_size;
        let m = self.num_mels;
        ProjectionTts {
            config: *self,
            embedding: Tensor::zeros([self.vocab_size, h], device),
            prenet_weight: Tensor::zeros([m, h], device),
            prenet_bias: Tensor::zeros([h], device),
            mel_weight: Tensor::zeros([h, m], device),
            mel_bias: Tensor::zeros([m], device),
            stop_weight: Tensor::zeros([h, 1], device),
            stop_bias: Tensor::zeros([1], device),
            postnet_weight: Tensor::zeros([m, m], device),
            postnet_bias: Tensor::zeros([m], device),
        }
    }
}

/// Acoustic model predicting mel frames autoregressively.
#[derive(Debug, Clone)]
pub struct ProjectionTts<B: Backend> {
    config: ProjectionTtsConfig,
    embedding: Tensor<B, 2>,
    prenet_weight: Tensor<B, 2>,
    prenet_bias: Tensor<B, 1>,
    mel_weight: Tensor<B, 2>,
    mel_bias: Tensor<B, 1>,
    stop_weight: Tensor<B, 2>,
    stop_bias: Tensor<B, 1>,
    postnet_weight: Tensor<B, 2>,
    postnet_bias: Tensor<B, 1>,
}

impl<B: Backend> ProjectionTts<B> {
    pub fn config(&self) -> ProjectionTtsConfig {
        self.config
    }
}

impl<B: Backend> AcousticModel<B> for ProjectionTts<B> {
    fn num_mels(&self) -> usize {
        self.config.num_mels
    }

    fn forward(
        &self,
        text: Tensor<B, 2, Int>,
        mel_input: Tensor<B, 3>,
        pos_text: Tensor<B, 2, Int>,
        pos_mel: Tensor<B, 2, Int>,
    ) -> anyhow::Result<AcousticOutput<B>> {
        let hidden = self.config.hidden_size;
        let [_, text_len] = text.dims();
        let [_, mel_len, mel_dim] = mel_input.dims();
        if mel_dim != self.config.num_mels {
            anyhow::bail!(
                "Mel input has {mel_dim} channels, model expects {}",
                self.config.num_mels
            );
        }
        if pos_text.dims()[1] != text_len || pos_mel.dims()[1] != mel_len {
            anyhow::bail!(
                "Position lengths {:?}/{:?} do not match text {text_len} and mel {mel_len}",
                pos_text.dims(),
                pos_mel.dims()
            );
        }
        let device = mel_input.device();

        let encoded = embedding(self.embedding.clone(), text)
            + sinusoid_encoding::<B>(pos_text, hidden, &device)?;
        let (enc_context, attn_enc) = attend(encoded.clone(), encoded.clone(), None);
        let encoded = encoded + enc_context;

        let query = linear(
            mel_input,
            self.prenet_weight.clone(),
            Some(self.prenet_bias.clone()),
        )
        .tanh()
            + sinusoid_encoding::<B>(pos_mel, hidden, &device)?;
        let mask = causal_mask::<B>(mel_len, &device);
        let (dec_context, attn_dec) = attend(query.clone(), query.clone(), Some(mask));
        let query = query + dec_context;
        let (cross_context, attn_probs) = attend(query.clone(), encoded, None);
        let decoded = (query + cross_context).tanh();

        let mel_pred = linear(
            decoded.clone(),
            self.mel_weight.clone(),
            Some(self.mel_bias.clone()),
        );
        let residual = linear(
            mel_pred.clone(),
            self.postnet_weight.clone(),
            Some(self.postnet_bias.clone()),
        );
        let postnet_pred = mel_pred.clone() + residual;
        let stop_preds = sigmoid(linear(
            decoded,
            self.stop_weight.clone(),
            Some(self.stop_bias.clone()),
        ));

        Ok(AcousticOutput {
            mel_pred,
            postnet_pred,
            attn_probs: vec![attn_probs.unsqueeze_dim::<4>(1)],
            stop_preds,
            attn_enc: vec![attn_enc.unsqueeze_dim::<4>(1)],
            attn_dec: vec![attn_dec.unsqueeze_dim::<4>(1)],
        })
    }
}

impl<B: Backend> LoadParams<B> for ProjectionTts<B> {
    fn load_params(&mut self, params: &ParamMap, device: &B::Device) -> anyhow::Result<()> {
        let h = self.config.hidden_size;
        let m = self.config.num_mels;
        let v = self.config.vocab_size;
        self.embedding = load2(params, "encoder.embedding.weight", [v, h], device)?;
        self.prenet_weight = load2(params, "decoder.prenet.weight", [m, h], device)?;
        self.prenet_bias = load1(params, "decoder.prenet.bias", h, device)?;
        self.mel_weight = load2(params, "decoder.mel_linear.weight", [h, m], device)?;
        self.mel_bias = load1(params, "decoder.mel_linear.bias", m, device)?;
        self.stop_weight = load2(params, "decoder.stop_linear.weight", [h, 1], device)?;
        self.stop_bias = load1(params, "decoder.stop_linear.bias", 1, device)?;
        self.postnet_weight = load2(params, "decoder.postnet.weight", [m, m], device)?;
        self.postnet_bias = load1(params, "decoder.postnet.bias", m, device)?;
        Ok(())
    }
}

/// Dimensions of the post-net model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionPostNetConfig {
    pub num_mels: usize,
    pub num_freq: usize,
}

impl ProjectionPostNetConfig {
    /// Initialize a zero-weight model on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ProjectionPostNet<B> {
        ProjectionPostNet {
            config: *self,
            weight: Tensor::zeros([self.num_mels, self.num_freq], device),
            bias: Tensor::zeros([self.num_freq], device),
        }
    }
}

/// Post-net producing normalized linear magnitudes in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ProjectionPostNet<B: Backend> {
    config: ProjectionPostNetConfig,
    weight: Tensor<B, 2>,
    bias: Tensor<B, 1>,
}

impl<B: Backend> ProjectionPostNet<B> {
    pub fn config(&self) -> ProjectionPostNetConfig {
        self.config
    }
}

impl<B: Backend> VocoderFeatureModel<B> for ProjectionPostNet<B> {
    fn forward(&self, postnet_pred: Tensor<B, 3>) -> anyhow::Result<Tensor<B, 3>> {
        let mel_dim = postnet_pred.dims()[2];
        if mel_dim != self.config.num_mels {
            anyhow::bail!(
                "Post-net input has {mel_dim} channels, model expects {}",
                self.config.num_mels
            );
        }
        Ok(sigmoid(linear(
            postnet_pred,
            self.weight.clone(),
            Some(self.bias.clone()),
        )))
    }
}

impl<B: Backend> LoadParams<B> for ProjectionPostNet<B> {
    fn load_params(&mut self, params: &ParamMap, device: &B::Device) -> anyhow::Result<()> {
        let shape = [self.config.num_mels, self.config.num_freq];
        self.weight = load2(params, "proj.weight", shape, device)?;
        self.bias = load1(params, "proj.bias", self.config.num_freq, device)?;
        Ok(())
    }
}

fn check_shape(name: &str, tensor: &ParamTensor, expected: &[usize]) -> anyhow::Result<()> {
    if tensor.shape != expected {
        anyhow::bail!(
            "Parameter '{name}' has shape {:?}, expected {expected:?}",
            tensor.shape
        );
    }
    Ok(())
}

fn load1<B: Backend>(
    params: &ParamMap,
    name: &str,
    len: usize,
    device: &B::Device,
) -> anyhow::Result<Tensor<B, 1>> {
    let tensor = params.require(name)?;
    check_shape(name, tensor, &[len])?;
    tensor.to_tensor(device)
}

fn load2<B: Backend>(
    params: &ParamMap,
    name: &str,
    shape: [usize; 2],
    device: &B::Device,
) -> anyhow::Result<Tensor<B, 2>> {
    let tensor = params.require(name)?;
    check_shape(name, tensor, &shape)?;
    tensor.to_tensor(device)
}

/// Scaled dot-product attention returning `(context, weights)`.
///
/// `mask` marks positions that must not be attended to.
fn attend<B: Backend>(
    query: Tensor<B, 3>,
    keys: Tensor<B, 3>,
    mask: Option<Tensor<B, 3, Bool>>,
) -> (Tensor<B, 3>, Tensor<B, 3>) {
    let dim = query.dims()[2].max(1) as f32;
    let mut scores = query
        .matmul(keys.clone().swap_dims(1, 2))
        .div_scalar(dim.sqrt());
    if let Some(mask) = mask {
        scores = scores.mask_fill(mask, -1.0e9);
    }
    let weights = softmax(scores, 2);
    (weights.clone().matmul(keys), weights)
}

/// Mask `[1, len, len]` that is true above the diagonal.
fn causal_mask<B: Backend>(len: usize, device: &B::Device) -> Tensor<B, 3, Bool> {
    let mut values = Vec::with_capacity(len * len);
    for row in 0..len {
        for col in 0..len {
            values.push(col > row);
        }
    }
    Tensor::from_data(TensorData::new(values, [1, len, len]), device)
}

/// Sinusoidal encoding `[1, T, dim]` for 1-based positions; position 0 encodes to zeros.
fn sinusoid_encoding<B: Backend>(
    positions: Tensor<B, 2, Int>,
    dim: usize,
    device: &B::Device,
) -> anyhow::Result<Tensor<B, 3>> {
    let [batch, len] = positions.dims();
    let positions = positions
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| anyhow::anyhow!("Failed to read positions: {e:?}"))?;
    let mut values = Vec::with_capacity(positions.len() * dim);
    for position in positions {
        for idx in 0..dim {
            if position == 0 {
                values.push(0.0);
                continue;
            }
            let exponent = (2 * (idx / 2)) as f64 / dim as f64;
            let angle = position as f64 / 10000f64.powf(exponent);
            let value = if idx % 2 == 0 { angle.sin() } else { angle.cos() };
            values.push(value as f32);
        }
    }
    Ok(Tensor::from_data(
        TensorData::new(values, [batch, len, dim]),
        device,
    ))
}
