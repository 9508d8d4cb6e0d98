//! Shared test utilities: stub models and checkpoint/config fixtures.

#![allow(dead_code)]

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use burn_ndarray::{NdArray, NdArrayDevice};
use safetensors::tensor::TensorView;
use safetensors::{serialize, Dtype};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use ttsynth::{AcousticModel, AcousticOutput, VocoderFeatureModel};

pub type TestBackend = NdArray<f32>;

pub const NUM_MELS: usize = 4;
pub const HIDDEN: usize = 8;
pub const N_FFT: usize = 64;
pub const NUM_FREQ: usize = N_FFT / 2 + 1;

/// Read a tensor's values as `f32`.
pub fn values<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
    tensor.into_data().to_vec::<f32>().expect("f32 data")
}

/// Read an int tensor's values as `i64`.
pub fn int_values<const D: usize>(tensor: Tensor<TestBackend, D, Int>) -> Vec<i64> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .expect("i64 data")
}

pub fn tokens(ids: &[i64], device: &NdArrayDevice) -> Tensor<TestBackend, 2, Int> {
    Tensor::from_data(TensorData::new(ids.to_vec(), [1, ids.len()]), device)
}

fn filled<B: Backend>(shape: [usize; 3], value: f32, device: &B::Device) -> Tensor<B, 3> {
    let len = shape.iter().product();
    Tensor::from_data(TensorData::new(vec![value; len], shape), device)
}

/// Acoustic stub whose prediction at every position equals the current mel length.
///
/// Records the mel positions and input lengths it was called with.
#[derive(Debug, Default)]
pub struct StepModel {
    pub num_mels: usize,
    /// Stop probability becomes 1.0 once the mel input reaches this length.
    pub stop_at: Option<usize>,
    /// Fail when called with this mel length.
    pub fail_at: Option<usize>,
    /// Channel count of the predictions, when it differs from the input.
    pub predicted_mels: Option<usize>,
    pub pos_mel_calls: RefCell<Vec<Vec<i64>>>,
    pub mel_inputs: RefCell<Vec<Vec<f32>>>,
}

impl StepModel {
    pub fn new(num_mels: usize) -> Self {
        Self {
            num_mels,
            ..Self::default()
        }
    }
}

impl AcousticModel<TestBackend> for StepModel {
    fn num_mels(&self) -> usize {
        self.num_mels
    }

    fn forward(
        &self,
        text: Tensor<TestBackend, 2, Int>,
        mel_input: Tensor<TestBackend, 3>,
        _pos_text: Tensor<TestBackend, 2, Int>,
        pos_mel: Tensor<TestBackend, 2, Int>,
    ) -> anyhow::Result<AcousticOutput<TestBackend>> {
        let device = mel_input.device();
        let [_, len, mels] = mel_input.dims();
        let [_, text_len] = text.dims();
        if self.fail_at == Some(len) {
            anyhow::bail!("stub failure at length {len}");
        }
        self.pos_mel_calls.borrow_mut().push(int_values(pos_mel));
        self.mel_inputs.borrow_mut().push(values(mel_input));

        let out_mels = self.predicted_mels.unwrap_or(mels);
        let prediction = filled::<TestBackend>([1, len, out_mels], len as f32, &device);
        let stop = match self.stop_at {
            Some(at) if len >= at => 1.0,
            _ => 0.0,
        };
        Ok(AcousticOutput {
            mel_pred: prediction.clone(),
            postnet_pred: prediction,
            attn_probs: vec![Tensor::zeros([1, 1, len, text_len], &device)],
            stop_preds: filled::<TestBackend>([1, len, 1], stop, &device),
            attn_enc: vec![Tensor::zeros([1, 1, text_len, text_len], &device)],
            attn_dec: vec![Tensor::zeros([1, 1, len, len], &device)],
        })
    }
}

/// Post-net stub repeating each frame's channel mean over `num_freq` bins.
///
/// Records every input it receives.
#[derive(Debug, Default)]
pub struct MeanPostNet {
    pub num_freq: usize,
    pub inputs: RefCell<Vec<(Vec<usize>, Vec<f32>)>>,
}

impl MeanPostNet {
    pub fn new(num_freq: usize) -> Self {
        Self {
            num_freq,
            ..Self::default()
        }
    }
}

impl VocoderFeatureModel<TestBackend> for MeanPostNet {
    fn forward(&self, postnet_pred: Tensor<TestBackend, 3>) -> anyhow::Result<Tensor<TestBackend, 3>> {
        let device = postnet_pred.device();
        let [batch, frames, mels] = postnet_pred.dims();
        let data = values(postnet_pred);
        self.inputs
            .borrow_mut()
            .push((vec![batch, frames, mels], data.clone()));
        let mut output = Vec::with_capacity(frames * self.num_freq);
        for frame in data.chunks(mels) {
            let mean = frame.iter().sum::<f32>() / mels as f32;
            let normalized = (mean / 10.0).clamp(0.0, 1.0);
            output.extend(std::iter::repeat(normalized).take(self.num_freq));
        }
        Ok(Tensor::from_data(
            TensorData::new(output, [batch, frames, self.num_freq]),
            &device,
        ))
    }
}

/// Deterministic pseudo-random weights in `[-scale, scale]`.
fn weights(len: usize, seed: usize, scale: f32) -> Vec<f32> {
    (0..len)
        .map(|i| (((i * 7919 + seed * 104_729) % 1000) as f32 / 500.0 - 1.0) * scale)
        .collect()
}

fn write_safetensors(path: &Path, tensors: &[(String, Vec<usize>, Vec<f32>)]) {
    let bytes: Vec<Vec<u8>> = tensors
        .iter()
        .map(|(_, _, values)| values.iter().copied().flat_map(f32::to_le_bytes).collect())
        .collect();
    let views: HashMap<String, TensorView<'_>> = tensors
        .iter()
        .zip(bytes.iter())
        .map(|((name, shape, _), data)| {
            (
                name.clone(),
                TensorView::new(Dtype::F32, shape.clone(), data).expect("tensor view"),
            )
        })
        .collect();
    let serialized = serialize(&views, &None).expect("serialize safetensors");
    std::fs::write(path, serialized).expect("write safetensors");
}

/// Write projection-model checkpoints under `root` and return the config path.
///
/// Acoustic parameters carry the `_layers.` wrapper prefix.
pub fn write_fixture(root: &Path, max_len: usize) -> PathBuf {
    let vocab = ttsynth::text::vocab_size();
    let transformer_dir = root.join("checkpoint").join("nostop_token").join("transformer");
    let postnet_dir = root.join("checkpoint").join("postnet");
    std::fs::create_dir_all(&transformer_dir).expect("create transformer dir");
    std::fs::create_dir_all(&postnet_dir).expect("create postnet dir");

    let acoustic: Vec<(String, Vec<usize>)> = vec![
        ("encoder.embedding.weight".into(), vec![vocab, HIDDEN]),
        ("decoder.prenet.weight".into(), vec![NUM_MELS, HIDDEN]),
        ("decoder.prenet.bias".into(), vec![HIDDEN]),
        ("decoder.mel_linear.weight".into(), vec![HIDDEN, NUM_MELS]),
        ("decoder.mel_linear.bias".into(), vec![NUM_MELS]),
        ("decoder.stop_linear.weight".into(), vec![HIDDEN, 1]),
        ("decoder.stop_linear.bias".into(), vec![1]),
        ("decoder.postnet.weight".into(), vec![NUM_MELS, NUM_MELS]),
        ("decoder.postnet.bias".into(), vec![NUM_MELS]),
    ];
    let acoustic: Vec<(String, Vec<usize>, Vec<f32>)> = acoustic
        .into_iter()
        .enumerate()
        .map(|(seed, (name, shape))| {
            let len = shape.iter().product();
            (format!("_layers.{name}"), shape, weights(len, seed, 0.5))
        })
        .collect();
    write_safetensors(&transformer_dir.join("160000.safetensors"), &acoustic);

    let postnet = vec![
        (
            "proj.weight".to_string(),
            vec![NUM_MELS, NUM_FREQ],
            weights(NUM_MELS * NUM_FREQ, 11, 0.5),
        ),
        ("proj.bias".to_string(), vec![NUM_FREQ], weights(NUM_FREQ, 12, 0.1)),
    ];
    write_safetensors(&postnet_dir.join("100000.safetensors"), &postnet);

    let config = format!(
        r#"use_gpu: false
log_dir: {log}
checkpoint_path: {checkpoint}
transformer_step: 160000
postnet_step: 100000
max_len: {max_len}
sample_path: {sample}
audio:
  sr: 8000
  num_mels: {NUM_MELS}
  min_level_db: -100
  ref_level_db: 20
  n_fft: {N_FFT}
  win_length: {N_FFT}
  hop_length: 16
  power: 1.2
  preemphasis: 0.97
  griffin_lim_iters: 4
model:
  hidden_size: {HIDDEN}
"#,
        log = root.join("log").display(),
        checkpoint = root.join("checkpoint").display(),
        sample = root.join("sample").display(),
    );
    let config_path = root.join("synthesis.yaml");
    std::fs::write(&config_path, config).expect("write config");
    config_path
}
