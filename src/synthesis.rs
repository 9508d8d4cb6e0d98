//! Autoregressive mel decoding and the text-to-waveform pipeline.
//!
//! Decoding starts from a single all-zero mel frame. Each step runs the
//! acoustic model over the whole prefix and appends the last post-net frame,
//! so after `n` steps the prefix holds `n + 1` frames.

use crate::audio::processor::AudioProcessor;
use crate::model::{AcousticModel, VocoderFeatureModel};
use crate::perf::{self, Metric};
use crate::text::text_to_sequence;
use anyhow::Result;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use tracing::{debug, info};

/// Pre-allocated `[1, capacity, num_mels]` frame store written by index.
#[derive(Debug, Clone)]
pub struct MelBuffer<B: Backend> {
    frames: Tensor<B, 3>,
    len: usize,
    num_mels: usize,
}

impl<B: Backend> MelBuffer<B> {
    /// Allocate room for `capacity` frames, holding one zero frame.
    pub fn new(capacity: usize, num_mels: usize, device: &B::Device) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Tensor::zeros([1, capacity, num_mels], device),
            len: 1,
            num_mels,
        }
    }

    /// Number of filled frames.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.frames.dims()[1]
    }

    /// Filled prefix `[1, len, num_mels]`.
    pub fn view(&self) -> Tensor<B, 3> {
        self.frames
            .clone()
            .slice([0..1, 0..self.len, 0..self.num_mels])
    }

    /// Write `frame` (`[1, 1, num_mels]`) at the next index.
    pub fn push(&mut self, frame: Tensor<B, 3>) -> Result<()> {
        let dims = frame.dims();
        if dims != [1, 1, self.num_mels] {
            anyhow::bail!(
                "Mel frame has shape {dims:?}, expected [1, 1, {}]",
                self.num_mels
            );
        }
        if self.len >= self.capacity() {
            anyhow::bail!("Mel buffer full ({} frames)", self.capacity());
        }
        let idx = self.len;
        self.frames = self
            .frames
            .clone()
            .slice_assign([0..1, idx..idx + 1, 0..self.num_mels], frame);
        self.len += 1;
        Ok(())
    }
}

/// 1-based positions `[1, len]`: `[1, 2, ..., len]`.
pub fn positions<B: Backend>(len: usize, device: &B::Device) -> Tensor<B, 2, Int> {
    let values: Vec<i64> = (1..=len as i64).collect();
    Tensor::from_data(TensorData::new(values, [1, len]), device)
}

/// Progress report passed to a decode observer after each step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeStep {
    /// Zero-based iteration index.
    pub step: usize,
    /// Total iterations requested.
    pub max_len: usize,
    /// Filled mel frames after this step.
    pub frames: usize,
    /// Stop-token probability of the newest frame.
    pub stop_prob: f32,
}

/// Decode-time settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeParams {
    /// Number of decoder iterations.
    pub max_len: usize,
    /// End early once the newest stop probability exceeds this value.
    pub stop_threshold: Option<f32>,
}

impl DecodeParams {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            stop_threshold: None,
        }
    }
}

/// Result of the decode loop.
#[derive(Debug, Clone)]
pub struct DecodeOutput<B: Backend> {
    /// Final mel prefix `[1, steps + 1, num_mels]`.
    pub mel: Tensor<B, 3>,
    /// Post-net prediction of the last step, or the initial zero frame when no step ran.
    pub postnet_pred: Tensor<B, 3>,
    /// Iterations executed.
    pub steps: usize,
    /// Step at which the stop threshold fired.
    pub stop_step: Option<usize>,
}

/// Run the autoregressive decode loop.
///
/// `observer` is called after every step; returning an error aborts decoding.
pub fn decode<B, M, F>(
    model: &M,
    text: Tensor<B, 2, Int>,
    params: DecodeParams,
    mut observer: F,
) -> Result<DecodeOutput<B>>
where
    B: Backend,
    M: AcousticModel<B> + ?Sized,
    F: FnMut(DecodeStep) -> Result<()>,
{
    let _span = perf::span(Metric::DecodeTotal);
    let device = text.device();
    let num_mels = model.num_mels();
    let [_, text_len] = text.dims();
    let pos_text = positions::<B>(text_len, &device);

    let mut buffer = MelBuffer::<B>::new(params.max_len + 1, num_mels, &device);
    let mut postnet_pred = buffer.view();
    let mut stop_step = None;
    let mut steps = 0;

    for step in 0..params.max_len {
        let _step_span = perf::span(Metric::DecodeStep);
        let mel_input = buffer.view();
        let pos_mel = positions::<B>(buffer.len(), &device);
        let output = model.forward(text.clone(), mel_input, pos_text.clone(), pos_mel)?;

        let [_, pred_len, pred_mels] = output.postnet_pred.dims();
        if pred_len == 0 {
            anyhow::bail!("Acoustic model returned an empty prediction at step {step}");
        }
        if pred_mels != num_mels {
            anyhow::bail!(
                "Acoustic model returned {pred_mels} mel channels at step {step}, expected {num_mels}"
            );
        }
        let last = output
            .postnet_pred
            .clone()
            .slice([0..1, pred_len - 1..pred_len, 0..num_mels]);
        buffer.push(last)?;
        postnet_pred = output.postnet_pred;
        steps = step + 1;

        let stop_prob = last_stop_prob(output.stop_preds)?;
        observer(DecodeStep {
            step,
            max_len: params.max_len,
            frames: buffer.len(),
            stop_prob,
        })?;

        if let Some(threshold) = params.stop_threshold {
            if stop_prob > threshold {
                debug!(step, stop_prob, "stop token fired");
                stop_step = Some(step);
                break;
            }
        }
    }

    perf::add_count(Metric::DecodeFrames, steps as u64);
    Ok(DecodeOutput {
        mel: buffer.view(),
        postnet_pred,
        steps,
        stop_step,
    })
}

fn last_stop_prob<B: Backend>(stop_preds: Tensor<B, 3>) -> Result<f32> {
    let [batch, len, channels] = stop_preds.dims();
    if batch == 0 || len == 0 || channels == 0 {
        return Ok(0.0);
    }
    let last = stop_preds.slice([0..1, len - 1..len, 0..1]);
    let values = last
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to read stop prediction: {e:?}"))?;
    Ok(values.first().copied().unwrap_or(0.0))
}

/// Waveform produced by a synthesis run.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Decoder iterations executed.
    pub steps: usize,
    pub stop_step: Option<usize>,
}

/// Text-to-waveform pipeline over an acoustic model and a post-net.
#[derive(Debug)]
pub struct Synthesizer<B: Backend, A, P> {
    acoustic: A,
    postnet: P,
    processor: AudioProcessor,
    params: DecodeParams,
    device: B::Device,
}

impl<B, A, P> Synthesizer<B, A, P>
where
    B: Backend,
    A: AcousticModel<B>,
    P: VocoderFeatureModel<B>,
{
    pub fn new(
        acoustic: A,
        postnet: P,
        processor: AudioProcessor,
        params: DecodeParams,
        device: &B::Device,
    ) -> Self {
        Self {
            acoustic,
            postnet,
            processor,
            params,
            device: device.clone(),
        }
    }

    pub fn acoustic(&self) -> &A {
        &self.acoustic
    }

    pub fn postnet(&self) -> &P {
        &self.postnet
    }

    pub fn processor(&self) -> &AudioProcessor {
        &self.processor
    }

    pub fn params(&self) -> DecodeParams {
        self.params
    }

    /// Encode text into a `[1, T_text]` token tensor.
    pub fn encode_text(&self, text: &str) -> Tensor<B, 2, Int> {
        let tokens = text_to_sequence(text);
        perf::add_count(Metric::TextTokens, tokens.len() as u64);
        let len = tokens.len();
        Tensor::from_data(TensorData::new(tokens, [1, len]), &self.device)
    }

    /// Decode mel frames and project them to linear magnitudes `[1, T, num_freq]`.
    pub fn spectrogram<F>(&self, text: &str, observer: F) -> Result<(Tensor<B, 3>, DecodeOutput<B>)>
    where
        F: FnMut(DecodeStep) -> Result<()>,
    {
        let tokens = self.encode_text(text);
        let decoded = decode(&self.acoustic, tokens, self.params, observer)?;
        let mag_pred = {
            let _span = perf::span(Metric::PostNet);
            self.postnet.forward(decoded.postnet_pred.clone())?
        };
        Ok((mag_pred, decoded))
    }

    /// Run the whole pipeline for `text`.
    pub fn synthesize<F>(&self, text: &str, observer: F) -> Result<Synthesis>
    where
        F: FnMut(DecodeStep) -> Result<()>,
    {
        let (mag_pred, decoded) = self.spectrogram(text, observer)?;
        let spectrogram = to_bins_by_frames(mag_pred)?;
        let samples = {
            let _span = perf::span(Metric::GriffinLim);
            self.processor.inv_spectrogram(&spectrogram)?
        };
        perf::add_count(Metric::WaveformSamples, samples.len() as u64);
        info!(
            steps = decoded.steps,
            samples = samples.len(),
            "synthesized waveform"
        );
        Ok(Synthesis {
            samples,
            sample_rate: self.processor.sample_rate,
            steps: decoded.steps,
            stop_step: decoded.stop_step,
        })
    }
}

/// Drop the batch axis of `[1, T, F]` and transpose to `[F][T]`.
pub fn to_bins_by_frames<B: Backend>(mag_pred: Tensor<B, 3>) -> Result<Vec<Vec<f32>>> {
    let [batch, frames, bins] = mag_pred.dims();
    if batch != 1 {
        anyhow::bail!("Expected batch size 1, got {batch}");
    }
    let transposed = mag_pred.reshape([frames, bins]).swap_dims(0, 1);
    let values = transposed
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to read spectrogram: {e:?}"))?;
    if frames == 0 {
        return Ok(vec![Vec::new(); bins]);
    }
    Ok(values.chunks(frames).map(<[f32]>::to_vec).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn positions_are_one_based() {
        let device = NdArrayDevice::default();
        let pos = positions::<TestBackend>(4, &device);
        assert_eq!(pos.dims(), [1, 4]);
        let values = pos.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(values, vec![1, 2, 3, 4]);
    }

    #[test]
    fn buffer_grows_by_index() {
        let device = NdArrayDevice::default();
        let mut buffer = MelBuffer::<TestBackend>::new(3, 2, &device);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.capacity(), 3);
        buffer
            .push(Tensor::ones([1, 1, 2], &device))
            .expect("push");
        assert_eq!(buffer.view().dims(), [1, 2, 2]);
        let values = buffer.view().into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![0.0, 0.0, 1.0, 1.0]);

        buffer.push(Tensor::ones([1, 1, 2], &device)).expect("push");
        let err = buffer.push(Tensor::ones([1, 1, 2], &device)).unwrap_err();
        assert!(err.to_string().contains("full"));
    }

    #[test]
    fn buffer_rejects_wrong_frame_shape() {
        let device = NdArrayDevice::default();
        let mut buffer = MelBuffer::<TestBackend>::new(3, 2, &device);
        assert!(buffer.push(Tensor::ones([1, 2, 2], &device)).is_err());
    }

    #[test]
    fn transposes_to_bins_by_frames() {
        let device = NdArrayDevice::default();
        let mag = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0], [1, 2, 3]),
            &device,
        );
        let spec = to_bins_by_frames(mag).unwrap();
        assert_eq!(spec, vec![vec![1.0, 4.0], vec![2.0, 5.0], vec![3.0, 6.0]]);
    }
}
