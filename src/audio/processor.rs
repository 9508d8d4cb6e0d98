//! Linear-spectrogram inversion with Griffin-Lim phase reconstruction.
//!
//! Spectrograms are normalized dB magnitudes laid out `[bins][frames]` with
//! `bins = n_fft / 2 + 1`. The STFT is centered with reflect padding and uses
//! a periodic Hann window zero-padded to `n_fft`.

use crate::config::AudioConfig;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Maximum value of a normalized spectrogram.
const MAX_NORM: f32 = 1.0;

/// Seed of the initial Griffin-Lim phase, fixed so inversion is repeatable.
pub const GRIFFIN_LIM_SEED: u64 = 0x5eed_9f11;

/// Converts normalized spectrograms back into waveforms.
pub struct AudioProcessor {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub win_length: usize,
    pub min_level_db: f32,
    pub ref_level_db: f32,
    pub power: f32,
    pub preemphasis: f32,
    pub griffin_lim_iters: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for AudioProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioProcessor")
            .field("sample_rate", &self.sample_rate)
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .field("win_length", &self.win_length)
            .field("griffin_lim_iters", &self.griffin_lim_iters)
            .finish_non_exhaustive()
    }
}

impl AudioProcessor {
    pub fn from_config(config: &AudioConfig) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(config.n_fft);
        let inverse = planner.plan_fft_inverse(config.n_fft);
        Self {
            sample_rate: config.sr,
            n_fft: config.n_fft,
            hop_length: config.hop_length,
            win_length: config.win_length,
            min_level_db: config.min_level_db,
            ref_level_db: config.ref_level_db,
            power: config.power,
            preemphasis: config.preemphasis,
            griffin_lim_iters: config.griffin_lim_iters,
            window: padded_hann_window(config.win_length, config.n_fft),
            forward,
            inverse,
        }
    }

    /// Number of frequency bins expected per frame.
    pub fn num_freq(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Reconstruct a waveform from a normalized `[bins][frames]` spectrogram.
    pub fn inv_spectrogram(&self, spectrogram: &[Vec<f32>]) -> Result<Vec<f32>> {
        if spectrogram.len() != self.num_freq() {
            anyhow::bail!(
                "Spectrogram has {} bins, expected {}",
                spectrogram.len(),
                self.num_freq()
            );
        }
        let frames = spectrogram[0].len();
        if spectrogram.iter().any(|row| row.len() != frames) {
            anyhow::bail!("Spectrogram rows have inconsistent frame counts");
        }

        let magnitudes: Vec<Vec<f32>> = spectrogram
            .iter()
            .map(|row| {
                row.iter()
                    .map(|value| {
                        let db = self.denormalize(*value) + self.ref_level_db;
                        db_to_amp(db).powf(self.power)
                    })
                    .collect()
            })
            .collect();

        let wav = self.griffin_lim(&magnitudes);
        if self.preemphasis != 0.0 {
            Ok(inv_preemphasis(&wav, self.preemphasis))
        } else {
            Ok(wav)
        }
    }

    fn denormalize(&self, value: f32) -> f32 {
        let clipped = value.clamp(0.0, MAX_NORM);
        clipped * -self.min_level_db / MAX_NORM + self.min_level_db
    }

    /// Estimate phase iteratively, starting from seeded random phase.
    pub fn griffin_lim(&self, magnitudes: &[Vec<f32>]) -> Vec<f32> {
        let bins = magnitudes.len();
        let frames = magnitudes.first().map(Vec::len).unwrap_or(0);
        // A constant starting phase can reconstruct to silence, after which
        // every re-estimated phase stays zero.
        let mut rng = StdRng::seed_from_u64(GRIFFIN_LIM_SEED);
        let mut spectrum: Vec<Vec<Complex<f32>>> = magnitudes
            .iter()
            .map(|row| {
                row.iter()
                    .map(|m| Complex::from_polar(*m, rng.gen_range(0.0..2.0 * PI)))
                    .collect()
            })
            .collect();
        let mut signal = self.istft(&spectrum);

        for _ in 0..self.griffin_lim_iters {
            let estimate = self.stft(&signal);
            for bin in 0..bins {
                for frame in 0..frames {
                    let phase = estimate
                        .get(bin)
                        .and_then(|row| row.get(frame))
                        .map(|value| value.arg())
                        .unwrap_or(0.0);
                    spectrum[bin][frame] = Complex::from_polar(magnitudes[bin][frame], phase);
                }
            }
            signal = self.istft(&spectrum);
        }
        signal
    }

    /// Centered short-time Fourier transform, `[bins][frames]`.
    pub fn stft(&self, signal: &[f32]) -> Vec<Vec<Complex<f32>>> {
        let bins = self.num_freq();
        if signal.is_empty() {
            return vec![Vec::new(); bins];
        }
        let pad = self.n_fft / 2;
        let padded: Vec<f32> = (0..signal.len() + 2 * pad)
            .map(|idx| signal[reflect_index(idx as isize - pad as isize, signal.len())])
            .collect();
        let frames = 1 + (padded.len() - self.n_fft) / self.hop_length;

        let mut output = vec![Vec::with_capacity(frames); bins];
        let mut buffer = vec![Complex::new(0.0, 0.0); self.n_fft];
        for frame in 0..frames {
            let start = frame * self.hop_length;
            for (j, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + j] * self.window[j], 0.0);
            }
            self.forward.process(&mut buffer);
            for (bin, row) in output.iter_mut().enumerate() {
                row.push(buffer[bin]);
            }
        }
        output
    }

    /// Inverse of [`Self::stft`] by windowed overlap-add.
    ///
    /// Returns `hop_length * (frames - 1)` samples.
    pub fn istft(&self, spectrum: &[Vec<Complex<f32>>]) -> Vec<f32> {
        let frames = spectrum.first().map(Vec::len).unwrap_or(0);
        if frames == 0 {
            return Vec::new();
        }
        let full_len = self.n_fft + self.hop_length * (frames - 1);
        let mut output = vec![0.0f32; full_len];
        let mut norm = vec![0.0f32; full_len];
        let mut buffer = vec![Complex::new(0.0, 0.0); self.n_fft];
        let scale = 1.0 / self.n_fft as f32;

        for frame in 0..frames {
            for (bin, slot) in buffer.iter_mut().enumerate() {
                *slot = hermitian_bin(spectrum, bin, frame, self.n_fft);
            }
            self.inverse.process(&mut buffer);
            let start = frame * self.hop_length;
            for j in 0..self.n_fft {
                let w = self.window[j];
                output[start + j] += buffer[j].re * scale * w;
                norm[start + j] += w * w;
            }
        }

        for (sample, weight) in output.iter_mut().zip(norm.iter()) {
            if *weight > f32::MIN_POSITIVE {
                *sample /= weight;
            }
        }

        let pad = self.n_fft / 2;
        let expected = self.hop_length * (frames - 1);
        output.into_iter().skip(pad).take(expected).collect()
    }
}

/// Full-spectrum value at `bin`, mirroring the stored half spectrum.
fn hermitian_bin(spectrum: &[Vec<Complex<f32>>], bin: usize, frame: usize, n_fft: usize) -> Complex<f32> {
    let half = spectrum.len();
    if bin < half {
        let value = spectrum[bin][frame];
        // DC and Nyquist bins of a real signal carry no imaginary part.
        if bin == 0 || (n_fft % 2 == 0 && bin == n_fft / 2) {
            Complex::new(value.re, 0.0)
        } else {
            value
        }
    } else {
        spectrum[n_fft - bin][frame].conj()
    }
}

/// Periodic Hann window of `win_length`, centered inside `n_fft` zeros.
fn padded_hann_window(win_length: usize, n_fft: usize) -> Vec<f32> {
    let mut window = vec![0.0f32; n_fft];
    let offset = (n_fft - win_length) / 2;
    for i in 0..win_length {
        window[offset + i] = 0.5 - 0.5 * (2.0 * PI * i as f32 / win_length as f32).cos();
    }
    window
}

/// Reflect an out-of-range index back into `0..len` without repeating edges.
fn reflect_index(idx: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let mut idx = idx.rem_euclid(period);
    if idx >= len as isize {
        idx = period - idx;
    }
    idx as usize
}

fn db_to_amp(db: f32) -> f32 {
    10f32.powf(db * 0.05)
}

/// Undo pre-emphasis: `y[n] = x[n] + coef * y[n - 1]`.
pub fn inv_preemphasis(signal: &[f32], coef: f32) -> Vec<f32> {
    let mut output = Vec::with_capacity(signal.len());
    let mut previous = 0.0f32;
    for sample in signal {
        previous = sample + coef * previous;
        output.push(previous);
    }
    output
}
