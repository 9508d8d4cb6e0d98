use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

#[derive(Debug, Default)]
pub struct WavIo;

impl WavIo {
    /// Read a WAV file as mono `f32` samples, averaging channels, plus its sample rate.
    pub fn read_mono(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32)> {
        let path = path.as_ref();
        let reader =
            WavReader::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
            SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };
        let channels = usize::from(spec.channels.max(1));
        let mono = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        Ok((mono, spec.sample_rate))
    }

    /// Write mono samples as 32-bit IEEE float without clipping.
    ///
    /// Non-finite samples are written as silence.
    pub fn write_mono(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<()> {
        let path = path.as_ref();
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        for value in samples {
            writer.write_sample(if value.is_finite() { *value } else { 0.0 })?;
        }

        writer.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::WavIo;
    use tempfile::tempdir;

    #[test]
    fn loud_samples_are_not_clipped() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("test.wav");
        let samples = vec![0.0_f32, 0.5, -0.25, 2.0, -3.5];
        WavIo::write_mono(&path, &samples, 22050).expect("write wav");

        let (decoded, sample_rate) = WavIo::read_mono(&path).expect("read wav");
        assert_eq!(sample_rate, 22050);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn non_finite_samples_are_silenced() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nan.wav");
        WavIo::write_mono(&path, &[f32::NAN, f32::INFINITY, 0.25], 8000).expect("write wav");

        let (decoded, _) = WavIo::read_mono(&path).expect("read wav");
        assert_eq!(decoded, vec![0.0, 0.0, 0.25]);
    }
}
