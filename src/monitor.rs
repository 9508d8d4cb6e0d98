//! File-based monitoring log for synthesis runs.
//!
//! A [`MonitorWriter`] owns a directory containing `events.jsonl` (one JSON
//! object per line) and an `audio/` folder for logged waveforms. The event
//! file is flushed on [`MonitorWriter::close`] and, failing that, on drop.

use crate::audio::io::WavIo;
use crate::perf::{self, Metric};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Name of the event log inside the monitor directory.
pub const EVENTS_FILE: &str = "events.jsonl";

/// One record of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A waveform stored next to the log.
    Audio {
        tag: String,
        step: u64,
        sample_rate: u32,
        samples: usize,
        /// Path relative to the monitor directory.
        path: String,
        wall_time: f64,
    },
    /// A named scalar value.
    Scalar {
        tag: String,
        step: u64,
        value: f64,
        wall_time: f64,
    },
}

/// Append-only writer for monitoring events.
#[derive(Debug)]
pub struct MonitorWriter {
    dir: PathBuf,
    events: Option<BufWriter<File>>,
    next_audio: u64,
}

impl MonitorWriter {
    /// Open (creating if needed) a monitor directory.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join("audio"))
            .with_context(|| format!("Failed to create monitor dir {}", dir.display()))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(EVENTS_FILE))
            .with_context(|| format!("Failed to open {}", dir.join(EVENTS_FILE).display()))?;
        Ok(Self {
            dir,
            events: Some(BufWriter::new(file)),
            next_audio: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store a waveform and record an audio event.
    pub fn add_audio(&mut self, tag: &str, samples: &[f32], step: u64, sample_rate: u32) -> Result<()> {
        let _span = perf::span(Metric::MonitorWrite);
        let relative = self.next_audio_path(tag, step);
        WavIo::write_mono(self.dir.join(&relative), samples, sample_rate)?;
        self.record(&MonitorEvent::Audio {
            tag: tag.to_string(),
            step,
            sample_rate,
            samples: samples.len(),
            path: relative,
            wall_time: wall_time(),
        })
    }

    /// First unused `audio/<seq>_<step>_<slug>.wav` name; earlier runs in the
    /// same directory keep their files.
    fn next_audio_path(&mut self, tag: &str, step: u64) -> String {
        let slug = slugify(tag);
        loop {
            let relative = format!("audio/{:06}_{step:06}_{slug}.wav", self.next_audio);
            self.next_audio += 1;
            if !self.dir.join(&relative).exists() {
                return relative;
            }
        }
    }

    /// Record a scalar event.
    pub fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()> {
        self.record(&MonitorEvent::Scalar {
            tag: tag.to_string(),
            step,
            value,
            wall_time: wall_time(),
        })
    }

    fn record(&mut self, event: &MonitorEvent) -> Result<()> {
        let events = self
            .events
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Monitor writer already closed"))?;
        serde_json::to_writer(&mut *events, event)?;
        events.write_all(b"\n")?;
        Ok(())
    }

    /// Flush and release the event file.
    pub fn close(mut self) -> Result<()> {
        if let Some(mut events) = self.events.take() {
            events.flush()?;
        }
        Ok(())
    }
}

impl Drop for MonitorWriter {
    fn drop(&mut self) {
        if let Some(mut events) = self.events.take() {
            if let Err(err) = events.flush() {
                warn!("Failed to flush monitor events in {}: {err}", self.dir.display());
            }
        }
    }
}

/// Read every event recorded in a monitor directory.
pub fn read_events(dir: impl AsRef<Path>) -> Result<Vec<MonitorEvent>> {
    let data = fs::read_to_string(dir.as_ref().join(EVENTS_FILE))?;
    data.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

/// Turn a free-form tag into a file-name fragment.
fn slugify(tag: &str) -> String {
    let slug: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let slug = slug.trim_matches('_');
    let slug: String = slug.chars().take(48).collect();
    if slug.is_empty() {
        "audio".to_string()
    } else {
        slug
    }
}

fn wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
