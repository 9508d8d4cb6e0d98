//! Process-wide timing and counter aggregation.
//!
//! Stages wrap their work in [`span`] guards and bump counters with
//! [`add_count`]. `--verbose` prints [`report`] once the run finishes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Stages and quantities tracked during a synthesis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Metric {
    RuntimeFromConfig,
    CheckpointLoad,
    DecodeTotal,
    DecodeStep,
    PostNet,
    GriffinLim,
    WavWrite,
    MonitorWrite,
    TextTokens,
    DecodeFrames,
    WaveformSamples,
}

impl Metric {
    pub const ALL: [Metric; 11] = [
        Metric::RuntimeFromConfig,
        Metric::CheckpointLoad,
        Metric::DecodeTotal,
        Metric::DecodeStep,
        Metric::PostNet,
        Metric::GriffinLim,
        Metric::WavWrite,
        Metric::MonitorWrite,
        Metric::TextTokens,
        Metric::DecodeFrames,
        Metric::WaveformSamples,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::RuntimeFromConfig => "runtime.from_config",
            Metric::CheckpointLoad => "checkpoint.load",
            Metric::DecodeTotal => "decode.total",
            Metric::DecodeStep => "decode.step",
            Metric::PostNet => "postnet.forward",
            Metric::GriffinLim => "audio.griffin_lim",
            Metric::WavWrite => "audio.wav_write",
            Metric::MonitorWrite => "monitor.write",
            Metric::TextTokens => "text.tokens",
            Metric::DecodeFrames => "decode.frames",
            Metric::WaveformSamples => "audio.samples",
        }
    }

    /// Counters accumulate quantities; every other metric times a span.
    pub fn is_counter(self) -> bool {
        matches!(
            self,
            Metric::TextTokens | Metric::DecodeFrames | Metric::WaveformSamples
        )
    }
}

#[derive(Default)]
struct Slot {
    micros: AtomicU64,
    hits: AtomicU64,
}

struct Collector {
    started: Instant,
    slots: [Slot; Metric::ALL.len()],
}

static COLLECTOR: OnceLock<Collector> = OnceLock::new();

fn collector() -> &'static Collector {
    COLLECTOR.get_or_init(|| Collector {
        started: Instant::now(),
        slots: Default::default(),
    })
}

impl Collector {
    fn slot(&self, metric: Metric) -> &Slot {
        &self.slots[metric as usize]
    }
}

/// Records the elapsed time of its scope when dropped.
#[must_use = "the span measures until it is dropped"]
pub struct PerfSpan {
    metric: Metric,
    start: Instant,
}

impl Drop for PerfSpan {
    fn drop(&mut self) {
        let micros = u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX);
        let slot = collector().slot(self.metric);
        slot.micros.fetch_add(micros, Ordering::Relaxed);
        slot.hits.fetch_add(1, Ordering::Relaxed);
    }
}

/// Start timing `metric` until the returned guard drops.
pub fn span(metric: Metric) -> PerfSpan {
    PerfSpan {
        metric,
        start: Instant::now(),
    }
}

/// Add `delta` to a counter metric.
pub fn add_count(metric: Metric, delta: u64) {
    collector()
        .slot(metric)
        .hits
        .fetch_add(delta, Ordering::Relaxed);
}

/// Point-in-time copy of every metric.
#[derive(Debug, Clone)]
pub struct PerfSnapshot {
    uptime: Duration,
    micros: [u64; Metric::ALL.len()],
    hits: [u64; Metric::ALL.len()],
}

impl PerfSnapshot {
    /// Span count for timed metrics, accumulated value for counters.
    pub fn count(&self, metric: Metric) -> u64 {
        self.hits[metric as usize]
    }

    /// Accumulated time of a timed metric.
    pub fn total(&self, metric: Metric) -> Duration {
        Duration::from_micros(self.micros[metric as usize])
    }
}

/// Copy the current values of every metric.
pub fn snapshot() -> PerfSnapshot {
    let collector = collector();
    let mut snapshot = PerfSnapshot {
        uptime: collector.started.elapsed(),
        micros: [0; Metric::ALL.len()],
        hits: [0; Metric::ALL.len()],
    };
    for metric in Metric::ALL {
        let slot = collector.slot(metric);
        snapshot.micros[metric as usize] = slot.micros.load(Ordering::Relaxed);
        snapshot.hits[metric as usize] = slot.hits.load(Ordering::Relaxed);
    }
    snapshot
}

impl fmt::Display for PerfSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "perf after {:.3}s", self.uptime.as_secs_f64())?;

        let mut timed: Vec<Metric> = Metric::ALL
            .into_iter()
            .filter(|m| !m.is_counter() && self.count(*m) > 0)
            .collect();
        timed.sort_by_key(|m| std::cmp::Reverse(self.total(*m)));
        let counters: Vec<Metric> = Metric::ALL
            .into_iter()
            .filter(|m| m.is_counter() && self.count(*m) > 0)
            .collect();

        if timed.is_empty() && counters.is_empty() {
            return writeln!(f, "  (nothing recorded)");
        }
        for metric in timed {
            let total = self.total(metric);
            let calls = self.count(metric);
            writeln!(
                f,
                "  {:<22} {:>9.3}s  x{:<6} {:>9.3}ms each",
                metric.name(),
                total.as_secs_f64(),
                calls,
                total.as_secs_f64() * 1000.0 / calls as f64
            )?;
        }
        for metric in counters {
            writeln!(f, "  {:<22} {:>9}", metric.name(), self.count(metric))?;
        }
        Ok(())
    }
}

/// Render every recorded metric as text.
pub fn report() -> String {
    snapshot().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn metric_names_are_unique() {
        let names: HashSet<_> = Metric::ALL.iter().map(|m| m.name()).collect();
        assert_eq!(names.len(), Metric::ALL.len());
        for (idx, metric) in Metric::ALL.iter().enumerate() {
            assert_eq!(*metric as usize, idx);
        }
    }

    #[test]
    fn spans_and_counters_accumulate() {
        let before = snapshot();
        add_count(Metric::DecodeFrames, 3);
        {
            let _span = span(Metric::DecodeStep);
        }
        let after = snapshot();
        assert!(after.count(Metric::DecodeFrames) >= before.count(Metric::DecodeFrames) + 3);
        assert!(after.count(Metric::DecodeStep) > before.count(Metric::DecodeStep));

        let text = report();
        assert!(text.contains("decode.frames"));
        assert!(text.contains("decode.step"));
    }
}
