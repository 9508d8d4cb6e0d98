//! Audio output and spectrogram inversion.
//!
//! `processor` turns normalized linear magnitudes back into a waveform with
//! Griffin-Lim; `io` writes and reads WAV files.

pub mod io;
pub mod processor;
