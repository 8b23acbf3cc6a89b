use std::collections::VecDeque;

use serde::Serialize;

use super::analyser::DEFAULT_SAMPLE_RATE;
use super::registry::AnalyserRegistry;

/// Frames of band history used for beat detection.
const BEAT_HISTORY: usize = 32;
/// A frame is a beat when its average exceeds the moving average by this.
const BEAT_RATIO: f32 = 1.25;
/// Minimum average level (0-255) for a beat.
const BEAT_FLOOR: f32 = 24.0;
/// Upper edge of the bass band.
const BASS_HI_HZ: f32 = 250.0;
/// Upper edge of the mid band; everything above is high.
const MID_HI_HZ: f32 = 4000.0;

/// Three-band energy summary of one frame, on the 0-255 byte scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EnergyBands {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    pub avg: f32,
    pub beat: bool,
}

/// One rendered frame of scope data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScopeFrame {
    pub bands: EnergyBands,
    /// `false` when the registry was empty and a synthetic waveform was used.
    pub live: bool,
}

/// Per-frame reader of the analyser registry for the visual layer.
///
/// Never fails: with no active analyser it synthesizes a deterministic
/// waveform from the frame time so the HUD keeps moving.
pub struct ScopeFeed {
    spectrum: Vec<u8>,
    history: VecDeque<f32>,
}

impl ScopeFeed {
    pub fn new(bins: usize) -> Self {
        Self {
            spectrum: vec![0; bins.max(3)],
            history: VecDeque::with_capacity(BEAT_HISTORY),
        }
    }

    /// Sample the registry (or the fallback) for the frame at `time_secs`.
    pub fn frame(&mut self, registry: &AnalyserRegistry, time_secs: f64) -> ScopeFrame {
        let live = registry.sample_frequencies(&mut self.spectrum);
        if !live {
            synthetic_spectrum(&mut self.spectrum, time_secs);
        }
        let rate = registry.sample_rate().unwrap_or(DEFAULT_SAMPLE_RATE);
        let bands = self.bands(rate);
        ScopeFrame { bands, live }
    }

    /// Latest spectrum, one byte per bin.
    pub fn spectrum(&self) -> &[u8] {
        &self.spectrum
    }

    /// Spectrum averaged down to `n` buckets, for low-bandwidth feeds.
    pub fn downsampled(&self, n: usize) -> Vec<u8> {
        let n = n.clamp(1, self.spectrum.len());
        let chunk = self.spectrum.len() / n;
        self.spectrum
            .chunks(chunk)
            .take(n)
            .map(|c| (c.iter().map(|&b| b as u32).sum::<u32>() / c.len() as u32) as u8)
            .collect()
    }

    fn bands(&mut self, sample_rate: u32) -> EnergyBands {
        let d = &self.spectrum;
        let (bass_hi, mid_hi) = band_edges(d.len(), sample_rate);
        let mean = |s: &[u8]| s.iter().map(|&b| b as f32).sum::<f32>() / s.len().max(1) as f32;

        let bass = mean(&d[..bass_hi]);
        let mid = mean(&d[bass_hi..mid_hi]);
        let high = mean(&d[mid_hi..]);
        let avg = (bass + mid + high) / 3.0;

        self.history.push_back(avg);
        if self.history.len() > BEAT_HISTORY {
            self.history.pop_front();
        }
        let moving = self.history.iter().sum::<f32>() / self.history.len() as f32;
        let beat = avg > moving * BEAT_RATIO && avg > BEAT_FLOOR;

        EnergyBands {
            bass,
            mid,
            high,
            avg,
            beat,
        }
    }
}

/// Bin indices ending the bass and mid bands for a spectrum of `len` bins
/// spanning 0 to Nyquist. Each band keeps at least one bin.
fn band_edges(len: usize, sample_rate: u32) -> (usize, usize) {
    let bin_hz = sample_rate as f32 / (2 * len) as f32;
    let bass_hi = ((BASS_HI_HZ / bin_hz) as usize).clamp(1, len - 2);
    let mid_hi = ((MID_HI_HZ / bin_hz) as usize).clamp(bass_hi + 1, len - 1);
    (bass_hi, mid_hi)
}

/// Slowly breathing spectrum: a falling slope modulated by two slow sines.
fn synthetic_spectrum(out: &mut [u8], time_secs: f64) {
    let t = time_secs as f32;
    let len = out.len() as f32;
    let pulse = 0.5 + 0.5 * (t * 2.0).sin();
    for (i, slot) in out.iter_mut().enumerate() {
        let x = i as f32 / len;
        let slope = 1.0 - x;
        let ripple = 0.5 + 0.5 * (x * 12.0 + t * 1.3).sin();
        let v = 40.0 + 90.0 * slope * (0.6 * pulse + 0.4 * ripple);
        *slot = v.clamp(0.0, 255.0) as u8;
    }
}
