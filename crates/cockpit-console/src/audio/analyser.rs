use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use super::ring::RingBuffer;

static NEXT_ANALYSER_ID: AtomicU64 = AtomicU64::new(1);

/// Rate assumed until the feeding element reports its own.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Analyser tuning, mirroring the browser `AnalyserNode` knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserOptions {
    pub fft_size: usize,
    /// 0 = no smoothing, approaching 1 = very slow.
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for AnalyserOptions {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing: 0.8,
            min_db: -100.0,
            max_db: -30.0,
        }
    }
}

impl AnalyserOptions {
    pub fn sanitized(mut self) -> Self {
        self.fft_size = self.fft_size.clamp(32, 32768).next_power_of_two();
        self.smoothing = self.smoothing.clamp(0.0, 0.99);
        if self.max_db <= self.min_db {
            self.max_db = self.min_db + 1.0;
        }
        self
    }
}

struct AnalyserState {
    fft: Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    time_domain: Vec<f32>,
    fft_buffer: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    scratch: Vec<f32>,
}

/// Frequency-domain tap on a playback graph.
///
/// The owning element pushes mono samples into [`tap`](Self::tap); readers
/// call [`sample_frequencies`](Self::sample_frequencies) once per frame. The
/// bin count is fixed for the handle's lifetime.
pub struct AnalyserHandle {
    id: u64,
    tap: Arc<RingBuffer>,
    options: AnalyserOptions,
    bins: usize,
    sample_rate: AtomicU32,
    state: Mutex<AnalyserState>,
}

impl AnalyserHandle {
    pub fn new(options: AnalyserOptions) -> Self {
        let options = options.sanitized();
        let size = options.fft_size;
        let bins = size / 2;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);

        // Hann window
        let window: Vec<f32> = (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos()))
            .collect();

        let id = NEXT_ANALYSER_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("Analyser {id}: {size}-point FFT, {bins} bins");

        Self {
            id,
            tap: Arc::new(RingBuffer::new(size * 4)),
            options,
            bins,
            sample_rate: AtomicU32::new(DEFAULT_SAMPLE_RATE),
            state: Mutex::new(AnalyserState {
                fft,
                window,
                time_domain: vec![0.0; size],
                fft_buffer: vec![Complex::new(0.0, 0.0); size],
                smoothed: vec![0.0; bins],
                scratch: vec![0.0; size],
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sample input for the element feeding this analyser.
    pub fn tap(&self) -> Arc<RingBuffer> {
        self.tap.clone()
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.bins
    }

    pub fn options(&self) -> AnalyserOptions {
        self.options
    }

    /// Rate of the samples arriving on the tap.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    /// Ignored for 0 (rate not known yet).
    pub fn set_sample_rate(&self, rate: u32) {
        if rate > 0 {
            self.sample_rate.store(rate, Ordering::Relaxed);
        }
    }

    /// Width of one frequency bin in Hz.
    pub fn bin_hz(&self) -> f32 {
        self.sample_rate() as f32 / self.options.fft_size as f32
    }

    /// Fill `out` with byte magnitudes (0-255) for the most recent window.
    /// Bins beyond `frequency_bin_count()` are written as 0.
    pub fn sample_frequencies(&self, out: &mut [u8]) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let st = &mut *st;
        let size = self.options.fft_size;

        // Slide the time-domain window by whatever arrived since last frame
        let read = self.tap.read(&mut st.scratch);
        if read > 0 {
            let shift = read.min(size);
            if shift < size {
                st.time_domain.copy_within(shift.., 0);
            }
            st.time_domain[size - shift..].copy_from_slice(&st.scratch[read - shift..read]);
        }

        for i in 0..size {
            st.fft_buffer[i] = Complex::new(st.time_domain[i] * st.window[i], 0.0);
        }
        st.fft.process(&mut st.fft_buffer);

        let scale = 1.0 / size as f32;
        let k = self.options.smoothing;
        let range = self.options.max_db - self.options.min_db;
        for (i, slot) in out.iter_mut().enumerate() {
            if i >= self.bins {
                *slot = 0;
                continue;
            }
            let magnitude = st.fft_buffer[i].norm() * scale;
            st.smoothed[i] = k * st.smoothed[i] + (1.0 - k) * magnitude;
            let db = 20.0 * st.smoothed[i].max(1e-12).log10();
            let norm = (db - self.options.min_db) / range;
            *slot = (norm.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
}

impl std::fmt::Debug for AnalyserHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyserHandle")
            .field("id", &self.id)
            .field("bins", &self.bins)
            .finish_non_exhaustive()
    }
}
