use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, StreamConfig};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use super::decoder::{AudioDecoder, DecodeStatus};
use super::ring::RingBuffer;
use crate::error::PlaybackError;

/// Output ring size. ~0.75s of stereo at 44.1kHz.
const OUTPUT_RING_SIZE: usize = 65536;
/// Output channel count requested from the device.
const OUTPUT_CHANNELS: u16 = 2;
/// Extra time allowed past the buffered audio when draining at end of stream.
const DRAIN_SLACK: Duration = Duration::from_secs(1);
/// Frames downmixed per step in the output callback.
const TAP_CHUNK: usize = 256;

/// What a media element plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSrc {
    Url(String),
    File(PathBuf),
}

impl fmt::Display for MediaSrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSrc::Url(url) => f.write_str(url),
            MediaSrc::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Whether audible playback may begin before the first user gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoplayPolicy {
    Allowed,
    #[default]
    RequireGesture,
}

/// A playable handle owned by one backend.
///
/// `play` blocks until the source is audible or rejected, so callers run it
/// off the console thread. Everything else is non-blocking and safe to call
/// on an element that never played.
pub trait MediaElement: Send + Sync {
    /// Set the source. Interrupts any pending `play`.
    fn load(&self, src: MediaSrc);
    fn play(&self) -> Result<(), PlaybackError>;
    /// Interrupts any pending `play`.
    fn pause(&self);
    /// Seek back to the start of the current source.
    fn rewind(&self);
    fn set_volume(&self, volume: f32);
    /// Route rendered audio into `tap`, replacing any previous connection.
    fn connect_tap(&self, tap: Arc<RingBuffer>);
    fn is_playing(&self) -> bool;
    fn position_secs(&self) -> f64;
    /// Rate of the current source, 0 before anything was opened.
    fn sample_rate(&self) -> u32;
}

/// Builds the elements backends create lazily on first play.
pub trait ElementFactory: Send + Sync {
    fn create(&self, name: &str) -> Arc<dyn MediaElement>;
}

/// Factory for real cpal-backed elements.
pub struct OutputElementFactory;

impl ElementFactory for OutputElementFactory {
    fn create(&self, name: &str) -> Arc<dyn MediaElement> {
        Arc::new(OutputElement::new(name))
    }
}

enum ElementCommand {
    Load(MediaSrc),
    Play {
        epoch: u64,
        reply: Sender<Result<(), PlaybackError>>,
    },
    Pause,
    Rewind,
    Connect(Arc<RingBuffer>),
    Shutdown,
}

/// State shared between the element handle, its command thread, the decode
/// thread and the cpal callback.
struct Shared {
    /// Bumped by load/pause so an in-flight play can tell it was overtaken.
    epoch: AtomicU64,
    playing: AtomicBool,
    volume: AtomicU32,
    frames_played: AtomicU64,
    sample_rate: AtomicU32,
}

/// Media element rendering to the default cpal output device.
///
/// The cpal stream lives on a dedicated command thread; decoding runs on a
/// per-source decode thread feeding an SPSC ring.
pub struct OutputElement {
    name: String,
    cmd_tx: Sender<ElementCommand>,
    shared: Arc<Shared>,
}

impl OutputElement {
    pub fn new(name: &str) -> Self {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            epoch: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
            frames_played: AtomicU64::new(0),
            sample_rate: AtomicU32::new(0),
        });

        let shared_c = shared.clone();
        let thread_name = format!("cockpit-element-{name}");
        if let Err(e) = thread::Builder::new()
            .name(thread_name)
            .spawn(move || element_thread(cmd_rx, shared_c))
        {
            // Commands will fail with ElementGone
            log::error!("Failed to spawn element thread for {name}: {e}");
        }

        Self {
            name: name.to_string(),
            cmd_tx,
            shared,
        }
    }

    fn send(&self, cmd: ElementCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            log::debug!("Element {} thread gone, command dropped", self.name);
        }
    }
}

impl MediaElement for OutputElement {
    fn load(&self, src: MediaSrc) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        self.send(ElementCommand::Load(src));
    }

    fn play(&self) -> Result<(), PlaybackError> {
        let epoch = self.shared.epoch.load(Ordering::Acquire);
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.cmd_tx
            .send(ElementCommand::Play { epoch, reply })
            .map_err(|_| PlaybackError::ElementGone)?;
        rx.recv().map_err(|_| PlaybackError::ElementGone)?
    }

    fn pause(&self) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        self.shared.playing.store(false, Ordering::Release);
        self.send(ElementCommand::Pause);
    }

    fn rewind(&self) {
        self.send(ElementCommand::Rewind);
    }

    fn set_volume(&self, volume: f32) {
        self.shared
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn connect_tap(&self, tap: Arc<RingBuffer>) {
        self.send(ElementCommand::Connect(tap));
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    fn position_secs(&self) -> f64 {
        let rate = self.shared.sample_rate.load(Ordering::Relaxed);
        if rate == 0 {
            return 0.0;
        }
        self.shared.frames_played.load(Ordering::Relaxed) as f64 / rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.shared.sample_rate.load(Ordering::Relaxed)
    }
}

impl Drop for OutputElement {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(ElementCommand::Shutdown);
    }
}

/// A decoded source attached to an output stream.
struct Playback {
    stream: cpal::Stream,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    /// Set once the element let go of this playback. Ends an end-of-stream
    /// drain that nothing will read any more.
    stopped: Arc<AtomicBool>,
}

impl Playback {
    fn stop(self) {
        self.running.store(false, Ordering::Release);
        self.stopped.store(true, Ordering::Release);
        drop(self.stream);
    }
}

fn element_thread(cmd_rx: Receiver<ElementCommand>, shared: Arc<Shared>) {
    let mut src: Option<MediaSrc> = None;
    let mut tap: Option<Arc<RingBuffer>> = None;
    let mut current: Option<Playback> = None;

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            ElementCommand::Load(next) => {
                if let Some(p) = current.take() {
                    p.stop();
                }
                shared.playing.store(false, Ordering::Release);
                shared.frames_played.store(0, Ordering::Relaxed);
                src = Some(next);
            }
            ElementCommand::Play { epoch, reply } => {
                let result = handle_play(epoch, src.as_ref(), tap.as_ref(), &mut current, &shared);
                let _ = reply.send(result);
            }
            ElementCommand::Pause => {
                if let Some(ref p) = current {
                    p.paused.store(true, Ordering::Release);
                    if let Err(e) = p.stream.pause() {
                        log::debug!("Stream pause failed: {e}");
                    }
                }
                shared.playing.store(false, Ordering::Release);
            }
            ElementCommand::Rewind => {
                // Re-open from the beginning on next play
                if let Some(p) = current.take() {
                    p.stop();
                }
                shared.playing.store(false, Ordering::Release);
                shared.frames_played.store(0, Ordering::Relaxed);
            }
            ElementCommand::Connect(next) => {
                // A running stream keeps the old tap until the next open
                tap = Some(next);
            }
            ElementCommand::Shutdown => break,
        }
    }

    if let Some(p) = current.take() {
        p.stop();
    }
}

fn handle_play(
    epoch: u64,
    src: Option<&MediaSrc>,
    tap: Option<&Arc<RingBuffer>>,
    current: &mut Option<Playback>,
    shared: &Arc<Shared>,
) -> Result<(), PlaybackError> {
    if shared.epoch.load(Ordering::Acquire) != epoch {
        return Err(PlaybackError::Interrupted);
    }

    // Resume a paused source
    if let Some(p) = current.as_ref() {
        if p.running.load(Ordering::Acquire) {
            p.stream
                .play()
                .map_err(|e| PlaybackError::Device(e.to_string()))?;
            p.paused.store(false, Ordering::Release);
            shared.playing.store(true, Ordering::Release);
            return Ok(());
        }
    }
    if let Some(p) = current.take() {
        p.stop();
    }

    let src = src.ok_or(PlaybackError::NoSource)?;
    let decoder = AudioDecoder::open(src)?;

    // Opening a stream can take seconds; a pause/load may have landed meanwhile
    if shared.epoch.load(Ordering::Acquire) != epoch {
        return Err(PlaybackError::Interrupted);
    }

    let playback = start_output(decoder, tap.cloned(), shared)?;
    *current = Some(playback);
    shared.playing.store(true, Ordering::Release);
    Ok(())
}

fn start_output(
    mut decoder: AudioDecoder,
    tap: Option<Arc<RingBuffer>>,
    shared: &Arc<Shared>,
) -> Result<Playback, PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::Device("no output device".into()))?;

    let sample_rate = decoder.sample_rate();
    let in_channels = decoder.channels();
    let config = StreamConfig {
        channels: OUTPUT_CHANNELS,
        sample_rate,
        buffer_size: BufferSize::Default,
    };

    let ring = Arc::new(RingBuffer::new(OUTPUT_RING_SIZE));
    let running = Arc::new(AtomicBool::new(true));
    let paused = Arc::new(AtomicBool::new(false));
    let stopped = Arc::new(AtomicBool::new(false));

    shared.sample_rate.store(sample_rate, Ordering::Relaxed);
    shared.frames_played.store(0, Ordering::Relaxed);

    let ring_cb = ring.clone();
    let paused_cb = paused.clone();
    let shared_cb = shared.clone();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let read = if paused_cb.load(Ordering::Relaxed) {
                    0
                } else {
                    ring_cb.read(data)
                };
                data[read..].fill(0.0);
                // The analyser hears what is rendered, silence included
                if let Some(ref tap) = tap {
                    feed_tap(tap, data, OUTPUT_CHANNELS as usize);
                }
                let vol = f32::from_bits(shared_cb.volume.load(Ordering::Relaxed));
                for s in &mut data[..read] {
                    *s *= vol;
                }
                shared_cb
                    .frames_played
                    .fetch_add((read / OUTPUT_CHANNELS as usize) as u64, Ordering::Relaxed);
            },
            |err| {
                log::error!("Audio output error: {err}");
            },
            None,
        )
        .map_err(|e| PlaybackError::Device(e.to_string()))?;

    let ring_dec = ring.clone();
    let running_dec = running.clone();
    let paused_dec = paused.clone();
    let stopped_dec = stopped.clone();
    let shared_dec = shared.clone();
    thread::Builder::new()
        .name("cockpit-decode".into())
        .spawn(move || {
            decode_loop(&mut decoder, in_channels, &ring_dec, &running_dec, &paused_dec);
            // Still running means the source ended on its own rather than being stopped
            if running_dec.swap(false, Ordering::AcqRel) {
                let buffered = ring_dec.available() as f64
                    / (f64::from(sample_rate.max(1)) * f64::from(OUTPUT_CHANNELS));
                let deadline = Instant::now() + Duration::from_secs_f64(buffered) + DRAIN_SLACK;
                drain_output(&ring_dec, &stopped_dec, deadline);
                if !stopped_dec.load(Ordering::Acquire) {
                    shared_dec.playing.store(false, Ordering::Release);
                }
            }
        })
        .map_err(|e| PlaybackError::Device(format!("decode thread: {e}")))?;

    stream
        .play()
        .map_err(|e| PlaybackError::Device(e.to_string()))?;

    Ok(Playback {
        stream,
        running,
        paused,
        stopped,
    })
}

/// Wait for the output to play out what is buffered. Gives up when the
/// playback is stopped or at `deadline` (e.g. paused with audio queued).
fn drain_output(ring: &RingBuffer, stopped: &AtomicBool, deadline: Instant) {
    while ring.available() > 0 && !stopped.load(Ordering::Acquire) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
}

/// Downmix interleaved output to mono and push it into an analyser tap.
/// Allocation-free so it can run in the output callback.
fn feed_tap(tap: &RingBuffer, interleaved: &[f32], channels: usize) {
    let channels = channels.max(1);
    let mut mono = [0.0f32; TAP_CHUNK];
    for chunk in interleaved.chunks(TAP_CHUNK * channels) {
        let mut frames = 0;
        for (dst, frame) in mono.iter_mut().zip(chunk.chunks_exact(channels)) {
            *dst = frame.iter().sum::<f32>() / channels as f32;
            frames += 1;
        }
        tap.push_overwrite(&mono[..frames]);
    }
}

fn decode_loop(
    decoder: &mut AudioDecoder,
    in_channels: usize,
    ring: &RingBuffer,
    running: &AtomicBool,
    paused: &AtomicBool,
) {
    let out_channels = OUTPUT_CHANNELS as usize;
    let mut frames = Vec::new();

    while running.load(Ordering::Acquire) {
        if paused.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(20));
            continue;
        }

        let samples = match decoder.next_samples() {
            Ok(s) => s,
            Err(DecodeStatus::EndOfStream) => {
                log::info!("Playback reached end of stream");
                break;
            }
            Err(DecodeStatus::Error(e)) => {
                log::warn!("Decode error, stopping playback: {e}");
                break;
            }
        };

        frames.clear();
        for frame in samples.chunks(in_channels) {
            for ch in 0..out_channels {
                // Mono sources fan out, extra channels fold into the first two
                frames.push(frame[ch.min(frame.len() - 1)]);
            }
        }

        let mut offset = 0;
        while offset < frames.len() && running.load(Ordering::Acquire) {
            offset += ring.push(&frames[offset..]);
            if offset < frames.len() {
                thread::sleep(Duration::from_millis(5));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_src_display() {
        assert_eq!(
            MediaSrc::Url("https://example.com/live".into()).to_string(),
            "https://example.com/live"
        );
        assert_eq!(MediaSrc::File("/music/a.flac".into()).to_string(), "/music/a.flac");
    }

    #[test]
    fn autoplay_policy_defaults_to_gesture() {
        assert_eq!(AutoplayPolicy::default(), AutoplayPolicy::RequireGesture);
        let p: AutoplayPolicy = serde_json::from_str("\"allowed\"").unwrap();
        assert_eq!(p, AutoplayPolicy::Allowed);
    }

    #[test]
    fn play_without_source_is_rejected() {
        let el = OutputElement::new("test");
        assert_eq!(el.play(), Err(PlaybackError::NoSource));
        assert!(!el.is_playing());
    }

    #[test]
    fn idle_element_tolerates_pause_and_rewind() {
        let el = OutputElement::new("idle");
        el.pause();
        el.rewind();
        el.set_volume(3.0);
        assert!(!el.is_playing());
        assert_eq!(el.position_secs(), 0.0);
    }

    #[test]
    fn tap_gets_downmixed_render() {
        let tap = RingBuffer::new(4096);
        let stereo: Vec<f32> = (0..600).flat_map(|i| [i as f32, -(i as f32) + 1.0]).collect();
        feed_tap(&tap, &stereo, 2);
        assert_eq!(tap.available(), 600);
        let mut mono = vec![0.0; 600];
        tap.read(&mut mono);
        assert!(mono.iter().all(|&m| (m - 0.5).abs() < 1e-6));
    }

    #[test]
    fn drain_returns_once_output_is_empty() {
        let ring = Arc::new(RingBuffer::new(1024));
        ring.push(&[0.1; 512]);
        let reader = ring.clone();
        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            let mut out = vec![0.0; 512];
            reader.read(&mut out);
        });
        let start = Instant::now();
        drain_output(&ring, &AtomicBool::new(false), start + Duration::from_secs(10));
        consumer.join().unwrap();
        assert_eq!(ring.available(), 0);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn drain_without_reader_ends_on_stop_or_deadline() {
        let ring = RingBuffer::new(1024);
        ring.push(&[0.1; 512]);

        let start = Instant::now();
        drain_output(&ring, &AtomicBool::new(false), start + Duration::from_millis(60));
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert!(start.elapsed() < Duration::from_secs(5));

        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            flag.store(true, Ordering::Release);
        });
        let start = Instant::now();
        drain_output(&ring, &stopped, start + Duration::from_secs(30));
        setter.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(ring.available(), 512);
    }
}
