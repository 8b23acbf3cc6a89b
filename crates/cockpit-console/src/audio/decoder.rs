use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::element::MediaSrc;
use crate::error::PlaybackError;

/// Decoder over a local file or a live HTTP(S) stream.
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

pub enum DecodeStatus {
    EndOfStream,
    Error(String),
}

/// A live stream that delivers nothing for this long is treated as dead.
const STALL_TIMEOUT: Duration = Duration::from_secs(15);
/// Bytes per read on the stream pump.
const PUMP_CHUNK: usize = 16 * 1024;

/// Reads a network body through a pump thread so a stalled connection
/// surfaces as `TimedOut` instead of blocking the decoder forever.
///
/// Once this reader is dropped the pump exits at its next read or send.
struct StallGuard {
    chunks: Receiver<io::Result<Vec<u8>>>,
    pending: Cursor<Vec<u8>>,
    timeout: Duration,
}

impl StallGuard {
    fn spawn(mut body: Box<dyn Read + Send>, timeout: Duration) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(8);
        thread::Builder::new()
            .name("cockpit-stream-pump".into())
            .spawn(move || {
                loop {
                    let mut chunk = vec![0u8; PUMP_CHUNK];
                    let msg = match body.read(&mut chunk) {
                        Ok(n) => {
                            chunk.truncate(n);
                            Ok(chunk)
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => Err(e),
                    };
                    let last = !matches!(msg, Ok(ref c) if !c.is_empty());
                    if tx.send(msg).is_err() || last {
                        break;
                    }
                }
            })?;
        Ok(Self {
            chunks: rx,
            pending: Cursor::new(Vec::new()),
            timeout,
        })
    }
}

impl Read for StallGuard {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.pending.read(buf)?;
        if n > 0 || buf.is_empty() {
            return Ok(n);
        }
        match self.chunks.recv_timeout(self.timeout) {
            Ok(Ok(chunk)) => {
                self.pending = Cursor::new(chunk);
                self.pending.read(buf)
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no stream data for {}s", self.timeout.as_secs_f32()),
            )),
            // Pump already delivered EOF or an error
            Err(RecvTimeoutError::Disconnected) => Ok(0),
        }
    }
}

impl AudioDecoder {
    pub fn open(src: &MediaSrc) -> Result<Self, PlaybackError> {
        let mut hint = Hint::new();
        let source: Box<dyn MediaSource> = match src {
            MediaSrc::File(path) => {
                if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                    hint.with_extension(ext);
                }
                let file = File::open(path)
                    .map_err(|e| PlaybackError::Open(format!("{}: {e}", path.display())))?;
                Box::new(file)
            }
            MediaSrc::Url(url) => {
                let (reader, content_type) = open_stream(url)?;
                if let Some(ext) = content_type.as_deref().and_then(extension_for_mime) {
                    hint.with_extension(ext);
                } else if let Some(ext) = Path::new(url).extension().and_then(|e| e.to_str()) {
                    hint.with_extension(ext);
                }
                let guarded = StallGuard::spawn(reader, STALL_TIMEOUT)
                    .map_err(|e| PlaybackError::Open(format!("{url}: {e}")))?;
                Box::new(ReadOnlySource::new(guarded))
            }
        };

        let mss = MediaSourceStream::new(source, Default::default());
        let opened = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| PlaybackError::Probe(e.to_string()))?;
        let format = opened.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlaybackError::Probe("no audio track".into()))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let channels = track.codec_params.channels.map_or(2, |c| c.count()).max(1);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| PlaybackError::Decode(e.to_string()))?;

        log::info!("Decoder opened {src}: {sample_rate}Hz, {channels}ch");

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Decode the next packet, returning interleaved f32 samples.
    pub fn next_samples(&mut self) -> Result<Vec<f32>, DecodeStatus> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Err(DecodeStatus::EndOfStream);
                }
                Err(e) => return Err(DecodeStatus::Error(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // Corrupt frames are common on live streams; skip them
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(DecodeStatus::Error(e.to_string())),
            };

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            return Ok(sample_buf.samples().to_vec());
        }
    }
}

fn open_stream(url: &str) -> Result<(Box<dyn Read + Send>, Option<String>), PlaybackError> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_connect(Some(Duration::from_secs(10)))
        .timeout_recv_response(Some(Duration::from_secs(10)))
        .build()
        .into();

    let response = agent
        .get(url)
        .header("Icy-MetaData", "0")
        .call()
        .map_err(|e| PlaybackError::Open(format!("{url}: {e}")))?;

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_ascii_lowercase());

    let reader = response.into_body().into_reader();
    Ok((Box::new(reader), content_type))
}

/// Map a stream's Content-Type to a probe hint.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let mime = mime.split(';').next().unwrap_or("").trim();
    match mime {
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => Some("mp3"),
        "audio/aac" | "audio/aacp" | "audio/x-aac" => Some("aac"),
        "audio/ogg" | "application/ogg" | "audio/vorbis" => Some("ogg"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        _ => None,
    }
}
