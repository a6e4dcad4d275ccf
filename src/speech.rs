//! Voice-over playback.
//!
//! Speech comes back as raw 16-bit little-endian PCM, 24 kHz mono. Buffers are
//! queued gaplessly: each starts at the later of the sink clock and the end of
//! the previously scheduled buffer.

use std::io::Cursor;
use std::time::Instant;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::credentials::ApiCredential;
use crate::error::{StudioError, StudioResult};

pub const SPEECH_SAMPLE_RATE: u32 = 24_000;
pub const SPEECH_CHANNELS: u16 = 1;

#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Raw PCM for `script`. Fails with `NoAudioReturned` when the service
    /// answers without audio.
    async fn synthesize_speech(&self, credential: &ApiCredential, script: &str) -> StudioResult<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved samples in [-1, 1).
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Decodes s16le PCM. A trailing odd byte is dropped.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> AudioBuffer {
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();
    AudioBuffer { samples, sample_rate, channels }
}

pub trait AudioSink: Send {
    /// Output clock, seconds.
    fn current_time(&self) -> f64;
    fn schedule(&mut self, buffer: AudioBuffer, start_at: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScheduledSlot {
    pub start: f64,
    pub duration: f64,
}

/// Single-writer "next free slot" pointer.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaybackQueue {
    next_start: f64,
}

impl PlaybackQueue {
    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn enqueue(&mut self, sink: &mut dyn AudioSink, buffer: AudioBuffer) -> ScheduledSlot {
        let start = self.next_start.max(sink.current_time());
        let duration = buffer.duration();
        sink.schedule(buffer, start);
        self.next_start = start + duration;
        ScheduledSlot { start, duration }
    }
}

pub trait OutputClock: Send {
    fn now(&self) -> f64;
}

/// Seconds since construction.
#[derive(Debug)]
pub struct WallClock(Instant);

impl Default for WallClock {
    fn default() -> Self {
        Self(Instant::now())
    }
}

impl OutputClock for WallClock {
    fn now(&self) -> f64 {
        self.0.elapsed().as_secs_f64()
    }
}

/// Sink that keeps the current run of back-to-back buffers on a timeline and
/// can render it as a WAV voice-over track. A buffer that starts after the
/// run has finished playing opens a new track; the old one is dropped.
pub struct TimelineSink {
    clock: Box<dyn OutputClock>,
    placed: Vec<(f64, AudioBuffer)>,
}

impl Default for TimelineSink {
    fn default() -> Self {
        Self::new(Box::new(WallClock::default()))
    }
}

impl TimelineSink {
    pub fn new(clock: Box<dyn OutputClock>) -> Self {
        Self { clock, placed: Vec::new() }
    }

    /// End of the last placed buffer, if any.
    fn segment_end(&self) -> Option<f64> {
        self.placed
            .iter()
            .map(|(start, buffer)| start + buffer.duration())
            .reduce(f64::max)
    }

    /// Mono 16-bit WAV starting at the first buffer of the current track.
    pub fn render_wav(&self) -> StudioResult<Vec<u8>> {
        let origin = self.placed.iter().map(|(s, _)| *s).fold(f64::INFINITY, f64::min);
        let origin = if origin.is_finite() { origin } else { 0.0 };

        let mut mix: Vec<f32> = Vec::new();
        for (start, buffer) in &self.placed {
            let offset = ((start - origin) * SPEECH_SAMPLE_RATE as f64).round() as usize;
            let mono = downmix(buffer);
            if mix.len() < offset + mono.len() {
                mix.resize(offset + mono.len(), 0.0);
            }
            for (i, s) in mono.into_iter().enumerate() {
                mix[offset + i] += s;
            }
        }

        let spec = WavSpec {
            channels: SPEECH_CHANNELS,
            sample_rate: SPEECH_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
            for s in mix {
                writer
                    .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .map_err(wav_error)?;
            }
            writer.finalize().map_err(wav_error)?;
        }
        Ok(cursor.into_inner())
    }
}

fn wav_error(e: hound::Error) -> StudioError {
    StudioError::Other(format!("wav: {}", e))
}

/// Averages channels. Resampling is not needed: every buffer here is decoded
/// at `SPEECH_SAMPLE_RATE`.
fn downmix(buffer: &AudioBuffer) -> Vec<f32> {
    let channels = buffer.channels.max(1) as usize;
    buffer
        .samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

impl AudioSink for TimelineSink {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn schedule(&mut self, buffer: AudioBuffer, start_at: f64) {
        // Tolerance covers float drift between the queue and the summed durations.
        if self.segment_end().is_some_and(|end| start_at > end + 1e-6) {
            debug!(dropped = self.placed.len(), "Voice-over queue went idle, starting a new track");
            self.placed.clear();
        }
        self.placed.push((start_at, buffer));
    }
}

/// The process-wide output: one sink and its running watermark.
pub struct SpeechPlayer<K: AudioSink> {
    queue: PlaybackQueue,
    sink: K,
}

impl<K: AudioSink> SpeechPlayer<K> {
    pub fn new(sink: K) -> Self {
        Self { queue: PlaybackQueue::default(), sink }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn play(&mut self, buffer: AudioBuffer) -> ScheduledSlot {
        self.queue.enqueue(&mut self.sink, buffer)
    }
}

/// Synthesizes `script` and queues it behind anything already scheduled.
pub async fn speak<K: AudioSink>(
    service: &dyn SpeechService,
    player: &Mutex<SpeechPlayer<K>>,
    credential: &ApiCredential,
    script: &str,
) -> StudioResult<ScheduledSlot> {
    if script.trim().is_empty() {
        return Err(StudioError::MissingRequiredInput("voice-over script"));
    }
    let pcm = service
        .synthesize_speech(credential, script)
        .await
        .map_err(StudioError::classify)?;
    if pcm.len() < 2 {
        return Err(StudioError::NoAudioReturned);
    }
    let buffer = decode_pcm16(&pcm, SPEECH_SAMPLE_RATE, SPEECH_CHANNELS);
    let slot = player.lock().play(buffer);
    info!(start = slot.start, duration = slot.duration, "Queued voice-over");
    Ok(slot)
}
