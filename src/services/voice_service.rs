use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;
use opus::{Application, Channels, Encoder};
use rubato::{FftFixedIn, Resampler};
use serde::Serialize;
use webm::mux::{AudioCodecId, Segment, Track, Writer};

use crate::error::{ChatError, Result};

/// Rates libopus encodes at directly. Anything else is resampled to 48 kHz.
const OPUS_RATES: [u32; 5] = [8_000, 12_000, 16_000, 24_000, 48_000];
const OPUS_FULLBAND_RATE: u32 = 48_000;

const FRAME_MS: u64 = 20;
const MAX_PACKET_BYTES: usize = 4000;
const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// One recording, packaged for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub file_name: String,
}

impl AudioClip {
    /// Encodes mono samples as Opus in a WebM container.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Result<Self> {
        Ok(Self {
            bytes: samples_to_webm_bytes(samples, sample_rate)?,
            mime: "audio/webm".to_string(),
            file_name: "recording.webm".to_string(),
        })
    }
}

fn samples_to_webm_bytes(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    if sample_rate == 0 {
        return Err(ChatError::Audio("Sample rate must be positive".to_string()));
    }

    let (samples, rate) = if OPUS_RATES.contains(&sample_rate) {
        (samples.to_vec(), sample_rate)
    } else {
        (
            resample(samples, sample_rate, OPUS_FULLBAND_RATE)?,
            OPUS_FULLBAND_RATE,
        )
    };

    let mut encoder = Encoder::new(rate, Channels::Mono, Application::Voip)
        .map_err(|e| ChatError::Audio(format!("Failed to initialize Opus encoder: {}", e)))?;
    let lookahead = encoder
        .get_lookahead()
        .map_err(|e| ChatError::Audio(format!("Failed to query Opus lookahead: {}", e)))?;
    // Pre-skip is always counted at 48 kHz.
    let pre_skip = (lookahead.max(0) as u64 * 48_000 / rate as u64) as u16;

    let mut segment = Segment::new(Writer::new(Cursor::new(Vec::new())))
        .ok_or_else(|| ChatError::Audio("Failed to initialize WebM muxer".to_string()))?;
    let mut track = segment.add_audio_track(rate as i32, 1, None, AudioCodecId::Opus);
    if !segment.set_codec_private(track.track_number(), &opus_head(pre_skip, sample_rate)) {
        return Err(ChatError::Audio("Failed to write Opus header".to_string()));
    }

    let frame_len = (rate as u64 * FRAME_MS / 1000) as usize;
    // An empty recording still gets one silent frame so the file is playable.
    let frame_count = samples.len().div_ceil(frame_len).max(1);
    let mut frame = vec![0.0f32; frame_len];
    let mut packet = vec![0u8; MAX_PACKET_BYTES];

    for index in 0..frame_count {
        let start = (index * frame_len).min(samples.len());
        let end = (start + frame_len).min(samples.len());
        frame.fill(0.0);
        for (slot, sample) in frame.iter_mut().zip(&samples[start..end]) {
            *slot = sample.clamp(-1.0, 1.0);
        }

        let len = encoder
            .encode_float(&frame, &mut packet)
            .map_err(|e| ChatError::Audio(format!("Failed to encode Opus frame: {}", e)))?;
        let timestamp_ns = index as u64 * FRAME_MS * 1_000_000;
        if !track.add_frame(&packet[..len], timestamp_ns, true) {
            return Err(ChatError::Audio("Failed to write WebM frame".to_string()));
        }
    }

    let writer = segment
        .try_finalize(None)
        .map_err(|_| ChatError::Audio("Failed to finalize WebM data".to_string()))?;
    Ok(writer.unwrap().into_inner())
}

/// `OpusHead` identification header (RFC 7845 section 5.1), stored as the
/// track's codec private data.
fn opus_head(pre_skip: u16, input_rate: u32) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead");
    head.push(1); // version
    head.push(1); // channels
    head.extend_from_slice(&pre_skip.to_le_bytes());
    head.extend_from_slice(&input_rate.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes()); // output gain
    head.push(0); // mapping family
    head
}

fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    let mut resampler =
        FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLER_CHUNK_SIZE, 1, 1)
            .map_err(|e| ChatError::Audio(format!("Failed to create resampler: {}", e)))?;

    let expected = (samples.len() as u64 * to as u64 / from as u64) as usize;
    let mut output = Vec::with_capacity(expected + RESAMPLER_CHUNK_SIZE);

    for chunk in samples.chunks(RESAMPLER_CHUNK_SIZE) {
        let resampled = if chunk.len() == RESAMPLER_CHUNK_SIZE {
            resampler.process(&[chunk], None)
        } else {
            // Last chunk is padded with silence.
            let mut last = chunk.to_vec();
            last.resize(RESAMPLER_CHUNK_SIZE, 0.0);
            resampler.process(&[last], None)
        };
        let resampled =
            resampled.map_err(|e| ChatError::Audio(format!("Resampling failed: {}", e)))?;
        output.extend_from_slice(&resampled[0]);
    }

    output.truncate(expected);
    Ok(output)
}

/// Microphone access. Implementations own the input device between
/// `start` and `stop` and buffer audio in arrival order.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Opens the microphone. Fails with `ChatError::Permission` when access
    /// is refused or no device exists.
    async fn start(&self) -> Result<()>;

    /// Closes the microphone and returns everything captured since `start`.
    async fn stop(&self) -> Result<AudioClip>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderState {
    Idle,
    Starting,
    Recording(u64),
}

/// What the recorder is doing, as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecorderStatus {
    Idle,
    /// Waiting for the microphone to open, e.g. behind a permission prompt.
    Starting,
    Recording,
}

/// `idle -> recording -> idle`. Every recording gets a fresh session number
/// so a timer armed for an old session cannot stop a newer one.
pub struct VoiceRecorder {
    capture: Arc<dyn AudioCapture>,
    state: Mutex<RecorderState>,
    next_session: Mutex<u64>,
}

impl VoiceRecorder {
    pub fn new(capture: Arc<dyn AudioCapture>) -> Self {
        Self {
            capture,
            state: Mutex::new(RecorderState::Idle),
            next_session: Mutex::new(1),
        }
    }

    fn set_state(&self, state: RecorderState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    pub fn status(&self) -> RecorderStatus {
        match self.state.lock().map(|s| *s) {
            Ok(RecorderState::Recording(_)) => RecorderStatus::Recording,
            Ok(RecorderState::Starting) => RecorderStatus::Starting,
            Ok(RecorderState::Idle) | Err(_) => RecorderStatus::Idle,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.status() == RecorderStatus::Recording
    }

    /// Starts a session and returns its number.
    pub async fn start(&self) -> Result<u64> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| ChatError::Audio("Recorder state poisoned".to_string()))?;
            if *state != RecorderState::Idle {
                return Err(ChatError::AlreadyRecording);
            }
            *state = RecorderState::Starting;
        }

        if let Err(e) = self.capture.start().await {
            self.set_state(RecorderState::Idle);
            return Err(e);
        }

        let session = {
            let mut next = self
                .next_session
                .lock()
                .map_err(|_| ChatError::Audio("Recorder state poisoned".to_string()))?;
            let session = *next;
            *next += 1;
            session
        };
        self.set_state(RecorderState::Recording(session));
        debug!("Recording session {} started", session);
        Ok(session)
    }

    /// Stops the running session. With `Some(session)`, only that session
    /// is stopped; anything else yields `NotRecording`.
    pub async fn stop(&self, session: Option<u64>) -> Result<AudioClip> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| ChatError::Audio("Recorder state poisoned".to_string()))?;
            match (*state, session) {
                (RecorderState::Recording(current), None) => {
                    debug!("Recording session {} stopped by user", current);
                }
                (RecorderState::Recording(current), Some(wanted)) if current == wanted => {
                    debug!("Recording session {} hit the time limit", current);
                }
                _ => return Err(ChatError::NotRecording),
            }
            *state = RecorderState::Idle;
        }

        self.capture.stop().await
    }
}
