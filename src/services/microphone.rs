use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use log::{debug, error};
use tokio::sync::oneshot;

use crate::error::{ChatError, Result};
use super::voice_service::{AudioCapture, AudioClip};

struct ActiveSession {
    stop_tx: mpsc::Sender<()>,
    done_rx: oneshot::Receiver<(Vec<f32>, u32)>,
}

/// Default input device via cpal. The stream is not `Send`, so it lives
/// on its own thread for the length of a session.
#[derive(Default)]
pub struct MicrophoneCapture {
    session: Mutex<Option<ActiveSession>>,
}

impl MicrophoneCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if let Ok(mut buf) = buffer.lock() {
                // Downmix to mono.
                for frame in data.chunks(channels) {
                    let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
                    buf.push(sum / frame.len() as f32);
                }
            }
        },
        |err| error!("Input stream error: {}", err),
        None,
    )
}

fn open_stream(buffer: Arc<Mutex<Vec<f32>>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| ChatError::Permission("No microphone found".to_string()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| ChatError::Permission(e.to_string()))?;

    let sample_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.config();
    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, buffer),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, buffer),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, buffer),
        other => {
            return Err(ChatError::Audio(format!("Unsupported sample format {:?}", other)));
        }
    }
    .map_err(|e| ChatError::Permission(e.to_string()))?;

    stream
        .play()
        .map_err(|e| ChatError::Permission(e.to_string()))?;

    debug!("Microphone open at {} Hz", sample_rate);
    Ok((stream, sample_rate))
}

#[async_trait]
impl AudioCapture for MicrophoneCapture {
    async fn start(&self) -> Result<()> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel();

        thread::spawn(move || {
            let buffer = Arc::new(Mutex::new(Vec::new()));
            let (stream, sample_rate) = match open_stream(buffer.clone()) {
                Ok(opened) => opened,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            // Disconnect counts as stop too.
            let _ = stop_rx.recv();
            drop(stream);

            let samples = buffer.lock().map(|b| b.clone()).unwrap_or_default();
            let _ = done_tx.send((samples, sample_rate));
        });

        ready_rx
            .await
            .map_err(|_| ChatError::Audio("Microphone thread exited".to_string()))??;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ChatError::Audio("Microphone state poisoned".to_string()))?;
        *session = Some(ActiveSession { stop_tx, done_rx });
        Ok(())
    }

    async fn stop(&self) -> Result<AudioClip> {
        let active = self
            .session
            .lock()
            .map_err(|_| ChatError::Audio("Microphone state poisoned".to_string()))?
            .take()
            .ok_or(ChatError::NotRecording)?;

        let _ = active.stop_tx.send(());
        let (samples, sample_rate) = active
            .done_rx
            .await
            .map_err(|_| ChatError::Audio("Microphone thread exited".to_string()))?;

        debug!("Captured {} samples at {} Hz", samples.len(), sample_rate);
        tokio::task::spawn_blocking(move || AudioClip::from_samples(&samples, sample_rate))
            .await
            .map_err(|e| ChatError::Audio(format!("Encoder task failed: {}", e)))?
    }
}
