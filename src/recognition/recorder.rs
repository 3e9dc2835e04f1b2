//! Microphone capture with cpal.
//!
//! The input stream is opened on first use and then kept open on its own
//! thread, so later sessions start without device latency. Captures
//! 16kHz mono f32 audio suitable for Whisper.

use std::path::Path;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{AudioConfig, SilenceConfig};
use crate::{Error, Result};

pub struct AudioRecorder {
    config: AudioConfig,
    silence: SilenceConfig,
    shared: Arc<Mutex<RecorderInner>>,
    /// Dropping this sender closes the stream thread.
    stream_guard: Mutex<Option<std_mpsc::Sender<()>>>,
}

struct RecorderInner {
    is_recording: bool,
    buffer: Vec<f32>,
    max_samples: usize,
    silence_start: Option<Instant>,
    recording_start: Option<Instant>,
    should_auto_stop: bool,
}

impl AudioRecorder {
    pub fn new(config: AudioConfig, silence: SilenceConfig) -> Self {
        let max_samples = (config.max_duration * f64::from(config.sample_rate)) as usize;

        Self {
            shared: Arc::new(Mutex::new(RecorderInner {
                is_recording: false,
                buffer: Vec::with_capacity(max_samples),
                max_samples,
                silence_start: None,
                recording_start: None,
                should_auto_stop: false,
            })),
            config,
            silence,
            stream_guard: Mutex::new(None),
        }
    }

    /// Open the input stream if it isn't open yet.
    pub fn open_stream(&self) -> Result<()> {
        let mut guard = self.stream_guard.lock();
        if guard.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();
        let silence = self.silence.clone();
        let shared = Arc::clone(&self.shared);

        std::thread::Builder::new()
            .name("mic-stream".into())
            .spawn(move || {
                // cpal streams are not Send; the stream lives and dies here
                let stream = match build_stream(&config, &silence, shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until the recorder drops its sender
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Audio stream closed");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("audio thread exited during setup".into()))??;

        info!("Audio stream opened (ready for low-latency recording)");
        *guard = Some(stop_tx);
        Ok(())
    }

    pub fn start(&self) {
        let mut inner = self.shared.lock();
        inner.buffer.clear();
        inner.is_recording = true;
        inner.silence_start = None;
        inner.recording_start = Some(Instant::now());
        inner.should_auto_stop = false;
        info!("Recording started");
    }

    /// Stop recording and return the captured samples.
    pub fn stop(&self) -> Vec<f32> {
        let mut inner = self.shared.lock();
        inner.is_recording = false;
        inner.should_auto_stop = false;
        let samples = std::mem::take(&mut inner.buffer);
        let duration = samples.len() as f64 / f64::from(self.config.sample_rate);
        info!("Recording stopped: {:.1}s ({} samples)", duration, samples.len());
        samples
    }

    /// Silence detection or the length cap asked for the session to end.
    pub fn should_auto_stop(&self) -> bool {
        self.shared.lock().should_auto_stop
    }

    pub fn is_silent(samples: &[f32], threshold: f32) -> bool {
        let rms = rms_energy(samples);
        debug!("Audio RMS energy: {rms:.4} (threshold: {threshold})");
        rms < threshold
    }

    /// Write samples as 16-bit PCM WAV.
    pub fn save_wav(&self, path: &Path, samples: &[f32]) -> Result<()> {
        let spec = hound::WavSpec {
            channels: self.config.channels,
            sample_rate: self.config.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let wav_err = |e: hound::Error| Error::Audio(format!("WAV write failed: {e}"));

        let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
        for &sample in samples {
            let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(s).map_err(wav_err)?;
        }
        writer.finalize().map_err(wav_err)?;
        info!("Saved WAV to {}", path.display());
        Ok(())
    }
}

fn build_stream(
    config: &AudioConfig,
    silence: &SilenceConfig,
    shared: Arc<Mutex<RecorderInner>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input audio device available".into()))?;

    info!(
        "Using audio device: {}",
        device.name().unwrap_or_else(|_| "unknown".into())
    );

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.chunk_size),
    };

    let threshold = silence.threshold;
    let silence_duration = silence.duration;
    let min_speech = silence.min_speech_duration;
    let max_recording = silence.max_recording_duration;

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mut inner = shared.lock();
                if !inner.is_recording {
                    return;
                }

                let remaining = inner.max_samples.saturating_sub(inner.buffer.len());
                let to_copy = data.len().min(remaining);
                inner.buffer.extend_from_slice(&data[..to_copy]);

                if inner.buffer.len() >= inner.max_samples {
                    warn!("Max recording buffer reached");
                    inner.should_auto_stop = true;
                    return;
                }

                let Some(started) = inner.recording_start else {
                    return;
                };
                let elapsed = started.elapsed().as_secs_f64();
                if elapsed >= max_recording {
                    info!("Max recording duration reached ({max_recording}s)");
                    inner.should_auto_stop = true;
                    return;
                }
                if elapsed < min_speech {
                    return;
                }

                if rms_energy(data) < threshold {
                    let silent_since = *inner.silence_start.get_or_insert_with(Instant::now);
                    if silent_since.elapsed().as_secs_f64() >= silence_duration {
                        debug!("Silence for {silence_duration}s, ending utterance");
                        inner.should_auto_stop = true;
                    }
                } else {
                    inner.silence_start = None;
                }
            },
            move |err| warn!("Audio stream error: {err}"),
            None,
        )
        .map_err(|e| Error::Audio(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| Error::Audio(format!("failed to start audio stream: {e}")))?;
    Ok(stream)
}

/// RMS energy of a block of samples.
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
