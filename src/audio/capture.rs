//! Microphone capture.
//!
//! [`CpalCapture`] opens the input device at its native rate and hands mono
//! frames to a sink. [`CaptureHandle`] owns an acquired input for the life
//! of a session: it regroups frames into fixed-size blocks, converts each
//! block to 16 kHz PCM16, encodes it and pushes it to the transport without
//! ever waiting on the network.
//!
//! The stream is started before the transport exists, so a microphone that
//! refuses to open fails the session before anything is connected. Blocks
//! produced before [`CaptureHandle::attach`] are dropped.

use crate::audio::codec::{self, BlockAccumulator};
use crate::audio::device::{AudioInput, FrameSink};
use crate::config::AudioConfig;
use crate::error::{Result, SessionError};
use crate::pipeline::messages::PcmChunk;
use crate::transport::AudioSender;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info};

/// Audio capture from the system microphone via cpal.
pub struct CpalCapture {
    device: cpal::Device,
    stream_config: StreamConfig,
    stream: Option<cpal::Stream>,
}

impl CpalCapture {
    /// Acquire the configured (or default) input device.
    ///
    /// Uses the device's default configuration for maximum compatibility;
    /// rate conversion happens in software.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Acquisition`] if no input device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| SessionError::Acquisition(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    SessionError::Acquisition(format!("input device '{name}' not found"))
                })?
        } else {
            host.default_input_device()
                .ok_or_else(|| SessionError::Acquisition("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        let default_config = device
            .default_input_config()
            .map_err(|e| SessionError::Acquisition(format!("no default input config: {e}")))?;

        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            "native input config: {}Hz, {} channels",
            stream_config.sample_rate, stream_config.channels
        );

        Ok(Self {
            device,
            stream_config,
            stream: None,
        })
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| SessionError::Acquisition(format!("cannot enumerate devices: {e}")))?;

        Ok(devices
            .filter_map(|d| d.description().ok().map(|desc| desc.name().to_owned()))
            .collect())
    }
}

impl AudioInput for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.stream_config.sample_rate
    }

    fn start(&mut self, mut sink: FrameSink) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let channels = self.stream_config.channels;

        let stream = self
            .device
            .build_input_stream(
                &self.stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    if channels > 1 {
                        sink(codec::to_mono(data, channels).as_slice());
                    } else {
                        sink(data);
                    }
                },
                move |err| {
                    error!("audio input stream error: {err}");
                },
                None,
            )
            .map_err(|e| SessionError::Acquisition(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| SessionError::Acquisition(format!("failed to start input stream: {e}")))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            info!("audio capture stopped");
        }
    }
}

/// A session's microphone, from acquisition to release.
///
/// Releasing takes the input out of the handle before stopping it, so a
/// second [`stop`](Self::stop) (or the one in `Drop`) finds nothing to do.
pub struct CaptureHandle {
    input: Option<Box<dyn AudioInput>>,
    outbound: Arc<Mutex<Option<AudioSender>>>,
    dropped: Arc<AtomicU64>,
    sent: Arc<AtomicU64>,
}

impl CaptureHandle {
    /// Take ownership of an acquired input. Nothing is captured until
    /// [`start`](Self::start).
    pub fn new(input: Box<dyn AudioInput>) -> Self {
        Self {
            input: Some(input),
            outbound: Arc::new(Mutex::new(None)),
            dropped: Arc::new(AtomicU64::new(0)),
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the microphone stream.
    ///
    /// One chunk is produced per `config.capture_block_size` frames. Chunks
    /// go to the sender given to [`attach`](Self::attach); until then, and
    /// whenever the transport cannot take one right away, they are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Acquisition`] if the stream cannot start, or
    /// if the handle was already released.
    pub fn start(&mut self, config: &AudioConfig) -> Result<()> {
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| SessionError::Acquisition("capture already released".into()))?;

        let source_rate = input.sample_rate();
        let target_rate = config.input_sample_rate;
        let mut blocks = BlockAccumulator::new(config.capture_block_size);
        let outbound = Arc::clone(&self.outbound);
        let dropped = Arc::clone(&self.dropped);
        let sent = Arc::clone(&self.sent);

        input.start(Box::new(move |frame: &[f32]| {
            blocks.push(frame, |block| {
                let pcm = codec::resample_to_pcm16(block, source_rate, target_rate);
                let chunk = PcmChunk::from_samples(&pcm, target_rate);
                // Never wait on the audio thread: a contended slot drops the chunk.
                let delivered = match outbound.try_lock() {
                    Ok(slot) => slot.as_ref().is_some_and(|tx| tx.send(chunk)),
                    Err(_) => false,
                };
                if delivered {
                    sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("outbound audio path unavailable, dropping chunk");
                }
            });
        }))?;

        info!(
            "audio capture started: native {}Hz -> target {}Hz, {} frame blocks",
            source_rate, target_rate, config.capture_block_size
        );
        Ok(())
    }

    /// Route captured chunks to the transport from now on.
    pub fn attach(&self, outbound: AudioSender) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(outbound);
        debug!("capture attached to transport");
    }

    /// Chunks dropped because the transport could not accept them.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Chunks handed to the transport.
    pub fn sent_chunks(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Stop capturing and release the microphone. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut input) = self.input.take() {
            input.stop();
            info!(
                sent = self.sent_chunks(),
                dropped = self.dropped_chunks(),
                "microphone released"
            );
        }
    }

    /// Whether the microphone is still held.
    pub fn is_held(&self) -> bool {
        self.input.is_some()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
