//! Agent audio playback.
//!
//! [`CpalPlayback`] is an always-running output stream that mixes scheduled
//! units against a sample-accurate clock. [`PlaybackScheduler`] owns the
//! session-side bookkeeping: the next start cursor and the set of units that
//! are still audible.

use crate::audio::codec;
use crate::audio::device::{AudioOutput, PlaybackEvent, UnitId};
use crate::config::AudioConfig;
use crate::error::{Result, SessionError};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Audio playback to system speakers via cpal.
pub struct CpalPlayback {
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<cpal::Stream>,
    sample_rate: u32,
}

impl CpalPlayback {
    /// Open the configured (or default) output device at the agent's rate.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Acquisition`] if no output device is available
    /// or the stream cannot start.
    pub fn new(config: &AudioConfig, events: mpsc::UnboundedSender<PlaybackEvent>) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| SessionError::Acquisition(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    SessionError::Acquisition(format!("output device '{name}' not found"))
                })?
        } else {
            host.default_output_device()
                .ok_or_else(|| SessionError::Acquisition("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        let channels = device
            .default_output_config()
            .map(|c| c.channels())
            .unwrap_or(1)
            .max(1);

        let stream_config = StreamConfig {
            channels,
            sample_rate: config.output_sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let mixer = Arc::new(Mutex::new(Mixer::new(events)));
        let render_mixer = Arc::clone(&mixer);
        let frame_width = usize::from(channels);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut mixer = match render_mixer.lock() {
                        Ok(m) => m,
                        Err(_) => {
                            data.fill(0.0);
                            return;
                        }
                    };
                    mixer.render(data, frame_width);
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| SessionError::Acquisition(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| SessionError::Acquisition(format!("failed to start output stream: {e}")))?;

        info!(
            "audio playback started: {}Hz, {} channels",
            config.output_sample_rate, channels
        );

        Ok(Self {
            mixer,
            stream: Some(stream),
            sample_rate: config.output_sample_rate,
        })
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| SessionError::Acquisition(format!("cannot enumerate devices: {e}")))?;

        Ok(devices
            .filter_map(|d| d.description().ok().map(|desc| desc.name().to_owned()))
            .collect())
    }

    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioOutput for CpalPlayback {
    fn now(&self) -> f64 {
        self.mixer().frame as f64 / f64::from(self.sample_rate)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn schedule(&mut self, id: UnitId, samples: Vec<f32>, start_at: f64) -> Result<()> {
        if self.stream.is_none() {
            return Err(SessionError::Acquisition("output device closed".into()));
        }
        let start_frame = (start_at * f64::from(self.sample_rate)).round().max(0.0) as u64;
        self.mixer().voices.push(Voice {
            id,
            start_frame,
            samples,
            position: 0,
        });
        Ok(())
    }

    fn stop(&mut self, id: UnitId) {
        self.mixer().voices.retain(|v| v.id != id);
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            self.mixer().voices.clear();
            info!("audio playback stopped");
        }
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

/// One scheduled buffer inside the mixer.
struct Voice {
    id: UnitId,
    start_frame: u64,
    samples: Vec<f32>,
    position: usize,
}

/// Render state shared with the output callback.
struct Mixer {
    /// Frames rendered since the stream opened. This is the audio clock.
    frame: u64,
    voices: Vec<Voice>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl Mixer {
    fn new(events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        Self {
            frame: 0,
            voices: Vec::new(),
            events,
        }
    }

    /// Fill one interleaved output buffer and report voices that ran out.
    fn render(&mut self, data: &mut [f32], channels: usize) {
        for out in data.chunks_mut(channels) {
            let mut mixed = 0.0f32;
            for voice in &mut self.voices {
                if self.frame >= voice.start_frame && voice.position < voice.samples.len() {
                    mixed += voice.samples[voice.position];
                    voice.position += 1;
                }
            }
            out.fill(mixed.clamp(-1.0, 1.0));
            self.frame += 1;
        }

        let events = &self.events;
        self.voices.retain(|voice| {
            let done = voice.position >= voice.samples.len();
            if done {
                let _ = events.send(PlaybackEvent::Finished(voice.id));
            }
            !done
        });
    }
}

/// Where and when a buffer was placed on the audio clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledUnit {
    pub id: UnitId,
    /// Clock time the unit starts, in seconds.
    pub start: f64,
    /// Length of the unit, in seconds.
    pub duration: f64,
}

/// Gapless sequential scheduling of agent audio.
///
/// Every buffer starts at `max(clock_now, cursor)` and pushes the cursor
/// forward by its duration, so buffers never overlap and never leave a gap
/// the network did not cause. Only the session loop touches this type.
pub struct PlaybackScheduler {
    output: Option<Box<dyn AudioOutput>>,
    cursor: f64,
    active: HashSet<UnitId>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output: Some(output),
            cursor: 0.0,
            active: HashSet::new(),
            next_id: 0,
        }
    }

    /// Decode a PCM16 mono payload and schedule it after everything queued.
    ///
    /// Returns `Ok(None)` for an empty payload.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Decode`] for a malformed payload; nothing is
    /// scheduled and the cursor does not move.
    pub fn enqueue(&mut self, pcm: &[u8]) -> Result<Option<ScheduledUnit>> {
        let samples = codec::pcm16_to_f32(&codec::bytes_to_pcm16(pcm)?);
        if samples.is_empty() {
            return Ok(None);
        }

        let Some(output) = self.output.as_mut() else {
            return Err(SessionError::Acquisition("output device released".into()));
        };

        let duration = samples.len() as f64 / f64::from(output.sample_rate());
        let start = output.now().max(self.cursor);
        let id = UnitId(self.next_id);
        self.next_id += 1;

        output.schedule(id, samples, start)?;
        self.cursor = start + duration;
        self.active.insert(id);
        debug!(unit = id.0, start, duration, "scheduled playback unit");

        Ok(Some(ScheduledUnit {
            id,
            start,
            duration,
        }))
    }

    /// Record that a unit finished playing.
    ///
    /// Returns `true` when this emptied the active set. Ids that are not
    /// active (already flushed, or reported twice) are ignored.
    pub fn on_finished(&mut self, id: UnitId) -> bool {
        self.active.remove(&id) && self.active.is_empty()
    }

    /// Silence everything and reset the cursor to the clock origin.
    ///
    /// Returns the number of units that were stopped.
    pub fn flush(&mut self) -> usize {
        let stopped: Vec<UnitId> = self.active.drain().collect();
        if let Some(output) = self.output.as_mut() {
            for id in &stopped {
                output.stop(*id);
            }
        }
        self.cursor = 0.0;
        stopped.len()
    }

    /// Whether any unit is still audible.
    pub fn is_playing(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active_units(&self) -> usize {
        self.active.len()
    }

    /// Start time the next buffer would get if the clock were at zero.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Flush and release the output device. Idempotent.
    pub fn close(&mut self) {
        self.flush();
        if let Some(mut output) = self.output.take() {
            output.close();
        } else {
            debug!("playback already released");
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if self.output.is_some() {
            self.close();
        }
    }
}
