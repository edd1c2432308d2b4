//! Device seams between the session core and the audio hardware.
//!
//! [`CpalDevices`] is the real implementation. Tests plug in fakes with a
//! manual clock so scheduling can be checked without a sound card.

use crate::config::AudioConfig;
use crate::error::Result;
use tokio::sync::mpsc;

/// Callback receiving mono frames at the input device's native rate.
///
/// Runs on the audio thread; it must not block.
pub type FrameSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Identity of one scheduled playback unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

/// Notifications from the output device back to the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A scheduled unit played to its end.
    Finished(UnitId),
}

/// An acquired microphone stream.
pub trait AudioInput: Send {
    /// Native sample rate of the frames handed to the sink.
    fn sample_rate(&self) -> u32;

    /// Begin delivering frames to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SessionError::Acquisition`] if the stream cannot start.
    fn start(&mut self, sink: FrameSink) -> Result<()>;

    /// Stop delivering frames and release the device.
    fn stop(&mut self);
}

/// An opened output device with its own audio clock.
pub trait AudioOutput: Send {
    /// Current audio clock position in seconds since the device opened.
    fn now(&self) -> f64;

    /// Sample rate of buffers passed to [`schedule`](Self::schedule).
    fn sample_rate(&self) -> u32;

    /// Schedule `samples` to start playing at clock time `start_at`.
    ///
    /// A [`PlaybackEvent::Finished`] is emitted once the unit has played out.
    ///
    /// # Errors
    ///
    /// Returns an error if the device can no longer accept audio.
    fn schedule(&mut self, id: UnitId, samples: Vec<f32>, start_at: f64) -> Result<()>;

    /// Silence a unit immediately. Unknown or finished ids are ignored.
    fn stop(&mut self, id: UnitId);

    /// Release the device.
    fn close(&mut self);
}

/// Factory for the session's audio devices.
pub trait AudioDevices: Send + Sync {
    /// Acquire the microphone.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SessionError::Acquisition`] when permission is denied
    /// or no usable input device exists.
    fn open_input(&self, config: &AudioConfig) -> Result<Box<dyn AudioInput>>;

    /// Open the output device. Completion notices go to `events`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SessionError::Acquisition`] when no usable output
    /// device exists.
    fn open_output(
        &self,
        config: &AudioConfig,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Box<dyn AudioOutput>>;
}

/// System audio devices via cpal.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalDevices;

impl AudioDevices for CpalDevices {
    fn open_input(&self, config: &AudioConfig) -> Result<Box<dyn AudioInput>> {
        Ok(Box::new(crate::audio::capture::CpalCapture::new(config)?))
    }

    fn open_output(
        &self,
        config: &AudioConfig,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(crate::audio::playback::CpalPlayback::new(
            config, events,
        )?))
    }
}
