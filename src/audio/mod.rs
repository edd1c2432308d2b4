//! Audio capture, playback, and PCM conversion via cpal.

pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;
