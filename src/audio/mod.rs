//! # Audio Module
//!
//! Per-guild playback for Open Music Bot.
//!
//! ## Architecture
//!
//! ### [`registry`] - Session Registry
//! - One [`session::PlaybackSession`] per guild, created on first use
//! - Removal always tears the session down first
//!
//! ### [`session`] - Playback Session
//! - Owns the queue, the Idle/Playing/Paused state machine and the voice connection
//! - Every mutation is a message processed one at a time by the session task
//!
//! ### [`pipeline`] - Decode Pipeline
//! - Locates a playable stream, transcodes it and cuts it into 20 ms frames
//! - Position is counted in frames delivered, never with timers
//!
//! ### [`transport`] - Voice Transport seam
//! - Traits for the voice connection and the now-playing channel
//! - Grace-window watchdog that tells reconnects from real disconnects
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Channels**: Stereo
//! - **Frame**: 960 samples per channel, signed 16-bit little endian (20 ms)

use bytes::Bytes;
use std::time::Duration;

pub mod pipeline;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNEL_COUNT: u32 = 2;
pub const FRAME_DURATION_MS: u64 = 20;
pub const FRAME_SAMPLES: usize = 960;
pub const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNEL_COUNT as usize * 2;

pub const DEFAULT_BITRATE: u32 = 64_000;
pub const MIN_BITRATE: u32 = 8_000;
pub const MAX_BITRATE: u32 = 96_000;

/// Clamps any requested bitrate into the range Discord voice accepts for us.
pub fn clamp_bitrate(bps: i64) -> u32 {
    bps.clamp(MIN_BITRATE as i64, MAX_BITRATE as i64) as u32
}

/// One playable media item as returned by a track resolver.
///
/// Fields are private so a track never changes after resolution; use the
/// `with_*` builders while constructing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    title: String,
    author: String,
    author_url: Option<String>,
    source_url: String,
    thumbnail_url: String,
    length_seconds: u64,
}

impl Track {
    pub fn new(title: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: String::new(),
            author_url: None,
            source_url: source_url.into(),
            thumbnail_url: String::new(),
            length_seconds: 0,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_author_url(mut self, author_url: Option<String>) -> Self {
        self.author_url = author_url;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail_url: impl Into<String>) -> Self {
        self.thumbnail_url = thumbnail_url.into();
        self
    }

    pub fn with_length(mut self, length_seconds: u64) -> Self {
        self.length_seconds = length_seconds;
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn author_url(&self) -> Option<&str> {
        self.author_url.as_deref()
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn thumbnail_url(&self) -> &str {
        &self.thumbnail_url
    }

    pub fn length_seconds(&self) -> u64 {
        self.length_seconds
    }

    pub fn length(&self) -> Duration {
        Duration::from_secs(self.length_seconds)
    }

    /// Live streams report no length and cannot be seeked.
    pub fn is_live(&self) -> bool {
        self.length_seconds == 0
    }
}

/// 20 ms of interleaved stereo PCM (s16le), ready for the voice encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame(Bytes);

impl AudioFrame {
    pub fn new(pcm: Bytes) -> Self {
        debug_assert_eq!(pcm.len(), FRAME_BYTES);
        Self(pcm)
    }

    pub fn silence() -> Self {
        Self(Bytes::from_static(&[0u8; FRAME_BYTES]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Samples as f32 in [-1.0, 1.0], interleaved.
    pub fn samples_f32(&self) -> impl Iterator<Item = f32> + '_ {
        self.0
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
    }
}

/// Playback state of a guild session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrate_is_clamped() {
        assert_eq!(clamp_bitrate(-5), MIN_BITRATE);
        assert_eq!(clamp_bitrate(0), MIN_BITRATE);
        assert_eq!(clamp_bitrate(8_000), 8_000);
        assert_eq!(clamp_bitrate(32_000), 32_000);
        assert_eq!(clamp_bitrate(96_000), 96_000);
        assert_eq!(clamp_bitrate(510_000), MAX_BITRATE);
        assert_eq!(clamp_bitrate(i64::MAX), MAX_BITRATE);
    }

    #[test]
    fn test_frame_geometry() {
        assert_eq!(FRAME_BYTES, 3840);
        assert_eq!(
            FRAME_SAMPLES as u64 * 1000 / SAMPLE_RATE as u64,
            FRAME_DURATION_MS
        );
        assert!(AudioFrame::silence().samples_f32().all(|s| s == 0.0));
    }

    #[test]
    fn test_frame_samples_are_normalized() {
        let mut pcm = vec![0u8; FRAME_BYTES];
        pcm[0..2].copy_from_slice(&i16::MAX.to_le_bytes());
        pcm[2..4].copy_from_slice(&(-i16::MAX).to_le_bytes());
        let frame = AudioFrame::new(Bytes::from(pcm));
        let samples: Vec<f32> = frame.samples_f32().take(2).collect();
        assert_eq!(samples, vec![1.0, -1.0]);
    }

    #[test]
    fn test_live_track_detection() {
        let live = Track::new("Radio", "https://example.com/live");
        assert!(live.is_live());
        let song = Track::new("Song", "https://example.com/song").with_length(212);
        assert!(!song.is_live());
        assert_eq!(song.length(), Duration::from_secs(212));
    }
}
