//! # Bridge Configuration
//!
//! Tunables for decoding, error tolerance and output formats, plus the
//! protocol option dictionary forwarded to the demux library.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bridge configuration.
///
/// Shared read-only by every provider of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Decode or conversion failures tolerated while producing one sample.
    ///
    /// Each skipped failure marks the next delivered sample discontinuous.
    /// Once exceeded, the stream ends early instead of failing playback.
    ///
    /// Default: 50.
    #[serde(default = "default_skip_errors")]
    pub skip_errors: u32,

    /// Decoder thread ceiling for video. `0` means hardware concurrency.
    ///
    /// Default: 0.
    #[serde(default = "default_max_video_threads")]
    pub max_video_threads: u32,

    /// Decoder thread ceiling for audio. `0` means hardware concurrency.
    ///
    /// Default: 2.
    #[serde(default = "default_max_audio_threads")]
    pub max_audio_threads: u32,

    /// Highest playback rate advertised to the host.
    ///
    /// Default: 4.0.
    #[serde(default = "default_max_playback_rate")]
    pub max_playback_rate: f64,

    /// Byte-source adapter buffer capacity in bytes.
    ///
    /// Default: 16 KB.
    #[serde(default = "default_stream_buffer_size")]
    pub stream_buffer_size: usize,

    /// Allow planar 4:2:0 (IYUV) video output.
    #[serde(default = "default_allow_output")]
    pub video_output_allow_iyuv: bool,

    /// Allow semi-planar 4:2:0 (NV12) video output.
    #[serde(default = "default_allow_output")]
    pub video_output_allow_nv12: bool,

    /// Allow packed 32-bit (BGRA8) video output.
    #[serde(default = "default_allow_output")]
    pub video_output_allow_bgra8: bool,

    /// Protocol options handed to the demux library when opening.
    ///
    /// Keys the library does not recognise are logged and dropped.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            skip_errors: default_skip_errors(),
            max_video_threads: default_max_video_threads(),
            max_audio_threads: default_max_audio_threads(),
            max_playback_rate: default_max_playback_rate(),
            stream_buffer_size: default_stream_buffer_size(),
            video_output_allow_iyuv: default_allow_output(),
            video_output_allow_nv12: default_allow_output(),
            video_output_allow_bgra8: default_allow_output(),
            options: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    pub fn with_skip_errors(mut self, skip_errors: u32) -> Self {
        self.skip_errors = skip_errors;
        self
    }

    pub fn with_max_video_threads(mut self, threads: u32) -> Self {
        self.max_video_threads = threads;
        self
    }

    pub fn with_max_audio_threads(mut self, threads: u32) -> Self {
        self.max_audio_threads = threads;
        self
    }

    pub fn with_max_playback_rate(mut self, rate: f64) -> Self {
        self.max_playback_rate = rate;
        self
    }

    pub fn with_stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size;
        self
    }

    /// Restrict which video output pixel formats may be chosen.
    pub fn with_video_outputs(mut self, iyuv: bool, nv12: bool, bgra8: bool) -> Self {
        self.video_output_allow_iyuv = iyuv;
        self.video_output_allow_nv12 = nv12;
        self.video_output_allow_bgra8 = bgra8;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.stream_buffer_size == 0 {
            return Err("stream_buffer_size must be > 0".to_string());
        }

        if !(self.max_playback_rate > 0.0) {
            return Err("max_playback_rate must be > 0".to_string());
        }

        Ok(())
    }

    /// Decoder thread count for video, `None` when concurrency is unknown.
    pub fn video_decoder_threads(&self) -> Option<usize> {
        decoder_thread_count(num_cpus::get(), self.max_video_threads as usize)
    }

    /// Decoder thread count for audio, `None` when concurrency is unknown.
    pub fn audio_decoder_threads(&self) -> Option<usize> {
        decoder_thread_count(num_cpus::get(), self.max_audio_threads as usize)
    }
}

/// Hardware concurrency capped by a configured maximum (`0` = no cap).
pub fn decoder_thread_count(hardware: usize, max: usize) -> Option<usize> {
    match (hardware, max) {
        (0, _) => None,
        (hw, 0) => Some(hw),
        (hw, max) => Some(hw.min(max)),
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_skip_errors() -> u32 {
    50
}

fn default_max_video_threads() -> u32 {
    0 // all cores
}

fn default_max_audio_threads() -> u32 {
    2
}

fn default_max_playback_rate() -> f64 {
    4.0
}

fn default_stream_buffer_size() -> usize {
    16 * 1024
}

fn default_allow_output() -> bool {
    true
}
