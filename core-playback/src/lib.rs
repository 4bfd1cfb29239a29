//! # Playback Bridge
//!
//! Turns a container (a host byte source or a URI) into pull-driven audio
//! and video sample streams for a host playback surface.
//!
//! ## Overview
//!
//! This crate handles:
//! - Opening and probing containers through a pluggable [`MediaBackend`]
//! - Routing interleaved packets to per-stream providers
//! - Audio resampling to a canonical interleaved format with gapless
//!   lead-in compensation
//! - Video decoding into pooled buffers, directly or through a scaler
//! - Seeking and live audio track switching under a single session guard
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | Opens a source and serves host requests |
//! | [`source`] | Host-facing stream source and callback registration |
//! | [`provider`] | Per-stream sample providers |
//! | [`router`] | Packet fan-out and read-ahead |
//! | [`seek`] | Host position to container seek |
//! | [`io`] | Byte-source adapter for host streams |
//! | [`backend`] | Demux/decode capability traits and implementations |

pub mod backend;
pub mod buffer;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod global;
pub mod io;
pub mod provider;
pub mod router;
pub mod sample;
pub mod seek;
pub mod session;
pub mod source;

pub use backend::{MediaBackend, MediaKind};
#[cfg(feature = "symphonia-backend")]
pub use backend::SymphoniaBackend;
#[cfg(feature = "ffmpeg-backend")]
pub use backend::FfmpegBackend;
pub use buffer::{BufferPool, SampleBuffer};
pub use config::BridgeConfig;
pub use descriptor::{
    AudioTrackInfo, DescriptorKind, StreamDescriptor, SubtitleTrackInfo, TrackSet, VideoTrackInfo,
};
pub use error::{PlaybackError, Result};
pub use provider::{DecodePath, ProviderState, StreamSampleProvider};
pub use sample::{ChromaSiting, MediaSample, VideoSampleProps};
pub use session::Session;
pub use source::{CallbackKind, MediaStreamSource, StartingRequest, StreamSourceHandler};
