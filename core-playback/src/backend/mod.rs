//! # Demux/Decode Backend
//!
//! Capability traits for the library that parses containers and decodes
//! bitstreams. The bridge drives these traits; it never parses media itself.
//!
//! ## Architecture
//!
//! ```text
//! MediaBackend ──open_input──► Demuxer ──read_packet──► Packet
//!      │                                                   │
//!      └──open_decoder──► Decoder ◄──send_packet───────────┘
//!                            │
//!                            └──receive_frame──► DecodedFrame
//!                                                   │
//!                           Resampler / Scaler ◄────┘
//! ```
//!
//! ## Implementations
//!
//! | Backend | Feature | Media |
//! |---------|---------|-------|
//! | `SymphoniaBackend` | `symphonia-backend` | Audio containers (MP3, FLAC, Ogg, WAV, MP4/AAC, ALAC, MKV) |
//! | `FfmpegBackend` | `ffmpeg-backend` | Everything libavformat opens, audio and video |
//!
//! Resampling and scaling default to the pure-Rust [`SoftwareResampler`]
//! and [`SoftwareScaler`]; the FFmpeg backend scales with libswscale.

mod resample;
mod scale;
mod types;

#[cfg(feature = "symphonia-backend")]
mod symphonia;

#[cfg(feature = "ffmpeg-backend")]
mod ffmpeg;

pub use resample::{ResampleSpec, ResampledAudio, Resampler, SoftwareResampler};
pub use scale::{ScaleSpec, Scaler, SoftwareScaler};
pub use types::{
    negotiate_pixel_format, AudioFrame, AudioParams, AudioProfile, ChannelLayout,
    ChromaLocation, CodecPrivate, ContainerInfo, DecodedFrame, MediaKind, Packet, PixelFormat, Plane,
    SampleFormat, StreamInfo, TimeBase, VideoFrame, VideoFrameData, VideoParams,
};

pub(crate) use resample::{write_sample, RawSample};

#[cfg(feature = "symphonia-backend")]
pub use self::symphonia::SymphoniaBackend;

#[cfg(feature = "ffmpeg-backend")]
pub use self::ffmpeg::FfmpegBackend;

use crate::buffer::PooledBuffer;
use crate::error::{PlaybackError, Result};
use crate::global::HostLockManager;
use crate::io::ByteSourceAdapter;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where the container bytes come from.
pub enum InputSource {
    /// Opened by the library itself.
    Uri(String),
    /// Read through the host's byte source.
    Stream(ByteSourceAdapter),
}

impl InputSource {
    pub fn describe(&self) -> String {
        match self {
            InputSource::Uri(uri) => uri.clone(),
            InputSource::Stream(adapter) => adapter.description(),
        }
    }
}

/// An opened container and the option keys the library did not consume.
pub struct OpenedInput {
    pub demuxer: Box<dyn Demuxer>,
    pub unused_options: Vec<String>,
}

/// Decoder construction parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecoderOptions {
    /// Worker threads for frame decoding; `None` leaves the library default.
    pub thread_count: Option<usize>,
    /// Preferred output sample format for audio.
    pub request_sample_format: Option<SampleFormat>,
}

/// What a decoder can do beyond the basics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderCapabilities {
    /// Decoder can write into caller-provided buffers.
    pub direct_buffers: bool,
}

/// Outcome of asking a decoder for a frame.
#[derive(Debug)]
pub enum DecodeStatus {
    Frame(DecodedFrame),
    /// Send another packet first.
    NeedsInput,
    /// Drained after end of input; no more frames until flushed.
    EndOfStream,
}

/// Buffer provider the decoder calls for each picture on the direct path.
///
/// Returning `None` tells the decoder to use its own memory for that
/// picture.
pub trait FrameAllocator: Send + Sync {
    fn allocate(&self, format: PixelFormat, width: u32, height: u32) -> Option<DirectBuffer>;
}

/// A caller-owned region sized for one picture.
#[derive(Debug)]
pub struct DirectBuffer {
    pub buffer: PooledBuffer,
    pub alloc_width: u32,
    pub alloc_height: u32,
}

/// The demux/decode library.
pub trait MediaBackend: Send + Sync {
    /// Short identifier used in logs and for one-time initialisation.
    fn name(&self) -> &'static str;

    /// Process-wide setup, run at most once per backend.
    fn initialize(&self, _locks: &'static HostLockManager) -> Result<()> {
        Ok(())
    }

    /// Open a container and read its stream info.
    fn open_input(
        &self,
        input: InputSource,
        options: &BTreeMap<String, String>,
    ) -> Result<OpenedInput>;

    /// Open a decoder for `stream`, failing with
    /// [`PlaybackError::DecodeUnavailable`] when no decoder exists.
    fn open_decoder(&self, stream: &StreamInfo, options: &DecoderOptions)
        -> Result<Box<dyn Decoder>>;

    fn create_resampler(&self, spec: ResampleSpec) -> Result<Box<dyn Resampler>> {
        Ok(Box::new(SoftwareResampler::new(spec)?))
    }

    fn create_scaler(&self, spec: ScaleSpec) -> Result<Box<dyn Scaler>> {
        Ok(Box::new(SoftwareScaler::new(spec)?))
    }
}

/// An open container.
pub trait Demuxer: Send {
    fn streams(&self) -> &[StreamInfo];

    fn container(&self) -> ContainerInfo;

    /// The library's preferred stream of `kind`.
    fn find_best_stream(&self, kind: MediaKind) -> Option<usize>;

    /// Next packet in file order, `None` at end of container.
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Seek `stream_index` to `timestamp` (in its time base). With
    /// `backward`, lands on the nearest sync point at or before it.
    fn seek(&mut self, stream_index: usize, timestamp: i64, backward: bool) -> Result<()>;
}

/// A stream's decode context.
pub trait Decoder: Send {
    fn capabilities(&self) -> DecoderCapabilities {
        DecoderCapabilities::default()
    }

    /// Output parameters after open (may differ from the stream's).
    fn audio_params(&self) -> Option<AudioParams> {
        None
    }

    fn video_params(&self) -> Option<VideoParams> {
        None
    }

    /// Pixel formats the decoder can produce, most preferred first. Empty
    /// when the decoder has a single fixed output.
    fn offered_pixel_formats(&self) -> Vec<PixelFormat> {
        Vec::new()
    }

    /// Fix the output to one of [`Decoder::offered_pixel_formats`].
    fn select_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        Err(PlaybackError::Backend(format!(
            "decoder cannot produce {:?}",
            format
        )))
    }

    /// Dimensions the decoder pads pictures to.
    fn aligned_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        (width, height)
    }

    /// Install the direct-path allocator.
    fn set_frame_allocator(&mut self, _allocator: Arc<dyn FrameAllocator>) -> Result<()> {
        Err(PlaybackError::Backend(
            "decoder does not support direct buffers".to_string(),
        ))
    }

    /// Feed a packet; `None` starts draining.
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()>;

    fn receive_frame(&mut self) -> Result<DecodeStatus>;

    /// Drop buffered frames and leave draining mode.
    fn flush(&mut self);
}
