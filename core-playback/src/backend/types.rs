//! Media types exchanged with the demux/decode library.

use super::DirectBuffer;
use bridge_traits::TICKS_PER_SECOND;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Elementary stream kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
    Subtitle,
    Data,
}

/// Rational time base of a stream (seconds per tick).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i64,
    pub den: i64,
}

impl TimeBase {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Convert a timestamp in this time base to host ticks.
    pub fn to_host_ticks(&self, ts: i64) -> i64 {
        if !self.is_valid() {
            return 0;
        }
        let ticks = ts as i128 * self.num as i128 * TICKS_PER_SECOND as i128 / self.den as i128;
        clamp_i128(ticks)
    }

    /// Convert host ticks to a timestamp in this time base (truncating).
    pub fn from_host_ticks(&self, ticks: i64) -> i64 {
        if !self.is_valid() {
            return 0;
        }
        let ts = ticks as i128 * self.den as i128 / (self.num as i128 * TICKS_PER_SECOND as i128);
        clamp_i128(ts)
    }

    /// Number of time-base ticks spanned by `samples` at `sample_rate`.
    pub fn samples_to_ts(&self, samples: u64, sample_rate: u32) -> i64 {
        if !self.is_valid() || sample_rate == 0 {
            return 0;
        }
        let ts = samples as i128 * self.den as i128 / (sample_rate as i128 * self.num as i128);
        clamp_i128(ts)
    }
}

fn clamp_i128(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

// ============================================================================
// Audio
// ============================================================================

/// PCM sample formats, packed (interleaved) and planar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    Flt,
    Dbl,
    U8P,
    S16P,
    S32P,
    FltP,
    DblP,
}

impl SampleFormat {
    pub fn is_planar(self) -> bool {
        matches!(
            self,
            Self::U8P | Self::S16P | Self::S32P | Self::FltP | Self::DblP
        )
    }

    /// Interleaved variant of this format.
    pub fn packed(self) -> Self {
        match self {
            Self::U8P => Self::U8,
            Self::S16P => Self::S16,
            Self::S32P => Self::S32,
            Self::FltP => Self::Flt,
            Self::DblP => Self::Dbl,
            other => other,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self.packed() {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S32 | Self::Flt => 4,
            _ => 8,
        }
    }

    pub fn bits_per_sample(self) -> u32 {
        self.bytes_per_sample() as u32 * 8
    }

    /// Output format delivered to the host for this decoder format.
    ///
    /// 32-bit integer and float input keep their width; everything else is
    /// delivered as 16-bit. The result is never planar.
    pub fn canonical_output(self) -> Self {
        match self {
            Self::S32 | Self::S32P => Self::S32,
            Self::Flt | Self::FltP => Self::Flt,
            _ => Self::S16,
        }
    }

    /// Packed format to request from the decoder, if this format has one
    /// the decoder should produce directly.
    pub fn requested_decoder_format(self) -> Option<Self> {
        match self {
            Self::S16P | Self::S32P | Self::FltP => Some(self.packed()),
            _ => None,
        }
    }
}

/// Speaker layout as a channel mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelLayout {
    pub mask: u64,
}

impl ChannelLayout {
    pub const FRONT_LEFT: u64 = 0x1;
    pub const FRONT_RIGHT: u64 = 0x2;
    pub const FRONT_CENTER: u64 = 0x4;
    pub const LOW_FREQUENCY: u64 = 0x8;
    pub const BACK_LEFT: u64 = 0x10;
    pub const BACK_RIGHT: u64 = 0x20;
    pub const BACK_CENTER: u64 = 0x100;
    pub const SIDE_LEFT: u64 = 0x200;
    pub const SIDE_RIGHT: u64 = 0x400;

    pub const fn from_mask(mask: u64) -> Self {
        Self { mask }
    }

    /// Conventional layout for a channel count.
    pub fn default_for(channels: u16) -> Self {
        let mask = match channels {
            1 => Self::FRONT_CENTER,
            2 => Self::FRONT_LEFT | Self::FRONT_RIGHT,
            3 => Self::FRONT_LEFT | Self::FRONT_RIGHT | Self::FRONT_CENTER,
            4 => Self::FRONT_LEFT | Self::FRONT_RIGHT | Self::FRONT_CENTER | Self::BACK_CENTER,
            5 => {
                Self::FRONT_LEFT
                    | Self::FRONT_RIGHT
                    | Self::FRONT_CENTER
                    | Self::BACK_LEFT
                    | Self::BACK_RIGHT
            }
            6 => {
                Self::FRONT_LEFT
                    | Self::FRONT_RIGHT
                    | Self::FRONT_CENTER
                    | Self::LOW_FREQUENCY
                    | Self::BACK_LEFT
                    | Self::BACK_RIGHT
            }
            7 => {
                Self::FRONT_LEFT
                    | Self::FRONT_RIGHT
                    | Self::FRONT_CENTER
                    | Self::LOW_FREQUENCY
                    | Self::BACK_CENTER
                    | Self::SIDE_LEFT
                    | Self::SIDE_RIGHT
            }
            8 => {
                Self::FRONT_LEFT
                    | Self::FRONT_RIGHT
                    | Self::FRONT_CENTER
                    | Self::LOW_FREQUENCY
                    | Self::BACK_LEFT
                    | Self::BACK_RIGHT
                    | Self::SIDE_LEFT
                    | Self::SIDE_RIGHT
            }
            n => (1u64 << n.min(63)) - 1,
        };
        Self { mask }
    }

    pub fn channels(&self) -> u16 {
        self.mask.count_ones() as u16
    }
}

/// Codec profile details that change how channels are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AudioProfile {
    #[default]
    Unspecified,
    AacLow,
    AacHe,
    /// HE-AAC v2 signals mono but decodes to parametric stereo.
    AacHeV2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: Option<ChannelLayout>,
    pub sample_format: SampleFormat,
    pub profile: AudioProfile,
}

/// One block of decoded PCM.
///
/// Planar formats carry one plane per channel, packed formats a single
/// interleaved plane. Samples are native-endian.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: Option<ChannelLayout>,
    /// Samples per channel.
    pub samples: usize,
    pub pts: Option<i64>,
    /// Duration declared by the container, in stream time base.
    pub duration: i64,
    pub planes: Vec<Bytes>,
}

// ============================================================================
// Video
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Yuv420p,
    /// Full-range 4:2:0 planar.
    Yuvj420p,
    Yuva420p,
    Yuv422p,
    Yuv444p,
    Nv12,
    Bgra,
    // Hardware surfaces
    D3d11,
    Dxva2,
    Vaapi,
}

impl PixelFormat {
    pub fn is_hardware(self) -> bool {
        matches!(self, Self::D3d11 | Self::Dxva2 | Self::Vaapi)
    }

    pub fn is_planar_420(self) -> bool {
        matches!(self, Self::Yuv420p | Self::Yuvj420p)
    }

    /// Planes of a contiguous image as `(offset, stride, rows)`.
    ///
    /// Chroma dimensions round up for odd sizes. Hardware surfaces have no
    /// CPU layout.
    pub fn plane_layout(self, width: u32, height: u32) -> Vec<(usize, usize, usize)> {
        let w = width as usize;
        let h = height as usize;
        let cw = (w + 1) / 2;
        let ch = (h + 1) / 2;
        match self {
            Self::Yuv420p | Self::Yuvj420p => {
                vec![(0, w, h), (w * h, cw, ch), (w * h + cw * ch, cw, ch)]
            }
            Self::Yuva420p => vec![
                (0, w, h),
                (w * h, cw, ch),
                (w * h + cw * ch, cw, ch),
                (w * h + 2 * cw * ch, w, h),
            ],
            Self::Yuv422p => vec![(0, w, h), (w * h, cw, h), (w * h + cw * h, cw, h)],
            Self::Yuv444p => vec![(0, w, h), (w * h, w, h), (2 * w * h, w, h)],
            Self::Nv12 => vec![(0, w, h), (w * h, cw * 2, ch)],
            Self::Bgra => vec![(0, w * 4, h)],
            Self::D3d11 | Self::Dxva2 | Self::Vaapi => Vec::new(),
        }
    }

    /// Bytes needed for a contiguous image.
    pub fn buffer_size(self, width: u32, height: u32) -> usize {
        self.plane_layout(width, height)
            .iter()
            .map(|(offset, stride, rows)| offset + stride * rows)
            .max()
            .unwrap_or(0)
    }
}

/// Pick the decoder output among the formats it offers.
///
/// Hardware surfaces are skipped. NV12 replaces the first software format
/// when offered, unless that format carries alpha.
pub fn negotiate_pixel_format(offered: &[PixelFormat]) -> Option<PixelFormat> {
    let first = offered.iter().copied().find(|f| !f.is_hardware())?;
    if first != PixelFormat::Yuva420p && offered.contains(&PixelFormat::Nv12) {
        return Some(PixelFormat::Nv12);
    }
    Some(first)
}

/// Chroma sample position reported by the decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChromaLocation {
    #[default]
    Unspecified,
    Left,
    Center,
    TopLeft,
    Top,
    BottomLeft,
    Bottom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Frames per second as `(num, den)`.
    pub frame_rate: Option<(u32, u32)>,
}

/// One plane of a decoder-owned image.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    pub stride: usize,
}

/// Pixel storage of a decoded picture.
#[derive(Debug)]
pub enum VideoFrameData {
    /// Written straight into a buffer handed out by a
    /// [`FrameAllocator`](super::FrameAllocator). The image is contiguous
    /// at the allocation geometry.
    Direct(DirectBuffer),
    /// Decoder-owned planes.
    Planes(Vec<Plane>),
}

#[derive(Debug)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pts: Option<i64>,
    pub best_effort_timestamp: Option<i64>,
    pub duration: i64,
    pub keyframe: bool,
    pub interlaced: bool,
    pub top_field_first: bool,
    pub chroma_location: ChromaLocation,
    pub data: VideoFrameData,
}

impl VideoFrame {
    /// Plane `index` as `(bytes, stride)`.
    pub fn plane(&self, index: usize) -> Option<(&[u8], usize)> {
        match &self.data {
            VideoFrameData::Planes(planes) => {
                planes.get(index).map(|p| (p.data.as_ref(), p.stride))
            }
            VideoFrameData::Direct(direct) => {
                let layout = self
                    .format
                    .plane_layout(direct.alloc_width, direct.alloc_height);
                let (offset, stride, rows) = *layout.get(index)?;
                direct
                    .buffer
                    .get(offset..offset + stride * rows)
                    .map(|b| (b, stride))
            }
        }
    }
}

#[derive(Debug)]
pub enum DecodedFrame {
    Audio(AudioFrame),
    Video(VideoFrame),
}

impl DecodedFrame {
    /// Presentation timestamp in stream time base.
    ///
    /// Video uses the decoder's best-effort estimate.
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            DecodedFrame::Audio(frame) => frame.pts,
            DecodedFrame::Video(frame) => frame.best_effort_timestamp.or(frame.pts),
        }
    }

    pub fn duration(&self) -> i64 {
        match self {
            DecodedFrame::Audio(frame) => frame.duration,
            DecodedFrame::Video(frame) => frame.duration,
        }
    }
}

// ============================================================================
// Container
// ============================================================================

/// Library data a backend attaches to the streams it reports, so a decoder
/// can later be opened from the [`StreamInfo`] alone.
#[derive(Clone)]
pub struct CodecPrivate(Arc<dyn Any + Send + Sync>);

impl CodecPrivate {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for CodecPrivate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CodecPrivate")
    }
}

impl PartialEq for CodecPrivate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Per-stream information reported by the demuxer.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    pub codec_name: String,
    pub time_base: TimeBase,
    pub bit_rate: u64,
    pub bits_per_raw_sample: u32,
    pub bits_per_coded_sample: u32,
    pub title: Option<String>,
    pub language: Option<String>,
    pub is_default: bool,
    pub is_forced: bool,
    /// Encoder lead-in samples to skip for gapless playback.
    pub start_skip_samples: u32,
    pub audio: Option<AudioParams>,
    pub video: Option<VideoParams>,
    pub codec_private: Option<CodecPrivate>,
}

impl StreamInfo {
    pub fn new(index: usize, kind: MediaKind, codec_name: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            codec_name: codec_name.into(),
            time_base: TimeBase::new(1, 1_000_000),
            bit_rate: 0,
            bits_per_raw_sample: 0,
            bits_per_coded_sample: 0,
            title: None,
            language: None,
            is_default: false,
            is_forced: false,
            start_skip_samples: 0,
            audio: None,
            video: None,
            codec_private: None,
        }
    }

    pub fn bits_per_sample(&self) -> u32 {
        self.bits_per_raw_sample.max(self.bits_per_coded_sample)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerInfo {
    pub format_name: String,
    /// Total duration in microseconds.
    pub duration_us: Option<i64>,
    /// Timestamp of the first sample in microseconds.
    pub start_time_us: Option<i64>,
}

/// One compressed unit read from the container.
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub keyframe: bool,
    pub data: Bytes,
}
