//! # FFmpeg Backend
//!
//! Demux, decode and scale through the system FFmpeg libraries
//! (libavformat, libavcodec, libswscale).
//!
//! Host byte sources are read through a custom AVIO context whose read and
//! seek callbacks drive the [`ByteSourceAdapter`]. Options are handed to the
//! library as a dictionary at open; the keys it leaves behind are reported
//! as unused.
//!
//! ## Thread Safety
//!
//! Library contexts carry raw pointers and are not `Send`. Each one here is
//! owned by exactly one demuxer, decoder or scaler and only touched through
//! `&mut self`, so they move between threads but are never shared.

use super::types::{
    AudioFrame, AudioParams, AudioProfile, ChannelLayout, ChromaLocation, CodecPrivate,
    ContainerInfo, DecodedFrame, MediaKind, Packet, PixelFormat, Plane, SampleFormat,
    StreamInfo, TimeBase, VideoFrame, VideoFrameData, VideoParams,
};
use super::{
    DecodeStatus, Decoder, DecoderOptions, Demuxer, InputSource, MediaBackend, OpenedInput,
    ScaleSpec, Scaler,
};
use crate::error::{PlaybackError, Result};
use crate::global::{BackendLock, HostLockManager};
use crate::io::{ByteSourceAdapter, ReadOutcome, Whence};
use bridge_traits::{LogLevel, TICKS_PER_SECOND};
use bytes::Bytes;
use core_runtime::logging::{forward_library_log, log_level};
use ffmpeg_next as ffmpeg;
use ffmpeg::ffi::{self, AVPixelFormat, AVSampleFormat};
use ffmpeg::format::stream::Disposition;
use ffmpeg::software::scaling;
use ffmpeg::util::chroma::Location;
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::ffi::{c_int, c_void, CStr, CString};
use std::ptr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const LOG_SOURCE: &str = "ffmpeg";

const SEEK_SET: c_int = 0;
const SEEK_CUR: c_int = 1;
const SEEK_END: c_int = 2;

// AV_PROFILE_AAC_* values.
const PROFILE_AAC_LOW: c_int = 1;
const PROFILE_AAC_HE: c_int = 4;
const PROFILE_AAC_HE_V2: c_int = 28;

#[derive(Default)]
pub struct FfmpegBackend {
    lock: OnceCell<Arc<BackendLock>>,
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn initialize(&self, locks: &'static HostLockManager) -> Result<()> {
        ffmpeg::init()
            .map_err(|e| PlaybackError::Backend(format!("library init failed: {}", e)))?;
        // SAFETY: sets a process-wide integer; no pointers involved.
        unsafe { ffi::av_log_set_level(log_level().as_i32()) };
        self.lock.get_or_init(|| locks.create_lock());
        Ok(())
    }

    #[instrument(skip_all, fields(input = %input.describe()))]
    fn open_input(
        &self,
        input: InputSource,
        options: &BTreeMap<String, String>,
    ) -> Result<OpenedInput> {
        let mut dictionary = ffmpeg::Dictionary::new();
        for (key, value) in options {
            dictionary.set(key, value);
        }

        let (url, io) = match input {
            InputSource::Uri(uri) => {
                let url = CString::new(uri.trim_start_matches("file://")).map_err(|_| {
                    PlaybackError::ArgumentInvalid(format!("URI contains a NUL byte: {}", uri))
                })?;
                (Some(url), None)
            }
            InputSource::Stream(adapter) => (None, Some(CustomIo::new(adapter)?)),
        };

        let (input, unused_options) = open_format(url.as_deref(), io.as_ref(), dictionary)?;
        let demuxer = FfmpegDemuxer::new(input, io);
        debug!(
            streams = demuxer.streams.len(),
            format = %demuxer.input.format().name(),
            "Container opened"
        );

        Ok(OpenedInput {
            demuxer: Box::new(demuxer),
            unused_options,
        })
    }

    fn open_decoder(
        &self,
        stream: &StreamInfo,
        options: &DecoderOptions,
    ) -> Result<Box<dyn Decoder>> {
        let parameters = stream
            .codec_private
            .as_ref()
            .and_then(|private| private.downcast_ref::<StreamParameters>())
            .ok_or_else(|| {
                PlaybackError::DecodeUnavailable(format!(
                    "stream {} was not opened by this backend",
                    stream.index
                ))
            })?;

        let mut context = ffmpeg::codec::context::Context::from_parameters(parameters.0.clone())
            .map_err(|e| decoder_failure(stream, e))?;
        // SAFETY: the context is not open yet, so its fields may be written.
        unsafe {
            let raw = context.as_mut_ptr();
            if let Some(count) = options.thread_count {
                (*raw).thread_count = count as c_int;
            }
            if let Some(format) = options.request_sample_format {
                (*raw).request_sample_fmt = to_av_sample_format(format);
            }
        }

        // Opening a codec is not thread-safe in the library.
        let lock = self.lock.get().cloned();
        let _guard = lock.as_ref().map(|lock| lock.lock());

        let decoder = context.decoder();
        match stream.kind {
            MediaKind::Audio => {
                let decoder = decoder.audio().map_err(|e| decoder_failure(stream, e))?;
                Ok(Box::new(FfmpegAudioDecoder::new(decoder, stream)))
            }
            MediaKind::Video => {
                let decoder = decoder.video().map_err(|e| decoder_failure(stream, e))?;
                Ok(Box::new(FfmpegVideoDecoder::new(decoder)))
            }
            kind => Err(PlaybackError::DecodeUnavailable(format!(
                "no decoder for {:?} stream {}",
                kind, stream.index
            ))),
        }
    }

    fn create_scaler(&self, spec: ScaleSpec) -> Result<Box<dyn Scaler>> {
        Ok(Box::new(FfmpegScaler::new(spec)?))
    }
}

fn decoder_failure(stream: &StreamInfo, error: ffmpeg::Error) -> PlaybackError {
    forward_library_log(
        LogLevel::Warning,
        LOG_SOURCE,
        &format!("cannot open decoder for {}: {}", stream.codec_name, error),
    );
    match error {
        ffmpeg::Error::DecoderNotFound => {
            PlaybackError::DecodeUnavailable(format!("no decoder for {}", stream.codec_name))
        }
        e => PlaybackError::Backend(format!("{}: {}", stream.codec_name, e)),
    }
}

// ============================================================================
// Custom I/O
// ============================================================================

/// AVIO context reading from a host byte source.
struct CustomIo {
    context: *mut ffi::AVIOContext,
    adapter: *mut ByteSourceAdapter,
}

impl CustomIo {
    fn new(adapter: ByteSourceAdapter) -> Result<Self> {
        let size = adapter.capacity();
        let adapter = Box::into_raw(Box::new(adapter));

        // SAFETY: the buffer and adapter are handed to the context, which
        // owns them until `drop` releases all three.
        unsafe {
            let buffer = ffi::av_malloc(size) as *mut u8;
            if buffer.is_null() {
                drop(Box::from_raw(adapter));
                return Err(PlaybackError::OutOfMemory("AVIO buffer".to_string()));
            }
            let context = ffi::avio_alloc_context(
                buffer,
                size as c_int,
                0,
                adapter as *mut c_void,
                Some(read_callback),
                None,
                Some(seek_callback),
            );
            if context.is_null() {
                ffi::av_free(buffer as *mut c_void);
                drop(Box::from_raw(adapter));
                return Err(PlaybackError::OutOfMemory("AVIO context".to_string()));
            }
            Ok(Self { context, adapter })
        }
    }
}

impl Drop for CustomIo {
    fn drop(&mut self) {
        // SAFETY: both pointers were created in `new` and are released once.
        // The library may have swapped the buffer, so free the one it holds.
        unsafe {
            ffi::av_freep(&mut (*self.context).buffer as *mut *mut u8 as *mut c_void);
            ffi::avio_context_free(&mut self.context);
            drop(Box::from_raw(self.adapter));
        }
    }
}

unsafe extern "C" fn read_callback(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    let adapter = &mut *(opaque as *mut ByteSourceAdapter);
    let buf = std::slice::from_raw_parts_mut(buf, buf_size.max(0) as usize);
    match adapter.read_chunk(buf) {
        Ok(ReadOutcome::Data(read)) => read as c_int,
        Ok(ReadOutcome::Eof) => ffi::AVERROR_EOF,
        Err(_) => c_int::from(ffmpeg::Error::Unknown),
    }
}

unsafe extern "C" fn seek_callback(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    let adapter = &mut *(opaque as *mut ByteSourceAdapter);
    let result = map_whence(offset, whence)
        .map(|whence| adapter.seek_to(whence))
        .unwrap_or_else(|| {
            Err(PlaybackError::ArgumentInvalid(format!(
                "unknown seek origin {}",
                whence
            )))
        });
    match result {
        Ok(position) => position as i64,
        Err(_) => c_int::from(ffmpeg::Error::Unknown) as i64,
    }
}

fn map_whence(offset: i64, whence: c_int) -> Option<Whence> {
    if whence & ffi::AVSEEK_SIZE as c_int != 0 {
        return Some(Whence::Size);
    }
    match whence & !(ffi::AVSEEK_FORCE as c_int) {
        SEEK_SET => u64::try_from(offset).ok().map(Whence::Start),
        SEEK_CUR => Some(Whence::Current(offset)),
        SEEK_END => Some(Whence::End(offset)),
        _ => None,
    }
}

/// Open a container and read its stream info, returning it with the
/// unconsumed option keys.
fn open_format(
    url: Option<&CStr>,
    io: Option<&CustomIo>,
    options: ffmpeg::Dictionary,
) -> Result<(ffmpeg::format::context::Input, Vec<String>)> {
    // SAFETY: the context is either freed by the library on a failed open,
    // closed here when stream info cannot be read, or handed to `Input` which owns it.
    unsafe {
        let mut context = ffi::avformat_alloc_context();
        if context.is_null() {
            return Err(PlaybackError::OutOfMemory("format context".to_string()));
        }
        if let Some(io) = io {
            (*context).pb = io.context;
            (*context).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;
        }

        let mut raw_options = options.disown();
        let ret = ffi::avformat_open_input(
            &mut context,
            url.map_or(ptr::null(), CStr::as_ptr),
            ptr::null(),
            &mut raw_options,
        );
        let unused: Vec<String> = ffmpeg::Dictionary::own(raw_options)
            .iter()
            .map(|(key, _)| key.to_string())
            .collect();
        if ret < 0 {
            return Err(open_failure("open", ret));
        }

        let ret = ffi::avformat_find_stream_info(context, ptr::null_mut());
        if ret < 0 {
            ffi::avformat_close_input(&mut context);
            return Err(open_failure("stream info", ret));
        }

        Ok((ffmpeg::format::context::Input::wrap(context), unused))
    }
}

fn open_failure(stage: &str, code: c_int) -> PlaybackError {
    let message = format!("{} failed: {}", stage, ffmpeg::Error::from(code));
    forward_library_log(LogLevel::Error, LOG_SOURCE, &message);
    PlaybackError::OpenFailed(message)
}

// ============================================================================
// Format Mapping
// ============================================================================

const SAMPLE_FORMATS: [(AVSampleFormat, SampleFormat); 10] = [
    (AVSampleFormat::AV_SAMPLE_FMT_U8, SampleFormat::U8),
    (AVSampleFormat::AV_SAMPLE_FMT_S16, SampleFormat::S16),
    (AVSampleFormat::AV_SAMPLE_FMT_S32, SampleFormat::S32),
    (AVSampleFormat::AV_SAMPLE_FMT_FLT, SampleFormat::Flt),
    (AVSampleFormat::AV_SAMPLE_FMT_DBL, SampleFormat::Dbl),
    (AVSampleFormat::AV_SAMPLE_FMT_U8P, SampleFormat::U8P),
    (AVSampleFormat::AV_SAMPLE_FMT_S16P, SampleFormat::S16P),
    (AVSampleFormat::AV_SAMPLE_FMT_S32P, SampleFormat::S32P),
    (AVSampleFormat::AV_SAMPLE_FMT_FLTP, SampleFormat::FltP),
    (AVSampleFormat::AV_SAMPLE_FMT_DBLP, SampleFormat::DblP),
];

const PIXEL_FORMATS: [(AVPixelFormat, PixelFormat); 10] = [
    (AVPixelFormat::AV_PIX_FMT_YUV420P, PixelFormat::Yuv420p),
    (AVPixelFormat::AV_PIX_FMT_YUVJ420P, PixelFormat::Yuvj420p),
    (AVPixelFormat::AV_PIX_FMT_YUVA420P, PixelFormat::Yuva420p),
    (AVPixelFormat::AV_PIX_FMT_YUV422P, PixelFormat::Yuv422p),
    (AVPixelFormat::AV_PIX_FMT_YUV444P, PixelFormat::Yuv444p),
    (AVPixelFormat::AV_PIX_FMT_NV12, PixelFormat::Nv12),
    (AVPixelFormat::AV_PIX_FMT_BGRA, PixelFormat::Bgra),
    (AVPixelFormat::AV_PIX_FMT_D3D11, PixelFormat::D3d11),
    (AVPixelFormat::AV_PIX_FMT_DXVA2_VLD, PixelFormat::Dxva2),
    (AVPixelFormat::AV_PIX_FMT_VAAPI, PixelFormat::Vaapi),
];

fn map_sample_format(format: AVSampleFormat) -> Option<SampleFormat> {
    SAMPLE_FORMATS
        .iter()
        .find(|(av, _)| *av == format)
        .map(|(_, format)| *format)
}

/// Codec parameters and frames store the format as a plain integer.
fn sample_format_from_raw(value: c_int) -> Option<SampleFormat> {
    SAMPLE_FORMATS
        .iter()
        .find(|(av, _)| *av as c_int == value)
        .map(|(_, format)| *format)
}

fn to_av_sample_format(format: SampleFormat) -> AVSampleFormat {
    SAMPLE_FORMATS
        .iter()
        .find(|(_, ours)| *ours == format)
        .map(|(av, _)| *av)
        .unwrap_or(AVSampleFormat::AV_SAMPLE_FMT_NONE)
}

fn map_pixel_format(format: AVPixelFormat) -> Option<PixelFormat> {
    PIXEL_FORMATS
        .iter()
        .find(|(av, _)| *av == format)
        .map(|(_, format)| *format)
}

fn pixel_format_from_raw(value: c_int) -> Option<PixelFormat> {
    PIXEL_FORMATS
        .iter()
        .find(|(av, _)| *av as c_int == value)
        .map(|(_, format)| *format)
}

fn to_library_pixel(format: PixelFormat) -> Result<ffmpeg::format::Pixel> {
    PIXEL_FORMATS
        .iter()
        .find(|(_, ours)| *ours == format)
        .filter(|_| !format.is_hardware())
        .map(|(av, _)| ffmpeg::format::Pixel::from(*av))
        .ok_or_else(|| PlaybackError::Backend(format!("no software layout for {:?}", format)))
}

fn map_media_type(medium: ffmpeg::media::Type) -> MediaKind {
    match medium {
        ffmpeg::media::Type::Audio => MediaKind::Audio,
        ffmpeg::media::Type::Video => MediaKind::Video,
        ffmpeg::media::Type::Subtitle => MediaKind::Subtitle,
        _ => MediaKind::Data,
    }
}

fn map_chroma_location(location: Location) -> ChromaLocation {
    match location {
        Location::Left => ChromaLocation::Left,
        Location::Center => ChromaLocation::Center,
        Location::TopLeft => ChromaLocation::TopLeft,
        Location::Top => ChromaLocation::Top,
        Location::BottomLeft => ChromaLocation::BottomLeft,
        Location::Bottom => ChromaLocation::Bottom,
        _ => ChromaLocation::Unspecified,
    }
}

fn map_profile(codec: ffmpeg::codec::Id, profile: c_int) -> AudioProfile {
    if codec != ffmpeg::codec::Id::AAC {
        return AudioProfile::Unspecified;
    }
    match profile {
        PROFILE_AAC_LOW => AudioProfile::AacLow,
        PROFILE_AAC_HE => AudioProfile::AacHe,
        PROFILE_AAC_HE_V2 => AudioProfile::AacHeV2,
        _ => AudioProfile::Unspecified,
    }
}

fn channel_layout(layout: &ffi::AVChannelLayout) -> Option<ChannelLayout> {
    if layout.order != ffi::AVChannelOrder::AV_CHANNEL_ORDER_NATIVE {
        return None;
    }
    // SAFETY: native order layouts store their mask in the union.
    Some(ChannelLayout::from_mask(unsafe { layout.u.mask }))
}

fn valid_timestamp(value: i64) -> Option<i64> {
    (value != ffi::AV_NOPTS_VALUE).then_some(value)
}

// ============================================================================
// Demuxer
// ============================================================================

/// Owned copy of a stream's codec parameters.
struct StreamParameters(ffmpeg::codec::Parameters);

// SAFETY: the copy has no owner back-reference and is only read while a
// decoder context is created from it.
unsafe impl Send for StreamParameters {}
unsafe impl Sync for StreamParameters {}

fn stream_info(stream: &ffmpeg::format::stream::Stream<'_>) -> StreamInfo {
    let parameters = stream.parameters();
    let codec = parameters.id();
    let kind = map_media_type(parameters.medium());

    let mut info = StreamInfo::new(stream.index(), kind, codec.name());
    let time_base = stream.time_base();
    info.time_base = TimeBase::new(
        time_base.numerator() as i64,
        time_base.denominator() as i64,
    );

    let metadata = stream.metadata();
    info.title = metadata.get("title").map(str::to_string);
    info.language = metadata.get("language").map(str::to_string);
    let disposition = stream.disposition();
    info.is_default = disposition.contains(Disposition::DEFAULT);
    info.is_forced = disposition.contains(Disposition::FORCED);

    // SAFETY: the parameters point at the stream's live codec parameters.
    let raw = unsafe { &*parameters.as_ptr() };
    info.bit_rate = raw.bit_rate.max(0) as u64;
    info.bits_per_raw_sample = raw.bits_per_raw_sample.max(0) as u32;
    info.bits_per_coded_sample = raw.bits_per_coded_sample.max(0) as u32;

    match kind {
        MediaKind::Audio => {
            info.start_skip_samples = raw.initial_padding.max(0) as u32;
            info.audio = Some(AudioParams {
                sample_rate: raw.sample_rate.max(0) as u32,
                channels: raw.ch_layout.nb_channels.max(0) as u16,
                channel_layout: channel_layout(&raw.ch_layout),
                sample_format: sample_format_from_raw(raw.format).unwrap_or(SampleFormat::FltP),
                profile: map_profile(codec, raw.profile),
            });
        }
        MediaKind::Video => {
            let rate = stream.avg_frame_rate();
            info.video = Some(VideoParams {
                width: raw.width.max(0) as u32,
                height: raw.height.max(0) as u32,
                pixel_format: pixel_format_from_raw(raw.format).unwrap_or(PixelFormat::Yuv420p),
                frame_rate: (rate.numerator() > 0 && rate.denominator() > 0)
                    .then(|| (rate.numerator() as u32, rate.denominator() as u32)),
            });
        }
        _ => {}
    }

    info.codec_private = Some(CodecPrivate::new(StreamParameters(parameters.clone())));
    info
}

struct FfmpegDemuxer {
    // Closed before `io` so the context never outlives its byte source.
    input: ffmpeg::format::context::Input,
    _io: Option<CustomIo>,
    streams: Vec<StreamInfo>,
}

// SAFETY: the demuxer is the only owner of the format context and its AVIO
// context; neither is reachable from anywhere else.
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    fn new(input: ffmpeg::format::context::Input, io: Option<CustomIo>) -> Self {
        let streams = input.streams().map(|stream| stream_info(&stream)).collect();
        Self {
            input,
            _io: io,
            streams,
        }
    }
}

impl Demuxer for FfmpegDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn container(&self) -> ContainerInfo {
        // SAFETY: reads a plain field of the open context.
        let start_time = unsafe { (*self.input.as_ptr()).start_time };
        ContainerInfo {
            format_name: self.input.format().name().to_string(),
            duration_us: valid_timestamp(self.input.duration()).filter(|&d| d > 0),
            start_time_us: valid_timestamp(start_time),
        }
    }

    fn find_best_stream(&self, kind: MediaKind) -> Option<usize> {
        let medium = match kind {
            MediaKind::Audio => ffmpeg::media::Type::Audio,
            MediaKind::Video => ffmpeg::media::Type::Video,
            MediaKind::Subtitle => ffmpeg::media::Type::Subtitle,
            MediaKind::Data => ffmpeg::media::Type::Data,
        };
        self.input.streams().best(medium).map(|stream| stream.index())
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match packet.read(&mut self.input) {
                Ok(()) => break,
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => continue,
                Err(e) => {
                    forward_library_log(LogLevel::Warning, LOG_SOURCE, &format!("read failed: {}", e));
                    return Err(PlaybackError::Backend(format!("read failed: {}", e)));
                }
            }
        }

        Ok(Some(Packet {
            stream_index: packet.stream(),
            pts: packet.pts(),
            dts: packet.dts(),
            duration: packet.duration(),
            keyframe: packet.is_key(),
            data: Bytes::copy_from_slice(packet.data().unwrap_or_default()),
        }))
    }

    fn seek(&mut self, stream_index: usize, timestamp: i64, backward: bool) -> Result<()> {
        let stream = self.streams.get(stream_index).ok_or_else(|| {
            PlaybackError::SeekFailed(format!("no stream {}", stream_index))
        })?;
        // Seeking without a stream index takes microseconds.
        let target = stream.time_base.to_host_ticks(timestamp) / (TICKS_PER_SECOND / 1_000_000);

        let result = if backward {
            self.input.seek(target, ..target)
        } else {
            self.input.seek(target, target..)
        };
        result.map_err(|e| {
            forward_library_log(LogLevel::Warning, LOG_SOURCE, &format!("seek failed: {}", e));
            PlaybackError::SeekFailed(e.to_string())
        })
    }
}

// ============================================================================
// Decoders
// ============================================================================

fn library_packet(packet: &Packet) -> ffmpeg::Packet {
    let mut out = ffmpeg::Packet::copy(&packet.data);
    out.set_stream(packet.stream_index);
    out.set_pts(packet.pts);
    out.set_dts(packet.dts);
    out.set_duration(packet.duration);
    if packet.keyframe {
        out.set_flags(ffmpeg::codec::packet::Flags::KEY);
    }
    out
}

fn send(decoder: &mut ffmpeg::decoder::Opened, packet: Option<&Packet>) -> Result<()> {
    let result = match packet {
        Some(packet) => decoder.send_packet(&library_packet(packet)),
        None => decoder.send_eof(),
    };
    match result {
        // Already draining.
        Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
        Err(e) => {
            forward_library_log(LogLevel::Warning, LOG_SOURCE, &format!("decode error: {}", e));
            Err(PlaybackError::Backend(format!("decode failed: {}", e)))
        }
    }
}

/// Translate a failed receive into the decoder state it signals.
fn receive_status(error: ffmpeg::Error) -> Result<DecodeStatus> {
    match error {
        ffmpeg::Error::Other { errno } if errno == ffmpeg::error::EAGAIN => {
            Ok(DecodeStatus::NeedsInput)
        }
        ffmpeg::Error::Eof => Ok(DecodeStatus::EndOfStream),
        e => Err(PlaybackError::Backend(format!("decode failed: {}", e))),
    }
}

struct FfmpegAudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    frame: ffmpeg::frame::Audio,
    params: AudioParams,
}

// SAFETY: see the module docs; the codec context has a single owner.
unsafe impl Send for FfmpegAudioDecoder {}

impl FfmpegAudioDecoder {
    fn new(decoder: ffmpeg::decoder::Audio, stream: &StreamInfo) -> Self {
        let declared = stream.audio.clone();
        // SAFETY: reads plain fields of the open context.
        let raw = unsafe { &*decoder.as_ptr() };
        let channels = match raw.ch_layout.nb_channels {
            n if n > 0 => n as u16,
            _ => declared.as_ref().map_or(2, |p| p.channels),
        };
        let sample_format = map_sample_format(raw.sample_fmt)
            .or_else(|| declared.as_ref().map(|p| p.sample_format))
            .unwrap_or(SampleFormat::FltP);
        let params = AudioParams {
            sample_rate: decoder.rate(),
            channels,
            channel_layout: channel_layout(&raw.ch_layout),
            sample_format,
            profile: declared.map(|p| p.profile).unwrap_or_default(),
        };
        Self {
            decoder,
            frame: ffmpeg::frame::Audio::empty(),
            params,
        }
    }

    fn take_frame(&self) -> Result<AudioFrame> {
        // SAFETY: reads fields of a frame the decoder just filled.
        let raw = unsafe { &*self.frame.as_ptr() };
        let format = sample_format_from_raw(raw.format).ok_or_else(|| {
            PlaybackError::Backend(format!("unsupported sample format {}", raw.format))
        })?;
        let channels = raw.ch_layout.nb_channels.max(0) as usize;
        let samples = raw.nb_samples.max(0) as usize;
        let (plane_count, plane_len) = if format.is_planar() {
            (channels, samples * format.bytes_per_sample())
        } else {
            (1, samples * channels * format.bytes_per_sample())
        };

        let planes = (0..plane_count)
            .map(|index| {
                // SAFETY: a decoded frame holds one extended_data pointer per
                // plane, each valid for at least `plane_len` bytes.
                unsafe {
                    let data = *raw.extended_data.add(index);
                    Bytes::copy_from_slice(std::slice::from_raw_parts(data, plane_len))
                }
            })
            .collect();

        Ok(AudioFrame {
            format,
            sample_rate: raw.sample_rate.max(0) as u32,
            channels: channels as u16,
            channel_layout: channel_layout(&raw.ch_layout),
            samples,
            pts: valid_timestamp(raw.pts),
            duration: raw.duration,
            planes,
        })
    }
}

impl Decoder for FfmpegAudioDecoder {
    fn audio_params(&self) -> Option<AudioParams> {
        Some(self.params.clone())
    }

    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        send(&mut self.decoder, packet)
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus> {
        if let Err(e) = self.decoder.receive_frame(&mut self.frame) {
            return receive_status(e);
        }
        Ok(DecodeStatus::Frame(DecodedFrame::Audio(self.take_frame()?)))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

struct FfmpegVideoDecoder {
    decoder: ffmpeg::decoder::Video,
    frame: ffmpeg::frame::Video,
    selected: Option<PixelFormat>,
    /// Converts frames whose format cannot be handed out as decoded.
    converter: Option<scaling::Context>,
}

// SAFETY: see the module docs; the codec and scaling contexts have a single
// owner.
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    fn new(decoder: ffmpeg::decoder::Video) -> Self {
        Self {
            decoder,
            frame: ffmpeg::frame::Video::empty(),
            selected: None,
            converter: None,
        }
    }

    fn native_format(&self) -> Option<PixelFormat> {
        map_pixel_format(self.decoder.format().into()).filter(|f| !f.is_hardware())
    }

    /// Planes of the current frame, converted to `target` when the decoder
    /// produced something else.
    fn planes(&mut self, target: PixelFormat) -> Result<Vec<Plane>> {
        let frame_format = map_pixel_format(self.frame.format().into());
        if frame_format == Some(target) {
            return Ok(copy_planes(&self.frame, target));
        }

        let (width, height) = (self.frame.width(), self.frame.height());
        let source = self.frame.format();
        let destination = to_library_pixel(target)?;
        let reusable = self.converter.as_ref().is_some_and(|context| {
            let input = context.input();
            input.format == source && input.width == width && input.height == height
        });
        if !reusable {
            debug!("Converting decoded {:?} to {:?}", source, target);
            let context = scaling::Context::get(
                source,
                width,
                height,
                destination,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| PlaybackError::Backend(format!("conversion setup failed: {}", e)))?;
            self.converter = Some(context);
        }
        let Some(context) = self.converter.as_mut() else {
            return Err(PlaybackError::Internal("converter not initialized".to_string()));
        };

        let mut converted = ffmpeg::frame::Video::new(destination, width, height);
        context
            .run(&self.frame, &mut converted)
            .map_err(|e| PlaybackError::Backend(format!("conversion failed: {}", e)))?;
        Ok(copy_planes(&converted, target))
    }
}

fn copy_planes(frame: &ffmpeg::frame::Video, format: PixelFormat) -> Vec<Plane> {
    let count = format
        .plane_layout(frame.width(), frame.height())
        .len()
        .min(frame.planes());
    (0..count)
        .map(|index| Plane {
            data: Bytes::copy_from_slice(frame.data(index)),
            stride: frame.stride(index),
        })
        .collect()
}

impl Decoder for FfmpegVideoDecoder {
    fn video_params(&self) -> Option<VideoParams> {
        let rate = self.decoder.frame_rate().filter(|r| r.numerator() > 0 && r.denominator() > 0);
        Some(VideoParams {
            width: self.decoder.width(),
            height: self.decoder.height(),
            pixel_format: self.selected.or(self.native_format()).unwrap_or(PixelFormat::Yuv420p),
            frame_rate: rate.map(|r| (r.numerator() as u32, r.denominator() as u32)),
        })
    }

    fn offered_pixel_formats(&self) -> Vec<PixelFormat> {
        let mut offered = Vec::new();
        // SAFETY: an open context has its codec set, and a codec's format
        // list ends with AV_PIX_FMT_NONE.
        unsafe {
            let codec = (*self.decoder.as_ptr()).codec;
            if codec.is_null() {
                return offered;
            }
            let mut cursor = (*codec).pix_fmts;
            if cursor.is_null() {
                return offered;
            }
            while *cursor != AVPixelFormat::AV_PIX_FMT_NONE {
                offered.extend(map_pixel_format(*cursor));
                cursor = cursor.add(1);
            }
        }
        offered
    }

    fn select_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        if !self.offered_pixel_formats().contains(&format) {
            return Err(PlaybackError::Backend(format!(
                "decoder does not offer {:?}",
                format
            )));
        }
        self.selected = Some(format);
        Ok(())
    }

    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        send(&mut self.decoder, packet)
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus> {
        if let Err(e) = self.decoder.receive_frame(&mut self.frame) {
            return receive_status(e);
        }

        let decoded = map_pixel_format(self.frame.format().into()).filter(|f| !f.is_hardware());
        let target = self.selected.or(decoded).unwrap_or(PixelFormat::Yuv420p);
        let planes = self.planes(target)?;

        // SAFETY: reads a plain field of the frame the decoder just filled.
        let duration = unsafe { (*self.frame.as_ptr()).duration };
        Ok(DecodeStatus::Frame(DecodedFrame::Video(VideoFrame {
            width: self.frame.width(),
            height: self.frame.height(),
            format: target,
            pts: self.frame.pts(),
            best_effort_timestamp: self.frame.timestamp(),
            duration,
            keyframe: self.frame.is_key(),
            interlaced: self.frame.is_interlaced(),
            top_field_first: self.frame.is_top_first(),
            chroma_location: map_chroma_location(self.frame.chroma_location()),
            data: VideoFrameData::Planes(planes),
        })))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

// ============================================================================
// Scaler
// ============================================================================

/// libswscale conversion into a contiguous image.
struct FfmpegScaler {
    spec: ScaleSpec,
    destination: ffmpeg::format::Pixel,
    context: Option<scaling::Context>,
}

// SAFETY: see the module docs; the scaling context has a single owner.
unsafe impl Send for FfmpegScaler {}

impl FfmpegScaler {
    fn new(spec: ScaleSpec) -> Result<Self> {
        if spec.out_width == 0 || spec.out_height == 0 {
            return Err(PlaybackError::Backend("empty scaler output".to_string()));
        }
        Ok(Self {
            spec,
            destination: to_library_pixel(spec.out_format)?,
            context: None,
        })
    }

    fn context_for(
        &mut self,
        source: ffmpeg::format::Pixel,
        width: u32,
        height: u32,
    ) -> Result<&mut scaling::Context> {
        let reusable = self.context.as_ref().is_some_and(|context| {
            let input = context.input();
            input.format == source && input.width == width && input.height == height
        });
        if !reusable {
            debug!(
                "Scaling {:?} {}x{} to {:?} {}x{}",
                source, width, height, self.spec.out_format, self.spec.out_width, self.spec.out_height
            );
            let context = scaling::Context::get(
                source,
                width,
                height,
                self.destination,
                self.spec.out_width,
                self.spec.out_height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| PlaybackError::Backend(format!("scaler setup failed: {}", e)))?;
            self.context = Some(context);
        }
        self.context
            .as_mut()
            .ok_or_else(|| PlaybackError::Internal("scaler not initialized".to_string()))
    }
}

impl Scaler for FfmpegScaler {
    fn spec(&self) -> ScaleSpec {
        self.spec
    }

    fn scale(&mut self, frame: &VideoFrame, dst: &mut [u8]) -> Result<()> {
        if dst.len() < self.spec.output_size() {
            return Err(PlaybackError::Internal(format!(
                "scaler output needs {} bytes, got {}",
                self.spec.output_size(),
                dst.len()
            )));
        }

        let source = to_library_pixel(frame.format)?;
        let mut input = ffmpeg::frame::Video::new(source, frame.width, frame.height);
        for (index, (_, row_bytes, rows)) in frame
            .format
            .plane_layout(frame.width, frame.height)
            .into_iter()
            .enumerate()
        {
            let (plane, stride) = frame
                .plane(index)
                .ok_or_else(|| PlaybackError::Backend("frame is missing planes".to_string()))?;
            let input_stride = input.stride(index);
            copy_rows(plane, stride, input.data_mut(index), input_stride, row_bytes, rows)?;
        }

        let destination = self.destination;
        let (width, height) = (self.spec.out_width, self.spec.out_height);
        let context = self.context_for(source, frame.width, frame.height)?;
        let mut output = ffmpeg::frame::Video::new(destination, width, height);
        context
            .run(&input, &mut output)
            .map_err(|e| PlaybackError::Backend(format!("scale failed: {}", e)))?;

        for (index, (offset, row_bytes, rows)) in self
            .spec
            .out_format
            .plane_layout(width, height)
            .into_iter()
            .enumerate()
        {
            copy_rows(
                output.data(index),
                output.stride(index),
                &mut dst[offset..],
                row_bytes,
                row_bytes,
                rows,
            )?;
        }
        Ok(())
    }
}

/// Copy `rows` rows of `row_bytes` between buffers with different strides.
fn copy_rows(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<()> {
    for row in 0..rows {
        let from = src.get(row * src_stride..row * src_stride + row_bytes);
        let to = dst.get_mut(row * dst_stride..row * dst_stride + row_bytes);
        match (from, to) {
            (Some(from), Some(to)) => to.copy_from_slice(from),
            _ => {
                warn!("Plane row {} out of bounds", row);
                return Err(PlaybackError::Backend(format!(
                    "plane too small for {} rows of {} bytes",
                    rows, row_bytes
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whence_mapping() {
        assert_eq!(map_whence(0, ffi::AVSEEK_SIZE as c_int), Some(Whence::Size));
        assert_eq!(map_whence(100, SEEK_SET), Some(Whence::Start(100)));
        assert_eq!(
            map_whence(100, SEEK_SET | ffi::AVSEEK_FORCE as c_int),
            Some(Whence::Start(100))
        );
        assert_eq!(map_whence(-4, SEEK_CUR), Some(Whence::Current(-4)));
        assert_eq!(map_whence(-4, SEEK_END), Some(Whence::End(-4)));
        assert_eq!(map_whence(-1, SEEK_SET), None);
        assert_eq!(map_whence(0, 7), None);
    }

    #[test]
    fn test_receive_status() {
        assert!(matches!(
            receive_status(ffmpeg::Error::Other { errno: ffmpeg::error::EAGAIN }),
            Ok(DecodeStatus::NeedsInput)
        ));
        assert!(matches!(
            receive_status(ffmpeg::Error::Eof),
            Ok(DecodeStatus::EndOfStream)
        ));
        assert!(matches!(
            receive_status(ffmpeg::Error::InvalidData),
            Err(PlaybackError::Backend(_))
        ));
    }

    #[test]
    fn test_raw_formats_map() {
        let s16 = AVSampleFormat::AV_SAMPLE_FMT_S16P as c_int;
        assert_eq!(sample_format_from_raw(s16), Some(SampleFormat::S16P));
        assert_eq!(sample_format_from_raw(-1), None);
        assert_eq!(
            to_av_sample_format(SampleFormat::Flt),
            AVSampleFormat::AV_SAMPLE_FMT_FLT
        );

        let nv12 = AVPixelFormat::AV_PIX_FMT_NV12 as c_int;
        assert_eq!(pixel_format_from_raw(nv12), Some(PixelFormat::Nv12));
        assert_eq!(
            map_pixel_format(AVPixelFormat::AV_PIX_FMT_YUV420P10LE),
            None
        );
        assert!(to_library_pixel(PixelFormat::D3d11).is_err());
    }

    #[test]
    fn test_aac_profiles() {
        use ffmpeg::codec::Id;
        assert_eq!(map_profile(Id::AAC, PROFILE_AAC_HE_V2), AudioProfile::AacHeV2);
        assert_eq!(map_profile(Id::AAC, PROFILE_AAC_LOW), AudioProfile::AacLow);
        assert_eq!(map_profile(Id::MP3, PROFILE_AAC_HE_V2), AudioProfile::Unspecified);
    }

    #[test]
    fn test_copy_rows_drops_padding() {
        let src = [1, 2, 9, 9, 3, 4, 9, 9];
        let mut dst = [0u8; 4];
        copy_rows(&src, 4, &mut dst, 2, 2, 2).unwrap();
        assert_eq!(dst, [1, 2, 3, 4]);

        let mut short = [0u8; 3];
        assert!(copy_rows(&src, 4, &mut short, 2, 2, 2).is_err());
    }
}
