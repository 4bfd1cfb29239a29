//! # Symphonia Backend
//!
//! Pure-Rust demux/decode for audio containers.
//!
//! Symphonia's buffers are planar internally, so streams report the planar
//! variant of their sample format and decoders hand back interleaved audio
//! in the format the provider asked for. Tracks without a codec are listed
//! as data streams.
//!
//! ## Options
//!
//! | Key | Effect |
//! |-----|--------|
//! | `format_hint` | File extension used to guide probing |
//! | `prebuild_seek_index` | Scan the whole container for a seek index at open |
//! | `seek_index_fill_rate` | Seconds between seek index entries |
//!
//! Any other key is reported back as unused.

use super::types::{
    AudioFrame, AudioParams, AudioProfile, ChannelLayout, CodecPrivate, ContainerInfo,
    DecodedFrame, MediaKind, Packet, SampleFormat, StreamInfo, TimeBase,
};
use super::{
    DecodeStatus, Decoder, DecoderOptions, Demuxer, InputSource, MediaBackend, OpenedInput,
    RawSample,
};
use crate::error::{PlaybackError, Result};
use crate::global::{BackendLock, HostLockManager};
use bridge_traits::LogLevel;
use bytes::Bytes;
use core_runtime::logging::forward_library_log;
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{CodecParameters, CODEC_TYPE_AAC, CODEC_TYPE_NULL};
use symphonia::core::conv::ConvertibleSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::SampleFormat as SymphoniaSampleFormat;
use tracing::{debug, instrument};

const LOG_SOURCE: &str = "symphonia";

#[derive(Default)]
pub struct SymphoniaBackend {
    lock: OnceCell<Arc<BackendLock>>,
}

impl SymphoniaBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn media_source(input: InputSource) -> Result<(Box<dyn MediaSource>, Hint, usize)> {
        let mut hint = Hint::new();
        match input {
            InputSource::Uri(uri) => {
                if uri.contains("://") && !uri.starts_with("file://") {
                    return Err(PlaybackError::OpenFailed(format!(
                        "unsupported protocol in {}",
                        uri
                    )));
                }
                let path = Path::new(uri.trim_start_matches("file://"));
                if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
                    hint.with_extension(extension);
                }
                let file = std::fs::File::open(path)
                    .map_err(|e| PlaybackError::OpenFailed(format!("{}: {}", uri, e)))?;
                Ok((Box::new(file), hint, 0))
            }
            InputSource::Stream(adapter) => {
                let capacity = adapter.capacity();
                Ok((Box::new(adapter), hint, capacity))
            }
        }
    }
}

impl MediaBackend for SymphoniaBackend {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn initialize(&self, locks: &'static HostLockManager) -> Result<()> {
        self.lock.get_or_init(|| locks.create_lock());
        Ok(())
    }

    #[instrument(skip_all, fields(input = %input.describe()))]
    fn open_input(
        &self,
        input: InputSource,
        options: &BTreeMap<String, String>,
    ) -> Result<OpenedInput> {
        let (source, mut hint, capacity) = Self::media_source(input)?;

        let mut format_options = FormatOptions::default();
        let mut unused_options = Vec::new();
        for (key, value) in options {
            match key.as_str() {
                "format_hint" => {
                    hint.with_extension(value);
                }
                "prebuild_seek_index" => {
                    format_options.prebuild_seek_index = parse_option(key, value)?;
                }
                "seek_index_fill_rate" => {
                    format_options.seek_index_fill_rate = parse_option(key, value)?;
                }
                _ => unused_options.push(key.clone()),
            }
        }

        // The stream buffer must be a power of two and larger than the
        // biggest read symphonia makes.
        let buffer_len = capacity
            .next_power_of_two()
            .max(MediaSourceStreamOptions::default().buffer_len);
        let stream = MediaSourceStream::new(source, MediaSourceStreamOptions { buffer_len });

        let detected = symphonia::default::get_probe()
            .format(&hint, stream, &format_options, &MetadataOptions::default())
            .map_err(|e| {
                forward_library_log(LogLevel::Error, LOG_SOURCE, &format!("format detection failed: {}", e));
                PlaybackError::OpenFailed(format!("format detection failed: {}", e))
            })?;

        let demuxer = SymphoniaDemuxer::new(detected.format, hint_name(options));
        debug!(streams = demuxer.streams.len(), "Container opened");

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
        let params = stream.audio.as_ref().ok_or_else(|| {
            PlaybackError::DecodeUnavailable(format!("no decoder for {}", stream.codec_name))
        })?;
        let handle = stream
            .codec_private
            .as_ref()
            .and_then(|private| private.downcast_ref::<TrackHandle>())
            .ok_or_else(|| {
                PlaybackError::DecodeUnavailable(format!(
                    "stream {} was not opened by this backend",
                    stream.index
                ))
            })?;

        let lock = self.lock.get().cloned();
        let _guard = lock.as_ref().map(|lock| lock.lock());

        let decoder = symphonia::default::get_codecs()
            .make(&handle.params, &Default::default())
            .map_err(|e| {
                forward_library_log(
                    LogLevel::Warning,
                    LOG_SOURCE,
                    &format!("no decoder for {}: {}", stream.codec_name, e),
                );
                PlaybackError::DecodeUnavailable(format!("{}: {}", stream.codec_name, e))
            })?;

        let output = options
            .request_sample_format
            .unwrap_or(params.sample_format)
            .packed();

        Ok(Box::new(SymphoniaAudioDecoder {
            decoder,
            track_id: handle.track_id,
            output,
            params: AudioParams {
                sample_format: output,
                ..params.clone()
            },
            pending: VecDeque::new(),
            draining: false,
        }))
    }
}

fn parse_option<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        PlaybackError::ArgumentInvalid(format!("invalid value '{}' for option {}", value, key))
    })
}

fn hint_name(options: &BTreeMap<String, String>) -> String {
    options
        .get("format_hint")
        .cloned()
        .unwrap_or_else(|| LOG_SOURCE.to_string())
}

// ============================================================================
// Stream Mapping
// ============================================================================

/// Attached to every stream so decoders can be opened from its info.
struct TrackHandle {
    track_id: u32,
    params: CodecParameters,
}

fn map_sample_format(format: Option<SymphoniaSampleFormat>) -> SampleFormat {
    match format {
        Some(SymphoniaSampleFormat::U8) => SampleFormat::U8P,
        Some(SymphoniaSampleFormat::S8 | SymphoniaSampleFormat::U16 | SymphoniaSampleFormat::S16) => {
            SampleFormat::S16P
        }
        Some(
            SymphoniaSampleFormat::U24
            | SymphoniaSampleFormat::S24
            | SymphoniaSampleFormat::U32
            | SymphoniaSampleFormat::S32,
        ) => SampleFormat::S32P,
        Some(SymphoniaSampleFormat::F64) => SampleFormat::DblP,
        Some(SymphoniaSampleFormat::F32) | None => SampleFormat::FltP,
    }
}

fn stream_info(
    index: usize,
    track_id: u32,
    params: &CodecParameters,
    language: Option<&str>,
) -> StreamInfo {
    let codec_name = symphonia::default::get_codecs()
        .get_codec(params.codec)
        .map(|descriptor| descriptor.short_name.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let kind = if params.codec == CODEC_TYPE_NULL {
        MediaKind::Data
    } else {
        MediaKind::Audio
    };
    let mut info = StreamInfo::new(index, kind, codec_name);
    info.language = language.map(str::to_string);
    info.bits_per_raw_sample = params.bits_per_sample.unwrap_or(0);
    info.bits_per_coded_sample = params.bits_per_coded_sample.unwrap_or(0);
    info.start_skip_samples = params.delay.unwrap_or(0);

    info.time_base = match (params.time_base, params.sample_rate) {
        (Some(tb), _) => TimeBase::new(tb.numer as i64, tb.denom as i64),
        (None, Some(rate)) => TimeBase::new(1, rate as i64),
        (None, None) => info.time_base,
    };

    if kind == MediaKind::Audio {
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let profile = if params.codec == CODEC_TYPE_AAC {
            AudioProfile::AacLow
        } else {
            AudioProfile::Unspecified
        };
        info.audio = Some(AudioParams {
            sample_rate: params.sample_rate.unwrap_or(0),
            channels,
            channel_layout: params
                .channels
                .map(|c| ChannelLayout::from_mask(c.bits() as u64)),
            sample_format: map_sample_format(params.sample_format),
            profile,
        });
    }

    info.codec_private = Some(CodecPrivate::new(TrackHandle {
        track_id,
        params: params.clone(),
    }));
    info
}

// ============================================================================
// Demuxer
// ============================================================================

struct SymphoniaDemuxer {
    reader: Box<dyn FormatReader>,
    streams: Vec<StreamInfo>,
    track_ids: Vec<u32>,
    format_name: String,
}

impl SymphoniaDemuxer {
    fn new(reader: Box<dyn FormatReader>, format_name: String) -> Self {
        let mut streams = Vec::new();
        let mut track_ids = Vec::new();
        for (index, track) in reader.tracks().iter().enumerate() {
            streams.push(stream_info(
                index,
                track.id,
                &track.codec_params,
                track.language.as_deref(),
            ));
            track_ids.push(track.id);
        }
        Self {
            reader,
            streams,
            track_ids,
            format_name,
        }
    }

    fn index_of(&self, track_id: u32) -> Option<usize> {
        self.track_ids.iter().position(|&id| id == track_id)
    }
}

impl Demuxer for SymphoniaDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn container(&self) -> ContainerInfo {
        let default = self
            .reader
            .default_track()
            .or_else(|| self.reader.tracks().first());

        let to_us = |ts: u64, params: &CodecParameters| -> Option<i64> {
            let time = params.time_base?.calc_time(ts);
            Some(time.seconds as i64 * 1_000_000 + (time.frac * 1_000_000.0) as i64)
        };

        let (duration_us, start_time_us) = match default {
            Some(track) => {
                let params = &track.codec_params;
                let duration = params.n_frames.and_then(|n| to_us(n, params));
                let start = (params.start_ts > 0)
                    .then(|| to_us(params.start_ts, params))
                    .flatten();
                (duration, start)
            }
            None => (None, None),
        };

        ContainerInfo {
            format_name: self.format_name.clone(),
            duration_us,
            start_time_us,
        }
    }

    fn find_best_stream(&self, kind: MediaKind) -> Option<usize> {
        if kind != MediaKind::Audio {
            return None;
        }
        self.reader
            .default_track()
            .and_then(|track| self.index_of(track.id))
            .filter(|&index| self.streams[index].kind == MediaKind::Audio)
            .or_else(|| self.streams.iter().position(|s| s.kind == MediaKind::Audio))
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    forward_library_log(
                        LogLevel::Warning,
                        LOG_SOURCE,
                        "track list changed, ending container",
                    );
                    return Ok(None);
                }
                Err(e) => return Err(PlaybackError::Backend(format!("read failed: {}", e))),
            };

            while !self.reader.metadata().is_latest() {
                self.reader.metadata().pop();
            }

            let Some(stream_index) = self.index_of(packet.track_id()) else {
                continue;
            };
            let pts = i64::try_from(packet.ts()).ok();
            return Ok(Some(Packet {
                stream_index,
                pts,
                dts: pts,
                duration: packet.dur() as i64,
                keyframe: true,
                data: Bytes::copy_from_slice(packet.buf()),
            }));
        }
    }

    fn seek(&mut self, stream_index: usize, timestamp: i64, _backward: bool) -> Result<()> {
        let track_id = *self.track_ids.get(stream_index).ok_or_else(|| {
            PlaybackError::SeekFailed(format!("no stream {}", stream_index))
        })?;

        self.reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: timestamp.max(0) as u64,
                    track_id,
                },
            )
            .map_err(|e| {
                forward_library_log(LogLevel::Warning, LOG_SOURCE, &format!("seek failed: {}", e));
                PlaybackError::SeekFailed(e.to_string())
            })?;
        Ok(())
    }
}

// ============================================================================
// Decoder
// ============================================================================

struct SymphoniaAudioDecoder {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    output: SampleFormat,
    params: AudioParams,
    pending: VecDeque<AudioFrame>,
    draining: bool,
}

fn interleave<S: ConvertibleSample + RawSample>(decoded: AudioBufferRef<'_>) -> Vec<u8> {
    let spec = *decoded.spec();
    let mut buffer = SampleBuffer::<S>::new(decoded.frames() as u64, spec);
    buffer.copy_interleaved_ref(decoded);

    let mut out = Vec::with_capacity(buffer.len() * S::SIZE);
    for &sample in buffer.samples() {
        sample.write(&mut out);
    }
    out
}

impl Decoder for SymphoniaAudioDecoder {
    fn audio_params(&self) -> Option<AudioParams> {
        Some(self.params.clone())
    }

    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(());
        };

        let ts = packet.pts.unwrap_or(0).max(0) as u64;
        let source = symphonia::core::formats::Packet::new_from_slice(
            self.track_id,
            ts,
            packet.duration.max(0) as u64,
            &packet.data,
        );

        let decoded = match self.decoder.decode(&source) {
            Ok(decoded) => decoded,
            Err(e) => {
                forward_library_log(LogLevel::Warning, LOG_SOURCE, &format!("decode error: {}", e));
                return Err(PlaybackError::Backend(format!("decode failed: {}", e)));
            }
        };

        let samples = decoded.frames();
        if samples == 0 {
            return Ok(());
        }
        let spec = *decoded.spec();
        let data = match self.output {
            SampleFormat::U8 => interleave::<u8>(decoded),
            SampleFormat::S16 => interleave::<i16>(decoded),
            SampleFormat::S32 => interleave::<i32>(decoded),
            SampleFormat::Dbl => interleave::<f64>(decoded),
            _ => interleave::<f32>(decoded),
        };

        self.pending.push_back(AudioFrame {
            format: self.output,
            sample_rate: spec.rate,
            channels: spec.channels.count() as u16,
            channel_layout: Some(ChannelLayout::from_mask(spec.channels.bits() as u64)),
            samples,
            pts: packet.pts,
            duration: packet.duration,
            planes: vec![Bytes::from(data)],
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(DecodeStatus::Frame(DecodedFrame::Audio(frame)));
        }
        if self.draining {
            Ok(DecodeStatus::EndOfStream)
        } else {
            Ok(DecodeStatus::NeedsInput)
        }
    }

    fn flush(&mut self) {
        self.decoder.reset();
        self.pending.clear();
        self.draining = false;
    }
}
