//! Scripted in-memory backend shared by the integration tests.
//!
//! Models a multiplexed container with a 25 fps video stream (keyframe
//! every second), two audio streams of 50 ms packets and a subtitle stream.
//! Decoded payloads are derived from packet timestamps, so repeated decodes
//! of the same packet are bit-identical.

#![allow(dead_code)]

use bytes::Bytes;
use core_playback::backend::{
    AudioFrame, AudioParams, AudioProfile, ContainerInfo, DecodeStatus, DecodedFrame, Decoder,
    DecoderCapabilities, DecoderOptions, Demuxer, FrameAllocator, InputSource, MediaBackend,
    MediaKind, OpenedInput, Packet, PixelFormat, Plane, SampleFormat, StreamInfo, TimeBase,
    VideoFrame, VideoFrameData, VideoParams,
};
use core_playback::{PlaybackError, Result};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

pub const VIDEO: usize = 0;
pub const AUDIO_MAIN: usize = 1;
pub const AUDIO_ALT: usize = 2;
pub const SUBTITLE: usize = 3;

pub const VIDEO_FRAME_MS: i64 = 40;
pub const AUDIO_PACKET_MS: i64 = 50;
pub const AUDIO_RATE: u32 = 8000;
pub const AUDIO_PACKET_SAMPLES: i64 = 400;
pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 36;

/// Payload marker for packets the decoders reject.
const CORRUPT: u8 = 0xFF;

#[derive(Clone)]
pub struct ScriptedContainer {
    pub streams: Vec<StreamInfo>,
    pub packets: Vec<Packet>,
    pub duration_us: Option<i64>,
    pub start_time_us: Option<i64>,
    pub best_audio: Option<usize>,
    pub best_video: Option<usize>,
    pub best_subtitle: Option<usize>,
    pub fail_seeks: bool,
    /// Pixel formats the video decoder offers; empty for a fixed output.
    pub offered_formats: Vec<PixelFormat>,
}

impl ScriptedContainer {
    /// Video, two audio tracks and a subtitle track of `seconds` length.
    pub fn av(seconds: i64) -> Self {
        let mut streams = vec![
            video_stream(VIDEO, "h264", PixelFormat::Yuv420p),
            audio_stream(AUDIO_MAIN, "aac", "en"),
            audio_stream(AUDIO_ALT, "mp3", "fr"),
            StreamInfo::new(SUBTITLE, MediaKind::Subtitle, "subrip"),
        ];
        streams[SUBTITLE].language = Some("en".to_string());

        let mut container = Self {
            streams,
            packets: Vec::new(),
            duration_us: Some(seconds * 1_000_000),
            start_time_us: None,
            best_audio: Some(AUDIO_MAIN),
            best_video: Some(VIDEO),
            best_subtitle: Some(SUBTITLE),
            fail_seeks: false,
            offered_formats: Vec::new(),
        };
        container.fill(seconds * 1000, 0);
        container
    }

    pub fn audio_only(seconds: i64) -> Self {
        let mut container = Self::av(seconds);
        container.remove_stream(VIDEO);
        container.best_video = None;
        container
    }

    pub fn video_only(seconds: i64) -> Self {
        let mut container = Self::av(seconds);
        container.remove_stream(AUDIO_MAIN);
        container.remove_stream(AUDIO_ALT);
        container.best_audio = None;
        container
    }

    /// Regenerate packets for every stream over `length_ms`, shifted by
    /// `offset_ms`.
    pub fn fill(&mut self, length_ms: i64, offset_ms: i64) {
        let mut packets = Vec::new();
        for stream in &self.streams {
            match stream.kind {
                MediaKind::Video => {
                    for frame in 0..length_ms / VIDEO_FRAME_MS {
                        let pts = offset_ms + frame * VIDEO_FRAME_MS;
                        packets.push((pts, video_packet(stream.index, pts, frame % 25 == 0)));
                    }
                }
                MediaKind::Audio => {
                    for chunk in 0..length_ms / AUDIO_PACKET_MS {
                        let ms = offset_ms + chunk * AUDIO_PACKET_MS;
                        packets.push((ms, audio_packet(stream.index, ms)));
                    }
                }
                _ => {}
            }
        }
        packets.sort_by_key(|(ms, packet)| (*ms, packet.stream_index));
        self.packets = packets.into_iter().map(|(_, packet)| packet).collect();
    }

    pub fn with_start_time(mut self, start_time_ms: i64) -> Self {
        let length_ms = self.duration_us.unwrap_or(0) / 1000;
        self.start_time_us = Some(start_time_ms * 1000);
        self.fill(length_ms, start_time_ms);
        self
    }

    /// Mark the video packet at `frame` as undecodable.
    pub fn corrupt_video_frame(mut self, frame: i64) -> Self {
        let pts = frame * VIDEO_FRAME_MS;
        for packet in &mut self.packets {
            if packet.stream_index == VIDEO && packet.pts == Some(pts) {
                packet.data = Bytes::from_static(&[CORRUPT]);
            }
        }
        self
    }

    /// Video frames from `frame` on report `width`x`height`.
    pub fn grow_video_from(mut self, frame: i64, width: u32, height: u32) -> Self {
        let from = frame * VIDEO_FRAME_MS;
        for packet in &mut self.packets {
            if packet.stream_index == VIDEO && packet.pts.unwrap_or(0) >= from {
                packet.data = video_payload(width, height);
            }
        }
        self
    }

    pub fn with_video_codec(mut self, codec: &str, format: PixelFormat) -> Self {
        if let Some(stream) = self.streams.iter_mut().find(|s| s.kind == MediaKind::Video) {
            stream.codec_name = codec.to_string();
            if let Some(video) = stream.video.as_mut() {
                video.pixel_format = format;
            }
        }
        self
    }

    pub fn with_offered_formats(mut self, formats: &[PixelFormat]) -> Self {
        self.offered_formats = formats.to_vec();
        self
    }

    pub fn with_audio_codec(mut self, index: usize, codec: &str) -> Self {
        if let Some(stream) = self.streams.iter_mut().find(|s| s.index == index) {
            stream.codec_name = codec.to_string();
        }
        self
    }

    fn remove_stream(&mut self, index: usize) {
        self.streams.retain(|s| s.index != index);
        self.packets.retain(|p| p.stream_index != index);
    }
}

fn video_stream(index: usize, codec: &str, format: PixelFormat) -> StreamInfo {
    let mut stream = StreamInfo::new(index, MediaKind::Video, codec);
    stream.time_base = TimeBase::new(1, 1000);
    stream.bit_rate = 1_000_000;
    stream.bits_per_raw_sample = 8;
    stream.video = Some(VideoParams {
        width: WIDTH,
        height: HEIGHT,
        pixel_format: format,
        frame_rate: Some((25, 1)),
    });
    stream
}

fn audio_stream(index: usize, codec: &str, language: &str) -> StreamInfo {
    let mut stream = StreamInfo::new(index, MediaKind::Audio, codec);
    stream.time_base = TimeBase::new(1, AUDIO_RATE as i64);
    stream.language = Some(language.to_string());
    stream.bit_rate = 128_000;
    stream.bits_per_raw_sample = 16;
    stream.audio = Some(AudioParams {
        sample_rate: AUDIO_RATE,
        channels: 2,
        channel_layout: None,
        sample_format: SampleFormat::S16P,
        profile: AudioProfile::AacLow,
    });
    stream
}

fn video_payload(width: u32, height: u32) -> Bytes {
    let mut data = vec![0u8];
    data.extend_from_slice(&(width as u16).to_le_bytes());
    data.extend_from_slice(&(height as u16).to_le_bytes());
    Bytes::from(data)
}

fn video_packet(stream_index: usize, pts: i64, keyframe: bool) -> Packet {
    Packet {
        stream_index,
        pts: Some(pts),
        dts: Some(pts),
        duration: VIDEO_FRAME_MS,
        keyframe,
        data: video_payload(WIDTH, HEIGHT),
    }
}

fn audio_packet(stream_index: usize, ms: i64) -> Packet {
    let pts = ms * AUDIO_RATE as i64 / 1000;
    Packet {
        stream_index,
        pts: Some(pts),
        dts: Some(pts),
        duration: AUDIO_PACKET_SAMPLES,
        keyframe: true,
        data: Bytes::from(vec![stream_index as u8]),
    }
}

// ============================================================================
// Backend
// ============================================================================

pub struct ScriptedBackend {
    container: ScriptedContainer,
}

impl ScriptedBackend {
    pub fn new(container: ScriptedContainer) -> Arc<dyn MediaBackend> {
        Arc::new(Self { container })
    }
}

impl MediaBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open_input(
        &self,
        input: InputSource,
        options: &BTreeMap<String, String>,
    ) -> Result<OpenedInput> {
        if let InputSource::Stream(adapter) = &input {
            if adapter.size()? == 0 {
                return Err(PlaybackError::OpenFailed("empty stream".to_string()));
            }
        }

        let unused_options = options
            .keys()
            .filter(|key| key.as_str() != "read_ahead_bytes")
            .cloned()
            .collect();

        Ok(OpenedInput {
            demuxer: Box::new(ScriptedDemuxer {
                container: self.container.clone(),
                cursor: 0,
            }),
            unused_options,
        })
    }

    fn open_decoder(
        &self,
        stream: &StreamInfo,
        options: &DecoderOptions,
    ) -> Result<Box<dyn Decoder>> {
        if stream.codec_name == "unsupported" {
            return Err(PlaybackError::DecodeUnavailable(stream.codec_name.clone()));
        }
        match stream.kind {
            MediaKind::Audio => {
                let params = stream
                    .audio
                    .clone()
                    .ok_or_else(|| PlaybackError::DecodeUnavailable("no params".into()))?;
                let output = options
                    .request_sample_format
                    .unwrap_or_else(|| params.sample_format.packed());
                Ok(Box::new(ScriptedAudioDecoder {
                    params: AudioParams {
                        sample_format: output,
                        ..params
                    },
                    pending: VecDeque::new(),
                    draining: false,
                }))
            }
            MediaKind::Video => {
                let params = stream
                    .video
                    .clone()
                    .ok_or_else(|| PlaybackError::DecodeUnavailable("no params".into()))?;
                Ok(Box::new(ScriptedVideoDecoder {
                    params,
                    offered: self.container.offered_formats.clone(),
                    direct: stream.codec_name == "h264",
                    allocator: None,
                    pending: VecDeque::new(),
                    draining: false,
                }))
            }
            _ => Err(PlaybackError::DecodeUnavailable(stream.codec_name.clone())),
        }
    }
}

struct ScriptedDemuxer {
    container: ScriptedContainer,
    cursor: usize,
}

impl Demuxer for ScriptedDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.container.streams
    }

    fn container(&self) -> ContainerInfo {
        ContainerInfo {
            format_name: "scripted".to_string(),
            duration_us: self.container.duration_us,
            start_time_us: self.container.start_time_us,
        }
    }

    fn find_best_stream(&self, kind: MediaKind) -> Option<usize> {
        match kind {
            MediaKind::Audio => self.container.best_audio,
            MediaKind::Video => self.container.best_video,
            MediaKind::Subtitle => self.container.best_subtitle,
            MediaKind::Data => None,
        }
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let packet = self.container.packets.get(self.cursor).cloned();
        if packet.is_some() {
            self.cursor += 1;
        }
        Ok(packet)
    }

    fn seek(&mut self, stream_index: usize, timestamp: i64, backward: bool) -> Result<()> {
        if self.container.fail_seeks || timestamp < 0 || !backward {
            return Err(PlaybackError::SeekFailed(format!("cannot seek to {}", timestamp)));
        }
        self.cursor = self
            .container
            .packets
            .iter()
            .rposition(|p| {
                p.stream_index == stream_index && p.keyframe && p.pts.unwrap_or(0) <= timestamp
            })
            .unwrap_or(0);
        Ok(())
    }
}

struct ScriptedAudioDecoder {
    params: AudioParams,
    pending: VecDeque<AudioFrame>,
    draining: bool,
}

impl Decoder for ScriptedAudioDecoder {
    fn audio_params(&self) -> Option<AudioParams> {
        Some(self.params.clone())
    }

    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(());
        };
        if packet.data.first() == Some(&CORRUPT) {
            return Err(PlaybackError::Backend("corrupt audio packet".into()));
        }

        let samples = AUDIO_PACKET_SAMPLES as usize;
        let channels = self.params.channels as usize;
        let level = (packet.pts.unwrap_or(0) % 1000) as i16;
        let mut data = Vec::with_capacity(samples * channels * 4);
        for _ in 0..samples * channels {
            match self.params.sample_format {
                SampleFormat::Flt => data.extend_from_slice(&(level as f32 / 1000.0).to_ne_bytes()),
                _ => data.extend_from_slice(&level.to_ne_bytes()),
            }
        }

        self.pending.push_back(AudioFrame {
            format: self.params.sample_format,
            sample_rate: self.params.sample_rate,
            channels: self.params.channels,
            channel_layout: None,
            samples,
            pts: packet.pts,
            duration: packet.duration,
            planes: vec![Bytes::from(data)],
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus> {
        match self.pending.pop_front() {
            Some(frame) => Ok(DecodeStatus::Frame(DecodedFrame::Audio(frame))),
            None if self.draining => Ok(DecodeStatus::EndOfStream),
            None => Ok(DecodeStatus::NeedsInput),
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
    }
}

struct ScriptedVideoDecoder {
    params: VideoParams,
    offered: Vec<PixelFormat>,
    direct: bool,
    allocator: Option<Arc<dyn FrameAllocator>>,
    pending: VecDeque<VideoFrame>,
    draining: bool,
}

impl Decoder for ScriptedVideoDecoder {
    fn capabilities(&self) -> DecoderCapabilities {
        DecoderCapabilities {
            direct_buffers: self.direct,
        }
    }

    fn video_params(&self) -> Option<VideoParams> {
        Some(self.params.clone())
    }

    fn offered_pixel_formats(&self) -> Vec<PixelFormat> {
        self.offered.clone()
    }

    fn select_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        if !self.offered.contains(&format) {
            return Err(PlaybackError::Backend(format!("{:?} was not offered", format)));
        }
        self.params.pixel_format = format;
        Ok(())
    }

    fn aligned_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        ((width + 15) / 16 * 16, (height + 15) / 16 * 16)
    }

    fn set_frame_allocator(&mut self, allocator: Arc<dyn FrameAllocator>) -> Result<()> {
        self.allocator = Some(allocator);
        Ok(())
    }

    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(());
        };
        let data = &packet.data;
        if data.len() < 5 || data[0] == CORRUPT {
            return Err(PlaybackError::Backend("corrupt video packet".into()));
        }
        let width = u16::from_le_bytes([data[1], data[2]]) as u32;
        let height = u16::from_le_bytes([data[3], data[4]]) as u32;
        let luma = (packet.pts.unwrap_or(0) / VIDEO_FRAME_MS % 200) as u8;
        let format = self.params.pixel_format;

        let direct = self
            .allocator
            .as_ref()
            .and_then(|allocator| allocator.allocate(format, width, height));
        let data = match direct {
            Some(mut direct) => {
                direct.buffer.fill(luma);
                VideoFrameData::Direct(direct)
            }
            None => VideoFrameData::Planes(
                format
                    .plane_layout(width, height)
                    .into_iter()
                    .map(|(_, stride, rows)| Plane {
                        data: Bytes::from(vec![luma; stride * rows]),
                        stride,
                    })
                    .collect(),
            ),
        };

        self.pending.push_back(VideoFrame {
            width,
            height,
            format,
            pts: packet.pts,
            best_effort_timestamp: packet.pts,
            duration: packet.duration,
            keyframe: packet.keyframe,
            interlaced: false,
            top_field_first: false,
            chroma_location: Default::default(),
            data,
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus> {
        match self.pending.pop_front() {
            Some(frame) => Ok(DecodeStatus::Frame(DecodedFrame::Video(frame))),
            None if self.draining => Ok(DecodeStatus::EndOfStream),
            None => Ok(DecodeStatus::NeedsInput),
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
    }
}
