//! # Stream Sample Providers
//!
//! One provider per decodable elementary stream. The provider owns the
//! stream's decoder and turns routed packets into host samples.
//!
//! ## State Machine
//!
//! ```text
//! new_audio / new_video ─► Disabled ◄──► Enabled
//!                            │  ▲        │  ▲
//!                            ▼  │        ▼  │
//!                            Flushed ◄───┘  │
//!                               └───────────┘
//! ```
//!
//! The constructors open the decoder and converter before a provider value
//! exists, so a failed construction leaves nothing half-initialized and no
//! provider is ever observed mid-allocation. `Flushed` is transient: a
//! flush returns to whichever of `Enabled` or `Disabled` the provider was
//! in. Dropping a provider is `Destroyed`.
//!
//! ## Pull Path
//!
//! [`StreamSampleProvider::get_next_sample`] asks the decoder for a frame,
//! feeding it packets from the [`PacketRouter`] until one is produced. At end
//! of container the decoder is drained so trailing frames are still
//! delivered. The stream-specific [`FrameConverter`] turns the frame into a
//! buffer; timestamps are converted to host ticks here.

mod audio;
mod video;

pub use audio::AudioConverter;
pub use video::{select_decode_path, select_output_format, DecodePath, VideoConverter, VideoFramePool};

use crate::backend::{DecodeStatus, DecodedFrame, Decoder, MediaKind, TimeBase};
use crate::buffer::SampleBuffer;
use crate::config::BridgeConfig;
use crate::descriptor::StreamDescriptor;
use crate::error::Result;
use crate::router::PacketRouter;
use crate::sample::{MediaSample, VideoSampleProps};
use bridge_traits::HostTime;
use tracing::{debug, warn};

/// Lifecycle of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Enabled,
    Disabled,
    Flushed,
}

/// Timing of one frame in stream time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub pts: i64,
    pub duration: i64,
}

/// A converted frame ready to become a host sample.
#[derive(Debug)]
pub struct ConvertedFrame {
    pub buffer: SampleBuffer,
    pub timing: FrameTiming,
    pub keyframe: bool,
    pub video: Option<VideoSampleProps>,
}

/// Stream-specific conversion from decoded frame to sample buffer.
pub trait FrameConverter: Send {
    fn convert(&mut self, frame: DecodedFrame, timing: FrameTiming) -> Result<ConvertedFrame>;

    /// Drop cached conversion state after a seek.
    fn flush(&mut self) {}
}

pub struct StreamSampleProvider {
    stream_index: usize,
    kind: MediaKind,
    time_base: TimeBase,
    /// Container start offset in host ticks.
    start_offset: i64,
    skip_errors: u32,
    decoder: Box<dyn Decoder>,
    converter: Box<dyn FrameConverter>,
    descriptor: StreamDescriptor,
    state: ProviderState,
    enabled: bool,
    draining: bool,
    discontinuous: bool,
    next_pts: i64,
}

impl StreamSampleProvider {
    /// Assemble a provider from an opened decoder and converter.
    ///
    /// The provider starts disabled and is registered with the router.
    pub(crate) fn assemble(
        stream_index: usize,
        kind: MediaKind,
        time_base: TimeBase,
        start_offset: i64,
        config: &BridgeConfig,
        decoder: Box<dyn Decoder>,
        converter: Box<dyn FrameConverter>,
        descriptor: StreamDescriptor,
        router: &mut PacketRouter,
    ) -> Self {
        router.register(stream_index);
        router.set_enabled(stream_index, false);

        Self {
            stream_index,
            kind,
            time_base,
            start_offset,
            skip_errors: config.skip_errors,
            decoder,
            converter,
            descriptor,
            state: ProviderState::Disabled,
            enabled: false,
            draining: false,
            discontinuous: false,
            next_pts: 0,
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> ProviderState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self, router: &mut PacketRouter) {
        if !self.enabled {
            debug!(stream = self.stream_index, "Enabling stream");
        }
        self.enabled = true;
        self.state = ProviderState::Enabled;
        router.set_enabled(self.stream_index, true);
    }

    /// Flush and stop accepting packets.
    pub fn disable(&mut self, router: &mut PacketRouter) {
        self.flush(router);
        if self.enabled {
            debug!(stream = self.stream_index, "Disabling stream");
        }
        self.enabled = false;
        self.state = ProviderState::Disabled;
        router.set_enabled(self.stream_index, false);
    }

    /// Discard queued packets and decoder state.
    pub fn flush(&mut self, router: &mut PacketRouter) {
        let resting = self.state;
        self.state = ProviderState::Flushed;

        router.flush(self.stream_index);
        self.decoder.flush();
        self.converter.flush();
        self.draining = false;
        self.discontinuous = true;
        self.next_pts = 0;

        self.state = match resting {
            ProviderState::Enabled => ProviderState::Enabled,
            _ => ProviderState::Disabled,
        };
    }

    /// Decode the next sample, or `None` at end of stream.
    ///
    /// Recoverable decode and conversion failures are skipped up to the
    /// configured limit; past it, or on any other failure, the stream ends
    /// early. Ending disables the provider.
    pub fn get_next_sample(&mut self, router: &mut PacketRouter) -> Option<MediaSample> {
        if !self.enabled {
            return None;
        }

        let mut errors = 0u32;
        loop {
            let failure = match self.next_frame(router) {
                Ok(Some(frame)) => {
                    let timing = self.frame_timing(&frame);
                    match self.converter.convert(frame, timing) {
                        Ok(converted) => return Some(self.to_sample(converted)),
                        Err(e) => e,
                    }
                }
                Ok(None) => {
                    debug!(stream = self.stream_index, "End of stream");
                    self.disable(router);
                    return None;
                }
                Err(e) => e,
            };

            errors += 1;
            if !failure.is_recoverable() || errors > self.skip_errors {
                warn!(
                    stream = self.stream_index,
                    "Giving up after {} decode errors: {}", errors, failure
                );
                self.disable(router);
                return None;
            }
            warn!(stream = self.stream_index, "Skipping decode error: {}", failure);
            self.discontinuous = true;
        }
    }

    fn next_frame(&mut self, router: &mut PacketRouter) -> Result<Option<DecodedFrame>> {
        loop {
            match self.decoder.receive_frame()? {
                DecodeStatus::Frame(frame) => return Ok(Some(frame)),
                DecodeStatus::EndOfStream => return Ok(None),
                DecodeStatus::NeedsInput if self.draining => return Ok(None),
                DecodeStatus::NeedsInput => match router.next_packet(self.stream_index)? {
                    Some(packet) => self.decoder.send_packet(Some(&packet))?,
                    None => {
                        self.draining = true;
                        self.decoder.send_packet(None)?;
                    }
                },
            }
        }
    }

    fn frame_timing(&mut self, frame: &DecodedFrame) -> FrameTiming {
        let pts = frame.timestamp().unwrap_or(self.next_pts);
        let duration = frame.duration();
        FrameTiming { pts, duration }
    }

    fn to_sample(&mut self, converted: ConvertedFrame) -> MediaSample {
        let FrameTiming { pts, duration } = converted.timing;
        self.next_pts = pts + duration;

        let timestamp = self.time_base.to_host_ticks(pts) - self.start_offset;
        let sample = MediaSample {
            buffer: converted.buffer,
            timestamp: HostTime::from_ticks(timestamp),
            duration: HostTime::from_ticks(self.time_base.to_host_ticks(duration)),
            discontinuous: self.discontinuous,
            keyframe: converted.keyframe,
            video: converted.video,
        };
        self.discontinuous = false;
        sample
    }
}

impl std::fmt::Debug for StreamSampleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSampleProvider")
            .field("stream_index", &self.stream_index)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        AudioFrame, ContainerInfo, Demuxer, Packet, SampleFormat, StreamInfo,
    };
    use crate::descriptor::{AudioEncoding, DescriptorKind};
    use crate::error::PlaybackError;
    use bytes::Bytes;
    use std::collections::VecDeque;

    struct PacketList {
        streams: Vec<StreamInfo>,
        packets: VecDeque<Packet>,
    }

    impl Demuxer for PacketList {
        fn streams(&self) -> &[StreamInfo] {
            &self.streams
        }
        fn container(&self) -> ContainerInfo {
            ContainerInfo::default()
        }
        fn find_best_stream(&self, _kind: MediaKind) -> Option<usize> {
            Some(0)
        }
        fn read_packet(&mut self) -> Result<Option<Packet>> {
            Ok(self.packets.pop_front())
        }
        fn seek(&mut self, _: usize, _: i64, _: bool) -> Result<()> {
            Ok(())
        }
    }

    /// Emits one frame per packet; packets with empty data fail to decode.
    /// Holds back the last frame until drained.
    #[derive(Default)]
    struct DelayDecoder {
        held: Option<Packet>,
        ready: VecDeque<Packet>,
        draining: bool,
    }

    impl Decoder for DelayDecoder {
        fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
            match packet {
                Some(p) if p.data.is_empty() => Err(PlaybackError::Backend("corrupt".into())),
                Some(p) => {
                    if let Some(previous) = self.held.replace(p.clone()) {
                        self.ready.push_back(previous);
                    }
                    Ok(())
                }
                None => {
                    self.draining = true;
                    self.ready.extend(self.held.take());
                    Ok(())
                }
            }
        }

        fn receive_frame(&mut self) -> Result<DecodeStatus> {
            if let Some(p) = self.ready.pop_front() {
                return Ok(DecodeStatus::Frame(DecodedFrame::Audio(AudioFrame {
                    format: SampleFormat::S16,
                    sample_rate: 1000,
                    channels: 1,
                    channel_layout: None,
                    samples: 10,
                    pts: p.pts,
                    duration: p.duration,
                    planes: vec![p.data.clone()],
                })));
            }
            if self.draining {
                Ok(DecodeStatus::EndOfStream)
            } else {
                Ok(DecodeStatus::NeedsInput)
            }
        }

        fn flush(&mut self) {
            self.held = None;
            self.ready.clear();
            self.draining = false;
        }
    }

    struct Passthrough;

    impl FrameConverter for Passthrough {
        fn convert(&mut self, frame: DecodedFrame, timing: FrameTiming) -> Result<ConvertedFrame> {
            let DecodedFrame::Audio(frame) = frame else {
                return Err(PlaybackError::Internal("audio only".into()));
            };
            Ok(ConvertedFrame {
                buffer: SampleBuffer::Shared(frame.planes[0].clone()),
                timing,
                keyframe: true,
                video: None,
            })
        }
    }

    fn packet(pts: Option<i64>, data: &'static [u8]) -> Packet {
        Packet {
            stream_index: 0,
            pts,
            dts: pts,
            duration: 10,
            keyframe: true,
            data: Bytes::from_static(data),
        }
    }

    struct Exhausted;

    impl FrameConverter for Exhausted {
        fn convert(&mut self, _: DecodedFrame, _: FrameTiming) -> Result<ConvertedFrame> {
            Err(PlaybackError::OutOfMemory("pool exhausted".into()))
        }
    }

    fn provider(packets: Vec<Packet>, skip_errors: u32) -> (StreamSampleProvider, PacketRouter) {
        provider_with(packets, skip_errors, Box::new(Passthrough))
    }

    fn provider_with(
        packets: Vec<Packet>,
        skip_errors: u32,
        converter: Box<dyn FrameConverter>,
    ) -> (StreamSampleProvider, PacketRouter) {
        let mut router = PacketRouter::new(Box::new(PacketList {
            streams: vec![StreamInfo::new(0, MediaKind::Audio, "pcm")],
            packets: packets.into(),
        }));
        let config = BridgeConfig::default().with_skip_errors(skip_errors);
        let descriptor = StreamDescriptor {
            stream_index: 0,
            name: String::new(),
            language: None,
            codec_name: "pcm".into(),
            bit_rate: 0,
            kind: DescriptorKind::Audio(AudioEncoding {
                sample_rate: 1000,
                channels: 1,
                bits_per_sample: 16,
                sample_format: SampleFormat::S16,
            }),
        };
        let provider = StreamSampleProvider::assemble(
            0,
            MediaKind::Audio,
            TimeBase::new(1, 1000),
            0,
            &config,
            Box::new(DelayDecoder::default()),
            converter,
            descriptor,
            &mut router,
        );
        (provider, router)
    }

    #[test]
    fn test_disabled_provider_never_decodes() {
        let (mut provider, mut router) = provider(vec![packet(Some(0), b"a")], 0);
        assert_eq!(provider.state(), ProviderState::Disabled);
        assert!(provider.get_next_sample(&mut router).is_none());
        assert!(!router.is_end_of_container());
    }

    #[test]
    fn test_unrecoverable_error_ends_stream_at_once() {
        let packets = vec![packet(Some(0), b"a"), packet(Some(10), b"b"), packet(Some(20), b"c")];
        let (mut provider, mut router) = provider_with(packets, 50, Box::new(Exhausted));
        provider.enable(&mut router);

        assert!(provider.get_next_sample(&mut router).is_none());
        assert!(!provider.is_enabled());
        assert!(!router.is_end_of_container());
    }

    #[test]
    fn test_flush_returns_to_resting_state() {
        let (mut provider, mut router) = provider(vec![packet(Some(0), b"a")], 0);
        provider.flush(&mut router);
        assert_eq!(provider.state(), ProviderState::Disabled);

        provider.enable(&mut router);
        provider.flush(&mut router);
        assert_eq!(provider.state(), ProviderState::Enabled);
        assert!(router.is_enabled(0));

        provider.disable(&mut router);
        assert_eq!(provider.state(), ProviderState::Disabled);
        assert!(!router.is_enabled(0));
    }

    #[test]
    fn test_drains_decoder_at_end_of_container() {
        let (mut provider, mut router) =
            provider(vec![packet(Some(0), b"a"), packet(Some(10), b"b")], 0);
        provider.enable(&mut router);

        let first = provider.get_next_sample(&mut router).unwrap();
        let second = provider.get_next_sample(&mut router).unwrap();
        assert_eq!(first.timestamp.ticks(), 0);
        assert_eq!(second.timestamp.ticks(), 100_000);
        assert_eq!(second.duration.ticks(), 100_000);

        assert!(provider.get_next_sample(&mut router).is_none());
        assert!(!provider.is_enabled());
        assert_eq!(provider.state(), ProviderState::Disabled);
    }

    #[test]
    fn test_missing_pts_continues_from_previous() {
        let (mut provider, mut router) = provider(
            vec![packet(Some(20), b"a"), packet(None, b"b"), packet(None, b"c")],
            0,
        );
        provider.enable(&mut router);

        let stamps: Vec<i64> = std::iter::from_fn(|| provider.get_next_sample(&mut router))
            .map(|s| s.timestamp.ticks())
            .collect();
        assert_eq!(stamps, vec![200_000, 300_000, 400_000]);
    }

    #[test]
    fn test_skipped_error_marks_discontinuity() {
        let (mut provider, mut router) = provider(
            vec![packet(Some(0), b"a"), packet(Some(10), b""), packet(Some(20), b"c")],
            5,
        );
        provider.enable(&mut router);

        let first = provider.get_next_sample(&mut router).unwrap();
        assert!(!first.discontinuous);
        let second = provider.get_next_sample(&mut router).unwrap();
        assert!(second.discontinuous);
        assert_eq!(second.timestamp.ticks(), 200_000);
    }

    #[test]
    fn test_error_past_limit_ends_stream() {
        let (mut provider, mut router) =
            provider(vec![packet(Some(0), b""), packet(Some(10), b"b")], 0);
        provider.enable(&mut router);

        assert!(provider.get_next_sample(&mut router).is_none());
        assert!(!provider.is_enabled());
    }

    #[test]
    fn test_flush_keeps_resting_state() {
        let (mut provider, mut router) = provider(vec![packet(Some(0), b"a")], 0);
        provider.enable(&mut router);
        provider.flush(&mut router);
        assert_eq!(provider.state(), ProviderState::Enabled);
        assert!(router.is_enabled(0));

        provider.disable(&mut router);
        provider.flush(&mut router);
        assert_eq!(provider.state(), ProviderState::Disabled);
    }
}
