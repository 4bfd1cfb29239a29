//! Audio sample provider: resampling to the canonical output format and
//! gapless lead-in compensation.

use super::{ConvertedFrame, FrameConverter, FrameTiming, StreamSampleProvider};
use crate::backend::{
    AudioParams, AudioProfile, ChannelLayout, DecodedFrame, DecoderOptions, MediaBackend,
    MediaKind, ResampleSpec, Resampler, StreamInfo, TimeBase,
};
use crate::buffer::SampleBuffer;
use crate::config::BridgeConfig;
use crate::descriptor::{AudioEncoding, DescriptorKind, StreamDescriptor};
use crate::error::{PlaybackError, Result};
use crate::router::PacketRouter;
use tracing::{debug, instrument};

/// Input and output channel layouts for a decoder's parameters.
///
/// HE-AAC v2 signals mono but decodes to parametric stereo, so a mono
/// stream of that profile is treated as two channels and its reported
/// layout is ignored.
pub(crate) fn channel_layouts(params: &AudioParams) -> (ChannelLayout, ChannelLayout) {
    let implicit_stereo = params.profile == AudioProfile::AacHeV2 && params.channels == 1;
    let channels = if implicit_stereo { 2 } else { params.channels };

    let input = match params.channel_layout {
        Some(layout) if !implicit_stereo && layout.channels() == channels => layout,
        _ => ChannelLayout::default_for(channels),
    };
    (input, ChannelLayout::default_for(channels))
}

impl StreamSampleProvider {
    /// Build the provider for an audio stream.
    ///
    /// Fails when no decoder exists for the codec or the resampler cannot
    /// be built; the caller leaves the stream out in that case.
    #[instrument(skip_all, fields(stream = stream.index, codec = %stream.codec_name))]
    pub fn new_audio(
        backend: &dyn MediaBackend,
        stream: &StreamInfo,
        config: &BridgeConfig,
        start_offset: i64,
        router: &mut PacketRouter,
    ) -> Result<Self> {
        let params = stream.audio.clone().ok_or_else(|| {
            PlaybackError::DecodeUnavailable(format!(
                "stream {} has no audio parameters",
                stream.index
            ))
        })?;

        let options = DecoderOptions {
            thread_count: config.audio_decoder_threads(),
            request_sample_format: params.sample_format.requested_decoder_format(),
        };
        let decoder = backend.open_decoder(stream, &options)?;
        let decoded = decoder.audio_params().unwrap_or(params);

        let (in_layout, out_layout) = channel_layouts(&decoded);
        let out_format = decoded.sample_format.canonical_output();
        let resampler = backend.create_resampler(ResampleSpec {
            in_format: decoded.sample_format,
            in_layout,
            in_rate: decoded.sample_rate,
            out_format,
            out_layout,
            out_rate: decoded.sample_rate,
        })?;

        debug!(
            "Audio output {:?}, {} channels at {} Hz",
            out_format,
            out_layout.channels(),
            decoded.sample_rate
        );

        let descriptor = StreamDescriptor {
            stream_index: stream.index,
            name: stream.title.clone().unwrap_or_default(),
            language: stream.language.clone(),
            codec_name: stream.codec_name.clone(),
            bit_rate: stream.bit_rate,
            kind: DescriptorKind::Audio(AudioEncoding {
                sample_rate: decoded.sample_rate,
                channels: out_layout.channels(),
                bits_per_sample: out_format.bits_per_sample(),
                sample_format: out_format,
            }),
        };

        let converter = AudioConverter::new(
            resampler,
            stream.time_base,
            decoded.sample_rate,
            stream.start_skip_samples,
        );

        Ok(Self::assemble(
            stream.index,
            MediaKind::Audio,
            stream.time_base,
            start_offset,
            config,
            decoder,
            Box::new(converter),
            descriptor,
            router,
        ))
    }
}

pub struct AudioConverter {
    resampler: Box<dyn Resampler>,
    time_base: TimeBase,
    sample_rate: u32,
    start_skip_samples: u32,
    decoded_frames: u64,
}

impl AudioConverter {
    pub fn new(
        resampler: Box<dyn Resampler>,
        time_base: TimeBase,
        sample_rate: u32,
        start_skip_samples: u32,
    ) -> Self {
        Self {
            resampler,
            time_base,
            sample_rate,
            start_skip_samples,
            decoded_frames: 0,
        }
    }
}

impl FrameConverter for AudioConverter {
    fn convert(&mut self, frame: DecodedFrame, timing: FrameTiming) -> Result<ConvertedFrame> {
        let DecodedFrame::Audio(frame) = frame else {
            return Err(PlaybackError::Internal(
                "audio provider received a video frame".to_string(),
            ));
        };

        let resampled = self.resampler.convert(&frame)?;
        self.decoded_frames += 1;

        let rate = if frame.sample_rate > 0 {
            frame.sample_rate
        } else {
            self.sample_rate
        };
        // Declared durations drift from what was actually decoded.
        let actual = self.time_base.samples_to_ts(resampled.samples as u64, rate);

        let mut pts = timing.pts;
        if timing.duration != actual && self.decoded_frames == 1 && self.start_skip_samples > 0 {
            let skip = self
                .time_base
                .samples_to_ts(self.start_skip_samples as u64, rate);
            if skip == timing.duration - actual {
                debug!("Shifting first frame by {} for encoder delay", skip);
                pts += skip;
            }
        }

        Ok(ConvertedFrame {
            buffer: SampleBuffer::from(resampled.data),
            timing: FrameTiming {
                pts,
                duration: actual,
            },
            keyframe: true,
            video: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AudioFrame, SampleFormat, SoftwareResampler};
    use bytes::Bytes;

    fn params(channels: u16, profile: AudioProfile, layout: Option<u64>) -> AudioParams {
        AudioParams {
            sample_rate: 44_100,
            channels,
            channel_layout: layout.map(ChannelLayout::from_mask),
            sample_format: SampleFormat::FltP,
            profile,
        }
    }

    #[test]
    fn test_he_aac_v2_mono_is_stereo() {
        let (input, output) = channel_layouts(&params(
            1,
            AudioProfile::AacHeV2,
            Some(ChannelLayout::FRONT_CENTER),
        ));
        assert_eq!(input.channels(), 2);
        assert_eq!(output, ChannelLayout::default_for(2));
    }

    #[test]
    fn test_plain_mono_keeps_layout() {
        let (input, output) = channel_layouts(&params(
            1,
            AudioProfile::AacLow,
            Some(ChannelLayout::FRONT_CENTER),
        ));
        assert_eq!(input.mask, ChannelLayout::FRONT_CENTER);
        assert_eq!(output.channels(), 1);
    }

    #[test]
    fn test_missing_layout_uses_default() {
        let (input, _) = channel_layouts(&params(6, AudioProfile::Unspecified, None));
        assert_eq!(input, ChannelLayout::default_for(6));
    }

    fn converter(start_skip: u32) -> AudioConverter {
        let resampler = SoftwareResampler::new(ResampleSpec {
            in_format: SampleFormat::S16,
            in_layout: ChannelLayout::default_for(1),
            in_rate: 1000,
            out_format: SampleFormat::S16,
            out_layout: ChannelLayout::default_for(1),
            out_rate: 1000,
        })
        .unwrap();
        AudioConverter::new(Box::new(resampler), TimeBase::new(1, 1000), 1000, start_skip)
    }

    fn frame(samples: usize) -> DecodedFrame {
        DecodedFrame::Audio(AudioFrame {
            format: SampleFormat::S16,
            sample_rate: 1000,
            channels: 1,
            channel_layout: None,
            samples,
            pts: Some(0),
            duration: 0,
            planes: vec![Bytes::from(vec![0u8; samples * 2])],
        })
    }

    #[test]
    fn test_duration_follows_decoded_samples() {
        let mut converter = converter(0);
        let out = converter
            .convert(frame(20), FrameTiming { pts: 100, duration: 25 })
            .unwrap();
        assert_eq!(out.timing, FrameTiming { pts: 100, duration: 20 });
        assert_eq!(out.buffer.len(), 40);
    }

    #[test]
    fn test_first_frame_gapless_shift() {
        let mut converter = converter(5);
        let first = converter
            .convert(frame(20), FrameTiming { pts: 0, duration: 25 })
            .unwrap();
        assert_eq!(first.timing.pts, 5);

        // Only the first decoded frame is compensated.
        let second = converter
            .convert(frame(20), FrameTiming { pts: 25, duration: 25 })
            .unwrap();
        assert_eq!(second.timing.pts, 25);
    }

    #[test]
    fn test_mismatched_delta_is_not_shifted() {
        let mut converter = converter(3);
        let first = converter
            .convert(frame(20), FrameTiming { pts: 0, duration: 25 })
            .unwrap();
        assert_eq!(first.timing.pts, 0);
        assert_eq!(first.timing.duration, 20);
    }
}
