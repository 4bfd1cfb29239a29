//! Software audio format and channel conversion.
//!
//! Always produces interleaved output. Sample values pass through `f64`
//! normalized to `[-1.0, 1.0)`, which is exact for every supported input
//! width.

use super::types::{AudioFrame, ChannelLayout, SampleFormat};
use crate::error::{PlaybackError, Result};

/// Input/output pair a resampler is built for.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampleSpec {
    pub in_format: SampleFormat,
    pub in_layout: ChannelLayout,
    pub in_rate: u32,
    pub out_format: SampleFormat,
    pub out_layout: ChannelLayout,
    pub out_rate: u32,
}

/// Converted interleaved audio.
#[derive(Debug, Clone)]
pub struct ResampledAudio {
    pub data: Vec<u8>,
    /// Samples per channel.
    pub samples: usize,
}

/// Converts decoded frames to the provider's output format.
pub trait Resampler: Send {
    fn convert(&mut self, frame: &AudioFrame) -> Result<ResampledAudio>;
}

/// Sample types that can be read from and written to native-endian bytes.
pub(crate) trait RawSample: Copy {
    const SIZE: usize;

    fn read(bytes: &[u8]) -> Self;

    fn write(self, out: &mut Vec<u8>);

    /// Normalized value of this sample.
    fn to_f64(self) -> f64;

    /// Nearest sample to a normalized value, saturating at full scale.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_raw_sample {
    ($ty:ty, |$s:ident| $to:expr, |$v:ident| $from:expr) => {
        impl RawSample for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$ty>::from_ne_bytes(raw)
            }

            fn write(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn to_f64(self) -> f64 {
                let $s = self;
                $to
            }

            fn from_f64(value: f64) -> Self {
                let $v = value;
                $from
            }
        }
    };
}

const S16_SCALE: f64 = 32_768.0;
const S32_SCALE: f64 = 2_147_483_648.0;

impl_raw_sample!(u8, |s| (s as f64 - 128.0) / 128.0, |v| {
    (v * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8
});
impl_raw_sample!(i16, |s| s as f64 / S16_SCALE, |v| {
    (v * S16_SCALE).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
});
impl_raw_sample!(i32, |s| s as f64 / S32_SCALE, |v| {
    (v * S32_SCALE).round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
});
impl_raw_sample!(f32, |s| s as f64, |v| v as f32);
impl_raw_sample!(f64, |s| s, |v| v);

/// Write one `f64` sample in `format`.
pub(crate) fn write_sample(value: f64, format: SampleFormat, out: &mut Vec<u8>) {
    match format.packed() {
        SampleFormat::U8 => u8::from_f64(value).write(out),
        SampleFormat::S16 => i16::from_f64(value).write(out),
        SampleFormat::S32 => i32::from_f64(value).write(out),
        SampleFormat::Flt => f32::from_f64(value).write(out),
        _ => value.write(out),
    }
}

fn read_sample(bytes: &[u8], format: SampleFormat) -> f64 {
    match format.packed() {
        SampleFormat::U8 => u8::read(bytes).to_f64(),
        SampleFormat::S16 => i16::read(bytes).to_f64(),
        SampleFormat::S32 => i32::read(bytes).to_f64(),
        SampleFormat::Flt => f32::read(bytes).to_f64(),
        _ => f64::read(bytes),
    }
}

/// Resampler implemented in plain Rust.
///
/// Format and channel conversion only; the output rate must match the input.
pub struct SoftwareResampler {
    spec: ResampleSpec,
}

impl SoftwareResampler {
    pub fn new(spec: ResampleSpec) -> Result<Self> {
        if spec.in_rate != spec.out_rate {
            return Err(PlaybackError::Backend(format!(
                "sample rate conversion {} -> {} is not supported",
                spec.in_rate, spec.out_rate
            )));
        }
        if spec.out_format.is_planar() {
            return Err(PlaybackError::Backend(
                "resampler output must be interleaved".to_string(),
            ));
        }
        if spec.out_layout.channels() == 0 {
            return Err(PlaybackError::Backend("output layout has no channels".to_string()));
        }
        Ok(Self { spec })
    }

    pub fn spec(&self) -> &ResampleSpec {
        &self.spec
    }

    fn sample_at(frame: &AudioFrame, channel: usize, index: usize) -> Option<f64> {
        let width = frame.format.bytes_per_sample();
        let (plane, offset) = if frame.format.is_planar() {
            (frame.planes.get(channel)?, index * width)
        } else {
            (
                frame.planes.first()?,
                (index * frame.channels as usize + channel) * width,
            )
        };
        let bytes = plane.get(offset..offset + width)?;
        Some(read_sample(bytes, frame.format))
    }
}

impl Resampler for SoftwareResampler {
    fn convert(&mut self, frame: &AudioFrame) -> Result<ResampledAudio> {
        if frame.channels == 0 {
            return Err(PlaybackError::Backend("frame has no channels".to_string()));
        }
        let in_channels = frame.channels as usize;
        let out_channels = self.spec.out_layout.channels() as usize;
        let out_format = self.spec.out_format;

        let mut data = Vec::new();
        data.try_reserve_exact(frame.samples * out_channels * out_format.bytes_per_sample())
            .map_err(|e| PlaybackError::OutOfMemory(format!("resampler output: {}", e)))?;

        for index in 0..frame.samples {
            for channel in 0..out_channels {
                // Upmix repeats the last input channel, downmix keeps the leading ones.
                let source = channel.min(in_channels - 1);
                let value = Self::sample_at(frame, source, index).ok_or_else(|| {
                    PlaybackError::Backend(format!(
                        "frame truncated at sample {} channel {}",
                        index, source
                    ))
                })?;
                write_sample(value, out_format, &mut data);
            }
        }

        Ok(ResampledAudio {
            data,
            samples: frame.samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn spec(in_format: SampleFormat, in_ch: u16, out_format: SampleFormat, out_ch: u16) -> ResampleSpec {
        ResampleSpec {
            in_format,
            in_layout: ChannelLayout::default_for(in_ch),
            in_rate: 48_000,
            out_format,
            out_layout: ChannelLayout::default_for(out_ch),
            out_rate: 48_000,
        }
    }

    fn planar_f32(channels: &[&[f32]]) -> AudioFrame {
        let planes = channels
            .iter()
            .map(|samples| {
                let mut plane = Vec::new();
                for s in samples.iter() {
                    s.write(&mut plane);
                }
                Bytes::from(plane)
            })
            .collect();
        AudioFrame {
            format: SampleFormat::FltP,
            sample_rate: 48_000,
            channels: channels.len() as u16,
            channel_layout: None,
            samples: channels[0].len(),
            pts: Some(0),
            duration: channels[0].len() as i64,
            planes,
        }
    }

    #[test]
    fn test_planar_float_interleaves() {
        let frame = planar_f32(&[&[0.5, -0.5], &[0.25, -0.25]]);
        let mut resampler =
            SoftwareResampler::new(spec(SampleFormat::FltP, 2, SampleFormat::Flt, 2)).unwrap();
        let out = resampler.convert(&frame).unwrap();

        assert_eq!(out.samples, 2);
        let values: Vec<f32> = out.data.chunks(4).map(f32::read).collect();
        assert_eq!(values, vec![0.5, 0.25, -0.5, -0.25]);
    }

    #[test]
    fn test_float_to_s16() {
        let frame = planar_f32(&[&[1.0, 0.0, -1.0]]);
        let mut resampler =
            SoftwareResampler::new(spec(SampleFormat::FltP, 1, SampleFormat::S16, 1)).unwrap();
        let out = resampler.convert(&frame).unwrap();

        let values: Vec<i16> = out.data.chunks(2).map(i16::read).collect();
        assert_eq!(values[1], 0);
        assert!(values[0] > 32000);
        assert!(values[2] < -32000);
    }

    #[test]
    fn test_mono_upmix_duplicates_channel() {
        let frame = planar_f32(&[&[0.5]]);
        let mut resampler =
            SoftwareResampler::new(spec(SampleFormat::FltP, 1, SampleFormat::Flt, 2)).unwrap();
        let out = resampler.convert(&frame).unwrap();

        let values: Vec<f32> = out.data.chunks(4).map(f32::read).collect();
        assert_eq!(values, vec![0.5, 0.5]);
    }

    #[test]
    fn test_s32_passthrough_is_exact() {
        let mut plane = Vec::new();
        for s in [i32::MAX, -12345, i32::MIN] {
            s.write(&mut plane);
        }
        let frame = AudioFrame {
            format: SampleFormat::S32,
            sample_rate: 48_000,
            channels: 1,
            channel_layout: None,
            samples: 3,
            pts: None,
            duration: 3,
            planes: vec![Bytes::from(plane.clone())],
        };
        let mut resampler =
            SoftwareResampler::new(spec(SampleFormat::S32, 1, SampleFormat::S32, 1)).unwrap();
        let out = resampler.convert(&frame).unwrap();
        let values: Vec<i32> = out.data.chunks(4).map(i32::read).collect();
        assert_eq!(values[1], -12345);
        assert_eq!(values[2], i32::MIN);
    }

    #[test]
    fn test_integer_samples_convert_exactly() {
        for s in [i16::MIN, -1, 0, 1, i16::MAX] {
            assert_eq!(i16::from_f64(s.to_f64()), s);
        }
        for s in [0u8, 127, 128, 255] {
            assert_eq!(u8::from_f64(s.to_f64()), s);
        }
        assert_eq!(i16::from_f64(1.0), i16::MAX);
        assert_eq!(i16::from_f64(-1.0), i16::MIN);
        assert_eq!(i32::from_f64(2.0), i32::MAX);
    }

    #[test]
    fn test_rejects_rate_change_and_planar_output() {
        let mut bad = spec(SampleFormat::FltP, 2, SampleFormat::Flt, 2);
        bad.out_rate = 44_100;
        assert!(SoftwareResampler::new(bad).is_err());
        assert!(SoftwareResampler::new(spec(SampleFormat::S16, 2, SampleFormat::S16P, 2)).is_err());
    }

    #[test]
    fn test_truncated_frame_is_error() {
        let mut frame = planar_f32(&[&[0.1, 0.2]]);
        frame.samples = 5;
        let mut resampler =
            SoftwareResampler::new(spec(SampleFormat::FltP, 1, SampleFormat::Flt, 1)).unwrap();
        assert!(resampler.convert(&frame).is_err());
    }
}
