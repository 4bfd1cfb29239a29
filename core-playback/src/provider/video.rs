//! Video sample provider.
//!
//! ## Decode Paths
//!
//! | Path | When | Per-frame cost |
//! |------|------|----------------|
//! | Direct buffer | output format is the decoder's native format and the decoder accepts caller buffers | none, the decoder writes into pooled memory |
//! | Scaler | everything else | one software conversion into pooled memory |
//!
//! The direct path is sized for the geometry the stream reported at open.
//! A larger picture permanently switches the stream to the scaler, which
//! keeps writing at the original geometry.

use super::{ConvertedFrame, FrameConverter, FrameTiming, StreamSampleProvider};
use crate::backend::{
    negotiate_pixel_format, DecodedFrame, DecoderOptions, DirectBuffer, FrameAllocator,
    MediaBackend, MediaKind, PixelFormat, ScaleSpec, Scaler, StreamInfo, VideoFrame,
    VideoFrameData,
};
use crate::buffer::{BufferPool, SampleBuffer};
use crate::config::BridgeConfig;
use crate::descriptor::{DescriptorKind, StreamDescriptor, VideoEncoding};
use crate::error::{PlaybackError, Result};
use crate::router::PacketRouter;
use crate::sample::{ChromaSiting, VideoSampleProps};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePath {
    DirectBuffer,
    Scaler,
}

/// Pick the output pixel format.
///
/// Planar 4:2:0 wins when the decoder already produces it into caller
/// buffers. Otherwise the preference is NV12, planar 4:2:0, BGRA, falling
/// back to NV12 when nothing is allowed. Planar output keeps the range of a
/// full-range source on either path.
pub fn select_output_format(
    allow_iyuv: bool,
    allow_nv12: bool,
    allow_bgra: bool,
    native: PixelFormat,
    direct_buffers: bool,
) -> PixelFormat {
    if allow_iyuv && native.is_planar_420() && direct_buffers {
        native
    } else if allow_nv12 {
        PixelFormat::Nv12
    } else if allow_iyuv && native.is_planar_420() {
        native
    } else if allow_iyuv {
        PixelFormat::Yuv420p
    } else if allow_bgra {
        PixelFormat::Bgra
    } else {
        PixelFormat::Nv12
    }
}

pub fn select_decode_path(
    output: PixelFormat,
    native: PixelFormat,
    direct_buffers: bool,
) -> DecodePath {
    if output == native && direct_buffers {
        DecodePath::DirectBuffer
    } else {
        DecodePath::Scaler
    }
}

/// Direct-path allocator handed to the decoder.
///
/// Requests outside the geometry it was sized for raise the shared fallback
/// flag and are refused, so the decoder uses its own memory from then on.
pub struct VideoFramePool {
    pool: BufferPool,
    format: PixelFormat,
    width: u32,
    height: u32,
    alloc_width: u32,
    alloc_height: u32,
    fallback: Arc<AtomicBool>,
}

impl VideoFramePool {
    pub fn new(
        format: PixelFormat,
        (width, height): (u32, u32),
        (alloc_width, alloc_height): (u32, u32),
        fallback: Arc<AtomicBool>,
    ) -> Result<Self> {
        let pool = BufferPool::new(format.buffer_size(alloc_width, alloc_height), 0)?;
        Ok(Self {
            pool,
            format,
            width,
            height,
            alloc_width,
            alloc_height,
            fallback,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.pool.buffer_size()
    }
}

impl FrameAllocator for VideoFramePool {
    fn allocate(&self, format: PixelFormat, width: u32, height: u32) -> Option<DirectBuffer> {
        if self.fallback.load(Ordering::Acquire) {
            return None;
        }

        if format != self.format || width > self.width || height > self.height {
            info!(
                "Picture {}x{} {:?} exceeds direct buffers {}x{} {:?}, switching to scaler",
                width, height, format, self.width, self.height, self.format
            );
            self.fallback.store(true, Ordering::Release);
            return None;
        }

        match self.pool.acquire() {
            Ok(buffer) => Some(DirectBuffer {
                buffer,
                alloc_width: self.alloc_width,
                alloc_height: self.alloc_height,
            }),
            Err(e) => {
                warn!("Direct buffer allocation failed: {}", e);
                None
            }
        }
    }
}

pub struct VideoConverter {
    backend: Arc<dyn MediaBackend>,
    output: PixelFormat,
    width: u32,
    height: u32,
    direct: bool,
    fallback: Arc<AtomicBool>,
    scaler: Option<Box<dyn Scaler>>,
    output_pool: Option<BufferPool>,
}

impl VideoConverter {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        output: PixelFormat,
        (width, height): (u32, u32),
        path: DecodePath,
        fallback: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            output,
            width,
            height,
            direct: path == DecodePath::DirectBuffer,
            fallback,
            scaler: None,
            output_pool: None,
        }
    }

    pub fn decode_path(&self) -> DecodePath {
        if self.direct && !self.fallback.load(Ordering::Acquire) {
            DecodePath::DirectBuffer
        } else {
            DecodePath::Scaler
        }
    }

    fn scale(&mut self, frame: &VideoFrame) -> Result<SampleBuffer> {
        if self.scaler.is_none() {
            let spec = ScaleSpec {
                out_format: self.output,
                out_width: self.width,
                out_height: self.height,
            };
            debug!("Creating scaler for {:?} {}x{}", spec.out_format, self.width, self.height);
            self.output_pool = Some(BufferPool::new(spec.output_size(), 0)?);
            self.scaler = Some(self.backend.create_scaler(spec)?);
        }

        let (Some(scaler), Some(pool)) = (self.scaler.as_mut(), self.output_pool.as_ref()) else {
            return Err(PlaybackError::Internal("scaler not initialized".to_string()));
        };
        let mut buffer = pool.acquire()?;
        scaler.scale(frame, &mut buffer)?;
        Ok(SampleBuffer::from(buffer))
    }
}

impl FrameConverter for VideoConverter {
    fn convert(&mut self, frame: DecodedFrame, timing: FrameTiming) -> Result<ConvertedFrame> {
        let DecodedFrame::Video(frame) = frame else {
            return Err(PlaybackError::Internal(
                "video provider received an audio frame".to_string(),
            ));
        };

        let interlaced = frame.interlaced;
        let bottom_field_first = interlaced && !frame.top_field_first;
        let chroma_siting = ChromaSiting::from_location(frame.chroma_location, interlaced);
        let keyframe = frame.keyframe;

        let (buffer, width, height, format) = match frame.data {
            VideoFrameData::Direct(direct) => (
                SampleBuffer::from(direct.buffer),
                direct.alloc_width,
                direct.alloc_height,
                frame.format,
            ),
            VideoFrameData::Planes(_) => {
                (self.scale(&frame)?, self.width, self.height, self.output)
            }
        };

        Ok(ConvertedFrame {
            buffer,
            timing,
            keyframe,
            video: Some(VideoSampleProps {
                width,
                height,
                format,
                interlaced,
                bottom_field_first,
                chroma_siting,
            }),
        })
    }
}

impl StreamSampleProvider {
    /// Build the provider for the chosen video stream.
    ///
    /// The decode path is fixed here; only geometry growth can move a
    /// direct-path stream to the scaler later.
    #[instrument(skip_all, fields(stream = stream.index, codec = %stream.codec_name))]
    pub fn new_video(
        backend: &Arc<dyn MediaBackend>,
        stream: &StreamInfo,
        config: &BridgeConfig,
        start_offset: i64,
        router: &mut PacketRouter,
    ) -> Result<Self> {
        let params = stream.video.clone().ok_or_else(|| {
            PlaybackError::DecodeUnavailable(format!(
                "stream {} has no video parameters",
                stream.index
            ))
        })?;

        let options = DecoderOptions {
            thread_count: config.video_decoder_threads(),
            request_sample_format: None,
        };
        let mut decoder = backend.open_decoder(stream, &options)?;
        let mut decoded = decoder.video_params().unwrap_or(params);
        if decoded.width == 0 || decoded.height == 0 {
            return Err(PlaybackError::DecodeUnavailable(format!(
                "stream {} has no picture size",
                stream.index
            )));
        }

        let offered = decoder.offered_pixel_formats();
        if let Some(format) = negotiate_pixel_format(&offered) {
            debug!("Decoder offers {:?}, selected {:?}", offered, format);
            decoder.select_pixel_format(format)?;
            decoded.pixel_format = format;
        }

        let native = decoded.pixel_format;
        let direct_buffers = decoder.capabilities().direct_buffers;
        let output = select_output_format(
            config.video_output_allow_iyuv,
            config.video_output_allow_nv12,
            config.video_output_allow_bgra8,
            native,
            direct_buffers,
        );
        let path = select_decode_path(output, native, direct_buffers);
        let geometry = (decoded.width, decoded.height);
        let fallback = Arc::new(AtomicBool::new(false));

        if path == DecodePath::DirectBuffer {
            let aligned = decoder.aligned_dimensions(decoded.width, decoded.height);
            let pool = VideoFramePool::new(output, geometry, aligned, Arc::clone(&fallback))?;
            decoder.set_frame_allocator(Arc::new(pool))?;
        }

        debug!(
            "Video {:?} -> {:?} at {}x{} via {:?}",
            native, output, decoded.width, decoded.height, path
        );

        let descriptor = StreamDescriptor {
            stream_index: stream.index,
            name: stream.title.clone().unwrap_or_default(),
            language: stream.language.clone(),
            codec_name: stream.codec_name.clone(),
            bit_rate: stream.bit_rate,
            kind: DescriptorKind::Video(VideoEncoding {
                width: decoded.width,
                height: decoded.height,
                pixel_format: output,
                frame_rate: decoded.frame_rate,
            }),
        };

        let converter =
            VideoConverter::new(Arc::clone(backend), output, geometry, path, fallback);

        Ok(Self::assemble(
            stream.index,
            MediaKind::Video,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        ChromaLocation, Decoder, InputSource, OpenedInput, Plane, StreamInfo,
    };
    use bytes::Bytes;
    use std::collections::BTreeMap;

    const ALL_FORMATS: [PixelFormat; 5] = [
        PixelFormat::Yuv420p,
        PixelFormat::Yuvj420p,
        PixelFormat::Yuv444p,
        PixelFormat::Nv12,
        PixelFormat::Bgra,
    ];

    #[test]
    fn test_output_format_preference() {
        use PixelFormat::*;
        assert_eq!(select_output_format(true, true, true, Yuv420p, true), Yuv420p);
        assert_eq!(select_output_format(true, true, true, Yuvj420p, true), Yuvj420p);
        assert_eq!(select_output_format(true, true, true, Yuv420p, false), Nv12);
        assert_eq!(select_output_format(true, false, true, Yuv444p, true), Yuv420p);
        assert_eq!(select_output_format(false, false, true, Yuv420p, true), Bgra);
        assert_eq!(select_output_format(false, false, false, Yuv420p, true), Nv12);
    }

    #[test]
    fn test_scaled_planar_output_keeps_full_range() {
        use PixelFormat::*;
        assert_eq!(select_output_format(true, false, true, Yuvj420p, false), Yuvj420p);
        assert_eq!(select_output_format(true, false, true, Yuv420p, false), Yuv420p);
        assert_eq!(select_output_format(true, false, false, Nv12, false), Yuv420p);
        assert_eq!(select_output_format(true, true, true, Yuvj420p, false), Nv12);
    }

    #[test]
    fn test_path_selection_is_deterministic() {
        for native in ALL_FORMATS {
            for direct in [false, true] {
                for mask in 0..8u8 {
                    let (iyuv, nv12, bgra) = (mask & 1 != 0, mask & 2 != 0, mask & 4 != 0);
                    let first = select_output_format(iyuv, nv12, bgra, native, direct);
                    let second = select_output_format(iyuv, nv12, bgra, native, direct);
                    assert_eq!(first, second);
                    assert_eq!(
                        select_decode_path(first, native, direct),
                        select_decode_path(second, native, direct)
                    );
                    if !direct {
                        assert_eq!(select_decode_path(first, native, direct), DecodePath::Scaler);
                    }
                }
            }
        }
    }

    #[test]
    fn test_direct_path_needs_matching_native_format() {
        assert_eq!(
            select_decode_path(PixelFormat::Nv12, PixelFormat::Nv12, true),
            DecodePath::DirectBuffer
        );
        assert_eq!(
            select_decode_path(PixelFormat::Nv12, PixelFormat::Yuv420p, true),
            DecodePath::Scaler
        );
    }

    #[test]
    fn test_frame_pool_refuses_growth() {
        let fallback = Arc::new(AtomicBool::new(false));
        let pool = VideoFramePool::new(
            PixelFormat::Yuv420p,
            (64, 48),
            (64, 64),
            Arc::clone(&fallback),
        )
        .unwrap();

        let direct = pool.allocate(PixelFormat::Yuv420p, 64, 48).unwrap();
        assert_eq!(direct.buffer.len(), pool.buffer_size());
        assert_eq!((direct.alloc_width, direct.alloc_height), (64, 64));

        assert!(pool.allocate(PixelFormat::Yuv420p, 128, 48).is_none());
        assert!(fallback.load(Ordering::Acquire));
        // The switch is permanent.
        assert!(pool.allocate(PixelFormat::Yuv420p, 64, 48).is_none());
    }

    #[test]
    fn test_frame_pool_refuses_format_change() {
        let fallback = Arc::new(AtomicBool::new(false));
        let pool =
            VideoFramePool::new(PixelFormat::Nv12, (16, 16), (16, 16), Arc::clone(&fallback))
                .unwrap();
        assert!(pool.allocate(PixelFormat::Bgra, 16, 16).is_none());
        assert!(fallback.load(Ordering::Acquire));
    }

    struct ScalerOnly;

    impl MediaBackend for ScalerOnly {
        fn name(&self) -> &'static str {
            "scaler-only"
        }
        fn open_input(&self, _: InputSource, _: &BTreeMap<String, String>) -> Result<OpenedInput> {
            Err(PlaybackError::OpenFailed("unused".into()))
        }
        fn open_decoder(&self, _: &StreamInfo, _: &DecoderOptions) -> Result<Box<dyn Decoder>> {
            Err(PlaybackError::DecodeUnavailable("unused".into()))
        }
    }

    fn gray_frame(width: u32, height: u32, interlaced: bool) -> DecodedFrame {
        let layout = PixelFormat::Yuv420p.plane_layout(width, height);
        let planes = layout
            .iter()
            .map(|(_, stride, rows)| Plane {
                data: Bytes::from(vec![128u8; stride * rows]),
                stride: *stride,
            })
            .collect();
        DecodedFrame::Video(VideoFrame {
            width,
            height,
            format: PixelFormat::Yuv420p,
            pts: Some(0),
            best_effort_timestamp: Some(0),
            duration: 1,
            keyframe: true,
            interlaced,
            top_field_first: false,
            chroma_location: ChromaLocation::TopLeft,
            data: VideoFrameData::Planes(planes),
        })
    }

    #[test]
    fn test_scaler_writes_original_geometry() {
        let mut converter = VideoConverter::new(
            Arc::new(ScalerOnly),
            PixelFormat::Nv12,
            (32, 16),
            DecodePath::Scaler,
            Arc::new(AtomicBool::new(false)),
        );
        let timing = FrameTiming { pts: 0, duration: 1 };

        let out = converter.convert(gray_frame(64, 32, true), timing).unwrap();
        let props = out.video.unwrap();
        assert_eq!((props.width, props.height), (32, 16));
        assert_eq!(props.format, PixelFormat::Nv12);
        assert_eq!(out.buffer.len(), PixelFormat::Nv12.buffer_size(32, 16));
        assert!(out.buffer.is_pooled());
        assert!(props.interlaced);
        assert!(props.bottom_field_first);
        assert_eq!(props.chroma_siting, Some(ChromaSiting::DvPal));
    }

    #[test]
    fn test_decode_path_reports_fallback() {
        let fallback = Arc::new(AtomicBool::new(false));
        let converter = VideoConverter::new(
            Arc::new(ScalerOnly),
            PixelFormat::Yuv420p,
            (32, 16),
            DecodePath::DirectBuffer,
            Arc::clone(&fallback),
        );
        assert_eq!(converter.decode_path(), DecodePath::DirectBuffer);
        fallback.store(true, Ordering::Release);
        assert_eq!(converter.decode_path(), DecodePath::Scaler);
    }
}
