//! Software pixel-format conversion and nearest-neighbour resize.

use super::types::{PixelFormat, VideoFrame};
use crate::error::{PlaybackError, Result};

/// Output side of a scaler; the input is described by each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleSpec {
    pub out_format: PixelFormat,
    pub out_width: u32,
    pub out_height: u32,
}

impl ScaleSpec {
    pub fn output_size(&self) -> usize {
        self.out_format.buffer_size(self.out_width, self.out_height)
    }
}

/// Converts a decoded picture into a contiguous image of the output spec.
pub trait Scaler: Send {
    fn spec(&self) -> ScaleSpec;

    /// `dst` must hold at least [`ScaleSpec::output_size`] bytes.
    fn scale(&mut self, frame: &VideoFrame, dst: &mut [u8]) -> Result<()>;
}

pub struct SoftwareScaler {
    spec: ScaleSpec,
}

impl SoftwareScaler {
    pub fn new(spec: ScaleSpec) -> Result<Self> {
        if !is_supported(spec.out_format) {
            return Err(PlaybackError::Backend(format!(
                "unsupported scaler output {:?}",
                spec.out_format
            )));
        }
        if spec.out_width == 0 || spec.out_height == 0 {
            return Err(PlaybackError::Backend("empty scaler output".to_string()));
        }
        Ok(Self { spec })
    }
}

fn is_supported(format: PixelFormat) -> bool {
    matches!(
        format,
        PixelFormat::Yuv420p
            | PixelFormat::Yuvj420p
            | PixelFormat::Yuva420p
            | PixelFormat::Yuv422p
            | PixelFormat::Yuv444p
            | PixelFormat::Nv12
            | PixelFormat::Bgra
    )
}

/// Read access to the source picture as YUV samples.
struct Source<'a> {
    frame: &'a VideoFrame,
    planes: Vec<(&'a [u8], usize)>,
}

impl<'a> Source<'a> {
    fn new(frame: &'a VideoFrame) -> Result<Self> {
        if !is_supported(frame.format) {
            return Err(PlaybackError::Backend(format!(
                "unsupported scaler input {:?}",
                frame.format
            )));
        }
        let count = frame.format.plane_layout(frame.width, frame.height).len();
        let planes = (0..count)
            .map(|i| frame.plane(i))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PlaybackError::Backend("frame is missing planes".to_string()))?;
        Ok(Self { frame, planes })
    }

    fn byte(&self, plane: usize, x: usize, y: usize) -> u8 {
        let (data, stride) = self.planes[plane];
        data.get(y * stride + x).copied().unwrap_or(0)
    }

    /// YUV triple at source pixel `(x, y)`.
    fn yuv(&self, x: usize, y: usize) -> (u8, u8, u8) {
        match self.frame.format {
            PixelFormat::Bgra => {
                let b = self.byte(0, x * 4, y);
                let g = self.byte(0, x * 4 + 1, y);
                let r = self.byte(0, x * 4 + 2, y);
                rgb_to_yuv(r, g, b)
            }
            PixelFormat::Nv12 => (
                self.byte(0, x, y),
                self.byte(1, (x / 2) * 2, y / 2),
                self.byte(1, (x / 2) * 2 + 1, y / 2),
            ),
            PixelFormat::Yuv444p => (self.byte(0, x, y), self.byte(1, x, y), self.byte(2, x, y)),
            PixelFormat::Yuv422p => (
                self.byte(0, x, y),
                self.byte(1, x / 2, y),
                self.byte(2, x / 2, y),
            ),
            _ => (
                self.byte(0, x, y),
                self.byte(1, x / 2, y / 2),
                self.byte(2, x / 2, y / 2),
            ),
        }
    }
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

// BT.601 limited range, integer approximation.
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (clamp_u8(y), clamp_u8(u), clamp_u8(v))
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

impl Scaler for SoftwareScaler {
    fn spec(&self) -> ScaleSpec {
        self.spec
    }

    fn scale(&mut self, frame: &VideoFrame, dst: &mut [u8]) -> Result<()> {
        let needed = self.spec.output_size();
        if dst.len() < needed {
            return Err(PlaybackError::Internal(format!(
                "scaler destination holds {} of {} bytes",
                dst.len(),
                needed
            )));
        }
        if frame.width == 0 || frame.height == 0 {
            return Err(PlaybackError::Backend("empty source frame".to_string()));
        }

        let source = Source::new(frame)?;
        let out_w = self.spec.out_width as usize;
        let out_h = self.spec.out_height as usize;
        let src_x = |x: usize| x * frame.width as usize / out_w;
        let src_y = |y: usize| y * frame.height as usize / out_h;
        let layout = self.spec.out_format.plane_layout(self.spec.out_width, self.spec.out_height);

        match self.spec.out_format {
            PixelFormat::Bgra => {
                let (_, stride, _) = layout[0];
                for y in 0..out_h {
                    for x in 0..out_w {
                        let (yy, u, v) = source.yuv(src_x(x), src_y(y));
                        let (r, g, b) = yuv_to_rgb(yy, u, v);
                        let at = y * stride + x * 4;
                        dst[at..at + 4].copy_from_slice(&[b, g, r, 255]);
                    }
                }
            }
            PixelFormat::Nv12 => {
                let (_, y_stride, _) = layout[0];
                let (uv_offset, uv_stride, uv_rows) = layout[1];
                for y in 0..out_h {
                    for x in 0..out_w {
                        dst[y * y_stride + x] = source.yuv(src_x(x), src_y(y)).0;
                    }
                }
                for cy in 0..uv_rows {
                    for cx in 0..uv_stride / 2 {
                        let (_, u, v) = source.yuv(src_x(cx * 2), src_y(cy * 2));
                        let at = uv_offset + cy * uv_stride + cx * 2;
                        dst[at] = u;
                        dst[at + 1] = v;
                    }
                }
            }
            _ => {
                // Planar: Y plane at full size, chroma planes per layout
                let (_, y_stride, _) = layout[0];
                for y in 0..out_h {
                    for x in 0..out_w {
                        dst[y * y_stride + x] = source.yuv(src_x(x), src_y(y)).0;
                    }
                }
                let (u_offset, c_stride, c_rows) = layout[1];
                let (v_offset, _, _) = layout[2];
                let x_step = if c_stride == out_w { 1 } else { 2 };
                let y_step = if c_rows == out_h { 1 } else { 2 };
                for cy in 0..c_rows {
                    for cx in 0..c_stride {
                        let (_, u, v) = source.yuv(src_x(cx * x_step), src_y(cy * y_step));
                        dst[u_offset + cy * c_stride + cx] = u;
                        dst[v_offset + cy * c_stride + cx] = v;
                    }
                }
                if let Some(&(a_offset, a_stride, a_rows)) = layout.get(3) {
                    dst[a_offset..a_offset + a_stride * a_rows].fill(255);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::{ChromaLocation, Plane, VideoFrameData};
    use bytes::Bytes;

    fn yuv420_frame(width: u32, height: u32, y: u8, u: u8, v: u8) -> VideoFrame {
        let w = width as usize;
        let h = height as usize;
        let cw = (w + 1) / 2;
        let ch = (h + 1) / 2;
        VideoFrame {
            width,
            height,
            format: PixelFormat::Yuv420p,
            pts: Some(0),
            best_effort_timestamp: Some(0),
            duration: 1,
            keyframe: true,
            interlaced: false,
            top_field_first: false,
            chroma_location: ChromaLocation::Left,
            data: VideoFrameData::Planes(vec![
                Plane { data: Bytes::from(vec![y; w * h]), stride: w },
                Plane { data: Bytes::from(vec![u; cw * ch]), stride: cw },
                Plane { data: Bytes::from(vec![v; cw * ch]), stride: cw },
            ]),
        }
    }

    #[test]
    fn test_yuv420_to_nv12_same_size() {
        let frame = yuv420_frame(4, 4, 100, 60, 200);
        let spec = ScaleSpec { out_format: PixelFormat::Nv12, out_width: 4, out_height: 4 };
        let mut scaler = SoftwareScaler::new(spec).unwrap();
        let mut dst = vec![0u8; spec.output_size()];
        scaler.scale(&frame, &mut dst).unwrap();

        assert!(dst[..16].iter().all(|&b| b == 100));
        assert_eq!(&dst[16..20], &[60, 200, 60, 200]);
    }

    #[test]
    fn test_downscale_fits_destination() {
        let frame = yuv420_frame(8, 6, 50, 128, 128);
        let spec = ScaleSpec { out_format: PixelFormat::Yuv420p, out_width: 4, out_height: 2 };
        let mut scaler = SoftwareScaler::new(spec).unwrap();
        let mut dst = vec![0u8; spec.output_size()];
        scaler.scale(&frame, &mut dst).unwrap();
        assert!(dst[..8].iter().all(|&b| b == 50));
    }

    #[test]
    fn test_grey_to_bgra() {
        // Mid grey in limited range
        let frame = yuv420_frame(2, 2, 126, 128, 128);
        let spec = ScaleSpec { out_format: PixelFormat::Bgra, out_width: 2, out_height: 2 };
        let mut scaler = SoftwareScaler::new(spec).unwrap();
        let mut dst = vec![0u8; spec.output_size()];
        scaler.scale(&frame, &mut dst).unwrap();

        let (b, g, r, a) = (dst[0], dst[1], dst[2], dst[3]);
        assert_eq!(a, 255);
        assert_eq!(b, g);
        assert_eq!(g, r);
    }

    #[test]
    fn test_short_destination_is_rejected() {
        let frame = yuv420_frame(4, 4, 0, 0, 0);
        let spec = ScaleSpec { out_format: PixelFormat::Yuv420p, out_width: 4, out_height: 4 };
        let mut scaler = SoftwareScaler::new(spec).unwrap();
        let mut dst = vec![0u8; 10];
        assert!(scaler.scale(&frame, &mut dst).is_err());
    }

    #[test]
    fn test_hardware_output_unsupported() {
        let spec = ScaleSpec { out_format: PixelFormat::D3d11, out_width: 4, out_height: 4 };
        assert!(SoftwareScaler::new(spec).is_err());
    }
}
