//! Samples delivered to the host.

use crate::backend::{ChromaLocation, PixelFormat};
use crate::buffer::SampleBuffer;
use bridge_traits::HostTime;

/// Chroma siting attached to video samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaSiting {
    /// Horizontally co-sited, vertically centred.
    Mpeg2,
    /// Centred both ways.
    Mpeg1,
    /// Interlaced top-left siting.
    DvPal,
    /// Co-sited both ways.
    Cosited,
}

impl ChromaSiting {
    /// Map the decoder's chroma location. Top-left siting depends on whether
    /// the picture is interlaced.
    pub fn from_location(location: ChromaLocation, interlaced: bool) -> Option<Self> {
        match location {
            ChromaLocation::Left => Some(Self::Mpeg2),
            ChromaLocation::Center => Some(Self::Mpeg1),
            ChromaLocation::TopLeft if interlaced => Some(Self::DvPal),
            ChromaLocation::TopLeft => Some(Self::Cosited),
            _ => None,
        }
    }
}

/// Per-sample video attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSampleProps {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub interlaced: bool,
    pub bottom_field_first: bool,
    pub chroma_siting: Option<ChromaSiting>,
}

/// One decoded sample; the host owns it once returned.
#[derive(Debug, Clone)]
pub struct MediaSample {
    pub buffer: SampleBuffer,
    pub timestamp: HostTime,
    pub duration: HostTime,
    /// First sample after a flush or a skipped decode error.
    pub discontinuous: bool,
    pub keyframe: bool,
    pub video: Option<VideoSampleProps>,
}

impl MediaSample {
    pub fn data(&self) -> &[u8] {
        self.buffer.as_slice()
    }
}
