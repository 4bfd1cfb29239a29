//! Stream descriptors and read-only track metadata.
//!
//! A [`StreamDescriptor`] identifies a decodable track to the host; sample
//! requests and switch requests name tracks by descriptor. Track infos are
//! the metadata view of every elementary stream, including subtitles that
//! are never decoded.

use crate::backend::{PixelFormat, SampleFormat, StreamInfo};

#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoding {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u32,
    pub sample_format: SampleFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoding {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorKind {
    Audio(AudioEncoding),
    Video(VideoEncoding),
}

/// Host-visible identity and output encoding of one track.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub stream_index: usize,
    pub name: String,
    pub language: Option<String>,
    pub codec_name: String,
    pub bit_rate: u64,
    pub kind: DescriptorKind,
}

impl StreamDescriptor {
    pub fn is_audio(&self) -> bool {
        matches!(self.kind, DescriptorKind::Audio(_))
    }

    pub fn is_video(&self) -> bool {
        matches!(self.kind, DescriptorKind::Video(_))
    }

    pub fn audio(&self) -> Option<&AudioEncoding> {
        match &self.kind {
            DescriptorKind::Audio(encoding) => Some(encoding),
            DescriptorKind::Video(_) => None,
        }
    }

    pub fn video(&self) -> Option<&VideoEncoding> {
        match &self.kind {
            DescriptorKind::Video(encoding) => Some(encoding),
            DescriptorKind::Audio(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrackInfo {
    pub stream_index: usize,
    pub title: Option<String>,
    pub language: Option<String>,
    pub codec_name: String,
    pub bit_rate: u64,
    pub is_default: bool,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u32,
}

impl AudioTrackInfo {
    pub(crate) fn from_stream(stream: &StreamInfo, is_default: bool) -> Self {
        let (channels, sample_rate) = stream
            .audio
            .as_ref()
            .map(|audio| (audio.channels, audio.sample_rate))
            .unwrap_or((0, 0));
        Self {
            stream_index: stream.index,
            title: stream.title.clone(),
            language: stream.language.clone(),
            codec_name: stream.codec_name.clone(),
            bit_rate: stream.bit_rate,
            is_default,
            channels,
            sample_rate,
            bits_per_sample: stream.bits_per_sample(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrackInfo {
    pub stream_index: usize,
    pub title: Option<String>,
    pub language: Option<String>,
    pub codec_name: String,
    pub bit_rate: u64,
    pub is_default: bool,
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u32,
}

impl VideoTrackInfo {
    pub(crate) fn from_stream(stream: &StreamInfo) -> Self {
        let (width, height) = stream
            .video
            .as_ref()
            .map(|video| (video.width, video.height))
            .unwrap_or((0, 0));
        Self {
            stream_index: stream.index,
            title: stream.title.clone(),
            language: stream.language.clone(),
            codec_name: stream.codec_name.clone(),
            bit_rate: stream.bit_rate,
            is_default: true,
            width,
            height,
            bits_per_sample: stream.bits_per_sample(),
        }
    }
}

/// Subtitle metadata; subtitles are listed but never decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleTrackInfo {
    pub stream_index: usize,
    pub title: Option<String>,
    pub language: Option<String>,
    pub codec_name: String,
    pub is_default: bool,
    pub is_forced: bool,
}

impl SubtitleTrackInfo {
    pub(crate) fn from_stream(stream: &StreamInfo, is_default: bool) -> Self {
        Self {
            stream_index: stream.index,
            title: stream.title.clone(),
            language: stream.language.clone(),
            codec_name: stream.codec_name.clone(),
            is_default,
            is_forced: stream.is_forced,
        }
    }
}

/// All tracks found at open. The default audio and subtitle tracks
/// sit at index 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSet {
    pub audio: Vec<AudioTrackInfo>,
    pub video: Option<VideoTrackInfo>,
    pub subtitles: Vec<SubtitleTrackInfo>,
}

impl TrackSet {
    pub fn audio_codec_name(&self) -> Option<&str> {
        self.audio.first().map(|track| track.codec_name.as_str())
    }

    pub fn video_codec_name(&self) -> Option<&str> {
        self.video.as_ref().map(|track| track.codec_name.as_str())
    }

    /// Insert keeping the default track first.
    pub(crate) fn push_audio(&mut self, track: AudioTrackInfo) {
        if track.is_default {
            self.audio.insert(0, track);
        } else {
            self.audio.push(track);
        }
    }

    pub(crate) fn push_subtitle(&mut self, track: SubtitleTrackInfo) {
        if track.is_default {
            self.subtitles.insert(0, track);
        } else {
            self.subtitles.push(track);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AudioParams, AudioProfile, MediaKind};

    fn audio_stream(index: usize, language: &str) -> StreamInfo {
        let mut stream = StreamInfo::new(index, MediaKind::Audio, "aac");
        stream.language = Some(language.to_string());
        stream.bits_per_raw_sample = 16;
        stream.bits_per_coded_sample = 24;
        stream.audio = Some(AudioParams {
            sample_rate: 48_000,
            channels: 2,
            channel_layout: None,
            sample_format: SampleFormat::FltP,
            profile: AudioProfile::AacLow,
        });
        stream
    }

    #[test]
    fn test_default_audio_moves_to_front() {
        let mut tracks = TrackSet::default();
        tracks.push_audio(AudioTrackInfo::from_stream(&audio_stream(1, "en"), false));
        tracks.push_audio(AudioTrackInfo::from_stream(&audio_stream(2, "fr"), true));
        tracks.push_audio(AudioTrackInfo::from_stream(&audio_stream(3, "de"), false));

        let order: Vec<usize> = tracks.audio.iter().map(|t| t.stream_index).collect();
        assert_eq!(order, vec![2, 1, 3]);
        assert_eq!(tracks.audio_codec_name(), Some("aac"));
        assert_eq!(tracks.video_codec_name(), None);
    }

    #[test]
    fn test_audio_info_fields() {
        let info = AudioTrackInfo::from_stream(&audio_stream(4, "ja"), true);
        assert_eq!(info.channels, 2);
        assert_eq!(info.sample_rate, 48_000);
        assert_eq!(info.bits_per_sample, 24);
        assert_eq!(info.language.as_deref(), Some("ja"));
    }

    #[test]
    fn test_subtitle_flags() {
        let mut stream = StreamInfo::new(5, MediaKind::Subtitle, "subrip");
        stream.is_forced = true;
        stream.title = Some("Signs".to_string());

        let mut tracks = TrackSet::default();
        tracks.push_subtitle(SubtitleTrackInfo::from_stream(
            &StreamInfo::new(6, MediaKind::Subtitle, "ass"),
            false,
        ));
        tracks.push_subtitle(SubtitleTrackInfo::from_stream(&stream, true));

        assert_eq!(tracks.subtitles[0].stream_index, 5);
        assert!(tracks.subtitles[0].is_forced);
        assert!(tracks.subtitles[0].is_default);
        assert!(!tracks.subtitles[1].is_default);
    }
}
