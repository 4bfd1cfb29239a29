//! Seek coordination.
//!
//! A host position is shifted by the container start time, converted to
//! the reference stream's time base and issued as a backward seek. Providers
//! are flushed only once the container accepted the seek, so a rejected
//! seek leaves playback exactly where it was.

use crate::backend::TimeBase;
use crate::error::{PlaybackError, Result};
use crate::provider::StreamSampleProvider;
use crate::router::PacketRouter;
use bridge_traits::HostTime;
use tracing::{debug, instrument};

/// Target timestamp in `time_base` for a host `position`.
pub fn target_timestamp(position: HostTime, start_offset: i64, time_base: TimeBase) -> i64 {
    time_base.from_host_ticks(position.ticks().saturating_add(start_offset))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekCoordinator {
    /// Container start time in host ticks.
    start_offset: i64,
}

impl SeekCoordinator {
    pub fn new(start_time_us: Option<i64>) -> Self {
        Self {
            start_offset: start_time_us.unwrap_or(0).saturating_mul(10),
        }
    }

    pub fn start_offset(&self) -> i64 {
        self.start_offset
    }

    /// Seek the container to `position` and resynchronize every provider.
    ///
    /// Video is the reference stream when present, the current audio stream
    /// otherwise.
    #[instrument(skip(self, router, audio, video))]
    pub fn seek(
        &self,
        router: &mut PacketRouter,
        audio: &mut [StreamSampleProvider],
        current_audio: Option<usize>,
        mut video: Option<&mut StreamSampleProvider>,
        position: HostTime,
    ) -> Result<()> {
        let reference = match (&video, current_audio.and_then(|i| audio.get(i))) {
            (Some(video), _) => (video.stream_index(), video.time_base()),
            (None, Some(audio)) => (audio.stream_index(), audio.time_base()),
            (None, None) => {
                return Err(PlaybackError::SeekFailed(
                    "no audio or video stream to seek".to_string(),
                ))
            }
        };
        let (stream_index, time_base) = reference;

        let target = target_timestamp(position, self.start_offset, time_base);
        debug!(stream = stream_index, target, "Seeking container");
        router.seek(stream_index, target)?;

        for provider in audio.iter_mut() {
            provider.flush(router);
        }
        if let Some(video) = video.as_deref_mut() {
            video.flush(router);
        }

        if let Some(current) = current_audio.and_then(|i| audio.get_mut(i)) {
            if !current.is_enabled() {
                current.enable(router);
            }
        }
        if let Some(video) = video {
            if !video.is_enabled() {
                video.enable(router);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_includes_start_offset() {
        let seek = SeekCoordinator::new(Some(1_500_000));
        assert_eq!(seek.start_offset(), 15_000_000);

        let target = target_timestamp(
            HostTime::from_secs_f64(2.0),
            seek.start_offset(),
            TimeBase::new(1, 90_000),
        );
        assert_eq!(target, 315_000);
    }

    #[test]
    fn test_target_truncates_to_time_base() {
        let target = target_timestamp(HostTime::from_ticks(3_333_333), 0, TimeBase::new(1, 1000));
        assert_eq!(target, 333);
    }

    #[test]
    fn test_unknown_start_time_is_zero() {
        assert_eq!(SeekCoordinator::new(None).start_offset(), 0);
    }
}
