//! # Playback Session
//!
//! Opens a container, builds one provider per decodable stream and serves
//! the host's start, sample and switch requests.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              MediaStreamSource               │  host-facing
//! └───────┬──────────────┬──────────────┬────────┘
//!         │ start        │ sample       │ switch
//!         ▼              ▼              ▼
//! ┌──────────────────────────────────────────────┐
//! │       SessionInner (one guard mutex)         │
//! │  SeekCoordinator   providers   current audio │
//! └───────────────────────┬──────────────────────┘
//!                         │ next_packet / seek
//!                         ▼
//! ┌──────────────────────────────────────────────┐
//! │      PacketRouter ─► Demuxer ─► byte source  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Every host request runs synchronously on the caller's thread with the
//! guard held. Teardown unregisters the callbacks first and then takes the
//! same guard before releasing the providers and the container, so no
//! request observes a half-closed session.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bridge_traits::FileStream;
//! use core_playback::io::shared_stream;
//! use core_playback::{BridgeConfig, MediaBackend, Session, SymphoniaBackend};
//! use std::sync::Arc;
//!
//! # fn main() -> core_playback::Result<()> {
//! let backend: Arc<dyn MediaBackend> = Arc::new(SymphoniaBackend::new());
//! let stream = shared_stream(FileStream::open("song.flac")?);
//! let session = Session::open_from_stream(backend, stream, BridgeConfig::default())?;
//!
//! let source = session.media_stream_source();
//! source.start(None);
//! let audio = source.descriptors()[0].clone();
//! while let Some(sample) = source.request_sample(&audio) {
//!     println!("{} bytes at {}", sample.data().len(), sample.timestamp);
//! }
//! # Ok(())
//! # }
//! ```

use crate::backend::{InputSource, MediaBackend, MediaKind};
use crate::config::BridgeConfig;
use crate::descriptor::{AudioTrackInfo, StreamDescriptor, SubtitleTrackInfo, TrackSet, VideoTrackInfo};
use crate::error::{PlaybackError, Result};
use crate::global::ensure_initialized;
use crate::io::{ByteSourceAdapter, SharedStream};
use crate::provider::StreamSampleProvider;
use crate::router::PacketRouter;
use crate::sample::MediaSample;
use crate::seek::SeekCoordinator;
use crate::source::{
    CallbackKind, MediaStreamSource, RegistrationToken, StartingRequest, StreamSourceHandler,
};
use bridge_traits::HostTime;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const CALLBACKS: [CallbackKind; 3] = [
    CallbackKind::Starting,
    CallbackKind::SampleRequested,
    CallbackKind::SwitchStreams,
];

// ============================================================================
// Session State
// ============================================================================

struct SessionState {
    // Providers drop before the router that owns the container.
    audio: Vec<StreamSampleProvider>,
    video: Option<StreamSampleProvider>,
    current_audio: Option<usize>,
    router: PacketRouter,
    seek: SeekCoordinator,
    duration: Option<HostTime>,
    first_seek: bool,
}

impl SessionState {
    fn seek(&mut self, position: HostTime) -> Result<()> {
        self.seek.seek(
            &mut self.router,
            &mut self.audio,
            self.current_audio,
            self.video.as_mut(),
            position,
        )
    }

    fn starting(&mut self, request: &mut StartingRequest) {
        if let Some(position) = request.requested {
            // An unknown duration admits only the zero position.
            let in_range = position <= self.duration.unwrap_or(HostTime::ZERO);
            // The host reports the initial position as a seek to zero.
            let acknowledgment = self.first_seek && position == HostTime::ZERO;

            if in_range && !acknowledgment {
                match self.seek(position) {
                    Ok(()) => request.actual = Some(position),
                    Err(e) => warn!("Seek to {} failed: {}", position, e),
                }
            }
        }
        self.first_seek = false;
    }

    fn sample(&mut self, descriptor: &StreamDescriptor) -> Option<MediaSample> {
        if let Some(audio) = self.current_audio.and_then(|i| self.audio.get_mut(i)) {
            if audio.descriptor() == descriptor {
                return audio.get_next_sample(&mut self.router);
            }
        }
        if let Some(video) = self.video.as_mut() {
            if video.descriptor() == descriptor {
                return video.get_next_sample(&mut self.router);
            }
        }
        debug!(stream = descriptor.stream_index, "Sample requested for inactive stream");
        None
    }

    fn switch_audio(&mut self, new: &StreamDescriptor) {
        let Some(target) = self.audio.iter().position(|p| p.descriptor() == new) else {
            debug!(stream = new.stream_index, "Switch target is not an audio stream");
            return;
        };

        if let Some(current) = self.current_audio.and_then(|i| self.audio.get_mut(i)) {
            current.disable(&mut self.router);
        }
        self.audio[target].enable(&mut self.router);
        self.current_audio = Some(target);
        info!(stream = new.stream_index, "Switched audio stream");
    }
}

/// Guarded session state; the registered handler for host requests.
struct SessionInner {
    guard: Mutex<Option<SessionState>>,
}

impl StreamSourceHandler for SessionInner {
    fn on_starting(&self, request: &mut StartingRequest) {
        if let Some(state) = self.guard.lock().as_mut() {
            state.starting(request);
        }
    }

    fn on_sample_requested(&self, descriptor: &StreamDescriptor) -> Option<MediaSample> {
        self.guard.lock().as_mut()?.sample(descriptor)
    }

    fn on_switch_streams(&self, _old: Option<&StreamDescriptor>, new: &StreamDescriptor) {
        if let Some(state) = self.guard.lock().as_mut() {
            state.switch_audio(new);
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// An open container bridged to a host stream source.
pub struct Session {
    inner: Arc<SessionInner>,
    source: Arc<MediaStreamSource>,
    tokens: Vec<(CallbackKind, RegistrationToken)>,
    tracks: TrackSet,
    duration: Option<HostTime>,
}

impl Session {
    /// Open a container read through the host's byte source.
    pub fn open_from_stream(
        backend: Arc<dyn MediaBackend>,
        stream: SharedStream,
        config: BridgeConfig,
    ) -> Result<Self> {
        let adapter = ByteSourceAdapter::new(stream, config.stream_buffer_size);
        Self::open(backend, InputSource::Stream(adapter), config)
    }

    /// Open a container the backend reads itself.
    pub fn open_from_uri(
        backend: Arc<dyn MediaBackend>,
        uri: &str,
        config: BridgeConfig,
    ) -> Result<Self> {
        if uri.trim().is_empty() {
            return Err(PlaybackError::ArgumentInvalid("empty uri".to_string()));
        }
        Self::open(backend, InputSource::Uri(uri.to_string()), config)
    }

    #[instrument(skip_all, fields(backend = backend.name(), input = %input.describe()))]
    fn open(backend: Arc<dyn MediaBackend>, input: InputSource, config: BridgeConfig) -> Result<Self> {
        config.validate().map_err(PlaybackError::ArgumentInvalid)?;
        ensure_initialized(backend.as_ref())?;

        let opened = backend.open_input(input, &config.options).map_err(|e| {
            if e.is_construction_failure() {
                e
            } else {
                PlaybackError::OpenFailed(e.to_string())
            }
        })?;
        for key in &opened.unused_options {
            warn!("Ignoring unrecognised option '{}'", key);
        }

        let mut router = PacketRouter::new(opened.demuxer);
        let container = router.container();
        let seek = SeekCoordinator::new(container.start_time_us);
        let start_offset = seek.start_offset();

        let best_audio = router.find_best_stream(MediaKind::Audio);
        let best_video = router.find_best_stream(MediaKind::Video);
        let best_subtitle = router.find_best_stream(MediaKind::Subtitle);

        let mut tracks = TrackSet::default();
        let mut audio: Vec<StreamSampleProvider> = Vec::new();
        let mut video: Option<StreamSampleProvider> = None;
        let mut current_audio = None;

        for stream in router.streams().to_vec() {
            match stream.kind {
                MediaKind::Audio => {
                    let provider = match StreamSampleProvider::new_audio(
                        backend.as_ref(),
                        &stream,
                        &config,
                        start_offset,
                        &mut router,
                    ) {
                        Ok(provider) => provider,
                        Err(e) => {
                            warn!(stream = stream.index, "Skipping audio stream: {}", e);
                            continue;
                        }
                    };
                    let is_best = best_audio == Some(stream.index);
                    tracks.push_audio(AudioTrackInfo::from_stream(&stream, is_best));
                    if is_best {
                        audio.insert(0, provider);
                        current_audio = Some(0);
                    } else {
                        audio.push(provider);
                    }
                }
                MediaKind::Video if best_video == Some(stream.index) && video.is_none() => {
                    match StreamSampleProvider::new_video(
                        &backend,
                        &stream,
                        &config,
                        start_offset,
                        &mut router,
                    ) {
                        Ok(provider) => {
                            tracks.video = Some(VideoTrackInfo::from_stream(&stream));
                            video = Some(provider);
                        }
                        Err(e) => warn!(stream = stream.index, "Skipping video stream: {}", e),
                    }
                }
                MediaKind::Subtitle => {
                    let is_best = best_subtitle == Some(stream.index);
                    tracks.push_subtitle(SubtitleTrackInfo::from_stream(&stream, is_best));
                }
                _ => debug!(stream = stream.index, kind = ?stream.kind, "Ignoring stream"),
            }
        }

        if current_audio.is_none() && !audio.is_empty() {
            current_audio = Some(0);
            if let Some(track) = tracks.audio.first_mut() {
                track.is_default = true;
            }
        }
        if audio.is_empty() && video.is_none() {
            return Err(PlaybackError::OpenFailed(
                "no decodable audio or video stream".to_string(),
            ));
        }

        let mut initial = Vec::new();
        if let Some(video) = video.as_mut() {
            video.enable(&mut router);
            initial.push(video.descriptor().clone());
        }
        if let Some(current) = current_audio.and_then(|i| audio.get_mut(i)) {
            current.enable(&mut router);
            initial.push(current.descriptor().clone());
        }

        let mut source = MediaStreamSource::new(initial);
        let duration = container
            .duration_us
            .map(|us| HostTime::from_ticks(us.saturating_mul(10)))
            .filter(|duration| duration.is_positive());
        if let Some(duration) = duration {
            source.set_duration(duration);
            source.set_can_seek(true);
        }
        source.set_buffer_time(HostTime::ZERO);
        source.set_max_playback_rate(config.max_playback_rate);

        for (index, provider) in audio.iter().enumerate() {
            if Some(index) != current_audio {
                source.add_stream_descriptor(provider.descriptor().clone());
            }
        }

        info!(
            audio = audio.len(),
            video = video.is_some(),
            subtitles = tracks.subtitles.len(),
            duration = ?duration,
            "Opened {}",
            container.format_name
        );

        let inner = Arc::new(SessionInner {
            guard: Mutex::new(Some(SessionState {
                audio,
                video,
                current_audio,
                router,
                seek,
                duration,
                first_seek: true,
            })),
        });

        // Callbacks go live only once the track set is final.
        let source = Arc::new(source);
        let handler: Arc<dyn StreamSourceHandler> = inner.clone();
        let tokens = CALLBACKS
            .iter()
            .map(|&kind| (kind, source.register(kind, Arc::downgrade(&handler))))
            .collect();

        Ok(Self {
            inner,
            source,
            tokens,
            tracks,
            duration,
        })
    }

    pub fn media_stream_source(&self) -> Arc<MediaStreamSource> {
        Arc::clone(&self.source)
    }

    pub fn tracks(&self) -> &TrackSet {
        &self.tracks
    }

    pub fn duration(&self) -> Option<HostTime> {
        self.duration
    }

    /// Stream index of the audio track currently selected.
    pub fn current_audio_stream(&self) -> Option<usize> {
        let guard = self.inner.guard.lock();
        let state = guard.as_ref()?;
        state
            .current_audio
            .and_then(|i| state.audio.get(i))
            .map(StreamSampleProvider::stream_index)
    }

    /// Stream indices of every audio provider currently enabled.
    pub fn enabled_audio_streams(&self) -> Vec<usize> {
        self.inner
            .guard
            .lock()
            .as_ref()
            .map(|state| {
                state
                    .audio
                    .iter()
                    .filter(|p| p.is_enabled())
                    .map(StreamSampleProvider::stream_index)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Release the container. Equivalent to dropping the session.
    pub fn close(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        for (kind, token) in self.tokens.drain(..) {
            self.source.unregister(kind, token);
        }
        if self.inner.guard.lock().take().is_some() {
            debug!("Session closed");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tracks", &self.tracks)
            .field("duration", &self.duration)
            .finish()
    }
}
