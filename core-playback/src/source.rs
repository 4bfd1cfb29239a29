//! # Host Stream Source
//!
//! The pull-based object handed to the playback surface. It carries the
//! stream descriptors, duration and seekability, and forwards the host's
//! three requests to whichever handler registered for them:
//!
//! | Host call | Callback |
//! |-----------|----------|
//! | [`MediaStreamSource::start`] | [`StreamSourceHandler::on_starting`] |
//! | [`MediaStreamSource::request_sample`] | [`StreamSourceHandler::on_sample_requested`] |
//! | [`MediaStreamSource::switch_streams`] | [`StreamSourceHandler::on_switch_streams`] |
//!
//! Handlers are held weakly; a request arriving after the handler is gone or
//! unregistered is answered as if nothing were there.

use crate::descriptor::StreamDescriptor;
use crate::sample::MediaSample;
use bridge_traits::HostTime;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// A host start (seek) request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartingRequest {
    /// Position the host asked for; `None` resumes from the current one.
    pub requested: Option<HostTime>,
    /// Position actually reached, set by the handler on success.
    pub actual: Option<HostTime>,
}

/// Receiver of host requests.
pub trait StreamSourceHandler: Send + Sync {
    fn on_starting(&self, request: &mut StartingRequest);

    /// Next sample of the track `descriptor` names, `None` at end of stream.
    fn on_sample_requested(&self, descriptor: &StreamDescriptor) -> Option<MediaSample>;

    fn on_switch_streams(&self, old: Option<&StreamDescriptor>, new: &StreamDescriptor);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Starting,
    SampleRequested,
    SwitchStreams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken(u64);

struct Registration {
    token: RegistrationToken,
    handler: Weak<dyn StreamSourceHandler>,
}

pub struct MediaStreamSource {
    descriptors: Vec<StreamDescriptor>,
    duration: Option<HostTime>,
    can_seek: bool,
    buffer_time: HostTime,
    max_playback_rate: f64,
    callbacks: RwLock<HashMap<CallbackKind, Registration>>,
    next_token: AtomicU64,
}

impl MediaStreamSource {
    /// Source exposing `initial` descriptors.
    pub fn new(initial: Vec<StreamDescriptor>) -> Self {
        Self {
            descriptors: initial,
            duration: None,
            can_seek: false,
            buffer_time: HostTime::ZERO,
            max_playback_rate: 1.0,
            callbacks: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn add_stream_descriptor(&mut self, descriptor: StreamDescriptor) {
        self.descriptors.push(descriptor);
    }

    pub fn set_duration(&mut self, duration: HostTime) {
        self.duration = Some(duration);
    }

    pub fn set_can_seek(&mut self, can_seek: bool) {
        self.can_seek = can_seek;
    }

    pub fn set_buffer_time(&mut self, buffer_time: HostTime) {
        self.buffer_time = buffer_time;
    }

    pub fn set_max_playback_rate(&mut self, rate: f64) {
        self.max_playback_rate = rate;
    }

    pub fn descriptors(&self) -> &[StreamDescriptor] {
        &self.descriptors
    }

    pub fn duration(&self) -> Option<HostTime> {
        self.duration
    }

    pub fn can_seek(&self) -> bool {
        self.can_seek
    }

    pub fn buffer_time(&self) -> HostTime {
        self.buffer_time
    }

    pub fn max_playback_rate(&self) -> f64 {
        self.max_playback_rate
    }

    /// Route `kind` requests to `handler`, replacing any previous handler.
    pub fn register(
        &self,
        kind: CallbackKind,
        handler: Weak<dyn StreamSourceHandler>,
    ) -> RegistrationToken {
        let token = RegistrationToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.callbacks
            .write()
            .insert(kind, Registration { token, handler });
        token
    }

    /// Remove a registration. Stale tokens are ignored.
    pub fn unregister(&self, kind: CallbackKind, token: RegistrationToken) -> bool {
        let mut callbacks = self.callbacks.write();
        match callbacks.get(&kind) {
            Some(registration) if registration.token == token => {
                callbacks.remove(&kind);
                true
            }
            _ => false,
        }
    }

    pub fn is_registered(&self, kind: CallbackKind) -> bool {
        self.callbacks.read().contains_key(&kind)
    }

    fn handler(&self, kind: CallbackKind) -> Option<Arc<dyn StreamSourceHandler>> {
        let handler = self.callbacks.read().get(&kind)?.handler.upgrade();
        if handler.is_none() {
            trace!(?kind, "Handler already released");
        }
        handler
    }

    /// Host start request; returns the position reached, if any.
    pub fn start(&self, position: Option<HostTime>) -> Option<HostTime> {
        let mut request = StartingRequest {
            requested: position,
            actual: None,
        };
        if let Some(handler) = self.handler(CallbackKind::Starting) {
            handler.on_starting(&mut request);
        }
        request.actual
    }

    pub fn request_sample(&self, descriptor: &StreamDescriptor) -> Option<MediaSample> {
        self.handler(CallbackKind::SampleRequested)?
            .on_sample_requested(descriptor)
    }

    pub fn switch_streams(&self, old: Option<&StreamDescriptor>, new: &StreamDescriptor) {
        if let Some(handler) = self.handler(CallbackKind::SwitchStreams) {
            handler.on_switch_streams(old, new);
        }
    }
}

impl std::fmt::Debug for MediaStreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStreamSource")
            .field("descriptors", &self.descriptors.len())
            .field("duration", &self.duration)
            .field("can_seek", &self.can_seek)
            .finish()
    }
}
