//! # Packet Router
//!
//! Reads interleaved packets from the container and fans them out to
//! per-stream queues.
//!
//! A provider asking for its next packet may cause packets of other streams
//! to be read first. Those are queued for their stream when it is enabled
//! and dropped otherwise, so a disabled track never accumulates memory.

use crate::backend::{ContainerInfo, Demuxer, MediaKind, Packet, StreamInfo};
use crate::error::Result;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Route {
    queue: VecDeque<Packet>,
    enabled: bool,
}

pub struct PacketRouter {
    demuxer: Box<dyn Demuxer>,
    routes: HashMap<usize, Route>,
    end_of_container: bool,
    dropped: u64,
}

impl PacketRouter {
    pub fn new(demuxer: Box<dyn Demuxer>) -> Self {
        Self {
            demuxer,
            routes: HashMap::new(),
            end_of_container: false,
            dropped: 0,
        }
    }

    pub fn streams(&self) -> &[StreamInfo] {
        self.demuxer.streams()
    }

    pub fn container(&self) -> ContainerInfo {
        self.demuxer.container()
    }

    pub fn find_best_stream(&self, kind: MediaKind) -> Option<usize> {
        self.demuxer.find_best_stream(kind)
    }

    /// Make `stream_index` a routing target (initially disabled).
    pub fn register(&mut self, stream_index: usize) {
        self.routes.entry(stream_index).or_default();
    }

    /// Enable or disable routing; disabling discards anything queued.
    pub fn set_enabled(&mut self, stream_index: usize, enabled: bool) {
        if let Some(route) = self.routes.get_mut(&stream_index) {
            route.enabled = enabled;
            if !enabled {
                route.queue.clear();
            }
        }
    }

    pub fn is_enabled(&self, stream_index: usize) -> bool {
        self.routes
            .get(&stream_index)
            .map(|route| route.enabled)
            .unwrap_or(false)
    }

    pub fn queued(&self, stream_index: usize) -> usize {
        self.routes
            .get(&stream_index)
            .map(|route| route.queue.len())
            .unwrap_or(0)
    }

    /// Packets read for streams that were not accepting them.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_end_of_container(&self) -> bool {
        self.end_of_container
    }

    /// Next packet for `stream_index`, reading ahead as needed.
    ///
    /// Returns `None` once the container is exhausted and nothing is queued
    /// for this stream.
    pub fn next_packet(&mut self, stream_index: usize) -> Result<Option<Packet>> {
        if let Some(packet) = self
            .routes
            .get_mut(&stream_index)
            .and_then(|route| route.queue.pop_front())
        {
            return Ok(Some(packet));
        }

        while !self.end_of_container {
            let packet = match self.demuxer.read_packet()? {
                Some(packet) => packet,
                None => {
                    debug!("End of container reached");
                    self.end_of_container = true;
                    break;
                }
            };

            if packet.stream_index == stream_index {
                return Ok(Some(packet));
            }

            match self.routes.get_mut(&packet.stream_index) {
                Some(route) if route.enabled => route.queue.push_back(packet),
                _ => {
                    trace!(stream = packet.stream_index, "Dropping packet");
                    self.dropped += 1;
                }
            }
        }

        Ok(None)
    }

    /// Discard queued packets of one stream.
    pub fn flush(&mut self, stream_index: usize) {
        if let Some(route) = self.routes.get_mut(&stream_index) {
            route.queue.clear();
        }
    }

    /// Backward seek on the container. Queues are left to the providers'
    /// own flush.
    pub fn seek(&mut self, stream_index: usize, timestamp: i64) -> Result<()> {
        self.demuxer.seek(stream_index, timestamp, true)?;
        self.end_of_container = false;
        Ok(())
    }
}
