//! # Host Bridge Traits
//!
//! Contracts between the media bridge core and the host that embeds it.
//!
//! ## Overview
//!
//! The host supplies media either as a URI or as a [`RandomAccessStream`]
//! and consumes decoded samples measured in [`HostTime`] ticks. Diagnostics
//! emitted by the decode library reach the host through a [`LogHandler`].
//!
//! ## Traits
//!
//! - [`RandomAccessStream`](stream::RandomAccessStream) - Synchronous seekable byte source
//! - [`LogHandler`](logging::LogHandler) - Receives leveled decode-library log lines
//!
//! ## Error Handling
//!
//! Host stream implementations report failures as
//! [`BridgeError`](error::BridgeError). The core converts them into I/O
//! errors at the byte-source boundary so a failing handle never panics the
//! decode path.
//!
//! ## Thread Safety
//!
//! Streams must be `Send`: pull requests may arrive on a different thread
//! each time. Log handlers must be `Send + Sync`.

pub mod error;
pub mod logging;
pub mod stream;
pub mod time;

pub use error::BridgeError;

pub use logging::{LogHandler, LogLevel};
pub use stream::{FileStream, MemoryStream, RandomAccessStream};
pub use time::{HostTime, TICKS_PER_SECOND};
