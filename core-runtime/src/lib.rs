//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the media bridge crates:
//! - Logging and tracing initialisation
//! - Process-wide forwarding of decode-library log lines to a host handler
//!
//! ## Overview
//!
//! Nothing in this crate touches media. It establishes the logging
//! conventions every other crate relies on and owns the single global
//! registry for the host's [`LogHandler`](bridge_traits::LogHandler).

pub mod error;
pub mod logging;

pub use error::{Error, Result};
