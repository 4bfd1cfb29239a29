//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-runtime`, `core-playback`). Host applications can
//! depend on `violet` and enable the documented features without wiring each
//! crate individually.

#[cfg(feature = "playback")]
pub use core_playback as playback;
#[cfg(feature = "playback")]
pub use core_runtime as runtime;
