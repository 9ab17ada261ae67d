//! Channelgrid CLI library.
//!
//! Output formatting shared by the `channelgrid` binary and its tests.

pub mod output;
