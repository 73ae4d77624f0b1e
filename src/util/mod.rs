//! Internal utilities for the taskweave runtime.

pub mod arena;

pub use arena::{Arena, ArenaIndex};
