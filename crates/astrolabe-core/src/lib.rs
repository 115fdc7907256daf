//! Core types and camera geometry for the Astrolabe vision coprocessor.
//!
//! This crate is intentionally small and free of image or device I/O. It
//! holds the data model shared by every camera process (profiles, color
//! targets), the pinhole-projection math that turns pixel coordinates into
//! bearings and distances, and the process-wide logger.

mod color;
mod geometry;
mod logger;
mod profile;

pub use color::{ColorList, ColorListError, ColorTarget, MAX_COLOR_TARGETS};
pub use geometry::{Bearing, Geometry};
pub use profile::{CameraProfile, Defaults, MIN_FIELD_OF_VIEW_RADIANS};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
