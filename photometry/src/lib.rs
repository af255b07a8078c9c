//! Photometry - per-frame aperture tracking and flux extraction.
//!
//! For every frame of a multi-detector run this crate:
//! - refits the position and profile of each aperture, seeded from the
//!   previous frames
//! - measures sky-subtracted flux with simple or optimal extraction
//! - keeps bounded light curves for live display
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use photometry::{load_apertures, MemoryLog, ReduceConfig, Reducer};
//!
//! let config = ReduceConfig::from_file(Path::new("reduce.yaml"))?;
//! let apertures = load_apertures(Path::new("apertures.yaml"))?;
//! let mut reducer = Reducer::new(config, apertures)?;
//! let summary = reducer.run(&mut source, &mut MemoryLog::default(), &cancel)?;
//! ```

pub mod aperture;
pub mod config;
pub mod dispatcher;
mod error;
pub mod extraction;
pub(crate) mod fitting;
mod flags;
pub mod frame;
pub mod lightcurve;
pub mod pipeline;
pub(crate) mod stats;
pub mod store;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{
    DetectorNoise, ExtractionConfig, ExtractionMethod, LightCurveConfig, ProfileKind, Quantity,
    RadiusMode, ReduceConfig, SeriesDef, SkyMethod, TrackingConfig,
};
pub use error::{ConfigError, ReduceError};

// ============================================================================
// Data model
// ============================================================================

pub use aperture::{load_apertures, Aperture, ApertureId, ApertureMap, ApertureSet, Role};
pub use extraction::ExtractionResult;
pub use fitting::ProfileShape;
pub use flags::QualityFlags;
pub use frame::{Detector, Frame, Window};
pub use store::{DetectorStore, Store};

// ============================================================================
// Run
// ============================================================================

pub use dispatcher::{DetectorResults, Dispatcher};
pub use lightcurve::{LightCurveBuffer, SeriesPoint, TimeSeries};
pub use pipeline::{
    FrameEvent, FrameOutcome, FrameResults, FrameSource, LogWriter, MemoryLog, Reducer, RunSummary,
    SkipReason, StopReason, VecFrameSource,
};
