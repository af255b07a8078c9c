//! Quality flags attached to extraction results and light-curve points.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Conditions raised on one measurement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QualityFlags: u32 {
        /// Profile fit rejected this frame; position and shape were retained.
        const FIT_REJECTED = 1 << 0;
        /// Optimal extraction was requested but simple extraction was used.
        const OPTIMAL_FALLBACK = 1 << 1;
        /// A target pixel reached the saturation level.
        const SATURATED = 1 << 2;
        /// A target pixel reached the non-linearity level.
        const NONLINEAR = 1 << 3;
        const TARGET_AT_EDGE = 1 << 4;
        const SKY_AT_EDGE = 1 << 5;
        const NO_SKY = 1 << 6;
        /// The aperture was not fitted this frame.
        const NOT_TRACKED = 1 << 7;
        /// No usable measurement: flux is zero and its error infinite.
        const INVALID = 1 << 8;
        /// Processing of the whole detector failed.
        const DETECTOR_FAILED = 1 << 9;
    }
}

impl fmt::Display for QualityFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "ok");
        }
        let names: Vec<String> = self.iter_names().map(|(name, _)| name.to_lowercase()).collect();
        write!(f, "{}", names.join("|"))
    }
}
