//! Apertures and per-detector aperture sets.
//!
//! An aperture is a target circle plus a sky annulus. Apertures may be
//! marked as references (fitted first, their mean shift seeds the others)
//! or linked to another aperture, in which case they are never fitted and
//! simply follow their link target.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use common::{Clash, Group};
use glam::DVec2;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApertureId(pub u32);

impl fmt::Display for ApertureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    #[default]
    Target,
    Comparison,
}

/// Circle excluded from the sky annulus, given relative to the aperture centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyMask {
    pub dx: f64,
    pub dy: f64,
    pub radius: f64,
}

impl SkyMask {
    #[inline]
    pub fn covers(&self, centre: DVec2, x: f64, y: f64) -> bool {
        let dx = x - centre.x - self.dx;
        let dy = y - centre.y - self.dy;
        dx * dx + dy * dy <= self.radius * self.radius
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aperture {
    pub pos: DVec2,
    pub target_radius: f64,
    pub sky_inner: f64,
    pub sky_outer: f64,
    /// Last accepted FWHM. Zero until the first accepted fit.
    #[serde(default)]
    pub fwhm: f64,
    #[serde(default)]
    pub beta: Option<f64>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub reference: bool,
    #[serde(default)]
    pub link: Option<ApertureId>,
    #[serde(default)]
    pub masks: Vec<SkyMask>,
    /// Skip the target-overlap check against other apertures.
    #[serde(default)]
    pub allow_overlap: bool,
    /// Name of the window holding the aperture centre, refreshed every frame.
    #[serde(skip)]
    pub window: Option<String>,
}

impl Aperture {
    pub fn new(x: f64, y: f64, target_radius: f64, sky_inner: f64, sky_outer: f64) -> Self {
        Self {
            pos: DVec2::new(x, y),
            target_radius,
            sky_inner,
            sky_outer,
            fwhm: 0.0,
            beta: None,
            role: Role::Target,
            reference: false,
            link: None,
            masks: Vec::new(),
            allow_overlap: false,
            window: None,
        }
    }

    pub fn as_reference(mut self) -> Self {
        self.reference = true;
        self
    }

    pub fn linked_to(mut self, id: ApertureId) -> Self {
        self.link = Some(id);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_mask(mut self, mask: SkyMask) -> Self {
        self.masks.push(mask);
        self
    }

    pub fn allowing_overlap(mut self) -> Self {
        self.allow_overlap = true;
        self
    }

    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    /// Checks radii ordering; returns a description of the problem.
    pub fn check_radii(&self) -> Result<(), String> {
        if !(self.target_radius > 0.0) {
            return Err(format!("target radius {} must be positive", self.target_radius));
        }
        if !(self.sky_inner >= 0.0 && self.sky_outer > self.sky_inner) {
            return Err(format!(
                "sky annulus [{}, {}] must have 0 <= inner < outer",
                self.sky_inner, self.sky_outer
            ));
        }
        Ok(())
    }
}

impl Clash for Aperture {
    fn clash(&self, other: &Self) -> Option<String> {
        if self.allow_overlap || other.allow_overlap {
            return None;
        }
        let separation = self.pos.distance(other.pos);
        (separation < self.target_radius + other.target_radius).then(|| {
            format!(
                "target circles overlap (separation {:.2} < {:.2} + {:.2})",
                separation, self.target_radius, other.target_radius
            )
        })
    }
}

pub type ApertureSet = Group<ApertureId, Aperture>;

/// Aperture sets keyed by detector name.
pub type ApertureMap = HashMap<String, ApertureSet>;

/// Checks radii and link rules of a set.
///
/// A link must point at another aperture of the same set that is itself
/// unlinked, and a linked aperture cannot be a reference.
pub fn validate_set(detector: &str, set: &ApertureSet) -> Result<(), ConfigError> {
    let fail = |id: ApertureId, reason: String| ConfigError::Aperture {
        detector: detector.to_string(),
        id,
        reason,
    };

    for (&id, aperture) in set.iter() {
        aperture.check_radii().map_err(|reason| fail(id, reason))?;
        let Some(link) = aperture.link else {
            continue;
        };
        if aperture.reference {
            return Err(fail(id, "a linked aperture cannot be a reference".into()));
        }
        if link == id {
            return Err(fail(id, "aperture links to itself".into()));
        }
        match set.get(&link) {
            None => return Err(fail(id, format!("links to unknown aperture {link}"))),
            Some(target) if target.is_linked() => {
                return Err(fail(id, format!("links to aperture {link}, which is itself linked")))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
struct ApertureEntry {
    id: ApertureId,
    #[serde(flatten)]
    aperture: Aperture,
}

#[derive(Debug, Clone, Deserialize)]
struct DetectorEntry {
    detector: String,
    apertures: Vec<ApertureEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApertureFile {
    detectors: Vec<DetectorEntry>,
}

/// Loads aperture sets from a YAML or JSON file.
///
/// Every set is clash-checked and link-validated before it is returned.
pub fn load_apertures(path: &Path) -> Result<ApertureMap, ConfigError> {
    let file: ApertureFile = common::load_file(path)?;
    let mut map = ApertureMap::new();
    for entry in file.detectors {
        let set = ApertureSet::try_from_iter(
            entry
                .apertures
                .into_iter()
                .map(|item| (item.id, item.aperture)),
        )
        .map_err(|source| ConfigError::Apertures {
            detector: entry.detector.clone(),
            source,
        })?;
        validate_set(&entry.detector, &set)?;
        tracing::debug!("Detector '{}': {} apertures", entry.detector, set.len());
        if map.insert(entry.detector.clone(), set).is_some() {
            return Err(ConfigError::invalid(
                "apertures.detector",
                format!("detector '{}' listed twice", entry.detector),
            ));
        }
    }
    tracing::info!("Loaded apertures for {} detectors from {}", map.len(), path.display());
    Ok(map)
}
