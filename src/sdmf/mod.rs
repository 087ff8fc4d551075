//! Correction database lookup.
//!
//! Slowly varying instrument parameters (pixel gain, bad pixel mask, dark signal, ...)
//! are monitored per orbit. A [`CorrectionStore`] gives access to the records of a
//! dataset by absolute orbit; [`CorrectionResolver`] finds the record closest to a
//! requested orbit within a dataset specific window.
mod store;

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub use store::MemoryStore;

/// Known correction datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dataset {
    BadPixelMask,
    PixelGain,
    Dark,
    OrbitalDark,
    Memory,
    NonLinearity,
    Etalon,
    SolarReference,
}

impl Dataset {
    pub const ALL: [Dataset; 8] = [
        Dataset::BadPixelMask,
        Dataset::PixelGain,
        Dataset::Dark,
        Dataset::OrbitalDark,
        Dataset::Memory,
        Dataset::NonLinearity,
        Dataset::Etalon,
        Dataset::SolarReference,
    ];

    /// Name of the dataset in a store.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Dataset::BadPixelMask => "SmoothMask",
            Dataset::PixelGain => "PixelGain",
            Dataset::Dark => "FittedDark",
            Dataset::OrbitalDark => "OrbitalDark",
            Dataset::Memory => "MemoryCorrection",
            Dataset::NonLinearity => "NonLinearity",
            Dataset::Etalon => "Etalon",
            Dataset::SolarReference => "SolarReference",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }

    /// Largest orbit distance accepted when searching for a record.
    ///
    /// Static tables only match exactly.
    #[must_use]
    pub fn max_delta(self) -> i32 {
        match self {
            Dataset::BadPixelMask | Dataset::Dark | Dataset::OrbitalDark => 14,
            Dataset::PixelGain => 100,
            Dataset::Memory | Dataset::NonLinearity => 0,
            Dataset::Etalon | Dataset::SolarReference => 30,
        }
    }

    /// Static tables do not depend on the orbit and are stored at orbit 0.
    #[must_use]
    pub fn is_static(self) -> bool {
        self.max_delta() == 0
    }

    /// First orbit with records; requests before it are moved up to it.
    #[must_use]
    pub fn first_orbit(self) -> i32 {
        match self {
            Dataset::BadPixelMask => 3899,
            _ => 0,
        }
    }
}

impl Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One record of a correction dataset.
///
/// A record holds named arrays; per pixel arrays cover all science pixels and are
/// indexed by absolute pixel id.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub orbit: i32,
    pub fields: BTreeMap<String, Vec<f32>>,
}

impl CorrectionRecord {
    #[must_use]
    pub fn new(orbit: i32) -> Self {
        CorrectionRecord {
            orbit,
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, values: Vec<f32>) -> Self {
        self.fields.insert(name.into(), values);
        self
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&[f32]> {
        self.fields.get(name).map(Vec::as_slice)
    }
}

/// Random access to correction records by dataset and orbit.
pub trait CorrectionStore: Send + Sync {
    /// Record of `dataset` for exactly `orbit`, if any.
    fn fetch(&self, dataset: &str, orbit: i32) -> Option<&CorrectionRecord>;
}

/// Orbit offsets in search order: 0, +1, -1, +2, -2, ...
pub fn search_order(max_delta: i32) -> impl Iterator<Item = i32> {
    (0..=max_delta.max(0)).flat_map(|d| {
        let pair = if d == 0 {
            [Some(0), None]
        } else {
            [Some(d), Some(-d)]
        };
        pair.into_iter().flatten()
    })
}

/// Finds the correction record nearest to an orbit.
pub trait CorrectionResolver: Send + Sync {
    /// Search `orbit + delta` for `delta` = 0, +1, -1, +2, -2, ... up to `max_delta`
    /// and return the first record found. Later orbits win ties.
    fn resolve(&self, dataset: &str, orbit: i32, max_delta: i32) -> Option<&CorrectionRecord>;

    /// [`CorrectionResolver::resolve`] with the window and first orbit of a known
    /// dataset.
    fn resolve_dataset(&self, dataset: Dataset, orbit: i32) -> Option<&CorrectionRecord> {
        let orbit = if dataset.is_static() {
            0
        } else {
            orbit.max(dataset.first_orbit())
        };
        self.resolve(dataset.name(), orbit, dataset.max_delta())
    }
}

impl<S: CorrectionStore + ?Sized> CorrectionResolver for S {
    fn resolve(&self, dataset: &str, orbit: i32, max_delta: i32) -> Option<&CorrectionRecord> {
        for delta in search_order(max_delta) {
            let candidate = orbit + delta;
            trace!(dataset, orbit = candidate, "probing correction record");
            if let Some(rec) = self.fetch(dataset, candidate) {
                debug!(dataset, orbit, found = rec.orbit, "resolved correction record");
                return Some(rec);
            }
        }
        debug!(dataset, orbit, max_delta, "no correction record in window");
        None
    }
}
