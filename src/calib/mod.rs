//! Radiometric calibration of level-1c products.
//!
//! Calibration runs as a fixed sequence of [`Stage`]s. A [`CalibMask`] selects which
//! stages run and, per stage, whether the reference algorithm (key data embedded in
//! the product) or the database algorithm (parameters from a
//! [`CorrectionResolver`]) is used. Stages always run in [`Stage::ORDER`],
//! independent of the order in which they were enabled.
//!
//! # Example
//! ```
//! use scia::calib::{calibrate, CalibMask};
//! use scia::sdmf::MemoryStore;
//! # use scia::level1c::Level1cProduct;
//! # fn run(product: &mut Level1cProduct) -> Result<(), scia::CalibError> {
//! let store = MemoryStore::default();
//! let status = calibrate(product, CalibMask::REFERENCE_CHAIN, 21000, &store)?;
//! println!("{} warnings", status.warning_count());
//! # Ok(())
//! # }
//! ```
mod badpixel;
mod dark;
mod gain;
mod keydata;
mod memory;
mod noise;
mod normalize;
mod polarization;
mod radiance;
mod stray;
mod wavelength;

use std::collections::BTreeMap;
use std::fmt::Display;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CalibError, CalibErrorKind, Diagnostics, Severity};
use crate::level1c::{Level1cProduct, Level1cSeries};
use crate::sdmf::{CorrectionRecord, CorrectionResolver, Dataset};

pub use badpixel::BadPixelMask;
pub use dark::DarkCorrection;
pub use gain::{EtalonCorrection, PixelGain};
pub use keydata::{KeyData, MemoryScale, OrbitalDark};
pub use memory::{expand_correction, MemoryCorrection, NonLinearity};
pub use noise::ErrorEstimate;
pub use normalize::{CoaddNormalization, ExposureNormalization};
pub use polarization::PolarizationCorrection;
pub use radiance::{RadianceCorrection, ReflectanceCorrection};
pub use stray::StraylightCorrection;
pub use wavelength::WavelengthCalibration;

/// Calibration stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Memory,
    NonLinearity,
    Dark,
    PixelGain,
    Etalon,
    Straylight,
    Wavelength,
    Polarization,
    Radiance,
    Reflectance,
    BadPixel,
    ErrorEstimate,
    CoaddNormalization,
    ExposureNormalization,
}

impl Stage {
    pub const ORDER: [Stage; 14] = [
        Stage::Memory,
        Stage::NonLinearity,
        Stage::Dark,
        Stage::PixelGain,
        Stage::Etalon,
        Stage::Straylight,
        Stage::Wavelength,
        Stage::Polarization,
        Stage::Radiance,
        Stage::Reflectance,
        Stage::BadPixel,
        Stage::ErrorEstimate,
        Stage::CoaddNormalization,
        Stage::ExposureNormalization,
    ];

    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Memory => "memory",
            Stage::NonLinearity => "non-linearity",
            Stage::Dark => "dark",
            Stage::PixelGain => "pixel gain",
            Stage::Etalon => "etalon",
            Stage::Straylight => "straylight",
            Stage::Wavelength => "wavelength",
            Stage::Polarization => "polarization",
            Stage::Radiance => "radiance",
            Stage::Reflectance => "reflectance",
            Stage::BadPixel => "bad pixel mask",
            Stage::ErrorEstimate => "error estimate",
            Stage::CoaddNormalization => "co-add normalization",
            Stage::ExposureNormalization => "exposure normalization",
        };
        write!(f, "{name}")
    }
}

/// Source of the parameters of a stage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Key data embedded in the product.
    #[default]
    Reference,
    /// Parameters resolved from the correction database.
    Database,
}

/// Enabled stages and their algorithm.
///
/// Serializes as a map from stage to algorithm.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<Stage, Algorithm>", into = "BTreeMap<Stage, Algorithm>")]
pub struct CalibMask {
    enabled: u16,
    database: u16,
}

impl CalibMask {
    pub const NONE: CalibMask = CalibMask {
        enabled: 0,
        database: 0,
    };

    /// Level 1b to 1c calibration with key data from the product.
    pub const REFERENCE_CHAIN: CalibMask = CalibMask::NONE
        .with(Stage::Memory, Algorithm::Reference)
        .with(Stage::NonLinearity, Algorithm::Reference)
        .with(Stage::Dark, Algorithm::Reference)
        .with(Stage::PixelGain, Algorithm::Reference)
        .with(Stage::Etalon, Algorithm::Reference)
        .with(Stage::Straylight, Algorithm::Reference)
        .with(Stage::Wavelength, Algorithm::Reference)
        .with(Stage::Polarization, Algorithm::Reference)
        .with(Stage::Radiance, Algorithm::Reference)
        .with(Stage::BadPixel, Algorithm::Reference)
        .with(Stage::ErrorEstimate, Algorithm::Reference);

    /// [`CalibMask::REFERENCE_CHAIN`] with monitoring database parameters for the
    /// memory, non-linearity, dark, pixel gain and bad pixel stages.
    pub const DATABASE_CHAIN: CalibMask = CalibMask::REFERENCE_CHAIN
        .with(Stage::Memory, Algorithm::Database)
        .with(Stage::NonLinearity, Algorithm::Database)
        .with(Stage::Dark, Algorithm::Database)
        .with(Stage::PixelGain, Algorithm::Database)
        .with(Stage::BadPixel, Algorithm::Database)
        .with(Stage::ErrorEstimate, Algorithm::Database);

    /// Enable `stage` with `algorithm`.
    ///
    /// Exposure normalization works on single readouts and also enables co-add
    /// normalization.
    #[must_use]
    pub const fn with(self, stage: Stage, algorithm: Algorithm) -> Self {
        let database = match algorithm {
            Algorithm::Reference => self.database & !stage.bit(),
            Algorithm::Database => self.database | stage.bit(),
        };
        let mut enabled = self.enabled | stage.bit();
        if matches!(stage, Stage::ExposureNormalization) {
            enabled |= Stage::CoaddNormalization.bit();
        }
        CalibMask { enabled, database }
    }

    /// Disable `stage`. Disabling co-add normalization also disables exposure
    /// normalization.
    #[must_use]
    pub const fn without(self, stage: Stage) -> Self {
        let mut bits = stage.bit();
        if matches!(stage, Stage::CoaddNormalization) {
            bits |= Stage::ExposureNormalization.bit();
        }
        CalibMask {
            enabled: self.enabled & !bits,
            database: self.database & !bits,
        }
    }

    #[must_use]
    pub fn contains(self, stage: Stage) -> bool {
        self.enabled & stage.bit() != 0
    }

    /// Algorithm of an enabled stage.
    #[must_use]
    pub fn algorithm(self, stage: Stage) -> Option<Algorithm> {
        if !self.contains(stage) {
            None
        } else if self.database & stage.bit() != 0 {
            Some(Algorithm::Database)
        } else {
            Some(Algorithm::Reference)
        }
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.enabled == 0
    }

    /// Enabled stages in execution order.
    pub fn stages(self) -> impl Iterator<Item = Stage> {
        Stage::ORDER.into_iter().filter(move |s| self.contains(*s))
    }
}

impl From<BTreeMap<Stage, Algorithm>> for CalibMask {
    fn from(value: BTreeMap<Stage, Algorithm>) -> Self {
        value
            .into_iter()
            .fold(CalibMask::NONE, |mask, (stage, alg)| mask.with(stage, alg))
    }
}

impl From<CalibMask> for BTreeMap<Stage, Algorithm> {
    fn from(value: CalibMask) -> Self {
        value
            .stages()
            .filter_map(|s| value.algorithm(s).map(|a| (s, a)))
            .collect()
    }
}

/// State shared by the stages of one calibration run.
pub struct Context<'a> {
    pub orbit: i32,
    pub resolver: &'a dyn CorrectionResolver,
    /// Accumulate variance terms in the error arrays for the error estimate.
    pub accumulate_variance: bool,
    pub diagnostics: Diagnostics,
}

impl<'a> Context<'a> {
    #[must_use]
    pub fn new(orbit: i32, resolver: &'a dyn CorrectionResolver) -> Self {
        Context {
            orbit,
            resolver,
            accumulate_variance: false,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn warn(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        warn!(%stage, orbit = self.orbit, "{message}");
        self.diagnostics.warn(stage.to_string(), message);
    }

    /// Record of `dataset` near the current orbit.
    #[must_use]
    pub fn resolve(&self, dataset: Dataset) -> Option<&'a CorrectionRecord> {
        self.resolver.resolve_dataset(dataset, self.orbit)
    }
}

pub type StageResult = std::result::Result<(), CalibErrorKind>;

/// One calibration step with a reference and a database algorithm.
pub trait CalibrationStage: Send + Sync {
    fn stage(&self) -> Stage;

    /// Apply the correction using key data embedded in the product.
    ///
    /// # Errors
    /// If correction data the stage cannot do without is missing or inconsistent.
    fn reference(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult;

    /// Apply the correction using parameters from the correction database. Stages
    /// without database parameters use their reference algorithm.
    ///
    /// # Errors
    /// If correction data the stage cannot do without is missing or inconsistent.
    fn database(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        self.reference(product, ctx)
    }
}

/// Gather the entries of a per pixel table for the pixels of `series`.
///
/// # Errors
/// [`CalibErrorKind::TableSize`] if the table does not cover every pixel.
pub(crate) fn pixel_values<T: Copy>(
    stage: Stage,
    table: &[T],
    series: &Level1cSeries,
) -> Result<Array1<T>, CalibErrorKind> {
    let needed = series
        .pixel_ids
        .iter()
        .map(|p| usize::from(*p) + 1)
        .max()
        .unwrap_or(0);
    if table.len() < needed {
        return Err(CalibErrorKind::TableSize {
            stage,
            needed,
            actual: table.len(),
        });
    }
    Ok(series
        .pixel_ids
        .iter()
        .map(|p| table[usize::from(*p)])
        .collect())
}

/// Outcome of a successful calibration run.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub applied: Vec<(Stage, Algorithm)>,
    pub diagnostics: Diagnostics,
}

impl Status {
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.diagnostics.severity()
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.diagnostics.warning_count()
    }
}

/// Calibration stages in fixed order.
pub struct Pipeline {
    mask: CalibMask,
    fold_variance: bool,
    stages: Vec<Box<dyn CalibrationStage>>,
}

impl Pipeline {
    /// Pipeline with the built-in implementation of every stage.
    #[must_use]
    pub fn new(mask: CalibMask) -> Self {
        let stages: Vec<Box<dyn CalibrationStage>> = vec![
            Box::new(MemoryCorrection),
            Box::new(NonLinearity),
            Box::new(DarkCorrection),
            Box::new(PixelGain),
            Box::new(EtalonCorrection),
            Box::new(StraylightCorrection),
            Box::new(WavelengthCalibration),
            Box::new(PolarizationCorrection),
            Box::new(RadianceCorrection),
            Box::new(ReflectanceCorrection),
            Box::new(BadPixelMask),
            Box::new(ErrorEstimate),
            Box::new(CoaddNormalization),
            Box::new(ExposureNormalization),
        ];
        Pipeline {
            mask,
            fold_variance: true,
            stages,
        }
    }

    #[must_use]
    pub fn mask(&self) -> CalibMask {
        self.mask
    }

    /// Whether the error estimate includes the variance of earlier corrections.
    #[must_use]
    pub fn with_fold_variance(mut self, fold: bool) -> Self {
        self.fold_variance = fold;
        self
    }

    /// Replace the implementation of the stage `stage.stage()`.
    #[must_use]
    pub fn with_stage(mut self, stage: Box<dyn CalibrationStage>) -> Self {
        self.stages.retain(|s| s.stage() != stage.stage());
        self.stages.push(stage);
        self.stages.sort_by_key(|s| s.stage());
        self
    }

    /// Run all enabled stages on `product`.
    ///
    /// # Errors
    /// The first fatal stage failure, together with the diagnostics of the stages
    /// that ran before it.
    pub fn run(
        &self,
        product: &mut Level1cProduct,
        orbit: i32,
        resolver: &dyn CorrectionResolver,
    ) -> Result<Status, CalibError> {
        let mut ctx = Context::new(orbit, resolver);
        ctx.accumulate_variance = self.fold_variance && self.mask.contains(Stage::ErrorEstimate);

        let mut applied = Vec::new();
        for stage in &self.stages {
            let Some(algorithm) = self.mask.algorithm(stage.stage()) else {
                continue;
            };
            debug!(stage = %stage.stage(), ?algorithm, state_id = product.state_id, "applying");
            let res = match algorithm {
                Algorithm::Reference => stage.reference(product, &mut ctx),
                Algorithm::Database => stage.database(product, &mut ctx),
            };
            if let Err(kind) = res {
                return Err(CalibError::new(kind).with_history(ctx.diagnostics));
            }
            applied.push((stage.stage(), algorithm));
        }
        Ok(Status {
            applied,
            diagnostics: ctx.diagnostics,
        })
    }
}

/// Calibrate `product` with the built-in stages selected by `mask`.
///
/// # Errors
/// See [`Pipeline::run`].
pub fn calibrate(
    product: &mut Level1cProduct,
    mask: CalibMask,
    orbit: i32,
    cal_db: &dyn CorrectionResolver,
) -> Result<Status, CalibError> {
    Pipeline::new(mask).run(product, orbit, cal_db)
}
