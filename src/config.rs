//! Processing configuration.
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::calib::{CalibMask, KeyData, Pipeline, Status};
use crate::cluster::ClusterMask;
use crate::error::Result;
use crate::level1b::State;
use crate::level1c::{reorganize, Level1cProduct};
use crate::sdmf::CorrectionResolver;

/// Selection of clusters and calibration stages for processing states to level 1c.
///
/// Fields missing from a configuration file take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct CalibConfig {
    /// Calibration stages and their algorithm.
    #[builder(default = CalibMask::REFERENCE_CHAIN)]
    pub calib_mask: CalibMask,
    /// Clusters kept by the reorganizer.
    #[builder(default)]
    pub cluster_mask: ClusterMask,
    /// Fold the variance of earlier corrections into the error estimate.
    #[builder(default = true)]
    pub fold_variance: bool,
}

impl Default for CalibConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CalibConfig {
    /// Load a configuration from a JSON file.
    ///
    /// # Errors
    /// If the file cannot be read or is not a valid configuration.
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(serde_json::from_reader(File::open(path)?)?)
    }

    /// Calibration pipeline with the built-in stages.
    #[must_use]
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.calib_mask).with_fold_variance(self.fold_variance)
    }

    /// Reorganize `state`, attach `key_data` and calibrate the result.
    ///
    /// Warnings of the reorganizer are kept in the product diagnostics, warnings of
    /// the calibration in the returned [`Status`].
    ///
    /// # Errors
    /// If the state cannot be reorganized or a calibration stage fails.
    pub fn process(
        &self,
        state: State,
        key_data: KeyData,
        orbit: i32,
        resolver: &dyn CorrectionResolver,
    ) -> Result<(Level1cProduct, Status)> {
        let mut product = reorganize(state, self.cluster_mask)?.with_key_data(key_data);
        let status = self.pipeline().run(&mut product, orbit, resolver)?;
        debug!(
            state_id = product.state_id,
            orbit,
            series = product.series.len(),
            warnings = status.warning_count(),
            "processed state"
        );
        Ok((product, status))
    }
}
