//! Reorganization of level-1b states into per cluster level-1c series.
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calib::KeyData;
use crate::cluster::{Channel, ClusterMask};
use crate::error::{Diagnostics, Error, Result};
use crate::geolocation::GeoRecords;
use crate::level1b::{ClusterReadouts, Geometry, Readout, State, Stokes};
use crate::time::SensingTime;

/// Physical unit of the pixel values of a series.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    #[default]
    Counts,
    Radiance,
    Reflectance,
}

/// Shortest pixel exposure time, in seconds, scaled by the co-adding factor.
pub const MIN_COADDED_PET: f32 = 1.0 / 16.0;

/// All observations of one cluster within a state.
///
/// `values`, `errors`, `memory_corr` and `stray` are `num_obs x num_pixels`, with
/// observations in DSR order followed by readout order. NaN marks missing or masked
/// values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level1cSeries {
    pub channel: Channel,
    pub cluster_id: u8,
    pub coadd: u8,
    /// Pixel exposure time in seconds.
    pub pet: f32,
    pub state_id: u8,
    pub orbit_phase: f32,
    pub units: Units,
    /// Absolute pixel id of every column.
    pub pixel_ids: Vec<u16>,
    pub wavelength: Vec<f32>,
    pub wavelength_error: Vec<f32>,
    pub values: Array2<f32>,
    pub errors: Array2<f32>,
    pub memory_corr: Array2<i8>,
    pub stray: Array2<u8>,
    /// One record per observation.
    pub geolocation: GeoRecords,
    /// Stokes fractions per observation.
    pub polarization: Vec<Stokes>,
    /// Straylight scale factor per observation.
    pub scale_factor: Vec<u8>,
    /// DSR quality per observation.
    pub quality: Vec<i8>,
}

impl Level1cSeries {
    #[must_use]
    pub fn num_obs(&self) -> usize {
        self.values.nrows()
    }

    #[must_use]
    pub fn num_pixels(&self) -> usize {
        self.values.ncols()
    }

    /// Time one transmitted sample integrates over.
    #[must_use]
    pub fn integration_time(&self) -> f32 {
        f32::from(self.coadd) * self.pet
    }

    /// Integration time the dark and radiance corrections scale with. Exposures
    /// shorter than [`MIN_COADDED_PET`] are used as stated.
    #[must_use]
    pub fn corrected_integration_time(&self) -> f32 {
        if self.pet < MIN_COADDED_PET {
            self.pet
        } else {
            self.integration_time()
        }
    }
}

/// Level-1c data of one state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level1cProduct {
    pub state_id: u8,
    pub category: u8,
    pub geometry: Geometry,
    pub orbit_phase: f32,
    pub dur_scan: f32,
    pub start_time: Option<SensingTime>,
    pub series: Vec<Level1cSeries>,
    /// Calibration key data used by the reference algorithms.
    pub key_data: KeyData,
    /// Problems found while reorganizing.
    pub diagnostics: Diagnostics,
}

impl Level1cProduct {
    #[must_use]
    pub fn with_key_data(mut self, key_data: KeyData) -> Self {
        self.key_data = key_data;
        self
    }
}

fn try_vec<T>(len: usize, what: &str) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| Error::Allocation(what.to_string()))?;
    Ok(v)
}

/// Reorganize `state` into one series per selected cluster.
///
/// Readouts of deselected clusters are released before any series is built. A
/// cluster with a DSR whose readout count differs from `n_read * length` is left
/// out with a warning in the product diagnostics.
///
/// # Errors
/// [`Error::InvalidState`] if a DSR has no geolocation or geolocation of another
/// geometry, [`Error::Allocation`] if the series cannot be allocated.
pub fn reorganize(mut state: State, mask: ClusterMask) -> Result<Level1cProduct> {
    let selected: Vec<bool> = state
        .clusters
        .iter()
        .map(|c| mask.contains(c.cluster_id))
        .collect();

    for (nd, rec) in state.records.iter_mut().enumerate() {
        if rec.geolocation.is_empty() {
            return Err(Error::InvalidState(format!("DSR {nd} has no geolocation")));
        }
        if std::mem::discriminant(&rec.geolocation)
            != std::mem::discriminant(&state.geometry.empty_geolocation())
        {
            return Err(Error::InvalidState(format!(
                "DSR {nd} geolocation does not match {:?} geometry",
                state.geometry
            )));
        }
        rec.clusters
            .retain(|c| selected.get(c.cluster).copied().unwrap_or(false));
        rec.clusters.shrink_to_fit();
    }

    let mut diagnostics = Diagnostics::default();
    let mut series = Vec::new();
    for (idx, desc) in state.clusters.iter().enumerate() {
        if !selected[idx] {
            debug!(cluster = desc.cluster_id, "cluster deselected");
            continue;
        }
        let n_read = usize::from(desc.n_read);
        let num_pixels = usize::from(desc.length);
        let per_dsr = n_read * num_pixels;

        // take the readouts out of the records; they are not needed afterwards
        let mut readouts: Vec<Vec<Readout>> = Vec::with_capacity(state.records.len());
        for rec in &mut state.records {
            let taken = rec
                .clusters
                .iter_mut()
                .find(|c| c.cluster == idx)
                .map(|c: &mut ClusterReadouts| std::mem::take(&mut c.readouts))
                .unwrap_or_default();
            readouts.push(taken);
        }
        if let Some(nd) = readouts.iter().position(|r| r.len() != per_dsr) {
            let message = format!(
                "cluster {} has {} readouts in DSR {nd}, expected {per_dsr}",
                desc.cluster_id,
                readouts[nd].len()
            );
            warn!(state_id = state.state_id, cluster = desc.cluster_id, "{message}");
            diagnostics.warn("reorganize", message);
            continue;
        }

        let num_obs = state.records.len() * n_read;
        let mut values = try_vec(num_obs * num_pixels, "pixel values")?;
        let mut memory_corr = try_vec(num_obs * num_pixels, "memory correction")?;
        let mut stray = try_vec(num_obs * num_pixels, "straylight")?;
        for r in readouts.into_iter().flatten() {
            #[allow(clippy::cast_precision_loss)]
            values.push(r.sample.value() as f32);
            memory_corr.push(r.corr);
            stray.push(r.stray);
        }

        let mut geolocation = state.geometry.empty_geolocation();
        let mut polarization = try_vec(num_obs, "polarization")?;
        let mut scale_factor = try_vec(num_obs, "scale factor")?;
        let mut quality = try_vec(num_obs, "quality")?;
        for rec in &state.records {
            geolocation.append(rec.geolocation.resample(n_read))?;
            polarization.extend(std::iter::repeat(rec.polarization).take(n_read));
            scale_factor.extend(std::iter::repeat(rec.scale_factor[desc.channel.index()]).take(n_read));
            quality.extend(std::iter::repeat(rec.quality).take(n_read));
        }

        let shape = (num_obs, num_pixels);
        let first = desc.first_pixel();
        #[allow(clippy::cast_possible_truncation)]
        let pixel_ids = (0..num_pixels).map(|np| (first + np) as u16).collect();
        series.push(Level1cSeries {
            channel: desc.channel,
            cluster_id: desc.cluster_id,
            coadd: desc.coadd,
            pet: desc.pet,
            state_id: state.state_id,
            orbit_phase: state.orbit_phase,
            units: Units::Counts,
            pixel_ids,
            wavelength: vec![0.0; num_pixels],
            wavelength_error: vec![0.0; num_pixels],
            values: Array2::from_shape_vec(shape, values)
                .map_err(|e| Error::InvalidState(e.to_string()))?,
            errors: Array2::zeros(shape),
            memory_corr: Array2::from_shape_vec(shape, memory_corr)
                .map_err(|e| Error::InvalidState(e.to_string()))?,
            stray: Array2::from_shape_vec(shape, stray)
                .map_err(|e| Error::InvalidState(e.to_string()))?,
            geolocation,
            polarization,
            scale_factor,
            quality,
        });
    }

    debug!(
        state_id = state.state_id,
        num_dsr = state.records.len(),
        series = series.len(),
        "reorganized state"
    );
    Ok(Level1cProduct {
        state_id: state.state_id,
        category: state.category,
        geometry: state.geometry,
        orbit_phase: state.orbit_phase,
        dur_scan: state.dur_scan,
        start_time: state.start_time(),
        series,
        key_data: KeyData::default(),
        diagnostics,
    })
}

/// [`reorganize`] for callers that keep the level-1b state.
///
/// # Errors
/// See [`reorganize`].
pub fn reorganize_ref(state: &State, mask: ClusterMask) -> Result<Level1cProduct> {
    reorganize(state.clone(), mask)
}
