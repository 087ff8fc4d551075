use serde::{Deserialize, Serialize};

/// Encoding of the memory and non-linearity correction bytes embedded in level-1b
/// products.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryScale {
    /// Reticon bytes scaled by 2 without offset, as written by early processors.
    Legacy,
    #[default]
    Current,
}

/// Variable part of the dark current as a function of orbit phase.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbitalDark {
    /// Ascending orbit phases in `[0, 1)`.
    pub phase: Vec<f32>,
    /// Dark current per phase, indexed by absolute pixel id.
    pub dark_current: Vec<Vec<f32>>,
}

impl OrbitalDark {
    /// Dark current of pixel `pixel` at `phase`, interpolated linearly between the
    /// neighbouring phases with wrap around at the orbit boundary.
    #[must_use]
    pub fn at(&self, phase: f32, pixel: usize) -> Option<f32> {
        let n = self.phase.len();
        if n == 0 || self.dark_current.len() != n {
            return None;
        }
        let value = |i: usize| self.dark_current[i].get(pixel).copied();
        if n == 1 {
            return value(0);
        }
        let phase = phase.rem_euclid(1.0);
        let hi = self.phase.iter().position(|p| *p > phase).unwrap_or(n);
        let (lo_idx, hi_idx, lo_phase, hi_phase) = match hi {
            0 => (n - 1, 0, self.phase[n - 1] - 1.0, self.phase[0]),
            h if h == n => (n - 1, 0, self.phase[n - 1], self.phase[0] + 1.0),
            h => (h - 1, h, self.phase[h - 1], self.phase[h]),
        };
        let frac = (phase - lo_phase) / (hi_phase - lo_phase);
        Some((1.0 - frac) * value(lo_idx)? + frac * value(hi_idx)?)
    }
}

/// Calibration key data delivered with a product.
///
/// Per pixel tables cover all science pixels and are indexed by absolute pixel id.
/// Missing tables disable or degrade the stages that need them.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyData {
    pub memory_scale: MemoryScale,
    pub analog_offset: Option<Vec<f32>>,
    pub analog_offset_error: Option<Vec<f32>>,
    pub dark_current: Option<Vec<f32>>,
    pub dark_current_error: Option<Vec<f32>>,
    pub orbital_dark: Option<OrbitalDark>,
    pub pixel_gain: Option<Vec<f32>>,
    pub etalon: Option<Vec<f32>>,
    /// Relative error of the straylight correction.
    pub stray_error: f32,
    pub wavelength: Option<Vec<f32>>,
    pub wavelength_error: Option<Vec<f32>>,
    /// Polarisation sensitivity to Stokes Q.
    pub mu2: Option<Vec<f32>>,
    /// Polarisation sensitivity to Stokes U.
    pub mu3: Option<Vec<f32>>,
    pub abs_rad: Option<Vec<f32>>,
    pub sun_reference: Option<Vec<f32>>,
    /// Non-zero entries flag bad or dead pixels.
    pub bad_pixel_mask: Option<Vec<u8>>,
    /// Read-out noise in binary units.
    pub noise: Option<Vec<f32>>,
    pub electrons_per_bu: Option<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orbital_dark_interpolation() {
        let dark = OrbitalDark {
            phase: vec![0.25, 0.75],
            dark_current: vec![vec![1.0, 10.0], vec![3.0, 30.0]],
        };
        assert!((dark.at(0.5, 0).unwrap() - 2.0).abs() < 1e-6);
        assert!((dark.at(0.5, 1).unwrap() - 20.0).abs() < 1e-5);
        // wraps over the end of the orbit
        assert!((dark.at(0.0, 0).unwrap() - 2.0).abs() < 1e-6);
        assert!((dark.at(1.0, 0).unwrap() - 2.0).abs() < 1e-6);
        assert!((dark.at(0.875, 0).unwrap() - 2.5).abs() < 1e-6);
        assert!(dark.at(0.5, 2).is_none());
        assert!(OrbitalDark::default().at(0.5, 0).is_none());
    }
}
