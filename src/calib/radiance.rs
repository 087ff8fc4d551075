//! Conversion of counts to radiance and of radiance to reflectance.
use std::f32::consts::PI;

use ndarray::{Axis, Zip};

use super::{pixel_values, CalibrationStage, Context, Stage, StageResult};
use crate::level1b::Geometry;
use crate::level1c::{Level1cProduct, Units};
use crate::sdmf::Dataset;

/// Smallest usable reflectance denominator.
const MIN_REFERENCE: f32 = 1e-14;

/// Absolute radiometric calibration to radiance.
pub struct RadianceCorrection;

impl CalibrationStage for RadianceCorrection {
    fn stage(&self) -> Stage {
        Stage::Radiance
    }

    fn reference(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        let Some(abs_rad) = &product.key_data.abs_rad else {
            ctx.warn(Stage::Radiance, "no absolute radiance response in key data");
            return Ok(());
        };
        for series in &mut product.series {
            let intg = series.corrected_integration_time();
            let response = pixel_values(Stage::Radiance, abs_rad, series)? * intg;
            series.values /= &response;
            series.errors /= &(&response * &response);
            series.units = Units::Radiance;
        }
        Ok(())
    }
}

fn reflectance(signal: f32, denominator: f32) -> f32 {
    if denominator.is_normal() && denominator > MIN_REFERENCE {
        PI * signal / denominator
    } else {
        f32::NAN
    }
}

fn apply_reflectance(product: &mut Level1cProduct, sun: &[f32]) -> StageResult {
    let nadir = product.geometry == Geometry::Nadir;
    for series in &mut product.series {
        let sun = pixel_values(Stage::Reflectance, sun, series)?;
        for (obs, (values, errors)) in series
            .values
            .axis_iter_mut(Axis(0))
            .zip(series.errors.axis_iter_mut(Axis(0)))
            .enumerate()
        {
            let cos_sza = if nadir {
                series
                    .geolocation
                    .sun_zenith(obs)
                    .map_or(f32::NAN, |sza| sza.to_radians().cos())
            } else {
                1.0
            };
            Zip::from(values).and(errors).and(&sun).for_each(|v, e, s| {
                let denominator = cos_sza * s;
                *v = reflectance(*v, denominator);
                let scale = reflectance(1.0, denominator);
                *e *= scale * scale;
            });
        }
        series.units = Units::Reflectance;
    }
    Ok(())
}

/// Conversion of radiance to reflectance with a solar reference spectrum.
///
/// Nadir observations are normalized by the cosine of the solar zenith angle at
/// the observation centre. Pixels with an unusable reference become NaN.
pub struct ReflectanceCorrection;

impl CalibrationStage for ReflectanceCorrection {
    fn stage(&self) -> Stage {
        Stage::Reflectance
    }

    fn reference(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        let Some(sun) = product.key_data.sun_reference.take() else {
            ctx.warn(Stage::Reflectance, "no solar reference in key data");
            return Ok(());
        };
        let res = apply_reflectance(product, &sun);
        product.key_data.sun_reference = Some(sun);
        res
    }

    fn database(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        match ctx
            .resolve(Dataset::SolarReference)
            .and_then(|r| r.field("irradiance"))
        {
            Some(sun) => apply_reflectance(product, sun),
            None => {
                ctx.warn(
                    Stage::Reflectance,
                    format!("no solar reference near orbit {}, using key data", ctx.orbit),
                );
                self.reference(product, ctx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::calib::testing::{product, table};
    use crate::calib::{calibrate, Algorithm, CalibMask};
    use crate::geolocation::{GeoMonitor, GeoRecords};
    use crate::sdmf::{CorrectionRecord, MemoryStore};

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4 * b.abs().max(1.0)
    }

    #[test]
    fn counts_to_radiance() {
        let mut product = product(1, 2, 0.5, array![[10.0, 20.0]]);
        product.key_data.abs_rad = Some(table(5.0));
        product.series[0].errors = array![[25.0, 0.0]];
        let mask = CalibMask::NONE.with(Stage::Radiance, Algorithm::Reference);
        calibrate(&mut product, mask, 1, &MemoryStore::default()).unwrap();
        let series = &product.series[0];
        assert_eq!(series.values, array![[2.0, 4.0]]);
        assert_eq!(series.errors, array![[1.0, 0.0]]);
        assert_eq!(series.units, Units::Radiance);
    }

    #[test]
    fn nadir_reflectance_uses_solar_zenith() {
        // solar zenith of the test product is 60 degrees
        let mut product = product(3, 1, 1.0, array![[1.0, 2.0]]);
        product.key_data.sun_reference = Some(table(PI));
        let mask = CalibMask::NONE.with(Stage::Reflectance, Algorithm::Reference);
        calibrate(&mut product, mask, 1, &MemoryStore::default()).unwrap();
        let series = &product.series[0];
        assert!(approx(series.values[[0, 0]], 2.0));
        assert!(approx(series.values[[0, 1]], 4.0));
        assert_eq!(series.units, Units::Reflectance);
    }

    #[test]
    fn monitor_reflectance_and_bad_reference() {
        let mut product = product(3, 1, 1.0, array![[1.0, 2.0]]);
        product.geometry = Geometry::Monitor;
        product.series[0].geolocation = GeoRecords::Monitor(vec![GeoMonitor::default()]);
        let mut sun = table(2.0 * PI);
        sun[2 * 1024 + 1] = 0.0;
        let mut store = MemoryStore::default();
        store.insert(
            Dataset::SolarReference.name(),
            CorrectionRecord::new(1010).with_field("irradiance", sun),
        );
        let mask = CalibMask::NONE.with(Stage::Reflectance, Algorithm::Database);
        let status = calibrate(&mut product, mask, 1000, &store).unwrap();
        assert_eq!(status.warning_count(), 0);
        let series = &product.series[0];
        assert!(approx(series.values[[0, 0]], 0.5));
        assert!(series.values[[0, 1]].is_nan());
    }
}
