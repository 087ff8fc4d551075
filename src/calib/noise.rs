use ndarray::{Array1, Axis, Zip};

use super::{pixel_values, CalibrationStage, Context, Stage, StageResult};
use crate::level1c::{Level1cProduct, Level1cSeries};
use crate::sdmf::Dataset;

/// Detector electrons per binary unit used when the key data has none.
pub const DEFAULT_ELECTRONS_PER_BU: f32 = 177.0;

fn estimate(series: &mut Level1cSeries, noise: &Array1<f32>, electrons: &Array1<f32>, accumulated: bool) {
    let coadd = f32::from(series.coadd);
    for (values, errors) in series
        .values
        .axis_iter(Axis(0))
        .zip(series.errors.axis_iter_mut(Axis(0)))
    {
        Zip::from(errors)
            .and(values)
            .and(noise)
            .and(electrons)
            .for_each(|e, s, n, g| {
                let folded = if accumulated && e.is_finite() { *e } else { 0.0 };
                *e = (s.abs() / g + coadd * n * n + folded).sqrt();
            });
    }
}

fn apply(product: &mut Level1cProduct, noise: Option<&[f32]>, accumulated: bool) -> StageResult {
    let electrons = product.key_data.electrons_per_bu.as_deref();
    for series in &mut product.series {
        let noise = match noise {
            Some(t) => pixel_values(Stage::ErrorEstimate, t, series)?,
            None => Array1::zeros(series.num_pixels()),
        };
        let electrons = match electrons {
            Some(t) => pixel_values(Stage::ErrorEstimate, t, series)?,
            None => Array1::from_elem(series.num_pixels(), DEFAULT_ELECTRONS_PER_BU),
        };
        estimate(series, &noise, &electrons, accumulated);
    }
    Ok(())
}

/// Per sample error from shot noise and read-out noise.
///
/// `error = sqrt(|signal| / electrons_per_bu + coadd * noise^2)`, plus the variance
/// accumulated by earlier stages when the pipeline folds it in.
pub struct ErrorEstimate;

impl CalibrationStage for ErrorEstimate {
    fn stage(&self) -> Stage {
        Stage::ErrorEstimate
    }

    fn reference(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        let noise = product.key_data.noise.take();
        if noise.is_none() {
            ctx.warn(Stage::ErrorEstimate, "no read-out noise in key data, shot noise only");
        }
        let res = apply(product, noise.as_deref(), ctx.accumulate_variance);
        product.key_data.noise = noise;
        res
    }

    fn database(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        match ctx.resolve(Dataset::Dark).and_then(|r| r.field("mean_noise")) {
            Some(noise) => apply(product, Some(noise), ctx.accumulate_variance),
            None => {
                ctx.warn(
                    Stage::ErrorEstimate,
                    format!("no read-out noise near orbit {}, using key data", ctx.orbit),
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
    use crate::calib::{calibrate, Algorithm, CalibMask, Pipeline};
    use crate::sdmf::{CorrectionRecord, MemoryStore};

    #[test]
    fn shot_and_readout_noise() {
        let mut product = product(2, 2, 1.0, array![[-400.0, 0.0]]);
        product.key_data.noise = Some(table(3.0));
        product.key_data.electrons_per_bu = Some(table(100.0));
        let mask = CalibMask::NONE.with(Stage::ErrorEstimate, Algorithm::Reference);
        let status = calibrate(&mut product, mask, 1, &MemoryStore::default()).unwrap();
        assert_eq!(status.warning_count(), 0);
        // sqrt(400 / 100 + 2 * 9), sqrt(2 * 9)
        let errors = &product.series[0].errors;
        assert!((errors[[0, 0]] - 22f32.sqrt()).abs() < 1e-5);
        assert!((errors[[0, 1]] - 18f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn folds_accumulated_variance() {
        let mut product = product(3, 1, 1.0, array![[0.0]]);
        product.key_data.noise = Some(table(0.0));
        product.series[0].errors = array![[16.0]];
        let mask = CalibMask::NONE.with(Stage::ErrorEstimate, Algorithm::Reference);

        let mut folded = product.clone();
        calibrate(&mut folded, mask, 1, &MemoryStore::default()).unwrap();
        assert_eq!(folded.series[0].errors, array![[4.0]]);

        Pipeline::new(mask)
            .with_fold_variance(false)
            .run(&mut product, 1, &MemoryStore::default())
            .unwrap();
        assert_eq!(product.series[0].errors, array![[0.0]]);
    }

    #[test]
    fn database_noise_from_fitted_dark() {
        let mut store = MemoryStore::default();
        store.insert(
            Dataset::Dark.name(),
            CorrectionRecord::new(500).with_field("mean_noise", table(2.0)),
        );
        let mut product = product(7, 1, 1.0, array![[177.0]]);
        let mask = CalibMask::NONE.with(Stage::ErrorEstimate, Algorithm::Database);
        let status = calibrate(&mut product, mask, 500, &store).unwrap();
        assert_eq!(status.warning_count(), 0);
        // default electrons per unit: sqrt(1 + 4)
        assert!((product.series[0].errors[[0, 0]] - 5f32.sqrt()).abs() < 1e-5);
    }
}
