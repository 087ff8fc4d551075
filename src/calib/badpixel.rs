use ndarray::Axis;

use super::{pixel_values, CalibrationStage, Context, Stage, StageResult};
use crate::error::CalibErrorKind;
use crate::level1c::Level1cProduct;
use crate::sdmf::Dataset;

/// Set every value and error of flagged pixels to NaN.
fn apply_mask<T: Copy + Default + PartialEq>(product: &mut Level1cProduct, mask: &[T]) -> StageResult {
    for series in &mut product.series {
        let flags = pixel_values(Stage::BadPixel, mask, series)?;
        let bad: Vec<usize> = flags
            .iter()
            .enumerate()
            .filter(|(_, f)| **f != T::default())
            .map(|(i, _)| i)
            .collect();
        for idx in bad {
            series.values.index_axis_mut(Axis(1), idx).fill(f32::NAN);
            series.errors.index_axis_mut(Axis(1), idx).fill(f32::NAN);
        }
    }
    Ok(())
}

/// Masking of bad and dead pixels.
pub struct BadPixelMask;

impl CalibrationStage for BadPixelMask {
    fn stage(&self) -> Stage {
        Stage::BadPixel
    }

    fn reference(&self, product: &mut Level1cProduct, _ctx: &mut Context<'_>) -> StageResult {
        let mask = product
            .key_data
            .bad_pixel_mask
            .take()
            .ok_or_else(|| CalibErrorKind::MissingRequired {
                stage: Stage::BadPixel,
                what: "bad pixel mask in key data".to_string(),
            })?;
        let res = apply_mask(product, &mask);
        product.key_data.bad_pixel_mask = Some(mask);
        res
    }

    fn database(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        match ctx.resolve(Dataset::BadPixelMask).and_then(|r| r.field("mask")) {
            Some(mask) => apply_mask(product, mask),
            None => {
                ctx.warn(
                    Stage::BadPixel,
                    format!("no {} near orbit {}, using key data", Dataset::BadPixelMask, ctx.orbit),
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
    use crate::sdmf::{CorrectionRecord, MemoryStore};

    #[test]
    fn flagged_pixels_become_nan() {
        let mut product = product(1, 1, 1.0, array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let mut mask = vec![0u8; crate::cluster::SCIENCE_PIXELS];
        mask[1] = 1;
        product.key_data.bad_pixel_mask = Some(mask);
        let calib = CalibMask::NONE.with(Stage::BadPixel, Algorithm::Reference);
        calibrate(&mut product, calib, 1, &MemoryStore::default()).unwrap();

        let first = product.series[0].clone();
        assert!(first.values.column(1).iter().all(|v| v.is_nan()));
        assert!(first.errors.column(1).iter().all(|v| v.is_nan()));
        assert_eq!(first.values.column(0).to_vec(), vec![1.0, 4.0]);
        assert_eq!(first.values.column(2).to_vec(), vec![3.0, 6.0]);

        // masking twice changes nothing
        calibrate(&mut product, calib, 1, &MemoryStore::default()).unwrap();
        let second = &product.series[0];
        assert!(first
            .values
            .iter()
            .zip(second.values.iter())
            .all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    #[test]
    fn database_mask_before_first_orbit() {
        let mut mask = table(0.0);
        mask[0] = 1.0;
        let mut store = MemoryStore::default();
        store.insert(
            Dataset::BadPixelMask.name(),
            CorrectionRecord::new(3900).with_field("mask", mask),
        );
        let mut product = product(1, 1, 1.0, array![[1.0, 2.0]]);
        let calib = CalibMask::NONE.with(Stage::BadPixel, Algorithm::Database);
        let status = calibrate(&mut product, calib, 100, &store).unwrap();
        assert_eq!(status.warning_count(), 0);
        assert!(product.series[0].values[[0, 0]].is_nan());
        assert_eq!(product.series[0].values[[0, 1]], 2.0);
    }

    #[test]
    fn missing_mask_is_fatal() {
        let mut product = product(1, 1, 1.0, array![[1.0]]);
        let calib = CalibMask::NONE.with(Stage::BadPixel, Algorithm::Database);
        let err = calibrate(&mut product, calib, 5000, &MemoryStore::default()).unwrap_err();
        assert!(matches!(
            err.kind,
            CalibErrorKind::MissingRequired {
                stage: Stage::BadPixel,
                ..
            }
        ));
        assert_eq!(err.diagnostics.warning_count(), 1);
    }
}
