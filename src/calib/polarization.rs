use ndarray::{Axis, Zip};

use super::{pixel_values, CalibrationStage, Context, Stage, StageResult};
use crate::level1c::Level1cProduct;

/// Polarisation correction.
///
/// Every observation is divided by `1 + mu2 * Q + mu3 * U`, with the Stokes
/// fractions of the observation and the polarisation sensitivities of the pixel.
pub struct PolarizationCorrection;

impl CalibrationStage for PolarizationCorrection {
    fn stage(&self) -> Stage {
        Stage::Polarization
    }

    fn reference(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        let key = &product.key_data;
        let (Some(mu2), Some(mu3)) = (&key.mu2, &key.mu3) else {
            ctx.warn(Stage::Polarization, "no polarisation sensitivity in key data");
            return Ok(());
        };
        for series in &mut product.series {
            let mu2 = pixel_values(Stage::Polarization, mu2, series)?;
            let mu3 = pixel_values(Stage::Polarization, mu3, series)?;
            let rows = series
                .values
                .axis_iter_mut(Axis(0))
                .zip(series.errors.axis_iter_mut(Axis(0)))
                .zip(&series.polarization);
            for ((values, errors), stokes) in rows {
                Zip::from(values)
                    .and(errors)
                    .and(&mu2)
                    .and(&mu3)
                    .for_each(|v, e, m2, m3| {
                        let factor = 1.0 + m2 * stokes.q + m3 * stokes.u;
                        *v /= factor;
                        *e /= factor * factor;
                    });
            }
        }
        Ok(())
    }
}
