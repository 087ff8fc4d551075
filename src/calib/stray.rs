use ndarray::{Axis, Zip};

use super::{CalibrationStage, Context, Stage, StageResult};
use crate::level1c::Level1cProduct;

/// Straylight correction from the straylight bytes of the level-1b readouts,
/// scaled per observation by the DSR scale factor in tenths.
pub struct StraylightCorrection;

impl CalibrationStage for StraylightCorrection {
    fn stage(&self) -> Stage {
        Stage::Straylight
    }

    fn reference(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        let rel_error = product.key_data.stray_error;
        let accumulate = ctx.accumulate_variance;
        for series in &mut product.series {
            let rows = series
                .values
                .axis_iter_mut(Axis(0))
                .zip(series.errors.axis_iter_mut(Axis(0)))
                .zip(series.stray.axis_iter(Axis(0)))
                .zip(&series.scale_factor);
            for (((values, errors), stray), scale) in rows {
                let scale = f32::from(*scale) / 10.0;
                Zip::from(values)
                    .and(errors)
                    .and(stray)
                    .for_each(|v, e, s| {
                        let corr = scale * f32::from(*s);
                        *v -= corr;
                        if accumulate {
                            *e += (rel_error * corr).powi(2);
                        }
                    });
            }
        }
        Ok(())
    }
}
