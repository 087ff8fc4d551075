use super::{CalibrationStage, Context, Stage, StageResult};
use crate::level1c::Level1cProduct;

/// Normalize co-added samples to a single readout.
pub struct CoaddNormalization;

impl CalibrationStage for CoaddNormalization {
    fn stage(&self) -> Stage {
        Stage::CoaddNormalization
    }

    fn reference(&self, product: &mut Level1cProduct, _ctx: &mut Context<'_>) -> StageResult {
        for series in &mut product.series {
            let coadd = f32::from(series.coadd.max(1));
            series.values /= coadd;
            series.errors /= coadd;
        }
        Ok(())
    }
}

/// Normalize samples to one second of exposure.
pub struct ExposureNormalization;

impl CalibrationStage for ExposureNormalization {
    fn stage(&self) -> Stage {
        Stage::ExposureNormalization
    }

    fn reference(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        for series in &mut product.series {
            if series.pet <= 0.0 {
                ctx.warn(
                    Stage::ExposureNormalization,
                    format!(
                        "channel {} cluster {} has exposure time {}, not normalized",
                        series.channel, series.cluster_id, series.pet
                    ),
                );
                continue;
            }
            series.values /= series.pet;
            series.errors /= series.pet;
        }
        Ok(())
    }
}
