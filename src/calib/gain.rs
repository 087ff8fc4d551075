use ndarray::{Array1, Zip};

use super::{pixel_values, CalibrationStage, Context, Stage, StageResult};
use crate::level1c::Level1cProduct;
use crate::sdmf::Dataset;

/// Gains below this are treated as dead pixels.
const MIN_GAIN: f32 = 1e-3;

fn apply_gain(product: &mut Level1cProduct, table: &[f32]) -> StageResult {
    for series in &mut product.series {
        let gain: Array1<f32> = pixel_values(Stage::PixelGain, table, series)?;
        let rows = series.values.rows_mut().into_iter().zip(series.errors.rows_mut());
        for (mut values, mut errors) in rows {
            Zip::from(&mut values)
                .and(&mut errors)
                .and(&gain)
                .for_each(|v, e, g| {
                    if g.abs() < MIN_GAIN {
                        *v = 0.0;
                        *e = 0.0;
                    } else {
                        *v /= g;
                        *e /= g * g;
                    }
                });
        }
    }
    Ok(())
}

/// Pixel-to-pixel gain correction.
pub struct PixelGain;

impl CalibrationStage for PixelGain {
    fn stage(&self) -> Stage {
        Stage::PixelGain
    }

    fn reference(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        let Some(table) = product.key_data.pixel_gain.take() else {
            ctx.warn(Stage::PixelGain, "no pixel gain in key data, using unit gain");
            return Ok(());
        };
        let res = apply_gain(product, &table);
        product.key_data.pixel_gain = Some(table);
        res
    }

    fn database(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        if let Some(table) = ctx
            .resolve(Dataset::PixelGain)
            .and_then(|r| r.field("gain"))
        {
            return apply_gain(product, table);
        }
        if product.key_data.pixel_gain.is_none() {
            ctx.warn(
                Stage::PixelGain,
                format!("no pixel gain near orbit {}, using unit gain", ctx.orbit),
            );
            return Ok(());
        }
        ctx.warn(
            Stage::PixelGain,
            format!("no pixel gain near orbit {}, using key data", ctx.orbit),
        );
        self.reference(product, ctx)
    }
}

fn apply_etalon(product: &mut Level1cProduct, table: &[f32]) -> StageResult {
    for series in &mut product.series {
        let etalon = pixel_values(Stage::Etalon, table, series)?;
        series.values /= &etalon;
        series.errors /= &(&etalon * &etalon);
    }
    Ok(())
}

/// Etalon correction.
pub struct EtalonCorrection;

impl CalibrationStage for EtalonCorrection {
    fn stage(&self) -> Stage {
        Stage::Etalon
    }

    fn reference(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        let Some(table) = product.key_data.etalon.take() else {
            ctx.warn(Stage::Etalon, "no etalon in key data, etalon not corrected");
            return Ok(());
        };
        let res = apply_etalon(product, &table);
        product.key_data.etalon = Some(table);
        res
    }

    fn database(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        match ctx.resolve(Dataset::Etalon).and_then(|r| r.field("etalon")) {
            Some(table) => apply_etalon(product, table),
            None => {
                ctx.warn(
                    Stage::Etalon,
                    format!("no etalon near orbit {}, using key data", ctx.orbit),
                );
                self.reference(product, ctx)
            }
        }
    }
}
