use super::{pixel_values, CalibrationStage, Context, Stage, StageResult};
use crate::level1c::Level1cProduct;

/// Assigns the wavelength and its error to every pixel of a series.
pub struct WavelengthCalibration;

impl CalibrationStage for WavelengthCalibration {
    fn stage(&self) -> Stage {
        Stage::Wavelength
    }

    fn reference(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        let key = &product.key_data;
        let Some(wavelength) = &key.wavelength else {
            ctx.warn(Stage::Wavelength, "no wavelength grid in key data");
            return Ok(());
        };
        for series in &mut product.series {
            series.wavelength = pixel_values(Stage::Wavelength, wavelength, series)?.to_vec();
            series.wavelength_error = match &key.wavelength_error {
                Some(err) => pixel_values(Stage::Wavelength, err, series)?.to_vec(),
                None => vec![0.0; series.num_pixels()],
            };
        }
        Ok(())
    }
}
