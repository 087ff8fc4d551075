use ndarray::{Array1, Zip};

use super::{pixel_values, CalibrationStage, Context, OrbitalDark, Stage, StageResult};
use crate::error::CalibErrorKind;
use crate::level1c::{Level1cProduct, Level1cSeries};
use crate::sdmf::{CorrectionRecord, Dataset};

/// Dark parameters gathered for the pixels of one series.
struct DarkParams {
    analog_offset: Array1<f32>,
    dark_current: Array1<f32>,
    analog_offset_error: Option<Array1<f32>>,
    dark_current_error: Option<Array1<f32>>,
}

fn optional(
    table: Option<&[f32]>,
    series: &Level1cSeries,
) -> Result<Option<Array1<f32>>, CalibErrorKind> {
    table.map(|t| pixel_values(Stage::Dark, t, series)).transpose()
}

/// Add the orbit phase dependent dark current.
fn add_orbital(params: &mut DarkParams, orbital: &OrbitalDark, series: &Level1cSeries) {
    for (dc, pixel) in params.dark_current.iter_mut().zip(&series.pixel_ids) {
        if let Some(v) = orbital.at(series.orbit_phase, usize::from(*pixel)) {
            *dc += v;
        }
    }
}

/// Subtract `coadd * analog_offset + intg * dark_current` from every observation.
fn subtract(series: &mut Level1cSeries, params: &DarkParams, accumulate_variance: bool) {
    let coadd = f32::from(series.coadd);
    let intg = series.corrected_integration_time();
    let correction = &params.analog_offset * coadd + &params.dark_current * intg;
    series.values -= &correction;

    if accumulate_variance {
        let zeros = || Array1::zeros(series.num_pixels());
        let ao_err = params.analog_offset_error.clone().unwrap_or_else(zeros);
        let dc_err = params.dark_current_error.clone().unwrap_or_else(zeros);
        let variance = Zip::from(&ao_err)
            .and(&dc_err)
            .map_collect(|a, d| (coadd * a).powi(2) + (intg * d).powi(2));
        series.errors += &variance;
    }
}

fn orbital_from_record(record: &CorrectionRecord) -> Option<OrbitalDark> {
    let phase = record.field("phase")?.to_vec();
    let values = record.field("dark_current")?;
    if phase.is_empty() || values.len() % phase.len() != 0 {
        return None;
    }
    let stride = values.len() / phase.len();
    Some(OrbitalDark {
        dark_current: values.chunks(stride).map(<[f32]>::to_vec).collect(),
        phase,
    })
}

/// Analog offset and dark current subtraction.
pub struct DarkCorrection;

impl CalibrationStage for DarkCorrection {
    fn stage(&self) -> Stage {
        Stage::Dark
    }

    fn reference(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        let key = &product.key_data;
        let (Some(ao), Some(dc)) = (&key.analog_offset, &key.dark_current) else {
            ctx.warn(Stage::Dark, "no dark parameters in key data, dark not corrected");
            return Ok(());
        };
        for series in &mut product.series {
            let mut params = DarkParams {
                analog_offset: pixel_values(Stage::Dark, ao, series)?,
                dark_current: pixel_values(Stage::Dark, dc, series)?,
                analog_offset_error: optional(key.analog_offset_error.as_deref(), series)?,
                dark_current_error: optional(key.dark_current_error.as_deref(), series)?,
            };
            if let Some(orbital) = &key.orbital_dark {
                add_orbital(&mut params, orbital, series);
            }
            subtract(series, &params, ctx.accumulate_variance);
        }
        Ok(())
    }

    fn database(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        let record = ctx.resolve(Dataset::Dark).and_then(|r| {
            Some((r, r.field("analog_offset")?, r.field("dark_current")?))
        });
        let Some((record, ao, dc)) = record else {
            ctx.warn(
                Stage::Dark,
                format!("no {} record near orbit {}, using key data", Dataset::Dark, ctx.orbit),
            );
            return self.reference(product, ctx);
        };
        let orbital = ctx.resolve(Dataset::OrbitalDark).and_then(orbital_from_record);

        for series in &mut product.series {
            let mut params = DarkParams {
                analog_offset: pixel_values(Stage::Dark, ao, series)?,
                dark_current: pixel_values(Stage::Dark, dc, series)?,
                analog_offset_error: optional(record.field("analog_offset_error"), series)?,
                dark_current_error: optional(record.field("dark_current_error"), series)?,
            };
            if let Some(orbital) = &orbital {
                add_orbital(&mut params, orbital, series);
            }
            subtract(series, &params, ctx.accumulate_variance);
        }
        Ok(())
    }
}
