//! Memory effect (Reticon) and non-linearity (Epitaxx) corrections.
//!
//! Level-1b products carry one correction byte per sample. The database algorithms
//! recompute the correction from lookup tables indexed by the signal per readout.
use ndarray::Axis;

use super::{CalibrationStage, Context, MemoryScale, Stage, StageResult};
use crate::cluster::{Channel, Technology};
use crate::error::CalibErrorKind;
use crate::geolocation::{GeoRecords, NEW_TANGENT_HEIGHT};
use crate::level1c::{Level1cProduct, Level1cSeries};
use crate::sdmf::{CorrectionRecord, Dataset};

/// Expand an embedded correction byte to counts per readout.
#[must_use]
pub fn expand_correction(scale: MemoryScale, channel: Channel, value: i8) -> f32 {
    let c = f32::from(value);
    match (channel.id(), scale) {
        (1..=5, MemoryScale::Current) => 1.25 * (c + 37.0),
        (1..=5, MemoryScale::Legacy) => 2.0 * c,
        (6, _) => 1.25 * (c + 102.0),
        (7, _) => 1.5 * (c - 126.0),
        _ => 1.25 * (c - 126.0),
    }
}

/// Subtract the embedded corrections of every sample of `series`.
fn apply_embedded(series: &mut Level1cSeries, scale: MemoryScale) {
    let coadd = f32::from(series.coadd);
    let channel = series.channel;
    ndarray::Zip::from(&mut series.values)
        .and(&series.memory_corr)
        .for_each(|v, c| *v -= coadd * expand_correction(scale, channel, *c));
}

/// Table index of a signal normalized per readout.
fn table_index(signal: f32, coadd: f32, len: usize) -> usize {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let idx = (signal / coadd).round().max(0.0) as usize;
    idx.min(len.saturating_sub(1))
}

fn channel_memory_table<'r>(record: &'r CorrectionRecord, channel: Channel) -> Option<&'r [f32]> {
    record
        .field(&format!("channel{}", channel.id()))
        .filter(|t| !t.is_empty())
}

/// Detector setup time in milliseconds before the first readout of a state,
/// indexed by state id - 1.
#[rustfmt::skip]
const SETUP_TIME: [f32; 70] = [
    421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875,
    421.875, 421.875, 421.875, 421.875, 421.875, 1269.53125, 421.875, 421.875, 421.875, 421.875,
    421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875,
    421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875,
    421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 1269.53125, 421.875, 421.875,
    421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 421.875, 519.53125, 421.875,
    1269.53125, 421.875, 421.875, 421.875, 335.9375, 421.875, 421.875, 421.875, 519.53125, 1269.53125,
];
const DEFAULT_SETUP_TIME: f32 = 421.875;

fn setup_time(state_id: u8) -> f32 {
    usize::from(state_id)
        .checked_sub(1)
        .and_then(|idx| SETUP_TIME.get(idx))
        .copied()
        .unwrap_or(DEFAULT_SETUP_TIME)
}

/// Table entry of a signal already normalized per readout.
fn lookup(table: &[f32], norm: f32) -> f32 {
    if norm.is_finite() {
        table[table_index(norm, 1.0, table.len())]
    } else {
        0.0
    }
}

/// Limb readouts flagged as the first at a new tangent height.
fn new_tangent_heights(series: &Level1cSeries) -> Vec<bool> {
    match &series.geolocation {
        GeoRecords::Limb(geo) => geo
            .iter()
            .map(|g| g.pixel_type & NEW_TANGENT_HEIGHT != 0)
            .collect(),
        _ => Vec::new(),
    }
}

/// Memory correction from a lookup table of the signal per readout.
///
/// Every readout is corrected for the memory of the previous readout and, when
/// co-added, for the memory between the readouts it sums. The detector is reset
/// before the first readout of a state, which then carries the memory of the
/// setup period. Limb scans are also reset at every new tangent height, where the
/// memory is estimated from the last (dark) readout of the scan.
fn apply_memory_table(series: &mut Level1cSeries, table: &[f32]) {
    let coadd = f32::from(series.coadd.max(1));
    let original = series.values.clone();
    let Some(first) = original.rows().into_iter().next() else {
        return;
    };
    let dark = original.row(original.nrows() - 1);
    let scale_reset = setup_time(series.state_id) / (1000.0 * coadd * series.pet);
    let mut previous: Vec<f32> = first.iter().map(|s| lookup(table, scale_reset * s)).collect();
    let resets = new_tangent_heights(series);

    for (nobs, mut row) in series.values.axis_iter_mut(Axis(0)).enumerate() {
        if resets.get(nobs).copied().unwrap_or(false) {
            let readout = original.row(nobs);
            for ((prev, s), d) in previous.iter_mut().zip(readout.iter()).zip(dark.iter()) {
                let mut val = *d;
                if s > d {
                    val += (3.0 / 16.0) * (s - d);
                }
                *prev = lookup(table, val / coadd);
            }
        }
        for (signal, prev) in row.iter_mut().zip(previous.iter_mut()) {
            if !signal.is_finite() {
                continue;
            }
            let corr = table[table_index(*signal, coadd, table.len())];
            *signal -= *prev;
            if series.coadd > 1 {
                *signal -= (coadd - 1.0) * corr;
            }
            *prev = corr;
        }
    }
}

/// Non-linearity correction: every pixel follows one of a set of curves tabulated
/// over the signal per readout.
fn apply_curves(series: &mut Level1cSeries, curve: &[f32], matrix: &[f32], entries: usize) -> StageResult {
    let coadd = f32::from(series.coadd);
    let curves = super::pixel_values(Stage::NonLinearity, curve, series)?;
    let n_curves = matrix.len() / entries;
    for mut row in series.values.axis_iter_mut(Axis(0)) {
        for (signal, c) in row.iter_mut().zip(curves.iter()) {
            if !signal.is_finite() {
                continue;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let c = *c as usize;
            if c >= n_curves {
                return Err(CalibErrorKind::Invalid {
                    stage: Stage::NonLinearity,
                    message: format!("curve index {c} out of range, {n_curves} curves"),
                });
            }
            let table = &matrix[c * entries..(c + 1) * entries];
            *signal -= coadd * table[table_index(*signal, coadd, entries)];
        }
    }
    Ok(())
}

/// Memory correction of the Reticon channels.
pub struct MemoryCorrection;

impl CalibrationStage for MemoryCorrection {
    fn stage(&self) -> Stage {
        Stage::Memory
    }

    fn reference(&self, product: &mut Level1cProduct, _ctx: &mut Context<'_>) -> StageResult {
        let scale = product.key_data.memory_scale;
        for series in &mut product.series {
            if series.channel.technology() == Technology::Reticon {
                apply_embedded(series, scale);
            }
        }
        Ok(())
    }

    fn database(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        let needed = product
            .series
            .iter()
            .any(|s| s.channel.technology() == Technology::Reticon);
        if !needed {
            return Ok(());
        }
        let record = ctx
            .resolve(Dataset::Memory)
            .ok_or_else(|| CalibErrorKind::MissingRequired {
                stage: Stage::Memory,
                what: Dataset::Memory.to_string(),
            })?;
        for series in &mut product.series {
            if series.channel.technology() != Technology::Reticon {
                continue;
            }
            let table = channel_memory_table(record, series.channel).ok_or_else(|| {
                CalibErrorKind::MissingRequired {
                    stage: Stage::Memory,
                    what: format!("memory table of channel {}", series.channel),
                }
            })?;
            apply_memory_table(series, table);
        }
        Ok(())
    }
}

/// Non-linearity correction of the Epitaxx channels.
pub struct NonLinearity;

impl CalibrationStage for NonLinearity {
    fn stage(&self) -> Stage {
        Stage::NonLinearity
    }

    fn reference(&self, product: &mut Level1cProduct, _ctx: &mut Context<'_>) -> StageResult {
        let scale = product.key_data.memory_scale;
        for series in &mut product.series {
            if series.channel.technology() == Technology::Epitaxx {
                apply_embedded(series, scale);
            }
        }
        Ok(())
    }

    fn database(&self, product: &mut Level1cProduct, ctx: &mut Context<'_>) -> StageResult {
        let needed = product
            .series
            .iter()
            .any(|s| s.channel.technology() == Technology::Epitaxx);
        if !needed {
            return Ok(());
        }
        let missing = |what: &str| CalibErrorKind::MissingRequired {
            stage: Stage::NonLinearity,
            what: what.to_string(),
        };
        let record = ctx
            .resolve(Dataset::NonLinearity)
            .ok_or_else(|| missing(Dataset::NonLinearity.name()))?;
        let curve = record.field("curve").ok_or_else(|| missing("curve"))?;
        let matrix = record.field("matrix").ok_or_else(|| missing("matrix"))?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let entries = record
            .field("entries")
            .and_then(|e| e.first())
            .map(|e| *e as usize)
            .filter(|e| *e > 0 && matrix.len() % e == 0)
            .ok_or_else(|| missing("entries"))?;

        for series in &mut product.series {
            if series.channel.technology() == Technology::Epitaxx {
                apply_curves(series, curve, matrix, entries)?;
            }
        }
        Ok(())
    }
}
