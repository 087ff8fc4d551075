//! Robust per pixel averaging of level-1c series.
use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::level1c::Level1cSeries;

/// Samples farther than this many mean absolute deviations from the median are
/// rejected.
pub const REJECT_FACTOR: f64 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobustMean {
    /// Samples retained after rejection.
    pub count: usize,
    pub mean: f64,
    pub sdev: f64,
}

/// Lower median; sorts `buf`.
fn median(buf: &mut [f64]) -> f64 {
    buf.sort_unstable_by(f64::total_cmp);
    buf[(buf.len() + 1) / 2 - 1]
}

fn moments(buf: &[f64]) -> (f64, f64) {
    let n = buf.len() as f64;
    let mean = buf.iter().sum::<f64>() / n;
    if buf.len() < 2 {
        return (mean, 0.0);
    }
    let (ep, var) = buf.iter().fold((0.0, 0.0), |(ep, var), v| {
        let diff = v - mean;
        (ep + diff, var + diff * diff)
    });
    (mean, ((var - ep * ep / n) / (n - 1.0)).sqrt())
}

/// Mean and standard deviation of `samples` after outlier rejection.
///
/// Samples below `f32::EPSILON`, which includes NaN, are ignored. Of the rest those
/// farther than [`REJECT_FACTOR`] times the mean absolute deviation from the median
/// are dropped. Without any retained samples `count` is zero and `mean` and `sdev`
/// are set to `sentinel`.
///
/// The spread is the mean, not the median, of the absolute deviations, which is
/// what the SDMF monitoring averages use.
#[must_use]
pub fn robust_mean(samples: impl IntoIterator<Item = f32>, sentinel: f64) -> RobustMean {
    let mut buf: Vec<f64> = samples
        .into_iter()
        .filter(|v| *v >= f32::EPSILON)
        .map(f64::from)
        .collect();
    if buf.is_empty() {
        return RobustMean {
            count: 0,
            mean: sentinel,
            sdev: sentinel,
        };
    }

    let median = median(&mut buf);
    let mdev = buf.iter().map(|v| (v - median).abs()).sum::<f64>() / buf.len() as f64;
    buf.retain(|v| (v - median).abs() <= REJECT_FACTOR * mdev);
    if buf.is_empty() {
        return RobustMean {
            count: 0,
            mean: sentinel,
            sdev: sentinel,
        };
    }

    let (mean, sdev) = moments(&buf);
    RobustMean {
        count: buf.len(),
        mean,
        sdev,
    }
}

/// Robust average of one pixel over all observations of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelAverage {
    pub pixel_id: u16,
    pub coadd: u8,
    pub pet: f32,
    pub average: RobustMean,
}

/// Robust average of every pixel of `series`, optionally normalized by the co-adding
/// factor.
#[must_use]
pub fn average_series(series: &Level1cSeries, per_readout: bool, sentinel: f64) -> Vec<PixelAverage> {
    series
        .values
        .axis_iter(Axis(1))
        .zip(&series.pixel_ids)
        .map(|(column, pixel_id)| {
            let mut average = robust_mean(column.iter().copied(), sentinel);
            if per_readout && average.count > 0 {
                average.mean /= f64::from(series.coadd);
                average.sdev /= f64::from(series.coadd);
            }
            PixelAverage {
                pixel_id: *pixel_id,
                coadd: series.coadd,
                pet: series.pet,
                average,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_single_outlier() {
        let samples = [10.0, 10.2, 9.8, 10.1, 9.9, 10.0, 10.3, 9.7, 10.0, 1000.0];
        let res = robust_mean(samples, f64::NAN);
        assert_eq!(res.count, 9);
        assert!((res.mean - 10.0).abs() < 1e-3, "{res:?}");
        assert!(res.sdev > 0.0 && res.sdev < 1.0);
    }

    #[test]
    fn spread_is_mean_absolute_deviation() {
        // median 10 with absolute deviations summing to 34: the 11s are within
        // 7 * 3.4, while a median deviation of 0 would reject them
        let samples = [10.0, 10.0, 10.0, 10.0, 10.0, 11.0, 11.0, 11.0, 11.0, 40.0];
        let res = robust_mean(samples, f64::NAN);
        assert_eq!(res.count, 9);
        assert!((res.mean - 94.0 / 9.0).abs() < 1e-9, "{res:?}");
    }

    #[test]
    fn ignores_non_positive_and_nan() {
        let res = robust_mean([f32::NAN, 0.0, -5.0, 4.0, 4.0], 0.0);
        assert_eq!(res.count, 2);
        assert_eq!(res.mean, 4.0);
        assert_eq!(res.sdev, 0.0);
    }

    #[test]
    fn no_samples_report_sentinel() {
        let res = robust_mean([0.0, -1.0, f32::NAN], -1.0);
        assert_eq!(res.count, 0);
        assert_eq!(res.mean, -1.0);
        assert_eq!(res.sdev, -1.0);

        let res = robust_mean(std::iter::empty(), f64::NAN);
        assert_eq!(res.count, 0);
        assert!(res.mean.is_nan());
    }

    #[test]
    fn lower_median() {
        let mut buf = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(median(&mut buf), 2.0);
        let mut buf = vec![5.0, 1.0, 3.0];
        assert_eq!(median(&mut buf), 3.0);
    }
}
