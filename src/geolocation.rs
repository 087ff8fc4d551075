//! Geolocation records and their mapping onto the readout cadence of a cluster.
//!
//! Level-1b data carries one or more geolocation records per DSR. A level-1c series
//! needs exactly one record per observation, so each DSR's records are copied when
//! the counts agree, aggregated when there are more records than readouts, and
//! interpolated when there are fewer. Coordinates are interpolated through Earth
//! centred unit vectors to behave around the poles and the date line.
use std::f64::consts::FRAC_PI_4;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pixel type assigned to an aggregated nadir record whose inputs disagree.
pub const MIXED_PIXEL_TYPE: u8 = u8::MAX;
/// Limb pixel type bit flagging the first readout at a new tangent height.
pub const NEW_TANGENT_HEIGHT: u8 = 0x1;
/// Limb pixel type bit flagging deep space observations.
pub const DEEP_SPACE: u8 = 0x2;
/// Nadir pixel type of a forward scan.
const FORWARD_SCAN: u8 = 1;

const MICRO_DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0 / 1e6;

/// Geographic position in micro-degrees.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coord {
    pub lat: i32,
    pub lon: i32,
}

impl Coord {
    #[must_use]
    pub fn new(lat: i32, lon: i32) -> Self {
        Coord { lat, lon }
    }

    fn to_xyz(self, lon_offset: bool) -> [f64; 3] {
        let lat = MICRO_DEG_TO_RAD * f64::from(self.lat);
        let mut lon = MICRO_DEG_TO_RAD * f64::from(self.lon);
        if lon_offset {
            lon += FRAC_PI_4;
        }
        [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_xyz(xyz: [f64; 3], lon_offset: bool) -> Self {
        let [x, y, z] = xyz;
        let lat = (z / x.hypot(y)).atan();
        let mut lon = y.atan2(x);
        if lon_offset {
            lon -= FRAC_PI_4;
        }
        Coord {
            lat: (lat / MICRO_DEG_TO_RAD).trunc() as i32,
            lon: (lon / MICRO_DEG_TO_RAD).trunc() as i32,
        }
    }

    /// Point halfway between `a` and `b` on the unit sphere.
    #[must_use]
    pub fn center(a: Coord, b: Coord) -> Coord {
        let offset = needs_lon_offset(a.lon) || needs_lon_offset(b.lon);
        let (pa, pb) = (a.to_xyz(offset), b.to_xyz(offset));
        Coord::from_xyz(
            [
                (pa[0] + pb[0]) / 2.0,
                (pa[1] + pb[1]) / 2.0,
                (pa[2] + pb[2]) / 2.0,
            ],
            offset,
        )
    }

    /// Centre of a footprint given by its four corners.
    #[must_use]
    pub fn corner_center(corner: &[Coord; 4]) -> Coord {
        Coord::center(
            Coord::center(corner[0], corner[1]),
            Coord::center(corner[2], corner[3]),
        )
    }
}

// Longitudes near +-90 degrees are rotated before converting to avoid loss of
// precision in atan2.
fn needs_lon_offset(lon: i32) -> bool {
    (85_000_000..=95_000_000).contains(&lon.unsigned_abs())
}

/// Where the first of `n` linearly interpolated values starts between two end points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Start {
    Zero,
    Center,
    One,
}

fn lin_interp(start: Start, left: f64, right: f64, n: usize) -> Vec<f64> {
    let delta = (right - left) / n as f64;
    let first = match start {
        Start::Zero => left,
        Start::Center => left + delta / 2.0,
        Start::One => left + delta,
    };
    (0..n).map(|i| first + i as f64 * delta).collect()
}

/// Spread `cntr` over `n` values centred on it, with slopes taken from the
/// neighbours. Without neighbours the value is repeated.
fn center_interp(left: Option<f64>, cntr: f64, right: Option<f64>, n: usize) -> Vec<f64> {
    let n_f = n as f64;
    let (d_left, d_right) = match (left, right) {
        (None, None) => (0.0, 0.0),
        (None, Some(r)) => ((r - cntr) / n_f, (r - cntr) / n_f),
        (Some(l), None) => ((cntr - l) / n_f, (cntr - l) / n_f),
        (Some(l), Some(r)) => ((cntr - l) / n_f, (r - cntr) / n_f),
    };
    (0..n)
        .map(|i| {
            let offset = i as f64 + 0.5 - n_f / 2.0;
            cntr + offset * if offset < 0.0 { d_left } else { d_right }
        })
        .collect()
}

fn center_interp_f32(left: Option<f32>, cntr: f32, right: Option<f32>, n: usize) -> Vec<f32> {
    center_interp(left.map(f64::from), f64::from(cntr), right.map(f64::from), n)
        .into_iter()
        .map(|v| v as f32)
        .collect()
}

/// Interpolate the three values of an angle triplet (start, centre, end of the
/// integration) over `n` readouts.
fn triplet_interp(v: [f32; 3], n: usize) -> Vec<[f32; 3]> {
    let (l, r) = (f64::from(v[0]), f64::from(v[2]));
    let zero = lin_interp(Start::Zero, l, r, n);
    let cntr = lin_interp(Start::Center, l, r, n);
    let one = lin_interp(Start::One, l, r, n);
    (0..n)
        .map(|i| [zero[i] as f32, cntr[i] as f32, one[i] as f32])
        .collect()
}

fn triplet_aggregate(first: [f32; 3], center: [f32; 3], last: [f32; 3]) -> [f32; 3] {
    [first[0], center[0], last[2]]
}

fn coord_lin_interp(start: Start, a: Coord, b: Coord, n: usize) -> Vec<Coord> {
    let offset = needs_lon_offset(a.lon) || needs_lon_offset(b.lon);
    let (pa, pb) = (a.to_xyz(offset), b.to_xyz(offset));
    let x = lin_interp(start, pa[0], pb[0], n);
    let y = lin_interp(start, pa[1], pb[1], n);
    let z = lin_interp(start, pa[2], pb[2], n);
    (0..n)
        .map(|i| Coord::from_xyz([x[i], y[i], z[i]], offset))
        .collect()
}

fn coord_center_interp(
    prev: Option<Coord>,
    cur: Coord,
    next: Option<Coord>,
    n: usize,
) -> Vec<Coord> {
    let offset = needs_lon_offset(cur.lon);
    let c = cur.to_xyz(offset);
    let p = prev.map(|p| p.to_xyz(offset));
    let q = next.map(|q| q.to_xyz(offset));
    let axis = |k: usize| center_interp(p.map(|v| v[k]), c[k], q.map(|v| v[k]), n);
    let (x, y, z) = (axis(0), axis(1), axis(2));
    (0..n)
        .map(|i| Coord::from_xyz([x[i], y[i], z[i]], offset))
        .collect()
}

/// Sub-satellite point of an aggregated group: the central record for odd group
/// sizes, the midpoint of the two central records for even ones.
fn group_center(points: &[Coord], icntr: usize, even: bool) -> Coord {
    if even && icntr > 0 {
        Coord::center(points[icntr - 1], points[icntr])
    } else {
        points[icntr]
    }
}

fn mean(values: impl Iterator<Item = f32>, n: usize) -> f32 {
    values.sum::<f32>() / n as f32
}

/// Mapping of a DSR's geolocation records onto readouts.
pub trait Resample: Sized + Clone {
    /// Combine a group of consecutive records into one.
    fn aggregate(group: &[Self]) -> Self;

    /// Spread `cur` over `n` readouts given its neighbours within the DSR.
    fn interpolate(prev: Option<&Self>, cur: &Self, next: Option<&Self>, n: usize) -> Vec<Self>;
}

/// Map `records` onto `n_read` readouts.
///
/// The result always has `n_read` entries when `records` is not empty.
pub fn resample<T: Resample>(records: &[T], n_read: usize) -> Vec<T> {
    if records.is_empty() || n_read == 0 {
        return Vec::new();
    }
    let mut out = if records.len() == n_read {
        records.to_vec()
    } else if records.len() > n_read {
        let nscale = records.len() / n_read;
        records
            .chunks_exact(nscale)
            .take(n_read)
            .map(T::aggregate)
            .collect()
    } else {
        let nscale = n_read / records.len();
        let mut out = Vec::with_capacity(n_read);
        for (i, cur) in records.iter().enumerate() {
            let prev = i.checked_sub(1).map(|p| &records[p]);
            let next = records.get(i + 1);
            out.extend(T::interpolate(prev, cur, next, nscale));
        }
        out
    };
    // readouts not covered by a whole multiple of the records repeat the last one
    if let Some(last) = out.last().cloned() {
        out.resize(n_read, last);
    }
    out
}

/// Nadir geolocation.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoNadir {
    pub pixel_type: u8,
    pub glint_flag: u8,
    pub pos_esm: f32,
    pub sat_h: f32,
    pub earth_rad: f32,
    /// Solar zenith angle at start, centre and end of the integration.
    pub sun_zen_ang: [f32; 3],
    pub sun_azi_ang: [f32; 3],
    pub los_zen_ang: [f32; 3],
    pub los_azi_ang: [f32; 3],
    pub sub_sat_point: Coord,
    pub corner: [Coord; 4],
    pub center: Coord,
}

impl Resample for GeoNadir {
    fn aggregate(group: &[Self]) -> Self {
        let nscale = group.len();
        let first = &group[0];
        let homogeneous = group.iter().all(|g| g.pixel_type == first.pixel_type);

        // the last forward scan closes the footprint when backscans are mixed in
        let (pixel_type, last) = if homogeneous {
            (first.pixel_type, nscale - 1)
        } else {
            let last_fscan = (1..nscale)
                .rev()
                .find(|&n| group[n].pixel_type == FORWARD_SCAN)
                .unwrap_or(0);
            (MIXED_PIXEL_TYPE, last_fscan)
        };
        let icntr = last.max(1) / 2;
        let icntr = if homogeneous { nscale / 2 } else { icntr };

        let center_angles = |f: fn(&GeoNadir) -> [f32; 3]| -> f32 {
            if homogeneous {
                f(&group[icntr])[0]
            } else {
                mean(group.iter().map(|g| f(g)[0]), nscale)
            }
        };
        let triplet = |f: fn(&GeoNadir) -> [f32; 3]| -> [f32; 3] {
            [f(first)[0], center_angles(f), f(&group[last])[2]]
        };

        let corner = [
            first.corner[0],
            first.corner[1],
            group[last].corner[2],
            group[last].corner[3],
        ];
        let points: Vec<Coord> = group.iter().map(|g| g.sub_sat_point).collect();

        GeoNadir {
            pixel_type,
            glint_flag: group.iter().fold(0, |acc, g| acc | g.glint_flag),
            pos_esm: mean(group.iter().map(|g| g.pos_esm), nscale),
            sat_h: mean(group.iter().map(|g| g.sat_h), nscale),
            earth_rad: mean(group.iter().map(|g| g.earth_rad), nscale),
            sun_zen_ang: triplet(|g| g.sun_zen_ang),
            sun_azi_ang: triplet(|g| g.sun_azi_ang),
            los_zen_ang: triplet(|g| g.los_zen_ang),
            los_azi_ang: triplet(|g| g.los_azi_ang),
            sub_sat_point: group_center(&points, icntr, nscale % 2 == 0),
            center: Coord::corner_center(&corner),
            corner,
        }
    }

    fn interpolate(prev: Option<&Self>, cur: &Self, next: Option<&Self>, n: usize) -> Vec<Self> {
        let pos_esm = center_interp_f32(prev.map(|p| p.pos_esm), cur.pos_esm, next.map(|q| q.pos_esm), n);
        let sat_h = center_interp_f32(prev.map(|p| p.sat_h), cur.sat_h, next.map(|q| q.sat_h), n);
        let earth_rad =
            center_interp_f32(prev.map(|p| p.earth_rad), cur.earth_rad, next.map(|q| q.earth_rad), n);
        let sun_zen = triplet_interp(cur.sun_zen_ang, n);
        let sun_azi = triplet_interp(cur.sun_azi_ang, n);
        let los_zen = triplet_interp(cur.los_zen_ang, n);
        let los_azi = triplet_interp(cur.los_azi_ang, n);
        let c0 = coord_lin_interp(Start::Zero, cur.corner[0], cur.corner[2], n);
        let c1 = coord_lin_interp(Start::Zero, cur.corner[1], cur.corner[3], n);
        let c2 = coord_lin_interp(Start::One, cur.corner[0], cur.corner[2], n);
        let c3 = coord_lin_interp(Start::One, cur.corner[1], cur.corner[3], n);
        let sub_sat = coord_center_interp(
            prev.map(|p| p.sub_sat_point),
            cur.sub_sat_point,
            next.map(|q| q.sub_sat_point),
            n,
        );

        (0..n)
            .map(|i| {
                let corner = [c0[i], c1[i], c2[i], c3[i]];
                GeoNadir {
                    pixel_type: cur.pixel_type,
                    glint_flag: cur.glint_flag,
                    pos_esm: pos_esm[i],
                    sat_h: sat_h[i],
                    earth_rad: earth_rad[i],
                    sun_zen_ang: sun_zen[i],
                    sun_azi_ang: sun_azi[i],
                    los_zen_ang: los_zen[i],
                    los_azi_ang: los_azi[i],
                    sub_sat_point: sub_sat[i],
                    center: Coord::corner_center(&corner),
                    corner,
                }
            })
            .collect()
    }
}

/// Limb and occultation geolocation.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLimb {
    pub pixel_type: u8,
    pub glint_flag: u8,
    pub pos_esm: f32,
    pub pos_asm: f32,
    pub sat_h: f32,
    pub earth_rad: f32,
    pub dopp_shift: f32,
    pub sun_zen_ang: [f32; 3],
    pub sun_azi_ang: [f32; 3],
    pub los_zen_ang: [f32; 3],
    pub los_azi_ang: [f32; 3],
    /// Tangent height at start, centre and end of the integration.
    pub tan_h: [f32; 3],
    pub sub_sat_point: Coord,
    pub tang_ground_point: [Coord; 3],
}

impl Resample for GeoLimb {
    fn aggregate(group: &[Self]) -> Self {
        let nscale = group.len();
        let icntr = nscale / 2;
        let (first, cntr, last) = (&group[0], &group[icntr], &group[nscale - 1]);
        let deep_space = group.iter().any(|g| g.pixel_type & DEEP_SPACE != 0);
        let points: Vec<Coord> = group.iter().map(|g| g.sub_sat_point).collect();

        GeoLimb {
            pixel_type: if deep_space {
                first.pixel_type | DEEP_SPACE
            } else {
                first.pixel_type
            },
            glint_flag: group.iter().fold(0, |acc, g| acc | g.glint_flag),
            pos_esm: mean(group.iter().map(|g| g.pos_esm), nscale),
            pos_asm: mean(group.iter().map(|g| g.pos_asm), nscale),
            sat_h: mean(group.iter().map(|g| g.sat_h), nscale),
            earth_rad: mean(group.iter().map(|g| g.earth_rad), nscale),
            dopp_shift: mean(group.iter().map(|g| g.dopp_shift), nscale),
            sun_zen_ang: triplet_aggregate(first.sun_zen_ang, cntr.sun_zen_ang, last.sun_zen_ang),
            sun_azi_ang: triplet_aggregate(first.sun_azi_ang, cntr.sun_azi_ang, last.sun_azi_ang),
            los_zen_ang: triplet_aggregate(first.los_zen_ang, cntr.los_zen_ang, last.los_zen_ang),
            los_azi_ang: triplet_aggregate(first.los_azi_ang, cntr.los_azi_ang, last.los_azi_ang),
            tan_h: triplet_aggregate(first.tan_h, cntr.tan_h, last.tan_h),
            sub_sat_point: group_center(&points, icntr, nscale % 2 == 0),
            tang_ground_point: [
                first.tang_ground_point[0],
                cntr.tang_ground_point[0],
                last.tang_ground_point[2],
            ],
        }
    }

    fn interpolate(prev: Option<&Self>, cur: &Self, next: Option<&Self>, n: usize) -> Vec<Self> {
        let scalar = |f: fn(&GeoLimb) -> f32| center_interp_f32(prev.map(f), f(cur), next.map(f), n);
        let pos_esm = scalar(|g| g.pos_esm);
        let pos_asm = scalar(|g| g.pos_asm);
        let sat_h = scalar(|g| g.sat_h);
        let earth_rad = scalar(|g| g.earth_rad);
        let dopp_shift = scalar(|g| g.dopp_shift);
        let sun_zen = triplet_interp(cur.sun_zen_ang, n);
        let sun_azi = triplet_interp(cur.sun_azi_ang, n);
        let los_zen = triplet_interp(cur.los_zen_ang, n);
        let los_azi = triplet_interp(cur.los_azi_ang, n);
        let tan_h = triplet_interp(cur.tan_h, n);
        let sub_sat = coord_center_interp(
            prev.map(|p| p.sub_sat_point),
            cur.sub_sat_point,
            next.map(|q| q.sub_sat_point),
            n,
        );
        let (tg_a, tg_b) = (cur.tang_ground_point[0], cur.tang_ground_point[2]);
        let tg0 = coord_lin_interp(Start::Zero, tg_a, tg_b, n);
        let tg2 = coord_lin_interp(Start::One, tg_a, tg_b, n);

        (0..n)
            .map(|i| GeoLimb {
                pixel_type: if i == 0 {
                    cur.pixel_type
                } else {
                    cur.pixel_type & !NEW_TANGENT_HEIGHT
                },
                glint_flag: cur.glint_flag,
                pos_esm: pos_esm[i],
                pos_asm: pos_asm[i],
                sat_h: sat_h[i],
                earth_rad: earth_rad[i],
                dopp_shift: dopp_shift[i],
                sun_zen_ang: sun_zen[i],
                sun_azi_ang: sun_azi[i],
                los_zen_ang: los_zen[i],
                los_azi_ang: los_azi[i],
                tan_h: tan_h[i],
                sub_sat_point: sub_sat[i],
                tang_ground_point: [tg0[i], Coord::center(tg0[i], tg2[i]), tg2[i]],
            })
            .collect()
    }
}

/// Monitoring (sun, moon, calibration lamp) geolocation.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoMonitor {
    pub pos_esm: f32,
    pub pos_asm: f32,
    pub sun_zen_ang: f32,
    pub sub_sat_point: Coord,
}

impl Resample for GeoMonitor {
    fn aggregate(group: &[Self]) -> Self {
        let nscale = group.len();
        let icntr = nscale / 2;
        let points: Vec<Coord> = group.iter().map(|g| g.sub_sat_point).collect();
        GeoMonitor {
            pos_esm: mean(group.iter().map(|g| g.pos_esm), nscale),
            pos_asm: mean(group.iter().map(|g| g.pos_asm), nscale),
            sun_zen_ang: group[icntr].sun_zen_ang,
            sub_sat_point: group_center(&points, icntr, nscale % 2 == 0),
        }
    }

    fn interpolate(prev: Option<&Self>, cur: &Self, next: Option<&Self>, n: usize) -> Vec<Self> {
        let scalar =
            |f: fn(&GeoMonitor) -> f32| center_interp_f32(prev.map(f), f(cur), next.map(f), n);
        let pos_esm = scalar(|g| g.pos_esm);
        let pos_asm = scalar(|g| g.pos_asm);
        let sun_zen_ang = scalar(|g| g.sun_zen_ang);
        let sub_sat = coord_center_interp(
            prev.map(|p| p.sub_sat_point),
            cur.sub_sat_point,
            next.map(|q| q.sub_sat_point),
            n,
        );
        (0..n)
            .map(|i| GeoMonitor {
                pos_esm: pos_esm[i],
                pos_asm: pos_asm[i],
                sun_zen_ang: sun_zen_ang[i],
                sub_sat_point: sub_sat[i],
            })
            .collect()
    }
}

/// Geolocation records of one viewing geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeoRecords {
    Nadir(Vec<GeoNadir>),
    /// Limb and occultation states.
    Limb(Vec<GeoLimb>),
    Monitor(Vec<GeoMonitor>),
}

impl GeoRecords {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            GeoRecords::Nadir(v) => v.len(),
            GeoRecords::Limb(v) => v.len(),
            GeoRecords::Monitor(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty collection of the same geometry.
    #[must_use]
    pub fn empty_like(&self, capacity: usize) -> Self {
        match self {
            GeoRecords::Nadir(_) => GeoRecords::Nadir(Vec::with_capacity(capacity)),
            GeoRecords::Limb(_) => GeoRecords::Limb(Vec::with_capacity(capacity)),
            GeoRecords::Monitor(_) => GeoRecords::Monitor(Vec::with_capacity(capacity)),
        }
    }

    /// Records mapped onto `n_read` readouts, see [`resample`].
    #[must_use]
    pub fn resample(&self, n_read: usize) -> Self {
        match self {
            GeoRecords::Nadir(v) => GeoRecords::Nadir(resample(v, n_read)),
            GeoRecords::Limb(v) => GeoRecords::Limb(resample(v, n_read)),
            GeoRecords::Monitor(v) => GeoRecords::Monitor(resample(v, n_read)),
        }
    }

    /// Append the records of `other`.
    ///
    /// # Errors
    /// [`Error::InvalidState`] if the geometries differ.
    pub fn append(&mut self, other: GeoRecords) -> Result<()> {
        match (self, other) {
            (GeoRecords::Nadir(a), GeoRecords::Nadir(b)) => a.extend(b),
            (GeoRecords::Limb(a), GeoRecords::Limb(b)) => a.extend(b),
            (GeoRecords::Monitor(a), GeoRecords::Monitor(b)) => a.extend(b),
            _ => {
                return Err(Error::InvalidState(
                    "geolocation records of different geometries".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Solar zenith angle at the centre of observation `obs`.
    #[must_use]
    pub fn sun_zenith(&self, obs: usize) -> Option<f32> {
        match self {
            GeoRecords::Nadir(v) => v.get(obs).map(|g| g.sun_zen_ang[1]),
            GeoRecords::Limb(v) => v.get(obs).map(|g| g.sun_zen_ang[1]),
            GeoRecords::Monitor(v) => v.get(obs).map(|g| g.sun_zen_ang),
        }
    }
}
