#![doc = include_str!("../README.md")]

mod error;

pub mod bytes;
pub mod calib;
pub mod cluster;
pub mod config;
pub mod geolocation;
pub mod level1b;
pub mod level1c;
pub mod packet;
pub mod sdmf;
pub mod stats;
pub mod time;

pub use calib::{calibrate, CalibMask, Pipeline, Status};
pub use config::CalibConfig;
pub use error::{
    CalibError, CalibErrorKind, DecodeError, Diagnostic, Diagnostics, Error, Result, Severity,
};
pub use level1c::{reorganize, Level1cProduct, Level1cSeries};
pub use packet::{decode, decode_packets, DecodedPacket};
pub use sdmf::{CorrectionResolver, CorrectionStore, MemoryStore};
