use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::calib::Stage;

/// Errors decoding a single telemetry packet.
///
/// Any of these is fatal for the packet it was produced for, but never for the
/// stream the packet came from; see [`decode_packets`](crate::packet::decode_packets).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// The declared length does not agree with the bytes available or consumed.
    #[error("truncated packet: declared {declared} bytes, got {actual}")]
    Truncated { declared: usize, actual: usize },
    /// A read went past the end of the buffer.
    #[error("not enough bytes at offset {offset}: wanted {wanted}, {available} available")]
    NotEnoughData {
        offset: usize,
        wanted: usize,
        available: usize,
    },
    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),
    #[error("invalid channel id {0}")]
    InvalidChannel(u8),
    #[error("invalid co-adding factor {0}")]
    InvalidCoadd(u8),
    /// A corrupted cluster header could not be matched against the known cluster
    /// definitions.
    #[error("cannot correct corrupted cluster header (channel {channel}, cluster {cluster})")]
    ClusterDefinition { channel: u8, cluster: u8 },
}

/// Status severity, ordered from harmless to fatal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    None,
    Warning,
    Fatal,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::None => write!(f, "none"),
            Severity::Warning => write!(f, "warning"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stage or component that produced the message.
    pub source: String,
    pub message: String,
}

/// Bounded list of diagnostics with the highest severity seen so far.
///
/// Messages beyond [`Diagnostics::CAPACITY`] are counted but not kept.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    severity: Severity,
    messages: Vec<Diagnostic>,
    dropped: usize,
}

impl Diagnostics {
    pub const CAPACITY: usize = 32;

    pub fn push(&mut self, severity: Severity, source: impl Into<String>, message: impl Into<String>) {
        self.severity = self.severity.max(severity);
        if self.messages.len() < Self::CAPACITY {
            self.messages.push(Diagnostic {
                severity,
                source: source.into(),
                message: message.into(),
            });
        } else {
            self.dropped += 1;
        }
    }

    pub fn warn(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, source, message);
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn messages(&self) -> &[Diagnostic] {
        &self.messages
    }

    /// Number of warnings, including ones that did not fit.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
            + self.dropped
    }

    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.dropped == 0
    }

    /// Move all messages of `other` into this list.
    pub fn extend(&mut self, other: Diagnostics) {
        for d in other.messages {
            self.push(d.severity, d.source, d.message);
        }
        self.dropped += other.dropped;
        self.severity = self.severity.max(other.severity);
    }
}

/// Reason a product could not be calibrated.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CalibErrorKind {
    /// Correction data required by an enabled stage is not available.
    #[error("{stage}: missing required correction data {what}")]
    MissingRequired { stage: Stage, what: String },
    /// Correction data does not cover the pixels of a series.
    #[error("{stage}: correction table has {actual} entries, need {needed}")]
    TableSize {
        stage: Stage,
        needed: usize,
        actual: usize,
    },
    #[error("{stage}: {message}")]
    Invalid { stage: Stage, message: String },
}

/// Fatal calibration failure for one product.
///
/// Carries the diagnostics gathered up to the failure so callers can report
/// warnings emitted by the stages that did run.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct CalibError {
    pub kind: CalibErrorKind,
    pub diagnostics: Diagnostics,
}

impl CalibError {
    #[must_use]
    pub fn new(kind: CalibErrorKind) -> Self {
        let mut diagnostics = Diagnostics::default();
        diagnostics.push(Severity::Fatal, "calibration", kind.to_string());
        Self { kind, diagnostics }
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }

    /// Attach diagnostics collected before the failure.
    #[must_use]
    pub fn with_history(mut self, mut history: Diagnostics) -> Self {
        history.extend(self.diagnostics);
        self.diagnostics = history;
        self
    }
}

impl From<CalibErrorKind> for CalibError {
    fn from(kind: CalibErrorKind) -> Self {
        Self::new(kind)
    }
}

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Calib(#[from] CalibError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A level-1b state is inconsistent as a whole.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("allocation failed for {0}")]
    Allocation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_are_bounded() {
        let mut diag = Diagnostics::default();
        for i in 0..Diagnostics::CAPACITY + 5 {
            diag.warn("test", format!("message {i}"));
        }
        assert_eq!(diag.messages().len(), Diagnostics::CAPACITY);
        assert_eq!(diag.dropped(), 5);
        assert_eq!(diag.warning_count(), Diagnostics::CAPACITY + 5);
        assert_eq!(diag.severity(), Severity::Warning);
    }

    #[test]
    fn severity_only_escalates() {
        let mut diag = Diagnostics::default();
        assert_eq!(diag.severity(), Severity::None);
        diag.push(Severity::Fatal, "a", "boom");
        diag.warn("b", "meh");
        assert_eq!(diag.severity(), Severity::Fatal);
    }

    #[test]
    fn calib_error_keeps_history() {
        let mut history = Diagnostics::default();
        history.warn("dark", "no orbital dark");
        let err = CalibError::new(CalibErrorKind::MissingRequired {
            stage: Stage::Memory,
            what: "memory table".into(),
        })
        .with_history(history);

        assert_eq!(err.severity(), Severity::Fatal);
        assert_eq!(err.diagnostics.messages().len(), 2);
        assert_eq!(err.diagnostics.severity(), Severity::Fatal);
        assert_eq!(err.diagnostics.warning_count(), 1);
    }
}
