use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::RankError;

/// Largest device block; bounded by the on-device sort's shared memory.
pub const MAX_DEVICE_CHUNK_ROWS: usize = 4096;

/// Which backend a [`Ranker`](super::Ranker) should run.
///
/// Parsed from `cpu`, `host`, `cuda`, `cuda:N`, `metal`, `metal:N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendKind {
    /// SIMD scan over host memory.
    Cpu,
    /// Accelerator pipeline on candle's host device.
    Host,
    Cuda(usize),
    Metal(usize),
}

impl BackendKind {
    pub fn is_accelerator(self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::Cpu
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Host => f.write_str("host"),
            Self::Cuda(n) => write!(f, "cuda:{n}"),
            Self::Metal(n) => write!(f, "metal:{n}"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = RankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (name, ordinal) = match lower.split_once(':') {
            Some((name, n)) => {
                let n = n
                    .parse::<usize>()
                    .map_err(|_| RankError::UnknownBackend(s.to_string()))?;
                (name, Some(n))
            }
            None => (lower.as_str(), None),
        };
        match (name, ordinal) {
            ("cpu", None) => Ok(Self::Cpu),
            ("host", None) => Ok(Self::Host),
            ("cuda" | "gpu", n) => Ok(Self::Cuda(n.unwrap_or(0))),
            ("metal", n) => Ok(Self::Metal(n.unwrap_or(0))),
            _ => Err(RankError::UnknownBackend(s.to_string())),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = RankError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        kind.to_string()
    }
}

/// Query-time configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankConfig {
    pub backend: BackendKind,
    /// Rows per device block.
    pub device_chunk_rows: usize,
    /// Width of the device candidate band. Must exceed twice the largest
    /// device-vs-host score difference for results to match the CPU backend.
    pub parity_epsilon: f32,
    /// Score rows on the rayon pool.
    pub parallel: bool,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Cpu,
            device_chunk_rows: 1024,
            parity_epsilon: 1e-3,
            parallel: true,
        }
    }
}

impl RankConfig {
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn validate(&self) -> Result<(), RankError> {
        if self.device_chunk_rows == 0 || self.device_chunk_rows > MAX_DEVICE_CHUNK_ROWS {
            return Err(RankError::InvalidConfig(format!(
                "device_chunk_rows must be in 1..={MAX_DEVICE_CHUNK_ROWS}, got {}",
                self.device_chunk_rows
            )));
        }
        if !self.parity_epsilon.is_finite() || self.parity_epsilon <= 0.0 {
            return Err(RankError::InvalidConfig(format!(
                "parity_epsilon must be positive and finite, got {}",
                self.parity_epsilon
            )));
        }
        Ok(())
    }
}
