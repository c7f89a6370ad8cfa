//! Process configuration, loaded from a JSON file.
//!
//! Every field has a default, so an empty object `{}` is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use triplex_core::{RankConfig, RankError, VectorType};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Rank(#[from] RankError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory of the local object store.
    pub store_root: PathBuf,
    pub build: BuildConfig,
    pub rank: RankConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("store"),
            build: BuildConfig::default(),
            rank: RankConfig::default(),
        }
    }
}

/// Index construction settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Storage type of the built index.
    #[serde(with = "vector_type_name")]
    pub vector_type: VectorType,
    /// Log a warning for vectors that are not unit length.
    pub warn_unnormalized: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            vector_type: VectorType::Int8,
            warn_unnormalized: true,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load `path` if given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rank.validate()?;
        Ok(())
    }
}

/// Config files name the vector type (`"int8"`, `"float32"`) rather than
/// using the on-disk tag.
mod vector_type_name {
    use serde::{Deserialize, Deserializer, Serializer};
    use triplex_core::VectorType;

    pub fn serialize<S: Serializer>(ty: &VectorType, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(ty.name())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<VectorType, D::Error> {
        let name = String::deserialize(d)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
