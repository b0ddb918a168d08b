//! Arena settings loaded from TOML.
//!
//! ```toml
//! min_growth = 4096
//! placement = "best-fit"
//! verbose = true
//! ```

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{arena::DEFAULT_MIN_GROWTH, error::ConfigError, fit::Placement};

/// Initial settings for an [`Arena`](crate::Arena). Missing keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArenaConfig {
  /// Minimum growth chunk in bytes; clamped like `Arena::set_min_growth`.
  pub min_growth: usize,
  /// Block placement strategy.
  pub placement: Placement,
  /// Write diagnostics to the sink.
  pub verbose: bool,
}

impl Default for ArenaConfig {
  fn default() -> Self {
    Self {
      min_growth: DEFAULT_MIN_GROWTH,
      placement: Placement::FirstFit,
      verbose: false,
    }
  }
}

impl ArenaConfig {
  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(text)?)
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    Self::from_toml_str(&text)
  }
}
