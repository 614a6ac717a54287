// Analysis configuration
// Aggregates the per-stage configs and validates them before a run

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::onsets::RefineConfig;
use crate::roles::RoleConfig;
use crate::sections::SectionConfig;
use crate::streams::{SimplifyConfig, StreamConfig};

/// Errors raised for unusable configuration values
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Require a strictly positive, finite value
pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("must be > 0, got {}", value)))
    }
}

/// Require a finite value >= 0
pub(crate) fn require_non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("must be >= 0, got {}", value)))
    }
}

/// Require a value in [0, 1]
pub(crate) fn require_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("must be in [0, 1], got {}", value)))
    }
}

/// Full configuration for one analysis run
/// Missing keys in a JSON document fall back to the defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub refine: RefineConfig,
    pub streams: StreamConfig,
    pub simplify: SimplifyConfig,
    pub sections: SectionConfig,
    pub roles: RoleConfig,
}

impl AnalysisConfig {
    /// Parse a (possibly partial) JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every stage config
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.refine.validate()?;
        self.streams.validate()?;
        self.simplify.validate()?;
        self.sections.validate()?;
        self.roles.validate()?;
        Ok(())
    }
}
