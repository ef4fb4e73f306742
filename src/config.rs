//! Audit configuration
//!
//! Consensus tolerance profiles and the knobs of the retry loop.

use crate::error::AuditError;
use crate::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Relative factor + absolute floor used to decide whether two figures agree
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ToleranceProfile {
    pub relative_factor: f64,
    pub absolute_floor: f64,
}

impl ToleranceProfile {
    /// 0.01% or 1 unit, whichever is larger
    pub fn strict() -> Self {
        Self {
            relative_factor: 0.0001,
            absolute_floor: 1.0,
        }
    }

    /// 0.1% or 5 units, whichever is larger
    pub fn loose() -> Self {
        Self {
            relative_factor: 0.001,
            absolute_floor: 5.0,
        }
    }

    pub fn custom(relative_factor: f64, absolute_floor: f64) -> Result<Self> {
        let valid = |v: f64| v.is_finite() && v >= 0.0;
        if !valid(relative_factor) || !valid(absolute_floor) {
            return Err(AuditError::InvalidTolerance(format!(
                "relative_factor={}, absolute_floor={}",
                relative_factor, absolute_floor
            )));
        }

        Ok(Self {
            relative_factor,
            absolute_floor,
        })
    }

    /// Tolerance applied around a baseline value
    pub fn tolerance_for(&self, baseline: f64) -> f64 {
        (baseline.abs() * self.relative_factor).max(self.absolute_floor)
    }
}

impl Default for ToleranceProfile {
    fn default() -> Self {
        Self::strict()
    }
}

impl FromStr for ToleranceProfile {
    type Err = AuditError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::strict()),
            "loose" => Ok(Self::loose()),
            other => Err(AuditError::InvalidTolerance(other.to_string())),
        }
    }
}

/// Configuration for one audit run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Upper bound on build-plan → run → validate → consensus cycles
    pub max_attempts: u32,
    pub replica_count: usize,
    pub tolerance: ToleranceProfile,
    /// Pause between failed attempts; zero means retry immediately
    pub backoff: Duration,
    /// Extracted values at or below this magnitude are discarded
    pub materiality_floor: Decimal,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            replica_count: 3,
            tolerance: ToleranceProfile::strict(),
            backoff: Duration::ZERO,
            materiality_floor: Decimal::from(1000),
        }
    }
}

impl AuditConfig {
    /// Build a config from `AUDIT_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = read_var("AUDIT_MAX_ATTEMPTS") {
            config.max_attempts = parse_var("AUDIT_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = read_var("AUDIT_REPLICAS") {
            config.replica_count = parse_var("AUDIT_REPLICAS", &raw)?;
        }
        if let Some(raw) = read_var("AUDIT_TOLERANCE") {
            config.tolerance = raw.parse()?;
        }
        if let Some(raw) = read_var("AUDIT_BACKOFF_MS") {
            config.backoff = Duration::from_millis(parse_var("AUDIT_BACKOFF_MS", &raw)?);
        }
        if let Some(raw) = read_var("AUDIT_MATERIALITY_FLOOR") {
            config.materiality_floor = parse_var("AUDIT_MATERIALITY_FLOOR", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(AuditError::ConfigError(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.replica_count == 0 {
            return Err(AuditError::ConfigError(
                "replica_count must be at least 1".to_string(),
            ));
        }
        if self.materiality_floor.is_sign_negative() {
            return Err(AuditError::ConfigError(
                "materiality_floor must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| AuditError::ConfigError(format!("{} has invalid value '{}'", name, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance_profiles() {
        let strict = ToleranceProfile::strict();
        assert_eq!(strict.tolerance_for(1_000_000.0), 100.0);
        assert_eq!(strict.tolerance_for(500.0), 1.0);

        let loose = ToleranceProfile::loose();
        assert_eq!(loose.tolerance_for(-1_000_000.0), 1000.0);
        assert_eq!(loose.tolerance_for(10.0), 5.0);
    }

    #[test]
    fn test_custom_profile_rejects_negative() {
        assert!(ToleranceProfile::custom(-0.1, 1.0).is_err());
        assert!(ToleranceProfile::custom(0.0, f64::NAN).is_err());
        assert!(ToleranceProfile::custom(0.0, 1.0).is_ok());
    }

    #[test]
    fn test_profile_from_str() {
        assert_eq!("LOOSE".parse::<ToleranceProfile>().unwrap(), ToleranceProfile::loose());
        assert!("medium".parse::<ToleranceProfile>().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AuditConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 3);

        let broken = AuditConfig {
            max_attempts: 0,
            ..AuditConfig::default()
        };
        assert!(broken.validate().is_err());
    }
}
