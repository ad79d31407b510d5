pub mod bucket;
pub mod domain;

pub use bucket::TokenBucket;
pub use domain::{DomainRateLimiter, Origin};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Refill rate and burst capacity applied to every origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateConfig {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl RateConfig {
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(Error::Config(format!(
                "requests_per_second must be a positive number, got {}",
                self.requests_per_second
            )));
        }
        if self.burst == 0 {
            return Err(Error::Config("burst must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self::new(default_requests_per_second(), default_burst())
    }
}

fn default_requests_per_second() -> f64 {
    2.0
}

fn default_burst() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate() {
        let config = RateConfig::default();
        assert_eq!(config.requests_per_second, 2.0);
        assert_eq!(config.burst, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_rates() {
        assert!(RateConfig::new(0.0, 5).validate().is_err());
        assert!(RateConfig::new(-1.0, 5).validate().is_err());
        assert!(RateConfig::new(f64::NAN, 5).validate().is_err());
        assert!(RateConfig::new(f64::INFINITY, 5).validate().is_err());
        assert!(RateConfig::new(2.0, 0).validate().is_err());
    }
}
