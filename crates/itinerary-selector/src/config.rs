//! Quota configuration
//!
//! Loaded once before a request begins. The engine copies the values it
//! needs; only the fare cutoff evolves afterwards, and it lives in the engine.

use crate::{Bucket, Result, SelectorError, TodRange, MINUTES_PER_DAY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Target share of the requested count per category bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketDistribution {
    pub gold: f64,
    pub ugly: f64,
    pub luxury: f64,
    pub junk: f64,
}

impl Default for BucketDistribution {
    fn default() -> Self {
        Self {
            gold: 0.25,
            ugly: 0.25,
            luxury: 0.25,
            junk: 0.25,
        }
    }
}

impl BucketDistribution {
    pub fn fraction(&self, bucket: Bucket) -> f64 {
        match bucket {
            Bucket::Gold => self.gold,
            Bucket::Ugly => self.ugly,
            Bucket::Luxury => self.luxury,
            Bucket::Junk => self.junk,
        }
    }

    /// Number of slots a bucket may hold out of `requested`
    pub fn quota(&self, bucket: Bucket, requested: usize) -> usize {
        (self.fraction(bucket) * requested as f64 + 1e-9).floor() as usize
    }

    pub fn total(&self) -> f64 {
        Bucket::ALL.iter().map(|&b| self.fraction(b)).sum()
    }
}

fn default_coef() -> f64 {
    1.0
}

fn default_max_discontinue() -> usize {
    1_000_000
}

/// Per-request quota parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Hard cap on accepted combinations
    pub requested_solutions: usize,
    #[serde(default)]
    pub bucket_distribution: BucketDistribution,
    /// Departure windows for time-of-day diversity
    #[serde(default)]
    pub tod_ranges: Vec<TodRange>,
    /// Target share per TOD range, parallel to `tod_ranges`
    #[serde(default)]
    pub tod_distribution: Vec<f64>,
    /// Online non-stop quota per governing carrier
    #[serde(default)]
    pub non_stop_per_carrier: BTreeMap<String, usize>,
    /// Non-stops wanted in total, online or interline
    #[serde(default)]
    pub min_non_stops: usize,
    /// Accepted combinations wanted per governing carrier
    #[serde(default)]
    pub options_per_carrier: BTreeMap<String, usize>,
    /// Every option of the first two legs should appear in some accepted combination
    #[serde(default)]
    pub represent_all_options: bool,
    #[serde(default)]
    pub max_long_connection: Option<usize>,
    /// Max accepted combinations sharing one (leg, option)
    #[serde(default)]
    pub schedule_repeat_limit: Option<usize>,
    #[serde(default)]
    pub num_custom_solutions: usize,
    /// Initial fare cutoff; raised by calibration, never lowered
    #[serde(default)]
    pub fare_cutoff_amount: Option<f64>,
    /// Cutoff as a multiple of the cheapest accepted price
    #[serde(default)]
    pub fare_cutoff_coef: Option<f64>,
    #[serde(default)]
    pub fare_amount_separator: Option<f64>,
    /// Minutes
    #[serde(default)]
    pub travel_time_separator: Option<u32>,
    #[serde(default = "default_coef")]
    pub fare_cutoff_calc_coef: f64,
    #[serde(default = "default_coef")]
    pub travel_time_separator_coef: f64,
    /// Consecutive offers without bucket progress before giving up
    #[serde(default = "default_max_discontinue")]
    pub max_discontinue_processing: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            requested_solutions: 10,
            bucket_distribution: BucketDistribution::default(),
            tod_ranges: Vec::new(),
            tod_distribution: Vec::new(),
            non_stop_per_carrier: BTreeMap::new(),
            min_non_stops: 0,
            options_per_carrier: BTreeMap::new(),
            represent_all_options: false,
            max_long_connection: None,
            schedule_repeat_limit: None,
            num_custom_solutions: 0,
            fare_cutoff_amount: None,
            fare_cutoff_coef: None,
            fare_amount_separator: None,
            travel_time_separator: None,
            fare_cutoff_calc_coef: default_coef(),
            travel_time_separator_coef: default_coef(),
            max_discontinue_processing: default_max_discontinue(),
        }
    }
}

impl QuotaConfig {
    pub fn with_requested(mut self, requested: usize) -> Self {
        self.requested_solutions = requested;
        self
    }

    pub fn bucket_quota(&self, bucket: Bucket) -> usize {
        self.bucket_distribution.quota(bucket, self.requested_solutions)
    }

    /// Fare and travel-time separators when both are fixed up front
    pub fn fixed_separators(&self) -> Option<(f64, u32)> {
        self.fare_amount_separator.zip(self.travel_time_separator)
    }

    /// Options needed per TOD range: share x requested count, rounded up
    pub fn tod_targets(&self) -> Vec<usize> {
        (0..self.tod_distribution.len()).map(|tod| self.tod_target(tod)).collect()
    }

    pub fn tod_target(&self, tod: usize) -> usize {
        self.tod_distribution
            .get(tod)
            .map_or(0, |f| (f * self.requested_solutions as f64 - 1e-9).ceil().max(0.0) as usize)
    }

    /// Reject configurations that cannot drive a search
    pub fn validate(&self) -> Result<()> {
        if self.requested_solutions == 0 {
            return Err(invalid("requested_solutions must be positive"));
        }

        for bucket in Bucket::ALL {
            let f = self.bucket_distribution.fraction(bucket);
            if !(0.0..=1.0).contains(&f) {
                return Err(invalid(format!("{:?} fraction {} outside [0, 1]", bucket, f)));
            }
        }
        let total = self.bucket_distribution.total();
        if total <= 0.0 || total > 1.0 + 1e-6 {
            return Err(invalid(format!("bucket fractions sum to {}", total)));
        }

        for range in &self.tod_ranges {
            if range.start > range.end || range.end >= MINUTES_PER_DAY {
                return Err(invalid(format!(
                    "time-of-day range {}..={} is not within one day",
                    range.start, range.end
                )));
            }
        }
        if !self.tod_distribution.is_empty() && self.tod_distribution.len() != self.tod_ranges.len() {
            return Err(invalid(format!(
                "{} TOD fractions for {} TOD ranges",
                self.tod_distribution.len(),
                self.tod_ranges.len()
            )));
        }
        if self.tod_distribution.iter().any(|f| !(0.0..=1.0).contains(f)) {
            return Err(invalid("TOD fractions must lie in [0, 1]"));
        }

        if let Some(cutoff) = self.fare_cutoff_amount {
            if !cutoff.is_finite() || cutoff < 0.0 {
                return Err(invalid(format!("fare cutoff {} is not a price", cutoff)));
            }
        }
        if let Some(sep) = self.fare_amount_separator {
            if !sep.is_finite() || sep < 0.0 {
                return Err(invalid(format!("fare separator {} is not a price", sep)));
            }
        }
        let coefs = [
            ("fare_cutoff_coef", self.fare_cutoff_coef.unwrap_or(1.0)),
            ("fare_cutoff_calc_coef", self.fare_cutoff_calc_coef),
            ("travel_time_separator_coef", self.travel_time_separator_coef),
        ];
        for (name, value) in coefs {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!("{} must be positive, got {}", name, value)));
            }
        }
        if self.schedule_repeat_limit == Some(0) {
            return Err(invalid("schedule_repeat_limit of 0 would reject every candidate"));
        }
        if self.max_discontinue_processing == 0 {
            return Err(invalid("max_discontinue_processing must be positive"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> SelectorError {
    SelectorError::InvalidConfig(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(QuotaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bucket_quota_floors() {
        let config = QuotaConfig::default().with_requested(10);
        assert_eq!(config.bucket_quota(Bucket::Gold), 2);

        let half = BucketDistribution {
            gold: 0.5,
            ugly: 0.5,
            luxury: 0.0,
            junk: 0.0,
        };
        assert_eq!(half.quota(Bucket::Gold, 2), 1);
        assert_eq!(half.quota(Bucket::Junk, 2), 0);
        assert_eq!(half.quota(Bucket::Ugly, 3), 1);
    }

    #[test]
    fn test_validate_rejects_bad_fractions() {
        let mut config = QuotaConfig::default();
        config.bucket_distribution.gold = 0.9;
        assert!(matches!(config.validate(), Err(SelectorError::InvalidConfig(_))));

        config.bucket_distribution = BucketDistribution {
            gold: 0.0,
            ugly: 0.0,
            luxury: 0.0,
            junk: 0.0,
        };
        assert!(config.validate().is_err());

        config.bucket_distribution.gold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_requested() {
        assert!(QuotaConfig::default().with_requested(0).validate().is_err());
    }

    #[test]
    fn test_validate_tod_ranges() {
        let mut config = QuotaConfig::default();
        config.tod_ranges = vec![TodRange::new(0, 719), TodRange::new(720, 1439)];
        config.tod_distribution = vec![0.5, 0.5];
        assert!(config.validate().is_ok());
        assert_eq!(config.tod_targets(), vec![5, 5]);
        assert_eq!(config.tod_target(2), 0);
        config.tod_distribution = vec![0.3, 0.7];
        assert_eq!(config.tod_targets(), vec![3, 7]);
        config.tod_distribution = vec![0.5, 0.5];

        config.tod_distribution = vec![1.0];
        assert!(config.validate().is_err());

        config.tod_distribution.clear();
        config.tod_ranges.push(TodRange::new(100, 1440));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_coefficients() {
        let mut config = QuotaConfig::default();
        config.fare_cutoff_coef = Some(0.0);
        assert!(config.validate().is_err());
        config.fare_cutoff_coef = Some(1.5);
        config.travel_time_separator_coef = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let json = r#"{ "requested_solutions": 4, "non_stop_per_carrier": { "AA": 1 } }"#;
        let config: QuotaConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.requested_solutions, 4);
        assert_eq!(config.fare_cutoff_calc_coef, 1.0);
        assert_eq!(config.max_discontinue_processing, 1_000_000);
        assert_eq!(config.non_stop_per_carrier.get("AA"), Some(&1));
        assert!(config.fixed_separators().is_none());
        assert!(!config.represent_all_options);
        assert!(config.options_per_carrier.is_empty());
    }

    #[test]
    fn test_fixed_separators_need_both() {
        let mut config = QuotaConfig::default();
        config.fare_amount_separator = Some(250.0);
        assert!(config.fixed_separators().is_none());
        config.travel_time_separator = Some(480);
        assert_eq!(config.fixed_separators(), Some((250.0, 480)));
    }

    #[test]
    fn test_validate_rejects_zero_repeat_limit() {
        let mut config = QuotaConfig::default();
        config.schedule_repeat_limit = Some(0);
        assert!(matches!(config.validate(), Err(SelectorError::InvalidConfig(_))));
        config.schedule_repeat_limit = Some(1);
        assert!(config.validate().is_ok());
    }
}
