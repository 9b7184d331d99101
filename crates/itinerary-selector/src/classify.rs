//! Category bucket classification
//!
//! Classification must be pure: the statistics layer stores the bucket chosen
//! at accept time and never asks again, so the same inputs have to map to the
//! same bucket for the whole request.

use crate::{Bucket, Combination, CombinationInfo, PricedResult, PRICE_COMP_DELTA};
use serde::{Deserialize, Serialize};

/// Maps a priced combination to its category bucket.
///
/// `None` marks the candidate as unclassifiable; it is rejected without side
/// effects.
pub trait BucketClassifier: Send {
    fn classify(
        &self,
        combination: &Combination,
        info: &CombinationInfo,
        priced: &PricedResult,
    ) -> Option<Bucket>;
}

impl<F> BucketClassifier for F
where
    F: Fn(&Combination, &CombinationInfo, &PricedResult) -> Option<Bucket> + Send,
{
    fn classify(
        &self,
        combination: &Combination,
        info: &CombinationInfo,
        priced: &PricedResult,
    ) -> Option<Bucket> {
        self(combination, info, priced)
    }
}

/// Price / travel-time separator classifier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeparatorClassifier {
    pub fare_amount_separator: f64,
    /// Minutes
    pub travel_time_separator: u32,
}

impl SeparatorClassifier {
    pub fn new(fare_amount_separator: f64, travel_time_separator: u32) -> Self {
        Self {
            fare_amount_separator,
            travel_time_separator,
        }
    }

    pub fn detect_bucket(&self, duration: u32, price: f64) -> Bucket {
        let cheap = price - self.fare_amount_separator <= PRICE_COMP_DELTA;
        let fast = duration <= self.travel_time_separator;
        match (cheap, fast) {
            (true, true) => Bucket::Gold,
            (false, true) => Bucket::Luxury,
            (true, false) => Bucket::Ugly,
            (false, false) => Bucket::Junk,
        }
    }
}

impl BucketClassifier for SeparatorClassifier {
    fn classify(
        &self,
        _combination: &Combination,
        _info: &CombinationInfo,
        priced: &PricedResult,
    ) -> Option<Bucket> {
        priced
            .is_valid()
            .then(|| self.detect_bucket(priced.duration, priced.price))
    }
}
